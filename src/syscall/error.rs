//! Códigos de erro do Brasa OS.
//!
//! Dentro do kernel os subsistemas propagam `Result<T, SysError>`; a
//! conversão para o inteiro negativo do ABI acontece UMA vez, na borda da
//! syscall (`as_isize`). Os valores seguem a numeração errno clássica.

/// Enum de erros do sistema.
///
/// Valores são i32 para permitir representação negativa em isize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SysError {
    /// Operação não permitida (EPERM)
    PermissionDenied = 1,
    /// Objeto não encontrado (ENOENT)
    NotFound = 2,
    /// Descritor inválido ou fechado (EBADF)
    BadDescriptor = 9,
    /// Sem processos filhos (ECHILD)
    NoChild = 10,
    /// Operação bloquearia / recurso de processo esgotado (EAGAIN)
    WouldBlock = 11,
    /// Sem memória disponível (ENOMEM)
    OutOfMemory = 12,
    /// Acesso negado (EACCES)
    AccessDenied = 13,
    /// Endereço inválido ou não mapeado (EFAULT)
    BadAddress = 14,
    /// Objeto já existe (EEXIST)
    AlreadyExists = 17,
    /// Dispositivo inexistente (ENODEV)
    NoDevice = 19,
    /// Não é diretório (ENOTDIR)
    NotDirectory = 20,
    /// É diretório (EISDIR)
    IsDirectory = 21,
    /// Argumento inválido (EINVAL)
    InvalidArgument = 22,
    /// Tabela de descritores cheia (EMFILE)
    TooManyFiles = 24,
    /// Sem espaço no backend (ENOSPC)
    NoSpace = 28,
    /// Seek em objeto sem posição (ESPIPE)
    IllegalSeek = 29,
    /// Pipe sem leitores (EPIPE)
    BrokenPipe = 32,
    /// Syscall não implementada (ENOSYS)
    NotImplemented = 38,
    /// Erro genérico
    Unknown = 255,
}

impl SysError {
    /// Converte para isize negativo (formato de retorno da syscall).
    #[inline]
    pub fn as_isize(self) -> isize {
        -(self as i32 as isize)
    }

    /// Recria a partir de um código negativo do ABI.
    pub fn from_code(code: isize) -> Option<Self> {
        if code >= 0 {
            return None;
        }
        match -code {
            1 => Some(Self::PermissionDenied),
            2 => Some(Self::NotFound),
            9 => Some(Self::BadDescriptor),
            10 => Some(Self::NoChild),
            11 => Some(Self::WouldBlock),
            12 => Some(Self::OutOfMemory),
            13 => Some(Self::AccessDenied),
            14 => Some(Self::BadAddress),
            17 => Some(Self::AlreadyExists),
            19 => Some(Self::NoDevice),
            20 => Some(Self::NotDirectory),
            21 => Some(Self::IsDirectory),
            22 => Some(Self::InvalidArgument),
            24 => Some(Self::TooManyFiles),
            28 => Some(Self::NoSpace),
            29 => Some(Self::IllegalSeek),
            32 => Some(Self::BrokenPipe),
            38 => Some(Self::NotImplemented),
            255 => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Açúcar para os handlers: `Result` → isize do ABI.
#[inline]
pub fn to_abi(result: Result<isize, SysError>) -> isize {
    match result {
        Ok(v) => v,
        Err(e) => e.as_isize(),
    }
}
