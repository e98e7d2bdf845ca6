//! Stack de rede (por camada OSI).
//!
//! - Camada 2: `eth` (+ `arp`)
//! - Camada 3: `ipv4` (+ `icmp`)
//! - Camada 4: `tcp`
//!
//! O driver de NIC entrega quadros crus em `on_frame`; a transmissão sai
//! pelo dispositivo registrado. Nenhum caminho de RX aloca heap além dos
//! buffers dos TCBs.

pub mod arp;
pub mod eth;
pub mod icmp;
pub mod ipv4;
pub mod tcp;

use crate::sync::Spinlock;
use alloc::sync::Arc;

/// Endereço MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    pub const BROADCAST: Mac = Mac([0xFF; 6]);
    pub const ZERO: Mac = Mac([0; 6]);
}

/// Endereço IPv4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Addr(pub [u8; 4]);

impl Ipv4Addr {
    pub const ANY: Ipv4Addr = Ipv4Addr([0; 4]);
}

/// Erros do stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    NoDevice,
    /// Sem entrada ARP para o destino (pedido disparado).
    Unreachable,
    Truncated,
    BadChecksum,
    /// Tabela de conexões cheia.
    NoSlot,
    /// Operação incompatível com o estado da conexão.
    BadState,
    /// Quadro grande demais para o MTU.
    TooBig,
}

impl From<NetError> for crate::syscall::error::SysError {
    fn from(e: NetError) -> Self {
        use crate::syscall::error::SysError;
        match e {
            NetError::NoDevice => SysError::NoDevice,
            NetError::Unreachable => SysError::NotFound,
            NetError::NoSlot => SysError::TooManyFiles,
            NetError::BadState => SysError::InvalidArgument,
            _ => SysError::Unknown,
        }
    }
}

/// Contrato do driver de NIC com o stack.
pub trait NetDevice: Send + Sync {
    fn mac(&self) -> Mac;
    fn transmit(&self, frame: &[u8]) -> Result<(), NetError>;
}

static DEVICE: Spinlock<Option<Arc<dyn NetDevice>>> = Spinlock::new(None);
static LOCAL_IP: Spinlock<Ipv4Addr> = Spinlock::new(Ipv4Addr([10, 0, 0, 1]));

/// Registra a NIC ativa.
pub fn register_device(dev: Arc<dyn NetDevice>) {
    *DEVICE.lock() = Some(dev);
    crate::kinfo!("(NET) NIC registrada");
}

pub fn device() -> Result<Arc<dyn NetDevice>, NetError> {
    DEVICE.lock().clone().ok_or(NetError::NoDevice)
}

pub fn set_local_ip(ip: Ipv4Addr) {
    *LOCAL_IP.lock() = ip;
}

pub fn local_ip() -> Ipv4Addr {
    *LOCAL_IP.lock()
}

/// Entrada de RX: um quadro Ethernet completo.
pub fn on_frame(frame: &[u8]) {
    let Ok((header, payload)) = eth::parse(frame) else {
        return;
    };
    match header.ethertype {
        eth::ETHERTYPE_ARP => arp::on_packet(payload),
        eth::ETHERTYPE_IPV4 => ipv4::on_packet(payload),
        _ => {}
    }
}

/// Tick do relógio: retransmissões e GC de time-wait.
pub fn timer_tick() {
    tcp::timer_tick();
}

pub fn init() {
    crate::kinfo!("(NET) Stack pronto (eth/arp/ipv4/icmp/tcp)");
}

/// Soma de verificação de 16 bits em complemento de um, sobre a
/// concatenação de `parts` (o byte ímpar de uma parte continua na
/// seguinte).
pub fn checksum(parts: &[&[u8]]) -> u16 {
    let mut sum: u32 = 0;
    let mut pending: Option<u8> = None;
    for part in parts {
        for &b in part.iter() {
            match pending.take() {
                None => pending = Some(b),
                Some(hi) => sum += u32::from_be_bytes([0, 0, hi, b]),
            }
        }
    }
    if let Some(hi) = pending {
        sum += (hi as u32) << 8;
    }
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}
