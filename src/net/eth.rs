//! Quadros Ethernet II.

use super::{Mac, NetError};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

pub const HEADER_LEN: usize = 14;
pub const MAX_FRAME: usize = 1514;
pub const MTU: usize = 1500;

/// Cabeçalho decodificado.
#[derive(Debug, Clone, Copy)]
pub struct EthHeader {
    pub dst: Mac,
    pub src: Mac,
    pub ethertype: u16,
}

/// Buffer de quadro no stack (sem heap em caminho de RX/TX).
pub struct FrameBuf {
    pub data: [u8; MAX_FRAME],
    pub len: usize,
}

impl FrameBuf {
    pub fn new() -> Self {
        Self {
            data: [0; MAX_FRAME],
            len: 0,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl Default for FrameBuf {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodifica o cabeçalho; devolve (header, payload).
pub fn parse(frame: &[u8]) -> Result<(EthHeader, &[u8]), NetError> {
    if frame.len() < HEADER_LEN {
        return Err(NetError::Truncated);
    }
    let mut dst = [0u8; 6];
    let mut src = [0u8; 6];
    dst.copy_from_slice(&frame[0..6]);
    src.copy_from_slice(&frame[6..12]);
    Ok((
        EthHeader {
            dst: Mac(dst),
            src: Mac(src),
            ethertype: u16::from_be_bytes([frame[12], frame[13]]),
        },
        &frame[HEADER_LEN..],
    ))
}

/// Monta um quadro completo em `out`.
pub fn build(dst: Mac, src: Mac, ethertype: u16, payload: &[u8]) -> Result<FrameBuf, NetError> {
    if payload.len() > MTU {
        return Err(NetError::TooBig);
    }
    let mut out = FrameBuf::new();
    out.data[0..6].copy_from_slice(&dst.0);
    out.data[6..12].copy_from_slice(&src.0);
    out.data[12..14].copy_from_slice(&ethertype.to_be_bytes());
    out.data[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    out.len = HEADER_LEN + payload.len();
    Ok(out)
}

/// Transmite `payload` encapsulado para `dst` pela NIC registrada.
pub fn send(dst: Mac, ethertype: u16, payload: &[u8]) -> Result<(), NetError> {
    let dev = super::device()?;
    let frame = build(dst, dev.mac(), ethertype, payload)?;
    dev.transmit(frame.as_slice())
}
