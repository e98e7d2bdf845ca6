//! Datagramas IPv4 (sem fragmentação).

use super::{arp, checksum, eth, icmp, tcp, Ipv4Addr, NetError};
use core::sync::atomic::{AtomicU16, Ordering};

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;

pub const HEADER_LEN: usize = 20;
const TTL_DEFAULT: u8 = 64;

static IDENT: AtomicU16 = AtomicU16::new(1);

/// Cabeçalho decodificado.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub proto: u8,
    pub total_len: u16,
}

/// Monta e transmite um datagrama para `dst`.
///
/// Sem entrada ARP o pedido who-has é disparado e o datagrama é
/// descartado com `Unreachable` (o chamador pode tentar de novo).
pub fn send(dst: Ipv4Addr, proto: u8, payload: &[u8]) -> Result<(), NetError> {
    if payload.len() + HEADER_LEN > eth::MTU {
        return Err(NetError::TooBig);
    }

    let dst_mac = match arp::lookup(dst) {
        Some(mac) => mac,
        None => {
            let _ = arp::request(dst);
            return Err(NetError::Unreachable);
        }
    };

    let total_len = (HEADER_LEN + payload.len()) as u16;
    let mut header = [0u8; HEADER_LEN];
    header[0] = 0x45; // versão 4, IHL 5
    header[2..4].copy_from_slice(&total_len.to_be_bytes());
    let ident = IDENT.fetch_add(1, Ordering::Relaxed);
    header[4..6].copy_from_slice(&ident.to_be_bytes());
    header[8] = TTL_DEFAULT;
    header[9] = proto;
    header[12..16].copy_from_slice(&super::local_ip().0);
    header[16..20].copy_from_slice(&dst.0);
    let csum = checksum(&[&header]);
    header[10..12].copy_from_slice(&csum.to_be_bytes());

    // Header + payload no mesmo quadro
    let mut packet = eth::FrameBuf::new();
    packet.data[..HEADER_LEN].copy_from_slice(&header);
    packet.data[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    packet.len = HEADER_LEN + payload.len();

    eth::send(dst_mac, eth::ETHERTYPE_IPV4, packet.as_slice())
}

/// Processa um datagrama recebido: valida e despacha por protocolo.
pub fn on_packet(pkt: &[u8]) {
    let Ok((header, payload)) = parse(pkt) else {
        return;
    };

    // Só aceitamos o nosso IP (e broadcast limitado)
    let us = super::local_ip();
    if header.dst != us && header.dst != Ipv4Addr([255, 255, 255, 255]) {
        return;
    }

    match header.proto {
        PROTO_ICMP => icmp::on_packet(header.src, payload),
        PROTO_TCP => tcp::on_segment(header.src, header.dst, payload),
        _ => {}
    }
}

/// Valida cabeçalho + checksum; devolve (header, payload).
pub fn parse(pkt: &[u8]) -> Result<(Ipv4Header, &[u8]), NetError> {
    if pkt.len() < HEADER_LEN {
        return Err(NetError::Truncated);
    }
    let version = pkt[0] >> 4;
    let ihl = (pkt[0] & 0xF) as usize * 4;
    if version != 4 || ihl < HEADER_LEN || pkt.len() < ihl {
        return Err(NetError::Truncated);
    }
    if checksum(&[&pkt[..ihl]]) != 0 {
        return Err(NetError::BadChecksum);
    }
    let total_len = u16::from_be_bytes([pkt[2], pkt[3]]) as usize;
    if total_len < ihl || total_len > pkt.len() {
        return Err(NetError::Truncated);
    }
    let mut src = [0u8; 4];
    let mut dst = [0u8; 4];
    src.copy_from_slice(&pkt[12..16]);
    dst.copy_from_slice(&pkt[16..20]);
    Ok((
        Ipv4Header {
            src: Ipv4Addr(src),
            dst: Ipv4Addr(dst),
            proto: pkt[9],
            total_len: total_len as u16,
        },
        &pkt[ihl..total_len],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{testutil, Mac};

    #[test]
    fn test_send_and_parse_roundtrip() {
        let _g = crate::sched::task::test_guard();
        let peer = Ipv4Addr([10, 0, 0, 5]);
        let nic = testutil::setup(peer, Mac([3; 6]));
        send(peer, PROTO_ICMP, b"ping-payload").unwrap();
        let frames = nic.take();
        assert_eq!(frames.len(), 1);
        let (eh, ip_pkt) = eth::parse(&frames[0]).unwrap();
        assert_eq!(eh.dst, Mac([3; 6]));
        let (h, payload) = parse(ip_pkt).unwrap();
        assert_eq!(h.src, Ipv4Addr([10, 0, 0, 1]));
        assert_eq!(h.dst, peer);
        assert_eq!(h.proto, PROTO_ICMP);
        assert_eq!(payload, b"ping-payload");
    }

    #[test]
    fn test_unresolved_destination_triggers_arp() {
        let _g = crate::sched::task::test_guard();
        let nic = testutil::setup(Ipv4Addr([10, 0, 0, 5]), Mac([3; 6]));
        let unknown = Ipv4Addr([10, 0, 0, 200]);
        assert_eq!(send(unknown, PROTO_TCP, b"x"), Err(NetError::Unreachable));
        // O único quadro emitido é o who-has
        let frames = nic.take();
        assert_eq!(frames.len(), 1);
        let (h, _) = eth::parse(&frames[0]).unwrap();
        assert_eq!(h.ethertype, eth::ETHERTYPE_ARP);
    }

    #[test]
    fn test_corrupted_checksum_dropped() {
        let _g = crate::sched::task::test_guard();
        let peer = Ipv4Addr([10, 0, 0, 5]);
        let nic = testutil::setup(peer, Mac([3; 6]));
        send(peer, PROTO_ICMP, b"abc").unwrap();
        let frames = nic.take();
        let (_, ip_pkt) = eth::parse(&frames[0]).unwrap();
        let mut bad = ip_pkt.to_vec();
        bad[10] ^= 0xFF;
        assert!(matches!(parse(&bad), Err(NetError::BadChecksum)));
    }
}
