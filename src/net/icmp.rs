//! ICMP: echo request/reply.

use super::{checksum, ipv4, Ipv4Addr};

const TYPE_ECHO_REPLY: u8 = 0;
const TYPE_ECHO_REQUEST: u8 = 8;

/// Processa uma mensagem ICMP; echo request vira echo reply com o mesmo
/// id/seq/payload.
pub fn on_packet(src: Ipv4Addr, pkt: &[u8]) {
    if pkt.len() < 8 {
        return;
    }
    if checksum(&[pkt]) != 0 {
        return;
    }
    if pkt[0] != TYPE_ECHO_REQUEST {
        return;
    }

    let mut reply = [0u8; super::eth::MTU];
    if pkt.len() > reply.len() {
        return;
    }
    reply[..pkt.len()].copy_from_slice(pkt);
    reply[0] = TYPE_ECHO_REPLY;
    reply[2] = 0;
    reply[3] = 0;
    let csum = checksum(&[&reply[..pkt.len()]]);
    reply[2..4].copy_from_slice(&csum.to_be_bytes());

    let _ = ipv4::send(src, ipv4::PROTO_ICMP, &reply[..pkt.len()]);
}

/// Monta um echo request (para diagnósticos do kernel).
pub fn echo_request(dst: Ipv4Addr, ident: u16, seq: u16, payload: &[u8]) -> Result<(), super::NetError> {
    let mut pkt = [0u8; super::eth::MTU];
    let len = 8 + payload.len();
    if len > pkt.len() {
        return Err(super::NetError::TooBig);
    }
    pkt[0] = TYPE_ECHO_REQUEST;
    pkt[4..6].copy_from_slice(&ident.to_be_bytes());
    pkt[6..8].copy_from_slice(&seq.to_be_bytes());
    pkt[8..len].copy_from_slice(payload);
    let csum = checksum(&[&pkt[..len]]);
    pkt[2..4].copy_from_slice(&csum.to_be_bytes());
    ipv4::send(dst, ipv4::PROTO_ICMP, &pkt[..len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{eth, testutil, Mac};

    #[test]
    fn test_echo_request_gets_reply() {
        let _g = crate::sched::task::test_guard();
        let peer = Ipv4Addr([10, 0, 0, 5]);
        let nic = testutil::setup(peer, Mac([7; 6]));

        // Echo request do peer para nós
        let mut req = [0u8; 16];
        req[0] = TYPE_ECHO_REQUEST;
        req[4..6].copy_from_slice(&0x1234u16.to_be_bytes());
        req[6..8].copy_from_slice(&0x0001u16.to_be_bytes());
        req[8..16].copy_from_slice(b"pingdata");
        let csum = checksum(&[&req]);
        req[2..4].copy_from_slice(&csum.to_be_bytes());

        on_packet(peer, &req);

        let frames = nic.take();
        assert_eq!(frames.len(), 1);
        let (_, ip_pkt) = eth::parse(&frames[0]).unwrap();
        let (h, icmp_pkt) = ipv4::parse(ip_pkt).unwrap();
        assert_eq!(h.dst, peer);
        assert_eq!(icmp_pkt[0], TYPE_ECHO_REPLY);
        // id/seq/payload preservados
        assert_eq!(&icmp_pkt[4..6], &0x1234u16.to_be_bytes());
        assert_eq!(&icmp_pkt[8..16], b"pingdata");
        // Checksum do reply fecha em zero
        assert_eq!(checksum(&[icmp_pkt]), 0);
    }

    #[test]
    fn test_bad_checksum_ignored() {
        let _g = crate::sched::task::test_guard();
        let peer = Ipv4Addr([10, 0, 0, 5]);
        let nic = testutil::setup(peer, Mac([7; 6]));
        let mut req = [0u8; 8];
        req[0] = TYPE_ECHO_REQUEST;
        req[2] = 0xDE; // checksum inválido
        on_packet(peer, &req);
        assert!(nic.take().is_empty());
    }
}
