//! ARP (resolução IPv4 → MAC) com cache fixo.

use super::{eth, Ipv4Addr, Mac, NetError};
use crate::sync::Spinlock;

const CACHE_SIZE: usize = 16;

const HTYPE_ETHERNET: u16 = 1;
const OPER_REQUEST: u16 = 1;
const OPER_REPLY: u16 = 2;
const PACKET_LEN: usize = 28;

static CACHE: Spinlock<[Option<(Ipv4Addr, Mac)>; CACHE_SIZE]> =
    Spinlock::new([None; CACHE_SIZE]);

/// Consulta o cache.
pub fn lookup(ip: Ipv4Addr) -> Option<Mac> {
    CACHE
        .lock()
        .iter()
        .flatten()
        .find(|(cip, _)| *cip == ip)
        .map(|(_, mac)| *mac)
}

/// Insere/atualiza uma entrada (substitui a mais antiga se cheio).
pub fn insert(ip: Ipv4Addr, mac: Mac) {
    let mut cache = CACHE.lock();
    // Atualização in-place
    for slot in cache.iter_mut() {
        if let Some((cip, cmac)) = slot {
            if *cip == ip {
                *cmac = mac;
                return;
            }
        }
    }
    // Primeiro livre, senão o slot 0
    let idx = cache.iter().position(|s| s.is_none()).unwrap_or(0);
    cache[idx] = Some((ip, mac));
}

fn build_packet(oper: u16, sha: Mac, spa: Ipv4Addr, tha: Mac, tpa: Ipv4Addr) -> [u8; PACKET_LEN] {
    let mut p = [0u8; PACKET_LEN];
    p[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
    p[2..4].copy_from_slice(&eth::ETHERTYPE_IPV4.to_be_bytes());
    p[4] = 6; // hlen
    p[5] = 4; // plen
    p[6..8].copy_from_slice(&oper.to_be_bytes());
    p[8..14].copy_from_slice(&sha.0);
    p[14..18].copy_from_slice(&spa.0);
    p[18..24].copy_from_slice(&tha.0);
    p[24..28].copy_from_slice(&tpa.0);
    p
}

/// Dispara um who-has em broadcast.
pub fn request(ip: Ipv4Addr) -> Result<(), NetError> {
    let dev = super::device()?;
    let pkt = build_packet(
        OPER_REQUEST,
        dev.mac(),
        super::local_ip(),
        Mac::ZERO,
        ip,
    );
    eth::send(Mac::BROADCAST, eth::ETHERTYPE_ARP, &pkt)
}

/// Processa um pacote ARP recebido.
pub fn on_packet(pkt: &[u8]) {
    if pkt.len() < PACKET_LEN {
        return;
    }
    let oper = u16::from_be_bytes([pkt[6], pkt[7]]);
    let mut sha = [0u8; 6];
    sha.copy_from_slice(&pkt[8..14]);
    let mut spa = [0u8; 4];
    spa.copy_from_slice(&pkt[14..18]);
    let mut tpa = [0u8; 4];
    tpa.copy_from_slice(&pkt[24..28]);

    let sender_ip = Ipv4Addr(spa);
    let sender_mac = Mac(sha);

    // Qualquer pacote válido alimenta o cache
    insert(sender_ip, sender_mac);

    // who-has para o nosso IP → responder
    if oper == OPER_REQUEST && Ipv4Addr(tpa) == super::local_ip() {
        if let Ok(dev) = super::device() {
            let reply = build_packet(
                OPER_REPLY,
                dev.mac(),
                super::local_ip(),
                sender_mac,
                sender_ip,
            );
            let _ = eth::send(sender_mac, eth::ETHERTYPE_ARP, &reply);
        }
    }
}

#[cfg(test)]
pub(crate) fn test_reset() {
    let mut cache = CACHE.lock();
    for s in cache.iter_mut() {
        *s = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testutil;

    #[test]
    fn test_cache_insert_lookup_update() {
        let _g = crate::sched::task::test_guard();
        test_reset();
        let ip = Ipv4Addr([10, 0, 0, 9]);
        assert!(lookup(ip).is_none());
        insert(ip, Mac([1; 6]));
        assert_eq!(lookup(ip), Some(Mac([1; 6])));
        insert(ip, Mac([2; 6]));
        assert_eq!(lookup(ip), Some(Mac([2; 6])));
    }

    #[test]
    fn test_request_goes_to_broadcast() {
        let _g = crate::sched::task::test_guard();
        let nic = testutil::setup(Ipv4Addr([10, 0, 0, 5]), Mac([9; 6]));
        request(Ipv4Addr([10, 0, 0, 77])).unwrap();
        let frames = nic.take();
        assert_eq!(frames.len(), 1);
        let (h, p) = eth::parse(&frames[0]).unwrap();
        assert_eq!(h.dst, Mac::BROADCAST);
        assert_eq!(h.ethertype, eth::ETHERTYPE_ARP);
        assert_eq!(u16::from_be_bytes([p[6], p[7]]), OPER_REQUEST);
    }

    #[test]
    fn test_reply_to_who_has() {
        let _g = crate::sched::task::test_guard();
        let peer_ip = Ipv4Addr([10, 0, 0, 5]);
        let peer_mac = Mac([0xAA; 6]);
        let nic = testutil::setup(peer_ip, peer_mac);
        // who-has 10.0.0.1 (nós) vindo do peer
        let req = build_packet(OPER_REQUEST, peer_mac, peer_ip, Mac::ZERO, Ipv4Addr([10, 0, 0, 1]));
        on_packet(&req);
        let frames = nic.take();
        assert_eq!(frames.len(), 1);
        let (h, p) = eth::parse(&frames[0]).unwrap();
        assert_eq!(h.dst, peer_mac);
        assert_eq!(u16::from_be_bytes([p[6], p[7]]), OPER_REPLY);
        // E o cache aprendeu o sender
        assert_eq!(lookup(peer_ip), Some(peer_mac));
    }
}
