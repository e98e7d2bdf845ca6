//! Máquina de estados TCP (RFC 793, núcleo).
//!
//! Uma TCB por conexão numa tabela fixa. Cada segmento recebido é
//! despachado pelo estado corrente; segmentos fora da janela ou com
//! checksum inválido são descartados. O checksum cobre o pseudo-header
//! IPv4 + cabeçalho TCP + payload.
//!
//! A geração de ISS é xorshift: determinística o bastante para
//! correção, sem pretensão de segurança.
//!
//! Invariante: `snd_una ≤ snd_nxt` (aritmética de sequência) sempre.

use super::{checksum, ipv4, Ipv4Addr, NetError};
use crate::core::time;
use crate::klib::rand;
use crate::sync::Spinlock;
use alloc::boxed::Box;
use alloc::vec::Vec;

pub const MAX_TCBS: usize = 32;
pub const TCP_BUF_SIZE: usize = 8192;
pub const HEADER_LEN: usize = 20;

/// Timeout de retransmissão em ticks (~500 ms).
const RTO_TICKS: u64 = 50;
const MAX_RETRIES: u32 = 5;
/// Período quieto do time-wait em ticks (~6 s).
const TIME_WAIT_TICKS: u64 = 600;

pub const FLAG_FIN: u8 = 0x01;
pub const FLAG_SYN: u8 = 0x02;
pub const FLAG_RST: u8 = 0x04;
pub const FLAG_PSH: u8 = 0x08;
pub const FLAG_ACK: u8 = 0x10;

/// Estados RFC 793.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// TCP Control Block.
pub struct Tcb {
    pub state: TcpState,
    pub local_ip: Ipv4Addr,
    pub local_port: u16,
    pub remote_ip: Ipv4Addr,
    pub remote_port: u16,

    pub iss: u32,
    pub snd_una: u32,
    pub snd_nxt: u32,
    pub snd_wnd: u16,
    pub rcv_nxt: u32,
    pub rcv_wnd: u16,

    /// Bytes enviados e ainda não reconhecidos (para retransmissão).
    send_buf: Vec<u8>,
    /// Bytes recebidos em ordem, ainda não lidos pelo processo.
    recv_buf: Vec<u8>,

    retransmit_deadline: u64,
    retries: u32,
    time_wait_deadline: u64,
}

impl Tcb {
    fn new(local_ip: Ipv4Addr, local_port: u16) -> Self {
        Self {
            state: TcpState::Closed,
            local_ip,
            local_port,
            remote_ip: Ipv4Addr::ANY,
            remote_port: 0,
            iss: 0,
            snd_una: 0,
            snd_nxt: 0,
            snd_wnd: 0,
            rcv_nxt: 0,
            rcv_wnd: TCP_BUF_SIZE as u16,
            send_buf: Vec::new(),
            recv_buf: Vec::new(),
            retransmit_deadline: 0,
            retries: 0,
            time_wait_deadline: 0,
        }
    }

    fn window(&self) -> u16 {
        (TCP_BUF_SIZE - self.recv_buf.len()).min(u16::MAX as usize) as u16
    }
}

static TCBS: Spinlock<[Option<Box<Tcb>>; MAX_TCBS]> = Spinlock::new([const { None }; MAX_TCBS]);

/// `a < b` em aritmética de números de sequência.
#[inline]
fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// `snd_una < ack ≤ snd_nxt`: ACK aceitável.
#[inline]
fn ack_acceptable(tcb: &Tcb, ack: u32) -> bool {
    seq_lt(tcb.snd_una, ack) && !seq_lt(tcb.snd_nxt, ack)
}

fn new_iss() -> u32 {
    rand::next_u32() | 1
}

/// Campos de um segmento decodificado.
struct Segment<'a> {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    wnd: u16,
    payload: &'a [u8],
}

fn parse_segment(seg: &[u8]) -> Option<Segment<'_>> {
    if seg.len() < HEADER_LEN {
        return None;
    }
    let data_off = ((seg[12] >> 4) as usize) * 4;
    if data_off < HEADER_LEN || data_off > seg.len() {
        return None;
    }
    Some(Segment {
        src_port: u16::from_be_bytes([seg[0], seg[1]]),
        dst_port: u16::from_be_bytes([seg[2], seg[3]]),
        seq: u32::from_be_bytes([seg[4], seg[5], seg[6], seg[7]]),
        ack: u32::from_be_bytes([seg[8], seg[9], seg[10], seg[11]]),
        flags: seg[13],
        wnd: u16::from_be_bytes([seg[14], seg[15]]),
        payload: &seg[data_off..],
    })
}

/// Checksum TCP: pseudo-header (src, dst, 0, proto, len) + segmento.
fn tcp_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    let len = segment.len() as u16;
    let pseudo = [
        src.0[0],
        src.0[1],
        src.0[2],
        src.0[3],
        dst.0[0],
        dst.0[1],
        dst.0[2],
        dst.0[3],
        0,
        ipv4::PROTO_TCP,
        (len >> 8) as u8,
        len as u8,
    ];
    checksum(&[&pseudo, segment])
}

/// Monta e transmite um segmento da TCB.
fn emit(tcb: &Tcb, flags: u8, seq: u32, ack: u32, payload: &[u8]) {
    let mut seg = [0u8; super::eth::MTU];
    let len = HEADER_LEN + payload.len();
    if len > seg.len() {
        return;
    }
    seg[0..2].copy_from_slice(&tcb.local_port.to_be_bytes());
    seg[2..4].copy_from_slice(&tcb.remote_port.to_be_bytes());
    seg[4..8].copy_from_slice(&seq.to_be_bytes());
    seg[8..12].copy_from_slice(&ack.to_be_bytes());
    seg[12] = (5 << 4) as u8;
    seg[13] = flags;
    seg[14..16].copy_from_slice(&tcb.window().to_be_bytes());
    seg[HEADER_LEN..len].copy_from_slice(payload);

    let csum = tcp_checksum(tcb.local_ip, tcb.remote_ip, &seg[..len]);
    seg[16..18].copy_from_slice(&csum.to_be_bytes());

    let _ = ipv4::send(tcb.remote_ip, ipv4::PROTO_TCP, &seg[..len]);
}

/// RST avulso para segmentos sem conexão.
fn emit_rst(src: Ipv4Addr, seg: &Segment<'_>) {
    let mut rst = [0u8; HEADER_LEN];
    rst[0..2].copy_from_slice(&seg.dst_port.to_be_bytes());
    rst[2..4].copy_from_slice(&seg.src_port.to_be_bytes());
    let (rst_seq, rst_ack, flags) = if seg.flags & FLAG_ACK != 0 {
        (seg.ack, 0, FLAG_RST)
    } else {
        (
            0,
            seg.seq
                .wrapping_add(seg.payload.len() as u32)
                .wrapping_add(if seg.flags & FLAG_SYN != 0 { 1 } else { 0 }),
            FLAG_RST | FLAG_ACK,
        )
    };
    rst[4..8].copy_from_slice(&rst_seq.to_be_bytes());
    rst[8..12].copy_from_slice(&rst_ack.to_be_bytes());
    rst[12] = (5 << 4) as u8;
    rst[13] = flags;
    let local = super::local_ip();
    let csum = tcp_checksum(local, src, &rst);
    rst[16..18].copy_from_slice(&csum.to_be_bytes());
    let _ = ipv4::send(src, ipv4::PROTO_TCP, &rst);
}

fn find_slot(tcbs: &[Option<Box<Tcb>>; MAX_TCBS]) -> Option<usize> {
    tcbs.iter().position(|t| t.is_none())
}

/// Abre um socket passivo na porta.
pub fn listen(port: u16) -> Result<usize, NetError> {
    let mut tcbs = TCBS.lock();
    let slot = find_slot(&tcbs).ok_or(NetError::NoSlot)?;
    let mut tcb = Box::new(Tcb::new(super::local_ip(), port));
    tcb.state = TcpState::Listen;
    tcbs[slot] = Some(tcb);
    Ok(slot)
}

/// Abertura ativa: envia SYN.
pub fn connect(remote_ip: Ipv4Addr, remote_port: u16) -> Result<usize, NetError> {
    let mut tcbs = TCBS.lock();
    let slot = find_slot(&tcbs).ok_or(NetError::NoSlot)?;

    let mut tcb = Box::new(Tcb::new(super::local_ip(), ephemeral_port()));
    tcb.remote_ip = remote_ip;
    tcb.remote_port = remote_port;
    tcb.iss = new_iss();
    tcb.snd_una = tcb.iss;
    tcb.snd_nxt = tcb.iss.wrapping_add(1);
    tcb.state = TcpState::SynSent;
    tcb.retransmit_deadline = time::jiffies() + RTO_TICKS;

    emit(&tcb, FLAG_SYN, tcb.iss, 0, &[]);
    tcbs[slot] = Some(tcb);
    Ok(slot)
}

fn ephemeral_port() -> u16 {
    49152 + (rand::next_u32() % 16384) as u16
}

/// Enfileira e transmite dados numa conexão estabelecida.
pub fn send(idx: usize, data: &[u8]) -> Result<usize, NetError> {
    let mut tcbs = TCBS.lock();
    let tcb = tcbs
        .get_mut(idx)
        .and_then(|t| t.as_mut())
        .ok_or(NetError::BadState)?;
    if tcb.state != TcpState::Established && tcb.state != TcpState::CloseWait {
        return Err(NetError::BadState);
    }

    let room = TCP_BUF_SIZE - tcb.send_buf.len();
    let n = data.len().min(room);
    if n == 0 {
        return Ok(0);
    }
    tcb.send_buf.extend_from_slice(&data[..n]);

    let seq = tcb.snd_nxt;
    tcb.snd_nxt = tcb.snd_nxt.wrapping_add(n as u32);
    tcb.retransmit_deadline = time::jiffies() + RTO_TICKS;
    tcb.retries = 0;
    emit(tcb, FLAG_ACK | FLAG_PSH, seq, tcb.rcv_nxt, &data[..n]);
    Ok(n)
}

/// Drena bytes recebidos em ordem.
pub fn recv(idx: usize, buf: &mut [u8]) -> Result<usize, NetError> {
    let mut tcbs = TCBS.lock();
    let tcb = tcbs
        .get_mut(idx)
        .and_then(|t| t.as_mut())
        .ok_or(NetError::BadState)?;
    let n = buf.len().min(tcb.recv_buf.len());
    buf[..n].copy_from_slice(&tcb.recv_buf[..n]);
    tcb.recv_buf.drain(..n);
    Ok(n)
}

/// Fecha a conexão a partir do estado corrente.
pub fn close(idx: usize) -> Result<(), NetError> {
    let mut tcbs = TCBS.lock();
    let state = tcbs
        .get(idx)
        .and_then(|t| t.as_ref())
        .map(|t| t.state)
        .ok_or(NetError::BadState)?;

    match state {
        TcpState::Listen | TcpState::SynSent => {
            tcbs[idx] = None;
        }
        TcpState::Established | TcpState::CloseWait => {
            let tcb = tcbs[idx].as_mut().unwrap();
            let seq = tcb.snd_nxt;
            tcb.snd_nxt = tcb.snd_nxt.wrapping_add(1); // o FIN consome um seq
            tcb.state = if state == TcpState::Established {
                TcpState::FinWait1
            } else {
                TcpState::LastAck
            };
            tcb.retransmit_deadline = time::jiffies() + RTO_TICKS;
            emit(tcb, FLAG_FIN | FLAG_ACK, seq, tcb.rcv_nxt, &[]);
        }
        _ => return Err(NetError::BadState),
    }
    Ok(())
}

/// Estado corrente (diagnóstico/testes).
pub fn state_of(idx: usize) -> Option<TcpState> {
    TCBS.lock().get(idx).and_then(|t| t.as_ref()).map(|t| t.state)
}

/// Snapshot (snd_una, snd_nxt, rcv_nxt) para inspeção.
pub fn seq_snapshot(idx: usize) -> Option<(u32, u32, u32)> {
    TCBS.lock()
        .get(idx)
        .and_then(|t| t.as_ref())
        .map(|t| (t.snd_una, t.snd_nxt, t.rcv_nxt))
}

/// Entrada de RX: um segmento TCP dentro de um datagrama para nós.
pub fn on_segment(src: Ipv4Addr, dst: Ipv4Addr, seg_bytes: &[u8]) {
    // Checksum sobre pseudo-header + segmento
    if tcp_checksum(src, dst, seg_bytes) != 0 {
        return;
    }
    let Some(seg) = parse_segment(seg_bytes) else {
        return;
    };

    let mut tcbs = TCBS.lock();

    // Conexão exata primeiro, listener depois
    let mut conn: Option<usize> = None;
    let mut listener: Option<usize> = None;
    for (i, slot) in tcbs.iter().enumerate() {
        let Some(t) = slot else { continue };
        if t.local_port != seg.dst_port {
            continue;
        }
        if t.state == TcpState::Listen {
            listener.get_or_insert(i);
        } else if t.remote_ip == src && t.remote_port == seg.src_port {
            conn = Some(i);
            break;
        }
    }

    let Some(idx) = conn.or(listener) else {
        // closed: qualquer segmento → RST
        if seg.flags & FLAG_RST == 0 {
            drop(tcbs);
            emit_rst(src, &seg);
        }
        return;
    };

    let state = tcbs[idx].as_ref().unwrap().state;
    match state {
        TcpState::Listen => handle_listen(&mut tcbs, idx, src, &seg),
        _ => handle_connection(&mut tcbs, idx, &seg),
    }
}

/// SYN num listener: cria a TCB da conexão nova e responde SYN+ACK.
fn handle_listen(
    tcbs: &mut [Option<Box<Tcb>>; MAX_TCBS],
    listener: usize,
    src: Ipv4Addr,
    seg: &Segment<'_>,
) {
    if seg.flags & FLAG_SYN == 0 {
        return;
    }
    let Some(slot) = find_slot(tcbs) else {
        return;
    };

    let (local_ip, local_port) = {
        let l = tcbs[listener].as_ref().unwrap();
        (l.local_ip, l.local_port)
    };

    let mut tcb = Box::new(Tcb::new(local_ip, local_port));
    tcb.remote_ip = src;
    tcb.remote_port = seg.src_port;
    tcb.rcv_nxt = seg.seq.wrapping_add(1);
    tcb.iss = new_iss();
    tcb.snd_una = tcb.iss;
    tcb.snd_nxt = tcb.iss.wrapping_add(1);
    tcb.snd_wnd = seg.wnd;
    tcb.state = TcpState::SynReceived;
    tcb.retransmit_deadline = time::jiffies() + RTO_TICKS;

    emit(&tcb, FLAG_SYN | FLAG_ACK, tcb.iss, tcb.rcv_nxt, &[]);
    tcbs[slot] = Some(tcb);
}

/// Transições de uma conexão existente.
fn handle_connection(tcbs: &mut [Option<Box<Tcb>>; MAX_TCBS], idx: usize, seg: &Segment<'_>) {
    // RST derruba tudo
    if seg.flags & FLAG_RST != 0 {
        tcbs[idx] = None;
        return;
    }

    let mut free_tcb = false;
    let tcb = tcbs[idx].as_mut().unwrap();

    match tcb.state {
        TcpState::SynSent => {
            if seg.flags & (FLAG_SYN | FLAG_ACK) == FLAG_SYN | FLAG_ACK
                && ack_acceptable(tcb, seg.ack)
            {
                tcb.rcv_nxt = seg.seq.wrapping_add(1);
                tcb.snd_una = seg.ack;
                tcb.snd_wnd = seg.wnd;
                tcb.state = TcpState::Established;
                tcb.retransmit_deadline = 0;
                emit(tcb, FLAG_ACK, tcb.snd_nxt, tcb.rcv_nxt, &[]);
            }
        }

        TcpState::SynReceived => {
            if seg.flags & FLAG_ACK != 0 && ack_acceptable(tcb, seg.ack) {
                tcb.snd_una = seg.ack;
                tcb.snd_wnd = seg.wnd;
                tcb.state = TcpState::Established;
                tcb.retransmit_deadline = 0;
            }
        }

        TcpState::Established => {
            if seg.flags & FLAG_ACK != 0 && ack_acceptable(tcb, seg.ack) {
                // Reconhecidos saem do buffer de retransmissão
                let acked = seg.ack.wrapping_sub(tcb.snd_una) as usize;
                let drop_n = acked.min(tcb.send_buf.len());
                tcb.send_buf.drain(..drop_n);
                tcb.snd_una = seg.ack;
                tcb.snd_wnd = seg.wnd;
                if tcb.snd_una == tcb.snd_nxt {
                    tcb.retransmit_deadline = 0;
                    tcb.retries = 0;
                }
            }

            // Dados em ordem e dentro da janela
            if !seg.payload.is_empty() {
                if seg.seq == tcb.rcv_nxt
                    && tcb.recv_buf.len() + seg.payload.len() <= TCP_BUF_SIZE
                {
                    tcb.recv_buf.extend_from_slice(seg.payload);
                    tcb.rcv_nxt = tcb.rcv_nxt.wrapping_add(seg.payload.len() as u32);
                    emit(tcb, FLAG_ACK, tcb.snd_nxt, tcb.rcv_nxt, &[]);
                } else {
                    // Fora de ordem/janela: descarta (sem SACK)
                    return;
                }
            }

            if seg.flags & FLAG_FIN != 0 {
                tcb.rcv_nxt = seg
                    .seq
                    .wrapping_add(seg.payload.len() as u32)
                    .wrapping_add(1);
                tcb.state = TcpState::CloseWait;
                emit(tcb, FLAG_ACK, tcb.snd_nxt, tcb.rcv_nxt, &[]);
            }
        }

        TcpState::FinWait1 => {
            let fin_acked = seg.flags & FLAG_ACK != 0 && ack_acceptable(tcb, seg.ack);
            if fin_acked {
                tcb.snd_una = seg.ack;
            }
            if seg.flags & FLAG_FIN != 0 {
                tcb.rcv_nxt = seg
                    .seq
                    .wrapping_add(seg.payload.len() as u32)
                    .wrapping_add(1);
                emit(tcb, FLAG_ACK, tcb.snd_nxt, tcb.rcv_nxt, &[]);
                tcb.state = if fin_acked {
                    tcb.time_wait_deadline = time::jiffies() + TIME_WAIT_TICKS;
                    TcpState::TimeWait
                } else {
                    TcpState::Closing
                };
            } else if fin_acked {
                tcb.state = TcpState::FinWait2;
            }
        }

        TcpState::FinWait2 => {
            if seg.flags & FLAG_FIN != 0 {
                tcb.rcv_nxt = seg
                    .seq
                    .wrapping_add(seg.payload.len() as u32)
                    .wrapping_add(1);
                emit(tcb, FLAG_ACK, tcb.snd_nxt, tcb.rcv_nxt, &[]);
                tcb.state = TcpState::TimeWait;
                tcb.time_wait_deadline = time::jiffies() + TIME_WAIT_TICKS;
            }
        }

        TcpState::CloseWait => {
            if seg.flags & FLAG_ACK != 0 && ack_acceptable(tcb, seg.ack) {
                tcb.snd_una = seg.ack;
            }
        }

        TcpState::Closing => {
            if seg.flags & FLAG_ACK != 0 && ack_acceptable(tcb, seg.ack) {
                tcb.snd_una = seg.ack;
                tcb.state = TcpState::TimeWait;
                tcb.time_wait_deadline = time::jiffies() + TIME_WAIT_TICKS;
            }
        }

        TcpState::LastAck => {
            if seg.flags & FLAG_ACK != 0 && ack_acceptable(tcb, seg.ack) {
                // Conexão terminada: libera a TCB
                free_tcb = true;
            }
        }

        TcpState::TimeWait => {
            // Retransmissão do FIN do peer: reconhece de novo
            if seg.flags & FLAG_FIN != 0 {
                let (snd_nxt, rcv_nxt) = (tcb.snd_nxt, tcb.rcv_nxt);
                emit(tcb, FLAG_ACK, snd_nxt, rcv_nxt, &[]);
            }
        }

        TcpState::Closed | TcpState::Listen => {}
    }

    if free_tcb {
        tcbs[idx] = None;
    }
}

/// Retransmissões e GC de time-wait. Chamado a cada tick.
pub fn timer_tick() {
    let now = time::jiffies();
    let mut tcbs = TCBS.lock();
    for slot in tcbs.iter_mut() {
        let Some(tcb) = slot.as_mut() else { continue };

        if tcb.state == TcpState::TimeWait {
            if now >= tcb.time_wait_deadline {
                *slot = None;
            }
            continue;
        }

        if tcb.retransmit_deadline != 0 && now >= tcb.retransmit_deadline {
            tcb.retries += 1;
            if tcb.retries > MAX_RETRIES {
                crate::kwarn!("(TCP) Conexao abortada por retransmissao");
                *slot = None;
                continue;
            }
            tcb.retransmit_deadline = now + RTO_TICKS * (1 << tcb.retries.min(4));
            match tcb.state {
                TcpState::SynSent => {
                    emit(tcb, FLAG_SYN, tcb.iss, 0, &[]);
                }
                TcpState::SynReceived => {
                    emit(tcb, FLAG_SYN | FLAG_ACK, tcb.iss, tcb.rcv_nxt, &[]);
                }
                TcpState::Established | TcpState::CloseWait => {
                    // Reenvia o pendente de ACK. Buffer na stack: este
                    // caminho roda no tick do timer e não pode alocar.
                    if !tcb.send_buf.is_empty() {
                        let mut chunk = [0u8; 1024];
                        let n = tcb.send_buf.len().min(chunk.len());
                        chunk[..n].copy_from_slice(&tcb.send_buf[..n]);
                        let seq = tcb.snd_una;
                        let ack = tcb.rcv_nxt;
                        emit(tcb, FLAG_ACK | FLAG_PSH, seq, ack, &chunk[..n]);
                    }
                }
                TcpState::FinWait1 | TcpState::LastAck | TcpState::Closing => {
                    let seq = tcb.snd_nxt.wrapping_sub(1);
                    let ack = tcb.rcv_nxt;
                    emit(tcb, FLAG_FIN | FLAG_ACK, seq, ack, &[]);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_reset() {
    let mut tcbs = TCBS.lock();
    for t in tcbs.iter_mut() {
        *t = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{eth, testutil, Mac};
    use alloc::vec::Vec;

    const PEER_IP: Ipv4Addr = Ipv4Addr([10, 0, 0, 5]);
    const PEER_MAC: Mac = Mac([0xEE; 6]);
    const OUR_IP: Ipv4Addr = Ipv4Addr([10, 0, 0, 1]);

    /// Monta um segmento do peer para nós, com checksum correto.
    fn peer_segment(
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut seg = alloc::vec![0u8; HEADER_LEN + payload.len()];
        seg[0..2].copy_from_slice(&src_port.to_be_bytes());
        seg[2..4].copy_from_slice(&dst_port.to_be_bytes());
        seg[4..8].copy_from_slice(&seq.to_be_bytes());
        seg[8..12].copy_from_slice(&ack.to_be_bytes());
        seg[12] = 5 << 4;
        seg[13] = flags;
        seg[14..16].copy_from_slice(&8192u16.to_be_bytes());
        seg[HEADER_LEN..].copy_from_slice(payload);
        let csum = tcp_checksum(PEER_IP, OUR_IP, &seg);
        seg[16..18].copy_from_slice(&csum.to_be_bytes());
        seg
    }

    /// Extrai o último segmento TCP transmitido pela NIC mock.
    fn last_tcp(nic: &testutil::MockNic) -> Option<Vec<u8>> {
        let frames = nic.take();
        let frame = frames.last()?;
        let (_, ip_pkt) = eth::parse(frame).ok()?;
        let (h, payload) = ipv4::parse(ip_pkt).ok()?;
        if h.proto == ipv4::PROTO_TCP {
            Some(payload.to_vec())
        } else {
            None
        }
    }

    fn tcp_fields(seg: &[u8]) -> (u32, u32, u8) {
        (
            u32::from_be_bytes([seg[4], seg[5], seg[6], seg[7]]),
            u32::from_be_bytes([seg[8], seg[9], seg[10], seg[11]]),
            seg[13],
        )
    }

    /// Cenário: abertura passiva completa (SYN → SYN+ACK → ACK).
    #[test]
    fn test_passive_open_three_way_handshake() {
        let _g = crate::sched::task::test_guard();
        let nic = testutil::setup(PEER_IP, PEER_MAC);
        let listener = listen(80).unwrap();

        // SYN(seq=1000) de 10.0.0.5:5000
        on_segment(PEER_IP, OUR_IP, &peer_segment(5000, 80, 1000, 0, FLAG_SYN, &[]));

        // Resposta: SYN+ACK com ack=1001
        let synack = last_tcp(&nic).unwrap();
        let (iss, ack, flags) = tcp_fields(&synack);
        assert_eq!(flags, FLAG_SYN | FLAG_ACK);
        assert_eq!(ack, 1001);

        // TCB nova em syn-received, listener intacto
        assert_eq!(state_of(listener), Some(TcpState::Listen));
        let conn = (0..MAX_TCBS)
            .find(|&i| state_of(i) == Some(TcpState::SynReceived))
            .unwrap();

        // ACK(seq=1001, ack=ISS+1) fecha o handshake
        on_segment(
            PEER_IP,
            OUR_IP,
            &peer_segment(5000, 80, 1001, iss.wrapping_add(1), FLAG_ACK, &[]),
        );
        assert_eq!(state_of(conn), Some(TcpState::Established));
        let (snd_una, snd_nxt, rcv_nxt) = seq_snapshot(conn).unwrap();
        assert_eq!(snd_una, iss.wrapping_add(1));
        assert_eq!(rcv_nxt, 1001);
        assert!(!seq_lt(snd_nxt, snd_una)); // snd_una ≤ snd_nxt
    }

    fn establish(nic: &testutil::MockNic) -> (usize, u32) {
        let _listener = listen(80).unwrap();
        on_segment(PEER_IP, OUR_IP, &peer_segment(5000, 80, 1000, 0, FLAG_SYN, &[]));
        let synack = last_tcp(nic).unwrap();
        let (iss, _, _) = tcp_fields(&synack);
        on_segment(
            PEER_IP,
            OUR_IP,
            &peer_segment(5000, 80, 1001, iss.wrapping_add(1), FLAG_ACK, &[]),
        );
        let conn = (0..MAX_TCBS)
            .find(|&i| state_of(i) == Some(TcpState::Established))
            .unwrap();
        (conn, iss)
    }

    #[test]
    fn test_in_order_data_is_acked_and_readable() {
        let _g = crate::sched::task::test_guard();
        let nic = testutil::setup(PEER_IP, PEER_MAC);
        let (conn, iss) = establish(&nic);

        on_segment(
            PEER_IP,
            OUR_IP,
            &peer_segment(5000, 80, 1001, iss.wrapping_add(1), FLAG_ACK | FLAG_PSH, b"dados!"),
        );

        // ACK avançou rcv_nxt
        let ack_seg = last_tcp(&nic).unwrap();
        let (_, ack, flags) = tcp_fields(&ack_seg);
        assert_ne!(flags & FLAG_ACK, 0);
        assert_eq!(ack, 1007);

        let mut buf = [0u8; 16];
        assert_eq!(recv(conn, &mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"dados!");
    }

    #[test]
    fn test_out_of_order_segment_dropped() {
        let _g = crate::sched::task::test_guard();
        let nic = testutil::setup(PEER_IP, PEER_MAC);
        let (conn, iss) = establish(&nic);

        // seq errado (2000 em vez de 1001)
        on_segment(
            PEER_IP,
            OUR_IP,
            &peer_segment(5000, 80, 2000, iss.wrapping_add(1), FLAG_ACK | FLAG_PSH, b"xx"),
        );
        let mut buf = [0u8; 8];
        assert_eq!(recv(conn, &mut buf).unwrap(), 0);
        let (_, _, rcv_nxt) = seq_snapshot(conn).unwrap();
        assert_eq!(rcv_nxt, 1001);
    }

    #[test]
    fn test_bad_checksum_dropped() {
        let _g = crate::sched::task::test_guard();
        let nic = testutil::setup(PEER_IP, PEER_MAC);
        let (conn, iss) = establish(&nic);
        let mut seg = peer_segment(5000, 80, 1001, iss.wrapping_add(1), FLAG_ACK | FLAG_PSH, b"zz");
        seg[16] ^= 0xFF; // corrompe o checksum
        on_segment(PEER_IP, OUR_IP, &seg);
        let mut buf = [0u8; 8];
        assert_eq!(recv(conn, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_peer_fin_then_local_close_to_last_ack() {
        let _g = crate::sched::task::test_guard();
        let nic = testutil::setup(PEER_IP, PEER_MAC);
        let (conn, iss) = establish(&nic);

        // FIN do peer
        on_segment(
            PEER_IP,
            OUR_IP,
            &peer_segment(5000, 80, 1001, iss.wrapping_add(1), FLAG_FIN | FLAG_ACK, &[]),
        );
        assert_eq!(state_of(conn), Some(TcpState::CloseWait));
        let (_, _, rcv_nxt) = seq_snapshot(conn).unwrap();
        assert_eq!(rcv_nxt, 1002); // FIN consome 1

        // close local → FIN+ACK, last-ack
        close(conn).unwrap();
        assert_eq!(state_of(conn), Some(TcpState::LastAck));
        let fin = last_tcp(&nic).unwrap();
        let (_, _, flags) = tcp_fields(&fin);
        assert_eq!(flags & (FLAG_FIN | FLAG_ACK), FLAG_FIN | FLAG_ACK);

        // ACK final libera a TCB
        let (_, snd_nxt, _) = seq_snapshot(conn).unwrap();
        on_segment(
            PEER_IP,
            OUR_IP,
            &peer_segment(5000, 80, 1002, snd_nxt, FLAG_ACK, &[]),
        );
        assert_eq!(state_of(conn), None);
    }

    #[test]
    fn test_active_close_fin_wait_to_time_wait_gc() {
        let _g = crate::sched::task::test_guard();
        crate::core::time::test_reset();
        let nic = testutil::setup(PEER_IP, PEER_MAC);
        let (conn, iss) = establish(&nic);

        close(conn).unwrap();
        assert_eq!(state_of(conn), Some(TcpState::FinWait1));
        let (_, snd_nxt, _) = seq_snapshot(conn).unwrap();

        // Peer manda FIN+ACK (reconhecendo o nosso FIN)
        on_segment(
            PEER_IP,
            OUR_IP,
            &peer_segment(5000, 80, 1001, snd_nxt, FLAG_FIN | FLAG_ACK, &[]),
        );
        assert_eq!(state_of(conn), Some(TcpState::TimeWait));

        // Quiet period expira → TCB liberada
        for _ in 0..=TIME_WAIT_TICKS {
            crate::core::time::tick();
        }
        timer_tick();
        assert_eq!(state_of(conn), None);
        let _ = iss;
    }

    #[test]
    fn test_segment_to_closed_port_gets_rst() {
        let _g = crate::sched::task::test_guard();
        let nic = testutil::setup(PEER_IP, PEER_MAC);
        on_segment(
            PEER_IP,
            OUR_IP,
            &peer_segment(5000, 9999, 777, 0, FLAG_SYN, &[]),
        );
        let rst = last_tcp(&nic).unwrap();
        let (_, ack, flags) = tcp_fields(&rst);
        assert_ne!(flags & FLAG_RST, 0);
        assert_eq!(ack, 778); // seq+1 do SYN
    }

    #[test]
    fn test_send_keeps_una_le_nxt_and_retransmits() {
        let _g = crate::sched::task::test_guard();
        crate::core::time::test_reset();
        let nic = testutil::setup(PEER_IP, PEER_MAC);
        let (conn, _) = establish(&nic);

        assert_eq!(send(conn, b"hello").unwrap(), 5);
        let (snd_una, snd_nxt, _) = seq_snapshot(conn).unwrap();
        assert_eq!(snd_nxt.wrapping_sub(snd_una), 5);

        // Sem ACK: RTO expira e o segmento sai de novo
        nic.take();
        for _ in 0..=RTO_TICKS {
            crate::core::time::tick();
        }
        timer_tick();
        let reseg = last_tcp(&nic).unwrap();
        assert_eq!(&reseg[HEADER_LEN..], b"hello");

        // ACK limpa o buffer de retransmissão
        on_segment(
            PEER_IP,
            OUR_IP,
            &peer_segment(5000, 80, 1001, snd_nxt, FLAG_ACK, &[]),
        );
        let (una2, nxt2, _) = seq_snapshot(conn).unwrap();
        assert_eq!(una2, nxt2);
    }
}
