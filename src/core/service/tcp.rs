//! The TCP engine: handshake, data transfer, delayed ACK, closure, and
//! the constant-space listener backlog.
//!
//! Reliability note: lost payload is never retransmitted by this engine;
//! only control traffic (ACKs, keepalives, resolution retries) repeats.
//! Recovery under loss leans on the remote peer's retransmissions.

use std::time::Duration;

use Result;
use core::conn::{
    BacklogEntry,
    ConnEvent,
    Connection,
    IpAddress,
    Proto,
    SocketAddr,
    TimerKind,
    BACKLOG_AGE,
    BACKLOG_LEN,
};
use core::packet::ParsedPacket;
use core::repr::{
    ipv4_protocols,
    ipv6_next_headers,
    tcp_flags as flags,
    EthernetAddress,
    TcpPacket,
    TcpRepr,
};
use core::service::{
    ipv4,
    ipv6,
    udp,
    Event,
    Interface,
};

/// Advertised receive window.
pub const WINDOW: u16 = 6000;

const TIMEOUT_ACK: Duration = Duration::from_millis(150);
const TIMEOUT_RESOLVE: Duration = Duration::from_millis(100);
const TIMEOUT_SYN: Duration = Duration::from_secs(15);
const TIMEOUT_FIN: Duration = Duration::from_secs(1);
const TIMEOUT_KEEPALIVE: Duration = Duration::from_secs(45);

/// Unanswered keepalive probes tolerated before the connection errors.
const KEEPALIVE_PROBES: u8 = 3;

/// The relevant fields of one received segment, in host order.
struct Seg<'a> {
    src_ip: IpAddress,
    dst_ip: IpAddress,
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    mss: Option<u16>,
    payload: &'a [u8],
    sender: EthernetAddress,
}

/// Arms (or re-arms) a connection's single timer. A running FIN wait is
/// never preempted; everything else is simply overwritten, which gives
/// resolution and SYN waits their priority by construction.
pub fn set_timeout(interface: &mut Interface, handle: usize, kind: TimerKind) {
    let now = interface.now;
    if let Some(conn) = interface.conns.get_mut(handle) {
        if conn.state.timer_kind == TimerKind::Fin && conn.state.timer.is_some() {
            return;
        }
        let delay = match kind {
            TimerKind::Ack => TIMEOUT_ACK,
            TimerKind::Resolve => TIMEOUT_RESOLVE,
            TimerKind::Syn => TIMEOUT_SYN,
            TimerKind::Fin => TIMEOUT_FIN,
            TimerKind::Keepalive => TIMEOUT_KEEPALIVE,
        };
        conn.state.timer = Some(now + delay);
        conn.state.timer_kind = kind;
    }
}

/// Serializes and transmits one segment. SYN segments carry an MSS option
/// of MTU minus 40.
pub fn send_segment(
    interface: &mut Interface,
    dst_mac: EthernetAddress,
    dst_addr: IpAddress,
    seg_flags: u8,
    src_port: u16,
    dst_port: u16,
    seq_num: u32,
    ack_num: u32,
    payload: &[u8],
) -> Result<usize> {
    let mss = if seg_flags & flags::SYN != 0 {
        Some((interface.mtu - 40) as u16)
    } else {
        None
    };

    let repr = TcpRepr {
        src_port,
        dst_port,
        seq_num,
        ack_num,
        flags: seg_flags,
        window_size: WINDOW,
        mss,
    };
    let seg_len = repr.header_len() + payload.len();

    match dst_addr {
        IpAddress::V4(dst) => {
            let src = *interface.ipv4_addr;
            trace!(
                "TCP {}:{} -> {}:{} fl {:x} len {}",
                src, src_port, dst, dst_port, seg_flags, payload.len()
            );
            ipv4::send_packet(
                interface,
                dst_mac,
                ipv4_protocols::TCP,
                src,
                dst,
                seg_len,
                |buffer| {
                    let mut packet = TcpPacket::try_new(buffer).unwrap();
                    repr.serialize(&mut packet);
                    packet.payload_mut().copy_from_slice(payload);
                    packet.fill_checksum(src.as_bytes(), dst.as_bytes());
                },
            )
        }
        IpAddress::V6(dst) => {
            let src = ipv6::src_for(interface, dst);
            ipv6::send_packet(
                interface,
                dst_mac,
                ipv6_next_headers::TCP,
                64,
                src,
                dst,
                seg_len,
                |buffer| {
                    let mut packet = TcpPacket::try_new(buffer).unwrap();
                    repr.serialize(&mut packet);
                    packet.payload_mut().copy_from_slice(payload);
                    packet.fill_checksum(src.as_bytes(), dst.as_bytes());
                },
            )
        }
    }
}

/// Answers a segment in place: destination taken from the segment's
/// source, acknowledging past any SYN/FIN it carried.
fn send_reply(interface: &mut Interface, seg: &Seg, reply_flags: u8, seq_num: u32) -> Result<usize> {
    let delta = if seg.flags & (flags::SYN | flags::FIN) != 0 {
        1
    } else {
        0
    };
    send_segment(
        interface,
        seg.sender,
        seg.src_ip,
        reply_flags,
        seg.dst_port,
        seg.src_port,
        seq_num,
        seg.seq.wrapping_add(delta),
        &[],
    )
}

/// Sends the opening SYN of an active connection. The initial sequence
/// number is derived from the local ephemeral port, not a CSPRNG.
pub fn send_syn(interface: &mut Interface, handle: usize) {
    let (mac, rem, loc_port) = match interface.conns.get(handle) {
        Some(conn) => (conn.state.mac, conn.rem, conn.loc.port),
        None => return,
    };
    let isn = loc_port as u32;
    send_segment(
        interface,
        mac,
        rem.addr,
        flags::SYN,
        loc_port,
        rem.port,
        isn,
        0,
        &[],
    ).ok();
}

/// Starts a graceful close: FIN goes out, the FIN wait timer bounds the
/// rest of the handshake.
pub fn init_closure(interface: &mut Interface, handle: usize) {
    let ready = match interface.conns.get(handle) {
        Some(conn) => {
            conn.proto == Proto::Tcp && !conn.is_listening && !conn.is_connecting
                && !conn.is_resolving
        }
        None => false,
    };
    if !ready {
        return;
    }

    let (mac, rem, loc_port, seq, ack) = {
        let conn = interface.conns.get(handle).unwrap();
        (
            conn.state.mac,
            conn.rem,
            conn.loc.port,
            conn.state.seq,
            conn.state.ack,
        )
    };

    send_segment(
        interface,
        mac,
        rem.addr,
        flags::FIN | flags::ACK,
        loc_port,
        rem.port,
        seq,
        ack,
        &[],
    ).ok();
    set_timeout(interface, handle, TimerKind::Fin);
}

/// Flushes pending send-buffer bytes, capped by the transmit buffer, the
/// MTU, and the peer's MSS.
pub fn write_pending(interface: &mut Interface, handle: usize) {
    let (mac, rem, loc_port, seq, ack, dmss, buffered) = match interface.conns.get(handle) {
        Some(conn) => (
            conn.state.mac,
            conn.rem,
            conn.loc.port,
            conn.state.seq,
            conn.state.ack,
            conn.state.dmss as usize,
            conn.send_buf.len(),
        ),
        None => return,
    };

    // Worst case headers: link 14, IP up to 24, TCP up to 60.
    let max_headers = 14 + 24 + 60;
    let mut len = buffered;
    len = len.min(interface.tx.len().saturating_sub(max_headers));
    len = len.min((interface.mtu + 14).saturating_sub(max_headers));
    len = len.min(dmss);
    if len == 0 {
        return;
    }

    let payload: Vec<u8> = interface.conns.get(handle).unwrap().send_buf[.. len].to_vec();

    match send_segment(
        interface,
        mac,
        rem.addr,
        flags::PSH | flags::ACK,
        loc_port,
        rem.port,
        seq,
        ack,
        &payload,
    ) {
        Ok(_) => {
            let rearm = {
                let conn = interface.conns.get_mut(handle).unwrap();
                conn.state.seq = conn.state.seq.wrapping_add(len as u32);
                conn.send_buf.drain(.. len);
                conn.state.timer_kind == TimerKind::Ack
            };
            // The data carried our ACK; drop back to the keepalive timer.
            if rearm {
                set_timeout(interface, handle, TimerKind::Keepalive);
            }
        }
        Err(::Error::Pending) => {
            // Driver busy; the bytes stay queued for the next poll.
        }
        Err(_) => interface.conn_error(handle, "tx error"),
    }
}

/// Decrements listener backlog ages, evicting entries that reach zero.
pub fn age_backlogs(interface: &mut Interface) {
    for handle in interface.conns.handles() {
        if let Some(conn) = interface.conns.get_mut(handle) {
            if !conn.is_listening || conn.proto != Proto::Tcp {
                continue;
            }
            for slot in conn.backlog.iter_mut() {
                let evict = match *slot {
                    Some(ref mut entry) => {
                        if entry.age <= 1 {
                            true
                        } else {
                            entry.age -= 1;
                            false
                        }
                    }
                    None => false,
                };
                if evict {
                    debug!("evicting half-open connection on port {}", conn.loc.port);
                    *slot = None;
                }
            }
        }
    }
}

/// Walks every connection's timer once per poll. Handles are collected
/// first so connections can be destroyed while the scan acts.
pub fn scan_timers(interface: &mut Interface) {
    for handle in interface.conns.handles() {
        let fired = {
            let conn = match interface.conns.get(handle) {
                Some(conn) => conn,
                None => continue,
            };
            if (conn.proto == Proto::Udp && !conn.is_resolving) || conn.is_listening {
                continue;
            }
            match conn.state.timer {
                Some(deadline) if interface.now > deadline => Some((conn.state.timer_kind, conn.proto)),
                _ => None,
            }
        };

        let (kind, proto) = match fired {
            Some(fired) => fired,
            None => continue,
        };

        match kind {
            TimerKind::Resolve => {
                interface.conn_error(handle, "resolve timeout");
                continue;
            }
            _ if proto == Proto::Udp => continue,
            TimerKind::Syn => {
                interface.conn_error(handle, "connect timeout");
                continue;
            }
            TimerKind::Fin => {
                if let Some(conn) = interface.conns.get_mut(handle) {
                    conn.is_closing = true;
                }
                continue;
            }
            TimerKind::Ack => {
                let pending = {
                    let conn = interface.conns.get(handle).unwrap();
                    (
                        conn.state.acked != conn.state.ack,
                        conn.state.mac,
                        conn.rem,
                        conn.loc.port,
                        conn.state.seq,
                        conn.state.ack,
                    )
                };
                if pending.0 {
                    send_segment(
                        interface,
                        pending.1,
                        pending.2.addr,
                        flags::ACK,
                        pending.3,
                        pending.2.port,
                        pending.4,
                        pending.5,
                        &[],
                    ).ok();
                    if let Some(conn) = interface.conns.get_mut(handle) {
                        conn.state.acked = conn.state.ack;
                    }
                }
            }
            TimerKind::Keepalive => {
                let probe = {
                    let conn = interface.conns.get(handle).unwrap();
                    (
                        conn.state.keepalive_misses,
                        conn.state.mac,
                        conn.rem,
                        conn.loc.port,
                        conn.state.seq,
                        conn.state.ack,
                    )
                };
                if probe.0 >= KEEPALIVE_PROBES {
                    interface.conn_error(handle, "keepalive timeout");
                    continue;
                }
                if let Some(conn) = interface.conns.get_mut(handle) {
                    conn.state.keepalive_misses += 1;
                }
                // The probe sits one byte left of the window edge.
                send_segment(
                    interface,
                    probe.1,
                    probe.2.addr,
                    flags::ACK,
                    probe.3,
                    probe.2.port,
                    probe.4.wrapping_sub(1),
                    probe.5,
                    &[],
                ).ok();
            }
        }

        set_timeout(interface, handle, TimerKind::Keepalive);
    }
}

/// Receives one TCP segment and routes it to the owning connection or the
/// listener machinery.
pub fn recv_packet(interface: &mut Interface, parsed: &ParsedPacket) {
    let tcp = match parsed.tcp {
        Some(ref tcp) => tcp,
        None => return,
    };

    let (src_ip, dst_ip) = if let Some(ref ip) = parsed.ipv4 {
        (IpAddress::V4(ip.src_addr()), IpAddress::V4(ip.dst_addr()))
    } else if let Some(ref ip6) = parsed.ipv6 {
        (IpAddress::V6(ip6.src_addr()), IpAddress::V6(ip6.dst_addr()))
    } else {
        return;
    };

    let seg = Seg {
        src_ip,
        dst_ip,
        src_port: tcp.src_port(),
        dst_port: tcp.dst_port(),
        seq: tcp.seq_num(),
        ack: tcp.ack_num(),
        flags: tcp.flags(),
        mss: tcp.mss(),
        payload: parsed.payload,
        sender: parsed.sender.unwrap_or(EthernetAddress::BROADCAST),
    };

    let established = interface
        .conns
        .iter()
        .find(|&(_, conn)| {
            conn.proto == Proto::Tcp && !conn.is_listening && conn.loc.port == seg.dst_port
                && conn.rem.port == seg.src_port && conn.rem.addr == seg.src_ip
        })
        .map(|(handle, _)| handle);

    if let Some(handle) = established {
        recv_for_conn(interface, handle, &seg);
        return;
    }

    let listener = interface
        .conns
        .iter()
        .find(|&(_, conn)| {
            conn.proto == Proto::Tcp && conn.is_listening && conn.loc.port == seg.dst_port
        })
        .map(|(handle, _)| handle);

    match listener {
        None => {
            send_reply(interface, &seg, flags::RST | flags::ACK, seg.ack).ok();
        }
        Some(listener) => recv_for_listener(interface, listener, &seg),
    }
}

fn recv_for_conn(interface: &mut Interface, handle: usize, seg: &Seg) {
    let is_connecting = match interface.conns.get(handle) {
        Some(conn) => conn.is_connecting,
        None => return,
    };

    if is_connecting && seg.flags == flags::SYN | flags::ACK {
        // Active open completes.
        {
            let conn = interface.conns.get_mut(handle).unwrap();
            if let Some(mss) = seg.mss {
                conn.state.dmss = mss;
            }
            conn.state.seq = seg.ack;
            conn.state.ack = seg.seq.wrapping_add(1);
            conn.is_connecting = false;
        }
        send_reply(interface, seg, flags::ACK, seg.ack).ok();
        set_timeout(interface, handle, TimerKind::Keepalive);
        interface.push_event(Event::Conn(handle, ConnEvent::Connected));
    } else if is_connecting && seg.flags != flags::ACK {
        send_reply(interface, seg, flags::RST | flags::ACK, seg.ack).ok();
    } else if seg.flags & flags::RST != 0 {
        // RFC-1122 4.2.2.13
        interface.conn_error(handle, "peer RST");
    } else {
        {
            let conn = interface.conns.get_mut(handle).unwrap();
            conn.state.keepalive_misses = 0;
        }
        // Push the keepalive deadline out past this activity, unless an
        // ACK (or closure) timer is pending.
        let keepalive_armed =
            interface.conns.get(handle).unwrap().state.timer_kind == TimerKind::Keepalive;
        if keepalive_armed {
            set_timeout(interface, handle, TimerKind::Keepalive);
        }
        read_conn(interface, handle, seg);
    }
}

/// Established-state segment processing: FIN and simultaneous closure,
/// keepalive answers, duplicate suppression, in-order data, delayed ACK.
fn read_conn(interface: &mut Interface, handle: usize, seg: &Seg) {
    let (mac, rem, loc_port) = {
        let conn = interface.conns.get(handle).unwrap();
        (conn.state.mac, conn.rem, conn.loc.port)
    };
    let payload_len = seg.payload.len() as u32;

    if seg.flags & flags::FIN != 0 {
        let expected = interface.conns.get(handle).unwrap().state.ack;
        if seg.seq != expected {
            trace!("ignoring FIN, SEQ != ACK: {:x} {:x}", seg.seq, expected);
            let (seq, ack) = current_nums(interface, handle);
            send_segment(
                interface, mac, rem.addr, flags::ACK, loc_port, rem.port, seq, ack, &[],
            ).ok();
            return;
        }

        let mut reply = flags::ACK;
        {
            let conn = interface.conns.get_mut(handle).unwrap();
            conn.state.ack = seg.seq.wrapping_add(payload_len).wrapping_add(1);
            conn.state.fin_rcvd = true;
        }

        let fin_wait = {
            let conn = interface.conns.get(handle).unwrap();
            conn.is_draining && conn.state.timer_kind == TimerKind::Fin
                && conn.state.timer.is_some()
        };
        if fin_wait {
            // Our FIN crossed theirs (simultaneous closure) or this is
            // their answer; converge the sequence numbers and finish.
            let conn = interface.conns.get_mut(handle).unwrap();
            if conn.state.seq == seg.ack {
                conn.state.seq = conn.state.seq.wrapping_add(1);
            } else {
                conn.state.seq = seg.ack;
            }
            conn.state.three_way_closed = true;
        } else {
            reply |= flags::FIN;
            let conn = interface.conns.get_mut(handle).unwrap();
            conn.is_draining = true;
        }

        if reply & flags::FIN != 0 {
            set_timeout(interface, handle, TimerKind::Fin);
        }
        let (seq, ack) = current_nums(interface, handle);
        send_segment(
            interface, mac, rem.addr, reply, loc_port, rem.port, seq, ack, &[],
        ).ok();

        if seg.payload.is_empty() {
            return;
        }
        // A FIN carrying data: the bytes still count, the ack above
        // already covers them.
    } else if payload_len <= 1 && seg.seq == current_nums(interface, handle).1.wrapping_sub(1) {
        // Peer keepalive probe (RFC-9293 3.8.4, tolerate the off-by-one
        // implementations too).
        trace!("{} keepalive probe answered", handle);
        let (seq, ack) = current_nums(interface, handle);
        send_segment(
            interface, mac, rem.addr, flags::ACK, loc_port, rem.port, seq, ack, &[],
        ).ok();
        return;
    } else if seg.payload.is_empty() {
        // A bare ACK; it may complete a closure handshake.
        let conn = interface.conns.get_mut(handle).unwrap();
        if conn.state.fin_rcvd && conn.state.timer_kind == TimerKind::Fin {
            conn.state.three_way_closed = true;
        }
        return;
    } else {
        let expected = interface.conns.get(handle).unwrap().state.ack;
        if seg.seq != expected {
            // Only exact-next segments are accepted; no reassembly.
            let dup_ack = seg.seq.wrapping_add(payload_len);
            if expected == dup_ack {
                trace!("ignoring duplicate segment");
            } else {
                trace!("SEQ != ACK: {:x} {:x}", seg.seq, expected);
                let (seq, ack) = current_nums(interface, handle);
                send_segment(
                    interface, mac, rem.addr, flags::ACK, loc_port, rem.port, seq, ack, &[],
                ).ok();
            }
            return;
        }
    }

    // Buffer the payload and run the delayed ACK heuristic.
    let overflow = {
        let conn = interface.conns.get_mut(handle).unwrap();
        if conn.recv_buf.len() + seg.payload.len() > udp::MAX_RECV_BUFFER {
            true
        } else {
            conn.recv_buf.extend_from_slice(seg.payload);
            if seg.flags & flags::FIN == 0 {
                conn.state.ack = seg.seq.wrapping_add(payload_len);
            }
            conn.state.unacked += seg.payload.len();
            false
        }
    };
    if overflow {
        interface.conn_error(handle, "receive buffer full");
        return;
    }
    interface.push_event(Event::Conn(handle, ConnEvent::Read(seg.payload.len())));

    let (unacked, acked, ack_now) = {
        let conn = interface.conns.get(handle).unwrap();
        (
            conn.state.unacked,
            conn.state.acked,
            conn.state.ack,
        )
    };

    if unacked > WINDOW as usize / 2 && acked != ack_now {
        // Past half the window: acknowledge immediately.
        let (seq, ack) = current_nums(interface, handle);
        send_segment(
            interface, mac, rem.addr, flags::ACK, loc_port, rem.port, seq, ack, &[],
        ).ok();
        {
            let conn = interface.conns.get_mut(handle).unwrap();
            conn.state.unacked = 0;
            conn.state.acked = ack;
        }
        let rearm =
            interface.conns.get(handle).unwrap().state.timer_kind != TimerKind::Keepalive;
        if rearm {
            set_timeout(interface, handle, TimerKind::Keepalive);
        }
    } else {
        let armed = interface.conns.get(handle).unwrap().state.timer_kind == TimerKind::Ack;
        if !armed {
            set_timeout(interface, handle, TimerKind::Ack);
        }
    }
}

fn current_nums(interface: &Interface, handle: usize) -> (u32, u32) {
    match interface.conns.get(handle) {
        Some(conn) => (conn.state.seq, conn.state.ack),
        None => (0, 0),
    }
}

fn recv_for_listener(interface: &mut Interface, listener: usize, seg: &Seg) {
    if seg.flags & flags::RST != 0 {
        return;
    }

    if seg.flags & flags::SYN != 0 {
        handle_syn(interface, listener, seg);
        return;
    }

    if seg.flags & flags::FIN != 0 {
        // Half open leftovers are waved off.
        send_reply(interface, seg, flags::FIN | flags::ACK, seg.ack).ok();
        return;
    }

    // The ACK of our encoded SYN-ACK, hopefully.
    match decode_backlog_ack(interface, listener, seg) {
        Some(entry) => accept_conn(interface, listener, seg, entry),
        None => {
            send_reply(interface, seg, flags::RST | flags::ACK, seg.ack).ok();
        }
    }
}

/// A new SYN: remember {port, mss, age} in a free backlog slot and answer
/// with a SYN-ACK whose initial sequence number encodes the slot and the
/// peer port. No connection object exists until the ACK comes back.
fn handle_syn(interface: &mut Interface, listener: usize, seg: &Seg) {
    if seg.src_port == 0 || seg.flags & flags::ACK != 0 {
        return;
    }

    let slot = {
        let conn = match interface.conns.get_mut(listener) {
            Some(conn) => conn,
            None => return,
        };
        let slot = (0 .. BACKLOG_LEN).find(|i| conn.backlog[*i].is_none());
        if let Some(slot) = slot {
            conn.backlog[slot] = Some(BacklogEntry {
                port: seg.src_port,
                mss: seg.mss.unwrap_or(536),
                age: BACKLOG_AGE,
            });
        }
        slot
    };

    let slot = match slot {
        Some(slot) => slot,
        None => {
            debug!("backlog full, dropping SYN from port {}", seg.src_port);
            interface.ndrop += 1;
            return;
        }
    };

    let isn = ((slot as u32) << 16) | seg.src_port as u32;
    send_reply(interface, seg, flags::SYN | flags::ACK, isn).ok();
}

/// Validates a handshake-completing ACK against the backlog: the encoded
/// slot must hold an entry whose port matches both the encoding and the
/// segment source. Match removes the entry.
fn decode_backlog_ack(
    interface: &mut Interface,
    listener: usize,
    seg: &Seg,
) -> Option<BacklogEntry> {
    if seg.flags & flags::ACK == 0 {
        return None;
    }

    let isn = seg.ack.wrapping_sub(1);
    let slot = (isn >> 16) as usize;
    let port = isn as u16;
    if slot >= BACKLOG_LEN || port != seg.src_port {
        return None;
    }

    let conn = interface.conns.get_mut(listener)?;
    let matched = match conn.backlog[slot] {
        Some(entry) if entry.port == seg.src_port => Some(entry),
        _ => None,
    };
    if matched.is_some() {
        conn.backlog[slot] = None;
    }
    matched
}

/// Materializes a connection out of a validated backlog entry.
fn accept_conn(interface: &mut Interface, listener: usize, seg: &Seg, entry: BacklogEntry) {
    let loc = SocketAddr {
        addr: seg.dst_ip,
        port: seg.dst_port,
    };
    let rem = SocketAddr {
        addr: seg.src_ip,
        port: seg.src_port,
    };

    let mut conn = Connection::new(Proto::Tcp, loc, rem);
    conn.is_accepted = true;
    conn.state.seq = seg.ack;
    conn.state.ack = seg.seq;
    conn.state.dmss = entry.mss;
    conn.state.mac = seg.sender;

    match interface.conns.add(conn) {
        Ok(handle) => {
            debug!("{} accepted {} (listener {})", handle, rem, listener);
            set_timeout(interface, handle, TimerKind::Keepalive);
            interface.push_event(Event::Conn(handle, ConnEvent::Accepted));
        }
        Err(_) => {
            warn!("connection table full, dropping accepted peer {}", rem);
            interface.ndrop += 1;
        }
    }
}
