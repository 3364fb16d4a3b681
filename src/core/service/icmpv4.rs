use core::packet::ParsedPacket;
use core::repr::{
    ipv4_protocols,
    Icmpv4Packet,
    Icmpv4Repr,
};
use core::service::{
    ipv4,
    Interface,
};

/// Receives an ICMP packet and answers echo requests addressed to us,
/// echoing back as much of the payload as the transmit buffer allows.
pub fn recv_packet(interface: &mut Interface, parsed: &ParsedPacket) {
    let (ip_src, ip_dst) = match parsed.ipv4 {
        Some(ref ip) => (ip.src_addr(), ip.dst_addr()),
        None => return,
    };
    let icmp = match parsed.icmpv4 {
        Some(ref icmp) => icmp,
        None => return,
    };

    if ip_dst != *interface.ipv4_addr || interface.ipv4_addr.is_unspecified() {
        return;
    }

    let (id, seq) = match Icmpv4Repr::deserialize(icmp) {
        Ok(Icmpv4Repr::EchoRequest { id, seq }) => (id, seq),
        _ => return,
    };

    let sender = match parsed.sender {
        Some(sender) => sender,
        None => interface.gateway_mac,
    };

    // Echo back no more than the transmit buffer can carry.
    let headers = 14 + 20 + Icmpv4Packet::<&[u8]>::HEADER_LEN;
    let space = interface.tx.len().saturating_sub(headers);
    let echo_len = parsed.payload.len().min(space);
    let payload = &parsed.payload[.. echo_len];

    let our_addr = *interface.ipv4_addr;
    ipv4::send_packet(
        interface,
        sender,
        ipv4_protocols::ICMP,
        our_addr,
        ip_src,
        Icmpv4Packet::<&[u8]>::buffer_len(echo_len),
        |icmp_buffer| {
            let mut reply = Icmpv4Packet::try_new(icmp_buffer).unwrap();
            reply.payload_mut().copy_from_slice(payload);
            Icmpv4Repr::EchoReply { id, seq }.serialize(&mut reply);
        },
    ).ok();
}
