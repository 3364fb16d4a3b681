use core::packet::ParsedPacket;
use core::repr::{
    icmpv6_msg_types,
    ipv6_next_headers,
    Icmpv6Packet,
};
use core::service::{
    ipv6,
    Interface,
};

/// Answers an ICMPv6 echo request addressed to one of our addresses.
pub fn recv_packet(interface: &mut Interface, parsed: &ParsedPacket) {
    let (ip_src, ip_dst) = match parsed.ipv6 {
        Some(ref ip) => (ip.src_addr(), ip.dst_addr()),
        None => return,
    };
    let (id, seq) = match parsed.icmpv6 {
        Some(ref icmp) if icmp.msg_type() == icmpv6_msg_types::ECHO_REQUEST => icmp.echo_id_seq(),
        _ => return,
    };

    if ip_dst.is_unspecified()
        || (ip_dst != interface.ipv6_link_local && ip_dst != interface.ipv6_global)
    {
        return;
    }

    let sender = match parsed.sender {
        Some(sender) => sender,
        None => return,
    };

    // The parsed payload still leads with the echo identifier pair.
    let data = &parsed.payload[4 ..];
    let headers = 14 + 40 + 8;
    let space = interface.tx.len().saturating_sub(headers);
    let echo_len = data.len().min(space);
    let echo = &data[.. echo_len];

    let src = ipv6::src_for(interface, ip_src);
    ipv6::send_packet(
        interface,
        sender,
        ipv6_next_headers::ICMPV6,
        64,
        src,
        ip_src,
        8 + echo_len,
        |buffer| {
            let mut reply = Icmpv6Packet::try_new(buffer).unwrap();
            reply.set_msg_type(icmpv6_msg_types::ECHO_REPLY);
            reply.set_code(0);
            {
                let body = reply.body_mut();
                body[0] = (id >> 8) as u8;
                body[1] = id as u8;
                body[2] = (seq >> 8) as u8;
                body[3] = seq as u8;
                body[4 ..].copy_from_slice(echo);
            }
            reply.fill_checksum(&src, &ip_src);
        },
    ).ok();
}
