extern crate mcunet;

mod common;

use mcunet::core::repr::{
    eth_types,
    ipv4_protocols,
    EthernetFrame,
    Icmpv4Packet,
    Icmpv4Repr,
    Ipv4Address,
    Ipv4Packet,
};
use mcunet::core::service::Config;

use common::{
    ipv4_frame,
    peer_mac,
    Harness,
};

fn echo_request(id: u16, seq: u16, data: &[u8]) -> Vec<u8> {
    let mut icmp = vec![0; Icmpv4Packet::<&[u8]>::buffer_len(data.len())];
    {
        let mut packet = Icmpv4Packet::try_new(&mut icmp[..]).unwrap();
        packet.payload_mut().copy_from_slice(data);
        Icmpv4Repr::EchoRequest { id, seq }.serialize(&mut packet);
    }
    ipv4_frame(
        peer_mac(),
        Ipv4Address::new([10, 0, 0, 2]),
        Ipv4Address::new([10, 0, 0, 1]),
        ipv4_protocols::ICMP,
        &icmp,
    )
}

fn sent_echoes(frames: &[Vec<u8>]) -> Vec<(Icmpv4Repr, Vec<u8>, Ipv4Address)> {
    frames
        .iter()
        .filter_map(|frame| {
            let eth = EthernetFrame::try_new(&frame[..]).ok()?;
            if eth.payload_type() != eth_types::IPV4 {
                return None;
            }
            let ip = Ipv4Packet::try_new(eth.payload()).ok()?;
            ip.check_encoding().ok()?;
            if ip.protocol() != ipv4_protocols::ICMP {
                return None;
            }
            let icmp = Icmpv4Packet::try_new(ip.payload()).ok()?;
            icmp.check_encoding().ok()?;
            let repr = Icmpv4Repr::deserialize(&icmp).ok()?;
            Some((repr, icmp.payload().to_vec(), ip.dst_addr()))
        })
        .collect()
}

#[test]
fn echo_request_is_answered_with_matching_id_seq_and_data() {
    let mut harness = Harness::ready(Config::default());

    harness.inject(echo_request(0xBEEF, 3, b"payload bytes"));
    let frames = harness.run();

    let replies = sent_echoes(&frames);
    assert_eq!(replies.len(), 1);
    let (repr, data, dst) = replies[0].clone();
    assert_eq!(repr, Icmpv4Repr::EchoReply { id: 0xBEEF, seq: 3 });
    assert_eq!(data, b"payload bytes".to_vec());
    assert_eq!(dst, Ipv4Address::new([10, 0, 0, 2]));
}

#[test]
fn echo_request_for_other_destination_is_ignored() {
    let mut harness = Harness::ready(Config::default());

    let mut icmp = vec![0; 8];
    {
        let mut packet = Icmpv4Packet::try_new(&mut icmp[..]).unwrap();
        Icmpv4Repr::EchoRequest { id: 1, seq: 1 }.serialize(&mut packet);
    }
    harness.inject(ipv4_frame(
        peer_mac(),
        Ipv4Address::new([10, 0, 0, 2]),
        Ipv4Address::new([10, 0, 0, 42]),
        ipv4_protocols::ICMP,
        &icmp,
    ));
    let frames = harness.run();
    assert!(sent_echoes(&frames).is_empty());
}

#[test]
fn corrupted_echo_request_is_dropped_and_counted() {
    let mut harness = Harness::ready(Config::default());
    let errors = harness.iface.nerr;

    let mut frame = echo_request(7, 7, b"data");
    let tail = frame.len() - 1;
    frame[tail] ^= 0x01;
    harness.inject(frame);
    let frames = harness.run();

    assert!(sent_echoes(&frames).is_empty());
    assert_eq!(harness.iface.nerr, errors + 1);
}
