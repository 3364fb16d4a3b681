extern crate mcunet;

mod common;

use std::time::Duration;

use mcunet::core::repr::{
    dhcp_msg_types,
    dhcp_opts,
    dhcp_ports,
    DhcpOptionWriter,
    DhcpPacket,
    EthernetAddress,
    Ipv4Address,
};
use mcunet::core::service::{
    Config,
    Event,
    LinkState,
};

use common::{
    peer_mac,
    sent_udp,
    udp_frame,
    Harness,
};

fn server_ip() -> Ipv4Address {
    Ipv4Address::new([10, 0, 0, 1])
}

fn offered_ip() -> Ipv4Address {
    Ipv4Address::new([10, 0, 0, 5])
}

fn gateway_ip() -> Ipv4Address {
    Ipv4Address::new([10, 0, 0, 1])
}

/// Builds a DHCP server reply carrying the given message type.
fn server_reply(msg_type: u8, lease: u32) -> Vec<u8> {
    let xid = {
        // The client derives its transaction id from its MAC.
        let mac = common::OUR_MAC;
        ((mac[2] as u32) << 24) | ((mac[3] as u32) << 16) | ((mac[4] as u32) << 8) | mac[5] as u32
    };

    let mut message = vec![0; DhcpPacket::<&[u8]>::buffer_len(64)];
    let options_len = {
        let mut dhcp = DhcpPacket::try_new(&mut message[..]).unwrap();
        dhcp.init(2, xid);
        dhcp.set_yiaddr(offered_ip());
        dhcp.set_chaddr(EthernetAddress::new(common::OUR_MAC));

        let mut writer = DhcpOptionWriter::new(dhcp.options_mut());
        writer.write(dhcp_opts::MSG_TYPE, &[msg_type]).unwrap();
        writer
            .write(dhcp_opts::SUBNET_MASK, &[255, 255, 255, 0])
            .unwrap();
        writer
            .write(dhcp_opts::ROUTER, gateway_ip().as_bytes())
            .unwrap();
        writer
            .write(dhcp_opts::SERVER_ID, server_ip().as_bytes())
            .unwrap();
        let lease_bytes = [
            (lease >> 24) as u8,
            (lease >> 16) as u8,
            (lease >> 8) as u8,
            lease as u8,
        ];
        writer.write(dhcp_opts::LEASE_TIME, &lease_bytes).unwrap();
        writer.finish().unwrap()
    };
    message.truncate(DhcpPacket::<&[u8]>::buffer_len(options_len));

    // siaddr stays zero, so the client falls back to the IP source.
    udp_frame(
        peer_mac(),
        server_ip(),
        dhcp_ports::SERVER,
        Ipv4Address::BROADCAST,
        dhcp_ports::CLIENT,
        &message,
    )
}

fn dhcp_messages(frames: &[Vec<u8>]) -> Vec<(u8, Vec<(u8, Vec<u8>)>)> {
    sent_udp(frames)
        .into_iter()
        .filter(|&(src_port, dst_port, _, _)| {
            src_port == dhcp_ports::CLIENT && dst_port == dhcp_ports::SERVER
        })
        .filter_map(|(_, _, _, payload)| {
            let dhcp = DhcpPacket::try_new(&payload[..]).ok()?;
            dhcp.check_encoding().ok()?;
            let msg_type = dhcp.msg_type()?;
            let options = dhcp.options().map(|(code, data)| (code, data.to_vec())).collect();
            Some((msg_type, options))
        })
        .collect()
}

#[test]
fn lease_acquisition_promotes_interface_to_ready() {
    // No static address: the DHCP client is enabled automatically.
    let mut harness = Harness::new(Config::default());

    // Link comes up; the first housekeeping tick broadcasts a DISCOVER.
    harness.poll();
    assert_eq!(harness.iface.state, LinkState::Up);
    let frames = harness.sent();
    let discovers = dhcp_messages(&frames);
    assert_eq!(discovers.len(), 1);
    assert_eq!(discovers[0].0, dhcp_msg_types::DISCOVER);

    // The server offers 10.0.0.5; the client must request exactly that.
    harness.inject(server_reply(dhcp_msg_types::OFFER, 3600));
    let frames = harness.run();
    assert_eq!(harness.iface.state, LinkState::Requesting);
    let requests = dhcp_messages(&frames);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, dhcp_msg_types::REQUEST);
    let requested = requests[0]
        .1
        .iter()
        .find(|&&(code, _)| code == dhcp_opts::REQUESTED_IP)
        .map(|&(_, ref data)| data.clone());
    assert_eq!(requested, Some(offered_ip().as_bytes().to_vec()));

    // The ACK binds the address and records the lease.
    harness.inject(server_reply(dhcp_msg_types::ACK, 3600));
    harness.run();
    assert_eq!(harness.iface.state, LinkState::IpBound);
    assert_eq!(*harness.iface.ipv4_addr, offered_ip());
    assert_eq!(harness.iface.ipv4_addr.mask(), Ipv4Address::new([255, 255, 255, 0]));
    assert_eq!(harness.iface.gateway, gateway_ip());

    let expire = harness.iface.lease_expire.expect("lease expiry recorded");
    let granted = expire.duration_since(harness.now);
    assert!(granted <= Duration::from_secs(3600));
    assert!(granted > Duration::from_secs(3599));

    // One second later the interface is READY even without gateway ARP.
    harness.advance(Duration::from_secs(1));
    harness.poll();
    assert_eq!(harness.iface.state, LinkState::Ready);

    let states: Vec<_> = harness
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::StateChange(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            LinkState::Up,
            LinkState::Requesting,
            LinkState::IpBound,
            LinkState::Ready,
        ]
    );
}

#[test]
fn nak_reverts_to_up_and_clears_the_address() {
    let mut harness = Harness::new(Config::default());
    harness.poll();
    harness.inject(server_reply(dhcp_msg_types::OFFER, 3600));
    harness.run();
    harness.inject(server_reply(dhcp_msg_types::ACK, 3600));
    harness.run();
    assert_eq!(*harness.iface.ipv4_addr, offered_ip());

    // Promote to READY, then poison the lease.
    harness.advance(Duration::from_secs(1));
    harness.poll();
    assert_eq!(harness.iface.state, LinkState::Ready);

    harness.inject(server_reply(dhcp_msg_types::NAK, 0));
    harness.run();
    assert_eq!(harness.iface.state, LinkState::Up);
    assert!(harness.iface.ipv4_addr.is_unspecified());
}

#[test]
fn lease_expiry_restarts_discovery() {
    let mut harness = Harness::new(Config::default());
    harness.poll();
    harness.inject(server_reply(dhcp_msg_types::OFFER, 60));
    harness.run();
    harness.inject(server_reply(dhcp_msg_types::ACK, 60));
    harness.run();
    harness.advance(Duration::from_secs(1));
    harness.poll();
    assert_eq!(harness.iface.state, LinkState::Ready);
    harness.sent();

    // Jump past the lease.
    harness.advance(Duration::from_secs(61));
    harness.poll();
    assert_eq!(harness.iface.state, LinkState::Up);
    assert!(harness.iface.ipv4_addr.is_unspecified());

    // The next tick broadcasts a fresh DISCOVER.
    harness.advance(Duration::from_secs(1));
    harness.poll();
    let frames = harness.sent();
    let messages = dhcp_messages(&frames);
    assert!(messages.iter().any(|&(t, _)| t == dhcp_msg_types::DISCOVER));
}

#[test]
fn renewal_requests_are_paced_once_per_minute() {
    let mut harness = Harness::new(Config::default());
    harness.poll();
    harness.inject(server_reply(dhcp_msg_types::OFFER, 600));
    harness.run();
    harness.inject(server_reply(dhcp_msg_types::ACK, 600));
    harness.run();
    harness.advance(Duration::from_secs(1));
    harness.poll();
    assert_eq!(harness.iface.state, LinkState::Ready);

    // A 600 s lease is inside the 30 minute renewal window immediately,
    // so the first READY housekeeping already renews.
    let first = dhcp_messages(&harness.sent());
    assert!(first.iter().any(|&(t, _)| t == dhcp_msg_types::REQUEST));

    // A second later: no new renewal yet.
    harness.advance(Duration::from_secs(1));
    harness.poll();
    let quiet = dhcp_messages(&harness.sent());
    assert!(quiet.iter().all(|&(t, _)| t != dhcp_msg_types::REQUEST));

    // After a minute the next renewal goes out.
    harness.advance(Duration::from_secs(61));
    harness.poll();
    let second = dhcp_messages(&harness.sent());
    assert!(second.iter().any(|&(t, _)| t == dhcp_msg_types::REQUEST));
}

#[test]
fn dhcp_server_offers_our_ip_plus_one() {
    let mut config = Config::default();
    config.enable_dhcp_server = true;
    let mut harness = Harness::ready(config);

    // A client DISCOVER, broadcast from an unconfigured host.
    let mut message = vec![0; DhcpPacket::<&[u8]>::buffer_len(8)];
    let options_len = {
        let mut dhcp = DhcpPacket::try_new(&mut message[..]).unwrap();
        dhcp.init(1, 0x1234_5678);
        dhcp.set_chaddr(peer_mac());
        let mut writer = DhcpOptionWriter::new(dhcp.options_mut());
        writer
            .write(dhcp_opts::MSG_TYPE, &[dhcp_msg_types::DISCOVER])
            .unwrap();
        writer.finish().unwrap()
    };
    message.truncate(DhcpPacket::<&[u8]>::buffer_len(options_len));

    harness.inject(udp_frame(
        peer_mac(),
        Ipv4Address::UNSPECIFIED,
        dhcp_ports::CLIENT,
        Ipv4Address::BROADCAST,
        dhcp_ports::SERVER,
        &message,
    ));
    let frames = harness.run();

    let offers: Vec<_> = sent_udp(&frames)
        .into_iter()
        .filter(|&(src_port, dst_port, _, _)| {
            src_port == dhcp_ports::SERVER && dst_port == dhcp_ports::CLIENT
        })
        .collect();
    assert_eq!(offers.len(), 1);

    let dhcp = DhcpPacket::try_new(&offers[0].3[..]).unwrap();
    assert!(dhcp.check_encoding().is_ok());
    assert_eq!(dhcp.msg_type(), Some(dhcp_msg_types::OFFER));
    assert_eq!(dhcp.yiaddr(), Ipv4Address::new([10, 0, 0, 2]));
    assert_eq!(dhcp.xid(), 0x1234_5678);
    assert_eq!(dhcp.chaddr(), peer_mac());
}
