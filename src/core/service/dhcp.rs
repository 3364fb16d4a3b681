//! DHCPv4 client and the minimal single-client server.

use std::time::Duration;

use byteorder::{
    ByteOrder,
    NetworkEndian,
};

use Result;
use core::packet::ParsedPacket;
use core::repr::{
    dhcp_msg_types as msg_types,
    dhcp_op_codes as op_codes,
    dhcp_opts as opts,
    dhcp_ports as ports,
    ipv4_protocols,
    DhcpPacket,
    EthernetAddress,
    Ipv4Address,
    Ipv4AddressCidr,
    UdpPacket,
    UdpRepr,
};
use core::service::{
    ipv4,
    Event,
    Interface,
    LinkState,
};

/// Renewal begins this long before the lease expires.
const RENEW_WINDOW: Duration = Duration::from_secs(30 * 60);

/// At most one renewal request per minute.
const RENEW_PERIOD: Duration = Duration::from_secs(60);

/// The transaction id every client message carries, derived from the
/// interface MAC so replies can be told apart from other hosts'.
fn client_xid(interface: &Interface) -> u32 {
    match interface.link.addr() {
        Some(addr) => NetworkEndian::read_u32(&addr.as_bytes()[2 .. 6]),
        None => 0,
    }
}

fn send_message(
    interface: &mut Interface,
    dst_mac: EthernetAddress,
    src_addr: Ipv4Address,
    dst_addr: Ipv4Address,
    src_port: u16,
    dst_port: u16,
    op: u8,
    xid: u32,
    ciaddr: Ipv4Address,
    yiaddr: Ipv4Address,
    chaddr: EthernetAddress,
    options: &[u8],
) -> Result<usize> {
    let dhcp_len = DhcpPacket::<&[u8]>::buffer_len(options.len());
    let udp_len = UdpPacket::<&[u8]>::buffer_len(dhcp_len);

    ipv4::send_packet(
        interface,
        dst_mac,
        ipv4_protocols::UDP,
        src_addr,
        dst_addr,
        udp_len,
        |udp_buffer| {
            let mut udp = UdpPacket::try_new(udp_buffer).unwrap();
            UdpRepr {
                src_port,
                dst_port,
                length: udp_len as u16,
            }.serialize(&mut udp);
            {
                let mut dhcp = DhcpPacket::try_new(udp.payload_mut()).unwrap();
                dhcp.init(op, xid);
                dhcp.set_ciaddr(ciaddr);
                dhcp.set_yiaddr(yiaddr);
                dhcp.set_chaddr(chaddr);
                dhcp.options_mut()[.. options.len()].copy_from_slice(options);
            }
            udp.fill_checksum(src_addr.as_bytes(), dst_addr.as_bytes());
        },
    )
}

/// Broadcasts a DISCOVER asking for address and mask.
pub fn send_discover(interface: &mut Interface) {
    let chaddr = match interface.link.addr() {
        Some(addr) => addr,
        None => return,
    };
    let xid = client_xid(interface);

    let options = [
        opts::MSG_TYPE, 1, msg_types::DISCOVER,
        opts::PARAM_LIST, 2, opts::SUBNET_MASK, opts::ROUTER,
        opts::END,
    ];

    debug!("DHCP discover sent, our MAC: {}", chaddr);
    send_message(
        interface,
        EthernetAddress::BROADCAST,
        Ipv4Address::UNSPECIFIED,
        Ipv4Address::BROADCAST,
        ports::CLIENT,
        ports::SERVER,
        op_codes::REQUEST,
        xid,
        Ipv4Address::UNSPECIFIED,
        Ipv4Address::UNSPECIFIED,
        chaddr,
        &options,
    ).ok();
}

/// Broadcasts a REQUEST selecting an offered address from a server.
fn send_request_select(interface: &mut Interface, requested: Ipv4Address, server: Ipv4Address) {
    let chaddr = match interface.link.addr() {
        Some(addr) => addr,
        None => return,
    };
    let xid = client_xid(interface);

    let mut options = Vec::with_capacity(64);
    options.extend_from_slice(&[opts::MSG_TYPE, 1, msg_types::REQUEST]);
    options.push(opts::SERVER_ID);
    options.push(4);
    options.extend_from_slice(server.as_bytes());
    options.push(opts::REQUESTED_IP);
    options.push(4);
    options.extend_from_slice(requested.as_bytes());
    let name = interface.dhcp_name.clone();
    options.push(opts::HOST_NAME);
    options.push(name.len() as u8);
    options.extend_from_slice(name.as_bytes());
    options.push(opts::PARAM_LIST);
    let extra = interface.enable_req_dns as u8 + interface.enable_req_sntp as u8;
    options.push(2 + extra);
    options.push(opts::SUBNET_MASK);
    options.push(opts::ROUTER);
    if interface.enable_req_dns {
        options.push(opts::DNS);
    }
    if interface.enable_req_sntp {
        options.push(opts::SNTP);
    }
    options.push(opts::END);

    debug!("DHCP request sent for {}", requested);
    send_message(
        interface,
        EthernetAddress::BROADCAST,
        Ipv4Address::UNSPECIFIED,
        Ipv4Address::BROADCAST,
        ports::CLIENT,
        ports::SERVER,
        op_codes::REQUEST,
        xid,
        Ipv4Address::UNSPECIFIED,
        Ipv4Address::UNSPECIFIED,
        chaddr,
        &options,
    ).ok();
}

/// Unicasts a renewal REQUEST to the server that granted the lease.
fn send_request_renew(interface: &mut Interface) {
    let chaddr = match interface.link.addr() {
        Some(addr) => addr,
        None => return,
    };
    let xid = client_xid(interface);
    let our_addr = *interface.ipv4_addr;
    let server = interface.dhcp_server;
    let server_mac = interface.gateway_mac;

    let options = [opts::MSG_TYPE, 1, msg_types::REQUEST, opts::END];

    debug!("DHCP renewal sent to {}", server);
    send_message(
        interface,
        server_mac,
        our_addr,
        server,
        ports::CLIENT,
        ports::SERVER,
        op_codes::REQUEST,
        xid,
        our_addr,
        Ipv4Address::UNSPECIFIED,
        chaddr,
        &options,
    ).ok();
}

/// Once per second: drive discovery while UP and the renewal/expiry
/// heuristics while READY.
pub fn housekeeping(interface: &mut Interface) {
    if !interface.enable_dhcp_client {
        return;
    }

    if interface.state == LinkState::Up {
        send_discover(interface);
        return;
    }

    let expire = match (interface.state, interface.lease_expire) {
        (LinkState::Ready, Some(expire)) => expire,
        _ => return,
    };

    if interface.now >= expire {
        info!("DHCP lease expired, releasing address");
        interface.ipv4_addr = Ipv4AddressCidr::new(Ipv4Address::UNSPECIFIED, 0);
        interface.lease_expire = None;
        interface.set_state(LinkState::Up);
    } else if interface.now + RENEW_WINDOW >= expire {
        let due = match interface.last_renew_at() {
            Some(last) => interface.now >= last + RENEW_PERIOD,
            None => true,
        };
        if due {
            interface.mark_renew_attempt();
            send_request_renew(interface);
        }
    }
}

/// Handles an OFFER/ACK/NAK addressed to our DHCP client.
pub fn recv_client(interface: &mut Interface, parsed: &ParsedPacket) {
    let dhcp = match DhcpPacket::try_new(parsed.payload) {
        Ok(dhcp) => dhcp,
        Err(_) => {
            interface.nerr += 1;
            return;
        }
    };
    if dhcp.check_encoding().is_err() {
        interface.nerr += 1;
        return;
    }
    if dhcp.xid() != client_xid(interface) {
        return;
    }

    let ip_src = match parsed.ipv4 {
        Some(ref ip) => ip.src_addr(),
        None => return,
    };

    let mut mask = None;
    let mut gateway = None;
    let mut dns = None;
    let mut sntp = None;
    let mut lease = None;
    let mut msg_type = None;

    for (code, data) in dhcp.options() {
        match code {
            opts::SUBNET_MASK if data.len() == 4 => mask = Ipv4Address::try_new(data).ok(),
            opts::ROUTER if data.len() == 4 => gateway = Ipv4Address::try_new(data).ok(),
            opts::DNS if data.len() == 4 && interface.enable_req_dns => {
                dns = Ipv4Address::try_new(data).ok()
            }
            opts::SNTP if data.len() == 4 && interface.enable_req_sntp => {
                sntp = Ipv4Address::try_new(data).ok()
            }
            opts::LEASE_TIME if data.len() == 4 => {
                lease = Some(NetworkEndian::read_u32(data))
            }
            opts::MSG_TYPE if data.len() == 1 => msg_type = Some(data[0]),
            _ => {}
        }
    }

    let offered = dhcp.yiaddr();
    let server = if dhcp.siaddr().is_unspecified() {
        ip_src
    } else {
        dhcp.siaddr()
    };

    match msg_type {
        Some(msg_types::NAK) => {
            // Release and start over.
            info!("DHCP NAK, releasing address");
            interface.ipv4_addr = Ipv4AddressCidr::new(Ipv4Address::UNSPECIFIED, 0);
            interface.lease_expire = None;
            interface.set_state(LinkState::Up);
        }
        Some(msg_types::OFFER) => {
            if interface.state == LinkState::Up && !offered.is_unspecified()
                && gateway.is_some() && lease.is_some()
            {
                send_request_select(interface, offered, server);
                interface.set_state(LinkState::Requesting);
            }
        }
        Some(msg_types::ACK) => {
            let (gateway, mask, lease) = match (gateway, mask, lease) {
                (Some(gateway), Some(mask), Some(lease)) => (gateway, mask, lease),
                _ => return,
            };

            if interface.state == LinkState::Requesting && !offered.is_unspecified() {
                interface.lease_expire =
                    Some(interface.now + Duration::from_secs(lease as u64));
                info!("lease: {} sec", lease);

                // Assume the DHCP server routes for us until ARP says
                // otherwise.
                if let Some(sender) = parsed.sender {
                    interface.gateway_mac = sender;
                }
                interface.ipv4_addr = Ipv4AddressCidr::from_mask(offered, mask);
                interface.gateway = gateway;
                interface.dhcp_server = server;
                interface.set_state(LinkState::IpBound);

                if let Some(dns) = dns {
                    interface.push_event(Event::DhcpDns(dns));
                }
                if let Some(sntp) = sntp {
                    interface.push_event(Event::DhcpSntp(sntp));
                }
            } else if interface.state == LinkState::Ready && offered == *interface.ipv4_addr {
                // Renewal.
                interface.lease_expire =
                    Some(interface.now + Duration::from_secs(lease as u64));
                info!("lease renewed: {} sec", lease);
            }
        }
        _ => {}
    }
}

/// The stateless single-client server: answers DISCOVER/REQUEST with an
/// OFFER/ACK handing out our own address plus one.
pub fn recv_server(interface: &mut Interface, parsed: &ParsedPacket) {
    let (xid, chaddr, msg_type) = {
        let dhcp = match DhcpPacket::try_new(parsed.payload) {
            Ok(dhcp) => dhcp,
            Err(_) => {
                interface.nerr += 1;
                return;
            }
        };
        if dhcp.check_encoding().is_err() {
            interface.nerr += 1;
            return;
        }
        (dhcp.xid(), dhcp.chaddr(), dhcp.msg_type())
    };

    let reply = match msg_type {
        Some(msg_types::DISCOVER) => msg_types::OFFER,
        Some(msg_types::REQUEST) => msg_types::ACK,
        _ => return,
    };

    let our_addr = *interface.ipv4_addr;
    if our_addr.is_unspecified() {
        return;
    }

    // Hand out our address plus one.
    let mut offered = [0; 4];
    offered.copy_from_slice(our_addr.as_bytes());
    offered[3] = offered[3].wrapping_add(1);
    let offered = Ipv4Address::new(offered);

    let mask = interface.ipv4_addr.mask();
    let name = interface.dhcp_name.clone();

    let mut options = Vec::with_capacity(64);
    options.extend_from_slice(&[opts::MSG_TYPE, 1, reply]);
    options.push(opts::SUBNET_MASK);
    options.push(4);
    options.extend_from_slice(mask.as_bytes());
    options.push(opts::SERVER_ID);
    options.push(4);
    options.extend_from_slice(our_addr.as_bytes());
    options.push(opts::HOST_NAME);
    options.push(name.len() as u8);
    options.extend_from_slice(name.as_bytes());
    options.extend_from_slice(&[opts::LEASE_TIME, 4, 0xFF, 0xFF, 0xFF, 0xFF]);
    if interface.enable_announce_gateway {
        options.push(opts::ROUTER);
        options.push(4);
        options.extend_from_slice(our_addr.as_bytes());
    }
    options.push(opts::END);

    let dst_mac = match parsed.sender {
        Some(sender) => sender,
        None => EthernetAddress::BROADCAST,
    };
    let dst_addr = if reply == msg_types::OFFER {
        Ipv4Address::BROADCAST
    } else {
        offered
    };

    debug!("DHCP server: {} {} to {}", reply, offered, chaddr);
    send_message(
        interface,
        dst_mac,
        our_addr,
        dst_addr,
        ports::SERVER,
        ports::CLIENT,
        op_codes::REPLY,
        xid,
        Ipv4Address::UNSPECIFIED,
        offered,
        chaddr,
        &options,
    ).ok();
}
