//! The typed view built over one received frame.
//!
//! Parsing narrows the payload slice as each header is consumed. A typed
//! sub-view exists only if every enclosing layer parsed and cross-checked
//! successfully; any length mismatch fails the whole parse. Length fields
//! come from each protocol's own header and are bounds checked against the
//! remaining slice, never trusted from the layer below.

use {
    Error,
    Result,
};
use core::link::Link;
use core::repr::{
    eth_types,
    ipv4_protocols,
    ipv6_next_headers,
    ArpPacket,
    EthernetAddress,
    Icmpv4Packet,
    Icmpv6Packet,
    Ipv4Packet,
    Ipv6Packet,
    TcpPacket,
    UdpPacket,
};

/// One parsed inbound frame.
#[derive(Debug)]
pub struct ParsedPacket<'a> {
    /// The raw frame as handed over by the driver.
    pub raw: &'a [u8],
    /// The innermost payload reached by the parse.
    pub payload: &'a [u8],
    /// Sender link address, when the link carries one.
    pub sender: Option<EthernetAddress>,
    /// True if the datagram is a fragment; transport views may still be
    /// present (the first fragment carries them) so the owning connection
    /// can be identified, but the payload is never delivered.
    pub fragment: bool,
    pub arp: Option<ArpPacket<&'a [u8]>>,
    pub ipv4: Option<Ipv4Packet<&'a [u8]>>,
    pub ipv6: Option<Ipv6Packet<&'a [u8]>>,
    pub icmpv4: Option<Icmpv4Packet<&'a [u8]>>,
    pub icmpv6: Option<Icmpv6Packet<&'a [u8]>>,
    pub tcp: Option<TcpPacket<&'a [u8]>>,
    pub udp: Option<UdpPacket<&'a [u8]>>,
}

impl<'a> ParsedPacket<'a> {
    /// Parses one raw frame through the link layer and every recognized
    /// header below it, failing closed on the first inconsistency.
    pub fn parse(link: &Link, raw: &'a [u8]) -> Result<ParsedPacket<'a>> {
        let stripped = link.parse(raw)?;

        let mut packet = ParsedPacket {
            raw,
            payload: stripped.payload,
            sender: stripped.sender,
            fragment: false,
            arp: None,
            ipv4: None,
            ipv6: None,
            icmpv4: None,
            icmpv6: None,
            tcp: None,
            udp: None,
        };

        match stripped.proto {
            eth_types::ARP => packet.parse_arp(stripped.payload)?,
            eth_types::IPV4 => packet.parse_ipv4(stripped.payload)?,
            eth_types::IPV6 => packet.parse_ipv6(stripped.payload)?,
            proto => {
                debug!("ignoring frame with link protocol {:#x}", proto);
                return Err(Error::Ignored);
            }
        }

        Ok(packet)
    }

    fn parse_arp(&mut self, buffer: &'a [u8]) -> Result<()> {
        let arp = ArpPacket::try_new(buffer)?;
        arp.check_encoding()?;
        self.payload = &buffer[ArpPacket::<&[u8]>::BUFFER_LEN ..];
        self.arp = Some(arp);
        Ok(())
    }

    fn parse_ipv4(&mut self, buffer: &'a [u8]) -> Result<()> {
        let (header_len, total_len, protocol, src, dst, fragment) = {
            let ip = Ipv4Packet::try_new(buffer)?;
            ip.check_encoding()?;
            (
                ip.header_len() as usize,
                ip.total_len() as usize,
                ip.protocol(),
                ip.src_addr(),
                ip.dst_addr(),
                ip.is_fragment(),
            )
        };

        // Narrow to what the IP header claims; trailing link padding is
        // dropped here.
        let ip_payload = &buffer[header_len .. total_len];
        self.ipv4 = Some(Ipv4Packet::try_new(&buffer[.. total_len])?);
        self.payload = ip_payload;
        self.fragment = fragment;

        if fragment {
            // Locate the transport header (present in the first fragment)
            // so the owning connection can be told, but go no further.
            match protocol {
                ipv4_protocols::TCP => self.tcp = TcpPacket::try_new(ip_payload).ok(),
                ipv4_protocols::UDP => self.udp = UdpPacket::try_new(ip_payload).ok(),
                _ => {}
            }
            return Ok(());
        }

        match protocol {
            ipv4_protocols::ICMP => {
                let icmp = Icmpv4Packet::try_new(ip_payload)?;
                icmp.check_encoding()?;
                self.payload = &ip_payload[Icmpv4Packet::<&[u8]>::HEADER_LEN ..];
                self.icmpv4 = Some(icmp);
            }
            ipv4_protocols::UDP => {
                let (data_start, data_end) = {
                    let udp = UdpPacket::try_new(ip_payload)?;
                    udp.check_encoding(src.as_bytes(), dst.as_bytes())?;
                    (UdpPacket::<&[u8]>::HEADER_LEN, udp.length() as usize)
                };
                self.udp = Some(UdpPacket::try_new(ip_payload)?);
                self.payload = &ip_payload[data_start .. data_end];
            }
            ipv4_protocols::TCP => {
                let data_start = {
                    let tcp = TcpPacket::try_new(ip_payload)?;
                    tcp.check_encoding(src.as_bytes(), dst.as_bytes())?;
                    tcp.data_offset() as usize * 4
                };
                self.tcp = Some(TcpPacket::try_new(ip_payload)?);
                self.payload = &ip_payload[data_start ..];
            }
            proto => {
                debug!("ignoring IPv4 packet with protocol {}", proto);
                return Err(Error::Ignored);
            }
        }

        Ok(())
    }

    fn parse_ipv6(&mut self, buffer: &'a [u8]) -> Result<()> {
        let (src, dst, mut next_header, payload_len) = {
            let ip6 = Ipv6Packet::try_new(buffer)?;
            ip6.check_encoding()?;
            (
                ip6.src_addr(),
                ip6.dst_addr(),
                ip6.next_header(),
                ip6.payload_len() as usize,
            )
        };

        let header_len = Ipv6Packet::<&[u8]>::HEADER_LEN;
        self.ipv6 = Some(Ipv6Packet::try_new(&buffer[.. header_len + payload_len])?);
        let mut rest = &buffer[header_len .. header_len + payload_len];

        // Skip the small set of skippable extension headers; a fragment
        // header classifies the whole datagram as a fragment.
        loop {
            match next_header {
                ipv6_next_headers::HOP_BY_HOP
                | ipv6_next_headers::ROUTING
                | ipv6_next_headers::DEST_OPTS => {
                    if rest.len() < 8 {
                        return Err(Error::Malformed);
                    }
                    let ext_len = (rest[1] as usize + 1) * 8;
                    if ext_len > rest.len() {
                        return Err(Error::Malformed);
                    }
                    next_header = rest[0];
                    rest = &rest[ext_len ..];
                }
                ipv6_next_headers::FRAGMENT => {
                    self.fragment = true;
                    self.payload = rest;
                    return Ok(());
                }
                _ => break,
            }
        }

        self.payload = rest;

        match next_header {
            ipv6_next_headers::ICMPV6 => {
                let icmp = Icmpv6Packet::try_new(rest)?;
                icmp.check_encoding(&src, &dst)?;
                self.payload = &rest[Icmpv6Packet::<&[u8]>::HEADER_LEN ..];
                self.icmpv6 = Some(icmp);
            }
            ipv6_next_headers::UDP => {
                let (data_start, data_end) = {
                    let udp = UdpPacket::try_new(rest)?;
                    udp.check_encoding(src.as_bytes(), dst.as_bytes())?;
                    (UdpPacket::<&[u8]>::HEADER_LEN, udp.length() as usize)
                };
                self.udp = Some(UdpPacket::try_new(rest)?);
                self.payload = &rest[data_start .. data_end];
            }
            ipv6_next_headers::TCP => {
                let data_start = {
                    let tcp = TcpPacket::try_new(rest)?;
                    tcp.check_encoding(src.as_bytes(), dst.as_bytes())?;
                    tcp.data_offset() as usize * 4
                };
                self.tcp = Some(TcpPacket::try_new(rest)?);
                self.payload = &rest[data_start ..];
            }
            proto => {
                debug!("ignoring IPv6 packet with next header {}", proto);
                return Err(Error::Ignored);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::repr::{
        Ipv4Address,
        Ipv4Repr,
        UdpRepr,
    };

    fn link() -> Link {
        Link::ethernet(Some(EthernetAddress::new([2, 0, 0, 0, 0, 1])))
    }

    fn build_udp_frame(payload: &[u8], corrupt: bool) -> Vec<u8> {
        let udp_len = UdpPacket::<&[u8]>::buffer_len(payload.len());
        let ip_len = Ipv4Packet::<&[u8]>::buffer_len(udp_len);
        let mut frame = vec![0; 14 + ip_len];

        let src = Ipv4Address::new([10, 0, 0, 2]);
        let dst = Ipv4Address::new([10, 0, 0, 1]);

        link()
            .build_header(&mut frame[..], eth_types::IPV4, EthernetAddress::BROADCAST)
            .unwrap();

        {
            let mut ip = Ipv4Packet::try_new(&mut frame[14 ..]).unwrap();
            Ipv4Repr {
                src_addr: src,
                dst_addr: dst,
                protocol: ipv4_protocols::UDP,
                payload_len: udp_len as u16,
            }.serialize(&mut ip);
        }
        {
            let mut udp = UdpPacket::try_new(&mut frame[34 ..]).unwrap();
            UdpRepr {
                src_port: 1000,
                dst_port: 2000,
                length: udp_len as u16,
            }.serialize(&mut udp);
            udp.payload_mut()[.. payload.len()].copy_from_slice(payload);
            udp.fill_checksum(src.as_bytes(), dst.as_bytes());
        }

        if corrupt {
            let len = frame.len();
            frame[len - 1] ^= 0x01;
        }
        frame
    }

    #[test]
    fn test_parse_udp_narrows_payload() {
        let frame = build_udp_frame(b"hi!", false);
        let packet = ParsedPacket::parse(&link(), &frame[..]).unwrap();
        assert!(packet.ipv4.is_some());
        assert!(packet.udp.is_some());
        assert!(!packet.fragment);
        assert_eq!(packet.payload, b"hi!");
    }

    #[test]
    fn test_parse_rejects_corrupt_udp() {
        let frame = build_udp_frame(b"hi!", true);
        assert_matches!(
            ParsedPacket::parse(&link(), &frame[..]),
            Err(Error::Checksum)
        );
    }

    #[test]
    fn test_parse_rejects_truncated_frame() {
        let frame = build_udp_frame(b"hi!", false);
        assert_matches!(
            ParsedPacket::parse(&link(), &frame[.. 20]),
            Err(Error::Exhausted)
        );
    }

    #[test]
    fn test_parse_flags_fragment() {
        let mut frame = build_udp_frame(b"hi!", false);
        // Set the more-fragments bit and refresh the header checksum.
        frame[20] = 0x20;
        {
            let mut ip = Ipv4Packet::try_new(&mut frame[14 ..]).unwrap();
            ip.fill_checksum();
        }
        let packet = ParsedPacket::parse(&link(), &frame[..]).unwrap();
        assert!(packet.fragment);
        assert!(packet.udp.is_some());
    }

    #[test]
    fn test_parse_unknown_ethertype() {
        let mut frame = vec![0; 60];
        link()
            .build_header(&mut frame[..], 0x88CC, EthernetAddress::BROADCAST)
            .unwrap();
        assert_matches!(ParsedPacket::parse(&link(), &frame[..]), Err(Error::Ignored));
    }
}
