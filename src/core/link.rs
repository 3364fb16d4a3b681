//! Link layer abstraction over the framing variants the engine speaks.

use {
    Error,
    Result,
};
use core::repr::{
    eth_types,
    EthernetAddress,
    EthernetFrame,
    Ipv4Address,
    Ipv6Address,
};

/// Outcome of stripping a link header from a received frame.
#[derive(Debug)]
pub struct Stripped<'a> {
    /// EtherType style protocol of the payload.
    pub proto: u16,
    /// The link payload.
    pub payload: &'a [u8],
    /// Sender link address, for links that carry one.
    pub sender: Option<EthernetAddress>,
}

/// The link layer variants below IP. Every call site matches exhaustively,
/// so growing a variant is a compile error until handled everywhere.
#[derive(Debug)]
pub enum Link {
    /// Ethernet II framing.
    Ethernet { addr: EthernetAddress },
    /// A point-to-point byte pipe. The driver performs the byte stuffing
    /// and LCP/IPCP negotiation and hands this engine clean IPv4 frames.
    Ppp,
}

impl Link {
    /// Creates an Ethernet link, deriving a random locally administered
    /// address when none is configured.
    pub fn ethernet(addr: Option<EthernetAddress>) -> Link {
        let addr = match addr {
            Some(addr) if !addr.is_unspecified() => addr,
            _ => {
                let addr = EthernetAddress::random_local();
                info!("MAC not set, generated random: {}", addr);
                addr
            }
        };
        Link::Ethernet { addr }
    }

    /// Creates a PPP link.
    pub fn ppp() -> Link {
        Link::Ppp
    }

    /// Returns the link maximum transmission unit.
    pub fn mtu(&self) -> usize {
        match *self {
            Link::Ethernet { .. } => 1500,
            Link::Ppp => 1500,
        }
    }

    /// Returns the size of the frame buffer the interface must reserve.
    pub fn frame_len(&self) -> usize {
        match *self {
            // MTU + header + FCS slack, like common MAC ring buffers use.
            Link::Ethernet { .. } => 1540,
            Link::Ppp => 1500,
        }
    }

    /// Returns the link address, for links that have one.
    pub fn addr(&self) -> Option<EthernetAddress> {
        match *self {
            Link::Ethernet { addr } => Some(addr),
            Link::Ppp => None,
        }
    }

    /// Writes the link header for a frame carrying `proto` to `dst` and
    /// returns the offset where the payload begins.
    pub fn build_header(&self, buffer: &mut [u8], proto: u16, dst: EthernetAddress) -> Result<usize> {
        match *self {
            Link::Ethernet { addr } => {
                let mut frame = EthernetFrame::try_new(buffer)?;
                frame.set_dst_addr(dst);
                frame.set_src_addr(addr);
                frame.set_payload_type(proto);
                Ok(EthernetFrame::<&[u8]>::HEADER_LEN)
            }
            Link::Ppp => Ok(0),
        }
    }

    /// Finalizes an outgoing frame of `len` bytes, padding runts up to the
    /// Ethernet minimum, and returns the length to hand to the driver.
    pub fn finalize(&self, buffer: &mut [u8], len: usize) -> usize {
        match *self {
            Link::Ethernet { .. } => {
                let min = EthernetFrame::<&[u8]>::MIN_FRAME_LEN;
                if len < min && buffer.len() >= min {
                    for byte in buffer[len .. min].iter_mut() {
                        *byte = 0;
                    }
                    min
                } else {
                    len
                }
            }
            Link::Ppp => len,
        }
    }

    /// Strips the link header from a received frame.
    pub fn parse<'a>(&self, frame: &'a [u8]) -> Result<Stripped<'a>> {
        match *self {
            Link::Ethernet { .. } => {
                let eth = EthernetFrame::try_new(frame)?;
                Ok(Stripped {
                    proto: eth.payload_type(),
                    payload: &frame[EthernetFrame::<&[u8]>::HEADER_LEN ..],
                    sender: Some(eth.src_addr()),
                })
            }
            // The payload is the whole frame and always IPv4.
            Link::Ppp => Ok(Stripped {
                proto: eth_types::IPV4,
                payload: frame,
                sender: None,
            }),
        }
    }

    /// Checks if a received frame is addressed to this link, i.e. to our
    /// unicast address or to a broadcast/multicast group.
    pub fn accepts(&self, frame: &[u8]) -> bool {
        match *self {
            Link::Ethernet { addr } => match EthernetFrame::try_new(frame) {
                Ok(eth) => {
                    let dst = eth.dst_addr();
                    dst == addr || dst.is_broadcast() || dst.is_multicast()
                }
                Err(_) => false,
            },
            Link::Ppp => true,
        }
    }

    /// Maps an IPv4 multicast group to its link address per
    /// [RFC1112](https://tools.ietf.org/html/rfc1112): 01:00:5E plus the
    /// low 23 bits of the group.
    pub fn map_multicast_v4(&self, addr: Ipv4Address) -> EthernetAddress {
        let ip = addr.as_bytes();
        EthernetAddress::new([0x01, 0x00, 0x5E, ip[1] & 0x7F, ip[2], ip[3]])
    }

    /// Maps an IPv6 multicast group to its link address per
    /// [RFC2464](https://tools.ietf.org/html/rfc2464): 33:33 plus the low
    /// 32 bits of the group.
    pub fn map_multicast_v6(&self, addr: Ipv6Address) -> EthernetAddress {
        let ip = addr.as_bytes();
        EthernetAddress::new([0x33, 0x33, ip[12], ip[13], ip[14], ip[15]])
    }

    /// Returns the EUI-64 interface identifier derived from the link
    /// address: flip the universal/local bit and insert FF:FE in the
    /// middle. Links without an address have no identifier.
    pub fn eui64(&self) -> Option<[u8; 8]> {
        match *self {
            Link::Ethernet { addr } => {
                let mac = addr.as_bytes();
                Some([
                    mac[0] ^ 0x02,
                    mac[1],
                    mac[2],
                    0xFF,
                    0xFE,
                    mac[3],
                    mac[4],
                    mac[5],
                ])
            }
            Link::Ppp => None,
        }
    }

    /// Builds a global IPv6 address from an advertised prefix and the
    /// link's interface identifier.
    pub fn gen_global_ip6(&self, prefix: &Ipv6Address, prefix_len: u8) -> Option<Ipv6Address> {
        self.eui64()
            .map(|iid| Ipv6Address::from_prefix(prefix, prefix_len, iid))
    }

    /// Reads a link address out of an NDP option body.
    pub fn link_addr_from_opt(&self, opt: &[u8]) -> Option<EthernetAddress> {
        match *self {
            Link::Ethernet { .. } => EthernetAddress::try_new(opt.get(.. 6)?).ok(),
            Link::Ppp => None,
        }
    }

    /// Returns the NDP source/target link address option body for this
    /// link, or an error for links without addresses.
    pub fn link_addr_opt(&self) -> Result<[u8; 6]> {
        match *self {
            Link::Ethernet { addr } => {
                let mut opt = [0; 6];
                opt.copy_from_slice(addr.as_bytes());
                Ok(opt)
            }
            Link::Ppp => Err(Error::NoRoute),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth() -> Link {
        Link::ethernet(Some(EthernetAddress::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55])))
    }

    #[test]
    fn test_ethernet_header_round_trip() {
        let link = eth();
        let mut buffer = [0; 64];

        let offset = link
            .build_header(&mut buffer[..], eth_types::IPV4, EthernetAddress::BROADCAST)
            .unwrap();
        assert_eq!(offset, 14);

        let stripped = link.parse(&buffer[..]).unwrap();
        assert_eq!(stripped.proto, eth_types::IPV4);
        assert_eq!(stripped.sender, link.addr());
        assert_eq!(stripped.payload.len(), 50);
    }

    #[test]
    fn test_ethernet_pads_runts() {
        let link = eth();
        let mut buffer = [0xFF; 128];
        assert_eq!(link.finalize(&mut buffer[..], 42), 60);
        assert!(buffer[42 .. 60].iter().all(|byte| *byte == 0));
        assert_eq!(link.finalize(&mut buffer[..], 100), 100);
    }

    #[test]
    fn test_ppp_is_a_pass_through() {
        let link = Link::ppp();
        let frame = [0x45, 0, 0, 20];
        let stripped = link.parse(&frame[..]).unwrap();
        assert_eq!(stripped.proto, eth_types::IPV4);
        assert_eq!(stripped.payload, &frame[..]);
        assert_eq!(stripped.sender, None);
        assert_eq!(link.addr(), None);
        assert_eq!(link.eui64(), None);
    }

    #[test]
    fn test_multicast_mapping() {
        let link = eth();
        assert_eq!(
            link.map_multicast_v4(Ipv4Address::new([224, 0, 251, 1])),
            EthernetAddress::new([0x01, 0x00, 0x5E, 0, 251, 1])
        );
        // The top bit of the second group byte is masked off.
        assert_eq!(
            link.map_multicast_v4(Ipv4Address::new([239, 255, 0, 1])),
            EthernetAddress::new([0x01, 0x00, 0x5E, 0x7F, 0, 1])
        );
        assert_eq!(
            link.map_multicast_v6(Ipv6Address::ALL_NODES),
            EthernetAddress::new([0x33, 0x33, 0, 0, 0, 1])
        );
    }

    #[test]
    fn test_eui64() {
        let link = eth();
        assert_eq!(
            link.eui64().unwrap(),
            [0x00, 0x11, 0x22, 0xFF, 0xFE, 0x33, 0x44, 0x55]
        );
    }

    #[test]
    fn test_accepts_filters_unicast() {
        let link = eth();
        let mut buffer = [0; 60];
        {
            let mut frame = EthernetFrame::try_new(&mut buffer[..]).unwrap();
            frame.set_dst_addr(EthernetAddress::new([0x02, 0, 0, 0, 0, 0x99]));
        }
        assert!(!link.accepts(&buffer[..]));

        {
            let mut frame = EthernetFrame::try_new(&mut buffer[..]).unwrap();
            frame.set_dst_addr(link.addr().unwrap());
        }
        assert!(link.accepts(&buffer[..]));
    }
}
