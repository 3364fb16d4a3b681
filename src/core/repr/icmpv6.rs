use byteorder::{
    NetworkEndian,
    ReadBytesExt,
    WriteBytesExt,
};

use {
    Error,
    Result,
};
use core::check;
use core::repr::Ipv6Address;

/// ICMPv6 message types used by this engine: echo and the four NDP
/// messages from [RFC4861](https://tools.ietf.org/html/rfc4861).
pub mod msg_types {
    pub const ECHO_REQUEST: u8 = 128;

    pub const ECHO_REPLY: u8 = 129;

    pub const ROUTER_SOLICIT: u8 = 133;

    pub const ROUTER_ADVERT: u8 = 134;

    pub const NEIGHBOR_SOLICIT: u8 = 135;

    pub const NEIGHBOR_ADVERT: u8 = 136;
}

/// NDP option types.
pub mod opt_types {
    pub const SOURCE_LINK_ADDR: u8 = 1;

    pub const TARGET_LINK_ADDR: u8 = 2;

    pub const PREFIX_INFO: u8 = 3;

    pub const MTU: u8 = 5;
}

/// Neighbor advertisement flag bits.
pub mod na_flags {
    pub const ROUTER: u8 = 0x80;

    pub const SOLICITED: u8 = 0x40;

    pub const OVERRIDE: u8 = 0x20;
}

mod fields {
    use std::ops::{
        Range,
        RangeFrom,
    };

    pub const MSG_TYPE: usize = 0;

    pub const CODE: usize = 1;

    pub const CHECKSUM: Range<usize> = 2 .. 4;

    pub const BODY: RangeFrom<usize> = 4 ..;

    // Neighbor solicitation/advertisement layout, relative to the message.
    pub const TARGET_ADDR: Range<usize> = 8 .. 24;

    pub const NEIGHBOR_OPTIONS: RangeFrom<usize> = 24 ..;

    pub const NA_FLAGS: usize = 4;

    // Router solicitation/advertisement layout.
    pub const RS_OPTIONS: RangeFrom<usize> = 8 ..;

    pub const RA_OPTIONS: RangeFrom<usize> = 16 ..;
}

/// View of a byte buffer as an ICMPv6 message.
#[derive(Debug)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Packet<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const HEADER_LEN: usize = 4;

    /// Length of a neighbor solicitation/advertisement before options.
    pub const NEIGHBOR_LEN: usize = 24;

    /// Length of a router solicitation before options.
    pub const ROUTER_SOLICIT_LEN: usize = 8;

    /// Length of a router advertisement before options.
    pub const ROUTER_ADVERT_LEN: usize = 16;

    /// Tries to create an ICMPv6 view over a byte buffer.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::HEADER_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Checks the checksum over the message and the IPv6 pseudo header,
    /// and that NDP messages are long enough for their fixed part.
    pub fn check_encoding(&self, src_addr: &Ipv6Address, dst_addr: &Ipv6Address) -> Result<()> {
        let len = self.buffer.as_ref().len();
        let min = match self.msg_type() {
            msg_types::NEIGHBOR_SOLICIT | msg_types::NEIGHBOR_ADVERT => Self::NEIGHBOR_LEN,
            msg_types::ROUTER_SOLICIT => Self::ROUTER_SOLICIT_LEN,
            msg_types::ROUTER_ADVERT => Self::ROUTER_ADVERT_LEN,
            msg_types::ECHO_REQUEST | msg_types::ECHO_REPLY => 8,
            _ => Self::HEADER_LEN,
        };

        if len < min {
            Err(Error::Malformed)
        } else if self.gen_checksum(src_addr, dst_addr) != 0 {
            Err(Error::Checksum)
        } else {
            Ok(())
        }
    }

    /// Calculates the checksum over the message and pseudo header.
    pub fn gen_checksum(&self, src_addr: &Ipv6Address, dst_addr: &Ipv6Address) -> u16 {
        let buffer = self.buffer.as_ref();
        let sum = check::pseudo_header(
            0,
            src_addr.as_bytes(),
            dst_addr.as_bytes(),
            58,
            buffer.len() as u32,
        );
        check::finish(check::accumulate(sum, buffer))
    }

    pub fn msg_type(&self) -> u8 {
        self.buffer.as_ref()[fields::MSG_TYPE]
    }

    pub fn code(&self) -> u8 {
        self.buffer.as_ref()[fields::CODE]
    }

    pub fn checksum(&self) -> u16 {
        (&self.buffer.as_ref()[fields::CHECKSUM])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    /// Returns everything past the common 4 byte header.
    pub fn body(&self) -> &[u8] {
        &self.buffer.as_ref()[fields::BODY]
    }

    /// Returns the echo identifier and sequence number of an echo message.
    pub fn echo_id_seq(&self) -> (u16, u16) {
        (
            (&self.body()[0 .. 2]).read_u16::<NetworkEndian>().unwrap(),
            (&self.body()[2 .. 4]).read_u16::<NetworkEndian>().unwrap(),
        )
    }

    /// Returns the target address of a neighbor solicitation/advertisement.
    pub fn target_addr(&self) -> Ipv6Address {
        Ipv6Address::try_new(&self.buffer.as_ref()[fields::TARGET_ADDR]).unwrap()
    }

    /// Returns the flag byte of a neighbor advertisement.
    pub fn na_flags(&self) -> u8 {
        self.buffer.as_ref()[fields::NA_FLAGS]
    }

    /// Returns an iterator over the NDP options of this message.
    pub fn ndp_options(&self) -> NdpOptions {
        let buffer = self.buffer.as_ref();
        let options = match self.msg_type() {
            msg_types::NEIGHBOR_SOLICIT | msg_types::NEIGHBOR_ADVERT => {
                &buffer[fields::NEIGHBOR_OPTIONS]
            }
            msg_types::ROUTER_SOLICIT => &buffer[fields::RS_OPTIONS],
            msg_types::ROUTER_ADVERT => &buffer[fields::RA_OPTIONS],
            _ => &buffer[buffer.len() ..],
        };
        NdpOptions { options }
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_msg_type(&mut self, msg_type: u8) {
        self.buffer.as_mut()[fields::MSG_TYPE] = msg_type;
    }

    pub fn set_code(&mut self, code: u8) {
        self.buffer.as_mut()[fields::CODE] = code;
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        (&mut self.buffer.as_mut()[fields::CHECKSUM])
            .write_u16::<NetworkEndian>(checksum)
            .unwrap()
    }

    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[fields::BODY]
    }

    pub fn set_target_addr(&mut self, addr: Ipv6Address) {
        self.buffer.as_mut()[fields::TARGET_ADDR].copy_from_slice(addr.as_bytes());
    }

    pub fn set_na_flags(&mut self, flags: u8) {
        self.buffer.as_mut()[fields::NA_FLAGS] = flags;
    }

    /// Recomputes the checksum. Call after the message is fully written.
    pub fn fill_checksum(&mut self, src_addr: &Ipv6Address, dst_addr: &Ipv6Address) {
        self.set_checksum(0);
        let checksum = self.gen_checksum(src_addr, dst_addr);
        self.set_checksum(checksum);
    }
}

/// A parsed NDP option.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NdpOption<'a> {
    /// Link layer address of the sender, raw per the underlying link.
    SourceLinkAddr(&'a [u8]),
    /// Link layer address of the target, raw per the underlying link.
    TargetLinkAddr(&'a [u8]),
    /// On-link prefix information for address autoconfiguration.
    PrefixInfo { prefix_len: u8, prefix: Ipv6Address },
    /// Link MTU advertised by a router.
    Mtu(u32),
}

/// Iterator over the options region of an NDP message. A malformed option
/// (zero length or overrunning the region) ends iteration.
pub struct NdpOptions<'a> {
    options: &'a [u8],
}

impl<'a> Iterator for NdpOptions<'a> {
    type Item = NdpOption<'a>;

    fn next(&mut self) -> Option<NdpOption<'a>> {
        loop {
            if self.options.len() < 2 {
                return None;
            }

            let kind = self.options[0];
            let len = self.options[1] as usize * 8;
            if len == 0 || len > self.options.len() {
                return None;
            }

            let (option, rest) = self.options.split_at(len);
            self.options = rest;
            let data = &option[2 ..];

            let parsed = match kind {
                opt_types::SOURCE_LINK_ADDR => Some(NdpOption::SourceLinkAddr(data)),
                opt_types::TARGET_LINK_ADDR => Some(NdpOption::TargetLinkAddr(data)),
                opt_types::PREFIX_INFO if data.len() >= 30 => Some(NdpOption::PrefixInfo {
                    prefix_len: data[0],
                    prefix: Ipv6Address::try_new(&data[14 .. 30]).unwrap(),
                }),
                opt_types::MTU if data.len() >= 6 => Some(NdpOption::Mtu(
                    (&data[2 .. 6]).read_u32::<NetworkEndian>().unwrap(),
                )),
                _ => None, // unknown options are skipped
            };

            if let Some(parsed) = parsed {
                return Some(parsed);
            }
        }
    }
}
