use byteorder::{
    NetworkEndian,
    ReadBytesExt,
    WriteBytesExt,
};

use {
    Error,
    Result,
};
use core::repr::{
    EthernetAddress,
    Ipv4Address,
};

/// [RFC2132](https://tools.ietf.org/html/rfc2132) option codes understood
/// by this engine.
pub mod opts {
    pub const PAD: u8 = 0;

    pub const SUBNET_MASK: u8 = 1;

    pub const ROUTER: u8 = 3;

    pub const DNS: u8 = 6;

    pub const HOST_NAME: u8 = 12;

    pub const SNTP: u8 = 42;

    pub const REQUESTED_IP: u8 = 50;

    pub const LEASE_TIME: u8 = 51;

    pub const MSG_TYPE: u8 = 53;

    pub const SERVER_ID: u8 = 54;

    pub const PARAM_LIST: u8 = 55;

    pub const END: u8 = 255;
}

/// DHCP message types carried in option 53.
pub mod msg_types {
    pub const DISCOVER: u8 = 1;

    pub const OFFER: u8 = 2;

    pub const REQUEST: u8 = 3;

    pub const ACK: u8 = 5;

    pub const NAK: u8 = 6;
}

pub mod ports {
    pub const SERVER: u16 = 67;

    pub const CLIENT: u16 = 68;
}

const MAGIC_COOKIE: u32 = 0x63825363;

mod fields {
    use std::ops::{
        Range,
        RangeFrom,
    };

    pub const OP: usize = 0;

    pub const HTYPE: usize = 1;

    pub const HLEN: usize = 2;

    pub const XID: Range<usize> = 4 .. 8;

    pub const CIADDR: Range<usize> = 12 .. 16;

    pub const YIADDR: Range<usize> = 16 .. 20;

    pub const SIADDR: Range<usize> = 20 .. 24;

    pub const CHADDR: Range<usize> = 28 .. 34;

    pub const MAGIC: Range<usize> = 236 .. 240;

    pub const OPTIONS: RangeFrom<usize> = 240 ..;
}

pub mod op_codes {
    pub const REQUEST: u8 = 1;

    pub const REPLY: u8 = 2;
}

/// View of a byte buffer as a DHCP message.
#[derive(Debug)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    /// The fixed BOOTP header including the magic cookie.
    pub const HEADER_LEN: usize = 240;

    /// Tries to create a DHCP view over a byte buffer.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::HEADER_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Returns the length of a DHCP message with the specified options size.
    pub fn buffer_len(options_len: usize) -> usize {
        Self::HEADER_LEN + options_len
    }

    /// Checks the magic cookie and hardware address fields.
    pub fn check_encoding(&self) -> Result<()> {
        if (&self.buffer.as_ref()[fields::MAGIC])
            .read_u32::<NetworkEndian>()
            .unwrap() != MAGIC_COOKIE
        {
            Err(Error::Malformed)
        } else if self.buffer.as_ref()[fields::HTYPE] != 1
            || self.buffer.as_ref()[fields::HLEN] != 6
        {
            Err(Error::Malformed)
        } else {
            Ok(())
        }
    }

    pub fn op(&self) -> u8 {
        self.buffer.as_ref()[fields::OP]
    }

    pub fn xid(&self) -> u32 {
        (&self.buffer.as_ref()[fields::XID])
            .read_u32::<NetworkEndian>()
            .unwrap()
    }

    pub fn ciaddr(&self) -> Ipv4Address {
        Ipv4Address::try_new(&self.buffer.as_ref()[fields::CIADDR]).unwrap()
    }

    pub fn yiaddr(&self) -> Ipv4Address {
        Ipv4Address::try_new(&self.buffer.as_ref()[fields::YIADDR]).unwrap()
    }

    pub fn siaddr(&self) -> Ipv4Address {
        Ipv4Address::try_new(&self.buffer.as_ref()[fields::SIADDR]).unwrap()
    }

    pub fn chaddr(&self) -> EthernetAddress {
        EthernetAddress::try_new(&self.buffer.as_ref()[fields::CHADDR]).unwrap()
    }

    /// Returns an iterator over the options region.
    pub fn options(&self) -> DhcpOptions {
        DhcpOptions {
            options: &self.buffer.as_ref()[fields::OPTIONS],
        }
    }

    /// Walks the options for the message type (option 53).
    pub fn msg_type(&self) -> Option<u8> {
        self.options().find_map_code(opts::MSG_TYPE, |data| {
            if data.len() == 1 {
                Some(data[0])
            } else {
                None
            }
        })
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    /// Zeroes the whole message and writes the fixed BOOTP fields: op,
    /// Ethernet hardware type/length, transaction id, and magic cookie.
    pub fn init(&mut self, op: u8, xid: u32) {
        for byte in self.buffer.as_mut().iter_mut() {
            *byte = 0;
        }
        self.buffer.as_mut()[fields::OP] = op;
        self.buffer.as_mut()[fields::HTYPE] = 1;
        self.buffer.as_mut()[fields::HLEN] = 6;
        (&mut self.buffer.as_mut()[fields::XID])
            .write_u32::<NetworkEndian>(xid)
            .unwrap();
        (&mut self.buffer.as_mut()[fields::MAGIC])
            .write_u32::<NetworkEndian>(MAGIC_COOKIE)
            .unwrap();
    }

    pub fn set_ciaddr(&mut self, addr: Ipv4Address) {
        self.buffer.as_mut()[fields::CIADDR].copy_from_slice(addr.as_bytes());
    }

    pub fn set_yiaddr(&mut self, addr: Ipv4Address) {
        self.buffer.as_mut()[fields::YIADDR].copy_from_slice(addr.as_bytes());
    }

    pub fn set_chaddr(&mut self, addr: EthernetAddress) {
        self.buffer.as_mut()[fields::CHADDR].copy_from_slice(addr.as_bytes());
    }

    pub fn options_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[fields::OPTIONS]
    }
}

/// Iterator over DHCP options. Pads are skipped; the end marker, a
/// truncated option, or the end of the buffer stops iteration.
pub struct DhcpOptions<'a> {
    options: &'a [u8],
}

impl<'a> DhcpOptions<'a> {
    /// Finds the first option with the given code and applies f to its data.
    pub fn find_map_code<F, R>(self, code: u8, f: F) -> Option<R>
    where
        F: Fn(&'a [u8]) -> Option<R>,
    {
        let mut options = self;
        while let Some((kind, data)) = options.next() {
            if kind == code {
                return f(data);
            }
        }
        None
    }
}

impl<'a> Iterator for DhcpOptions<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<(u8, &'a [u8])> {
        loop {
            if self.options.len() < 1 {
                return None;
            }

            match self.options[0] {
                opts::PAD => {
                    self.options = &self.options[1 ..];
                }
                opts::END => return None,
                kind => {
                    if self.options.len() < 2 {
                        return None;
                    }
                    let len = self.options[1] as usize;
                    if 2 + len > self.options.len() {
                        return None;
                    }
                    let data = &self.options[2 .. 2 + len];
                    self.options = &self.options[2 + len ..];
                    return Some((kind, data));
                }
            }
        }
    }
}

/// Appends options to a buffer being built for transmission.
pub struct OptionWriter<'a> {
    buffer: &'a mut [u8],
    len: usize,
}

impl<'a> OptionWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> OptionWriter<'a> {
        OptionWriter { buffer, len: 0 }
    }

    pub fn write(&mut self, code: u8, data: &[u8]) -> Result<()> {
        if self.len + 2 + data.len() > self.buffer.len() {
            return Err(Error::Exhausted);
        }
        self.buffer[self.len] = code;
        self.buffer[self.len + 1] = data.len() as u8;
        self.buffer[self.len + 2 .. self.len + 2 + data.len()].copy_from_slice(data);
        self.len += 2 + data.len();
        Ok(())
    }

    /// Writes the end marker and returns the total options length.
    pub fn finish(self) -> Result<usize> {
        if self.len >= self.buffer.len() {
            return Err(Error::Exhausted);
        }
        self.buffer[self.len] = opts::END;
        Ok(self.len + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_too_short() {
        let buffer = vec![0; 239];
        assert_matches!(Packet::try_new(&buffer[..]), Err(Error::Exhausted));
    }

    #[test]
    fn test_init_and_check() {
        let mut buffer = vec![0xAA; 248];

        {
            let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
            packet.init(op_codes::REQUEST, 0xDEADBEEF);
            packet.set_chaddr(EthernetAddress::new([2, 0, 0, 0, 0, 1]));
        }

        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(), Ok(()));
        assert_eq!(packet.op(), op_codes::REQUEST);
        assert_eq!(packet.xid(), 0xDEADBEEF);
        assert_eq!(packet.chaddr(), EthernetAddress::new([2, 0, 0, 0, 0, 1]));
        assert!(packet.yiaddr().is_unspecified());
    }

    #[test]
    fn test_bad_magic() {
        let buffer = vec![0; 240];
        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(), Err(Error::Malformed));
    }

    #[test]
    fn test_option_walk() {
        let mut buffer = vec![0; 256];

        {
            let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
            packet.init(op_codes::REPLY, 1);
            let mut writer = OptionWriter::new(packet.options_mut());
            writer.write(opts::MSG_TYPE, &[msg_types::OFFER]).unwrap();
            writer.write(opts::SUBNET_MASK, &[255, 255, 255, 0]).unwrap();
            writer.write(opts::ROUTER, &[10, 0, 0, 1]).unwrap();
            writer.finish().unwrap();
        }

        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_eq!(packet.msg_type(), Some(msg_types::OFFER));

        let collected: Vec<_> = packet.options().collect();
        assert_eq!(collected.len(), 3);
        assert_eq!(collected[1], (opts::SUBNET_MASK, &[255, 255, 255, 0][..]));
        assert_eq!(collected[2], (opts::ROUTER, &[10, 0, 0, 1][..]));
    }

    #[test]
    fn test_truncated_option_stops() {
        let mut buffer = vec![0; 242];
        {
            let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
            packet.init(op_codes::REPLY, 1);
        }
        buffer[240] = opts::MSG_TYPE;
        buffer[241] = 4; // claims 4 bytes past the end

        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_eq!(packet.options().count(), 0);
        assert_eq!(packet.msg_type(), None);
    }
}
