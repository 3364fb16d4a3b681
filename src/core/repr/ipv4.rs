use std::fmt::{
    Display,
    Formatter,
    Result as FmtResult,
};
use std::io::Write;
use std::ops::Deref;
use std::result::Result as StdResult;
use std::str::FromStr;

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

/// [IPv4 address](https://en.wikipedia.org/wiki/IPv4) in network byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address([u8; 4]);

impl Address {
    pub const UNSPECIFIED: Address = Address([0; 4]);

    pub const BROADCAST: Address = Address([0xFF; 4]);

    /// Creates an IPv4 address from a network byte order buffer.
    pub fn new(addr: [u8; 4]) -> Address {
        Address(addr)
    }

    /// Tries to create an IPv4 address from a network byte order slice.
    pub fn try_new(addr: &[u8]) -> Result<Address> {
        if addr.len() != 4 {
            return Err(Error::Exhausted);
        }

        let mut _addr: [u8; 4] = [0; 4];
        _addr.clone_from_slice(addr);
        Ok(Address(_addr))
    }

    /// Returns a reference to the network byte order representation of the
    /// address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 4]
    }

    /// Checks if this is a 224.0.0.0/4 multicast group address.
    pub fn is_multicast(&self) -> bool {
        (self.0[0] & 0xF0) == 0xE0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 4]
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl FromStr for Address {
    type Err = ();

    /// Parses an IPv4 address from an A.B.C.D style string.
    fn from_str(addr: &str) -> StdResult<Address, Self::Err> {
        let (bytes, unknown): (Vec<_>, Vec<_>) = addr.split(".")
            .map(|token| token.parse::<u8>())
            .partition(|byte| !byte.is_err());

        if bytes.len() != 4 || unknown.len() > 0 {
            return Err(());
        }

        let bytes: Vec<_> = bytes.into_iter().map(|byte| byte.unwrap()).collect();

        let mut ipv4: [u8; 4] = [0; 4];
        ipv4.clone_from_slice(&bytes);

        Ok(Address::new(ipv4))
    }
}

/// An IPv4 address with a subnet mask length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressCidr {
    address: Address,
    subnet_len: u8,
}

impl AddressCidr {
    /// Creates an IPv4 address in a subnet.
    ///
    /// # Panics
    ///
    /// Causes a panic if the subnet length exceeds 32.
    pub fn new(address: Address, subnet_len: u8) -> AddressCidr {
        assert!(subnet_len <= 32);

        AddressCidr {
            address,
            subnet_len,
        }
    }

    /// Creates an address in a subnet described by a dotted decimal mask.
    pub fn from_mask(address: Address, mask: Address) -> AddressCidr {
        let bits = mask.as_bytes()
            .iter()
            .map(|byte| byte.count_ones() as u8)
            .sum();
        AddressCidr::new(address, bits)
    }

    /// Returns the subnet mask in network byte order.
    pub fn mask(&self) -> Address {
        let mask = mask_bits(self.subnet_len);
        Address(mask)
    }

    /// Checks if an address is a member of the subnet.
    pub fn is_member(&self, address: Address) -> bool {
        let mask = mask_bits(self.subnet_len);
        (0 .. 4).all(|i| (address.0[i] & mask[i]) == (self.address.0[i] & mask[i]))
    }

    /// Returns the subnet directed broadcast address.
    pub fn broadcast(&self) -> Address {
        let mask = mask_bits(self.subnet_len);
        let mut addr = self.address.0;
        for i in 0 .. 4 {
            addr[i] |= !mask[i];
        }
        Address(addr)
    }
}

fn mask_bits(subnet_len: u8) -> [u8; 4] {
    let mask = if subnet_len == 0 {
        0
    } else {
        !0u32 << (32 - subnet_len as u32)
    };
    [
        (mask >> 24) as u8,
        (mask >> 16) as u8,
        (mask >> 8) as u8,
        mask as u8,
    ]
}

impl Deref for AddressCidr {
    type Target = Address;

    fn deref(&self) -> &Address {
        &self.address
    }
}

impl Display for AddressCidr {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}/{}", self.address, self.subnet_len)
    }
}

pub mod flags {
    pub const DONT_FRAGMENT: u16 = 0x4000;

    pub const MORE_FRAGMENTS: u16 = 0x2000;

    pub const FRAG_OFFSET_MASK: u16 = 0x1FFF;
}

/// [https://en.wikipedia.org/wiki/List_of_IP_protocol_numbers](https://en.wikipedia.org/wiki/List_of_IP_protocol_numbers)
pub mod protocols {
    pub const ICMP: u8 = 1;

    pub const TCP: u8 = 6;

    pub const UDP: u8 = 17;
}

mod fields {
    use std::ops::Range;

    pub const VER_AND_HEADER_LEN: usize = 0;

    pub const TOTAL_LEN: Range<usize> = 2 .. 4;

    pub const FRAG: Range<usize> = 6 .. 8;

    pub const TTL: usize = 8;

    pub const PROTOCOL: usize = 9;

    pub const CHECKSUM: Range<usize> = 10 .. 12;

    pub const SRC_ADDR: Range<usize> = 12 .. 16;

    pub const DST_ADDR: Range<usize> = 16 .. 20;
}

/// View of a byte buffer as an IPv4 packet.
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
    pub const MIN_HEADER_LEN: usize = 20;

    /// Tries to create an IPv4 packet view over a byte buffer.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::MIN_HEADER_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Returns the length of an IPv4 packet with no options and the
    /// specified payload size.
    pub fn buffer_len(payload_len: usize) -> usize {
        Self::MIN_HEADER_LEN + payload_len
    }

    /// Checks that the version, lengths, and header checksum are consistent
    /// with the buffer. Length fields are taken from the header itself and
    /// cross checked against the buffer, never the other way around.
    pub fn check_encoding(&self) -> Result<()> {
        let buffer_len = self.buffer.as_ref().len();

        if self.version() != 4 {
            Err(Error::Malformed)
        } else if (self.header_len() as usize) < Self::MIN_HEADER_LEN
            || (self.header_len() as usize) > buffer_len
            || (self.total_len() as usize) > buffer_len
            || (self.total_len() as usize) < (self.header_len() as usize)
        {
            Err(Error::Malformed)
        } else if check::internet_checksum(&self.buffer.as_ref()[.. self.header_len() as usize])
            != 0
        {
            Err(Error::Checksum)
        } else {
            Ok(())
        }
    }

    /// Checks if the packet is a fragment of a larger datagram. Fragments
    /// are rejected by this engine, not reassembled.
    pub fn is_fragment(&self) -> bool {
        let frag = self.frag();
        (frag & flags::MORE_FRAGMENTS) != 0 || (frag & flags::FRAG_OFFSET_MASK) != 0
    }

    pub fn version(&self) -> u8 {
        (self.buffer.as_ref()[fields::VER_AND_HEADER_LEN] & 0xF0) >> 4
    }

    pub fn header_len(&self) -> u8 {
        (self.buffer.as_ref()[fields::VER_AND_HEADER_LEN] & 0x0F) * 4
    }

    pub fn total_len(&self) -> u16 {
        (&self.buffer.as_ref()[fields::TOTAL_LEN])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn frag(&self) -> u16 {
        (&self.buffer.as_ref()[fields::FRAG])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn ttl(&self) -> u8 {
        self.buffer.as_ref()[fields::TTL]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer.as_ref()[fields::PROTOCOL]
    }

    pub fn src_addr(&self) -> Address {
        Address::try_new(&self.buffer.as_ref()[fields::SRC_ADDR]).unwrap()
    }

    pub fn dst_addr(&self) -> Address {
        Address::try_new(&self.buffer.as_ref()[fields::DST_ADDR]).unwrap()
    }

    /// Returns the payload, bounded by the header total length field.
    ///
    /// Valid only after a successful check_encoding().
    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len() as usize .. self.total_len() as usize]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_ver_and_header_len(&mut self, version: u8, header_len: u8) {
        self.buffer.as_mut()[fields::VER_AND_HEADER_LEN] = (version << 4) | (header_len / 4);
    }

    pub fn set_total_len(&mut self, total_len: u16) {
        (&mut self.buffer.as_mut()[fields::TOTAL_LEN])
            .write_u16::<NetworkEndian>(total_len)
            .unwrap()
    }

    pub fn set_frag(&mut self, frag: u16) {
        (&mut self.buffer.as_mut()[fields::FRAG])
            .write_u16::<NetworkEndian>(frag)
            .unwrap()
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.buffer.as_mut()[fields::TTL] = ttl;
    }

    pub fn set_protocol(&mut self, protocol: u8) {
        self.buffer.as_mut()[fields::PROTOCOL] = protocol;
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        (&mut self.buffer.as_mut()[fields::CHECKSUM])
            .write_u16::<NetworkEndian>(checksum)
            .unwrap()
    }

    pub fn set_src_addr(&mut self, addr: Address) {
        (&mut self.buffer.as_mut()[fields::SRC_ADDR])
            .write(addr.as_bytes())
            .unwrap();
    }

    pub fn set_dst_addr(&mut self, addr: Address) {
        (&mut self.buffer.as_mut()[fields::DST_ADDR])
            .write(addr.as_bytes())
            .unwrap();
    }

    /// Recomputes the header checksum. Call after all other fields are set.
    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let checksum = {
            let header_len = self.header_len() as usize;
            check::internet_checksum(&self.buffer.as_ref()[.. header_len])
        };
        self.set_checksum(checksum);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len() as usize;
        let total_len = self.total_len() as usize;
        &mut self.buffer.as_mut()[header_len .. total_len]
    }
}

/// An IPv4 packet header with no options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub protocol: u8,
    pub payload_len: u16,
}

impl Repr {
    /// Returns the size of an IPv4 packet with this header and its payload
    /// when serialized to a buffer.
    pub fn buffer_len(&self) -> usize {
        Packet::<&[u8]>::MIN_HEADER_LEN + self.payload_len as usize
    }

    /// Deserializes a packet into an IPv4 header.
    ///
    /// The packet must have passed check_encoding().
    pub fn deserialize<T>(packet: &Packet<T>) -> Repr
    where
        T: AsRef<[u8]>,
    {
        Repr {
            src_addr: packet.src_addr(),
            dst_addr: packet.dst_addr(),
            protocol: packet.protocol(),
            payload_len: packet.total_len() - packet.header_len() as u16,
        }
    }

    /// Serializes the IPv4 header into a packet, writing an optionless
    /// header with TTL 64 and the don't-fragment flag, and updating the
    /// header checksum.
    pub fn serialize<T>(&self, packet: &mut Packet<T>)
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        packet.set_ver_and_header_len(4, Packet::<&[u8]>::MIN_HEADER_LEN as u8);
        packet.buffer.as_mut()[1] = 0; // DSCP/ECN
        packet.set_total_len(Packet::<&[u8]>::MIN_HEADER_LEN as u16 + self.payload_len);
        (&mut packet.buffer.as_mut()[4 .. 6])
            .write_u16::<NetworkEndian>(0)
            .unwrap(); // identification
        packet.set_frag(flags::DONT_FRAGMENT);
        packet.set_ttl(64);
        packet.set_protocol(self.protocol);
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);
        packet.fill_checksum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_membership() {
        let cidr = AddressCidr::new(Address::new([192, 168, 1, 10]), 24);
        assert!(cidr.is_member(Address::new([192, 168, 1, 1])));
        assert!(!cidr.is_member(Address::new([192, 168, 2, 1])));
        assert_eq!(cidr.mask(), Address::new([255, 255, 255, 0]));
        assert_eq!(cidr.broadcast(), Address::new([192, 168, 1, 255]));
    }

    #[test]
    fn test_from_mask() {
        let cidr = AddressCidr::from_mask(
            Address::new([10, 0, 0, 5]),
            Address::new([255, 255, 255, 0]),
        );
        assert_eq!(cidr.mask(), Address::new([255, 255, 255, 0]));
    }

    #[test]
    fn test_packet_too_short() {
        let buffer: [u8; 19] = [0; 19];
        assert_matches!(Packet::try_new(&buffer[..]), Err(Error::Exhausted));
    }

    #[test]
    fn test_serialize_then_check() {
        let mut buffer: [u8; 24] = [0; 24];

        let repr = Repr {
            src_addr: Address::new([10, 0, 0, 1]),
            dst_addr: Address::new([10, 0, 0, 2]),
            protocol: protocols::UDP,
            payload_len: 4,
        };

        {
            let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
            repr.serialize(&mut packet);
        }

        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(), Ok(()));
        assert_eq!(packet.version(), 4);
        assert_eq!(packet.ttl(), 64);
        assert!(!packet.is_fragment());
        assert_eq!(Repr::deserialize(&packet), repr);
    }

    #[test]
    fn test_check_detects_corruption() {
        let mut buffer: [u8; 24] = [0; 24];

        {
            let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
            Repr {
                src_addr: Address::new([10, 0, 0, 1]),
                dst_addr: Address::new([10, 0, 0, 2]),
                protocol: protocols::UDP,
                payload_len: 4,
            }.serialize(&mut packet);
        }

        buffer[12] ^= 0x01;
        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(), Err(Error::Checksum));
    }

    #[test]
    fn test_total_len_exceeding_buffer() {
        let mut buffer: [u8; 20] = [0; 20];
        buffer[0] = 0x45;
        buffer[3] = 0xFF; // total length 255 > buffer
        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(), Err(Error::Malformed));
    }

    #[test]
    fn test_fragment_detection() {
        let mut buffer: [u8; 20] = [0; 20];
        buffer[0] = 0x45;
        buffer[2] = 0;
        buffer[3] = 20;
        buffer[6] = 0x20; // more fragments
        {
            let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
            packet.fill_checksum();
        }
        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(), Ok(()));
        assert!(packet.is_fragment());
    }
}
