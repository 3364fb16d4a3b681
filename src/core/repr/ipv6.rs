use std::fmt::{
    Display,
    Formatter,
    Result as FmtResult,
};
use std::io::Write;

use byteorder::{
    NetworkEndian,
    ReadBytesExt,
    WriteBytesExt,
};

use {
    Error,
    Result,
};

/// [IPv6 address](https://en.wikipedia.org/wiki/IPv6_address) in network
/// byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address([u8; 16]);

impl Address {
    pub const UNSPECIFIED: Address = Address([0; 16]);

    /// ff02::1, all nodes on the link.
    pub const ALL_NODES: Address = Address([
        0xFF, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01,
    ]);

    /// ff02::2, all routers on the link.
    pub const ALL_ROUTERS: Address = Address([
        0xFF, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x02,
    ]);

    /// Creates an IPv6 address from a network byte order buffer.
    pub fn new(addr: [u8; 16]) -> Address {
        Address(addr)
    }

    /// Tries to create an IPv6 address from a network byte order slice.
    pub fn try_new(addr: &[u8]) -> Result<Address> {
        if addr.len() != 16 {
            return Err(Error::Exhausted);
        }

        let mut _addr: [u8; 16] = [0; 16];
        _addr.clone_from_slice(addr);
        Ok(Address(_addr))
    }

    /// Creates a fe80::/64 link local address from an interface identifier.
    pub fn link_local(iid: [u8; 8]) -> Address {
        let mut addr = [0; 16];
        addr[0] = 0xFE;
        addr[1] = 0x80;
        addr[8 ..].copy_from_slice(&iid);
        Address(addr)
    }

    /// Combines an advertised prefix with an interface identifier. Whole
    /// prefix bytes are copied; a sub-byte remainder masks the boundary
    /// byte, keeping the high prefix bits and the low identifier bits.
    pub fn from_prefix(prefix: &Address, prefix_len: u8, iid: [u8; 8]) -> Address {
        let mut addr = [0; 16];
        addr[8 ..].copy_from_slice(&iid);

        let whole = (prefix_len / 8) as usize;
        addr[.. whole].copy_from_slice(&prefix.0[.. whole]);

        let rem = prefix_len % 8;
        if rem != 0 && whole < 16 {
            let mask = !0u8 << (8 - rem);
            addr[whole] = (prefix.0[whole] & mask) | (addr[whole] & !mask);
        }

        Address(addr)
    }

    /// Returns the ff02::1:ffXX:XXXX solicited node multicast address for
    /// this address.
    pub fn solicited_node(&self) -> Address {
        let mut addr = [0; 16];
        addr[0] = 0xFF;
        addr[1] = 0x02;
        addr[11] = 0x01;
        addr[12] = 0xFF;
        addr[13 ..].copy_from_slice(&self.0[13 ..]);
        Address(addr)
    }

    /// Returns a reference to the network byte order representation of the
    /// address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 16]
    }

    /// Checks if this is an ff00::/8 multicast address.
    pub fn is_multicast(&self) -> bool {
        self.0[0] == 0xFF
    }

    /// Checks if this is an fe80::/10 link local address.
    pub fn is_link_local(&self) -> bool {
        self.0[0] == 0xFE && (self.0[1] & 0xC0) == 0x80
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        for i in 0 .. 8 {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(
                f,
                "{:x}",
                ((self.0[i * 2] as u16) << 8) | self.0[i * 2 + 1] as u16
            )?;
        }
        Ok(())
    }
}

/// [https://www.iana.org/assignments/protocol-numbers](https://www.iana.org/assignments/protocol-numbers)
pub mod next_headers {
    pub const HOP_BY_HOP: u8 = 0;

    pub const TCP: u8 = 6;

    pub const UDP: u8 = 17;

    pub const ROUTING: u8 = 43;

    pub const FRAGMENT: u8 = 44;

    pub const ICMPV6: u8 = 58;

    pub const NO_NEXT_HEADER: u8 = 59;

    pub const DEST_OPTS: u8 = 60;
}

mod fields {
    use std::ops::Range;

    pub const VER_AND_CLASS: usize = 0;

    pub const PAYLOAD_LEN: Range<usize> = 4 .. 6;

    pub const NEXT_HEADER: usize = 6;

    pub const HOP_LIMIT: usize = 7;

    pub const SRC_ADDR: Range<usize> = 8 .. 24;

    pub const DST_ADDR: Range<usize> = 24 .. 40;
}

/// View of a byte buffer as an IPv6 packet.
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
    pub const HEADER_LEN: usize = 40;

    /// Tries to create an IPv6 packet view over a byte buffer.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::HEADER_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Returns the length of an IPv6 packet with the specified payload size.
    pub fn buffer_len(payload_len: usize) -> usize {
        Self::HEADER_LEN + payload_len
    }

    /// Checks that the version and payload length are consistent with the
    /// buffer.
    pub fn check_encoding(&self) -> Result<()> {
        if self.version() != 6 {
            Err(Error::Malformed)
        } else if Self::HEADER_LEN + self.payload_len() as usize > self.buffer.as_ref().len() {
            Err(Error::Malformed)
        } else {
            Ok(())
        }
    }

    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[fields::VER_AND_CLASS] >> 4
    }

    pub fn payload_len(&self) -> u16 {
        (&self.buffer.as_ref()[fields::PAYLOAD_LEN])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn next_header(&self) -> u8 {
        self.buffer.as_ref()[fields::NEXT_HEADER]
    }

    pub fn hop_limit(&self) -> u8 {
        self.buffer.as_ref()[fields::HOP_LIMIT]
    }

    pub fn src_addr(&self) -> Address {
        Address::try_new(&self.buffer.as_ref()[fields::SRC_ADDR]).unwrap()
    }

    pub fn dst_addr(&self) -> Address {
        Address::try_new(&self.buffer.as_ref()[fields::DST_ADDR]).unwrap()
    }

    /// Returns the payload, bounded by the header payload length field.
    ///
    /// Valid only after a successful check_encoding().
    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[Self::HEADER_LEN .. Self::HEADER_LEN + self.payload_len() as usize]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_payload_len(&mut self, len: u16) {
        (&mut self.buffer.as_mut()[fields::PAYLOAD_LEN])
            .write_u16::<NetworkEndian>(len)
            .unwrap()
    }

    pub fn set_next_header(&mut self, next_header: u8) {
        self.buffer.as_mut()[fields::NEXT_HEADER] = next_header;
    }

    pub fn set_hop_limit(&mut self, hop_limit: u8) {
        self.buffer.as_mut()[fields::HOP_LIMIT] = hop_limit;
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

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let payload_len = self.payload_len() as usize;
        &mut self.buffer.as_mut()[Self::HEADER_LEN .. Self::HEADER_LEN + payload_len]
    }
}

/// An IPv6 packet header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub next_header: u8,
    pub hop_limit: u8,
    pub payload_len: u16,
}

impl Repr {
    /// Returns the size of an IPv6 packet with this header and its payload
    /// when serialized to a buffer.
    pub fn buffer_len(&self) -> usize {
        Packet::<&[u8]>::HEADER_LEN + self.payload_len as usize
    }

    /// Deserializes a packet into an IPv6 header.
    pub fn deserialize<T>(packet: &Packet<T>) -> Repr
    where
        T: AsRef<[u8]>,
    {
        Repr {
            src_addr: packet.src_addr(),
            dst_addr: packet.dst_addr(),
            next_header: packet.next_header(),
            hop_limit: packet.hop_limit(),
            payload_len: packet.payload_len(),
        }
    }

    /// Serializes the IPv6 header into a packet.
    pub fn serialize<T>(&self, packet: &mut Packet<T>)
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        packet.buffer.as_mut()[fields::VER_AND_CLASS] = 6 << 4;
        packet.buffer.as_mut()[1] = 0;
        packet.buffer.as_mut()[2] = 0;
        packet.buffer.as_mut()[3] = 0;
        packet.set_payload_len(self.payload_len);
        packet.set_next_header(self.next_header);
        packet.set_hop_limit(self.hop_limit);
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);
    }
}
