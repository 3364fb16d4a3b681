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
use core::repr::{
    EthernetAddress,
    Ipv4Address,
};

/// [https://www.iana.org/assignments/arp-parameters](https://www.iana.org/assignments/arp-parameters)
pub mod ops {
    pub const REQUEST: u16 = 1;

    pub const REPLY: u16 = 2;
}

pub mod hw_types {
    pub const ETHERNET: u16 = 1;
}

pub mod proto_types {
    pub const IPV4: u16 = 0x800;
}

mod fields {
    use std::ops::Range;

    pub const HW_TYPE: Range<usize> = 0 .. 2;

    pub const PROTO_TYPE: Range<usize> = 2 .. 4;

    pub const HW_LEN: usize = 4;

    pub const PROTO_LEN: usize = 5;

    pub const OP: Range<usize> = 6 .. 8;

    pub const SENDER_HW_ADDR: Range<usize> = 8 .. 14;

    pub const SENDER_PROTO_ADDR: Range<usize> = 14 .. 18;

    pub const TARGET_HW_ADDR: Range<usize> = 18 .. 24;

    pub const TARGET_PROTO_ADDR: Range<usize> = 24 .. 28;
}

/// View of a byte buffer as an Ethernet/IPv4 ARP packet.
#[derive(Debug)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const BUFFER_LEN: usize = 28;

    /// Tries to create an ARP packet view over a byte buffer.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::BUFFER_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Checks that the hardware/protocol types and lengths describe an
    /// Ethernet/IPv4 packet, the only combination this engine speaks.
    pub fn check_encoding(&self) -> Result<()> {
        if self.hw_type() != hw_types::ETHERNET || self.proto_type() != proto_types::IPV4
            || self.buffer.as_ref()[fields::HW_LEN] != 6
            || self.buffer.as_ref()[fields::PROTO_LEN] != 4
        {
            Err(Error::Malformed)
        } else {
            Ok(())
        }
    }

    pub fn hw_type(&self) -> u16 {
        (&self.buffer.as_ref()[fields::HW_TYPE])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn proto_type(&self) -> u16 {
        (&self.buffer.as_ref()[fields::PROTO_TYPE])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn op(&self) -> u16 {
        (&self.buffer.as_ref()[fields::OP])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn sender_hw_addr(&self) -> EthernetAddress {
        EthernetAddress::try_new(&self.buffer.as_ref()[fields::SENDER_HW_ADDR]).unwrap()
    }

    pub fn sender_proto_addr(&self) -> Ipv4Address {
        Ipv4Address::try_new(&self.buffer.as_ref()[fields::SENDER_PROTO_ADDR]).unwrap()
    }

    pub fn target_hw_addr(&self) -> EthernetAddress {
        EthernetAddress::try_new(&self.buffer.as_ref()[fields::TARGET_HW_ADDR]).unwrap()
    }

    pub fn target_proto_addr(&self) -> Ipv4Address {
        Ipv4Address::try_new(&self.buffer.as_ref()[fields::TARGET_PROTO_ADDR]).unwrap()
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_op(&mut self, op: u16) {
        (&mut self.buffer.as_mut()[fields::OP])
            .write_u16::<NetworkEndian>(op)
            .unwrap()
    }

    pub fn set_sender_hw_addr(&mut self, addr: EthernetAddress) {
        (&mut self.buffer.as_mut()[fields::SENDER_HW_ADDR])
            .write(addr.as_bytes())
            .unwrap();
    }

    pub fn set_sender_proto_addr(&mut self, addr: Ipv4Address) {
        (&mut self.buffer.as_mut()[fields::SENDER_PROTO_ADDR])
            .write(addr.as_bytes())
            .unwrap();
    }

    pub fn set_target_hw_addr(&mut self, addr: EthernetAddress) {
        (&mut self.buffer.as_mut()[fields::TARGET_HW_ADDR])
            .write(addr.as_bytes())
            .unwrap();
    }

    pub fn set_target_proto_addr(&mut self, addr: Ipv4Address) {
        (&mut self.buffer.as_mut()[fields::TARGET_PROTO_ADDR])
            .write(addr.as_bytes())
            .unwrap();
    }
}

/// An Ethernet/IPv4 ARP packet header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub op: u16,
    pub sender_hw_addr: EthernetAddress,
    pub sender_proto_addr: Ipv4Address,
    pub target_hw_addr: EthernetAddress,
    pub target_proto_addr: Ipv4Address,
}

impl Repr {
    /// Returns the size of the ARP packet when serialized to a buffer.
    pub fn buffer_len() -> usize {
        Packet::<&[u8]>::BUFFER_LEN
    }

    /// Deserializes a packet into an ARP header, checking the encoding.
    pub fn deserialize<T>(packet: &Packet<T>) -> Result<Repr>
    where
        T: AsRef<[u8]>,
    {
        packet.check_encoding()?;

        Ok(Repr {
            op: packet.op(),
            sender_hw_addr: packet.sender_hw_addr(),
            sender_proto_addr: packet.sender_proto_addr(),
            target_hw_addr: packet.target_hw_addr(),
            target_proto_addr: packet.target_proto_addr(),
        })
    }

    /// Serializes the ARP header into a packet.
    pub fn serialize<T>(&self, packet: &mut Packet<T>)
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        {
            let mut writer = &mut packet.buffer.as_mut()[fields::HW_TYPE.start .. fields::OP.start];
            writer.write_u16::<NetworkEndian>(hw_types::ETHERNET).unwrap();
            writer.write_u16::<NetworkEndian>(proto_types::IPV4).unwrap();
            writer.write_u8(6).unwrap();
            writer.write_u8(4).unwrap();
        }
        packet.set_op(self.op);
        packet.set_sender_hw_addr(self.sender_hw_addr);
        packet.set_sender_proto_addr(self.sender_proto_addr);
        packet.set_target_hw_addr(self.target_hw_addr);
        packet.set_target_proto_addr(self.target_proto_addr);
    }
}
