use byteorder::{
    NetworkEndian,
    ReadBytesExt,
    WriteBytesExt,
};

use {
    Error,
    Result,
};
use core::check::internet_checksum;

/// Safe representation of an ICMP echo header. Other ICMP messages are not
/// produced or consumed by this engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Repr {
    EchoRequest { id: u16, seq: u16 },
    EchoReply { id: u16, seq: u16 },
}

impl Repr {
    /// Returns the ICMP packet size needed to serialize this representation,
    /// excluding any echo data.
    pub fn buffer_len(&self) -> usize {
        Packet::<&[u8]>::HEADER_LEN
    }

    /// Tries to deserialize a packet into an ICMP echo representation.
    pub fn deserialize<T>(packet: &Packet<T>) -> Result<Repr>
    where
        T: AsRef<[u8]>,
    {
        fn id_seq<T: AsRef<[u8]>>(packet: &Packet<T>) -> (u16, u16) {
            (
                (&packet.rest()[0 .. 2]).read_u16::<NetworkEndian>().unwrap(),
                (&packet.rest()[2 .. 4]).read_u16::<NetworkEndian>().unwrap(),
            )
        }

        match (packet.msg_type(), packet.code()) {
            (8, 0) => {
                let (id, seq) = id_seq(packet);
                Ok(Repr::EchoRequest { id, seq })
            }
            (0, 0) => {
                let (id, seq) = id_seq(packet);
                Ok(Repr::EchoReply { id, seq })
            }
            _ => Err(Error::Malformed),
        }
    }

    /// Serializes the representation into a packet and updates the checksum.
    pub fn serialize<T>(&self, packet: &mut Packet<T>)
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        let (msg_type, id, seq) = match *self {
            Repr::EchoRequest { id, seq } => (8, id, seq),
            Repr::EchoReply { id, seq } => (0, id, seq),
        };

        packet.set_msg_type(msg_type);
        packet.set_code(0);
        (&mut packet.rest_mut()[0 .. 2])
            .write_u16::<NetworkEndian>(id)
            .unwrap();
        (&mut packet.rest_mut()[2 .. 4])
            .write_u16::<NetworkEndian>(seq)
            .unwrap();
        packet.fill_checksum();
    }
}

mod fields {
    use std::ops::{
        Range,
        RangeFrom,
    };

    pub const MSG_TYPE: usize = 0;

    pub const CODE: usize = 1;

    pub const CHECKSUM: Range<usize> = 2 .. 4;

    pub const REST: Range<usize> = 4 .. 8;

    pub const PAYLOAD: RangeFrom<usize> = 8 ..;
}

/// View of a byte buffer as an ICMP packet.
#[derive(Debug)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const HEADER_LEN: usize = 8;

    /// Tries to create an ICMP packet view over a byte buffer.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::HEADER_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Returns the length of an ICMP packet with the specified payload size.
    pub fn buffer_len(payload_len: usize) -> usize {
        Self::HEADER_LEN + payload_len
    }

    /// Checks that the checksum over the entire message is valid.
    pub fn check_encoding(&self) -> Result<()> {
        if internet_checksum(self.buffer.as_ref()) != 0 {
            Err(Error::Checksum)
        } else {
            Ok(())
        }
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

    /// Returns the four header bytes following the checksum.
    pub fn rest(&self) -> &[u8] {
        &self.buffer.as_ref()[fields::REST]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[fields::PAYLOAD]
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

    pub fn rest_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[fields::REST]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[fields::PAYLOAD]
    }

    /// Recomputes the checksum over the entire message. Call last.
    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let checksum = internet_checksum(self.buffer.as_ref());
        self.set_checksum(checksum);
    }
}
