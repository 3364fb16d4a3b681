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

mod fields {
    use std::ops::{
        Range,
        RangeFrom,
    };

    pub const SRC_PORT: Range<usize> = 0 .. 2;

    pub const DST_PORT: Range<usize> = 2 .. 4;

    pub const LENGTH: Range<usize> = 4 .. 6;

    pub const CHECKSUM: Range<usize> = 6 .. 8;

    pub const PAYLOAD: RangeFrom<usize> = 8 ..;
}

/// View of a byte buffer as a UDP packet.
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
    pub const HEADER_LEN: usize = 8;

    /// Tries to create a UDP packet view over a byte buffer.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::HEADER_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Returns the length of a UDP packet with the specified payload size.
    pub fn buffer_len(payload_len: usize) -> usize {
        Self::HEADER_LEN + payload_len
    }

    /// Checks the length field and, when present, the checksum against the
    /// pseudo header built from the given raw network order addresses. A
    /// zero checksum on the wire means "not computed" and is accepted.
    pub fn check_encoding(&self, src_addr: &[u8], dst_addr: &[u8]) -> Result<()> {
        if (self.length() as usize) < Self::HEADER_LEN
            || (self.length() as usize) > self.buffer.as_ref().len()
        {
            Err(Error::Malformed)
        } else if self.checksum() != 0 && self.gen_checksum(src_addr, dst_addr) != 0 {
            Err(Error::Checksum)
        } else {
            Ok(())
        }
    }

    /// Calculates the checksum over the segment and pseudo header.
    pub fn gen_checksum(&self, src_addr: &[u8], dst_addr: &[u8]) -> u16 {
        let len = self.length() as u32;
        let sum = check::pseudo_header(0, src_addr, dst_addr, 17, len);
        check::finish(check::accumulate(
            sum,
            &self.buffer.as_ref()[.. self.length() as usize],
        ))
    }

    pub fn src_port(&self) -> u16 {
        (&self.buffer.as_ref()[fields::SRC_PORT])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn dst_port(&self) -> u16 {
        (&self.buffer.as_ref()[fields::DST_PORT])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn length(&self) -> u16 {
        (&self.buffer.as_ref()[fields::LENGTH])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn checksum(&self) -> u16 {
        (&self.buffer.as_ref()[fields::CHECKSUM])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    /// Returns the payload, bounded by the header length field.
    ///
    /// Valid only after a successful check_encoding().
    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[Self::HEADER_LEN .. self.length() as usize]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_src_port(&mut self, port: u16) {
        (&mut self.buffer.as_mut()[fields::SRC_PORT])
            .write_u16::<NetworkEndian>(port)
            .unwrap()
    }

    pub fn set_dst_port(&mut self, port: u16) {
        (&mut self.buffer.as_mut()[fields::DST_PORT])
            .write_u16::<NetworkEndian>(port)
            .unwrap()
    }

    pub fn set_length(&mut self, length: u16) {
        (&mut self.buffer.as_mut()[fields::LENGTH])
            .write_u16::<NetworkEndian>(length)
            .unwrap()
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        (&mut self.buffer.as_mut()[fields::CHECKSUM])
            .write_u16::<NetworkEndian>(checksum)
            .unwrap()
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[fields::PAYLOAD]
    }

    /// Recomputes the checksum. Call after the payload is written.
    pub fn fill_checksum(&mut self, src_addr: &[u8], dst_addr: &[u8]) {
        self.set_checksum(0);
        let checksum = self.gen_checksum(src_addr, dst_addr);
        // An all-zero computed checksum is transmitted as all ones.
        self.set_checksum(if checksum == 0 { 0xFFFF } else { checksum });
    }
}

/// A UDP packet header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
}

impl Repr {
    /// Returns the size of the UDP packet (header and payload) when
    /// serialized to a buffer.
    pub fn buffer_len(&self) -> usize {
        self.length as usize
    }

    /// Deserializes a packet into a UDP header.
    pub fn deserialize<T>(packet: &Packet<T>) -> Repr
    where
        T: AsRef<[u8]>,
    {
        Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            length: packet.length(),
        }
    }

    /// Serializes the UDP header into a packet. The checksum is filled
    /// separately once the payload is in place.
    pub fn serialize<T>(&self, packet: &mut Packet<T>)
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_length(self.length);
        packet.set_checksum(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SRC: [u8; 4] = [10, 0, 0, 1];
    static DST: [u8; 4] = [10, 0, 0, 2];

    #[test]
    fn test_packet_too_short() {
        let buffer: [u8; 7] = [0; 7];
        assert_matches!(Packet::try_new(&buffer[..]), Err(Error::Exhausted));
    }

    #[test]
    fn test_round_trip() {
        let mut buffer: [u8; 12] = [0; 12];

        let repr = Repr {
            src_port: 4096,
            dst_port: 53,
            length: 12,
        };

        {
            let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
            repr.serialize(&mut packet);
            packet.payload_mut().copy_from_slice(&[1, 2, 3, 4]);
            packet.fill_checksum(&SRC, &DST);
        }

        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(&SRC, &DST), Ok(()));
        assert_eq!(Repr::deserialize(&packet), repr);
        assert_eq!(packet.payload(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_bit_flip_detected() {
        let mut buffer: [u8; 12] = [0; 12];

        {
            let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
            Repr {
                src_port: 4096,
                dst_port: 53,
                length: 12,
            }.serialize(&mut packet);
            packet.payload_mut().copy_from_slice(&[1, 2, 3, 4]);
            packet.fill_checksum(&SRC, &DST);
        }

        buffer[9] ^= 0x01;
        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(&SRC, &DST), Err(Error::Checksum));
    }

    #[test]
    fn test_zero_checksum_accepted() {
        let mut buffer: [u8; 8] = [0; 8];

        {
            let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
            Repr {
                src_port: 68,
                dst_port: 67,
                length: 8,
            }.serialize(&mut packet);
        }

        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(&SRC, &DST), Ok(()));
    }

    #[test]
    fn test_length_exceeding_buffer() {
        let mut buffer: [u8; 8] = [0; 8];
        buffer[5] = 20;
        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(&SRC, &DST), Err(Error::Malformed));
    }
}
