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

/// TCP flag bits as they appear in the low byte of the flags field.
pub mod flags {
    pub const FIN: u8 = 0x01;

    pub const SYN: u8 = 0x02;

    pub const RST: u8 = 0x04;

    pub const PSH: u8 = 0x08;

    pub const ACK: u8 = 0x10;

    pub const URG: u8 = 0x20;
}

mod options {
    pub const END: u8 = 0;

    pub const NOP: u8 = 1;

    pub const MSS: u8 = 2;
}

mod fields {
    use std::ops::Range;

    pub const SRC_PORT: Range<usize> = 0 .. 2;

    pub const DST_PORT: Range<usize> = 2 .. 4;

    pub const SEQ_NUM: Range<usize> = 4 .. 8;

    pub const ACK_NUM: Range<usize> = 8 .. 12;

    pub const DATA_OFFSET: usize = 12;

    pub const FLAGS: usize = 13;

    pub const WINDOW_SIZE: Range<usize> = 14 .. 16;

    pub const CHECKSUM: Range<usize> = 16 .. 18;

    pub const URGENT_POINTER: Range<usize> = 18 .. 20;
}

/// View of a byte buffer as a TCP segment.
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

    /// Tries to create a TCP segment view over a byte buffer.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::MIN_HEADER_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Returns the length of a TCP segment carrying an MSS option (only
    /// set on SYN segments) and the specified payload size.
    pub fn buffer_len(payload_len: usize, with_mss: bool) -> usize {
        Self::MIN_HEADER_LEN + if with_mss { 4 } else { 0 } + payload_len
    }

    /// Checks the data offset and the checksum over the segment and the
    /// pseudo header built from the given raw network order addresses.
    pub fn check_encoding(&self, src_addr: &[u8], dst_addr: &[u8]) -> Result<()> {
        let header_len = self.data_offset() as usize * 4;
        if header_len < Self::MIN_HEADER_LEN || header_len > self.buffer.as_ref().len() {
            Err(Error::Malformed)
        } else if self.gen_checksum(src_addr, dst_addr) != 0 {
            Err(Error::Checksum)
        } else {
            Ok(())
        }
    }

    /// Calculates the checksum over the segment and pseudo header.
    pub fn gen_checksum(&self, src_addr: &[u8], dst_addr: &[u8]) -> u16 {
        let buffer = self.buffer.as_ref();
        let sum = check::pseudo_header(0, src_addr, dst_addr, 6, buffer.len() as u32);
        check::finish(check::accumulate(sum, buffer))
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

    pub fn seq_num(&self) -> u32 {
        (&self.buffer.as_ref()[fields::SEQ_NUM])
            .read_u32::<NetworkEndian>()
            .unwrap()
    }

    pub fn ack_num(&self) -> u32 {
        (&self.buffer.as_ref()[fields::ACK_NUM])
            .read_u32::<NetworkEndian>()
            .unwrap()
    }

    /// Returns the data offset in 32-bit words.
    pub fn data_offset(&self) -> u8 {
        self.buffer.as_ref()[fields::DATA_OFFSET] >> 4
    }

    pub fn flags(&self) -> u8 {
        self.buffer.as_ref()[fields::FLAGS]
    }

    pub fn window_size(&self) -> u16 {
        (&self.buffer.as_ref()[fields::WINDOW_SIZE])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn checksum(&self) -> u16 {
        (&self.buffer.as_ref()[fields::CHECKSUM])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    /// Walks the options region for a maximum segment size option,
    /// tolerating NOPs and stopping at the end-of-options marker.
    pub fn mss(&self) -> Option<u16> {
        let header_len = self.data_offset() as usize * 4;
        if header_len <= Self::MIN_HEADER_LEN || header_len > self.buffer.as_ref().len() {
            return None;
        }

        let opts = &self.buffer.as_ref()[Self::MIN_HEADER_LEN .. header_len];
        let mut i = 0;
        while i < opts.len() {
            match opts[i] {
                options::END => break,
                options::NOP => i += 1,
                kind => {
                    if i + 1 >= opts.len() {
                        break;
                    }
                    let len = opts[i + 1] as usize;
                    if len < 2 || i + len > opts.len() {
                        break;
                    }
                    if kind == options::MSS && len == 4 {
                        return Some(((opts[i + 2] as u16) << 8) | opts[i + 3] as u16);
                    }
                    i += len;
                }
            }
        }

        None
    }

    /// Returns the payload past the options.
    ///
    /// Valid only after a successful check_encoding().
    pub fn payload(&self) -> &[u8] {
        let data_offset = self.data_offset() as usize * 4;
        &self.buffer.as_ref()[data_offset ..]
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

    pub fn set_seq_num(&mut self, seq_num: u32) {
        (&mut self.buffer.as_mut()[fields::SEQ_NUM])
            .write_u32::<NetworkEndian>(seq_num)
            .unwrap()
    }

    pub fn set_ack_num(&mut self, ack_num: u32) {
        (&mut self.buffer.as_mut()[fields::ACK_NUM])
            .write_u32::<NetworkEndian>(ack_num)
            .unwrap()
    }

    pub fn set_data_offset(&mut self, data_offset: u8) {
        self.buffer.as_mut()[fields::DATA_OFFSET] = data_offset << 4;
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.buffer.as_mut()[fields::FLAGS] = flags;
    }

    pub fn set_window_size(&mut self, window_size: u16) {
        (&mut self.buffer.as_mut()[fields::WINDOW_SIZE])
            .write_u16::<NetworkEndian>(window_size)
            .unwrap()
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        (&mut self.buffer.as_mut()[fields::CHECKSUM])
            .write_u16::<NetworkEndian>(checksum)
            .unwrap()
    }

    pub fn set_urgent_pointer(&mut self, urgent_pointer: u16) {
        (&mut self.buffer.as_mut()[fields::URGENT_POINTER])
            .write_u16::<NetworkEndian>(urgent_pointer)
            .unwrap()
    }

    /// Writes an MSS option into the first four option bytes. The data
    /// offset must already account for it.
    pub fn set_mss(&mut self, mss: u16) {
        let opts = &mut self.buffer.as_mut()[Self::MIN_HEADER_LEN .. Self::MIN_HEADER_LEN + 4];
        opts[0] = options::MSS;
        opts[1] = 4;
        opts[2] = (mss >> 8) as u8;
        opts[3] = mss as u8;
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let data_offset = self.data_offset() as usize * 4;
        &mut self.buffer.as_mut()[data_offset ..]
    }

    /// Recomputes the checksum. Call after all fields and the payload are
    /// in place.
    pub fn fill_checksum(&mut self, src_addr: &[u8], dst_addr: &[u8]) {
        self.set_checksum(0);
        let checksum = self.gen_checksum(src_addr, dst_addr);
        self.set_checksum(checksum);
    }
}

/// A TCP segment header; of the options only MSS is represented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    pub flags: u8,
    pub window_size: u16,
    pub mss: Option<u16>,
}

impl Repr {
    /// Returns the length of the TCP header when serialized to a buffer.
    pub fn header_len(&self) -> usize {
        Packet::<&[u8]>::MIN_HEADER_LEN + if self.mss.is_some() { 4 } else { 0 }
    }

    /// Deserializes a segment into a TCP header.
    pub fn deserialize<T>(packet: &Packet<T>) -> Repr
    where
        T: AsRef<[u8]>,
    {
        Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            seq_num: packet.seq_num(),
            ack_num: packet.ack_num(),
            flags: packet.flags(),
            window_size: packet.window_size(),
            mss: packet.mss(),
        }
    }

    /// Serializes the TCP header into a packet. The checksum is filled
    /// separately once the payload is in place.
    pub fn serialize<T>(&self, packet: &mut Packet<T>)
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_num(self.seq_num);
        packet.set_ack_num(self.ack_num);
        packet.set_data_offset((self.header_len() / 4) as u8);
        packet.set_flags(self.flags);
        packet.set_window_size(self.window_size);
        packet.set_checksum(0);
        packet.set_urgent_pointer(0);
        if let Some(mss) = self.mss {
            packet.set_mss(mss);
        }
    }
}
