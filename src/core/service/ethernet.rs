use {
    Error,
    Result,
};
use core::check;
use core::packet::ParsedPacket;
use core::repr::EthernetAddress;
use core::service::{
    arp,
    ipv4,
    ipv6,
    Event,
    Interface,
};

/// Builds one frame in the interface transmit buffer and hands it to the
/// driver. The closure fills the link payload region; the link header and
/// any padding are written around it. The transmit completes (or fails)
/// before this returns, so the buffer is free for the next frame.
pub fn send_frame<F>(
    interface: &mut Interface,
    dst: EthernetAddress,
    proto: u16,
    payload_len: usize,
    f: F,
) -> Result<usize>
where
    F: FnOnce(&mut [u8]),
{
    let header_len = interface.link.build_header(&mut interface.tx, proto, dst)?;
    if header_len + payload_len > interface.tx.len() {
        return Err(Error::Exhausted);
    }

    f(&mut interface.tx[header_len .. header_len + payload_len]);

    let frame_len = interface
        .link
        .finalize(&mut interface.tx, header_len + payload_len);
    ether_output(interface, frame_len)
}

/// Hands the transmit buffer to the driver and keeps the counters honest.
pub fn ether_output(interface: &mut Interface, frame_len: usize) -> Result<usize> {
    match interface.driver.tx(&interface.tx[.. frame_len]) {
        Ok(sent) => {
            interface.nsent += 1;
            Ok(sent)
        }
        Err(Error::Pending) => {
            debug!("driver busy, retry later");
            Err(Error::Pending)
        }
        Err(err) => {
            interface.nerr += 1;
            error!("driver tx failed: {:?}", err);
            Err(err)
        }
    }
}

/// Receives one raw frame from the driver: runs the optional MAC and CRC
/// filters, parses it, and dispatches it up the stack. All parse failures
/// end here, counted, never surfaced as connection errors.
pub fn recv_frame(interface: &mut Interface, frame: &[u8]) {
    let frame = match filter_frame(interface, frame) {
        Some(frame) => frame,
        None => {
            interface.ndrop += 1;
            return;
        }
    };

    // The parsed views borrow the frame; copy what dispatch needs first.
    let parsed = match ParsedPacket::parse(&interface.link, frame) {
        Ok(parsed) => parsed,
        Err(Error::Ignored) => {
            interface.ndrop += 1;
            return;
        }
        Err(err) => {
            debug!("dropping malformed frame: {:?}", err);
            interface.nerr += 1;
            return;
        }
    };

    if let Some(ref arp_packet) = parsed.arp {
        let event = Event::Arp {
            sender: arp_packet.sender_proto_addr(),
            sender_mac: arp_packet.sender_hw_addr(),
        };
        interface.push_event(event);
        arp::recv_packet(interface, &parsed);
    } else if parsed.ipv4.is_some() {
        ipv4::recv_packet(interface, &parsed);
    } else if parsed.ipv6.is_some() {
        ipv6::recv_packet(interface, &parsed);
    }
}

fn filter_frame<'a>(interface: &Interface, frame: &'a [u8]) -> Option<&'a [u8]> {
    if interface.enable_mac_filter && !interface.link.accepts(frame) {
        return None;
    }

    if interface.enable_crc_filter && frame.len() > 4 {
        let body_len = frame.len() - 4;
        let crc = check::crc32(&frame[.. body_len]);
        let trailer = &frame[body_len ..];
        let expected = [
            crc as u8,
            (crc >> 8) as u8,
            (crc >> 16) as u8,
            (crc >> 24) as u8,
        ];
        if trailer != expected {
            return None;
        }
        return Some(&frame[.. body_len]);
    }

    Some(frame)
}
