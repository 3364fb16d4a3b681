//! The consumed driver and PHY boundaries.

use Result;
use core::link::Link;

/// The four entry points a MAC driver exposes to the engine.
///
/// Synchronous drivers implement `rx` and return one frame per call.
/// Interrupt driven drivers leave `rx` unimplemented and copy frames into
/// the interface's lock-free queue from their receive interrupt instead.
pub trait Driver {
    /// Initializes the controller for the given link.
    fn init(&mut self, link: &Link) -> Result<()>;

    /// Hands one complete frame to the hardware. Returns the number of
    /// bytes queued; `Err(Error::Pending)` asks the engine to retry later
    /// (no free descriptor), `Err(Error::Device)` reports a permanent
    /// failure (oversized frame, dead controller).
    fn tx(&mut self, frame: &[u8]) -> Result<usize>;

    /// Copies one received frame into the buffer, if one is pending.
    /// Synchronous drivers only.
    fn rx(&mut self, buffer: &mut [u8]) -> Option<usize> {
        let _ = buffer;
        None
    }

    /// Reports the physical link state. Called on every poll; `tick` is
    /// true once per second, which is when most drivers re-read their PHY.
    fn poll(&mut self, tick: bool) -> bool;
}

/// Register level access to an attached PHY, shared by the vendor MAC
/// drivers and their link/speed/duplex negotiation helper. Consumed only;
/// nothing in the engine touches a PHY directly.
pub trait Phy {
    fn read_reg(&mut self, phy_addr: u8, reg: u8) -> u16;

    fn write_reg(&mut self, phy_addr: u8, reg: u8, val: u16);
}
