#[cfg(test)]
#[macro_use]
extern crate assert_matches;
extern crate byteorder;
#[macro_use]
extern crate log;
extern crate rand;

pub mod core;

#[derive(Debug, PartialEq)]
pub enum Error {
    /// Indicates an error where a buffer, queue, or backlog is full or empty.
    Exhausted,
    /// Indicates an error where a frame or packet is malformed or truncated.
    Malformed,
    /// Indicates an error where a checksum is invalid.
    Checksum,
    /// Indicates that a frame or packet is not addressed to this interface.
    Ignored,
    /// Indicates an error where a port or address is already bound.
    InUse,
    /// Indicates an operation that cannot complete yet and should be retried
    /// on a later poll (e.g. link address still resolving, driver busy).
    Pending,
    /// Indicates that no usable route or gateway exists for a destination.
    NoRoute,
    /// Indicates a permanent failure reported by the driver.
    Device,
}

pub type Result<T> = std::result::Result<T, Error>;
