//! Radio contract used by the wake cycle.
//!
//! The node only ever transmits. Calls are blocking: `send` returns once
//! the packet has left the antenna (or the driver gave up).

pub mod rfm69;

pub use rfm69::{PaVariant, Rfm69, Rfm69Error};

/// Transmit-only radio interface
///
/// Lets the controller work with the RFM69 driver or a mock for testing.
pub trait Radio {
    type Error;

    /// Bring the transceiver up; fails if it does not answer
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Put the transceiver into its lowest-power state
    fn set_sleep_mode(&mut self) -> Result<(), Self::Error>;

    /// Transmit `data` at `power_dbm`
    ///
    /// The transceiver is left in whatever mode it was in before the call.
    fn send(&mut self, data: &[u8], power_dbm: i8) -> Result<(), Self::Error>;
}
