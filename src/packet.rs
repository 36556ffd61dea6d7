//! UKHASnet telemetry packet encoding.
//!
//! Packets are plain ASCII with no terminator on air:
//!
//! ```text
//! <hops><seqid>V<millivolts>T[-]<int>.<frac>[X<wake_freq>,<tx_power>,<mode>][<node id>]
//! ```
//!
//! For example `1aV3180T21.4[JH9]`, or with the diagnostic field
//! `1aV1350T19.2X5,10,0[JH9]`.

use core::fmt::{self, Write};

use heapless::String;

use crate::config::MAX_PACKET_LEN;
use crate::controller::{PowerMode, SequenceId};

/// Buffer a packet is composed into before it is handed to the radio.
pub type PacketBuffer = String<MAX_PACKET_LEN>;

/// Errors that can occur while encoding a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Packet would not fit the packet buffer
    Overflow,
}

/// Temperature in tenths of a degree Celsius.
///
/// Limited to ±999.9 °C so the encoded field never exceeds
/// seven characters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "debug-mode", derive(defmt::Format))]
pub struct Temperature(i16);

impl Temperature {
    pub const MAX_TENTHS: i16 = 9999;

    pub const fn from_tenths(tenths: i16) -> Self {
        if tenths > Self::MAX_TENTHS {
            Self(Self::MAX_TENTHS)
        } else if tenths < -Self::MAX_TENTHS {
            Self(-Self::MAX_TENTHS)
        } else {
            Self(tenths)
        }
    }

    /// Rounds a sensor reading to the nearest tenth of a degree.
    ///
    /// NaN reads as 0.0.
    pub fn from_celsius(celsius: f32) -> Self {
        if celsius.is_nan() {
            return Self(0);
        }

        let scaled = celsius * 10.0;
        let rounded = if scaled >= 0.0 {
            scaled + 0.5
        } else {
            scaled - 0.5
        };

        // `as` saturates at the i32 range, so huge readings clamp cleanly
        let tenths = (rounded as i32).clamp(-(Self::MAX_TENTHS as i32), Self::MAX_TENTHS as i32);
        Self(tenths as i16)
    }

    pub const fn tenths(&self) -> i16 {
        self.0
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{}", sign, abs / 10, abs % 10)
    }
}

/// Contents of the optional `X` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostics {
    pub wake_freq: u8,
    pub tx_power_dbm: i8,
    pub power_mode: PowerMode,
}

/// One telemetry report, ready to be encoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry<'a> {
    pub hops: u8,
    pub sequence_id: SequenceId,
    pub millivolts: u16,
    pub temperature: Temperature,
    pub diagnostics: Option<Diagnostics>,
    pub node_id: &'a str,
}

impl Telemetry<'_> {
    /// Compose the packet into `buf`, replacing its previous contents.
    ///
    /// Field order is fixed. On overflow `buf` holds a truncated packet
    /// that must not be sent.
    pub fn encode(&self, buf: &mut PacketBuffer) -> Result<(), PacketError> {
        buf.clear();
        self.write_fields(buf).map_err(|_| PacketError::Overflow)
    }

    fn write_fields(&self, buf: &mut PacketBuffer) -> fmt::Result {
        write!(
            buf,
            "{}{}V{}T{}",
            self.hops, self.sequence_id, self.millivolts, self.temperature
        )?;

        if let Some(diag) = &self.diagnostics {
            write!(
                buf,
                "X{},{},{}",
                diag.wake_freq,
                diag.tx_power_dbm,
                diag.power_mode.ordinal()
            )?;
        }

        write!(buf, "[{}]", self.node_id)
    }
}
