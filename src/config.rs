//! Build-time node configuration.
//!
//! A firmware image carries exactly one [`NodeConfig`]. Nothing is read at
//! runtime and nothing is persisted, so a node comes back from a brown-out
//! in exactly the state it booted in the first time.
//!
//! [`NodeConfig::validate`] is a `const fn` so the firmware can refuse to
//! compile with a configuration whose worst-case packet would not fit the
//! packet buffer.

use crate::controller::PowerMode;
use crate::scheduler::MAX_WATCHDOG_PERIOD_S;

/// Size of the packet buffer in bytes, including the terminator slot.
pub const PACKET_CAPACITY: usize = 64;

/// Longest packet the encoder may produce.
pub const MAX_PACKET_LEN: usize = PACKET_CAPACITY - 1;

/// `V` followed by at most five digits (u16 millivolts).
const VOLTAGE_FIELD_MAX: usize = 1 + 5;

/// `T`, sign, three integer digits, decimal point and one fraction digit.
const TEMPERATURE_FIELD_MAX: usize = 1 + 1 + 3 + 1 + 1;

/// Voltage thresholds for switching between sleep strategies.
///
/// The node drops to watchdog polling when a sample is strictly below
/// `wdt_entry_mv` and only returns to boost-on sleep once a sample is
/// strictly above `wdt_entry_mv + hysteresis_mv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Enter watchdog polling below this voltage
    pub wdt_entry_mv: u16,
    /// Width of the dead-band above the entry threshold
    pub hysteresis_mv: u16,
}

impl Thresholds {
    pub const fn new(wdt_entry_mv: u16, hysteresis_mv: u16) -> Self {
        Self {
            wdt_entry_mv,
            hysteresis_mv,
        }
    }

    /// Voltage above which the node returns to boost-on sleep.
    pub const fn wdt_exit_mv(&self) -> u16 {
        self.wdt_entry_mv.saturating_add(self.hysteresis_mv)
    }
}

/// Which sleep strategies the node may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerPolicy {
    /// Both strategies, selected from the battery voltage with hysteresis
    Hysteresis(Thresholds),
    /// A single strategy for the lifetime of the node
    Fixed(PowerMode),
}

impl PowerPolicy {
    /// Power mode at power-on.
    ///
    /// Under hysteresis the node assumes a healthy battery: there is no
    /// voltage sample yet, and the first transmit cycle corrects the guess.
    pub const fn initial_mode(&self) -> PowerMode {
        match self {
            PowerPolicy::Hysteresis(_) => PowerMode::BoostOn,
            PowerPolicy::Fixed(mode) => *mode,
        }
    }
}

/// Fixed delays and sleep lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Capacitor charge time before the regulator is first enabled
    pub boot_charge_ms: u32,
    /// Recharge time after a transmission, while the PA winds down
    pub post_tx_ms: u32,
    /// Recharge time after a voltage-detect wake
    pub vdetect_settle_ms: u32,
    /// Length of one watchdog sleep
    pub watchdog_period_s: u32,
    /// Watchdog sleeps per wake (8 x 8 s is roughly a minute)
    pub watchdog_iterations: u8,
}

impl Timing {
    pub const DEFAULT: Self = Self {
        boot_charge_ms: 1000,
        post_tx_ms: 10,
        vdetect_settle_ms: 50,
        watchdog_period_s: 8,
        watchdog_iterations: 8,
    };
}

impl Default for Timing {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Configuration errors reported by [`NodeConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Node id is empty
    EmptyNodeId,
    /// Node id contains a bracket, a space or a non-printable byte
    InvalidNodeId,
    /// Wake frequency must be at least one
    ZeroWakeFreq,
    /// Watchdog sleep must iterate at least once
    ZeroWatchdogIterations,
    /// Watchdog period is zero or longer than the wakeup timer can count
    WatchdogPeriodOutOfRange { period_s: u32 },
    /// Worst-case packet does not fit the packet buffer
    PacketTooLong { worst_case: usize },
}

/// Everything that distinguishes one node build from another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    /// Node name carried in brackets at the end of every packet
    pub node_id: &'static str,
    /// Hop count advertised in the packet
    pub hops: u8,
    /// Transmit on every `wake_freq`-th wake
    pub wake_freq: u8,
    /// Radio output power
    pub tx_power_dbm: i8,
    /// Sleep strategy selection
    pub policy: PowerPolicy,
    /// Append the `X<wake_freq>,<tx_power>,<mode>` diagnostic field
    pub diagnostics: bool,
    /// Transmit on the first wake after power-on instead of after `wake_freq` wakes
    pub transmit_on_boot: bool,
    pub timing: Timing,
}

impl NodeConfig {
    pub const DEFAULT: Self = Self {
        node_id: "JH1",
        hops: 1,
        wake_freq: 30,
        tx_power_dbm: 5,
        policy: PowerPolicy::Hysteresis(Thresholds::new(1100, 100)),
        diagnostics: false,
        transmit_on_boot: false,
        timing: Timing::DEFAULT,
    };

    /// Length of the longest packet this configuration can produce.
    pub const fn max_packet_len(&self) -> usize {
        let mut len = decimal_digits(self.hops as u32)
            + 1 // sequence id
            + VOLTAGE_FIELD_MAX
            + TEMPERATURE_FIELD_MAX
            + 2 // brackets
            + self.node_id.len();

        if self.diagnostics {
            // X<wake_freq>,<tx_power>,<mode>
            len += 1 + decimal_digits(self.wake_freq as u32) + 1 + signed_digits(self.tx_power_dbm) + 1 + 1;
        }

        len
    }

    pub const fn validate(&self) -> Result<(), ConfigError> {
        let id = self.node_id.as_bytes();
        if id.is_empty() {
            return Err(ConfigError::EmptyNodeId);
        }

        let mut i = 0;
        while i < id.len() {
            let b = id[i];
            if b <= b' ' || b > b'~' || b == b'[' || b == b']' {
                return Err(ConfigError::InvalidNodeId);
            }
            i += 1;
        }

        if self.wake_freq == 0 {
            return Err(ConfigError::ZeroWakeFreq);
        }

        if self.timing.watchdog_iterations == 0 {
            return Err(ConfigError::ZeroWatchdogIterations);
        }

        let period_s = self.timing.watchdog_period_s;
        if period_s == 0 || period_s > MAX_WATCHDOG_PERIOD_S {
            return Err(ConfigError::WatchdogPeriodOutOfRange { period_s });
        }

        let worst_case = self.max_packet_len();
        if worst_case > MAX_PACKET_LEN {
            return Err(ConfigError::PacketTooLong { worst_case });
        }

        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const fn decimal_digits(mut n: u32) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

const fn signed_digits(n: i8) -> usize {
    let sign = if n < 0 { 1 } else { 0 };
    sign + decimal_digits(n.unsigned_abs() as u32)
}
