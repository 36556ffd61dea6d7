//! Power-mode controller.
//!
//! Runs once per wake. Most wakes only count; every `wake_freq`-th wake is
//! a transmit cycle that samples the battery and temperature, sends one
//! packet and re-evaluates the power mode from the fresh voltage reading.
//!
//! # Hysteresis
//!
//! ```text
//!               mv < entry
//!   BoostOn ──────────────────▶ WdtPoll
//!      ▲                           │
//!      └───────────────────────────┘
//!            mv > entry + hysteresis
//! ```
//!
//! Voltages between the two thresholds leave the mode unchanged, so ripple
//! around a single threshold cannot make the node chatter between sleep
//! strategies. The mode is only re-evaluated on transmit cycles.

use core::fmt;

use crate::config::{NodeConfig, PowerPolicy, Thresholds};
use crate::packet::{Diagnostics, PacketBuffer, Telemetry, Temperature};
use crate::radio::Radio;
use crate::sensors::{BatteryMonitor, TemperatureSensor};

/// Sleep strategy the node is currently committed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "debug-mode", derive(defmt::Format))]
#[repr(u8)]
pub enum PowerMode {
    /// Regulator duty-cycled, woken by the voltage detector
    #[default]
    BoostOn = 0,
    /// Regulator left on, woken by repeated timer sleeps
    WdtPoll = 1,
}

impl PowerMode {
    /// Value carried in the packet diagnostic field.
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Mode after a transmit cycle that sampled `millivolts`.
    pub fn next(self, millivolts: u16, thresholds: &Thresholds) -> Self {
        match self {
            PowerMode::BoostOn if millivolts < thresholds.wdt_entry_mv => PowerMode::WdtPoll,
            PowerMode::WdtPoll if millivolts > thresholds.wdt_exit_mv() => PowerMode::BoostOn,
            mode => mode,
        }
    }
}

/// Packet sequence letter.
///
/// `'a'` is only ever used by the first packet after power-on, so a
/// receiver can spot resets; after `'z'` the sequence continues at `'b'`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "debug-mode", derive(defmt::Format))]
pub struct SequenceId(u8);

impl SequenceId {
    pub const FIRST: Self = Self(b'a');

    pub const fn as_char(self) -> char {
        self.0 as char
    }

    pub const fn next(self) -> Self {
        if self.0 == b'z' {
            Self(b'b')
        } else {
            Self(self.0 + 1)
        }
    }
}

impl Default for SequenceId {
    fn default() -> Self {
        Self::FIRST
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// What a transmit cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "debug-mode", derive(defmt::Format))]
pub struct TxReport {
    pub sequence_id: SequenceId,
    pub millivolts: u16,
    pub temperature: Temperature,
    pub mode_before: PowerMode,
    pub mode_after: PowerMode,
    /// False if encoding failed or the radio reported an error
    pub sent: bool,
}

/// Outcome of one cycle tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "debug-mode", derive(defmt::Format))]
pub enum Tick {
    /// Counting towards the next transmission
    Idle { wakes: u8 },
    /// Transmit cycle
    Transmitted(TxReport),
}

impl Tick {
    pub fn transmitted(&self) -> bool {
        matches!(self, Tick::Transmitted(_))
    }
}

/// Owns the wake counter, sequence id, power mode and packet buffer.
///
/// All state is mutated from the main sequence only, through `&mut self`.
pub struct PowerModeController {
    config: NodeConfig,
    /// Wakes since the last transmission, `1..=wake_freq`
    wakes: u8,
    sequence_id: SequenceId,
    power_mode: PowerMode,
    packet: PacketBuffer,
}

impl PowerModeController {
    /// `config` must pass [`NodeConfig::validate`]; with `wake_freq == 0`
    /// the wake counter would leave its `1..=wake_freq` range.
    pub fn new(config: NodeConfig) -> Self {
        debug_assert!(config.validate().is_ok(), "invalid NodeConfig");

        let wakes = if config.transmit_on_boot {
            config.wake_freq
        } else {
            1
        };

        Self {
            wakes,
            sequence_id: SequenceId::FIRST,
            power_mode: config.policy.initial_mode(),
            packet: PacketBuffer::new(),
            config,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn power_mode(&self) -> PowerMode {
        self.power_mode
    }

    pub fn wakes(&self) -> u8 {
        self.wakes
    }

    /// Sequence id the next packet will carry.
    pub fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }

    /// Most recently composed packet (empty before the first transmit cycle).
    pub fn last_packet(&self) -> &str {
        self.packet.as_str()
    }

    /// Run one cycle tick.
    ///
    /// Sending is fire-and-forget: a radio error is reported in the
    /// returned [`TxReport`] but the cycle completes exactly as if the
    /// packet had gone out. The next transmit cycle is the retry.
    pub async fn tick<S, R>(&mut self, sensors: &mut S, radio: &mut R) -> Tick
    where
        S: BatteryMonitor + TemperatureSensor,
        R: Radio,
    {
        if self.wakes < self.config.wake_freq {
            self.wakes += 1;
            return Tick::Idle { wakes: self.wakes };
        }

        let millivolts = sensors.sample_millivolts().await;
        let temperature = Temperature::from_celsius(sensors.sample_celsius().await);

        let sequence_id = self.sequence_id;
        let mode_before = self.power_mode;

        let telemetry = Telemetry {
            hops: self.config.hops,
            sequence_id,
            millivolts,
            temperature,
            diagnostics: self.config.diagnostics.then_some(Diagnostics {
                wake_freq: self.config.wake_freq,
                tx_power_dbm: self.config.tx_power_dbm,
                power_mode: mode_before,
            }),
            node_id: self.config.node_id,
        };

        let sent = match telemetry.encode(&mut self.packet) {
            Ok(()) => radio
                .send(self.packet.as_bytes(), self.config.tx_power_dbm)
                .is_ok(),
            Err(_) => {
                self.packet.clear();
                false
            }
        };

        #[cfg(feature = "debug-mode")]
        {
            if sent {
                defmt::info!("Sent {=str}", self.packet.as_str());
            } else {
                defmt::warn!("Packet {} not sent", sequence_id);
            }
        }

        self.wakes = 1;
        self.sequence_id = sequence_id.next();

        if let PowerPolicy::Hysteresis(thresholds) = &self.config.policy {
            self.power_mode = mode_before.next(millivolts, thresholds);
        }

        #[cfg(feature = "debug-mode")]
        {
            if self.power_mode != mode_before {
                defmt::info!("Power mode {} -> {} at {} mV", mode_before, self.power_mode, millivolts);
            }
        }

        Tick::Transmitted(TxReport {
            sequence_id,
            millivolts,
            temperature,
            mode_before,
            mode_after: self.power_mode,
            sent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::mock::MockRadio;
    use crate::sensors::mock::MockSensors;
    use embassy_futures::block_on;

    const THRESHOLDS: Thresholds = Thresholds::new(1100, 100);

    fn config(wake_freq: u8) -> NodeConfig {
        NodeConfig {
            node_id: "JH9",
            wake_freq,
            tx_power_dbm: 10,
            policy: PowerPolicy::Hysteresis(THRESHOLDS),
            ..NodeConfig::DEFAULT
        }
    }

    #[test]
    fn test_hysteresis_enters_watchdog_strictly_below_entry() {
        assert_eq!(PowerMode::BoostOn.next(1099, &THRESHOLDS), PowerMode::WdtPoll);
        assert_eq!(PowerMode::BoostOn.next(1100, &THRESHOLDS), PowerMode::BoostOn);
        assert_eq!(PowerMode::BoostOn.next(3000, &THRESHOLDS), PowerMode::BoostOn);
    }

    #[test]
    fn test_hysteresis_exits_watchdog_strictly_above_exit() {
        assert_eq!(PowerMode::WdtPoll.next(1201, &THRESHOLDS), PowerMode::BoostOn);
        assert_eq!(PowerMode::WdtPoll.next(1200, &THRESHOLDS), PowerMode::WdtPoll);
        assert_eq!(PowerMode::WdtPoll.next(900, &THRESHOLDS), PowerMode::WdtPoll);
    }

    #[test]
    fn test_dead_band_is_a_no_op() {
        for mv in 1100..=1200 {
            assert_eq!(PowerMode::BoostOn.next(mv, &THRESHOLDS), PowerMode::BoostOn);
            assert_eq!(PowerMode::WdtPoll.next(mv, &THRESHOLDS), PowerMode::WdtPoll);
        }
    }

    #[test]
    fn test_sequence_id_wraps_to_b() {
        let mut id = SequenceId::FIRST;
        let mut seen = Vec::new();
        for _ in 0..60 {
            seen.push(id.as_char());
            id = id.next();
        }

        assert_eq!(seen[0], 'a');
        assert_eq!(seen[25], 'z');
        assert_eq!(seen[26], 'b');
        assert!(!seen[1..].contains(&'a'));
        for pair in seen.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_idle_ticks_only_count() {
        let mut controller = PowerModeController::new(config(5));
        let mut sensors = MockSensors::new(3180, 21.4);
        let mut radio = MockRadio::new();

        block_on(async {
            for expected in 2..=5 {
                let tick = controller.tick(&mut sensors, &mut radio).await;
                assert_eq!(tick, Tick::Idle { wakes: expected });
                assert_eq!(controller.wakes(), expected);
            }
        });

        assert_eq!(sensors.battery_samples(), 0);
        assert_eq!(sensors.temperature_samples(), 0);
        assert!(radio.sent().is_empty());
        assert_eq!(controller.last_packet(), "");
    }

    #[test]
    fn test_transmit_cycle_samples_sends_and_resets() {
        let mut controller = PowerModeController::new(config(1));
        let mut sensors = MockSensors::new(3180, 21.4);
        let mut radio = MockRadio::new();

        let tick = block_on(controller.tick(&mut sensors, &mut radio));

        assert_eq!(
            tick,
            Tick::Transmitted(TxReport {
                sequence_id: SequenceId::FIRST,
                millivolts: 3180,
                temperature: Temperature::from_tenths(214),
                mode_before: PowerMode::BoostOn,
                mode_after: PowerMode::BoostOn,
                sent: true,
            })
        );
        assert_eq!(sensors.battery_samples(), 1);
        assert_eq!(sensors.temperature_samples(), 1);
        assert_eq!(radio.sent(), &[(b"1aV3180T21.4[JH9]".to_vec(), 10)]);
        assert_eq!(controller.wakes(), 1);
        assert_eq!(controller.sequence_id().as_char(), 'b');
    }

    #[test]
    fn test_twelve_ticks_transmit_on_five_and_ten() {
        let mut controller = PowerModeController::new(config(5));
        let mut sensors = MockSensors::new(3180, 21.4);
        let mut radio = MockRadio::new();

        let transmitted: Vec<usize> = block_on(async {
            let mut ticks = Vec::new();
            for n in 1..=12 {
                if controller.tick(&mut sensors, &mut radio).await.transmitted() {
                    ticks.push(n);
                }
            }
            ticks
        });

        assert_eq!(transmitted, vec![5, 10]);
        assert_eq!(radio.sent().len(), 2);
        assert_eq!(sensors.battery_samples(), 2);
    }

    #[test]
    fn test_low_voltage_latches_watchdog_mode() {
        let mut controller = PowerModeController::new(config(1));
        let mut sensors = MockSensors::new(THRESHOLDS.wdt_entry_mv - 1, 10.0);
        let mut radio = MockRadio::new();

        block_on(async {
            for _ in 0..10 {
                controller.tick(&mut sensors, &mut radio).await;
                assert_eq!(controller.power_mode(), PowerMode::WdtPoll);
            }
        });
    }

    #[test]
    fn test_recovery_needs_voltage_above_exit() {
        let mut controller = PowerModeController::new(config(1));
        let mut sensors = MockSensors::new(1000, 10.0);
        let mut radio = MockRadio::new();

        block_on(async {
            controller.tick(&mut sensors, &mut radio).await;
            assert_eq!(controller.power_mode(), PowerMode::WdtPoll);

            sensors.set_millivolts(1150);
            controller.tick(&mut sensors, &mut radio).await;
            assert_eq!(controller.power_mode(), PowerMode::WdtPoll);

            sensors.set_millivolts(1250);
            controller.tick(&mut sensors, &mut radio).await;
            assert_eq!(controller.power_mode(), PowerMode::BoostOn);
        });
    }

    #[test]
    fn test_mode_only_changes_on_transmit_cycles() {
        let mut controller = PowerModeController::new(config(3));
        let mut sensors = MockSensors::new(900, 10.0);
        let mut radio = MockRadio::new();

        block_on(async {
            controller.tick(&mut sensors, &mut radio).await;
            controller.tick(&mut sensors, &mut radio).await;
            assert_eq!(controller.power_mode(), PowerMode::BoostOn);

            controller.tick(&mut sensors, &mut radio).await;
            assert_eq!(controller.power_mode(), PowerMode::WdtPoll);
        });
    }

    #[test]
    fn test_diagnostics_carry_mode_at_send_time() {
        let mut controller = PowerModeController::new(NodeConfig {
            diagnostics: true,
            ..config(5)
        });
        let mut sensors = MockSensors::new(1050, 19.2);
        let mut radio = MockRadio::new();

        block_on(async {
            for _ in 0..10 {
                controller.tick(&mut sensors, &mut radio).await;
            }
        });

        let sent = radio.sent();
        assert_eq!(sent[0].0, b"1aV1050T19.2X5,10,0[JH9]".to_vec());
        assert_eq!(sent[1].0, b"1bV1050T19.2X5,10,1[JH9]".to_vec());
    }

    #[test]
    fn test_failed_send_still_advances() {
        let mut controller = PowerModeController::new(config(1));
        let mut sensors = MockSensors::new(1000, 10.0);
        let mut radio = MockRadio::new();
        radio.fail_next_send();

        let tick = block_on(controller.tick(&mut sensors, &mut radio));

        match tick {
            Tick::Transmitted(report) => {
                assert!(!report.sent);
                assert_eq!(report.mode_after, PowerMode::WdtPoll);
            }
            Tick::Idle { .. } => panic!("expected a transmit cycle"),
        }
        assert_eq!(controller.wakes(), 1);
        assert_eq!(controller.sequence_id().as_char(), 'b');
        assert!(radio.sent().is_empty());
    }

    #[test]
    fn test_fixed_policy_never_changes_mode() {
        let mut controller = PowerModeController::new(NodeConfig {
            policy: PowerPolicy::Fixed(PowerMode::WdtPoll),
            ..config(1)
        });
        let mut sensors = MockSensors::new(4000, 10.0);
        let mut radio = MockRadio::new();

        block_on(async {
            for _ in 0..3 {
                controller.tick(&mut sensors, &mut radio).await;
                assert_eq!(controller.power_mode(), PowerMode::WdtPoll);
            }
        });
    }

    #[test]
    #[should_panic(expected = "invalid NodeConfig")]
    fn test_new_rejects_zero_wake_freq() {
        PowerModeController::new(config(0));
    }

    #[test]
    fn test_transmit_on_boot_sends_a_first() {
        let mut controller = PowerModeController::new(NodeConfig {
            transmit_on_boot: true,
            ..config(30)
        });
        let mut sensors = MockSensors::new(3180, 21.4);
        let mut radio = MockRadio::new();

        let tick = block_on(controller.tick(&mut sensors, &mut radio));
        assert!(tick.transmitted());
        assert_eq!(controller.last_packet(), "1aV3180T21.4[JH9]");
    }
}
