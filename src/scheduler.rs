//! Sleep/wake scheduler.
//!
//! After every cycle tick the node goes back to the lowest-power state the
//! current [`PowerMode`] allows:
//!
//! - **BoostOn**: the regulator is switched off and the MCU runs from the
//!   reservoir capacitor until the voltage detector fires. The detector
//!   interrupt switches the regulator back on; the scheduler then waits a
//!   short settle delay so the capacitor is full before the next tick.
//! - **WdtPoll**: the regulator stays on (at low cell voltage it may not
//!   restart reliably if duty-cycled) and the MCU sleeps a fixed timer
//!   period several times over.
//!
//! The order of the platform calls matters: the wake source is armed and
//! the regulator switched off before the wake interrupt is unmasked, and on
//! wake the interrupt is masked again before its flags are cleared.

use core::future::Future;

use crate::config::Timing;
use crate::controller::PowerMode;

/// What will end a sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "debug-mode", derive(defmt::Format))]
pub enum WakeSource {
    /// Supply voltage detector (regulator off while asleep)
    VoltageDetect,
    /// Timer expiry after `period_s` seconds (regulator stays on)
    Watchdog { period_s: u32 },
}

/// Clock of the wakeup timer that paces watchdog sleeps: the 32.768 kHz
/// crystal through a /16 prescaler.
pub const WAKEUP_TIMER_HZ: u32 = 2048;

/// Longest single watchdog sleep the 16-bit wakeup counter can time.
pub const MAX_WATCHDOG_PERIOD_S: u32 = (u16::MAX as u32 + 1) / WAKEUP_TIMER_HZ;

/// Wakeup counter reload value for a `period_s` watchdog sleep.
///
/// The counter fires after `reload + 1` ticks. Periods outside
/// `1..=MAX_WATCHDOG_PERIOD_S` are clamped.
pub const fn wakeup_reload(period_s: u32) -> u16 {
    let period_s = if period_s == 0 {
        1
    } else if period_s > MAX_WATCHDOG_PERIOD_S {
        MAX_WATCHDOG_PERIOD_S
    } else {
        period_s
    };

    (period_s * WAKEUP_TIMER_HZ - 1) as u16
}

/// Platform primitives the scheduler sequences.
///
/// Implementations do exactly what each method says and nothing more; the
/// ordering is the scheduler's job.
pub trait SleepHal {
    /// Turn the boost regulator on
    fn regulator_enable(&mut self);

    /// Turn the boost regulator off; the MCU runs from the capacitor
    fn regulator_disable(&mut self);

    /// Switch off peripherals not needed while asleep
    fn power_down_peripherals(&mut self);

    /// Restore what sampling and the radio need after a wake
    fn restore_peripherals(&mut self);

    /// Configure the wake source and clear any stale event
    fn arm_wake_source(&mut self, source: WakeSource);

    /// Select the sleep depth suitable for `source`
    fn enable_sleep(&mut self, source: WakeSource);

    /// Allow the wake interrupt to fire
    fn unmask_wake_source(&mut self, source: WakeSource);

    /// Suspend until `source` fires
    fn sleep(&mut self, source: WakeSource) -> impl Future<Output = ()>;

    /// Stop the wake interrupt from firing again
    fn mask_wake_source(&mut self, source: WakeSource);

    /// Clear pending flags of the wake source
    fn clear_wake_source(&mut self, source: WakeSource);

    /// Return to normal run mode
    fn disable_sleep(&mut self);

    /// Fixed wait while awake
    fn delay_ms(&mut self, ms: u32) -> impl Future<Output = ()>;
}

/// What one call to [`SleepScheduler::sleep`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "debug-mode", derive(defmt::Format))]
pub struct SleepReport {
    pub source: WakeSource,
    /// Number of sleeps entered
    pub sleeps: u8,
}

pub struct SleepScheduler {
    timing: Timing,
}

impl SleepScheduler {
    pub fn new(timing: Timing) -> Self {
        Self { timing }
    }

    /// Wake source used in `mode`.
    pub fn wake_source(&self, mode: PowerMode) -> WakeSource {
        match mode {
            PowerMode::BoostOn => WakeSource::VoltageDetect,
            PowerMode::WdtPoll => WakeSource::Watchdog {
                period_s: self.timing.watchdog_period_s,
            },
        }
    }

    /// Sleep once in the strategy for `mode`.
    ///
    /// Returns when the node is awake, the regulator is on and the
    /// capacitor has had its settle time.
    pub async fn sleep<H: SleepHal>(&self, hal: &mut H, mode: PowerMode) -> SleepReport {
        let source = self.wake_source(mode);

        hal.power_down_peripherals();

        let sleeps = match source {
            WakeSource::VoltageDetect => {
                hal.arm_wake_source(source);
                hal.enable_sleep(source);
                hal.regulator_disable();
                hal.unmask_wake_source(source);

                // The detector interrupt turns the regulator back on
                hal.sleep(source).await;

                Self::wake(hal, source);
                hal.restore_peripherals();
                hal.delay_ms(self.timing.vdetect_settle_ms).await;
                1
            }
            WakeSource::Watchdog { .. } => {
                let iterations = self.timing.watchdog_iterations;
                for _ in 0..iterations {
                    hal.arm_wake_source(source);
                    hal.enable_sleep(source);
                    hal.unmask_wake_source(source);

                    hal.sleep(source).await;

                    Self::wake(hal, source);
                }
                hal.restore_peripherals();
                iterations
            }
        };

        SleepReport { source, sleeps }
    }

    fn wake<H: SleepHal>(hal: &mut H, source: WakeSource) {
        hal.mask_wake_source(source);
        hal.clear_wake_source(source);
        hal.disable_sleep();
    }
}
