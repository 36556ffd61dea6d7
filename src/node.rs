//! The node: boot sequence and the endless wake cycle.
//!
//! A [`Node`] owns the controller, the scheduler and every collaborator.
//! [`Node::run`] never returns; [`Node::cycle`] is one turn of its loop and
//! is what the tests drive.

use crate::config::NodeConfig;
use crate::controller::{PowerModeController, Tick};
use crate::radio::Radio;
use crate::scheduler::{SleepHal, SleepReport, SleepScheduler};
use crate::sensors::{BatteryMonitor, TemperatureSensor};

/// What one wake cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "debug-mode", derive(defmt::Format))]
pub struct CycleReport {
    pub tick: Tick,
    pub sleep: SleepReport,
}

pub struct Node<R, S, H> {
    controller: PowerModeController,
    scheduler: SleepScheduler,
    radio: R,
    sensors: S,
    hal: H,
}

impl<R, S, H> Node<R, S, H>
where
    R: Radio,
    S: BatteryMonitor + TemperatureSensor,
    H: SleepHal,
{
    pub fn new(config: NodeConfig, radio: R, sensors: S, hal: H) -> Self {
        Self {
            controller: PowerModeController::new(config),
            scheduler: SleepScheduler::new(config.timing),
            radio,
            sensors,
            hal,
        }
    }

    pub fn controller(&self) -> &PowerModeController {
        &self.controller
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn sensors(&self) -> &S {
        &self.sensors
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// Bring the node up from power-on.
    ///
    /// Waits for the reservoir capacitor, enables the regulator and retries
    /// radio init until the transceiver answers. There is no fallback if it
    /// never does. Returns the number of init attempts.
    pub async fn boot(&mut self) -> u32 {
        let timing = self.controller.config().timing;

        self.hal.delay_ms(timing.boot_charge_ms).await;
        self.hal.regulator_enable();

        let mut attempts = 1u32;
        while self.radio.init().is_err() {
            attempts = attempts.saturating_add(1);
        }

        #[cfg(feature = "debug-mode")]
        defmt::info!("Radio up after {} attempt(s)", attempts);

        if self.radio.set_sleep_mode().is_err() {
            #[cfg(feature = "debug-mode")]
            defmt::warn!("Radio did not enter sleep mode");
        }

        attempts
    }

    /// One wake: tick, let the capacitor recover from a transmission,
    /// then sleep in the strategy the tick left selected.
    pub async fn cycle(&mut self) -> CycleReport {
        let tick = self.controller.tick(&mut self.sensors, &mut self.radio).await;

        if tick.transmitted() {
            // The PA keeps drawing current for a moment after send() returns
            let post_tx_ms = self.controller.config().timing.post_tx_ms;
            self.hal.delay_ms(post_tx_ms).await;
        }

        let sleep = self
            .scheduler
            .sleep(&mut self.hal, self.controller.power_mode())
            .await;

        CycleReport { tick, sleep }
    }

    /// Boot, then cycle until the hardware is reset.
    pub async fn run(mut self) -> ! {
        self.boot().await;

        loop {
            let _report = self.cycle().await;

            #[cfg(feature = "debug-mode")]
            defmt::debug!("{}", _report);
        }
    }
}
