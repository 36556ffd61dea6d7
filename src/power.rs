//! Regulator control and sleep primitives for the node board.
//!
//! # Hardware Design
//!
//! VDD is fed by a boost regulator running from a single AA/AAA cell, with
//! a reservoir capacitor on its output. The regulator's enable input
//! (REG_EN, PA3) has an external pull-up:
//! - PA3 floating (input): regulator ON
//! - PA3 driven low: regulator OFF, the MCU runs from the capacitor
//!
//! # Wake Sources
//!
//! Both sleep strategies put the MCU in STOP mode. Exactly one EXTI line is
//! armed per sleep:
//!
//! - **PVD (EXTI line 16)**: PVDO rises when VDD falls below the threshold
//!   (2.7V). The interrupt handler floats REG_EN so the regulator restarts
//!   and recharges the capacitor, then signals the node task.
//! - **RTC wakeup timer (EXTI line 20)**: clocked from the 32.768 kHz LSE
//!   divided by 16, which keeps running in STOP. It paces the watchdog
//!   sleeps while the regulator stays on.
//!
//! The embassy time driver does not run in STOP, so no sleep here is timed
//! with `embassy_time`.

use cortex_m::peripheral::NVIC;
use embassy_stm32::gpio::{Flex, Pull, Speed};
use embassy_stm32::pac;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::Timer;
use pac::interrupt;
use ukhasnet_node::scheduler::{SleepHal, WakeSource, wakeup_reload};

/// EXTI line number for PVD interrupt (fixed at line 16 on STM32)
const PVD_EXTI_LINE: usize = 16;

/// EXTI line number for the RTC wakeup timer (line 20 on STM32L0)
const RTC_WAKEUP_EXTI_LINE: usize = 20;

/// IMR register index for EXTI lines 16 and 20 (lines 0-31 are in IMR1)
const IMR1_REG_IDX: usize = 0;

/// GPIOA pin number of REG_EN
const REG_EN_PIN: usize = 3;

/// Signals the node task that the voltage detector fired.
static VDETECT_SIGNAL: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Signals the node task that the wakeup timer expired.
static WAKEUP_TIMER_SIGNAL: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Boost regulator enable control.
pub struct Regulator {
    /// REG_EN (PA3), output latch held low
    en: Flex<'static>,
}

impl Regulator {
    /// Takes the enable pin and leaves the regulator running.
    pub fn new(mut en: Flex<'static>) -> Self {
        en.set_low();
        en.set_as_input(Pull::None);
        Self { en }
    }

    /// Float REG_EN; the external pull-up turns the regulator on.
    pub fn enable(&mut self) {
        self.en.set_as_input(Pull::None);
    }

    /// Drive REG_EN low.
    pub fn disable(&mut self) {
        self.en.set_as_output(Speed::Low);
    }
}

/// Floats REG_EN from interrupt context, where the `Flex` is not reachable.
fn enable_regulator_raw() {
    pac::GPIOA
        .moder()
        .modify(|w| w.set_moder(REG_EN_PIN, pac::gpio::vals::Moder::INPUT));
}

/// EXTI line and NVIC interrupt of a wake source.
fn wake_line(source: WakeSource) -> (usize, pac::Interrupt) {
    match source {
        WakeSource::VoltageDetect => (PVD_EXTI_LINE, embassy_stm32::interrupt::PVD),
        WakeSource::Watchdog { .. } => (RTC_WAKEUP_EXTI_LINE, embassy_stm32::interrupt::RTC),
    }
}

/// Runs `f` with the RTC write protection lifted.
fn with_rtc_unlocked(f: impl FnOnce(pac::rtc::Rtc)) {
    let rtc = pac::RTC;
    rtc.wpr().write(|w| w.set_key(0xCA));
    rtc.wpr().write(|w| w.set_key(0x53));
    f(rtc);
    rtc.wpr().write(|w| w.set_key(0xFF));
}

/// PVD interrupt handler (EXTI line 16).
///
/// Triggered when VDD sags below the PVD threshold while the regulator is
/// off. Clears the interrupt flag, turns the regulator back on and wakes
/// the node task.
///
/// # Safety
///
/// This interrupt handler accesses PAC registers directly.
#[interrupt]
fn PVD() {
    let exti = pac::EXTI;

    // Clear pending interrupt on EXTI line 16
    exti.pr(IMR1_REG_IDX)
        .modify(|w| w.set_line(PVD_EXTI_LINE, true));

    enable_regulator_raw();

    VDETECT_SIGNAL.signal(());
}

/// RTC interrupt handler (wakeup timer on EXTI line 20).
#[interrupt]
fn RTC() {
    pac::RTC.isr().modify(|w| w.set_wutf(false));
    pac::EXTI
        .pr(IMR1_REG_IDX)
        .modify(|w| w.set_line(RTC_WAKEUP_EXTI_LINE, true));

    WAKEUP_TIMER_SIGNAL.signal(());
}

/// Configures the Programmable Voltage Detector (PVD).
///
/// Sets the PVD threshold and enables the detector. The EXTI line and the
/// NVIC are left alone: they are armed and unmasked around each sleep.
///
/// # Configuration
///
/// - PVD threshold: 2.7V (adjustable via `Pls` enum)
pub fn setup_pvd() {
    // The PAC must be used to configure the PVD
    let pwr = pac::PWR;

    // Enable the PWR clock
    pac::RCC.apb1enr().modify(|w| w.set_pwren(true));

    // Configure PVD level (2.7V threshold)
    pwr.cr().modify(|w| w.set_pls(pac::pwr::vals::Pls::V2_7));
    pwr.cr().modify(|w| w.set_pvde(true));
}

/// Enables the RTC so its wakeup timer can pace watchdog sleeps.
///
/// The RTC clock source (LSE) is selected by the RCC configuration. Only
/// the wakeup timer is used; the calendar is never initialised.
pub fn setup_rtc_wakeup() {
    // RTCEN lives in the backup domain
    pac::PWR.cr().modify(|w| w.set_dbp(true));
    pac::RCC.csr().modify(|w| w.set_rtcen(true));

    with_rtc_unlocked(|rtc| {
        rtc.cr().modify(|w| {
            w.set_wute(false);
            w.set_wutie(false);
        });
    });
}

/// [`SleepHal`] for the STM32L031.
///
/// Both strategies sleep in STOP mode. Voltage-detect sleeps wake on the
/// PVD, watchdog sleeps on the RTC wakeup timer.
pub struct BoardSleep {
    regulator: Regulator,
}

impl BoardSleep {
    pub fn new(regulator: Regulator) -> Self {
        Self { regulator }
    }
}

impl SleepHal for BoardSleep {
    fn regulator_enable(&mut self) {
        self.regulator.enable();
    }

    fn regulator_disable(&mut self) {
        self.regulator.disable();
    }

    fn power_down_peripherals(&mut self) {
        pac::RCC.apb2enr().modify(|w| {
            w.set_adcen(false);
            w.set_spi1en(false);
        });
    }

    fn restore_peripherals(&mut self) {
        pac::RCC.apb2enr().modify(|w| {
            w.set_adcen(true);
            w.set_spi1en(true);
        });
    }

    fn arm_wake_source(&mut self, source: WakeSource) {
        let (line, _) = wake_line(source);
        let exti = pac::EXTI;

        match source {
            WakeSource::VoltageDetect => VDETECT_SIGNAL.reset(),
            WakeSource::Watchdog { period_s } => {
                with_rtc_unlocked(|rtc| {
                    rtc.cr().modify(|w| w.set_wute(false));
                    while !rtc.isr().read().wutwf() {}

                    rtc.cr()
                        .modify(|w| w.set_wucksel(pac::rtc::vals::Wucksel::DIV16));
                    rtc.wutr().write(|w| w.set_wut(wakeup_reload(period_s)));
                    rtc.isr().modify(|w| w.set_wutf(false));
                    rtc.cr().modify(|w| {
                        w.set_wutie(true);
                        w.set_wute(true);
                    });
                });
                WAKEUP_TIMER_SIGNAL.reset();
            }
        }

        // Rising edge only: PVDO going high, or the wakeup flag being set
        exti.rtsr(IMR1_REG_IDX).modify(|w| w.set_line(line, true));
        exti.ftsr(IMR1_REG_IDX).modify(|w| w.set_line(line, false));
        exti.pr(IMR1_REG_IDX).modify(|w| w.set_line(line, true));
        exti.imr(IMR1_REG_IDX).modify(|w| w.set_line(line, true));
    }

    fn enable_sleep(&mut self, _source: WakeSource) {
        // SAFETY: SCB is only touched from the node task
        let mut cp = unsafe { cortex_m::Peripherals::steal() };
        cp.SCB.set_sleepdeep();
    }

    fn unmask_wake_source(&mut self, source: WakeSource) {
        let (_, irq) = wake_line(source);
        unsafe {
            NVIC::unmask(irq);
        };
    }

    async fn sleep(&mut self, source: WakeSource) {
        match source {
            WakeSource::VoltageDetect => {
                // An edge that happened before arming is lost; treat the
                // detector as level-triggered
                if pac::PWR.csr().read().pvdo() {
                    self.regulator.enable();
                    return;
                }
                VDETECT_SIGNAL.wait().await;
            }
            WakeSource::Watchdog { .. } => WAKEUP_TIMER_SIGNAL.wait().await,
        }
    }

    fn mask_wake_source(&mut self, source: WakeSource) {
        let (_, irq) = wake_line(source);
        NVIC::mask(irq);
    }

    fn clear_wake_source(&mut self, source: WakeSource) {
        let (line, _) = wake_line(source);
        let exti = pac::EXTI;

        exti.imr(IMR1_REG_IDX).modify(|w| w.set_line(line, false));
        exti.pr(IMR1_REG_IDX).modify(|w| w.set_line(line, true));

        match source {
            WakeSource::VoltageDetect => VDETECT_SIGNAL.reset(),
            WakeSource::Watchdog { .. } => {
                with_rtc_unlocked(|rtc| {
                    rtc.cr().modify(|w| {
                        w.set_wute(false);
                        w.set_wutie(false);
                    });
                    rtc.isr().modify(|w| w.set_wutf(false));
                });
                WAKEUP_TIMER_SIGNAL.reset();
            }
        }
    }

    fn disable_sleep(&mut self) {
        // SAFETY: SCB is only touched from the node task
        let mut cp = unsafe { cortex_m::Peripherals::steal() };
        cp.SCB.clear_sleepdeep();
    }

    async fn delay_ms(&mut self, ms: u32) {
        Timer::after_millis(ms as u64).await;
    }
}
