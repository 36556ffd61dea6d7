//! Battery and die-temperature sensing on the STM32L031 ADC.
//!
//! VDDA is not fixed (the MCU may be running from a sagging capacitor), so
//! every sample first measures VREFINT against the factory calibration to
//! find the real reference voltage.
//!
//! The internal channels are switched on for each sample and off again
//! afterwards so they draw nothing while the node sleeps.

use embassy_stm32::adc::{self, Adc, AnyAdcChannel, SampleTime};
use embassy_stm32::peripherals::ADC1;
use embassy_stm32::{bind_interrupts, pac};
use embassy_time::Timer;
use ukhasnet_node::sensors::{
    BatteryMonitor, TempCalibration, TemperatureSensor, channel_millivolts, vdda_millivolts,
};

bind_interrupts!(pub struct Irqs {
    ADC1_COMP => adc::InterruptHandler<ADC1>;
});

/// VREFINT_CAL: VREFINT reading at 3.0 V, 30 °C
const VREFINT_CAL_ADDR: *const u16 = 0x1FF8_0078 as *const u16;

/// TS_CAL1: temperature sensor reading at 30 °C, 3.0 V
const TS_CAL1_ADDR: *const u16 = 0x1FF8_007A as *const u16;

/// TS_CAL2: temperature sensor reading at 130 °C, 3.0 V
const TS_CAL2_ADDR: *const u16 = 0x1FF8_007E as *const u16;

/// Temperature sensor start-up time
const TSEN_SETTLE_US: u64 = 10;

/// ADC with the battery sense channel and the factory calibration.
pub struct AnalogFrontEnd {
    adc: Adc<'static, ADC1>,
    /// Battery sense (PA0 / ADC_IN0)
    battery: AnyAdcChannel<ADC1>,
    vrefint_cal: u16,
    temp_cal: TempCalibration,
}

impl AnalogFrontEnd {
    pub fn new(mut adc: Adc<'static, ADC1>, battery: AnyAdcChannel<ADC1>) -> Self {
        // Internal channels need at least 10 µs of sampling
        adc.set_sample_time(SampleTime::CYCLES160_5);

        // SAFETY: factory calibration words in system memory, always readable
        let (vrefint_cal, ts_cal1, ts_cal2) = unsafe {
            (
                core::ptr::read_volatile(VREFINT_CAL_ADDR),
                core::ptr::read_volatile(TS_CAL1_ADDR),
                core::ptr::read_volatile(TS_CAL2_ADDR),
            )
        };

        Self {
            adc,
            battery,
            vrefint_cal,
            temp_cal: TempCalibration { ts_cal1, ts_cal2 },
        }
    }

    async fn vdda_millivolts(&mut self) -> u16 {
        let mut vref = self.adc.enable_vref();
        let raw = self.adc.read(&mut vref).await;
        pac::ADC1.ccr().modify(|w| w.set_vrefen(false));

        vdda_millivolts(self.vrefint_cal, raw)
    }
}

impl BatteryMonitor for AnalogFrontEnd {
    async fn sample_millivolts(&mut self) -> u16 {
        let vdda = self.vdda_millivolts().await;
        let raw = self.adc.read(&mut self.battery).await;

        channel_millivolts(raw, vdda)
    }
}

impl TemperatureSensor for AnalogFrontEnd {
    async fn sample_celsius(&mut self) -> f32 {
        let vdda = self.vdda_millivolts().await;

        let mut sensor = self.adc.enable_temperature();
        Timer::after_micros(TSEN_SETTLE_US).await;
        let raw = self.adc.read(&mut sensor).await;
        pac::ADC1.ccr().modify(|w| w.set_tsen(false));

        self.temp_cal.celsius(raw, vdda)
    }
}
