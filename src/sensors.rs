//! Battery and temperature sensing contracts.
//!
//! Both sensors own their power sequencing: an implementation powers up
//! whatever it needs, converts, and powers it down again before returning,
//! so the node never has to remember to switch anything off before sleep.
//!
//! The conversion helpers turn raw STM32L0 ADC readings into millivolts and
//! degrees using the factory calibration values stored in system memory.

use core::future::Future;

/// Supply voltage of the ADC when the factory calibration was taken.
pub const CALIBRATION_VDDA_MV: u32 = 3000;

/// Full-scale reading of a 12-bit conversion.
pub const ADC_FULL_SCALE: u32 = 4095;

/// Samples the cell voltage.
pub trait BatteryMonitor {
    /// Battery voltage in millivolts
    fn sample_millivolts(&mut self) -> impl Future<Output = u16>;
}

/// Samples the node temperature.
pub trait TemperatureSensor {
    /// Temperature in degrees Celsius
    fn sample_celsius(&mut self) -> impl Future<Output = f32>;
}

/// Analog supply voltage derived from a VREFINT conversion.
///
/// Returns 0 for a zero reading rather than dividing by it.
pub fn vdda_millivolts(vrefint_cal: u16, vrefint_raw: u16) -> u16 {
    if vrefint_raw == 0 {
        return 0;
    }

    let mv = CALIBRATION_VDDA_MV * vrefint_cal as u32 / vrefint_raw as u32;
    mv.min(u16::MAX as u32) as u16
}

/// Voltage on an external channel, given the measured VDDA.
pub fn channel_millivolts(raw: u16, vdda_mv: u16) -> u16 {
    let raw = (raw as u32).min(ADC_FULL_SCALE);
    (raw * vdda_mv as u32 / ADC_FULL_SCALE) as u16
}

/// Factory calibration points of the internal temperature sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempCalibration {
    /// Raw reading at 30 °C and VDDA = 3.0 V
    pub ts_cal1: u16,
    /// Raw reading at 130 °C and VDDA = 3.0 V
    pub ts_cal2: u16,
}

impl TempCalibration {
    pub const CAL1_CELSIUS: f32 = 30.0;
    pub const CAL2_CELSIUS: f32 = 130.0;

    /// Interpolate a raw reading taken at `vdda_mv`.
    pub fn celsius(&self, raw: u16, vdda_mv: u16) -> f32 {
        let span = self.ts_cal2 as f32 - self.ts_cal1 as f32;
        if span <= 0.0 {
            return Self::CAL1_CELSIUS;
        }

        // Calibration points were taken at 3.0 V
        let scaled = raw as f32 * vdda_mv as f32 / CALIBRATION_VDDA_MV as f32;

        (Self::CAL2_CELSIUS - Self::CAL1_CELSIUS) / span * (scaled - self.ts_cal1 as f32)
            + Self::CAL1_CELSIUS
    }
}
