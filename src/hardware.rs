//! Hardware abstraction and peripheral initialization.
//!
//! This module defines the pin mappings and peripheral initialization
//! for the reservoir-capacitor node board.
//!
//! # Pin Assignments
//!
//! ## Power Control
//! - **PA3**: REG_EN - Boost regulator enable (floating = on, low = off)
//!
//! ## Battery Sense
//! - **PA0**: BATT - Cell voltage (ADC_IN0)
//!
//! ## RFM69 Radio (SPI1)
//! - **PA4**: NSS - Chip select (active-low)
//! - **PA5**: SCK
//! - **PA6**: MISO
//! - **PA7**: MOSI
//!
//! ## Low Power & RTC
//! - **PC14**: OSC32_IN - 32.768 kHz crystal input
//! - **PC15**: OSC32_OUT - 32.768 kHz crystal output
//!
//! ## Debug (SWD)
//! - **PA13**: SWDIO
//! - **PA14**: SWCLK

use embassy_stm32::adc::{Adc, AdcChannel};
use embassy_stm32::gpio::{Flex, Level, Output, Speed};
use embassy_stm32::mode::Blocking;
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use ukhasnet_node::radio::{PaVariant, Rfm69};

use crate::analog::{AnalogFrontEnd, Irqs};
use crate::power::{BoardSleep, Regulator};

/// Module fitted to the board
const RADIO_VARIANT: PaVariant = PaVariant::Rfm69W;

/// RFM69 SPI clock (chip maximum is 10 MHz)
const RADIO_SPI_HZ: u32 = 500_000;

/// RFM69 on SPI1 with manual chip select
pub type NodeRadio = Rfm69<Spi<'static, Blocking>, Output<'static>>;

/// Top-level peripheral container for the node.
///
/// Owns all hardware controllers and provides initialization
/// from STM32 peripheral singleton.
pub struct Peripherals {
    /// Regulator control and sleep primitives
    pub sleep: BoardSleep,
    /// RFM69 transceiver
    pub radio: NodeRadio,
    /// Battery and temperature sensing
    pub analog: AnalogFrontEnd,
}

impl Peripherals {
    /// Initializes all peripherals from STM32 peripheral singleton.
    ///
    /// # Initial GPIO States
    ///
    /// - PA3 (REG_EN): Floating (regulator ON)
    /// - PA4 (NSS): High (radio deselected)
    ///
    /// # Arguments
    ///
    /// * `p` - STM32 peripheral singleton from embassy_stm32::init()
    pub fn new(p: embassy_stm32::Peripherals) -> Self {
        let mut spi_config = spi::Config::default();
        spi_config.frequency = Hertz(RADIO_SPI_HZ);

        let spi = Spi::new_blocking(p.SPI1, p.PA5, p.PA7, p.PA6, spi_config);
        let nss = Output::new(p.PA4, Level::High, Speed::Low);

        Self {
            sleep: BoardSleep::new(Regulator::new(Flex::new(p.PA3))),
            radio: Rfm69::new(spi, nss, RADIO_VARIANT),
            analog: AnalogFrontEnd::new(Adc::new(p.ADC1, Irqs), p.PA0.degrade_adc()),
        }
    }
}
