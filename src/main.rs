//! Firmware for a UKHASnet telemetry node powered from a reservoir capacitor.
//!
//! # Overview
//!
//! The node wakes periodically, counts wakes, and every `wake_freq` wakes
//! samples its cell voltage and die temperature and broadcasts a UKHASnet
//! packet on an RFM69 transceiver. Between wakes it sleeps in whichever
//! strategy the power-mode controller selected.
//!
//! # Hardware
//!
//! - **MCU**: STM32L031G6U6 (Cortex-M0+, ultra-low-power)
//! - **Supply**: single cell, boost regulator, reservoir capacitor on VDD
//! - **Radio**: RFM69W/HW on SPI1, 869.5 MHz
//! - **RTC**: 32.768 kHz crystal
//!
//! # Power Management
//!
//! With a healthy cell the regulator is switched off before every sleep and
//! the MCU runs from the capacitor in STOP mode. When the capacitor has
//! drained to the PVD threshold (2.7V) the PVD interrupt switches the
//! regulator back on and wakes the MCU.
//!
//! Below the cell-voltage threshold the regulator stays on and the MCU
//! sleeps in STOP mode until the RTC wakeup timer fires.
//!
//! # Module Organization
//!
//! - [`power`] - Regulator control, PVD interrupt and sleep primitives
//! - [`analog`] - Battery and temperature sampling on the ADC
//! - [`hardware`] - Pin mappings and peripheral initialization
//!
//! The board-independent logic lives in the `ukhasnet_node` library.

#![no_std]
#![no_main]

mod analog;
mod hardware;
mod power;

use embassy_executor::Spawner;
use embassy_stm32::{
    Config,
    rcc::{LsConfig, LseConfig, mux::ClockMux},
    time::Hertz,
};
use ukhasnet_node::config::NodeConfig;
use ukhasnet_node::node::Node;
use {defmt_rtt as _, panic_probe as _};

use analog::AnalogFrontEnd;
use hardware::{NodeRadio, Peripherals};
use power::{BoardSleep, setup_pvd, setup_rtc_wakeup};

/// Configuration baked into this build.
const NODE_CONFIG: NodeConfig = NodeConfig::DEFAULT;

// Reject at compile time a node id or setting that cannot fit a packet
const _: () = assert!(
    NODE_CONFIG.validate().is_ok(),
    "NODE_CONFIG is invalid"
);

type BoardNode = Node<NodeRadio, AnalogFrontEnd, BoardSleep>;

/// Creates a low-power clock configuration for STM32L031.
///
/// # Clock Settings
///
/// - **MSI**: 1.048 MHz in normal mode, 2.097 MHz in debug mode (for reliable debugging)
/// - **System clock**: MSI (no PLL)
/// - **LSE**: 32.768 kHz external crystal for the RTC wakeup timer
/// - **Voltage scale**: Range 1
///
/// # Returns
///
/// Configured RCC settings for embassy-stm32 initialization
fn create_low_power_config() -> embassy_stm32::rcc::Config {
    embassy_stm32::rcc::Config {
        #[cfg(feature = "debug-mode")]
        msi: Some(embassy_stm32::rcc::MSIRange::RANGE2M),
        #[cfg(not(feature = "debug-mode"))]
        msi: Some(embassy_stm32::rcc::MSIRange::RANGE1M),
        hsi: false,
        hse: None,
        pll: None,
        sys: embassy_stm32::rcc::Sysclk::MSI,
        ahb_pre: embassy_stm32::rcc::AHBPrescaler::DIV1,
        apb1_pre: embassy_stm32::rcc::APBPrescaler::DIV1,
        apb2_pre: embassy_stm32::rcc::APBPrescaler::DIV1,
        ls: LsConfig {
            rtc: embassy_stm32::rcc::RtcClockSource::LSE,
            lsi: false,
            lse: Some(LseConfig {
                frequency: Hertz::hz(32768),
                mode: embassy_stm32::rcc::LseMode::Oscillator(embassy_stm32::rcc::LseDrive::Low),
            }),
        },
        voltage_scale: embassy_stm32::rcc::VoltageScale::RANGE1,
        mux: ClockMux::default(),
    }
}

/// Runs the node: boot, then tick and sleep forever.
#[embassy_executor::task]
async fn node_task(node: BoardNode) -> ! {
    node.run().await
}

/// Main entry point for the node firmware.
///
/// # Initialization Sequence
///
/// 1. Configure clocks for low power operation (1 MHz MSI)
/// 2. Initialize STM32 peripherals
/// 3. Setup PVD and the RTC wakeup timer
/// 4. Initialize GPIO, SPI and ADC
/// 5. Spawn the node task, which owns everything from then on
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut config = Config::default();
    config.rcc = create_low_power_config();

    let p = embassy_stm32::init(config);

    #[cfg(feature = "debug-mode")]
    {
        defmt::info!("UKHASnet node {} starting...", NODE_CONFIG.node_id);

        // Give the debugger a chance to attach before the first STOP
        defmt::info!("Waiting 3 seconds for debugger connection...");
        embassy_time::Timer::after_secs(3).await;
    }

    setup_pvd();
    setup_rtc_wakeup();

    #[cfg(feature = "debug-mode")]
    defmt::info!("Initializing peripherals...");

    let peripherals = Peripherals::new(p);

    let node = Node::new(
        NODE_CONFIG,
        peripherals.radio,
        peripherals.analog,
        peripherals.sleep,
    );

    #[cfg(feature = "debug-mode")]
    defmt::info!("Spawning node task...");

    spawner.spawn(node_task(node)).unwrap();
}
