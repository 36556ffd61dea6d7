//! Wake-cycle core for UKHASnet reservoir-capacitor telemetry nodes.
//!
//! A node spends almost all of its life asleep with its boost regulator
//! off, running from a reservoir capacitor. Each wake it either counts
//! towards the next transmission or samples battery voltage and
//! temperature, sends a short ASCII packet and re-evaluates which sleep
//! strategy the battery can afford.
//!
//! # Module Organization
//!
//! - [`config`] - Build-time node configuration and validation
//! - [`controller`] - Power-mode controller (wake cadence, hysteresis)
//! - [`scheduler`] - Sleep/wake scheduler and the platform sleep seam
//! - [`node`] - Boot sequence and the endless wake cycle
//! - [`packet`] - UKHASnet telemetry encoding
//! - [`radio`] - Radio contract and RFM69 driver
//! - [`sensors`] - Battery/temperature contracts and ADC conversions
//!
//! Everything here is hardware independent. The STM32 board layer that
//! implements the seams lives in the `fc-node` binary.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod controller;
pub mod node;
pub mod packet;
pub mod radio;
pub mod scheduler;
pub mod sensors;
