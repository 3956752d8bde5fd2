//! Async register-level drivers for Qwiic-attached evaluation peripherals.
//!
//! This crate contains platform-agnostic drivers for a small family of
//! peripherals commonly wired to the same Qwiic I2C bus plus an SPI-attached
//! Ethernet controller:
//!
//! - [`shtc3`]: Sensirion SHTC3 humidity and temperature sensor
//! - [`vcnl4040`]: Vishay VCNL4040 proximity and ambient light sensor
//! - [`as7265x`]: ams AS7265x 18-channel spectral sensor triad
//! - [`w5500`]: WIZnet W5500 Ethernet controller with hardware TCP/IP
//!   offload, including UDP, a DHCP client and a small HTTP server
//!
//! Every driver is generic over the `embedded-hal-async` bus traits so it
//! compiles on any embedded target as well as on desktop hosts for the test
//! suite. Each driver lives behind its own cargo feature; all are enabled by
//! default.

#![no_std]

#[cfg(feature = "sensor-as7265x")]
pub mod as7265x;
#[cfg(feature = "sensor-shtc3")]
pub mod shtc3;
#[cfg(feature = "sensor-vcnl4040")]
pub mod vcnl4040;
#[cfg(feature = "net-w5500")]
pub mod w5500;
