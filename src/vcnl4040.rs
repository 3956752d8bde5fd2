//! Vishay VCNL4040 proximity and ambient light sensor driver.
//!
//! The VCNL4040 exposes sixteen 16-bit little-endian "command code"
//! registers. Most configuration fields occupy the lower or the upper byte
//! of a shared register, so every setting write is a read-modify-write of
//! one byte half. Data registers (proximity, ambient, white) are plain
//! 16-bit reads. The INT pin is driven from a flag register whose read
//! clears all pending interrupt sources.
//!
//! ```no_run
//! # async fn demo<I2C>(i2c: I2C) -> Result<(), qwiic_rs::vcnl4040::Error<I2C::Error>>
//! # where I2C: embedded_hal_async::i2c::I2c {
//! use qwiic_rs::vcnl4040::{Config, Vcnl4040};
//!
//! let mut sensor = Vcnl4040::new(i2c);
//! sensor.init(&Config::default()).await?;
//! let proximity = sensor.proximity().await?;
//! let ambient = sensor.ambient().await?;
//! # let _ = (proximity, ambient); Ok(()) }
//! ```

use bitflags::bitflags;
use embedded_hal_async::i2c::I2c;
use serde::{Deserialize, Serialize};

/// 7-bit I2C address of the VCNL4040.
pub const I2C_ADDR: u8 = 0x60;

/// ID register value of the VCNL4040.
pub const DEVICE_ID: u16 = 0x0186;

// Command code registers.
const ALS_CONF: u8 = 0x00;
const ALS_THDH: u8 = 0x01;
const ALS_THDL: u8 = 0x02;
const PS_CONF1_2: u8 = 0x03; // PS_CONF1 lower, PS_CONF2 upper
const PS_CONF3_MS: u8 = 0x04; // PS_CONF3 lower, PS_MS upper
const PS_CANC: u8 = 0x05;
const PS_THDL: u8 = 0x06;
const PS_THDH: u8 = 0x07;
const PS_DATA: u8 = 0x08;
const ALS_DATA: u8 = 0x09;
const WHITE_DATA: u8 = 0x0A;
const INT_FLAG: u8 = 0x0B; // upper byte only
const ID: u8 = 0x0C;

// ALS_CONF fields (lower byte of 0x00).
const ALS_IT_MASK: u8 = 0b1100_0000;
const ALS_IT_SHIFT: u8 = 6;
const ALS_PERS_MASK: u8 = 0b0000_1100;
const ALS_PERS_SHIFT: u8 = 2;
const ALS_INT_EN_BIT: u8 = 1 << 1;
const ALS_SD_BIT: u8 = 1 << 0;

// PS_CONF1 fields (lower byte of 0x03).
const PS_DUTY_MASK: u8 = 0b1100_0000;
const PS_DUTY_SHIFT: u8 = 6;
const PS_PERS_MASK: u8 = 0b0011_0000;
const PS_PERS_SHIFT: u8 = 4;
const PS_IT_MASK: u8 = 0b0000_1110;
const PS_IT_SHIFT: u8 = 1;
const PS_SD_BIT: u8 = 1 << 0;

// PS_CONF2 fields (upper byte of 0x03).
const PS_HD_BIT: u8 = 1 << 3;
const PS_INT_MASK: u8 = 0b0000_0011;

// PS_CONF3 fields (lower byte of 0x04).
const PS_SMART_PERS_BIT: u8 = 1 << 4;
const PS_AF_BIT: u8 = 1 << 3;
const PS_TRIG_BIT: u8 = 1 << 2;

// PS_MS fields (upper byte of 0x04).
const WHITE_DISABLE_BIT: u8 = 1 << 7;
const PS_MS_BIT: u8 = 1 << 6;
const LED_I_MASK: u8 = 0b0000_0111;

/// IR LED on/off duty ratio. A denser duty ratio responds faster at the
/// cost of average current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PsDuty {
    #[default]
    Div40 = 0,
    Div80 = 1,
    Div160 = 2,
    Div320 = 3,
}

impl PsDuty {
    pub const fn from_register(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::Div40),
            1 => Some(Self::Div80),
            2 => Some(Self::Div160),
            3 => Some(Self::Div320),
            _ => None,
        }
    }
}

/// IR LED sink current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum LedCurrent {
    Ma50 = 0,
    Ma75 = 1,
    Ma100 = 2,
    Ma120 = 3,
    Ma140 = 4,
    Ma160 = 5,
    Ma180 = 6,
    #[default]
    Ma200 = 7,
}

impl LedCurrent {
    pub const fn from_register(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::Ma50),
            1 => Some(Self::Ma75),
            2 => Some(Self::Ma100),
            3 => Some(Self::Ma120),
            4 => Some(Self::Ma140),
            5 => Some(Self::Ma160),
            6 => Some(Self::Ma180),
            7 => Some(Self::Ma200),
            _ => None,
        }
    }
}

/// Consecutive hits needed before a proximity interrupt fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PsPersistence {
    #[default]
    P1 = 0,
    P2 = 1,
    P3 = 2,
    P4 = 3,
}

impl PsPersistence {
    pub const fn from_register(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::P1),
            1 => Some(Self::P2),
            2 => Some(Self::P3),
            3 => Some(Self::P4),
            _ => None,
        }
    }
}

/// Proximity sensor integration time, in multiples of the base period T.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PsIntegrationTime {
    T1 = 0,
    T1_5 = 1,
    T2 = 2,
    T2_5 = 3,
    T3 = 4,
    T3_5 = 5,
    T4 = 6,
    #[default]
    T8 = 7,
}

impl PsIntegrationTime {
    pub const fn from_register(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::T1),
            1 => Some(Self::T1_5),
            2 => Some(Self::T2),
            3 => Some(Self::T2_5),
            4 => Some(Self::T3),
            5 => Some(Self::T3_5),
            6 => Some(Self::T4),
            7 => Some(Self::T8),
            _ => None,
        }
    }
}

/// Proximity output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PsResolution {
    Bits12 = 0,
    #[default]
    Bits16 = 1,
}

impl PsResolution {
    pub const fn from_register(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::Bits12),
            1 => Some(Self::Bits16),
            _ => None,
        }
    }
}

/// Proximity interrupt trigger condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PsInterruptMode {
    #[default]
    Disabled = 0,
    /// Trigger when an object comes close (value above the high threshold).
    Close = 1,
    /// Trigger when an object moves away (value below the low threshold).
    Away = 2,
    /// Trigger on both conditions.
    Both = 3,
}

impl PsInterruptMode {
    pub const fn from_register(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::Disabled),
            1 => Some(Self::Close),
            2 => Some(Self::Away),
            3 => Some(Self::Both),
            _ => None,
        }
    }
}

/// Consecutive hits needed before an ambient light interrupt fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum AlsPersistence {
    #[default]
    P1 = 0,
    P2 = 1,
    P4 = 2,
    P8 = 3,
}

impl AlsPersistence {
    pub const fn from_register(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::P1),
            1 => Some(Self::P2),
            2 => Some(Self::P4),
            3 => Some(Self::P8),
            _ => None,
        }
    }
}

/// Ambient light integration time. Longer integration has higher
/// sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum AlsIntegrationTime {
    #[default]
    Ms80 = 0,
    Ms160 = 1,
    Ms320 = 2,
    Ms640 = 3,
}

impl AlsIntegrationTime {
    pub const fn from_register(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::Ms80),
            1 => Some(Self::Ms160),
            2 => Some(Self::Ms320),
            3 => Some(Self::Ms640),
            _ => None,
        }
    }
}

bitflags! {
    /// Pending interrupt sources, from the upper byte of the INT_FLAG
    /// register. Reading the register clears all flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterruptFlags: u8 {
        /// Proximity dropped below the low threshold.
        const AWAY = 1 << 0;
        /// Proximity rose above the high threshold.
        const CLOSE = 1 << 1;
        /// Ambient light rose above the high threshold.
        const ALS_HIGH = 1 << 4;
        /// Ambient light dropped below the low threshold.
        const ALS_LOW = 1 << 5;
    }
}

/// Decoded interrupt source, for dispatching on the cause of an INT pin
/// assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    Close,
    Away,
    Light,
    Dark,
}

impl InterruptFlags {
    /// The highest-priority pending source, if any.
    pub fn source(self) -> Option<InterruptSource> {
        if self.contains(Self::CLOSE) {
            Some(InterruptSource::Close)
        } else if self.contains(Self::AWAY) {
            Some(InterruptSource::Away)
        } else if self.contains(Self::ALS_HIGH) {
            Some(InterruptSource::Light)
        } else if self.contains(Self::ALS_LOW) {
            Some(InterruptSource::Dark)
        } else {
            None
        }
    }
}

/// Full sensor configuration, applied in one shot by [`Vcnl4040::init`].
///
/// The defaults enable proximity (16-bit, 8T integration, smart
/// persistence), ambient light and the white channel, with interrupts off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub ps_duty: PsDuty,
    pub led_current: LedCurrent,
    pub ps_persistence: PsPersistence,
    pub ps_integration_time: PsIntegrationTime,
    pub ps_resolution: PsResolution,
    pub ps_interrupt_mode: PsInterruptMode,
    pub ps_enabled: bool,
    pub smart_persistence: bool,
    pub active_force: bool,
    pub logic_mode: bool,
    pub ps_cancellation: u16,
    pub ps_high_threshold: u16,
    pub ps_low_threshold: u16,
    pub als_persistence: AlsPersistence,
    pub als_integration_time: AlsIntegrationTime,
    pub als_high_threshold: u16,
    pub als_low_threshold: u16,
    pub als_enabled: bool,
    pub als_interrupts: bool,
    pub white_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ps_duty: PsDuty::Div40,
            led_current: LedCurrent::Ma200,
            ps_persistence: PsPersistence::P1,
            ps_integration_time: PsIntegrationTime::T8,
            ps_resolution: PsResolution::Bits16,
            ps_interrupt_mode: PsInterruptMode::Disabled,
            ps_enabled: true,
            smart_persistence: true,
            active_force: false,
            logic_mode: false,
            ps_cancellation: 0,
            ps_high_threshold: 0,
            ps_low_threshold: 0,
            als_persistence: AlsPersistence::P1,
            als_integration_time: AlsIntegrationTime::Ms80,
            als_high_threshold: 0,
            als_low_threshold: 0,
            als_enabled: true,
            als_interrupts: false,
            white_enabled: true,
        }
    }
}

/// Errors that can occur during VCNL4040 operations.
#[derive(Debug, PartialEq, Eq, thiserror_no_std::Error)]
pub enum Error<E> {
    /// I2C bus error.
    #[error("i2c transfer failed")]
    I2c(E),
    /// The ID register did not identify a VCNL4040.
    #[error("unexpected device id")]
    WrongDevice(u16),
    /// A register field held a value outside its documented encoding.
    #[error("register field out of range")]
    InvalidFieldValue(u8),
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Self::I2c(e)
    }
}

enum Half {
    Lower,
    Upper,
}

/// VCNL4040 driver over an async I2C bus.
pub struct Vcnl4040<I2C> {
    i2c: I2C,
}

impl<I2C> Vcnl4040<I2C>
where
    I2C: I2c,
{
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    /// Destroy the driver and release the bus.
    pub fn release(self) -> I2C {
        self.i2c
    }

    async fn read_register(&mut self, reg: u8) -> Result<u16, Error<I2C::Error>> {
        let mut buf = [0u8; 2];
        self.i2c.write_read(I2C_ADDR, &[reg], &mut buf).await?;
        Ok(u16::from_le_bytes(buf))
    }

    async fn write_register(&mut self, reg: u8, value: u16) -> Result<(), Error<I2C::Error>> {
        let bytes = value.to_le_bytes();
        self.i2c.write(I2C_ADDR, &[reg, bytes[0], bytes[1]]).await?;
        Ok(())
    }

    /// Read-modify-write one byte half of a 16-bit register. `mask` selects
    /// the field; `bits` must already sit at the field position.
    async fn modify_register(
        &mut self,
        reg: u8,
        half: Half,
        mask: u8,
        bits: u8,
    ) -> Result<(), Error<I2C::Error>> {
        let value = self.read_register(reg).await?;
        let merged = match half {
            Half::Lower => {
                let byte = (value as u8 & !mask) | bits;
                (value & 0xFF00) | byte as u16
            }
            Half::Upper => {
                let byte = ((value >> 8) as u8 & !mask) | bits;
                (value & 0x00FF) | ((byte as u16) << 8)
            }
        };
        self.write_register(reg, merged).await
    }

    async fn register_field(&mut self, reg: u8, half: Half, mask: u8) -> Result<u8, Error<I2C::Error>> {
        let value = self.read_register(reg).await?;
        let byte = match half {
            Half::Lower => value as u8,
            Half::Upper => (value >> 8) as u8,
        };
        Ok(byte & mask)
    }

    /// Read the 16-bit device ID register (0x0186 for a VCNL4040).
    pub async fn device_id(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_register(ID).await
    }

    /// Verify the chip ID and program the complete configuration.
    pub async fn init(&mut self, config: &Config) -> Result<(), Error<I2C::Error>> {
        let id = self.device_id().await?;
        if id != DEVICE_ID {
            log::error!("vcnl4040 init found unexpected id {id:#06x}");
            return Err(Error::WrongDevice(id));
        }

        self.set_led_current(config.led_current).await?;
        self.set_ps_duty(config.ps_duty).await?;
        self.set_ps_persistence(config.ps_persistence).await?;
        self.set_ps_integration_time(config.ps_integration_time).await?;
        self.set_ps_resolution(config.ps_resolution).await?;
        self.set_ps_interrupt_mode(config.ps_interrupt_mode).await?;
        self.enable_smart_persistence(config.smart_persistence).await?;
        self.enable_active_force_mode(config.active_force).await?;
        self.enable_proximity_logic_mode(config.logic_mode).await?;
        self.set_ps_cancellation(config.ps_cancellation).await?;
        self.set_ps_high_threshold(config.ps_high_threshold).await?;
        self.set_ps_low_threshold(config.ps_low_threshold).await?;
        self.enable_proximity(config.ps_enabled).await?;

        self.set_als_persistence(config.als_persistence).await?;
        self.set_als_integration_time(config.als_integration_time).await?;
        self.set_als_high_threshold(config.als_high_threshold).await?;
        self.set_als_low_threshold(config.als_low_threshold).await?;
        self.enable_als_interrupts(config.als_interrupts).await?;
        self.enable_ambient(config.als_enabled).await?;

        self.enable_white_channel(config.white_enabled).await
    }

    // Proximity sensor configuration

    pub async fn set_ps_duty(&mut self, duty: PsDuty) -> Result<(), Error<I2C::Error>> {
        self.modify_register(PS_CONF1_2, Half::Lower, PS_DUTY_MASK, (duty as u8) << PS_DUTY_SHIFT)
            .await
    }

    pub async fn ps_duty(&mut self) -> Result<PsDuty, Error<I2C::Error>> {
        let bits = self.register_field(PS_CONF1_2, Half::Lower, PS_DUTY_MASK).await? >> PS_DUTY_SHIFT;
        PsDuty::from_register(bits).ok_or(Error::InvalidFieldValue(bits))
    }

    pub async fn set_led_current(&mut self, current: LedCurrent) -> Result<(), Error<I2C::Error>> {
        self.modify_register(PS_CONF3_MS, Half::Upper, LED_I_MASK, current as u8)
            .await
    }

    pub async fn led_current(&mut self) -> Result<LedCurrent, Error<I2C::Error>> {
        let bits = self.register_field(PS_CONF3_MS, Half::Upper, LED_I_MASK).await?;
        LedCurrent::from_register(bits).ok_or(Error::InvalidFieldValue(bits))
    }

    pub async fn set_ps_persistence(
        &mut self,
        persistence: PsPersistence,
    ) -> Result<(), Error<I2C::Error>> {
        self.modify_register(
            PS_CONF1_2,
            Half::Lower,
            PS_PERS_MASK,
            (persistence as u8) << PS_PERS_SHIFT,
        )
        .await
    }

    pub async fn ps_persistence(&mut self) -> Result<PsPersistence, Error<I2C::Error>> {
        let bits =
            self.register_field(PS_CONF1_2, Half::Lower, PS_PERS_MASK).await? >> PS_PERS_SHIFT;
        PsPersistence::from_register(bits).ok_or(Error::InvalidFieldValue(bits))
    }

    pub async fn set_ps_integration_time(
        &mut self,
        time: PsIntegrationTime,
    ) -> Result<(), Error<I2C::Error>> {
        self.modify_register(PS_CONF1_2, Half::Lower, PS_IT_MASK, (time as u8) << PS_IT_SHIFT)
            .await
    }

    pub async fn ps_integration_time(&mut self) -> Result<PsIntegrationTime, Error<I2C::Error>> {
        let bits = self.register_field(PS_CONF1_2, Half::Lower, PS_IT_MASK).await? >> PS_IT_SHIFT;
        PsIntegrationTime::from_register(bits).ok_or(Error::InvalidFieldValue(bits))
    }

    /// Power proximity detection on or off. The shutdown bit is inverted:
    /// 0 powers the block on.
    pub async fn enable_proximity(&mut self, enable: bool) -> Result<(), Error<I2C::Error>> {
        let bits = if enable { 0 } else { PS_SD_BIT };
        self.modify_register(PS_CONF1_2, Half::Lower, PS_SD_BIT, bits).await
    }

    pub async fn proximity_enabled(&mut self) -> Result<bool, Error<I2C::Error>> {
        Ok(self.register_field(PS_CONF1_2, Half::Lower, PS_SD_BIT).await? == 0)
    }

    pub async fn set_ps_resolution(
        &mut self,
        resolution: PsResolution,
    ) -> Result<(), Error<I2C::Error>> {
        let bits = match resolution {
            PsResolution::Bits12 => 0,
            PsResolution::Bits16 => PS_HD_BIT,
        };
        self.modify_register(PS_CONF1_2, Half::Upper, PS_HD_BIT, bits).await
    }

    pub async fn ps_resolution(&mut self) -> Result<PsResolution, Error<I2C::Error>> {
        let bits = self.register_field(PS_CONF1_2, Half::Upper, PS_HD_BIT).await?;
        Ok(if bits == 0 { PsResolution::Bits12 } else { PsResolution::Bits16 })
    }

    pub async fn set_ps_interrupt_mode(
        &mut self,
        mode: PsInterruptMode,
    ) -> Result<(), Error<I2C::Error>> {
        self.modify_register(PS_CONF1_2, Half::Upper, PS_INT_MASK, mode as u8).await
    }

    pub async fn ps_interrupt_mode(&mut self) -> Result<PsInterruptMode, Error<I2C::Error>> {
        let bits = self.register_field(PS_CONF1_2, Half::Upper, PS_INT_MASK).await?;
        PsInterruptMode::from_register(bits).ok_or(Error::InvalidFieldValue(bits))
    }

    /// Smart persistence speeds up interrupt response without sacrificing
    /// the false-trigger filtering of the persistence counter.
    pub async fn enable_smart_persistence(&mut self, enable: bool) -> Result<(), Error<I2C::Error>> {
        let bits = if enable { PS_SMART_PERS_BIT } else { 0 };
        self.modify_register(PS_CONF3_MS, Half::Lower, PS_SMART_PERS_BIT, bits).await
    }

    pub async fn smart_persistence_enabled(&mut self) -> Result<bool, Error<I2C::Error>> {
        Ok(self.register_field(PS_CONF3_MS, Half::Lower, PS_SMART_PERS_BIT).await? != 0)
    }

    /// In active force mode the sensor stays in standby and measures only
    /// when [`Self::trigger_proximity_measurement`] is called.
    pub async fn enable_active_force_mode(&mut self, enable: bool) -> Result<(), Error<I2C::Error>> {
        let bits = if enable { PS_AF_BIT } else { 0 };
        self.modify_register(PS_CONF3_MS, Half::Lower, PS_AF_BIT, bits).await
    }

    pub async fn active_force_mode_enabled(&mut self) -> Result<bool, Error<I2C::Error>> {
        Ok(self.register_field(PS_CONF3_MS, Half::Lower, PS_AF_BIT).await? != 0)
    }

    /// Request a single proximity measurement (active force mode). The
    /// trigger bit self-clears once the measurement completes.
    pub async fn trigger_proximity_measurement(&mut self) -> Result<(), Error<I2C::Error>> {
        self.modify_register(PS_CONF3_MS, Half::Lower, PS_TRIG_BIT, PS_TRIG_BIT).await
    }

    /// Proximity detection logic output mode: the INT pin follows the
    /// close/away thresholds directly instead of latching interrupts.
    pub async fn enable_proximity_logic_mode(&mut self, enable: bool) -> Result<(), Error<I2C::Error>> {
        let bits = if enable { PS_MS_BIT } else { 0 };
        self.modify_register(PS_CONF3_MS, Half::Upper, PS_MS_BIT, bits).await
    }

    pub async fn proximity_logic_mode_enabled(&mut self) -> Result<bool, Error<I2C::Error>> {
        Ok(self.register_field(PS_CONF3_MS, Half::Upper, PS_MS_BIT).await? != 0)
    }

    /// Cancellation level subtracted from every proximity measurement to
    /// compensate crosstalk.
    pub async fn set_ps_cancellation(&mut self, value: u16) -> Result<(), Error<I2C::Error>> {
        self.write_register(PS_CANC, value).await
    }

    pub async fn ps_cancellation(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_register(PS_CANC).await
    }

    pub async fn set_ps_low_threshold(&mut self, value: u16) -> Result<(), Error<I2C::Error>> {
        self.write_register(PS_THDL, value).await
    }

    pub async fn ps_low_threshold(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_register(PS_THDL).await
    }

    pub async fn set_ps_high_threshold(&mut self, value: u16) -> Result<(), Error<I2C::Error>> {
        self.write_register(PS_THDH, value).await
    }

    pub async fn ps_high_threshold(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_register(PS_THDH).await
    }

    /// Latest proximity reading.
    pub async fn proximity(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_register(PS_DATA).await
    }

    // Ambient light sensor configuration

    pub async fn set_als_persistence(
        &mut self,
        persistence: AlsPersistence,
    ) -> Result<(), Error<I2C::Error>> {
        self.modify_register(
            ALS_CONF,
            Half::Lower,
            ALS_PERS_MASK,
            (persistence as u8) << ALS_PERS_SHIFT,
        )
        .await
    }

    pub async fn als_persistence(&mut self) -> Result<AlsPersistence, Error<I2C::Error>> {
        let bits = self.register_field(ALS_CONF, Half::Lower, ALS_PERS_MASK).await? >> ALS_PERS_SHIFT;
        AlsPersistence::from_register(bits).ok_or(Error::InvalidFieldValue(bits))
    }

    pub async fn set_als_integration_time(
        &mut self,
        time: AlsIntegrationTime,
    ) -> Result<(), Error<I2C::Error>> {
        self.modify_register(ALS_CONF, Half::Lower, ALS_IT_MASK, (time as u8) << ALS_IT_SHIFT)
            .await
    }

    pub async fn als_integration_time(&mut self) -> Result<AlsIntegrationTime, Error<I2C::Error>> {
        let bits = self.register_field(ALS_CONF, Half::Lower, ALS_IT_MASK).await? >> ALS_IT_SHIFT;
        AlsIntegrationTime::from_register(bits).ok_or(Error::InvalidFieldValue(bits))
    }

    pub async fn enable_als_interrupts(&mut self, enable: bool) -> Result<(), Error<I2C::Error>> {
        let bits = if enable { ALS_INT_EN_BIT } else { 0 };
        self.modify_register(ALS_CONF, Half::Lower, ALS_INT_EN_BIT, bits).await
    }

    pub async fn als_interrupts_enabled(&mut self) -> Result<bool, Error<I2C::Error>> {
        Ok(self.register_field(ALS_CONF, Half::Lower, ALS_INT_EN_BIT).await? != 0)
    }

    /// Power ambient light detection on or off. The shutdown bit is
    /// inverted: 0 powers the block on.
    pub async fn enable_ambient(&mut self, enable: bool) -> Result<(), Error<I2C::Error>> {
        let bits = if enable { 0 } else { ALS_SD_BIT };
        self.modify_register(ALS_CONF, Half::Lower, ALS_SD_BIT, bits).await
    }

    pub async fn ambient_enabled(&mut self) -> Result<bool, Error<I2C::Error>> {
        Ok(self.register_field(ALS_CONF, Half::Lower, ALS_SD_BIT).await? == 0)
    }

    pub async fn set_als_low_threshold(&mut self, value: u16) -> Result<(), Error<I2C::Error>> {
        self.write_register(ALS_THDL, value).await
    }

    pub async fn als_low_threshold(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_register(ALS_THDL).await
    }

    pub async fn set_als_high_threshold(&mut self, value: u16) -> Result<(), Error<I2C::Error>> {
        self.write_register(ALS_THDH, value).await
    }

    pub async fn als_high_threshold(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_register(ALS_THDH).await
    }

    /// Latest ambient light reading.
    pub async fn ambient(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_register(ALS_DATA).await
    }

    // White channel

    /// The white-channel enable bit is inverted: 0 enables the channel.
    pub async fn enable_white_channel(&mut self, enable: bool) -> Result<(), Error<I2C::Error>> {
        let bits = if enable { 0 } else { WHITE_DISABLE_BIT };
        self.modify_register(PS_CONF3_MS, Half::Upper, WHITE_DISABLE_BIT, bits).await
    }

    pub async fn white_channel_enabled(&mut self) -> Result<bool, Error<I2C::Error>> {
        Ok(self.register_field(PS_CONF3_MS, Half::Upper, WHITE_DISABLE_BIT).await? == 0)
    }

    /// Latest white channel reading.
    pub async fn white(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_register(WHITE_DATA).await
    }

    // Interrupt handling

    /// Read and clear all pending interrupt flags.
    pub async fn interrupt_flags(&mut self) -> Result<InterruptFlags, Error<I2C::Error>> {
        let value = self.read_register(INT_FLAG).await?;
        Ok(InterruptFlags::from_bits_truncate((value >> 8) as u8))
    }

    /// Read the flag register and decode the highest-priority source.
    /// Clears all pending flags as a side effect.
    pub async fn interrupt_source(&mut self) -> Result<Option<InterruptSource>, Error<I2C::Error>> {
        Ok(self.interrupt_flags().await?.source())
    }

    /// True if proximity rose above the high threshold. Clears all flags.
    pub async fn is_close(&mut self) -> Result<bool, Error<I2C::Error>> {
        Ok(self.interrupt_flags().await?.contains(InterruptFlags::CLOSE))
    }

    /// True if proximity dropped below the low threshold. Clears all flags.
    pub async fn is_away(&mut self) -> Result<bool, Error<I2C::Error>> {
        Ok(self.interrupt_flags().await?.contains(InterruptFlags::AWAY))
    }

    /// True if ambient light rose above the high threshold. Clears all
    /// flags.
    pub async fn is_light(&mut self) -> Result<bool, Error<I2C::Error>> {
        Ok(self.interrupt_flags().await?.contains(InterruptFlags::ALS_HIGH))
    }

    /// True if ambient light dropped below the low threshold. Clears all
    /// flags.
    pub async fn is_dark(&mut self) -> Result<bool, Error<I2C::Error>> {
        Ok(self.interrupt_flags().await?.contains(InterruptFlags::ALS_LOW))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
    use std::vec;

    extern crate std;

    #[test]
    fn test_enum_register_round_trips() {
        assert_eq!(PsDuty::from_register(PsDuty::Div320 as u8), Some(PsDuty::Div320));
        assert_eq!(LedCurrent::from_register(7), Some(LedCurrent::Ma200));
        assert_eq!(PsIntegrationTime::from_register(5), Some(PsIntegrationTime::T3_5));
        assert_eq!(AlsPersistence::from_register(3), Some(AlsPersistence::P8));
        assert_eq!(PsInterruptMode::from_register(4), None);
    }

    #[test]
    fn test_device_id() {
        let expectations = [I2cTransaction::write_read(
            I2C_ADDR,
            vec![ID],
            vec![0x86, 0x01],
        )];
        let mut sensor = Vcnl4040::new(I2cMock::new(&expectations));

        assert_eq!(block_on(sensor.device_id()).unwrap(), DEVICE_ID);
        sensor.release().done();
    }

    #[test]
    fn test_init_rejects_wrong_id() {
        let expectations = [I2cTransaction::write_read(
            I2C_ADDR,
            vec![ID],
            vec![0x88, 0x01],
        )];
        let mut sensor = Vcnl4040::new(I2cMock::new(&expectations));

        assert_eq!(
            block_on(sensor.init(&Config::default())),
            Err(Error::WrongDevice(0x0188))
        );
        sensor.release().done();
    }

    #[test]
    fn test_set_ps_duty_is_read_modify_write() {
        // PS_CONF1 starts at 0x0001 (PS shut down); duty 1/320 sets bits
        // 7:6 of the lower byte and must not disturb anything else.
        let expectations = [
            I2cTransaction::write_read(I2C_ADDR, vec![PS_CONF1_2], vec![0x01, 0x08]),
            I2cTransaction::write(I2C_ADDR, vec![PS_CONF1_2, 0xC1, 0x08]),
        ];
        let mut sensor = Vcnl4040::new(I2cMock::new(&expectations));

        block_on(sensor.set_ps_duty(PsDuty::Div320)).unwrap();
        sensor.release().done();
    }

    #[test]
    fn test_set_led_current_touches_upper_byte() {
        let expectations = [
            I2cTransaction::write_read(I2C_ADDR, vec![PS_CONF3_MS], vec![0x00, 0x47]),
            // 200 mA replaces the low three bits of PS_MS, preserving the rest.
            I2cTransaction::write(I2C_ADDR, vec![PS_CONF3_MS, 0x00, 0x47]),
        ];
        let mut sensor = Vcnl4040::new(I2cMock::new(&expectations));

        block_on(sensor.set_led_current(LedCurrent::Ma200)).unwrap();
        sensor.release().done();
    }

    #[test]
    fn test_enable_proximity_clears_shutdown_bit() {
        let expectations = [
            I2cTransaction::write_read(I2C_ADDR, vec![PS_CONF1_2], vec![0xC1, 0x00]),
            I2cTransaction::write(I2C_ADDR, vec![PS_CONF1_2, 0xC0, 0x00]),
        ];
        let mut sensor = Vcnl4040::new(I2cMock::new(&expectations));

        block_on(sensor.enable_proximity(true)).unwrap();
        sensor.release().done();
    }

    #[test]
    fn test_proximity_read_is_little_endian() {
        let expectations = [I2cTransaction::write_read(
            I2C_ADDR,
            vec![PS_DATA],
            vec![0x34, 0x12],
        )];
        let mut sensor = Vcnl4040::new(I2cMock::new(&expectations));

        assert_eq!(block_on(sensor.proximity()).unwrap(), 0x1234);
        sensor.release().done();
    }

    #[test]
    fn test_interrupt_flags_decode() {
        let expectations = [I2cTransaction::write_read(
            I2C_ADDR,
            vec![INT_FLAG],
            vec![0x00, 0b0010_0010],
        )];
        let mut sensor = Vcnl4040::new(I2cMock::new(&expectations));

        let flags = block_on(sensor.interrupt_flags()).unwrap();
        assert!(flags.contains(InterruptFlags::CLOSE));
        assert!(flags.contains(InterruptFlags::ALS_LOW));
        assert!(!flags.contains(InterruptFlags::AWAY));
        // Close outranks dark when both are pending.
        assert_eq!(flags.source(), Some(InterruptSource::Close));
        sensor.release().done();
    }

    #[test]
    fn test_thresholds_round_trip_on_the_wire() {
        let expectations = [
            I2cTransaction::write(I2C_ADDR, vec![PS_THDH, 0xE8, 0x03]),
            I2cTransaction::write_read(I2C_ADDR, vec![PS_THDH], vec![0xE8, 0x03]),
        ];
        let mut sensor = Vcnl4040::new(I2cMock::new(&expectations));

        block_on(sensor.set_ps_high_threshold(1000)).unwrap();
        assert_eq!(block_on(sensor.ps_high_threshold()).unwrap(), 1000);
        sensor.release().done();
    }
}
