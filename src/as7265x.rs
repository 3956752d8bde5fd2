//! ams AS7265x 18-channel spectral sensor driver.
//!
//! The AS7265x is a triad of sensor devices (AS72651 NIR master, AS72652
//! visible, AS72653 UV) sitting behind a single I2C slave at address 0x49.
//! The master exposes only three physical registers: STATUS, WRITE and
//! READ. Everything else is a *virtual* register reached by handshaking
//! through those three: wait for the TX buffer to drain, push the virtual
//! address (bit 7 set for writes), then wait for RX data to appear. Which
//! of the three devices answers is chosen through the device-select
//! virtual register.
//!
//! Each device contributes six spectral channels, read either raw (16-bit)
//! or calibrated (IEEE-754 big-endian floats).
//!
//! ```no_run
//! # async fn demo<I2C, D>(i2c: I2C, delay: D) -> Result<(), qwiic_rs::as7265x::Error<I2C::Error>>
//! # where I2C: embedded_hal_async::i2c::I2c, D: embedded_hal_async::delay::DelayNs {
//! use qwiic_rs::as7265x::As7265x;
//!
//! let mut sensor = As7265x::new(i2c, delay);
//! sensor.init().await?;
//! sensor.take_measurements().await?;
//! let spectrum = sensor.all_calibrated_values().await?;
//! # let _ = spectrum; Ok(()) }
//! ```

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use serde::{Deserialize, Serialize};

/// I2C address of the AS72651 master.
pub const I2C_ADDR: u8 = 0x49;

// Physical registers of the I2C slave interface.
const STATUS_REG: u8 = 0x00;
const WRITE_REG: u8 = 0x01;
const READ_REG: u8 = 0x02;

// Slave interface status bits.
const RX_VALID: u8 = 0x01;
const TX_VALID: u8 = 0x02;

// Virtual registers.
const HW_VERSION_HIGH_REG: u8 = 0x00;
const HW_VERSION_LOW_REG: u8 = 0x01;
const FW_VERSION_HIGH_REG: u8 = 0x02;
const FW_VERSION_LOW_REG: u8 = 0x03;
const CONFIG_REG: u8 = 0x04;
const INTEGRATION_TIME_REG: u8 = 0x05;
const DEVICE_TEMP_REG: u8 = 0x06;
const LED_CONFIG_REG: u8 = 0x07;
const DEV_SELECT_CONTROL: u8 = 0x4F;

// Raw channel registers, in R/G/A .. W/L/F order.
const CHANNEL_REGISTERS: [u8; 6] = [0x08, 0x0A, 0x0C, 0x0E, 0x10, 0x12];

// Calibrated channel registers (four bytes each).
const CAL_CHANNEL_REGISTERS: [u8; 6] = [0x14, 0x18, 0x1C, 0x20, 0x24, 0x28];

// CONFIG_REG bits.
const CONFIG_DATA_RDY: u8 = 1 << 1;
const CONFIG_INT_EN: u8 = 1 << 6;
const CONFIG_RESET: u8 = 1 << 7;

/// Delay between checks for virtual register readiness.
const POLLING_DELAY_MS: u32 = 5;

/// Integration cycle count assumed before the application configures one.
const DEFAULT_INTEGRATION_CYCLES: u8 = 20;

/// One of the three devices in the triad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceType {
    /// AS72651, the NIR master.
    Nir = 0,
    /// AS72652, visible light.
    Visible = 1,
    /// AS72653, UV.
    Uv = 2,
}

/// Spectral channels in register order: A..F live on the UV device,
/// G..L on the visible device and R..W on the NIR device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    A = 0,
    B = 1,
    C = 2,
    D = 3,
    E = 4,
    F = 5,
    G = 6,
    H = 7,
    I = 8,
    J = 9,
    K = 10,
    L = 11,
    R = 12,
    S = 13,
    T = 14,
    U = 15,
    V = 16,
    W = 17,
}

impl Channel {
    /// All channels in register order.
    pub const ALL: [Channel; 18] = [
        Channel::A,
        Channel::B,
        Channel::C,
        Channel::D,
        Channel::E,
        Channel::F,
        Channel::G,
        Channel::H,
        Channel::I,
        Channel::J,
        Channel::K,
        Channel::L,
        Channel::R,
        Channel::S,
        Channel::T,
        Channel::U,
        Channel::V,
        Channel::W,
    ];

    /// The device this channel is measured by.
    pub const fn device(self) -> DeviceType {
        match self as u8 / 6 {
            0 => DeviceType::Uv,
            1 => DeviceType::Visible,
            _ => DeviceType::Nir,
        }
    }

    const fn raw_register(self) -> u8 {
        CHANNEL_REGISTERS[self as usize % 6]
    }

    const fn cal_register(self) -> u8 {
        CAL_CHANNEL_REGISTERS[self as usize % 6]
    }
}

/// LEDs attached to the triad. Each device drives one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LedType {
    /// White LED, driven by the AS72651.
    White = 0,
    /// IR LED, driven by the AS72652.
    Ir = 1,
    /// UV LED, driven by the AS72653.
    Uv = 2,
}

impl LedType {
    const fn device(self) -> DeviceType {
        match self {
            LedType::White => DeviceType::Nir,
            LedType::Ir => DeviceType::Visible,
            LedType::Uv => DeviceType::Uv,
        }
    }
}

/// Measurement bank configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceMode {
    /// Mode 0: four channels per device.
    FourChannel = 0b00,
    /// Mode 1: a different four channels per device.
    FourChannelAlt = 0b01,
    /// Mode 2: all six channels, continuously.
    SixChannelContinuous = 0b10,
    /// Mode 3: one-shot reading of all six channels.
    SixChannelOneShot = 0b11,
}

impl DeviceMode {
    const fn doubles_integration(self) -> bool {
        matches!(self, DeviceMode::SixChannelContinuous | DeviceMode::SixChannelOneShot)
    }
}

/// Sensor gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gain {
    X1 = 0b00,
    X3_7 = 0b01,
    X16 = 0b10,
    X64 = 0b11,
}

/// Indicator LED current limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IndicatorCurrent {
    Ma1 = 0b00,
    Ma2 = 0b01,
    Ma4 = 0b10,
    Ma8 = 0b11,
}

/// Bulb/LED drive current limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LedCurrent {
    Ma12_5 = 0b00,
    Ma25 = 0b01,
    Ma50 = 0b10,
    Ma100 = 0b11,
}

/// Firmware version of the AS72651 master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub patch: u8,
    pub build: u8,
}

/// Raw readings of all 18 channels, indexed in [`Channel`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelData(pub [u16; 18]);

impl ChannelData {
    pub fn channel(&self, channel: Channel) -> u16 {
        self.0[channel as usize]
    }
}

/// Calibrated readings of all 18 channels, indexed in [`Channel`] order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibratedData(pub [f32; 18]);

impl CalibratedData {
    pub fn channel(&self, channel: Channel) -> f32 {
        self.0[channel as usize]
    }
}

/// Errors that can occur during AS7265x operations.
#[derive(Debug, PartialEq, Eq, thiserror_no_std::Error)]
pub enum Error<E> {
    /// I2C bus error.
    #[error("i2c transfer failed")]
    I2c(E),
    /// A virtual register handshake or measurement exceeded its deadline.
    #[error("sensor failed to respond in time")]
    Timeout,
    /// The AS72652/AS72653 slaves were not detected by the master.
    #[error("secondary devices not detected")]
    SlavesNotDetected,
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Self::I2c(e)
    }
}

/// Wait budget in milliseconds for a given integration cycle count. The
/// six-channel modes run two banks back to back, doubling the window; the
/// whole budget carries 100% headroom on top of the 2.8 ms cycle time.
const fn wait_budget_ms(cycles: u8, doubled: bool) -> u32 {
    let base = cycles as u32 * 28 / 10;
    if doubled { base * 4 } else { base * 2 }
}

/// AS7265x driver over an async I2C bus.
pub struct As7265x<I2C, D> {
    i2c: I2C,
    delay: D,
    max_wait_ms: u32,
}

impl<I2C, D> As7265x<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            i2c,
            delay,
            max_wait_ms: wait_budget_ms(DEFAULT_INTEGRATION_CYCLES, true),
        }
    }

    /// Destroy the driver and release the bus.
    pub fn release(self) -> I2C {
        self.i2c
    }

    // Physical register access

    async fn read_physical(&mut self, reg: u8) -> Result<u8, Error<I2C::Error>> {
        let mut buf = [0u8; 1];
        self.i2c.write_read(I2C_ADDR, &[reg], &mut buf).await?;
        Ok(buf[0])
    }

    async fn write_physical(&mut self, reg: u8, data: u8) -> Result<(), Error<I2C::Error>> {
        self.i2c.write(I2C_ADDR, &[reg, data]).await?;
        Ok(())
    }

    /// Poll STATUS until `(status & mask) == want`, bounded by the current
    /// wait budget.
    async fn wait_status(&mut self, mask: u8, want: u8) -> Result<(), Error<I2C::Error>> {
        let mut waited: u32 = 0;
        loop {
            let status = self.read_physical(STATUS_REG).await?;
            if status & mask == want {
                return Ok(());
            }
            if waited >= self.max_wait_ms {
                log::warn!("as7265x status poll exceeded {} ms", self.max_wait_ms);
                return Err(Error::Timeout);
            }
            self.delay.delay_ms(POLLING_DELAY_MS).await;
            waited += POLLING_DELAY_MS;
        }
    }

    // Virtual register access

    async fn read_virtual(&mut self, addr: u8) -> Result<u8, Error<I2C::Error>> {
        // Drain a stale byte left over from an aborted exchange.
        let status = self.read_physical(STATUS_REG).await?;
        if status & RX_VALID != 0 {
            let _ = self.read_physical(READ_REG).await?;
        }

        self.wait_status(TX_VALID, 0).await?;
        self.write_physical(WRITE_REG, addr).await?;
        self.wait_status(RX_VALID, RX_VALID).await?;
        self.read_physical(READ_REG).await
    }

    async fn write_virtual(&mut self, addr: u8, data: u8) -> Result<(), Error<I2C::Error>> {
        self.wait_status(TX_VALID, 0).await?;
        // Bit 7 marks a register write.
        self.write_physical(WRITE_REG, addr | 0x80).await?;
        self.wait_status(TX_VALID, 0).await?;
        self.write_physical(WRITE_REG, data).await
    }

    async fn modify_virtual(
        &mut self,
        addr: u8,
        mask: u8,
        bits: u8,
    ) -> Result<(), Error<I2C::Error>> {
        let value = self.read_virtual(addr).await?;
        self.write_virtual(addr, (value & !mask) | bits).await
    }

    async fn select_device(&mut self, device: DeviceType) -> Result<(), Error<I2C::Error>> {
        self.write_virtual(DEV_SELECT_CONTROL, device as u8).await
    }

    // Lifecycle

    /// Initialize the triad with the stock settings: 12.5 mA bulb limits
    /// with all bulbs off, 49 integration cycles (about 140 ms), the
    /// indicator LED on at 8 mA, 64x gain, continuous six-channel
    /// measurement and the interrupt pin enabled.
    pub async fn init(&mut self) -> Result<(), Error<I2C::Error>> {
        let value = self.read_virtual(DEV_SELECT_CONTROL).await?;
        if value & 0b0011_0000 == 0 {
            log::error!("as7265x slaves not detected, dev select {value:#04x}");
            return Err(Error::SlavesNotDetected);
        }

        self.set_bulb_current(LedCurrent::Ma12_5, LedType::White).await?;
        self.set_bulb_current(LedCurrent::Ma12_5, LedType::Ir).await?;
        self.set_bulb_current(LedCurrent::Ma12_5, LedType::Uv).await?;

        // Leave the bulbs off so they do not heat the sensor.
        self.disable_bulb(LedType::White).await?;
        self.disable_bulb(LedType::Ir).await?;
        self.disable_bulb(LedType::Uv).await?;

        self.set_integration_cycles(49).await?;

        self.set_indicator_current(IndicatorCurrent::Ma8).await?;
        self.enable_indicator().await?;

        self.set_gain(Gain::X64).await?;
        self.set_measurement_mode(DeviceMode::SixChannelContinuous).await?;
        self.enable_interrupt().await
    }

    /// Set the RST bit. The sensor needs on the order of a second before it
    /// responds again.
    pub async fn soft_reset(&mut self) -> Result<(), Error<I2C::Error>> {
        self.modify_virtual(CONFIG_REG, CONFIG_RESET, CONFIG_RESET).await
    }

    // Identification

    /// Device type byte of the AS72651 (0x40).
    pub async fn device_type(&mut self) -> Result<u8, Error<I2C::Error>> {
        self.read_virtual(HW_VERSION_HIGH_REG).await
    }

    /// Hardware version byte.
    pub async fn hardware_version(&mut self) -> Result<u8, Error<I2C::Error>> {
        self.read_virtual(HW_VERSION_LOW_REG).await
    }

    /// Firmware version of the master. Each field is selected by writing
    /// its index to both halves of the firmware version register before
    /// reading it back.
    pub async fn firmware_version(&mut self) -> Result<FirmwareVersion, Error<I2C::Error>> {
        let mut fields = [0u8; 3];
        for (selector, field) in fields.iter_mut().enumerate() {
            let selector = selector as u8 + 1;
            self.write_virtual(FW_VERSION_HIGH_REG, selector).await?;
            self.write_virtual(FW_VERSION_LOW_REG, selector).await?;
            *field = self.read_virtual(FW_VERSION_LOW_REG).await?;
        }
        Ok(FirmwareVersion {
            major: fields[0],
            patch: fields[1],
            build: fields[2],
        })
    }

    /// Die temperature of one device, in degrees Celsius.
    pub async fn temperature(&mut self, device: DeviceType) -> Result<u8, Error<I2C::Error>> {
        self.select_device(device).await?;
        self.read_virtual(DEVICE_TEMP_REG).await
    }

    // Measurement configuration

    /// Set the measurement bank mode and refresh the wait budget from the
    /// configured integration time.
    pub async fn set_measurement_mode(&mut self, mode: DeviceMode) -> Result<(), Error<I2C::Error>> {
        self.modify_virtual(CONFIG_REG, 0b0000_1100, (mode as u8) << 2).await?;

        let cycles = self.read_virtual(INTEGRATION_TIME_REG).await?;
        if mode.doubles_integration() {
            self.max_wait_ms = wait_budget_ms(cycles, true);
        }
        Ok(())
    }

    /// Set the sensor gain.
    pub async fn set_gain(&mut self, gain: Gain) -> Result<(), Error<I2C::Error>> {
        self.modify_virtual(CONFIG_REG, 0b0011_0000, (gain as u8) << 4).await
    }

    /// Set the integration cycle count. Integration time is
    /// 2.8 ms * (cycles + 1); the wait budget follows it.
    pub async fn set_integration_cycles(&mut self, cycles: u8) -> Result<(), Error<I2C::Error>> {
        let mode = (self.read_virtual(CONFIG_REG).await? & 0b0000_1100) >> 2;
        let doubled = mode == DeviceMode::SixChannelContinuous as u8
            || mode == DeviceMode::SixChannelOneShot as u8;
        self.max_wait_ms = wait_budget_ms(cycles, doubled);
        self.write_virtual(INTEGRATION_TIME_REG, cycles).await
    }

    /// Drive the INT pin when data becomes ready.
    pub async fn enable_interrupt(&mut self) -> Result<(), Error<I2C::Error>> {
        self.modify_virtual(CONFIG_REG, CONFIG_INT_EN, CONFIG_INT_EN).await
    }

    pub async fn disable_interrupt(&mut self) -> Result<(), Error<I2C::Error>> {
        self.modify_virtual(CONFIG_REG, CONFIG_INT_EN, 0).await
    }

    /// True once the DATA_RDY flag is set in the control register.
    pub async fn data_available(&mut self) -> Result<bool, Error<I2C::Error>> {
        let value = self.read_virtual(CONFIG_REG).await?;
        Ok(value & CONFIG_DATA_RDY != 0)
    }

    /// Block until all channels have fresh data, polling DATA_RDY under the
    /// integration-time-derived deadline.
    pub async fn take_measurements(&mut self) -> Result<(), Error<I2C::Error>> {
        let mut waited: u32 = 0;
        loop {
            if self.data_available().await? {
                return Ok(());
            }
            if waited >= self.max_wait_ms {
                log::warn!("as7265x measurement did not complete within {} ms", self.max_wait_ms);
                return Err(Error::Timeout);
            }
            self.delay.delay_ms(POLLING_DELAY_MS).await;
            waited += POLLING_DELAY_MS;
        }
    }

    /// Light all three bulbs, measure every channel, then switch the bulbs
    /// back off so they do not heat the sensor.
    pub async fn take_measurements_with_bulb(&mut self) -> Result<(), Error<I2C::Error>> {
        self.enable_bulb(LedType::White).await?;
        self.enable_bulb(LedType::Ir).await?;
        self.enable_bulb(LedType::Uv).await?;

        let result = self.take_measurements().await;

        self.disable_bulb(LedType::White).await?;
        self.disable_bulb(LedType::Ir).await?;
        self.disable_bulb(LedType::Uv).await?;
        result
    }

    // LED control

    pub async fn enable_bulb(&mut self, led: LedType) -> Result<(), Error<I2C::Error>> {
        self.select_device(led.device()).await?;
        self.modify_virtual(LED_CONFIG_REG, 1 << 3, 1 << 3).await
    }

    pub async fn disable_bulb(&mut self, led: LedType) -> Result<(), Error<I2C::Error>> {
        self.select_device(led.device()).await?;
        self.modify_virtual(LED_CONFIG_REG, 1 << 3, 0).await
    }

    /// Current limit for one bulb.
    pub async fn set_bulb_current(
        &mut self,
        current: LedCurrent,
        led: LedType,
    ) -> Result<(), Error<I2C::Error>> {
        self.select_device(led.device()).await?;
        self.modify_virtual(LED_CONFIG_REG, 0b0011_0000, (current as u8) << 4).await
    }

    /// The blue indicator LED on the AS72651.
    pub async fn enable_indicator(&mut self) -> Result<(), Error<I2C::Error>> {
        self.select_device(DeviceType::Nir).await?;
        self.modify_virtual(LED_CONFIG_REG, 1 << 0, 1 << 0).await
    }

    pub async fn disable_indicator(&mut self) -> Result<(), Error<I2C::Error>> {
        self.select_device(DeviceType::Nir).await?;
        self.modify_virtual(LED_CONFIG_REG, 1 << 0, 0).await
    }

    pub async fn set_indicator_current(
        &mut self,
        current: IndicatorCurrent,
    ) -> Result<(), Error<I2C::Error>> {
        self.select_device(DeviceType::Nir).await?;
        self.modify_virtual(LED_CONFIG_REG, 0b0000_0110, (current as u8) << 1).await
    }

    // Channel data

    /// Raw 16-bit reading of one channel.
    pub async fn channel(&mut self, channel: Channel) -> Result<u16, Error<I2C::Error>> {
        self.select_device(channel.device()).await?;
        let reg = channel.raw_register();
        let high = self.read_virtual(reg).await?;
        let low = self.read_virtual(reg + 1).await?;
        Ok(u16::from_be_bytes([high, low]))
    }

    /// Raw readings of all 18 channels.
    pub async fn all_channels(&mut self) -> Result<ChannelData, Error<I2C::Error>> {
        let mut data = [0u16; 18];
        for (i, slot) in data.iter_mut().enumerate() {
            let channel = Channel::ALL[i];
            *slot = self.channel(channel).await?;
        }
        Ok(ChannelData(data))
    }

    /// Calibrated reading of one channel. Calibrated values are stored as
    /// big-endian IEEE-754 floats.
    pub async fn calibrated_value(&mut self, channel: Channel) -> Result<f32, Error<I2C::Error>> {
        self.select_device(channel.device()).await?;
        let reg = channel.cal_register();
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.read_virtual(reg + i as u8).await?;
        }
        Ok(f32::from_be_bytes(bytes))
    }

    /// Calibrated readings of all 18 channels.
    pub async fn all_calibrated_values(&mut self) -> Result<CalibratedData, Error<I2C::Error>> {
        let mut data = [0f32; 18];
        for (i, slot) in data.iter_mut().enumerate() {
            let channel = Channel::ALL[i];
            *slot = self.calibrated_value(channel).await?;
        }
        Ok(CalibratedData(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
    use std::vec;
    use std::vec::Vec;

    extern crate std;

    /// Bus traffic for one virtual register read with an idle slave.
    fn vr_read(addr: u8, value: u8) -> Vec<I2cTransaction> {
        vec![
            // Preliminary status check: no stale RX data.
            I2cTransaction::write_read(I2C_ADDR, vec![STATUS_REG], vec![0x00]),
            // TX buffer already clear.
            I2cTransaction::write_read(I2C_ADDR, vec![STATUS_REG], vec![0x00]),
            I2cTransaction::write(I2C_ADDR, vec![WRITE_REG, addr]),
            // RX data ready on the first poll.
            I2cTransaction::write_read(I2C_ADDR, vec![STATUS_REG], vec![RX_VALID]),
            I2cTransaction::write_read(I2C_ADDR, vec![READ_REG], vec![value]),
        ]
    }

    /// Bus traffic for one virtual register write with an idle slave.
    fn vr_write(addr: u8, value: u8) -> Vec<I2cTransaction> {
        vec![
            I2cTransaction::write_read(I2C_ADDR, vec![STATUS_REG], vec![0x00]),
            I2cTransaction::write(I2C_ADDR, vec![WRITE_REG, addr | 0x80]),
            I2cTransaction::write_read(I2C_ADDR, vec![STATUS_REG], vec![0x00]),
            I2cTransaction::write(I2C_ADDR, vec![WRITE_REG, value]),
        ]
    }

    #[test]
    fn test_channel_device_mapping() {
        assert_eq!(Channel::A.device(), DeviceType::Uv);
        assert_eq!(Channel::G.device(), DeviceType::Visible);
        assert_eq!(Channel::R.device(), DeviceType::Nir);
        assert_eq!(Channel::W.device(), DeviceType::Nir);
        assert_eq!(Channel::A.raw_register(), 0x08);
        assert_eq!(Channel::W.raw_register(), 0x12);
        assert_eq!(Channel::R.cal_register(), 0x14);
    }

    #[test]
    fn test_wait_budget() {
        // 20 cycles, six-channel mode: 20 * 2.8 * 2 * 2 = 224 ms.
        assert_eq!(wait_budget_ms(20, true), 224);
        assert_eq!(wait_budget_ms(49, false), 274);
    }

    #[test]
    fn test_raw_channel_read_is_big_endian() {
        let mut expectations = vr_write(DEV_SELECT_CONTROL, DeviceType::Uv as u8);
        expectations.extend(vr_read(0x08, 0xAB));
        expectations.extend(vr_read(0x09, 0xCD));

        let mut sensor = As7265x::new(I2cMock::new(&expectations), NoopDelay::new());
        assert_eq!(block_on(sensor.channel(Channel::A)).unwrap(), 0xABCD);
        sensor.release().done();
    }

    #[test]
    fn test_calibrated_value_assembles_float() {
        let bytes = 1.5f32.to_be_bytes();
        let mut expectations = vr_write(DEV_SELECT_CONTROL, DeviceType::Nir as u8);
        for (i, &byte) in bytes.iter().enumerate() {
            expectations.extend(vr_read(0x14 + i as u8, byte));
        }

        let mut sensor = As7265x::new(I2cMock::new(&expectations), NoopDelay::new());
        let value = block_on(sensor.calibrated_value(Channel::R)).unwrap();
        assert_eq!(value, 1.5);
        sensor.release().done();
    }

    #[test]
    fn test_read_virtual_drains_stale_rx_byte() {
        let expectations = [
            // Stale RX byte gets read and discarded first.
            I2cTransaction::write_read(I2C_ADDR, vec![STATUS_REG], vec![RX_VALID]),
            I2cTransaction::write_read(I2C_ADDR, vec![READ_REG], vec![0x55]),
            I2cTransaction::write_read(I2C_ADDR, vec![STATUS_REG], vec![0x00]),
            I2cTransaction::write(I2C_ADDR, vec![WRITE_REG, CONFIG_REG]),
            I2cTransaction::write_read(I2C_ADDR, vec![STATUS_REG], vec![RX_VALID]),
            I2cTransaction::write_read(I2C_ADDR, vec![READ_REG], vec![CONFIG_DATA_RDY]),
        ];

        let mut sensor = As7265x::new(I2cMock::new(&expectations), NoopDelay::new());
        assert!(block_on(sensor.data_available()).unwrap());
        sensor.release().done();
    }

    #[test]
    fn test_write_virtual_times_out_when_tx_stays_full() {
        // Status never clears: reads repeat every POLLING_DELAY_MS until the
        // wait budget (224 ms default) runs out.
        let polls = 224 / POLLING_DELAY_MS as usize + 2;
        let mut expectations = Vec::new();
        for _ in 0..polls {
            expectations.push(I2cTransaction::write_read(
                I2C_ADDR,
                vec![STATUS_REG],
                vec![TX_VALID],
            ));
        }

        let mut sensor = As7265x::new(I2cMock::new(&expectations), NoopDelay::new());
        assert_eq!(
            block_on(sensor.enable_indicator()),
            Err(Error::Timeout)
        );
        sensor.release().done();
    }

    #[test]
    fn test_firmware_version_selector_sequence() {
        let mut expectations = Vec::new();
        for (selector, value) in [(1u8, 0x02u8), (2, 0x01), (3, 0x07)] {
            expectations.extend(vr_write(FW_VERSION_HIGH_REG, selector));
            expectations.extend(vr_write(FW_VERSION_LOW_REG, selector));
            expectations.extend(vr_read(FW_VERSION_LOW_REG, value));
        }

        let mut sensor = As7265x::new(I2cMock::new(&expectations), NoopDelay::new());
        let version = block_on(sensor.firmware_version()).unwrap();
        assert_eq!(
            version,
            FirmwareVersion {
                major: 0x02,
                patch: 0x01,
                build: 0x07
            }
        );
        sensor.release().done();
    }
}
