//! Sensirion SHTC3 humidity and temperature sensor driver.
//!
//! The SHTC3 is a command-driven I2C device: every operation is a 16-bit
//! command word, and measurement results come back as two 16-bit words, each
//! followed by a CRC-8 checksum. The sensor spends most of its life in sleep
//! mode; it must be woken before a measurement and should be put back to
//! sleep afterwards to hit its sub-microamp idle draw.
//!
//! ```no_run
//! # async fn demo<I2C, D>(i2c: I2C, delay: D) -> Result<(), qwiic_rs::shtc3::Error<I2C::Error>>
//! # where I2C: embedded_hal_async::i2c::I2c, D: embedded_hal_async::delay::DelayNs {
//! use qwiic_rs::shtc3::{DataOrder, PowerMode, Shtc3};
//!
//! let mut sensor = Shtc3::new(i2c, delay);
//! sensor.probe().await?;
//! sensor.wake().await?;
//! let m = sensor
//!     .measure(PowerMode::Normal, DataOrder::TemperatureFirst)
//!     .await?;
//! sensor.sleep().await?;
//! let _celsius = m.temperature_celsius();
//! # Ok(()) }
//! ```

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use serde::{Deserialize, Serialize};

/// I2C address of the SHTC3.
pub const I2C_ADDR: u8 = 0x70;

/// ID register value identifying an SHTC3.
pub const DEVICE_ID: u16 = 0x0887;

/// CRC-8 polynomial: P(x) = x^8 + x^5 + x^4 + 1.
const CRC_POLYNOMIAL: u8 = 0x31;

/// Time for the sensor to leave sleep or finish a power-up/reset.
const WAKEUP_DELAY_US: u32 = 240;

/// Interval between read attempts while a measurement is in flight.
const MEASUREMENT_POLL_INTERVAL_US: u32 = 1_000;

/// Upper bound on measurement polling. The worst-case conversion time is
/// 12.1 ms in normal power mode.
const MEASUREMENT_POLL_LIMIT: u32 = 20;

/// SHTC3 command words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    /// Read the ID register.
    ReadId = 0xEFC8,
    /// Soft reset.
    SoftReset = 0x805D,
    /// Enter sleep mode.
    Sleep = 0xB098,
    /// Leave sleep mode.
    Wakeup = 0x3517,
    /// Measure, T first, clock stretching, normal power mode.
    MeasureTempFirstStretch = 0x7CA2,
    /// Measure, RH first, clock stretching, normal power mode.
    MeasureHumidityFirstStretch = 0x5C24,
    /// Measure, T first, clock stretching, low power mode.
    MeasureTempFirstStretchLowPower = 0x6458,
    /// Measure, RH first, clock stretching, low power mode.
    MeasureHumidityFirstStretchLowPower = 0x44DE,
    /// Measure, T first, polling, normal power mode.
    MeasureTempFirst = 0x7866,
    /// Measure, RH first, polling, normal power mode.
    MeasureHumidityFirst = 0x58E0,
    /// Measure, T first, polling, low power mode.
    MeasureTempFirstLowPower = 0x609C,
    /// Measure, RH first, polling, low power mode.
    MeasureHumidityFirstLowPower = 0x401A,
}

impl Command {
    /// Big-endian byte pair as sent on the wire.
    pub const fn to_bytes(self) -> [u8; 2] {
        (self as u16).to_be_bytes()
    }
}

/// Measurement power mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerMode {
    /// Low power: faster conversion, more noise.
    LowPower,
    /// Normal power mode.
    #[default]
    Normal,
}

/// Which word the sensor returns first in a combined measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataOrder {
    #[default]
    TemperatureFirst,
    HumidityFirst,
}

const fn measurement_command(mode: PowerMode, order: DataOrder, clock_stretch: bool) -> Command {
    match (mode, order, clock_stretch) {
        (PowerMode::Normal, DataOrder::TemperatureFirst, true) => Command::MeasureTempFirstStretch,
        (PowerMode::Normal, DataOrder::HumidityFirst, true) => Command::MeasureHumidityFirstStretch,
        (PowerMode::LowPower, DataOrder::TemperatureFirst, true) => {
            Command::MeasureTempFirstStretchLowPower
        }
        (PowerMode::LowPower, DataOrder::HumidityFirst, true) => {
            Command::MeasureHumidityFirstStretchLowPower
        }
        (PowerMode::Normal, DataOrder::TemperatureFirst, false) => Command::MeasureTempFirst,
        (PowerMode::Normal, DataOrder::HumidityFirst, false) => Command::MeasureHumidityFirst,
        (PowerMode::LowPower, DataOrder::TemperatureFirst, false) => {
            Command::MeasureTempFirstLowPower
        }
        (PowerMode::LowPower, DataOrder::HumidityFirst, false) => {
            Command::MeasureHumidityFirstLowPower
        }
    }
}

/// A raw measurement with unit conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    pub raw_temperature: u16,
    pub raw_humidity: u16,
}

impl Measurement {
    /// Temperature in degrees Celsius: T = -45 + 175 * raw / 2^16.
    pub fn temperature_celsius(&self) -> f32 {
        175.0 * self.raw_temperature as f32 / 65536.0 - 45.0
    }

    /// Relative humidity in percent: RH = 100 * raw / 2^16.
    pub fn humidity_percent(&self) -> f32 {
        100.0 * self.raw_humidity as f32 / 65536.0
    }

    /// Temperature in milli-degrees Celsius.
    pub fn temperature_millicelsius(&self) -> i32 {
        ((175_000i64 * self.raw_temperature as i64) >> 16) as i32 - 45_000
    }

    /// Relative humidity in milli-percent.
    pub fn humidity_millipercent(&self) -> i32 {
        ((100_000i64 * self.raw_humidity as i64) >> 16) as i32
    }
}

/// Errors that can occur during SHTC3 operations.
#[derive(Debug, PartialEq, Eq, thiserror_no_std::Error)]
pub enum Error<E> {
    /// I2C bus error.
    #[error("i2c transfer failed")]
    I2c(E),
    /// A response word failed its CRC-8 check.
    #[error("checksum mismatch in sensor response")]
    Crc,
    /// The ID register did not identify an SHTC3.
    #[error("unexpected device id")]
    WrongDevice(u16),
    /// The sensor never acknowledged the measurement read-out.
    #[error("measurement did not complete in time")]
    MeasurementTimeout,
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Self::I2c(e)
    }
}

/// SHTC3 driver over an async I2C bus.
pub struct Shtc3<I2C, D> {
    i2c: I2C,
    delay: D,
}

impl<I2C, D> Shtc3<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    /// Create a new driver instance. The sensor is not touched until the
    /// first command; call [`Self::probe`] to verify it is present.
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self { i2c, delay }
    }

    /// Destroy the driver and release the bus.
    pub fn release(self) -> I2C {
        self.i2c
    }

    async fn command(&mut self, cmd: Command) -> Result<(), Error<I2C::Error>> {
        self.i2c.write(I2C_ADDR, &cmd.to_bytes()).await?;
        Ok(())
    }

    /// Wake the sensor from sleep mode. The part needs 240 us before it
    /// accepts the next command.
    pub async fn wake(&mut self) -> Result<(), Error<I2C::Error>> {
        self.command(Command::Wakeup).await?;
        self.delay.delay_us(WAKEUP_DELAY_US).await;
        Ok(())
    }

    /// Put the sensor into sleep mode.
    pub async fn sleep(&mut self) -> Result<(), Error<I2C::Error>> {
        self.command(Command::Sleep).await
    }

    /// Issue a soft reset and wait for the sensor to come back.
    pub async fn soft_reset(&mut self) -> Result<(), Error<I2C::Error>> {
        self.command(Command::SoftReset).await?;
        self.delay.delay_us(WAKEUP_DELAY_US).await;
        Ok(())
    }

    /// Read and checksum-verify the 16-bit ID register.
    pub async fn device_id(&mut self) -> Result<u16, Error<I2C::Error>> {
        let mut buf = [0u8; 3];
        self.i2c
            .write_read(I2C_ADDR, &Command::ReadId.to_bytes(), &mut buf)
            .await?;
        verify_crc(&buf[..2], buf[2])?;
        Ok(u16::from_be_bytes([buf[0], buf[1]]))
    }

    /// Verify the sensor is present and responding: wait out the power-up
    /// time, wake it, check the ID register and put it back to sleep.
    pub async fn probe(&mut self) -> Result<(), Error<I2C::Error>> {
        self.delay.delay_us(WAKEUP_DELAY_US).await;
        self.wake().await?;
        let id = self.device_id().await?;
        if id != DEVICE_ID {
            log::error!("shtc3 probe found unexpected id {id:#06x}");
            return Err(Error::WrongDevice(id));
        }
        self.sleep().await
    }

    /// Run a measurement cycle and read temperature and humidity.
    ///
    /// The measurement command is issued without clock stretching; the
    /// read-out is polled until the sensor acknowledges it, bounded by the
    /// worst-case conversion time. The sensor must be awake.
    pub async fn measure(
        &mut self,
        mode: PowerMode,
        order: DataOrder,
    ) -> Result<Measurement, Error<I2C::Error>> {
        self.command(measurement_command(mode, order, false)).await?;

        let mut buf = [0u8; 6];
        let mut polls = 0;
        loop {
            match self.i2c.read(I2C_ADDR, &mut buf).await {
                Ok(()) => break,
                Err(_) => {
                    polls += 1;
                    if polls >= MEASUREMENT_POLL_LIMIT {
                        log::error!("shtc3 never acknowledged the measurement read-out");
                        return Err(Error::MeasurementTimeout);
                    }
                    self.delay.delay_us(MEASUREMENT_POLL_INTERVAL_US).await;
                }
            }
        }
        decode_measurement(order, &buf)
    }

    /// Run a measurement cycle using I2C clock stretching: the sensor holds
    /// SCL until data is ready, so the whole exchange is a single
    /// write-then-read transfer.
    pub async fn measure_with_clock_stretch(
        &mut self,
        mode: PowerMode,
        order: DataOrder,
    ) -> Result<Measurement, Error<I2C::Error>> {
        let cmd = measurement_command(mode, order, true);
        let mut buf = [0u8; 6];
        self.i2c
            .write_read(I2C_ADDR, &cmd.to_bytes(), &mut buf)
            .await?;
        decode_measurement(order, &buf)
    }
}

fn decode_measurement<E>(order: DataOrder, buf: &[u8; 6]) -> Result<Measurement, Error<E>> {
    verify_crc(&buf[..2], buf[2])?;
    verify_crc(&buf[3..5], buf[5])?;

    let first = u16::from_be_bytes([buf[0], buf[1]]);
    let second = u16::from_be_bytes([buf[3], buf[4]]);
    let (raw_temperature, raw_humidity) = match order {
        DataOrder::TemperatureFirst => (first, second),
        DataOrder::HumidityFirst => (second, first),
    };
    Ok(Measurement {
        raw_temperature,
        raw_humidity,
    })
}

/// CRC-8 as the sensor computes it: init 0xFF, polynomial 0x31, no final XOR.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ CRC_POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn verify_crc<E>(data: &[u8], checksum: u8) -> Result<(), Error<E>> {
    if crc8(data) == checksum {
        Ok(())
    } else {
        Err(Error::Crc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal::i2c::ErrorKind as I2cErrorKind;
    use std::vec;
    use std::vec::Vec;

    extern crate std;

    fn word_with_crc(value: u16) -> Vec<u8> {
        let bytes = value.to_be_bytes();
        vec![bytes[0], bytes[1], crc8(&bytes)]
    }

    #[test]
    fn test_crc8_datasheet_vector() {
        // Sensirion documents CRC(0xBEEF) == 0x92 for this polynomial.
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    fn test_crc8_detects_corruption() {
        let good = crc8(&[0x66, 0x66]);
        assert_ne!(crc8(&[0x66, 0x67]), good);
    }

    #[test]
    fn test_temperature_conversion() {
        let m = Measurement {
            raw_temperature: 0x6666,
            raw_humidity: 0x8000,
        };
        assert!((m.temperature_celsius() - 25.0).abs() < 0.01);
        assert!((m.humidity_percent() - 50.0).abs() < 0.01);
        assert_eq!(m.humidity_millipercent(), 50_000);
        assert!((m.temperature_millicelsius() - 25_000).abs() < 10);
    }

    #[test]
    fn test_command_encoding() {
        assert_eq!(Command::Wakeup.to_bytes(), [0x35, 0x17]);
        assert_eq!(
            measurement_command(PowerMode::LowPower, DataOrder::HumidityFirst, false),
            Command::MeasureHumidityFirstLowPower
        );
    }

    #[test]
    fn test_device_id_read() {
        let expectations = [I2cTransaction::write_read(
            I2C_ADDR,
            vec![0xEF, 0xC8],
            word_with_crc(DEVICE_ID),
        )];
        let mut sensor = Shtc3::new(I2cMock::new(&expectations), NoopDelay::new());

        let id = block_on(sensor.device_id()).unwrap();
        assert_eq!(id, DEVICE_ID);
        sensor.release().done();
    }

    #[test]
    fn test_probe_rejects_wrong_id() {
        let expectations = [
            I2cTransaction::write(I2C_ADDR, vec![0x35, 0x17]),
            I2cTransaction::write_read(I2C_ADDR, vec![0xEF, 0xC8], word_with_crc(0x0120)),
        ];
        let mut sensor = Shtc3::new(I2cMock::new(&expectations), NoopDelay::new());

        assert_eq!(block_on(sensor.probe()), Err(Error::WrongDevice(0x0120)));
        sensor.release().done();
    }

    #[test]
    fn test_measure_polls_until_ready() {
        let mut payload = word_with_crc(0x6666);
        payload.extend_from_slice(&word_with_crc(0x8000));

        let expectations = [
            I2cTransaction::write(I2C_ADDR, vec![0x78, 0x66]),
            // The sensor NACKs while the conversion is still running.
            I2cTransaction::read(I2C_ADDR, vec![0; 6])
                .with_error(I2cErrorKind::Other),
            I2cTransaction::read(I2C_ADDR, vec![0; 6])
                .with_error(I2cErrorKind::Other),
            I2cTransaction::read(I2C_ADDR, payload),
        ];
        let mut sensor = Shtc3::new(I2cMock::new(&expectations), NoopDelay::new());

        let m = block_on(sensor.measure(PowerMode::Normal, DataOrder::TemperatureFirst)).unwrap();
        assert_eq!(m.raw_temperature, 0x6666);
        assert_eq!(m.raw_humidity, 0x8000);
        sensor.release().done();
    }

    #[test]
    fn test_measure_humidity_first_swaps_words() {
        let mut payload = word_with_crc(0x8000);
        payload.extend_from_slice(&word_with_crc(0x6666));

        let expectations = [
            I2cTransaction::write_read(I2C_ADDR, vec![0x5C, 0x24], payload),
        ];
        let mut sensor = Shtc3::new(I2cMock::new(&expectations), NoopDelay::new());

        let m = block_on(
            sensor.measure_with_clock_stretch(PowerMode::Normal, DataOrder::HumidityFirst),
        )
        .unwrap();
        assert_eq!(m.raw_humidity, 0x8000);
        assert_eq!(m.raw_temperature, 0x6666);
        sensor.release().done();
    }

    #[test]
    fn test_measure_rejects_bad_crc() {
        let mut payload = word_with_crc(0x6666);
        payload.extend_from_slice(&word_with_crc(0x8000));
        payload[2] ^= 0xFF; // corrupt the temperature checksum

        let expectations = [I2cTransaction::write_read(
            I2C_ADDR,
            vec![0x7C, 0xA2],
            payload,
        )];
        let mut sensor = Shtc3::new(I2cMock::new(&expectations), NoopDelay::new());

        let result = block_on(
            sensor.measure_with_clock_stretch(PowerMode::Normal, DataOrder::TemperatureFirst),
        );
        assert_eq!(result, Err(Error::Crc));
        sensor.release().done();
    }
}
