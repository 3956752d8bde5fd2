//! WIZnet W5500 Ethernet controller driver.
//!
//! The W5500 carries a complete hardware TCP/IP engine behind an SPI
//! register interface: eight sockets, each with its own register file and
//! 2 KB TX/RX buffers. This module tree mirrors that layering:
//!
//! - [`registers`]: register map and SPI frame encoding
//! - [`W5500`]: bus core - frames, resets, PHY and chip identification
//! - [`socket`]: the socket command layer (open/listen/connect/send/recv)
//! - [`ethernet`]: interface lifecycle - static or DHCP configuration
//! - [`udp`]: datagram sockets in the Arduino begin/parse/read style
//! - [`dhcp`]: the DHCP client backing [`ethernet::Ethernet::dhcp_init`]
//! - [`http`]: a small HTTP server running over the socket layer

pub mod dhcp;
pub mod ethernet;
pub mod http;
pub mod registers;
pub mod socket;
pub mod udp;

pub use dhcp::Lease;
pub use ethernet::{Ethernet, HardwareStatus, LinkStatus, MaintainResult, NetworkConfig};
pub use http::{ContentInfo, HttpRequest, HttpServer, HttpState, Method, WebContent};
pub use registers::{SocketCommand, SocketInterrupt, SocketStatus};
pub use socket::Socket;
pub use udp::EthernetUdp;

use core::net::Ipv4Addr;

use embedded_hal::spi::Operation;
use embedded_hal_async::spi::SpiDevice;

use registers::{COMMON_BLOCK, common, control_byte};

/// Number of hardware sockets.
pub const SOCKET_COUNT: usize = 8;

/// TX/RX buffer size programmed per socket.
pub const SOCKET_BUFFER_SIZE: u16 = 2048;

/// VERSIONR value of a W5500.
pub const CHIP_VERSION: u8 = 0x04;

/// Bound on busy-wait loops over SPI registers. Each spin is at least one
/// three-byte frame on the bus, so this is milliseconds of real time even
/// on a fast clock.
const SPIN_LIMIT: u32 = 100_000;

/// Errors for the W5500 driver stack.
#[derive(Debug, PartialEq, Eq, thiserror_no_std::Error)]
pub enum Error<E> {
    /// SPI bus error.
    #[error("spi transfer failed")]
    Spi(E),
    /// VERSIONR did not identify a W5500.
    #[error("unexpected chip version")]
    WrongChip(u8),
    /// A controller or socket operation did not complete in time.
    #[error("operation timed out")]
    Timeout,
    /// All eight sockets are in use.
    #[error("no free socket available")]
    NoFreeSockets,
    /// The socket was not in a state that allows the operation.
    #[error("socket is not in a usable state")]
    InvalidSocketState,
    /// The peer closed the connection mid-operation.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// An address or port argument was invalid (unspecified IP, port 0).
    #[error("invalid address or port")]
    InvalidAddress,
    /// DHCP negotiation gave up before acquiring a lease.
    #[error("dhcp negotiation failed")]
    DhcpFailed,
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Self::Spi(e)
    }
}

/// W5500 bus core over an async SPI device.
pub struct W5500<SPI> {
    spi: SPI,
}

impl<SPI> W5500<SPI>
where
    SPI: SpiDevice,
{
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    /// Destroy the driver and release the bus.
    pub fn release(self) -> SPI {
        self.spi
    }

    // Frame primitives

    pub(crate) async fn read_frame(
        &mut self,
        block: u8,
        addr: u16,
        buf: &mut [u8],
    ) -> Result<(), Error<SPI::Error>> {
        let header = [(addr >> 8) as u8, addr as u8, control_byte(block, false)];
        self.spi
            .transaction(&mut [Operation::Write(&header), Operation::Read(buf)])
            .await
            .map_err(Error::Spi)
    }

    pub(crate) async fn write_frame(
        &mut self,
        block: u8,
        addr: u16,
        data: &[u8],
    ) -> Result<(), Error<SPI::Error>> {
        let header = [(addr >> 8) as u8, addr as u8, control_byte(block, true)];
        self.spi
            .transaction(&mut [Operation::Write(&header), Operation::Write(data)])
            .await
            .map_err(Error::Spi)
    }

    pub(crate) async fn read_u8(&mut self, block: u8, addr: u16) -> Result<u8, Error<SPI::Error>> {
        let mut buf = [0u8; 1];
        self.read_frame(block, addr, &mut buf).await?;
        Ok(buf[0])
    }

    pub(crate) async fn write_u8(
        &mut self,
        block: u8,
        addr: u16,
        value: u8,
    ) -> Result<(), Error<SPI::Error>> {
        self.write_frame(block, addr, &[value]).await
    }

    pub(crate) async fn read_u16(&mut self, block: u8, addr: u16) -> Result<u16, Error<SPI::Error>> {
        let mut buf = [0u8; 2];
        self.read_frame(block, addr, &mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    pub(crate) async fn write_u16(
        &mut self,
        block: u8,
        addr: u16,
        value: u16,
    ) -> Result<(), Error<SPI::Error>> {
        self.write_frame(block, addr, &value.to_be_bytes()).await
    }

    /// Counter registers (TX_FSR, RX_RSR) can change between the two byte
    /// reads; sample until two consecutive reads agree.
    pub(crate) async fn read_u16_stable(
        &mut self,
        block: u8,
        addr: u16,
    ) -> Result<u16, Error<SPI::Error>> {
        let mut previous = self.read_u16(block, addr).await?;
        for _ in 0..SPIN_LIMIT {
            let current = self.read_u16(block, addr).await?;
            if current == previous {
                return Ok(current);
            }
            previous = current;
        }
        Err(Error::Timeout)
    }

    // Chip-level operations

    /// Software-reset the chip and wait for the reset bit to clear.
    pub async fn reset(&mut self) -> Result<(), Error<SPI::Error>> {
        self.write_u8(COMMON_BLOCK, common::MR, common::MR_RST).await?;
        for _ in 0..SPIN_LIMIT {
            if self.read_u8(COMMON_BLOCK, common::MR).await? & common::MR_RST == 0 {
                return Ok(());
            }
        }
        Err(Error::Timeout)
    }

    /// Read the chip version register.
    pub async fn version(&mut self) -> Result<u8, Error<SPI::Error>> {
        self.read_u8(COMMON_BLOCK, common::VERSIONR).await
    }

    /// True while the PHY reports an established link.
    pub async fn link_up(&mut self) -> Result<bool, Error<SPI::Error>> {
        let phy = self.read_u8(COMMON_BLOCK, common::PHYCFGR).await?;
        Ok(phy & common::PHYCFGR_LNK != 0)
    }

    /// Reset the chip, verify it is a W5500 and program the socket buffer
    /// layout (2 KB TX and RX per socket).
    pub async fn begin(&mut self) -> Result<(), Error<SPI::Error>> {
        let version = self.version().await?;
        if version != CHIP_VERSION {
            log::error!("w5500 probe read version {version:#04x}");
            return Err(Error::WrongChip(version));
        }
        self.reset().await?;

        let kb = (SOCKET_BUFFER_SIZE / 1024) as u8;
        for s in 0..SOCKET_COUNT as u8 {
            let block = registers::socket_reg_block(s);
            self.write_u8(block, registers::sock::RXBUF_SIZE, kb).await?;
            self.write_u8(block, registers::sock::TXBUF_SIZE, kb).await?;
        }
        Ok(())
    }

    /// Retransmission timeout, in units of 100 us.
    pub async fn set_retry_time(&mut self, time_100us: u16) -> Result<(), Error<SPI::Error>> {
        self.write_u16(COMMON_BLOCK, common::RTR, time_100us).await
    }

    /// Retransmission count before a socket reports TIMEOUT.
    pub async fn set_retry_count(&mut self, count: u8) -> Result<(), Error<SPI::Error>> {
        self.write_u8(COMMON_BLOCK, common::RCR, count).await
    }

    // Address configuration

    pub async fn set_mac(&mut self, mac: [u8; 6]) -> Result<(), Error<SPI::Error>> {
        self.write_frame(COMMON_BLOCK, common::SHAR, &mac).await
    }

    pub async fn mac(&mut self) -> Result<[u8; 6], Error<SPI::Error>> {
        let mut mac = [0u8; 6];
        self.read_frame(COMMON_BLOCK, common::SHAR, &mut mac).await?;
        Ok(mac)
    }

    pub async fn set_ip(&mut self, ip: Ipv4Addr) -> Result<(), Error<SPI::Error>> {
        self.write_frame(COMMON_BLOCK, common::SIPR, &ip.octets()).await
    }

    pub async fn ip(&mut self) -> Result<Ipv4Addr, Error<SPI::Error>> {
        self.read_ip(common::SIPR).await
    }

    pub async fn set_gateway(&mut self, ip: Ipv4Addr) -> Result<(), Error<SPI::Error>> {
        self.write_frame(COMMON_BLOCK, common::GAR, &ip.octets()).await
    }

    pub async fn gateway(&mut self) -> Result<Ipv4Addr, Error<SPI::Error>> {
        self.read_ip(common::GAR).await
    }

    pub async fn set_subnet(&mut self, mask: Ipv4Addr) -> Result<(), Error<SPI::Error>> {
        self.write_frame(COMMON_BLOCK, common::SUBR, &mask.octets()).await
    }

    pub async fn subnet(&mut self) -> Result<Ipv4Addr, Error<SPI::Error>> {
        self.read_ip(common::SUBR).await
    }

    async fn read_ip(&mut self, addr: u16) -> Result<Ipv4Addr, Error<SPI::Error>> {
        let mut octets = [0u8; 4];
        self.read_frame(COMMON_BLOCK, addr, &mut octets).await?;
        Ok(Ipv4Addr::from(octets))
    }
}

/// Shared scripting helpers for the SPI-mock tests across this module tree.
#[cfg(test)]
pub(crate) mod testutil {
    extern crate std;

    use super::registers::control_byte;
    use embedded_hal_mock::eh1::spi::Transaction as SpiTransaction;
    use std::vec;
    use std::vec::Vec;

    pub(crate) fn frame_read(block: u8, addr: u16, data: Vec<u8>) -> Vec<SpiTransaction<u8>> {
        vec![
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![
                (addr >> 8) as u8,
                addr as u8,
                control_byte(block, false),
            ]),
            SpiTransaction::read_vec(data),
            SpiTransaction::transaction_end(),
        ]
    }

    pub(crate) fn frame_write(block: u8, addr: u16, data: Vec<u8>) -> Vec<SpiTransaction<u8>> {
        vec![
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![
                (addr >> 8) as u8,
                addr as u8,
                control_byte(block, true),
            ]),
            SpiTransaction::write_vec(data),
            SpiTransaction::transaction_end(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{frame_read, frame_write};
    use super::*;
    use embassy_futures::block_on;
    use embedded_hal_mock::eh1::spi::Mock as SpiMock;
    use std::vec;

    extern crate std;

    #[test]
    fn test_version_frame() {
        let expectations = frame_read(COMMON_BLOCK, common::VERSIONR, vec![CHIP_VERSION]);
        let mut chip = W5500::new(SpiMock::new(&expectations));

        assert_eq!(block_on(chip.version()).unwrap(), CHIP_VERSION);
        chip.release().done();
    }

    #[test]
    fn test_reset_polls_until_clear() {
        let mut expectations = frame_write(COMMON_BLOCK, common::MR, vec![common::MR_RST]);
        expectations.extend(frame_read(COMMON_BLOCK, common::MR, vec![common::MR_RST]));
        expectations.extend(frame_read(COMMON_BLOCK, common::MR, vec![0x00]));
        let mut chip = W5500::new(SpiMock::new(&expectations));

        block_on(chip.reset()).unwrap();
        chip.release().done();
    }

    #[test]
    fn test_begin_rejects_unknown_chip() {
        let expectations = frame_read(COMMON_BLOCK, common::VERSIONR, vec![0x03]);
        let mut chip = W5500::new(SpiMock::new(&expectations));

        assert_eq!(block_on(chip.begin()), Err(Error::WrongChip(0x03)));
        chip.release().done();
    }

    #[test]
    fn test_ip_round_trip() {
        let ip = Ipv4Addr::new(192, 168, 1, 42);
        let mut expectations = frame_write(COMMON_BLOCK, common::SIPR, vec![192, 168, 1, 42]);
        expectations.extend(frame_read(COMMON_BLOCK, common::SIPR, vec![192, 168, 1, 42]));
        let mut chip = W5500::new(SpiMock::new(&expectations));

        block_on(chip.set_ip(ip)).unwrap();
        assert_eq!(block_on(chip.ip()).unwrap(), ip);
        chip.release().done();
    }

    #[test]
    fn test_stable_counter_read_rides_out_updates() {
        let block = registers::socket_reg_block(0);
        let mut expectations = frame_read(block, registers::sock::RX_RSR, vec![0x00, 0x10]);
        expectations.extend(frame_read(block, registers::sock::RX_RSR, vec![0x00, 0x18]));
        expectations.extend(frame_read(block, registers::sock::RX_RSR, vec![0x00, 0x18]));
        let mut chip = W5500::new(SpiMock::new(&expectations));

        let value = block_on(chip.read_u16_stable(block, registers::sock::RX_RSR)).unwrap();
        assert_eq!(value, 0x18);
        chip.release().done();
    }
}
