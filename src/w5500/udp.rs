//! UDP datagrams over a W5500 socket.
//!
//! The chip prefixes every received datagram with an 8-byte header carrying
//! the source address and payload length; [`EthernetUdp::parse_packet`]
//! consumes that header and exposes the payload through bounded reads.
//! Outgoing datagrams are staged into the socket TX buffer between
//! [`EthernetUdp::begin_packet`] and [`EthernetUdp::end_packet`].

use core::net::Ipv4Addr;

use embedded_hal_async::spi::SpiDevice;

use super::registers::mode;
use super::socket::Socket;
use super::{Error, SPIN_LIMIT, W5500};

/// A UDP endpoint bound to one hardware socket.
#[derive(Debug)]
pub struct EthernetUdp {
    socket: Option<Socket>,
    port: u16,
    /// Unread bytes left in the current datagram.
    remaining: u16,
    /// Bytes staged for the outgoing datagram.
    offset: u16,
    remote_ip: Ipv4Addr,
    remote_port: u16,
}

impl Default for EthernetUdp {
    fn default() -> Self {
        Self::new()
    }
}

impl EthernetUdp {
    pub fn new() -> Self {
        Self {
            socket: None,
            port: 0,
            remaining: 0,
            offset: 0,
            remote_ip: Ipv4Addr::UNSPECIFIED,
            remote_port: 0,
        }
    }

    /// The local port this endpoint is bound to.
    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Source address of the last parsed datagram.
    pub fn remote_ip(&self) -> Ipv4Addr {
        self.remote_ip
    }

    /// Source port of the last parsed datagram.
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Unread payload bytes of the current datagram.
    pub fn available(&self) -> u16 {
        self.remaining
    }

    fn socket<E>(&self) -> Result<Socket, Error<E>> {
        self.socket.ok_or(Error::InvalidSocketState)
    }

    /// Bind to a local port.
    pub async fn begin<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
        port: u16,
    ) -> Result<(), Error<SPI::Error>> {
        if let Some(socket) = self.socket.take() {
            w5500.socket_close(socket).await?;
        }
        self.socket = Some(w5500.socket_begin(mode::UDP, port).await?);
        self.port = port;
        self.remaining = 0;
        Ok(())
    }

    /// Bind to a local port joined to a multicast group.
    pub async fn begin_multicast<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
        group: Ipv4Addr,
        port: u16,
    ) -> Result<(), Error<SPI::Error>> {
        if let Some(socket) = self.socket.take() {
            w5500.socket_close(socket).await?;
        }
        self.socket =
            Some(w5500.socket_begin_multicast(mode::UDP | mode::MULTICAST, group, port).await?);
        self.port = port;
        self.remaining = 0;
        Ok(())
    }

    /// Release the socket.
    pub async fn stop<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
    ) -> Result<(), Error<SPI::Error>> {
        if let Some(socket) = self.socket.take() {
            w5500.socket_close(socket).await?;
        }
        Ok(())
    }

    /// Move to the next received datagram. Any unread remainder of the
    /// previous one is discarded first. Returns the payload length, or 0
    /// when no datagram is waiting.
    pub async fn parse_packet<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
    ) -> Result<u16, Error<SPI::Error>> {
        let socket = self.socket()?;
        if self.remaining > 0 {
            w5500.socket_discard(socket, self.remaining).await?;
            self.remaining = 0;
        }

        if w5500.socket_recv_available(socket).await? == 0 {
            return Ok(0);
        }

        // 8-byte chip header: source IP, source port, payload length.
        let mut header = [0u8; 8];
        let n = w5500.socket_recv(socket, &mut header).await?;
        if n < header.len() {
            log::warn!("w5500: truncated udp header ({n} bytes)");
            return Ok(0);
        }
        self.remote_ip = Ipv4Addr::new(header[0], header[1], header[2], header[3]);
        self.remote_port = u16::from_be_bytes([header[4], header[5]]);
        self.remaining = u16::from_be_bytes([header[6], header[7]]);
        Ok(self.remaining)
    }

    /// Read payload bytes from the current datagram.
    pub async fn read<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
        buf: &mut [u8],
    ) -> Result<usize, Error<SPI::Error>> {
        let socket = self.socket()?;
        let want = buf.len().min(self.remaining as usize);
        if want == 0 {
            return Ok(0);
        }
        let n = w5500.socket_recv(socket, &mut buf[..want]).await?;
        self.remaining -= n as u16;
        Ok(n)
    }

    /// Read a single payload byte, if one remains.
    pub async fn read_byte<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
    ) -> Result<Option<u8>, Error<SPI::Error>> {
        let mut byte = [0u8; 1];
        Ok(match self.read(w5500, &mut byte).await? {
            0 => None,
            _ => Some(byte[0]),
        })
    }

    /// Look at the next payload byte without consuming it. Returns `None`
    /// before [`Self::parse_packet`] to avoid handing out header bytes.
    pub async fn peek<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
    ) -> Result<Option<u8>, Error<SPI::Error>> {
        let Some(socket) = self.socket else {
            return Ok(None);
        };
        if self.remaining == 0 {
            return Ok(None);
        }
        Ok(Some(w5500.socket_peek(socket).await?))
    }

    /// Start staging a datagram to the given destination.
    pub async fn begin_packet<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
        ip: Ipv4Addr,
        port: u16,
    ) -> Result<(), Error<SPI::Error>> {
        let socket = self.socket()?;
        self.offset = 0;
        w5500.socket_start_udp(socket, ip, port).await
    }

    /// Append payload bytes to the staged datagram. Returns how many fit.
    pub async fn write<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
        data: &[u8],
    ) -> Result<u16, Error<SPI::Error>> {
        let socket = self.socket()?;
        let written = w5500.socket_buffer_data(socket, data).await?;
        self.offset += written;
        Ok(written)
    }

    /// Transmit the staged datagram.
    pub async fn end_packet<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
    ) -> Result<(), Error<SPI::Error>> {
        let socket = self.socket()?;
        w5500.socket_send_udp(socket).await
    }

    /// Wait until the TX buffer has fully drained onto the wire.
    pub async fn flush<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
    ) -> Result<(), Error<SPI::Error>> {
        let socket = self.socket()?;
        let max = w5500.socket_tx_max();
        for _ in 0..SPIN_LIMIT {
            if w5500.socket_tx_free(socket).await? == max {
                return Ok(());
            }
        }
        Err(Error::Timeout)
    }
}
