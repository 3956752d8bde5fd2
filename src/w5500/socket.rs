//! Socket command layer: claiming, opening and moving data through the
//! eight hardware sockets.
//!
//! The flow mirrors the chip's command protocol: writes to the socket
//! command register, spins until the command is accepted, and tracks
//! completion through the socket status and interrupt registers. TX data
//! lands in the socket's buffer at the TX write pointer; RX data is pulled
//! from the RX read pointer and acknowledged with a RECV command. The
//! W5500 wraps buffer addresses internally, so the pointers just increment.

use core::net::Ipv4Addr;

use embedded_hal_async::spi::SpiDevice;

use super::registers::{self as regs, SocketCommand, SocketInterrupt, SocketStatus, sock};
use super::{Error, SOCKET_BUFFER_SIZE, SOCKET_COUNT, SPIN_LIMIT, W5500};

/// Handle to a claimed hardware socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Socket(pub(crate) u8);

impl Socket {
    /// Hardware socket number (0..8).
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl<SPI> W5500<SPI>
where
    SPI: SpiDevice,
{
    /// Decoded socket status. `None` for transient in-between codes.
    pub async fn socket_status(
        &mut self,
        socket: Socket,
    ) -> Result<Option<SocketStatus>, Error<SPI::Error>> {
        let raw = self.read_u8(regs::socket_reg_block(socket.0), sock::SR).await?;
        Ok(SocketStatus::from_register(raw))
    }

    /// Pending socket interrupt flags.
    pub async fn socket_interrupts(
        &mut self,
        socket: Socket,
    ) -> Result<SocketInterrupt, Error<SPI::Error>> {
        let raw = self.read_u8(regs::socket_reg_block(socket.0), sock::IR).await?;
        Ok(SocketInterrupt::from_bits_truncate(raw))
    }

    /// Clear the given socket interrupt flags (write-one-to-clear).
    pub async fn socket_clear_interrupts(
        &mut self,
        socket: Socket,
        flags: SocketInterrupt,
    ) -> Result<(), Error<SPI::Error>> {
        self.write_u8(regs::socket_reg_block(socket.0), sock::IR, flags.bits()).await
    }

    async fn socket_command(
        &mut self,
        socket: Socket,
        command: SocketCommand,
    ) -> Result<(), Error<SPI::Error>> {
        let block = regs::socket_reg_block(socket.0);
        self.write_u8(block, sock::CR, command as u8).await?;
        for _ in 0..SPIN_LIMIT {
            if self.read_u8(block, sock::CR).await? == 0 {
                return Ok(());
            }
        }
        Err(Error::Timeout)
    }

    /// Find a socket to use: prefer one that is fully closed, otherwise
    /// reclaim one stuck in a shutdown state.
    async fn claim_socket(&mut self) -> Result<Socket, Error<SPI::Error>> {
        for s in 0..SOCKET_COUNT as u8 {
            if matches!(self.socket_status(Socket(s)).await?, Some(SocketStatus::Closed)) {
                return Ok(Socket(s));
            }
        }
        for s in 0..SOCKET_COUNT as u8 {
            let socket = Socket(s);
            if let Some(status) = self.socket_status(socket).await?
                && status.is_closing()
            {
                self.socket_close(socket).await?;
                return Ok(socket);
            }
        }
        log::warn!("w5500: all sockets in use");
        Err(Error::NoFreeSockets)
    }

    async fn open_socket(
        &mut self,
        socket: Socket,
        mode_bits: u8,
        port: u16,
    ) -> Result<(), Error<SPI::Error>> {
        let block = regs::socket_reg_block(socket.0);
        self.write_u8(block, sock::MR, mode_bits).await?;
        self.write_u16(block, sock::PORT, port).await?;
        // Drop interrupts left over from the previous owner.
        self.write_u8(block, sock::IR, 0xFF).await?;
        self.socket_command(socket, SocketCommand::Open).await?;
        for _ in 0..SPIN_LIMIT {
            if self.read_u8(block, sock::SR).await? != SocketStatus::Closed as u8 {
                return Ok(());
            }
        }
        Err(Error::Timeout)
    }

    /// Claim a socket and open it in the given mode on a local port.
    pub async fn socket_begin(
        &mut self,
        mode_bits: u8,
        port: u16,
    ) -> Result<Socket, Error<SPI::Error>> {
        let socket = self.claim_socket().await?;
        log::debug!("w5500: socket {} open mode {mode_bits:#04x} port {port}", socket.0);
        self.open_socket(socket, mode_bits, port).await?;
        Ok(socket)
    }

    /// Claim a socket and open it joined to a multicast group. The group
    /// membership is established through the destination hardware address
    /// (01:00:5E plus the low 23 bits of the group IP), which must be
    /// programmed before the OPEN command.
    pub async fn socket_begin_multicast(
        &mut self,
        mode_bits: u8,
        group: Ipv4Addr,
        port: u16,
    ) -> Result<Socket, Error<SPI::Error>> {
        let socket = self.claim_socket().await?;
        let block = regs::socket_reg_block(socket.0);
        let octets = group.octets();
        let dhar = [0x01, 0x00, 0x5E, octets[1] & 0x7F, octets[2], octets[3]];
        self.write_frame(block, sock::DHAR, &dhar).await?;
        self.write_frame(block, sock::DIPR, &octets).await?;
        self.write_u16(block, sock::DPORT, port).await?;
        self.open_socket(socket, mode_bits, port).await?;
        Ok(socket)
    }

    /// Close the socket immediately and clear its interrupts.
    pub async fn socket_close(&mut self, socket: Socket) -> Result<(), Error<SPI::Error>> {
        self.socket_command(socket, SocketCommand::Close).await?;
        self.write_u8(regs::socket_reg_block(socket.0), sock::IR, 0xFF).await
    }

    /// Put a freshly opened TCP socket into LISTEN.
    pub async fn socket_listen(&mut self, socket: Socket) -> Result<(), Error<SPI::Error>> {
        if !matches!(self.socket_status(socket).await?, Some(SocketStatus::Init)) {
            return Err(Error::InvalidSocketState);
        }
        self.socket_command(socket, SocketCommand::Listen).await
    }

    /// Start a TCP connection. Completion is observed through
    /// [`Self::socket_status`] reaching `Established`.
    pub async fn socket_connect(
        &mut self,
        socket: Socket,
        ip: Ipv4Addr,
        port: u16,
    ) -> Result<(), Error<SPI::Error>> {
        if ip.is_unspecified() || ip.is_broadcast() || port == 0 {
            return Err(Error::InvalidAddress);
        }
        let block = regs::socket_reg_block(socket.0);
        self.write_frame(block, sock::DIPR, &ip.octets()).await?;
        self.write_u16(block, sock::DPORT, port).await?;
        self.socket_command(socket, SocketCommand::Connect).await
    }

    /// Start a graceful TCP disconnect.
    pub async fn socket_disconnect(&mut self, socket: Socket) -> Result<(), Error<SPI::Error>> {
        self.socket_command(socket, SocketCommand::Disconnect).await
    }

    /// Bytes waiting in the RX buffer.
    pub async fn socket_recv_available(&mut self, socket: Socket) -> Result<u16, Error<SPI::Error>> {
        self.read_u16_stable(regs::socket_reg_block(socket.0), sock::RX_RSR).await
    }

    /// Pull up to `buf.len()` bytes out of the RX buffer. Returns 0 when
    /// nothing is pending.
    pub async fn socket_recv(
        &mut self,
        socket: Socket,
        buf: &mut [u8],
    ) -> Result<usize, Error<SPI::Error>> {
        let available = self.socket_recv_available(socket).await?;
        let count = (available as usize).min(buf.len());
        if count == 0 {
            return Ok(0);
        }

        let block = regs::socket_reg_block(socket.0);
        let ptr = self.read_u16(block, sock::RX_RD).await?;
        self.read_frame(regs::socket_rx_block(socket.0), ptr, &mut buf[..count]).await?;
        self.write_u16(block, sock::RX_RD, ptr.wrapping_add(count as u16)).await?;
        self.socket_command(socket, SocketCommand::Receive).await?;
        Ok(count)
    }

    /// Advance past `len` received bytes without copying them out.
    pub async fn socket_discard(
        &mut self,
        socket: Socket,
        len: u16,
    ) -> Result<(), Error<SPI::Error>> {
        let block = regs::socket_reg_block(socket.0);
        let ptr = self.read_u16(block, sock::RX_RD).await?;
        self.write_u16(block, sock::RX_RD, ptr.wrapping_add(len)).await?;
        self.socket_command(socket, SocketCommand::Receive).await
    }

    /// Look at the next received byte without consuming it.
    pub async fn socket_peek(&mut self, socket: Socket) -> Result<u8, Error<SPI::Error>> {
        let block = regs::socket_reg_block(socket.0);
        let ptr = self.read_u16(block, sock::RX_RD).await?;
        self.read_u8(regs::socket_rx_block(socket.0), ptr).await
    }

    /// Free space in the TX buffer.
    pub async fn socket_tx_free(&mut self, socket: Socket) -> Result<u16, Error<SPI::Error>> {
        self.read_u16_stable(regs::socket_reg_block(socket.0), sock::TX_FSR).await
    }

    /// Capacity of a socket TX buffer.
    pub const fn socket_tx_max(&self) -> u16 {
        SOCKET_BUFFER_SIZE
    }

    /// Copy data into the TX buffer at the write pointer and advance it.
    /// Does not issue a SEND.
    async fn socket_write_tx(
        &mut self,
        socket: Socket,
        data: &[u8],
    ) -> Result<(), Error<SPI::Error>> {
        let block = regs::socket_reg_block(socket.0);
        let ptr = self.read_u16(block, sock::TX_WR).await?;
        self.write_frame(regs::socket_tx_block(socket.0), ptr, data).await?;
        self.write_u16(block, sock::TX_WR, ptr.wrapping_add(data.len() as u16)).await
    }

    async fn wait_send_complete(&mut self, socket: Socket) -> Result<(), Error<SPI::Error>> {
        for _ in 0..SPIN_LIMIT {
            let ir = self.socket_interrupts(socket).await?;
            if ir.contains(SocketInterrupt::SEND_OK) {
                return self.socket_clear_interrupts(socket, SocketInterrupt::SEND_OK).await;
            }
            if ir.contains(SocketInterrupt::TIMEOUT) {
                self.socket_clear_interrupts(
                    socket,
                    SocketInterrupt::TIMEOUT | SocketInterrupt::SEND_OK,
                )
                .await?;
                log::warn!("w5500: send on socket {} hit the retry limit", socket.0);
                return Err(Error::Timeout);
            }
            if matches!(self.socket_status(socket).await?, Some(SocketStatus::Closed)) {
                return Err(Error::ConnectionClosed);
            }
        }
        Err(Error::Timeout)
    }

    /// Send all of `data` over an established TCP socket, chunking through
    /// the TX buffer as space frees up.
    pub async fn socket_send(
        &mut self,
        socket: Socket,
        data: &[u8],
    ) -> Result<usize, Error<SPI::Error>> {
        let mut sent = 0;
        while sent < data.len() {
            let chunk = (data.len() - sent).min(SOCKET_BUFFER_SIZE as usize);

            let mut spins = 0;
            loop {
                match self.socket_status(socket).await? {
                    Some(SocketStatus::Established) | Some(SocketStatus::CloseWait) => {}
                    _ => return Err(Error::ConnectionClosed),
                }
                if self.socket_tx_free(socket).await? >= chunk as u16 {
                    break;
                }
                spins += 1;
                if spins > SPIN_LIMIT {
                    return Err(Error::Timeout);
                }
            }

            self.socket_write_tx(socket, &data[sent..sent + chunk]).await?;
            self.socket_command(socket, SocketCommand::Send).await?;
            self.wait_send_complete(socket).await?;
            sent += chunk;
        }
        Ok(sent)
    }

    /// Set the destination of a UDP socket before staging a datagram.
    pub async fn socket_start_udp(
        &mut self,
        socket: Socket,
        ip: Ipv4Addr,
        port: u16,
    ) -> Result<(), Error<SPI::Error>> {
        if ip.is_unspecified() || port == 0 {
            return Err(Error::InvalidAddress);
        }
        let block = regs::socket_reg_block(socket.0);
        self.write_frame(block, sock::DIPR, &ip.octets()).await?;
        self.write_u16(block, sock::DPORT, port).await
    }

    /// Stage datagram payload bytes into the TX buffer without sending.
    /// Returns how many bytes fit.
    pub async fn socket_buffer_data(
        &mut self,
        socket: Socket,
        data: &[u8],
    ) -> Result<u16, Error<SPI::Error>> {
        let free = self.socket_tx_free(socket).await?;
        let count = data.len().min(free as usize);
        if count == 0 {
            return Ok(0);
        }
        self.socket_write_tx(socket, &data[..count]).await?;
        Ok(count as u16)
    }

    /// Transmit the staged datagram.
    pub async fn socket_send_udp(&mut self, socket: Socket) -> Result<(), Error<SPI::Error>> {
        self.socket_command(socket, SocketCommand::Send).await?;
        self.wait_send_complete(socket).await
    }
}
