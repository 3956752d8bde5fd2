//! W5500 register map and SPI frame encoding.
//!
//! Every SPI access is a three-byte header (16-bit offset address plus a
//! control byte selecting the register block and direction) followed by a
//! variable-length data phase. Each socket owns three blocks: its register
//! file and its TX and RX buffers.

use bitflags::bitflags;

/// Control byte for an SPI frame: block select bits, read/write bit,
/// variable-length data mode.
pub const fn control_byte(block: u8, write: bool) -> u8 {
    (block << 3) | ((write as u8) << 2)
}

/// Common register block.
pub const COMMON_BLOCK: u8 = 0x00;

/// Register block of socket `n`.
pub const fn socket_reg_block(socket: u8) -> u8 {
    (socket << 2) + 1
}

/// TX buffer block of socket `n`.
pub const fn socket_tx_block(socket: u8) -> u8 {
    (socket << 2) + 2
}

/// RX buffer block of socket `n`.
pub const fn socket_rx_block(socket: u8) -> u8 {
    (socket << 2) + 3
}

/// Common register offsets.
pub mod common {
    /// Mode register; bit 7 is software reset.
    pub const MR: u16 = 0x0000;
    /// Gateway address.
    pub const GAR: u16 = 0x0001;
    /// Subnet mask.
    pub const SUBR: u16 = 0x0005;
    /// Source hardware (MAC) address.
    pub const SHAR: u16 = 0x0009;
    /// Source IP address.
    pub const SIPR: u16 = 0x000F;
    /// Retry time, in units of 100 us.
    pub const RTR: u16 = 0x0019;
    /// Retry count.
    pub const RCR: u16 = 0x001B;
    /// PHY configuration; bit 0 reports link status.
    pub const PHYCFGR: u16 = 0x002E;
    /// Chip version, reads 0x04 on a W5500.
    pub const VERSIONR: u16 = 0x0039;

    /// MR software-reset bit.
    pub const MR_RST: u8 = 0x80;
    /// PHYCFGR link-up bit.
    pub const PHYCFGR_LNK: u8 = 0x01;
}

/// Per-socket register offsets.
pub mod sock {
    /// Socket mode.
    pub const MR: u16 = 0x0000;
    /// Socket command; clears to zero once the command is accepted.
    pub const CR: u16 = 0x0001;
    /// Socket interrupt flags; write one to clear.
    pub const IR: u16 = 0x0002;
    /// Socket status.
    pub const SR: u16 = 0x0003;
    /// Source port.
    pub const PORT: u16 = 0x0004;
    /// Destination hardware address.
    pub const DHAR: u16 = 0x0006;
    /// Destination IP address.
    pub const DIPR: u16 = 0x000C;
    /// Destination port.
    pub const DPORT: u16 = 0x0010;
    /// RX buffer size in KB.
    pub const RXBUF_SIZE: u16 = 0x001E;
    /// TX buffer size in KB.
    pub const TXBUF_SIZE: u16 = 0x001F;
    /// TX free size.
    pub const TX_FSR: u16 = 0x0020;
    /// TX write pointer.
    pub const TX_WR: u16 = 0x0024;
    /// RX received size.
    pub const RX_RSR: u16 = 0x0026;
    /// RX read pointer.
    pub const RX_RD: u16 = 0x0028;
}

/// Socket mode register values.
pub mod mode {
    pub const CLOSED: u8 = 0x00;
    pub const TCP: u8 = 0x01;
    pub const UDP: u8 = 0x02;
    pub const MACRAW: u8 = 0x04;
    /// Multicast flag, combined with [`UDP`].
    pub const MULTICAST: u8 = 0x80;
}

/// Socket commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketCommand {
    Open = 0x01,
    Listen = 0x02,
    Connect = 0x04,
    Disconnect = 0x08,
    Close = 0x10,
    Send = 0x20,
    SendMac = 0x21,
    SendKeepAlive = 0x22,
    Receive = 0x40,
}

/// Socket status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketStatus {
    Closed = 0x00,
    Init = 0x13,
    Listen = 0x14,
    SynSent = 0x15,
    SynRecv = 0x16,
    Established = 0x17,
    FinWait = 0x18,
    Closing = 0x1A,
    TimeWait = 0x1B,
    CloseWait = 0x1C,
    LastAck = 0x1D,
    Udp = 0x22,
    Macraw = 0x42,
}

impl SocketStatus {
    pub const fn from_register(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Closed),
            0x13 => Some(Self::Init),
            0x14 => Some(Self::Listen),
            0x15 => Some(Self::SynSent),
            0x16 => Some(Self::SynRecv),
            0x17 => Some(Self::Established),
            0x18 => Some(Self::FinWait),
            0x1A => Some(Self::Closing),
            0x1B => Some(Self::TimeWait),
            0x1C => Some(Self::CloseWait),
            0x1D => Some(Self::LastAck),
            0x22 => Some(Self::Udp),
            0x42 => Some(Self::Macraw),
            _ => None,
        }
    }

    /// States in which a socket is shutting down and may be reclaimed.
    pub const fn is_closing(self) -> bool {
        matches!(
            self,
            Self::FinWait | Self::Closing | Self::TimeWait | Self::CloseWait | Self::LastAck
        )
    }
}

bitflags! {
    /// Socket interrupt flags (Sn_IR). Writing a one clears the flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SocketInterrupt: u8 {
        const CONNECTED = 0x01;
        const DISCONNECTED = 0x02;
        const RECEIVED = 0x04;
        const TIMEOUT = 0x08;
        const SEND_OK = 0x10;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_byte_layout() {
        assert_eq!(control_byte(COMMON_BLOCK, false), 0x00);
        assert_eq!(control_byte(COMMON_BLOCK, true), 0x04);
        // Socket 1 register block is BSB 0b00101.
        assert_eq!(control_byte(socket_reg_block(1), true), 0b0010_1100);
        assert_eq!(control_byte(socket_rx_block(7), false), 0b1111_1000);
    }

    #[test]
    fn test_socket_blocks() {
        assert_eq!(socket_reg_block(0), 1);
        assert_eq!(socket_tx_block(0), 2);
        assert_eq!(socket_rx_block(0), 3);
        assert_eq!(socket_reg_block(7), 29);
    }

    #[test]
    fn test_status_decode() {
        assert_eq!(SocketStatus::from_register(0x17), Some(SocketStatus::Established));
        assert_eq!(SocketStatus::from_register(0x99), None);
        assert!(SocketStatus::TimeWait.is_closing());
        assert!(!SocketStatus::Established.is_closing());
    }
}
