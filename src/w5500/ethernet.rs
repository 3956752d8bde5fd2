//! Interface lifecycle: bring the controller up with a static address or a
//! DHCP lease, and report hardware and link state.

use core::net::Ipv4Addr;

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

use super::dhcp::{DhcpClient, Lease};
use super::{CHIP_VERSION, Error, W5500};

/// Poll interval while waiting for the PHY link.
const LINK_POLL_MS: u32 = 100;

/// Retransmission timeout programmed at bring-up: 200 ms.
const DEFAULT_RETRY_TIME_100US: u16 = 2_000;

/// Retransmission count programmed at bring-up.
const DEFAULT_RETRY_COUNT: u8 = 8;

/// What kind of controller answered on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareStatus {
    NoHardware,
    W5500,
}

/// PHY link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// The controller did not identify itself, so the PHY is unreadable.
    Unknown,
    On,
    Off,
}

/// Outcome of a [`Ethernet::maintain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintainResult {
    NothingHappened,
    RenewFailed,
    RenewSuccess,
    RebindFailed,
    RebindSuccess,
}

/// Static interface configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    pub mac: [u8; 6],
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub dns: Ipv4Addr,
}

impl NetworkConfig {
    /// Configuration with the conventional defaults derived from the host
    /// address: gateway and DNS at .1 of the /24, mask 255.255.255.0.
    pub fn new(mac: [u8; 6], ip: Ipv4Addr) -> Self {
        let octets = ip.octets();
        let gateway = Ipv4Addr::new(octets[0], octets[1], octets[2], 1);
        Self {
            mac,
            ip,
            gateway,
            subnet: Ipv4Addr::new(255, 255, 255, 0),
            dns: gateway,
        }
    }
}

/// An Ethernet interface over a W5500.
pub struct Ethernet<SPI, D> {
    chip: W5500<SPI>,
    delay: D,
    dns_server: Ipv4Addr,
    dhcp: Option<DhcpClient>,
}

impl<SPI, D> Ethernet<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    pub fn new(spi: SPI, delay: D) -> Self {
        Self {
            chip: W5500::new(spi),
            delay,
            dns_server: Ipv4Addr::UNSPECIFIED,
            dhcp: None,
        }
    }

    /// The underlying controller, for the socket-level layers (UDP, HTTP).
    pub fn chip(&mut self) -> &mut W5500<SPI> {
        &mut self.chip
    }

    /// Destroy the interface and release the bus.
    pub fn release(self) -> SPI {
        self.chip.release()
    }

    async fn begin_hardware(&mut self, mac: [u8; 6]) -> Result<(), Error<SPI::Error>> {
        self.chip.begin().await?;
        self.chip.set_mac(mac).await?;
        self.chip.set_retry_time(DEFAULT_RETRY_TIME_100US).await?;
        self.chip.set_retry_count(DEFAULT_RETRY_COUNT).await
    }

    /// Bring the interface up with a static configuration, waiting up to
    /// `timeout_ms` for the PHY link.
    pub async fn static_init(
        &mut self,
        config: &NetworkConfig,
        timeout_ms: u32,
    ) -> Result<(), Error<SPI::Error>> {
        self.begin_hardware(config.mac).await?;
        self.chip.set_ip(config.ip).await?;
        self.chip.set_gateway(config.gateway).await?;
        self.chip.set_subnet(config.subnet).await?;
        self.dns_server = config.dns;
        self.wait_for_link(timeout_ms).await?;
        log::info!("ethernet: static address {}", config.ip);
        Ok(())
    }

    /// Bring the interface up via DHCP. `now_seconds` is a monotonic
    /// seconds clock; pass later values of the same clock to
    /// [`Self::maintain`]. Returns the leased address.
    pub async fn dhcp_init(
        &mut self,
        mac: [u8; 6],
        timeout_ms: u32,
        response_timeout_ms: u32,
        now_seconds: u32,
    ) -> Result<Ipv4Addr, Error<SPI::Error>> {
        self.begin_hardware(mac).await?;
        let client = DhcpClient::acquire(
            &mut self.chip,
            &mut self.delay,
            mac,
            timeout_ms,
            response_timeout_ms,
            now_seconds,
        )
        .await?;
        let lease = client.lease;
        self.apply_lease(&lease).await?;
        self.dhcp = Some(client);
        Ok(lease.ip)
    }

    async fn apply_lease(&mut self, lease: &Lease) -> Result<(), Error<SPI::Error>> {
        self.chip.set_ip(lease.ip).await?;
        self.chip.set_gateway(lease.gateway).await?;
        self.chip.set_subnet(lease.subnet).await?;
        self.dns_server = lease.dns;
        Ok(())
    }

    /// Keep a DHCP lease alive. Call periodically with the monotonic
    /// seconds clock that was given to [`Self::dhcp_init`]. A no-op for
    /// statically configured interfaces.
    pub async fn maintain(
        &mut self,
        now_seconds: u32,
    ) -> Result<MaintainResult, Error<SPI::Error>> {
        let Some(dhcp) = self.dhcp.as_mut() else {
            return Ok(MaintainResult::NothingHappened);
        };
        let result = dhcp.maintain(&mut self.chip, &mut self.delay, now_seconds).await?;
        if matches!(result, MaintainResult::RenewSuccess | MaintainResult::RebindSuccess) {
            let lease = dhcp.lease;
            self.apply_lease(&lease).await?;
        }
        Ok(result)
    }

    /// The current DHCP lease, if the interface was configured by DHCP.
    pub fn lease(&self) -> Option<&Lease> {
        self.dhcp.as_ref().map(|client| &client.lease)
    }

    async fn wait_for_link(&mut self, timeout_ms: u32) -> Result<(), Error<SPI::Error>> {
        let mut waited = 0;
        loop {
            if self.chip.link_up().await? {
                return Ok(());
            }
            if waited >= timeout_ms {
                log::warn!("ethernet: link did not come up within {timeout_ms} ms");
                return Err(Error::Timeout);
            }
            self.delay.delay_ms(LINK_POLL_MS).await;
            waited += LINK_POLL_MS;
        }
    }

    /// Identify the controller on the bus.
    pub async fn hardware_status(&mut self) -> Result<HardwareStatus, Error<SPI::Error>> {
        Ok(match self.chip.version().await? {
            CHIP_VERSION => HardwareStatus::W5500,
            _ => HardwareStatus::NoHardware,
        })
    }

    /// PHY link state, or `Unknown` when no W5500 answers.
    pub async fn link_status(&mut self) -> Result<LinkStatus, Error<SPI::Error>> {
        if self.chip.version().await? != CHIP_VERSION {
            return Ok(LinkStatus::Unknown);
        }
        Ok(match self.chip.link_up().await? {
            true => LinkStatus::On,
            false => LinkStatus::Off,
        })
    }

    pub async fn local_ip(&mut self) -> Result<Ipv4Addr, Error<SPI::Error>> {
        self.chip.ip().await
    }

    pub async fn set_local_ip(&mut self, ip: Ipv4Addr) -> Result<(), Error<SPI::Error>> {
        self.chip.set_ip(ip).await
    }

    pub async fn gateway_ip(&mut self) -> Result<Ipv4Addr, Error<SPI::Error>> {
        self.chip.gateway().await
    }

    pub async fn set_gateway_ip(&mut self, ip: Ipv4Addr) -> Result<(), Error<SPI::Error>> {
        self.chip.set_gateway(ip).await
    }

    pub async fn subnet_mask(&mut self) -> Result<Ipv4Addr, Error<SPI::Error>> {
        self.chip.subnet().await
    }

    pub async fn set_subnet_mask(&mut self, mask: Ipv4Addr) -> Result<(), Error<SPI::Error>> {
        self.chip.set_subnet(mask).await
    }

    pub fn dns_server(&self) -> Ipv4Addr {
        self.dns_server
    }

    pub fn set_dns_server(&mut self, ip: Ipv4Addr) {
        self.dns_server = ip;
    }
}
