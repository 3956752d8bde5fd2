//! DHCP client for interface configuration over the UDP layer.
//!
//! Implements the classic four-step handshake: broadcast DISCOVER, take
//! the first matching OFFER, broadcast a REQUEST for the offered address
//! and commit the lease on ACK. Lease renewal and rebinding are driven by
//! [`maintain`](DhcpClient::maintain) against a caller-supplied monotonic
//! seconds clock, since the driver itself is clock-free.

use core::net::Ipv4Addr;

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

use super::ethernet::MaintainResult;
use super::udp::EthernetUdp;
use super::{Error, W5500};

const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;

const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;

const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

// Message types (option 53).
const DISCOVER: u8 = 1;
const OFFER: u8 = 2;
const REQUEST: u8 = 3;
const ACK: u8 = 5;
const NAK: u8 = 6;

// Options.
const OPT_PAD: u8 = 0;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_HOSTNAME: u8 = 12;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_PARAM_REQUEST: u8 = 55;
const OPT_RENEWAL_TIME: u8 = 58;
const OPT_REBINDING_TIME: u8 = 59;
const OPT_END: u8 = 255;

const HOSTNAME: &[u8] = b"w5500";

/// Fixed-size scratch for outgoing messages: 236-byte header, cookie and
/// a small option set.
const MESSAGE_BUF_SIZE: usize = 300;

/// Receive scratch; servers keep replies under the classic 576-byte bound.
const RESPONSE_BUF_SIZE: usize = 576;

/// Poll interval while waiting for a server reply.
const RESPONSE_POLL_MS: u32 = 50;

/// Response window used for renew/rebind exchanges out of `maintain`.
const MAINTAIN_RESPONSE_TIMEOUT_MS: u32 = 4_000;

/// A committed DHCP lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub ip: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
    /// The server that granted the lease.
    pub server: Ipv4Addr,
    /// Total lease duration in seconds.
    pub lease_secs: u32,
    /// Renewal point (T1), seconds after acquisition.
    pub renew_secs: u32,
    /// Rebinding point (T2), seconds after acquisition.
    pub rebind_secs: u32,
    /// Monotonic second stamp at which the lease was committed.
    pub obtained_at: u32,
}

/// Decoded reply fields relevant to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Response {
    message_type: u8,
    yiaddr: Ipv4Addr,
    subnet: Option<Ipv4Addr>,
    gateway: Option<Ipv4Addr>,
    dns: Option<Ipv4Addr>,
    server: Option<Ipv4Addr>,
    lease_secs: Option<u32>,
    renew_secs: Option<u32>,
    rebind_secs: Option<u32>,
}

/// DHCP client state retained between [`acquire`](DhcpClient::acquire) and
/// [`maintain`](DhcpClient::maintain).
#[derive(Debug)]
pub(crate) struct DhcpClient {
    mac: [u8; 6],
    xid: u32,
    pub(crate) lease: Lease,
}

impl DhcpClient {
    /// Run the DISCOVER/OFFER/REQUEST/ACK handshake until a lease is
    /// committed or `timeout_ms` worth of response windows are exhausted.
    pub(crate) async fn acquire<SPI: SpiDevice, D: DelayNs>(
        w5500: &mut W5500<SPI>,
        delay: &mut D,
        mac: [u8; 6],
        timeout_ms: u32,
        response_timeout_ms: u32,
        now_seconds: u32,
    ) -> Result<Self, Error<SPI::Error>> {
        let mut udp = EthernetUdp::new();
        udp.begin(w5500, DHCP_CLIENT_PORT).await?;

        // No RNG on this side of the bus; fold the MAC and clock into a
        // transaction id that differs between hosts and attempts.
        let mut xid = u32::from_be_bytes([mac[2], mac[3], mac[4], mac[5]]) ^ now_seconds;

        let attempts = (timeout_ms / response_timeout_ms.max(1)).max(1);
        let result = 'handshake: {
            for attempt in 0..attempts {
                xid = xid.wrapping_add(1);
                let secs = attempt as u16;

                send_message(
                    w5500,
                    &mut udp,
                    Message {
                        xid,
                        mac,
                        secs,
                        message_type: DISCOVER,
                        ciaddr: Ipv4Addr::UNSPECIFIED,
                        requested: None,
                        server: None,
                    },
                )
                .await?;
                let Some(offer) =
                    await_reply(w5500, delay, &mut udp, xid, OFFER, response_timeout_ms).await?
                else {
                    continue;
                };
                if offer.message_type != OFFER {
                    continue;
                }

                send_message(
                    w5500,
                    &mut udp,
                    Message {
                        xid,
                        mac,
                        secs,
                        message_type: REQUEST,
                        ciaddr: Ipv4Addr::UNSPECIFIED,
                        requested: Some(offer.yiaddr),
                        server: offer.server,
                    },
                )
                .await?;
                let Some(ack) =
                    await_reply(w5500, delay, &mut udp, xid, ACK, response_timeout_ms).await?
                else {
                    continue;
                };
                if ack.message_type == NAK {
                    log::warn!("dhcp: request for {} was refused", offer.yiaddr);
                    continue;
                }

                let lease = commit_lease(&offer, &ack, now_seconds);
                log::info!(
                    "dhcp: leased {} for {} s from {}",
                    lease.ip,
                    lease.lease_secs,
                    lease.server
                );
                break 'handshake Ok(Self { mac, xid, lease });
            }
            Err(Error::DhcpFailed)
        };

        udp.stop(w5500).await?;
        result
    }

    /// Renew or rebind as the lease clock dictates. `now_seconds` must be
    /// from the same monotonic clock that stamped the lease.
    pub(crate) async fn maintain<SPI: SpiDevice, D: DelayNs>(
        &mut self,
        w5500: &mut W5500<SPI>,
        delay: &mut D,
        now_seconds: u32,
    ) -> Result<MaintainResult, Error<SPI::Error>> {
        let age = now_seconds.wrapping_sub(self.lease.obtained_at);
        if age < self.lease.renew_secs {
            return Ok(MaintainResult::NothingHappened);
        }

        if age < self.lease.rebind_secs {
            match self.renew(w5500, delay, now_seconds).await? {
                true => Ok(MaintainResult::RenewSuccess),
                false => Ok(MaintainResult::RenewFailed),
            }
        } else {
            match Self::acquire(
                w5500,
                delay,
                self.mac,
                2 * MAINTAIN_RESPONSE_TIMEOUT_MS,
                MAINTAIN_RESPONSE_TIMEOUT_MS,
                now_seconds,
            )
            .await
            {
                Ok(client) => {
                    *self = client;
                    Ok(MaintainResult::RebindSuccess)
                }
                Err(Error::DhcpFailed) => Ok(MaintainResult::RebindFailed),
                Err(e) => Err(e),
            }
        }
    }

    /// One REQUEST/ACK exchange with our address in `ciaddr`, as a
    /// renewing client does.
    async fn renew<SPI: SpiDevice, D: DelayNs>(
        &mut self,
        w5500: &mut W5500<SPI>,
        delay: &mut D,
        now_seconds: u32,
    ) -> Result<bool, Error<SPI::Error>> {
        let mut udp = EthernetUdp::new();
        udp.begin(w5500, DHCP_CLIENT_PORT).await?;
        self.xid = self.xid.wrapping_add(1);

        send_message(
            w5500,
            &mut udp,
            Message {
                xid: self.xid,
                mac: self.mac,
                secs: 0,
                message_type: REQUEST,
                ciaddr: self.lease.ip,
                requested: None,
                server: None,
            },
        )
        .await?;
        let reply = await_reply(
            w5500,
            delay,
            &mut udp,
            self.xid,
            ACK,
            MAINTAIN_RESPONSE_TIMEOUT_MS,
        )
        .await?;
        udp.stop(w5500).await?;

        match reply {
            Some(ack) if ack.message_type == ACK => {
                if let Some(lease_secs) = ack.lease_secs {
                    self.lease.lease_secs = lease_secs;
                    self.lease.renew_secs = ack.renew_secs.unwrap_or(lease_secs / 2);
                    self.lease.rebind_secs =
                        ack.rebind_secs.unwrap_or(lease_secs / 8 * 7);
                }
                self.lease.obtained_at = now_seconds;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

struct Message {
    xid: u32,
    mac: [u8; 6],
    secs: u16,
    message_type: u8,
    ciaddr: Ipv4Addr,
    requested: Option<Ipv4Addr>,
    server: Option<Ipv4Addr>,
}

async fn send_message<SPI: SpiDevice>(
    w5500: &mut W5500<SPI>,
    udp: &mut EthernetUdp,
    message: Message,
) -> Result<(), Error<SPI::Error>> {
    let mut buf = [0u8; MESSAGE_BUF_SIZE];
    let len = build_message(&mut buf, &message);
    udp.begin_packet(w5500, Ipv4Addr::BROADCAST, DHCP_SERVER_PORT).await?;
    udp.write(w5500, &buf[..len]).await?;
    udp.end_packet(w5500).await
}

/// Serialize a client message. Returns the number of bytes used.
fn build_message(buf: &mut [u8; MESSAGE_BUF_SIZE], message: &Message) -> usize {
    buf.fill(0);
    buf[0] = BOOTREQUEST;
    buf[1] = 1; // htype: Ethernet
    buf[2] = 6; // hlen
    buf[4..8].copy_from_slice(&message.xid.to_be_bytes());
    buf[8..10].copy_from_slice(&message.secs.to_be_bytes());
    buf[10..12].copy_from_slice(&0x8000u16.to_be_bytes()); // ask for broadcast replies
    buf[12..16].copy_from_slice(&message.ciaddr.octets());
    buf[28..34].copy_from_slice(&message.mac);
    buf[236..240].copy_from_slice(&MAGIC_COOKIE);

    let mut at = 240;
    let mut push = |bytes: &[u8]| {
        buf[at..at + bytes.len()].copy_from_slice(bytes);
        at += bytes.len();
    };

    push(&[OPT_MESSAGE_TYPE, 1, message.message_type]);
    push(&[OPT_HOSTNAME, HOSTNAME.len() as u8]);
    push(HOSTNAME);
    if let Some(requested) = message.requested {
        push(&[OPT_REQUESTED_IP, 4]);
        push(&requested.octets());
    }
    if let Some(server) = message.server {
        push(&[OPT_SERVER_ID, 4]);
        push(&server.octets());
    }
    push(&[
        OPT_PARAM_REQUEST,
        7,
        OPT_SUBNET_MASK,
        OPT_ROUTER,
        OPT_DNS,
        OPT_LEASE_TIME,
        OPT_SERVER_ID,
        OPT_RENEWAL_TIME,
        OPT_REBINDING_TIME,
    ]);
    push(&[OPT_END]);
    at
}

/// Poll for a reply to `xid` of the wanted type (NAK is always let
/// through so REQUEST rejections surface).
async fn await_reply<SPI: SpiDevice, D: DelayNs>(
    w5500: &mut W5500<SPI>,
    delay: &mut D,
    udp: &mut EthernetUdp,
    xid: u32,
    wanted: u8,
    response_timeout_ms: u32,
) -> Result<Option<Response>, Error<SPI::Error>> {
    let mut waited = 0;
    while waited < response_timeout_ms {
        if udp.parse_packet(w5500).await? > 0 {
            let mut buf = [0u8; RESPONSE_BUF_SIZE];
            let n = udp.read(w5500, &mut buf).await?;
            if let Some(response) = parse_response(&buf[..n], xid)
                && (response.message_type == wanted || response.message_type == NAK)
            {
                return Ok(Some(response));
            }
        }
        delay.delay_ms(RESPONSE_POLL_MS).await;
        waited += RESPONSE_POLL_MS;
    }
    Ok(None)
}

/// Decode a server reply, discarding anything that is not a BOOTREPLY to
/// our transaction.
fn parse_response(data: &[u8], xid: u32) -> Option<Response> {
    if data.len() < 240 || data[0] != BOOTREPLY {
        return None;
    }
    if data[4..8] != xid.to_be_bytes() || data[236..240] != MAGIC_COOKIE {
        return None;
    }

    let mut response = Response {
        message_type: 0,
        yiaddr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        subnet: None,
        gateway: None,
        dns: None,
        server: None,
        lease_secs: None,
        renew_secs: None,
        rebind_secs: None,
    };

    let mut at = 240;
    while at < data.len() {
        let code = data[at];
        if code == OPT_END {
            break;
        }
        if code == OPT_PAD {
            at += 1;
            continue;
        }
        let len = *data.get(at + 1)? as usize;
        let value = data.get(at + 2..at + 2 + len)?;
        match code {
            OPT_MESSAGE_TYPE => response.message_type = *value.first()?,
            OPT_SUBNET_MASK => response.subnet = option_ip(value),
            OPT_ROUTER => response.gateway = option_ip(value),
            OPT_DNS => response.dns = option_ip(value),
            OPT_SERVER_ID => response.server = option_ip(value),
            OPT_LEASE_TIME => response.lease_secs = option_u32(value),
            OPT_RENEWAL_TIME => response.renew_secs = option_u32(value),
            OPT_REBINDING_TIME => response.rebind_secs = option_u32(value),
            _ => {}
        }
        at += 2 + len;
    }

    (response.message_type != 0).then_some(response)
}

fn option_ip(value: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = value.get(..4)?.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

fn option_u32(value: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = value.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Merge the OFFER and ACK into a lease; the ACK wins where both carry a
/// value. T1/T2 default to 50% and 87.5% of the lease time.
fn commit_lease(offer: &Response, ack: &Response, now_seconds: u32) -> Lease {
    let lease_secs = ack.lease_secs.or(offer.lease_secs).unwrap_or(3600);
    Lease {
        ip: ack.yiaddr,
        subnet: ack.subnet.or(offer.subnet).unwrap_or(Ipv4Addr::UNSPECIFIED),
        gateway: ack.gateway.or(offer.gateway).unwrap_or(Ipv4Addr::UNSPECIFIED),
        dns: ack.dns.or(offer.dns).unwrap_or(Ipv4Addr::UNSPECIFIED),
        server: ack.server.or(offer.server).unwrap_or(Ipv4Addr::UNSPECIFIED),
        lease_secs,
        renew_secs: ack.renew_secs.unwrap_or(lease_secs / 2),
        rebind_secs: ack.rebind_secs.unwrap_or(lease_secs / 8 * 7),
        obtained_at: now_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    extern crate std;

    fn reply(xid: u32, message_type: u8, options: &[u8]) -> Vec<u8> {
        let mut data = std::vec![0u8; 240];
        data[0] = BOOTREPLY;
        data[4..8].copy_from_slice(&xid.to_be_bytes());
        data[16..20].copy_from_slice(&[192, 168, 1, 50]);
        data[236..240].copy_from_slice(&MAGIC_COOKIE);
        data.extend_from_slice(&[OPT_MESSAGE_TYPE, 1, message_type]);
        data.extend_from_slice(options);
        data.push(OPT_END);
        data
    }

    #[test]
    fn test_build_discover_layout() {
        let mut buf = [0u8; MESSAGE_BUF_SIZE];
        let len = build_message(
            &mut buf,
            &Message {
                xid: 0xDEADBEEF,
                mac: [2, 4, 6, 8, 10, 12],
                secs: 3,
                message_type: DISCOVER,
                ciaddr: Ipv4Addr::UNSPECIFIED,
                requested: None,
                server: None,
            },
        );

        assert_eq!(buf[0], BOOTREQUEST);
        assert_eq!(&buf[4..8], &0xDEADBEEFu32.to_be_bytes());
        assert_eq!(&buf[8..10], &[0, 3]);
        assert_eq!(&buf[10..12], &[0x80, 0x00]);
        assert_eq!(&buf[28..34], &[2, 4, 6, 8, 10, 12]);
        assert_eq!(&buf[236..240], &MAGIC_COOKIE);
        assert_eq!(&buf[240..243], &[OPT_MESSAGE_TYPE, 1, DISCOVER]);
        assert_eq!(buf[len - 1], OPT_END);
    }

    #[test]
    fn test_request_carries_requested_ip_and_server() {
        let mut buf = [0u8; MESSAGE_BUF_SIZE];
        let len = build_message(
            &mut buf,
            &Message {
                xid: 1,
                mac: [0; 6],
                secs: 0,
                message_type: REQUEST,
                ciaddr: Ipv4Addr::UNSPECIFIED,
                requested: Some(Ipv4Addr::new(192, 168, 1, 50)),
                server: Some(Ipv4Addr::new(192, 168, 1, 1)),
            },
        );

        let options = &buf[240..len];
        let requested = options
            .windows(6)
            .any(|w| w == [OPT_REQUESTED_IP, 4, 192, 168, 1, 50]);
        let server = options.windows(6).any(|w| w == [OPT_SERVER_ID, 4, 192, 168, 1, 1]);
        assert!(requested, "missing requested-ip option");
        assert!(server, "missing server-id option");
    }

    #[test]
    fn test_parse_response_reads_options() {
        let data = reply(
            7,
            OFFER,
            &[
                OPT_SUBNET_MASK, 4, 255, 255, 255, 0, //
                OPT_ROUTER, 4, 192, 168, 1, 1, //
                OPT_DNS, 4, 1, 1, 1, 1, //
                OPT_SERVER_ID, 4, 192, 168, 1, 1, //
                OPT_LEASE_TIME, 4, 0, 0, 0x0E, 0x10, //
            ],
        );

        let response = parse_response(&data, 7).unwrap();
        assert_eq!(response.message_type, OFFER);
        assert_eq!(response.yiaddr, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(response.subnet, Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(response.gateway, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(response.dns, Some(Ipv4Addr::new(1, 1, 1, 1)));
        assert_eq!(response.lease_secs, Some(3600));
    }

    #[test]
    fn test_parse_response_rejects_foreign_transactions() {
        let data = reply(7, OFFER, &[]);
        assert!(parse_response(&data, 8).is_none());

        let mut bad_cookie = reply(7, OFFER, &[]);
        bad_cookie[236] = 0;
        assert!(parse_response(&bad_cookie, 7).is_none());

        assert!(parse_response(&[0u8; 100], 7).is_none());
    }

    #[test]
    fn test_commit_lease_defaults_timers() {
        let offer = parse_response(
            &reply(7, OFFER, &[OPT_SERVER_ID, 4, 192, 168, 1, 1]),
            7,
        )
        .unwrap();
        let ack = parse_response(
            &reply(7, ACK, &[OPT_LEASE_TIME, 4, 0, 0, 0x0E, 0x10]),
            7,
        )
        .unwrap();

        let lease = commit_lease(&offer, &ack, 1000);
        assert_eq!(lease.ip, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(lease.server, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(lease.lease_secs, 3600);
        assert_eq!(lease.renew_secs, 1800);
        assert_eq!(lease.rebind_secs, 3150);
        assert_eq!(lease.obtained_at, 1000);
    }
}
