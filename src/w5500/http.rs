//! HTTP server over the W5500 socket layer.
//!
//! A pool of TCP sockets listens on one port; each connection walks a
//! per-socket state machine from `Idle` through request parsing to
//! response streaming and back. Responses come from the application
//! through the [`WebContent`] trait: CGI handlers answer dynamic URIs,
//! everything else is looked up as named static content and streamed out
//! in buffer-sized chunks, so a page larger than a socket buffer spreads
//! across several [`HttpServer::run`] calls.
//!
//! ```no_run
//! # async fn demo<SPI: embedded_hal_async::spi::SpiDevice>(
//! #     w5500: &mut qwiic_rs::w5500::W5500<SPI>,
//! #     content: impl qwiic_rs::w5500::WebContent,
//! # ) -> Result<(), qwiic_rs::w5500::Error<SPI::Error>> {
//! use qwiic_rs::w5500::HttpServer;
//!
//! let mut buf = [0u8; 2048];
//! let mut server: HttpServer<_, 4> = HttpServer::new(80, content, &mut buf);
//! server.init(w5500).await?;
//! loop {
//!     server.run(w5500).await?;
//! }
//! # }
//! ```

use core::fmt::Write as _;

use embedded_hal_async::spi::SpiDevice;
use heapless::String;

use super::registers::{SocketInterrupt, SocketStatus, mode};
use super::socket::Socket;
use super::{Error, W5500};

/// Longest request URI the server accepts.
pub const MAX_URI_SIZE: usize = 256;

/// Longest static content name (URI path without the leading slash).
pub const MAX_CONTENT_NAME_LEN: usize = 128;

/// Scratch for CGI handler output.
const CGI_BUFFER_SIZE: usize = 512;

/// Header slots handed to the request parser.
const MAX_HEADERS: usize = 16;

/// Response head scratch; status lines and the content-type table are
/// bounded, so this cannot overflow.
const RESPONSE_HEAD_SIZE: usize = 160;

/// Consecutive `run` visits a connection may make no progress before the
/// server forces it closed.
const STALE_RUN_LIMIT: u32 = 10_000;

/// Connection processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpState {
    /// Listening or waiting for request bytes.
    #[default]
    Idle,
    /// Request bytes received, parse pending.
    ReqInproc,
    /// Request parsed and dispatched.
    ReqDone,
    /// Response body partially streamed.
    ResInproc,
    /// Response complete, connection closing.
    ResDone,
}

/// Request methods the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

/// A parsed request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpRequest<'a> {
    pub method: Method,
    pub uri: &'a str,
}

/// Handle to an opened piece of static content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentInfo {
    pub id: u16,
    pub len: u32,
}

/// Application callbacks serving the actual content.
///
/// `open_content`/`read_content`/`close_content` back static pages; the
/// CGI hooks get first refusal on every URI and answer with a complete
/// response body.
pub trait WebContent {
    /// Look up static content by name. `None` produces a 404.
    fn open_content(&mut self, name: &str) -> Option<ContentInfo>;

    /// Copy content bytes at `offset` into `buf`, returning how many were
    /// produced. Returning 0 before the declared length aborts the
    /// response.
    fn read_content(&mut self, id: u16, offset: u32, buf: &mut [u8]) -> usize;

    /// Done with this content handle.
    fn close_content(&mut self, id: u16);

    /// Answer a GET/HEAD URI dynamically. `None` falls through to static
    /// content.
    fn get_cgi(&mut self, _uri: &str, _out: &mut [u8]) -> Option<usize> {
        None
    }

    /// Answer a POST. `None` produces a 404.
    fn post_cgi(&mut self, _uri: &str, _body: &[u8], _out: &mut [u8]) -> Option<usize> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusLine {
    Ok,
    BadRequest,
    NotFound,
}

impl StatusLine {
    const fn as_str(self) -> &'static str {
        match self {
            StatusLine::Ok => "200 OK",
            StatusLine::BadRequest => "400 Bad Request",
            StatusLine::NotFound => "404 Not Found",
        }
    }

    const fn error_body(self) -> &'static str {
        match self {
            StatusLine::Ok => "",
            StatusLine::BadRequest => "<html><body><h1>400 Bad Request</h1></body></html>",
            StatusLine::NotFound => "<html><body><h1>404 Not Found</h1></body></html>",
        }
    }
}

/// Per-connection bookkeeping.
#[derive(Debug, Default)]
struct HttpSocket {
    socket: Option<Socket>,
    state: HttpState,
    file_id: u16,
    file_len: u32,
    file_offset: u32,
    file_open: bool,
    file_name: String<MAX_CONTENT_NAME_LEN>,
    stale_runs: u32,
}

impl HttpSocket {
    fn reset_transfer(&mut self) {
        self.state = HttpState::Idle;
        self.file_id = 0;
        self.file_len = 0;
        self.file_offset = 0;
        self.file_open = false;
        self.file_name.clear();
        self.stale_runs = 0;
    }
}

/// HTTP server multiplexing `N` connections on one port.
pub struct HttpServer<'a, C, const N: usize = 4> {
    port: u16,
    content: C,
    buf: &'a mut [u8],
    sockets: [HttpSocket; N],
}

impl<'a, C, const N: usize> HttpServer<'a, C, N>
where
    C: WebContent,
{
    /// Create a server on `port`. `buf` is the shared request/response
    /// scratch; it should be at least one socket buffer (2 KB) for
    /// efficient streaming and must hold a complete request head.
    pub fn new(port: u16, content: C, buf: &'a mut [u8]) -> Self {
        Self {
            port,
            content,
            buf,
            sockets: core::array::from_fn(|_| HttpSocket::default()),
        }
    }

    /// The application content provider.
    pub fn content(&mut self) -> &mut C {
        &mut self.content
    }

    /// Processing state of one connection slot.
    pub fn socket_state(&self, index: usize) -> HttpState {
        self.sockets[index].state
    }

    /// Open and listen on all `N` connection slots.
    pub async fn init<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
    ) -> Result<(), Error<SPI::Error>> {
        for slot in &mut self.sockets {
            let socket = w5500.socket_begin(mode::TCP, self.port).await?;
            w5500.socket_listen(socket).await?;
            slot.reset_transfer();
            slot.socket = Some(socket);
        }
        log::info!("http: listening on port {}", self.port);
        Ok(())
    }

    /// Step every connection once. Call this from the application's main
    /// loop; each call makes at most one unit of progress per connection
    /// (accept, parse-and-respond, or one streamed chunk).
    pub async fn run<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
    ) -> Result<(), Error<SPI::Error>> {
        for index in 0..N {
            self.run_socket(w5500, index).await?;
        }
        Ok(())
    }

    async fn run_socket<SPI: SpiDevice>(
        &mut self,
        w5500: &mut W5500<SPI>,
        index: usize,
    ) -> Result<(), Error<SPI::Error>> {
        let HttpServer {
            port,
            content,
            buf,
            sockets,
        } = self;
        let slot = &mut sockets[index];

        let Some(socket) = slot.socket else {
            let socket = w5500.socket_begin(mode::TCP, *port).await?;
            w5500.socket_listen(socket).await?;
            slot.reset_transfer();
            slot.socket = Some(socket);
            return Ok(());
        };

        match w5500.socket_status(socket).await? {
            Some(SocketStatus::Established) => {
                let ir = w5500.socket_interrupts(socket).await?;
                if ir.contains(SocketInterrupt::CONNECTED) {
                    w5500
                        .socket_clear_interrupts(socket, SocketInterrupt::CONNECTED)
                        .await?;
                }

                match slot.state {
                    HttpState::Idle => {
                        if w5500.socket_recv_available(socket).await? > 0 {
                            slot.state = HttpState::ReqInproc;
                            let len = w5500.socket_recv(socket, buf).await?;
                            handle_request(w5500, content, buf, len, slot, socket).await?;
                        } else {
                            slot.stale_runs += 1;
                            if slot.stale_runs > STALE_RUN_LIMIT {
                                log::debug!("http: dropping idle connection on slot {index}");
                                finish(w5500, content, slot, socket).await?;
                            }
                        }
                    }
                    HttpState::ResInproc => {
                        stream_chunk(w5500, content, buf, slot, socket).await?;
                    }
                    // A finished connection waits here for the peer to
                    // complete the close.
                    _ => {}
                }
            }
            Some(SocketStatus::CloseWait) => {
                finish(w5500, content, slot, socket).await?;
            }
            Some(SocketStatus::Closed) => {
                if slot.file_open {
                    content.close_content(slot.file_id);
                }
                slot.reset_transfer();
                let socket = w5500.socket_begin(mode::TCP, *port).await?;
                w5500.socket_listen(socket).await?;
                slot.socket = Some(socket);
            }
            Some(status) if status.is_closing() => {
                // Connection is tearing down on its own; just make sure no
                // content handle leaks while we wait for Closed.
                if slot.file_open {
                    content.close_content(slot.file_id);
                    slot.file_open = false;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

async fn handle_request<SPI: SpiDevice, C: WebContent>(
    w5500: &mut W5500<SPI>,
    content: &mut C,
    buf: &mut [u8],
    len: usize,
    slot: &mut HttpSocket,
    socket: Socket,
) -> Result<(), Error<SPI::Error>> {
    let Ok((request, body_start)) = parse_request(&buf[..len]) else {
        log::debug!("http: unparseable request ({len} bytes)");
        send_error(w5500, socket, StatusLine::BadRequest).await?;
        return finish(w5500, content, slot, socket).await;
    };
    let method = request.method;
    let mut uri: String<MAX_URI_SIZE> = String::new();
    if uri.push_str(request.uri).is_err() {
        send_error(w5500, socket, StatusLine::BadRequest).await?;
        return finish(w5500, content, slot, socket).await;
    }
    slot.state = HttpState::ReqDone;
    log::debug!("http: {method:?} {uri}");

    match method {
        Method::Post => {
            let mut cgi = [0u8; CGI_BUFFER_SIZE];
            let body = &buf[body_start..len];
            match content.post_cgi(&uri, body, &mut cgi) {
                Some(n) => {
                    let head = response_head(StatusLine::Ok, "text/html", n);
                    w5500.socket_send(socket, head.as_bytes()).await?;
                    w5500.socket_send(socket, &cgi[..n]).await?;
                }
                None => send_error(w5500, socket, StatusLine::NotFound).await?,
            }
            finish(w5500, content, slot, socket).await
        }
        Method::Get | Method::Head => {
            let mut cgi = [0u8; CGI_BUFFER_SIZE];
            if let Some(n) = content.get_cgi(&uri, &mut cgi) {
                let head = response_head(StatusLine::Ok, "text/html", n);
                w5500.socket_send(socket, head.as_bytes()).await?;
                if method == Method::Get {
                    w5500.socket_send(socket, &cgi[..n]).await?;
                }
                return finish(w5500, content, slot, socket).await;
            }

            let name = content_name(&uri);
            let mut stored: String<MAX_CONTENT_NAME_LEN> = String::new();
            if stored.push_str(name).is_err() {
                send_error(w5500, socket, StatusLine::NotFound).await?;
                return finish(w5500, content, slot, socket).await;
            }
            let Some(info) = content.open_content(&stored) else {
                log::debug!("http: no content named {stored}");
                send_error(w5500, socket, StatusLine::NotFound).await?;
                return finish(w5500, content, slot, socket).await;
            };

            let head = response_head(StatusLine::Ok, content_type_for(&stored), info.len as usize);
            w5500.socket_send(socket, head.as_bytes()).await?;

            if method == Method::Head || info.len == 0 {
                content.close_content(info.id);
                return finish(w5500, content, slot, socket).await;
            }

            slot.file_id = info.id;
            slot.file_len = info.len;
            slot.file_offset = 0;
            slot.file_open = true;
            slot.file_name = stored;
            slot.state = HttpState::ResInproc;
            stream_chunk(w5500, content, buf, slot, socket).await
        }
    }
}

/// Push one buffer's worth of the open content out the socket.
async fn stream_chunk<SPI: SpiDevice, C: WebContent>(
    w5500: &mut W5500<SPI>,
    content: &mut C,
    buf: &mut [u8],
    slot: &mut HttpSocket,
    socket: Socket,
) -> Result<(), Error<SPI::Error>> {
    let remaining = (slot.file_len - slot.file_offset) as usize;
    let chunk = remaining.min(buf.len());
    let produced = content.read_content(slot.file_id, slot.file_offset, &mut buf[..chunk]);
    if produced == 0 {
        log::warn!(
            "http: content {} ended early at offset {}",
            slot.file_name,
            slot.file_offset
        );
        return finish(w5500, content, slot, socket).await;
    }

    w5500.socket_send(socket, &buf[..produced]).await?;
    slot.file_offset += produced as u32;
    slot.stale_runs = 0;

    if slot.file_offset >= slot.file_len {
        return finish(w5500, content, slot, socket).await;
    }
    Ok(())
}

/// Close out a connection: release any open content, start the TCP close
/// and mark the response finished. The slot re-opens once the socket
/// reaches `Closed`.
async fn finish<SPI: SpiDevice, C: WebContent>(
    w5500: &mut W5500<SPI>,
    content: &mut C,
    slot: &mut HttpSocket,
    socket: Socket,
) -> Result<(), Error<SPI::Error>> {
    if slot.file_open {
        content.close_content(slot.file_id);
        slot.file_open = false;
    }
    w5500.socket_disconnect(socket).await?;
    slot.state = HttpState::ResDone;
    Ok(())
}

async fn send_error<SPI: SpiDevice>(
    w5500: &mut W5500<SPI>,
    socket: Socket,
    status: StatusLine,
) -> Result<(), Error<SPI::Error>> {
    let body = status.error_body();
    let head = response_head(status, "text/html", body.len());
    w5500.socket_send(socket, head.as_bytes()).await?;
    w5500.socket_send(socket, body.as_bytes()).await?;
    Ok(())
}

enum ParseError {
    Incomplete,
    Malformed,
    UnsupportedMethod,
}

/// Parse the request head. Returns the request line and the offset where
/// the body starts.
fn parse_request(data: &[u8]) -> Result<(HttpRequest<'_>, usize), ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    match request.parse(data) {
        Ok(httparse::Status::Complete(body_start)) => {
            let method = match request.method {
                Some("GET") => Method::Get,
                Some("HEAD") => Method::Head,
                Some("POST") => Method::Post,
                _ => return Err(ParseError::UnsupportedMethod),
            };
            let uri = request.path.ok_or(ParseError::Malformed)?;
            Ok((HttpRequest { method, uri }, body_start))
        }
        Ok(httparse::Status::Partial) => Err(ParseError::Incomplete),
        Err(_) => Err(ParseError::Malformed),
    }
}

/// Map a request URI to a static content name: query and fragment are cut,
/// the leading slash is dropped and the bare root becomes `index.html`.
fn content_name(uri: &str) -> &str {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let name = path.trim_start_matches('/');
    if name.is_empty() { "index.html" } else { name }
}

/// Content-Type from the file extension.
fn content_type_for(name: &str) -> &'static str {
    let extension = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "ico" => "image/x-icon",
        "svg" => "image/svg+xml",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

fn response_head(
    status: StatusLine,
    content_type: &str,
    content_len: usize,
) -> String<RESPONSE_HEAD_SIZE> {
    let mut head = String::new();
    // Status lines and content types come from fixed tables, so this
    // cannot exceed the capacity.
    let _ = write!(
        head,
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status.as_str(),
        content_type,
        content_len
    );
    head
}

#[cfg(test)]
mod tests {
    use super::super::registers::{self as regs, SocketCommand, sock};
    use super::super::testutil::{frame_read, frame_write};
    use super::*;
    use embassy_futures::block_on;
    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction as SpiTransaction};
    use std::vec;
    use std::vec::Vec;

    extern crate std;

    #[test]
    fn test_parse_get_request() {
        let data = b"GET /status.html HTTP/1.1\r\nHost: device\r\n\r\n";
        let (request, body_start) = parse_request(data).ok().unwrap();
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.uri, "/status.html");
        assert_eq!(body_start, data.len());
    }

    #[test]
    fn test_parse_post_finds_body() {
        let data = b"POST /led.cgi HTTP/1.1\r\nContent-Length: 4\r\n\r\non=1";
        let (request, body_start) = parse_request(data).ok().unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.uri, "/led.cgi");
        assert_eq!(&data[body_start..], b"on=1");
    }

    #[test]
    fn test_parse_rejects_unsupported_and_partial() {
        assert!(parse_request(b"PUT /x HTTP/1.1\r\n\r\n").is_err());
        assert!(parse_request(b"GET /x HTTP/1.1\r\nHost: a").is_err());
        assert!(parse_request(b"\x00\x01\x02").is_err());
    }

    #[test]
    fn test_content_name_mapping() {
        assert_eq!(content_name("/"), "index.html");
        assert_eq!(content_name(""), "index.html");
        assert_eq!(content_name("/style.css?v=2"), "style.css");
        assert_eq!(content_name("/deep/page.html#top"), "deep/page.html");
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("index.html"), "text/html");
        assert_eq!(content_type_for("app.js"), "application/javascript");
        assert_eq!(content_type_for("logo.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("firmware.bin"), "application/octet-stream");
        assert_eq!(content_type_for("README"), "application/octet-stream");
    }

    #[test]
    fn test_response_head_format() {
        let head = response_head(StatusLine::Ok, "text/html", 42);
        assert_eq!(
            head.as_str(),
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 42\r\nConnection: close\r\n\r\n"
        );
    }

    struct MockContent {
        closed: Vec<u16>,
    }

    impl WebContent for MockContent {
        fn open_content(&mut self, name: &str) -> Option<ContentInfo> {
            (name == "index.html").then_some(ContentInfo { id: 7, len: 5 })
        }

        fn read_content(&mut self, _id: u16, offset: u32, buf: &mut [u8]) -> usize {
            let data = b"hello";
            let slice = &data[offset as usize..];
            let n = slice.len().min(buf.len());
            buf[..n].copy_from_slice(&slice[..n]);
            n
        }

        fn close_content(&mut self, id: u16) {
            self.closed.push(id);
        }
    }

    fn send_traffic(socket: u8, tx_ptr: u16, data: &[u8]) -> Vec<SpiTransaction<u8>> {
        let block = regs::socket_reg_block(socket);
        let mut t = frame_read(block, sock::SR, vec![SocketStatus::Established as u8]);
        t.extend(frame_read(block, sock::TX_FSR, vec![0x08, 0x00]));
        t.extend(frame_read(block, sock::TX_FSR, vec![0x08, 0x00]));
        t.extend(frame_read(block, sock::TX_WR, tx_ptr.to_be_bytes().to_vec()));
        t.extend(frame_write(regs::socket_tx_block(socket), tx_ptr, data.to_vec()));
        t.extend(frame_write(
            block,
            sock::TX_WR,
            (tx_ptr + data.len() as u16).to_be_bytes().to_vec(),
        ));
        t.extend(frame_write(block, sock::CR, vec![SocketCommand::Send as u8]));
        t.extend(frame_read(block, sock::CR, vec![0x00]));
        t.extend(frame_read(block, sock::IR, vec![SocketInterrupt::SEND_OK.bits()]));
        t.extend(frame_write(block, sock::IR, vec![SocketInterrupt::SEND_OK.bits()]));
        t
    }

    #[test]
    fn test_run_serves_static_content() {
        let request = b"GET / HTTP/1.1\r\nHost: device\r\n\r\n";
        let block = regs::socket_reg_block(0);
        let request_len = request.len() as u16;

        // Connection slot 0 established with a pending request.
        let mut expectations = frame_read(block, sock::SR, vec![SocketStatus::Established as u8]);
        expectations.extend(frame_read(block, sock::IR, vec![0x00]));
        expectations.extend(frame_read(block, sock::RX_RSR, request_len.to_be_bytes().to_vec()));
        expectations.extend(frame_read(block, sock::RX_RSR, request_len.to_be_bytes().to_vec()));
        // socket_recv pulls the request.
        expectations.extend(frame_read(block, sock::RX_RSR, request_len.to_be_bytes().to_vec()));
        expectations.extend(frame_read(block, sock::RX_RSR, request_len.to_be_bytes().to_vec()));
        expectations.extend(frame_read(block, sock::RX_RD, vec![0x00, 0x00]));
        expectations.extend(frame_read(regs::socket_rx_block(0), 0x0000, request.to_vec()));
        expectations.extend(frame_write(block, sock::RX_RD, request_len.to_be_bytes().to_vec()));
        expectations.extend(frame_write(block, sock::CR, vec![SocketCommand::Receive as u8]));
        expectations.extend(frame_read(block, sock::CR, vec![0x00]));

        // Response head, then the 5-byte body, then the disconnect.
        let head = response_head(StatusLine::Ok, "text/html", 5);
        expectations.extend(send_traffic(0, 0x0000, head.as_bytes()));
        expectations.extend(send_traffic(0, head.len() as u16, b"hello"));
        expectations.extend(frame_write(block, sock::CR, vec![SocketCommand::Disconnect as u8]));
        expectations.extend(frame_read(block, sock::CR, vec![0x00]));

        let mut chip = W5500::new(SpiMock::new(&expectations));
        let mut buf = [0u8; 512];
        let mut server: HttpServer<_, 1> =
            HttpServer::new(80, MockContent { closed: Vec::new() }, &mut buf);
        // Pre-bind the slot as init() would, without scripting its traffic.
        server.sockets[0].socket = Some(Socket(0));

        block_on(server.run(&mut chip)).unwrap();
        assert_eq!(server.socket_state(0), HttpState::ResDone);
        assert_eq!(server.content().closed, vec![7]);
        chip.release().done();
    }

    #[test]
    fn test_run_answers_404_for_unknown_content() {
        let request = b"GET /missing.html HTTP/1.1\r\n\r\n";
        let block = regs::socket_reg_block(0);
        let request_len = request.len() as u16;

        let mut expectations = frame_read(block, sock::SR, vec![SocketStatus::Established as u8]);
        expectations.extend(frame_read(block, sock::IR, vec![0x00]));
        for _ in 0..4 {
            expectations.extend(frame_read(block, sock::RX_RSR, request_len.to_be_bytes().to_vec()));
        }
        expectations.extend(frame_read(block, sock::RX_RD, vec![0x00, 0x00]));
        expectations.extend(frame_read(regs::socket_rx_block(0), 0x0000, request.to_vec()));
        expectations.extend(frame_write(block, sock::RX_RD, request_len.to_be_bytes().to_vec()));
        expectations.extend(frame_write(block, sock::CR, vec![SocketCommand::Receive as u8]));
        expectations.extend(frame_read(block, sock::CR, vec![0x00]));

        let body = StatusLine::NotFound.error_body();
        let head = response_head(StatusLine::NotFound, "text/html", body.len());
        expectations.extend(send_traffic(0, 0x0000, head.as_bytes()));
        expectations.extend(send_traffic(0, head.len() as u16, body.as_bytes()));
        expectations.extend(frame_write(block, sock::CR, vec![SocketCommand::Disconnect as u8]));
        expectations.extend(frame_read(block, sock::CR, vec![0x00]));

        let mut chip = W5500::new(SpiMock::new(&expectations));
        let mut buf = [0u8; 512];
        let mut server: HttpServer<_, 1> =
            HttpServer::new(80, MockContent { closed: Vec::new() }, &mut buf);
        server.sockets[0].socket = Some(Socket(0));

        block_on(server.run(&mut chip)).unwrap();
        assert!(server.content().closed.is_empty());
        chip.release().done();
    }
}
