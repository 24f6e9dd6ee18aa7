//! Per-mirror state machine driving one TCP socket through HEAD, then a
//! sequence of ranged GETs (spec.md §4.2).
//!
//! Unlike the original (callback-driven through `http_parser`'s function
//! pointers), this is an explicit tagged `State` mutated at one site per
//! event, with the interpretation of each event living in `Client` (which
//! alone holds the mapping and the chunk set) rather than here — see
//! spec.md §9's "back-reference from Connection to Client" design note.
//! `Connection` never sees `Client`; it hands back a `ReadOutcome` and lets
//! the caller decide what it means for the download as a whole.

use std::io::{self, ErrorKind, Read, Write};
use std::time::Instant;

use mio::net::TcpStream;
use mio::Token;

use crate::chunk::Chunk;
use crate::error::ConnectionError;
use crate::parser::{HeadParser, ParsedHead};
use crate::progress::Stats;

/// Ordered so `state <= Idle` is exactly the "short-term busy, assignable
/// soon" predicate the scheduler uses (spec.md §3 invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Connect,
    Head,
    Idle,
    GetHeaders,
    GetCopy,
    GetDirect,
    Failed,
    Complete,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Failed | State::Complete)
    }
}

/// What happened as a result of pumping one readiness event through the
/// connection. `Client` interprets each variant; see `client.rs`.
pub enum ReadOutcome {
    /// No error, but nothing left to read right now.
    WouldBlock,
    /// A read succeeded and more may be waiting; keep pumping. Carries the
    /// number of body bytes written into the mapping by this call (0 for
    /// header-only reads).
    Continue(u64),
    /// The current response finished; the connection is now `Idle`.
    /// Carries the number of body bytes written by this call.
    Idle(u64),
    /// A `HEAD` response parsed with this `Content-Length`; the caller
    /// must run the first-HEAD rendezvous (spec.md §4.2.1).
    HeadLearned(u64),
    /// The peer closed the socket while genuinely idle (clean keep-alive
    /// shutdown, not a failure).
    Complete,
    Failed(ConnectionError),
}

pub struct Connection {
    pub token: Token,
    pub stream: TcpStream,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub state: State,
    write_buf: Vec<u8>,
    write_pos: usize,
    head_parser: HeadParser,
    /// `[cursor, end)`: the unfilled remainder of the chunk currently
    /// assigned to this connection (absolute file offsets).
    cursor: u64,
    end: u64,
    pub stats: Stats,
}

impl Connection {
    pub fn new(token: Token, stream: TcpStream, host: String, port: u16, path: String) -> Connection {
        Connection {
            token,
            stream,
            host,
            port,
            path,
            state: State::Connect,
            write_buf: Vec::new(),
            write_pos: 0,
            head_parser: HeadParser::new(),
            cursor: 0,
            end: 0,
            stats: Stats::new(),
        }
    }

    /// `[cursor, end)` of the in-flight chunk, for invariant checks and for
    /// returning the unfetched suffix on close.
    pub fn remaining(&self) -> Option<Chunk> {
        if self.cursor < self.end {
            Some(Chunk::new(self.cursor, self.end - self.cursor))
        } else {
            None
        }
    }

    fn host_header(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Queues a HEAD request and moves CONNECT -> HEAD. Called once the
    /// socket reports writable for the first time (connect complete).
    pub fn queue_head_request(&mut self, user_agent: &str) {
        debug_assert_eq!(self.state, State::Connect);
        self.write_buf = format!(
            "HEAD {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nConnection: keep-alive\r\n\r\n",
            self.path,
            self.host_header(),
            user_agent,
        )
        .into_bytes();
        self.write_pos = 0;
        self.head_parser = HeadParser::new();
        self.state = State::Head;
    }

    /// Queues a ranged GET and moves IDLE -> GET_HEADERS (spec.md §4.2).
    pub fn get(&mut self, chunk: Chunk, user_agent: &str) {
        debug_assert_eq!(self.state, State::Idle);
        self.cursor = chunk.off;
        self.end = chunk.end();
        self.write_buf = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nRange: bytes={}-{}\r\nUser-Agent: {}\r\nConnection: keep-alive\r\n\r\n",
            self.path,
            self.host_header(),
            chunk.off,
            chunk.end() - 1,
            user_agent,
        )
        .into_bytes();
        self.write_pos = 0;
        self.head_parser = HeadParser::new();
        self.state = State::GetHeaders;
    }

    /// Drains the queued request bytes. Returns `Ok(())` on a clean
    /// would-block or full flush; any other I/O error fails the
    /// connection (the caller marks it `Failed` and closes it).
    pub fn pump_write(&mut self) -> io::Result<()> {
        while self.write_pos < self.write_buf.len() {
            match self.stream.write(&self.write_buf[self.write_pos..]) {
                Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "write returned 0")),
                Ok(n) => self.write_pos += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Pumps one `read()` attempt appropriate to the current state.
    /// `mapping` is the whole output file; only consulted in `GetCopy`/
    /// `GetDirect` (and the tail of `GetHeaders`, when header and body
    /// bytes arrive in the same read). It is `None` before the file size
    /// is known, which is always true here.
    pub fn pump_read(&mut self, mapping: Option<&mut [u8]>, now: Instant) -> ReadOutcome {
        match self.state {
            State::Failed | State::Complete | State::Connect => ReadOutcome::WouldBlock,
            State::Idle => self.read_idle(),
            State::Head | State::GetHeaders => self.read_headers(mapping, now),
            State::GetCopy | State::GetDirect => self.read_body(mapping.expect("mapping must exist once a GET is in flight"), now),
        }
    }

    fn read_headers(&mut self, mapping: Option<&mut [u8]>, now: Instant) -> ReadOutcome {
        let mut buf = [0u8; 16 * 1024];
        match self.stream.read(&mut buf) {
            Ok(0) => {
                // A clean close before any bytes parsed at all reads as a
                // graceful keep-alive shutdown; mid-response it's a
                // failure (spec.md §4.2, "stream EOF" row).
                if self.head_parser.is_empty() {
                    self.state = State::Complete;
                    ReadOutcome::Complete
                } else {
                    self.state = State::Failed;
                    ReadOutcome::Failed(ConnectionError::ShortBody)
                }
            }
            Ok(n) => match self.head_parser.feed(&buf[..n]) {
                Ok(None) => ReadOutcome::Continue(0),
                Ok(Some((head, leftover))) => self.handle_head_complete(head, leftover, mapping, now),
                Err(e) => {
                    self.state = State::Failed;
                    ReadOutcome::Failed(ConnectionError::from(e))
                }
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(e) => {
                self.state = State::Failed;
                ReadOutcome::Failed(ConnectionError::from(e))
            }
        }
    }

    fn handle_head_complete(
        &mut self,
        head: ParsedHead,
        leftover: Vec<u8>,
        mapping: Option<&mut [u8]>,
        now: Instant,
    ) -> ReadOutcome {
        match self.state {
            State::Head => {
                if head.code != 200 {
                    self.state = State::Failed;
                    return ReadOutcome::Failed(ConnectionError::UnexpectedStatus(head.code, head.reason));
                }
                match head.content_length {
                    Some(n) => {
                        self.state = State::Idle;
                        ReadOutcome::HeadLearned(n)
                    }
                    None => {
                        self.state = State::Failed;
                        ReadOutcome::Failed(ConnectionError::MissingContentLength)
                    }
                }
            }
            State::GetHeaders => {
                if head.code != 206 {
                    self.state = State::Failed;
                    return ReadOutcome::Failed(ConnectionError::UnexpectedStatus(head.code, head.reason));
                }
                self.stats = Stats::new();
                self.stats.start_time = Some(now);
                self.state = State::GetCopy;
                if leftover.is_empty() {
                    ReadOutcome::Continue(0)
                } else {
                    let mapping = mapping.expect("mapping must exist once a GET is in flight");
                    self.write_body_bytes(&leftover, mapping, now)
                }
            }
            _ => unreachable!("handle_head_complete called outside HEAD/GET_HEADERS"),
        }
    }

    /// Body overflow guard (spec.md §4.2.2): a server that sends more than
    /// the requested range fails the connection instead of corrupting the
    /// next chunk's bytes.
    fn write_body_bytes(&mut self, data: &[u8], mapping: &mut [u8], now: Instant) -> ReadOutcome {
        if self.cursor + data.len() as u64 > self.end {
            self.state = State::Failed;
            return ReadOutcome::Failed(ConnectionError::BodyOverflow);
        }
        let start = self.cursor as usize;
        mapping[start..start + data.len()].copy_from_slice(data);
        self.cursor += data.len() as u64;
        self.stats.bump(data.len() as u64, now);
        self.state = State::GetDirect;
        if self.cursor == self.end {
            self.state = State::Idle;
            ReadOutcome::Idle(data.len() as u64)
        } else {
            ReadOutcome::Continue(data.len() as u64)
        }
    }

    /// The zero-copy path: the receive buffer *is* the mapping region
    /// `[cursor, end)` itself (spec.md §4.2, "incoming-byte buffer
    /// allocation policy").
    fn read_body(&mut self, mapping: &mut [u8], now: Instant) -> ReadOutcome {
        if self.cursor >= self.end {
            self.state = State::Idle;
            return ReadOutcome::Idle(0);
        }
        let start = self.cursor as usize;
        let end = self.end as usize;
        match self.stream.read(&mut mapping[start..end]) {
            Ok(0) => {
                self.state = State::Failed;
                ReadOutcome::Failed(ConnectionError::ShortBody)
            }
            Ok(n) => {
                self.cursor += n as u64;
                self.stats.bump(n as u64, now);
                self.state = State::GetDirect;
                if self.cursor == self.end {
                    self.state = State::Idle;
                    ReadOutcome::Idle(n as u64)
                } else {
                    ReadOutcome::Continue(n as u64)
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(e) => {
                self.state = State::Failed;
                ReadOutcome::Failed(ConnectionError::from(e))
            }
        }
    }

    /// An `Idle` connection never expects unsolicited bytes; a readable
    /// event here is either EOF (clean keep-alive shutdown) or a
    /// misbehaving peer.
    fn read_idle(&mut self) -> ReadOutcome {
        let mut buf = [0u8; 1];
        match self.stream.read(&mut buf) {
            Ok(0) => {
                self.state = State::Complete;
                ReadOutcome::Complete
            }
            Ok(_) => {
                self.state = State::Failed;
                ReadOutcome::Failed(ConnectionError::Io(io::Error::new(
                    ErrorKind::Other,
                    "peer sent unsolicited bytes on an idle keep-alive connection",
                )))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(e) => {
                self.state = State::Failed;
                ReadOutcome::Failed(ConnectionError::from(e))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use httparse;

    /// Round trip (spec.md §8): a HEAD request built by a connection,
    /// reparsed, carries the expected method/path/headers.
    #[test]
    fn head_request_round_trips_through_httparse() {
        let req = build_head_for_test("/file.bin", "example.com:80", "multiget-test/1.0");
        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut parsed = httparse::Request::new(&mut headers);
        parsed.parse(&req).unwrap();
        assert_eq!(parsed.method, Some("HEAD"));
        assert_eq!(parsed.path, Some("/file.bin"));
        assert!(has_header(&parsed, "Host", "example.com:80"));
        assert!(has_header(&parsed, "User-Agent", "multiget-test/1.0"));
        assert!(has_header(&parsed, "Connection", "keep-alive"));
    }

    #[test]
    fn get_request_has_inclusive_range_bounds() {
        let req = build_get_for_test("/file.bin", "example.com:80", "multiget-test/1.0", 1000, 1999);
        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut parsed = httparse::Request::new(&mut headers);
        parsed.parse(&req).unwrap();
        assert_eq!(parsed.method, Some("GET"));
        assert!(has_header(&parsed, "Range", "bytes=1000-1998"));
    }

    fn build_head_for_test(path: &str, host: &str, ua: &str) -> Vec<u8> {
        format!(
            "HEAD {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nConnection: keep-alive\r\n\r\n",
            path, host, ua
        )
        .into_bytes()
    }

    fn build_get_for_test(path: &str, host: &str, ua: &str, off: u64, end: u64) -> Vec<u8> {
        format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nRange: bytes={}-{}\r\nUser-Agent: {}\r\nConnection: keep-alive\r\n\r\n",
            path,
            host,
            off,
            end - 1,
            ua
        )
        .into_bytes()
    }

    fn has_header(req: &httparse::Request, name: &str, value: &str) -> bool {
        req.headers
            .iter()
            .any(|h| h.name.eq_ignore_ascii_case(name) && h.value == value.as_bytes())
    }

    #[test]
    fn state_ordering_matches_assignability_predicate() {
        assert!(State::Connect < State::Idle);
        assert!(State::Head < State::Idle);
        assert!(State::Idle <= State::Idle);
        assert!(State::GetHeaders > State::Idle);
        assert!(State::GetCopy > State::Idle);
        assert!(State::Failed > State::Idle);
    }

    #[test]
    fn failed_and_complete_are_terminal() {
        assert!(State::Failed.is_terminal());
        assert!(State::Complete.is_terminal());
        assert!(!State::Idle.is_terminal());
    }
}
