//! A minimal push-style HTTP/1.1 response parser built on `httparse`.
//!
//! This stands in for the spec's "HTTP Response Parser (≈external)"
//! collaborator: `httparse` does the actual status-line/header-line
//! parsing, and `HeadParser` only owns the little bit of state needed to
//! accumulate bytes across multiple socket reads until the header block is
//! complete. Body bytes are handled by `Connection` directly against the
//! memory-mapped file, not here, since the body length for every request
//! this downloader ever makes is known up front (the requested `Range`).

use std::str;

use httparse;
use quick_error::quick_error;

/// A connection only ever has one chunk in flight, so `httparse`'s 256 and
/// 16 default limits (meant for a general proxy) are unnecessarily large;
/// a mirror's HEAD/206 response has a handful of headers at most.
const MAX_HEADERS: usize = 64;
/// Matches the 16 KiB header-size cap the teacher crate's `http1` module
/// uses for the same reason (`MAX_HEADERS_SIZE` in `http1.rs`).
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

quick_error! {
    #[derive(Debug)]
    pub enum ParseError {
        TooLarge {
            display("response headers exceeded {} bytes", MAX_HEADER_BYTES)
        }
        Malformed(err: String) {
            display("malformed HTTP response: {}", err)
        }
    }
}

/// The parsed status line and the one header this downloader cares about.
#[derive(Debug, Clone)]
pub struct ParsedHead {
    pub code: u16,
    pub reason: String,
    pub content_length: Option<u64>,
}

/// Accumulates bytes across reads until a full header block (`\r\n\r\n`) has
/// arrived, then hands back the parsed head plus any body bytes that were
/// already sitting in the same read.
#[derive(Debug, Default)]
pub struct HeadParser {
    buf: Vec<u8>,
}

impl HeadParser {
    pub fn new() -> HeadParser {
        HeadParser { buf: Vec::new() }
    }

    /// True before any bytes of the next response have arrived yet; used
    /// to tell a clean keep-alive close apart from a mid-response EOF.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Feeds freshly-read bytes in. Returns `Ok(None)` while more header
    /// bytes are still needed, or the parsed head plus any leftover body
    /// bytes once the header block is complete.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<(ParsedHead, Vec<u8>)>, ParseError> {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_HEADER_BYTES {
            return Err(ParseError::TooLarge);
        }

        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut raw_headers);
        match response.parse(&self.buf) {
            Ok(httparse::Status::Complete(consumed)) => {
                let code = response.code.unwrap_or(0);
                let reason = response.reason.unwrap_or("").to_string();
                let mut content_length = None;
                for header in response.headers.iter() {
                    if header.name.eq_ignore_ascii_case("content-length") {
                        content_length = str::from_utf8(header.value)
                            .ok()
                            .and_then(|v| v.trim().parse::<u64>().ok());
                    }
                }
                let leftover = self.buf.split_off(consumed);
                Ok(Some((
                    ParsedHead {
                        code,
                        reason,
                        content_length,
                    },
                    leftover,
                )))
            }
            Ok(httparse::Status::Partial) => Ok(None),
            Err(e) => Err(ParseError::Malformed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::HeadParser;

    #[test]
    fn parses_head_response_in_one_shot() {
        let mut p = HeadParser::new();
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 1048576\r\n\r\n";
        let (head, leftover) = p.feed(raw).unwrap().unwrap();
        assert_eq!(head.code, 200);
        assert_eq!(head.content_length, Some(1048576));
        assert!(leftover.is_empty());
    }

    #[test]
    fn parses_headers_split_across_feeds() {
        let mut p = HeadParser::new();
        assert!(p.feed(b"HTTP/1.1 206 Part").unwrap().is_none());
        assert!(p.feed(b"ial Content\r\nContent-Length: 10\r\n").unwrap().is_none());
        let (head, leftover) = p.feed(b"\r\nhello body").unwrap().unwrap();
        assert_eq!(head.code, 206);
        assert_eq!(head.reason, "Partial Content");
        assert_eq!(head.content_length, Some(10));
        assert_eq!(leftover, b"hello body");
    }

    #[test]
    fn missing_content_length_is_none() {
        let mut p = HeadParser::new();
        let (head, _) = p.feed(b"HTTP/1.1 404 Not Found\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.code, 404);
        assert_eq!(head.content_length, None);
    }

    #[test]
    fn oversized_headers_are_rejected() {
        let mut p = HeadParser::new();
        let junk = vec![b'a'; super::MAX_HEADER_BYTES + 1];
        assert!(p.feed(&junk).is_err());
    }

    #[test]
    fn malformed_status_line_is_rejected() {
        let mut p = HeadParser::new();
        assert!(p.feed(b"not an http response\r\n\r\n").is_err());
    }
}
