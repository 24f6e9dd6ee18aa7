//! Error taxonomy for the downloader.
//!
//! Split by the boundary that can raise it, matching spec.md §7: a fatal
//! `ClientError` aborts the whole run and picks the process exit code; the
//! others are always caught, logged, and swallowed by the caller so that
//! other mirrors keep going.

use std::io;

use quick_error::quick_error;

quick_error! {
    /// A URL that could not be turned into a mirror. Always a `warn!` and a
    /// skip, never fatal (spec.md §6, "URL acceptance").
    #[derive(Debug)]
    pub enum UrlError {
        NotHttp(scheme: String) {
            display("not an http URL (scheme {:?})", scheme)
        }
        MissingHost {
            display("URL has no host")
        }
    }
}

quick_error! {
    /// Raised by the background resolver pool; always a per-URL warning.
    #[derive(Debug)]
    pub enum ResolveError {
        Lookup(host: String, err: io::Error) {
            display("DNS resolution failed for {}: {}", host, err)
        }
        NoAddress(host: String) {
            display("DNS lookup returned no usable (IPv4) address for {}", host)
        }
    }
}

quick_error! {
    /// Raised by a single connection; always soft (mark FAILED, return the
    /// unfetched suffix to the chunk set, other mirrors continue).
    #[derive(Debug)]
    pub enum ConnectionError {
        Connect(err: io::Error) {
            from()
            display("connect failed: {}", err)
        }
        Io(err: io::Error) {
            from()
            display("i/o error: {}", err)
        }
        Parse(err: crate::parser::ParseError) {
            from()
            display("HTTP parse error: {}", err)
        }
        UnexpectedStatus(code: u16, reason: String) {
            display("unexpected status {} {}", code, reason)
        }
        MissingContentLength {
            display("response had no Content-Length header")
        }
        LengthMismatch(expected: u64, got: u64) {
            display("mirror served {} bytes, expected {} (length disagreement)", got, expected)
        }
        BodyOverflow {
            display("server sent more bytes than the requested range")
        }
        ShortBody {
            display("connection closed before the requested range was fully received")
        }
    }
}

quick_error! {
    /// Fatal startup failure. `main` maps each variant to an exit code.
    #[derive(Debug)]
    pub enum ClientError {
        OutputExists(path: String) {
            display("output file {} already exists", path)
        }
        OutputOpen(path: String, err: io::Error) {
            display("failed to open output file {}: {}", path, err)
        }
        Alloc(err: io::Error) {
            display("failed to preallocate output file space: {}", err)
        }
        Mmap(err: io::Error) {
            display("failed to mmap output file: {}", err)
        }
        ResolverInit(err: io::Error) {
            display("failed to start the resolver thread pool: {}", err)
        }
        ResolverChannel(err: io::Error) {
            display("failed to set up the resolver wakeup channel: {}", err)
        }
        EventLoop(err: io::Error) {
            display("event loop poll failed: {}", err)
        }
        NoOutputName {
            display("no output filename given and none could be guessed from the URLs")
        }
        NoUrls {
            display("no URLs supplied")
        }
        DownloadFailed {
            display("Download failed!")
        }
    }
}

impl ClientError {
    /// Maps a fatal startup error (or the final download outcome) to the
    /// process exit code from spec.md §6. Code `1` is reserved for CLI
    /// usage errors, raised before any `ClientError` exists; `6` and `7`
    /// are this implementation's own extensions (documented in DESIGN.md)
    /// for "download failed" and "output file setup failed" respectively,
    /// since spec.md only enumerates 0 through 5.
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::ResolverInit(_) => 2,
            ClientError::ResolverChannel(_) => 3,
            ClientError::NoOutputName => 4,
            ClientError::NoUrls => 5,
            ClientError::DownloadFailed => 6,
            ClientError::OutputExists(_)
            | ClientError::OutputOpen(_, _)
            | ClientError::Alloc(_)
            | ClientError::Mmap(_)
            | ClientError::EventLoop(_) => 7,
        }
    }
}
