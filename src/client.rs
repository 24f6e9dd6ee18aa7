//! Owner of the output file mapping, the chunk set, and every connection;
//! drives the `mio` event loop and implements the scheduling policy
//! (spec.md §4.3).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::AsRawFd;
use std::time::Instant;

use log::warn;
use memmap2::MmapMut;
use mio::net::TcpStream;
use mio::{Events, Poll, PollOpt, Ready, Token};

use crate::chunk::ChunkSet;
use crate::connection::{Connection, ReadOutcome, State};
use crate::error::{ClientError, ConnectionError};
use crate::progress::{Reporter, Stats};
use crate::resolver::{Pending, Resolver};
use crate::url::Url;

/// Resolution tokens and connection tokens share one `mio::Poll`, so they
/// must live in disjoint ranges. Connection tokens are simply their index
/// into `connections`; resolution tokens start far above any realistic
/// mirror count.
const RESOLUTION_TOKEN_BASE: usize = 1 << 24;

struct PendingResolution {
    pending: Pending,
    host: String,
    port: u16,
    path: String,
}

/// The single-threaded cooperative event loop (spec.md §5): every callback
/// here runs to completion before the next, so the chunk set, connection
/// set, and mapping need no locks.
pub struct Client {
    poll: Poll,
    resolver: Resolver,
    user_agent: String,
    reporter: Reporter,

    file_name: String,
    file_size: Option<u64>,
    #[allow(dead_code)]
    file: Option<File>,
    mapping: Option<MmapMut>,

    chunks: ChunkSet,
    connections: Vec<Connection>,
    pending_resolutions: HashMap<Token, PendingResolution>,
    next_resolution_token: usize,

    overall_stats: Stats,
    /// Set once `schedule_work` has run the termination rule to
    /// completion; `run`'s event loop exits once this is true and every
    /// resolution has settled.
    finished: bool,
    /// A fatal startup failure (output file setup) discovered mid-loop,
    /// e.g. while handling the first-HEAD rendezvous. `run` surfaces this
    /// instead of the ordinary success/failure result.
    fatal: Option<ClientError>,
}

impl Client {
    pub fn new(file_name: String, user_agent: String, quiet: bool) -> Result<Client, ClientError> {
        // `Poll` is what every resolution's completion is actually
        // delivered through (each `Pending::registration` is registered
        // with it; spec.md §4.4's "staging hook" is this `Poll` for us),
        // so its failure is the "resolver channel" init failure of
        // spec.md §6 exit code 3, distinct from the worker-pool failure
        // below (exit code 2, the "resolver library" equivalent).
        let poll = Poll::new().map_err(ClientError::ResolverChannel)?;
        let resolver = Resolver::new().map_err(ClientError::ResolverInit)?;
        Ok(Client {
            poll,
            resolver,
            user_agent,
            reporter: Reporter::new(quiet),
            file_name,
            file_size: None,
            file: None,
            mapping: None,
            chunks: ChunkSet::new(),
            connections: Vec::new(),
            pending_resolutions: HashMap::new(),
            next_resolution_token: 0,
            overall_stats: Stats::new(),
            finished: false,
            fatal: None,
        })
    }

    /// Parses and opens every mirror URL, then drives the event loop until
    /// every connection and resolution has settled. Returns whether the
    /// download succeeded (spec.md §7).
    pub fn run(&mut self, urls: &[String]) -> Result<bool, ClientError> {
        for raw in urls {
            let url = Url::parse(raw);
            if !url.is_http() {
                warn!("skipping {:?}: not an http URL", raw);
                continue;
            }
            if !url.has_host() {
                warn!("skipping {:?}: URL has no host", raw);
                continue;
            }
            self.open(url.host.clone(), url.port_or_default(), url.path_or_default());
        }
        // Every URL may have been rejected above (or every resolution may
        // fail instantly); run the termination check once up front so we
        // don't block in `poll` forever with nothing left to wait for.
        self.schedule_work();

        let mut events = Events::with_capacity(1024);
        'pump: while !self.is_finished() {
            self.poll
                .poll(&mut events, None)
                .map_err(ClientError::EventLoop)?;
            for event in events.iter() {
                let token = event.token();
                if token.0 >= RESOLUTION_TOKEN_BASE {
                    self.handle_resolution_ready(token);
                } else {
                    self.on_connection_event(token.0, event.readiness());
                }
                if self.fatal.is_some() {
                    break 'pump;
                }
            }
        }
        if let Some(err) = self.fatal.take() {
            return Err(err);
        }
        Ok(self.succeeded())
    }

    fn is_finished(&self) -> bool {
        self.finished && self.pending_resolutions.is_empty()
    }

    /// Success per spec.md §7: the chunk set drained (every byte of the
    /// file accounted for) *and* we actually learned a file size at all.
    /// A connection the scheduler proactively closed while `Idle` doesn't
    /// need to reach `Complete` for this to hold — spec.md's own final
    /// test only fails when the chunk set is non-empty, never on
    /// connection state alone (see DESIGN.md).
    fn succeeded(&self) -> bool {
        self.file_size.is_some() && self.chunks.is_empty()
    }

    fn next_resolution_token(&mut self) -> Token {
        let token = Token(RESOLUTION_TOKEN_BASE + self.next_resolution_token);
        self.next_resolution_token += 1;
        token
    }

    /// Submits a hostname for resolution (spec.md §4.3 `open`).
    fn open(&mut self, host: String, port: u16, path: String) {
        let pending = self.resolver.resolve(&host);
        let token = self.next_resolution_token();
        if let Err(e) = self.poll.register(&pending.registration, token, Ready::readable(), PollOpt::edge()) {
            warn!("failed to watch DNS resolution for {}: {}", host, e);
            return;
        }
        self.pending_resolutions.insert(
            token,
            PendingResolution {
                pending,
                host,
                port,
                path,
            },
        );
    }

    fn handle_resolution_ready(&mut self, token: Token) {
        let PendingResolution { pending, host, port, path } = match self.pending_resolutions.remove(&token) {
            Some(p) => p,
            None => return,
        };
        let _ = self.poll.deregister(&pending.registration);
        match pending.take() {
            Ok(addrs) => {
                // IPv4-only connector: IPv6 results are seen and skipped,
                // never dialed (spec.md §9, the original's dead AAAA path).
                match addrs.into_iter().find(|a| a.is_ipv4()) {
                    Some(addr) => self.connect(host, port, path, SocketAddr::new(addr.ip(), port)),
                    None => warn!("DNS lookup for {} returned no usable (IPv4) address", host),
                }
            }
            Err(e) => warn!("{}", e),
        }
        // The pool of in-flight resolutions just shrank; the termination
        // rule may now be satisfiable.
        self.schedule_work();
    }

    fn connect(&mut self, host: String, port: u16, path: String, addr: SocketAddr) {
        let stream = match TcpStream::connect(&addr) {
            Ok(s) => s,
            Err(e) => {
                warn!("connecting to {} ({}) failed: {}", host, addr, e);
                return;
            }
        };
        let token = Token(self.connections.len());
        if let Err(e) = self
            .poll
            .register(&stream, token, Ready::readable() | Ready::writable(), PollOpt::edge())
        {
            warn!("failed to register connection to {}: {}", host, e);
            return;
        }
        self.connections.push(Connection::new(token, stream, host, port, path));
    }

    fn on_connection_event(&mut self, idx: usize, readiness: Ready) {
        if readiness.is_writable() {
            self.handle_writable(idx);
        }
        if self.connections[idx].state.is_terminal() {
            return;
        }
        if readiness.is_readable() {
            self.handle_readable(idx);
        }
    }

    fn handle_writable(&mut self, idx: usize) {
        if self.connections[idx].state == State::Connect {
            match self.connections[idx].stream.take_error() {
                Ok(None) => self.connections[idx].queue_head_request(&self.user_agent),
                Ok(Some(e)) | Err(e) => {
                    self.fail_connection(idx, ConnectionError::Connect(e));
                    return;
                }
            }
        }
        if let Err(e) = self.connections[idx].pump_write() {
            self.fail_connection(idx, ConnectionError::Io(e));
        }
    }

    fn handle_readable(&mut self, idx: usize) {
        loop {
            let mapping = self.mapping.as_mut().map(|m| &mut m[..]);
            let now = Instant::now();
            let outcome = self.connections[idx].pump_read(mapping, now);
            match outcome {
                ReadOutcome::WouldBlock => break,
                ReadOutcome::Continue(n) => {
                    self.bump_overall(n, now);
                    if n > 0 {
                        self.render_progress(now);
                    }
                }
                ReadOutcome::Idle(n) => {
                    self.bump_overall(n, now);
                    self.render_progress(now);
                    self.schedule_work();
                    break;
                }
                ReadOutcome::HeadLearned(size) => {
                    self.on_head_learned(idx, size);
                    self.schedule_work();
                    break;
                }
                ReadOutcome::Complete => {
                    self.close_connection(idx);
                    break;
                }
                ReadOutcome::Failed(e) => {
                    warn!("mirror {}: {}", self.connections[idx].host, e);
                    self.close_connection(idx);
                    break;
                }
            }
        }
    }

    fn bump_overall(&mut self, bytes: u64, now: Instant) {
        if bytes > 0 {
            self.overall_stats.bump(bytes, now);
        }
    }

    fn render_progress(&self, now: Instant) {
        let active: Vec<Stats> = self
            .connections
            .iter()
            .filter(|c| matches!(c.state, State::GetCopy | State::GetDirect))
            .map(|c| c.stats)
            .collect();
        self.reporter
            .render(self.file_size.unwrap_or(0), &self.overall_stats, now, &active);
    }

    /// First-HEAD rendezvous (spec.md §4.2.1).
    fn on_head_learned(&mut self, idx: usize, size: u64) {
        match self.file_size {
            None => {
                self.file_size = Some(size);
                if let Err(e) = self.init_file(size) {
                    self.fatal = Some(e);
                }
            }
            Some(expected) if expected != size => {
                self.fail_connection(idx, ConnectionError::LengthMismatch(expected, size));
            }
            Some(_) => {}
        }
    }

    /// Opens the output file, preallocates it, maps it, and seeds the
    /// chunk set (spec.md §4.3 `init_file`).
    fn init_file(&mut self, size: u64) -> Result<(), ClientError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&self.file_name)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    ClientError::OutputExists(self.file_name.clone())
                } else {
                    ClientError::OutputOpen(self.file_name.clone(), e)
                }
            })?;

        if size > 0 {
            let ret = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, size as libc::off_t) };
            if ret != 0 {
                return Err(ClientError::Alloc(std::io::Error::from_raw_os_error(ret)));
            }
            let mapping = unsafe { MmapMut::map_mut(&file) }.map_err(ClientError::Mmap)?;
            self.mapping = Some(mapping);
        }

        self.file = Some(file);
        self.chunks.seed(size);
        self.schedule_work();
        Ok(())
    }

    fn fail_connection(&mut self, idx: usize, err: ConnectionError) {
        warn!("mirror {}: {}", self.connections[idx].host, err);
        self.connections[idx].state = State::Failed;
        self.close_connection(idx);
    }

    /// Connection close is the cancellation primitive: it always returns
    /// the unfinished suffix to the chunk set and re-runs the scheduler
    /// (spec.md §4.3, §5).
    fn close_connection(&mut self, idx: usize) {
        let conn = &mut self.connections[idx];
        if !conn.state.is_terminal() {
            conn.state = State::Failed;
        }
        let _ = self.poll.deregister(&conn.stream);
        let _ = conn.stream.shutdown(Shutdown::Both);
        if let Some(chunk) = conn.remaining() {
            self.chunks.push(chunk);
        }
        self.schedule_work();
    }

    /// The scheduling step (spec.md §4.3): balance, assign, then apply the
    /// termination rule.
    fn schedule_work(&mut self) {
        let available = self.connections.iter().filter(|c| c.state <= State::Idle).count();
        self.chunks.balance(available);

        for idx in 0..self.connections.len() {
            if self.chunks.is_empty() {
                break;
            }
            if self.connections[idx].state != State::Idle {
                continue;
            }
            if let Some(chunk) = self.chunks.take_one() {
                self.connections[idx].get(chunk, &self.user_agent);
                if let Err(e) = self.connections[idx].pump_write() {
                    self.fail_connection(idx, ConnectionError::Io(e));
                }
            }
        }

        let all_settled = self
            .connections
            .iter()
            .all(|c| c.state == State::Idle || c.state.is_terminal());
        // A non-empty chunk set only blocks termination while some
        // connection could still be handed a chunk (an `Idle` one, or one
        // still busy fetching); if every connection has gone `Failed`
        // there is nothing left to ever drain it, so that must also end
        // the run rather than block `poll` forever on a registration set
        // that will never fire again (spec.md §9's "all FAILED, chunks
        // non-empty" case).
        let no_connection_can_make_progress =
            self.connections.iter().all(|c| c.state.is_terminal());
        if self.pending_resolutions.is_empty()
            && all_settled
            && (self.chunks.is_empty() || no_connection_can_make_progress)
        {
            for idx in 0..self.connections.len() {
                if self.connections[idx].state == State::Idle {
                    let _ = self.poll.deregister(&self.connections[idx].stream);
                    let _ = self.connections[idx].stream.shutdown(Shutdown::Both);
                }
            }
            self.finished = true;
        }
    }
}

impl Drop for Client {
    /// The mapping must be unmapped before the fd closes (spec.md §3
    /// invariant 3); `MmapMut`'s own `Drop` already unmaps, and dropping
    /// it before `self.file` (declaration order) guarantees the ordering.
    fn drop(&mut self) {
        self.mapping.take();
        self.file.take();
    }
}
