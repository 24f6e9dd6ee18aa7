//! Asynchronous "hostname -> address" capability (spec.md §4.4).
//!
//! The original program wraps c-ares, whose async queries deliver results
//! to the libuv loop through a poll-set/timer "staging hook" that is
//! rebuilt every tick. Safe Rust has no non-blocking getaddrinfo, so this
//! resolver instead runs blocking `ToSocketAddrs` lookups on a small fixed
//! worker pool and reports completion back to the event-loop thread
//! through an `mio::Registration`/`SetReadiness` pair per in-flight
//! resolution — `mio::Poll` already owns the readiness bookkeeping for
//! registered sources, so there is no separate stop-all/reinstall-all step
//! to repeat every tick (spec.md §9's suggested diff-based re-architecture,
//! taken to its limit).

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use mio::{Registration, SetReadiness};

use crate::error::ResolveError;

/// Number of blocking lookup worker threads. A handful of mirrors rarely
/// resolve more than a handful of hostnames, so this is generous without
/// being wasteful.
const WORKERS: usize = 4;

type LookupResult = Result<Vec<SocketAddr>, ResolveError>;

struct Job {
    host: String,
    readiness: SetReadiness,
    result: Arc<Mutex<Option<LookupResult>>>,
}

/// A handle to the worker pool. `Client` owns exactly one.
pub struct Resolver {
    jobs: mpsc::Sender<Job>,
    // Dropping a `JoinHandle` detaches rather than joins, so this doesn't
    // block anything on teardown; it's kept only so the workers stay
    // alive as long as this `Resolver` does, mirroring the original's
    // `Ares`/`Ares::Channel` RAII lifetime (spec.md §9, "global process
    // lifetime for the resolver library"). Each worker's `rx.recv()`
    // returns `Err` and the thread exits on its own once `jobs` drops
    // alongside this.
    _workers: Vec<thread::JoinHandle<()>>,
}

/// A single in-flight resolution. Register `.registration` with the
/// event-loop `Poll` under a fresh `Token`; once it becomes readable, call
/// `.take()` to retrieve the (one-shot) result.
pub struct Pending {
    pub registration: Registration,
    result: Arc<Mutex<Option<LookupResult>>>,
}

impl Pending {
    /// Retrieves the lookup result. Only meaningful after the paired
    /// `Registration` has signalled readable; panics otherwise (a
    /// programming error in the caller, not a runtime condition).
    pub fn take(&self) -> LookupResult {
        self.result
            .lock()
            .unwrap()
            .take()
            .expect("Pending::take called before the resolution completed")
    }
}

impl Resolver {
    /// Spawns the worker pool. Failure here is fatal startup (spec.md §6
    /// exit code 2, "resolver library init failure").
    pub fn new() -> io::Result<Resolver> {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(WORKERS);
        for i in 0..WORKERS {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("multiget-resolver-{}", i))
                .spawn(move || loop {
                    let job = {
                        let rx = rx.lock().unwrap();
                        rx.recv()
                    };
                    match job {
                        Ok(job) => run_job(job),
                        Err(_) => return,
                    }
                })
                .map_err(io::Error::from)?;
            workers.push(handle);
        }
        Ok(Resolver {
            jobs: tx,
            _workers: workers,
        })
    }

    /// Submits a hostname for resolution. Never blocks; the result arrives
    /// asynchronously through the returned `Pending`'s registration.
    pub fn resolve(&self, host: &str) -> Pending {
        let (registration, readiness) = Registration::new2();
        let result = Arc::new(Mutex::new(None));
        let job = Job {
            host: host.to_string(),
            readiness,
            result: result.clone(),
        };
        // The channel only disconnects if every worker panicked; there is
        // nothing more this resolution can do in that case, so drop it
        // silently rather than propagating a new error variant for an
        // unrecoverable condition.
        let _ = self.jobs.send(job);
        Pending {
            registration,
            result,
        }
    }
}

fn run_job(job: Job) {
    let outcome = lookup(&job.host);
    *job.result.lock().unwrap() = Some(outcome);
    let _ = job.readiness.set_readiness(mio::Ready::readable());
}

/// IPv4-only by policy: the spec calls for IPv6 results to be seen and
/// never dialed (the original's dead `query6_cb`/AAAA path), so this
/// filters here rather than leaving it to the caller to remember.
fn lookup(host: &str) -> LookupResult {
    let addrs: Vec<SocketAddr> = (host, 0u16)
        .to_socket_addrs()
        .map_err(|e| ResolveError::Lookup(host.to_string(), e))?
        .filter(|a| a.is_ipv4())
        .collect();
    if addrs.is_empty() {
        Err(ResolveError::NoAddress(host.to_string()))
    } else {
        Ok(addrs)
    }
}

#[cfg(test)]
mod test {
    use super::Resolver;
    use mio::{Events, Poll, PollOpt, Ready, Token};
    use std::time::Duration;

    #[test]
    fn resolves_localhost_to_a_loopback_v4_address() {
        let resolver = Resolver::new().unwrap();
        let poll = Poll::new().unwrap();
        let pending = resolver.resolve("localhost");
        poll.register(&pending.registration, Token(0), Ready::readable(), PollOpt::edge())
            .unwrap();

        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert!(events.iter().any(|e| e.token() == Token(0)));

        let addrs = pending.take().expect("localhost should resolve");
        assert!(addrs.iter().all(|a| a.is_ipv4()));
    }

    #[test]
    fn unresolvable_host_reports_an_error() {
        let resolver = Resolver::new().unwrap();
        let poll = Poll::new().unwrap();
        let pending = resolver.resolve("this-host-does-not-resolve.invalid");
        poll.register(&pending.registration, Token(0), Ready::readable(), PollOpt::edge())
            .unwrap();

        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();

        assert!(pending.take().is_err());
    }
}
