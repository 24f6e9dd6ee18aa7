//! Aggregates byte counts and per-connection rates for the single-line
//! terminal progress display (spec.md §4.5).

use std::time::Instant;

/// Rolling `(start_time, bytes)` counters kept both by `Client` (aggregate)
/// and by each `Connection` (per-mirror rate).
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub start_time: Option<Instant>,
    pub bytes: u64,
}

impl Stats {
    pub fn new() -> Stats {
        Stats::default()
    }

    /// Records `n` freshly-transferred bytes, starting the clock on the
    /// first call after construction (or after being replaced by a fresh
    /// `Stats::new()`, as `Connection` does between requests).
    pub fn bump(&mut self, n: u64, now: Instant) {
        if self.bytes == 0 {
            self.start_time = Some(now);
        }
        self.bytes += n;
    }

    /// Bytes per second since `start_time`, or `None` before any bytes or
    /// before any time has elapsed (avoids a division by zero).
    pub fn rate(&self, now: Instant) -> Option<f64> {
        let start = self.start_time?;
        let elapsed_ms = now.duration_since(start).as_millis();
        if elapsed_ms == 0 {
            return None;
        }
        Some(self.bytes as f64 / elapsed_ms as f64 * 1000.0)
    }
}

/// Formats a byte rate with binary prefixes, per spec.md §4.5: exponent 0
/// prints integer bytes, exponents beyond the `KMGTPE` table fall back to
/// `EiB` with divisor `1024^6`.
pub fn human_rate(bytes: f64) -> String {
    const ABBREVS: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
    if bytes < 1.0 {
        return format!("{}B", bytes as u64);
    }
    let exponent = (bytes.ln() / 1024f64.ln()).floor() as i32;
    if exponent <= 0 {
        return format!("{}B", bytes as u64);
    }
    let idx = (exponent - 1) as usize;
    if idx >= ABBREVS.len() {
        return format!("{:.1}EiB", bytes / 1024f64.powi(6));
    }
    format!("{:.1}{}B", bytes / 1024f64.powi(exponent), ABBREVS[idx])
}

/// Rewrites the terminal progress line. Disabled by `--quiet`, but the
/// caller still feeds `Stats` so rate bookkeeping (used by tests) keeps
/// working when the display itself is suppressed.
pub struct Reporter {
    quiet: bool,
}

impl Reporter {
    pub fn new(quiet: bool) -> Reporter {
        Reporter { quiet }
    }

    /// `active` is `(per_connection_stats, now)` for every connection
    /// currently in `GET_COPY`/`GET_DIRECT`, in the order `Client` iterates
    /// its connection set.
    pub fn render(&self, file_size: u64, overall: &Stats, now: Instant, active: &[Stats]) {
        if self.quiet {
            return;
        }
        let percent = if file_size == 0 {
            100.0
        } else {
            100.0 * overall.bytes as f64 / file_size as f64
        };
        print!("\x1B[0G\x1B[K{:.1}%", percent);
        if let Some(rate) = overall.rate(now) {
            print!(" - {}/s = ", human_rate(rate));
        }
        let mut first = true;
        for stats in active {
            if let Some(rate) = stats.rate(now) {
                if !first {
                    print!(" + ");
                } else {
                    first = false;
                }
                print!("{}/s", human_rate(rate));
            }
        }
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }
}

#[cfg(test)]
mod test {
    use super::{human_rate, Stats};
    use std::time::{Duration, Instant};

    #[test]
    fn zero_bytes_prints_integer_bytes() {
        assert_eq!(human_rate(0.0), "0B");
        assert_eq!(human_rate(512.0), "512B");
    }

    #[test]
    fn exactly_one_kib_uses_ki_prefix() {
        assert_eq!(human_rate(1024.0), "1.0KiB");
    }

    #[test]
    fn exactly_one_mib_uses_mi_prefix() {
        assert_eq!(human_rate(1024.0 * 1024.0), "1.0MiB");
    }

    #[test]
    fn beyond_table_falls_back_to_eib() {
        let huge = 1024f64.powi(8);
        assert_eq!(human_rate(huge), format!("{:.1}EiB", huge / 1024f64.powi(6)));
    }

    #[test]
    fn stats_rate_is_none_before_any_bytes() {
        let stats = Stats::new();
        assert!(stats.rate(Instant::now()).is_none());
    }

    #[test]
    fn stats_rate_reflects_elapsed_time() {
        let mut stats = Stats::new();
        let t0 = Instant::now();
        stats.bump(1024, t0);
        let t1 = t0 + Duration::from_secs(1);
        let rate = stats.rate(t1).unwrap();
        assert!((rate - 1024.0).abs() < 1.0);
    }
}
