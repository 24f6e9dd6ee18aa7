//! The set of outstanding byte ranges of the output file.
//!
//! Chunks are merged and re-split every time the scheduler wants to hand
//! work to a different number of idle connections, so the pool's fairness
//! falls out of `balance` rather than out of how chunks are picked.

/// A half-open byte range `[off, off+len)` of the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub off: u64,
    pub len: u64,
}

impl Chunk {
    pub fn new(off: u64, len: u64) -> Chunk {
        Chunk { off, len }
    }

    pub fn end(&self) -> u64 {
        self.off + self.len
    }
}

/// An unordered pool of chunks awaiting assignment to an idle connection.
#[derive(Debug, Default)]
pub struct ChunkSet {
    chunks: Vec<Chunk>,
}

impl ChunkSet {
    pub fn new() -> ChunkSet {
        ChunkSet { chunks: Vec::new() }
    }

    /// Installs one chunk covering the whole file. Precondition: empty.
    ///
    /// A zero-size file seeds no chunk at all; the scheduler then has
    /// nothing to assign and closes connections immediately.
    pub fn seed(&mut self, total_size: u64) {
        debug_assert!(self.chunks.is_empty());
        if total_size > 0 {
            self.chunks.push(Chunk::new(0, total_size));
        }
    }

    /// Returns an unfinished range to the pool, e.g. from a failed connection.
    pub fn push(&mut self, chunk: Chunk) {
        if chunk.len > 0 {
            self.chunks.push(chunk);
        }
    }

    /// Removes and returns one chunk. LIFO; assignment order doesn't matter.
    pub fn take_one(&mut self) -> Option<Chunk> {
        self.chunks.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Merges byte-adjacent chunks, then splits each maximal chunk into
    /// pieces sized so that no idle connection starves another.
    ///
    /// `n` is the number of currently-assignable connections (state <=
    /// IDLE). Chunks must be sorted by offset before merging or the result
    /// is order-dependent; this is exactly the fix the spec calls for over
    /// the original's fold-from-`chunks[0]` behavior.
    pub fn balance(&mut self, n: usize) {
        if self.chunks.is_empty() || n == 0 {
            return;
        }
        self.chunks.sort_by_key(|c| c.off);

        let mut concat: Vec<Chunk> = Vec::with_capacity(self.chunks.len());
        let mut total: u64 = 0;
        for c in self.chunks.drain(..) {
            total += c.len;
            match concat.last_mut() {
                Some(last) if last.end() == c.off => last.len += c.len,
                _ => concat.push(c),
            }
        }

        // Largest a piece is allowed to be so that n assignable connections
        // can all be fed from the total: ceil(total/n), per spec.md §4.1.
        let max_piece_size = (total + n as u64 - 1) / n as u64;
        for chunk in concat {
            // ceil(chunk.len / max_piece_size): the fewest pieces this
            // maximal chunk can be split into while keeping every piece
            // within max_piece_size. A plain `chunk.len / divisor >
            // max_chunk_size` search (integer floor on the left) can stop
            // one divisor too early and let a piece exceed the cap by one
            // byte, so this computes the divisor directly instead.
            let divisor = (chunk.len + max_piece_size - 1) / max_piece_size;
            let base = chunk.len / divisor;
            let extra = chunk.len % divisor;
            let mut offset = chunk.off;
            for i in 0..divisor {
                let piece_len = base + if i < extra { 1 } else { 0 };
                if piece_len == 0 {
                    continue;
                }
                self.chunks.push(Chunk::new(offset, piece_len));
                offset += piece_len;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Chunk, ChunkSet};

    fn sorted(set: &ChunkSet) -> Vec<Chunk> {
        let mut v = set.as_slice().to_vec();
        v.sort_by_key(|c| c.off);
        v
    }

    fn assert_disjoint_and_covers(chunks: &[Chunk], total: u64) {
        let mut sum = 0u64;
        for w in chunks.windows(2) {
            assert!(w[0].end() <= w[1].off, "{:?} overlaps {:?}", w[0], w[1]);
            assert_ne!(w[0].end(), w[1].off, "{:?} adjacent to {:?} after merge", w[0], w[1]);
        }
        for c in chunks {
            sum += c.len;
        }
        assert_eq!(sum, total);
    }

    #[test]
    fn seed_installs_one_chunk() {
        let mut set = ChunkSet::new();
        set.seed(100);
        assert_eq!(set.as_slice(), &[Chunk::new(0, 100)]);
    }

    #[test]
    fn seed_zero_leaves_set_empty() {
        let mut set = ChunkSet::new();
        set.seed(0);
        assert!(set.is_empty());
    }

    #[test]
    fn take_one_is_lifo() {
        let mut set = ChunkSet::new();
        set.push(Chunk::new(0, 10));
        set.push(Chunk::new(10, 10));
        assert_eq!(set.take_one(), Some(Chunk::new(10, 10)));
        assert_eq!(set.take_one(), Some(Chunk::new(0, 10)));
        assert_eq!(set.take_one(), None);
    }

    #[test]
    fn close_never_pushes_zero_length_chunks() {
        let mut set = ChunkSet::new();
        set.push(Chunk::new(42, 0));
        assert!(set.is_empty());
    }

    #[test]
    fn balance_merges_adjacent_and_splits_evenly() {
        let mut set = ChunkSet::new();
        set.seed(1000);
        set.balance(4);
        let chunks = sorted(&set);
        assert_disjoint_and_covers(&chunks, 1000);
        assert!(chunks.len() >= 4);
        let max = (1000u64 + 4 - 1) / 4;
        for c in &chunks {
            assert!(c.len <= max, "{} > {}", c.len, max);
        }
    }

    #[test]
    fn balance_is_order_independent_when_unsorted() {
        let mut a = ChunkSet::new();
        a.push(Chunk::new(50, 50));
        a.push(Chunk::new(0, 50));
        a.balance(1);

        let mut b = ChunkSet::new();
        b.push(Chunk::new(0, 50));
        b.push(Chunk::new(50, 50));
        b.balance(1);

        assert_eq!(sorted(&a), sorted(&b));
    }

    #[test]
    fn balance_idempotent_at_n_1() {
        let mut set = ChunkSet::new();
        set.seed(777);
        set.balance(1);
        let first = sorted(&set);
        set.balance(1);
        let second = sorted(&set);
        assert_eq!(first, second);
        assert_eq!(first, vec![Chunk::new(0, 777)]);
    }

    #[test]
    fn balance_more_connections_than_bytes() {
        let mut set = ChunkSet::new();
        set.seed(4);
        set.balance(10);
        let chunks = sorted(&set);
        assert_disjoint_and_covers(&chunks, 4);
        assert_eq!(chunks.len(), 4);
        for c in &chunks {
            assert_eq!(c.len, 1);
        }
    }

    #[test]
    fn balance_after_failure_reconverges_disjoint() {
        let mut set = ChunkSet::new();
        set.seed(300);
        set.balance(3);
        // simulate a connection finishing its piece and another failing,
        // returning its unfetched suffix
        let taken = set.take_one().unwrap();
        set.push(Chunk::new(taken.off + taken.len / 2, taken.len - taken.len / 2));
        set.balance(2);
        let chunks = sorted(&set);
        for w in chunks.windows(2) {
            assert!(w[0].end() <= w[1].off);
        }
    }

    #[test]
    fn balance_on_empty_set_is_noop() {
        let mut set = ChunkSet::new();
        set.balance(5);
        assert!(set.is_empty());
    }
}
