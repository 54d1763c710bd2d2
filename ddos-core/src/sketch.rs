//! A fixed-size D×W probabilistic counter (§4.2), single-writer per worker.
//!
//! Grounded on `ahash`-keyed conservative-query sketch from the rate
//! limiter this teacher repository already ships
//! (`security::rate_limit::estimator::Estimator`), generalized from that
//! file's atomic, generic-key, shared-between-threads design into the
//! plain-`u32`-cell, single-writer discipline §5 requires, and sized per
//! the reference implementation's Count-Min sketch (D=8 rows, W=4096
//! columns, fixed per-row seeds, a 2¹⁶-slot auxiliary histogram for
//! top-K).

use ahash::RandomState;
use std::hash::{BuildHasher, Hasher};

use crate::config::SketchConfig;

const TOP_K_HISTOGRAM_SLOTS: usize = 1 << 16;

/// Fixed per-row seeds, carried over from the reference sketch so that two
/// `Sketch`es built with the same `SketchConfig` hash identically — a
/// precondition for `merge_from` to be meaningful across workers.
const ROW_SEEDS: [u64; 8] = [
    0xdead_beef_0000_0001,
    0xc0ff_ee00_0000_0002,
    0xbaad_f00d_0000_0003,
    0xfeed_face_0000_0004,
    0xcafe_babe_0000_0005,
    0x1234_5678_0000_0006,
    0x9abc_def0_0000_0007,
    0x1122_3344_0000_0008,
];

pub struct Sketch {
    rows: usize,
    cols: usize,
    mask: u64,
    hashers: Vec<RandomState>,
    /// Row-major D×W matrix of 32-bit saturating counters.
    cells: Vec<u32>,
    /// Auxiliary histogram indexed by `(ip >> 16) ^ (ip & 0xFFFF)`, used for
    /// approximate top-K IP extraction.
    ip_histogram: Vec<u32>,
    pub total_updates: u64,
    pub total_bytes: u64,
}

impl Sketch {
    pub fn new(cfg: &SketchConfig) -> Self {
        assert!(cfg.cols.is_power_of_two(), "sketch width must be a power of two");
        let hashers = (0..cfg.rows)
            .map(|i| RandomState::with_seeds(ROW_SEEDS[i % 8], ROW_SEEDS[(i + 1) % 8], 0, 0))
            .collect();
        Self {
            rows: cfg.rows,
            cols: cfg.cols,
            mask: (cfg.cols - 1) as u64,
            hashers,
            cells: vec![0u32; cfg.rows * cfg.cols],
            ip_histogram: vec![0u32; TOP_K_HISTOGRAM_SLOTS],
            total_updates: 0,
            total_bytes: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    fn column_for_row(&self, row: usize, key: u32) -> usize {
        let mut hasher = self.hashers[row].build_hasher();
        hasher.write_u32(key);
        (hasher.finish() & self.mask) as usize
    }

    /// Increment each of D rows at `hash_i(key) mod W` by `weight`.
    pub fn update(&mut self, key: u32, weight: u32) {
        for row in 0..self.rows {
            let col = self.column_for_row(row, key);
            let cell = &mut self.cells[row * self.cols + col];
            *cell = cell.saturating_add(weight);
        }
        self.total_updates += 1;

        let histogram_idx = ((key >> 16) ^ (key & 0xFFFF)) as usize;
        self.ip_histogram[histogram_idx] = self.ip_histogram[histogram_idx].saturating_add(weight);
    }

    pub fn update_bytes(&mut self, bytes: u64) {
        self.total_bytes += bytes;
    }

    /// Conservative query: the minimum across the D rows.
    pub fn query(&self, key: u32) -> u32 {
        (0..self.rows)
            .map(|row| {
                let col = self.column_for_row(row, key);
                self.cells[row * self.cols + col]
            })
            .min()
            .unwrap_or(0)
    }

    /// Element-wise sum of `others` into `self`. Associative and
    /// commutative: the result does not depend on the order `others` is
    /// visited in, because cell-wise addition commutes.
    pub fn merge_from(&mut self, others: &[&Sketch]) {
        for other in others {
            debug_assert_eq!(self.rows, other.rows);
            debug_assert_eq!(self.cols, other.cols);
            for (dst, src) in self.cells.iter_mut().zip(other.cells.iter()) {
                *dst = dst.saturating_add(*src);
            }
            for (dst, src) in self.ip_histogram.iter_mut().zip(other.ip_histogram.iter()) {
                *dst = dst.saturating_add(*src);
            }
            self.total_updates += other.total_updates;
            self.total_bytes += other.total_bytes;
        }
    }

    pub fn reset(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = 0);
        self.ip_histogram.iter_mut().for_each(|c| *c = 0);
        self.total_updates = 0;
        self.total_bytes = 0;
    }

    /// Scan the histogram and return the `k` largest `(approx_ip, count)`
    /// pairs. `approx_ip` reconstructs as `(slot << 16) | slot`, the same
    /// lossy reconstruction the reference top-K scan uses — it recovers the
    /// real IP only when the high and low halves happen to match, which is
    /// an acceptable approximation for a relative ranking, not an exact
    /// per-IP lookup.
    pub fn top_k(&self, k: usize) -> Vec<(u32, u32)> {
        let mut indexed: Vec<(usize, u32)> = self
            .ip_histogram
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, count)| count > 0)
            .collect();
        indexed.sort_unstable_by(|a, b| b.1.cmp(&a.1));
        indexed
            .into_iter()
            .take(k)
            .map(|(slot, count)| (((slot as u32) << 16) | slot as u32, count))
            .collect()
    }

    pub fn memory_bytes(&self) -> usize {
        self.cells.len() * std::mem::size_of::<u32>()
            + self.ip_histogram.len() * std::mem::size_of::<u32>()
    }
}
