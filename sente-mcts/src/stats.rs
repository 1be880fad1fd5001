//! Shared atomic-statistics helpers.
//!
//! Running sums use word-sized atomics with a compare-and-swap loop; there
//! is no cross-field transactionality. Readers may observe a visit counter
//! incremented before the matching sum. The race is bounded: statistics
//! converge, and visit counts are re-read at use time so no reader divides
//! by zero.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Atomic `f64` backed by an `AtomicU64` bit pattern.
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(value: f64) -> AtomicF64 {
        AtomicF64 {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Lock-free add via compare-and-swap.
    pub fn fetch_add(&self, delta: f64) -> f64 {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let new = (f64::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                new,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return f64::from_bits(current),
                Err(observed) => current = observed,
            }
        }
    }
}

/// Atomic `f32` backed by an `AtomicU32` bit pattern.
#[derive(Debug, Default)]
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> AtomicF32 {
        AtomicF32 {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Lower the stored value to `value` if it is smaller. Returns the
    /// value in place afterwards.
    pub fn fetch_min(&self, value: f32) -> f32 {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let cur = f32::from_bits(current);
            if value >= cur {
                return cur;
            }
            match self.bits.compare_exchange_weak(
                current,
                value.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return value,
                Err(observed) => current = observed,
            }
        }
    }
}

/// One-sided Student-t quantiles at 95% confidence, by degrees of freedom.
/// Entries are (df, quantile); lookups interpolate between rows and fall
/// back to the normal quantile for large df.
const T_QUANTILE_TABLE: &[(u32, f32)] = &[
    (1, 6.314),
    (2, 2.920),
    (3, 2.353),
    (4, 2.132),
    (5, 2.015),
    (6, 1.943),
    (7, 1.895),
    (8, 1.860),
    (9, 1.833),
    (10, 1.812),
    (12, 1.782),
    (15, 1.753),
    (20, 1.725),
    (25, 1.708),
    (30, 1.697),
    (40, 1.684),
    (60, 1.671),
    (120, 1.658),
];

const NORMAL_QUANTILE_95: f32 = 1.645;

/// Cached one-sided Student-t quantile for `df` degrees of freedom.
pub fn t_quantile(df: u32) -> f32 {
    if df == 0 {
        return T_QUANTILE_TABLE[0].1;
    }
    let last = T_QUANTILE_TABLE[T_QUANTILE_TABLE.len() - 1];
    if df == last.0 {
        return last.1;
    }
    if df > last.0 {
        return NORMAL_QUANTILE_95;
    }
    let mut prev = T_QUANTILE_TABLE[0];
    for &(d, q) in T_QUANTILE_TABLE {
        if d == df {
            return q;
        }
        if d > df {
            let span = (d - prev.0) as f32;
            let frac = (df - prev.0) as f32 / span;
            return prev.1 + frac * (q - prev.1);
        }
        prev = (d, q);
    }
    NORMAL_QUANTILE_95
}
