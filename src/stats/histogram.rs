//! Per-patient sample histograms
//!
//! A fixed number of equal-width buckets over `[start, end)`, with separate
//! counters for samples below `start` (underflow) and at or above `end`
//! (overflow).

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Equal-width histogram over a bounded range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Counts per bucket, lowest range first
    buckets: Vec<u64>,

    /// Inclusive lower bound of bucket 0
    start: f64,

    /// Exclusive upper bound of the last bucket
    end: f64,

    /// Samples below `start`
    underflow: u64,

    /// Samples at or above `end` (and NaN)
    overflow: u64,
}

impl Histogram {
    /// Create an empty histogram with `num_buckets` buckets over `[start, end)`
    ///
    /// # Panics
    ///
    /// Panics if `num_buckets` is 0 or the range is empty.
    pub fn new(num_buckets: usize, start: f64, end: f64) -> Self {
        assert!(num_buckets > 0, "Histogram needs at least one bucket");
        assert!(start < end, "Histogram range must satisfy start < end");

        Self {
            buckets: vec![0; num_buckets],
            start,
            end,
            underflow: 0,
            overflow: 0,
        }
    }

    /// Record one sample
    #[inline]
    pub fn update(&mut self, value: f64) {
        if value < self.start {
            self.underflow += 1;
            return;
        }
        if value.is_nan() || value >= self.end {
            self.overflow += 1;
            return;
        }

        let width = self.bucket_width();
        let idx = ((value - self.start) / width) as usize;
        // Rounding can push values just below `end` one bucket too far
        let idx = idx.min(self.buckets.len() - 1);
        self.buckets[idx] += 1;
    }

    pub fn bucket_width(&self) -> f64 {
        (self.end - self.start) / self.buckets.len() as f64
    }

    /// `[low, high)` bounds of bucket `index`
    pub fn bucket_range(&self, index: usize) -> (f64, f64) {
        let width = self.bucket_width();
        let low = self.start + width * index as f64;
        (low, low + width)
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn underflow(&self) -> u64 {
        self.underflow
    }

    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    /// Samples that landed inside the range
    pub fn in_range(&self) -> u64 {
        self.buckets.iter().sum()
    }

    /// Every sample recorded, in range or not
    pub fn total(&self) -> u64 {
        self.in_range() + self.underflow + self.overflow
    }
}

/// One histogram per patient, shared by all sink threads
///
/// Any sink may receive any patient's sample, so each patient's histogram
/// sits behind its own lock. Updates for different patients never contend.
#[derive(Debug)]
pub struct HistogramCollection {
    per_patient: Vec<Mutex<Histogram>>,
}

impl HistogramCollection {
    /// Create `patients` empty histograms sharing one bucket layout
    pub fn new(patients: usize, num_buckets: usize, start: f64, end: f64) -> Self {
        Self {
            per_patient: (0..patients)
                .map(|_| Mutex::new(Histogram::new(num_buckets, start, end)))
                .collect(),
        }
    }

    /// Number of patients tracked
    pub fn patients(&self) -> usize {
        self.per_patient.len()
    }

    /// Record `value` for 1-based patient `person`
    ///
    /// Returns `false` if `person` is not tracked.
    pub fn update(&self, person: i32, value: f64) -> bool {
        let Some(slot) = usize::try_from(person)
            .ok()
            .and_then(|p| p.checked_sub(1))
            .and_then(|idx| self.per_patient.get(idx))
        else {
            return false;
        };

        slot.lock().unwrap_or_else(PoisonError::into_inner).update(value);
        true
    }

    /// Copy of every patient's histogram, patient 1 first
    pub fn snapshot(&self) -> Vec<Histogram> {
        self.per_patient
            .iter()
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    /// Total samples recorded across all patients
    pub fn total(&self) -> u64 {
        self.snapshot().iter().map(Histogram::total).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_histogram_basic() {
        let mut hist = Histogram::new(10, -2.0, 2.0);
        assert_eq!(hist.total(), 0);

        hist.update(-2.0);
        hist.update(-1.5);
        hist.update(0.0);
        hist.update(1.99);

        assert_eq!(hist.buckets()[0], 1);
        assert_eq!(hist.buckets()[1], 1);
        assert_eq!(hist.buckets()[5], 1);
        assert_eq!(hist.buckets()[9], 1);
        assert_eq!(hist.total(), 4);
    }

    #[test]
    fn test_histogram_out_of_range() {
        let mut hist = Histogram::new(4, 0.0, 1.0);

        hist.update(-0.0001);
        hist.update(1.0);
        hist.update(5.0);
        hist.update(f64::NAN);

        assert_eq!(hist.underflow(), 1);
        assert_eq!(hist.overflow(), 3);
        assert_eq!(hist.in_range(), 0);
        assert_eq!(hist.total(), 4);
    }

    #[test]
    fn test_bucket_range() {
        let hist = Histogram::new(10, -2.0, 2.0);
        let (low, high) = hist.bucket_range(0);
        assert!((low + 2.0).abs() < 1e-12);
        assert!((high + 1.6).abs() < 1e-12);

        let (low, high) = hist.bucket_range(9);
        assert!((low - 1.6).abs() < 1e-12);
        assert!((high - 2.0).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "start < end")]
    fn test_empty_range_rejected() {
        let _ = Histogram::new(10, 1.0, 1.0);
    }

    #[test]
    fn test_collection_routes_by_person() {
        let hc = HistogramCollection::new(3, 10, -2.0, 2.0);

        assert!(hc.update(1, 0.1));
        assert!(hc.update(3, 0.1));
        assert!(hc.update(3, -0.1));
        assert!(!hc.update(0, 0.1));
        assert!(!hc.update(4, 0.1));
        assert!(!hc.update(-1, 0.1));

        let snap = hc.snapshot();
        assert_eq!(snap[0].total(), 1);
        assert_eq!(snap[1].total(), 0);
        assert_eq!(snap[2].total(), 2);
        assert_eq!(hc.total(), 3);
    }

    #[test]
    fn test_collection_concurrent_updates() {
        let hc = Arc::new(HistogramCollection::new(2, 4, 0.0, 4.0));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let hc = hc.clone();
                thread::spawn(move || {
                    for i in 0..1000 {
                        hc.update(1 + (t % 2), (i % 4) as f64 + 0.5);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = hc.snapshot();
        assert_eq!(snap[0].total(), 4000);
        assert_eq!(snap[1].total(), 4000);
        assert_eq!(snap[0].buckets(), &[1000, 1000, 1000, 1000]);
    }
}
