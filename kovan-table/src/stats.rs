//! Bucket occupancy statistics.
//!
//! Computed in one pass over the per-bucket counters, never the entries.
//! Mean and standard deviation are fixed point (see [`PRECISION`]) so no
//! floating point is involved.

use core::fmt;

use crate::error::TableError;

/// Fixed-point scale for mean and standard deviation.
pub const PRECISION: u64 = 1000;

/// Occupancies tracked by the mode histogram: `0..MAX_STATISTICAL_MODE`.
pub const MAX_STATISTICAL_MODE: usize = 25;

/// Occupancy distribution of a table at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    /// Value of the table's total entry counter.
    pub count: u64,
    /// Sum of all per-bucket counters.
    pub occupancy_sum: u64,
    /// Number of buckets.
    pub bucket_count: u64,
    /// Smallest bucket occupancy.
    pub min: u64,
    /// Buckets at the smallest occupancy.
    pub min_buckets: u64,
    /// Largest bucket occupancy.
    pub max: u64,
    /// Buckets at the largest occupancy.
    pub max_buckets: u64,
    /// Mean occupancy scaled by [`PRECISION`].
    pub mean_milli: u64,
    /// Population standard deviation scaled by [`PRECISION`].
    pub std_dev_milli: u64,
    /// Most frequent occupancy below [`MAX_STATISTICAL_MODE`].
    pub mode: u64,
    /// Buckets at the modal occupancy.
    pub mode_buckets: u64,
    /// `histogram[n]` is the number of buckets holding exactly `n` entries.
    /// Buckets at or above [`MAX_STATISTICAL_MODE`] are not counted.
    pub histogram: [u64; MAX_STATISTICAL_MODE],
    /// Presentation labels for `histogram`: `0..MAX_STATISTICAL_MODE`.
    pub labels: [u32; MAX_STATISTICAL_MODE],
}

impl TableStats {
    /// Builds statistics from the table counter and per-bucket occupancies.
    ///
    /// Fails with [`TableError::InvalidArgument`] when there are no buckets.
    pub fn from_occupancies<I>(count: u64, occupancies: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = u32>,
    {
        let mut stats = TableStats {
            count,
            occupancy_sum: 0,
            bucket_count: 0,
            min: u64::MAX,
            min_buckets: 0,
            max: 0,
            max_buckets: 0,
            mean_milli: 0,
            std_dev_milli: 0,
            mode: 0,
            mode_buckets: 0,
            histogram: [0; MAX_STATISTICAL_MODE],
            labels: core::array::from_fn(|i| i as u32),
        };

        // u128 keeps the squared fixed-point sum exact for any u32 occupancy.
        let mut scaled_sum: u128 = 0;
        let mut squared_sum: u128 = 0;

        for occupancy in occupancies {
            let occupancy = occupancy as u64;
            stats.bucket_count += 1;
            stats.occupancy_sum += occupancy;

            if occupancy < stats.min {
                stats.min = occupancy;
                stats.min_buckets = 1;
            } else if occupancy == stats.min {
                stats.min_buckets += 1;
            }

            if occupancy > stats.max {
                stats.max = occupancy;
                stats.max_buckets = 1;
            } else if occupancy == stats.max {
                stats.max_buckets += 1;
            }

            if let Some(slot) = stats.histogram.get_mut(occupancy as usize) {
                *slot += 1;
            }

            let scaled = (occupancy * PRECISION) as u128;
            scaled_sum += scaled;
            squared_sum += scaled * scaled;
        }

        if stats.bucket_count == 0 {
            return Err(TableError::InvalidArgument("table has no buckets"));
        }

        let n = stats.bucket_count as u128;
        let mean = scaled_sum / n;
        let variance = (squared_sum / n).saturating_sub(mean * mean);
        stats.mean_milli = mean as u64;
        stats.std_dev_milli = variance.isqrt() as u64;

        // Ties go to the lowest occupancy.
        for (occupancy, &buckets) in stats.histogram.iter().enumerate() {
            if buckets > stats.mode_buckets {
                stats.mode = occupancy as u64;
                stats.mode_buckets = buckets;
            }
        }

        Ok(stats)
    }

    /// Whole part of the mean occupancy.
    #[inline]
    pub fn mean(&self) -> u64 {
        self.mean_milli / PRECISION
    }

    /// Whole part of the standard deviation.
    #[inline]
    pub fn std_dev(&self) -> u64 {
        self.std_dev_milli / PRECISION
    }
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "entries: {}, buckets: {}",
            self.count, self.bucket_count
        )?;
        writeln!(
            f,
            "min: {} ({} buckets), max: {} ({} buckets)",
            self.min, self.min_buckets, self.max, self.max_buckets
        )?;
        writeln!(
            f,
            "mean: {}.{:03}, std dev: {}.{:03}",
            self.mean(),
            self.mean_milli % PRECISION,
            self.std_dev(),
            self.std_dev_milli % PRECISION
        )?;
        write!(f, "mode: {} ({} buckets)", self.mode, self.mode_buckets)
    }
}
