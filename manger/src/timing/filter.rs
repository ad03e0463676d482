//! Order statistics and moments over timing measurements.
//!
//! Network jitter shows up as positive spikes, so a low order statistic of each row of
//! measurements is a much steadier estimate than the row mean.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("rank {rank} is out of range for a row of {len} samples")]
    RankOutOfRange { rank: usize, len: usize },
    #[error("empty rank range [{min}, {max})")]
    EmptyRankRange { min: usize, max: usize },
}

/// rank-th smallest value of one row of measurements
pub fn percentile_of(row: &[u64], rank: usize) -> Result<f64, FilterError> {
    if rank >= row.len() {
        return Err(FilterError::RankOutOfRange {
            rank,
            len: row.len(),
        });
    }
    let mut sorted = row.to_vec();
    let (_, value, _) = sorted.select_nth_unstable(rank);
    Ok(*value as f64)
}

/// rank-th smallest value of every row, each row is ordered on its own
pub fn percentile(samples: &[Vec<u64>], rank: usize) -> Result<Vec<f64>, FilterError> {
    samples.iter().map(|row| percentile_of(row, rank)).collect()
}

/// Arithmetic mean, NaN for no values
pub fn empirical_mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with the unbiased n - 1 denominator, 0 for less than two values
pub fn empirical_standard_deviation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = empirical_mean(values);
    let squares: f64 = values.iter().map(|value| (value - mean).powi(2)).sum();
    (squares / (values.len() - 1) as f64).sqrt()
}

/// Mean of the standard deviations of two classes
pub fn mean_empirical_standard_deviation(a: &[f64], b: &[f64]) -> f64 {
    (empirical_standard_deviation(a) + empirical_standard_deviation(b)) / 2.0
}

/// Rank in `[rank_min, rank_max)` whose order statistics spread least within both classes.
///
/// Ties keep the lower rank.
pub fn find_best_percentile(
    class_a: &[Vec<u64>],
    class_b: &[Vec<u64>],
    rank_min: usize,
    rank_max: usize,
) -> Result<usize, FilterError> {
    if rank_min >= rank_max {
        return Err(FilterError::EmptyRankRange {
            min: rank_min,
            max: rank_max,
        });
    }

    let mut best = (rank_min, f64::INFINITY);
    for rank in rank_min..rank_max {
        let spread = mean_empirical_standard_deviation(
            &percentile(class_a, rank)?,
            &percentile(class_b, rank)?,
        );
        if spread < best.1 {
            best = (rank, spread);
        }
    }
    Ok(best.0)
}
