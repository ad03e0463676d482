use std::thread;

use crypto_bigint::{Encoding, Uint};
use tracing::{debug, info};

use super::{
    filter::{empirical_mean, find_best_percentile, mean_empirical_standard_deviation, percentile, percentile_of},
    DecisionBoundary, DecisionRule, TimingSource,
};
use crate::{
    bigint::rsa::RSA,
    config::TimingConfig,
    manger::{generate_plaintext_geq_b, generate_plaintext_less_b},
    oracle::OracleError,
};

/// Decision rule with a single threshold on the filtered response time.
///
/// Calibration and prediction take measurements in exactly the same way, a row of
/// `sample_size` timings per cipher block with `pause` between requests.
pub struct LinearDecisionRule<const LIMBS: usize, S: TimingSource<LIMBS>> {
    source: S,
    config: TimingConfig,
    boundary: Option<DecisionBoundary>,
}

impl<const LIMBS: usize, S: TimingSource<LIMBS>> LinearDecisionRule<LIMBS, S>
where
    Uint<LIMBS>: Encoding,
{
    pub fn new(source: S, config: TimingConfig) -> Self {
        Self {
            source,
            config,
            boundary: None,
        }
    }

    /// Rule reusing a boundary learned earlier in this run
    pub fn with_boundary(source: S, config: TimingConfig, boundary: DecisionBoundary) -> Self {
        Self {
            source,
            config,
            boundary: Some(boundary),
        }
    }

    pub fn config(&self) -> &TimingConfig {
        &self.config
    }

    fn sample(&mut self, cipher_block: &[u8]) -> Result<Vec<u64>, OracleError> {
        let mut row = Vec::with_capacity(self.config.sample_size);
        for _ in 0..self.config.sample_size {
            if !self.config.pause.is_zero() {
                thread::sleep(self.config.pause);
            }
            row.push(self.source.measure(cipher_block)?);
        }
        Ok(row)
    }

    fn encrypted(&self, plain_block: &[u8]) -> Result<Vec<u8>, OracleError> {
        RSA::apply_block(self.source.public_key(), plain_block)
            .ok_or_else(|| OracleError::Calibration("plaintext does not fit the modulus".into()))
    }
}

impl<const LIMBS: usize, S: TimingSource<LIMBS>> DecisionRule for LinearDecisionRule<LIMBS, S>
where
    Uint<LIMBS>: Encoding,
{
    fn learn(&mut self) -> Result<DecisionBoundary, OracleError> {
        let TimingConfig {
            rounds,
            sample_size,
            ..
        } = self.config;
        if rounds < 2 || sample_size == 0 {
            return Err(OracleError::Calibration(format!(
                "need at least 2 rounds and 1 sample, got {rounds} rounds of {sample_size}"
            )));
        }

        let public_key = *self.source.public_key();
        let mut rng = rand::thread_rng();
        let mut less_b = Vec::with_capacity(rounds);
        let mut geq_b = Vec::with_capacity(rounds);

        for round in 0..rounds {
            let less_block = self.encrypted(&generate_plaintext_less_b(&public_key, &mut rng))?;
            let geq_block = self.encrypted(&generate_plaintext_geq_b(&public_key, &mut rng))?;
            less_b.push(self.sample(&less_block)?);
            geq_b.push(self.sample(&geq_block)?);
            debug!(round, "calibration round sampled");
        }

        let max_rank = self.config.max_rank().min(sample_size);
        let rank = find_best_percentile(&less_b, &geq_b, 0, max_rank)?;
        let filtered_less = percentile(&less_b, rank)?;
        let filtered_geq = percentile(&geq_b, rank)?;

        let mean_less_b = empirical_mean(&filtered_less);
        let mean_geq_b = empirical_mean(&filtered_geq);
        let boundary = DecisionBoundary {
            threshold: (mean_less_b + mean_geq_b) / 2.0,
            inverted: mean_less_b > mean_geq_b,
            mean_less_b,
            mean_geq_b,
            mean_std_dev: mean_empirical_standard_deviation(&filtered_less, &filtered_geq),
            percentile_rank: rank,
        };
        info!(
            threshold = boundary.threshold,
            inverted = boundary.inverted,
            mean_less_b,
            mean_geq_b,
            std_dev = boundary.mean_std_dev,
            rank,
            "decision boundary learned"
        );

        self.boundary = Some(boundary.clone());
        Ok(boundary)
    }

    fn predict(&mut self, cipher_block: &[u8]) -> Result<bool, OracleError> {
        let rank = self
            .boundary
            .as_ref()
            .ok_or(OracleError::NotCalibrated)?
            .percentile_rank;
        let row = self.sample(cipher_block)?;
        let filtered = percentile_of(&row, rank)?;

        self.boundary
            .as_ref()
            .map(|boundary| boundary.classify(filtered))
            .ok_or(OracleError::NotCalibrated)
    }

    fn boundary(&self) -> Option<&DecisionBoundary> {
        self.boundary.as_ref()
    }
}
