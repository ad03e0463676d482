//! Turning response time measurements into oracle answers.

use crypto_bigint::{Encoding, Uint};

use crate::{
    bigint::rsa::PublicKey,
    oracle::{OracleError, VictimProxy},
    transport::Transport,
};

pub mod filter;
pub mod linear;

pub use linear::LinearDecisionRule;

/// Calibrated separation between the timings of both plaintext classes
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionBoundary {
    pub threshold: f64,
    /// Set when plaintexts below B answer slower than the others
    pub inverted: bool,
    pub mean_less_b: f64,
    pub mean_geq_b: f64,
    pub mean_std_dev: f64,
    /// Order statistic used to filter each row of measurements
    pub percentile_rank: usize,
}

impl DecisionBoundary {
    /// Distance between the class means
    pub fn separation(&self) -> f64 {
        (self.mean_less_b - self.mean_geq_b).abs()
    }

    /// Whether a filtered measurement belongs to the class below B
    pub fn classify(&self, filtered: f64) -> bool {
        (filtered < self.threshold) ^ self.inverted
    }
}

/// Statistical rule answering the oracle question from timings
pub trait DecisionRule {
    /// Calibrates the rule, replacing any earlier boundary
    fn learn(&mut self) -> Result<DecisionBoundary, OracleError>;

    fn predict(&mut self, cipher_block: &[u8]) -> Result<bool, OracleError>;

    fn boundary(&self) -> Option<&DecisionBoundary>;
}

/// Anything that can time the processing of a cipher block
pub trait TimingSource<const LIMBS: usize> {
    fn public_key(&self) -> &PublicKey<LIMBS>;

    /// One measurement in nanoseconds
    fn measure(&mut self, cipher_block: &[u8]) -> Result<u64, OracleError>;
}

impl<const LIMBS: usize, T: Transport> TimingSource<LIMBS> for VictimProxy<LIMBS, T>
where
    Uint<LIMBS>: Encoding,
{
    fn public_key(&self) -> &PublicKey<LIMBS> {
        VictimProxy::public_key(self)
    }

    fn measure(&mut self, cipher_block: &[u8]) -> Result<u64, OracleError> {
        Ok(self.send_cipher_block(cipher_block)?.elapsed_nanos())
    }
}
