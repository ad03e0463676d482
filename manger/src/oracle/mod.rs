//! Oracles answering whether the plaintext of a cipher block lies below B.

use thiserror::Error;

use crate::{timing::filter::FilterError, transport::TransportError, wire::ErrorMessage};

pub mod direct;
pub mod error_code;
pub mod proxy;
pub mod robust;
pub mod timing;

pub use direct::DirectOracle;
pub use error_code::ErrorCodeOracle;
pub use proxy::VictimProxy;
pub use robust::RobustOracle;
pub use timing::TimingOracle;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("cipher block has {actual} bytes, expected {expected}")]
    InvalidBlockSize { expected: usize, actual: usize },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no discriminating answer within {attempts} attempts")]
    Exhausted { attempts: usize },
    #[error("server answered without an error message")]
    AmbiguousResponse,
    #[error("decision rule has not been calibrated")]
    NotCalibrated,
    #[error("calibration failed: {0}")]
    Calibration(String),
    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// Predicate over an error answer of the server
pub type ErrorPredicate = Box<dyn Fn(&ErrorMessage) -> bool + Send + Sync>;

/// What an error based oracle concludes from an answer that is no error message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonErrorPolicy {
    /// Take it as an accidentally valid decryption, so the plaintext was below B
    #[default]
    AssumeLessThanB,
    /// Refuse to answer, the robust oracle retries instead
    Reject,
}

/// Query counted predicate over cipher blocks.
///
/// `true` means the oracle believes the decrypted block is smaller than B.
pub trait Oracle {
    /// Counts the query on entry, before any work is done
    fn check_validity(&mut self, block: &[u8]) -> Result<bool, OracleError>;

    /// Queries issued over the lifetime of this oracle
    fn query_count(&self) -> u64;
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn check_validity(&mut self, block: &[u8]) -> Result<bool, OracleError> {
        (**self).check_validity(block)
    }

    fn query_count(&self) -> u64 {
        (**self).query_count()
    }
}

/// Fails unless the block has exactly `expected` bytes
pub(crate) fn check_block_len(block: &[u8], expected: usize) -> Result<(), OracleError> {
    if block.len() != expected {
        return Err(OracleError::InvalidBlockSize {
            expected,
            actual: block.len(),
        });
    }
    Ok(())
}
