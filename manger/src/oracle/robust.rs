use crypto_bigint::{Encoding, Uint};
use tracing::{debug, trace};

use super::{ErrorPredicate, NonErrorPolicy, Oracle, OracleError, VictimProxy};
use crate::transport::Transport;

/// Oracle with one predicate per plaintext class.
///
/// A block is re-sent until exactly one of the predicates fires, answers where both or none
/// fire are discarded.
pub struct RobustOracle<const LIMBS: usize, T: Transport> {
    proxy: VictimProxy<LIMBS, T>,
    less_than_b: ErrorPredicate,
    geq_b: ErrorPredicate,
    attempts: usize,
    non_error_policy: NonErrorPolicy,
    queries: u64,
}

impl<const LIMBS: usize, T: Transport> RobustOracle<LIMBS, T>
where
    Uint<LIMBS>: Encoding,
{
    pub fn new(
        proxy: VictimProxy<LIMBS, T>,
        less_than_b: ErrorPredicate,
        geq_b: ErrorPredicate,
        attempts: usize,
    ) -> Self {
        Self {
            proxy,
            less_than_b,
            geq_b,
            attempts,
            non_error_policy: NonErrorPolicy::default(),
            queries: 0,
        }
    }

    pub fn with_non_error_policy(mut self, policy: NonErrorPolicy) -> Self {
        self.non_error_policy = policy;
        self
    }
}

impl<const LIMBS: usize, T: Transport> Oracle for RobustOracle<LIMBS, T>
where
    Uint<LIMBS>: Encoding,
{
    fn check_validity(&mut self, block: &[u8]) -> Result<bool, OracleError> {
        self.queries += 1;

        for attempt in 0..self.attempts {
            let result = self.proxy.send_cipher_block(block)?;
            let Some(error) = result.response.error() else {
                match self.non_error_policy {
                    NonErrorPolicy::AssumeLessThanB => return Ok(true),
                    NonErrorPolicy::Reject => {
                        debug!(attempt, "no error message, retrying");
                        continue;
                    }
                }
            };

            let less = (self.less_than_b)(error);
            let geq = (self.geq_b)(error);
            if less ^ geq {
                trace!(query = self.queries, attempt, less, "robust oracle");
                return Ok(less);
            }
            debug!(attempt, %error, "answer fits both or neither class");
        }

        Err(OracleError::Exhausted {
            attempts: self.attempts,
        })
    }

    fn query_count(&self) -> u64 {
        self.queries
    }
}

#[cfg(test)]
mod tests {
    use crypto_bigint::U512;
    use proptest::prelude::*;

    use super::*;
    use crate::{
        oracle::proxy::tests::{proxy, Scripted},
        transport::Response,
        wire::ErrorMessage,
    };

    fn oracle(
        transport: Scripted,
        less: fn(&ErrorMessage) -> bool,
        geq: fn(&ErrorMessage) -> bool,
        attempts: usize,
    ) -> RobustOracle<{ U512::LIMBS }, Scripted> {
        RobustOracle::new(proxy(transport), Box::new(less), Box::new(geq), attempts)
    }

    #[test]
    fn test_skips_undecided_answers() {
        let transport = Scripted::default();
        let sent = transport.sent.clone();
        transport.responses.lock().unwrap().extend([
            Scripted::error(1, "both"),
            Scripted::error(1, "neither"),
            Scripted::error(1, "geq"),
        ]);
        let mut oracle = oracle(
            transport,
            |e| e.reason == "less" || e.reason == "both",
            |e| e.reason == "geq" || e.reason == "both",
            10,
        );

        assert!(!oracle.check_validity(&[3; 64]).unwrap());
        assert_eq!(oracle.query_count(), 1);
        assert_eq!(sent.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_non_error_policies() {
        let mut assume = oracle(Scripted::always(Response::Closed), |_| false, |_| true, 3);
        assert!(assume.check_validity(&[3; 64]).unwrap());

        let transport = Scripted::default();
        transport
            .responses
            .lock()
            .unwrap()
            .extend([Response::Closed, Scripted::error(1, "geq")]);
        let mut reject = oracle(transport, |_| false, |e| e.reason == "geq", 3)
            .with_non_error_policy(NonErrorPolicy::Reject);
        assert!(!reject.check_validity(&[3; 64]).unwrap());

        let mut exhausted = oracle(Scripted::always(Response::Closed), |_| false, |_| true, 3)
            .with_non_error_policy(NonErrorPolicy::Reject);
        assert!(matches!(
            exhausted.check_validity(&[3; 64]),
            Err(OracleError::Exhausted { attempts: 3 })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn disagreeing_predicates_never_exhaust(attempts in 1usize..20, code in any::<u32>()) {
            let transport = Scripted::always(Scripted::error(code, ""));
            let mut oracle = oracle(transport, |e| e.code % 2 == 0, |e| e.code % 2 == 1, attempts);
            prop_assert_eq!(oracle.check_validity(&[3; 64]).unwrap(), code % 2 == 0);
        }

        #[test]
        fn agreeing_predicates_always_exhaust(attempts in 0usize..20, code in any::<u32>(), fire in any::<bool>()) {
            let transport = Scripted::always(Scripted::error(code, ""));
            let sent = transport.sent.clone();
            let mut oracle = if fire {
                oracle(transport, |_| true, |_| true, attempts)
            } else {
                oracle(transport, |_| false, |_| false, attempts)
            };

            let result = oracle.check_validity(&[3; 64]);
            prop_assert!(matches!(result, Err(OracleError::Exhausted { attempts: a }) if a == attempts), "expected Exhausted {{ attempts: {} }}, got {:?}", attempts, result);
            prop_assert_eq!(sent.lock().unwrap().len(), attempts);
        }
    }
}
