use crypto_bigint::{Encoding, Uint};
use tracing::info;

use super::{proxy_for, stable_response, LearnerError, LearningResult, OracleLearner, RequestSource};
use crate::{
    config::ErrorLearnerConfig,
    endpoint::Endpoint,
    manger::{generate_plaintext_geq_b, generate_plaintext_less_b},
    oracle::ErrorCodeOracle,
    report::Report,
    transport::Transport,
    wire::ErrorMessage,
};

/// Learns whether the server answers both plaintext classes with distinct status codes.
pub struct ErrorCodeOracleLearner<T, R> {
    transport: T,
    requests: R,
    config: ErrorLearnerConfig,
}

impl<T, R> ErrorCodeOracleLearner<T, R> {
    pub fn new(transport: T, requests: R, config: ErrorLearnerConfig) -> Self {
        Self {
            transport,
            requests,
            config,
        }
    }
}

impl<const LIMBS: usize, T, R> OracleLearner<LIMBS> for ErrorCodeOracleLearner<T, R>
where
    Uint<LIMBS>: Encoding,
    T: Transport + Clone,
    R: RequestSource<LIMBS>,
{
    type Oracle = ErrorCodeOracle<LIMBS, T>;

    fn learn(&mut self, endpoint: &Endpoint<LIMBS>) -> Result<LearningResult<Self::Oracle>, LearnerError> {
        let mut proxy = proxy_for(endpoint, &mut self.requests, self.transport.clone())?;
        let mut report = Report::new("error code").with("verifications", self.config.verifications);
        let code = |error: &ErrorMessage| error.code;
        let mut rng = rand::thread_rng();

        let less_b = generate_plaintext_less_b(&endpoint.public_key, &mut rng);
        let Some(less_code) = stable_response(&mut proxy, self.config.verifications, || less_b.clone(), code)? else {
            info!("answers to a plaintext below B are not stable");
            return Ok(LearningResult::failure(report.with("result", "unstable answer below B")));
        };
        report.push("code below B", format_args!("0x{less_code:08X}"));

        let geq_b = generate_plaintext_geq_b(&endpoint.public_key, &mut rng);
        let Some(geq_code) = stable_response(&mut proxy, self.config.verifications, || geq_b.clone(), code)? else {
            info!("answers to a plaintext above B are not stable");
            return Ok(LearningResult::failure(report.with("result", "unstable answer above B")));
        };
        report.push("code above B", format_args!("0x{geq_code:08X}"));

        if less_code == geq_code {
            info!(code = less_code, "both plaintext classes give the same code");
            return Ok(LearningResult::failure(report.with("result", "identical codes")));
        }

        info!(less_code, geq_code, "error code oracle learned");
        let oracle = ErrorCodeOracle::for_code(proxy, less_code).with_non_error_policy(self.config.non_error_policy);
        Ok(LearningResult::success(oracle, report.with("result", "distinct codes")))
    }
}
