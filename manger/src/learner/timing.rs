use crypto_bigint::{Encoding, Uint};
use tracing::info;

use super::{proxy_for, LearnerError, LearningResult, OracleLearner, RequestSource};
use crate::{
    config::TimingLearnerConfig,
    endpoint::Endpoint,
    oracle::{TimingOracle, VictimProxy},
    report::Report,
    timing::{DecisionRule, LinearDecisionRule},
    transport::Transport,
};

pub type TimingRule<const LIMBS: usize, T> = LinearDecisionRule<LIMBS, VictimProxy<LIMBS, T>>;

/// Calibrates a linear decision rule on response times and accepts it when the
/// classes lie far enough apart.
pub struct TimingOracleLearner<T, R> {
    transport: T,
    requests: R,
    config: TimingLearnerConfig,
}

impl<T, R> TimingOracleLearner<T, R> {
    pub fn new(transport: T, requests: R, config: TimingLearnerConfig) -> Self {
        Self {
            transport,
            requests,
            config,
        }
    }
}

impl<const LIMBS: usize, T, R> OracleLearner<LIMBS> for TimingOracleLearner<T, R>
where
    Uint<LIMBS>: Encoding,
    T: Transport + Clone,
    R: RequestSource<LIMBS>,
{
    type Oracle = TimingOracle<TimingRule<LIMBS, T>>;

    fn learn(&mut self, endpoint: &Endpoint<LIMBS>) -> Result<LearningResult<Self::Oracle>, LearnerError> {
        let proxy = proxy_for(endpoint, &mut self.requests, self.transport.clone())?;
        let mut rule = LinearDecisionRule::new(proxy, self.config.timing.clone());
        let boundary = rule.learn()?;

        let separation = boundary.separation();
        let required = self.config.min_separation * boundary.mean_std_dev;
        let report = Report::new("timing")
            .with("mean below B", boundary.mean_less_b)
            .with("mean above B", boundary.mean_geq_b)
            .with("separation", separation)
            .with("mean std dev", boundary.mean_std_dev)
            .with("threshold", boundary.threshold)
            .with("inverted", boundary.inverted)
            .with("percentile rank", boundary.percentile_rank);

        if separation <= 0.0 || separation < required {
            info!(separation, required, "timing classes overlap");
            return Ok(LearningResult::failure(report.with("result", "classes overlap")));
        }

        info!(separation, required, "timing oracle learned");
        Ok(LearningResult::success(
            TimingOracle::new(rule),
            report.with("result", "classes separated"),
        ))
    }
}
