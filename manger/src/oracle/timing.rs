use tracing::trace;

use super::{Oracle, OracleError};
use crate::timing::DecisionRule;

/// Oracle answering through a calibrated timing decision rule
pub struct TimingOracle<R: DecisionRule> {
    rule: R,
    queries: u64,
}

impl<R: DecisionRule> TimingOracle<R> {
    pub fn new(rule: R) -> Self {
        Self { rule, queries: 0 }
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }
}

impl<R: DecisionRule> Oracle for TimingOracle<R> {
    fn check_validity(&mut self, block: &[u8]) -> Result<bool, OracleError> {
        self.queries += 1;
        let less = self.rule.predict(block)?;
        trace!(query = self.queries, less, "timing oracle");
        Ok(less)
    }

    fn query_count(&self) -> u64 {
        self.queries
    }
}
