//! Configuration of attack, timing calibration, learners and transport.

use std::time::Duration;

use crate::oracle::NonErrorPolicy;

/// Handling of a ciphertext whose plaintext is not below B
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precondition {
    /// Start bisecting without looking at the ciphertext itself
    Skip,
    /// Query the ciphertext once and abort if it is not below B
    Require,
    /// Query the ciphertext once and blind it with random multipliers until it is below B
    #[default]
    Blind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackConfig {
    pub precondition: Precondition,
    /// Cap on random multipliers tried while blinding
    pub max_blinding_attempts: u64,
    /// Queries allowed for the bisection, defaults to twice the modulus bit length
    pub query_budget: Option<u64>,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            precondition: Precondition::default(),
            max_blinding_attempts: 4096,
            query_budget: None,
        }
    }
}

impl AttackConfig {
    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }

    pub fn with_max_blinding_attempts(mut self, attempts: u64) -> Self {
        self.max_blinding_attempts = attempts;
        self
    }

    pub fn with_query_budget(mut self, budget: u64) -> Self {
        self.query_budget = Some(budget);
        self
    }
}

/// Sampling parameters shared by calibration and prediction of a timing decision rule
#[derive(Debug, Clone, PartialEq)]
pub struct TimingConfig {
    /// Plaintexts per class during calibration
    pub rounds: usize,
    /// Measurements per cipher block
    pub sample_size: usize,
    /// Share of the lowest ranks searched for the best percentile
    pub percentile_fraction: f64,
    /// Pause between two requests
    pub pause: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            rounds: 20,
            sample_size: 50,
            percentile_fraction: 0.02,
            pause: Duration::from_millis(3),
        }
    }
}

impl TimingConfig {
    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_percentile_fraction(mut self, fraction: f64) -> Self {
        self.percentile_fraction = fraction;
        self
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Exclusive upper end of the searched rank range, at least 1
    pub fn max_rank(&self) -> usize {
        ((self.sample_size as f64 * self.percentile_fraction) as usize).max(1)
    }
}

/// Connection settings, the Hello values follow the usual client defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Bound on connect, handshake and response of one query
    pub timeout: Duration,
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    /// 0 means no limit
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            protocol_version: 0,
            receive_buffer_size: 1 << 20,
            send_buffer_size: 1 << 20,
            max_message_size: 0,
            max_chunk_count: 1024,
        }
    }
}

impl TransportConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Settings of the error code and error reason learners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLearnerConfig {
    /// Repetitions per plaintext class that must answer identically
    pub verifications: usize,
    /// Attempts of the robust oracle built from error reasons
    pub attempts: usize,
    pub non_error_policy: NonErrorPolicy,
}

impl Default for ErrorLearnerConfig {
    fn default() -> Self {
        Self {
            verifications: 10,
            attempts: 10,
            non_error_policy: NonErrorPolicy::default(),
        }
    }
}

impl ErrorLearnerConfig {
    pub fn with_verifications(mut self, verifications: usize) -> Self {
        self.verifications = verifications;
        self
    }

    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_non_error_policy(mut self, policy: NonErrorPolicy) -> Self {
        self.non_error_policy = policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingLearnerConfig {
    pub timing: TimingConfig,
    /// Required distance of the class means in combined standard deviations
    pub min_separation: f64,
}

impl Default for TimingLearnerConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            min_separation: 2.0,
        }
    }
}

impl TimingLearnerConfig {
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_min_separation(mut self, sigmas: f64) -> Self {
        self.min_separation = sigmas;
        self
    }
}
