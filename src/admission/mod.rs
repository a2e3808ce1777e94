//! Admission control for inbound calls.
//!
//! A policy answers a single question, "can a request proceed right now",
//! and is consulted once per call by [`interceptor::AdmissionInterceptor`]
//! before any job-specific work happens. Policies hold no memory of earlier
//! decisions.

pub mod interceptor;
pub mod load;

use std::sync::Arc;

use crate::config::{AdmissionConfig, AdmissionPolicyKind};

pub use interceptor::AdmissionInterceptor;
pub use load::{LoadAveragePolicy, LoadSample, LoadSource, SystemLoad};

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The request may proceed.
    Admit,
    /// The request must be rejected.
    Reject,
}

/// Capability deciding whether an inbound request may proceed.
///
/// Any `Fn() -> AdmissionDecision` closure is a policy, so alternatives can
/// be injected without touching the interceptor.
pub trait AdmissionPolicy: Send + Sync {
    /// Evaluate the policy now.
    fn evaluate(&self) -> AdmissionDecision;
}

impl<F> AdmissionPolicy for F
where
    F: Fn() -> AdmissionDecision + Send + Sync,
{
    fn evaluate(&self) -> AdmissionDecision {
        self()
    }
}

/// Policy that admits every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAdmit;

impl AdmissionPolicy for AlwaysAdmit {
    fn evaluate(&self) -> AdmissionDecision {
        AdmissionDecision::Admit
    }
}

/// Build the policy selected in configuration.
#[must_use]
pub fn policy_from_config(config: &AdmissionConfig) -> Arc<dyn AdmissionPolicy> {
    match config.policy {
        AdmissionPolicyKind::LoadAverage => Arc::new(LoadAveragePolicy::new(
            SystemLoad,
            config.max_normalized_load,
        )),
        AdmissionPolicyKind::AlwaysAdmit => Arc::new(AlwaysAdmit),
    }
}
