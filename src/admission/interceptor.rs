//! gRPC interceptor applying the admission policy to every call.

use std::sync::Arc;

use tonic::service::Interceptor;
use tonic::{Request, Status};

use super::{AdmissionDecision, AdmissionPolicy};
use crate::identity::AgentIdentity;
use crate::AppError;

/// Rejects calls with `ResourceExhausted` when the policy says so.
///
/// Installed on the whole service, so unary and streaming methods are gated
/// the same way and before their handlers run.
#[derive(Clone)]
pub struct AdmissionInterceptor {
    policy: Arc<dyn AdmissionPolicy>,
    identity: AgentIdentity,
}

impl AdmissionInterceptor {
    /// Create an interceptor for `policy`.
    #[must_use]
    pub fn new(policy: Arc<dyn AdmissionPolicy>, identity: AgentIdentity) -> Self {
        Self { policy, identity }
    }
}

impl std::fmt::Debug for AdmissionInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionInterceptor")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Interceptor for AdmissionInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        match self.policy.evaluate() {
            AdmissionDecision::Admit => Ok(request),
            AdmissionDecision::Reject => Err(AppError::Rejected(
                "request is rejected due to rate limiting policy".into(),
            )
            .into_status(&self.identity)),
        }
    }
}
