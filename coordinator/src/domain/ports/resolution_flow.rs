//! Port for handing recoverable connection failures to an external
//! resolution flow, such as a user consent prompt.

use tokio::sync::mpsc;
use tracing::warn;

use super::ConnectionFailure;
use crate::domain::CorrelationId;

/// Which coordinator raised a resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// The add coordinator.
    Add,
    /// The remove coordinator.
    Remove,
}

/// A recoverable failure awaiting external resolution.
///
/// The coordinator that raised it sits in `AwaitingResolution` until the
/// caller either retries with identical arguments or gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    /// Coordinator waiting for the resolution.
    pub kind: OperationKind,
    /// Correlation id of the request that failed to connect.
    pub correlation_id: CorrelationId,
    /// The failure to resolve.
    pub failure: ConnectionFailure,
}

/// How the external resolution flow ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionResult {
    /// The problem was fixed and the request may be retried.
    Resolved,
    /// The user declined or the flow could not fix the problem.
    Cancelled,
}

/// Receives recoverable connection failures.
#[cfg_attr(test, mockall::automock)]
pub trait ResolutionFlow: Send + Sync {
    /// Start resolving `request`. Called outside the coordinator's lock.
    fn resolution_required(&self, request: ResolutionRequest);
}

/// Forwards resolution requests to a channel.
#[derive(Debug, Clone)]
pub struct ChannelResolutionFlow {
    sender: mpsc::UnboundedSender<ResolutionRequest>,
}

impl ChannelResolutionFlow {
    /// Create the flow and the receiver its requests arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ResolutionRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ResolutionFlow for ChannelResolutionFlow {
    fn resolution_required(&self, request: ResolutionRequest) {
        if let Err(error) = self.sender.send(request) {
            warn!(
                correlation_id = %error.0.correlation_id,
                "resolution request dropped; receiver closed"
            );
        }
    }
}
