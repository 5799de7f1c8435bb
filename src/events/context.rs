use tokio_util::sync::CancellationToken;

use super::emitter::Emitter;

/// Context provided to handlers during one dispatch.
///
/// The cancellation token fires when the dispatch times out. Worker shutdown
/// does not fire it: in-flight dispatches are left to finish. Handlers are never
/// aborted, so long-running ones should check it.
#[derive(Clone)]
pub struct HandlerContext {
    /// Token to check for timeout requests.
    pub cancellation_token: CancellationToken,

    /// Emitter for follow-up events.
    pub emitter: Emitter,
}

impl HandlerContext {
    pub fn new(cancellation_token: CancellationToken, emitter: Emitter) -> Self {
        Self {
            cancellation_token,
            emitter,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
