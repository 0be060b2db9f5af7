//! Observer callbacks and passive middleware

use std::sync::Arc;

use crate::state::{ShareAction, ShareState};
use crate::store::{Middleware, Next, StoreApi};

/// Receives state changes and fine-grained progress
pub trait ShareObserver: Send + Sync {
    /// Called with the new state after every dispatch
    fn on_state_changed(&self, state: &ShareState);

    /// Share of the archive sent, 0-100
    fn on_upload_progress(&self, _percent: u8) {}

    /// Server-side processing progress, 0-100
    fn on_processing_progress(&self, _percent: u8) {}
}

/// Forwards progress actions to an observer without a state round-trip
pub struct ObserverMiddleware {
    observer: Arc<dyn ShareObserver>,
}

impl ObserverMiddleware {
    pub fn new(observer: Arc<dyn ShareObserver>) -> Self {
        Self { observer }
    }
}

impl Middleware<ShareState, ShareAction> for ObserverMiddleware {
    fn handle(
        &mut self,
        _store: &StoreApi<ShareState, ShareAction>,
        action: ShareAction,
        next: Next<'_, ShareState, ShareAction>,
    ) -> ShareAction {
        let action = next.run(action);
        match &action {
            ShareAction::UploadProgress { percent } => self.observer.on_upload_progress(*percent),
            ShareAction::QueryProgressResponse { response } => {
                self.observer.on_processing_progress(response.percent())
            }
            _ => {}
        }
        action
    }
}

/// Logs every action and the phase it leaves behind
pub struct LogMiddleware;

impl Middleware<ShareState, ShareAction> for LogMiddleware {
    fn handle(
        &mut self,
        store: &StoreApi<ShareState, ShareAction>,
        action: ShareAction,
        next: Next<'_, ShareState, ShareAction>,
    ) -> ShareAction {
        let before = store.state().phase;
        let action = next.run(action);
        let after = store.state().phase;

        match &action {
            // Sampled twice a second; too noisy for debug
            ShareAction::UploadProgress { percent } => {
                tracing::trace!("UploadProgress {}%", percent)
            }
            ShareAction::OnError { message } => {
                tracing::warn!("OnError: {} ({:?})", message, after)
            }
            _ if before != after => {
                tracing::debug!("{}: {:?} -> {:?}", action.name(), before, after)
            }
            _ => tracing::debug!("{}", action.name()),
        }
        action
    }
}
