//! Share workflow orchestration.
//!
//! [`ShareMiddleware`] turns dispatched actions into side effects: packaging
//! the build, uploading the archive, polling server-side processing and
//! waiting for a login. Results come back as follow-up actions queued on the
//! store, never as direct state changes.
//!
//! Cancellation is tree-shaped:
//!
//! ```text
//! context (owner, e.g. the CLI run)
//! ├── epoch (renewed on StopUpload / Destroy)
//! │   ├── packaging follow-ups
//! │   ├── upload
//! │   └── progress polls and re-poll timers
//! └── login wait (cancelled on Destroy)
//! ```
//!
//! Renewing the epoch turns every late completion or timer tick from the
//! previous attempt into a no-op.

mod observer;
mod tasks;
mod telemetry;

#[cfg(test)]
mod tests;

pub use observer::{LogMiddleware, ObserverMiddleware, ShareObserver};
pub use telemetry::{Telemetry, TracingTelemetry};

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::app_data::publisher_data;
use crate::builds::{BuildValidator, add_build_directory};
use crate::connect::{ShareApi, UploadRequest};
use crate::db::Preferences;
use crate::package::Packager;
use crate::session::Session;
use crate::state::{ShareAction, ShareState, ShareStore, reduce};
use crate::store::{Middleware, Next, StoreApi};
use crate::task::TaskSlot;
use crate::util::filtered_title;

/// Preference key of the server-assigned project identifier
pub const PROJECT_ID_KEY: &str = "projectId";

/// Collaborators the workflow talks to
pub struct ShareServices<C> {
    pub api: Arc<C>,
    pub session: Arc<dyn Session>,
    pub packager: Arc<dyn Packager>,
    pub validator: Arc<dyn BuildValidator>,
    pub prefs: Arc<dyn Preferences>,
    pub telemetry: Arc<dyn Telemetry>,
}

/// Side-effect handler for the share workflow
pub struct ShareMiddleware<C> {
    services: ShareServices<C>,
    context: CancellationToken,
    epoch: CancellationToken,
    upload: TaskSlot,
    login_wait: TaskSlot,
    max_tracked: usize,
}

impl<C: ShareApi> ShareMiddleware<C> {
    /// Tie all background work to `context`; cancelling it stops the
    /// login-wait loop and every outstanding task.
    pub fn with_context(services: ShareServices<C>, context: CancellationToken) -> Self {
        Self {
            services,
            epoch: context.child_token(),
            context,
            upload: TaskSlot::new("upload"),
            login_wait: TaskSlot::new("login wait"),
            max_tracked: publisher_data().build.max_tracked,
        }
    }

    pub fn with_max_tracked(mut self, max_tracked: usize) -> Self {
        self.max_tracked = max_tracked;
        self
    }

    /// Invalidate everything scheduled by the current attempt
    fn renew_epoch(&mut self) {
        self.epoch.cancel();
        self.epoch = self.context.child_token();
    }

    fn project_id(&self) -> String {
        self.services.prefs.get(PROJECT_ID_KEY).unwrap_or_else(|e| {
            tracing::warn!("Failed to read project id: {}", e);
            String::new()
        })
    }

    fn share_start(&mut self, store: &StoreApi<ShareState, ShareAction>, title: &str, build_path: &str) {
        let dispatcher = store.dispatcher().clone();
        dispatcher.dispatch(ShareAction::TitleChange {
            title: title.to_string(),
        });

        if !self.services.validator.is_valid_build(build_path) {
            tracing::warn!("Not a valid WebGL build: {:?}", build_path);
            dispatcher.dispatch(ShareAction::OnError {
                message: format!("No valid WebGL build found at '{}'.", build_path),
            });
            return;
        }

        tokio::spawn(tasks::package(
            self.services.packager.clone(),
            build_path.to_string(),
            dispatcher,
            self.epoch.clone(),
        ));
    }

    fn upload_start(&mut self, store: &StoreApi<ShareState, ShareAction>, build_guid: &str) {
        let token = self.services.session.access_token();
        if token.is_empty() {
            store.dispatcher().dispatch(ShareAction::NotLoggedIn);
            return;
        }

        let state = store.state();
        let request = UploadRequest {
            token,
            title: state.title.clone(),
            build_guid: build_guid.to_string(),
            project_id: self.project_id(),
            zip_path: PathBuf::from(&state.zip_path),
        };
        self.services
            .telemetry
            .upload_started(filtered_title(&state.title), build_guid);

        let api = self.services.api.clone();
        let telemetry = self.services.telemetry.clone();
        let dispatcher = store.dispatcher().clone();
        self.upload.start(&self.epoch, move |cancel| {
            tasks::upload(api, request, dispatcher, telemetry, cancel)
        });
    }

    fn query_progress(&mut self, store: &StoreApi<ShareState, ShareAction>, key: Option<&str>) {
        let token = self.services.session.access_token();
        if token.is_empty() {
            store.dispatcher().dispatch(ShareAction::NotLoggedIn);
            return;
        }

        let key = match key {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => store.state().key,
        };
        if key.is_empty() {
            tracing::warn!("No job key to poll progress for");
            return;
        }

        tokio::spawn(tasks::poll_progress(
            self.services.api.clone(),
            token,
            key,
            store.dispatcher().clone(),
            self.services.prefs.clone(),
            self.services.telemetry.clone(),
            self.epoch.clone(),
        ));
    }

    fn stop_upload(&mut self) {
        if self.upload.cancel() {
            tracing::info!("Upload stopped");
        }
        self.renew_epoch();
    }

    fn not_logged_in(&mut self, store: &StoreApi<ShareState, ShareAction>) {
        if !self.services.session.access_token().is_empty() {
            store.dispatcher().dispatch(ShareAction::LoggedIn);
            return;
        }
        if self.login_wait.is_running() {
            tracing::debug!("Already waiting for login");
            return;
        }

        let session = self.services.session.clone();
        let dispatcher = store.dispatcher().clone();
        self.login_wait.start(&self.context, move |cancel| {
            tasks::wait_for_login(session, dispatcher, cancel)
        });
    }

    fn build_finish(&self, output_dir: &str) {
        match add_build_directory(&*self.services.prefs, output_dir, self.max_tracked) {
            Ok(true) => tracing::info!("Tracking build {:?}", output_dir),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to track build {:?}: {}", output_dir, e),
        }
    }

    fn destroy(&mut self) {
        self.upload.cancel();
        self.login_wait.cancel();
        self.renew_epoch();
    }
}

impl<C: ShareApi> Middleware<ShareState, ShareAction> for ShareMiddleware<C> {
    fn handle(
        &mut self,
        store: &StoreApi<ShareState, ShareAction>,
        action: ShareAction,
        next: Next<'_, ShareState, ShareAction>,
    ) -> ShareAction {
        let action = next.run(action);

        match &action {
            ShareAction::ShareStart { title, build_path } => {
                self.share_start(store, title, build_path)
            }
            ShareAction::UploadStart { build_guid } => self.upload_start(store, build_guid),
            ShareAction::QueryProgress { key } => self.query_progress(store, key.as_deref()),
            ShareAction::StopUpload => self.stop_upload(),
            ShareAction::NotLoggedIn => self.not_logged_in(store),
            ShareAction::BuildFinish { output_dir, .. } => self.build_finish(output_dir),
            ShareAction::Destroy => self.destroy(),
            _ => {}
        }
        action
    }
}

/// Build a share store: logging first, then observer forwarding, then the
/// side-effect handler.
pub fn share_store<C: ShareApi>(
    initial: ShareState,
    middleware: ShareMiddleware<C>,
    observer: Option<Arc<dyn ShareObserver>>,
) -> ShareStore {
    let mut chain: Vec<Box<dyn Middleware<ShareState, ShareAction>>> = vec![Box::new(LogMiddleware)];
    if let Some(observer) = &observer {
        chain.push(Box::new(ObserverMiddleware::new(observer.clone())));
    }
    chain.push(Box::new(middleware));

    let mut store = ShareStore::new(reduce, initial, chain);
    if let Some(observer) = observer {
        store.set_observer(move |state| observer.on_state_changed(state));
    }
    store
}
