//! Subcommand implementations

pub mod builds;
pub mod config;
pub mod login;
pub mod share;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::builds::WebGlBuildValidator;
use crate::config::Config;
use crate::connect::ConnectClient;
use crate::db::{Database, ProjectPreferences};
use crate::package::ZipPackager;
use crate::session::{ConfigSession, Session};
use crate::share::{ShareServices, TracingTelemetry};
use crate::state::{ShareAction, ShareState};
use crate::store::Dispatcher;

/// Preferences are scoped to the directory the CLI runs in
pub fn project_scope() -> Result<String> {
    let dir = std::env::current_dir().context("Could not determine current directory")?;
    let dir = dir.canonicalize().unwrap_or(dir);
    Ok(dir.to_string_lossy().to_string())
}

/// Preferences for the current project
pub fn open_preferences() -> Result<Arc<ProjectPreferences>> {
    let db = Database::open()?;
    Ok(Arc::new(ProjectPreferences::new(db, project_scope()?)))
}

/// Real collaborators for the configured environment
pub fn share_services(
    config: &Config,
    prefs: Arc<ProjectPreferences>,
) -> Result<ShareServices<ConnectClient>> {
    let session = Arc::new(ConfigSession::from_config(config));
    let api = ConnectClient::new(session.environment())?;
    tracing::debug!("Using {} ({})", session.environment(), api.base_url());

    let mut packager = ZipPackager::new(config.work_dir()?);
    if let Some(level) = config.publish.compression_level {
        packager = packager.with_compression_level(level);
    }

    Ok(ShareServices {
        api: Arc::new(api),
        session,
        packager: Arc::new(packager),
        validator: Arc::new(WebGlBuildValidator),
        prefs,
        telemetry: Arc::new(TracingTelemetry),
    })
}

/// On Ctrl-C: set the returned flag, dispatch `action` and cancel
/// `context`. The task yields the state as it was when interrupted.
pub fn on_interrupt(
    state: watch::Receiver<ShareState>,
    dispatcher: Dispatcher<ShareAction>,
    action: ShareAction,
    context: CancellationToken,
) -> (Arc<AtomicBool>, JoinHandle<Option<ShareState>>) {
    let flag = Arc::new(AtomicBool::new(false));
    let handle = {
        let flag = flag.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                return None;
            }
            tracing::info!("Interrupted");
            let snapshot = state.borrow().clone();
            flag.store(true, Ordering::SeqCst);
            dispatcher.dispatch(action);
            context.cancel();
            Some(snapshot)
        })
    };
    (flag, handle)
}
