//! Background work spawned by the share middleware.
//!
//! Each task reports back only through the dispatcher and checks its
//! cancellation token before every dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{PROJECT_ID_KEY, Telemetry};
use crate::app_data::publisher_data;
use crate::builds::read_build_guid;
use crate::connect::{ApiError, ShareApi, TransferProgress, UploadRequest};
use crate::db::Preferences;
use crate::package::{PackageError, Packager, oversize_message};
use crate::session::Session;
use crate::state::ShareAction;
use crate::store::Dispatcher;

/// Pack the build, enforce the size limit, then start the upload
pub(super) async fn package(
    packager: Arc<dyn Packager>,
    build_path: String,
    dispatcher: Dispatcher<ShareAction>,
    epoch: CancellationToken,
) {
    let source = PathBuf::from(&build_path);
    let mut blocking = {
        let packager = packager.clone();
        tokio::task::spawn_blocking(move || {
            let archive = packager.archive(&source)?;
            match packager.archive_size(&archive) {
                Ok(size) => Ok::<_, PackageError>((archive, size)),
                Err(e) => {
                    packager.discard(&archive);
                    Err(e)
                }
            }
        })
    };

    let result = tokio::select! {
        _ = epoch.cancelled() => {
            // Zipping cannot be interrupted; remove whatever it leaves behind
            if let Ok(Ok((archive, _))) = blocking.await {
                tracing::debug!("Discarding archive of a stopped share");
                packager.discard(&archive);
            }
            return;
        }
        result = &mut blocking => result,
    };
    if epoch.is_cancelled() {
        if let Ok(Ok((archive, _))) = &result {
            packager.discard(archive);
        }
        return;
    }

    let (archive, size) = match result {
        Ok(Ok(packed)) => packed,
        Ok(Err(e)) => {
            tracing::error!("Failed to package {:?}: {}", build_path, e);
            dispatcher.dispatch(ShareAction::OnError {
                message: format!("Failed to package build: {}", e),
            });
            return;
        }
        Err(e) => {
            tracing::error!("Packaging task failed: {}", e);
            dispatcher.dispatch(ShareAction::OnError {
                message: format!("Failed to package build: {}", e),
            });
            return;
        }
    };

    let limit = publisher_data().archive.max_size_bytes;
    if size > limit {
        tracing::warn!("Archive {:?} is {} bytes, limit is {}", archive, size, limit);
        packager.discard(&archive);
        dispatcher.dispatch(ShareAction::OnError {
            message: oversize_message(limit),
        });
        return;
    }

    dispatcher.dispatch(ShareAction::ZipPathChange {
        zip_path: archive.to_string_lossy().to_string(),
    });
    dispatcher.dispatch(ShareAction::UploadStart {
        build_guid: read_build_guid(Path::new(&build_path)),
    });
}

/// Send the archive, sampling bytes sent until the request completes
pub(super) async fn upload<C: ShareApi>(
    api: Arc<C>,
    request: UploadRequest,
    dispatcher: Dispatcher<ShareAction>,
    telemetry: Arc<dyn Telemetry>,
    cancel: CancellationToken,
) {
    let (progress_tx, progress_rx) = watch::channel(TransferProgress::default());
    let upload = api.upload(request, progress_tx);
    tokio::pin!(upload);

    let mut ticker = tokio::time::interval(publisher_data().timing.upload_sample_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Err(ApiError::Aborted),
            result = &mut upload => break result,
            _ = ticker.tick() => {
                let percent = progress_rx.borrow().percent();
                dispatcher.dispatch(ShareAction::UploadProgress { percent });
            }
        }
    };

    match result {
        Err(e) if e.is_aborted() => tracing::info!("Upload aborted"),
        // Completed just as it was cancelled; the attempt is over
        _ if cancel.is_cancelled() => tracing::debug!("Ignoring upload result after cancellation"),
        Err(e) => {
            tracing::error!("Upload failed: {}", e);
            telemetry.upload_failed(&e.to_string());
            dispatcher.dispatch(ShareAction::OnError {
                message: e.to_string(),
            });
        }
        Ok(response) if response.key.is_empty() => {
            tracing::error!("Upload response carried no job key");
            telemetry.upload_failed("missing job key");
            dispatcher.dispatch(ShareAction::OnError {
                message: "Upload response did not include a job key".to_string(),
            });
        }
        Ok(response) => {
            tracing::info!("Upload accepted, job key {}", response.key);
            dispatcher.dispatch(ShareAction::QueryProgress {
                key: Some(response.key),
            });
        }
    }
}

/// Query processing progress once; re-arm after a delay unless finished
pub(super) async fn poll_progress<C: ShareApi>(
    api: Arc<C>,
    token: String,
    key: String,
    dispatcher: Dispatcher<ShareAction>,
    prefs: Arc<dyn Preferences>,
    telemetry: Arc<dyn Telemetry>,
    epoch: CancellationToken,
) {
    let result = tokio::select! {
        _ = epoch.cancelled() => return,
        result = api.query_progress(&token, &key) => result,
    };

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            // A failed poll stops the loop quietly
            tracing::error!("Progress query for {} failed: {}", key, e);
            telemetry.progress_query_failed(&key, &e.to_string());
            return;
        }
    };
    if epoch.is_cancelled() {
        return;
    }

    let finished = response.is_complete() || response.has_error();
    let project_id = response.project_id.clone();
    let error = response.has_error().then(|| response.error.clone());
    dispatcher.dispatch(ShareAction::QueryProgressResponse { response });

    if finished {
        if !project_id.is_empty() {
            if let Err(e) = prefs.set(PROJECT_ID_KEY, &project_id) {
                tracing::warn!("Failed to remember project id {}: {}", project_id, e);
            }
        }
        telemetry.upload_completed(&project_id, error.as_deref());
        return;
    }

    tokio::select! {
        _ = epoch.cancelled() => return,
        _ = tokio::time::sleep(publisher_data().timing.progress_poll_delay()) => {}
    }
    dispatcher.dispatch(ShareAction::QueryProgress { key: None });
}

/// Re-check the session until a token appears or the wait is cancelled
pub(super) async fn wait_for_login(
    session: Arc<dyn Session>,
    dispatcher: Dispatcher<ShareAction>,
    cancel: CancellationToken,
) {
    let delay = publisher_data().timing.login_check_delay();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Stopped waiting for login");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        if !session.access_token().is_empty() {
            tracing::info!("Logged in");
            dispatcher.dispatch(ShareAction::LoggedIn);
            return;
        }
    }
}
