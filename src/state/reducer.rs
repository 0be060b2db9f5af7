//! Share workflow state machine.
//!
//! `reduce` is the only place a [`ShareState`] is computed. It is pure:
//! side effects triggered by the same actions (telemetry, observer progress
//! callbacks, network calls) live in middleware.

use super::{ShareAction, SharePhase, ShareState};

/// Compute the next state. Fields an action does not touch keep their values.
pub fn reduce(state: &ShareState, action: &ShareAction) -> ShareState {
    match action {
        ShareAction::BuildFinish { output_dir, build_guid } => ShareState {
            build_output_dir: output_dir.clone(),
            build_guid: build_guid.clone(),
            ..state.clone()
        },

        ShareAction::ZipPathChange { zip_path } => ShareState {
            zip_path: zip_path.clone(),
            phase: SharePhase::Zip,
            ..state.clone()
        },

        ShareAction::UploadStart { .. } => ShareState {
            phase: SharePhase::Upload,
            ..state.clone()
        },

        ShareAction::QueryProgress { key } => {
            let key = match key {
                Some(k) if !k.is_empty() => k.clone(),
                _ => state.key.clone(),
            };
            // Cannot enter Process without a job key to poll
            if key.is_empty() {
                return state.clone();
            }
            ShareState {
                phase: SharePhase::Process,
                key,
                ..state.clone()
            }
        }

        ShareAction::QueryProgressResponse { response } => {
            if response.has_error() {
                ShareState {
                    phase: SharePhase::Idle,
                    error_msg: response.error.clone(),
                    ..state.clone()
                }
            } else {
                let url = if response.url.is_empty() {
                    state.url.clone()
                } else {
                    response.url.clone()
                };
                let phase = if response.is_complete() {
                    SharePhase::Idle
                } else {
                    state.phase
                };
                ShareState {
                    phase,
                    url,
                    ..state.clone()
                }
            }
        }

        ShareAction::TitleChange { title } => ShareState {
            title: title.clone(),
            ..state.clone()
        },

        ShareAction::OnError { message } => ShareState {
            error_msg: message.clone(),
            ..state.clone()
        },

        ShareAction::Destroy | ShareAction::StopUpload => state.reset(),

        ShareAction::NotLoggedIn => ShareState {
            phase: SharePhase::Login,
            ..state.clone()
        },

        ShareAction::LoggedIn => ShareState {
            phase: SharePhase::Idle,
            ..state.clone()
        },

        // Handled by middleware only
        ShareAction::ShareStart { .. } | ShareAction::UploadProgress { .. } => state.clone(),
    }
}
