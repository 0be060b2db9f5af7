//! Share command: package, upload and publish a build

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{on_interrupt, open_preferences, share_services};
use crate::builds::{first_valid_build, read_build_guid};
use crate::cli::output::{OutputFormat, print_formatted, should_show_progress};
use crate::config::Config;
use crate::session::Session;
use crate::share::{ShareMiddleware, ShareObserver, Telemetry, share_store};
use crate::state::{ShareAction, ShareOutcome, SharePhase, ShareState, ShareStore};

/// Identity of the share workflow's saved session
const SESSION_IDENTITY: &str = "share";

#[derive(Args, Debug)]
pub struct ShareArgs {
    /// Build directory (defaults to the newest valid tracked build)
    pub build_dir: Option<PathBuf>,

    /// Title shown on the published page
    #[arg(long)]
    pub title: Option<String>,

    /// Continue the session saved by an interrupted run
    #[arg(long)]
    pub resume: bool,
}

#[derive(Serialize)]
struct ShareResult {
    status: &'static str,
    title: String,
    build_dir: String,
    url: Option<String>,
    error: Option<String>,
}

/// Prints phase changes and progress to stderr
struct CliObserver {
    show_progress: bool,
    quiet: bool,
    session: Arc<dyn Session>,
    last_phase: Mutex<SharePhase>,
    login_opened: AtomicBool,
}

impl ShareObserver for CliObserver {
    fn on_state_changed(&self, state: &ShareState) {
        let Ok(mut last) = self.last_phase.lock() else {
            return;
        };
        if *last == state.phase {
            return;
        }
        *last = state.phase;

        if !self.quiet && state.phase != SharePhase::Idle {
            if self.show_progress {
                eprintln!();
            }
            eprintln!("{}", state.phase.description());
        }
        if state.phase == SharePhase::Login && !self.login_opened.swap(true, Ordering::SeqCst) {
            eprintln!(
                "Not logged in. Log in in the browser, or run 'publisher config set-token <TOKEN>'."
            );
            self.session.begin_login();
        }
    }

    fn on_upload_progress(&self, percent: u8) {
        if self.show_progress {
            eprint!("\rUploading: {:>3}%   ", percent);
        }
    }

    fn on_processing_progress(&self, percent: u8) {
        if self.show_progress {
            eprint!("\rProcessing: {:>3}%   ", percent);
        }
    }
}

/// Telemetry wrapper that lets the drive loop see a failed progress query,
/// which otherwise leaves the workflow in `Process` with nothing queued
struct PollWatch {
    inner: Arc<dyn Telemetry>,
    failure: Mutex<Option<String>>,
    notify: Notify,
}

impl PollWatch {
    fn new(inner: Arc<dyn Telemetry>) -> Self {
        Self {
            inner,
            failure: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Resolves with the reason once a progress query has failed
    async fn stopped(&self) -> String {
        loop {
            let notified = self.notify.notified();
            if let Some(reason) = self.failure.lock().ok().and_then(|mut f| f.take()) {
                return reason;
            }
            notified.await;
        }
    }
}

impl Telemetry for PollWatch {
    fn upload_started(&self, title: &str, build_guid: &str) {
        self.inner.upload_started(title, build_guid);
    }

    fn upload_completed(&self, project_id: &str, error: Option<&str>) {
        self.inner.upload_completed(project_id, error);
    }

    fn upload_failed(&self, reason: &str) {
        self.inner.upload_failed(reason);
    }

    fn progress_query_failed(&self, key: &str, reason: &str) {
        self.inner.progress_query_failed(key, reason);
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(reason.to_string());
        }
        self.notify.notify_one();
    }
}

/// Next action to move `state` forward after a start, resume or login
fn next_action(state: &ShareState, title: &str, build_dir: &str) -> ShareAction {
    if !state.key.is_empty() {
        return ShareAction::QueryProgress { key: None };
    }
    if !state.zip_path.is_empty() && Path::new(&state.zip_path).is_file() {
        let build_guid = if state.build_guid.is_empty() {
            read_build_guid(Path::new(build_dir))
        } else {
            state.build_guid.clone()
        };
        return ShareAction::UploadStart { build_guid };
    }
    ShareAction::ShareStart {
        title: title.to_string(),
        build_path: build_dir.to_string(),
    }
}

/// Drive the workflow until it finishes or `interrupted` is set.
/// A login completed mid-run resumes from wherever the workflow stopped.
async fn drive(
    store: &mut ShareStore,
    title: &str,
    build_dir: &str,
    interrupted: &AtomicBool,
    polls: &PollWatch,
) -> ShareState {
    loop {
        let action = next_action(&store.state(), title, build_dir);
        store.dispatch(action);

        let mut waited_for_login = false;
        let stopped = tokio::select! {
            state = store.run_until(|s| {
                waited_for_login |= s.phase == SharePhase::Login;
                s.is_finished()
                    || interrupted.load(Ordering::SeqCst)
                    || (waited_for_login && s.phase == SharePhase::Idle)
            }) => Ok(state),
            reason = polls.stopped() => Err(reason),
        };

        let state = match stopped {
            Ok(state) => state,
            Err(reason) => {
                store.dispatch(ShareAction::OnError {
                    message: format!("Progress query failed: {}", reason),
                });
                store.state()
            }
        };

        if state.is_finished() || interrupted.load(Ordering::SeqCst) {
            return state;
        }
    }
}

pub async fn run(args: ShareArgs, format: OutputFormat, quiet: bool) -> Result<()> {
    let config = Config::load()?;
    let prefs = open_preferences()?;

    let mut initial = ShareState::default();
    if args.resume {
        let snapshot = prefs
            .with_db(|db| db.load_session(SESSION_IDENTITY))?
            .context("No saved session to resume")?;
        initial = ShareState::from_snapshot(&snapshot.state_json)
            .context("Saved session is corrupt")?;
        tracing::info!("Resuming session saved at {}", snapshot.saved_at.to_rfc3339());
        // An error belongs to the previous run
        initial.error_msg.clear();
    }

    let mut services = share_services(&config, prefs.clone())?;
    let polls = Arc::new(PollWatch::new(services.telemetry.clone()));
    services.telemetry = polls.clone();

    let build_dir = match args.build_dir {
        Some(dir) => dir.canonicalize().unwrap_or(dir).to_string_lossy().to_string(),
        None if !initial.build_output_dir.is_empty() => initial.build_output_dir.clone(),
        None => first_valid_build(&*prefs, &*services.validator, config.builds.max_tracked)?
            .context("No build directory given and no valid tracked build found")?,
    };
    let title = args
        .title
        .or_else(|| (!initial.title.is_empty()).then(|| initial.title.clone()))
        .unwrap_or_else(|| config.publish.default_title.clone());

    let observer: Arc<dyn ShareObserver> = Arc::new(CliObserver {
        show_progress: should_show_progress(quiet, format),
        quiet: quiet || format == OutputFormat::Json,
        session: services.session.clone(),
        last_phase: Mutex::new(initial.phase),
        login_opened: AtomicBool::new(false),
    });

    let context = CancellationToken::new();
    let middleware = ShareMiddleware::with_context(services, context.clone())
        .with_max_tracked(config.builds.max_tracked);
    let mut store = share_store(initial, middleware, Some(observer));

    let (interrupted, interrupt_task) = on_interrupt(
        store.subscribe(),
        store.dispatcher(),
        ShareAction::StopUpload,
        context,
    );

    if store.state().build_output_dir != build_dir {
        store.dispatch(ShareAction::BuildFinish {
            output_dir: build_dir.clone(),
            build_guid: read_build_guid(Path::new(&build_dir)),
        });
    }

    let final_state = drive(&mut store, &title, &build_dir, &interrupted, &polls).await;

    if interrupted.load(Ordering::SeqCst) {
        let snapshot = interrupt_task.await.ok().flatten().unwrap_or(final_state);
        prefs.with_db(|db| db.save_session(SESSION_IDENTITY, &snapshot.to_snapshot()?))?;
        if !quiet {
            eprintln!("\nStopped. Resume with 'publisher share --resume'.");
        }
        return Ok(());
    }
    interrupt_task.abort();
    store.dispatch(ShareAction::Destroy);
    prefs.with_db(|db| db.clear_session(SESSION_IDENTITY))?;

    if should_show_progress(quiet, format) {
        eprintln!();
    }

    let result = ShareResult {
        status: match final_state.outcome() {
            ShareOutcome::Published(_) => "published",
            _ => "failed",
        },
        title: crate::util::filtered_title(&final_state.title).to_string(),
        build_dir: build_dir.clone(),
        url: final_state.is_published().then(|| final_state.url.clone()),
        error: final_state.has_error().then(|| final_state.error_msg.clone()),
    };

    match final_state.outcome() {
        ShareOutcome::Published(url) => {
            print_formatted(&result, format, |r| format!("Published '{}': {}", r.title, url));
            Ok(())
        }
        ShareOutcome::Failed(message) => {
            if format == OutputFormat::Json {
                print_formatted(&result, format, |_| String::new());
            }
            bail!("{}", message)
        }
        other => bail!("Share ended unexpectedly ({:?})", other),
    }
}
