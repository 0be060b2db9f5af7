use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use super::*;
use crate::builds::BUILD_LIST_KEY;
use crate::connect::{ApiError, ProgressResponse, TransferProgress, UploadResponse};
use crate::db::{MemoryPreferences, Preferences};
use crate::package::PackageError;
use crate::session::Environment;
use crate::state::SharePhase;

// ---- fakes ----

struct FakeSession {
    token: Mutex<String>,
}

impl FakeSession {
    fn set_token(&self, token: &str) {
        *self.token.lock().unwrap() = token.to_string();
    }
}

impl Session for FakeSession {
    fn access_token(&self) -> String {
        self.token.lock().unwrap().clone()
    }

    fn begin_login(&self) {}

    fn environment(&self) -> Environment {
        Environment::Production
    }
}

#[derive(Clone)]
enum UploadBehavior {
    Accept(String),
    Fail(u16),
    Hang,
}

/// Sets a flag when dropped
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct FakeApi {
    behavior: UploadBehavior,
    uploads: Mutex<Vec<UploadRequest>>,
    responses: Mutex<VecDeque<Result<ProgressResponse, ApiError>>>,
    polled_keys: Mutex<Vec<String>>,
    upload_dropped: Arc<AtomicBool>,
}

impl FakeApi {
    fn new(behavior: UploadBehavior) -> Self {
        Self {
            behavior,
            uploads: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            polled_keys: Mutex::new(Vec::new()),
            upload_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    fn with_responses(self, responses: Vec<Result<ProgressResponse, ApiError>>) -> Self {
        *self.responses.lock().unwrap() = responses.into();
        self
    }
}

impl ShareApi for FakeApi {
    async fn upload(
        &self,
        request: UploadRequest,
        progress: watch::Sender<TransferProgress>,
    ) -> Result<UploadResponse, ApiError> {
        self.uploads.lock().unwrap().push(request);
        progress.send_replace(TransferProgress {
            bytes_sent: 50,
            total_bytes: 100,
        });

        match self.behavior.clone() {
            UploadBehavior::Accept(key) => {
                tokio::time::sleep(Duration::from_millis(700)).await;
                Ok(UploadResponse { key })
            }
            UploadBehavior::Fail(status) => Err(ApiError::Status {
                status,
                message: "Server Error".to_string(),
            }),
            UploadBehavior::Hang => {
                let _flag = DropFlag(self.upload_dropped.clone());
                std::future::pending().await
            }
        }
    }

    async fn query_progress(&self, _token: &str, key: &str) -> Result<ProgressResponse, ApiError> {
        self.polled_keys.lock().unwrap().push(key.to_string());
        self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(ProgressResponse {
                progress: 10,
                ..Default::default()
            })
        })
    }
}

struct FakePackager {
    out_dir: PathBuf,
    size: u64,
    fail_size: AtomicBool,
    discarded: AtomicUsize,
}

impl Packager for FakePackager {
    fn archive(&self, _source: &Path) -> Result<PathBuf, PackageError> {
        let path = self.out_dir.join("connectwebgl.zip");
        std::fs::write(&path, b"zip")?;
        Ok(path)
    }

    fn archive_size(&self, _archive: &Path) -> Result<u64, PackageError> {
        if self.fail_size.load(Ordering::SeqCst) {
            return Err(PackageError::CreateFailed("size unavailable".to_string()));
        }
        Ok(self.size)
    }

    fn discard(&self, archive: &Path) {
        self.discarded.fetch_add(1, Ordering::SeqCst);
        let _ = std::fs::remove_file(archive);
    }
}

struct FakeValidator(bool);

impl BuildValidator for FakeValidator {
    fn is_valid_build(&self, _path: &str) -> bool {
        self.0
    }
}

#[derive(Default)]
struct RecordingTelemetry {
    events: Mutex<Vec<String>>,
}

impl Telemetry for RecordingTelemetry {
    fn upload_started(&self, title: &str, build_guid: &str) {
        self.events.lock().unwrap().push(format!("started:{title}:{build_guid}"));
    }

    fn upload_completed(&self, project_id: &str, error: Option<&str>) {
        self.events
            .lock()
            .unwrap()
            .push(format!("completed:{project_id}:{}", error.unwrap_or("")));
    }

    fn upload_failed(&self, reason: &str) {
        self.events.lock().unwrap().push(format!("failed:{reason}"));
    }

    fn progress_query_failed(&self, key: &str, reason: &str) {
        self.events.lock().unwrap().push(format!("poll-failed:{key}:{reason}"));
    }
}

/// Records every action that reaches the store
struct Recorder(Arc<Mutex<Vec<ShareAction>>>);

impl Middleware<ShareState, ShareAction> for Recorder {
    fn handle(
        &mut self,
        _store: &StoreApi<ShareState, ShareAction>,
        action: ShareAction,
        next: Next<'_, ShareState, ShareAction>,
    ) -> ShareAction {
        self.0.lock().unwrap().push(action.clone());
        next.run(action)
    }
}

// ---- harness ----

struct Harness {
    store: ShareStore,
    actions: Arc<Mutex<Vec<ShareAction>>>,
    api: Arc<FakeApi>,
    session: Arc<FakeSession>,
    packager: Arc<FakePackager>,
    prefs: Arc<MemoryPreferences>,
    telemetry: Arc<RecordingTelemetry>,
    _out: tempfile::TempDir,
}

fn harness(api: FakeApi, token: &str, valid: bool, archive_size: u64) -> Harness {
    let out = tempfile::tempdir().unwrap();
    let api = Arc::new(api);
    let session = Arc::new(FakeSession {
        token: Mutex::new(token.to_string()),
    });
    let packager = Arc::new(FakePackager {
        out_dir: out.path().to_path_buf(),
        size: archive_size,
        fail_size: AtomicBool::new(false),
        discarded: AtomicUsize::new(0),
    });
    let prefs = Arc::new(MemoryPreferences::default());
    let telemetry = Arc::new(RecordingTelemetry::default());

    let services = ShareServices {
        api: api.clone(),
        session: session.clone(),
        packager: packager.clone(),
        validator: Arc::new(FakeValidator(valid)),
        prefs: prefs.clone(),
        telemetry: telemetry.clone(),
    };

    let actions = Arc::new(Mutex::new(Vec::new()));
    let chain: Vec<Box<dyn Middleware<ShareState, ShareAction>>> = vec![
        Box::new(Recorder(actions.clone())),
        Box::new(ShareMiddleware::with_context(services, CancellationToken::new())),
    ];
    let store = ShareStore::new(reduce, ShareState::default(), chain);

    Harness {
        store,
        actions,
        api,
        session,
        packager,
        prefs,
        telemetry,
        _out: out,
    }
}

impl Harness {
    /// Action names in dispatch order, without upload samples
    fn names(&self) -> Vec<&'static str> {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .filter(|a| !matches!(a, ShareAction::UploadProgress { .. }))
            .map(ShareAction::name)
            .collect()
    }

    fn count(&self, name: &str) -> usize {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.name() == name)
            .count()
    }

    fn errors(&self) -> Vec<String> {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .filter_map(|a| match a {
                ShareAction::OnError { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Let timers run for a while, processing whatever arrives
    async fn settle(&mut self) {
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.store.drain_pending();
        }
    }
}

fn build_with_guid(guid: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("GUID.txt"), guid).unwrap();
    dir
}

fn progress(progress: i32, url: &str, project_id: &str) -> Result<ProgressResponse, ApiError> {
    Ok(ProgressResponse {
        project_id: project_id.to_string(),
        url: url.to_string(),
        progress,
        error: String::new(),
    })
}

// ---- scenarios ----

#[tokio::test(start_paused = true)]
async fn test_share_happy_path() {
    let build = build_with_guid("abc123\n");
    let api = FakeApi::new(UploadBehavior::Accept("job-1".to_string())).with_responses(vec![
        progress(40, "", ""),
        progress(100, "https://play.unity.com/p/demo", "p-9"),
    ]);
    let mut h = harness(api, "token", true, 1024);

    h.store.dispatch(ShareAction::ShareStart {
        title: "Demo".to_string(),
        build_path: build.path().to_string_lossy().to_string(),
    });
    let state = h.store.run_until(|s| s.is_finished()).await;

    assert_eq!(state.phase, SharePhase::Idle);
    assert_eq!(state.url, "https://play.unity.com/p/demo");
    assert_eq!(state.title, "Demo");
    assert!(state.error_msg.is_empty());

    assert_eq!(
        h.names(),
        vec![
            "ShareStart",
            "TitleChange",
            "ZipPathChange",
            "UploadStart",
            "QueryProgress",
            "QueryProgressResponse",
            "QueryProgress",
            "QueryProgressResponse",
        ]
    );

    let actions = h.actions.lock().unwrap().clone();
    assert!(actions.contains(&ShareAction::TitleChange {
        title: "Demo".to_string()
    }));
    assert!(actions.contains(&ShareAction::UploadStart {
        build_guid: "abc123".to_string()
    }));
    assert!(actions.contains(&ShareAction::QueryProgress {
        key: Some("job-1".to_string())
    }));
    assert!(actions.contains(&ShareAction::QueryProgress { key: None }));
    assert!(actions.contains(&ShareAction::UploadProgress { percent: 50 }));

    let uploads = h.api.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].title, "Demo");
    assert_eq!(uploads[0].build_guid, "abc123");
    assert!(uploads[0].zip_path.ends_with("connectwebgl.zip"));
    assert_eq!(*h.api.polled_keys.lock().unwrap(), vec!["job-1", "job-1"]);

    assert_eq!(h.prefs.get(PROJECT_ID_KEY).unwrap(), "p-9");
    assert_eq!(
        *h.telemetry.events.lock().unwrap(),
        vec!["started:Demo:abc123", "completed:p-9:"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_guid_uses_sentinel() {
    let build = tempfile::tempdir().unwrap();
    let api = FakeApi::new(UploadBehavior::Hang);
    let mut h = harness(api, "token", true, 1024);

    h.store.dispatch(ShareAction::ShareStart {
        title: String::new(),
        build_path: build.path().to_string_lossy().to_string(),
    });
    h.store.run_until(|s| s.phase == SharePhase::Upload).await;

    assert!(h.actions.lock().unwrap().contains(&ShareAction::UploadStart {
        build_guid: "UNDEFINED_GUID".to_string()
    }));
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.store.dispatch(ShareAction::Destroy);
    h.settle().await;
    // Blank title goes out as the default name
    assert_eq!(h.api.uploads.lock().unwrap()[0].title, "");
    assert_eq!(
        h.telemetry.events.lock().unwrap()[0],
        "started:Untitled:UNDEFINED_GUID"
    );
}

#[tokio::test(start_paused = true)]
async fn test_invalid_build_only_errors() {
    let mut h = harness(FakeApi::new(UploadBehavior::Hang), "token", false, 1024);

    h.store.dispatch(ShareAction::ShareStart {
        title: "Demo".to_string(),
        build_path: "/not/a/build".to_string(),
    });
    h.store.drain_pending();
    h.settle().await;

    assert_eq!(h.names(), vec!["ShareStart", "TitleChange", "OnError"]);
    assert!(h.errors()[0].contains("/not/a/build"));
    assert!(h.store.state().has_error());
    assert!(h.api.uploads.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_oversize_archive_errors_once() {
    let build = build_with_guid("abc123");
    let mut h = harness(
        FakeApi::new(UploadBehavior::Accept("job".to_string())),
        "token",
        true,
        600 * 1024 * 1024,
    );

    h.store.dispatch(ShareAction::ShareStart {
        title: "Big".to_string(),
        build_path: build.path().to_string_lossy().to_string(),
    });
    h.store.run_until(|s| s.has_error()).await;
    h.settle().await;

    assert_eq!(
        h.errors(),
        vec!["Max. allowed WebGL game .zip size is 500.00 MB.".to_string()]
    );
    assert_eq!(h.count("UploadStart"), 0);
    assert_eq!(h.count("ZipPathChange"), 0);
    assert_eq!(h.packager.discarded.load(Ordering::SeqCst), 1);
    assert!(h.api.uploads.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_packaging_discards_archive() {
    let build = build_with_guid("abc123");
    let mut h = harness(FakeApi::new(UploadBehavior::Hang), "token", true, 1024);

    h.store.dispatch(ShareAction::ShareStart {
        title: "Demo".to_string(),
        build_path: build.path().to_string_lossy().to_string(),
    });
    h.store.dispatch(ShareAction::StopUpload);
    h.settle().await;

    assert_eq!(h.packager.discarded.load(Ordering::SeqCst), 1);
    assert!(!h.packager.out_dir.join("connectwebgl.zip").exists());
    // The queued title change is applied before the stop, not after it
    assert_eq!(h.names(), vec!["ShareStart", "TitleChange", "StopUpload"]);
    assert_eq!(h.store.state(), ShareState::default());
    assert!(h.api.uploads.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_size_failure_discards_archive() {
    let build = build_with_guid("abc123");
    let mut h = harness(FakeApi::new(UploadBehavior::Hang), "token", true, 1024);
    h.packager.fail_size.store(true, Ordering::SeqCst);

    h.store.dispatch(ShareAction::ShareStart {
        title: "Demo".to_string(),
        build_path: build.path().to_string_lossy().to_string(),
    });
    let state = h.store.run_until(|s| s.has_error()).await;

    assert!(state.error_msg.starts_with("Failed to package build:"));
    assert_eq!(h.packager.discarded.load(Ordering::SeqCst), 1);
    assert_eq!(h.count("UploadStart"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_login_wait_is_single() {
    let mut h = harness(FakeApi::new(UploadBehavior::Accept("job".to_string())), "", true, 1);

    h.store.dispatch(ShareAction::UploadStart {
        build_guid: "g".to_string(),
    });
    h.store.drain_pending();
    assert_eq!(h.store.state().phase, SharePhase::Login);

    // Repeated NotLoggedIn while waiting must not start more loops
    h.store.dispatch(ShareAction::NotLoggedIn);
    h.store.dispatch(ShareAction::NotLoggedIn);
    tokio::time::sleep(Duration::from_secs(5)).await;
    h.store.drain_pending();
    assert_eq!(h.store.state().phase, SharePhase::Login);

    h.session.set_token("token");
    let state = h.store.run_until(|s| s.phase == SharePhase::Idle).await;
    assert_eq!(state.phase, SharePhase::Idle);
    h.settle().await;

    assert_eq!(h.count("LoggedIn"), 1);
    assert!(h.api.uploads.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_not_logged_in_with_token_logs_in_immediately() {
    let mut h = harness(FakeApi::new(UploadBehavior::Hang), "token", true, 1);

    h.store.dispatch(ShareAction::NotLoggedIn);
    assert_eq!(h.store.drain_pending(), 1);
    assert_eq!(h.store.state().phase, SharePhase::Idle);
    assert_eq!(h.count("LoggedIn"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_upload_cancels_without_error() {
    let mut h = harness(FakeApi::new(UploadBehavior::Hang), "token", true, 1);

    h.store.dispatch(ShareAction::ZipPathChange {
        zip_path: "/tmp/connectwebgl.zip".to_string(),
    });
    h.store.dispatch(ShareAction::UploadStart {
        build_guid: "g".to_string(),
    });
    tokio::time::sleep(Duration::from_millis(1200)).await;
    h.store.drain_pending();
    assert_eq!(h.store.state().phase, SharePhase::Upload);
    assert!(h.count("UploadProgress") >= 2);

    h.store.dispatch(ShareAction::StopUpload);
    let samples = h.count("UploadProgress");
    h.settle().await;

    assert!(h.errors().is_empty());
    assert_eq!(h.store.state(), ShareState::default());
    assert!(h.api.upload_dropped.load(Ordering::SeqCst));
    // Sampling stopped with the upload
    assert_eq!(h.count("UploadProgress"), samples);

    // Stopping again is a no-op
    h.store.dispatch(ShareAction::StopUpload);
    h.settle().await;
    assert!(h.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_upload_failure_surfaces_error() {
    let mut h = harness(FakeApi::new(UploadBehavior::Fail(500)), "token", true, 1);
    h.prefs.set(PROJECT_ID_KEY, "p-1").unwrap();

    h.store.dispatch(ShareAction::UploadStart {
        build_guid: "g".to_string(),
    });
    let state = h.store.run_until(|s| s.has_error()).await;

    assert_eq!(state.error_msg, "HTTP 500: Server Error");
    assert_eq!(h.count("QueryProgress"), 0);
    assert_eq!(h.api.uploads.lock().unwrap()[0].project_id, "p-1");
    assert!(
        h.telemetry
            .events
            .lock()
            .unwrap()
            .contains(&"failed:HTTP 500: Server Error".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_poll_failure_stops_quietly() {
    let api = FakeApi::new(UploadBehavior::Hang).with_responses(vec![Err(ApiError::Status {
        status: 502,
        message: "Bad Gateway".to_string(),
    })]);
    let mut h = harness(api, "token", true, 1);

    h.store.dispatch(ShareAction::QueryProgress {
        key: Some("job-1".to_string()),
    });
    h.settle().await;

    assert_eq!(h.count("QueryProgressResponse"), 0);
    assert_eq!(h.count("QueryProgress"), 1);
    assert!(h.errors().is_empty());
    assert_eq!(h.store.state().phase, SharePhase::Process);
    assert_eq!(
        *h.telemetry.events.lock().unwrap(),
        vec!["poll-failed:job-1:HTTP 502: Bad Gateway"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_error_response_stops_polling() {
    let api = FakeApi::new(UploadBehavior::Hang).with_responses(vec![Ok(ProgressResponse {
        project_id: "p-3".to_string(),
        progress: 20,
        error: "Invalid build".to_string(),
        ..Default::default()
    })]);
    let mut h = harness(api, "token", true, 1);

    h.store.dispatch(ShareAction::QueryProgress {
        key: Some("job-1".to_string()),
    });
    h.settle().await;

    let state = h.store.state();
    assert_eq!(state.phase, SharePhase::Idle);
    assert_eq!(state.error_msg, "Invalid build");
    assert_eq!(h.api.polled_keys.lock().unwrap().len(), 1);

    assert_eq!(h.prefs.get(PROJECT_ID_KEY).unwrap(), "p-3");
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_scheduled_repoll() {
    let mut h = harness(FakeApi::new(UploadBehavior::Hang), "token", true, 1);

    h.store.dispatch(ShareAction::QueryProgress {
        key: Some("job-1".to_string()),
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.store.drain_pending();
    assert_eq!(h.count("QueryProgressResponse"), 1);

    // The next poll is now scheduled; stopping must suppress it
    h.store.dispatch(ShareAction::StopUpload);
    h.settle().await;

    assert_eq!(h.count("QueryProgress"), 1);
    assert_eq!(h.api.polled_keys.lock().unwrap().len(), 1);
    assert_eq!(h.store.state().phase, SharePhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_query_progress_without_token_requires_login() {
    let mut h = harness(FakeApi::new(UploadBehavior::Hang), "", true, 1);

    h.store.dispatch(ShareAction::QueryProgress {
        key: Some("job-1".to_string()),
    });
    h.store.drain_pending();

    assert_eq!(h.store.state().phase, SharePhase::Login);
    assert!(h.api.polled_keys.lock().unwrap().is_empty());
    h.store.dispatch(ShareAction::Destroy);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_stops_login_wait() {
    let mut h = harness(FakeApi::new(UploadBehavior::Hang), "", true, 1);

    h.store.dispatch(ShareAction::NotLoggedIn);
    tokio::time::sleep(Duration::from_secs(3)).await;
    h.store.dispatch(ShareAction::Destroy);

    h.session.set_token("token");
    h.settle().await;

    assert_eq!(h.count("LoggedIn"), 0);
    assert_eq!(h.store.state().phase, SharePhase::Idle);
}

#[tokio::test]
async fn test_build_finish_tracks_directory() {
    let mut h = harness(FakeApi::new(UploadBehavior::Hang), "token", true, 1);

    h.store.dispatch(ShareAction::BuildFinish {
        output_dir: "/builds/demo".to_string(),
        build_guid: "abc123".to_string(),
    });

    assert!(h.prefs.get(BUILD_LIST_KEY).unwrap().starts_with("/builds/demo"));
    assert_eq!(h.store.state().build_guid, "abc123");
}

#[tokio::test]
async fn test_share_store_notifies_observer() {
    #[derive(Default)]
    struct Seen {
        titles: Mutex<Vec<String>>,
        upload: Mutex<Vec<u8>>,
    }

    impl ShareObserver for Seen {
        fn on_state_changed(&self, state: &ShareState) {
            self.titles.lock().unwrap().push(state.title.clone());
        }

        fn on_upload_progress(&self, percent: u8) {
            self.upload.lock().unwrap().push(percent);
        }
    }

    let h = harness(FakeApi::new(UploadBehavior::Hang), "token", true, 1);
    let services = ShareServices {
        api: h.api.clone(),
        session: h.session.clone(),
        packager: h.packager.clone(),
        validator: Arc::new(FakeValidator(true)),
        prefs: h.prefs.clone(),
        telemetry: Arc::new(TracingTelemetry),
    };
    let seen = Arc::new(Seen::default());
    let mut store = share_store(
        ShareState::default(),
        ShareMiddleware::with_context(services, CancellationToken::new()),
        Some(seen.clone()),
    );

    store.dispatch(ShareAction::TitleChange {
        title: "Demo".to_string(),
    });
    store.dispatch(ShareAction::UploadProgress { percent: 12 });

    assert_eq!(*seen.titles.lock().unwrap(), vec!["Demo", "Demo"]);
    assert_eq!(*seen.upload.lock().unwrap(), vec![12]);
}
