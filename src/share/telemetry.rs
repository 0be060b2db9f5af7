//! Workflow telemetry signals

/// Receives workflow signals for analytics
pub trait Telemetry: Send + Sync {
    /// An upload request is about to be sent
    fn upload_started(&self, title: &str, build_guid: &str);

    /// Processing finished on the server, successfully or not
    fn upload_completed(&self, project_id: &str, error: Option<&str>);

    /// Upload request failed
    fn upload_failed(&self, reason: &str);

    /// A progress query for job `key` failed. Polling has stopped and no
    /// action follows, so a driver waiting on the workflow must react here.
    fn progress_query_failed(&self, key: &str, reason: &str);
}

/// Telemetry that writes signals to the log under `publisher::telemetry`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn upload_started(&self, title: &str, build_guid: &str) {
        tracing::info!(target: "publisher::telemetry", title, build_guid, "upload started");
    }

    fn upload_completed(&self, project_id: &str, error: Option<&str>) {
        match error {
            Some(error) => {
                tracing::info!(target: "publisher::telemetry", project_id, error, "upload rejected")
            }
            None => tracing::info!(target: "publisher::telemetry", project_id, "upload completed"),
        }
    }

    fn upload_failed(&self, reason: &str) {
        tracing::warn!(target: "publisher::telemetry", reason, "upload failed");
    }

    fn progress_query_failed(&self, key: &str, reason: &str) {
        tracing::warn!(target: "publisher::telemetry", key, reason, "progress query failed");
    }
}
