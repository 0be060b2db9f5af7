//! Messages dispatched to the share store

use crate::connect::ProgressResponse;

/// Something that happened, or something the workflow should do.
#[derive(Debug, Clone, PartialEq)]
pub enum ShareAction {
    /// Begin publishing the build at `build_path`
    ShareStart { title: String, build_path: String },
    /// A build was produced and can be offered for sharing
    BuildFinish { output_dir: String, build_guid: String },
    /// Packaging finished; the archive is ready for upload
    ZipPathChange { zip_path: String },
    /// Upload the packaged archive
    UploadStart { build_guid: String },
    /// Share of the archive sent so far, 0-100
    UploadProgress { percent: u8 },
    /// Poll processing progress; `None` reuses the stored job key
    QueryProgress { key: Option<String> },
    QueryProgressResponse { response: ProgressResponse },
    TitleChange { title: String },
    OnError { message: String },
    StopUpload,
    NotLoggedIn,
    LoggedIn,
    /// Tear down the session and cancel outstanding work
    Destroy,
}

impl ShareAction {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::ShareStart { .. } => "ShareStart",
            Self::BuildFinish { .. } => "BuildFinish",
            Self::ZipPathChange { .. } => "ZipPathChange",
            Self::UploadStart { .. } => "UploadStart",
            Self::UploadProgress { .. } => "UploadProgress",
            Self::QueryProgress { .. } => "QueryProgress",
            Self::QueryProgressResponse { .. } => "QueryProgressResponse",
            Self::TitleChange { .. } => "TitleChange",
            Self::OnError { .. } => "OnError",
            Self::StopUpload => "StopUpload",
            Self::NotLoggedIn => "NotLoggedIn",
            Self::LoggedIn => "LoggedIn",
            Self::Destroy => "Destroy",
        }
    }
}
