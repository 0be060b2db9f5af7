//! Tracked build directory commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Subcommand;
use serde::Serialize;

use super::open_preferences;
use crate::builds::{
    BuildValidator, WebGlBuildValidator, add_build_directory, all_build_directories,
    editor_version, read_build_guid, remove_build_directory, valid_build_exists,
};
use crate::cli::output::{OutputFormat, print_formatted, print_success, status_line};
use crate::config::Config;
use crate::util::{folder_size, format_bytes};

#[derive(Subcommand, Debug)]
pub enum BuildsCommands {
    /// List tracked build directories, newest first
    List,

    /// Track a build directory
    Add {
        dir: PathBuf,
    },

    /// Stop tracking a build directory
    Remove {
        dir: PathBuf,
    },

    /// Inspect a build directory without tracking it
    Check {
        dir: PathBuf,
    },
}

#[derive(Serialize)]
struct BuildListResult {
    builds: Vec<BuildEntry>,
    total_count: usize,
    valid_count: usize,
    shareable: bool,
}

#[derive(Serialize)]
struct BuildEntry {
    path: String,
    valid: bool,
    size_bytes: u64,
    modified: Option<String>,
}

#[derive(Serialize)]
struct BuildCheckResult {
    path: String,
    valid: bool,
    editor_version: Option<String>,
    build_guid: String,
    size_bytes: u64,
}

pub async fn run(command: BuildsCommands, format: OutputFormat, quiet: bool) -> Result<()> {
    match command {
        BuildsCommands::List => list(format).await,
        BuildsCommands::Add { dir } => add(&dir, quiet).await,
        BuildsCommands::Remove { dir } => remove(&dir, quiet).await,
        BuildsCommands::Check { dir } => check(&dir, format).await,
    }
}

/// Tracked entries are stored as absolute paths
fn normalize(dir: &Path) -> String {
    dir.canonicalize()
        .unwrap_or_else(|_| dir.to_path_buf())
        .to_string_lossy()
        .to_string()
}

fn modified(dir: &Path) -> Option<String> {
    let time = std::fs::metadata(dir).ok()?.modified().ok()?;
    let time: DateTime<Local> = time.into();
    Some(time.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn build_entry(path: &str, validator: &dyn BuildValidator) -> BuildEntry {
    let dir = Path::new(path);
    BuildEntry {
        path: path.to_string(),
        valid: validator.is_valid_build(path),
        size_bytes: folder_size(dir),
        modified: modified(dir),
    }
}

async fn list(format: OutputFormat) -> Result<()> {
    let config = Config::load()?;
    let prefs = open_preferences()?;
    let validator = WebGlBuildValidator;

    let max = config.builds.max_tracked;
    let entries: Vec<BuildEntry> = all_build_directories(&*prefs, max)?
        .iter()
        .filter(|dir| !dir.is_empty())
        .map(|dir| build_entry(dir, &validator))
        .collect();

    let result = BuildListResult {
        total_count: entries.len(),
        valid_count: entries.iter().filter(|e| e.valid).count(),
        shareable: valid_build_exists(&*prefs, &validator, max)?,
        builds: entries,
    };

    print_formatted(&result, format, format_build_list);
    Ok(())
}

fn format_build_list(result: &BuildListResult) -> String {
    if result.builds.is_empty() {
        return "No tracked builds. Add one with 'publisher builds add <DIR>'.".to_string();
    }

    let mut lines = vec![format!(
        "Tracked builds ({} total, {} valid):\n",
        result.total_count, result.valid_count
    )];

    for build in &result.builds {
        let detail = format!(
            "{}  {}  {}",
            build.path,
            format_bytes(build.size_bytes),
            build.modified.as_deref().unwrap_or("missing")
        );
        lines.push(status_line(build.valid, &detail));
    }
    if !result.shareable {
        lines.push(String::new());
        lines.push("No valid build to share.".to_string());
    }

    lines.join("\n")
}

async fn add(dir: &Path, quiet: bool) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }

    let config = Config::load()?;
    let prefs = open_preferences()?;
    let path = normalize(dir);

    if !WebGlBuildValidator.is_valid_build(&path) {
        tracing::warn!("{} does not look like a complete WebGL build", path);
        if !quiet {
            eprintln!("Warning: {} does not look like a complete WebGL build", path);
        }
    }

    if add_build_directory(&*prefs, &path, config.builds.max_tracked)? {
        print_success(&format!("Tracking {}", path), quiet);
    } else {
        print_success(&format!("Already tracking {}", path), quiet);
    }
    Ok(())
}

async fn remove(dir: &Path, quiet: bool) -> Result<()> {
    let config = Config::load()?;
    let prefs = open_preferences()?;
    let path = normalize(dir);

    // The directory may already be gone; fall back to the path as given
    let removed = remove_build_directory(&*prefs, &path, config.builds.max_tracked)?
        || remove_build_directory(
            &*prefs,
            &dir.to_string_lossy(),
            config.builds.max_tracked,
        )?;

    if !removed {
        anyhow::bail!("Not tracked: {}", path);
    }
    print_success(&format!("Stopped tracking {}", path), quiet);
    Ok(())
}

async fn check(dir: &Path, format: OutputFormat) -> Result<()> {
    let path = dir
        .canonicalize()
        .with_context(|| format!("Build directory not found: {}", dir.display()))?;
    let path_str = path.to_string_lossy().to_string();

    let result = BuildCheckResult {
        valid: WebGlBuildValidator.is_valid_build(&path_str),
        editor_version: editor_version(&path),
        build_guid: read_build_guid(&path),
        size_bytes: folder_size(&path),
        path: path_str,
    };

    print_formatted(&result, format, format_build_check);
    Ok(())
}

fn format_build_check(result: &BuildCheckResult) -> String {
    [
        status_line(result.valid, &result.path),
        format!(
            "  Editor version: {}",
            result.editor_version.as_deref().unwrap_or("unknown")
        ),
        format!("  Build GUID:     {}", result.build_guid),
        format!("  Size:           {}", format_bytes(result.size_bytes)),
    ]
    .join("\n")
}
