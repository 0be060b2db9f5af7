//! WebGL build detection, validation and tracking.
//!
//! A shareable build is a directory produced by the engine's WebGL target.
//! Its layout depends on the editor version recorded in
//! `ProjectVersion.txt`; layouts of versions without a known rule are
//! accepted as-is.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

use crate::app_data::publisher_data;
use crate::db::Preferences;

/// Preference key holding the `;`-separated tracked build directories
pub const BUILD_LIST_KEY: &str = "buildOutputDirList";

/// Decides whether a directory holds a shareable build
pub trait BuildValidator: Send + Sync + 'static {
    fn is_valid_build(&self, path: &str) -> bool;
}

/// Validator for the engine's WebGL output layouts
#[derive(Debug, Default, Clone, Copy)]
pub struct WebGlBuildValidator;

impl BuildValidator for WebGlBuildValidator {
    fn is_valid_build(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        let Some(version) = editor_version(Path::new(path)) else {
            return false;
        };

        let dir = Path::new(path);
        let name = descriptor_name(path);
        match version.as_str() {
            "2019.3" => is_valid_2019_3(dir, name),
            "2020.2" => is_valid_2020_2(dir, name),
            _ => true,
        }
    }
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}\.\d$").expect("valid version regex"))
}

/// Major.minor editor version a build was made with, e.g. `2019.3`.
///
/// The first line of the version file looks like
/// `m_EditorVersion: 2019.3.4f1`.
pub fn editor_version(build_dir: &Path) -> Option<String> {
    let content = fs::read_to_string(build_dir.join(&publisher_data().build.version_file)).ok()?;
    let line = content.lines().next()?;
    let full = line.split(' ').nth(1)?;
    let version: String = full.chars().take(6).collect();

    version_regex().is_match(&version).then_some(version)
}

/// Final path component, which names the build's descriptor files
fn descriptor_name(path: &str) -> &str {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
}

fn is_valid_2019_3(dir: &Path, name: &str) -> bool {
    let build = dir.join("Build");
    [
        format!("{name}.data.unityweb"),
        format!("{name}.wasm.code.unityweb"),
        format!("{name}.wasm.framework.unityweb"),
        format!("{name}.json"),
        "UnityLoader.js".to_string(),
    ]
    .iter()
    .all(|file| build.join(file).is_file())
}

fn is_valid_2020_2(dir: &Path, name: &str) -> bool {
    let build = dir.join("Build");
    has_file_with_prefix(&build, &format!("{name}.data."))
        && has_file_with_prefix(&build, &format!("{name}.framework.js."))
        && build.join(format!("{name}.loader.js")).is_file()
        && has_file_with_prefix(&build, &format!("{name}.wasm."))
}

fn has_file_with_prefix(dir: &Path, prefix: &str) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.filter_map(|e| e.ok()).any(|entry| {
        entry.file_type().map(|t| t.is_file()).unwrap_or(false)
            && entry.file_name().to_string_lossy().starts_with(prefix)
    })
}

/// Identifier recorded next to a build, or the undefined sentinel
pub fn read_build_guid(build_dir: &Path) -> String {
    let build = &publisher_data().build;
    let guid_path = build_dir.join(&build.guid_file);
    match fs::read_to_string(&guid_path) {
        Ok(content) if !content.trim().is_empty() => content.trim().to_string(),
        Ok(_) => {
            tracing::warn!("Build identifier file {:?} is empty", guid_path);
            build.undefined_guid.clone()
        }
        Err(e) => {
            tracing::warn!("No build identifier at {:?}: {}", guid_path, e);
            build.undefined_guid.clone()
        }
    }
}

/// Tracked build directories, newest first, padded with empty entries to `max`
pub fn all_build_directories(prefs: &dyn Preferences, max: usize) -> Result<Vec<String>> {
    let mut dirs = vec![String::new(); max];
    let stored = prefs.get(BUILD_LIST_KEY)?;
    if stored.is_empty() {
        return Ok(dirs);
    }
    for (slot, dir) in dirs.iter_mut().zip(stored.split(';')) {
        *slot = dir.to_string();
    }
    Ok(dirs)
}

/// Track a directory at the front of the list. Returns false if already tracked.
pub fn add_build_directory(prefs: &dyn Preferences, dir: &str, max: usize) -> Result<bool> {
    let mut dirs = all_build_directories(prefs, max)?;
    if dirs.iter().any(|d| d == dir) {
        return Ok(false);
    }
    dirs.insert(0, dir.to_string());
    dirs.truncate(max);
    prefs.set(BUILD_LIST_KEY, &dirs.join(";"))?;
    Ok(true)
}

/// Stop tracking a directory. Returns false if it was not tracked.
pub fn remove_build_directory(prefs: &dyn Preferences, dir: &str, max: usize) -> Result<bool> {
    let mut dirs = all_build_directories(prefs, max)?;
    let Some(index) = dirs.iter().position(|d| d == dir) else {
        return Ok(false);
    };
    dirs.remove(index);
    dirs.resize(max, String::new());
    prefs.set(BUILD_LIST_KEY, &dirs.join(";"))?;
    Ok(true)
}

/// Newest tracked directory that holds a valid build
pub fn first_valid_build(
    prefs: &dyn Preferences,
    validator: &dyn BuildValidator,
    max: usize,
) -> Result<Option<String>> {
    Ok(all_build_directories(prefs, max)?
        .into_iter()
        .find(|dir| validator.is_valid_build(dir)))
}

pub fn valid_build_exists(
    prefs: &dyn Preferences,
    validator: &dyn BuildValidator,
    max: usize,
) -> Result<bool> {
    Ok(first_valid_build(prefs, validator, max)?.is_some())
}
