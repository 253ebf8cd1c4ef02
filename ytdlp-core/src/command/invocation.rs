//! Snapshot of a [`Command`] ready to be spawned.

use super::{ids, Command};
use crate::error::ExecError;
use crate::install::{catalog, ToolId};
use crate::progress::{ProgressCallback, ProgressProtocol};
use crate::sys;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const PATH_VAR: &str = "PATH";

/// Everything needed to spawn yt-dlp once.
///
/// Building never fails outright: a resolution problem is kept as a
/// deferred error and reported when the invocation is run, through the
/// same classification as any other failure.
pub struct Invocation {
    pub executable: PathBuf,
    /// Arguments, excluding the executable.
    pub args: Vec<String>,
    /// Full child environment.
    pub env: BTreeMap<String, String>,
    pub dir: Option<PathBuf>,
    pub(crate) error: Option<ExecError>,
    pub(crate) check_json: bool,
    pub(crate) separate_process_group: bool,
    pub(crate) cancel_max_wait: Duration,
    pub(crate) progress: Option<(ProgressProtocol, ProgressCallback)>,
}

impl Invocation {
    /// The deferred build error, if any.
    pub fn error(&self) -> Option<&ExecError> {
        self.error.as_ref()
    }

    /// Whether captured lines will be parsed as JSON.
    pub fn detects_json(&self) -> bool {
        self.check_json
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("executable", &self.executable)
            .field("args", &self.args)
            .field("dir", &self.dir)
            .field("error", &self.error)
            .field("check_json", &self.check_json)
            .finish_non_exhaustive()
    }
}

impl Command {
    /// Builds the invocation for `args` (usually URLs) without running it.
    pub fn build<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = self.read();
        let mut error = None;

        let duplicates: Vec<String> = state.flags.duplicates().iter().map(|f| f.flag.clone()).collect();
        if !duplicates.is_empty() {
            error = Some(ExecError::ConflictingFlags(duplicates));
        }

        let mut argv = state.flags.raw();
        if state.flags.find_by_id(ids::JS_RUNTIMES).is_empty()
            && state.flags.find_by_id(ids::NO_JS_RUNTIMES).is_empty()
        {
            if let Some(bun) = self.toolchain.cached(ToolId::Bun) {
                debug!(path = %bun.executable.display(), "enabling bun as javascript runtime");
                argv.push("--js-runtimes".to_string());
                argv.push(format!("bun:{}", bun.executable.display()));
            }
        }
        argv.extend(args.into_iter().map(Into::into));

        let executable = match &state.executable {
            Some(path) => {
                if let Some(failure) = check_explicit(path, state.work_dir.as_deref()) {
                    error.get_or_insert(failure);
                }
                path.clone()
            }
            None => match self.toolchain.resolve(ToolId::YtDlp) {
                Ok(resolved) => resolved.executable,
                Err(e) => {
                    error.get_or_insert(ExecError::Resolve(e));
                    let candidates = catalog::candidates(ToolId::YtDlp, self.toolchain.platform());
                    PathBuf::from(candidates.last().map(String::as_str).unwrap_or("yt-dlp"))
                }
            },
        };

        let inherited: Vec<(String, String)> = if state.env_inherit {
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect()
        } else {
            Vec::new()
        };
        let env = build_env(inherited, &state.env, self.toolchain.cache_dir());

        Invocation {
            executable,
            args: argv,
            env,
            dir: state.work_dir.clone(),
            error,
            check_json: state.has_json_flag(),
            separate_process_group: state.separate_process_group,
            cancel_max_wait: state.cancel_max_wait,
            progress: state
                .progress
                .clone()
                .map(|callback| (state.progress_protocol, callback)),
        }
    }
}

/// Rejects an explicit executable path that exists but cannot be run.
///
/// Bare names are looked up on `PATH` at spawn time and are not checked
/// here; a missing file surfaces as a spawn error.
fn check_explicit(path: &Path, work_dir: Option<&Path>) -> Option<ExecError> {
    if path.parent().map_or(true, |p| p.as_os_str().is_empty()) {
        return None;
    }
    let located = match work_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    };
    let metadata = std::fs::metadata(&located).ok()?;
    if sys::is_executable(&located, &metadata) {
        None
    } else {
        Some(ExecError::NotExecutable {
            path: path.to_path_buf(),
        })
    }
}

/// Computes the child environment.
///
/// Overrides win over inherited values, except `PATH`, which is merged:
/// override entries first, then inherited entries not already listed. The
/// tool cache directory always comes first so helper tools are found.
fn build_env(
    inherited: Vec<(String, String)>,
    overrides: &std::collections::HashMap<String, String>,
    cache_dir: &Path,
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = inherited.into_iter().collect();

    for (key, value) in overrides {
        if key == PATH_VAR {
            let inherited = env.get(PATH_VAR).cloned().unwrap_or_default();
            let merged = join_unique(
                std::env::split_paths(value).chain(std::env::split_paths(&inherited)),
            );
            env.insert(key.clone(), merged.unwrap_or_else(|| value.clone()));
        } else {
            env.insert(key.clone(), value.clone());
        }
    }

    let current = env.get(PATH_VAR).cloned().unwrap_or_default();
    let with_cache = join_unique(
        std::iter::once(cache_dir.to_path_buf()).chain(std::env::split_paths(&current)),
    );
    match with_cache {
        Some(path) => {
            env.insert(PATH_VAR.to_string(), path);
        }
        None => warn!(cache_dir = %cache_dir.display(), "unable to add cache dir to PATH"),
    }

    env
}

/// Joins path entries, dropping empty and repeated ones.
fn join_unique(entries: impl Iterator<Item = PathBuf>) -> Option<String> {
    let mut seen: Vec<PathBuf> = Vec::new();
    for entry in entries {
        if !entry.as_os_str().is_empty() && !seen.contains(&entry) {
            seen.push(entry);
        }
    }
    std::env::join_paths(seen)
        .ok()
        .and_then(|joined: OsString| joined.into_string().ok())
}
