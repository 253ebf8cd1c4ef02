//! The yt-dlp command builder.
//!
//! A [`Command`] collects flags, environment overrides and process tunables
//! behind a read/write lock, so one instance can be configured and run from
//! several tasks. Running a command takes a snapshot ([`Invocation`]) and
//! never mutates the builder, which makes a configured command reusable.
//!
//! # Example
//!
//! ```ignore
//! use tokio_util::sync::CancellationToken;
//! use ytdlp_core::Command;
//!
//! let cmd = Command::new();
//! cmd.format("bestaudio").output("%(id)s.%(ext)s").print_json();
//! let output = cmd.run(&CancellationToken::new(), ["https://example.com/watch?v=1"]).await?;
//! for info in output.extracted_info()? {
//!     println!("{}", info.id);
//! }
//! ```

mod invocation;
mod options;
mod run;

pub use invocation::Invocation;

use crate::flags::{Flag, Flags};
use crate::install::Toolchain;
use crate::progress::{
    ProgressCallback, ProgressProtocol, ProgressUpdate, MIN_PROGRESS_FREQUENCY,
};
use crate::template::TemplateSchema;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Flag ids the command itself inspects or manages.
pub(crate) mod ids {
    pub const PRINT: &str = "print";
    pub const PRINT_JSON: &str = "print_json";
    pub const DUMP_JSON: &str = "dump_json";
    pub const PROGRESS: &str = "progress";
    pub const PROGRESS_DELTA: &str = "progress_delta";
    pub const PROGRESS_TEMPLATE: &str = "progress_template";
    pub const NEWLINE: &str = "newline";
    pub const JS_RUNTIMES: &str = "js_runtimes";
    pub const NO_JS_RUNTIMES: &str = "no_js_runtimes";
}

/// `--print` argument that makes yt-dlp emit the info dict as JSON.
const PRINT_JSON_TEMPLATE: &str = "%(j)";

#[derive(Clone)]
pub(crate) struct State {
    pub(crate) executable: Option<PathBuf>,
    pub(crate) work_dir: Option<PathBuf>,
    pub(crate) env: HashMap<String, String>,
    pub(crate) env_inherit: bool,
    pub(crate) flags: Flags,
    pub(crate) separate_process_group: bool,
    pub(crate) cancel_max_wait: Duration,
    pub(crate) progress: Option<ProgressCallback>,
    pub(crate) progress_protocol: ProgressProtocol,
}

impl State {
    /// Whether stdout is expected to carry JSON documents.
    pub(crate) fn has_json_flag(&self) -> bool {
        let prints = self.flags.find_by_id(ids::PRINT);
        if let [print] = prints.as_slice() {
            if print.args.len() == 1 && print.args[0].to_string() == PRINT_JSON_TEMPLATE {
                return true;
            }
        }

        !self.flags.find_by_id(ids::PRINT_JSON).is_empty()
            || !self.flags.find_by_id(ids::DUMP_JSON).is_empty()
    }
}

/// Builder for one yt-dlp invocation.
pub struct Command {
    state: RwLock<State>,
    toolchain: Arc<Toolchain>,
}

impl Command {
    /// Creates an empty command that resolves tools through
    /// [`Toolchain::global`].
    pub fn new() -> Self {
        Self::with_toolchain(Toolchain::global())
    }

    /// Creates an empty command bound to a specific toolchain.
    pub fn with_toolchain(toolchain: Arc<Toolchain>) -> Self {
        let state = State {
            executable: None,
            work_dir: None,
            env: HashMap::new(),
            env_inherit: true,
            flags: Flags::new(),
            separate_process_group: false,
            cancel_max_wait: toolchain.settings().cancel_max_wait(),
            progress: None,
            progress_protocol: ProgressProtocol::default(),
        };

        Self {
            state: RwLock::new(state),
            toolchain,
        }
    }

    pub fn toolchain(&self) -> &Arc<Toolchain> {
        &self.toolchain
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut State)) -> &Self {
        f(&mut self.write());
        self
    }

    // ------------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------------

    /// Adds a flag. A non-repeatable flag replaces any flag with its id.
    pub fn add_flag(&self, flag: Flag) -> &Self {
        self.update(|s| s.flags.add(flag))
    }

    /// Removes every flag with the given id.
    pub fn remove_flag_by_id(&self, id: &str) -> &Self {
        self.update(|s| {
            s.flags.remove_by_id(id);
        })
    }

    /// Returns copies of every flag with the given id.
    pub fn flags_by_id(&self, id: &str) -> Vec<Flag> {
        self.read().flags.find_by_id(id).into_iter().cloned().collect()
    }

    /// Snapshot of all active flags.
    pub fn flags(&self) -> Flags {
        self.read().flags.clone()
    }

    /// Replaces every flag at once.
    pub fn set_flags(&self, flags: Flags) -> &Self {
        self.update(|s| s.flags = flags)
    }

    // ------------------------------------------------------------------------
    // Process
    // ------------------------------------------------------------------------

    /// Uses `path` instead of resolving yt-dlp.
    pub fn set_executable(&self, path: impl Into<PathBuf>) -> &Self {
        let path = path.into();
        self.update(|s| s.executable = Some(path))
    }

    pub fn set_work_dir(&self, path: impl Into<PathBuf>) -> &Self {
        let path = path.into();
        self.update(|s| s.work_dir = Some(path))
    }

    /// Sets an environment variable for the child. An empty value removes
    /// the override. `PATH` is merged with the inherited `PATH`, with these
    /// entries first.
    pub fn set_env_var(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        let (key, value) = (key.into(), value.into());
        self.update(|s| {
            if value.is_empty() {
                s.env.remove(&key);
            } else {
                s.env.insert(key, value);
            }
        })
    }

    /// Whether the child starts from this process's environment. When off,
    /// only explicit overrides (and the tool cache on `PATH`) are passed.
    pub fn set_env_var_inherit(&self, enabled: bool) -> &Self {
        self.update(|s| s.env_inherit = enabled)
    }

    /// Runs the child in its own process group so terminal signals sent to
    /// this process do not reach it.
    pub fn set_separate_process_group(&self, enabled: bool) -> &Self {
        self.update(|s| s.separate_process_group = enabled)
    }

    /// How long to wait for the child after cancellation before giving up
    /// on it.
    pub fn set_cancel_max_wait(&self, wait: Duration) -> &Self {
        self.update(|s| s.cancel_max_wait = wait)
    }

    // ------------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------------

    /// Registers a callback for download progress.
    ///
    /// Also sets the flags that make yt-dlp report progress: `--progress`,
    /// `--newline`, `--progress-delta` (`frequency`, at least 100ms) and a
    /// `--progress-template` for the configured protocol.
    pub fn progress_func<F>(&self, frequency: Duration, callback: F) -> &Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        let frequency = frequency.max(MIN_PROGRESS_FREQUENCY);
        self.update(|s| {
            s.flags.add(Flag::new(ids::PROGRESS, "--progress"));
            s.flags
                .add(Flag::new(ids::PROGRESS_DELTA, "--progress-delta").arg(frequency.as_secs_f64()));
            s.flags.add(Flag::new(ids::NEWLINE, "--newline"));
            s.flags.add(
                Flag::new(ids::PROGRESS_TEMPLATE, "--progress-template")
                    .arg(s.progress_protocol.template()),
            );
            s.progress = Some(Arc::new(callback));
        })
    }

    /// Removes the progress callback and the flags it set.
    pub fn unset_progress_func(&self) -> &Self {
        self.update(|s| {
            s.progress = None;
            for id in [ids::PROGRESS, ids::PROGRESS_DELTA, ids::NEWLINE, ids::PROGRESS_TEMPLATE] {
                s.flags.remove_by_id(id);
            }
        })
    }

    /// Selects the progress wire protocol. Takes effect on an already
    /// registered callback too.
    pub fn set_progress_protocol(&self, protocol: ProgressProtocol) -> &Self {
        self.update(|s| {
            s.progress_protocol = protocol;
            if s.progress.is_some() {
                s.flags.add(
                    Flag::new(ids::PROGRESS_TEMPLATE, "--progress-template").arg(protocol.template()),
                );
            }
        })
    }

    /// Adds a `--print` template that emits `schema`'s fields, to be read
    /// back with [`Output::decode_template`](crate::Output::decode_template).
    pub fn print_template<T: Default>(&self, schema: &TemplateSchema<T>) -> &Self {
        self.print(schema.encode(&T::default()))
    }
}

impl Default for Command {
    fn default() -> Self {
        Self::new()
    }
}

/// Deep copy: flags and environment are independent of the original. The
/// progress callback itself is shared.
impl Clone for Command {
    fn clone(&self) -> Self {
        Self {
            state: RwLock::new(self.read().clone()),
            toolchain: Arc::clone(&self.toolchain),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Command")
            .field("executable", &state.executable)
            .field("work_dir", &state.work_dir)
            .field("env", &state.env)
            .field("env_inherit", &state.env_inherit)
            .field("flags", &state.flags)
            .field("separate_process_group", &state.separate_process_group)
            .field("cancel_max_wait", &state.cancel_max_wait)
            .field("progress", &state.progress.is_some())
            .finish()
    }
}
