//! Builder methods for the yt-dlp options the library relies on.
//!
//! Every setter produces a [`Flag`] and hands it to
//! [`Command::add_flag`]; every `unset_*` removes the flag's id. Options
//! that exclude each other share an id, so setting one replaces the other.
//! Anything not covered here can be passed with [`Command::add_flag`].

use super::{ids, Command};
use crate::flags::Flag;

impl Command {
    // ------------------------------------------------------------------------
    // Verbosity and simulation
    // ------------------------------------------------------------------------

    /// Print various debugging information.
    pub fn verbose(&self) -> &Self {
        self.add_flag(Flag::new("verbose", "--verbose"))
    }

    pub fn unset_verbose(&self) -> &Self {
        self.remove_flag_by_id("verbose")
    }

    /// Activate quiet mode. Combined with `verbose`, the log goes to stderr.
    pub fn quiet(&self) -> &Self {
        self.add_flag(Flag::new("quiet", "--quiet"))
    }

    pub fn unset_quiet(&self) -> &Self {
        self.remove_flag_by_id("quiet")
    }

    /// Do not download the video and do not write anything to disk.
    pub fn simulate(&self) -> &Self {
        self.add_flag(Flag::new("simulate", "--simulate"))
    }

    pub fn unset_simulate(&self) -> &Self {
        self.remove_flag_by_id("simulate")
    }

    /// Field name or output template to print to stdout. May be repeated.
    /// `%(j)` alone prints the info dict as JSON.
    pub fn print(&self, template: impl Into<String>) -> &Self {
        self.add_flag(Flag::new(ids::PRINT, "--print").arg(template.into()).repeatable())
    }

    pub fn unset_print(&self) -> &Self {
        self.remove_flag_by_id(ids::PRINT)
    }

    /// Print the info dict of each video as JSON while still downloading.
    pub fn print_json(&self) -> &Self {
        self.add_flag(Flag::new(ids::PRINT_JSON, "--print-json"))
    }

    pub fn unset_print_json(&self) -> &Self {
        self.remove_flag_by_id(ids::PRINT_JSON)
    }

    /// Simulate, printing one JSON line per video.
    pub fn dump_json(&self) -> &Self {
        self.add_flag(Flag::new(ids::DUMP_JSON, "--dump-json"))
    }

    pub fn unset_dump_json(&self) -> &Self {
        self.remove_flag_by_id(ids::DUMP_JSON)
    }

    // ------------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------------

    /// Show progress even in quiet mode.
    pub fn progress(&self) -> &Self {
        self.add_flag(Flag::new(ids::PROGRESS, "--progress"))
    }

    pub fn unset_progress(&self) -> &Self {
        self.remove_flag_by_id(ids::PROGRESS)
    }

    pub fn no_progress(&self) -> &Self {
        self.add_flag(Flag::new(ids::PROGRESS, "--no-progress"))
    }

    pub fn unset_no_progress(&self) -> &Self {
        self.remove_flag_by_id(ids::PROGRESS)
    }

    /// Output progress on new lines instead of overwriting one line.
    pub fn newline(&self) -> &Self {
        self.add_flag(Flag::new(ids::NEWLINE, "--newline"))
    }

    pub fn unset_newline(&self) -> &Self {
        self.remove_flag_by_id(ids::NEWLINE)
    }

    pub fn progress_template(&self, template: impl Into<String>) -> &Self {
        self.add_flag(Flag::new(ids::PROGRESS_TEMPLATE, "--progress-template").arg(template.into()))
    }

    pub fn unset_progress_template(&self) -> &Self {
        self.remove_flag_by_id(ids::PROGRESS_TEMPLATE)
    }

    /// Seconds between progress output.
    pub fn progress_delta(&self, seconds: f64) -> &Self {
        self.add_flag(Flag::new(ids::PROGRESS_DELTA, "--progress-delta").arg(seconds))
    }

    pub fn unset_progress_delta(&self) -> &Self {
        self.remove_flag_by_id(ids::PROGRESS_DELTA)
    }

    // ------------------------------------------------------------------------
    // Filesystem
    // ------------------------------------------------------------------------

    /// Output filename template.
    pub fn output(&self, template: impl Into<String>) -> &Self {
        self.add_flag(Flag::new("outtmpl", "--output").arg(template.into()))
    }

    pub fn unset_output(&self) -> &Self {
        self.remove_flag_by_id("outtmpl")
    }

    /// Download paths, either a home path or `TYPES:PATH`.
    pub fn paths(&self, path: impl Into<String>) -> &Self {
        self.add_flag(Flag::new("paths", "--paths").arg(path.into()))
    }

    pub fn unset_paths(&self) -> &Self {
        self.remove_flag_by_id("paths")
    }

    /// Overwrite all video and metadata files.
    pub fn force_overwrites(&self) -> &Self {
        self.add_flag(Flag::new("overwrites", "--force-overwrites"))
    }

    pub fn unset_force_overwrites(&self) -> &Self {
        self.remove_flag_by_id("overwrites")
    }

    /// Do not overwrite any files.
    pub fn no_overwrites(&self) -> &Self {
        self.add_flag(Flag::new("overwrites", "--no-overwrites"))
    }

    pub fn unset_no_overwrites(&self) -> &Self {
        self.remove_flag_by_id("overwrites")
    }

    // ------------------------------------------------------------------------
    // Formats
    // ------------------------------------------------------------------------

    /// Video format code.
    pub fn format(&self, format: impl Into<String>) -> &Self {
        self.add_flag(Flag::new("format", "--format").arg(format.into()))
    }

    pub fn unset_format(&self) -> &Self {
        self.remove_flag_by_id("format")
    }

    // ------------------------------------------------------------------------
    // General
    // ------------------------------------------------------------------------

    /// Additional JavaScript runtime to enable, as `RUNTIME[:PATH]`. May be
    /// repeated.
    pub fn js_runtimes(&self, runtime: impl Into<String>) -> &Self {
        self.update(|s| {
            s.flags.remove_by_id(ids::NO_JS_RUNTIMES);
            s.flags
                .add(Flag::new(ids::JS_RUNTIMES, "--js-runtimes").arg(runtime.into()).repeatable());
        })
    }

    pub fn unset_js_runtimes(&self) -> &Self {
        self.remove_flag_by_id(ids::JS_RUNTIMES)
    }

    /// Clear JavaScript runtimes to enable, including defaults.
    pub fn no_js_runtimes(&self) -> &Self {
        self.update(|s| {
            s.flags.remove_by_id(ids::JS_RUNTIMES);
            s.flags.add(Flag::new(ids::NO_JS_RUNTIMES, "--no-js-runtimes"));
        })
    }

    pub fn unset_no_js_runtimes(&self) -> &Self {
        self.remove_flag_by_id(ids::NO_JS_RUNTIMES)
    }

    /// Print program version and exit.
    pub fn version(&self) -> &Self {
        self.add_flag(Flag::new("version", "--version"))
    }

    pub fn unset_version(&self) -> &Self {
        self.remove_flag_by_id("version")
    }
}
