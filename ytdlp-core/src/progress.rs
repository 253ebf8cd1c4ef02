//! Progress decoding for yt-dlp's `--progress-template` output.
//!
//! When a progress callback is registered, the command asks yt-dlp to print
//! one line per progress tick, prefixed with [`PROGRESS_PREFIX`]. The stdout
//! writer strips the prefix and hands the rest to a [`ProgressHandler`],
//! which decodes it, tracks when each logical download started and finished,
//! and invokes the callback.
//!
//! Two wire protocols are supported:
//!
//! - [`ProgressProtocol::Json`] (default): `%()j`, the full `{info, progress}`
//!   object. Carries the complete extracted metadata.
//! - [`ProgressProtocol::Delimited`]: eleven positional fields joined by
//!   [`DELIMITER`], with yt-dlp's `NA` placeholder for missing values.
//!
//! Malformed lines are dropped without error. yt-dlp's output shape varies
//! between its own releases and a bad tick is never worth failing a download.

use crate::info::{clean_none, ExtractedInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Prefix yt-dlp prints before every progress line.
pub const PROGRESS_PREFIX: &str = "progress:";

/// Field separator of the delimited protocol.
pub const DELIMITER: &str = "###";

/// yt-dlp's placeholder for values that are not available.
pub const NA_PLACEHOLDER: &str = "NA";

const DELIMITED_FIELDS: [&str; 11] = [
    "%(progress.status)s",
    "%(progress.total_bytes,progress.total_bytes_estimate)s",
    "%(progress.downloaded_bytes)s",
    "%(progress.fragment_index)s",
    "%(progress.fragment_count)s",
    "%(info.id)s",
    "%(info.playlist_id)s",
    "%(info.playlist_index)s",
    "%(info.playlist_count)s",
    "%(info.url)s",
    "%(progress.filename)s",
];

/// Lower bound for the progress update frequency.
pub const MIN_PROGRESS_FREQUENCY: Duration = Duration::from_millis(100);

// ============================================================================
// Protocol
// ============================================================================

/// Which progress line format yt-dlp is asked to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressProtocol {
    #[default]
    Json,
    Delimited,
}

impl ProgressProtocol {
    /// The `--progress-template` value, including the prefix.
    pub fn template(self) -> String {
        match self {
            Self::Json => format!("{}%()j", PROGRESS_PREFIX),
            Self::Delimited => format!("{}{}", PROGRESS_PREFIX, DELIMITED_FIELDS.join(DELIMITER)),
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Download state reported by yt-dlp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Starting,
    Downloading,
    PostProcessing,
    Error,
    Finished,
    #[serde(other)]
    Unknown,
}

impl ProgressStatus {
    /// Error and finished end a download.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Finished)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Downloading => "downloading",
            Self::PostProcessing => "post_processing",
            Self::Error => "error",
            Self::Finished => "finished",
            Self::Unknown => "unknown",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "starting" => Self::Starting,
            "downloading" => Self::Downloading,
            "post_processing" => Self::PostProcessing,
            "error" => Self::Error,
            "finished" => Self::Finished,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Update
// ============================================================================

/// One decoded progress event.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub info: ExtractedInfo,
    pub status: ProgressStatus,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub fragment_index: u64,
    pub fragment_count: u64,
    pub filename: String,
    /// First time this download was seen.
    pub started: DateTime<Utc>,
    /// Time the download reached a terminal status.
    pub finished: Option<DateTime<Utc>>,
}

impl ProgressUpdate {
    fn new(status: ProgressStatus) -> Self {
        Self {
            info: ExtractedInfo::default(),
            status,
            total_bytes: 0,
            downloaded_bytes: 0,
            fragment_index: 0,
            fragment_count: 0,
            filename: String::new(),
            started: Utc::now(),
            finished: None,
        }
    }

    /// Key identifying one logical download within an invocation.
    pub fn key(&self) -> String {
        let mut parts = vec![self.filename.clone(), self.info.id.clone()];
        if let Some(playlist_id) = &self.info.playlist_id {
            parts.push(playlist_id.clone());
        }
        if let Some(index) = self.info.playlist_index {
            parts.push(index.to_string());
        }
        parts.join(":")
    }

    /// Time since start, or total time once finished.
    pub fn duration(&self) -> Duration {
        let end = self.finished.unwrap_or_else(Utc::now);
        (end - self.started).to_std().unwrap_or_default()
    }

    pub fn percent(&self) -> f64 {
        if self.status.is_terminal() {
            return 100.0;
        }
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0
    }

    /// Linear extrapolation of the remaining time. Zero at 0% and 100%.
    pub fn eta(&self) -> Duration {
        let percent = self.percent();
        if percent == 0.0 || percent == 100.0 {
            return Duration::ZERO;
        }
        let secs = self.duration().as_secs_f64() * (100.0 - percent) / percent;
        Duration::try_from_secs_f64(secs).unwrap_or_default()
    }

    pub fn percent_string(&self) -> String {
        format!("{:.2}%", self.percent())
    }
}

// ============================================================================
// Handler
// ============================================================================

/// User callback invoked for every decoded update.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

#[derive(Default)]
struct Tracking {
    started: HashMap<String, DateTime<Utc>>,
    finished: HashMap<String, DateTime<Utc>>,
}

/// Stateful per-invocation progress decoder.
pub struct ProgressHandler {
    protocol: ProgressProtocol,
    callback: ProgressCallback,
    tracking: Mutex<Tracking>,
}

impl fmt::Debug for ProgressHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressHandler")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl ProgressHandler {
    pub fn new(protocol: ProgressProtocol, callback: ProgressCallback) -> Self {
        Self {
            protocol,
            callback,
            tracking: Mutex::new(Tracking::default()),
        }
    }

    pub fn protocol(&self) -> ProgressProtocol {
        self.protocol
    }

    /// Decodes one line (prefix already stripped). Returns whether the
    /// callback was invoked.
    pub fn parse(&self, line: &str) -> bool {
        let decoded = match self.protocol {
            ProgressProtocol::Json => decode_json(line),
            ProgressProtocol::Delimited => decode_delimited(line),
        };
        let Some(mut update) = decoded else {
            return false;
        };

        let key = update.key();
        {
            let mut tracking = self
                .tracking
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Utc::now();
            update.started = *tracking.started.entry(key.clone()).or_insert(now);
            update.finished = tracking.finished.get(&key).copied();
            if update.finished.is_none() && update.status.is_terminal() {
                tracking.finished.insert(key, now);
                update.finished = Some(now);
            }
        }

        (self.callback)(update);
        true
    }
}

// ============================================================================
// Delimited Protocol
// ============================================================================

fn decode_delimited(line: &str) -> Option<ProgressUpdate> {
    let fields: Vec<&str> = line.split(DELIMITER).collect();
    if fields.len() != DELIMITED_FIELDS.len() {
        return None;
    }

    let status = text_field(fields[0])?;
    let mut update = ProgressUpdate::new(ProgressStatus::parse(&status));
    update.total_bytes = count_field(fields[1])?;
    update.downloaded_bytes = count_field(fields[2])?;
    update.fragment_index = count_field(fields[3])?;
    update.fragment_count = count_field(fields[4])?;
    update.info.id = text_field(fields[5]).unwrap_or_default();
    update.info.playlist_id = text_field(fields[6]);
    update.info.playlist_index = optional_count(fields[7])?.map(|n| n as i64);
    update.info.playlist_count = optional_count(fields[8])?.map(|n| n as i64);
    update.info.url = text_field(fields[9]);
    update.filename = text_field(fields[10]).unwrap_or_default();
    if !update.filename.is_empty() {
        update.info.filename = Some(update.filename.clone());
    }

    Some(update)
}

fn text_field(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() || value == NA_PLACEHOLDER {
        None
    } else {
        Some(value.to_string())
    }
}

/// `NA` or empty is `Some(None)`; garbage is `None`.
fn optional_count(raw: &str) -> Option<Option<u64>> {
    let value = raw.trim();
    if value.is_empty() || value == NA_PLACEHOLDER {
        return Some(None);
    }
    let parsed: f64 = value.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    Some(Some(parsed as u64))
}

fn count_field(raw: &str) -> Option<u64> {
    optional_count(raw).map(Option::unwrap_or_default)
}

// ============================================================================
// JSON Protocol
// ============================================================================

#[derive(Deserialize)]
struct JsonProgressLine {
    #[serde(default)]
    info: Option<Value>,
    progress: JsonProgress,
}

#[derive(Deserialize)]
struct JsonProgress {
    status: ProgressStatus,
    #[serde(default)]
    total_bytes: Option<f64>,
    #[serde(default)]
    total_bytes_estimate: Option<f64>,
    #[serde(default)]
    downloaded_bytes: Option<f64>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    tmpfilename: Option<String>,
    #[serde(default)]
    fragment_index: Option<f64>,
    #[serde(default)]
    fragment_count: Option<f64>,
}

fn as_count(value: Option<f64>) -> u64 {
    value.filter(|v| v.is_finite()).map(|v| v as u64).unwrap_or(0)
}

fn decode_json(line: &str) -> Option<ProgressUpdate> {
    let mut raw: Value = serde_json::from_str(line).ok()?;
    clean_none(&mut raw);
    let data: JsonProgressLine = serde_json::from_value(raw).ok()?;

    let info = data
        .info
        .and_then(|value| serde_json::from_value::<ExtractedInfo>(value).ok())
        .unwrap_or_default();
    let progress = data.progress;

    let mut update = ProgressUpdate::new(progress.status);
    update.total_bytes = as_count(progress.total_bytes);
    if update.total_bytes == 0 {
        update.total_bytes = as_count(progress.total_bytes_estimate);
    }
    update.downloaded_bytes = as_count(progress.downloaded_bytes);
    update.fragment_index = as_count(progress.fragment_index);
    update.fragment_count = as_count(progress.fragment_count);
    update.filename = progress
        .filename
        .filter(|f| !f.is_empty())
        .or(progress.tmpfilename.filter(|f| !f.is_empty()))
        .or(info.filename.clone().filter(|f| !f.is_empty()))
        .unwrap_or_default();
    update.info = info;

    Some(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn collecting(protocol: ProgressProtocol) -> (ProgressHandler, Arc<Mutex<Vec<ProgressUpdate>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = ProgressHandler::new(
            protocol,
            Arc::new(move |update: ProgressUpdate| sink.lock().unwrap().push(update)),
        );
        (handler, seen)
    }

    const SAMPLE: &str = "downloading###4745623###1024###NA###NA###sample-1###NA###NA###NA###https://host/sample-1.mp4###generic - sample-1.mp4";

    #[test]
    fn test_delimited_decode() {
        let (handler, seen) = collecting(ProgressProtocol::Delimited);
        assert!(handler.parse(SAMPLE));

        let updates = seen.lock().unwrap();
        let update = &updates[0];
        assert_eq!(update.status, ProgressStatus::Downloading);
        assert_eq!(update.total_bytes, 4745623);
        assert_eq!(update.downloaded_bytes, 1024);
        assert_eq!(update.info.id, "sample-1");
        assert_eq!(update.info.url.as_deref(), Some("https://host/sample-1.mp4"));
        assert_eq!(update.filename, "generic - sample-1.mp4");
        assert!(update.info.playlist_id.is_none());
        assert!(update.finished.is_none());
    }

    #[test]
    fn test_terminal_status_sets_finished_and_keeps_start() {
        let (handler, seen) = collecting(ProgressProtocol::Delimited);
        handler.parse(SAMPLE);
        std::thread::sleep(Duration::from_millis(5));
        handler.parse(&SAMPLE.replacen("downloading", "finished", 1).replacen("###1024###", "###4745623###", 1));

        let updates = seen.lock().unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].started, updates[0].started);
        let finished = updates[1].finished.expect("finished time set");
        assert!(finished > updates[1].started);
        assert_eq!(updates[1].percent(), 100.0);
        assert_eq!(updates[1].eta(), Duration::ZERO);
    }

    #[test]
    fn test_fractional_counts_are_truncated() {
        let (handler, seen) = collecting(ProgressProtocol::Delimited);
        let line = "downloading###1000.9###250.5###1###4###vid###NA###NA###NA###NA###out.mp4";
        assert!(handler.parse(line));

        let update = &seen.lock().unwrap()[0];
        assert_eq!(update.total_bytes, 1000);
        assert_eq!(update.downloaded_bytes, 250);
        assert_eq!(update.fragment_index, 1);
        assert_eq!(update.fragment_count, 4);
    }

    #[test]
    fn test_delimited_rejects_bad_lines() {
        let (handler, seen) = collecting(ProgressProtocol::Delimited);
        assert!(!handler.parse("downloading###1###2"));
        assert!(!handler.parse(""));
        assert!(!handler.parse(&SAMPLE.replace("4745623", "lots")));
        assert!(!handler.parse(&SAMPLE.replacen("downloading", "NA", 1)));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_json_decode_with_fallbacks() {
        let (handler, seen) = collecting(ProgressProtocol::Json);
        let line = json!({
            "info": {"id": "abc", "playlist_id": "pl", "playlist_index": 3, "filename": "final.mp4"},
            "progress": {
                "status": "downloading",
                "total_bytes_estimate": 2000.0,
                "downloaded_bytes": 500,
                "tmpfilename": "final.mp4.part",
            }
        })
        .to_string();
        assert!(handler.parse(&line));

        let update = &seen.lock().unwrap()[0];
        assert_eq!(update.total_bytes, 2000);
        assert_eq!(update.downloaded_bytes, 500);
        assert_eq!(update.filename, "final.mp4.part");
        assert_eq!(update.key(), "final.mp4.part:abc:pl:3");
        assert_eq!(update.percent_string(), "25.00%");
    }

    #[test]
    fn test_json_filename_falls_back_to_info() {
        let (handler, seen) = collecting(ProgressProtocol::Json);
        let line = r#"{"info":{"id":"abc","filename":"final.mp4"},"progress":{"status":"finished","total_bytes":10,"downloaded_bytes":10}}"#;
        assert!(handler.parse(line));

        let update = &seen.lock().unwrap()[0];
        assert_eq!(update.filename, "final.mp4");
        assert!(update.finished.is_some());
    }

    #[test]
    fn test_json_rejects_missing_progress() {
        let (handler, seen) = collecting(ProgressProtocol::Json);
        assert!(!handler.parse(r#"{"info":{"id":"abc"}}"#));
        assert!(!handler.parse("not json"));
        assert!(!handler.parse(r#"{"progress":{"downloaded_bytes":1}}"#));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_independent_keys() {
        let (handler, seen) = collecting(ProgressProtocol::Delimited);
        handler.parse("finished###10###10###NA###NA###a###NA###NA###NA###NA###a.mp4");
        handler.parse("downloading###10###1###NA###NA###b###NA###NA###NA###NA###b.mp4");

        let updates = seen.lock().unwrap();
        assert!(updates[0].finished.is_some());
        assert!(updates[1].finished.is_none());
        assert_ne!(updates[0].key(), updates[1].key());
    }

    #[test]
    fn test_percent_and_eta() {
        let mut update = ProgressUpdate::new(ProgressStatus::Downloading);
        assert_eq!(update.percent(), 0.0);
        assert_eq!(update.eta(), Duration::ZERO);

        update.total_bytes = 200;
        update.downloaded_bytes = 50;
        update.started = Utc::now() - chrono::Duration::seconds(10);
        update.finished = Some(update.started + chrono::Duration::seconds(10));
        assert_eq!(update.percent(), 25.0);
        assert_eq!(update.duration(), Duration::from_secs(10));
        assert_eq!(update.eta(), Duration::from_secs(30));
    }

    #[test]
    fn test_templates() {
        assert_eq!(ProgressProtocol::Json.template(), "progress:%()j");
        let delimited = ProgressProtocol::Delimited.template();
        assert!(delimited.starts_with("progress:%(progress.status)s###"));
        assert_eq!(delimited.matches(DELIMITER).count(), 10);
    }

    proptest! {
        #[test]
        fn delimited_never_accepts_wrong_arity(input in ".{0,300}") {
            let (handler, seen) = collecting(ProgressProtocol::Delimited);
            let accepted = handler.parse(&input);
            if input.split(DELIMITER).count() != 11 {
                prop_assert!(!accepted);
                prop_assert!(seen.lock().unwrap().is_empty());
            }
        }

        #[test]
        fn json_never_panics(input in ".{0,300}") {
            let (handler, _seen) = collecting(ProgressProtocol::Json);
            handler.parse(&input);
        }

        #[test]
        fn truncated_sample_is_ignored(cut in 0usize..120) {
            let (handler, seen) = collecting(ProgressProtocol::Delimited);
            let end = cut.min(SAMPLE.len());
            let truncated = &SAMPLE[..end];
            if handler.parse(truncated) {
                prop_assert_eq!(truncated.split(DELIMITER).count(), 11);
            } else {
                prop_assert!(seen.lock().unwrap().is_empty());
            }
        }
    }
}
