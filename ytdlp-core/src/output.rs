//! Captured subprocess output.
//!
//! Each of the child's pipes is drained into its own [`TimestampWriter`],
//! which splits the byte stream into lines and stamps every line with the
//! moment its first byte arrived. Once the process exits the two writers are
//! merged into one chronological log and wrapped in an [`Output`].

use crate::info::ExtractedInfo;
use crate::progress::{ProgressHandler, PROGRESS_PREFIX};
use crate::template::TemplateSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Stand-in for JSON payload lines when rendering a log.
const JSON_MASK: &str = "<json-data>";

// ============================================================================
// Log Entries
// ============================================================================

/// Source stream of a captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pipe {
    Stdout,
    Stderr,
}

impl Pipe {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured output line.
#[derive(Debug, Clone, Serialize)]
pub struct ResultLog {
    /// Wall-clock capture time.
    pub timestamp: DateTime<Utc>,
    /// Monotonic capture time, used for ordering.
    #[serde(skip)]
    captured: Instant,
    /// Line text with trailing whitespace removed.
    pub line: String,
    /// Parsed payload, when JSON detection was on and the line parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    pub pipe: Pipe,
}

impl ResultLog {
    pub fn captured_at(&self) -> Instant {
        self.captured
    }

    fn render(&self, timestamps: bool, mask_json: bool) -> String {
        let line = if mask_json && self.json.is_some() {
            JSON_MASK
        } else {
            self.line.as_str()
        };

        if timestamps {
            format!(
                "[{}::{}] {}",
                self.timestamp.format(TIMESTAMP_FORMAT),
                self.pipe,
                line
            )
        } else {
            line.to_string()
        }
    }
}

impl fmt::Display for ResultLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(true, true))
    }
}

// ============================================================================
// Timestamp Writer
// ============================================================================

/// Line-buffering sink for one of the child's pipes.
#[derive(Debug)]
pub struct TimestampWriter {
    pipe: Pipe,
    check_json: bool,
    progress: Option<Arc<ProgressHandler>>,
    buf: Vec<u8>,
    line_start: Option<(Instant, DateTime<Utc>)>,
    entries: Vec<ResultLog>,
}

impl TimestampWriter {
    pub fn new(pipe: Pipe) -> Self {
        Self {
            pipe,
            check_json: false,
            progress: None,
            buf: Vec::new(),
            line_start: None,
            entries: Vec::new(),
        }
    }

    /// Attempts to parse every captured line as JSON.
    pub fn with_json_detection(mut self, enabled: bool) -> Self {
        self.check_json = enabled;
        self
    }

    /// Routes lines carrying the progress prefix to `handler`.
    pub fn with_progress(mut self, handler: Option<Arc<ProgressHandler>>) -> Self {
        self.progress = handler;
        self
    }

    /// Feeds raw bytes from the pipe. Completed lines are recorded at once.
    pub fn feed(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if self.line_start.is_none() {
                self.line_start = Some((Instant::now(), Utc::now()));
            }

            match data.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    self.buf.extend_from_slice(&data[..=i]);
                    self.flush_line();
                    data = &data[i + 1..];
                }
                None => {
                    self.buf.extend_from_slice(data);
                    break;
                }
            }
        }
    }

    /// Records whatever is buffered as a line.
    pub fn flush_line(&mut self) {
        let Some((captured, timestamp)) = self.line_start.take() else {
            return;
        };
        if self.buf.is_empty() {
            return;
        }

        let line = String::from_utf8_lossy(&self.buf).trim_end().to_string();
        self.buf.clear();

        if let (Some(rest), Some(progress)) = (line.strip_prefix(PROGRESS_PREFIX), &self.progress) {
            progress.parse(rest);
            return;
        }

        let json = if self.check_json && !line.is_empty() {
            serde_json::from_str::<Value>(&line).ok()
        } else {
            None
        };

        self.entries.push(ResultLog {
            timestamp,
            captured,
            line,
            json,
            pipe: self.pipe,
        });
    }

    pub fn entries(&self) -> &[ResultLog] {
        &self.entries
    }

    /// All recorded lines joined with `\n`.
    pub fn text(&mut self) -> String {
        self.flush_line();
        self.entries
            .iter()
            .map(|e| e.line.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Flushes every writer and returns all entries ordered by capture time.
    ///
    /// The sort is stable: entries captured at the same instant keep this
    /// writer's entries first, then each of `others` in order.
    pub fn merge(&mut self, others: &mut [&mut TimestampWriter]) -> Vec<ResultLog> {
        self.flush_line();
        let mut merged = self.entries.clone();
        for other in others.iter_mut() {
            other.flush_line();
            merged.extend(other.entries.iter().cloned());
        }
        merged.sort_by_key(|e| e.captured);
        merged
    }
}

impl io::Write for TimestampWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.feed(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Output
// ============================================================================

/// Outcome of one yt-dlp invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Output {
    pub executable: PathBuf,
    /// Arguments, excluding the executable.
    pub args: Vec<String>,
    /// `None` when the process never started or was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Lines from both pipes in capture order.
    pub logs: Vec<ResultLog>,
}

#[derive(Clone, Copy)]
struct RenderOptions {
    stdout: bool,
    stderr: bool,
    timestamps: bool,
    mask_json: bool,
    exit_code: bool,
}

impl Output {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn render(&self, opts: RenderOptions) -> String {
        let mut lines: Vec<String> = self
            .logs
            .iter()
            .filter(|l| match l.pipe {
                Pipe::Stdout => opts.stdout,
                Pipe::Stderr => opts.stderr,
            })
            .map(|l| l.render(opts.timestamps, opts.mask_json))
            .collect();

        if opts.exit_code {
            match self.exit_code {
                Some(code) => lines.push(format!("exit code: {}", code)),
                None => lines.push("exit code: none".to_string()),
            }
        }

        lines.join("\n")
    }

    /// Stderr lines only, without timestamps. Used to decorate errors.
    pub fn stderr_summary(&self) -> String {
        self.render(RenderOptions {
            stdout: false,
            stderr: true,
            timestamps: false,
            mask_json: true,
            exit_code: false,
        })
    }

    /// Parses every JSON log line that is an extraction result.
    pub fn extracted_info(&self) -> serde_json::Result<Vec<ExtractedInfo>> {
        let mut infos = Vec::new();
        for value in self.logs.iter().filter_map(|l| l.json.as_ref()) {
            if !value.is_object() {
                continue;
            }
            let info = ExtractedInfo::from_json(value)?;
            if info.is_extraction() {
                infos.push(info);
            }
        }
        Ok(infos)
    }

    /// Decodes stdout lines printed with a template built from `schema`.
    ///
    /// Lines that are malformed or contain none of the schema's keys are
    /// skipped.
    pub fn decode_template<T: Default>(&self, schema: &TemplateSchema<T>) -> Vec<T> {
        self.logs
            .iter()
            .filter(|l| l.pipe == Pipe::Stdout && l.json.is_none())
            .filter_map(|l| {
                let mut value = T::default();
                match schema.decode_into(&l.line, &mut value) {
                    Ok(matched) if matched > 0 => Some(value),
                    _ => None,
                }
            })
            .collect()
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(RenderOptions {
            stdout: true,
            stderr: true,
            timestamps: true,
            mask_json: true,
            exit_code: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressProtocol, ProgressUpdate};
    use crate::template::TemplateField;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;

    fn pause() {
        std::thread::sleep(Duration::from_millis(3));
    }

    #[test]
    fn test_feed_splits_lines_and_trims() {
        let mut w = TimestampWriter::new(Pipe::Stdout);
        w.feed(b"first line  \r\nsec");
        w.feed(b"ond\nthird\n\n");
        w.feed(b"tail without newline");

        assert_eq!(w.entries().len(), 4);
        assert_eq!(w.entries()[0].line, "first line");
        assert_eq!(w.entries()[1].line, "second");
        assert_eq!(w.entries()[2].line, "third");
        assert_eq!(w.entries()[3].line, "");
        assert_eq!(
            w.text(),
            "first line\nsecond\nthird\n\ntail without newline"
        );
    }

    #[test]
    fn test_timestamp_is_first_byte_of_line() {
        let mut w = TimestampWriter::new(Pipe::Stdout);
        w.feed(b"par");
        let after_first_chunk = Instant::now();
        pause();
        w.feed(b"tial\n");

        assert!(w.entries()[0].captured_at() <= after_first_chunk);
    }

    #[test]
    fn test_json_detection() {
        let mut w = TimestampWriter::new(Pipe::Stdout).with_json_detection(true);
        w.write_all(b"{\"id\":\"abc\"}\nplain text\n").unwrap();

        assert_eq!(w.entries()[0].json.as_ref().unwrap()["id"], "abc");
        assert!(w.entries()[1].json.is_none());

        let mut off = TimestampWriter::new(Pipe::Stdout);
        off.feed(b"{\"id\":\"abc\"}\n");
        assert!(off.entries()[0].json.is_none());
    }

    #[test]
    fn test_progress_lines_are_routed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = Arc::new(ProgressHandler::new(
            ProgressProtocol::Delimited,
            Arc::new(move |u: ProgressUpdate| sink.lock().unwrap().push(u)),
        ));

        let mut w = TimestampWriter::new(Pipe::Stdout).with_progress(Some(handler));
        w.feed(b"[info] start\n");
        w.feed(b"progress:downloading###10###5###NA###NA###id###NA###NA###NA###NA###f.mp4\n");
        w.feed(b"progress:garbage\n");

        assert_eq!(w.entries().len(), 1);
        assert_eq!(w.entries()[0].line, "[info] start");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_progress_prefix_without_handler_is_logged() {
        let mut w = TimestampWriter::new(Pipe::Stdout);
        w.feed(b"progress:whatever\n");
        assert_eq!(w.entries()[0].line, "progress:whatever");
    }

    #[test]
    fn test_merge_orders_by_capture_time() {
        let mut stdout = TimestampWriter::new(Pipe::Stdout);
        let mut stderr = TimestampWriter::new(Pipe::Stderr);

        stdout.feed(b"t1\n");
        pause();
        stderr.feed(b"t2\n");
        pause();
        stdout.feed(b"t3");

        let lines = |logs: Vec<ResultLog>| logs.into_iter().map(|l| l.line).collect::<Vec<_>>();

        let merged = stdout.merge(&mut [&mut stderr]);
        assert_eq!(lines(merged), vec!["t1", "t2", "t3"]);

        let merged = stderr.merge(&mut [&mut stdout]);
        assert_eq!(lines(merged), vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_merge_flushes_other_writers() {
        let mut stdout = TimestampWriter::new(Pipe::Stdout);
        let mut stderr = TimestampWriter::new(Pipe::Stderr);
        stderr.feed(b"unterminated");

        let merged = stdout.merge(&mut [&mut stderr]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].pipe, Pipe::Stderr);
    }

    fn sample_output() -> Output {
        let mut stdout = TimestampWriter::new(Pipe::Stdout).with_json_detection(true);
        let mut stderr = TimestampWriter::new(Pipe::Stderr).with_json_detection(true);
        stdout.feed(b"{\"_type\":\"video\",\"id\":\"abc\",\"title\":\"none\"}\n");
        pause();
        stderr.feed(b"WARNING: something\n");
        pause();
        stdout.feed(b"Title=\"clip\"|Views=12\n");
        pause();
        stdout.feed(b"{\"not\":\"info\"}\n");

        Output {
            executable: PathBuf::from("/usr/bin/yt-dlp"),
            args: vec!["--print-json".to_string()],
            exit_code: Some(0),
            stdout: stdout.text(),
            stderr: stderr.text(),
            logs: stdout.merge(&mut [&mut stderr]),
        }
    }

    #[test]
    fn test_output_display_masks_json() {
        let rendered = sample_output().to_string();
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines.len(), 5);
        assert!(lines[0].ends_with("::stdout] <json-data>"));
        assert!(lines[1].ends_with("::stderr] WARNING: something"));
        assert_eq!(lines[4], "exit code: 0");
    }

    #[test]
    fn test_stderr_summary() {
        assert_eq!(sample_output().stderr_summary(), "WARNING: something");
    }

    #[test]
    fn test_extracted_info() {
        let infos = sample_output().extracted_info().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, "abc");
        assert!(infos[0].title.is_none());
    }

    #[derive(Debug, Default)]
    struct Row {
        title: String,
        views: i64,
    }

    #[test]
    fn test_decode_template_lines() {
        let schema = TemplateSchema::new()
            .field(TemplateField::string("Title", |r: &Row| r.title.clone(), |r, s| r.title = s).tag("title"))
            .field(TemplateField::int("Views", |r: &Row| r.views, |r, n| r.views = n).tag("view_count"));

        let rows = sample_output().decode_template(&schema);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "clip");
        assert_eq!(rows[0].views, 12);
    }

    #[test]
    fn test_serialize_log() {
        let output = sample_output();
        let value = serde_json::to_value(&output.logs[1]).unwrap();
        assert_eq!(value["pipe"], "stderr");
        assert!(value.get("json").is_none());
        assert!(value.get("captured").is_none());
    }
}
