//! Spawning an invocation and collecting its output.

use super::{Command, Invocation};
use crate::error::{Error, ExecError, Result};
use crate::output::{Output, Pipe, TimestampWriter};
use crate::progress::ProgressHandler;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;

type SharedWriter = Arc<Mutex<TimestampWriter>>;

impl Command {
    /// Runs yt-dlp with the configured flags followed by `args`.
    ///
    /// Cancelling `cancel` kills the process; the call then returns within
    /// the configured cancel wait even if the process lingers.
    pub async fn run<I, S>(&self, cancel: &CancellationToken, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.build(args).run(cancel).await
    }
}

impl Invocation {
    /// Spawns the process, drains both pipes, and classifies the outcome.
    pub async fn run(self, cancel: &CancellationToken) -> Result<Output> {
        let mut output = Output {
            executable: self.executable.clone(),
            args: self.args.clone(),
            ..Output::default()
        };

        if let Some(error) = self.error {
            return Error::classify(output, Some(error));
        }

        let mut cmd = tokio::process::Command::new(&self.executable);
        cmd.args(&self.args)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        crate::sys::configure_process(&mut cmd, self.separate_process_group);

        debug!(
            path = %self.executable.display(),
            args = ?self.args,
            dir = ?self.dir,
            json = self.check_json,
            "running command"
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                let failure = ExecError::Spawn {
                    path: self.executable.clone(),
                    source,
                };
                return Error::classify(output, Some(failure));
            }
        };

        let handler = self
            .progress
            .map(|(protocol, callback)| Arc::new(ProgressHandler::new(protocol, callback)));
        let stdout: SharedWriter = Arc::new(Mutex::new(
            TimestampWriter::new(Pipe::Stdout)
                .with_json_detection(self.check_json)
                .with_progress(handler),
        ));
        let stderr: SharedWriter = Arc::new(Mutex::new(
            TimestampWriter::new(Pipe::Stderr).with_json_detection(self.check_json),
        ));

        let mut drains: Vec<JoinHandle<io::Result<()>>> = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            drains.push(tokio::spawn(drain(pipe, Arc::clone(&stdout))));
        }
        if let Some(pipe) = child.stderr.take() {
            drains.push(tokio::spawn(drain(pipe, Arc::clone(&stderr))));
        }

        let mut cancelled = false;
        let status: io::Result<ExitStatus> = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                cancelled = true;
                warn!(path = %self.executable.display(), "command cancelled, killing process");
                // The group shares the child's pid; it takes anything the
                // child spawned down with it.
                if self.separate_process_group {
                    if let Some(pid) = child.id() {
                        if let Err(e) = crate::sys::kill_process_group(pid) {
                            debug!(pid, error = %e, "failed to signal process group");
                        }
                    }
                }
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "failed to signal process");
                }
                match tokio::time::timeout(self.cancel_max_wait, child.wait()).await {
                    Ok(status) => status,
                    Err(_) => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "process did not exit after cancellation",
                    )),
                }
            }
        };

        // Pipes close when the process (and anything it spawned) exits. A
        // grandchild holding them open gets the same grace period.
        let joined =
            tokio::time::timeout(self.cancel_max_wait, futures::future::join_all(drains.iter_mut())).await;
        match joined {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(Err(e)) => debug!(error = %e, "output drain failed"),
                        Err(e) => debug!(error = %e, "output drain task failed"),
                        Ok(Ok(())) => {}
                    }
                }
            }
            Err(_) => {
                warn!("output pipes still open after process exit, abandoning them");
                for task in &drains {
                    task.abort();
                }
            }
        }

        {
            let mut stdout = lock(&stdout);
            let mut stderr = lock(&stderr);
            output.stdout = stdout.text();
            output.stderr = stderr.text();
            output.logs = stdout.merge(&mut [&mut *stderr]);
        }

        let failure = match status {
            Ok(status) => {
                output.exit_code = status.code();
                if cancelled {
                    Some(ExecError::Cancelled)
                } else if status.success() {
                    None
                } else {
                    Some(status.code().map_or(ExecError::Terminated, ExecError::Exited))
                }
            }
            Err(_) if cancelled => Some(ExecError::Cancelled),
            Err(e) => Some(ExecError::Wait(e)),
        };

        debug!(
            path = %self.executable.display(),
            exit_code = ?output.exit_code,
            lines = output.logs.len(),
            "command finished"
        );

        Error::classify(output, failure)
    }
}

fn lock(writer: &SharedWriter) -> std::sync::MutexGuard<'_, TimestampWriter> {
    writer.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn drain<R>(mut pipe: R, writer: SharedWriter) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        lock(&writer).feed(&buf[..n]);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use crate::command::tests::isolated;
    use crate::error::{Error, ExecError};
    use crate::output::Pipe;
    use crate::progress::{ProgressStatus, ProgressUpdate};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_exit_code_error_carries_output() {
        let temp = TempDir::new().unwrap();
        let cmd = isolated(&temp);
        cmd.set_executable(script(temp.path(), "fail", "echo starting\necho 'ERROR: boom' >&2\nexit 3"));

        let err = cmd.run(&CancellationToken::new(), ["url"]).await.unwrap_err();
        assert!(matches!(err, Error::ExitCode { code: 3, .. }));
        let output = err.output();
        assert_eq!(output.args, vec!["url"]);
        assert_eq!(output.stdout, "starting");
        assert_eq!(output.stderr, "ERROR: boom");
        assert!(err.to_string().contains("ERROR: boom"));
    }

    #[tokio::test]
    async fn test_missing_executable_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        let cmd = isolated(&temp);
        cmd.set_executable(temp.path().join("does-not-exist"));

        let err = cmd.run(&CancellationToken::new(), ["url"]).await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(err.exit_code(), None);
    }

    #[tokio::test]
    async fn test_json_lines_are_parsed() {
        let temp = TempDir::new().unwrap();
        let cmd = isolated(&temp);
        cmd.set_executable(script(
            temp.path(),
            "json",
            r#"echo '{"id":"sample-1","title":"Sample","_type":"video","extractor":"generic"}'
echo 'not json'"#,
        ))
        .dump_json();

        let output = cmd.run(&CancellationToken::new(), ["url"]).await.unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.logs.len(), 2);
        assert!(output.logs[0].json.is_some());
        assert!(output.logs[1].json.is_none());

        let infos = output.extracted_info().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, "sample-1");
        assert!(output.to_string().contains("<json-data>"));
    }

    #[tokio::test]
    async fn test_progress_lines_reach_callback() {
        let temp = TempDir::new().unwrap();
        let cmd = isolated(&temp);
        let seen: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::default();
        let sink = Arc::clone(&seen);

        cmd.set_executable(script(
            temp.path(),
            "progress",
            r#"echo 'progress:{"info":{"id":"a"},"progress":{"status":"downloading","downloaded_bytes":50,"total_bytes":100,"filename":"a.mp4"}}'
echo '[download] regular line'
echo 'progress:{"info":{"id":"a"},"progress":{"status":"finished","downloaded_bytes":100,"total_bytes":100,"filename":"a.mp4"}}'"#,
        ))
        .progress_func(Duration::from_millis(250), move |update| {
            sink.lock().unwrap().push(update)
        });

        let output = cmd.run(&CancellationToken::new(), ["url"]).await.unwrap();
        assert!(output.args.contains(&"--newline".to_string()));
        assert_eq!(output.logs.len(), 1);
        assert_eq!(output.logs[0].line, "[download] regular line");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].status, ProgressStatus::Downloading);
        assert_eq!(seen[0].percent(), 50.0);
        assert_eq!(seen[1].status, ProgressStatus::Finished);
        assert_eq!(seen[1].started, seen[0].started);
        assert!(seen[1].finished.is_some());
    }

    #[tokio::test]
    async fn test_streams_are_interleaved() {
        let temp = TempDir::new().unwrap();
        let cmd = isolated(&temp);
        cmd.set_executable(script(
            temp.path(),
            "interleave",
            "echo one\nsleep 0.1\necho two >&2\nsleep 0.1\necho three",
        ));

        let output = cmd.run(&CancellationToken::new(), Vec::<String>::new()).await.unwrap();
        let lines: Vec<(&str, Pipe)> = output.logs.iter().map(|l| (l.line.as_str(), l.pipe)).collect();
        assert_eq!(
            lines,
            vec![("one", Pipe::Stdout), ("two", Pipe::Stderr), ("three", Pipe::Stdout)]
        );
    }

    /// Zombies count as dead: nothing may reap orphans inside a container.
    fn process_alive(pid: &str) -> bool {
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            return stat
                .rsplit(')')
                .next()
                .map(|rest| !rest.trim_start().starts_with('Z'))
                .unwrap_or(true);
        }
        std::process::Command::new("kill")
            .args(["-0", pid])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_cancellation_kills_process_group() {
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("sleeper.pid");
        let cmd = isolated(&temp);
        cmd.set_executable(script(
            temp.path(),
            "slow",
            &format!("sleep 30 &\necho $! > '{}'\necho started\nwait", pid_file.display()),
        ))
        .set_separate_process_group(true)
        .set_cancel_max_wait(Duration::from_millis(500));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = cmd.run(&cancel, ["url"]).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(err.is_cancelled(), "{err}");
        assert!(matches!(
            err,
            Error::Unknown {
                source: ExecError::Cancelled,
                ..
            }
        ));
        assert_eq!(err.output().stdout, "started");

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        let deadline = Instant::now() + Duration::from_secs(2);
        while process_alive(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!process_alive(pid), "background sleep {pid} outlived the cancelled run");
    }

    #[tokio::test]
    async fn test_output_template_and_workdir() {
        let temp = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let cmd = isolated(&temp);
        cmd.set_executable(script(
            temp.path(),
            "writer",
            r#"while [ $# -gt 0 ]; do
  if [ "$1" = "--output" ]; then shift; out="$1"; fi
  shift
done
printf 'media' > "$out"
echo "$out""#,
        ))
        .set_work_dir(work.path())
        .output("sample-1.mp4");

        let output = cmd.run(&CancellationToken::new(), ["url"]).await.unwrap();
        assert_eq!(output.stdout, "sample-1.mp4");
        assert_eq!(std::fs::read(work.path().join("sample-1.mp4")).unwrap(), b"media");
    }

    #[tokio::test]
    async fn test_environment_reaches_child() {
        let temp = TempDir::new().unwrap();
        let cmd = isolated(&temp);
        cmd.set_executable(script(temp.path(), "env", "echo \"$YTDLP_TEST_VALUE\"\necho \"$PATH\""))
            .set_env_var("YTDLP_TEST_VALUE", "hello");

        let output = cmd.run(&CancellationToken::new(), Vec::<String>::new()).await.unwrap();
        let lines: Vec<&str> = output.stdout.lines().collect();
        assert_eq!(lines[0], "hello");
        let cache_dir = cmd.toolchain().cache_dir().to_string_lossy().into_owned();
        assert!(lines[1].starts_with(&cache_dir));
    }

    #[test]
    fn test_run_with_blocking_runtime() {
        let temp = TempDir::new().unwrap();
        let cmd = isolated(&temp);
        cmd.set_executable(script(temp.path(), "ok", "echo ok"));

        let output = tokio_test::block_on(cmd.run(&CancellationToken::new(), ["url"])).unwrap();
        assert!(output.success());
    }
}
