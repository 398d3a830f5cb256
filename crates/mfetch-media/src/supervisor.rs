//! Extractor process supervision.
//!
//! One child process per job. Its stdout and stderr are split into lines by
//! two pump tasks that feed a single channel, so the observer sees lines one
//! at a time in arrival order. The exit outcome is reported only after every
//! captured line has been delivered.
//!
//! On unix the child leads its own process group, so killing a job also
//! reaches the post-processors the extractor spawned.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::lines::LineSplitter;
use crate::selector::CommandLine;

/// Upper bound on the diagnostic excerpt reported with an exit outcome.
pub const MAX_DIAGNOSTIC_CHARS: usize = 500;

/// How long to wait for buffered output after the process exited. Grandchildren
/// that inherited the pipes can keep them open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Receives events for one supervised process.
pub trait ProcessObserver: Send + Sync + 'static {
    /// A complete, trimmed, non-empty output line.
    fn on_line(&self, line: &str);

    /// Called exactly once, after the last `on_line`.
    fn on_exit(&self, outcome: ExitOutcome);
}

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code; `None` when killed by a signal or the wait failed.
    pub code: Option<i32>,
    /// Whether the process was terminated through its handle.
    pub cancelled: bool,
    /// Last diagnostic line, bounded to [`MAX_DIAGNOSTIC_CHARS`].
    pub diagnostic: String,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        !self.cancelled && self.code == Some(0)
    }
}

/// Handle to a running (or finished) supervised process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Kill the process. Safe to call repeatedly and after exit.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the exit outcome has been delivered.
    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait until the exit outcome has been delivered to the observer.
    pub async fn wait(&self) {
        let mut done = self.done.clone();
        // Err means the supervising task is gone, which also means finished.
        let _ = done.wait_for(|finished| *finished).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// Starts extractor processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self
    }

    /// Launch `command` inside `workspace`.
    ///
    /// Returns immediately; lines and the exit outcome are delivered to
    /// `observer` from a background task. Cancelling `cancel` (or calling
    /// [`ProcessHandle::cancel`]) kills the process.
    pub fn start(
        &self,
        command: &CommandLine,
        workspace: &Path,
        observer: Arc<dyn ProcessObserver>,
        cancel: CancellationToken,
    ) -> MediaResult<ProcessHandle> {
        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        let program = which::which(&command.program)
            .map_err(|_| MediaError::program_not_found(&command.program))?;

        debug!(
            program = %program.display(),
            workspace = %workspace.display(),
            "Running extractor: {} {}",
            command.program,
            command.args.join(" ")
        );

        let mut cmd = Command::new(&program);
        cmd.args(&command.args)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or(MediaError::StreamUnavailable("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(MediaError::StreamUnavailable("stderr"))?;

        let pid = child.id();
        info!(pid = ?pid, "Extractor process started");

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let pumps = vec![
            tokio::spawn(pump(stdout, StreamKind::Stdout, line_tx.clone())),
            tokio::spawn(pump(stderr, StreamKind::Stderr, line_tx)),
        ];

        let (done_tx, done_rx) = watch::channel(false);

        tokio::spawn(supervise(
            child,
            pid,
            line_rx,
            pumps,
            observer,
            cancel.clone(),
            done_tx,
        ));

        Ok(ProcessHandle {
            pid,
            cancel,
            done: done_rx,
        })
    }
}

/// Read one stream to completion, forwarding complete lines.
async fn pump<R>(mut reader: R, kind: StreamKind, tx: mpsc::UnboundedSender<(StreamKind, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    if tx.send((kind, line)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!(stream = kind.as_str(), "Extractor stream read failed: {}", e);
                break;
            }
        }
    }

    if let Some(line) = splitter.finish() {
        let _ = tx.send((kind, line));
    }
}

/// Remembers the most useful line for a failure message.
#[derive(Debug, Default)]
struct DiagnosticTail {
    last_stderr: Option<String>,
    last_any: Option<String>,
}

impl DiagnosticTail {
    fn record(&mut self, kind: StreamKind, line: &str) {
        if kind == StreamKind::Stderr {
            self.last_stderr = Some(line.to_string());
        }
        self.last_any = Some(line.to_string());
    }

    fn into_diagnostic(self) -> String {
        let line = self.last_stderr.or(self.last_any).unwrap_or_default();
        line.chars().take(MAX_DIAGNOSTIC_CHARS).collect()
    }
}

/// Send SIGKILL to every process in the group led by `pgid`.
#[cfg(unix)]
fn kill_process_group(pgid: u32) -> std::io::Result<()> {
    let pgid = i32::try_from(pgid)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    // SAFETY: kill(2) takes plain integers and touches no memory of ours
    let result = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Kill the extractor together with anything it spawned.
fn kill_tree(child: &mut Child, pgid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        match kill_process_group(pgid) {
            Ok(()) => return,
            Err(e) => debug!(pgid, "Process group kill failed: {}", e),
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;

    if let Err(e) = child.start_kill() {
        // Already exited between the last poll and now
        debug!("Kill signal not delivered: {}", e);
    }
}

async fn supervise(
    mut child: Child,
    pgid: Option<u32>,
    mut lines: mpsc::UnboundedReceiver<(StreamKind, String)>,
    pumps: Vec<JoinHandle<()>>,
    observer: Arc<dyn ProcessObserver>,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
) {
    let mut tail = DiagnosticTail::default();
    let mut lines_open = true;
    let mut cancelled = false;
    let mut kill_sent = false;

    let status = loop {
        tokio::select! {
            line = lines.recv(), if lines_open => match line {
                Some((kind, line)) => {
                    tail.record(kind, &line);
                    observer.on_line(&line);
                }
                None => lines_open = false,
            },
            status = child.wait() => break status,
            _ = cancel.cancelled(), if !cancelled => cancelled = true,
        }

        if cancelled && !kill_sent {
            kill_sent = true;
            let pid = child.id();
            info!(pid = ?pid, "Killing extractor process group");
            kill_tree(&mut child, pid);
        }
    };

    let drain = async {
        while let Some((kind, line)) = lines.recv().await {
            tail.record(kind, &line);
            observer.on_line(&line);
        }
    };
    let drained = tokio::select! {
        result = tokio::time::timeout(DRAIN_TIMEOUT, drain) => result.is_ok(),
        _ = cancel.cancelled(), if !cancelled => false,
    };
    if !drained {
        // Something the extractor left behind still holds the pipes
        warn!("Extractor output still open after exit, killing leftover processes");
        #[cfg(unix)]
        if let Some(pgid) = pgid {
            if let Err(e) = kill_process_group(pgid) {
                debug!(pgid, "Process group kill failed: {}", e);
            }
        }
        for pump in &pumps {
            pump.abort();
        }
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("Failed to wait for extractor process: {}", e);
            None
        }
    };

    let outcome = ExitOutcome {
        code,
        cancelled,
        diagnostic: tail.into_diagnostic(),
    };
    info!(
        code = ?outcome.code,
        cancelled = outcome.cancelled,
        "Extractor process exited"
    );

    observer.on_exit(outcome);
    let _ = done_tx.send(true);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
        outcome: Mutex<Option<ExitOutcome>>,
    }

    impl ProcessObserver for Recorder {
        fn on_line(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }

        fn on_exit(&self, outcome: ExitOutcome) {
            let mut slot = self.outcome.lock().unwrap();
            assert!(slot.is_none(), "on_exit called twice");
            *slot = Some(outcome);
        }
    }

    fn shell(script: &str) -> CommandLine {
        CommandLine::new("sh", ["-c", script])
    }

    async fn run(script: &str) -> (Vec<String>, ExitOutcome) {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let handle = ProcessSupervisor::new()
            .start(&shell(script), dir.path(), recorder.clone(), CancellationToken::new())
            .unwrap();

        tokio::time::timeout(Duration::from_secs(10), handle.wait())
            .await
            .expect("process did not finish");
        assert!(handle.is_finished());

        let lines = recorder.lines.lock().unwrap().clone();
        let outcome = recorder.outcome.lock().unwrap().clone().unwrap();
        (lines, outcome)
    }

    #[tokio::test]
    async fn test_lines_then_exit() {
        let (lines, outcome) = run("echo one; echo; echo '  two  '; printf three").await;
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert_eq!(outcome.code, Some(0));
        assert!(outcome.success());
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr_tail() {
        let (lines, outcome) = run("echo progress; echo 'network error' >&2; exit 1").await;
        assert!(lines.contains(&"network error".to_string()));
        assert_eq!(outcome.code, Some(1));
        assert!(!outcome.success());
        assert_eq!(outcome.diagnostic, "network error");
    }

    #[tokio::test]
    async fn test_diagnostic_falls_back_to_stdout_and_is_bounded() {
        let (_, outcome) = run("printf '%0600d\\n' 0; exit 2").await;
        assert_eq!(outcome.code, Some(2));
        assert_eq!(outcome.diagnostic.chars().count(), MAX_DIAGNOSTIC_CHARS);
    }

    #[tokio::test]
    async fn test_process_runs_inside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let handle = ProcessSupervisor::new()
            .start(
                &shell("printf data > output.mp3"),
                dir.path(),
                recorder.clone(),
                CancellationToken::new(),
            )
            .unwrap();
        handle.wait().await;

        let bytes = std::fs::read(dir.path().join("output.mp3")).unwrap();
        assert_eq!(bytes, b"data");
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let handle = ProcessSupervisor::new()
            .start(&shell("echo started; exec sleep 30"), dir.path(), recorder.clone(), CancellationToken::new())
            .unwrap();

        handle.cancel();
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("cancelled process did not exit");

        let outcome = recorder.outcome.lock().unwrap().clone().unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.code, None);

        // No-op after exit
        handle.cancel();
    }

    /// Zombies count as gone; they only wait for their new parent to reap them.
    fn process_alive(pid: i32) -> bool {
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            let state = stat.rsplit(')').next().and_then(|rest| rest.trim_start().chars().next());
            return !matches!(state, Some('Z') | Some('X'));
        }
        unsafe { libc::kill(pid, 0) == 0 }
    }

    #[tokio::test]
    async fn test_cancel_kills_spawned_children() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let handle = ProcessSupervisor::new()
            .start(
                &shell("sleep 300 & echo pid=$!; wait"),
                dir.path(),
                recorder.clone(),
                CancellationToken::new(),
            )
            .unwrap();

        let grandchild = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let pid = recorder
                    .lines
                    .lock()
                    .unwrap()
                    .iter()
                    .find_map(|line| line.strip_prefix("pid=").map(str::to_string));
                if let Some(pid) = pid {
                    break pid.parse::<i32>().unwrap();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("script did not report its child");
        assert!(process_alive(grandchild));

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("cancelled process did not exit");
        assert!(recorder.outcome.lock().unwrap().as_ref().unwrap().cancelled);

        tokio::time::timeout(Duration::from_secs(5), async {
            while process_alive(grandchild) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("child of the extractor survived cancellation");
    }

    #[tokio::test]
    async fn test_cancel_after_exit_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let handle = ProcessSupervisor::new()
            .start(&shell("exit 0"), dir.path(), recorder.clone(), CancellationToken::new())
            .unwrap();
        handle.wait().await;
        handle.cancel();

        let outcome = recorder.outcome.lock().unwrap().clone().unwrap();
        assert!(!outcome.cancelled);
        assert_eq!(outcome.code, Some(0));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let result = ProcessSupervisor::new().start(
            &CommandLine::new("mfetch-definitely-not-installed", Vec::<String>::new()),
            dir.path(),
            Arc::new(Recorder::default()),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(MediaError::ProgramNotFound(_))));
    }

    #[tokio::test]
    async fn test_precancelled_token_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = ProcessSupervisor::new().start(
            &shell("printf x > marker"),
            dir.path(),
            Arc::new(Recorder::default()),
            token,
        );
        assert!(matches!(result, Err(MediaError::Cancelled)));
        assert!(!dir.path().join("marker").exists());
    }
}
