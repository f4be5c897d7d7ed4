//! Subprocess test execution
//!
//! Runs one attempt of one test as a child process with a fixed environment
//! contract, capturing stdout and stderr as ordered tagged chunks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{AbortSignal, AttemptSuccess, Execute, ExecutionFailure};
use crate::config::{AppConfig, EnvSettings};
use crate::models::{AttemptMeta, CapturedOutput, ExitKind, StreamTag, TestId};
use crate::utils::Timer;

const READ_BUFFER: usize = 8 * 1024;

/// How long output may keep arriving after the test process exits
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Environment handed to every test subprocess
#[derive(Clone, Debug, Default)]
pub struct EnvContract {
    clear: Vec<String>,
    set: BTreeMap<String, String>,
    first_attempt: BTreeMap<String, String>,
    retry: BTreeMap<String, String>,
    extra: BTreeMap<String, String>,
}

impl EnvContract {
    pub fn from_settings(settings: &EnvSettings) -> Self {
        Self {
            clear: settings.clear.clone(),
            set: settings.set.clone(),
            first_attempt: settings.first_attempt.clone(),
            retry: settings.retry.clone(),
            extra: BTreeMap::new(),
        }
    }

    /// Add run-wide variables, such as those of a provisioned installation
    pub fn with_extra(mut self, vars: BTreeMap<String, String>) -> Self {
        self.extra.extend(vars);
        self
    }

    pub fn cleared(&self) -> &[String] {
        &self.clear
    }

    /// Variables set for one attempt, later layers overriding earlier ones
    pub fn vars_for(
        &self,
        id: &TestId,
        meta: AttemptMeta,
        report_path: &Path,
    ) -> BTreeMap<String, String> {
        let mut vars = self.set.clone();

        let per_attempt = if meta.is_retry() {
            &self.retry
        } else {
            &self.first_attempt
        };
        vars.extend(per_attempt.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        let flag = |b: bool| if b { "1" } else { "0" }.to_string();
        vars.insert("TESTSHARD_TEST_ID".to_string(), id.to_string());
        vars.insert(
            "TESTSHARD_REPORT_ID".to_string(),
            format!("{}-{}", id.sanitized(), meta.index),
        );
        vars.insert(
            "TESTSHARD_REPORT_PATH".to_string(),
            report_path.display().to_string(),
        );
        vars.insert("TESTSHARD_ATTEMPT".to_string(), meta.index.to_string());
        vars.insert("TESTSHARD_IS_RETRY".to_string(), flag(meta.is_retry()));
        vars.insert("TESTSHARD_IS_FINAL_ATTEMPT".to_string(), flag(meta.is_final));

        vars
    }
}

/// Runs tests as child processes
#[derive(Clone, Debug)]
pub struct ProcessExecutor {
    root: PathBuf,
    command: Vec<String>,
    env: EnvContract,
    reports_dir: PathBuf,
    trace_dir: PathBuf,
    verbose: bool,
}

impl ProcessExecutor {
    pub fn new(root: impl Into<PathBuf>, config: &AppConfig, env: EnvContract) -> Self {
        let root = root.into();
        Self {
            reports_dir: root.join(&config.reports_dir),
            trace_dir: root.join(&config.trace_dir),
            command: config.command.clone(),
            root,
            env,
            verbose: false,
        }
    }

    /// Stream child output straight through instead of capturing it
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Where the test may write its structured JSON result
    pub fn report_path(&self, id: &TestId) -> PathBuf {
        self.reports_dir.join(format!("{}.json", id.sanitized()))
    }

    fn build_command(&self, id: &TestId, meta: AttemptMeta) -> Option<Command> {
        let (program, args) = self.command.split_first()?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(id.as_str())
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // Own group, so leftover descendants can be signalled together.
        #[cfg(unix)]
        cmd.process_group(0);

        for name in self.env.cleared() {
            cmd.env_remove(name);
        }
        cmd.envs(self.env.vars_for(id, meta, &self.report_path(id)));

        if self.verbose {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        Some(cmd)
    }

    /// Remove trace artifacts named after a passing test's report ids
    async fn clean_traces(&self, id: &TestId) {
        let prefix = id.sanitized();
        let Ok(mut entries) = tokio::fs::read_dir(&self.trace_dir).await else {
            return;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if !is_trace_of(&entry.file_name().to_string_lossy(), &prefix) {
                continue;
            }
            let path = entry.path();
            let removed = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            if let Err(e) = removed {
                debug!("Could not remove trace {}: {}", path.display(), e);
            }
        }
    }
}

impl Execute for ProcessExecutor {
    async fn execute(
        &self,
        id: &TestId,
        meta: AttemptMeta,
        abort: &AbortSignal,
    ) -> Result<AttemptSuccess, ExecutionFailure> {
        let timer = Timer::start(id.as_str());

        let Some(mut cmd) = self.build_command(id, meta) else {
            return Err(ExecutionFailure::new(
                ExitKind::SpawnFailed("empty test command".to_string()),
                CapturedOutput::new(),
                timer.elapsed(),
            ));
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.reports_dir).await {
            debug!("Could not create {}: {}", self.reports_dir.display(), e);
        }

        debug!("Spawning attempt {} of {}", meta.index, id);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Err(ExecutionFailure::new(
                    ExitKind::SpawnFailed(e.to_string()),
                    CapturedOutput::new(),
                    timer.elapsed(),
                ))
            }
        };

        let pid = child.id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(stdout, StreamTag::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(stderr, StreamTag::Stderr, tx.clone())));
        }
        drop(tx);

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = abort.aborted() => None,
        };
        let exit = match waited {
            Some(Ok(status)) => exit_kind(status),
            Some(Err(e)) => Some(ExitKind::SpawnFailed(e.to_string())),
            None => {
                warn!("Killing {} (run aborted)", id);
                kill_group(pid);
                let _ = child.start_kill();
                let _ = child.wait().await;
                Some(ExitKind::Aborted)
            }
        };
        let elapsed = timer.stop();

        // Descendants inherit the pipes; do not wait on them indefinitely.
        let mut output = CapturedOutput::new();
        let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((tag, data))) => output.push(tag, data),
                Ok(None) => break,
                Err(_) => {
                    warn!("{} left processes holding its output open; killing them", id);
                    kill_group(pid);
                    for pump in &pumps {
                        pump.abort();
                    }
                    while let Ok((tag, data)) = rx.try_recv() {
                        output.push(tag, data);
                    }
                    break;
                }
            }
        }

        match exit {
            None => {
                self.clean_traces(id).await;
                Ok(AttemptSuccess { elapsed, output })
            }
            Some(exit) => Err(ExecutionFailure::new(exit, output, elapsed)),
        }
    }
}

async fn pump<R>(mut reader: R, tag: StreamTag, tx: mpsc::UnboundedSender<(StreamTag, Vec<u8>)>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send((tag, buf[..n].to_vec())).is_err() {
                    break;
                }
            }
        }
    }
}

/// SIGKILL the process group led by `pid`
#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg takes no pointers; a vanished group yields ESRCH.
    unsafe {
        libc::killpg(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Trace artifacts are named after a report id (`<sanitized>-<attempt>`),
/// optionally followed by an extension.
fn is_trace_of(name: &str, prefix: &str) -> bool {
    let Some(rest) = name.strip_prefix(prefix).and_then(|r| r.strip_prefix('-')) else {
        return false;
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    digits > 0 && (rest.len() == digits || rest[digits..].starts_with('.'))
}

/// `None` for a clean exit
fn exit_kind(status: ExitStatus) -> Option<ExitKind> {
    if status.success() {
        return None;
    }
    if let Some(code) = status.code() {
        return Some(ExitKind::Code(code));
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(ExitKind::Signal(signal));
        }
    }

    Some(ExitKind::Code(-1))
}
