//! Bounded analyzer process execution.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::Invocation;
use crate::error::{HarnessError, HarnessResult};

/// Result of one analyzer process run.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// Exit code; `-1` when the process was killed by a signal.
    pub exit_code: i32,

    /// Signal that terminated the process, if any.
    pub signal: Option<i32>,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Wall-clock duration.
    pub duration: Duration,
}

impl ProcessResult {
    /// Duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

/// Everything needed to run one invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest<'a> {
    pub invocation: &'a Invocation,
    pub working_dir: &'a Path,
    pub env: &'a BTreeMap<String, String>,
    pub timeout: Duration,
}

/// Runs invocations to completion.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the invocation; `Err` on spawn failure or timeout.
    async fn execute(&self, request: ExecRequest<'_>) -> HarnessResult<ProcessResult>;
}

/// Executor backed by real child processes.
///
/// On Unix the child becomes the leader of a new process group so that a
/// timeout can take down everything it started.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, request: ExecRequest<'_>) -> HarnessResult<ProcessResult> {
        let start = Instant::now();
        let command_line = request.invocation.to_string();

        let mut command = Command::new(&request.invocation.program);
        command
            .args(&request.invocation.args)
            .current_dir(request.working_dir)
            .envs(request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| HarnessError::ProcessSpawn {
            command: command_line.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(pid = ?pid, command = %command_line, "analyzer spawned");

        // Drain both pipes independently so a full stderr cannot block stdout.
        let mut stdout_reader = spawn_reader(child.stdout.take());
        let mut stderr_reader = spawn_reader(child.stderr.take());

        // One deadline bounds the wait and the drain together: a descendant
        // that left the group can hold a pipe open after the child exits.
        let deadline = tokio::time::Instant::now() + request.timeout;

        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => status?,
            Err(_elapsed) => {
                warn!(pid = ?pid, timeout_ms = request.timeout.as_millis() as u64, "analyzer timed out; killing process tree");
                kill_tree(&mut child, pid).await;
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(HarnessError::ProcessTimeout {
                    command: command_line,
                    timeout: request.timeout,
                });
            }
        };

        // Anything the analyzer left running in its group goes too.
        if let Some(pid) = pid {
            signal_group(pid);
        }

        let drained = tokio::time::timeout_at(deadline, async {
            let stdout = join_reader(&mut stdout_reader).await?;
            let stderr = join_reader(&mut stderr_reader).await?;
            Ok::<_, HarnessError>((stdout, stderr))
        })
        .await;
        let (stdout, stderr) = match drained {
            Ok(output) => output?,
            Err(_elapsed) => {
                warn!(
                    pid = ?pid,
                    timeout_ms = request.timeout.as_millis() as u64,
                    "analyzer exited but its output pipes stayed open past the deadline"
                );
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(HarnessError::ProcessTimeout {
                    command: command_line,
                    timeout: request.timeout,
                });
            }
        };

        Ok(ProcessResult {
            exit_code: status.code().unwrap_or(-1),
            signal: exit_signal(&status),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            duration: start.elapsed(),
        })
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

async fn join_reader(handle: &mut JoinHandle<std::io::Result<Vec<u8>>>) -> HarnessResult<Vec<u8>> {
    match handle.await {
        Ok(result) => Ok(result?),
        Err(join_err) => Err(HarnessError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("output reader task failed: {}", join_err),
        ))),
    }
}

async fn kill_tree(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        signal_group(pid);
    }
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "direct kill failed; child already gone");
    }
    // Reap so no zombie outlives the call.
    if let Err(err) = child.wait().await {
        warn!(error = %err, "failed to reap timed-out analyzer");
    }
}

#[cfg(unix)]
fn signal_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "process id out of range for a process group");
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(pgid = raw, "sent SIGKILL to process group"),
        // The group is already empty.
        Err(Errno::ESRCH) => {}
        Err(err) => warn!(pgid = raw, error = %err, "failed to signal process group"),
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32) {}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Read a report file the analyzer wrote as a side effect of its run.
pub async fn read_report_file(path: &Path) -> HarnessResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            HarnessError::ResultParse {
                reason: format!("report file {} was not written", path.display()),
                raw: String::new(),
            }
        } else {
            HarnessError::Io(err)
        }
    })
}

/// Working directory helper: `root` if it exists, else an error.
pub fn working_dir(root: &Path) -> HarnessResult<PathBuf> {
    if root.is_dir() {
        Ok(root.to_path_buf())
    } else {
        Err(HarnessError::Configuration(format!(
            "source root is not a directory: {}",
            root.display()
        )))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    async fn run(invocation: &Invocation, timeout: Duration) -> HarnessResult<ProcessResult> {
        let env = BTreeMap::from([("BUGCHECK_TEST_VAR".to_string(), "from-env".to_string())]);
        ProcessExecutor
            .execute(ExecRequest {
                invocation,
                working_dir: Path::new("/"),
                env: &env,
                timeout,
            })
            .await
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let result = run(&sh("echo hello"), Duration::from_secs(10))
            .await
            .expect("execute failed");
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
        assert!(result.signal.is_none());
    }

    #[tokio::test]
    async fn test_execute_failing_command_still_returns_result() {
        let result = run(&sh("echo oops >&2; exit 3"), Duration::from_secs(10))
            .await
            .expect("execute failed");
        assert_eq!(result.exit_code, 3);
        assert!(result.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_environment_and_cwd_applied() {
        let result = run(&sh("echo $BUGCHECK_TEST_VAR; pwd"), Duration::from_secs(10))
            .await
            .expect("execute failed");
        assert!(result.stdout.contains("from-env"));
        assert!(result.stdout.lines().any(|l| l == "/"));
    }

    #[tokio::test]
    async fn test_large_output_on_both_streams_does_not_deadlock() {
        // Far beyond a pipe buffer on each stream.
        let script = "i=0; while [ $i -lt 20000 ]; do echo out-line-$i; echo err-line-$i >&2; i=$((i+1)); done";
        let result = run(&sh(script), Duration::from_secs(60))
            .await
            .expect("execute failed");
        assert_eq!(result.stdout.lines().count(), 20000);
        assert_eq!(result.stderr.lines().count(), 20000);
        assert!(result.stdout.ends_with("out-line-19999\n"));
    }

    #[tokio::test]
    async fn test_timeout_returns_error() {
        let start = Instant::now();
        let err = run(&sh("sleep 30"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::ProcessTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_detached_descendant_holding_stdout_hits_deadline() {
        // The child exits at once, but a grandchild in its own session keeps
        // stdout open well past the timeout.
        let start = Instant::now();
        let err = run(
            &sh("setsid sleep 6 & echo '{\"event\":\"done\"}'; exit 0"),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HarnessError::ProcessTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_signal_group_tolerates_gone_or_invalid_groups() {
        // Reaped child: its group is empty, so killpg reports ESRCH.
        let mut child = std::process::Command::new("/bin/true")
            .spawn()
            .expect("spawn");
        let pid = child.id();
        child.wait().expect("wait");
        signal_group(pid);
        // Does not fit a pid_t.
        signal_group(u32::MAX);
    }

    #[tokio::test]
    async fn test_spawn_failure_for_unexecutable_binary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let not_exec = dir.path().join("analyzer");
        std::fs::write(&not_exec, "not a program").expect("write");
        let invocation = Invocation {
            program: not_exec,
            args: vec![],
        };
        let err = run(&invocation, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, HarnessError::ProcessSpawn { .. }));
    }

    #[tokio::test]
    async fn test_missing_report_file_is_parse_error() {
        let err = read_report_file(Path::new("/definitely/not/here/report.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::ResultParse { .. }));
    }
}
