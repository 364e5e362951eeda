//! One supervising task per launched process: waits for exit, relays stop
//! requests as signals, and pumps stdout/stderr into the log sink.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::OrchestratorError;
use crate::sink::{LogSender, Stream};
use crate::spec::ResolvedProcess;

/// How long output pumps may keep draining after their process exited.
const PUMP_DRAIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopMode {
    Graceful,
    Force,
}

/// Reported to the group controller when a supervised process is gone.
#[derive(Debug)]
pub(crate) struct ProcessExit {
    pub index: usize,
    pub status: Result<ExitStatus, String>,
}

/// Controller-side handle of a running supervisor.
#[derive(Debug)]
pub(crate) struct Supervisor {
    pub pid: Option<u32>,
    stop_tx: mpsc::UnboundedSender<StopMode>,
}

impl Supervisor {
    pub fn stop(&self, mode: StopMode) {
        let _ = self.stop_tx.send(mode);
    }
}

/// Start `process` with its materialized configuration and supervise it.
pub(crate) fn spawn(
    index: usize,
    process: &ResolvedProcess,
    sink: &LogSender,
    exits: mpsc::UnboundedSender<ProcessExit>,
) -> Result<Supervisor, OrchestratorError> {
    let launch_failure = |source: std::io::Error| OrchestratorError::ProcessLaunchFailure {
        process: process.name.clone(),
        source,
    };
    let (program, args) = process
        .command
        .split_first()
        .ok_or_else(|| launch_failure(std::io::Error::other("empty command")))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(process.configuration())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &process.working_dir {
        command.current_dir(dir);
    }
    let mut child = command.spawn().map_err(launch_failure)?;
    let pid = child.id();

    let pumps: Vec<JoinHandle<()>> = [
        child
            .stdout
            .take()
            .map(|out| spawn_pump(out, process.name.clone(), Stream::Stdout, sink.clone())),
        child
            .stderr
            .take()
            .map(|err| spawn_pump(err, process.name.clone(), Stream::Stderr, sink.clone())),
    ]
    .into_iter()
    .flatten()
    .collect();

    let (stop_tx, stop_rx) = mpsc::unbounded_channel();
    let name = process.name.clone();
    tokio::spawn(async move {
        let status = supervise(&name, &mut child, stop_rx).await;
        for mut pump in pumps {
            if tokio::time::timeout(PUMP_DRAIN, &mut pump).await.is_err() {
                tracing::debug!(process = %name, "output still open after exit; abandoning pump");
                pump.abort();
            }
        }
        let _ = exits.send(ProcessExit {
            index,
            status: status.map_err(|e| e.to_string()),
        });
    });

    Ok(Supervisor { pid, stop_tx })
}

async fn supervise(
    name: &str,
    child: &mut Child,
    mut stop_rx: mpsc::UnboundedReceiver<StopMode>,
) -> std::io::Result<ExitStatus> {
    loop {
        tokio::select! {
            status = child.wait() => return status,
            Some(mode) = stop_rx.recv() => match mode {
                StopMode::Graceful => terminate(name, child),
                StopMode::Force => {
                    tracing::warn!(process = %name, "forcing stop");
                    if let Err(err) = child.start_kill() {
                        tracing::debug!(process = %name, error = %err, "kill failed");
                    }
                }
            },
        }
    }
}

#[cfg(unix)]
fn terminate(name: &str, child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    tracing::debug!(process = %name, pid, "sending SIGTERM");
    // SAFETY: `pid` belongs to a child we have not reaped yet.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        tracing::debug!(
            process = %name,
            error = %std::io::Error::last_os_error(),
            "SIGTERM failed"
        );
    }
}

#[cfg(not(unix))]
fn terminate(name: &str, child: &mut Child) {
    tracing::debug!(process = %name, "no graceful stop on this platform; killing");
    let _ = child.start_kill();
}

/// Forward `reader` line by line. Invalid UTF-8 is replaced, and once the
/// sink is gone the pipe is still drained to EOF so the child never sees a
/// closed stdout or stderr.
fn spawn_pump<R>(reader: R, process: String, stream: Stream, sink: LogSender) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        let mut forwarding = true;
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    if !forwarding {
                        continue;
                    }
                    if line.last() == Some(&b'\n') {
                        line.pop();
                        if line.last() == Some(&b'\r') {
                            line.pop();
                        }
                    }
                    let text = String::from_utf8_lossy(&line).into_owned();
                    if !sink.send(&process, stream, text).await {
                        tracing::debug!(process = %process, "log sink closed; discarding output");
                        forwarding = false;
                    }
                }
                Err(err) => {
                    tracing::debug!(process = %process, error = %err, "output stream read failed");
                    break;
                }
            }
        }
    })
}

/// Human-readable exit status: `exit code N` or `killed by signal N`.
pub(crate) fn describe(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {signal}");
        }
    }
    "unknown exit status".to_string()
}
