//! Single-test process supervision.
//!
//! One test runs the benchmark twice: a server bound to the source port and
//! a client bound to the destination port. Each runs in its own process group
//! so it can be signalled as a unit. The supervisor walks
//!
//! ```text
//! INIT -> SERVER_STARTING -> SERVER_READY -> CLIENT_RUNNING
//!      -> {COMPLETED | TIMEOUT | ERROR} -> CLEANUP -> DONE
//! ```
//!
//! and whichever branch is taken, leaves `CLEANUP` only once both process
//! groups are gone.

use std::fmt;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::classifier::{classify, strip_ansi};
use crate::types::{TestRequest, TestResult, TestStatus};

/// Default benchmark location.
pub const DEFAULT_BENCHMARK_PATH: &str = "/opt/habanalabs/perf-test/perf_test";

/// Default address the client connects to.
pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1";

/// How long to wait for output readers once a process is gone.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Liveness polling during cleanup.
const CLEANUP_POLL_INTERVAL: Duration = Duration::from_millis(50);
const CLEANUP_POLL_ATTEMPTS: u32 = 20;

/// Process table consulted to tell live group members from zombies.
const PROC_ROOT: &str = "/proc";

/// Spawn retries when the executable is momentarily busy (ETXTBSY).
const SPAWN_BUSY_RETRIES: u32 = 5;
const SPAWN_BUSY_BACKOFF: Duration = Duration::from_millis(20);

/// Supervisor states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    Init,
    ServerStarting,
    ServerReady,
    ClientRunning,
    Completed,
    Timeout,
    Error,
    Cleanup,
    Done,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Init => "INIT",
            SupervisorState::ServerStarting => "SERVER_STARTING",
            SupervisorState::ServerReady => "SERVER_READY",
            SupervisorState::ClientRunning => "CLIENT_RUNNING",
            SupervisorState::Completed => "COMPLETED",
            SupervisorState::Timeout => "TIMEOUT",
            SupervisorState::Error => "ERROR",
            SupervisorState::Cleanup => "CLEANUP",
            SupervisorState::Done => "DONE",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which half of the benchmark pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Benchmark executable.
    pub benchmark_path: PathBuf,
    /// Positional address appended to the client invocation.
    pub server_address: String,
    /// Address resolution index (`-g`).
    pub address_index: u32,
    /// Time the server gets to come up before the client starts.
    pub server_start_grace: Duration,
    /// Time the server gets to exit after SIGTERM once the client finished.
    pub termination_grace: Duration,
    /// Time in-flight processes get to exit after SIGTERM on abort.
    pub abort_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            benchmark_path: PathBuf::from(DEFAULT_BENCHMARK_PATH),
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            address_index: 0,
            server_start_grace: Duration::from_secs(2),
            termination_grace: Duration::from_secs(5),
            abort_grace: Duration::from_secs(5),
        }
    }
}

/// Runs one request to a terminal result.
///
/// Implementations must never panic on per-request failures; everything is
/// reported through the returned [`TestResult`].
#[async_trait]
pub trait TestExecutor: Send + Sync {
    async fn execute(&self, request: &TestRequest, cancel: &CancellationToken) -> TestResult;
}

/// Result of a supervised run, with the state path taken.
#[derive(Debug, Clone)]
pub struct Execution {
    pub result: TestResult,
    pub states: Vec<SupervisorState>,
    /// False if a process group was still alive when cleanup gave up.
    pub cleanup_verified: bool,
}

/// Launches and supervises benchmark process pairs.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    /// Benchmark arguments for one side of `request`.
    pub fn build_command(&self, request: &TestRequest, role: Role) -> Vec<String> {
        let link = &request.link;
        let (interface, port) = match role {
            Role::Server => (&link.source_interface, link.logical.source.port),
            Role::Client => (&link.dest_interface, link.logical.destination.port),
        };

        let mut args = vec![
            "-t".to_string(),
            request.params.kind.clone(),
            "-s".to_string(),
            request.params.message_size.to_string(),
            "-n".to_string(),
            request.params.iteration_count.to_string(),
        ];
        if !interface.is_empty() {
            args.push("-d".to_string());
            args.push(interface.clone());
        }
        args.extend([
            "-i".to_string(),
            port.to_string(),
            "-g".to_string(),
            self.config.address_index.to_string(),
        ]);
        if role == Role::Client {
            args.push(self.config.server_address.clone());
        }
        args
    }

    /// Checks that the benchmark exists and has an execute bit.
    pub async fn check_executable(&self) -> Result<(), String> {
        let path = &self.config.benchmark_path;
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| format!("Benchmark executable {} not found: {}", path.display(), e))?;
        if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
            return Err(format!("Benchmark executable {} is not executable", path.display()));
        }
        Ok(())
    }

    /// Runs `request` through the full state machine.
    #[instrument(skip_all, fields(request_id = %request.id, link = %request.link.logical))]
    pub async fn run(&self, request: &TestRequest, cancel: &CancellationToken) -> Execution {
        let mut run = Run::new(request);

        run.enter(SupervisorState::Init);
        match self.check_executable().await {
            Ok(()) => self.drive(&mut run, request, cancel).await,
            Err(message) => {
                warn!(error = %message, "Benchmark unavailable");
                run.settle(SupervisorState::Error, TestStatus::Error, message);
            }
        }

        run.enter(SupervisorState::Cleanup);
        let cleanup_verified = run.cleanup().await;
        run.enter(SupervisorState::Done);

        run.result.end_time = Utc::now();
        info!(
            status = %run.result.status,
            duration_secs = run.result.duration_secs(),
            "Test finished"
        );

        Execution {
            result: run.result,
            states: run.states,
            cleanup_verified,
        }
    }

    async fn drive(&self, run: &mut Run, request: &TestRequest, cancel: &CancellationToken) {
        run.enter(SupervisorState::ServerStarting);
        let args = self.build_command(request, Role::Server);
        debug!(args = ?args, "Starting server");
        let server = match BenchmarkProcess::spawn(&self.config.benchmark_path, &args, Role::Server).await {
            Ok(process) => run.server.insert(process),
            Err(e) => {
                run.settle(
                    SupervisorState::Error,
                    TestStatus::Error,
                    format!("Failed to start server: {}", e),
                );
                return;
            }
        };
        run.result.process_ids.push(server.pid);

        let startup = tokio::select! {
            biased;
            _ = cancel.cancelled() => Wait::Aborted,
            status = server.child.wait() => Wait::Exited(status),
            _ = tokio::time::sleep(self.config.server_start_grace) => Wait::Elapsed,
        };
        match startup {
            Wait::Elapsed => {}
            Wait::Aborted => return self.abort(run).await,
            Wait::Exited(status) => {
                let message = match status {
                    Ok(status) => format!("Server exited during startup ({})", status),
                    Err(e) => format!("Failed waiting for server: {}", e),
                };
                warn!(error = %message, "Server not ready");
                run.settle(SupervisorState::Completed, TestStatus::Failed, message);
                return;
            }
        }
        run.enter(SupervisorState::ServerReady);

        run.enter(SupervisorState::ClientRunning);
        let args = self.build_command(request, Role::Client);
        debug!(args = ?args, "Starting client");
        let client = match BenchmarkProcess::spawn(&self.config.benchmark_path, &args, Role::Client).await {
            Ok(process) => run.client.insert(process),
            Err(e) => {
                run.settle(
                    SupervisorState::Error,
                    TestStatus::Error,
                    format!("Failed to start client: {}", e),
                );
                return;
            }
        };
        run.result.process_ids.push(client.pid);

        let deadline = Duration::from_secs(request.params.timeout_seconds);
        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => Wait::Aborted,
            status = client.child.wait() => Wait::Exited(status),
            _ = tokio::time::sleep(deadline) => Wait::Elapsed,
        };

        match finished {
            Wait::Exited(Ok(status)) => {
                debug!(status = %status, "Client exited");
                if let Some(server) = run.server.as_mut() {
                    server.terminate(self.config.termination_grace).await;
                }
                run.client_exit = Some(status.code());
                run.enter(SupervisorState::Completed);
            }
            Wait::Exited(Err(e)) => {
                run.settle(
                    SupervisorState::Error,
                    TestStatus::Error,
                    format!("Failed waiting for client: {}", e),
                );
            }
            Wait::Elapsed => {
                warn!(timeout_secs = request.params.timeout_seconds, "Client deadline exceeded");
                let (server, client) = (&mut run.server, &mut run.client);
                tokio::join!(kill_opt(client), kill_opt(server));
                run.settle(
                    SupervisorState::Timeout,
                    TestStatus::Timeout,
                    format!("Test timed out after {} seconds", request.params.timeout_seconds),
                );
            }
            Wait::Aborted => self.abort(run).await,
        }
    }

    async fn abort(&self, run: &mut Run) {
        warn!("Run aborted, terminating in-flight processes");
        let grace = self.config.abort_grace;
        let (server, client) = (&mut run.server, &mut run.client);
        tokio::join!(terminate_opt(client, grace), terminate_opt(server, grace));
        run.settle(
            SupervisorState::Error,
            TestStatus::Error,
            "Run aborted while the test was running".to_string(),
        );
    }
}

#[async_trait]
impl TestExecutor for ProcessSupervisor {
    async fn execute(&self, request: &TestRequest, cancel: &CancellationToken) -> TestResult {
        self.run(request, cancel).await.result
    }
}

enum Wait {
    Exited(io::Result<ExitStatus>),
    Elapsed,
    Aborted,
}

async fn kill_opt(process: &mut Option<BenchmarkProcess>) {
    if let Some(process) = process {
        process.kill().await;
    }
}

async fn terminate_opt(process: &mut Option<BenchmarkProcess>, grace: Duration) {
    if let Some(process) = process {
        process.terminate(grace).await;
    }
}

/// Mutable state of one supervised test.
struct Run {
    result: TestResult,
    states: Vec<SupervisorState>,
    server: Option<BenchmarkProcess>,
    client: Option<BenchmarkProcess>,
    /// Set when the client finished before its deadline.
    client_exit: Option<Option<i32>>,
}

impl Run {
    fn new(request: &TestRequest) -> Self {
        Self {
            result: TestResult::new(request, TestStatus::Error),
            states: Vec::new(),
            server: None,
            client: None,
            client_exit: None,
        }
    }

    fn enter(&mut self, state: SupervisorState) {
        debug!(state = %state, "Supervisor transition");
        self.states.push(state);
    }

    fn settle(&mut self, state: SupervisorState, status: TestStatus, message: String) {
        self.result.status = status;
        self.result.error_message = Some(message);
        self.enter(state);
    }

    /// Reaps both groups, collects output and classifies a completed run.
    async fn cleanup(&mut self) -> bool {
        let mut verified = true;
        for process in [self.server.as_mut(), self.client.as_mut()].into_iter().flatten() {
            if !process.reap().await {
                error!(pid = process.pid, role = %process.role, "Process group still alive after cleanup");
                verified = false;
            }
        }

        if let Some(server) = self.server.as_mut() {
            self.result.raw_server_output = server.output().await;
        }
        if let Some(client) = self.client.as_mut() {
            self.result.raw_client_output = client.output().await;
        }

        if let Some(exit_code) = self.client_exit {
            let verdict = classify(exit_code, &self.result.raw_server_output, &self.result.raw_client_output);
            self.result.status = verdict.status;
            self.result.metrics = verdict.metrics;
            self.result.error_message = verdict.reason;
        }

        if !verified {
            let note = "benchmark processes survived cleanup";
            self.result.error_message = Some(match self.result.error_message.take() {
                Some(message) => format!("{}; {}", message, note),
                None => note.to_string(),
            });
        }
        verified
    }
}

/// A benchmark process leading its own process group.
struct BenchmarkProcess {
    role: Role,
    pid: u32,
    child: Child,
    stdout: Option<JoinHandle<Vec<String>>>,
    stderr: Option<JoinHandle<Vec<String>>>,
}

impl BenchmarkProcess {
    async fn spawn(program: &Path, args: &[String], role: Role) -> io::Result<Self> {
        let mut attempt = 0;
        let mut child = loop {
            let spawned = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .process_group(0)
                .kill_on_drop(true)
                .spawn();
            match spawned {
                Err(e) if e.raw_os_error() == Some(Errno::ETXTBSY as i32) && attempt < SPAWN_BUSY_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(SPAWN_BUSY_BACKOFF).await;
                }
                other => break other?,
            }
        };

        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("process exited before its pid was read"))?;
        let stdout = child.stdout.take().map(|s| tokio::spawn(read_lines(s)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(read_lines(s)));
        debug!(pid, role = %role, "Spawned benchmark process");

        Ok(Self {
            role,
            pid,
            child,
            stdout,
            stderr,
        })
    }

    fn pgid(&self) -> Pid {
        Pid::from_raw(self.pid as i32)
    }

    fn signal_group(&self, signal: Signal) {
        match killpg(self.pgid(), signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(pid = self.pid, signal = ?signal, error = %e, "Failed to signal process group"),
        }
    }

    /// True while a non-zombie member of the group remains. Killed members
    /// that were re-parented away from us may linger unreaped; those do not
    /// count. Without a readable process table a null signal to the group decides.
    fn group_alive(&self) -> bool {
        if matches!(killpg(self.pgid(), None), Err(Errno::ESRCH)) {
            return false;
        }
        match live_group_members(self.pgid().as_raw()) {
            Some(members) => {
                if !members.is_empty() {
                    debug!(pgid = self.pid, members = ?members, "Process group still has members");
                }
                !members.is_empty()
            }
            None => true,
        }
    }

    async fn kill(&mut self) -> Option<ExitStatus> {
        self.signal_group(Signal::SIGKILL);
        self.child.wait().await.ok()
    }

    /// SIGTERM, then SIGKILL if the leader is still running after `grace`.
    async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Some(status);
        }
        self.signal_group(Signal::SIGTERM);
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(pid = self.pid, role = %self.role, error = %e, "Wait failed after SIGTERM");
                self.kill().await
            }
            Err(_) => {
                warn!(pid = self.pid, role = %self.role, "No exit after SIGTERM, killing");
                self.kill().await
            }
        }
    }

    /// Reaps the leader and kills whatever is left in its group. Returns true
    /// once the group is empty.
    async fn reap(&mut self) -> bool {
        if !matches!(self.child.try_wait(), Ok(Some(_))) {
            self.kill().await;
        }
        for _ in 0..CLEANUP_POLL_ATTEMPTS {
            if !self.group_alive() {
                return true;
            }
            self.signal_group(Signal::SIGKILL);
            tokio::time::sleep(CLEANUP_POLL_INTERVAL).await;
        }
        !self.group_alive()
    }

    /// Stdout lines followed by stderr lines.
    async fn output(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        for mut handle in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut handle).await {
                Ok(Ok(mut part)) => lines.append(&mut part),
                Ok(Err(e)) => warn!(pid = self.pid, error = %e, "Output reader failed"),
                Err(_) => {
                    warn!(pid = self.pid, role = %self.role, "Output pipe still open, discarding rest");
                    handle.abort();
                }
            }
        }
        lines
    }
}

/// State letter and process group id from a `/proc/<pid>/stat` line.
fn parse_stat(stat: &str) -> Option<(char, i32)> {
    // comm may itself contain spaces and parentheses
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let _ppid = fields.next()?;
    let pgrp = fields.next()?.parse().ok()?;
    Some((state, pgrp))
}

/// Non-zombie pids in process group `pgid`, or `None` if the process table
/// cannot be read.
fn live_group_members(pgid: i32) -> Option<Vec<i32>> {
    let entries = std::fs::read_dir(PROC_ROOT).ok()?;
    let mut members = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|name| name.parse::<i32>().ok()) else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if let Some((state, pgrp)) = parse_stat(&stat) {
            if pgrp == pgid && !matches!(state, 'Z' | 'X') {
                members.push(pid);
            }
        }
    }
    Some(members)
}

async fn read_lines<R: AsyncRead + Unpin>(reader: R) -> Vec<String> {
    let mut lines = BufReader::new(reader).lines();
    let mut out = Vec::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => out.push(strip_ansi(&line)),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Stopped reading benchmark output");
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::request;
    use nix::sys::signal::kill;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    const SERVER_PASSES: &str = r#"for last; do :; done
if [ "$last" = "127.0.0.1" ]; then
  echo "Bandwidth: 94.2 Gb/s"
  echo "Test PASS"
  exit 0
fi
echo "Test PASS"
exec sleep 30
"#;

    /// Both sides leave a background sleep in their group and record its pid.
    const SPAWNS_GRANDCHILD: &str = r#"sleep 60 >/dev/null 2>&1 &
echo $! >> "$(dirname "$0")/grandchildren"
"#;

    fn stub(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("perf_test");
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn supervisor(path: PathBuf) -> ProcessSupervisor {
        ProcessSupervisor::new(SupervisorConfig {
            benchmark_path: path,
            server_start_grace: Duration::from_millis(100),
            termination_grace: Duration::from_secs(1),
            abort_grace: Duration::from_millis(200),
            ..Default::default()
        })
    }

    fn grandchildren(dir: &TempDir) -> Vec<u32> {
        fs::read_to_string(dir.path().join("grandchildren"))
            .unwrap()
            .lines()
            .map(|l| l.trim().parse().unwrap())
            .collect()
    }

    /// Gone from the process table, or left only as an unreaped zombie.
    fn assert_gone(pids: &[u32]) {
        for pid in pids {
            let gone = match kill(Pid::from_raw(*pid as i32), None) {
                Err(Errno::ESRCH) => true,
                _ => fs::read_to_string(format!("/proc/{}/stat", pid))
                    .ok()
                    .and_then(|stat| parse_stat(&stat))
                    .map_or(true, |(state, _)| state == 'Z'),
            };
            assert!(gone, "pid {} still running", pid);
        }
    }

    fn assert_reaped(pids: &[u32]) {
        for pid in pids {
            assert_eq!(kill(Pid::from_raw(*pid as i32), None), Err(Errno::ESRCH), "pid {} alive", pid);
        }
    }

    #[test]
    fn test_build_command() {
        let sup = ProcessSupervisor::default();
        let req = request("test_0_1", 0);
        assert_eq!(
            sup.build_command(&req, Role::Server),
            vec!["-t", "pp", "-s", "4096", "-n", "1000", "-d", "hbl_0", "-i", "1", "-g", "0"]
        );
        assert_eq!(
            sup.build_command(&req, Role::Client),
            vec!["-t", "pp", "-s", "4096", "-n", "1000", "-d", "hbl_1", "-i", "1", "-g", "0", "127.0.0.1"]
        );
    }

    #[tokio::test]
    async fn test_missing_executable_spawns_nothing() {
        let sup = supervisor(PathBuf::from("/nonexistent/perf_test"));
        let exec = sup.run(&request("missing", 0), &CancellationToken::new()).await;

        assert_eq!(exec.result.status, TestStatus::Error);
        assert!(exec.result.error_message.unwrap().contains("not found"));
        assert!(exec.result.process_ids.is_empty());
        assert_eq!(
            exec.states,
            vec![
                SupervisorState::Init,
                SupervisorState::Error,
                SupervisorState::Cleanup,
                SupervisorState::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_non_executable_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("perf_test");
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let exec = supervisor(path).run(&request("noexec", 0), &CancellationToken::new()).await;
        assert_eq!(exec.result.status, TestStatus::Error);
        assert!(exec.result.error_message.unwrap().contains("not executable"));
    }

    #[tokio::test]
    async fn test_completed_pair() {
        let tmp = TempDir::new().unwrap();
        let exec = supervisor(stub(&tmp, SERVER_PASSES))
            .run(&request("ok", 0), &CancellationToken::new())
            .await;

        assert_eq!(exec.result.status, TestStatus::Success);
        assert!(exec.cleanup_verified);
        assert_eq!(exec.result.process_ids.len(), 2);
        assert_eq!(exec.result.raw_server_output, vec!["Test PASS"]);
        assert!(exec.result.metrics.unwrap().throughput.is_some());
        assert!(exec.states.contains(&SupervisorState::Completed));
        assert_eq!(exec.states.last(), Some(&SupervisorState::Done));
        assert_reaped(&exec.result.process_ids);
    }

    #[tokio::test]
    async fn test_client_failure_is_classified() {
        let tmp = TempDir::new().unwrap();
        let body = r#"for last; do :; done
if [ "$last" = "127.0.0.1" ]; then
  echo "cannot resolve address" >&2
  exit 2
fi
exec sleep 30
"#;
        let exec = supervisor(stub(&tmp, body))
            .run(&request("fail", 0), &CancellationToken::new())
            .await;

        assert_eq!(exec.result.status, TestStatus::Failed);
        assert_eq!(exec.result.error_message.as_deref(), Some("Client exited with code 2"));
        assert_eq!(exec.result.raw_client_output, vec!["cannot resolve address"]);
        assert_reaped(&exec.result.process_ids);
    }

    #[tokio::test]
    async fn test_server_exit_during_startup() {
        let tmp = TempDir::new().unwrap();
        let sup = ProcessSupervisor::new(SupervisorConfig {
            benchmark_path: stub(&tmp, "echo 'bind failed'\nexit 1\n"),
            server_start_grace: Duration::from_secs(3),
            ..Default::default()
        });
        let exec = sup.run(&request("early", 0), &CancellationToken::new()).await;

        assert_eq!(exec.result.status, TestStatus::Failed);
        assert_eq!(exec.result.process_ids.len(), 1);
        assert!(!exec.states.contains(&SupervisorState::ClientRunning));
        assert_eq!(exec.result.raw_server_output, vec!["bind failed"]);
    }

    #[tokio::test]
    async fn test_timeout_kills_both_groups() {
        let tmp = TempDir::new().unwrap();
        let mut req = request("slow", 0);
        req.params.timeout_seconds = 1;

        let exec = supervisor(stub(&tmp, "exec sleep 30\n"))
            .run(&req, &CancellationToken::new())
            .await;

        assert_eq!(exec.result.status, TestStatus::Timeout);
        assert!(exec.cleanup_verified);
        assert!(exec.states.contains(&SupervisorState::Timeout));
        assert_eq!(exec.result.process_ids.len(), 2);
        assert_reaped(&exec.result.process_ids);
    }

    #[tokio::test]
    async fn test_abort_terminates_in_flight() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(stub(&tmp, "exec sleep 30\n"));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let exec = sup.run(&request("aborted", 0), &cancel).await;
        assert_eq!(exec.result.status, TestStatus::Error);
        assert!(exec.result.error_message.unwrap().contains("aborted"));
        assert_reaped(&exec.result.process_ids);
    }

    #[tokio::test]
    async fn test_completed_pair_kills_group_members() {
        let tmp = TempDir::new().unwrap();
        let body = format!("{}{}", SPAWNS_GRANDCHILD, SERVER_PASSES.replace("exec sleep 30", "wait"));
        let exec = supervisor(stub(&tmp, &body))
            .run(&request("ok_tree", 0), &CancellationToken::new())
            .await;

        assert_eq!(exec.result.status, TestStatus::Success);
        assert!(exec.cleanup_verified);
        assert_reaped(&exec.result.process_ids);
        let spawned = grandchildren(&tmp);
        assert_eq!(spawned.len(), 2);
        assert_gone(&spawned);
    }

    #[tokio::test]
    async fn test_timeout_kills_group_members() {
        let tmp = TempDir::new().unwrap();
        let mut req = request("slow_tree", 0);
        req.params.timeout_seconds = 1;

        let exec = supervisor(stub(&tmp, &format!("{}wait\n", SPAWNS_GRANDCHILD)))
            .run(&req, &CancellationToken::new())
            .await;

        assert_eq!(exec.result.status, TestStatus::Timeout);
        assert!(exec.cleanup_verified);
        assert_eq!(exec.result.error_message.as_deref(), Some("Test timed out after 1 seconds"));
        assert_reaped(&exec.result.process_ids);
        let spawned = grandchildren(&tmp);
        assert_eq!(spawned.len(), 2);
        assert_gone(&spawned);
    }

    #[tokio::test]
    async fn test_abort_kills_group_members() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(stub(&tmp, &format!("{}wait\n", SPAWNS_GRANDCHILD)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let exec = sup.run(&request("aborted_tree", 0), &cancel).await;
        assert_eq!(exec.result.status, TestStatus::Error);
        assert!(exec.cleanup_verified);
        assert_reaped(&exec.result.process_ids);
        let spawned = grandchildren(&tmp);
        assert_eq!(spawned.len(), exec.result.process_ids.len());
        assert_gone(&spawned);
    }

    #[test]
    fn test_parse_stat() {
        assert_eq!(parse_stat("4242 (perf_test) S 1 4242 4242 0 -1"), Some(('S', 4242)));
        assert_eq!(parse_stat("77 (a (b) c) Z 1 70 70 0"), Some(('Z', 70)));
        assert_eq!(parse_stat("garbage"), None);
    }

    #[test]
    fn test_zombie_only_group_is_not_alive() {
        use std::os::unix::process::CommandExt;

        let mut child = std::process::Command::new("true").process_group(0).spawn().unwrap();
        let pid = child.id() as i32;
        let stat_path = format!("/proc/{}/stat", pid);
        for _ in 0..200 {
            let state = fs::read_to_string(&stat_path).ok().and_then(|s| parse_stat(&s));
            if matches!(state, Some(('Z', _))) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(killpg(Pid::from_raw(pid), None).is_ok());
        assert_eq!(live_group_members(pid), Some(vec![]));
        child.wait().unwrap();
    }
}
