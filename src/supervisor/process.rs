use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ManagerConfig, ProcessPriority};
use crate::error::ManagerError;

use super::exit::ExitStatus;
use super::tree::kill_tree;

const OUTPUT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Address and key handed to one launch of the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchParams {
    pub gui_address: String,
    pub api_key: String,
}

/// Produces the launch parameters right before every spawn.
pub type LaunchHook = Arc<dyn Fn() -> Result<LaunchParams, ManagerError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// About to spawn with these parameters.
    Starting(LaunchParams),
    /// One line of stdout or stderr.
    Output(String),
    /// Exited with a restart code; a relaunch follows.
    Restarted,
    /// Exited for good.
    Stopped(ExitStatus),
    /// A relaunch after a restart exit could not be spawned.
    LaunchFailed(String),
}

/// Everything about a launch that does not change between restarts.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub home: Option<String>,
    pub extra_flags: Vec<String>,
    pub extra_env: BTreeMap<String, String>,
    pub deny_upgrade: bool,
    pub priority: ProcessPriority,
    pub debug_facilities: Vec<String>,
}

impl LaunchSpec {
    pub fn from_config(config: &ManagerConfig) -> Result<Self, ManagerError> {
        Ok(Self {
            executable: config.resolved_syncthing_path()?,
            home: config
                .syncthing_home
                .clone()
                .filter(|home| !home.trim().is_empty()),
            extra_flags: config.extra_flags.clone(),
            extra_env: config.extra_env.clone(),
            deny_upgrade: config.deny_upgrade,
            priority: config.priority,
            debug_facilities: config.debug_facilities.clone(),
        })
    }

    pub fn args(&self, params: &LaunchParams) -> Vec<String> {
        let mut args = vec![
            "--no-browser".to_string(),
            "--no-restart".to_string(),
            format!("--gui-address={}", params.gui_address),
            format!("--gui-apikey={}", params.api_key),
        ];
        if let Some(home) = &self.home {
            args.push(format!("--home={home}"));
        }
        args.extend(self.extra_flags.iter().cloned());
        args
    }

    pub fn env(&self, params: &LaunchParams) -> BTreeMap<String, String> {
        let mut env = self.extra_env.clone();
        env.insert("STGUIAPIKEY".to_string(), params.api_key.clone());
        env.insert("STGUIADDRESS".to_string(), params.gui_address.clone());
        env.insert("STNORESTART".to_string(), "1".to_string());
        if self.deny_upgrade {
            env.insert("STNOUPGRADE".to_string(), "1".to_string());
        }
        if !self.debug_facilities.is_empty() {
            env.insert("STTRACE".to_string(), self.debug_facilities.join(","));
        }
        env
    }

    fn command(&self, params: &LaunchParams) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .args(self.args(params))
            .envs(self.env(params))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            command.process_group(0);
            let nice = self.priority.nice_value();
            if nice != 0 {
                // SAFETY: setpriority is async-signal-safe and touches no
                // parent state. Failing to renice is not fatal.
                unsafe {
                    command.pre_exec(move || {
                        libc::setpriority(libc::PRIO_PROCESS, 0, nice);
                        Ok(())
                    });
                }
            }
        }
        command
    }
}

struct RunningProcess {
    seq: u64,
    pid: Option<u32>,
    kill: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    process: Option<RunningProcess>,
    /// Cleared by `kill`; a restart exit only relaunches while set.
    wanted: bool,
}

struct Inner {
    spec: LaunchSpec,
    hook: LaunchHook,
    events: mpsc::UnboundedSender<ProcessEvent>,
    slot: Mutex<Slot>,
    next_seq: AtomicU64,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ProcessEvent) {
        let _ = self.events.send(event);
    }

    /// Calls the hook and spawns a child into `slot`. `slot` must not hold a
    /// live process.
    fn launch(self: &Arc<Self>, slot: &mut Slot) -> Result<LaunchParams, ManagerError> {
        let params = (self.hook)()?;
        self.emit(ProcessEvent::Starting(params.clone()));

        let mut child = self
            .spec
            .command(&params)
            .spawn()
            .map_err(|source| ManagerError::Spawn {
                path: self.spec.executable.display().to_string(),
                source,
            })?;
        let pid = child.id();
        info!(pid, address = %params.gui_address, "Launched Syncthing");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, self.events.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, self.events.clone()));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let kill = CancellationToken::new();
        let task = tokio::spawn(supervise(Arc::clone(self), child, seq, kill.clone()));
        slot.process = Some(RunningProcess {
            seq,
            pid,
            kill,
            task,
        });
        Ok(params)
    }
}

/// Drains one output pipe until EOF. Bytes that are not UTF-8 are replaced;
/// the read end stays open for as long as the child can write to it.
async fn forward_lines<R>(stream: R, events: mpsc::UnboundedSender<ProcessEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                info!(target: "syncthing", "{line}");
                // Keep draining even with nobody listening.
                let _ = events.send(ProcessEvent::Output(line));
            }
            Err(err) => {
                warn!(error = %err, "Failed to read Syncthing output");
                tokio::time::sleep(OUTPUT_RETRY_DELAY).await;
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

async fn supervise(inner: Arc<Inner>, mut child: Child, seq: u64, kill: CancellationToken) {
    let pid = child.id();
    let status = tokio::select! {
        result = child.wait() => match result {
            Ok(status) => ExitStatus::from_std(status),
            Err(err) => {
                warn!(pid, error = %err, "Failed to wait for Syncthing");
                ExitStatus::Other(-1)
            }
        },
        _ = kill.cancelled() => {
            terminate(&mut child, pid).await;
            ExitStatus::Killed
        }
    };
    info!(pid, ?status, "Syncthing exited");

    let mut slot = inner.slot();
    if slot.process.as_ref().map(|p| p.seq) != Some(seq) {
        // Already detached by `kill`.
        drop(slot);
        inner.emit(ProcessEvent::Stopped(status));
        return;
    }
    slot.process = None;

    if status.is_restart() && slot.wanted {
        inner.emit(ProcessEvent::Restarted);
        match inner.launch(&mut slot) {
            Ok(_) => return,
            Err(err) => {
                warn!(error = %err, "Failed to relaunch Syncthing");
                slot.wanted = false;
                drop(slot);
                inner.emit(ProcessEvent::LaunchFailed(err.to_string()));
                return;
            }
        }
    }
    slot.wanted = false;
    drop(slot);
    inner.emit(ProcessEvent::Stopped(status));
}

async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        kill_tree(pid);
    }
    let _ = child.start_kill();
    if let Err(err) = child.wait().await {
        warn!(pid, error = %err, "Failed to reap killed Syncthing");
    }
}

/// Owns the daemon child process: launch, output capture, exit
/// classification, automatic relaunch on restart exits, and tree kill.
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(spec: LaunchSpec, hook: LaunchHook) -> (Self, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            spec,
            hook,
            events,
            slot: Mutex::new(Slot::default()),
            next_seq: AtomicU64::new(0),
        });
        (Self { inner }, rx)
    }

    /// Launches the daemon, killing any process still owned first.
    pub async fn start(&self) -> Result<LaunchParams, ManagerError> {
        self.kill().await;
        let mut slot = self.inner.slot();
        slot.wanted = true;
        let launched = self.inner.launch(&mut slot);
        if launched.is_err() {
            slot.wanted = false;
        }
        launched
    }

    /// Force-terminates the process tree and waits for it to be reaped.
    /// Safe to call at any time, any number of times.
    pub async fn kill(&self) {
        let process = {
            let mut slot = self.inner.slot();
            slot.wanted = false;
            slot.process.take()
        };
        if let Some(process) = process {
            debug!(pid = process.pid, "Killing Syncthing");
            process.kill.cancel();
            let _ = process.task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.slot().process.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.slot().process.as_ref().and_then(|p| p.pid)
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        let mut slot = self.inner.slot();
        slot.wanted = false;
        if let Some(process) = slot.process.take() {
            process.kill.cancel();
        }
    }
}
