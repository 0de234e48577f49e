//! One renderer process per deck: spawn on demand, reuse while alive, reclaim on exit.

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use futures::future::join_all;
use metrics::{counter, gauge};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::{
    process::Child,
    sync::{Mutex as AsyncMutex, OwnedMutexGuard, oneshot, watch},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::domain::DeckId;

use super::{
    invocation::{RendererCommand, RendererInvocation},
    output::{OutputTail, SharedStdin, watch_stream},
    paths::PublicPaths,
    ports::{PortError, PortLease, PortLedger},
    readiness::ReadinessProbe,
};

const STDERR_DRAIN: Duration = Duration::from_millis(250);
const EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("renderer source `{}` not found", path.display())]
    SourceNotFound { path: PathBuf },
    #[error(transparent)]
    NoAvailablePort(#[from] PortError),
    #[error("failed to spawn renderer `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("renderer for deck {deck_id} did not become ready: {cause}")]
    RendererStartTimeout { deck_id: DeckId, cause: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TerminateError {
    #[error("renderer watcher for deck {deck_id} is no longer running")]
    WatcherGone { deck_id: DeckId },
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub port_start: u16,
    pub ready_timeout: Duration,
    pub paths: PublicPaths,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            port_start: 3030,
            ready_timeout: Duration::from_secs(30),
            paths: PublicPaths::default(),
        }
    }
}

/// Snapshot of a live renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningRenderer {
    pub deck_id: DeckId,
    pub port: u16,
    pub pid: Option<u32>,
    pub started_at: OffsetDateTime,
}

/// A live renderer process. The `Child` itself is owned by the watcher task;
/// the handle keeps the port lease and the channel asking the watcher to kill it.
#[derive(Debug)]
pub struct DeckProcessHandle {
    deck_id: DeckId,
    pid: Option<u32>,
    started_at: OffsetDateTime,
    generation: u64,
    lease: PortLease,
    terminate: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<Option<String>>,
}

impl DeckProcessHandle {
    pub fn port(&self) -> u16 {
        self.lease.port()
    }

    /// Ask the watcher to kill the process.
    pub fn terminate(&mut self) -> Result<(), TerminateError> {
        let deck_id = self.deck_id;
        self.terminate
            .take()
            .ok_or(TerminateError::WatcherGone { deck_id })?
            .send(())
            .map_err(|_| TerminateError::WatcherGone { deck_id })
    }

    fn snapshot(&self) -> RunningRenderer {
        RunningRenderer {
            deck_id: self.deck_id,
            port: self.port(),
            pid: self.pid,
            started_at: self.started_at,
        }
    }
}

impl Drop for DeckProcessHandle {
    fn drop(&mut self) {
        gauge!("deckhand_renderer_live").decrement(1.0);
    }
}

type Slot = Arc<AsyncMutex<Option<DeckProcessHandle>>>;
type SlotMap = Arc<DashMap<DeckId, Slot>>;

#[derive(Clone)]
pub struct RendererSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    slots: SlotMap,
    ports: PortLedger,
    invocation: RendererInvocation,
    readiness: Arc<dyn ReadinessProbe>,
    config: SupervisorConfig,
    generation: AtomicU64,
}

impl RendererSupervisor {
    pub fn new(
        ports: PortLedger,
        invocation: RendererInvocation,
        readiness: Arc<dyn ReadinessProbe>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                slots: SlotMap::default(),
                ports,
                invocation,
                readiness,
                config,
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn ports(&self) -> &PortLedger {
        &self.inner.ports
    }

    pub fn paths(&self) -> &PublicPaths {
        &self.inner.config.paths
    }

    /// Return the port of the deck's renderer, spawning it first when none is running.
    pub async fn start_renderer(
        &self,
        deck_id: DeckId,
        entry_file: &Path,
    ) -> Result<u16, SupervisorError> {
        let (slot, guard) = self.lock_slot(deck_id).await;
        let result = self.start_in_slot(deck_id, entry_file, &slot, guard).await;
        if result.is_err() {
            release_idle_slot(&self.inner.slots, deck_id, slot);
        }
        result
    }

    async fn start_in_slot(
        &self,
        deck_id: DeckId,
        entry_file: &Path,
        slot: &Slot,
        mut guard: OwnedMutexGuard<Option<DeckProcessHandle>>,
    ) -> Result<u16, SupervisorError> {
        let started_at = Instant::now();
        if let Some(handle) = guard.as_ref() {
            debug!(
                target = "runtime::supervisor",
                op = "start_renderer",
                result = "reused",
                deck_id = %deck_id,
                port = handle.port(),
                "Renderer already running"
            );
            return Ok(handle.port());
        }

        if !tokio::fs::try_exists(entry_file).await.unwrap_or(false) {
            return Err(SupervisorError::SourceNotFound {
                path: entry_file.to_path_buf(),
            });
        }

        let lease = self.inner.ports.allocate(self.inner.config.port_start)?;
        let port = lease.port();
        let base = self.inner.config.paths.preview_base(deck_id);
        let RendererCommand {
            mut command,
            program,
            source,
        } = self.inner.invocation.preview_command(entry_file, port, &base);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // own process group, so package-runner wrappers die together with the server they start
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|err| {
            warn!(
                target = "runtime::supervisor",
                op = "start_renderer",
                result = "error",
                error_code = "spawn",
                deck_id = %deck_id,
                program = %program,
                binary_source = %source,
                error = %err,
                "Failed to spawn renderer"
            );
            SupervisorError::Spawn {
                program: program.clone(),
                source: err,
            }
        })?;
        let pid = child.id();

        let stdin: SharedStdin = Arc::new(AsyncMutex::new(child.stdin.take()));
        let tail = OutputTail::new();
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| watch_stream(deck_id, "stderr", stderr, Arc::clone(&stdin), Some(tail.clone())));
        if let Some(stdout) = child.stdout.take() {
            watch_stream(deck_id, "stdout", stdout, Arc::clone(&stdin), None);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (terminate_tx, terminate_rx) = oneshot::channel();
        let (exit_tx, mut exit_rx) = watch::channel(None);
        tokio::spawn(watch_process(
            deck_id,
            generation,
            child,
            terminate_rx,
            exit_tx,
            Arc::clone(slot),
            Arc::clone(&self.inner.slots),
        ));

        *guard = Some(DeckProcessHandle {
            deck_id,
            pid,
            started_at: OffsetDateTime::now_utc(),
            generation,
            lease,
            terminate: Some(terminate_tx),
            exited: exit_rx.clone(),
        });
        counter!("deckhand_renderer_spawn_total").increment(1);
        gauge!("deckhand_renderer_live").increment(1.0);

        let ready = tokio::select! {
            result = self.inner.readiness.wait_until_ready(port, self.inner.config.ready_timeout) => {
                result.map_err(|err| err.to_string())
            }
            exit = exit_rx.wait_for(Option::is_some) => {
                let status = match exit {
                    Ok(status) => status.clone().unwrap_or_default(),
                    Err(_) => String::from("watcher stopped"),
                };
                Err(format!("renderer exited before becoming ready ({status})"))
            }
        };

        match ready {
            Ok(()) => {
                info!(
                    target = "runtime::supervisor",
                    op = "start_renderer",
                    result = "spawned",
                    deck_id = %deck_id,
                    port,
                    pid = pid.unwrap_or_default(),
                    program = %program,
                    binary_source = %source,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Renderer ready"
                );
                Ok(port)
            }
            Err(message) => {
                if let Some(mut handle) = guard.take() {
                    let _ = handle.terminate();
                }
                drop(guard);

                if let Some(task) = stderr_task {
                    let _ = timeout(STDERR_DRAIN, task).await;
                }
                let stderr = tail.snapshot();
                let cause = if stderr.is_empty() {
                    message
                } else {
                    format!("{message}; stderr: {stderr}")
                };
                warn!(
                    target = "runtime::supervisor",
                    op = "start_renderer",
                    result = "error",
                    error_code = "not_ready",
                    deck_id = %deck_id,
                    port,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    cause = %cause,
                    "Renderer failed to become ready"
                );
                Err(SupervisorError::RendererStartTimeout { deck_id, cause })
            }
        }
    }

    pub async fn port_of(&self, deck_id: DeckId) -> Option<u16> {
        let slot = self.inner.slots.get(&deck_id).map(|entry| Arc::clone(entry.value()))?;
        let guard = slot.lock().await;
        guard.as_ref().map(DeckProcessHandle::port)
    }

    pub async fn running_decks(&self) -> Vec<RunningRenderer> {
        let mut running = Vec::new();
        for slot in self.collect_slots() {
            if let Some(handle) = slot.1.lock().await.as_ref() {
                running.push(handle.snapshot());
            }
        }
        running.sort_by_key(|renderer| renderer.deck_id);
        running
    }

    /// Terminate every tracked renderer and forget all handles.
    ///
    /// Termination failures are logged; the handle is dropped regardless, which
    /// releases its port.
    pub async fn kill_all(&self) -> usize {
        let started_at = Instant::now();
        let deck_ids: Vec<DeckId> = self.inner.slots.iter().map(|entry| *entry.key()).collect();

        let mut terminated = 0;
        let mut exits = Vec::new();
        for deck_id in deck_ids {
            let Some((_, slot)) = self.inner.slots.remove(&deck_id) else {
                continue;
            };
            let Some(mut handle) = slot.lock().await.take() else {
                continue;
            };
            match handle.terminate() {
                Ok(()) => {
                    terminated += 1;
                    exits.push(handle.exited.clone());
                }
                Err(err) => warn!(
                    target = "runtime::supervisor",
                    op = "kill_all",
                    result = "error",
                    deck_id = %deck_id,
                    port = handle.port(),
                    error = %err,
                    "Failed to terminate renderer"
                ),
            }
        }

        join_all(exits.into_iter().map(|mut exited| async move {
            let _ = timeout(EXIT_GRACE, exited.wait_for(Option::is_some)).await;
        }))
        .await;

        info!(
            target = "runtime::supervisor",
            op = "kill_all",
            result = "ok",
            terminated,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Renderer processes terminated"
        );
        terminated
    }

    fn slot(&self, deck_id: DeckId) -> Slot {
        Arc::clone(self.inner.slots.entry(deck_id).or_default().value())
    }

    /// Lock the deck's slot, retrying when `kill_all` detached it while we waited.
    async fn lock_slot(&self, deck_id: DeckId) -> (Slot, OwnedMutexGuard<Option<DeckProcessHandle>>) {
        loop {
            let slot = self.slot(deck_id);
            let guard = Arc::clone(&slot).lock_owned().await;
            let attached = self
                .inner
                .slots
                .get(&deck_id)
                .is_some_and(|entry| Arc::ptr_eq(entry.value(), &slot));
            if attached {
                return (slot, guard);
            }
        }
    }

    fn collect_slots(&self) -> Vec<(DeckId, Slot)> {
        self.inner
            .slots
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.inner.slots.len()
    }

    #[cfg(test)]
    async fn install_handle(&self, handle: DeckProcessHandle) {
        let slot = self.slot(handle.deck_id);
        gauge!("deckhand_renderer_live").increment(1.0);
        *slot.lock().await = Some(handle);
    }
}

/// Drop the deck's slot once nothing but the map and `slot` refer to it and it is empty.
fn release_idle_slot(slots: &SlotMap, deck_id: DeckId, slot: Slot) {
    slots.remove_if(&deck_id, |_, current| {
        Arc::ptr_eq(current, &slot)
            && Arc::strong_count(current) == 2
            && current.try_lock().is_ok_and(|handle| handle.is_none())
    });
}

/// The renderer's process group. Dropping it kills whatever is left of the group, which
/// also covers the watcher being torn down together with the runtime.
struct ProcessGroup {
    deck_id: DeckId,
    leader: Option<u32>,
}

impl ProcessGroup {
    /// Returns whether the group was signalled.
    fn kill(&self) -> io::Result<bool> {
        match self.leader {
            Some(pid) => kill_process_group(pid),
            None => Ok(false),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Err(err) = self.kill() {
            debug!(
                target = "runtime::supervisor",
                op = "reap_group",
                result = "error",
                deck_id = %self.deck_id,
                error = %err,
                "Failed to clean up renderer process group"
            );
        }
    }
}

#[cfg(unix)]
fn kill_process_group(leader: u32) -> io::Result<bool> {
    use nix::{
        errno::Errno,
        sys::signal::{Signal, killpg},
        unistd::Pid,
    };

    #[allow(clippy::cast_possible_wrap)]
    let group = Pid::from_raw(leader as i32);
    match killpg(group, Signal::SIGKILL) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_leader: u32) -> io::Result<bool> {
    Ok(false)
}

/// Own the child until it exits, then drop its handle if it is still the current one.
async fn watch_process(
    deck_id: DeckId,
    generation: u64,
    mut child: Child,
    mut terminate_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<String>>,
    slot: Slot,
    slots: SlotMap,
) {
    let group = ProcessGroup {
        deck_id,
        leader: child.id(),
    };
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        // a dropped handle counts as a termination request
        _ = &mut terminate_rx => None,
    };
    let status = match exited {
        Some(status) => status,
        None => {
            let signalled = match group.kill() {
                Ok(signalled) => signalled,
                Err(err) => {
                    warn!(
                        target = "runtime::supervisor",
                        op = "terminate",
                        result = "error",
                        deck_id = %deck_id,
                        error = %err,
                        "Failed to signal renderer process group"
                    );
                    false
                }
            };
            if !signalled {
                if let Err(err) = child.start_kill() {
                    warn!(
                        target = "runtime::supervisor",
                        op = "terminate",
                        result = "error",
                        deck_id = %deck_id,
                        error = %err,
                        "Failed to signal renderer"
                    );
                }
            }
            child.wait().await
        }
    };
    // stragglers the leader left behind
    drop(group);

    let description = match &status {
        Ok(status) => status.to_string(),
        Err(err) => format!("wait failed: {err}"),
    };
    let result = match &status {
        Ok(status) if status.success() => "success",
        Ok(_) => "failure",
        Err(_) => "error",
    };
    info!(
        target = "runtime::supervisor",
        op = "process_exit",
        result,
        deck_id = %deck_id,
        generation,
        status = %description,
        "Renderer exited"
    );
    counter!("deckhand_renderer_exit_total", "result" => result).increment(1);
    exit_tx.send_replace(Some(description));

    let mut guard = slot.lock().await;
    if guard
        .as_ref()
        .is_some_and(|handle| handle.generation == generation)
    {
        guard.take();
    }
    drop(guard);
    release_idle_slot(&slots, deck_id, slot);
}
