//! Supervision of the core executable as a child process
//!
//! The core is started as `<exe> "" <config_path>` with stdout and stderr
//! joined into one pipe. A dedicated reader thread turns the pipe into
//! [`LogEntry`] values and fans them out to registered observers. At most one
//! core runs per supervisor.

use std::io::{BufRead, BufReader, PipeReader};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::{STOP_POLL_INTERVAL, STOP_TIMEOUT};
use crate::data_structures::{LogEntry, SupervisorState, SupervisorStatus};
use crate::error::{CompanionError, Result};
use crate::log_parser;
use crate::system_info::PlatformProfile;

/// Receives every classified line; an `Err` is logged and otherwise ignored
pub type LogObserver = Arc<dyn Fn(&LogEntry) -> std::result::Result<(), String> + Send + Sync>;

/// Handle returned by [`CoreSupervisor::add_observer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ObserverId(u64);

struct Shared {
    state: Mutex<SupervisorState>,
    child: Mutex<Option<Child>>,
    running: AtomicBool,
    observers: Mutex<Vec<(ObserverId, LogObserver)>>,
    next_observer: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn child(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observers(&self) -> MutexGuard<'_, Vec<(ObserverId, LogObserver)>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SupervisorState) {
        let mut state = self.state();
        if *state != next {
            debug!("Supervisor state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// Invoke observers on a snapshot so they may register or remove others
    fn dispatch(&self, entry: &LogEntry) {
        let snapshot: Vec<(ObserverId, LogObserver)> = self.observers().clone();
        for (id, observer) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| observer(entry))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Log observer {:?} failed: {}", id, e),
                Err(_) => error!("Log observer {:?} panicked", id),
            }
        }
    }

    fn on_output_closed(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut state = self.state();
        if matches!(*state, SupervisorState::Stopping | SupervisorState::Stopped) {
            debug!("Core output closed during shutdown");
            return;
        }

        *state = SupervisorState::Failed;
        let mut slot = self.child();
        match slot.take() {
            Some(mut child) => match child.try_wait() {
                Ok(Some(status)) => warn!("Core exited unexpectedly: {}", status),
                Ok(None) => match child.wait() {
                    Ok(status) => warn!("Core closed its output and exited: {}", status),
                    Err(e) => error!("Failed to reap core process: {}", e),
                },
                Err(e) => error!("Failed to reap core process: {}", e),
            },
            None => warn!("Core output closed without a process handle"),
        }
    }
}

fn read_output(shared: Arc<Shared>, pipe: PipeReader) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                let entry = log_parser::parse_line(&String::from_utf8_lossy(&buf));
                if !entry.text.is_empty() {
                    shared.dispatch(&entry);
                }
            }
            Err(e) => {
                error!("Failed to read core output: {}", e);
                break;
            }
        }
    }
    shared.on_output_closed();
}

pub struct CoreSupervisor {
    profile: PlatformProfile,
    shared: Arc<Shared>,
}

impl CoreSupervisor {
    pub fn new(profile: PlatformProfile) -> Self {
        Self {
            profile,
            shared: Arc::new(Shared {
                state: Mutex::new(SupervisorState::Stopped),
                child: Mutex::new(None),
                running: AtomicBool::new(false),
                observers: Mutex::new(Vec::new()),
                next_observer: AtomicU64::new(1),
            }),
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Start the core; `false` when it is already running or cannot be spawned
    pub fn start(&self, config_path: &Path, resources_dir: &Path) -> bool {
        match self.try_start(config_path, resources_dir) {
            Ok(pid) => {
                info!("Core started with pid {}", pid);
                true
            }
            Err(CompanionError::AlreadyRunning) => {
                warn!("Core is already running, start ignored");
                false
            }
            Err(e) => {
                error!("Failed to start core: {}", e);
                false
            }
        }
    }

    /// Spawn the core and its reader thread, returning the child pid
    pub fn try_start(&self, config_path: &Path, resources_dir: &Path) -> Result<u32> {
        {
            // lock order everywhere: state, then child
            let mut state = self.shared.state();
            let slot = self.shared.child();
            let busy = matches!(*state, SupervisorState::Starting | SupervisorState::Stopping);
            if busy || self.is_running() || slot.is_some() {
                return Err(CompanionError::AlreadyRunning);
            }
            *state = SupervisorState::Starting;
        }

        match self.spawn_core(config_path, resources_dir) {
            Ok((child, pipe)) => {
                let pid = child.id();
                *self.shared.child() = Some(child);
                self.shared.running.store(true, Ordering::SeqCst);
                self.shared.set_state(SupervisorState::Running);

                let shared = Arc::clone(&self.shared);
                let spawned = thread::Builder::new()
                    .name("core-output".to_string())
                    .spawn(move || read_output(shared, pipe));
                if let Err(e) = spawned {
                    error!("Failed to start core output reader: {}", e);
                    self.abandon_child();
                    return Err(e.into());
                }
                Ok(pid)
            }
            Err(e) => {
                self.shared.set_state(SupervisorState::Failed);
                Err(e)
            }
        }
    }

    fn spawn_core(&self, config_path: &Path, resources_dir: &Path) -> Result<(Child, PipeReader)> {
        let core = self.profile.core_info(resources_dir);
        if !core.exists {
            return Err(CompanionError::CoreMissing(core.absolute_path));
        }
        if !config_path.is_file() {
            return Err(CompanionError::ConfigMissing(config_path.to_path_buf()));
        }

        let (reader, writer) = std::io::pipe()?;
        let mut command = Command::new(&core.absolute_path);
        command
            .arg("")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(0x08000000); // CREATE_NO_WINDOW
        }

        debug!("Spawning {} with config {}", core.absolute_path.display(), config_path.display());
        let child = command.spawn()?;
        // the command still holds our copies of the write end
        drop(command);
        Ok((child, reader))
    }

    fn abandon_child(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.shared.child().take() {
            if let Err(e) = child.kill().and_then(|_| child.wait()) {
                error!("Failed to clean up core process: {}", e);
            }
        }
        self.shared.set_state(SupervisorState::Failed);
    }

    /// Ask the core to exit; `false` when it is not running or ignores the request
    pub fn stop(&self) -> bool {
        match self.try_stop() {
            Ok(()) => true,
            Err(CompanionError::NotRunning) => {
                warn!("Core is not running, stop ignored");
                false
            }
            Err(e) => {
                error!("Failed to stop core: {}", e);
                false
            }
        }
    }

    /// Terminate the core and wait for it to exit.
    ///
    /// A core still alive after the timeout keeps its handle and stays
    /// `Running`; it is never killed forcibly.
    pub fn try_stop(&self) -> Result<()> {
        {
            let mut state = self.shared.state();
            if *state != SupervisorState::Running || !self.is_running() {
                return Err(CompanionError::NotRunning);
            }
            *state = SupervisorState::Stopping;
        }

        // child lock is taken per call, never across the wait
        let terminated = {
            let mut slot = self.shared.child();
            slot.as_mut().map(|child| {
                info!("Stopping core (pid {})", child.id());
                send_terminate(child)
            })
        };
        match terminated {
            None => {
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.set_state(SupervisorState::Stopped);
                return Err(CompanionError::NotRunning);
            }
            Some(Err(e)) => {
                self.shared.set_state(SupervisorState::Running);
                return Err(e);
            }
            Some(Ok(())) => {}
        }

        let deadline = Instant::now() + STOP_TIMEOUT;
        loop {
            let polled = self.shared.child().as_mut().map(Child::try_wait);
            match polled {
                Some(Ok(Some(status))) => {
                    info!("Core exited: {}", status);
                    break;
                }
                Some(Ok(None)) if Instant::now() >= deadline => {
                    self.shared.set_state(SupervisorState::Running);
                    return Err(CompanionError::StopTimeout(STOP_TIMEOUT));
                }
                Some(Ok(None)) => thread::sleep(STOP_POLL_INTERVAL),
                Some(Err(e)) => {
                    error!("Failed to query core exit status: {}", e);
                    break;
                }
                None => break,
            }
        }

        self.shared.child().take();
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.set_state(SupervisorState::Stopped);
        Ok(())
    }

    pub fn add_observer(&self, observer: LogObserver) -> ObserverId {
        let id = ObserverId(self.shared.next_observer.fetch_add(1, Ordering::SeqCst));
        self.shared.observers().push((id, observer));
        debug!("Registered log observer {:?}", id);
        id
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.shared.observers();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        before != observers.len()
    }

    pub fn clear_observers(&self) {
        self.shared.observers().clear();
    }

    /// Observer that forwards entries into async code
    pub fn channel_observer(&self) -> (ObserverId, mpsc::UnboundedReceiver<LogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.add_observer(Arc::new(move |entry: &LogEntry| {
            tx.send(entry.clone()).map_err(|_| "log receiver closed".to_string())
        }));
        (id, rx)
    }

    pub fn status(&self) -> SupervisorStatus {
        let state = self.state();
        let slot = self.shared.child();
        SupervisorStatus {
            is_running: self.is_running(),
            has_process_handle: slot.is_some(),
            observer_count: self.shared.observers().len(),
            state,
            pid: slot.as_ref().map(Child::id),
        }
    }
}

impl Drop for CoreSupervisor {
    fn drop(&mut self) {
        if self.state() == SupervisorState::Running {
            self.stop();
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM)
        .map_err(|errno| CompanionError::Io(errno.into()))
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> Result<()> {
    child.kill()?;
    Ok(())
}
