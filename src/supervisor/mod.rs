/*!
 * Supervisor
 * Per-instance runtime: joins the registry, owns the reconciler and
 * listener threads, and fans rendered event notices out to the UI layer
 */

use crate::bus::listener::Listener;
use crate::bus::{EventHub, EventSink};
use crate::core::limits::SWEEP_INTERVAL;
use crate::core::types::Pid;
use crate::monitor::Reconciler;
use crate::process::types::TerminateError;
use crate::process::{control, LaunchResult, Launcher};
use crate::registry::{
    LeaveReport, ProcessEntry, ProcessMode, RegistryConfig, RegistryError, RegistryHandle,
    RegistryResult,
};
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Supervisor startup errors
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Background thread spawn failed: {0}")]
    Thread(#[source] std::io::Error),
}

/// Builder for a [`Supervisor`].
pub struct SupervisorBuilder {
    config: RegistryConfig,
    sweep_interval: Duration,
    sinks: Vec<EventSink>,
}

impl SupervisorBuilder {
    fn new() -> Self {
        Self {
            config: RegistryConfig::default(),
            sweep_interval: SWEEP_INTERVAL,
            sinks: Vec::new(),
        }
    }

    /// IPC namespace; instances sharing it cooperate on one registry.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Override the instance identity (defaults to this process's pid).
    #[must_use]
    pub fn instance_id(mut self, pid: Pid) -> Self {
        self.config.instance_id = Some(pid);
        self
    }

    /// How often the reconciler sweeps the registry.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Register a callback receiving rendered event notices
    /// ("Process 1234 terminated").
    #[must_use]
    pub fn on_event<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Join the registry and start the background threads.
    pub fn start(self) -> Result<Supervisor, SupervisorError> {
        let registry = Arc::new(RegistryHandle::join(self.config)?);
        let events = EventHub::new();
        for sink in self.sinks {
            events.subscribe(sink);
        }
        let stop = Arc::new(AtomicBool::new(false));

        let reconciler = Reconciler::new(
            Arc::clone(&registry),
            events.clone(),
            self.sweep_interval,
            Arc::clone(&stop),
        );
        let reconciler = thread::Builder::new()
            .name("warden-reconciler".into())
            .spawn(move || reconciler.run())
            .map_err(SupervisorError::Thread)?;

        let listener = Listener::new(Arc::clone(&registry), events.clone(), Arc::clone(&stop));
        let listener = thread::Builder::new()
            .name("warden-listener".into())
            .spawn(move || listener.run())
            .map_err(SupervisorError::Thread)?;

        let launcher = Launcher::new(Arc::clone(&registry));

        Ok(Supervisor {
            registry,
            launcher,
            events,
            stop,
            reconciler: Some(reconciler),
            listener: Some(listener),
        })
    }
}

/// One running instance of the supervisor.
///
/// Owns the registry handle and the two background threads. Shutdown is
/// cooperative: the stop flag is raised, both threads are joined at their
/// next cancellation point, and only then does the instance leave the
/// registry, so the system-wide lock is never abandoned mid-section.
pub struct Supervisor {
    registry: Arc<RegistryHandle>,
    launcher: Launcher,
    events: EventHub,
    stop: Arc<AtomicBool>,
    reconciler: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl Supervisor {
    #[must_use]
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    #[inline]
    #[must_use]
    pub fn instance_id(&self) -> Pid {
        self.registry.instance_id()
    }

    /// The underlying registry handle, for callers integrating their own
    /// event consumption.
    #[must_use]
    pub fn registry(&self) -> &Arc<RegistryHandle> {
        &self.registry
    }

    /// The local notice hub; late subscriptions are fine.
    #[must_use]
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Spawn and track a child process.
    pub fn launch(&self, command: &str, mode: ProcessMode) -> LaunchResult<Pid> {
        self.launcher.launch(command, mode)
    }

    /// Signal an arbitrary pid with SIGTERM (no ownership check).
    pub fn terminate(&self, pid: Pid) -> Result<(), TerminateError> {
        control::terminate(pid)
    }

    /// Snapshot of every tracked process, taken under the registry lock.
    pub fn processes(&self) -> RegistryResult<Vec<ProcessEntry>> {
        Ok(self.registry.lock()?.snapshot())
    }

    /// Number of currently joined instances.
    pub fn instance_count(&self) -> RegistryResult<u32> {
        Ok(self.registry.lock()?.instance_count())
    }

    /// Stop the background threads, then leave the registry.
    pub fn shutdown(&mut self) -> RegistryResult<LeaveReport> {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.reconciler.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }
        self.registry.leave()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.reconciler.is_some() || self.listener.is_some() {
            if let Err(e) = self.shutdown() {
                warn!("Supervisor shutdown on drop failed: {e}");
            }
        }
    }
}
