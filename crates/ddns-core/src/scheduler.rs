//! Scheduler
//!
//! Owns one periodic timer per enabled domain and the global
//! `Stopped`/`Running` state. All timer state lives inside a single actor
//! task; the rest of the engine talks to it through [`Scheduler`], which only
//! posts commands.
//!
//! ## Architecture
//!
//! ```text
//!  Scheduler (handle) ── Command ──► actor task ──┬── timer(domain a) ──┐
//!                                        │        ├── timer(domain b) ──┼──► UpdateOrchestrator
//!                                        │        └── timer(domain c) ──┘
//!                                        ▼
//!                                    LogSink
//! ```
//!
//! ## Timers
//!
//! Each timer is a task driving a `tokio::time::interval` whose first tick
//! fires immediately. Cancellation is a oneshot checked between ticks only,
//! so a run that already started always completes.
//!
//! ## Stop
//!
//! `Stop` signals every timer, then awaits every timer task before replying.
//! Timers retired by `Remove`/`Reschedule` are signalled immediately and
//! awaited by the next `Stop`.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::logs::EngineEvent;
use crate::model::{Domain, SchedulerStatus};
use crate::orchestrator::UpdateOrchestrator;
use crate::registry::DomainRegistry;
use crate::traits::LogSink;

/// Commands accepted by the scheduler actor
#[derive(Debug)]
enum Command {
    Start(oneshot::Sender<SchedulerStatus>),
    Stop(oneshot::Sender<SchedulerStatus>),
    /// Re-read one domain and replace or cancel its timer
    Reschedule(String),
    /// Cancel one domain's timer
    Remove(String),
    Status(oneshot::Sender<SchedulerStatus>),
}

/// Handle to the scheduler actor
///
/// Cheap to clone. When the last handle is dropped the actor stops every
/// timer, drains them, and exits.
#[derive(Debug, Clone)]
pub struct Scheduler {
    tx: mpsc::Sender<Command>,
}

impl Scheduler {
    /// Spawn the actor on the current runtime
    ///
    /// # Parameters
    ///
    /// - `registry`: Source of truth for which domains are enabled
    /// - `orchestrator`: Executes each tick
    /// - `sink`: Receives scheduler events
    /// - `capacity`: Command channel capacity
    pub fn spawn(
        registry: Arc<DomainRegistry>,
        orchestrator: Arc<UpdateOrchestrator>,
        sink: Arc<dyn LogSink>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let actor = SchedulerActor {
            rx,
            registry,
            orchestrator,
            sink,
            running: false,
            timers: HashMap::new(),
            retired: Vec::new(),
        };
        tokio::spawn(actor.run());
        Self { tx }
    }

    /// Transition to `Running`; a no-op when already running
    pub async fn start(&self) -> Result<SchedulerStatus> {
        self.request(Command::Start).await
    }

    /// Transition to `Stopped`, returning once every in-flight run has finished
    pub async fn stop(&self) -> Result<SchedulerStatus> {
        self.request(Command::Stop).await
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        self.request(Command::Status).await
    }

    /// Re-evaluate the timer of `domain_id` after a configuration edit
    pub async fn reschedule(&self, domain_id: &str) -> Result<()> {
        self.post(Command::Reschedule(domain_id.to_string())).await
    }

    /// Cancel the timer of `domain_id`
    pub async fn remove(&self, domain_id: &str) -> Result<()> {
        self.post(Command::Remove(domain_id.to_string())).await
    }

    async fn post(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| actor_gone())
    }

    async fn request<F>(&self, make: F) -> Result<SchedulerStatus>
    where
        F: FnOnce(oneshot::Sender<SchedulerStatus>) -> Command,
    {
        let (reply, rx) = oneshot::channel();
        self.post(make(reply)).await?;
        rx.await.map_err(|_| actor_gone())
    }
}

fn actor_gone() -> Error {
    Error::Other("scheduler task has exited".to_string())
}

struct Timer {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct SchedulerActor {
    rx: mpsc::Receiver<Command>,
    registry: Arc<DomainRegistry>,
    orchestrator: Arc<UpdateOrchestrator>,
    sink: Arc<dyn LogSink>,
    running: bool,
    timers: HashMap<String, Timer>,
    /// Signalled timers that may still be finishing a run
    retired: Vec<JoinHandle<()>>,
}

impl SchedulerActor {
    async fn run(mut self) {
        debug!("Scheduler actor started");
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Start(reply) => {
                    self.start().await;
                    let _ = reply.send(self.status());
                }
                Command::Stop(reply) => {
                    self.stop().await;
                    let _ = reply.send(self.status());
                }
                Command::Reschedule(id) => self.reschedule(&id).await,
                Command::Remove(id) => self.remove(&id, "deleted"),
                Command::Status(reply) => {
                    let _ = reply.send(self.status());
                }
            }
        }

        if self.running {
            info!("Scheduler handle dropped, stopping timers");
            self.stop().await;
        }
        debug!("Scheduler actor exited");
    }

    async fn start(&mut self) {
        if self.running {
            debug!("Scheduler already running");
            return;
        }
        self.running = true;

        for domain in self.registry.enabled().await {
            self.schedule(&domain);
        }

        let active_tasks = self.timers.len();
        info!(active_tasks, "Scheduler started");
        self.sink.emit(EngineEvent::SchedulerStarted { active_tasks });
    }

    async fn stop(&mut self) {
        if !self.running {
            debug!("Scheduler already stopped");
            return;
        }
        self.running = false;

        let mut handles = std::mem::take(&mut self.retired);
        for (_, timer) in self.timers.drain() {
            let _ = timer.cancel.send(());
            handles.push(timer.handle);
        }

        let drained = handles.len();
        debug!(drained, "Waiting for timers to finish");
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Timer task failed: {}", e);
            }
        }

        info!(drained, "Scheduler stopped");
        self.sink.emit(EngineEvent::SchedulerStopped { drained });
    }

    async fn reschedule(&mut self, id: &str) {
        if !self.running {
            return;
        }
        match self.registry.get(id).await {
            Some(domain) if domain.enabled => {
                self.retire(id);
                self.schedule(&domain);
            }
            Some(_) => self.remove(id, "disabled"),
            None => self.remove(id, "deleted"),
        }
    }

    fn remove(&mut self, id: &str, reason: &str) {
        if self.retire(id) {
            debug!(domain_id = id, reason, "Timer cancelled");
            self.sink.emit(EngineEvent::DomainUnscheduled {
                domain_id: id.to_string(),
                reason: reason.to_string(),
            });
        }
    }

    /// Signal the timer of `id` without waiting for it
    fn retire(&mut self, id: &str) -> bool {
        self.retired.retain(|h| !h.is_finished());
        match self.timers.remove(id) {
            Some(timer) => {
                let _ = timer.cancel.send(());
                self.retired.push(timer.handle);
                true
            }
            None => false,
        }
    }

    fn schedule(&mut self, domain: &Domain) {
        let (cancel, cancelled) = oneshot::channel();
        let handle = tokio::spawn(run_timer(
            domain.id.clone(),
            domain.update_interval,
            self.registry.clone(),
            self.orchestrator.clone(),
            cancelled,
        ));
        self.timers.insert(domain.id.clone(), Timer { cancel, handle });

        debug!(domain_id = %domain.id, interval = domain.update_interval, "Timer created");
        self.sink.emit(EngineEvent::DomainScheduled {
            domain_id: domain.id.clone(),
            fqdn: domain.fqdn(),
            interval_secs: domain.update_interval,
        });
    }

    fn status(&mut self) -> SchedulerStatus {
        self.timers.retain(|_, t| !t.handle.is_finished());
        SchedulerStatus {
            running: self.running,
            active_tasks: if self.running { self.timers.len() } else { 0 },
        }
    }
}

async fn run_timer(
    domain_id: String,
    interval_secs: u64,
    registry: Arc<DomainRegistry>,
    orchestrator: Arc<UpdateOrchestrator>,
    mut cancelled: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut cancelled => break,
            _ = ticker.tick() => {}
        }

        match registry.get(&domain_id).await {
            Some(d) if d.enabled => {}
            _ => {
                debug!(domain_id, "Domain gone or disabled, timer exiting");
                break;
            }
        }

        let outcome = orchestrator.run_id(&domain_id, false).await;
        if let Some(kind) = outcome.error {
            warn!(domain_id, %kind, "Scheduled update failed, next tick retries");
        }
    }
}
