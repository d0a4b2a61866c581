//! Pass scheduling and mutual exclusion.
//!
//! [`SyncEngine`] is the only caller of the orchestrator. It gates every pass
//! on connectivity and on the single pass slot held in [`SyncStatus`], and
//! settles the status when the pass ends. [`SyncEngine::start`] runs the
//! background loop: a full pass on start, periodic full and critical passes,
//! a debounced catch-up pass after reconnecting, and manual triggers.
//!
//! Passes are cooperative: going offline or shutting down stops new passes
//! from starting but lets an in-flight pass run to completion.

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{PassReport, SyncOrchestrator};
use crate::registry::SyncScope;
use crate::state::SyncStatus;
use chartsync_types::Record;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Drives passes over a [`SyncContext`].
pub struct SyncEngine {
    ctx: Arc<SyncContext>,
    orchestrator: SyncOrchestrator,
}

/// Releases the pass slot if a pass unwinds before settling it.
struct PassSlot<'a> {
    status: &'a SyncStatus,
    settled: bool,
}

impl Drop for PassSlot<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.status.abort_sync("sync pass did not complete");
        }
    }
}

impl SyncEngine {
    /// Creates an engine over a context.
    pub fn new(ctx: Arc<SyncContext>) -> Arc<Self> {
        Arc::new(Self {
            orchestrator: SyncOrchestrator::new(ctx.clone()),
            ctx,
        })
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// The observable status.
    pub fn status(&self) -> &Arc<SyncStatus> {
        &self.ctx.status
    }

    /// Runs one pass now. Returns `None` without doing anything if the
    /// device is offline or another pass is in flight.
    pub async fn run_pass(&self, scope: SyncScope) -> Option<PassReport> {
        let status = &self.ctx.status;
        if !status.is_online() {
            debug!("Skipping {:?} pass: offline", scope);
            return None;
        }
        if !status.try_begin_sync() {
            debug!("Skipping {:?} pass: another pass is in flight", scope);
            return None;
        }
        let mut slot = PassSlot {
            status,
            settled: false,
        };

        let pending_at_start = status.pending_changes();
        let report = self.orchestrator.run(scope).await;

        match &report.aborted {
            Some(reason) => status.abort_sync(reason.clone()),
            None => {
                // Only a clean full push accounts for every pending write.
                let confirmed = if scope == SyncScope::Full && report.total_failed_batches() == 0 {
                    pending_at_start
                } else {
                    0
                };
                status.finish_sync(report.finished_at, report.last_error(), confirmed);
            }
        }
        slot.settled = true;
        Some(report)
    }

    /// Pushes one record to the remote store right away. Returns whether it
    /// was accepted.
    pub async fn upsert_record_immediate(&self, local: &str, record: &Record) -> bool {
        self.orchestrator.upsert_record_immediate(local, record).await
    }

    fn spawn_pass(self: &Arc<Self>, scope: SyncScope) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_pass(scope).await;
        });
    }

    fn spawn_manual(self: &Arc<Self>, scope: SyncScope, reply: PassReply) {
        let engine = self.clone();
        tokio::spawn(async move {
            // The requester may have given up waiting.
            let _ = reply.send(engine.run_pass(scope).await);
        });
    }

    /// Starts the background scheduler.
    ///
    /// `connectivity` carries the platform's online flag; its current value
    /// seeds [`SyncStatus`]. Must be called inside a Tokio runtime.
    pub fn start(self: &Arc<Self>, connectivity: watch::Receiver<bool>) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(self.clone().run_loop(connectivity, rx));
        SchedulerHandle { tx, task }
    }

    async fn run_loop(
        self: Arc<Self>,
        mut connectivity: watch::Receiver<bool>,
        mut commands: mpsc::Receiver<SchedulerCommand>,
    ) {
        let config = &self.ctx.config;
        let status = &self.ctx.status;

        let online = *connectivity.borrow_and_update();
        status.set_online(online);
        info!(
            "Sync scheduler started (online={}, full every {:?}, critical every {:?})",
            online,
            config.full_sync_interval(),
            config.critical_sync_interval()
        );
        if online && config.sync_on_start {
            self.spawn_pass(SyncScope::Full);
        }

        let mut full = tokio::time::interval_at(
            Instant::now() + config.full_sync_interval(),
            config.full_sync_interval(),
        );
        full.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut critical = tokio::time::interval_at(
            Instant::now() + config.critical_sync_interval(),
            config.critical_sync_interval(),
        );
        critical.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let debounce = tokio::time::sleep(config.online_debounce());
        tokio::pin!(debounce);
        let mut reconnect_pending = false;
        let mut connectivity_open = true;

        loop {
            tokio::select! {
                _ = full.tick() => {
                    debug!("Full sync interval elapsed");
                    self.spawn_pass(SyncScope::Full);
                }
                _ = critical.tick() => {
                    debug!("Critical sync interval elapsed");
                    self.spawn_pass(SyncScope::Critical);
                }
                changed = connectivity.changed(), if connectivity_open => {
                    if changed.is_err() {
                        warn!("Connectivity source closed; keeping last known state");
                        connectivity_open = false;
                        continue;
                    }
                    let online = *connectivity.borrow_and_update();
                    let was_online = status.set_online(online);
                    if online && !was_online {
                        info!("Back online; catch-up pass in {:?}", config.online_debounce());
                        debounce.as_mut().reset(Instant::now() + config.online_debounce());
                        reconnect_pending = true;
                    } else if !online && was_online {
                        info!("Offline; new passes suspended");
                        reconnect_pending = false;
                    }
                }
                () = &mut debounce, if reconnect_pending => {
                    reconnect_pending = false;
                    if status.is_online() {
                        self.spawn_pass(SyncScope::Full);
                    }
                }
                command = commands.recv() => match command {
                    Some(SchedulerCommand::SyncNow(reply)) => {
                        self.spawn_manual(SyncScope::Full, reply);
                    }
                    Some(SchedulerCommand::SyncCritical(reply)) => {
                        self.spawn_manual(SyncScope::Critical, reply);
                    }
                    Some(SchedulerCommand::Shutdown) | None => break,
                },
            }
        }
        info!("Sync scheduler stopped");
    }
}

type PassReply = oneshot::Sender<Option<PassReport>>;

enum SchedulerCommand {
    SyncNow(PassReply),
    SyncCritical(PassReply),
    Shutdown,
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    async fn request(
        &self,
        command: impl FnOnce(PassReply) -> SchedulerCommand,
    ) -> SyncResult<Option<PassReport>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Requests a full pass and waits for it. `Ok(None)` means the pass was
    /// skipped (offline or another pass in flight).
    pub async fn sync_now(&self) -> SyncResult<Option<PassReport>> {
        self.request(SchedulerCommand::SyncNow).await
    }

    /// Requests a critical-tables pass and waits for it.
    pub async fn sync_critical(&self) -> SyncResult<Option<PassReport>> {
        self.request(SchedulerCommand::SyncCritical).await
    }

    /// Stops the scheduler loop. An in-flight pass still completes.
    pub async fn shutdown(self) -> SyncResult<()> {
        // The loop also stops when the channel closes, so a send failure is fine.
        let _ = self.tx.send(SchedulerCommand::Shutdown).await;
        self.task.await?;
        Ok(())
    }
}
