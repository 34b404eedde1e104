use std::sync::Arc;
use std::time::Duration;

use agent_logging::{agent_debug, agent_info, agent_warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{CycleOutcome, PollScheduler};

enum AgentCommand {
    PollNow {
        reply: oneshot::Sender<CycleOutcome>,
    },
}

/// Handle to the running agent: a periodic poll loop plus on-demand
/// triggers.
pub struct AgentHandle {
    cmd_tx: mpsc::Sender<AgentCommand>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl AgentHandle {
    /// Starts the loop on the current runtime. The first tick fires
    /// immediately.
    pub fn spawn(scheduler: Arc<PollScheduler>, poll_interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            scheduler,
            poll_interval,
            cmd_rx,
            shutdown.clone(),
        ));
        Self {
            cmd_tx,
            shutdown,
            task,
        }
    }

    /// Triggers a cycle now, bypassing the polling-enabled flag. Returns
    /// `Busy` if one is already running, or `None` if the loop has stopped.
    pub async fn poll_now(&self) -> Option<CycleOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.cmd_tx
            .send(AgentCommand::PollNow { reply })
            .await
            .ok()?;
        outcome.await.ok()
    }

    /// Stops ticking and waits for a cycle that is already running.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.task.await {
            agent_warn!("agent loop ended abnormally: {err}");
        }
    }
}

async fn run_loop(
    scheduler: Arc<PollScheduler>,
    poll_interval: Duration,
    mut cmd_rx: mpsc::Receiver<AgentCommand>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: Option<JoinHandle<CycleOutcome>> = None;

    agent_info!("agent started, polling every {poll_interval:?}");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if polling_enabled(&scheduler) {
                    track(&mut in_flight, start_cycle(&scheduler, None));
                } else {
                    agent_debug!("polling disabled, tick skipped");
                }
            }
            Some(command) = cmd_rx.recv() => match command {
                AgentCommand::PollNow { reply } => {
                    track(&mut in_flight, start_cycle(&scheduler, Some(reply)));
                }
            },
        }
    }

    if let Some(cycle) = in_flight.filter(|cycle| !cycle.is_finished()) {
        agent_info!("waiting for the running cycle to finish");
        let _ = cycle.await;
    }
    agent_info!("agent stopped");
}

/// Each trigger runs as its own task so the loop keeps accepting triggers;
/// the scheduler's gate turns overlapping ones into no-ops.
fn start_cycle(
    scheduler: &Arc<PollScheduler>,
    reply: Option<oneshot::Sender<CycleOutcome>>,
) -> JoinHandle<CycleOutcome> {
    let scheduler = Arc::clone(scheduler);
    tokio::spawn(async move {
        let outcome = scheduler.run_cycle().await;
        if let Some(reply) = reply {
            let _ = reply.send(outcome.clone());
        }
        outcome
    })
}

/// Keeps the handle of the cycle that is actually running; a trigger that
/// arrives while busy is a no-op task and must not replace it.
fn track(in_flight: &mut Option<JoinHandle<CycleOutcome>>, handle: JoinHandle<CycleOutcome>) {
    if in_flight.as_ref().is_none_or(JoinHandle::is_finished) {
        *in_flight = Some(handle);
    }
}

fn polling_enabled(scheduler: &PollScheduler) -> bool {
    match scheduler.store().load() {
        Ok(state) => state.polling_enabled,
        Err(err) => {
            agent_warn!("cannot read polling flag, tick skipped: {err}");
            false
        }
    }
}
