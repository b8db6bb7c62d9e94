//! Drives the [`Viewer`](floorview_engine::Viewer) against the simulator.
//!
//! One task runs the handshake and then a sleep / fetch / apply loop. The fetch is
//! awaited inside the loop, so a slow simulator delays the next tick instead of
//! stacking requests. Task submission and shift reset run detached.

use crate::simulator::SimulatorClient;
use crate::AppState;
use floorview_engine::{Effect, Msg};
use std::future::Future;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct PollerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Safe to call any number of times.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "poller task ended abnormally");
        }
    }
}

pub fn spawn_poller(
    state: AppState,
    client: SimulatorClient,
    effects: mpsc::UnboundedReceiver<Effect>,
) -> PollerHandle {
    let (stop, stop_rx) = watch::channel(false);
    tokio::spawn(run_effects(client.clone(), effects));
    let task = tokio::spawn(run_loop(state, client, stop_rx));
    PollerHandle { stop, task }
}

async fn run_loop(state: AppState, client: SimulatorClient, mut stop_rx: watch::Receiver<bool>) {
    let start = state.viewer.lock().await.start();
    if start.effects.contains(&Effect::FetchInit) {
        info!(simulator = client.base_url(), "connecting to simulator");
        let Some(result) = until_stopped(&mut stop_rx, client.fetch_init()).await else {
            state.dispatch(Msg::Stop).await;
            return;
        };
        state.dispatch(Msg::InitFetched(result)).await;
    }

    loop {
        let (polling, interval) = {
            let viewer = state.viewer.lock().await;
            (viewer.is_polling(), viewer.step_interval())
        };
        if !polling {
            debug!("viewer not live; poll loop exiting");
            return;
        }
        if until_stopped(&mut stop_rx, tokio::time::sleep(interval))
            .await
            .is_none()
        {
            break;
        }

        let (reaction, _) = state.dispatch(Msg::Tick).await;
        if !reaction.effects.contains(&Effect::FetchUpdate) {
            continue;
        }
        let Some(result) = until_stopped(&mut stop_rx, client.fetch_update()).await else {
            break;
        };
        state.dispatch(Msg::SnapshotReceived(result)).await;
    }

    state.dispatch(Msg::Stop).await;
}

/// Executes effects raised by operator actions. Neither outcome feeds back into the
/// selection; the next snapshot shows whether the simulator took the task.
async fn run_effects(client: SimulatorClient, mut effects: mpsc::UnboundedReceiver<Effect>) {
    while let Some(effect) = effects.recv().await {
        let client = client.clone();
        match effect {
            Effect::SubmitTask(req) => {
                tokio::spawn(async move {
                    match client.add_task(&req).await {
                        Ok(ack) => info!(
                            pickup = ?req.pickup,
                            drop = ?req.drop,
                            message = ack.message.as_deref().unwrap_or(""),
                            "task accepted by simulator"
                        ),
                        Err(e) => warn!(
                            error = %e,
                            pickup = ?req.pickup,
                            drop = ?req.drop,
                            "task submission failed"
                        ),
                    }
                });
            }
            Effect::ResetShift => {
                tokio::spawn(async move {
                    match client.reset_shift().await {
                        Ok(()) => info!("shift reset acknowledged"),
                        Err(e) => warn!(error = %e, "shift reset failed"),
                    }
                });
            }
            other => debug!(effect = ?other, "fetch effects are driven by the poll loop"),
        }
    }
}

/// `None` once a stop was requested (or the handle dropped) before `fut` completed.
async fn until_stopped<F: Future>(
    stop_rx: &mut watch::Receiver<bool>,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = stopped(stop_rx) => None,
        out = fut => Some(out),
    }
}

async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    while !*stop_rx.borrow_and_update() {
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}
