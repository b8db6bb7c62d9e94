//! Synchronization state machine.
//!
//! [`Viewer`] owns the current world, the selection and the last rendered frame. It
//! never performs I/O: every input arrives as a [`Msg`] and every outbound request
//! leaves as an [`Effect`] for the driver to execute.

use crate::render::{render, Frame};
use crate::selection::{ClickOutcome, Selection, SelectionRejected, SubmitOutcome};
use crate::world::{parse_init, parse_update, Coord, Layout, World, DEFAULT_STEP_INTERVAL};
use floorview_protocol::TaskRequest;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected http status {0}")]
    Status(u16),
}

#[derive(Debug, Clone)]
pub enum Msg {
    InitFetched(Result<String, TransportError>),
    Tick,
    SnapshotReceived(Result<String, TransportError>),
    CellClicked(Coord),
    SubmitRequested,
    ResetSelection,
    ResetShiftRequested,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchInit,
    FetchUpdate,
    SubmitTask(TaskRequest),
    ResetShift,
}

/// Operator-facing feedback for one message. Never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "level", content = "text", rename_all = "snake_case")]
pub enum Notice {
    Info(String),
    Rejected(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub effects: Vec<Effect>,
    pub notice: Option<Notice>,
}

impl Reaction {
    fn none() -> Self {
        Self::default()
    }

    fn effect(effect: Effect) -> Self {
        Self {
            effects: vec![effect],
            notice: None,
        }
    }

    fn notice(notice: Notice) -> Self {
        Self {
            effects: Vec::new(),
            notice: Some(notice),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Connecting,
    Live,
    /// The handshake failed. Terminal: nothing is polled afterwards.
    Disconnected {
        reason: String,
    },
    Stopped,
}

/// Health of the steady-state polling, shown as online / degraded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Link {
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl Link {
    pub fn label(&self, phase: &Phase) -> &'static str {
        match phase {
            Phase::Connecting => "connecting",
            Phase::Disconnected { .. } | Phase::Stopped => "offline",
            Phase::Live if self.consecutive_failures > 0 => "degraded",
            Phase::Live => "online",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub snapshots_applied: u64,
    pub polls_failed: u64,
    pub ticks_skipped_in_flight: u64,
    pub frames_rendered: u64,
    pub tasks_submitted: u64,
}

#[derive(Debug)]
pub struct Viewer {
    phase: Phase,
    layout: Option<Layout>,
    world: Option<World>,
    selection: Selection,
    frame: Option<Frame>,
    step_interval: Duration,
    poll_in_flight: bool,
    link: Link,
    stats: SyncStats,
}

impl Default for Viewer {
    fn default() -> Self {
        Self::new()
    }
}

impl Viewer {
    pub fn new() -> Self {
        Self {
            phase: Phase::Connecting,
            layout: None,
            world: None,
            selection: Selection::Empty,
            frame: None,
            step_interval: DEFAULT_STEP_INTERVAL,
            poll_in_flight: false,
            link: Link::default(),
            stats: SyncStats::default(),
        }
    }

    /// The effect that starts the session.
    pub fn start(&self) -> Reaction {
        match self.phase {
            Phase::Connecting => Reaction::effect(Effect::FetchInit),
            _ => Reaction::none(),
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Last good frame. Kept as-is when a poll fails.
    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    pub fn step_interval(&self) -> Duration {
        self.step_interval
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn is_polling(&self) -> bool {
        self.phase == Phase::Live
    }

    pub fn poll_in_flight(&self) -> bool {
        self.poll_in_flight
    }

    pub fn handle(&mut self, msg: Msg) -> Reaction {
        match msg {
            Msg::InitFetched(result) => self.on_init(result),
            Msg::Tick => self.on_tick(),
            Msg::SnapshotReceived(result) => self.on_snapshot(result),
            Msg::CellClicked(c) => self.on_click(c),
            Msg::SubmitRequested => self.on_submit(),
            Msg::ResetSelection => {
                self.selection.reset();
                self.rerender();
                Reaction::notice(Notice::Info("selection cleared".to_string()))
            }
            Msg::ResetShiftRequested => match self.phase {
                Phase::Live => {
                    info!("shift reset requested");
                    Reaction {
                        effects: vec![Effect::ResetShift],
                        notice: Some(Notice::Info(
                            "shift end sent; robots return to depot".to_string(),
                        )),
                    }
                }
                _ => Reaction::notice(Notice::Rejected("simulator not connected".to_string())),
            },
            Msg::Stop => {
                self.stop();
                Reaction::none()
            }
        }
    }

    /// Idempotent. Once stopped, ticks produce no fetches.
    pub fn stop(&mut self) {
        if self.phase != Phase::Stopped {
            info!("viewer stopped");
        }
        self.phase = Phase::Stopped;
        self.poll_in_flight = false;
    }

    fn on_init(&mut self, result: Result<String, TransportError>) -> Reaction {
        if self.phase != Phase::Connecting {
            return Reaction::none();
        }
        let handshake = match result {
            Ok(body) => parse_init(&body).map_err(|e| format!("invalid init payload: {e}")),
            Err(e) => Err(format!("init request failed: {e}")),
        };
        match handshake {
            Ok(hs) => {
                info!(
                    rows = hs.layout.grid.rows,
                    cols = hs.layout.grid.cols,
                    robots = hs.world.robots.len(),
                    interval_ms = hs.step_interval.as_millis() as u64,
                    "simulator handshake complete"
                );
                self.step_interval = hs.step_interval;
                self.layout = Some(hs.layout);
                self.phase = Phase::Live;
                self.apply(hs.world);
            }
            Err(reason) => {
                warn!(%reason, "simulator handshake failed; not polling");
                self.phase = Phase::Disconnected { reason };
            }
        }
        Reaction::none()
    }

    fn on_tick(&mut self) -> Reaction {
        if self.phase != Phase::Live {
            return Reaction::none();
        }
        if self.poll_in_flight {
            self.stats.ticks_skipped_in_flight += 1;
            debug!("tick skipped; previous poll still in flight");
            return Reaction::none();
        }
        self.poll_in_flight = true;
        Reaction::effect(Effect::FetchUpdate)
    }

    fn on_snapshot(&mut self, result: Result<String, TransportError>) -> Reaction {
        self.poll_in_flight = false;
        if self.phase != Phase::Live {
            return Reaction::none();
        }
        let Some(layout) = self.layout.as_ref() else {
            return Reaction::none();
        };
        let parsed = match result {
            Ok(body) => parse_update(layout, &body).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match parsed {
            Ok(world) => {
                self.link = Link::default();
                self.apply(world);
            }
            Err(reason) => {
                self.stats.polls_failed += 1;
                self.link.consecutive_failures += 1;
                warn!(
                    %reason,
                    failures = self.link.consecutive_failures,
                    "poll failed; keeping last frame"
                );
                self.link.last_error = Some(reason);
            }
        }
        Reaction::none()
    }

    fn on_click(&mut self, c: Coord) -> Reaction {
        let Some(world) = self.world.as_ref() else {
            return Reaction::notice(Notice::Rejected("no world yet".to_string()));
        };
        match self.selection.click(world, c) {
            ClickOutcome::PickupSet(c) => {
                self.rerender();
                Reaction::notice(Notice::Info(format!("pickup set to {c}")))
            }
            ClickOutcome::DropSet(c) => {
                self.rerender();
                Reaction::notice(Notice::Info(format!("drop set to {c}")))
            }
            ClickOutcome::Rejected(r) => rejected(r),
        }
    }

    fn on_submit(&mut self) -> Reaction {
        if self.phase != Phase::Live {
            return Reaction::notice(Notice::Rejected("simulator not connected".to_string()));
        }
        let Some(world) = self.world.as_ref() else {
            return Reaction::none();
        };
        match self.selection.submit(world) {
            SubmitOutcome::Sent(req) => {
                self.stats.tasks_submitted += 1;
                info!(pickup = ?req.pickup, drop = ?req.drop, "submitting task");
                self.rerender();
                Reaction {
                    effects: vec![Effect::SubmitTask(req)],
                    notice: Some(Notice::Info("task sent".to_string())),
                }
            }
            SubmitOutcome::Refused(r) => rejected(r),
            SubmitOutcome::NotReady => {
                Reaction::notice(Notice::Rejected("choose a pickup and a drop first".to_string()))
            }
        }
    }

    /// Replaces the world wholesale and renders exactly once.
    fn apply(&mut self, world: World) {
        self.world = Some(world);
        self.stats.snapshots_applied += 1;
        self.rerender();
    }

    fn rerender(&mut self) {
        let Some(world) = self.world.as_ref() else {
            return;
        };
        let frame = render(world, &self.selection);
        self.stats.frames_rendered += 1;
        debug!(
            frame = self.stats.frames_rendered,
            robots = world.robots.len(),
            tasks = world.tasks.len(),
            "frame rendered"
        );
        self.frame = Some(frame);
    }
}

fn rejected(r: SelectionRejected) -> Reaction {
    debug!(reason = %r, "selection rejected");
    Reaction::notice(Notice::Rejected(r.to_string()))
}
