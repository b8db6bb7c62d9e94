//! Reconciliation engine for the floorview warehouse viewer.
//!
//! Pure, I/O-free core: snapshots come in as JSON strings, frames and outbound
//! commands come out. The server crate drives it over HTTP.

pub mod render;
pub mod selection;
pub mod sync;
pub mod world;

pub use render::{render, CellState, Frame, Layer, SelectionMark};
pub use selection::{ClickOutcome, Selection, SelectionPanel, SelectionRejected, SubmitOutcome};
pub use sync::{Effect, Link, Msg, Notice, Phase, Reaction, SyncStats, TransportError, Viewer};
pub use world::{
    parse_init, parse_update, Coord, Grid, Handshake, Layout, Occupant, ParseError, Robot,
    RobotId, RobotState, Task, TaskStatus, World,
};
