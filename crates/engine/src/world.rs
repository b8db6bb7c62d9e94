//! World model: one immutable snapshot of the warehouse floor.
//!
//! Everything the simulator sends passes through [`parse_init`] or [`parse_update`].
//! Schema variation (legacy `robot_positions` vs `robot_data`, optional
//! `dynamic_obstacles`) is absorbed here and nowhere else.

use floorview_protocol::{InitSnapshot, UpdateSnapshot, WireCoord, WireRobot, WireTask};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use tracing::warn;

pub type RobotId = i64;

pub const DEFAULT_STEP_INTERVAL: Duration = Duration::from_millis(200);

/// Largest floor the viewer will lay out. Every render allocates one cell per square.
pub const MAX_GRID_CELLS: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Coord {
    pub row: i64,
    pub col: i64,
}

impl Coord {
    pub const fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }

    pub fn to_wire(self) -> WireCoord {
        [self.row, self.col]
    }
}

impl From<WireCoord> for Coord {
    fn from(c: WireCoord) -> Self {
        Self::new(c[0], c[1])
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Grid {
    pub rows: usize,
    pub cols: usize,
}

impl Grid {
    pub fn contains(&self, c: Coord) -> bool {
        usize::try_from(c.row).is_ok_and(|r| r < self.rows)
            && usize::try_from(c.col).is_ok_and(|col| col < self.cols)
    }

    /// Row-major offset of an in-bounds coordinate.
    pub fn index(&self, c: Coord) -> Option<usize> {
        if !self.contains(c) {
            return None;
        }
        Some(c.row as usize * self.cols + c.col as usize)
    }

    pub fn len(&self) -> usize {
        self.rows.saturating_mul(self.cols)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum RobotState {
    Idle,
    MovingToPickup,
    MovingToDrop,
    /// Heading home after `/reset_shift`.
    ReturningToDepot,
    Other(String),
}

impl RobotState {
    pub fn from_wire(s: Option<&str>) -> Self {
        match s.unwrap_or("idle") {
            "idle" => Self::Idle,
            "moving_to_pickup" => Self::MovingToPickup,
            "moving_to_drop" => Self::MovingToDrop,
            "returning_to_depot" => Self::ReturningToDepot,
            other => Self::Other(other.to_string()),
        }
    }

    /// CSS-safe slug used for the `robot-<state>` class.
    pub fn slug(&self) -> String {
        match self {
            Self::Idle => "idle".to_string(),
            Self::MovingToPickup => "moving_to_pickup".to_string(),
            Self::MovingToDrop => "moving_to_drop".to_string(),
            Self::ReturningToDepot => "returning_to_depot".to_string(),
            Self::Other(s) => s
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                        c.to_ascii_lowercase()
                    } else {
                        '_'
                    }
                })
                .collect(),
        }
    }
}

impl From<RobotState> for String {
    fn from(s: RobotState) -> Self {
        s.slug()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Robot {
    pub id: RobotId,
    pub pos: Coord,
    pub state: RobotState,
    pub next_pos: Option<Coord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: Option<i64>,
    pub pickup: Coord,
    pub drop: Coord,
    pub status: Option<TaskStatus>,
}

/// The part of the world fixed for the whole session, taken from `/init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub grid: Grid,
    pub static_obstacles: BTreeSet<Coord>,
}

/// What makes a cell unavailable for selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "robot", rename_all = "snake_case")]
pub enum Occupant {
    Robot(RobotId),
    DynamicObstacle,
    StaticObstacle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct World {
    pub grid: Grid,
    pub static_obstacles: BTreeSet<Coord>,
    pub dynamic_obstacles: BTreeSet<Coord>,
    pub tasks: Vec<Task>,
    pub robots: Vec<Robot>,
}

impl World {
    /// A world with only the session layout in it.
    pub fn empty(layout: &Layout) -> Self {
        Self {
            grid: layout.grid,
            static_obstacles: layout.static_obstacles.clone(),
            dynamic_obstacles: BTreeSet::new(),
            tasks: Vec::new(),
            robots: Vec::new(),
        }
    }

    /// Robots take precedence over obstacles when more than one applies.
    pub fn occupant(&self, c: Coord) -> Option<Occupant> {
        if let Some(r) = self.robots.iter().find(|r| r.pos == c) {
            return Some(Occupant::Robot(r.id));
        }
        if self.dynamic_obstacles.contains(&c) {
            return Some(Occupant::DynamicObstacle);
        }
        if self.static_obstacles.contains(&c) {
            return Some(Occupant::StaticObstacle);
        }
        None
    }

    pub fn is_occupied(&self, c: Coord) -> bool {
        self.occupant(c).is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("grid_size must be positive and at most {} cells, got {rows}x{cols}", MAX_GRID_CELLS)]
    InvalidGrid { rows: i64, cols: i64 },
    #[error("`{field}` references {coord}, outside the grid")]
    OutOfBounds { field: &'static str, coord: Coord },
}

/// Parsed `/init`: the session layout, the first world and the poll interval.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub layout: Layout,
    pub world: World,
    pub step_interval: Duration,
}

pub fn parse_init(raw: &str) -> Result<Handshake, ParseError> {
    let snap: InitSnapshot = serde_json::from_str(raw)?;

    let [rows, cols] = snap.grid_size.ok_or(ParseError::MissingField("grid_size"))?;
    let grid = match (usize::try_from(rows), usize::try_from(cols)) {
        (Ok(r), Ok(c))
            if r > 0 && c > 0 && r.checked_mul(c).is_some_and(|n| n <= MAX_GRID_CELLS) =>
        {
            Grid { rows: r, cols: c }
        }
        _ => return Err(ParseError::InvalidGrid { rows, cols }),
    };

    let static_obstacles = coord_set(
        &grid,
        "obstacles",
        snap.obstacles.ok_or(ParseError::MissingField("obstacles"))?,
    )?;
    let layout = Layout {
        grid,
        static_obstacles,
    };

    let robots = normalize_robots(&grid, snap.robot_data, snap.robot_positions)?;
    let dynamic_obstacles = coord_set(
        &grid,
        "dynamic_obstacles",
        snap.dynamic_obstacles.unwrap_or_default(),
    )?;
    // `/init` does not carry tasks in every simulator revision.
    let tasks = normalize_tasks(&grid, snap.tasks.unwrap_or_default())?;

    let step_interval = match snap.step_interval {
        None => DEFAULT_STEP_INTERVAL,
        Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
        Some(ms) => {
            warn!(step_interval = ms, "non-positive step_interval; using default");
            DEFAULT_STEP_INTERVAL
        }
    };

    let world = World {
        grid,
        static_obstacles: layout.static_obstacles.clone(),
        dynamic_obstacles,
        tasks,
        robots,
    };
    Ok(Handshake {
        layout,
        world,
        step_interval,
    })
}

/// Builds a fresh world from `/update`. Nothing from the previous world is reused
/// except the session layout.
pub fn parse_update(layout: &Layout, raw: &str) -> Result<World, ParseError> {
    let snap: UpdateSnapshot = serde_json::from_str(raw)?;
    let grid = layout.grid;

    let robots = normalize_robots(&grid, snap.robot_data, snap.robot_positions)?;
    let tasks = normalize_tasks(&grid, snap.tasks.ok_or(ParseError::MissingField("tasks"))?)?;
    let dynamic_obstacles = coord_set(
        &grid,
        "dynamic_obstacles",
        snap.dynamic_obstacles.unwrap_or_default(),
    )?;

    Ok(World {
        grid,
        static_obstacles: layout.static_obstacles.clone(),
        dynamic_obstacles,
        tasks,
        robots,
    })
}

/// The single place where both robot encodings become [`Robot`]. `robot_data` wins
/// when a payload carries both.
fn normalize_robots(
    grid: &Grid,
    robot_data: Option<Vec<WireRobot>>,
    robot_positions: Option<Vec<WireRobot>>,
) -> Result<Vec<Robot>, ParseError> {
    let (field, wire) = match (robot_data, robot_positions) {
        (Some(data), _) => ("robot_data", data),
        (None, Some(positions)) => ("robot_positions", positions),
        (None, None) => return Err(ParseError::MissingField("robot_data")),
    };

    wire.into_iter()
        .map(|r| {
            let pos = in_bounds(grid, field, r.pos.into())?;
            let next_pos = r
                .next_pos
                .map(|n| in_bounds(grid, field, n.into()))
                .transpose()?;
            Ok(Robot {
                id: r.id,
                pos,
                state: RobotState::from_wire(r.state.as_deref()),
                next_pos,
            })
        })
        .collect()
}

fn normalize_tasks(grid: &Grid, wire: Vec<WireTask>) -> Result<Vec<Task>, ParseError> {
    wire.into_iter()
        .map(|t| {
            Ok(Task {
                id: t.id,
                pickup: in_bounds(grid, "tasks", t.pickup.into())?,
                drop: in_bounds(grid, "tasks", t.drop.into())?,
                status: match t.status.as_deref() {
                    Some("pending") => Some(TaskStatus::Pending),
                    Some("assigned") => Some(TaskStatus::Assigned),
                    _ => None,
                },
            })
        })
        .collect()
}

fn coord_set(
    grid: &Grid,
    field: &'static str,
    wire: Vec<WireCoord>,
) -> Result<BTreeSet<Coord>, ParseError> {
    wire.into_iter()
        .map(|c| in_bounds(grid, field, c.into()))
        .collect()
}

fn in_bounds(grid: &Grid, field: &'static str, coord: Coord) -> Result<Coord, ParseError> {
    if grid.contains(coord) {
        Ok(coord)
    } else {
        Err(ParseError::OutOfBounds { field, coord })
    }
}
