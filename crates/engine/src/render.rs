//! Reconciliation: a whole [`Frame`] recomputed from one world and one selection.

use crate::selection::Selection;
use crate::world::{Coord, Grid, RobotId, RobotState, World};
use serde::Serialize;

/// The exclusive part of a cell, strongest first: robot, task, dynamic obstacle,
/// static obstacle, floor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layer {
    #[default]
    Floor,
    StaticObstacle,
    DynamicObstacle,
    Task {
        pickup: bool,
        drop: bool,
    },
    Robot {
        id: RobotId,
        state: RobotState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMark {
    Pickup,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CellState {
    pub layer: Layer,
    /// Robots whose next step lands here, ascending by id.
    pub pending_moves: Vec<RobotId>,
    pub selected: Option<SelectionMark>,
}

impl CellState {
    pub fn classes(&self) -> Vec<String> {
        let mut out = vec!["cell".to_string()];
        match &self.layer {
            Layer::Floor => {}
            Layer::StaticObstacle => out.push("obstacle".to_string()),
            Layer::DynamicObstacle => out.push("dynamic-obstacle".to_string()),
            Layer::Task { pickup, drop } => {
                if *pickup {
                    out.push("task-pickup".to_string());
                }
                if *drop {
                    out.push("task-drop".to_string());
                }
            }
            Layer::Robot { state, .. } => {
                out.push("robot".to_string());
                out.push(format!("robot-{}", state.slug()));
            }
        }
        if !self.pending_moves.is_empty() {
            out.push("pending-move".to_string());
        }
        match self.selected {
            Some(SelectionMark::Pickup) => out.push("selected-pickup".to_string()),
            Some(SelectionMark::Drop) => out.push("selected-drop".to_string()),
            None => {}
        }
        out
    }

    pub fn label(&self) -> Option<String> {
        match &self.layer {
            Layer::Robot { id, .. } => Some(format!("R{id}")),
            _ => None,
        }
    }

    fn glyph(&self) -> char {
        match self.selected {
            Some(SelectionMark::Pickup) => return 'P',
            Some(SelectionMark::Drop) => return 'D',
            None => {}
        }
        match &self.layer {
            Layer::Robot { .. } => 'R',
            _ if !self.pending_moves.is_empty() => '+',
            Layer::Task { pickup: true, drop: true } => '*',
            Layer::Task { pickup: true, .. } => 'p',
            Layer::Task { .. } => 'd',
            Layer::DynamicObstacle => '%',
            Layer::StaticObstacle => '#',
            Layer::Floor => '.',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub rows: usize,
    pub cols: usize,
    /// Row-major.
    pub cells: Vec<CellState>,
}

impl Frame {
    fn blank(grid: Grid) -> Self {
        Self {
            rows: grid.rows,
            cols: grid.cols,
            cells: vec![CellState::default(); grid.len()],
        }
    }

    fn grid(&self) -> Grid {
        Grid {
            rows: self.rows,
            cols: self.cols,
        }
    }

    pub fn cell(&self, c: Coord) -> Option<&CellState> {
        self.grid().index(c).map(|i| &self.cells[i])
    }

    fn cell_mut(&mut self, c: Coord) -> Option<&mut CellState> {
        self.grid().index(c).map(|i| &mut self.cells[i])
    }

    /// One character per cell, one line per row.
    ///
    /// `R` robot, `+` pending move, `p`/`d`/`*` task pickup/drop/both, `%` dynamic
    /// obstacle, `#` static obstacle, `P`/`D` selected pickup/drop, `.` floor.
    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity(self.rows * (self.cols + 1));
        for row in self.cells.chunks(self.cols.max(1)) {
            out.extend(row.iter().map(CellState::glyph));
            out.push('\n');
        }
        out
    }
}

/// Pure and total: entities outside the grid are skipped, never reported.
pub fn render(world: &World, selection: &Selection) -> Frame {
    let mut frame = Frame::blank(world.grid);

    for &c in &world.static_obstacles {
        if let Some(cell) = frame.cell_mut(c) {
            cell.layer = Layer::StaticObstacle;
        }
    }
    for &c in &world.dynamic_obstacles {
        if let Some(cell) = frame.cell_mut(c) {
            cell.layer = Layer::DynamicObstacle;
        }
    }

    for task in &world.tasks {
        if !world.grid.contains(task.pickup) || !world.grid.contains(task.drop) {
            continue;
        }
        mark_task(&mut frame, task.pickup, true);
        mark_task(&mut frame, task.drop, false);
    }

    for robot in &world.robots {
        if !world.grid.contains(robot.pos) {
            continue;
        }
        if let Some(cell) = frame.cell_mut(robot.pos) {
            cell.layer = Layer::Robot {
                id: robot.id,
                state: robot.state.clone(),
            };
        }
    }

    for robot in &world.robots {
        let Some(next) = robot.next_pos else { continue };
        if next == robot.pos || !world.grid.contains(robot.pos) {
            continue;
        }
        if let Some(cell) = frame.cell_mut(next) {
            cell.pending_moves.push(robot.id);
        }
    }
    for cell in &mut frame.cells {
        cell.pending_moves.sort_unstable();
        cell.pending_moves.dedup();
    }

    if let Some(c) = selection.pickup() {
        if let Some(cell) = frame.cell_mut(c) {
            cell.selected = Some(SelectionMark::Pickup);
        }
    }
    if let Some(c) = selection.drop() {
        if let Some(cell) = frame.cell_mut(c) {
            cell.selected = Some(SelectionMark::Drop);
        }
    }

    frame
}

fn mark_task(frame: &mut Frame, c: Coord, is_pickup: bool) {
    let Some(cell) = frame.cell_mut(c) else { return };
    let (mut pickup, mut drop) = match cell.layer {
        Layer::Task { pickup, drop } => (pickup, drop),
        _ => (false, false),
    };
    if is_pickup {
        pickup = true;
    } else {
        drop = true;
    }
    cell.layer = Layer::Task { pickup, drop };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{parse_init, parse_update, Layout, Robot, Task};

    fn layout(raw: &str) -> Layout {
        parse_init(raw).unwrap().layout
    }

    fn robot(id: RobotId, pos: Coord, next: Option<Coord>) -> Robot {
        Robot {
            id,
            pos,
            state: RobotState::MovingToPickup,
            next_pos: next,
        }
    }

    fn task(pickup: Coord, drop: Coord) -> Task {
        Task {
            id: None,
            pickup,
            drop,
            status: None,
        }
    }

    #[test]
    fn render_is_idempotent() {
        let l = layout(r#"{"grid_size":[4,4],"obstacles":[[1,1],[2,2]],"robot_data":[]}"#);
        let world = parse_update(
            &l,
            r#"{"robot_data":[{"id":0,"pos":[0,0],"state":"moving_to_pickup","next_pos":[0,1]}],
                "tasks":[{"pickup":[3,3],"drop":[0,3]}],"dynamic_obstacles":[[3,0]]}"#,
        )
        .unwrap();
        let sel = Selection::PickupChosen {
            pickup: Coord::new(1, 0),
        };
        let a = render(&world, &sel);
        let b = render(&world, &sel);
        assert_eq!(a, b);
        assert_eq!(a.to_ascii(), b.to_ascii());
    }

    #[test]
    fn precedence_and_classes() {
        let l = layout(r#"{"grid_size":[2,3],"obstacles":[[1,2]],"robot_data":[]}"#);
        let mut world = World::empty(&l);
        world.dynamic_obstacles.insert(Coord::new(1, 1));
        world.tasks.push(task(Coord::new(0, 0), Coord::new(0, 2)));
        world.robots.push(robot(5, Coord::new(0, 0), None));

        let frame = render(&world, &Selection::Empty);
        let robot_cell = frame.cell(Coord::new(0, 0)).unwrap();
        assert_eq!(
            robot_cell.classes(),
            vec!["cell", "robot", "robot-moving_to_pickup"]
        );
        assert_eq!(robot_cell.label().as_deref(), Some("R5"));
        assert_eq!(
            frame.cell(Coord::new(0, 2)).unwrap().classes(),
            vec!["cell", "task-drop"]
        );
        assert_eq!(
            frame.cell(Coord::new(1, 1)).unwrap().layer,
            Layer::DynamicObstacle
        );
        assert_eq!(
            frame.cell(Coord::new(1, 2)).unwrap().classes(),
            vec!["cell", "obstacle"]
        );
        assert_eq!(frame.to_ascii(), "R.d\n.%#\n");
    }

    #[test]
    fn pending_move_layers_over_task_pickup() {
        let l = layout(r#"{"grid_size":[3,3],"obstacles":[],"robot_data":[]}"#);
        let mut world = World::empty(&l);
        world
            .robots
            .push(robot(0, Coord::new(0, 0), Some(Coord::new(0, 1))));
        world.tasks.push(task(Coord::new(0, 1), Coord::new(2, 2)));

        let frame = render(&world, &Selection::Empty);
        let cell = frame.cell(Coord::new(0, 1)).unwrap();
        assert_eq!(
            cell.layer,
            Layer::Task {
                pickup: true,
                drop: false
            }
        );
        assert_eq!(cell.pending_moves, vec![0]);
        assert_eq!(
            cell.classes(),
            vec!["cell", "task-pickup", "pending-move"]
        );
    }

    #[test]
    fn pending_move_can_share_a_cell_with_another_robot() {
        let l = layout(r#"{"grid_size":[1,3],"obstacles":[],"robot_data":[]}"#);
        let mut world = World::empty(&l);
        world
            .robots
            .push(robot(1, Coord::new(0, 0), Some(Coord::new(0, 1))));
        world.robots.push(robot(2, Coord::new(0, 1), None));
        // Stationary robot: no indicator on its own cell.
        world
            .robots
            .push(robot(3, Coord::new(0, 2), Some(Coord::new(0, 2))));

        let frame = render(&world, &Selection::Empty);
        let shared = frame.cell(Coord::new(0, 1)).unwrap();
        assert!(matches!(shared.layer, Layer::Robot { id: 2, .. }));
        assert_eq!(shared.pending_moves, vec![1]);
        assert!(frame.cell(Coord::new(0, 2)).unwrap().pending_moves.is_empty());
    }

    #[test]
    fn no_stale_markers_across_snapshots() {
        let l = layout(r#"{"grid_size":[3,3],"obstacles":[],"robot_data":[]}"#);
        let w1 = parse_update(
            &l,
            r#"{"robot_data":[{"id":0,"pos":[0,0],"next_pos":[1,0]}],
                "tasks":[{"pickup":[2,2],"drop":[2,0]}],"dynamic_obstacles":[[1,1]]}"#,
        )
        .unwrap();
        let w2 = parse_update(
            &l,
            r#"{"robot_data":[{"id":0,"pos":[1,0]}],"tasks":[]}"#,
        )
        .unwrap();

        let _ = render(&w1, &Selection::Empty);
        let after = render(&w2, &Selection::Empty);
        assert_eq!(after, render(&w2, &Selection::Empty));
        assert_eq!(after.to_ascii(), "...\nR..\n...\n");
    }

    #[test]
    fn out_of_bounds_entities_are_skipped() {
        let l = layout(r#"{"grid_size":[2,2],"obstacles":[],"robot_data":[]}"#);
        let mut world = World::empty(&l);
        world.robots.push(robot(9, Coord::new(5, 5), Some(Coord::new(0, 0))));
        world.robots.push(robot(1, Coord::new(0, 1), Some(Coord::new(-1, 1))));
        world.tasks.push(task(Coord::new(0, 0), Coord::new(2, 0)));
        world.dynamic_obstacles.insert(Coord::new(7, 0));

        let frame = render(&world, &Selection::Empty);
        assert_eq!(frame.to_ascii(), ".R\n..\n");
        assert!(frame.cell(Coord::new(0, 0)).unwrap().pending_moves.is_empty());
    }

    #[test]
    fn selection_overlays_everything() {
        let l = layout(r#"{"grid_size":[1,2],"obstacles":[[0,1]],"robot_data":[]}"#);
        let mut world = World::empty(&l);
        world.robots.push(robot(0, Coord::new(0, 0), None));
        // Raced with a poll: both chosen cells are now occupied.
        let sel = Selection::Complete {
            pickup: Coord::new(0, 0),
            drop: Coord::new(0, 1),
        };
        let frame = render(&world, &sel);
        let a = frame.cell(Coord::new(0, 0)).unwrap();
        assert_eq!(a.selected, Some(SelectionMark::Pickup));
        assert!(a.classes().contains(&"robot".to_string()));
        assert!(a.classes().contains(&"selected-pickup".to_string()));
        assert_eq!(
            frame.cell(Coord::new(0, 1)).unwrap().classes(),
            vec!["cell", "obstacle", "selected-drop"]
        );
    }

    #[test]
    fn both_task_ends_on_one_cell() {
        let l = layout(r#"{"grid_size":[1,3],"obstacles":[],"robot_data":[]}"#);
        let mut world = World::empty(&l);
        world.tasks.push(task(Coord::new(0, 0), Coord::new(0, 1)));
        world.tasks.push(task(Coord::new(0, 1), Coord::new(0, 2)));
        let frame = render(&world, &Selection::Empty);
        assert_eq!(frame.to_ascii(), "p*d\n");
    }
}
