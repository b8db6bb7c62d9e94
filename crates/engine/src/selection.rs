//! Operator selection of a pickup and a drop cell.

use crate::world::{Coord, Occupant, World};
use floorview_protocol::TaskRequest;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Selection {
    #[default]
    Empty,
    PickupChosen {
        pickup: Coord,
    },
    Complete {
        pickup: Coord,
        drop: Coord,
    },
}

/// A click the state machine refused. Not an error: the state is unchanged and the
/// reason is only shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SelectionRejected {
    #[error("cell {0} is occupied ({1})")]
    Occupied(Coord, OccupantLabel),
    #[error("cell {0} is outside the grid")]
    OutOfBounds(Coord),
    #[error("cell {0} is already the pickup")]
    SameAsPickup(Coord),
    #[error("pickup and drop are already chosen; create the task or clear the selection")]
    AlreadyComplete,
}

/// Display wrapper so the rejection message reads naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccupantLabel(pub Occupant);

impl std::fmt::Display for OccupantLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Occupant::Robot(id) => write!(f, "robot R{id}"),
            Occupant::DynamicObstacle => f.write_str("dynamic obstacle"),
            Occupant::StaticObstacle => f.write_str("obstacle"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    PickupSet(Coord),
    DropSet(Coord),
    Rejected(SelectionRejected),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The command to send. The selection is already back to `Empty`.
    Sent(TaskRequest),
    /// A chosen cell became occupied since it was clicked. Selection kept.
    Refused(SelectionRejected),
    NotReady,
}

impl Selection {
    pub fn pickup(&self) -> Option<Coord> {
        match *self {
            Self::Empty => None,
            Self::PickupChosen { pickup } | Self::Complete { pickup, .. } => Some(pickup),
        }
    }

    pub fn drop(&self) -> Option<Coord> {
        match *self {
            Self::Complete { drop, .. } => Some(drop),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    pub fn click(&mut self, world: &World, c: Coord) -> ClickOutcome {
        let next = match *self {
            Self::Complete { .. } => Err(SelectionRejected::AlreadyComplete),
            Self::PickupChosen { pickup } if pickup == c => {
                Err(SelectionRejected::SameAsPickup(c))
            }
            Self::PickupChosen { pickup } => {
                check_free(world, c).map(|()| Self::Complete { pickup, drop: c })
            }
            Self::Empty => check_free(world, c).map(|()| Self::PickupChosen { pickup: c }),
        };

        match next {
            Ok(state) => {
                *self = state;
                match state {
                    Self::Complete { drop, .. } => ClickOutcome::DropSet(drop),
                    _ => ClickOutcome::PickupSet(c),
                }
            }
            Err(rejected) => ClickOutcome::Rejected(rejected),
        }
    }

    /// Re-checks both cells against `world` and, when still free, emits the command and
    /// resets. What happens to the command afterwards does not affect the selection.
    pub fn submit(&mut self, world: &World) -> SubmitOutcome {
        let Self::Complete { pickup, drop } = *self else {
            return SubmitOutcome::NotReady;
        };
        if let Err(rejected) = check_free(world, pickup).and_then(|()| check_free(world, drop)) {
            return SubmitOutcome::Refused(rejected);
        }
        *self = Self::Empty;
        SubmitOutcome::Sent(TaskRequest {
            pickup: pickup.to_wire(),
            drop: drop.to_wire(),
        })
    }

    pub fn reset(&mut self) {
        *self = Self::Empty;
    }

    pub fn panel(&self) -> SelectionPanel {
        let label = |c: Option<Coord>| c.map_or_else(|| "None".to_string(), |c| c.to_string());
        SelectionPanel {
            pickup: label(self.pickup()),
            drop: label(self.drop()),
            can_submit: self.is_complete(),
        }
    }
}

fn check_free(world: &World, c: Coord) -> Result<(), SelectionRejected> {
    if !world.grid.contains(c) {
        return Err(SelectionRejected::OutOfBounds(c));
    }
    match world.occupant(c) {
        Some(o) => Err(SelectionRejected::Occupied(c, OccupantLabel(o))),
        None => Ok(()),
    }
}

/// Text shown next to the grid: the two chosen cells and whether "create task" is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionPanel {
    pub pickup: String,
    pub drop: String,
    pub can_submit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{parse_init, Robot, RobotState};

    fn world_3x3() -> World {
        parse_init(r#"{"grid_size":[3,3],"obstacles":[[1,1]],"robot_data":[]}"#)
            .unwrap()
            .world
    }

    #[test]
    fn operator_scenario_pickup_reject_drop_submit() {
        let world = world_3x3();
        let mut sel = Selection::default();

        assert_eq!(
            sel.click(&world, Coord::new(0, 0)),
            ClickOutcome::PickupSet(Coord::new(0, 0))
        );

        let out = sel.click(&world, Coord::new(1, 1));
        assert!(matches!(
            out,
            ClickOutcome::Rejected(SelectionRejected::Occupied(_, _))
        ));
        assert_eq!(
            sel,
            Selection::PickupChosen {
                pickup: Coord::new(0, 0)
            }
        );

        assert_eq!(
            sel.click(&world, Coord::new(2, 2)),
            ClickOutcome::DropSet(Coord::new(2, 2))
        );
        assert!(sel.is_complete());

        assert_eq!(
            sel.submit(&world),
            SubmitOutcome::Sent(TaskRequest {
                pickup: [0, 0],
                drop: [2, 2]
            })
        );
        assert_eq!(sel, Selection::Empty);
    }

    #[test]
    fn reclicking_pickup_is_a_noop() {
        let world = world_3x3();
        let mut sel = Selection::default();
        sel.click(&world, Coord::new(0, 2));
        let out = sel.click(&world, Coord::new(0, 2));
        assert_eq!(
            out,
            ClickOutcome::Rejected(SelectionRejected::SameAsPickup(Coord::new(0, 2)))
        );
        assert_eq!(sel.pickup(), Some(Coord::new(0, 2)));
        assert_eq!(sel.drop(), None);
    }

    #[test]
    fn complete_ignores_clicks_until_reset() {
        let world = world_3x3();
        let mut sel = Selection::default();
        sel.click(&world, Coord::new(0, 0));
        sel.click(&world, Coord::new(0, 1));
        let before = sel;
        assert_eq!(
            sel.click(&world, Coord::new(2, 0)),
            ClickOutcome::Rejected(SelectionRejected::AlreadyComplete)
        );
        assert_eq!(sel, before);

        sel.reset();
        assert_eq!(sel, Selection::Empty);
        sel.reset();
        assert_eq!(sel, Selection::Empty);
    }

    #[test]
    fn robots_and_out_of_bounds_cells_are_refused() {
        let mut world = world_3x3();
        world.robots.push(Robot {
            id: 1,
            pos: Coord::new(2, 1),
            state: RobotState::Idle,
            next_pos: None,
        });
        let mut sel = Selection::default();
        assert!(matches!(
            sel.click(&world, Coord::new(2, 1)),
            ClickOutcome::Rejected(SelectionRejected::Occupied(
                _,
                OccupantLabel(Occupant::Robot(1))
            ))
        ));
        assert_eq!(
            sel.click(&world, Coord::new(3, 0)),
            ClickOutcome::Rejected(SelectionRejected::OutOfBounds(Coord::new(3, 0)))
        );
        assert_eq!(sel, Selection::Empty);
    }

    #[test]
    fn complete_needs_exactly_two_valid_clicks() {
        let world = world_3x3();
        let clicks = [
            Coord::new(1, 1),
            Coord::new(0, 0),
            Coord::new(1, 1),
            Coord::new(0, 0),
            Coord::new(5, 5),
            Coord::new(1, 2),
        ];
        let mut sel = Selection::default();
        let mut valid = 0;
        for c in clicks {
            if !matches!(sel.click(&world, c), ClickOutcome::Rejected(_)) {
                valid += 1;
            }
            assert_eq!(sel.is_complete(), valid == 2);
        }
        assert_eq!(valid, 2);
    }

    #[test]
    fn submit_revalidates_against_latest_world() {
        let mut world = world_3x3();
        let mut sel = Selection::default();
        sel.click(&world, Coord::new(0, 0));
        sel.click(&world, Coord::new(2, 2));

        world.dynamic_obstacles.insert(Coord::new(2, 2));
        assert!(matches!(
            sel.submit(&world),
            SubmitOutcome::Refused(SelectionRejected::Occupied(_, _))
        ));
        assert!(sel.is_complete());

        assert_eq!(Selection::Empty.submit(&world), SubmitOutcome::NotReady);
    }

    #[test]
    fn panel_mirrors_selection() {
        let world = world_3x3();
        let mut sel = Selection::default();
        assert_eq!(
            sel.panel(),
            SelectionPanel {
                pickup: "None".to_string(),
                drop: "None".to_string(),
                can_submit: false
            }
        );
        sel.click(&world, Coord::new(0, 1));
        sel.click(&world, Coord::new(2, 0));
        let panel = sel.panel();
        assert_eq!(panel.pickup, "(0, 1)");
        assert_eq!(panel.drop, "(2, 0)");
        assert!(panel.can_submit);
    }
}
