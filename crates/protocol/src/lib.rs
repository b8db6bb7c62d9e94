//! Wire types shared by the floorview viewer.
//!
//! Two families live here: the simulator's JSON API (`/init`, `/update`, `/add_task`,
//! `/reset_shift`) and the `UiUpdate` patch format the viewer sends to its dashboard.

use serde::{Deserialize, Serialize};

/// `[row, col]` as the simulator encodes it.
pub type WireCoord = [i64; 2];

/// Body of `GET /init`.
///
/// Every field is optional here; the engine decides what is required so that a missing
/// field becomes a named parse error rather than a generic serde message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_size: Option<[i64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obstacles: Option<Vec<WireCoord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_positions: Option<Vec<WireRobot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_data: Option<Vec<WireRobot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_obstacles: Option<Vec<WireCoord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<WireTask>>,
    /// Poll interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_interval: Option<i64>,
}

/// Body of `GET /update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_positions: Option<Vec<WireRobot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_data: Option<Vec<WireRobot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<WireTask>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_obstacles: Option<Vec<WireCoord>>,
}

/// One robot entry. The legacy `robot_positions` shape never carries `next_pos`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRobot {
    pub id: i64,
    pub pos: WireCoord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_pos: Option<WireCoord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub pickup: WireCoord,
    pub drop: WireCoord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Body of `POST /add_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub pickup: WireCoord,
    pub drop: WireCoord,
}

/// Acknowledgement returned by `/add_task` and `/reset_shift`. Only logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub mod paths {
    pub const INIT: &str = "/init";
    pub const UPDATE: &str = "/update";
    pub const ADD_TASK: &str = "/add_task";
    pub const RESET_SHIFT: &str = "/reset_shift";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Swap {
    #[default]
    Replace,
    Merge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub target: String,
    #[serde(default)]
    pub swap: Swap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

impl Patch {
    pub fn replace(target: &str, html: impl Into<String>) -> Self {
        Self {
            target: target.to_string(),
            swap: Swap::Replace,
            html: Some(html.into()),
            payload: None,
            trigger: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiUpdate {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub patches: Vec<Patch>,
}

impl UiUpdate {
    pub fn new(event: impl Into<String>, patches: Vec<Patch>) -> Self {
        Self {
            event: event.into(),
            payload: None,
            patches,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

pub mod targets {
    pub const PANEL_SELECTION: &str = "panel.selection";
    pub const PANEL_HINT: &str = "panel.hint";
    pub const PANEL_STATUS: &str = "panel.status";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_accepts_legacy_robot_positions() {
        let raw = r#"{"grid_size":[3,4],"obstacles":[[1,1]],"robot_positions":[{"id":0,"pos":[0,0],"state":"idle"}]}"#;
        let snap: InitSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snap.grid_size, Some([3, 4]));
        assert!(snap.robot_data.is_none());
        assert_eq!(snap.robot_positions.unwrap()[0].next_pos, None);
        assert!(snap.dynamic_obstacles.is_none());
    }

    #[test]
    fn task_request_serializes_as_pairs() {
        let req = TaskRequest {
            pickup: [0, 0],
            drop: [2, 2],
        };
        assert_eq!(
            serde_json::to_value(req).unwrap(),
            serde_json::json!({"pickup": [0, 0], "drop": [2, 2]})
        );
    }

    #[test]
    fn swap_defaults_to_replace() {
        let p: Patch = serde_json::from_str(r#"{"target":"panel.hint"}"#).unwrap();
        assert_eq!(p.swap, Swap::Replace);
        assert_eq!(
            serde_json::to_value(Swap::Merge).unwrap(),
            serde_json::json!("merge")
        );
    }
}
