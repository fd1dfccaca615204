// Message types exchanged with the operator interface

use serde::{Deserialize, Serialize};

use crate::camera::CameraStatus;
use crate::motion::{
    Axis, HomeOutcome, LimitSnapshot, LogicalPosition, MotionStatus, MoveOutcome, RigState,
};
use crate::roi::{PointAdded, RoiPoint, RoiRegion, RoiSnapshot};

// Command from the console/UI -> runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    MoveAxis { axis: Axis, units: i64 },
    HomeAll,
    MarkPoint,
    ConfirmRoi,
    ResetRoi,
}

impl Command {
    /// Axis the command drives, if it targets a single one
    pub fn axis(&self) -> Option<Axis> {
        match self {
            Command::MoveAxis { axis, .. } => Some(*axis),
            _ => None,
        }
    }
}

// Outcome of one command, runtime -> console/UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Move(MoveOutcome),
    Home(HomeOutcome),
    PointMarked { point: RoiPoint, added: PointAdded },
    /// Operator acknowledgement only, nothing changes
    RoiConfirmed { regions: usize },
    RoiReset,
    /// Command could not run (hardware fault, invalid displacement)
    Failed { axis: Option<Axis>, reason: String },
}

impl Reply {
    /// Reply for a command that never reached the motion thread
    pub fn rejected(cmd: &Command, reason: &str) -> Self {
        Reply::Failed {
            axis: cmd.axis(),
            reason: reason.to_string(),
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    /// Motion hardware unavailable; camera and ROI marking still work
    Degraded,
    /// A move or homing run is in flight
    Busy,
}

impl RuntimeHealth {
    pub fn from_state(state: RigState) -> Self {
        match state {
            RigState::Uninitialized => RuntimeHealth::Degraded,
            RigState::Ready => RuntimeHealth::Ok,
            RigState::Moving | RigState::Homing => RuntimeHealth::Busy,
        }
    }
}

/// Everything the operator display renders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RigStatus {
    pub health: RuntimeHealth,
    pub state: RigState,
    pub position: LogicalPosition,
    pub limits: LimitSnapshot,
    pub pending: Option<RoiPoint>,
    pub regions: Vec<RoiRegion>,
    pub camera: CameraStatus,
}

impl RigStatus {
    pub fn assemble(
        motion: MotionStatus,
        limits: LimitSnapshot,
        roi: RoiSnapshot,
        camera: CameraStatus,
    ) -> Self {
        Self {
            health: RuntimeHealth::from_state(motion.state),
            state: motion.state,
            position: motion.position,
            limits,
            pending: roi.pending,
            regions: roi.regions,
            camera,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let cmd: Command = serde_json::from_str(r#"{"cmd":"move_axis","axis":"y","units":-3}"#).unwrap();
        assert_eq!(
            cmd,
            Command::MoveAxis {
                axis: Axis::Y,
                units: -3
            }
        );
        let cmd: Command = serde_json::from_str(r#"{"cmd":"confirm_roi"}"#).unwrap();
        assert_eq!(cmd, Command::ConfirmRoi);
        assert!(serde_json::from_str::<Command>(r#"{"cmd":"move_axis","axis":"w","units":1}"#).is_err());
    }

    #[test]
    fn test_reply_names_axis_and_reason() {
        let reply = Reply::Move(MoveOutcome::Blocked { axis: Axis::Z });
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["reply"], "move");
        assert_eq!(json["outcome"], "blocked");
        assert_eq!(json["axis"], "z");

        let reply = Reply::Home(HomeOutcome::PartialFailure {
            not_found: vec![Axis::Z],
        });
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["outcome"], "partial_failure");
        assert_eq!(json["not_found"][0], "z");
    }

    #[test]
    fn test_rejected_command_names_axis() {
        let cmd = Command::MoveAxis {
            axis: Axis::Y,
            units: 4,
        };
        let json = serde_json::to_value(Reply::rejected(&cmd, "motion queue full")).unwrap();
        assert_eq!(json["reply"], "failed");
        assert_eq!(json["axis"], "y");
        assert_eq!(json["reason"], "motion queue full");

        assert_eq!(
            Reply::rejected(&Command::HomeAll, "motion thread stopped"),
            Reply::Failed {
                axis: None,
                reason: "motion thread stopped".to_string()
            }
        );
    }

    #[test]
    fn test_health_follows_state() {
        assert_eq!(RuntimeHealth::from_state(RigState::Uninitialized), RuntimeHealth::Degraded);
        assert_eq!(RuntimeHealth::from_state(RigState::Homing), RuntimeHealth::Busy);
        assert_eq!(RuntimeHealth::from_state(RigState::Ready), RuntimeHealth::Ok);
    }
}
