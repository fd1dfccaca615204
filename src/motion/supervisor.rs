// Motion supervisor: the single integrator of the three axes.
//
// Owns every AxisController, serializes move/home requests from the command
// path and is the only writer of the logical position. Status goes out on a
// watch channel so readers never wait on a move in progress.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::axis::{Axis, AxisController, Direction, HomeResult, MoveResult};
use super::gpio::{Gpio, GpioError};
use super::limits::{LimitMonitor, LimitSnapshot};
use crate::config::{ConfigError, RigConfig};

/// Coarse rig state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RigState {
    Uninitialized,
    Ready,
    Moving,
    Homing,
}

/// Where the camera is, in motion units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalPosition {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl LogicalPosition {
    pub const ORIGIN: Self = Self { x: 0, y: 0, z: 0 };

    pub fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    pub fn get(&self, axis: Axis) -> i64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    fn set(&mut self, axis: Axis, value: i64) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
    }
}

/// Outcome of `move_axis`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MoveOutcome {
    Moved { axis: Axis, position: i64 },
    Blocked { axis: Axis },
    NotInitialized,
}

/// Outcome of `home_all`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HomeOutcome {
    Homed,
    PartialFailure { not_found: Vec<Axis> },
    NotInitialized,
}

/// What the supervisor publishes after every state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionStatus {
    pub state: RigState,
    pub position: LogicalPosition,
}

/// Failure to bring the motion hardware up
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("Invalid rig configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to acquire axis {axis}: {source}")]
    Gpio {
        axis: Axis,
        #[source]
        source: GpioError,
    },
}

/// Failure while executing a motion command
#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("GPIO fault on axis {axis}: {source}")]
    Gpio {
        axis: Axis,
        #[source]
        source: GpioError,
    },

    #[error("Displacement of {units} units is not a valid move")]
    InvalidDisplacement { units: i64 },
}

pub struct MotionSupervisor {
    /// None when the hardware could not be acquired
    axes: Option<Vec<AxisController>>,
    home_order: Vec<Axis>,
    limit_period: Duration,
    position: LogicalPosition,
    state: RigState,
    status: watch::Sender<MotionStatus>,
    limits: Option<watch::Receiver<LimitSnapshot>>,
}

impl MotionSupervisor {
    /// Validate `config` and acquire all three axes.
    ///
    /// If any axis fails, the axes already acquired are released before the
    /// error is returned.
    pub fn start(gpio: Arc<dyn Gpio>, config: &RigConfig) -> Result<Self, HardwareError> {
        config.validate()?;

        let mut axes = Vec::with_capacity(Axis::ALL.len());
        for axis in Axis::ALL {
            let pins = config.axis(axis).pins(axis)?;
            let controller =
                AxisController::acquire(gpio.clone(), axis, pins, config.axis_params(axis))
                    .map_err(|source| HardwareError::Gpio { axis, source })?;
            axes.push(controller);
        }

        info!("Motion hardware acquired, home order {:?}", config.home_order);
        Ok(Self::with_axes(Some(axes), config, RigState::Ready))
    }

    /// A supervisor with no hardware; every motion command reports NotInitialized
    pub fn uninitialized(config: &RigConfig) -> Self {
        warn!("Motion supervisor running without hardware");
        Self::with_axes(None, config, RigState::Uninitialized)
    }

    fn with_axes(axes: Option<Vec<AxisController>>, config: &RigConfig, state: RigState) -> Self {
        let position = LogicalPosition::ORIGIN;
        let (status, _) = watch::channel(MotionStatus { state, position });
        Self {
            axes,
            home_order: config.home_order.clone(),
            limit_period: config.limit_poll_period(),
            position,
            state,
            status,
            limits: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.axes.is_some()
    }

    pub fn state(&self) -> RigState {
        self.state
    }

    pub fn position(&self) -> LogicalPosition {
        self.position
    }

    /// Latest limit snapshot from the monitor (all clear if none is running)
    pub fn limits(&self) -> LimitSnapshot {
        self.limits
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> watch::Receiver<MotionStatus> {
        self.status.subscribe()
    }

    /// Start sampling every axis's limit switch. Requires a tokio runtime;
    /// returns None when there is no hardware to watch.
    pub fn spawn_limit_monitor(&mut self) -> Option<LimitMonitor> {
        let sensors = self
            .axes
            .as_ref()?
            .iter()
            .map(|controller| controller.limit_sensor())
            .collect();
        let monitor = LimitMonitor::spawn(sensors, self.limit_period);
        self.limits = Some(monitor.subscribe());
        Some(monitor)
    }

    /// Move one axis by a signed, nonzero number of motion units
    pub fn move_axis(&mut self, axis: Axis, units: i64) -> Result<MoveOutcome, MotionError> {
        let magnitude = u32::try_from(units.unsigned_abs())
            .ok()
            .filter(|&m| m > 0)
            .ok_or(MotionError::InvalidDisplacement { units })?;

        let Some(controller) = self
            .axes
            .as_mut()
            .and_then(|axes| axes.iter_mut().find(|c| c.axis() == axis))
        else {
            return Ok(MoveOutcome::NotInitialized);
        };

        info!("Moving axis {} by {} units", axis, units);
        // Publish before the blocking pulse train starts
        self.state = RigState::Moving;
        self.status.send_replace(MotionStatus {
            state: self.state,
            position: self.position,
        });

        let result = controller.move_units(magnitude, Direction::of(units));

        let outcome = match result {
            Ok(MoveResult::Moved) => {
                // Relative to the logical position, which a partial home leaves alone
                let new_position = self.position.get(axis) + units;
                self.position.set(axis, new_position);
                Ok(MoveOutcome::Moved {
                    axis,
                    position: new_position,
                })
            }
            Ok(MoveResult::BlockedByLimit) => {
                warn!("Move on axis {} blocked by limit switch", axis);
                Ok(MoveOutcome::Blocked { axis })
            }
            Err(source) => {
                error!("Move on axis {} failed: {}", axis, source);
                Err(MotionError::Gpio { axis, source })
            }
        };
        self.set_state(RigState::Ready);
        outcome
    }

    /// Home every axis in the configured order. The logical position returns
    /// to the origin only when every axis found its switch.
    pub fn home_all(&mut self) -> Result<HomeOutcome, MotionError> {
        let Some(axes) = self.axes.as_mut() else {
            return Ok(HomeOutcome::NotInitialized);
        };

        info!("Homing all axes in order {:?}", self.home_order);
        self.state = RigState::Homing;
        self.status.send_replace(MotionStatus {
            state: self.state,
            position: self.position,
        });

        let mut not_found = Vec::new();
        let mut fault = None;
        for &axis in &self.home_order {
            let Some(controller) = axes.iter_mut().find(|c| c.axis() == axis) else {
                continue;
            };
            match controller.home() {
                Ok(HomeResult::Homed) => info!("Axis {} homed", axis),
                Ok(HomeResult::NotFound) => not_found.push(axis),
                Err(source) => {
                    error!("Homing axis {} failed: {}", axis, source);
                    fault = Some(MotionError::Gpio { axis, source });
                    break;
                }
            }
        }

        if let Some(fault) = fault {
            self.set_state(RigState::Ready);
            return Err(fault);
        }

        let outcome = if not_found.is_empty() {
            self.position = LogicalPosition::ORIGIN;
            HomeOutcome::Homed
        } else {
            warn!("Homing incomplete, switches not found on {:?}", not_found);
            HomeOutcome::PartialFailure { not_found }
        };
        self.set_state(RigState::Ready);
        Ok(outcome)
    }

    /// Disable and release every axis. Idempotent.
    pub fn cleanup(&mut self) {
        if let Some(axes) = self.axes.as_mut() {
            for controller in axes.iter_mut() {
                controller.cleanup();
            }
        }
    }

    fn set_state(&mut self, state: RigState) {
        self.state = state;
        self.status.send_replace(MotionStatus {
            state,
            position: self.position,
        });
    }
}
