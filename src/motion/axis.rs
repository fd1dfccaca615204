// Single-axis stepper control
//
// An AxisController owns the DIR/STEP/ENABLE outputs of one axis and shares
// its limit input (read-only) with the limit monitor. Moves are constant-rate
// pulse trains that re-sample the limit before every pulse.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::gpio::{Gpio, GpioError, InputPin, Level, OutputPin, Polarity};

/// One of the three linear axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(name)
    }
}

/// Travel direction along an axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    #[default]
    Backward,
}

impl Direction {
    /// Direction of a signed displacement (zero counts as forward)
    pub fn of(units: i64) -> Self {
        if units < 0 {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }

    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// Physical pin numbers bound to one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisPins {
    pub dir: u32,
    pub step: u32,
    pub enable: u32,
    pub limit: u32,
}

/// Per-axis motion parameters (already validated)
#[derive(Debug, Clone, Copy)]
pub struct AxisParams {
    pub steps_per_unit: u32,
    pub max_home_pulses: u64,
    pub home_direction: Direction,
    pub invert_direction: bool,
    /// Hold time of each half of a step pulse
    pub step_dwell: Duration,
    pub limit_polarity: Polarity,
    pub enable_polarity: Polarity,
}

impl AxisParams {
    /// DIR level that drives the carriage in `direction`
    pub fn direction_level(&self, direction: Direction) -> Level {
        let level = match direction {
            Direction::Forward => Level::High,
            Direction::Backward => Level::Low,
        };
        if self.invert_direction {
            level.inverted()
        } else {
            level
        }
    }
}

/// Result of a relative move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveResult {
    Moved,
    BlockedByLimit,
}

/// Result of a homing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeResult {
    Homed,
    NotFound,
}

/// Limit switch input of one axis, shared with the limit monitor
pub struct LimitSensor {
    axis: Axis,
    input: InputPin,
    polarity: Polarity,
    triggered: AtomicBool,
}

impl LimitSensor {
    fn new(axis: Axis, input: InputPin, polarity: Polarity) -> Self {
        Self {
            axis,
            input,
            polarity,
            triggered: AtomicBool::new(false),
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Sample the switch now. No debounce: one raw reading is the answer.
    pub fn sample(&self) -> Result<bool, GpioError> {
        let triggered = self.polarity.is_active(self.input.read()?);
        self.triggered.store(triggered, Ordering::Release);
        Ok(triggered)
    }

    /// State seen by the most recent sample, from any caller
    pub fn last_sample(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    fn release(&self) -> Result<(), GpioError> {
        self.input.release()
    }
}

/// Exclusive owner of one axis's driver outputs
pub struct AxisController {
    axis: Axis,
    params: AxisParams,
    dir: OutputPin,
    step: OutputPin,
    enable: OutputPin,
    limit: Arc<LimitSensor>,
    position: i64,
    enabled: bool,
    released: bool,
}

impl AxisController {
    /// Acquire the axis's four pins. Outputs come up with the driver disabled
    /// and STEP low; anything acquired before a failure is released on return.
    pub fn acquire(
        gpio: Arc<dyn Gpio>,
        axis: Axis,
        pins: AxisPins,
        params: AxisParams,
    ) -> Result<Self, GpioError> {
        let enable = OutputPin::acquire(
            gpio.clone(),
            pins.enable,
            params.enable_polarity.inactive_level(),
        )?;
        let dir = OutputPin::acquire(
            gpio.clone(),
            pins.dir,
            params.direction_level(params.home_direction),
        )?;
        let step = OutputPin::acquire(gpio.clone(), pins.step, Level::Low)?;
        let input = InputPin::acquire(gpio, pins.limit)?;
        let limit = Arc::new(LimitSensor::new(axis, input, params.limit_polarity));

        info!(
            "Axis {} ready: dir={}, step={}, enable={}, limit={}",
            axis, pins.dir, pins.step, pins.enable, pins.limit
        );

        Ok(Self {
            axis,
            params,
            dir,
            step,
            enable,
            limit,
            position: 0,
            enabled: false,
            released: false,
        })
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Position in motion units, counted over whole completed moves
    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Last sampled limit state, without touching the pin
    pub fn limit_triggered(&self) -> bool {
        self.limit.last_sample()
    }

    /// Shared handle onto this axis's limit input
    pub fn limit_sensor(&self) -> Arc<LimitSensor> {
        Arc::clone(&self.limit)
    }

    /// Energize the driver (no-op if already energized)
    pub fn enable(&mut self) -> Result<(), GpioError> {
        if !self.enabled {
            self.enable.set(self.params.enable_polarity.active_level())?;
            self.enabled = true;
        }
        Ok(())
    }

    /// De-energize the driver (no-op if already de-energized)
    pub fn disable(&mut self) -> Result<(), GpioError> {
        if self.enabled {
            self.enable.set(self.params.enable_polarity.inactive_level())?;
            self.enabled = false;
        }
        Ok(())
    }

    pub fn check_limit(&self) -> Result<bool, GpioError> {
        self.limit.sample()
    }

    /// Move `units` motion units in `direction`.
    ///
    /// The limit is sampled before the driver is energized and again before
    /// every pulse. A trip stops the pulse train at once; the partial travel
    /// is not added to `position`.
    pub fn move_units(&mut self, units: u32, direction: Direction) -> Result<MoveResult, GpioError> {
        if self.check_limit()? {
            debug!("Axis {} limit already triggered, refusing move", self.axis);
            return Ok(MoveResult::BlockedByLimit);
        }

        let steps = u64::from(units) * u64::from(self.params.steps_per_unit);
        let dir_level = self.params.direction_level(direction);

        let result = self.energized(|axis| {
            axis.dir.set(dir_level)?;
            for issued in 0..steps {
                if axis.check_limit()? {
                    warn!(
                        "Axis {} limit triggered after {}/{} steps",
                        axis.axis, issued, steps
                    );
                    return Ok(MoveResult::BlockedByLimit);
                }
                axis.pulse()?;
            }
            Ok(MoveResult::Moved)
        })?;

        if result == MoveResult::Moved {
            self.position += i64::from(units) * direction.sign();
        }
        Ok(result)
    }

    /// Seek the limit switch in the home direction, giving up after the pulse budget
    pub fn home(&mut self) -> Result<HomeResult, GpioError> {
        let budget = self.params.max_home_pulses;
        let dir_level = self.params.direction_level(self.params.home_direction);

        info!("Homing axis {} (budget {} pulses)", self.axis, budget);
        let result = self.energized(|axis| {
            axis.dir.set(dir_level)?;
            let mut issued = 0u64;
            loop {
                if axis.check_limit()? {
                    debug!("Axis {} found home after {} pulses", axis.axis, issued);
                    return Ok(HomeResult::Homed);
                }
                if issued == budget {
                    return Ok(HomeResult::NotFound);
                }
                axis.pulse()?;
                issued += 1;
            }
        })?;

        match result {
            HomeResult::Homed => self.position = 0,
            HomeResult::NotFound => warn!(
                "Axis {} did not reach its limit switch within {} pulses",
                self.axis, budget
            ),
        }
        Ok(result)
    }

    /// Disable the driver and release every pin. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.disable() {
            warn!("Axis {}: failed to disable driver during cleanup: {}", self.axis, e);
        }
        for pin in [&mut self.dir, &mut self.step, &mut self.enable] {
            if let Err(e) = pin.release() {
                warn!("Axis {}: failed to release GPIO {}: {}", self.axis, pin.pin(), e);
            }
        }
        if let Err(e) = self.limit.release() {
            warn!("Axis {}: failed to release limit input: {}", self.axis, e);
        }
        self.released = true;
        info!("Axis {} released", self.axis);
    }

    /// Run `f` with the driver energized; the driver is de-energized afterwards
    /// on every path, including errors from `f`.
    fn energized<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, GpioError>,
    ) -> Result<T, GpioError> {
        self.enable()?;
        let result = f(self);
        let disabled = self.disable();
        let value = result?;
        disabled?;
        Ok(value)
    }

    fn pulse(&mut self) -> Result<(), GpioError> {
        self.step.set(Level::High)?;
        thread::sleep(self.params.step_dwell);
        self.step.set(Level::Low)?;
        thread::sleep(self.params.step_dwell);
        Ok(())
    }
}

impl Drop for AxisController {
    fn drop(&mut self) {
        // Never leave a driver energized behind
        self.cleanup();
    }
}
