// Timing, topics, pin map and rig configuration
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::motion::axis::{Axis, AxisParams, AxisPins, Direction};
use crate::motion::gpio::Polarity;

// Status publishing frequency
pub const STATUS_HZ: u64 = 10;

// Limit sampling period
pub const LIMIT_POLL_PERIOD: Duration = Duration::from_millis(100);

// Shortest STEP high/low hold the drivers accept (A4988/DRV8825 need ~1.9us)
pub const MIN_STEP_DWELL: Duration = Duration::from_micros(2);

// Default STEP high/low hold
pub const DEFAULT_STEP_DWELL: Duration = Duration::from_micros(500);

pub const DEFAULT_STEPS_PER_UNIT: u32 = 100;

// Homing gives up after this many pulses
pub const DEFAULT_MAX_HOME_PULSES: u64 = 20_000;

// Zenoh key expressions
pub const TOPIC_CMD: &str = "otus/cmd"; // operator commands
pub const TOPIC_REPLY: &str = "otus/state/reply"; // command outcomes
pub const TOPIC_STATUS: &str = "otus/state/status"; // position, limits, ROIs
pub const TOPIC_HEALTH: &str = "otus/state/health"; // health status

// Default pin map (BCM numbering): [dir, step, enable, limit]
const DEFAULT_PINS_X: [u32; 4] = [20, 21, 16, 26];
const DEFAULT_PINS_Y: [u32; 4] = [19, 13, 12, 6];
const DEFAULT_PINS_Z: [u32; 4] = [5, 11, 9, 10];

/// Error types for loading and validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Axis {axis} has no {role} pin configured")]
    MissingPin { axis: Axis, role: PinRole },

    #[error("GPIO {pin} is bound to both {first_axis} {first_role} and {second_axis} {second_role}")]
    PinConflict {
        pin: u32,
        first_axis: Axis,
        first_role: PinRole,
        second_axis: Axis,
        second_role: PinRole,
    },

    #[error("Axis {axis}: steps_per_unit must be positive")]
    ZeroStepsPerUnit { axis: Axis },

    #[error("Axis {axis}: max_home_pulses must be positive")]
    ZeroHomeBudget { axis: Axis },

    #[error("Step dwell of {dwell_us}us is below the driver minimum of {min_us}us")]
    DwellBelowFloor { dwell_us: u64, min_us: u64 },

    #[error("Limit poll period must be positive")]
    ZeroPollPeriod,

    #[error("Home order must list X, Y and Z exactly once, got {0:?}")]
    InvalidHomeOrder(Vec<Axis>),
}

/// Role a pin plays on its axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinRole {
    Dir,
    Step,
    Enable,
    Limit,
}

impl fmt::Display for PinRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PinRole::Dir => "DIR",
            PinRole::Step => "STEP",
            PinRole::Enable => "ENABLE",
            PinRole::Limit => "LIMIT",
        };
        f.write_str(name)
    }
}

/// Per-axis section of the rig configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisConfig {
    pub dir_pin: Option<u32>,
    pub step_pin: Option<u32>,
    pub enable_pin: Option<u32>,
    pub limit_pin: Option<u32>,
    pub steps_per_unit: u32,
    pub max_home_pulses: u64,
    pub home_direction: Direction,
    pub invert_direction: bool,
}

impl AxisConfig {
    fn with_pins([dir, step, enable, limit]: [u32; 4]) -> Self {
        Self {
            dir_pin: Some(dir),
            step_pin: Some(step),
            enable_pin: Some(enable),
            limit_pin: Some(limit),
            ..Self::default()
        }
    }

    fn bindings(&self) -> [(PinRole, Option<u32>); 4] {
        [
            (PinRole::Dir, self.dir_pin),
            (PinRole::Step, self.step_pin),
            (PinRole::Enable, self.enable_pin),
            (PinRole::Limit, self.limit_pin),
        ]
    }

    /// Resolve the four pin bindings, naming the first one missing
    pub fn pins(&self, axis: Axis) -> Result<AxisPins, ConfigError> {
        let require = |role: PinRole, pin: Option<u32>| pin.ok_or(ConfigError::MissingPin { axis, role });
        Ok(AxisPins {
            dir: require(PinRole::Dir, self.dir_pin)?,
            step: require(PinRole::Step, self.step_pin)?,
            enable: require(PinRole::Enable, self.enable_pin)?,
            limit: require(PinRole::Limit, self.limit_pin)?,
        })
    }
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            dir_pin: None,
            step_pin: None,
            enable_pin: None,
            limit_pin: None,
            steps_per_unit: DEFAULT_STEPS_PER_UNIT,
            max_home_pulses: DEFAULT_MAX_HOME_PULSES,
            home_direction: Direction::Backward,
            invert_direction: false,
        }
    }
}

/// Whole-rig configuration, normally loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub x: AxisConfig,
    pub y: AxisConfig,
    pub z: AxisConfig,
    pub limit_polarity: Polarity,
    pub enable_polarity: Polarity,
    pub step_dwell_us: u64,
    pub limit_poll_ms: u64,
    pub home_order: Vec<Axis>,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            x: AxisConfig::with_pins(DEFAULT_PINS_X),
            y: AxisConfig::with_pins(DEFAULT_PINS_Y),
            z: AxisConfig::with_pins(DEFAULT_PINS_Z),
            limit_polarity: Polarity::ActiveLow,
            enable_polarity: Polarity::ActiveLow,
            step_dwell_us: DEFAULT_STEP_DWELL.as_micros() as u64,
            limit_poll_ms: LIMIT_POLL_PERIOD.as_millis() as u64,
            home_order: Axis::ALL.to_vec(),
        }
    }
}

impl RigConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn axis(&self, axis: Axis) -> &AxisConfig {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }

    pub fn step_dwell(&self) -> Duration {
        Duration::from_micros(self.step_dwell_us)
    }

    pub fn limit_poll_period(&self) -> Duration {
        Duration::from_millis(self.limit_poll_ms)
    }

    /// Check everything acquisition depends on: every pin present, no pin
    /// bound twice across the rig, sane motion parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut claimed: BTreeMap<u32, (Axis, PinRole)> = BTreeMap::new();
        for axis in Axis::ALL {
            let section = self.axis(axis);
            section.pins(axis)?;
            for (role, pin) in section.bindings() {
                let Some(pin) = pin else { continue };
                if let Some(&(first_axis, first_role)) = claimed.get(&pin) {
                    return Err(ConfigError::PinConflict {
                        pin,
                        first_axis,
                        first_role,
                        second_axis: axis,
                        second_role: role,
                    });
                }
                claimed.insert(pin, (axis, role));
            }
            if section.steps_per_unit == 0 {
                return Err(ConfigError::ZeroStepsPerUnit { axis });
            }
            if section.max_home_pulses == 0 {
                return Err(ConfigError::ZeroHomeBudget { axis });
            }
        }

        if self.step_dwell() < MIN_STEP_DWELL {
            return Err(ConfigError::DwellBelowFloor {
                dwell_us: self.step_dwell_us,
                min_us: MIN_STEP_DWELL.as_micros() as u64,
            });
        }
        if self.limit_poll_ms == 0 {
            return Err(ConfigError::ZeroPollPeriod);
        }

        let mut order = self.home_order.clone();
        order.sort();
        if order != Axis::ALL {
            return Err(ConfigError::InvalidHomeOrder(self.home_order.clone()));
        }
        Ok(())
    }

    /// Motion parameters for one axis, combining its section with the rig-wide settings
    pub fn axis_params(&self, axis: Axis) -> AxisParams {
        let section = self.axis(axis);
        AxisParams {
            steps_per_unit: section.steps_per_unit,
            max_home_pulses: section.max_home_pulses,
            home_direction: section.home_direction,
            invert_direction: section.invert_direction,
            step_dwell: self.step_dwell(),
            limit_polarity: self.limit_polarity,
            enable_polarity: self.enable_polarity,
        }
    }
}

#[cfg(test)]
impl RigConfig {
    /// Default pin map with the shortest legal dwell and a small homing budget
    pub(crate) fn for_tests() -> Self {
        let mut config = Self {
            step_dwell_us: MIN_STEP_DWELL.as_micros() as u64,
            limit_poll_ms: 10,
            ..Self::default()
        };
        for section in [&mut config.x, &mut config.y, &mut config.z] {
            section.steps_per_unit = 2;
            section.max_home_pulses = 40;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        RigConfig::default().validate().unwrap();
        assert_eq!(RigConfig::default().home_order, vec![Axis::X, Axis::Y, Axis::Z]);
    }

    #[test]
    fn test_missing_pin_is_named() {
        let mut config = RigConfig::default();
        config.y.enable_pin = None;
        match config.validate() {
            Err(ConfigError::MissingPin { axis, role }) => {
                assert_eq!(axis, Axis::Y);
                assert_eq!(role, PinRole::Enable);
            }
            other => panic!("expected MissingPin, got {:?}", other),
        }
    }

    #[test]
    fn test_conflicting_pin_across_axes() {
        let mut config = RigConfig::default();
        config.z.limit_pin = config.x.step_pin;
        match config.validate() {
            Err(ConfigError::PinConflict {
                pin,
                first_axis,
                first_role,
                second_axis,
                second_role,
            }) => {
                assert_eq!(pin, 21);
                assert_eq!((first_axis, first_role), (Axis::X, PinRole::Step));
                assert_eq!((second_axis, second_role), (Axis::Z, PinRole::Limit));
            }
            other => panic!("expected PinConflict, got {:?}", other),
        }
    }

    #[test]
    fn test_conflicting_pin_within_axis() {
        let mut config = RigConfig::default();
        config.x.dir_pin = config.x.step_pin;
        assert!(matches!(config.validate(), Err(ConfigError::PinConflict { .. })));
    }

    #[test]
    fn test_dwell_floor() {
        let config = RigConfig {
            step_dwell_us: 1,
            ..RigConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DwellBelowFloor { dwell_us: 1, min_us: 2 })
        ));
    }

    #[test]
    fn test_home_order_must_be_permutation() {
        let mut config = RigConfig::default();
        config.home_order = vec![Axis::Z, Axis::Y, Axis::X];
        config.validate().unwrap();

        config.home_order = vec![Axis::X, Axis::X, Axis::Z];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidHomeOrder(_))));

        config.home_order = vec![Axis::X, Axis::Y];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidHomeOrder(_))));
    }

    #[test]
    fn test_zero_parameters_rejected() {
        let mut config = RigConfig::default();
        config.z.steps_per_unit = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroStepsPerUnit { axis: Axis::Z })
        ));

        let mut config = RigConfig::default();
        config.x.max_home_pulses = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroHomeBudget { axis: Axis::X })
        ));
    }

    #[test]
    fn test_parse_toml() {
        let config = RigConfig::from_toml(
            r#"
            limit_polarity = "active_high"
            step_dwell_us = 250
            home_order = ["z", "x", "y"]

            [x]
            dir_pin = 2
            step_pin = 3
            enable_pin = 4
            limit_pin = 17
            steps_per_unit = 80
            home_direction = "forward"

            [y]
            dir_pin = 27
            step_pin = 22
            enable_pin = 23
            limit_pin = 24
            invert_direction = true
            "#,
        )
        .unwrap();

        assert_eq!(config.limit_polarity, Polarity::ActiveHigh);
        assert_eq!(config.step_dwell(), Duration::from_micros(250));
        assert_eq!(config.home_order, vec![Axis::Z, Axis::X, Axis::Y]);
        assert_eq!(config.x.steps_per_unit, 80);
        assert_eq!(config.x.home_direction, Direction::Forward);
        assert!(config.y.invert_direction);
        assert_eq!(config.y.steps_per_unit, DEFAULT_STEPS_PER_UNIT);
        // [z] omitted entirely: default pin map
        assert_eq!(config.z.dir_pin, Some(5));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_section_reports_missing_pin() {
        let config = RigConfig::from_toml(
            r#"
            [z]
            dir_pin = 5
            enable_pin = 9
            limit_pin = 10
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingPin { axis: Axis::Z, role: PinRole::Step })
        ));
    }

    #[test]
    fn test_axis_params_combine_sections() {
        let config = RigConfig::default();
        let params = config.axis_params(Axis::Y);
        assert_eq!(params.steps_per_unit, DEFAULT_STEPS_PER_UNIT);
        assert_eq!(params.step_dwell, DEFAULT_STEP_DWELL);
        assert_eq!(params.enable_polarity, Polarity::ActiveLow);
    }

    #[test]
    fn test_shipped_rig_file_is_valid() {
        let config = RigConfig::from_toml(include_str!("../otus-rig.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.home_order, vec![Axis::Z, Axis::X, Axis::Y]);
        assert_eq!(config.z.steps_per_unit, 400);
        assert!(config.z.invert_direction);
    }
}
