// Simulated GPIO bench
//
// Stands in for the platform GPIO when running with --simulate and in tests.
// Limit inputs either follow a forced level or a carriage model: a carriage
// watches a STEP/DIR pair and trips its limit input once it has been stepped
// far enough toward the switch.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::axis::Axis;
use super::gpio::{Gpio, GpioError, Level, PinMode};
use crate::config::RigConfig;

/// A carriage riding on one axis, seen only through its pins
#[derive(Debug, Clone)]
pub struct Carriage {
    pub step_pin: u32,
    pub dir_pin: u32,
    pub limit_pin: u32,
    /// DIR level that moves the carriage toward the switch
    pub toward_switch: Level,
    /// Steps left before the switch closes
    pub distance: i64,
    /// Level the limit input reads while the switch is closed
    pub active_level: Level,
}

impl Carriage {
    fn at_switch(&self) -> bool {
        self.distance <= 0
    }
}

#[derive(Default)]
struct Bench {
    modes: BTreeMap<u32, PinMode>,
    outputs: BTreeMap<u32, Level>,
    forced: BTreeMap<u32, Level>,
    pulses: BTreeMap<u32, u64>,
    history: Vec<(u32, Level)>,
    carriages: Vec<Carriage>,
    refuse: BTreeSet<u32>,
    faulty: BTreeSet<u32>,
}

/// In-memory GPIO. Cloning yields another handle onto the same bench.
#[derive(Clone, Default)]
pub struct SimulatedGpio {
    bench: Arc<Mutex<Bench>>,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bench with one carriage per configured axis, each parked
    /// `travel_units` away from its home switch
    pub fn for_rig(config: &RigConfig, travel_units: u32) -> Self {
        let sim = Self::new();
        for axis in Axis::ALL {
            let Ok(pins) = config.axis(axis).pins(axis) else {
                continue;
            };
            let params = config.axis_params(axis);
            sim.add_carriage(Carriage {
                step_pin: pins.step,
                dir_pin: pins.dir,
                limit_pin: pins.limit,
                toward_switch: params.direction_level(params.home_direction),
                distance: i64::from(travel_units) * i64::from(params.steps_per_unit),
                active_level: config.limit_polarity.active_level(),
            });
        }
        sim
    }

    /// Handle suitable for acquiring pins
    pub fn handle(&self) -> Arc<dyn Gpio> {
        Arc::new(self.clone())
    }

    pub fn add_carriage(&self, carriage: Carriage) {
        self.bench.lock().carriages.push(carriage);
    }

    /// Pin an input to a level, overriding any carriage on it
    pub fn force_input(&self, pin: u32, level: Level) {
        self.bench.lock().forced.insert(pin, level);
    }

    pub fn clear_forced(&self, pin: u32) {
        self.bench.lock().forced.remove(&pin);
    }

    /// Make the next `configure` of `pin` fail, as a missing or busy line would
    pub fn refuse(&self, pin: u32) {
        self.bench.lock().refuse.insert(pin);
    }

    /// Make every write to or read from `pin` fail until `clear_fault`
    pub fn inject_fault(&self, pin: u32) {
        self.bench.lock().faulty.insert(pin);
    }

    pub fn clear_fault(&self, pin: u32) {
        self.bench.lock().faulty.remove(&pin);
    }

    pub fn is_configured(&self, pin: u32) -> bool {
        self.bench.lock().modes.contains_key(&pin)
    }

    pub fn output_level(&self, pin: u32) -> Option<Level> {
        self.bench.lock().outputs.get(&pin).copied()
    }

    /// Rising edges seen on an output since the bench was created
    pub fn pulse_count(&self, pin: u32) -> u64 {
        self.bench.lock().pulses.get(&pin).copied().unwrap_or(0)
    }

    /// Every level written to `pin`, in order (including the initial level)
    pub fn writes(&self, pin: u32) -> Vec<Level> {
        self.bench
            .lock()
            .history
            .iter()
            .filter(|(p, _)| *p == pin)
            .map(|(_, level)| *level)
            .collect()
    }

    /// Steps left before a carriage on `limit_pin` reaches its switch
    pub fn carriage_distance(&self, limit_pin: u32) -> Option<i64> {
        self.bench
            .lock()
            .carriages
            .iter()
            .find(|c| c.limit_pin == limit_pin)
            .map(|c| c.distance)
    }
}

impl Bench {
    fn check_fault(&self, pin: u32) -> Result<(), GpioError> {
        if self.faulty.contains(&pin) {
            return Err(GpioError::Io {
                pin,
                reason: "line fault injected by simulated bench".to_string(),
            });
        }
        Ok(())
    }

    fn mode_name(mode: PinMode) -> &'static str {
        match mode {
            PinMode::Input => "input",
            PinMode::Output { .. } => "output",
        }
    }

    fn step_carriages(&mut self, step_pin: u32) {
        for carriage in self.carriages.iter_mut().filter(|c| c.step_pin == step_pin) {
            let dir = self
                .outputs
                .get(&carriage.dir_pin)
                .copied()
                .unwrap_or(Level::Low);
            if dir == carriage.toward_switch {
                carriage.distance -= 1;
            } else {
                carriage.distance += 1;
            }
        }
    }
}

impl Gpio for SimulatedGpio {
    fn configure(&self, pin: u32, mode: PinMode) -> Result<(), GpioError> {
        let mut bench = self.bench.lock();
        if bench.refuse.remove(&pin) {
            return Err(GpioError::Acquire {
                pin,
                reason: "line refused by simulated bench".to_string(),
            });
        }
        if let PinMode::Output { initial } = mode {
            bench.outputs.insert(pin, initial);
            bench.history.push((pin, initial));
        }
        bench.modes.insert(pin, mode);
        Ok(())
    }

    fn set_output(&self, pin: u32, level: Level) -> Result<(), GpioError> {
        let mut bench = self.bench.lock();
        match bench.modes.get(&pin) {
            None => return Err(GpioError::NotConfigured { pin }),
            Some(PinMode::Input) => {
                return Err(GpioError::WrongMode {
                    pin,
                    expected: "output",
                    actual: Bench::mode_name(PinMode::Input),
                });
            }
            Some(PinMode::Output { .. }) => {}
        }
        bench.check_fault(pin)?;
        let previous = bench.outputs.insert(pin, level);
        bench.history.push((pin, level));
        if level == Level::High && previous != Some(Level::High) {
            *bench.pulses.entry(pin).or_insert(0) += 1;
            bench.step_carriages(pin);
        }
        Ok(())
    }

    fn read_input(&self, pin: u32) -> Result<Level, GpioError> {
        let bench = self.bench.lock();
        match bench.modes.get(&pin) {
            None => return Err(GpioError::NotConfigured { pin }),
            Some(mode @ PinMode::Output { .. }) => {
                return Err(GpioError::WrongMode {
                    pin,
                    expected: "input",
                    actual: Bench::mode_name(*mode),
                });
            }
            Some(PinMode::Input) => {}
        }
        bench.check_fault(pin)?;
        if let Some(level) = bench.forced.get(&pin) {
            return Ok(*level);
        }
        if let Some(carriage) = bench.carriages.iter().find(|c| c.limit_pin == pin) {
            return Ok(if carriage.at_switch() {
                carriage.active_level
            } else {
                carriage.active_level.inverted()
            });
        }
        // Pull-up
        Ok(Level::High)
    }

    fn release(&self, pin: u32) -> Result<(), GpioError> {
        let mut bench = self.bench.lock();
        bench.modes.remove(&pin);
        bench.outputs.remove(&pin);
        Ok(())
    }

    fn release_all(&self) -> Result<(), GpioError> {
        let mut bench = self.bench.lock();
        bench.modes.clear();
        bench.outputs.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulses_count_rising_edges_only() {
        let sim = SimulatedGpio::new();
        sim.configure(1, PinMode::Output { initial: Level::Low }).unwrap();
        sim.set_output(1, Level::High).unwrap();
        sim.set_output(1, Level::High).unwrap();
        sim.set_output(1, Level::Low).unwrap();
        sim.set_output(1, Level::High).unwrap();
        assert_eq!(sim.pulse_count(1), 2);
    }

    #[test]
    fn test_carriage_trips_limit_after_distance() {
        let sim = SimulatedGpio::new();
        sim.configure(1, PinMode::Output { initial: Level::Low }).unwrap();
        sim.configure(2, PinMode::Output { initial: Level::Low }).unwrap();
        sim.configure(3, PinMode::Input).unwrap();
        sim.add_carriage(Carriage {
            step_pin: 1,
            dir_pin: 2,
            limit_pin: 3,
            toward_switch: Level::Low,
            distance: 2,
            active_level: Level::Low,
        });

        assert_eq!(sim.read_input(3).unwrap(), Level::High);
        for _ in 0..2 {
            sim.set_output(1, Level::High).unwrap();
            sim.set_output(1, Level::Low).unwrap();
        }
        assert_eq!(sim.read_input(3).unwrap(), Level::Low);

        // Stepping away opens the switch again
        sim.set_output(2, Level::High).unwrap();
        sim.set_output(1, Level::High).unwrap();
        assert_eq!(sim.read_input(3).unwrap(), Level::High);
        assert_eq!(sim.carriage_distance(3), Some(1));
    }

    #[test]
    fn test_forced_input_overrides_carriage() {
        let sim = SimulatedGpio::new();
        sim.configure(3, PinMode::Input).unwrap();
        sim.add_carriage(Carriage {
            step_pin: 1,
            dir_pin: 2,
            limit_pin: 3,
            toward_switch: Level::Low,
            distance: 10,
            active_level: Level::Low,
        });
        sim.force_input(3, Level::Low);
        assert_eq!(sim.read_input(3).unwrap(), Level::Low);
        sim.clear_forced(3);
        assert_eq!(sim.read_input(3).unwrap(), Level::High);
    }

    #[test]
    fn test_mode_mismatch_is_rejected() {
        let sim = SimulatedGpio::new();
        sim.configure(5, PinMode::Input).unwrap();
        assert!(matches!(
            sim.set_output(5, Level::High),
            Err(GpioError::WrongMode { pin: 5, .. })
        ));
        assert!(matches!(
            sim.read_input(6),
            Err(GpioError::NotConfigured { pin: 6 })
        ));
    }

    #[test]
    fn test_rig_bench_has_a_carriage_per_axis() {
        let config = RigConfig::default();
        let sim = SimulatedGpio::for_rig(&config, 3);
        for axis in Axis::ALL {
            let limit = config.axis(axis).limit_pin.unwrap();
            assert_eq!(
                sim.carriage_distance(limit),
                Some(3 * i64::from(config.axis(axis).steps_per_unit))
            );
        }
    }

    #[test]
    fn test_injected_fault_fails_io_until_cleared() {
        let sim = SimulatedGpio::new();
        sim.configure(1, PinMode::Output { initial: Level::Low }).unwrap();
        sim.configure(2, PinMode::Input).unwrap();
        sim.inject_fault(1);
        sim.inject_fault(2);

        assert!(sim.set_output(1, Level::High).is_err());
        assert!(sim.read_input(2).is_err());
        assert_eq!(sim.pulse_count(1), 0);
        assert_eq!(sim.output_level(1), Some(Level::Low));

        sim.clear_fault(1);
        sim.clear_fault(2);
        sim.set_output(1, Level::High).unwrap();
        assert_eq!(sim.read_input(2).unwrap(), Level::High);
    }

    #[test]
    fn test_refused_pin_fails_once() {
        let sim = SimulatedGpio::new();
        sim.refuse(9);
        assert!(sim.configure(9, PinMode::Input).is_err());
        assert!(sim.configure(9, PinMode::Input).is_ok());
    }
}
