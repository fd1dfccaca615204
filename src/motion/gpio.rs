// Platform GPIO access for the rig
//
// The `Gpio` trait is the narrow surface the motion core needs from the
// platform: configure a pin, drive an output, sample an input, release.
// Pins are never driven through the trait directly by motion code; they are
// wrapped in `OutputPin` / `InputPin` handles that own the binding for their
// lifetime and release it exactly once.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Electrical level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn inverted(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// Which electrical level means "asserted" for a signal.
///
/// Limit switches on the rig pull the input low when the carriage reaches
/// them, and the stepper drivers enable on a low EN line, so both default to
/// active-low. Neither is assumed anywhere in the motion code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    #[default]
    ActiveLow,
    ActiveHigh,
}

impl Polarity {
    pub fn active_level(self) -> Level {
        match self {
            Polarity::ActiveLow => Level::Low,
            Polarity::ActiveHigh => Level::High,
        }
    }

    pub fn inactive_level(self) -> Level {
        self.active_level().inverted()
    }

    pub fn is_active(self, level: Level) -> bool {
        level == self.active_level()
    }
}

/// Pin configuration requested from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output { initial: Level },
}

/// Error types for GPIO access
#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("GPIO {pin} is not configured")]
    NotConfigured { pin: u32 },

    #[error("GPIO {pin} is configured as {actual}, expected {expected}")]
    WrongMode {
        pin: u32,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("GPIO {pin} has already been released")]
    Released { pin: u32 },

    #[error("GPIO {pin} could not be acquired: {reason}")]
    Acquire { pin: u32, reason: String },

    #[error("GPIO {pin} I/O failed: {reason}")]
    Io { pin: u32, reason: String },

    #[error("GPIO backend unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "gpio-hardware")]
    #[error("sysfs GPIO error: {0}")]
    Sysfs(#[from] sysfs_gpio::Error),
}

/// Platform GPIO collaborator
pub trait Gpio: Send + Sync {
    fn configure(&self, pin: u32, mode: PinMode) -> Result<(), GpioError>;
    fn set_output(&self, pin: u32, level: Level) -> Result<(), GpioError>;
    fn read_input(&self, pin: u32) -> Result<Level, GpioError>;
    fn release(&self, pin: u32) -> Result<(), GpioError>;

    /// Release every pin this backend still holds
    fn release_all(&self) -> Result<(), GpioError>;
}

/// Exclusively owned output binding (DIR, STEP or ENABLE)
pub struct OutputPin {
    gpio: Arc<dyn Gpio>,
    pin: u32,
    released: bool,
}

impl OutputPin {
    /// Configure `pin` as an output, driven to `initial` before anything else happens
    pub fn acquire(gpio: Arc<dyn Gpio>, pin: u32, initial: Level) -> Result<Self, GpioError> {
        gpio.configure(pin, PinMode::Output { initial })?;
        debug!("Acquired output GPIO {} (initial {:?})", pin, initial);
        Ok(Self {
            gpio,
            pin,
            released: false,
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn set(&mut self, level: Level) -> Result<(), GpioError> {
        if self.released {
            return Err(GpioError::Released { pin: self.pin });
        }
        self.gpio.set_output(self.pin, level)
    }

    /// Give the pin back to the platform; later calls are no-ops
    pub fn release(&mut self) -> Result<(), GpioError> {
        if std::mem::replace(&mut self.released, true) {
            return Ok(());
        }
        self.gpio.release(self.pin)
    }
}

impl Drop for OutputPin {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release output GPIO {}: {}", self.pin, e);
        }
    }
}

/// Input binding; shareable because sampling never changes pin state
pub struct InputPin {
    gpio: Arc<dyn Gpio>,
    pin: u32,
    released: AtomicBool,
}

impl InputPin {
    pub fn acquire(gpio: Arc<dyn Gpio>, pin: u32) -> Result<Self, GpioError> {
        gpio.configure(pin, PinMode::Input)?;
        debug!("Acquired input GPIO {}", pin);
        Ok(Self {
            gpio,
            pin,
            released: AtomicBool::new(false),
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn read(&self) -> Result<Level, GpioError> {
        if self.released.load(Ordering::Acquire) {
            return Err(GpioError::Released { pin: self.pin });
        }
        self.gpio.read_input(self.pin)
    }

    pub fn release(&self) -> Result<(), GpioError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.gpio.release(self.pin)
    }
}

impl Drop for InputPin {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release input GPIO {}: {}", self.pin, e);
        }
    }
}

/// Open the platform GPIO backend compiled into this build
pub fn hardware() -> Result<Arc<dyn Gpio>, GpioError> {
    #[cfg(feature = "gpio-hardware")]
    {
        Ok(Arc::new(sysfs::SysfsGpio::new()))
    }
    #[cfg(not(feature = "gpio-hardware"))]
    {
        Err(GpioError::Unavailable(
            "built without the gpio-hardware feature; rebuild with --features gpio-hardware or run with --simulate".to_string(),
        ))
    }
}

#[cfg(feature = "gpio-hardware")]
pub mod sysfs {
    // Linux sysfs backend (/sys/class/gpio)

    use super::{Gpio, GpioError, Level, PinMode};
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::thread;
    use std::time::Duration;
    use sysfs_gpio::{Direction, Pin};

    /// udev needs a moment to fix permissions on a freshly exported pin
    const EXPORT_SETTLE: Duration = Duration::from_millis(10);

    #[derive(Default)]
    pub struct SysfsGpio {
        exported: Mutex<BTreeSet<u32>>,
    }

    impl SysfsGpio {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_exported(&self, pin: u32) -> bool {
            self.exported.lock().contains(&pin)
        }

        // A pin is tracked as soon as its export succeeds, so a failed
        // direction write still gets unexported on release
        fn claim(
            &self,
            pin: u32,
            export: impl FnOnce() -> Result<(), sysfs_gpio::Error>,
            setup: impl FnOnce() -> Result<(), sysfs_gpio::Error>,
        ) -> Result<(), sysfs_gpio::Error> {
            export()?;
            self.exported.lock().insert(pin);
            setup()
        }
    }

    impl Gpio for SysfsGpio {
        fn configure(&self, pin: u32, mode: PinMode) -> Result<(), GpioError> {
            let handle = Pin::new(pin as u64);
            let direction = match mode {
                PinMode::Input => Direction::In,
                PinMode::Output { initial: Level::High } => Direction::High,
                PinMode::Output { initial: Level::Low } => Direction::Low,
            };
            self.claim(
                pin,
                || handle.export(),
                || {
                    thread::sleep(EXPORT_SETTLE);
                    handle.set_direction(direction)
                },
            )?;
            Ok(())
        }

        fn set_output(&self, pin: u32, level: Level) -> Result<(), GpioError> {
            let value = match level {
                Level::Low => 0,
                Level::High => 1,
            };
            Pin::new(pin as u64).set_value(value)?;
            Ok(())
        }

        fn read_input(&self, pin: u32) -> Result<Level, GpioError> {
            match Pin::new(pin as u64).get_value()? {
                0 => Ok(Level::Low),
                _ => Ok(Level::High),
            }
        }

        fn release(&self, pin: u32) -> Result<(), GpioError> {
            if self.exported.lock().remove(&pin) {
                Pin::new(pin as u64).unexport()?;
            }
            Ok(())
        }

        fn release_all(&self) -> Result<(), GpioError> {
            let pins: Vec<u32> = std::mem::take(&mut *self.exported.lock())
                .into_iter()
                .collect();
            for pin in pins {
                Pin::new(pin as u64).unexport()?;
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn refused() -> Result<(), sysfs_gpio::Error> {
            Err(sysfs_gpio::Error::Unexpected("direction refused".to_string()))
        }

        #[test]
        fn test_failed_direction_keeps_pin_tracked() {
            let gpio = SysfsGpio::new();
            assert!(gpio.claim(17, || Ok(()), refused).is_err());
            assert!(gpio.is_exported(17));
        }

        #[test]
        fn test_failed_export_is_not_tracked() {
            let gpio = SysfsGpio::new();
            assert!(gpio.claim(17, refused, || Ok(())).is_err());
            assert!(!gpio.is_exported(17));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::sim::SimulatedGpio;

    #[test]
    fn test_polarity_levels() {
        assert_eq!(Polarity::ActiveLow.active_level(), Level::Low);
        assert_eq!(Polarity::ActiveLow.inactive_level(), Level::High);
        assert!(Polarity::ActiveHigh.is_active(Level::High));
        assert!(!Polarity::ActiveHigh.is_active(Level::Low));
    }

    #[test]
    fn test_output_pin_starts_at_initial_level() {
        let sim = SimulatedGpio::new();
        let _pin = OutputPin::acquire(sim.handle(), 4, Level::High).unwrap();
        assert_eq!(sim.output_level(4), Some(Level::High));
    }

    #[test]
    fn test_release_is_idempotent() {
        let sim = SimulatedGpio::new();
        let mut pin = OutputPin::acquire(sim.handle(), 4, Level::Low).unwrap();
        pin.release().unwrap();
        pin.release().unwrap();
        assert!(!sim.is_configured(4));
        assert!(matches!(pin.set(Level::High), Err(GpioError::Released { pin: 4 })));
    }

    #[test]
    fn test_drop_releases_pins() {
        let sim = SimulatedGpio::new();
        {
            let _out = OutputPin::acquire(sim.handle(), 7, Level::Low).unwrap();
            let _input = InputPin::acquire(sim.handle(), 8).unwrap();
            assert!(sim.is_configured(7));
            assert!(sim.is_configured(8));
        }
        assert!(!sim.is_configured(7));
        assert!(!sim.is_configured(8));
    }

    #[test]
    fn test_released_input_refuses_reads() {
        let sim = SimulatedGpio::new();
        let input = InputPin::acquire(sim.handle(), 3).unwrap();
        input.release().unwrap();
        assert!(matches!(input.read(), Err(GpioError::Released { pin: 3 })));
    }

    #[cfg(not(feature = "gpio-hardware"))]
    #[test]
    fn test_hardware_backend_unavailable_without_feature() {
        assert!(matches!(hardware(), Err(GpioError::Unavailable(_))));
    }
}
