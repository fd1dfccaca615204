// Motion control for the three-axis camera rig
//
// Provides:
// - Platform GPIO access with owned pin handles (and a simulated bench)
// - Per-axis stepper control with limit interlock and homing
// - Background limit switch sampling
// - The supervisor that integrates the axes into one logical position

pub mod axis;
pub mod gpio;
pub mod limits;
pub mod sim;
mod supervisor;

pub use axis::{Axis, AxisController, Direction, HomeResult, LimitSensor, MoveResult};
pub use gpio::{Gpio, GpioError, Level, Polarity};
pub use limits::{LimitMonitor, LimitSnapshot};
pub use sim::SimulatedGpio;
pub use supervisor::{
    HardwareError, HomeOutcome, LogicalPosition, MotionError, MotionStatus, MotionSupervisor,
    MoveOutcome, RigState,
};
