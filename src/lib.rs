// Controller for a three-axis stepper camera rig with limit-switch homing
// and region-of-interest marking

pub mod camera;
pub mod config;
pub mod messages;
pub mod motion;
pub mod roi;
pub mod runtime;
pub mod session;
