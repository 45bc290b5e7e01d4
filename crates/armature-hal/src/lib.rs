//! `armature-hal` – Hardware Abstraction
//!
//! Everything between a control application and the servos and cameras of a
//! physical robot.
//!
//! # Modules
//!
//! - [`robot`] / [`teleoperator`] – the [`Robot`] and [`Teleoperator`]
//!   traits that tooling drives without knowing the hardware underneath.
//! - [`motors`] – the [`MotorBus`] trait, per-motor calibration and the
//!   raw ↔ normalized position conversions.
//! - [`camera`] – the [`Camera`] trait and a latest-frame background reader.
//! - [`so_arm`] – [`SoFollower`] and [`SoLeader`], the six-joint SO arms.
//! - [`sim`] – in-process bus and camera used by tests and headless runs.
//! - [`config`] / [`calibration_store`] – typed device configuration and
//!   on-disk calibration files.
//! - [`registry`] – [`HardwareRegistry`]: builds robots and teleoperators
//!   from a type name and a [`DeviceConfig`].
//! - [`teleop_loop`] – fixed-rate leader → follower loop.
//! - [`operator`] – the human side of interactive calibration.

pub mod calibration_store;
pub mod camera;
pub mod config;
pub mod motors;
pub mod operator;
pub mod registry;
pub mod robot;
pub mod sim;
pub mod so_arm;
pub mod teleop_loop;
pub mod teleoperator;

pub use calibration_store::{CalibrationStore, DeviceKind};
pub use camera::{Camera, CameraConfig};
pub use config::{DeviceConfig, SoFollowerConfig, SoLeaderConfig};
pub use motors::{Calibration, Motor, MotorBus, MotorCalibration, NormMode, Register};
pub use operator::{Operator, ScriptedOperator};
pub use registry::{BusRegistry, HardwareRegistry};
pub use robot::Robot;
pub use sim::{SimCamera, SimMotorBus};
pub use so_arm::{SoFollower, SoLeader};
pub use teleop_loop::{TeleopLoopConfig, TeleopStats, run_teleop};
pub use teleoperator::Teleoperator;
