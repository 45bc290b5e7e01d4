//! The `Teleoperator` trait: human-operated input devices (leader arms,
//! gamepads, phones) that produce actions for a [`Robot`][crate::robot::Robot]
//! and may receive feedback from it.

use armature_types::{Action, Features, RobotError};

pub trait Teleoperator: Send {
    /// Registry type name, e.g. `"so_leader"`.
    fn name(&self) -> &str;

    /// Instance identifier; also names the calibration file.
    fn id(&self) -> &str;

    /// Keys and descriptors of [`Teleoperator::get_action`]'s output.
    fn action_features(&self) -> Features;

    /// Keys and descriptors accepted by [`Teleoperator::send_feedback`].
    /// Empty when the device takes no feedback.
    fn feedback_features(&self) -> Features;

    fn is_connected(&self) -> bool;

    fn connect(&mut self, calibrate: bool) -> Result<(), RobotError>;

    fn is_calibrated(&mut self) -> Result<bool, RobotError>;

    fn calibrate(&mut self) -> Result<(), RobotError>;

    fn configure(&mut self) -> Result<(), RobotError>;

    /// Read the operator's current command.
    fn get_action(&mut self) -> Result<Action, RobotError>;

    /// Push feedback (e.g. forces) to the operator.
    fn send_feedback(&mut self, feedback: &Action) -> Result<(), RobotError>;

    fn disconnect(&mut self) -> Result<(), RobotError>;
}
