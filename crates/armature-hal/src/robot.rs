//! The `Robot` trait every hardware integration implements.
//!
//! Tooling (teleoperation, recording, policy rollout) only ever talks to this
//! trait, so a new arm or mobile base plugs in by implementing it and
//! registering a constructor with the
//! [`HardwareRegistry`][crate::registry::HardwareRegistry].

use std::collections::BTreeMap;

use tracing::warn;

use armature_types::{Action, Features, Observation, RobotError};

/// A robot that produces observations and accepts actions.
///
/// Lifecycle: `connect(calibrate)` → (`calibrate` / `configure`) →
/// `get_observation` / `send_action` → `disconnect`.  I/O on a disconnected
/// robot fails with [`RobotError::NotConnected`].
pub trait Robot: Send {
    /// Registry type name, e.g. `"so_follower"`.
    fn name(&self) -> &str;

    /// Instance identifier; also names the calibration file.
    fn id(&self) -> &str;

    /// Keys and descriptors of [`Robot::get_observation`]'s output.  Does not
    /// need a connection.
    fn observation_features(&self) -> Features;

    /// Keys and descriptors accepted by [`Robot::send_action`].  Does not
    /// need a connection.
    fn action_features(&self) -> Features;

    fn is_connected(&self) -> bool;

    /// Open every device.  When `calibrate` is set and the hardware does not
    /// match the stored calibration, run [`Robot::calibrate`] first.
    ///
    /// # Errors
    ///
    /// [`RobotError::AlreadyConnected`] when called twice.
    fn connect(&mut self, calibrate: bool) -> Result<(), RobotError>;

    /// Whether the hardware currently matches the active calibration.
    fn is_calibrated(&mut self) -> Result<bool, RobotError>;

    /// Run (or restore) the calibration procedure and persist the result.
    fn calibrate(&mut self) -> Result<(), RobotError>;

    /// Apply one-off settings (control mode, gains) after connecting.
    fn configure(&mut self) -> Result<(), RobotError>;

    /// Read the current state of every sensor.
    fn get_observation(&mut self) -> Result<Observation, RobotError>;

    /// Command the robot.  Returns the action actually sent, which may differ
    /// from `action` after safety clipping.
    fn send_action(&mut self, action: &Action) -> Result<Action, RobotError>;

    /// Release every device, including background threads.
    fn disconnect(&mut self) -> Result<(), RobotError>;
}

/// Limit each goal so it lies within `max_relative_target` of the present
/// position.
///
/// Motors without a present reading are passed through unchanged.
pub fn ensure_safe_goal_position(
    goal: &BTreeMap<String, f64>,
    present: &BTreeMap<String, f64>,
    max_relative_target: f64,
) -> BTreeMap<String, f64> {
    goal.iter()
        .map(|(name, &target)| {
            let Some(&current) = present.get(name) else {
                return (name.clone(), target);
            };
            let diff = target - current;
            let safe = current + diff.clamp(-max_relative_target, max_relative_target);
            if (safe - target).abs() > f64::EPSILON {
                warn!(
                    motor = %name,
                    requested = target,
                    clipped = safe,
                    "relative goal position magnitude had to be clamped"
                );
            }
            (name.clone(), safe)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use armature_types::{FeatureSpec, Value, ValueType};

    /// Minimal in-process robot used only for tests.
    struct MockRobot {
        connected: bool,
        position: f64,
    }

    impl Robot for MockRobot {
        fn name(&self) -> &str {
            "mock"
        }
        fn id(&self) -> &str {
            "unit"
        }
        fn observation_features(&self) -> Features {
            Features::from([("joint.pos".to_string(), FeatureSpec::Scalar(ValueType::Float32))])
        }
        fn action_features(&self) -> Features {
            self.observation_features()
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn connect(&mut self, _calibrate: bool) -> Result<(), RobotError> {
            if self.connected {
                return Err(RobotError::AlreadyConnected("mock".to_string()));
            }
            self.connected = true;
            Ok(())
        }
        fn is_calibrated(&mut self) -> Result<bool, RobotError> {
            Ok(true)
        }
        fn calibrate(&mut self) -> Result<(), RobotError> {
            Ok(())
        }
        fn configure(&mut self) -> Result<(), RobotError> {
            Ok(())
        }
        fn get_observation(&mut self) -> Result<Observation, RobotError> {
            if !self.connected {
                return Err(RobotError::NotConnected("mock".to_string()));
            }
            Ok(Observation::from([("joint.pos".to_string(), Value::Float(self.position))]))
        }
        fn send_action(&mut self, action: &Action) -> Result<Action, RobotError> {
            if !self.connected {
                return Err(RobotError::NotConnected("mock".to_string()));
            }
            if let Some(v) = action.get("joint.pos").and_then(Value::as_f64) {
                self.position = v;
            }
            Ok(action.clone())
        }
        fn disconnect(&mut self) -> Result<(), RobotError> {
            self.connected = false;
            Ok(())
        }
    }

    #[test]
    fn features_are_available_without_connection() {
        let robot = MockRobot { connected: false, position: 0.0 };
        assert!(robot.action_features().contains_key("joint.pos"));
    }

    #[test]
    fn trait_object_round_trip() {
        let mut robot: Box<dyn Robot> = Box::new(MockRobot { connected: false, position: 0.0 });
        assert!(matches!(robot.get_observation(), Err(RobotError::NotConnected(_))));
        robot.connect(false).unwrap();
        robot
            .send_action(&Action::from([("joint.pos".to_string(), Value::Float(12.0))]))
            .unwrap();
        let obs = robot.get_observation().unwrap();
        assert_eq!(obs["joint.pos"], Value::Float(12.0));
    }

    #[test]
    fn safe_goal_clamps_large_steps() {
        let goal = BTreeMap::from([("a".to_string(), 50.0), ("b".to_string(), -3.0)]);
        let present = BTreeMap::from([("a".to_string(), 0.0), ("b".to_string(), 0.0)]);
        let safe = ensure_safe_goal_position(&goal, &present, 10.0);
        assert!((safe["a"] - 10.0).abs() < 1e-9);
        assert!((safe["b"] + 3.0).abs() < 1e-9);
    }

    #[test]
    fn safe_goal_passes_through_unknown_present() {
        let goal = BTreeMap::from([("a".to_string(), 50.0)]);
        let safe = ensure_safe_goal_position(&goal, &BTreeMap::new(), 1.0);
        assert!((safe["a"] - 50.0).abs() < 1e-9);
    }
}
