//! SO-series six-joint arms: a follower [`Robot`][crate::robot::Robot] and a
//! leader [`Teleoperator`][crate::teleoperator::Teleoperator] sharing one
//! motor layout and one calibration procedure.

mod follower;
mod leader;

pub use follower::SoFollower;
pub use leader::SoLeader;

use std::collections::BTreeMap;

use tracing::info;

use armature_types::{FeatureSpec, Features, RobotError, ValueType};

use crate::calibration_store::CalibrationStore;
use crate::motors::{Calibration, Motor, MotorBus, MotorCalibration, NormMode, POSITION_MODE, Register};
use crate::operator::Operator;

pub const SO_FOLLOWER: &str = "so_follower";
pub const SO_LEADER: &str = "so_leader";

/// Joint whose range is the full encoder turn rather than a recorded span.
const FULL_TURN_MOTOR: &str = "wrist_roll";

const MOTOR_MODEL: &str = "sts3215";

/// The six motors of an SO arm.  Body joints use degrees or a symmetric
/// percentage; the gripper always uses `0..=100`.
pub fn so_motors(use_degrees: bool) -> BTreeMap<String, Motor> {
    let body = if use_degrees {
        NormMode::Degrees
    } else {
        NormMode::RangeM100To100
    };
    [
        ("shoulder_pan", 1, body),
        ("shoulder_lift", 2, body),
        ("elbow_flex", 3, body),
        ("wrist_flex", 4, body),
        ("wrist_roll", 5, body),
        ("gripper", 6, NormMode::Range0To100),
    ]
    .into_iter()
    .map(|(name, id, mode)| (name.to_string(), Motor::new(id, MOTOR_MODEL, mode)))
    .collect()
}

/// `"<motor>.pos"` float feature for every motor.
pub(crate) fn position_features(motors: &BTreeMap<String, Motor>) -> Features {
    motors
        .keys()
        .map(|m| (format!("{m}.pos"), FeatureSpec::Scalar(ValueType::Float32)))
        .collect()
}

/// Interactive calibration shared by leader and follower.
///
/// With a stored calibration the operator may keep it (empty answer) or type
/// `c` to recalibrate.  A fresh calibration is written to the motors and
/// saved to `store`.
pub(crate) fn run_calibration(
    label: &str,
    id: &str,
    bus: &mut dyn MotorBus,
    operator: &mut dyn Operator,
    store: &CalibrationStore,
    stored: Option<&Calibration>,
) -> Result<Calibration, RobotError> {
    if let Some(cal) = stored {
        let answer = operator.prompt(&format!(
            "Press ENTER to use provided calibration file associated with the id {id}, \
             or type 'c' and press ENTER to run calibration: "
        ))?;
        if answer.trim() != "c" {
            info!(device = label, id, "writing stored calibration to the motors");
            bus.write_calibration(cal.clone())?;
            return Ok(cal.clone());
        }
    }

    info!(device = label, id, "running calibration");
    bus.disable_torque()?;
    for motor in bus.motor_names() {
        bus.write_raw(Register::OperatingMode, &motor, POSITION_MODE)?;
    }

    operator.prompt(&format!(
        "Move {label} to the middle of its range of motion and press ENTER...."
    ))?;
    let all = bus.motor_names();
    let homings = bus.set_half_turn_homings(&all)?;

    let recorded: Vec<String> = all
        .iter()
        .filter(|m| m.as_str() != FULL_TURN_MOTOR)
        .cloned()
        .collect();
    operator.notify(&format!(
        "Move all joints except '{FULL_TURN_MOTOR}' sequentially through their entire ranges \
         of motion.\nRecording positions. Press ENTER to stop..."
    ));
    let (mut mins, mut maxs) = bus.record_ranges_of_motion(&recorded, operator)?;

    if let Some(motor) = bus.motors().get(FULL_TURN_MOTOR) {
        let max_res = motor.resolution()? as i32 - 1;
        mins.insert(FULL_TURN_MOTOR.to_string(), 0);
        maxs.insert(FULL_TURN_MOTOR.to_string(), max_res);
    }

    let calibration: Calibration = bus
        .motors()
        .iter()
        .map(|(name, motor)| {
            (
                name.clone(),
                MotorCalibration {
                    id: motor.id,
                    drive_mode: 0,
                    homing_offset: homings.get(name).copied().unwrap_or(0),
                    range_min: mins.get(name).copied().unwrap_or(0),
                    range_max: maxs.get(name).copied().unwrap_or(0),
                },
            )
        })
        .collect();

    bus.write_calibration(calibration.clone())?;
    let path = store.save(id, &calibration)?;
    info!(device = label, path = %path.display(), "calibration saved");
    Ok(calibration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn so_motor_table() {
        let motors = so_motors(false);
        assert_eq!(motors.len(), 6);
        assert_eq!(motors["gripper"].norm_mode, NormMode::Range0To100);
        assert_eq!(motors["elbow_flex"].norm_mode, NormMode::RangeM100To100);
        assert_eq!(motors["shoulder_pan"].id, 1);

        let degrees = so_motors(true);
        assert_eq!(degrees["wrist_roll"].norm_mode, NormMode::Degrees);
        assert_eq!(degrees["gripper"].norm_mode, NormMode::Range0To100);
    }

    #[test]
    fn position_feature_keys() {
        let features = position_features(&so_motors(false));
        assert!(features.contains_key("gripper.pos"));
        assert_eq!(
            features["shoulder_lift.pos"],
            FeatureSpec::Scalar(ValueType::Float32)
        );
    }
}
