//! Motor model, per-motor calibration records and the normalization that
//! turns raw encoder ticks into the units robots expose.
//!
//! A [`MotorBus`][bus::MotorBus] talks raw ticks.  Robots talk normalized
//! values: a symmetric percentage, a `0..=100` percentage (grippers), or
//! degrees around the middle of the calibrated range.

pub mod bus;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use armature_types::RobotError;

pub use bus::{MotorBus, TorqueGuard, torque_disabled};

/// Value written to `OperatingMode` to select position control.
pub const POSITION_MODE: i32 = 0;

/// How a motor's raw position is mapped to the value robots expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormMode {
    /// `-100..=100`, `0` at the middle of the calibrated range.
    RangeM100To100,
    /// `0..=100`, used for grippers.
    Range0To100,
    /// Degrees around the middle of the calibrated range.
    Degrees,
}

/// A motor on a bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Motor {
    pub id: u8,
    pub model: String,
    pub norm_mode: NormMode,
}

impl Motor {
    pub fn new(id: u8, model: impl Into<String>, norm_mode: NormMode) -> Self {
        Self {
            id,
            model: model.into(),
            norm_mode,
        }
    }

    /// Encoder ticks per revolution for this motor's model.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Config`] for unknown models.
    pub fn resolution(&self) -> Result<u32, RobotError> {
        model_resolution(&self.model)
    }
}

/// Encoder resolution (ticks per revolution) of the servo models the stack
/// knows about.
///
/// # Errors
///
/// Returns [`RobotError::Config`] for unknown models.
pub fn model_resolution(model: &str) -> Result<u32, RobotError> {
    match model {
        "sts3215" | "sts3250" | "sm8512bl" => Ok(4096),
        "xl330-m077" | "xl330-m288" | "xl430-w250" | "xm430-w350" | "xm540-w270" => Ok(4096),
        "scs0009" => Ok(1024),
        other => Err(RobotError::Config(format!("unknown motor model '{other}'"))),
    }
}

/// Control-table entries the stack reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Register {
    PresentPosition,
    GoalPosition,
    TorqueEnable,
    OperatingMode,
    HomingOffset,
    MinPositionLimit,
    MaxPositionLimit,
    PGain,
    IGain,
    DGain,
}

impl Register {
    /// Position registers carry values that are normalized with the motor's
    /// calibration.
    pub fn is_position(self) -> bool {
        matches!(self, Register::PresentPosition | Register::GoalPosition)
    }
}

/// Per-motor calibration: homing offset, drive direction and the range of
/// motion recorded by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorCalibration {
    pub id: u8,
    pub drive_mode: u8,
    pub homing_offset: i32,
    pub range_min: i32,
    pub range_max: i32,
}

impl MotorCalibration {
    fn checked_span(&self, motor: &str) -> Result<f64, RobotError> {
        if self.range_max == self.range_min {
            return Err(RobotError::Calibration(format!(
                "invalid calibration for '{motor}': min and max are equal ({})",
                self.range_min
            )));
        }
        Ok(f64::from(self.range_max - self.range_min))
    }
}

/// Calibration of a whole bus, keyed by motor name.
pub type Calibration = BTreeMap<String, MotorCalibration>;

/// Convert a raw tick reading into the motor's normalized unit.
///
/// # Errors
///
/// Returns [`RobotError::Calibration`] when the range is degenerate and
/// [`RobotError::Config`] when the motor model is unknown.
pub fn normalize(
    name: &str,
    motor: &Motor,
    cal: &MotorCalibration,
    raw: i32,
) -> Result<f64, RobotError> {
    let (min, max) = (cal.range_min, cal.range_max);
    match motor.norm_mode {
        NormMode::RangeM100To100 => {
            let span = cal.checked_span(name)?;
            let bounded = f64::from(raw.clamp(min.min(max), max.max(min)));
            let norm = (bounded - f64::from(min)) / span * 200.0 - 100.0;
            Ok(if cal.drive_mode != 0 { -norm } else { norm })
        }
        NormMode::Range0To100 => {
            let span = cal.checked_span(name)?;
            let bounded = f64::from(raw.clamp(min.min(max), max.max(min)));
            let norm = (bounded - f64::from(min)) / span * 100.0;
            Ok(if cal.drive_mode != 0 { 100.0 - norm } else { norm })
        }
        NormMode::Degrees => {
            let mid = f64::from(min + max) / 2.0;
            let max_res = f64::from(motor.resolution()? - 1);
            Ok((f64::from(raw) - mid) * 360.0 / max_res)
        }
    }
}

/// Convert a normalized value back into raw ticks, clamped to the calibrated
/// range.
///
/// # Errors
///
/// Same as [`normalize`].
pub fn unnormalize(
    name: &str,
    motor: &Motor,
    cal: &MotorCalibration,
    value: f64,
) -> Result<i32, RobotError> {
    if !value.is_finite() {
        return Err(RobotError::Config(format!("goal for motor '{name}' is not finite: {value}")));
    }
    let (min, max) = (cal.range_min, cal.range_max);
    let raw = match motor.norm_mode {
        NormMode::RangeM100To100 => {
            let span = cal.checked_span(name)?;
            let value = if cal.drive_mode != 0 { -value } else { value };
            let bounded = value.clamp(-100.0, 100.0);
            (bounded + 100.0) / 200.0 * span + f64::from(min)
        }
        NormMode::Range0To100 => {
            let span = cal.checked_span(name)?;
            let value = if cal.drive_mode != 0 { 100.0 - value } else { value };
            let bounded = value.clamp(0.0, 100.0);
            bounded / 100.0 * span + f64::from(min)
        }
        NormMode::Degrees => {
            let mid = f64::from(min + max) / 2.0;
            let max_res = f64::from(motor.resolution()? - 1);
            value * max_res / 360.0 + mid
        }
    };
    Ok((raw.round() as i32).clamp(min.min(max), max.max(min)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cal(min: i32, max: i32, drive_mode: u8) -> MotorCalibration {
        MotorCalibration {
            id: 1,
            drive_mode,
            homing_offset: 0,
            range_min: min,
            range_max: max,
        }
    }

    #[test]
    fn symmetric_range_maps_ends_and_middle() {
        let m = Motor::new(1, "sts3215", NormMode::RangeM100To100);
        let c = cal(1000, 3000, 0);
        assert!((normalize("j", &m, &c, 1000).unwrap() + 100.0).abs() < 1e-9);
        assert!((normalize("j", &m, &c, 2000).unwrap()).abs() < 1e-9);
        assert!((normalize("j", &m, &c, 3000).unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn symmetric_range_clamps_out_of_range_readings() {
        let m = Motor::new(1, "sts3215", NormMode::RangeM100To100);
        let c = cal(1000, 3000, 0);
        assert!((normalize("j", &m, &c, 4000).unwrap() - 100.0).abs() < 1e-9);
        assert_eq!(unnormalize("j", &m, &c, 250.0).unwrap(), 3000);
    }

    #[test]
    fn drive_mode_inverts_direction() {
        let m = Motor::new(1, "sts3215", NormMode::RangeM100To100);
        let c = cal(1000, 3000, 1);
        assert!((normalize("j", &m, &c, 1500).unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(unnormalize("j", &m, &c, 50.0).unwrap(), 1500);

        let g = Motor::new(6, "sts3215", NormMode::Range0To100);
        assert!((normalize("g", &g, &c, 1000).unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn gripper_range_is_zero_to_hundred() {
        let m = Motor::new(6, "sts3215", NormMode::Range0To100);
        let c = cal(2000, 3000, 0);
        assert!((normalize("g", &m, &c, 2500).unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(unnormalize("g", &m, &c, 25.0).unwrap(), 2250);
        assert_eq!(unnormalize("g", &m, &c, -10.0).unwrap(), 2000);
    }

    #[test]
    fn degrees_are_centred_on_range_middle() {
        let m = Motor::new(1, "sts3215", NormMode::Degrees);
        let c = cal(0, 4094, 0);
        assert!((normalize("j", &m, &c, 2047).unwrap()).abs() < 1e-9);
        let quarter = normalize("j", &m, &c, 2047 + 1024).unwrap();
        assert!((quarter - 1024.0 * 360.0 / 4095.0).abs() < 1e-9);
        assert_eq!(unnormalize("j", &m, &c, quarter).unwrap(), 2047 + 1024);
    }

    #[test]
    fn degenerate_range_is_a_calibration_error() {
        let m = Motor::new(1, "sts3215", NormMode::RangeM100To100);
        let c = cal(2047, 2047, 0);
        assert!(matches!(normalize("j", &m, &c, 2047), Err(RobotError::Calibration(_))));
        assert!(matches!(unnormalize("j", &m, &c, 0.0), Err(RobotError::Calibration(_))));
    }

    #[test]
    fn non_finite_goals_are_refused() {
        let m = Motor::new(1, "sts3215", NormMode::RangeM100To100);
        let c = cal(1000, 3000, 0);
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(unnormalize("j", &m, &c, value), Err(RobotError::Config(_))));
        }
    }

    #[test]
    fn unknown_model_is_rejected() {
        let m = Motor::new(1, "mystery-servo", NormMode::Degrees);
        assert!(matches!(m.resolution(), Err(RobotError::Config(_))));
        assert_eq!(model_resolution("scs0009").unwrap(), 1024);
    }

    #[test]
    fn only_position_registers_normalize() {
        assert!(Register::PresentPosition.is_position());
        assert!(Register::GoalPosition.is_position());
        assert!(!Register::HomingOffset.is_position());
    }
}
