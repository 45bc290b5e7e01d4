//! The [`MotorBus`] trait: the seam between robots and servo communication.
//!
//! A driver only implements the transport primitives (open/close, ping,
//! single-register read/write).  Connection bookkeeping, calibration,
//! homing, range-of-motion recording and normalized sync I/O are provided
//! on top of those primitives so every driver behaves the same way.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use tracing::{debug, info, instrument, warn};

use armature_types::RobotError;

use super::{Motor, MotorCalibration, Register, normalize, unnormalize};
use crate::operator::Operator;

/// A group of servos sharing one communication link.
pub trait MotorBus: Send {
    /// Port or address of the link, e.g. `"/dev/ttyACM0"` or `"sim://arm"`.
    fn port(&self) -> &str;

    /// Motor table keyed by motor name.
    fn motors(&self) -> &BTreeMap<String, Motor>;

    fn is_connected(&self) -> bool;

    /// Open the underlying link.  Called by [`MotorBus::connect`].
    fn open(&mut self) -> Result<(), RobotError>;

    /// Close the underlying link.  Called by [`MotorBus::disconnect`].
    fn close(&mut self) -> Result<(), RobotError>;

    /// Whether a motor with `id` answers on the link.
    fn ping(&mut self, id: u8) -> Result<bool, RobotError>;

    /// Read one raw register value from `motor`.
    fn read_raw(&mut self, register: Register, motor: &str) -> Result<i32, RobotError>;

    /// Write one raw register value to `motor`.
    fn write_raw(&mut self, register: Register, motor: &str, value: i32) -> Result<(), RobotError>;

    /// Calibration used to normalize position registers.
    fn calibration(&self) -> &BTreeMap<String, MotorCalibration>;

    /// Replace the in-memory calibration without touching the motors.
    fn set_calibration(&mut self, calibration: BTreeMap<String, MotorCalibration>);

    // ── Provided ────────────────────────────────────────────────────────────

    /// Open the link and verify every motor in the table answers.
    ///
    /// # Errors
    ///
    /// [`RobotError::AlreadyConnected`] when already open,
    /// [`RobotError::HardwareFault`] when motors are missing (the link is
    /// closed again before returning).
    #[instrument(skip(self), fields(port = %self.port()))]
    fn connect(&mut self) -> Result<(), RobotError> {
        if self.is_connected() {
            return Err(RobotError::AlreadyConnected(self.port().to_string()));
        }
        self.open()?;

        let ids: Vec<(String, u8)> = self
            .motors()
            .iter()
            .map(|(name, m)| (name.clone(), m.id))
            .collect();
        let mut missing = Vec::new();
        for (name, id) in ids {
            if !self.ping(id)? {
                missing.push(format!("{name} (id {id})"));
            }
        }
        if !missing.is_empty() {
            self.close()?;
            return Err(RobotError::HardwareFault {
                component: self.port().to_string(),
                details: format!("missing motors: {}", missing.join(", ")),
            });
        }
        info!("motor bus connected");
        Ok(())
    }

    /// Optionally disable torque, then close the link.
    #[instrument(skip(self), fields(port = %self.port()))]
    fn disconnect(&mut self, disable_torque: bool) -> Result<(), RobotError> {
        self.ensure_connected()?;
        if disable_torque {
            self.disable_torque()?;
        }
        self.close()?;
        info!("motor bus disconnected");
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), RobotError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(RobotError::NotConnected(self.port().to_string()))
        }
    }

    fn motor_names(&self) -> Vec<String> {
        self.motors().keys().cloned().collect()
    }

    /// Read `register` from each motor in `motors`.
    fn sync_read_raw(
        &mut self,
        register: Register,
        motors: &[String],
    ) -> Result<BTreeMap<String, i32>, RobotError> {
        self.ensure_connected()?;
        let mut out = BTreeMap::new();
        for name in motors {
            out.insert(name.clone(), self.read_raw(register, name)?);
        }
        Ok(out)
    }

    /// Write `register` on each motor in `values`.
    fn sync_write_raw(
        &mut self,
        register: Register,
        values: &BTreeMap<String, i32>,
    ) -> Result<(), RobotError> {
        self.ensure_connected()?;
        for (name, value) in values {
            self.write_raw(register, name, *value)?;
        }
        Ok(())
    }

    /// Read `register` from `motors`, normalizing position registers.
    fn sync_read(
        &mut self,
        register: Register,
        motors: &[String],
    ) -> Result<BTreeMap<String, f64>, RobotError> {
        let raw = self.sync_read_raw(register, motors)?;
        if !register.is_position() {
            return Ok(raw.into_iter().map(|(k, v)| (k, f64::from(v))).collect());
        }
        raw.into_iter()
            .map(|(name, value)| -> Result<(String, f64), RobotError> {
                let (motor, cal) = self.motor_and_calibration(&name)?;
                Ok((name.clone(), normalize(&name, motor, cal, value)?))
            })
            .collect()
    }

    /// Write `register` on each motor in `values`, unnormalizing position
    /// registers.
    fn sync_write(
        &mut self,
        register: Register,
        values: &BTreeMap<String, f64>,
    ) -> Result<(), RobotError> {
        let raw = if register.is_position() {
            values
                .iter()
                .map(|(name, value)| -> Result<(String, i32), RobotError> {
                    let (motor, cal) = self.motor_and_calibration(name)?;
                    Ok((name.clone(), unnormalize(name, motor, cal, *value)?))
                })
                .collect::<Result<BTreeMap<_, _>, RobotError>>()?
        } else {
            values
                .iter()
                .map(|(name, value)| (name.clone(), value.round() as i32))
                .collect()
        };
        self.sync_write_raw(register, &raw)
    }

    fn motor_and_calibration(&self, name: &str) -> Result<(&Motor, &MotorCalibration), RobotError> {
        let motor = self
            .motors()
            .get(name)
            .ok_or_else(|| RobotError::Config(format!("unknown motor '{name}'")))?;
        let cal = self
            .calibration()
            .get(name)
            .ok_or_else(|| RobotError::Calibration(format!("no calibration for motor '{name}'")))?;
        Ok((motor, cal))
    }

    fn enable_torque(&mut self) -> Result<(), RobotError> {
        let ones = self.motor_names().into_iter().map(|m| (m, 1)).collect();
        self.sync_write_raw(Register::TorqueEnable, &ones)
    }

    fn disable_torque(&mut self) -> Result<(), RobotError> {
        let zeros = self.motor_names().into_iter().map(|m| (m, 0)).collect();
        self.sync_write_raw(Register::TorqueEnable, &zeros)
    }

    /// Write homing offsets and position limits to the motors and make
    /// `calibration` the active one.
    #[instrument(skip_all, fields(port = %self.port()))]
    fn write_calibration(
        &mut self,
        calibration: BTreeMap<String, MotorCalibration>,
    ) -> Result<(), RobotError> {
        self.ensure_connected()?;
        for (name, cal) in &calibration {
            if !self.motors().contains_key(name) {
                return Err(RobotError::Calibration(format!(
                    "calibration names unknown motor '{name}'"
                )));
            }
            self.write_raw(Register::HomingOffset, name, cal.homing_offset)?;
            self.write_raw(Register::MinPositionLimit, name, cal.range_min)?;
            self.write_raw(Register::MaxPositionLimit, name, cal.range_max)?;
        }
        debug!(motors = calibration.len(), "calibration written");
        self.set_calibration(calibration);
        Ok(())
    }

    /// Read back homing offsets and position limits from the motors.
    fn read_calibration(&mut self) -> Result<BTreeMap<String, MotorCalibration>, RobotError> {
        let names = self.motor_names();
        let offsets = self.sync_read_raw(Register::HomingOffset, &names)?;
        let mins = self.sync_read_raw(Register::MinPositionLimit, &names)?;
        let maxs = self.sync_read_raw(Register::MaxPositionLimit, &names)?;
        Ok(self
            .motors()
            .iter()
            .map(|(name, motor)| {
                (
                    name.clone(),
                    MotorCalibration {
                        id: motor.id,
                        drive_mode: 0,
                        homing_offset: offsets[name],
                        range_min: mins[name],
                        range_max: maxs[name],
                    },
                )
            })
            .collect())
    }

    /// Whether the active calibration covers every motor and matches what
    /// the motors report.
    fn is_calibrated(&mut self) -> Result<bool, RobotError> {
        if self.calibration().len() != self.motors().len() {
            return Ok(false);
        }
        let on_motors = self.read_calibration()?;
        let matches = on_motors.iter().all(|(name, read)| {
            self.calibration().get(name).is_some_and(|c| {
                c.homing_offset == read.homing_offset
                    && c.range_min == read.range_min
                    && c.range_max == read.range_max
            })
        });
        Ok(matches)
    }

    /// Clear homing offsets and open position limits to the full encoder
    /// range on `motors`.
    fn reset_calibration(&mut self, motors: &[String]) -> Result<(), RobotError> {
        for name in motors {
            let max = i32::try_from(self.motor_and_resolution(name)?.1 - 1).unwrap_or(i32::MAX);
            self.write_raw(Register::HomingOffset, name, 0)?;
            self.write_raw(Register::MinPositionLimit, name, 0)?;
            self.write_raw(Register::MaxPositionLimit, name, max)?;
        }
        Ok(())
    }

    fn motor_and_resolution(&self, name: &str) -> Result<(&Motor, u32), RobotError> {
        let motor = self
            .motors()
            .get(name)
            .ok_or_else(|| RobotError::Config(format!("unknown motor '{name}'")))?;
        Ok((motor, motor.resolution()?))
    }

    /// Make the current pose the middle of each motor's range by writing
    /// `homing_offset = present - (resolution - 1) / 2`.
    ///
    /// Returns the offsets written.
    #[instrument(skip(self))]
    fn set_half_turn_homings(
        &mut self,
        motors: &[String],
    ) -> Result<BTreeMap<String, i32>, RobotError> {
        self.ensure_connected()?;
        self.reset_calibration(motors)?;
        let present = self.sync_read_raw(Register::PresentPosition, motors)?;
        let mut homings = BTreeMap::new();
        for (name, pos) in present {
            let max_res = i32::try_from(self.motor_and_resolution(&name)?.1 - 1).unwrap_or(i32::MAX);
            let offset = pos - max_res / 2;
            self.write_raw(Register::HomingOffset, &name, offset)?;
            homings.insert(name, offset);
        }
        info!(?homings, "half-turn homings written");
        Ok(homings)
    }

    /// Sample present positions until the operator stops, tracking the
    /// extremes each motor reached.
    ///
    /// # Errors
    ///
    /// [`RobotError::Calibration`] when a motor never moved.
    #[instrument(skip(self, operator))]
    fn record_ranges_of_motion(
        &mut self,
        motors: &[String],
        operator: &mut dyn Operator,
    ) -> Result<(BTreeMap<String, i32>, BTreeMap<String, i32>), RobotError> {
        let start = self.sync_read_raw(Register::PresentPosition, motors)?;
        let mut mins = start.clone();
        let mut maxs = start;
        loop {
            let positions = self.sync_read_raw(Register::PresentPosition, motors)?;
            for (name, pos) in positions {
                mins.entry(name.clone()).and_modify(|m| *m = (*m).min(pos));
                maxs.entry(name).and_modify(|m| *m = (*m).max(pos));
            }
            if operator.cancelled() {
                warn!("range recording cancelled");
                return Err(RobotError::Calibration("range recording cancelled".to_string()));
            }
            if operator.should_stop() {
                break;
            }
        }

        let frozen: Vec<&str> = mins
            .iter()
            .filter(|(name, min)| maxs.get(*name) == Some(*min))
            .map(|(name, _)| name.as_str())
            .collect();
        if !frozen.is_empty() {
            warn!(?frozen, "motors did not move during range recording");
            return Err(RobotError::Calibration(format!(
                "some motors have the same min and max values: {}",
                frozen.join(", ")
            )));
        }
        Ok((mins, maxs))
    }
}

/// Disable torque on every motor and re-enable it when the guard drops.
///
/// The guard dereferences to the bus so configuration writes happen while
/// the motors are limp.
pub fn torque_disabled(bus: &mut dyn MotorBus) -> Result<TorqueGuard<'_>, RobotError> {
    bus.disable_torque()?;
    Ok(TorqueGuard { bus })
}

pub struct TorqueGuard<'a> {
    bus: &'a mut dyn MotorBus,
}

impl<'a> Deref for TorqueGuard<'a> {
    type Target = dyn MotorBus + 'a;

    fn deref(&self) -> &Self::Target {
        self.bus
    }
}

impl<'a> DerefMut for TorqueGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.bus
    }
}

impl Drop for TorqueGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.bus.enable_torque() {
            warn!(error = %e, port = self.bus.port(), "failed to re-enable torque");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motors::NormMode;
    use crate::operator::ScriptedOperator;
    use crate::sim::SimMotorBus;

    fn two_motor_bus() -> SimMotorBus {
        let mut motors = BTreeMap::new();
        motors.insert("a".to_string(), Motor::new(1, "sts3215", NormMode::RangeM100To100));
        motors.insert("b".to_string(), Motor::new(2, "sts3215", NormMode::Range0To100));
        SimMotorBus::new("sim://test", motors)
    }

    #[test]
    fn connect_twice_is_rejected() {
        let mut bus = two_motor_bus();
        bus.connect().unwrap();
        assert!(matches!(bus.connect(), Err(RobotError::AlreadyConnected(_))));
    }

    #[test]
    fn io_on_disconnected_bus_fails() {
        let mut bus = two_motor_bus();
        let names = bus.motor_names();
        let err = bus.sync_read_raw(Register::PresentPosition, &names).unwrap_err();
        assert!(matches!(err, RobotError::NotConnected(_)));
        assert!(matches!(bus.disconnect(true), Err(RobotError::NotConnected(_))));
    }

    #[test]
    fn connect_reports_missing_motors_and_stays_closed() {
        let mut bus = two_motor_bus().with_missing(2);
        let err = bus.connect().unwrap_err();
        match err {
            RobotError::HardwareFault { details, .. } => assert!(details.contains("b (id 2)")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!bus.is_connected());
    }

    #[test]
    fn half_turn_homing_centres_present_position() {
        let mut bus = two_motor_bus();
        let handle = bus.handle();
        handle.set_actual("a", 3000);
        bus.connect().unwrap();

        let homings = bus.set_half_turn_homings(&["a".to_string()]).unwrap();
        assert_eq!(homings["a"], 3000 - 2047);
        assert_eq!(bus.read_raw(Register::PresentPosition, "a").unwrap(), 2047);
    }

    #[test]
    fn record_ranges_tracks_extremes() {
        let mut bus = two_motor_bus();
        let handle = bus.handle();
        handle.push_motion("a", &[2000, 1500, 2600, 2100]);
        handle.push_motion("b", &[2047, 2100, 1900]);
        bus.connect().unwrap();

        let names = bus.motor_names();
        let mut op = ScriptedOperator::new(Vec::<String>::new()).stop_after(4);
        let (mins, maxs) = bus.record_ranges_of_motion(&names, &mut op).unwrap();
        assert_eq!((mins["a"], maxs["a"]), (1500, 2600));
        assert_eq!((mins["b"], maxs["b"]), (1900, 2100));
    }

    #[test]
    fn record_ranges_rejects_motionless_motor() {
        let mut bus = two_motor_bus();
        bus.handle().push_motion("a", &[2000, 2500]);
        bus.connect().unwrap();

        let names = bus.motor_names();
        let mut op = ScriptedOperator::new(Vec::<String>::new()).stop_after(3);
        let err = bus.record_ranges_of_motion(&names, &mut op).unwrap_err();
        assert!(matches!(err, RobotError::Calibration(msg) if msg.ends_with(": b")));
    }

    #[test]
    fn cancelled_recording_discards_the_ranges() {
        let mut bus = two_motor_bus();
        bus.handle().push_motion("a", &[2000, 2500, 1500]);
        bus.handle().push_motion("b", &[1900, 2100]);
        bus.connect().unwrap();

        let names = bus.motor_names();
        let mut op = ScriptedOperator::new(Vec::<String>::new())
            .stop_after(5)
            .cancel_after(2);
        let err = bus.record_ranges_of_motion(&names, &mut op).unwrap_err();
        assert!(matches!(err, RobotError::Calibration(msg) if msg.contains("cancelled")));
    }

    #[test]
    fn written_calibration_is_read_back_and_recognised() {
        let mut bus = two_motor_bus();
        bus.connect().unwrap();
        assert!(!bus.is_calibrated().unwrap());

        let mut cal = BTreeMap::new();
        for (name, id) in [("a", 1), ("b", 2)] {
            cal.insert(
                name.to_string(),
                MotorCalibration { id, drive_mode: 0, homing_offset: 12, range_min: 1000, range_max: 3000 },
            );
        }
        bus.write_calibration(cal.clone()).unwrap();
        assert_eq!(bus.read_calibration().unwrap(), cal);
        assert!(bus.is_calibrated().unwrap());
    }

    #[test]
    fn normalized_write_then_read_moves_motor() {
        let mut bus = two_motor_bus();
        bus.connect().unwrap();
        let mut cal = BTreeMap::new();
        cal.insert("a".to_string(), MotorCalibration { id: 1, drive_mode: 0, homing_offset: 0, range_min: 1000, range_max: 3000 });
        cal.insert("b".to_string(), MotorCalibration { id: 2, drive_mode: 0, homing_offset: 0, range_min: 1000, range_max: 3000 });
        bus.write_calibration(cal).unwrap();
        bus.enable_torque().unwrap();

        let goal = BTreeMap::from([("a".to_string(), 50.0), ("b".to_string(), 25.0)]);
        bus.sync_write(Register::GoalPosition, &goal).unwrap();
        assert_eq!(bus.read_raw(Register::PresentPosition, "a").unwrap(), 2500);
        assert_eq!(bus.read_raw(Register::PresentPosition, "b").unwrap(), 1500);

        let names = bus.motor_names();
        let read = bus.sync_read(Register::PresentPosition, &names).unwrap();
        assert!((read["a"] - 50.0).abs() < 1e-9);
        assert!((read["b"] - 25.0).abs() < 1e-9);
    }

    #[test]
    fn normalized_read_without_calibration_fails() {
        let mut bus = two_motor_bus();
        bus.connect().unwrap();
        let names = bus.motor_names();
        let err = bus.sync_read(Register::PresentPosition, &names).unwrap_err();
        assert!(matches!(err, RobotError::Calibration(_)));
    }

    #[test]
    fn torque_guard_restores_torque() {
        let mut bus = two_motor_bus();
        let handle = bus.handle();
        bus.connect().unwrap();
        bus.enable_torque().unwrap();
        {
            let mut guard = torque_disabled(&mut bus).unwrap();
            assert!(!handle.torque("a"));
            guard.write_raw(Register::PGain, "a", 16).unwrap();
        }
        assert!(handle.torque("a"));
        assert!(handle.torque("b"));
    }
}
