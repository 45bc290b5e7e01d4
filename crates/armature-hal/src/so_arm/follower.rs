use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use armature_types::{Action, FeatureSpec, Features, Observation, RobotError, Value};

use super::{SO_FOLLOWER, position_features, run_calibration, so_motors};
use crate::calibration_store::{CalibrationStore, DeviceKind, default_calibration_dir};
use crate::camera::Camera;
use crate::config::SoFollowerConfig;
use crate::motors::{
    Calibration, MotorBus, POSITION_MODE, Register, normalize, torque_disabled, unnormalize,
};
use crate::operator::Operator;
use crate::robot::{Robot, ensure_safe_goal_position};

const CAMERA_TIMEOUT: Duration = Duration::from_millis(200);

/// SO follower arm: six STS3215 servos on one bus plus any number of
/// cameras.
pub struct SoFollower {
    config: SoFollowerConfig,
    bus: Box<dyn MotorBus>,
    cameras: BTreeMap<String, Box<dyn Camera>>,
    operator: Box<dyn Operator>,
    store: CalibrationStore,
    calibration: Option<Calibration>,
}

impl SoFollower {
    /// Assemble the robot from an already-built bus and cameras.  A stored
    /// calibration, if any, becomes the bus's active calibration.
    pub fn new(
        config: SoFollowerConfig,
        mut bus: Box<dyn MotorBus>,
        cameras: Vec<Box<dyn Camera>>,
        operator: Box<dyn Operator>,
    ) -> Result<Self, RobotError> {
        config.validate()?;
        let expected = so_motors(config.use_degrees);
        if bus.motors() != &expected {
            return Err(RobotError::Config(format!(
                "bus on {} does not carry the {SO_FOLLOWER} motor layout",
                bus.port()
            )));
        }
        let store = CalibrationStore::new(
            config
                .calibration_dir
                .clone()
                .unwrap_or_else(|| default_calibration_dir(DeviceKind::Robot, SO_FOLLOWER)),
        );
        let calibration = store.load(&config.id)?;
        if let Some(cal) = &calibration {
            bus.set_calibration(cal.clone());
        }
        let cameras = cameras
            .into_iter()
            .map(|c| (c.id().to_string(), c))
            .collect();

        Ok(Self {
            config,
            bus,
            cameras,
            operator,
            store,
            calibration,
        })
    }

    pub fn config(&self) -> &SoFollowerConfig {
        &self.config
    }

    /// Everything `connect` does once the bus link is open.
    fn bring_up(&mut self, calibrate: bool) -> Result<(), RobotError> {
        if !self.bus.is_calibrated()? && calibrate {
            info!(
                "mismatch between calibration values in the motor and the calibration file \
                 or no calibration file found"
            );
            self.calibrate()?;
        }
        for cam in self.cameras.values_mut() {
            cam.connect(true)?;
        }
        self.configure()
    }

    /// Close whatever a failed `connect` left open so it can be retried.
    fn release(&mut self) {
        for cam in self.cameras.values_mut().filter(|c| c.is_connected()) {
            if let Err(e) = cam.disconnect() {
                warn!(camera = %cam.id(), error = %e, "failed to release camera");
            }
        }
        if self.bus.is_connected()
            && let Err(e) = self.bus.disconnect(self.config.disable_torque_on_disconnect)
        {
            warn!(error = %e, "failed to release motor bus, closing the link");
            if let Err(e) = self.bus.close() {
                warn!(error = %e, "failed to close motor bus");
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), RobotError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(RobotError::NotConnected(self.to_string()))
        }
    }
}

impl fmt::Display for SoFollower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.config.id, SO_FOLLOWER)
    }
}

impl Robot for SoFollower {
    fn name(&self) -> &str {
        SO_FOLLOWER
    }

    fn id(&self) -> &str {
        &self.config.id
    }

    fn observation_features(&self) -> Features {
        let mut features = position_features(self.bus.motors());
        for (name, cam) in &self.cameras {
            features.insert(name.clone(), FeatureSpec::Shape(cam.shape().to_vec()));
        }
        features
    }

    fn action_features(&self) -> Features {
        position_features(self.bus.motors())
    }

    fn is_connected(&self) -> bool {
        self.bus.is_connected() && self.cameras.values().all(|c| c.is_connected())
    }

    #[instrument(skip(self), fields(robot = %self))]
    fn connect(&mut self, calibrate: bool) -> Result<(), RobotError> {
        if self.is_connected() {
            return Err(RobotError::AlreadyConnected(self.to_string()));
        }

        self.bus.connect()?;
        if let Err(e) = self.bring_up(calibrate) {
            warn!(error = %e, "{self} failed to connect, releasing devices");
            self.release();
            return Err(e);
        }
        info!("{self} connected");
        Ok(())
    }

    fn is_calibrated(&mut self) -> Result<bool, RobotError> {
        self.bus.is_calibrated()
    }

    #[instrument(skip(self), fields(robot = %self))]
    fn calibrate(&mut self) -> Result<(), RobotError> {
        if !self.bus.is_connected() {
            return Err(RobotError::NotConnected(self.to_string()));
        }
        let label = self.to_string();
        let cal = run_calibration(
            &label,
            &self.config.id,
            self.bus.as_mut(),
            self.operator.as_mut(),
            &self.store,
            self.calibration.as_ref(),
        )?;
        self.calibration = Some(cal);
        Ok(())
    }

    fn configure(&mut self) -> Result<(), RobotError> {
        if !self.bus.is_connected() {
            return Err(RobotError::NotConnected(self.to_string()));
        }
        let mut bus = torque_disabled(self.bus.as_mut())?;
        for motor in bus.motor_names() {
            bus.write_raw(Register::OperatingMode, &motor, POSITION_MODE)?;
            // Lower P than the factory default avoids shakiness.
            bus.write_raw(Register::PGain, &motor, 16)?;
            bus.write_raw(Register::IGain, &motor, 0)?;
            bus.write_raw(Register::DGain, &motor, 32)?;
        }
        Ok(())
    }

    fn get_observation(&mut self) -> Result<Observation, RobotError> {
        self.ensure_connected()?;

        let start = Instant::now();
        let names = self.bus.motor_names();
        let positions = self.bus.sync_read(Register::PresentPosition, &names)?;
        let mut obs: Observation = positions
            .into_iter()
            .map(|(motor, pos)| (format!("{motor}.pos"), Value::Float(pos)))
            .collect();
        debug!(elapsed_ms = start.elapsed().as_secs_f64() * 1e3, "read state");

        for (name, cam) in &mut self.cameras {
            let start = Instant::now();
            obs.insert(name.clone(), Value::Image(cam.async_read(CAMERA_TIMEOUT)?));
            debug!(camera = %name, elapsed_ms = start.elapsed().as_secs_f64() * 1e3, "read frame");
        }
        Ok(obs)
    }

    fn send_action(&mut self, action: &Action) -> Result<Action, RobotError> {
        self.ensure_connected()?;

        let mut goal = BTreeMap::new();
        for (key, value) in action {
            let Some(motor) = key.strip_suffix(".pos") else {
                continue;
            };
            if !self.bus.motors().contains_key(motor) {
                continue;
            }
            let target = value
                .as_f64()
                .ok_or_else(|| RobotError::Config(format!("action '{key}' is not numeric")))?;
            if !target.is_finite() {
                return Err(RobotError::Config(format!("action '{key}' is not finite: {target}")));
            }
            goal.insert(motor.to_string(), target);
        }

        if let Some(max) = self.config.max_relative_target {
            let names: Vec<String> = goal.keys().cloned().collect();
            let present = self.bus.sync_read(Register::PresentPosition, &names)?;
            goal = ensure_safe_goal_position(&goal, &present, max);
        }

        self.bus.sync_write(Register::GoalPosition, &goal)?;

        // Report the goals as written, after the bus clamped them to the
        // calibrated range.
        goal.iter()
            .map(|(motor, &v)| -> Result<(String, Value), RobotError> {
                let (m, cal) = self.bus.motor_and_calibration(motor)?;
                let applied = normalize(motor, m, cal, unnormalize(motor, m, cal, v)?)?;
                Ok((format!("{motor}.pos"), Value::Float(applied)))
            })
            .collect()
    }

    #[instrument(skip(self), fields(robot = %self))]
    fn disconnect(&mut self) -> Result<(), RobotError> {
        if !self.bus.is_connected() {
            return Err(RobotError::NotConnected(self.to_string()));
        }
        self.bus.disconnect(self.config.disable_torque_on_disconnect)?;
        for cam in self.cameras.values_mut() {
            if cam.is_connected() {
                cam.disconnect()?;
            }
        }
        info!("{self} disconnected");
        Ok(())
    }
}
