use std::fmt;

use tracing::{info, instrument, warn};

use armature_types::{Action, Features, RobotError, Value};

use super::{SO_LEADER, position_features, run_calibration, so_motors};
use crate::calibration_store::{CalibrationStore, DeviceKind, default_calibration_dir};
use crate::config::SoLeaderConfig;
use crate::motors::{Calibration, MotorBus, POSITION_MODE, Register};
use crate::operator::Operator;
use crate::teleoperator::Teleoperator;

/// SO leader arm.  Torque stays off so the operator can move it freely; its
/// joint positions are the action for a follower.
pub struct SoLeader {
    config: SoLeaderConfig,
    bus: Box<dyn MotorBus>,
    operator: Box<dyn Operator>,
    store: CalibrationStore,
    calibration: Option<Calibration>,
}

impl SoLeader {
    pub fn new(
        config: SoLeaderConfig,
        mut bus: Box<dyn MotorBus>,
        operator: Box<dyn Operator>,
    ) -> Result<Self, RobotError> {
        config.validate()?;
        if bus.motors() != &so_motors(config.use_degrees) {
            return Err(RobotError::Config(format!(
                "bus on {} does not carry the {SO_LEADER} motor layout",
                bus.port()
            )));
        }
        let store = CalibrationStore::new(
            config
                .calibration_dir
                .clone()
                .unwrap_or_else(|| default_calibration_dir(DeviceKind::Teleoperator, SO_LEADER)),
        );
        let calibration = store.load(&config.id)?;
        if let Some(cal) = &calibration {
            bus.set_calibration(cal.clone());
        }
        Ok(Self {
            config,
            bus,
            operator,
            store,
            calibration,
        })
    }

    fn bring_up(&mut self, calibrate: bool) -> Result<(), RobotError> {
        if !self.bus.is_calibrated()? && calibrate {
            info!("no matching calibration found on the motors");
            self.calibrate()?;
        }
        self.configure()
    }

    fn ensure_connected(&self) -> Result<(), RobotError> {
        if self.bus.is_connected() {
            Ok(())
        } else {
            Err(RobotError::NotConnected(self.to_string()))
        }
    }
}

impl fmt::Display for SoLeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.config.id, SO_LEADER)
    }
}

impl Teleoperator for SoLeader {
    fn name(&self) -> &str {
        SO_LEADER
    }

    fn id(&self) -> &str {
        &self.config.id
    }

    fn action_features(&self) -> Features {
        position_features(self.bus.motors())
    }

    fn feedback_features(&self) -> Features {
        Features::new()
    }

    fn is_connected(&self) -> bool {
        self.bus.is_connected()
    }

    #[instrument(skip(self), fields(teleop = %self))]
    fn connect(&mut self, calibrate: bool) -> Result<(), RobotError> {
        if self.is_connected() {
            return Err(RobotError::AlreadyConnected(self.to_string()));
        }
        self.bus.connect()?;
        if let Err(e) = self.bring_up(calibrate) {
            warn!(error = %e, "{self} failed to connect, closing the bus");
            if let Err(e) = self.bus.disconnect(false).or_else(|_| self.bus.close()) {
                warn!(error = %e, "failed to close motor bus");
            }
            return Err(e);
        }
        info!("{self} connected");
        Ok(())
    }

    fn is_calibrated(&mut self) -> Result<bool, RobotError> {
        self.bus.is_calibrated()
    }

    #[instrument(skip(self), fields(teleop = %self))]
    fn calibrate(&mut self) -> Result<(), RobotError> {
        self.ensure_connected()?;
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
        self.ensure_connected()?;
        self.bus.disable_torque()?;
        for motor in self.bus.motor_names() {
            self.bus.write_raw(Register::OperatingMode, &motor, POSITION_MODE)?;
        }
        Ok(())
    }

    fn get_action(&mut self) -> Result<Action, RobotError> {
        self.ensure_connected()?;
        let names = self.bus.motor_names();
        let positions = self.bus.sync_read(Register::PresentPosition, &names)?;
        Ok(positions
            .into_iter()
            .map(|(motor, pos)| (format!("{motor}.pos"), Value::Float(pos)))
            .collect())
    }

    fn send_feedback(&mut self, feedback: &Action) -> Result<(), RobotError> {
        self.ensure_connected()?;
        if feedback.is_empty() {
            return Ok(());
        }
        Err(RobotError::Config(format!("{self} does not accept feedback")))
    }

    #[instrument(skip(self), fields(teleop = %self))]
    fn disconnect(&mut self) -> Result<(), RobotError> {
        self.ensure_connected()?;
        self.bus.disconnect(true)?;
        info!("{self} disconnected");
        Ok(())
    }
}
