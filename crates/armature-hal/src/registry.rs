//! [`HardwareRegistry`] – maps config `type` names to device constructors.
//!
//! Tooling never names concrete robot types.  It hands a
//! [`DeviceConfig`] to the registry, which looks up the constructor
//! registered for `config.kind` and returns a boxed [`Robot`] or
//! [`Teleoperator`].  A new integration plugs in by registering its
//! constructor; nothing else changes.
//!
//! Motor buses are resolved the same way through [`BusRegistry`], keyed by
//! the scheme of the port string (`sim://arm` → `"sim"`).  Ports without a
//! scheme resolve to `"serial"`.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use armature_types::RobotError;

use crate::camera::make_cameras;
use crate::config::{DeviceConfig, SoFollowerConfig, SoLeaderConfig};
use crate::motors::{Motor, MotorBus};
use crate::operator::Operator;
use crate::robot::Robot;
use crate::sim::SimMotorBus;
use crate::so_arm::{SO_FOLLOWER, SO_LEADER, SoFollower, SoLeader, so_motors};
use crate::teleoperator::Teleoperator;

/// Sway, in ticks, of limp simulated motors.  Large enough for range
/// recording to see motion.
const SIM_IDLE_AMPLITUDE: i32 = 400;

pub type BusFactory = Box<
    dyn Fn(&str, BTreeMap<String, Motor>) -> Result<Box<dyn MotorBus>, RobotError> + Send + Sync,
>;

pub type RobotFactory = Box<
    dyn Fn(&DeviceConfig, &BusRegistry, Box<dyn Operator>) -> Result<Box<dyn Robot>, RobotError>
        + Send
        + Sync,
>;

pub type TeleoperatorFactory = Box<
    dyn Fn(&DeviceConfig, &BusRegistry, Box<dyn Operator>) -> Result<Box<dyn Teleoperator>, RobotError>
        + Send
        + Sync,
>;

/// Motor bus drivers keyed by port scheme.
#[derive(Default)]
pub struct BusRegistry {
    factories: HashMap<String, BusFactory>,
}

impl BusRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the in-process `sim` driver.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            "sim",
            Box::new(
                |port: &str, motors: BTreeMap<String, Motor>| -> Result<Box<dyn MotorBus>, RobotError> {
                    Ok(Box::new(SimMotorBus::new(port, motors).with_idle_motion(SIM_IDLE_AMPLITUDE)))
                },
            ),
        );
        registry
    }

    /// Register a driver.  Any previously registered driver with the same
    /// scheme is replaced.
    pub fn register(&mut self, scheme: impl Into<String>, factory: BusFactory) {
        self.factories.insert(scheme.into(), factory);
    }

    /// Build a bus for `port` carrying `motors`.
    ///
    /// # Errors
    ///
    /// [`RobotError::Config`] when no driver handles the port's scheme.
    pub fn open(
        &self,
        port: &str,
        motors: BTreeMap<String, Motor>,
    ) -> Result<Box<dyn MotorBus>, RobotError> {
        let scheme = scheme_of(port);
        let factory = self.factories.get(scheme).ok_or_else(|| {
            RobotError::Config(format!(
                "no motor bus driver registered for scheme '{scheme}' (port {port})"
            ))
        })?;
        debug!(port, scheme, "opening motor bus");
        factory(port, motors)
    }
}

fn scheme_of(port: &str) -> &str {
    port.split_once("://").map_or("serial", |(scheme, _)| scheme)
}

/// Central registry of robot and teleoperator constructors.
pub struct HardwareRegistry {
    buses: BusRegistry,
    robots: HashMap<String, RobotFactory>,
    teleoperators: HashMap<String, TeleoperatorFactory>,
}

impl Default for HardwareRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl HardwareRegistry {
    /// Create a registry with no constructors and the given bus drivers.
    pub fn new(buses: BusRegistry) -> Self {
        Self {
            buses,
            robots: HashMap::new(),
            teleoperators: HashMap::new(),
        }
    }

    /// Registry with the `sim` bus and the SO follower / leader arms.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new(BusRegistry::with_builtin());
        registry.register_robot(
            SO_FOLLOWER,
            Box::new(
                |config: &DeviceConfig,
                 buses: &BusRegistry,
                 operator: Box<dyn Operator>|
                 -> Result<Box<dyn Robot>, RobotError> {
                    let cfg: SoFollowerConfig = config.parse()?;
                    cfg.validate()?;
                    let bus = buses.open(&cfg.port, so_motors(cfg.use_degrees))?;
                    let cameras = make_cameras(&cfg.cameras)?;
                    Ok(Box::new(SoFollower::new(cfg, bus, cameras, operator)?))
                },
            ),
        );
        registry.register_teleoperator(
            SO_LEADER,
            Box::new(
                |config: &DeviceConfig,
                 buses: &BusRegistry,
                 operator: Box<dyn Operator>|
                 -> Result<Box<dyn Teleoperator>, RobotError> {
                    let cfg: SoLeaderConfig = config.parse()?;
                    cfg.validate()?;
                    let bus = buses.open(&cfg.port, so_motors(cfg.use_degrees))?;
                    Ok(Box::new(SoLeader::new(cfg, bus, operator)?))
                },
            ),
        );
        registry
    }

    pub fn buses_mut(&mut self) -> &mut BusRegistry {
        &mut self.buses
    }

    /// Register a robot constructor.  Any previously registered constructor
    /// with the same `kind` is replaced.
    pub fn register_robot(&mut self, kind: impl Into<String>, factory: RobotFactory) {
        self.robots.insert(kind.into(), factory);
    }

    /// Register a teleoperator constructor.  Any previously registered
    /// constructor with the same `kind` is replaced.
    pub fn register_teleoperator(&mut self, kind: impl Into<String>, factory: TeleoperatorFactory) {
        self.teleoperators.insert(kind.into(), factory);
    }

    /// Registered robot type names, sorted.
    pub fn robot_types(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.robots.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Registered teleoperator type names, sorted.
    pub fn teleoperator_types(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.teleoperators.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Construct the robot described by `config`.
    ///
    /// # Errors
    ///
    /// [`RobotError::Config`] when `config.kind` is not registered or its
    /// parameters are invalid.
    pub fn make_robot(
        &self,
        config: &DeviceConfig,
        operator: Box<dyn Operator>,
    ) -> Result<Box<dyn Robot>, RobotError> {
        match self.robots.get(&config.kind) {
            Some(factory) => factory(config, &self.buses, operator),
            None => Err(RobotError::Config(format!(
                "robot type '{}' is not registered",
                config.kind
            ))),
        }
    }

    /// Construct the teleoperator described by `config`.
    pub fn make_teleoperator(
        &self,
        config: &DeviceConfig,
        operator: Box<dyn Operator>,
    ) -> Result<Box<dyn Teleoperator>, RobotError> {
        match self.teleoperators.get(&config.kind) {
            Some(factory) => factory(config, &self.buses, operator),
            None => Err(RobotError::Config(format!(
                "teleoperator type '{}' is not registered",
                config.kind
            ))),
        }
    }
}
