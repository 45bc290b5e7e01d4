//! In-process simulated hardware for tests and headless runs.
//!
//! [`SimMotorBus`] keeps a register file per motor and behaves like a
//! position-controlled servo chain: present position is reported relative to
//! the homing offset, and goal writes move the motor instantly while torque is
//! on.  [`SimCamera`] renders deterministic gradient frames.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use armature_hal::motors::{Motor, MotorBus, NormMode, Register};
//! use armature_hal::sim::SimMotorBus;
//!
//! let mut motors = BTreeMap::new();
//! motors.insert("gripper".to_string(), Motor::new(6, "sts3215", NormMode::Range0To100));
//! let mut bus = SimMotorBus::new("sim://arm", motors);
//! bus.connect().expect("sim bus must connect");
//! assert_eq!(bus.read_raw(Register::PresentPosition, "gripper").unwrap(), 2048);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use armature_types::{Frame, RobotError};

use crate::camera::{BackgroundReader, Camera, CameraConfig, ColorMode};
use crate::motors::{Motor, MotorBus, MotorCalibration, Register};

// ────────────────────────────────────────────────────────────────────────────
// Simulated motor
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct SimMotor {
    actual: i32,
    homing_offset: i32,
    min_limit: i32,
    max_limit: i32,
    goal: i32,
    torque: bool,
    operating_mode: i32,
    gains: [i32; 3],
    motion: VecDeque<i32>,
}

impl SimMotor {
    fn new(resolution: u32) -> Self {
        let max = resolution as i32 - 1;
        Self {
            actual: (max + 1) / 2,
            homing_offset: 0,
            min_limit: 0,
            max_limit: max,
            goal: (max + 1) / 2,
            torque: false,
            operating_mode: 0,
            gains: [32, 0, 32],
            motion: VecDeque::new(),
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    motors: HashMap<String, SimMotor>,
    missing: BTreeSet<u8>,
    idle_amplitude: i32,
    reads: u64,
}

/// Shared view into a [`SimMotorBus`]'s register file, kept by tests after
/// the bus has been moved into a robot.
#[derive(Clone)]
pub struct SimBusHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimBusHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Set the physical position of `motor` (before homing offset).
    pub fn set_actual(&self, motor: &str, ticks: i32) {
        if let Some(m) = self.lock().motors.get_mut(motor) {
            m.actual = ticks;
        }
    }

    /// Physical position of `motor`.
    pub fn actual(&self, motor: &str) -> Option<i32> {
        self.lock().motors.get(motor).map(|m| m.actual)
    }

    /// Queue physical positions consumed one per present-position read.
    pub fn push_motion(&self, motor: &str, ticks: &[i32]) {
        if let Some(m) = self.lock().motors.get_mut(motor) {
            m.motion.extend(ticks.iter().copied());
        }
    }

    /// Last goal written to `motor`, in the homed frame.
    pub fn goal(&self, motor: &str) -> Option<i32> {
        self.lock().motors.get(motor).map(|m| m.goal)
    }

    pub fn torque(&self, motor: &str) -> bool {
        self.lock().motors.get(motor).is_some_and(|m| m.torque)
    }

    pub fn operating_mode(&self, motor: &str) -> Option<i32> {
        self.lock().motors.get(motor).map(|m| m.operating_mode)
    }

    /// `[P, I, D]` gains of `motor`.
    pub fn gains(&self, motor: &str) -> Option<[i32; 3]> {
        self.lock().motors.get(motor).map(|m| m.gains)
    }
}

/// A simulated servo chain.
pub struct SimMotorBus {
    port: String,
    motors: BTreeMap<String, Motor>,
    calibration: BTreeMap<String, MotorCalibration>,
    connected: bool,
    state: Arc<Mutex<SimState>>,
}

impl SimMotorBus {
    /// Create a bus with every motor at mid-range, torque off, no homing.
    /// Motors with an unknown model get a 4096-tick encoder.
    pub fn new(port: impl Into<String>, motors: BTreeMap<String, Motor>) -> Self {
        let sim_motors = motors
            .iter()
            .map(|(name, m)| (name.clone(), SimMotor::new(m.resolution().unwrap_or(4096))))
            .collect();
        Self {
            port: port.into(),
            motors,
            calibration: BTreeMap::new(),
            connected: false,
            state: Arc::new(Mutex::new(SimState {
                motors: sim_motors,
                ..SimState::default()
            })),
        }
    }

    /// Make the motor with `id` not answer pings.
    pub fn with_missing(self, id: u8) -> Self {
        self.lock().missing.insert(id);
        self
    }

    /// While torque is off, sway every motor by up to `amplitude` ticks
    /// around its position, as if an operator were moving it.
    pub fn with_idle_motion(self, amplitude: i32) -> Self {
        self.lock().idle_amplitude = amplitude;
        self
    }

    pub fn handle(&self) -> SimBusHandle {
        SimBusHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn unknown(&self, motor: &str) -> RobotError {
        RobotError::Config(format!("unknown motor '{motor}' on {}", self.port))
    }
}

impl MotorBus for SimMotorBus {
    fn port(&self) -> &str {
        &self.port
    }

    fn motors(&self) -> &BTreeMap<String, Motor> {
        &self.motors
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn open(&mut self) -> Result<(), RobotError> {
        self.connected = true;
        debug!(port = %self.port, "sim bus opened");
        Ok(())
    }

    fn close(&mut self) -> Result<(), RobotError> {
        self.connected = false;
        Ok(())
    }

    fn ping(&mut self, id: u8) -> Result<bool, RobotError> {
        self.ensure_connected()?;
        Ok(!self.lock().missing.contains(&id))
    }

    fn read_raw(&mut self, register: Register, motor: &str) -> Result<i32, RobotError> {
        self.ensure_connected()?;
        let mut state = self.lock();
        state.reads += 1;
        let sway = if state.idle_amplitude > 0 {
            let phase = state.reads as f64 * 0.3;
            (f64::from(state.idle_amplitude) * phase.sin()).round() as i32
        } else {
            0
        };
        let m = state.motors.get_mut(motor).ok_or_else(|| self.unknown(motor))?;
        let value = match register {
            Register::PresentPosition => {
                if let Some(next) = m.motion.pop_front() {
                    m.actual = next;
                }
                let present = if m.torque { m.actual } else { m.actual + sway };
                present - m.homing_offset
            }
            Register::GoalPosition => m.goal,
            Register::TorqueEnable => i32::from(m.torque),
            Register::OperatingMode => m.operating_mode,
            Register::HomingOffset => m.homing_offset,
            Register::MinPositionLimit => m.min_limit,
            Register::MaxPositionLimit => m.max_limit,
            Register::PGain => m.gains[0],
            Register::IGain => m.gains[1],
            Register::DGain => m.gains[2],
        };
        Ok(value)
    }

    fn write_raw(&mut self, register: Register, motor: &str, value: i32) -> Result<(), RobotError> {
        self.ensure_connected()?;
        let mut state = self.lock();
        let m = state.motors.get_mut(motor).ok_or_else(|| self.unknown(motor))?;
        match register {
            Register::PresentPosition => {
                return Err(RobotError::HardwareFault {
                    component: motor.to_string(),
                    details: "Present_Position is read-only".to_string(),
                });
            }
            Register::GoalPosition => {
                let goal = value.clamp(m.min_limit, m.max_limit.max(m.min_limit));
                m.goal = goal;
                if m.torque {
                    m.actual = goal + m.homing_offset;
                }
            }
            Register::TorqueEnable => m.torque = value != 0,
            Register::OperatingMode => m.operating_mode = value,
            Register::HomingOffset => m.homing_offset = value,
            Register::MinPositionLimit => m.min_limit = value,
            Register::MaxPositionLimit => m.max_limit = value,
            Register::PGain => m.gains[0] = value,
            Register::IGain => m.gains[1] = value,
            Register::DGain => m.gains[2] = value,
        }
        Ok(())
    }

    fn calibration(&self) -> &BTreeMap<String, MotorCalibration> {
        &self.calibration
    }

    fn set_calibration(&mut self, calibration: BTreeMap<String, MotorCalibration>) {
        self.calibration = calibration;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated camera
// ────────────────────────────────────────────────────────────────────────────

/// Render a diagonal gradient shifted by `tick`.
fn render(height: u32, width: u32, color_mode: ColorMode, tick: u64) -> Frame {
    let mut frame = Frame::blank(height, width, 3);
    for y in 0..height {
        for x in 0..width {
            let base = ((x + y) as u64 + tick) as u8;
            let rgb = [base, base.wrapping_mul(2), 255 - base];
            let px = match color_mode {
                ColorMode::Rgb => rgb,
                ColorMode::Bgr => [rgb[2], rgb[1], rgb[0]],
            };
            let i = ((y * width + x) * 3) as usize;
            frame.data[i..i + 3].copy_from_slice(&px);
        }
    }
    frame
}

/// A simulated camera producing moving gradient frames of the configured
/// size.
pub struct SimCamera {
    id: String,
    config: CameraConfig,
    tick: Arc<AtomicU64>,
    connected: bool,
    reader: Option<BackgroundReader>,
}

impl SimCamera {
    pub fn new(id: impl Into<String>, config: CameraConfig) -> Self {
        Self {
            id: id.into(),
            config,
            tick: Arc::new(AtomicU64::new(0)),
            connected: false,
            reader: None,
        }
    }

    fn dims(&self) -> (u32, u32) {
        let [h, w, _] = self.config.shape();
        (h as u32, w as u32)
    }

    fn ensure_connected(&self) -> Result<(), RobotError> {
        if self.connected {
            Ok(())
        } else {
            Err(RobotError::NotConnected(format!("camera '{}'", self.id)))
        }
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn shape(&self) -> [usize; 3] {
        self.config.shape()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self, warmup: bool) -> Result<(), RobotError> {
        if self.connected {
            return Err(RobotError::AlreadyConnected(format!("camera '{}'", self.id)));
        }
        self.connected = true;
        if warmup {
            for _ in 0..3 {
                self.read()?;
            }
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, RobotError> {
        self.ensure_connected()?;
        let (h, w) = self.dims();
        let tick = self.tick.fetch_add(1, Ordering::SeqCst);
        Ok(render(h, w, self.config.color_mode, tick))
    }

    fn async_read(&mut self, timeout: Duration) -> Result<Frame, RobotError> {
        self.ensure_connected()?;
        if self.reader.is_none() {
            let (h, w) = self.dims();
            let mode = self.config.color_mode;
            let tick = Arc::clone(&self.tick);
            let period = Duration::from_secs_f64(1.0 / f64::from(self.config.fps.unwrap_or(30).max(1)));
            self.reader = Some(BackgroundReader::spawn(&self.id, period, move || {
                Ok(render(h, w, mode, tick.fetch_add(1, Ordering::SeqCst)))
            })?);
        }
        match &self.reader {
            Some(reader) => reader.latest(timeout),
            None => Err(RobotError::NotConnected(format!("camera '{}'", self.id))),
        }
    }

    fn disconnect(&mut self) -> Result<(), RobotError> {
        self.ensure_connected()?;
        if let Some(mut reader) = self.reader.take() {
            reader.stop();
        }
        self.connected = false;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motors::NormMode;

    fn bus() -> SimMotorBus {
        let mut motors = BTreeMap::new();
        motors.insert("pan".to_string(), Motor::new(1, "sts3215", NormMode::Degrees));
        SimMotorBus::new("sim://unit", motors)
    }

    #[test]
    fn present_position_is_relative_to_homing_offset() {
        let mut b = bus();
        b.connect().unwrap();
        b.write_raw(Register::HomingOffset, "pan", 100).unwrap();
        assert_eq!(b.read_raw(Register::PresentPosition, "pan").unwrap(), 2048 - 100);
    }

    #[test]
    fn goal_moves_motor_only_with_torque() {
        let mut b = bus();
        let h = b.handle();
        b.connect().unwrap();
        b.write_raw(Register::GoalPosition, "pan", 1000).unwrap();
        assert_eq!(h.actual("pan"), Some(2048));

        b.write_raw(Register::TorqueEnable, "pan", 1).unwrap();
        b.write_raw(Register::GoalPosition, "pan", 1000).unwrap();
        assert_eq!(h.actual("pan"), Some(1000));
        assert_eq!(h.goal("pan"), Some(1000));
    }

    #[test]
    fn goal_is_clamped_to_position_limits() {
        let mut b = bus();
        b.connect().unwrap();
        b.write_raw(Register::MaxPositionLimit, "pan", 3000).unwrap();
        b.write_raw(Register::TorqueEnable, "pan", 1).unwrap();
        b.write_raw(Register::GoalPosition, "pan", 4000).unwrap();
        assert_eq!(b.read_raw(Register::PresentPosition, "pan").unwrap(), 3000);
    }

    #[test]
    fn present_position_is_read_only() {
        let mut b = bus();
        b.connect().unwrap();
        assert!(b.write_raw(Register::PresentPosition, "pan", 1).is_err());
    }

    #[test]
    fn unknown_motor_is_a_config_error() {
        let mut b = bus();
        b.connect().unwrap();
        assert!(matches!(
            b.read_raw(Register::PresentPosition, "tilt"),
            Err(RobotError::Config(_))
        ));
    }

    #[test]
    fn idle_motion_sways_limp_motors() {
        let mut b = bus().with_idle_motion(300);
        b.connect().unwrap();
        let samples: Vec<i32> = (0..20)
            .map(|_| b.read_raw(Register::PresentPosition, "pan").unwrap())
            .collect();
        let min = samples.iter().min().unwrap();
        let max = samples.iter().max().unwrap();
        assert!(max - min > 300);
    }

    #[test]
    fn sim_camera_read_requires_connection() {
        let mut cam = SimCamera::new("front", CameraConfig::sim(4, 2));
        assert!(matches!(cam.read(), Err(RobotError::NotConnected(_))));
        cam.connect(true).unwrap();
        let frame = cam.read().unwrap();
        assert_eq!(frame.shape(), [2, 4, 3]);
        assert!(matches!(cam.connect(false), Err(RobotError::AlreadyConnected(_))));
    }

    #[test]
    fn sim_camera_async_read_and_disconnect() {
        let mut cam = SimCamera::new("wrist", CameraConfig::sim(4, 4));
        cam.connect(false).unwrap();
        let frame = cam.async_read(Duration::from_millis(500)).unwrap();
        assert_eq!(frame.data.len(), 48);
        cam.disconnect().unwrap();
        assert!(!cam.is_connected());
        assert!(matches!(
            cam.async_read(Duration::from_millis(10)),
            Err(RobotError::NotConnected(_))
        ));
    }

    #[test]
    fn bgr_mode_swaps_channels() {
        let rgb = render(1, 1, ColorMode::Rgb, 10);
        let bgr = render(1, 1, ColorMode::Bgr, 10);
        assert_eq!(rgb.data[0], bgr.data[2]);
        assert_eq!(rgb.data[2], bgr.data[0]);
    }
}
