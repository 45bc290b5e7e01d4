//! Fixed-rate teleoperation: read the leader, command the follower, sleep
//! out the rest of the period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use armature_types::RobotError;

use crate::robot::Robot;
use crate::teleoperator::Teleoperator;

#[derive(Debug, Clone, Copy)]
pub struct TeleopLoopConfig {
    pub fps: u32,
    /// Stop after this long; `None` runs until the stop flag is raised.
    pub duration: Option<Duration>,
}

impl Default for TeleopLoopConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            duration: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TeleopStats {
    pub iterations: u64,
    pub mean_loop: Duration,
    pub max_loop: Duration,
    /// Iterations whose work alone exceeded the period.
    pub overruns: u64,
}

/// Drive `robot` from `teleop` until `stop` is set or `config.duration`
/// elapses.
///
/// Errors from either device end the loop immediately.
#[instrument(skip_all, fields(teleop = teleop.id(), robot = robot.id(), fps = config.fps))]
pub fn run_teleop(
    teleop: &mut dyn Teleoperator,
    robot: &mut dyn Robot,
    config: TeleopLoopConfig,
    stop: &AtomicBool,
) -> Result<TeleopStats, RobotError> {
    if config.fps == 0 {
        return Err(RobotError::Config("teleop fps must be positive".into()));
    }
    if !teleop.is_connected() {
        return Err(RobotError::NotConnected(format!("{} {}", teleop.id(), teleop.name())));
    }
    if !robot.is_connected() {
        return Err(RobotError::NotConnected(format!("{} {}", robot.id(), robot.name())));
    }

    let period = Duration::from_secs_f64(1.0 / f64::from(config.fps));
    let started = Instant::now();
    let mut stats = TeleopStats::default();
    let mut total = Duration::ZERO;

    info!("teleoperation started");
    while !stop.load(Ordering::SeqCst) {
        if config.duration.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
        let tick = Instant::now();

        let action = teleop.get_action()?;
        let sent = robot.send_action(&action)?;

        let work = tick.elapsed();
        if work < period {
            std::thread::sleep(period - work);
        } else {
            stats.overruns += 1;
            debug!(work_ms = work.as_secs_f64() * 1e3, "loop overran its period");
        }

        let loop_time = tick.elapsed();
        stats.iterations += 1;
        total += loop_time;
        stats.max_loop = stats.max_loop.max(loop_time);
        debug!(
            loop_ms = loop_time.as_secs_f64() * 1e3,
            joints = sent.len(),
            "teleop step"
        );
    }

    if stats.iterations > 0 {
        stats.mean_loop = total.div_f64(stats.iterations as f64);
    }
    if stats.overruns > 0 {
        warn!(overruns = stats.overruns, "teleop loop could not keep its rate");
    }
    info!(
        iterations = stats.iterations,
        mean_ms = stats.mean_loop.as_secs_f64() * 1e3,
        "teleoperation stopped"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use armature_types::{Action, Features, Observation, Value};
    use std::sync::Arc;

    struct ConstLeader {
        connected: bool,
        reads: u64,
    }

    impl Teleoperator for ConstLeader {
        fn name(&self) -> &str {
            "const"
        }
        fn id(&self) -> &str {
            "lead"
        }
        fn action_features(&self) -> Features {
            Features::new()
        }
        fn feedback_features(&self) -> Features {
            Features::new()
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn connect(&mut self, _calibrate: bool) -> Result<(), RobotError> {
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
        fn get_action(&mut self) -> Result<Action, RobotError> {
            self.reads += 1;
            Ok(Action::from([("j.pos".to_string(), Value::Float(self.reads as f64))]))
        }
        fn send_feedback(&mut self, _feedback: &Action) -> Result<(), RobotError> {
            Ok(())
        }
        fn disconnect(&mut self) -> Result<(), RobotError> {
            self.connected = false;
            Ok(())
        }
    }

    struct RecordingRobot {
        connected: bool,
        last: Option<Action>,
        fail_after: Option<usize>,
        sent: usize,
        stop_on_send: Option<(usize, Arc<AtomicBool>)>,
    }

    impl RecordingRobot {
        fn new() -> Self {
            Self {
                connected: true,
                last: None,
                fail_after: None,
                sent: 0,
                stop_on_send: None,
            }
        }
    }

    impl Robot for RecordingRobot {
        fn name(&self) -> &str {
            "recorder"
        }
        fn id(&self) -> &str {
            "follow"
        }
        fn observation_features(&self) -> Features {
            Features::new()
        }
        fn action_features(&self) -> Features {
            Features::new()
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn connect(&mut self, _calibrate: bool) -> Result<(), RobotError> {
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
            Ok(Observation::new())
        }
        fn send_action(&mut self, action: &Action) -> Result<Action, RobotError> {
            if self.fail_after.is_some_and(|n| self.sent >= n) {
                return Err(RobotError::HardwareFault {
                    component: "recorder".into(),
                    details: "bus dropped".into(),
                });
            }
            self.sent += 1;
            if let Some((n, flag)) = &self.stop_on_send
                && self.sent >= *n
            {
                flag.store(true, Ordering::SeqCst);
            }
            self.last = Some(action.clone());
            Ok(action.clone())
        }
        fn disconnect(&mut self) -> Result<(), RobotError> {
            self.connected = false;
            Ok(())
        }
    }

    fn leader() -> ConstLeader {
        ConstLeader {
            connected: true,
            reads: 0,
        }
    }

    #[test]
    fn stops_when_flag_is_raised() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut teleop = leader();
        let mut robot = RecordingRobot::new();
        robot.stop_on_send = Some((5, Arc::clone(&stop)));

        let cfg = TeleopLoopConfig {
            fps: 200,
            duration: None,
        };
        let stats = run_teleop(&mut teleop, &mut robot, cfg, &stop).unwrap();
        assert_eq!(stats.iterations, 5);
        assert_eq!(
            robot.last.unwrap()["j.pos"],
            Value::Float(5.0),
            "robot must receive the leader's latest action"
        );
        assert!(stats.max_loop >= stats.mean_loop);
    }

    #[test]
    fn stops_after_duration() {
        let stop = AtomicBool::new(false);
        let mut teleop = leader();
        let mut robot = RecordingRobot::new();
        let cfg = TeleopLoopConfig {
            fps: 100,
            duration: Some(Duration::from_millis(50)),
        };
        let started = Instant::now();
        let stats = run_teleop(&mut teleop, &mut robot, cfg, &stop).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(stats.iterations >= 1);
        assert!(stats.mean_loop >= Duration::from_millis(5));
    }

    #[test]
    fn raised_flag_runs_no_iterations() {
        let stop = AtomicBool::new(true);
        let stats = run_teleop(
            &mut leader(),
            &mut RecordingRobot::new(),
            TeleopLoopConfig::default(),
            &stop,
        )
        .unwrap();
        assert_eq!(stats, TeleopStats::default());
    }

    #[test]
    fn requires_connected_devices() {
        let stop = AtomicBool::new(false);
        let mut teleop = leader();
        teleop.connected = false;
        let err = run_teleop(
            &mut teleop,
            &mut RecordingRobot::new(),
            TeleopLoopConfig::default(),
            &stop,
        )
        .unwrap_err();
        assert!(matches!(err, RobotError::NotConnected(ref d) if d == "lead const"));

        let mut robot = RecordingRobot::new();
        robot.connected = false;
        let err = run_teleop(&mut leader(), &mut robot, TeleopLoopConfig::default(), &stop)
            .unwrap_err();
        assert!(matches!(err, RobotError::NotConnected(_)));
    }

    #[test]
    fn zero_fps_is_rejected() {
        let stop = AtomicBool::new(false);
        let cfg = TeleopLoopConfig {
            fps: 0,
            duration: None,
        };
        let err = run_teleop(&mut leader(), &mut RecordingRobot::new(), cfg, &stop).unwrap_err();
        assert!(matches!(err, RobotError::Config(_)));
    }

    #[test]
    fn device_error_ends_the_loop() {
        let stop = AtomicBool::new(false);
        let mut robot = RecordingRobot::new();
        robot.fail_after = Some(2);
        let err = run_teleop(&mut leader(), &mut robot, TeleopLoopConfig::default(), &stop)
            .unwrap_err();
        assert!(matches!(err, RobotError::HardwareFault { .. }));
        assert_eq!(robot.sent, 2);
    }
}
