//! REPL – Read-Eval-Print Loop for the Armature workbench.
//!
//! Supported slash-commands:
//!   /help              – show this list
//!   /features          – describe the configured robot and teleoperator
//!   /connect           – connect both devices, calibrating if needed
//!   /calibrate         – re-run calibration on connected devices
//!   /observe           – print one robot observation
//!   /teleop [seconds]  – mirror the teleoperator onto the robot
//!   /disconnect        – release both devices
//!   /quit | /exit      – disconnect and exit the CLI

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use armature_hal::{HardwareRegistry, Operator, Robot, TeleopLoopConfig, Teleoperator, run_teleop};
use armature_types::{Features, RobotError, Value};
use tracing::warn;

use crate::config::Config;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Features,
    Connect,
    Calibrate,
    Observe,
    Teleop(Option<Duration>),
    Disconnect,
    Quit,
    Unknown(String),
}

/// Parse one input line.  Returns `None` for blank input.
pub fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let head = words.next()?;
    let cmd = match head {
        "/help" => Command::Help,
        "/features" => Command::Features,
        "/connect" => Command::Connect,
        "/calibrate" => Command::Calibrate,
        "/observe" => Command::Observe,
        "/teleop" => match words.next() {
            None => Command::Teleop(None),
            Some(secs) => match secs.parse::<f64>() {
                Ok(s) if s.is_finite() && s > 0.0 => {
                    Command::Teleop(Some(Duration::from_secs_f64(s)))
                }
                _ => Command::Unknown(line.trim().to_string()),
            },
        },
        "/disconnect" => Command::Disconnect,
        "/quit" | "/exit" => Command::Quit,
        _ => Command::Unknown(line.trim().to_string()),
    };
    Some(cmd)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub type OperatorFactory = Box<dyn Fn() -> Box<dyn Operator>>;

/// Devices configured for this session.  They are built on first use and
/// kept until the session ends.
pub struct Session {
    cfg: Config,
    registry: HardwareRegistry,
    shutdown: Arc<AtomicBool>,
    make_operator: OperatorFactory,
    robot: Option<Box<dyn Robot>>,
    teleop: Option<Box<dyn Teleoperator>>,
}

impl Session {
    pub fn new(
        cfg: Config,
        registry: HardwareRegistry,
        shutdown: Arc<AtomicBool>,
        make_operator: OperatorFactory,
    ) -> Self {
        Self {
            cfg,
            registry,
            shutdown,
            make_operator,
            robot: None,
            teleop: None,
        }
    }

    fn build_devices(&mut self) -> Result<(), RobotError> {
        if self.robot.is_none() {
            self.robot = Some(
                self.registry
                    .make_robot(&self.cfg.robot, (self.make_operator)())?,
            );
        }
        if self.teleop.is_none() {
            self.teleop = Some(
                self.registry
                    .make_teleoperator(&self.cfg.teleop, (self.make_operator)())?,
            );
        }
        Ok(())
    }

    fn devices(&mut self) -> Result<(&mut dyn Robot, &mut dyn Teleoperator), RobotError> {
        self.build_devices()?;
        match (self.robot.as_deref_mut(), self.teleop.as_deref_mut()) {
            (Some(robot), Some(teleop)) => Ok((robot, teleop)),
            _ => Err(RobotError::Config("devices are not configured".to_string())),
        }
    }

    pub fn execute(&mut self, cmd: Command) -> Result<Flow, RobotError> {
        match cmd {
            Command::Help => cmd_help(),
            Command::Features => {
                let (robot, teleop) = self.devices()?;
                print_features(&format!("{} {} observation", robot.id(), robot.name()), &robot.observation_features());
                print_features(&format!("{} {} action", robot.id(), robot.name()), &robot.action_features());
                print_features(&format!("{} {} action", teleop.id(), teleop.name()), &teleop.action_features());
            }
            Command::Connect => {
                let (robot, teleop) = self.devices()?;
                if !robot.is_connected() {
                    robot.connect(true)?;
                }
                if !teleop.is_connected() {
                    teleop.connect(true)?;
                }
                println!(
                    "  {} {} and {} connected",
                    "✓".green().bold(),
                    robot.name().bold(),
                    teleop.name().bold()
                );
            }
            Command::Calibrate => {
                let (robot, teleop) = self.devices()?;
                if !robot.is_connected() && !teleop.is_connected() {
                    return Err(RobotError::NotConnected("robot and teleoperator".to_string()));
                }
                if robot.is_connected() {
                    robot.calibrate()?;
                }
                if teleop.is_connected() {
                    teleop.calibrate()?;
                }
                println!("  {} calibration complete", "✓".green().bold());
            }
            Command::Observe => {
                let (robot, _) = self.devices()?;
                let obs = robot.get_observation()?;
                for (key, value) in &obs {
                    println!("  {:<20} {}", key.bold(), format_value(value));
                }
            }
            Command::Teleop(duration) => {
                let fps = self.cfg.fps;
                let duration = duration.or(self.cfg.teleop_time_s.map(Duration::from_secs_f64));
                let shutdown = Arc::clone(&self.shutdown);
                let (robot, teleop) = self.devices()?;
                println!(
                    "  Teleoperating at {} fps – press {} to stop.",
                    fps.to_string().yellow(),
                    "Ctrl-C".bold()
                );
                let stats = run_teleop(teleop, robot, TeleopLoopConfig { fps, duration }, &shutdown)?;
                println!(
                    "  {} {} iterations, mean {:.1} ms, max {:.1} ms",
                    "✓".green().bold(),
                    stats.iterations,
                    stats.mean_loop.as_secs_f64() * 1e3,
                    stats.max_loop.as_secs_f64() * 1e3
                );
            }
            Command::Disconnect => {
                self.disconnect_all();
                println!("  {} devices released", "✓".green().bold());
            }
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                return Ok(Flow::Quit);
            }
            Command::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
        Ok(Flow::Continue)
    }

    /// Disconnect whatever is connected, logging failures.
    pub fn disconnect_all(&mut self) {
        if let Some(robot) = self.robot.as_deref_mut()
            && robot.is_connected()
            && let Err(e) = robot.disconnect()
        {
            warn!(error = %e, "robot disconnect failed");
        }
        if let Some(teleop) = self.teleop.as_deref_mut()
            && teleop.is_connected()
            && let Err(e) = teleop.disconnect()
        {
            warn!(error = %e, "teleoperator disconnect failed");
        }
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(mut session: Session, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "armature>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let Some(cmd) = parse_command(&line) else {
            continue;
        };
        match session.execute(cmd) {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => println!("{}: {}", "Error".red().bold(), e),
        }
    }

    session.disconnect_all();
}

fn cmd_help() {
    println!();
    println!("{}", "Armature Commands".bold().underline());
    println!("  {}          – describe robot and teleoperator features", "/features".bold().cyan());
    println!("  {}           – connect both devices, calibrating if needed", "/connect".bold().cyan());
    println!("  {}         – re-run calibration", "/calibrate".bold().cyan());
    println!("  {}           – print one robot observation", "/observe".bold().cyan());
    println!("  {}  – mirror the teleoperator onto the robot", "/teleop [seconds]".bold().cyan());
    println!("  {}        – release both devices", "/disconnect".bold().cyan());
    println!("  {}       – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn print_features(title: &str, features: &Features) {
    println!("{}", title.bold().underline());
    for (key, spec) in features {
        println!("  {:<20} {:?}", key, spec);
    }
}

pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::Float(v) => format!("{v:>9.2}"),
        Value::Int(v) => format!("{v:>9}"),
        Value::Bool(v) => format!("{v:>9}"),
        Value::Image(frame) => {
            let [h, w, c] = frame.shape();
            format!("frame {h}×{w}×{c}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armature_hal::ScriptedOperator;
    use armature_types::Frame;

    #[test]
    fn parses_slash_commands() {
        assert_eq!(parse_command("   "), None);
        assert_eq!(parse_command("/connect\n"), Some(Command::Connect));
        assert_eq!(parse_command("/exit"), Some(Command::Quit));
        assert_eq!(parse_command("/teleop"), Some(Command::Teleop(None)));
        assert_eq!(
            parse_command("/teleop 2.5"),
            Some(Command::Teleop(Some(Duration::from_millis(2500))))
        );
        assert_eq!(
            parse_command("/teleop soon"),
            Some(Command::Unknown("/teleop soon".to_string()))
        );
        assert_eq!(parse_command("/dance"), Some(Command::Unknown("/dance".to_string())));
    }

    #[test]
    fn formats_values() {
        assert_eq!(format_value(&Value::Float(1.5)), "     1.50");
        assert_eq!(format_value(&Value::Image(Frame::blank(4, 6, 3))), "frame 4×6×3");
    }

    fn sim_session(dir: &std::path::Path, shutdown: Arc<AtomicBool>) -> Session {
        let mut cfg = Config::default();
        for (device, sub) in [(&mut cfg.robot, "robot"), (&mut cfg.teleop, "teleop")] {
            device.params.insert(
                "calibration_dir".to_string(),
                dir.join(sub).to_string_lossy().into_owned().into(),
            );
        }
        Session::new(
            cfg,
            HardwareRegistry::with_builtin(),
            shutdown,
            Box::new(|| -> Box<dyn Operator> { Box::new(ScriptedOperator::default().stop_after(10)) }),
        )
    }

    #[test]
    fn session_runs_a_sim_workbench() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut session = sim_session(dir.path(), Arc::clone(&shutdown));

        assert!(matches!(session.execute(Command::Observe), Err(RobotError::NotConnected(_))));
        assert_eq!(session.execute(Command::Connect).unwrap(), Flow::Continue);
        assert!(dir.path().join("robot/default.json").exists());
        assert!(dir.path().join("teleop/default.json").exists());

        session.execute(Command::Observe).unwrap();
        session
            .execute(Command::Teleop(Some(Duration::from_millis(40))))
            .unwrap();
        session.execute(Command::Disconnect).unwrap();
        assert!(matches!(session.execute(Command::Calibrate), Err(RobotError::NotConnected(_))));
        assert_eq!(session.execute(Command::Quit).unwrap(), Flow::Quit);
    }

    #[test]
    fn unknown_robot_type_is_reported() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut session = sim_session(dir.path(), Arc::new(AtomicBool::new(false)));
        session.cfg.robot.kind = "hexapod".to_string();
        assert!(matches!(session.execute(Command::Features), Err(RobotError::Config(_))));
    }
}
