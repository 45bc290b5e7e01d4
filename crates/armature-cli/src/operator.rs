//! Terminal-backed [`Operator`] for interactive calibration.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;

use armature_hal::Operator;
use armature_types::RobotError;

/// Pause between range-recording samples.
const SAMPLE_PERIOD: Duration = Duration::from_millis(20);

/// Prompts on stdout and reads answers from stdin.
///
/// While a procedure samples hardware, a helper thread waits for ENTER so
/// the sampling loop never blocks on the terminal.
pub struct StdinOperator {
    shutdown: Arc<AtomicBool>,
    enter: Option<Arc<AtomicBool>>,
}

impl StdinOperator {
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self {
            shutdown,
            enter: None,
        }
    }
}

impl Operator for StdinOperator {
    fn prompt(&mut self, message: &str) -> Result<String, RobotError> {
        print!("  {} ", message.bold());
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }

    fn notify(&mut self, message: &str) {
        println!("  {}", message.cyan());
    }

    fn should_stop(&mut self) -> bool {
        if self.shutdown.load(Ordering::SeqCst) {
            self.enter = None;
            return true;
        }
        let pressed = match &self.enter {
            Some(flag) => flag.load(Ordering::SeqCst),
            None => {
                let flag = Arc::new(AtomicBool::new(false));
                let seen = Arc::clone(&flag);
                std::thread::spawn(move || {
                    let mut line = String::new();
                    // EOF or an error also ends sampling.
                    let _ = io::stdin().lock().read_line(&mut line);
                    seen.store(true, Ordering::SeqCst);
                });
                self.enter = Some(flag);
                false
            }
        };
        if pressed {
            self.enter = None;
            return true;
        }
        std::thread::sleep(SAMPLE_PERIOD);
        false
    }

    /// Ctrl-C abandons the procedure instead of finishing it.
    fn cancelled(&mut self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
