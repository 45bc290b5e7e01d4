//! Generic `Camera` trait, camera configuration and the background reader
//! that backs [`Camera::async_read`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use armature_types::{Frame, RobotError};

use crate::sim::SimCamera;

/// Capture backends known to [`make_camera`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraKind {
    Sim,
}

/// Channel order of captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    #[default]
    Rgb,
    Bgr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(rename = "type")]
    pub kind: CameraKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default)]
    pub color_mode: ColorMode,
}

impl CameraConfig {
    pub fn sim(width: u32, height: u32) -> Self {
        Self {
            kind: CameraKind::Sim,
            fps: Some(30),
            width: Some(width),
            height: Some(height),
            color_mode: ColorMode::Rgb,
        }
    }

    /// `[height, width, 3]`, defaulting to 640×480.
    pub fn shape(&self) -> [usize; 3] {
        [
            self.height.unwrap_or(480) as usize,
            self.width.unwrap_or(640) as usize,
            3,
        ]
    }
}

/// A camera or image-capture device.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"front"`.
    fn id(&self) -> &str;

    /// Shape of the frames this camera produces.
    fn shape(&self) -> [usize; 3];

    fn is_connected(&self) -> bool;

    /// Open the device.  With `warmup` a few frames are read and discarded.
    fn connect(&mut self, warmup: bool) -> Result<(), RobotError>;

    /// Capture a frame synchronously.
    fn read(&mut self) -> Result<Frame, RobotError>;

    /// Return the newest frame produced by the background reader, waiting up
    /// to `timeout` for one to arrive.
    ///
    /// # Errors
    ///
    /// [`RobotError::Timeout`] when no new frame arrives in time.
    fn async_read(&mut self, timeout: Duration) -> Result<Frame, RobotError>;

    /// Stop the background reader and release the device.
    fn disconnect(&mut self) -> Result<(), RobotError>;
}

/// Build a camera from its configuration.
pub fn make_camera(id: &str, config: &CameraConfig) -> Result<Box<dyn Camera>, RobotError> {
    match config.kind {
        CameraKind::Sim => Ok(Box::new(SimCamera::new(id, config.clone()))),
    }
}

/// Build every camera named in `configs`.
pub fn make_cameras<'a, I>(configs: I) -> Result<Vec<Box<dyn Camera>>, RobotError>
where
    I: IntoIterator<Item = (&'a String, &'a CameraConfig)>,
{
    configs
        .into_iter()
        .map(|(id, cfg)| make_camera(id, cfg))
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Background reader
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct LatestFrame {
    frame: Option<Frame>,
    error: Option<RobotError>,
}

/// Capture thread that keeps the newest frame in a shared slot.
///
/// A frame is handed out once; later [`BackgroundReader::latest`] calls wait
/// for the next capture.
pub struct BackgroundReader {
    slot: Arc<(Mutex<LatestFrame>, Condvar)>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundReader {
    /// Spawn a thread calling `capture` every `period`.
    pub fn spawn<F>(name: &str, period: Duration, mut capture: F) -> Result<Self, RobotError>
    where
        F: FnMut() -> Result<Frame, RobotError> + Send + 'static,
    {
        let slot = Arc::new((Mutex::new(LatestFrame::default()), Condvar::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let slot_clone = Arc::clone(&slot);
        let stop_clone = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name(format!("{name}_read_loop"))
            .spawn(move || {
                while !stop_clone.load(Ordering::SeqCst) {
                    let result = capture();
                    let (lock, cvar) = &*slot_clone;
                    if let Ok(mut latest) = lock.lock() {
                        match result {
                            Ok(frame) => {
                                latest.frame = Some(frame);
                                latest.error = None;
                            }
                            Err(e) => {
                                warn!(error = %e, "background capture failed");
                                latest.error = Some(e);
                            }
                        }
                        cvar.notify_all();
                    }
                    std::thread::sleep(period);
                }
            })?;
        debug!(camera = name, "background reader started");

        Ok(Self {
            slot,
            stop,
            thread: Some(thread),
        })
    }

    /// Take the newest frame, waiting up to `timeout` for one.
    pub fn latest(&self, timeout: Duration) -> Result<Frame, RobotError> {
        let (lock, cvar) = &*self.slot;
        let guard = lock
            .lock()
            .map_err(|_| RobotError::Io("camera frame slot poisoned".to_string()))?;
        let (mut latest, _) = cvar
            .wait_timeout_while(guard, timeout, |l| l.frame.is_none() && l.error.is_none())
            .map_err(|_| RobotError::Io("camera frame slot poisoned".to_string()))?;

        if let Some(frame) = latest.frame.take() {
            return Ok(frame);
        }
        if let Some(e) = latest.error.take() {
            return Err(e);
        }
        Err(RobotError::Timeout(format!(
            "no frame within {} ms",
            timeout.as_millis()
        )))
    }

    /// Signal the thread to stop and join it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            warn!("camera read thread panicked");
        }
    }
}

impl Drop for BackgroundReader {
    fn drop(&mut self) {
        self.stop();
    }
}
