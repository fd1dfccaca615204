// Camera collaborator
//
// The rig only ever asks the camera for its latest frame to show it; motion
// never waits on frame timing.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// One greyscale frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
    pub pixels: Vec<u8>,
}

/// Camera state reported alongside rig status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraStatus {
    pub live: bool,
    pub frame_sequence: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),
}

pub trait FrameSource: Send {
    fn start(&mut self) -> Result<(), CameraError>;
    fn stop(&mut self);
    fn latest_frame(&self) -> Option<Frame>;

    fn status(&self) -> CameraStatus {
        let frame = self.latest_frame();
        CameraStatus {
            live: frame.is_some(),
            frame_sequence: frame.map(|f| f.sequence),
        }
    }
}

/// Synthetic source: a diagonal gradient that scrolls at `fps`
pub struct TestPattern {
    width: u32,
    height: u32,
    fps: u32,
    started_at: Option<Instant>,
}

impl TestPattern {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            started_at: None,
        }
    }

    fn sequence(&self) -> Option<u64> {
        let started_at = self.started_at?;
        Some(started_at.elapsed().as_millis() as u64 * u64::from(self.fps) / 1000)
    }
}

impl Default for TestPattern {
    fn default() -> Self {
        Self::new(640, 480, 30)
    }
}

impl FrameSource for TestPattern {
    fn start(&mut self) -> Result<(), CameraError> {
        if self.width == 0 || self.height == 0 {
            return Err(CameraError::Unavailable(format!(
                "invalid resolution {}x{}",
                self.width, self.height
            )));
        }
        self.started_at.get_or_insert_with(Instant::now);
        info!(
            "Test pattern camera started ({}x{} @ {}fps)",
            self.width, self.height, self.fps
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.started_at.take().is_some() {
            info!("Test pattern camera stopped");
        }
    }

    fn latest_frame(&self) -> Option<Frame> {
        let sequence = self.sequence()?;
        let offset = sequence as u32;
        let pixels = (0..self.height)
            .flat_map(|y| {
                (0..self.width).map(move |x| x.wrapping_add(y).wrapping_add(offset) as u8)
            })
            .collect();
        Some(Frame {
            width: self.width,
            height: self.height,
            sequence,
            pixels,
        })
    }

    // Avoids rendering a frame just to report its sequence number
    fn status(&self) -> CameraStatus {
        let frame_sequence = self.sequence();
        CameraStatus {
            live: frame_sequence.is_some(),
            frame_sequence,
        }
    }
}
