// Operator session: dispatches commands to the motion supervisor and the ROI
// manager. Lives on the motion thread; everything other threads need is
// published on watch channels and read back through a StatusFeed.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::camera::CameraStatus;
use crate::messages::{Command, Reply, RigStatus};
use crate::motion::{LimitSnapshot, MotionError, MotionStatus, MotionSupervisor};
use crate::roi::{RoiManager, RoiSnapshot};

pub struct Session {
    supervisor: MotionSupervisor,
    roi: RoiManager,
    roi_tx: watch::Sender<RoiSnapshot>,
}

impl Session {
    pub fn new(supervisor: MotionSupervisor) -> Self {
        let (roi_tx, _) = watch::channel(RoiSnapshot::default());
        Self {
            supervisor,
            roi: RoiManager::new(),
            roi_tx,
        }
    }

    pub fn supervisor(&self) -> &MotionSupervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut MotionSupervisor {
        &mut self.supervisor
    }

    pub fn roi(&self) -> &RoiManager {
        &self.roi
    }

    /// Receivers for everything a display needs, usable from any thread
    pub fn status_feed(&self) -> StatusFeed {
        StatusFeed {
            motion: self.supervisor.subscribe(),
            limits: None,
            roi: self.roi_tx.subscribe(),
        }
    }

    /// Execute one command. Blocks for the whole move or homing run.
    pub fn handle(&mut self, cmd: Command) -> Reply {
        debug!("Handling {:?}", cmd);
        match cmd {
            Command::MoveAxis { axis, units } => match self.supervisor.move_axis(axis, units) {
                Ok(outcome) => Reply::Move(outcome),
                Err(e) => failed(e),
            },
            Command::HomeAll => match self.supervisor.home_all() {
                Ok(outcome) => Reply::Home(outcome),
                Err(e) => failed(e),
            },
            Command::MarkPoint => {
                let point = self.supervisor.position();
                let added = self.roi.add_point(point);
                self.publish_roi();
                Reply::PointMarked { point, added }
            }
            Command::ConfirmRoi => {
                let regions = self.roi.regions().len();
                info!("Operator confirmed {} ROI(s)", regions);
                Reply::RoiConfirmed { regions }
            }
            Command::ResetRoi => {
                self.roi.reset();
                self.publish_roi();
                Reply::RoiReset
            }
        }
    }

    /// Run commands until the sender side closes, then hand the session back
    /// for shutdown. Meant for a dedicated (non-async) thread.
    ///
    /// Once `stop` reads true, whatever is still queued is discarded; only the
    /// command already running when the stop arrives is finished.
    pub fn serve(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        replies: mpsc::UnboundedSender<Reply>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        info!("Motion thread serving commands");
        while let Some(cmd) = commands.blocking_recv() {
            if *stop.borrow() {
                commands.close();
                let mut discarded = 1;
                while commands.try_recv().is_ok() {
                    discarded += 1;
                }
                warn!("Shutdown requested, discarded {} queued command(s)", discarded);
                break;
            }
            let reply = self.handle(cmd);
            if replies.send(reply).is_err() {
                warn!("Reply channel closed, dropping reply");
            }
        }
        info!("Command channel closed, motion thread exiting");
        self
    }

    pub fn into_supervisor(self) -> MotionSupervisor {
        self.supervisor
    }

    fn publish_roi(&self) {
        self.roi_tx.send_replace(self.roi.snapshot());
    }
}

fn failed(error: MotionError) -> Reply {
    let axis = match &error {
        MotionError::Gpio { axis, .. } => Some(*axis),
        MotionError::InvalidDisplacement { .. } => None,
    };
    Reply::Failed {
        axis,
        reason: error.to_string(),
    }
}

/// Read side of the session's published state
#[derive(Clone)]
pub struct StatusFeed {
    motion: watch::Receiver<MotionStatus>,
    limits: Option<watch::Receiver<LimitSnapshot>>,
    roi: watch::Receiver<RoiSnapshot>,
}

impl StatusFeed {
    pub fn with_limits(mut self, limits: watch::Receiver<LimitSnapshot>) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn motion(&self) -> MotionStatus {
        *self.motion.borrow()
    }

    pub fn status(&self, camera: CameraStatus) -> RigStatus {
        let limits = self
            .limits
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or_default();
        let roi = self.roi.borrow().clone();
        RigStatus::assemble(self.motion(), limits, roi, camera)
    }
}
