// Service loop: zenoh command intake, motion thread, status publishing
// Note: moves block the motion thread for their full duration (homing can take
// max_home_pulses * 2 * step dwell per axis), so commands are handed to a
// dedicated thread and the async loop only ever reads published snapshots.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

// local imports
use crate::camera::{FrameSource, TestPattern};
use crate::config::{RigConfig, STATUS_HZ, TOPIC_CMD, TOPIC_HEALTH, TOPIC_REPLY, TOPIC_STATUS};
use crate::messages::{Command, Reply};
use crate::motion::{Gpio, MotionSupervisor, SimulatedGpio, gpio};
use crate::session::{Session, StatusFeed};

// Commands queued while a move is running
const COMMAND_QUEUE: usize = 16;

// How far the simulated carriages start from their home switches
const SIM_TRAVEL_UNITS: u32 = 50;

/// Runtime options, normally filled from the command line
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub config_path: Option<PathBuf>,
    pub simulate: bool,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Bring the motion hardware up, or fall back to an uninitialized supervisor
fn start_motion(gpio: Result<Arc<dyn Gpio>, gpio::GpioError>, config: &RigConfig) -> MotionSupervisor {
    let gpio = match gpio {
        Ok(gpio) => gpio,
        Err(e) => {
            error!("GPIO unavailable: {}", e);
            warn!("Continuing without motion control");
            return MotionSupervisor::uninitialized(config);
        }
    };
    match MotionSupervisor::start(gpio, config) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!("Motion hardware acquisition failed: {}", e);
            warn!("Continuing without motion control");
            MotionSupervisor::uninitialized(config)
        }
    }
}

pub async fn run(options: RuntimeOptions) -> Result<(), BoxError> {
    let config = match &options.config_path {
        Some(path) => {
            info!("Loading rig configuration from {}", path.display());
            RigConfig::load(path)?
        }
        None => RigConfig::default(),
    };

    info!("Opening Zenoh session...");
    let zenoh_session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = zenoh_session.declare_subscriber(TOPIC_CMD).await?;
    let publishers = Publishers {
        reply: zenoh_session.declare_publisher(TOPIC_REPLY).await?,
        status: zenoh_session.declare_publisher(TOPIC_STATUS).await?,
        health: zenoh_session.declare_publisher(TOPIC_HEALTH).await?,
    };

    let gpio: Result<Arc<dyn Gpio>, gpio::GpioError> = if options.simulate {
        info!("Using simulated GPIO bench");
        Ok(SimulatedGpio::for_rig(&config, SIM_TRAVEL_UNITS).handle())
    } else {
        gpio::hardware()
    };
    let backend = gpio.as_ref().ok().cloned();

    let mut supervisor = start_motion(gpio, &config);
    let monitor = supervisor.spawn_limit_monitor();

    // Live capture is handled outside this process; the test pattern stands in when simulating
    let mut camera: Box<dyn FrameSource> = Box::new(TestPattern::default());
    if options.simulate {
        if let Err(e) = camera.start() {
            warn!("Camera failed to start: {}", e);
        }
    }

    let session = Session::new(supervisor);
    let mut feed = session.status_feed();
    if let Some(monitor) = &monitor {
        feed = feed.with_limits(monitor.subscribe());
    }

    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(COMMAND_QUEUE);
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<Reply>();
    let (stop_tx, stop_rx) = watch::channel(false);
    let motion_thread = thread::Builder::new()
        .name("motion".to_string())
        .spawn(move || session.serve(cmd_rx, reply_tx, stop_rx))?;

    let result = serve(&subscriber, &publishers, &cmd_tx, reply_rx, &feed, camera.as_ref()).await;
    if let Err(e) = &result {
        error!("Service loop failed: {}", e);
    }

    // Shutdown order: motion thread, limit monitor, axes, camera.
    // Stop is raised before the queue closes, so queued commands are discarded
    // and only an in-flight move finishes.
    stop_tx.send_replace(true);
    drop(cmd_tx);
    info!("Waiting for motion thread...");
    let session = tokio::task::spawn_blocking(move || motion_thread.join())
        .await?
        .map_err(|_| "motion thread panicked")?;

    if let Some(monitor) = monitor {
        monitor.shutdown().await;
    }
    let mut supervisor = session.into_supervisor();
    supervisor.cleanup();
    if let Some(backend) = backend {
        if let Err(e) = backend.release_all() {
            warn!("Failed to release remaining GPIO: {}", e);
        }
    }
    camera.stop();

    info!("Shutdown complete");
    result
}

struct Publishers<'a> {
    reply: zenoh::pubsub::Publisher<'a>,
    status: zenoh::pubsub::Publisher<'a>,
    health: zenoh::pubsub::Publisher<'a>,
}

async fn serve(
    subscriber: &zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
    publishers: &Publishers<'_>,
    cmd_tx: &mpsc::Sender<Command>,
    mut reply_rx: mpsc::UnboundedReceiver<Reply>,
    feed: &StatusFeed,
    camera: &dyn FrameSource,
) -> Result<(), BoxError> {
    let mut tick = interval(Duration::from_millis(1000 / STATUS_HZ));
    info!("Runtime started: {}Hz status", STATUS_HZ);
    info!("Subscribed to: {}", TOPIC_CMD);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_REPLY, TOPIC_STATUS, TOPIC_HEALTH
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for ctrl-c: {}", e);
                }
                info!("Shutdown requested");
                return Ok(());
            }
            _ = tick.tick() => {}
        }

        // 1. Drain pending commands (non-blocking) and queue them for the motion thread
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<Command>(&payload) {
                Ok(cmd) => {
                    info!("Received command: {:?}", &cmd);
                    if let Err(e) = cmd_tx.try_send(cmd) {
                        let reason = match &e {
                            TrySendError::Full(_) => "motion queue full",
                            TrySendError::Closed(_) => "motion thread stopped",
                        };
                        warn!("Rejecting command: {}", reason);
                        let reply = Reply::rejected(&e.into_inner(), reason);
                        publishers.reply.put(serde_json::to_string(&reply)?).await?;
                    }
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 2. Publish replies for commands that finished
        while let Ok(reply) = reply_rx.try_recv() {
            let reply_json = serde_json::to_string(&reply)?;
            publishers.reply.put(reply_json).await?;
        }

        // 3. Publish status and health
        let status = feed.status(camera.status());
        let status_json = serde_json::to_string(&status)?;
        publishers.status.put(status_json).await?;

        let health_json = serde_json::to_string(&status.health)?;
        publishers.health.put(health_json).await?;
    }
}
