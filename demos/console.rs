// Operator console: arrows jog X/Y, PgUp/PgDn jog Z, H home, M mark corner,
// C confirm ROIs, R reset ROIs, +/- jog size, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use otus_rig::config::{TOPIC_CMD, TOPIC_REPLY};
use otus_rig::messages::{Command, Reply};
use otus_rig::motion::Axis;
use std::time::Duration;
use tracing::{info, warn};

const JOG_SIZES: [i64; 4] = [1, 5, 20, 100]; // units per key press

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;
    let replies = session.declare_subscriber(TOPIC_REPLY).await?;

    info!("Controls: arrows=X/Y, PgUp/PgDn=Z, H=home, M=mark, C=confirm, R=reset, +/-=jog, Q=quit");
    info!("Jog: {} units", JOG_SIZES[0]);

    enable_raw_mode()?;
    let result = run_console(&publisher, &replies).await;
    disable_raw_mode()?;

    result
}

async fn run_console(
    publisher: &zenoh::pubsub::Publisher<'_>,
    replies: &zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
) -> Result<(), BoxError> {
    let mut jog_idx: usize = 0;

    loop {
        // Poll for key with 20ms timeout
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                if kind != KeyEventKind::Press {
                    continue;
                }
                let jog = JOG_SIZES[jog_idx];

                let cmd = match code {
                    KeyCode::Right => Some(Command::MoveAxis { axis: Axis::X, units: jog }),
                    KeyCode::Left => Some(Command::MoveAxis { axis: Axis::X, units: -jog }),
                    KeyCode::Up => Some(Command::MoveAxis { axis: Axis::Y, units: jog }),
                    KeyCode::Down => Some(Command::MoveAxis { axis: Axis::Y, units: -jog }),
                    KeyCode::PageUp => Some(Command::MoveAxis { axis: Axis::Z, units: jog }),
                    KeyCode::PageDown => Some(Command::MoveAxis { axis: Axis::Z, units: -jog }),

                    KeyCode::Char('h') => Some(Command::HomeAll),
                    KeyCode::Char('m') => Some(Command::MarkPoint),
                    KeyCode::Char('c') => Some(Command::ConfirmRoi),
                    KeyCode::Char('r') => Some(Command::ResetRoi),

                    // Jog size
                    KeyCode::Char('+') | KeyCode::Char('=') => {
                        jog_idx = (jog_idx + 1).min(JOG_SIZES.len() - 1);
                        info!("Jog: {} units\r", JOG_SIZES[jog_idx]);
                        None
                    }
                    KeyCode::Char('-') => {
                        jog_idx = jog_idx.saturating_sub(1);
                        info!("Jog: {} units\r", JOG_SIZES[jog_idx]);
                        None
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc => break,

                    _ => None,
                };

                if let Some(cmd) = cmd {
                    publisher.put(serde_json::to_string(&cmd)?).await?;
                }
            }
        }

        while let Ok(Some(sample)) = replies.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<Reply>(&payload) {
                Ok(reply) => print_reply(&reply),
                Err(e) => warn!("Unreadable reply: {}\r", e),
            }
        }
    }

    Ok(())
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::Failed { axis: Some(axis), reason } => warn!("{} axis failed: {}\r", axis, reason),
        Reply::Failed { axis: None, reason } => warn!("Command failed: {}\r", reason),
        other => info!("{:?}\r", other),
    }
}
