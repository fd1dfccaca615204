// Limit monitor: samples every axis's limit switch on a fixed period and
// publishes the aggregate on a watch channel. Runs as its own task so status
// keeps flowing while the motion thread is blocked inside a move.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::axis::{Axis, LimitSensor};

/// Triggered/clear state of every axis's limit switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSnapshot {
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

impl LimitSnapshot {
    pub fn is_triggered(&self, axis: Axis) -> bool {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    fn set(&mut self, axis: Axis, triggered: bool) {
        match axis {
            Axis::X => self.x = triggered,
            Axis::Y => self.y = triggered,
            Axis::Z => self.z = triggered,
        }
    }

    pub fn any(&self) -> bool {
        self.x || self.y || self.z
    }
}

/// Handle to the running sampler
pub struct LimitMonitor {
    snapshot: watch::Receiver<LimitSnapshot>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LimitMonitor {
    /// Start sampling `sensors` every `period`. Must be called inside a tokio runtime.
    pub fn spawn(sensors: Vec<Arc<LimitSensor>>, period: Duration) -> Self {
        let (snapshot_tx, snapshot) = watch::channel(LimitSnapshot::default());
        let (stop, stop_rx) = watch::channel(false);

        info!(
            "Limit monitor started: {} sensors every {}ms",
            sensors.len(),
            period.as_millis()
        );
        let task = tokio::spawn(sample_loop(sensors, period, snapshot_tx, stop_rx));

        Self {
            snapshot,
            stop,
            task,
        }
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> LimitSnapshot {
        *self.snapshot.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LimitSnapshot> {
        self.snapshot.clone()
    }

    /// Ask the sampler to stop and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!("Limit monitor task ended abnormally: {}", e);
        }
        info!("Limit monitor stopped");
    }
}

async fn sample_loop(
    sensors: Vec<Arc<LimitSensor>>,
    period: Duration,
    snapshot_tx: watch::Sender<LimitSnapshot>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                // A dropped handle counts as a stop request too
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = tick.tick() => {
                let mut next = *snapshot_tx.borrow();
                for sensor in &sensors {
                    match sensor.sample() {
                        Ok(triggered) => next.set(sensor.axis(), triggered),
                        // Keep the last known state rather than guess
                        Err(e) => warn!("Failed to sample {} limit: {}", sensor.axis(), e),
                    }
                }
                snapshot_tx.send_if_modified(|current| {
                    if *current == next {
                        return false;
                    }
                    for axis in Axis::ALL {
                        let (was, now) = (current.is_triggered(axis), next.is_triggered(axis));
                        if !was && now {
                            warn!("Limit switch {} triggered", axis);
                        } else if was && !now {
                            info!("Limit switch {} cleared", axis);
                        }
                    }
                    *current = next;
                    true
                });
            }
        }
    }
    debug!("Limit sampler exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::axis::{AxisController, AxisParams, AxisPins, Direction};
    use crate::motion::gpio::{Level, Polarity};
    use crate::motion::sim::SimulatedGpio;
    use std::thread;
    use std::time::Instant;
    use tokio::time::timeout;

    const PERIOD: Duration = Duration::from_millis(20);

    fn params(steps_per_unit: u32, step_dwell: Duration) -> AxisParams {
        AxisParams {
            steps_per_unit,
            max_home_pulses: 100,
            home_direction: Direction::Backward,
            invert_direction: false,
            step_dwell,
            limit_polarity: Polarity::ActiveLow,
            enable_polarity: Polarity::ActiveLow,
        }
    }

    fn pins(base: u32) -> AxisPins {
        AxisPins {
            dir: base,
            step: base + 1,
            enable: base + 2,
            limit: base + 3,
        }
    }

    #[test]
    fn test_snapshot_accessors() {
        let mut snapshot = LimitSnapshot::default();
        assert!(!snapshot.any());
        snapshot.set(Axis::Z, true);
        assert!(snapshot.is_triggered(Axis::Z));
        assert!(!snapshot.is_triggered(Axis::X));
        assert!(snapshot.any());
    }

    #[tokio::test]
    async fn test_transition_published_within_period() {
        let sim = SimulatedGpio::new();
        let x = AxisController::acquire(
            sim.handle(),
            Axis::X,
            pins(10),
            params(1, Duration::from_micros(2)),
        )
        .unwrap();
        let monitor = LimitMonitor::spawn(vec![x.limit_sensor()], PERIOD);
        let mut rx = monitor.subscribe();

        sim.force_input(pins(10).limit, Level::Low);
        let seen = timeout(PERIOD * 2, rx.wait_for(|s| s.x)).await.is_ok();
        assert!(seen, "trigger not published within a period");
        assert!(monitor.snapshot().x);
        assert!(x.limit_triggered());

        sim.force_input(pins(10).limit, Level::High);
        let seen = timeout(PERIOD * 2, rx.wait_for(|s| !s.x)).await.is_ok();
        assert!(seen, "clear not published within a period");

        monitor.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sampling_continues_during_move() {
        let sim = SimulatedGpio::new();
        let x = AxisController::acquire(
            sim.handle(),
            Axis::X,
            pins(10),
            params(1, Duration::from_micros(2)),
        )
        .unwrap();
        // 400 steps at 1ms per half-pulse keeps Y busy for ~800ms
        let mut y = AxisController::acquire(
            sim.handle(),
            Axis::Y,
            pins(20),
            params(1, Duration::from_millis(1)),
        )
        .unwrap();
        let monitor = LimitMonitor::spawn(vec![x.limit_sensor(), y.limit_sensor()], PERIOD);
        let mut rx = monitor.subscribe();

        let mover = thread::spawn(move || {
            let result = y.move_units(400, Direction::Forward);
            (y, result)
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        sim.force_input(pins(10).limit, Level::Low);
        let seen = timeout(PERIOD * 3, rx.wait_for(|s| s.x)).await.is_ok();
        assert!(seen);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(!mover.is_finished(), "move should still be running");

        let (y, result) = mover.join().unwrap();
        assert!(result.is_ok());
        assert_eq!(y.position(), 400);

        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_prompt() {
        let sim = SimulatedGpio::new();
        let x = AxisController::acquire(
            sim.handle(),
            Axis::X,
            pins(10),
            params(1, Duration::from_micros(2)),
        )
        .unwrap();
        let monitor = LimitMonitor::spawn(vec![x.limit_sensor()], Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = Instant::now();
        monitor.shutdown().await;
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_read_fault_keeps_last_state() {
        let sim = SimulatedGpio::new();
        let x = AxisController::acquire(
            sim.handle(),
            Axis::X,
            pins(10),
            params(1, Duration::from_micros(2)),
        )
        .unwrap();
        let y = AxisController::acquire(
            sim.handle(),
            Axis::Y,
            pins(20),
            params(1, Duration::from_micros(2)),
        )
        .unwrap();
        let monitor = LimitMonitor::spawn(vec![x.limit_sensor(), y.limit_sensor()], PERIOD);
        let mut rx = monitor.subscribe();

        sim.force_input(pins(10).limit, Level::Low);
        assert!(timeout(PERIOD * 2, rx.wait_for(|s| s.x)).await.is_ok());

        // X stops answering while its switch opens; Y keeps sampling
        sim.inject_fault(pins(10).limit);
        sim.force_input(pins(10).limit, Level::High);
        sim.force_input(pins(20).limit, Level::Low);
        assert!(timeout(PERIOD * 2, rx.wait_for(|s| s.y)).await.is_ok());
        tokio::time::sleep(PERIOD * 3).await;
        assert!(monitor.snapshot().x);

        sim.clear_fault(pins(10).limit);
        assert!(timeout(PERIOD * 2, rx.wait_for(|s| !s.x)).await.is_ok());

        monitor.shutdown().await;
    }
}
