// Limit switch diagnostic: READ-ONLY check of the three limit inputs
//
// Only the limit pins are claimed, as inputs. No driver is enabled and no
// step pulse is sent, so this is safe to run with the motors powered.
// Press each switch by hand and watch the state flip.
//
// Usage: cargo run --example limit_diagnostic --features gpio-hardware -- [config.toml]

use otus_rig::config::RigConfig;
use otus_rig::motion::gpio::{self, InputPin};
use otus_rig::motion::{Axis, Level};
use std::time::Duration;

const SAMPLES: usize = 100;
const SAMPLE_PERIOD: Duration = Duration::from_millis(100);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::level_filters::LevelFilter::DEBUG.into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RigConfig::load(path)?,
        None => RigConfig::default(),
    };

    println!("Otus Rig Limit Diagnostic (READ-ONLY)");
    println!("Only limit inputs are read - no outputs, no movement");
    println!("Limit polarity: {:?}", config.limit_polarity);
    println!();

    println!("Step 1: Claiming limit inputs...");
    let backend = match gpio::hardware() {
        Ok(backend) => backend,
        Err(e) => {
            println!("  ✗ GPIO unavailable: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Run on the rig controller, not a workstation");
            println!("  - Check the user can write /sys/class/gpio/export");
            return Err(e.into());
        }
    };

    let mut inputs = Vec::new();
    for axis in Axis::ALL {
        let Some(pin) = config.axis(axis).limit_pin else {
            println!("  {} axis: no limit pin configured, skipping", axis);
            continue;
        };
        match InputPin::acquire(backend.clone(), pin) {
            Ok(input) => {
                println!("  ✓ {} axis limit on GPIO {}", axis, pin);
                inputs.push((axis, input));
            }
            Err(e) => println!("  ✗ {} axis limit on GPIO {}: {}", axis, pin, e),
        }
    }
    println!();

    if inputs.is_empty() {
        println!("No limit inputs could be claimed.");
        return Ok(());
    }

    println!("Step 2: Sampling {} times every {:?}...", SAMPLES, SAMPLE_PERIOD);
    let mut last: Vec<Option<bool>> = vec![None; inputs.len()];
    for _ in 0..SAMPLES {
        for (i, (axis, input)) in inputs.iter().enumerate() {
            let level = match input.read() {
                Ok(level) => level,
                Err(e) => {
                    println!("  {} axis: read error: {}", axis, e);
                    continue;
                }
            };
            let triggered = config.limit_polarity.is_active(level);
            if last[i] != Some(triggered) {
                let raw = if level == Level::High { "HIGH" } else { "LOW" };
                let state = if triggered { "TRIGGERED" } else { "clear" };
                println!("  {} axis: {} (raw {})", axis, state, raw);
                last[i] = Some(triggered);
            }
        }
        std::thread::sleep(SAMPLE_PERIOD);
    }
    println!();

    // Dropping the handles releases the pins
    drop(inputs);
    backend.release_all()?;
    println!("Done.");
    Ok(())
}
