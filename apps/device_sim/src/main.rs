use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand};
use shared::domain::{ControlsPatch, ControlsRecord, NewSensorReading, CONTROLS_ID};
use sync_core::{HttpSharedStore, SharedStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod direct;

use direct::DirectStore;

/// Plays the part of the controller: reports sensor readings and follows the
/// controls record.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/store.db")]
    database_url: String,
    /// Go through the store service instead of the database file.
    #[arg(long, conflicts_with = "database_url")]
    store_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append one sensor reading.
    AppendReading {
        temperature: f64,
        humidity: f64,
        light: i64,
    },
    /// Create the controls record with its defaults if it does not exist.
    SeedControls,
    /// Print the controls record and the latest reading.
    Show,
    /// Report synthetic readings and log control changes until ctrl-c.
    Run {
        #[arg(long, default_value_t = 5000)]
        interval_ms: u64,
        /// Stop after this many readings.
        #[arg(long)]
        count: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let store: Arc<dyn SharedStore> = match &cli.store_url {
        Some(url) => Arc::new(HttpSharedStore::new(url)?),
        None => Arc::new(DirectStore::open(&cli.database_url).await?),
    };

    match cli.command {
        Command::AppendReading {
            temperature,
            humidity,
            light,
        } => {
            let stored = store
                .append_sensor_reading(&NewSensorReading {
                    temperature,
                    humidity,
                    light,
                })
                .await?;
            println!("appended reading_id={} at {}", stored.id.0, stored.created_at);
        }
        Command::SeedControls => {
            store
                .upsert_controls(CONTROLS_ID, &ControlsPatch::default())
                .await?;
            println!("controls record ready");
        }
        Command::Show => {
            match store.read_controls(CONTROLS_ID).await? {
                Some(record) => println!("controls: {record:?}"),
                None => println!("controls: not created yet"),
            }
            match store.read_latest_sensor_reading().await? {
                Some(reading) => println!("latest reading: {reading:?}"),
                None => println!("latest reading: none"),
            }
        }
        Command::Run { interval_ms, count } => {
            run(store.as_ref(), Duration::from_millis(interval_ms.max(1)), count).await?
        }
    }

    Ok(())
}

/// Smooth, repeatable readings so dashboards show movement.
fn synthetic_reading(step: u64) -> NewSensorReading {
    let t = step as f64;
    NewSensorReading {
        temperature: 21.0 + 2.5 * (t / 12.0).sin(),
        humidity: 45.0 + 8.0 * (t / 9.0).cos(),
        light: 400 + ((step * 37) % 250) as i64,
    }
}

async fn run(store: &dyn SharedStore, period: Duration, count: Option<u64>) -> Result<()> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_controls: Option<ControlsRecord> = None;
    let mut step = 0u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }

        match store.append_sensor_reading(&synthetic_reading(step)).await {
            Ok(stored) => info!(
                reading_id = stored.id.0,
                temperature = stored.temperature,
                humidity = stored.humidity,
                light = stored.light,
                "device: reading reported"
            ),
            Err(error) => warn!(error = %format!("{error:#}"), "device: failed to report reading"),
        }

        match store.read_controls(CONTROLS_ID).await {
            Ok(Some(record)) if last_controls.as_ref() != Some(&record) => {
                info!(
                    leds = ?(record.led1, record.led2, record.led3),
                    color = %record.rgb(),
                    strip = record.strip,
                    timer = %record.timer(),
                    buzzer = record.buzzer,
                    "device: applying controls"
                );
                last_controls = Some(record);
            }
            Ok(_) => {}
            Err(error) => warn!(error = %format!("{error:#}"), "device: failed to read controls"),
        }

        step += 1;
        if count.is_some_and(|limit| step >= limit) {
            break;
        }
    }
    info!(readings = step, "device: stopped");
    Ok(())
}
