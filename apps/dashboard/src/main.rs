use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use shared::domain::{ControlField, ControlValue, ControlsRecord, Rgb, ValuePolicy};
use sync_core::{DashboardSession, HttpSharedStore, MemoryStore, SharedStore};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use config::load_settings;

#[derive(Parser, Debug)]
struct Cli {
    /// Base url of the shared store service.
    #[arg(long)]
    store_url: Option<String>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    /// `reject` or `clamp` for out-of-range numbers.
    #[arg(long)]
    value_policy: Option<ValuePolicy>,
    /// Use an in-process store instead of the service.
    #[arg(long)]
    offline: bool,
    /// Print the display state as JSON.
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll once and print the current state.
    Show,
    /// Keep polling and print changes until ctrl-c.
    Watch,
    /// Write one control field, e.g. `set led1 128` or `set buzzer on`.
    Set {
        field: ControlField,
        #[arg(allow_negative_numbers = true)]
        value: ControlValue,
    },
    /// Flip the strip or buzzer.
    Toggle { field: ControlField },
    /// Set the RGB strip color from `#rrggbb`.
    Color { rgb: Rgb },
    /// Set the strip auto-off timer.
    Timer {
        #[arg(allow_negative_numbers = true)]
        hours: i64,
        #[arg(allow_negative_numbers = true)]
        minutes: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings();
    if let Some(v) = cli.store_url.clone() {
        settings.store_url = v;
    }
    if let Some(v) = cli.poll_interval_ms {
        settings.poll_interval_ms = v;
    }
    if let Some(v) = cli.value_policy {
        settings.value_policy = v;
    }

    let store: Arc<dyn SharedStore> = if cli.offline {
        info!("dashboard: using in-process store");
        Arc::new(MemoryStore::with_controls(ControlsRecord::default()))
    } else {
        Arc::new(HttpSharedStore::new(&settings.store_url)?)
    };
    let session = DashboardSession::new(store, settings.session_config());
    info!(session = %session.id(), store_url = %settings.store_url, "dashboard: session opened");

    let result = run(&session, &cli).await;
    session.stop().await;
    result
}

async fn run(session: &Arc<DashboardSession>, cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Show => {
            session.poll_once().await;
            print_state(session, cli.json)?;
        }
        Command::Watch => watch(session, cli.json).await?,
        Command::Set { field, value } => {
            session.poll_once().await;
            let receipt = session.set_field(*field, *value).await?;
            if receipt.was_clamped() {
                println!(
                    "{} = {} (clamped from {})",
                    receipt.field, receipt.applied, receipt.requested
                );
            }
            print_state(session, cli.json)?;
        }
        Command::Toggle { field } => {
            // Toggling needs the stored value, not the defaults.
            let poll = session.poll_once().await;
            if !poll.is_success() {
                bail!("cannot toggle {field} without a fresh state: {}", poll.errors.join("; "));
            }
            session.toggle(*field).await?;
            print_state(session, cli.json)?;
        }
        Command::Color { rgb } => {
            session.poll_once().await;
            let outcome = session.set_color(*rgb).await?;
            println!("{}", render::outcome(&outcome));
            if !outcome.is_complete() {
                bail!("color only partially stored; the strip may show a mixed color");
            }
        }
        Command::Timer { hours, minutes } => {
            session.poll_once().await;
            let outcome = session.set_timer(*hours, *minutes).await?;
            println!("{}", render::outcome(&outcome));
            if !outcome.is_complete() {
                bail!("timer only partially stored");
            }
        }
    }
    Ok(())
}

async fn watch(session: &Arc<DashboardSession>, json: bool) -> Result<()> {
    let mut events = session.subscribe_events();
    session.start().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("dashboard: stopping");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if json {
                        print_state(session, true)?;
                    } else if let Some(line) = render::event(&event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "dashboard: dropped events"),
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

fn print_state(session: &DashboardSession, json: bool) -> Result<()> {
    let state = session.display_state();
    if json {
        println!("{}", serde_json::to_string(&state)?);
    } else {
        println!("{}", render::display(&state));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_values_reach_the_value_policy() {
        let cli = Cli::try_parse_from(["dashboard", "set", "led1", "-5"]).expect("parse");
        match cli.command {
            Command::Set { field, value } => {
                assert_eq!(field, ControlField::Led1);
                assert_eq!(value, ControlValue::Int(-5));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["dashboard", "--value-policy", "clamp", "timer", "-1", "30"])
            .expect("parse");
        assert_eq!(cli.value_policy, Some(ValuePolicy::Clamp));
        assert!(matches!(
            cli.command,
            Command::Timer {
                hours: -1,
                minutes: 30
            }
        ));
    }
}
