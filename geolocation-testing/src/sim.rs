use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use geolocation_logic::{Next, Updater, WatchKind};
use geolocation_test_shared::{Script, Simulation, prelude::*};
use log::{info, warn};
use serde::Serialize;

#[derive(Parser)]
struct Cli {
    /// Path to the JSON script describing how the simulated plugin behaves
    script: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct WatchArgs {
    /// Stop after this many updates
    #[arg(long, default_value_t = 5)]
    count: usize,
    /// Stop if the stream goes quiet for this long
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a single location fix
    Locate,
    /// Start a location watch and print each update
    WatchLocation(WatchArgs),
    /// Start a heading watch and print each update
    WatchHeading(WatchArgs),
}

fn print_json(value: &impl Serialize) -> Result {
    let encoded = serde_json::to_string(value).context("Failed to encode output")?;
    println!("{encoded}");
    Ok(())
}

/// Print updates until `count` arrived, the stream ended, or it went quiet for `timeout`.
///
/// Returns how many updates were printed.
async fn drain<K: WatchKind>(updater: &Updater<K>, args: &WatchArgs) -> Result<usize>
where
    K::Item: Serialize,
{
    let timeout = Duration::from_millis(args.timeout_ms);

    let mut printed = 0;
    while printed < args.count {
        let next: Next<K::Item> = updater.next();

        let Ok(item) = tokio::time::timeout(timeout, next).await else {
            warn!("No {} within {}ms, giving up", K::NAME, args.timeout_ms);
            break;
        };
        let Some(item) = item else {
            break;
        };
        print_json(&item)?;
        printed += 1;
    }

    updater.stop();
    if let Some(code) = updater.last_error() {
        bail!("Watch ended with error: {code}");
    }
    info!("Printed {printed} {} values", K::NAME);
    Ok(printed)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    colog::init();

    let cli = Cli::parse();
    let script = Script::load(&cli.script)?;
    let sim = Simulation::new(script);

    match cli.command {
        Commands::Locate => {
            let location = sim
                .geo
                .request_location()
                .await
                .ok_or_else(|| match sim.geo.last_error() {
                    Some(code) => anyhow!("Failed to get location: {code}"),
                    None => anyhow!("Failed to get location"),
                })?;
            info!("Got fix {location}");
            print_json(&location)?;
        }
        Commands::WatchLocation(args) => {
            let updater = sim
                .geo
                .location_updater()
                .await
                .context("Failed to start location updates")?;
            drain(&updater, &args).await?;
        }
        Commands::WatchHeading(args) => {
            let updater = sim
                .geo
                .heading_updater()
                .context("Heading updates are not supported")?;
            drain(&updater, &args).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_quiet_stream_times_out() {
        let script = Script::from_json(
            r#"{ "reactions": { "start_updating_heading": [{
                "signal": "heading_update",
                "payload": { "magnetic_heading": 90.0, "true_heading": 92.0, "heading_accuracy": 5.0, "timestamp": 0 }
            }] } }"#,
        )
        .expect("Failed to parse");
        let sim = Simulation::new(script);
        let updater = sim.geo.heading_updater().expect("Heading unsupported");

        let args = WatchArgs {
            count: 3,
            timeout_ms: 100,
        };
        let printed = drain(&updater, &args).await.expect("Watch failed");

        assert_eq!(printed, 1);
        assert!(!updater.is_updating());
    }
}
