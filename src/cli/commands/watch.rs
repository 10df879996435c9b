use std::time::Duration;

use clap::Args;
use serde_json::json;

use super::require;
use crate::catalog::FetchOptions;
use crate::cli::utils::output_success;
use crate::cli::{Context, OutputFormat};

#[derive(Args)]
pub struct WatchArgs {
    #[arg(long, help = "Stop after this many seconds (default: until interrupted)")]
    pub seconds: Option<u64>,
}

pub async fn handle(args: WatchArgs, ctx: &Context, output_format: OutputFormat) -> anyhow::Result<()> {
    let mut catalog = ctx.catalog();
    require(catalog.fetch_trainings(FetchOptions::default()).await)?;
    require(catalog.fetch_registrations(FetchOptions::default()).await)?;
    let mut events = catalog.subscribe_realtime().await?;

    output_success(
        &output_format,
        &format!(
            "Watching {} trainings and {} registrations",
            catalog.trainings().total,
            catalog.registrations().total
        ),
        None,
    )?;

    let deadline = async {
        match args.seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::warn!("Change feed closed");
                    break;
                };
                catalog.resync(&event.table).await;
                let counts = json!({
                    "event": event.kind.as_str(),
                    "table": &event.table,
                    "trainings": catalog.trainings().total,
                    "registrations": catalog.registrations().total,
                });
                output_success(
                    &output_format,
                    &format!(
                        "{} on {}: {} trainings, {} registrations",
                        event.kind.as_str(),
                        event.table,
                        catalog.trainings().total,
                        catalog.registrations().total
                    ),
                    Some(counts),
                )?;
            }
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
        }
    }

    catalog.unsubscribe_realtime();
    Ok(())
}
