use clap::Subcommand;
use serde_json::json;

use super::require;
use crate::catalog::FetchOptions;
use crate::cli::utils::{output_registrations, output_success};
use crate::cli::{Context, OutputFormat};
use crate::error::PortalError;
use crate::filter::Filter;
use crate::models::{NewRegistration, RegistrationStatus, RegistrationUpdate, Training};

#[derive(Subcommand)]
pub enum RegistrationCommands {
    #[command(about = "List registrations (all for admins, own for users)")]
    List {
        #[arg(long, default_value_t = 1, help = "Page number")]
        page: i64,
        #[arg(long, help = "Filter by training or attendee name")]
        search: Option<String>,
    },

    #[command(about = "Register the signed-in user for a training")]
    Register {
        #[arg(help = "Training ID")]
        training_id: i64,
    },

    #[command(about = "Confirm a registration, subject to training capacity")]
    Confirm {
        #[arg(help = "Registration ID")]
        id: i64,
    },

    #[command(about = "Cancel a registration")]
    Cancel {
        #[arg(help = "Registration ID")]
        id: i64,
    },

    #[command(about = "Delete a registration")]
    Delete {
        #[arg(help = "Registration ID")]
        id: i64,
    },
}

async fn training_name(ctx: &Context, training_id: i64) -> anyhow::Result<String> {
    let filter = Filter::new(Training::TABLE)?.select(["id", "name"]).eq("id", training_id).maybe_single();
    let row = ctx.backend.tables.select(&filter).await.map_err(PortalError::from)?.rows.into_iter().next();
    row.as_ref()
        .and_then(|r| r.get("name"))
        .and_then(|n| n.as_str())
        .map(str::to_string)
        .ok_or_else(|| PortalError::not_found(format!("Training {} not found", training_id)).into())
}

async fn set_status(
    ctx: &Context,
    id: i64,
    status: RegistrationStatus,
    output_format: &OutputFormat,
) -> anyhow::Result<()> {
    let mut catalog = ctx.catalog();
    let updated = require(catalog.update_registration(id, RegistrationUpdate::status(status)).await)?;
    let data = updated.map(|r| json!({ "registration": r })).unwrap_or(json!({}));
    output_success(output_format, &format!("Registration {} {}", id, status), Some(data))
}

pub async fn handle(cmd: RegistrationCommands, ctx: &Context, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        RegistrationCommands::List { page, search } => {
            let mut catalog = ctx.catalog();
            match search {
                Some(term) => require(catalog.search_registrations(&term).await)?,
                None => require(catalog.fetch_registrations(FetchOptions::page(page)).await)?,
            };
            output_registrations(&output_format, catalog.registrations())
        }
        RegistrationCommands::Register { training_id } => {
            if !ctx.store.read().await.can_access_user() {
                return Err(PortalError::NoSession.into());
            }
            let registration = NewRegistration {
                training_id,
                training_name: training_name(ctx, training_id).await?,
                status: RegistrationStatus::Pending,
            };
            let mut catalog = ctx.catalog();
            let created = require(catalog.create_registration(registration).await)?;
            let data = created.map(|r| json!({ "registration": r })).unwrap_or(json!({}));
            output_success(&output_format, &format!("Registered for training {}", training_id), Some(data))
        }
        RegistrationCommands::Confirm { id } => set_status(ctx, id, RegistrationStatus::Confirmed, &output_format).await,
        RegistrationCommands::Cancel { id } => set_status(ctx, id, RegistrationStatus::Cancelled, &output_format).await,
        RegistrationCommands::Delete { id } => {
            let mut catalog = ctx.catalog();
            require(catalog.delete_registration(id).await)?;
            output_success(&output_format, &format!("Registration {} deleted", id), None)
        }
    }
}
