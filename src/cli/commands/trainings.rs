use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde_json::json;

use super::require;
use crate::catalog::{FetchOptions, ImageUpload};
use crate::cli::utils::{output_success, output_trainings};
use crate::cli::{Context, OutputFormat};
use crate::filter::SortDirection;
use crate::models::{NewTraining, TrainingUpdate};

#[derive(Subcommand)]
pub enum TrainingCommands {
    #[command(about = "List trainings visible to the signed-in identity")]
    List {
        #[arg(long, default_value_t = 1, help = "Page number")]
        page: i64,
        #[arg(long, help = "Page size")]
        page_size: Option<i64>,
        #[arg(long, help = "Column to sort by (default start_date_time)")]
        sort: Option<String>,
        #[arg(long, help = "Sort ascending")]
        asc: bool,
        #[arg(long, help = "Show archived trainings (admins only)")]
        archived: bool,
        #[arg(long, help = "Keep loading pages until all are fetched")]
        all: bool,
    },

    #[command(about = "Search trainings by name or description")]
    Search {
        #[arg(help = "Search term")]
        term: String,
    },

    #[command(about = "Create a training")]
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        location: String,
        #[arg(long, help = "Start time (RFC 3339)")]
        start: DateTime<Utc>,
        #[arg(long, help = "End time (RFC 3339)")]
        end: DateTime<Utc>,
        #[arg(long)]
        capacity: i64,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "topic", help = "Topic (repeatable)")]
        topics: Vec<String>,
        #[arg(long, help = "Cover image file to upload")]
        image: Option<PathBuf>,
    },

    #[command(about = "Update a training")]
    Update {
        #[arg(help = "Training ID")]
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        capacity: Option<i64>,
        #[arg(long, help = "Archive the training now")]
        archive: bool,
        #[arg(long, help = "Replacement cover image")]
        image: Option<PathBuf>,
    },

    #[command(about = "Delete a training and its image")]
    Delete {
        #[arg(help = "Training ID")]
        id: i64,
    },
}

fn read_image(path: Option<PathBuf>) -> anyhow::Result<Option<ImageUpload>> {
    path.map(|p| ImageUpload::from_path(&p).map_err(|e| anyhow::anyhow!("cannot read {}: {}", p.display(), e)))
        .transpose()
}

pub async fn handle(cmd: TrainingCommands, ctx: &Context, output_format: OutputFormat) -> anyhow::Result<()> {
    let mut catalog = ctx.catalog();
    match cmd {
        TrainingCommands::List { page, page_size, sort, asc, archived, all } => {
            catalog.set_show_archived(archived);
            let mut options = FetchOptions { page: Some(page), page_size, ..Default::default() };
            if sort.is_some() || asc {
                let column = sort.unwrap_or_else(|| crate::catalog::DEFAULT_TRAINING_SORT.to_string());
                let order = if asc { SortDirection::Asc } else { SortDirection::Desc };
                options = options.sorted(column, order);
            }
            require(catalog.fetch_trainings(options).await)?;
            if all {
                while let Some(outcome) = catalog.load_more_trainings().await {
                    require(outcome)?;
                }
            }
            output_trainings(&output_format, catalog.trainings())
        }
        TrainingCommands::Search { term } => {
            require(catalog.search_trainings(&term).await)?;
            output_trainings(&output_format, catalog.trainings())
        }
        TrainingCommands::Create { name, location, start, end, capacity, description, topics, image } => {
            let training = NewTraining {
                name,
                description,
                location,
                start_date_time: start,
                end_date_time: end,
                topics,
                capacity,
                image_url: None,
                archived_at: None,
            };
            let created = require(catalog.create_training(training, read_image(image)?).await)?;
            let data = created.map(|t| json!({ "training": t })).unwrap_or(json!({}));
            output_success(&output_format, "Training created", Some(data))
        }
        TrainingCommands::Update { id, name, location, capacity, archive, image } => {
            let update = TrainingUpdate {
                name,
                location,
                capacity,
                archived_at: archive.then(|| Some(Utc::now())),
                ..Default::default()
            };
            let image = read_image(image)?;
            let updated = require(catalog.update_training(id, update, image).await)?;
            let data = updated.map(|t| json!({ "training": t })).unwrap_or(json!({}));
            output_success(&output_format, &format!("Training {} updated", id), Some(data))
        }
        TrainingCommands::Delete { id } => {
            require(catalog.delete_training(id).await)?;
            output_success(&output_format, &format!("Training {} deleted", id), None)
        }
    }
}
