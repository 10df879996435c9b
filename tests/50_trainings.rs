mod common;

use anyhow::Result;
use chrono::{Duration, Utc};
use common::Portal;

use training_portal::catalog::{images::path_from_url, FetchOptions, ImageUpload};
use training_portal::models::{NewTraining, Training, TrainingUpdate};

fn new_training(name: &str) -> NewTraining {
    let start = Utc::now() + Duration::days(3);
    NewTraining {
        name: name.to_string(),
        description: Some("Hands-on".to_string()),
        location: "Lab 2".to_string(),
        start_date_time: start,
        end_date_time: start + Duration::hours(6),
        topics: vec!["ownership".to_string()],
        capacity: 12,
        image_url: None,
        archived_at: None,
    }
}

fn png(name: &str, byte: u8) -> ImageUpload {
    ImageUpload { file_name: name.to_string(), content_type: "image/png".to_string(), bytes: vec![byte; 16] }
}

#[tokio::test]
async fn create_with_image_stores_blob_and_creator() -> Result<()> {
    let portal = Portal::new();
    portal.sign_in_admin().await?;
    let admin_id = portal.user_id().await;
    let mut catalog = portal.catalog();

    let outcome = catalog.create_training(new_training("Rust Basics"), Some(png("cover.png", 1))).await;

    assert!(outcome.success, "{:?}", outcome.error);
    let created = outcome.data.ok_or_else(|| anyhow::anyhow!("no training returned"))?;
    assert_eq!(created.created_by.as_deref(), Some(admin_id.as_str()));
    let url = created.image_url.clone().ok_or_else(|| anyhow::anyhow!("no image url"))?;
    let path = path_from_url(&url, "trainings").ok_or_else(|| anyhow::anyhow!("bad url {}", url))?;
    assert!(path.ends_with(".png"));
    assert_eq!(portal.memory.blob("trainings", path), Some(vec![1; 16]));
    // The list is refreshed after creating
    assert_eq!(catalog.trainings().items.len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_upload_still_creates_training_without_image() -> Result<()> {
    let portal = Portal::new();
    portal.sign_in_admin().await?;
    portal.memory.fail_on("upload", "bucket full");
    let mut catalog = portal.catalog();

    let outcome = catalog.create_training(new_training("Rust Basics"), Some(png("cover.png", 1))).await;

    assert!(outcome.success);
    assert_eq!(outcome.data.and_then(|t| t.image_url), None);
    assert_eq!(portal.memory.blob_count(), 0);
    Ok(())
}

#[tokio::test]
async fn update_with_new_image_replaces_old_blob() -> Result<()> {
    let portal = Portal::new();
    portal.sign_in_admin().await?;
    let mut catalog = portal.catalog();
    let created = catalog
        .create_training(new_training("Rust Basics"), Some(png("cover.png", 1)))
        .await
        .data
        .ok_or_else(|| anyhow::anyhow!("create failed"))?;

    let update = TrainingUpdate { capacity: Some(20), ..Default::default() };
    let outcome = catalog.update_training(created.id, update, Some(png("new.jpeg", 2))).await;

    assert!(outcome.success, "{:?}", outcome.error);
    let updated = outcome.data.ok_or_else(|| anyhow::anyhow!("no training returned"))?;
    assert_eq!(updated.capacity, 20);
    assert_eq!(portal.memory.blob_count(), 1);
    let url = updated.image_url.ok_or_else(|| anyhow::anyhow!("no image url"))?;
    assert!(url.ends_with(".jpeg"));
    assert_ne!(Some(url), created.image_url);
    Ok(())
}

#[tokio::test]
async fn update_without_image_leaves_image_untouched() -> Result<()> {
    let portal = Portal::new();
    portal.sign_in_admin().await?;
    let mut catalog = portal.catalog();
    let created = catalog
        .create_training(new_training("Rust Basics"), Some(png("cover.png", 1)))
        .await
        .data
        .ok_or_else(|| anyhow::anyhow!("create failed"))?;

    let update = TrainingUpdate { name: Some("Rust Fundamentals".into()), ..Default::default() };
    let updated = catalog.update_training(created.id, update, None).await.data;

    assert_eq!(updated.as_ref().map(|t| t.name.as_str()), Some("Rust Fundamentals"));
    assert_eq!(updated.and_then(|t| t.image_url), created.image_url);
    assert_eq!(portal.memory.blob_count(), 1);
    Ok(())
}

#[tokio::test]
async fn delete_removes_row_and_image() -> Result<()> {
    let portal = Portal::new();
    portal.sign_in_admin().await?;
    let mut catalog = portal.catalog();
    let created = catalog
        .create_training(new_training("Rust Basics"), Some(png("cover.png", 1)))
        .await
        .data
        .ok_or_else(|| anyhow::anyhow!("create failed"))?;
    assert_eq!(portal.memory.blob_count(), 1);

    let outcome = catalog.delete_training(created.id).await;

    assert!(outcome.success);
    assert!(portal.memory.rows(Training::TABLE).is_empty());
    assert_eq!(portal.memory.blob_count(), 0);
    assert!(catalog.trainings().items.is_empty());
    Ok(())
}

#[tokio::test]
async fn archiving_hides_training_from_live_list() -> Result<()> {
    let portal = Portal::new();
    portal.sign_in_admin().await?;
    let mut catalog = portal.catalog();
    let created = catalog
        .create_training(new_training("Rust Basics"), None)
        .await
        .data
        .ok_or_else(|| anyhow::anyhow!("create failed"))?;

    let update = TrainingUpdate { archived_at: Some(Some(Utc::now() - Duration::minutes(1))), ..Default::default() };
    assert!(catalog.update_training(created.id, update, None).await.success);
    assert!(catalog.trainings().items.is_empty());

    catalog.set_show_archived(true);
    assert!(catalog.show_archived());
    catalog.fetch_trainings(FetchOptions::default()).await;
    assert_eq!(catalog.trainings().items.len(), 1);
    Ok(())
}

#[tokio::test]
async fn deleting_unloaded_archived_training_removes_its_image() -> Result<()> {
    let portal = Portal::new();
    portal.sign_in_admin().await?;
    let mut catalog = portal.catalog();
    let mut training = new_training("Retired Course");
    training.archived_at = Some(Utc::now() - Duration::days(1));
    let created = catalog
        .create_training(training, Some(png("cover.png", 1)))
        .await
        .data
        .ok_or_else(|| anyhow::anyhow!("create failed"))?;
    assert_eq!(portal.memory.blob_count(), 1);

    // The live list does not contain the archived row
    catalog.fetch_trainings(FetchOptions::default()).await;
    assert!(catalog.trainings().items.is_empty());
    let outcome = catalog.delete_training(created.id).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert!(portal.memory.rows(Training::TABLE).is_empty());
    assert_eq!(portal.memory.blob_count(), 0);
    Ok(())
}

#[tokio::test]
async fn replacing_image_on_fresh_catalog_removes_old_blob() -> Result<()> {
    let portal = Portal::new();
    portal.sign_in_admin().await?;
    let created = portal
        .catalog()
        .create_training(new_training("Rust Basics"), Some(png("cover.png", 1)))
        .await
        .data
        .ok_or_else(|| anyhow::anyhow!("create failed"))?;

    // A second catalog has loaded nothing yet
    let mut catalog = portal.catalog();
    let outcome = catalog.update_training(created.id, TrainingUpdate::default(), Some(png("new.png", 2))).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(portal.memory.blob_count(), 1);
    let url = outcome.data.and_then(|t| t.image_url).ok_or_else(|| anyhow::anyhow!("no image url"))?;
    let path = path_from_url(&url, "trainings").ok_or_else(|| anyhow::anyhow!("bad url {}", url))?;
    assert_eq!(portal.memory.blob("trainings", path), Some(vec![2; 16]));
    Ok(())
}
