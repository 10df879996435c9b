#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Value};

use training_portal::auth::AuthFlow;
use training_portal::backend::{Backend, MemoryBackend};
use training_portal::catalog::TrainingCatalog;
use training_portal::config::AppConfig;
use training_portal::models::{Registration, Training};
use training_portal::session::{AdminAllowList, SessionStore, SharedSession};
use training_portal::types::Role;

pub const ADMIN_EMAIL: &str = "admin@x.com";
pub const ADMIN_PASSWORD: &str = "admin-pass";
pub const USER_EMAIL: &str = "a@x.com";
pub const USER_PASSWORD: &str = "user-pass";

/// One in-process backend with a store, auth flow and catalog factory
pub struct Portal {
    pub memory: Arc<MemoryBackend>,
    pub backend: Backend,
    pub store: SharedSession,
    pub flow: AuthFlow,
    pub config: AppConfig,
}

impl Portal {
    pub fn new() -> Self {
        Self::with_config(AppConfig::for_tests(ADMIN_EMAIL))
    }

    pub fn with_config(config: AppConfig) -> Self {
        let memory = Arc::new(MemoryBackend::new());
        memory.register_account(ADMIN_EMAIL, ADMIN_PASSWORD, json!({ "full_name": "Ada Admin" }));
        memory.register_account(
            USER_EMAIL,
            USER_PASSWORD,
            json!({ "full_name": "Alice User", "sex": "F", "address": "1 Main St", "contact_number": "555-0100" }),
        );
        let backend = Backend::memory(memory.clone());
        let store = SessionStore::new(AdminAllowList::from_csv(&config.auth.admin_emails)).shared();
        let flow = AuthFlow::new(backend.identity.clone(), store.clone(), &config);
        Self { memory, backend, store, flow, config }
    }

    pub fn catalog(&self) -> TrainingCatalog {
        TrainingCatalog::new(self.backend.clone(), self.store.clone(), &self.config)
    }

    pub async fn sign_in_admin(&self) -> Result<()> {
        let outcome = self.flow.sign_in(ADMIN_EMAIL, ADMIN_PASSWORD, Some(Role::Admin)).await;
        anyhow::ensure!(outcome.success, "admin sign-in failed: {:?}", outcome.error);
        Ok(())
    }

    pub async fn sign_in_user(&self) -> Result<()> {
        let outcome = self.flow.sign_in(USER_EMAIL, USER_PASSWORD, Some(Role::User)).await;
        anyhow::ensure!(outcome.success, "user sign-in failed: {:?}", outcome.error);
        Ok(())
    }

    pub async fn user_id(&self) -> String {
        self.store.read().await.user_id().to_string()
    }

    pub fn seed_trainings(&self, rows: Vec<Value>) {
        self.memory.seed(Training::TABLE, rows);
    }

    pub fn seed_registrations(&self, rows: Vec<Value>) {
        self.memory.seed(Registration::TABLE, rows);
    }
}

pub fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Stored training row starting `start_in_days` from now and lasting a day
pub fn training_row(id: i64, name: &str, capacity: i64, start_in_days: i64) -> Value {
    let start = Utc::now() + Duration::days(start_in_days);
    json!({
        "id": id,
        "name": name,
        "description": format!("{} for everyone", name),
        "location": "Room 1",
        "start_date_time": ts(start),
        "end_date_time": ts(start + Duration::days(1)),
        "topics": ["basics"],
        "capacity": capacity,
        "image_url": null,
        "created_by": null,
        "created_at": ts(Utc::now() - Duration::days(30) + Duration::minutes(id)),
        "updated_at": ts(Utc::now() - Duration::days(30)),
        "archived_at": null,
    })
}

pub fn archived(mut row: Value) -> Value {
    row["archived_at"] = json!(ts(Utc::now() - Duration::days(1)));
    row
}

pub fn registration_row(id: i64, training_id: i64, user_id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "training_id": training_id,
        "training_name": format!("Training {}", training_id),
        "user_id": user_id,
        "user_name": format!("User {}", user_id),
        "user_email": format!("{}@x.com", user_id),
        "status": status,
        "created_at": ts(Utc::now() - Duration::hours(100 - id)),
        "updated_at": ts(Utc::now() - Duration::hours(100 - id)),
    })
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
