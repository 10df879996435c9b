//! Paginated training and registration lists with derived fields, image
//! handling and realtime resync. Each catalog owns its own paging state.

pub mod images;
pub mod page;
pub mod realtime;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::backend::Backend;
use crate::config::{AppConfig, ListConfig};
use crate::error::PortalError;
use crate::filter::{Condition, CountMode, Filter, FilterOp, SortDirection};
use crate::models::{
    NewRegistration, NewTraining, Registration, RegistrationStatus, RegistrationUpdate, Training, TrainingUpdate,
};
use crate::session::SharedSession;

pub use images::{ImageStore, ImageUpload};
pub use page::{page_window, FetchOptions, ListOutcome, PageState};
pub use realtime::RealtimeSync;

pub const DEFAULT_TRAINING_SORT: &str = "start_date_time";
pub const DEFAULT_REGISTRATION_SORT: &str = "created_at";

#[derive(Deserialize)]
struct RegistrationTraining {
    training_id: i64,
}

#[derive(Deserialize)]
struct StoredImage {
    image_url: Option<String>,
}

#[derive(Deserialize)]
struct OwnStatus {
    status: RegistrationStatus,
}

/// Caller identity as seen by one fetch
struct Viewer {
    is_admin: bool,
    user_id: String,
}

/// Result of one page read, before it is stored
struct Fetched<T> {
    items: Vec<T>,
    total: i64,
    page: i64,
}

pub struct TrainingCatalog {
    backend: Backend,
    store: SharedSession,
    images: ImageStore,
    list: ListConfig,
    trainings: PageState<Training>,
    registrations: PageState<Registration>,
    loading: bool,
    error: Option<String>,
    show_archived: bool,
    realtime: Option<RealtimeSync>,
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn contains_pattern(term: &str) -> String {
    format!("%{}%", term)
}

impl TrainingCatalog {
    pub fn new(backend: Backend, store: SharedSession, config: &AppConfig) -> Self {
        let images = ImageStore::new(backend.storage.clone(), config.backend.storage_bucket.clone());
        let page_size = config.list.clamp(config.list.page_size);
        Self {
            backend,
            store,
            images,
            list: config.list.clone(),
            trainings: PageState::new(page_size),
            registrations: PageState::new(page_size),
            loading: false,
            error: None,
            show_archived: false,
            realtime: None,
        }
    }

    pub fn trainings(&self) -> &PageState<Training> {
        &self.trainings
    }

    pub fn registrations(&self) -> &PageState<Registration> {
        &self.registrations
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn show_archived(&self) -> bool {
        self.show_archived
    }

    /// Admin toggle between archived and live trainings; takes effect on the
    /// next fetch
    pub fn set_show_archived(&mut self, show: bool) {
        self.show_archived = show;
    }

    fn begin(&mut self) {
        self.loading = true;
        self.error = None;
    }

    fn fail<T>(&mut self, context: &str, err: PortalError) -> ListOutcome<T> {
        if err.is_business_rule() {
            tracing::warn!("{}: {}", context, err);
        } else {
            tracing::error!("{}: {}", context, err);
        }
        self.error = Some(err.message().to_string());
        self.loading = false;
        ListOutcome::failed(err.message())
    }

    async fn viewer(&self) -> Viewer {
        let store = self.store.read().await;
        Viewer { is_admin: store.is_admin(), user_id: store.user_id().to_string() }
    }

    // ============================================
    // Trainings
    // ============================================

    pub async fn fetch_trainings(&mut self, options: FetchOptions) -> ListOutcome<Vec<Training>> {
        self.begin();
        match self.read_trainings(&options).await {
            Ok(fetched) => {
                self.trainings.apply(fetched.items, fetched.total, fetched.page, options.append);
                self.loading = false;
                if self.list.debug_logging {
                    tracing::debug!(
                        "Loaded trainings page {} ({} of {})",
                        fetched.page,
                        self.trainings.items.len(),
                        fetched.total
                    );
                }
                ListOutcome::ok(self.trainings.items.clone())
            }
            Err(e) => self.fail("Error fetching trainings", e),
        }
    }

    fn visibility_filter(&self, filter: Filter, is_admin: bool, now: &str) -> Filter {
        if is_admin && self.show_archived {
            filter.lte("archived_at", now)
        } else {
            filter.or(vec![
                Condition::field("archived_at", FilterOp::Gt, now),
                Condition::field("archived_at", FilterOp::Is, Value::Null),
            ])
        }
    }

    async fn read_trainings(&self, options: &FetchOptions) -> Result<Fetched<Training>, PortalError> {
        let page = options.page.unwrap_or(self.trainings.page).max(1);
        let page_size = self.list.clamp(options.page_size.unwrap_or(self.trainings.page_size));
        let sort_by = options.sort_by.as_deref().unwrap_or(DEFAULT_TRAINING_SORT);
        let sort_order = options.sort_order.unwrap_or(SortDirection::Desc);
        let (from, to) = page_window(page, page_size)
            .ok_or_else(|| PortalError::validation(format!("Page {} is out of range", page)))?;
        let viewer = self.viewer().await;
        let now = timestamp(Utc::now());

        let mut filter = Filter::new(Training::TABLE)?.count(CountMode::Exact);
        filter = self.visibility_filter(filter, viewer.is_admin, &now);
        let search = self.trainings.search.as_str();
        if !search.is_empty() {
            filter = filter.or(vec![
                Condition::field("name", FilterOp::ILike, contains_pattern(search)),
                Condition::field("description", FilterOp::ILike, contains_pattern(search)),
            ]);
        }
        let filter = filter.order(sort_by, sort_order).range(from, to)?;

        let result = self.backend.tables.select(&filter).await?;
        let total = result.count.unwrap_or(0);
        let mut items: Vec<Training> = result.into_rows()?;

        let derived = join_all(items.iter().map(|t| self.derived_fields(t.id, &viewer))).await;
        for (training, (confirmed, own_status)) in items.iter_mut().zip(derived) {
            training.confirmed_count = confirmed;
            training.user_registration_status = own_status;
        }
        Ok(Fetched { items, total, page })
    }

    /// Confirmed count plus, for signed-in non-admins, their own status.
    /// Lookup failures degrade to zero / none.
    async fn derived_fields(&self, training_id: i64, viewer: &Viewer) -> (i64, Option<RegistrationStatus>) {
        let confirmed = self.confirmed_count(training_id).await.unwrap_or_else(|e| {
            tracing::warn!("Confirmed count for training {} unavailable: {}", training_id, e);
            0
        });
        if viewer.is_admin || viewer.user_id.is_empty() {
            return (confirmed, None);
        }
        let own_status = self.own_status(training_id, &viewer.user_id).await.unwrap_or_else(|e| {
            tracing::warn!("Registration status for training {} unavailable: {}", training_id, e);
            None
        });
        (confirmed, own_status)
    }

    async fn confirmed_count(&self, training_id: i64) -> Result<i64, PortalError> {
        let filter = Filter::new(Registration::TABLE)?
            .eq("training_id", training_id)
            .eq("status", RegistrationStatus::Confirmed.as_str())
            .count(CountMode::Head);
        Ok(self.backend.tables.select(&filter).await?.count.unwrap_or(0))
    }

    async fn own_status(&self, training_id: i64, user_id: &str) -> Result<Option<RegistrationStatus>, PortalError> {
        let filter = Filter::new(Registration::TABLE)?
            .select(["status"])
            .eq("training_id", training_id)
            .eq("user_id", user_id)
            .maybe_single();
        let row: Option<OwnStatus> = self.backend.tables.select(&filter).await?.first()?;
        Ok(row.map(|r| r.status))
    }

    /// Next page appended to the loaded items; `None` on the last page
    pub async fn load_more_trainings(&mut self) -> Option<ListOutcome<Vec<Training>>> {
        if !self.trainings.has_more() {
            return None;
        }
        self.trainings.page += 1;
        Some(self.fetch_trainings(FetchOptions::append()).await)
    }

    pub async fn search_trainings(&mut self, term: &str) -> ListOutcome<Vec<Training>> {
        self.trainings.search = term.to_string();
        self.trainings.page = 1;
        self.fetch_trainings(FetchOptions::default()).await
    }

    pub async fn clear_trainings_search(&mut self) -> ListOutcome<Vec<Training>> {
        self.trainings.search.clear();
        self.fetch_trainings(FetchOptions::default()).await
    }

    /// Jump to `page`; `None` when it is outside `1..=total_pages`
    pub async fn go_to_trainings_page(&mut self, page: i64) -> Option<ListOutcome<Vec<Training>>> {
        if !self.trainings.contains_page(page) {
            return None;
        }
        self.trainings.page = page;
        Some(self.fetch_trainings(FetchOptions::default()).await)
    }

    pub async fn create_training(&mut self, training: NewTraining, image: Option<ImageUpload>) -> ListOutcome<Training> {
        self.begin();
        match self.insert_training(training, image).await {
            Ok(created) => {
                tracing::info!("Created training {} ({})", created.id, created.name);
                self.fetch_trainings(FetchOptions::default()).await;
                self.loading = false;
                ListOutcome::ok(created)
            }
            Err(e) => self.fail("Error creating training", e),
        }
    }

    async fn insert_training(&self, training: NewTraining, image: Option<ImageUpload>) -> Result<Training, PortalError> {
        let mut row = serde_json::to_value(&training)?;
        if let Some(image) = image {
            row["image_url"] = json!(self.images.upload(image).await);
        }
        row["created_by"] = json!(self.store.read().await.user_id());
        let stored = self.backend.tables.insert(Training::TABLE, row).await?;
        Ok(serde_json::from_value(stored)?)
    }

    pub async fn update_training(
        &mut self,
        id: i64,
        update: TrainingUpdate,
        image: Option<ImageUpload>,
    ) -> ListOutcome<Training> {
        self.begin();
        match self.patch_training(id, update, image).await {
            Ok(updated) => {
                tracing::info!("Updated training {}", id);
                self.fetch_trainings(FetchOptions::default()).await;
                self.loading = false;
                ListOutcome::ok(updated)
            }
            Err(e) => self.fail("Error updating training", e),
        }
    }

    /// Image of a training, from the loaded row when present. Rows outside
    /// the loaded page (or hidden by visibility) are read by id.
    async fn stored_image_url(&self, id: i64) -> Result<Option<String>, PortalError> {
        if let Some(loaded) = self.trainings.items.iter().find(|t| t.id == id) {
            return Ok(loaded.image_url.clone());
        }
        let filter = Filter::new(Training::TABLE)?.select(["image_url"]).eq("id", id).maybe_single();
        let stored: Option<StoredImage> = self.backend.tables.select(&filter).await?.first()?;
        Ok(stored.and_then(|s| s.image_url))
    }

    async fn patch_training(&self, id: i64, update: TrainingUpdate, image: Option<ImageUpload>) -> Result<Training, PortalError> {
        let mut patch = serde_json::to_value(&update)?;
        if let Some(image) = image {
            // Old blob goes first
            if let Some(old_url) = self.stored_image_url(id).await? {
                self.images.delete(&old_url).await;
            }
            patch["image_url"] = json!(self.images.upload(image).await);
        }
        let filter = Filter::new(Training::TABLE)?.eq("id", id).single();
        let stored = self.backend.tables.update(&filter, patch).await?;
        Ok(serde_json::from_value(stored)?)
    }

    pub async fn delete_training(&mut self, id: i64) -> ListOutcome<()> {
        self.begin();
        match self.remove_training(id).await {
            Ok(()) => {
                tracing::info!("Deleted training {}", id);
                self.fetch_trainings(FetchOptions::default()).await;
                self.loading = false;
                ListOutcome::done()
            }
            Err(e) => self.fail("Error deleting training", e),
        }
    }

    async fn remove_training(&self, id: i64) -> Result<(), PortalError> {
        if let Some(url) = self.stored_image_url(id).await? {
            self.images.delete(&url).await;
        }
        let filter = Filter::new(Training::TABLE)?.eq("id", id);
        self.backend.tables.delete(&filter).await?;
        Ok(())
    }

    // ============================================
    // Registrations
    // ============================================

    pub async fn fetch_registrations(&mut self, options: FetchOptions) -> ListOutcome<Vec<Registration>> {
        self.begin();
        match self.read_registrations(&options).await {
            Ok(fetched) => {
                self.registrations.apply(fetched.items, fetched.total, fetched.page, false);
                self.loading = false;
                ListOutcome::ok(self.registrations.items.clone())
            }
            Err(e) => self.fail("Error fetching registrations", e),
        }
    }

    async fn read_registrations(&self, options: &FetchOptions) -> Result<Fetched<Registration>, PortalError> {
        let page = options.page.unwrap_or(self.registrations.page).max(1);
        let page_size = self.list.clamp(options.page_size.unwrap_or(self.registrations.page_size));
        let sort_by = options.sort_by.as_deref().unwrap_or(DEFAULT_REGISTRATION_SORT);
        let sort_order = options.sort_order.unwrap_or(SortDirection::Desc);
        let (from, to) = page_window(page, page_size)
            .ok_or_else(|| PortalError::validation(format!("Page {} is out of range", page)))?;
        let viewer = self.viewer().await;

        let mut filter = Filter::new(Registration::TABLE)?.count(CountMode::Exact);
        if !viewer.is_admin {
            filter = filter.eq("user_id", viewer.user_id.as_str());
        }
        let search = self.registrations.search.as_str();
        if !search.is_empty() {
            filter = filter.or(vec![
                Condition::field("training_name", FilterOp::ILike, contains_pattern(search)),
                Condition::field("user_name", FilterOp::ILike, contains_pattern(search)),
            ]);
        }
        let filter = filter.order(sort_by, sort_order).range(from, to)?;

        let result = self.backend.tables.select(&filter).await?;
        let total = result.count.unwrap_or(0);
        Ok(Fetched { items: result.into_rows()?, total, page })
    }

    pub async fn search_registrations(&mut self, term: &str) -> ListOutcome<Vec<Registration>> {
        self.registrations.search = term.to_string();
        self.registrations.page = 1;
        self.fetch_registrations(FetchOptions::default()).await
    }

    pub async fn clear_registrations_search(&mut self) -> ListOutcome<Vec<Registration>> {
        self.registrations.search.clear();
        self.fetch_registrations(FetchOptions::default()).await
    }

    pub async fn go_to_registrations_page(&mut self, page: i64) -> Option<ListOutcome<Vec<Registration>>> {
        if !self.registrations.contains_page(page) {
            return None;
        }
        self.registrations.page = page;
        Some(self.fetch_registrations(FetchOptions::default()).await)
    }

    /// Register the signed-in identity; user fields come from the session
    pub async fn create_registration(&mut self, registration: NewRegistration) -> ListOutcome<Registration> {
        self.begin();
        match self.insert_registration(registration).await {
            Ok(created) => {
                tracing::info!("Registered {} for training {}", created.user_email, created.training_id);
                self.fetch_registrations(FetchOptions::default()).await;
                self.loading = false;
                ListOutcome::ok(created)
            }
            Err(e) => self.fail("Error creating registration", e),
        }
    }

    async fn insert_registration(&self, registration: NewRegistration) -> Result<Registration, PortalError> {
        let row = {
            let store = self.store.read().await;
            registration.into_row(store.user_id(), store.display_name(), store.email())
        };
        let stored = self.backend.tables.insert(Registration::TABLE, row).await?;
        Ok(serde_json::from_value(stored)?)
    }

    /// Confirmation is checked against capacity while the training has not
    /// ended. The check and the write are separate calls, so two concurrent
    /// confirmations can both pass.
    pub async fn update_registration(&mut self, id: i64, update: RegistrationUpdate) -> ListOutcome<Registration> {
        self.begin();
        match self.patch_registration(id, update).await {
            Ok(updated) => {
                tracing::info!("Registration {} now {}", id, updated.status);
                self.fetch_registrations(FetchOptions::default()).await;
                self.fetch_trainings(FetchOptions::default()).await;
                self.loading = false;
                ListOutcome::ok(updated)
            }
            Err(e) => self.fail("Error updating registration", e),
        }
    }

    async fn patch_registration(&self, id: i64, update: RegistrationUpdate) -> Result<Registration, PortalError> {
        if update.confirms() {
            self.check_capacity(id).await?;
        }
        let filter = Filter::new(Registration::TABLE)?.eq("id", id).single();
        let stored = self.backend.tables.update(&filter, serde_json::to_value(&update)?).await?;
        Ok(serde_json::from_value(stored)?)
    }

    async fn check_capacity(&self, registration_id: i64) -> Result<(), PortalError> {
        let filter = Filter::new(Registration::TABLE)?
            .select(["training_id"])
            .eq("id", registration_id)
            .single();
        let registration: RegistrationTraining = self
            .backend
            .tables
            .select(&filter)
            .await?
            .first()?
            .ok_or_else(|| PortalError::not_found(format!("Registration {} not found", registration_id)))?;

        let filter = Filter::new(Training::TABLE)?.eq("id", registration.training_id).single();
        let training: Training = self
            .backend
            .tables
            .select(&filter)
            .await?
            .first()?
            .ok_or_else(|| PortalError::not_found(format!("Training {} not found", registration.training_id)))?;

        if training.is_in_progress(Utc::now()) {
            let confirmed = self.confirmed_count(registration.training_id).await?;
            if confirmed >= training.capacity {
                tracing::info!(
                    "Training {} at capacity ({}/{}), rejecting confirmation",
                    registration.training_id,
                    confirmed,
                    training.capacity
                );
                return Err(PortalError::CapacityExceeded);
            }
        }
        Ok(())
    }

    pub async fn delete_registration(&mut self, id: i64) -> ListOutcome<()> {
        self.begin();
        let result = async {
            let filter = Filter::new(Registration::TABLE)?.eq("id", id);
            self.backend.tables.delete(&filter).await?;
            Ok::<(), PortalError>(())
        }
        .await;
        match result {
            Ok(()) => {
                tracing::info!("Deleted registration {}", id);
                self.fetch_registrations(FetchOptions::default()).await;
                self.loading = false;
                ListOutcome::done()
            }
            Err(e) => self.fail("Error deleting registration", e),
        }
    }
}
