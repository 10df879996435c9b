use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::backend::{ChangeEvent, ChangeStream, ChangeSubscription};
use crate::error::PortalError;
use crate::models::{Registration, Training};

use super::{FetchOptions, TrainingCatalog};

pub const TRAININGS_CHANNEL: &str = "trainings-changes";
pub const REGISTRATIONS_CHANNEL: &str = "registrations-changes";

/// Both table subscriptions, forwarded into one channel. Dropping it stops
/// the forwarders, which releases the backend subscriptions.
#[derive(Debug)]
pub struct RealtimeSync {
    forwarders: Vec<JoinHandle<()>>,
}

impl RealtimeSync {
    fn forward(mut stream: ChangeStream, sink: mpsc::UnboundedSender<ChangeEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                if sink.send(event).is_err() {
                    break;
                }
            }
        })
    }

    pub fn is_active(&self) -> bool {
        self.forwarders.iter().any(|task| !task.is_finished())
    }
}

impl Drop for RealtimeSync {
    fn drop(&mut self) {
        for task in &self.forwarders {
            task.abort();
        }
    }
}

impl TrainingCatalog {
    /// Subscribe to every change on both tables. Replaces any earlier
    /// subscription; the receiver yields each change in arrival order.
    pub async fn subscribe_realtime(&mut self) -> Result<mpsc::UnboundedReceiver<ChangeEvent>, PortalError> {
        self.realtime = None;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut forwarders = Vec::with_capacity(2);
        for (channel, table) in [(TRAININGS_CHANNEL, Training::TABLE), (REGISTRATIONS_CHANNEL, Registration::TABLE)] {
            let stream = self
                .backend
                .changes
                .subscribe(ChangeSubscription::all_events(channel, table))
                .await?;
            forwarders.push(RealtimeSync::forward(stream, tx.clone()));
        }
        tracing::info!("Realtime subscriptions active for {} and {}", Training::TABLE, Registration::TABLE);
        self.realtime = Some(RealtimeSync { forwarders });
        Ok(rx)
    }

    pub fn unsubscribe_realtime(&mut self) {
        if self.realtime.take().is_some() {
            tracing::info!("Realtime subscriptions removed");
        }
    }

    pub fn realtime_active(&self) -> bool {
        self.realtime.as_ref().is_some_and(RealtimeSync::is_active)
    }

    /// Re-fetch both lists after a change, the changed table first
    pub async fn resync(&mut self, table: &str) {
        tracing::debug!("{} change received", table);
        if table == Registration::TABLE {
            self.fetch_registrations(FetchOptions::default()).await;
            self.fetch_trainings(FetchOptions::default()).await;
        } else {
            self.fetch_trainings(FetchOptions::default()).await;
            self.fetch_registrations(FetchOptions::default()).await;
        }
    }

    /// Apply every change from `events` until the channel closes
    pub async fn run_resync(catalog: Arc<Mutex<TrainingCatalog>>, mut events: mpsc::UnboundedReceiver<ChangeEvent>) {
        while let Some(event) = events.recv().await {
            tracing::debug!("{} on {}", event.kind.as_str(), event.table);
            catalog.lock().await.resync(&event.table).await;
        }
    }

    /// Spawned [`TrainingCatalog::run_resync`]
    pub fn spawn_resync(
        catalog: Arc<Mutex<TrainingCatalog>>,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(Self::run_resync(catalog, events))
    }
}
