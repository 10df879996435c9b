use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::backend::{AuthEvent, IdentityService};
use crate::session::{SessionStore, SharedSession};

/// Reconcile one identity event into the store
pub fn apply_event(store: &mut SessionStore, event: AuthEvent) {
    match event {
        AuthEvent::SignedIn(session) => store.establish(session),
        AuthEvent::SignedOut => store.clear(),
        AuthEvent::TokenRefreshed(session) => store.set_session(Some(session)),
    }
}

pub struct AuthChangeListener;

impl AuthChangeListener {
    /// Subscribe once and apply events until the stream closes. Call after
    /// the initial session restore has finished.
    pub fn attach(identity: &dyn IdentityService, store: SharedSession) -> ListenerHandle {
        let mut events = identity.events();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        tracing::debug!("Identity event {}", event.name());
                        apply_event(&mut *store.write().await, event);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Auth listener fell behind, {} events dropped", missed);
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Identity event stream closed, auth listener stopping");
                        break;
                    }
                }
            }
        });
        ListenerHandle { task }
    }
}

/// Owns the listener task; dropping it stops listening
#[derive(Debug)]
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn detach(self) {}
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Session, User};
    use crate::session::AdminAllowList;
    use crate::types::Role;
    use serde_json::Value;

    fn session(email: &str, token: &str) -> Session {
        Session {
            access_token: token.into(),
            refresh_token: "r".into(),
            token_type: "bearer".into(),
            expires_in: None,
            expires_at: None,
            user: User { id: "u1".into(), email: Some(email.into()), user_metadata: Value::Null, created_at: None },
        }
    }

    #[test]
    fn signed_in_establishes_with_derived_role() {
        let mut store = SessionStore::new(AdminAllowList::from_csv("admin@x.com"));
        apply_event(&mut store, AuthEvent::SignedIn(session("admin@x.com", "t1")));
        assert_eq!(store.role(), Some(Role::Admin));
    }

    #[test]
    fn token_refresh_only_swaps_session() {
        let mut store = SessionStore::new(AdminAllowList::default());
        apply_event(&mut store, AuthEvent::SignedIn(session("a@x.com", "t1")));
        let profile = store.profile().cloned();

        apply_event(&mut store, AuthEvent::TokenRefreshed(session("other@x.com", "t2")));
        assert_eq!(store.session().map(|s| s.access_token.as_str()), Some("t2"));
        assert_eq!(store.profile().cloned(), profile);
        assert_eq!(store.email(), "a@x.com");
    }

    #[test]
    fn signed_out_clears() {
        let mut store = SessionStore::new(AdminAllowList::default());
        apply_event(&mut store, AuthEvent::SignedIn(session("a@x.com", "t1")));
        assert_eq!(store.email(), "a@x.com");

        apply_event(&mut store, AuthEvent::SignedOut);
        assert!(!store.is_authenticated());
    }
}
