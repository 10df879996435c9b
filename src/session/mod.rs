//! The signed-in identity as an explicitly owned state object. No I/O
//! happens here; controllers and the auth listener write to it, views read
//! the derived predicates or watch [`SessionSnapshot`]s.

pub mod profile;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, RwLock};

use crate::models::{Session, User};
use crate::types::Role;

pub use profile::{AdminAllowList, Profile};

pub type SharedSession = Arc<RwLock<SessionStore>>;

/// What observers see after each mutation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub authenticated: bool,
    pub role: Option<Role>,
    pub email: String,
    pub display_name: String,
    pub is_loading: bool,
}

#[derive(Debug)]
pub struct SessionStore {
    user: Option<User>,
    session: Option<Session>,
    profile: Option<Profile>,
    is_loading: bool,
    admins: AdminAllowList,
    notifier: watch::Sender<SessionSnapshot>,
}

impl SessionStore {
    pub fn new(admins: AdminAllowList) -> Self {
        let (notifier, _) = watch::channel(SessionSnapshot { is_loading: true, ..Default::default() });
        let store = Self {
            user: None,
            session: None,
            profile: None,
            is_loading: true,
            admins,
            notifier,
        };
        store.publish();
        store
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(RwLock::new(self))
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.notifier.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            authenticated: self.is_authenticated(),
            role: self.role(),
            email: self.email().to_string(),
            display_name: self.display_name().to_string(),
            is_loading: self.is_loading,
        }
    }

    fn publish(&self) {
        self.notifier.send_replace(self.snapshot());
    }

    // ---- state ----

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    // ---- derived ----

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some() && self.user.is_some()
    }

    pub fn is_admin(&self) -> bool {
        matches!(&self.profile, Some(p) if p.user_type == Role::Admin)
    }

    pub fn is_user(&self) -> bool {
        matches!(&self.profile, Some(p) if p.user_type == Role::User)
    }

    pub fn email(&self) -> &str {
        self.user.as_ref().map_or("", User::email_or_empty)
    }

    pub fn user_id(&self) -> &str {
        self.user.as_ref().map_or("", |u| u.id.as_str())
    }

    pub fn display_name(&self) -> &str {
        self.profile.as_ref().map_or("User", |p| p.full_name.as_str())
    }

    pub fn is_profile_complete(&self) -> bool {
        self.profile.as_ref().map_or(true, Profile::is_complete)
    }

    /// Role of the authenticated identity; `None` when signed out
    pub fn role(&self) -> Option<Role> {
        if !self.is_authenticated() {
            return None;
        }
        self.profile.as_ref().map(|p| p.user_type)
    }

    pub fn can_access_admin(&self) -> bool {
        self.is_admin()
    }

    pub fn can_access_user(&self) -> bool {
        self.is_authenticated()
    }

    pub fn determine_role(&self, email: &str) -> Role {
        self.admins.role_for(email)
    }

    // ---- mutations ----

    /// Populate identity from a backend session, role from the allow-list
    pub fn establish(&mut self, session: Session) {
        let role = self.determine_role(session.user.email_or_empty());
        self.establish_as(session, role, None);
    }

    /// Populate identity with an explicit role and optional display name
    pub fn establish_as(&mut self, session: Session, role: Role, full_name: Option<&str>) {
        let user = session.user.clone();
        self.profile = Some(Profile::from_user(&user, role, full_name));
        self.user = Some(user);
        self.session = Some(session);
        tracing::debug!("Session established for {} as {}", self.email(), role);
        self.publish();
    }

    /// Replace credentials only; user and profile are untouched
    pub fn set_session(&mut self, session: Option<Session>) {
        self.session = session;
        self.publish();
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
        self.publish();
    }

    pub fn clear(&mut self) {
        self.user = None;
        self.session = None;
        self.profile = None;
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn session_for(email: &str, metadata: Value) -> Session {
        Session {
            access_token: "a".into(),
            refresh_token: "r".into(),
            token_type: "bearer".into(),
            expires_in: Some(3600),
            expires_at: None,
            user: User { id: format!("id-{}", email), email: Some(email.into()), user_metadata: metadata, created_at: None },
        }
    }

    fn store() -> SessionStore {
        SessionStore::new(AdminAllowList::from_csv("admin@x.com"))
    }

    #[test]
    fn starts_loading_and_signed_out() {
        let store = store();
        assert!(store.is_loading());
        assert!(!store.is_authenticated());
        assert_eq!(store.role(), None);
        assert_eq!(store.email(), "");
        assert_eq!(store.user_id(), "");
        assert_eq!(store.display_name(), "User");
        assert!(store.is_profile_complete());
    }

    #[test]
    fn determine_role_ignores_case() {
        let store = store();
        assert_eq!(store.determine_role("ADMIN@X.COM"), Role::Admin);
        assert_eq!(store.determine_role("a@x.com"), Role::User);
    }

    #[test]
    fn establish_derives_exactly_one_role() {
        let mut store = store();
        store.establish(session_for("Admin@x.com", json!({"full_name": "Boss"})));
        assert!(store.is_admin());
        assert!(!store.is_user());
        assert_eq!(store.role(), Some(Role::Admin));
        assert_eq!(store.display_name(), "Boss");
        assert!(store.can_access_admin());

        store.establish(session_for("a@x.com", Value::Null));
        assert!(store.is_user() && !store.is_admin());
        assert_eq!(store.display_name(), "a");
        assert!(!store.is_profile_complete());
    }

    #[test]
    fn set_session_keeps_profile() {
        let mut store = store();
        store.establish(session_for("a@x.com", json!({"name": "Ada"})));
        let mut refreshed = session_for("a@x.com", Value::Null);
        refreshed.access_token = "b".into();
        store.set_session(Some(refreshed));
        assert_eq!(store.session().unwrap().access_token, "b");
        assert_eq!(store.display_name(), "Ada");
    }

    #[test]
    fn clear_empties_everything_and_notifies() {
        let mut store = store();
        let rx = store.subscribe();
        store.establish(session_for("a@x.com", Value::Null));
        assert!(rx.borrow().authenticated);

        store.clear();
        assert!(store.user().is_none() && store.session().is_none() && store.profile().is_none());
        assert!(!store.is_authenticated());
        let snapshot = rx.borrow().clone();
        assert!(!snapshot.authenticated);
        assert_eq!(snapshot.role, None);
    }
}
