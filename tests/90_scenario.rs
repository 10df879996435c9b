mod common;

use anyhow::Result;
use common::{registration_row, training_row, Portal, ADMIN_EMAIL, ADMIN_PASSWORD, USER_EMAIL, USER_PASSWORD};

use training_portal::auth::Route;
use training_portal::catalog::FetchOptions;
use training_portal::error::{TRAINING_AT_CAPACITY, USER_LOGIN_REQUIRED};
use training_portal::models::{NewRegistration, RegistrationStatus, RegistrationUpdate};
use training_portal::types::Role;

#[tokio::test]
async fn admin_and_user_portals_end_to_end() -> Result<()> {
    common::init_tracing();
    let portal = Portal::new();
    portal.seed_trainings(vec![training_row(1, "Rust Basics", 1, 7)]);
    portal.seed_registrations(vec![registration_row(1, 1, "early-bird", "confirmed")]);

    // A user trying the admin portal is turned away with nothing retained
    let outcome = portal.flow.sign_in(USER_EMAIL, USER_PASSWORD, Some(Role::Admin)).await;
    assert_eq!(outcome.error.as_deref(), Some(USER_LOGIN_REQUIRED));
    assert!(portal.store.read().await.session().is_none());

    // The same user on the user portal registers for the training
    let outcome = portal.flow.sign_in(USER_EMAIL, USER_PASSWORD, None).await;
    assert_eq!(outcome.redirect, Some(Route::UserDashboard));
    let mut catalog = portal.catalog();
    catalog.fetch_trainings(FetchOptions::default()).await;
    let training = catalog.trainings().items[0].clone();
    assert_eq!(training.user_registration_status, None);

    let registered = catalog
        .create_registration(NewRegistration {
            training_id: training.id,
            training_name: training.name.clone(),
            status: RegistrationStatus::Pending,
        })
        .await;
    assert!(registered.success, "{:?}", registered.error);
    let registration_id = registered.data.map(|r| r.id).unwrap_or_default();
    catalog.fetch_trainings(FetchOptions::default()).await;
    assert_eq!(catalog.trainings().items[0].user_registration_status, Some(RegistrationStatus::Pending));
    assert!(portal.flow.sign_out().await.success);

    // The admin sees every registration but cannot confirm past capacity
    let outcome = portal.flow.sign_in(ADMIN_EMAIL, ADMIN_PASSWORD, None).await;
    assert_eq!(outcome.redirect, Some(Route::AdminDashboard));
    assert_eq!(portal.store.read().await.profile().map(|p| p.user_type), Some(Role::Admin));
    let mut catalog = portal.catalog();
    catalog.fetch_registrations(FetchOptions::default()).await;
    assert_eq!(catalog.registrations().total, 2);

    let confirm = catalog
        .update_registration(registration_id, RegistrationUpdate::status(RegistrationStatus::Confirmed))
        .await;
    assert_eq!(confirm.error.as_deref(), Some(TRAINING_AT_CAPACITY));

    // Freeing the seat lets the confirmation through
    assert!(catalog.update_registration(1, RegistrationUpdate::status(RegistrationStatus::Cancelled)).await.success);
    let confirm = catalog
        .update_registration(registration_id, RegistrationUpdate::status(RegistrationStatus::Confirmed))
        .await;
    assert!(confirm.success, "{:?}", confirm.error);
    assert_eq!(catalog.trainings().items[0].confirmed_count, 1);
    Ok(())
}
