use anyhow::Result;
use chrono::Utc;
use mockito::{Matcher, Server};
use serde_json::{json, Value};

use training_portal::backend::{BackendError, BlobStorage, IdentityService, RestBackend, TableService};
use training_portal::config::AppConfig;
use training_portal::filter::{CountMode, Filter};

const ANON_KEY: &str = "anon-key";

fn config_for(server: &Server) -> AppConfig {
    let mut config = AppConfig::for_tests("admin@x.com");
    config.backend.url = server.url();
    config.backend.anon_key = ANON_KEY.to_string();
    config
}

fn session_body(token: &str, expires_at: i64) -> Value {
    json!({
        "access_token": token,
        "refresh_token": format!("{}-refresh", token),
        "token_type": "bearer",
        "expires_in": 3600,
        "expires_at": expires_at,
        "user": { "id": "u1", "email": "a@x.com", "user_metadata": { "full_name": "Alice" } }
    })
}

async fn signed_in(server: &mut Server, config: &AppConfig) -> Result<RestBackend> {
    let backend = RestBackend::new(config)?;
    let _login = server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::UrlEncoded("grant_type".into(), "password".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(session_body("tok", Utc::now().timestamp() + 3600).to_string())
        .create_async()
        .await;
    backend.sign_in_with_password("a@x.com", "pw").await?;
    Ok(backend)
}

#[tokio::test]
async fn password_sign_in_sends_anon_key_and_persists_session() -> Result<()> {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir()?;
    let mut config = config_for(&server);
    config.auth.session_file = Some(dir.path().join("session.json"));

    let mock = server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::UrlEncoded("grant_type".into(), "password".into()))
        .match_header("apikey", ANON_KEY)
        .match_body(Matcher::PartialJson(json!({ "email": "a@x.com", "password": "pw" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(session_body("tok", Utc::now().timestamp() + 3600).to_string())
        .create_async()
        .await;

    let backend = RestBackend::new(&config)?;
    let mut events = backend.events();
    let response = backend.sign_in_with_password("a@x.com", "pw").await?;

    mock.assert_async().await;
    assert_eq!(response.session.map(|s| s.access_token), Some("tok".to_string()));
    assert_eq!(events.try_recv()?.name(), "SIGNED_IN");

    // A second client restores the persisted session without a request
    let restored = RestBackend::new(&config)?.get_session().await?;
    assert_eq!(restored.map(|s| s.user.id), Some("u1".to_string()));
    Ok(())
}

#[tokio::test]
async fn rejected_credentials_surface_error_description() -> Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" }).to_string())
        .create_async()
        .await;

    let backend = RestBackend::new(&config_for(&server))?;
    let err = backend.sign_in_with_password("a@x.com", "bad").await.err();

    assert!(matches!(err, Some(BackendError::Auth(ref m)) if m == "Invalid login credentials"), "{:?}", err);
    Ok(())
}

#[tokio::test]
async fn sign_up_pending_confirmation_returns_user_only() -> Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/auth/v1/signup")
        .match_body(Matcher::PartialJson(json!({ "data": { "full_name": "Nina" } })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "id": "u9", "email": "n@x.com", "user_metadata": { "full_name": "Nina" } }).to_string())
        .create_async()
        .await;

    let backend = RestBackend::new(&config_for(&server))?;
    let response = backend.sign_up("n@x.com", "pw", json!({ "full_name": "Nina" })).await?;

    assert!(response.session.is_none());
    assert_eq!(response.user.map(|u| u.id), Some("u9".to_string()));
    assert!(backend.get_session().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn expired_session_is_refreshed_on_read() -> Result<()> {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    std::fs::write(&path, session_body("old", Utc::now().timestamp() - 60).to_string())?;
    let mut config = config_for(&server);
    config.auth.session_file = Some(path);

    let refresh = server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
        .match_body(Matcher::PartialJson(json!({ "refresh_token": "old-refresh" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(session_body("new", Utc::now().timestamp() + 3600).to_string())
        .create_async()
        .await;

    let session = RestBackend::new(&config)?.get_session().await?;

    refresh.assert_async().await;
    assert_eq!(session.map(|s| s.access_token), Some("new".to_string()));
    Ok(())
}

#[tokio::test]
async fn counted_select_uses_session_bearer_and_content_range() -> Result<()> {
    let mut server = Server::new_async().await;
    let config = config_for(&server);
    let backend = signed_in(&mut server, &config).await?;

    let mock = server
        .mock("GET", "/rest/v1/trainings")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("capacity".into(), "gte.5".into()),
            Matcher::UrlEncoded("order".into(), "name.asc".into()),
        ]))
        .match_header("authorization", "Bearer tok")
        .match_header("prefer", "count=exact")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("content-range", "0-1/7")
        .with_body(json!([{ "id": 1 }, { "id": 2 }]).to_string())
        .create_async()
        .await;

    let filter = Filter::new("trainings")?
        .gte("capacity", 5)
        .order("name", training_portal::filter::SortDirection::Asc)
        .range(0, 1)?
        .count(CountMode::Exact);
    let result = backend.select(&filter).await?;

    mock.assert_async().await;
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.count, Some(7));
    Ok(())
}

#[tokio::test]
async fn head_count_select_uses_head_request() -> Result<()> {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("HEAD", "/rest/v1/training_registrations")
        .match_query(Matcher::UrlEncoded("status".into(), "eq.confirmed".into()))
        .match_header("authorization", format!("Bearer {}", ANON_KEY).as_str())
        .with_status(200)
        .with_header("content-range", "*/3")
        .create_async()
        .await;

    let backend = RestBackend::new(&config_for(&server))?;
    let filter = Filter::new("training_registrations")?.eq("status", "confirmed").count(CountMode::Head);
    let result = backend.select(&filter).await?;

    mock.assert_async().await;
    assert!(result.rows.is_empty());
    assert_eq!(result.count, Some(3));
    Ok(())
}

#[tokio::test]
async fn update_requires_exactly_one_row() -> Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("PATCH", "/rest/v1/training_registrations")
        .match_query(Matcher::UrlEncoded("id".into(), "eq.5".into()))
        .match_header("prefer", "return=representation")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create_async()
        .await;

    let backend = RestBackend::new(&config_for(&server))?;
    let filter = Filter::new("training_registrations")?.eq("id", 5);
    let err = backend.update(&filter, json!({ "status": "confirmed" })).await.err();

    assert!(matches!(err, Some(BackendError::NotFound(_))), "{:?}", err);
    Ok(())
}

#[tokio::test]
async fn storage_upload_and_remove_paths() -> Result<()> {
    let mut server = Server::new_async().await;
    let upload = server
        .mock("POST", "/storage/v1/object/trainings/abc-1.png")
        .match_header("content-type", "image/png")
        .match_header("x-upsert", "false")
        .with_status(200)
        .with_body(json!({ "Key": "trainings/abc-1.png" }).to_string())
        .create_async()
        .await;
    let remove = server
        .mock("DELETE", "/storage/v1/object/trainings")
        .match_body(Matcher::Json(json!({ "prefixes": ["abc-1.png"] })))
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let backend = RestBackend::new(&config_for(&server))?;
    backend.upload("trainings", "abc-1.png", vec![1, 2, 3], "image/png").await?;
    backend.remove("trainings", &["abc-1.png".to_string()]).await?;

    upload.assert_async().await;
    remove.assert_async().await;
    assert_eq!(
        backend.public_url("trainings", "abc-1.png"),
        format!("{}/storage/v1/object/public/trainings/abc-1.png", server.url())
    );
    Ok(())
}

#[tokio::test]
async fn sign_out_tolerates_already_revoked_session() -> Result<()> {
    let mut server = Server::new_async().await;
    let config = config_for(&server);
    let backend = signed_in(&mut server, &config).await?;
    let logout = server
        .mock("POST", "/auth/v1/logout")
        .match_header("authorization", "Bearer tok")
        .with_status(401)
        .create_async()
        .await;

    backend.sign_out().await?;

    logout.assert_async().await;
    assert!(backend.get_session().await?.is_none());
    Ok(())
}
