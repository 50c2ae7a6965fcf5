#![cfg(feature = "inmem-store")]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use actix_web::{test, App};
use async_trait::async_trait;
use serial_test::serial;

use flock::media::{MediaAsset, MediaError, MediaStore};
use flock::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use flock::routes::{config, AppState};
use flock::store::inmem::InMemStore;

/// Media host double; these suites never exercise uploads, the profile
/// upload flow has its own file.
#[derive(Default)]
struct MockMedia {
    counter: AtomicUsize,
    assets: Mutex<HashSet<String>>,
}

#[async_trait]
impl MediaStore for MockMedia {
    async fn upload(&self, _bytes: &[u8], _mime: &str) -> Result<MediaAsset, MediaError> {
        let id = format!("asset-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        self.assets.lock().unwrap().insert(id.clone());
        Ok(MediaAsset {
            url: format!("http://media.test/profiles/{id}"),
            asset_id: id,
        })
    }

    async fn delete(&self, asset_id: &str) -> Result<(), MediaError> {
        self.assets.lock().unwrap().remove(asset_id);
        Ok(())
    }
}

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("FLOCK_DATA_DIR", tmp.path().to_str().unwrap());
}

fn disabled_rate() -> RateLimiterFacade {
    RateLimiterFacade::new(InMemoryRateLimiter::new(false), RateLimitConfig::from_env())
}

fn app_state(media: Arc<MockMedia>, rate: RateLimiterFacade) -> AppState {
    AppState {
        store: Arc::new(InMemStore::new()),
        media,
        rate,
    }
}

/// Registers a user through the API and yields `(user_id, token)`.
macro_rules! register {
    ($app:expr, $username:expr, $mobile:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/v1/auth/register")
            .set_json(&serde_json::json!({
                "name": $username,
                "username": $username,
                "password": "secret1",
                "mobile_no": $mobile
            }))
            .to_request();
        let resp = test::call_service($app, req).await;
        assert_eq!(resp.status(), 201);
        let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
        assert_eq!(v["success"], true);
        (
            v["data"]["user"]["id"].as_i64().unwrap(),
            v["data"]["token"].as_str().unwrap().to_string(),
        )
    }};
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

#[actix_web::test]
#[serial]
async fn register_login_me_flow() {
    setup_env();
    let media = Arc::new(MockMedia::default());
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(media, disabled_rate())))
            .configure(config),
    )
    .await;

    let (_alice_id, _token) = register!(&app, "alice", "+14155550100");

    // the password hash never leaves the server
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(&serde_json::json!({"username": "alice", "password": "secret1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(v["data"]["user"].get("password_hash").is_none());
    let token = v["data"]["token"].as_str().unwrap().to_string();

    // wrong password and unknown user are indistinguishable 401s
    for (user, pass) in [("alice", "wrong-pw"), ("nobody", "secret1")] {
        let req = test::TestRequest::post()
            .uri("/api/v1/auth/login")
            .set_json(&serde_json::json!({"username": user, "password": pass}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }

    let req = test::TestRequest::get()
        .uri("/api/v1/auth/me")
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["data"]["username"], "alice");
    assert_eq!(v["data"]["posts"].as_array().unwrap().len(), 0);

    // logout acknowledges
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/logout")
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
#[serial]
async fn register_rejects_bad_input_and_duplicates() {
    setup_env();
    let media = Arc::new(MockMedia::default());
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(media, disabled_rate())))
            .configure(config),
    )
    .await;

    register!(&app, "alice", "+14155550100");

    // duplicate username (different case) -> 409
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(&serde_json::json!({
            "name": "Alice 2", "username": "ALICE",
            "password": "secret1", "mobile_no": "+14155550199"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["success"], false);

    // short password, bad mobile -> 400
    for body in [
        serde_json::json!({"name": "B", "username": "bob", "password": "short", "mobile_no": "+14155550101"}),
        serde_json::json!({"name": "B", "username": "bob", "password": "secret1", "mobile_no": "not-a-number"}),
    ] {
        let req = test::TestRequest::post()
            .uri("/api/v1/auth/register")
            .set_json(&body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}

#[actix_web::test]
#[serial]
async fn post_comment_like_flow_routes() {
    setup_env();
    let media = Arc::new(MockMedia::default());
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(media, disabled_rate())))
            .configure(config),
    )
    .await;

    let (_alice_id, alice) = register!(&app, "alice", "+14155550100");
    let (_bob_id, bob) = register!(&app, "bob", "+14155550101");

    // create post requires auth
    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(&serde_json::json!({"content": "hello world", "image": null}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(bearer(&alice))
        .set_json(&serde_json::json!({"content": "hello world", "image": null}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let post_id = v["data"]["id"].as_i64().unwrap();

    // comment + reply
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{post_id}/comments"))
        .insert_header(bearer(&bob))
        .set_json(&serde_json::json!({"body": "first!"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let comment_id = v["data"]["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/comments/{comment_id}/replies"))
        .insert_header(bearer(&alice))
        .set_json(&serde_json::json!({"body": "welcome"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    // replies are not top-level: list still shows one comment
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/posts/{post_id}/comments"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["count"], 1);

    // like, double-like, check, unlike
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{post_id}/likes"))
        .insert_header(bearer(&bob))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{post_id}/likes"))
        .insert_header(bearer(&bob))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/posts/{post_id}/likes/check"))
        .insert_header(bearer(&bob))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["data"]["liked"], true);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["data"]["likes_count"], 1);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/posts/{post_id}/likes"))
        .insert_header(bearer(&bob))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/posts/{post_id}/likes/check"))
        .insert_header(bearer(&bob))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["data"]["liked"], false);
}

#[actix_web::test]
#[serial]
async fn follow_routes_map_errors() {
    setup_env();
    let media = Arc::new(MockMedia::default());
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(media, disabled_rate())))
            .configure(config),
    )
    .await;

    let (alice_id, alice) = register!(&app, "alice", "+14155550100");
    let (bob_id, _bob) = register!(&app, "bob", "+14155550101");

    // self-follow -> 400
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/users/{alice_id}/follow"))
        .insert_header(bearer(&alice))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/users/{bob_id}/follow"))
        .insert_header(bearer(&alice))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    // double follow -> 409, missing user -> 404
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/users/{bob_id}/follow"))
        .insert_header(bearer(&alice))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    let req = test::TestRequest::put()
        .uri("/api/v1/users/424242/follow")
        .insert_header(bearer(&alice))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    // the edge is visible from both sides
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/users/{bob_id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["data"]["followers"][0].as_i64(), Some(alice_id));

    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/users/{bob_id}/unfollow"))
        .insert_header(bearer(&alice))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/users/{bob_id}/unfollow"))
        .insert_header(bearer(&alice))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
}

#[actix_web::test]
#[serial]
async fn ownership_is_enforced_on_routes() {
    setup_env();
    let media = Arc::new(MockMedia::default());
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(media, disabled_rate())))
            .configure(config),
    )
    .await;

    let (alice_id, alice) = register!(&app, "alice", "+14155550100");
    let (_bob_id, bob) = register!(&app, "bob", "+14155550101");

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(bearer(&alice))
        .set_json(&serde_json::json!({"content": "mine", "image": null}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let post_id = v["data"]["id"].as_i64().unwrap();

    // bob cannot edit or delete alice's post
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .insert_header(bearer(&bob))
        .set_json(&serde_json::json!({"content": "hijacked"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .insert_header(bearer(&bob))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    // bob cannot delete alice's account
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/users/{alice_id}"))
        .insert_header(bearer(&bob))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    // alice can, and the user is gone afterwards
    let req = test::TestRequest::delete()
        .uri("/api/v1/users/alice")
        .insert_header(bearer(&alice))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/users/{alice_id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::get().uri("/api/v1/posts/424242").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
#[serial]
async fn rate_limit_kicks_in_on_post_creation() {
    setup_env();
    let media = Arc::new(MockMedia::default());
    let mut cfg = RateLimitConfig::from_env();
    cfg.post_limit = 1;
    cfg.post_window = std::time::Duration::from_secs(60);
    let rate = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg);
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(media, rate)))
            .configure(config),
    )
    .await;

    let (_alice_id, alice) = register!(&app, "alice", "+14155550100");

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(bearer(&alice))
        .set_json(&serde_json::json!({"content": "one", "image": null}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(bearer(&alice))
        .set_json(&serde_json::json!({"content": "two", "image": null}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429);
}
