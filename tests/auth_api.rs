#![cfg(feature = "inmem-store")]

use std::sync::Arc;

use actix_web::{test, App};
use async_trait::async_trait;
use serial_test::serial;

use flock::auth::create_jwt;
use flock::media::{MediaAsset, MediaError, MediaStore};
use flock::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use flock::routes::{config, AppState};
use flock::store::inmem::InMemStore;
use flock::store::UserStore;

struct NullMedia;

#[async_trait]
impl MediaStore for NullMedia {
    async fn upload(&self, _bytes: &[u8], _mime: &str) -> Result<MediaAsset, MediaError> {
        Err(MediaError::Other("unused".into()))
    }
    async fn delete(&self, _asset_id: &str) -> Result<(), MediaError> {
        Ok(())
    }
}

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("FLOCK_DATA_DIR", tmp.path().to_str().unwrap());
}

#[actix_web::test]
#[serial]
async fn bearer_token_is_required_and_verified() {
    setup_env();
    let store = InMemStore::new();
    let user = store
        .create_user(
            flock::models::NewUser {
                name: "alice".into(),
                username: "alice".into(),
                password: "secret1".into(),
                mobile_no: "+14155550100".into(),
            },
            "hash".into(),
        )
        .await
        .unwrap();

    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(AppState {
                store: Arc::new(store),
                media: Arc::new(NullMedia),
                rate: RateLimiterFacade::new(
                    InMemoryRateLimiter::new(false),
                    RateLimitConfig::from_env(),
                ),
            }))
            .configure(config),
    )
    .await;

    // no token
    let req = test::TestRequest::get().uri("/api/v1/auth/me").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    // garbage token
    let req = test::TestRequest::get()
        .uri("/api/v1/auth/me")
        .insert_header(("Authorization", "Bearer not.a.jwt"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    // valid token
    let token = create_jwt(user.id).unwrap();
    let req = test::TestRequest::get()
        .uri("/api/v1/auth/me")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    // token signed with a different secret
    std::env::set_var("JWT_SECRET", "another-secret-also-32-bytes-long!!!");
    let foreign = create_jwt(user.id).unwrap();
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    let req = test::TestRequest::get()
        .uri("/api/v1/auth/me")
        .insert_header(("Authorization", format!("Bearer {foreign}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}
