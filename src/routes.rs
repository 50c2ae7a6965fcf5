use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt as _;
use serde::Serialize;

use crate::auth::{create_jwt, hash_password, verify_password, Auth};
use crate::error::ApiError;
use crate::media::{delete_asset_best_effort, MediaStore};
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::store::{GraphStore, StoreError};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/auth/register").route(web::post().to(register)),
            )
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/auth/logout").route(web::post().to(logout)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/users").route(web::get().to(list_users)))
            .service(web::resource("/users/search").route(web::get().to(search_users)))
            .service(web::resource("/users/by-ids").route(web::post().to(users_by_ids)))
            .service(
                web::resource("/users/username/{username}")
                    .route(web::get().to(get_user_by_username)),
            )
            .service(web::resource("/users/save/{post_id}").route(web::put().to(save_post)))
            .service(web::resource("/users/unsave/{post_id}").route(web::put().to(unsave_post)))
            .service(web::resource("/users/{id}/follow").route(web::put().to(follow_user)))
            .service(web::resource("/users/{id}/unfollow").route(web::put().to(unfollow_user)))
            .service(web::resource("/users/{id}/profile").route(web::put().to(update_profile)))
            .service(
                web::resource("/users/{id}")
                    .route(web::get().to(get_user))
                    .route(web::put().to(update_user))
                    .route(web::delete().to(delete_account)),
            )
            .service(
                web::resource("/posts")
                    .route(web::get().to(list_posts))
                    .route(web::post().to(create_post)),
            )
            .service(web::resource("/posts/user/{user_id}").route(web::get().to(posts_by_user)))
            .service(
                web::resource("/posts/{id}")
                    .route(web::get().to(get_post))
                    .route(web::put().to(update_post))
                    .route(web::delete().to(delete_post)),
            )
            .service(
                web::resource("/posts/{post_id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(add_comment)),
            )
            .service(
                web::resource("/posts/{post_id}/likes")
                    .route(web::post().to(like_post))
                    .route(web::delete().to(unlike_post)),
            )
            .service(web::resource("/posts/{post_id}/likes/check").route(web::get().to(check_like)))
            .service(web::resource("/comments/{comment_id}/replies").route(web::post().to(add_reply)))
            .service(
                web::resource("/comments/{id}")
                    .route(web::put().to(update_comment))
                    .route(web::delete().to(delete_comment)),
            ),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn GraphStore>,
    pub media: Arc<dyn MediaStore>,
    pub rate: RateLimiterFacade,
}

fn client_ip(req: &HttpRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string()
}

// Success envelope: `{"success": true, "data": ...}`.
fn ok_json<T: Serialize>(data: &T) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "success": true, "data": data }))
}

fn created_json<T: Serialize>(data: &T) -> HttpResponse {
    HttpResponse::Created().json(serde_json::json!({ "success": true, "data": data }))
}

fn listed_json<T: Serialize>(items: &[T]) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "count": items.len(),
        "data": items
    }))
}

fn bad_request(msg: String) -> ApiError {
    ApiError::BadRequest(msg)
}

// ---------------- auth ----------------

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct SessionResponse {
    pub user: User,
    pub token: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = NewUser,
    responses(
        (status = 201, description = "Account created", body = SessionResponse),
        (status = 400, description = "Validation failure"),
        (status = 409, description = "Username or mobile number taken")
    )
)]
pub async fn register(
    data: web::Data<AppState>,
    payload: web::Json<NewUser>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    validate_name(&new.name).map_err(bad_request)?;
    validate_username(&new.username).map_err(bad_request)?;
    validate_password(&new.password).map_err(bad_request)?;
    validate_mobile(&new.mobile_no).map_err(bad_request)?;

    let password_hash = hash_password(&new.password).map_err(|e| {
        log::error!("password hashing failed: {e}");
        ApiError::Internal
    })?;
    let user = data.store.create_user(new, password_hash).await?;
    let token = create_jwt(user.id).map_err(|_| ApiError::Internal)?;
    Ok(created_json(&SessionResponse { user, token }))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = SessionResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    // unknown username and wrong password collapse into the same 401
    let user = match data.store.get_user_by_username(&payload.username).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => return Err(ApiError::Unauthorized),
        Err(e) => return Err(e.into()),
    };
    let hash = match data.store.password_hash(user.id).await {
        Ok(hash) => hash,
        Err(StoreError::NotFound) => return Err(ApiError::Unauthorized),
        Err(e) => return Err(e.into()),
    };
    if !verify_password(&payload.password, &hash) {
        return Err(ApiError::Unauthorized);
    }
    let token = create_jwt(user.id).map_err(|_| ApiError::Internal)?;
    Ok(ok_json(&SessionResponse { user, token }))
}

// Tokens are stateless: there is nothing to revoke server-side, the client
// drops its copy. The endpoint exists so clients have a uniform logout call.
pub async fn logout(_auth: Auth) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Logged out successfully"
    })))
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct UserWithPosts {
    #[serde(flatten)]
    pub user: User,
    pub posts: Vec<Post>,
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current user with their posts", body = UserWithPosts),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = data.store.get_user(auth.user_id()).await?;
    let posts = data.store.list_posts_by_user(user.id).await?;
    Ok(ok_json(&UserWithPosts { user, posts }))
}

// ---------------- users ----------------

#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses((status = 200, description = "List users", body = [User]))
)]
pub async fn list_users(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let users = data.store.list_users().await?;
    Ok(listed_json(&users))
}

#[derive(Debug, serde::Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

pub async fn search_users(
    data: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let q = query
        .into_inner()
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| bad_request("Search query required".into()))?;
    let users = data.store.search_users(q.trim(), 10).await?;
    Ok(ok_json(&users))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let user = data.store.get_user(path.into_inner()).await?;
    Ok(ok_json(&user))
}

pub async fn get_user_by_username(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user = data.store.get_user_by_username(&path.into_inner()).await?;
    let posts = data.store.list_posts_by_user(user.id).await?;
    Ok(ok_json(&UserWithPosts { user, posts }))
}

pub async fn users_by_ids(
    data: web::Data<AppState>,
    payload: web::Json<UserIds>,
) -> Result<HttpResponse, ApiError> {
    let users = data.store.get_users_by_ids(&payload.user_ids).await?;
    Ok(ok_json(&users))
}

pub async fn update_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateUser>,
) -> Result<HttpResponse, ApiError> {
    let upd = payload.into_inner();
    validate_update(&upd)?;
    let user = data.store.update_user(auth.user_id(), path.into_inner(), upd).await?;
    Ok(ok_json(&user))
}

fn validate_update(upd: &UpdateUser) -> Result<(), ApiError> {
    if let Some(ref name) = upd.name { validate_name(name).map_err(bad_request)?; }
    if let Some(ref username) = upd.username { validate_username(username).map_err(bad_request)?; }
    if let Some(ref bio) = upd.bio { validate_bio(bio).map_err(bad_request)?; }
    if let Some(ref location) = upd.location { validate_location(location).map_err(bad_request)?; }
    Ok(())
}

const PROFILE_IMAGE_LIMIT: usize = 5 * 1024 * 1024; // 5 MB

const ALLOWED_IMAGE_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Multipart profile update: text fields plus an optional `profileImage`
/// file. A new image replaces the old media asset; deleting the replaced
/// asset is best-effort and never fails the request.
pub async fn update_profile(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    use actix_web::http::StatusCode;
    let id = path.into_inner();
    let mut upd = UpdateUser { name: None, username: None, bio: None, location: None };
    let mut image_bytes: Option<Vec<u8>> = None;

    while let Some(field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        let Some(name) = field.content_disposition().get_name().map(str::to_owned) else {
            continue;
        };
        let mut field_stream = field;
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field_stream.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > PROFILE_IMAGE_LIMIT {
                return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish());
            }
            bytes.extend_from_slice(&chunk);
        }
        match name.as_str() {
            "name" => upd.name = Some(String::from_utf8_lossy(&bytes).into_owned()),
            "username" => upd.username = Some(String::from_utf8_lossy(&bytes).into_owned()),
            "bio" => upd.bio = Some(String::from_utf8_lossy(&bytes).into_owned()),
            "location" => upd.location = Some(String::from_utf8_lossy(&bytes).into_owned()),
            "profileImage" if !bytes.is_empty() => image_bytes = Some(bytes),
            _ => {}
        }
    }

    validate_update(&upd)?;
    let actor = auth.user_id();
    let mut user = data.store.update_user(actor, id, upd).await?;

    if let Some(bytes) = image_bytes {
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        if !ALLOWED_IMAGE_MIME.contains(&mime.as_str()) {
            return Ok(HttpResponse::UnsupportedMediaType().json(serde_json::json!({
                "success": false,
                "message": format!("unsupported image type: {mime}")
            })));
        }
        let asset = data.media.upload(&bytes, &mime).await.map_err(|e| {
            log::error!("media upload failed: {e}");
            ApiError::Internal
        })?;
        let (updated, old_asset) = data
            .store
            .set_profile_image(actor, id, asset.url, Some(asset.asset_id))
            .await?;
        user = updated;
        if let Some(old) = old_asset {
            delete_asset_best_effort(&*data.media, &old).await;
        }
    }

    Ok(ok_json(&user))
}

#[utoipa::path(
    put,
    path = "/api/v1/users/{id}/follow",
    params(("id" = Id, Path, description = "User to follow")),
    responses(
        (status = 200, description = "Followed"),
        (status = 400, description = "Attempted to follow yourself"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Already following")
    )
)]
pub async fn follow_user(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    if !data.rate.allow_follow(&client_ip(&req)) {
        return Err(ApiError::TooManyRequests);
    }
    data.store.follow(auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Followed successfully"
    })))
}

#[utoipa::path(
    put,
    path = "/api/v1/users/{id}/unfollow",
    params(("id" = Id, Path, description = "User to unfollow")),
    responses(
        (status = 200, description = "Unfollowed"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Not following")
    )
)]
pub async fn unfollow_user(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    if !data.rate.allow_follow(&client_ip(&req)) {
        return Err(ApiError::TooManyRequests);
    }
    data.store.unfollow(auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Unfollowed successfully"
    })))
}

pub async fn save_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let saved = data.store.save_post(auth.user_id(), path.into_inner()).await?;
    Ok(ok_json(&saved))
}

pub async fn unsave_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let saved = data.store.unsave_post(auth.user_id(), path.into_inner()).await?;
    Ok(ok_json(&saved))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{identifier}",
    params(("identifier" = String, Path, description = "User id or username")),
    responses(
        (status = 200, description = "Account and all related data deleted"),
        (status = 403, description = "Not the account owner"),
        (status = 404, description = "User not found")
    )
)]
pub async fn delete_account(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let asset = data.store.delete_account(auth.user_id(), &path.into_inner()).await?;
    if let Some(asset_id) = asset {
        delete_asset_best_effort(&*data.media, &asset_id).await;
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "User account and all related data deleted successfully"
    })))
}

// ---------------- posts ----------------

#[utoipa::path(
    get,
    path = "/api/v1/posts",
    responses((status = 200, description = "All posts, newest first", body = [Post]))
)]
pub async fn list_posts(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let posts = data.store.list_posts().await?;
    Ok(ok_json(&posts))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts",
    request_body = NewPost,
    responses(
        (status = 201, description = "Post created", body = Post),
        (status = 400, description = "Content missing"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn create_post(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewPost>,
) -> Result<HttpResponse, ApiError> {
    if !data.rate.allow_post(&client_ip(&req)) {
        return Err(ApiError::TooManyRequests);
    }
    let new = payload.into_inner();
    if new.content.trim().is_empty() {
        return Err(bad_request("Content is required".into()));
    }
    let post = data.store.create_post(auth.user_id(), new).await?;
    Ok(created_json(&post))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post", body = Post),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post = data.store.get_post(path.into_inner()).await?;
    Ok(ok_json(&post))
}

pub async fn posts_by_user(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let posts = data.store.list_posts_by_user(path.into_inner()).await?;
    Ok(ok_json(&posts))
}

pub async fn update_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdatePost>,
) -> Result<HttpResponse, ApiError> {
    let post = data
        .store
        .update_post(auth.user_id(), path.into_inner(), payload.into_inner())
        .await?;
    Ok(ok_json(&post))
}

#[utoipa::path(
    delete,
    path = "/api/v1/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post and its likes/comments deleted"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn delete_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.store.delete_post(auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Post deleted successfully"
    })))
}

// ---------------- comments ----------------

#[utoipa::path(
    get,
    path = "/api/v1/posts/{post_id}/comments",
    params(("post_id" = Id, Path, description = "Post id")),
    responses((status = 200, description = "Top-level comments, newest first", body = [Comment]))
)]
pub async fn list_comments(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let comments = data.store.list_comments(path.into_inner()).await?;
    Ok(listed_json(&comments))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{post_id}/comments",
    request_body = NewComment,
    params(("post_id" = Id, Path, description = "Post id")),
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 404, description = "Post not found")
    )
)]
pub async fn add_comment(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    if !data.rate.allow_comment(&client_ip(&req)) {
        return Err(ApiError::TooManyRequests);
    }
    let new = payload.into_inner();
    if new.body.trim().is_empty() {
        return Err(bad_request("Comment body is required".into()));
    }
    let comment = data
        .store
        .add_comment(auth.user_id(), path.into_inner(), new)
        .await?;
    Ok(created_json(&comment))
}

#[utoipa::path(
    post,
    path = "/api/v1/comments/{comment_id}/replies",
    request_body = NewComment,
    params(("comment_id" = Id, Path, description = "Parent comment id")),
    responses(
        (status = 201, description = "Reply created", body = Comment),
        (status = 404, description = "Parent comment not found")
    )
)]
pub async fn add_reply(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    if !data.rate.allow_comment(&client_ip(&req)) {
        return Err(ApiError::TooManyRequests);
    }
    let new = payload.into_inner();
    if new.body.trim().is_empty() {
        return Err(bad_request("Comment body is required".into()));
    }
    let reply = data
        .store
        .add_reply(auth.user_id(), path.into_inner(), new)
        .await?;
    Ok(created_json(&reply))
}

pub async fn update_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    let body = payload.into_inner().body;
    if body.trim().is_empty() {
        return Err(bad_request("Comment body is required".into()));
    }
    let comment = data
        .store
        .update_comment(auth.user_id(), path.into_inner(), body)
        .await?;
    Ok(ok_json(&comment))
}

#[utoipa::path(
    delete,
    path = "/api/v1/comments/{id}",
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment and its reply subtree deleted"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn delete_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.store.delete_comment(auth.user_id(), path.into_inner()).await?;
    Ok(ok_json(&serde_json::json!({})))
}

// ---------------- likes ----------------

#[utoipa::path(
    post,
    path = "/api/v1/posts/{post_id}/likes",
    params(("post_id" = Id, Path, description = "Post id")),
    responses(
        (status = 201, description = "Post liked", body = Like),
        (status = 404, description = "Post not found"),
        (status = 409, description = "Already liked")
    )
)]
pub async fn like_post(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    if !data.rate.allow_like(&client_ip(&req)) {
        return Err(ApiError::TooManyRequests);
    }
    let like = data.store.like(auth.user_id(), path.into_inner()).await?;
    Ok(created_json(&like))
}

#[utoipa::path(
    delete,
    path = "/api/v1/posts/{post_id}/likes",
    params(("post_id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Like removed"),
        (status = 404, description = "Post not found"),
        (status = 409, description = "Not liked")
    )
)]
pub async fn unlike_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.store.unlike(auth.user_id(), path.into_inner()).await?;
    Ok(ok_json(&serde_json::json!({})))
}

pub async fn check_like(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let liked = data.store.is_liked(auth.user_id(), path.into_inner()).await?;
    Ok(ok_json(&serde_json::json!({ "liked": liked })))
}
