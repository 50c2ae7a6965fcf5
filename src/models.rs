use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

pub const DEFAULT_AVATAR_URL: &str = "https://i.pinimg.com/236x/2c/47/d5/2c47d5dd5b532f83bb55c4cd6f5bd1ef.jpg";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub id: Id,
    pub name: String,
    pub username: String,
    pub bio: Option<String>,
    pub mobile_no: String,
    pub location: Option<String>,
    pub followers: Vec<Id>,
    pub following: Vec<Id>,
    pub saved_posts: Vec<Id>, // newest first
    pub profile_image: String,
    pub profile_asset_id: Option<String>, // media-host asset backing profile_image
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    pub name: String,
    pub username: String,
    pub password: String,
    pub mobile_no: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub author_id: Id,
    pub content: String,
    pub image: Option<String>,
    pub like_ids: Vec<Id>,    // newest first
    pub likes_count: i64,     // always == like_ids.len()
    pub comment_ids: Vec<Id>, // top-level comments only, newest first
    pub comments_count: i64,  // always == comment_ids.len()
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    pub content: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdatePost {
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub post_id: Id,
    pub author_id: Id,
    pub body: String,
    pub parent_comment_id: Option<Id>,
    pub reply_ids: Vec<Id>, // newest first
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Like {
    pub id: Id,
    pub user_id: Id,
    pub post_id: Id,
    pub created_at: DateTime<Utc>,
}

/// Body for the bulk user lookup endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserIds {
    pub user_ids: Vec<Id>,
}

// ---------------- input validation ----------------

pub fn validate_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("name is required".into());
    }
    if name.chars().count() > 50 {
        return Err("name must be less than 50 characters".into());
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), String> {
    let len = username.chars().count();
    if len < 3 {
        return Err("username must be at least 3 characters".into());
    }
    if len > 20 {
        return Err("username must be less than 20 characters".into());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < 6 {
        return Err("password must be at least 6 characters".into());
    }
    Ok(())
}

pub fn validate_bio(bio: &str) -> Result<(), String> {
    if bio.chars().count() > 160 {
        return Err("bio must be less than 160 characters".into());
    }
    Ok(())
}

pub fn validate_location(location: &str) -> Result<(), String> {
    if location.chars().count() > 100 {
        return Err("location must be less than 100 characters".into());
    }
    Ok(())
}

/// International phone number: optional '+', leading digit 1-9, 2..=15 digits total.
pub fn validate_mobile(mobile: &str) -> Result<(), String> {
    let digits = mobile.strip_prefix('+').unwrap_or(mobile);
    let valid = digits.len() >= 2
        && digits.len() <= 15
        && digits.starts_with(|c: char| ('1'..='9').contains(&c))
        && digits.chars().all(|c| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(format!("{mobile} is not a valid mobile number"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobile_validation() {
        assert!(validate_mobile("+14155550132").is_ok());
        assert!(validate_mobile("4915123456789").is_ok());
        assert!(validate_mobile("+0123").is_err()); // leading zero
        assert!(validate_mobile("1").is_err()); // too short
        assert!(validate_mobile("+1415555abc").is_err());
    }

    #[test]
    fn username_bounds() {
        assert!(validate_username("ab").is_err());
        assert!(validate_username("abc").is_ok());
        assert!(validate_username(&"x".repeat(21)).is_err());
    }
}
