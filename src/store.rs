use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("not found")] NotFound,
    #[error("forbidden")] Forbidden,
    #[error("you can't follow yourself")] SelfReference,
    #[error("already following this user")] AlreadyFollowing,
    #[error("not following this user")] NotFollowing,
    #[error("post already liked")] AlreadyLiked,
    #[error("post not liked")] NotLiked,
    #[error("post already saved")] AlreadySaved,
    #[error("post not saved")] NotSaved,
    #[error("username already taken")] UsernameTaken,
    #[error("mobile number already registered")] MobileTaken,
    #[error("internal error: {0}")] Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

use async_trait::async_trait;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// `new.username` is normalized to lowercase; uniqueness is therefore
    /// case-insensitive. `password_hash` comes pre-hashed from the auth layer.
    async fn create_user(&self, new: NewUser, password_hash: String) -> StoreResult<User>;
    /// Credential material never rides on the `User` document; the login path
    /// fetches it separately.
    async fn password_hash(&self, user_id: Id) -> StoreResult<String>;
    async fn get_user(&self, id: Id) -> StoreResult<User>;
    async fn get_user_by_username(&self, username: &str) -> StoreResult<User>;
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    async fn get_users_by_ids(&self, ids: &[Id]) -> StoreResult<Vec<User>>;
    async fn search_users(&self, query: &str, limit: usize) -> StoreResult<Vec<User>>;
    async fn update_user(&self, actor: Id, id: Id, upd: UpdateUser) -> StoreResult<User>;
    /// Swaps the profile image; returns the updated user plus the asset id of
    /// the replaced image so the caller can best-effort delete it.
    async fn set_profile_image(
        &self,
        actor: Id,
        id: Id,
        url: String,
        asset_id: Option<String>,
    ) -> StoreResult<(User, Option<String>)>;
    async fn follow(&self, actor: Id, target: Id) -> StoreResult<()>;
    async fn unfollow(&self, actor: Id, target: Id) -> StoreResult<()>;
    async fn save_post(&self, actor: Id, post_id: Id) -> StoreResult<Vec<Id>>;
    async fn unsave_post(&self, actor: Id, post_id: Id) -> StoreResult<Vec<Id>>;
    /// Cascading account deletion. `identifier` is a user id or a username.
    /// Returns the profile asset id (if any) for best-effort media cleanup.
    async fn delete_account(&self, actor: Id, identifier: &str) -> StoreResult<Option<String>>;
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn create_post(&self, author: Id, new: NewPost) -> StoreResult<Post>;
    async fn get_post(&self, id: Id) -> StoreResult<Post>;
    async fn list_posts(&self) -> StoreResult<Vec<Post>>;
    async fn list_posts_by_user(&self, user_id: Id) -> StoreResult<Vec<Post>>;
    async fn update_post(&self, actor: Id, id: Id, upd: UpdatePost) -> StoreResult<Post>;
    async fn delete_post(&self, actor: Id, id: Id) -> StoreResult<()>;
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn add_comment(&self, actor: Id, post_id: Id, new: NewComment) -> StoreResult<Comment>;
    async fn add_reply(&self, actor: Id, parent_id: Id, new: NewComment) -> StoreResult<Comment>;
    async fn get_comment(&self, id: Id) -> StoreResult<Comment>;
    async fn list_comments(&self, post_id: Id) -> StoreResult<Vec<Comment>>;
    async fn update_comment(&self, actor: Id, id: Id, body: String) -> StoreResult<Comment>;
    async fn delete_comment(&self, actor: Id, id: Id) -> StoreResult<()>;
}

#[async_trait]
pub trait LikeStore: Send + Sync {
    async fn like(&self, actor: Id, post_id: Id) -> StoreResult<Like>;
    async fn unlike(&self, actor: Id, post_id: Id) -> StoreResult<()>;
    async fn is_liked(&self, actor: Id, post_id: Id) -> StoreResult<bool>;
}

pub trait GraphStore: UserStore + PostStore + CommentStore + LikeStore {}

impl<T> GraphStore for T where T: UserStore + PostStore + CommentStore + LikeStore {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use log::{info, warn};
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        credentials: HashMap<Id, String>, // user id -> password hash
        posts: HashMap<Id, Post>,
        comments: HashMap<Id, Comment>,
        likes: HashMap<Id, Like>,
        next_id: Id,
    }

    /// Document-store backend. All four collections live behind one `RwLock`,
    /// so every mutating operation holds the write lock for its entire
    /// read-modify-write sequence: at most one in-flight mutation exists at a
    /// time and the counter/membership invariants cannot observe interleaving.
    #[derive(Clone)]
    pub struct InMemStore {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemStore {
        fn data_dir() -> PathBuf {
            std::env::var("FLOCK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        fn snapshot_path() -> PathBuf {
            if std::env::var("FLOCK_DATA_DIR").is_ok() {
                let mut p = Self::data_dir();
                p.push("state.json");
                p
            } else {
                PathBuf::from(SNAPSHOT_PATH)
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    warn!("failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }

        /// Detaches `comment_id` from whichever membership array holds it,
        /// then deletes the comment and its whole reply subtree via an
        /// explicit worklist (reply chains can be arbitrarily deep).
        fn remove_comment_tree(state: &mut State, comment_id: Id) {
            let Some(comment) = state.comments.get(&comment_id).cloned() else { return };
            if let Some(parent_id) = comment.parent_comment_id {
                if let Some(parent) = state.comments.get_mut(&parent_id) {
                    parent.reply_ids.retain(|&r| r != comment_id);
                }
            } else if let Some(post) = state.posts.get_mut(&comment.post_id) {
                post.comment_ids.retain(|&c| c != comment_id);
                post.comments_count = post.comment_ids.len() as i64;
            }
            let mut worklist = vec![comment_id];
            while let Some(cid) = worklist.pop() {
                if let Some(c) = state.comments.remove(&cid) {
                    worklist.extend(c.reply_ids);
                }
            }
        }
    }

    impl Default for InMemStore {
        fn default() -> Self { Self::new() }
    }

    #[async_trait]
    impl UserStore for InMemStore {
        async fn create_user(&self, new: NewUser, password_hash: String) -> StoreResult<User> {
            let username = new.username.to_lowercase();
            let mut s = self.state.write().unwrap();
            if s.users.values().any(|u| u.username == username) {
                return Err(StoreError::UsernameTaken);
            }
            if s.users.values().any(|u| u.mobile_no == new.mobile_no) {
                return Err(StoreError::MobileTaken);
            }
            let id = Self::next_id(&mut s);
            let user = User {
                id,
                name: new.name,
                username,
                bio: None,
                mobile_no: new.mobile_no,
                location: None,
                followers: Vec::new(),
                following: Vec::new(),
                saved_posts: Vec::new(),
                profile_image: DEFAULT_AVATAR_URL.to_string(),
                profile_asset_id: None,
                created_at: Utc::now(),
            };
            s.users.insert(id, user.clone());
            s.credentials.insert(id, password_hash);
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn password_hash(&self, user_id: Id) -> StoreResult<String> {
            let s = self.state.read().unwrap();
            s.credentials.get(&user_id).cloned().ok_or(StoreError::NotFound)
        }

        async fn get_user(&self, id: Id) -> StoreResult<User> {
            let s = self.state.read().unwrap();
            s.users.get(&id).cloned().ok_or(StoreError::NotFound)
        }

        async fn get_user_by_username(&self, username: &str) -> StoreResult<User> {
            let username = username.to_lowercase();
            let s = self.state.read().unwrap();
            s.users
                .values()
                .find(|u| u.username == username)
                .cloned()
                .ok_or(StoreError::NotFound)
        }

        async fn list_users(&self) -> StoreResult<Vec<User>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.users.values().cloned().collect();
            v.sort_by_key(|u| u.id);
            Ok(v)
        }

        async fn get_users_by_ids(&self, ids: &[Id]) -> StoreResult<Vec<User>> {
            let s = self.state.read().unwrap();
            Ok(ids.iter().filter_map(|id| s.users.get(id).cloned()).collect())
        }

        async fn search_users(&self, query: &str, limit: usize) -> StoreResult<Vec<User>> {
            let q = query.to_lowercase();
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .users
                .values()
                .filter(|u| u.username.contains(&q) || u.name.to_lowercase().contains(&q))
                .cloned()
                .collect();
            v.sort_by_key(|u| u.id);
            v.truncate(limit);
            Ok(v)
        }

        async fn update_user(&self, actor: Id, id: Id, upd: UpdateUser) -> StoreResult<User> {
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(&id) {
                return Err(StoreError::NotFound);
            }
            if actor != id {
                return Err(StoreError::Forbidden);
            }
            // uniqueness check before taking the mutable borrow
            if let Some(ref username) = upd.username {
                let username = username.to_lowercase();
                if s.users.values().any(|u| u.username == username && u.id != id) {
                    return Err(StoreError::UsernameTaken);
                }
            }
            let user = s.users.get_mut(&id).ok_or(StoreError::NotFound)?;
            if let Some(name) = upd.name { user.name = name; }
            if let Some(username) = upd.username { user.username = username.to_lowercase(); }
            if let Some(bio) = upd.bio { user.bio = Some(bio); }
            if let Some(location) = upd.location { user.location = Some(location); }
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn set_profile_image(
            &self,
            actor: Id,
            id: Id,
            url: String,
            asset_id: Option<String>,
        ) -> StoreResult<(User, Option<String>)> {
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(&id) {
                return Err(StoreError::NotFound);
            }
            if actor != id {
                return Err(StoreError::Forbidden);
            }
            let user = s.users.get_mut(&id).ok_or(StoreError::NotFound)?;
            let old_asset = user.profile_asset_id.take();
            user.profile_image = url;
            user.profile_asset_id = asset_id;
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok((updated, old_asset))
        }

        async fn follow(&self, actor: Id, target: Id) -> StoreResult<()> {
            if actor == target {
                return Err(StoreError::SelfReference);
            }
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(&actor) || !s.users.contains_key(&target) {
                return Err(StoreError::NotFound);
            }
            if s.users[&actor].following.contains(&target) {
                return Err(StoreError::AlreadyFollowing);
            }
            // both sides mutate under the same write lock; membership stays symmetric
            if let Some(u) = s.users.get_mut(&actor) { u.following.push(target); }
            if let Some(u) = s.users.get_mut(&target) { u.followers.push(actor); }
            drop(s);
            self.persist();
            Ok(())
        }

        async fn unfollow(&self, actor: Id, target: Id) -> StoreResult<()> {
            if actor == target {
                return Err(StoreError::SelfReference);
            }
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(&actor) || !s.users.contains_key(&target) {
                return Err(StoreError::NotFound);
            }
            if !s.users[&actor].following.contains(&target) {
                return Err(StoreError::NotFollowing);
            }
            if let Some(u) = s.users.get_mut(&actor) { u.following.retain(|&x| x != target); }
            if let Some(u) = s.users.get_mut(&target) { u.followers.retain(|&x| x != actor); }
            drop(s);
            self.persist();
            Ok(())
        }

        async fn save_post(&self, actor: Id, post_id: Id) -> StoreResult<Vec<Id>> {
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&post_id) {
                return Err(StoreError::NotFound);
            }
            let user = s.users.get_mut(&actor).ok_or(StoreError::NotFound)?;
            if user.saved_posts.contains(&post_id) {
                return Err(StoreError::AlreadySaved);
            }
            user.saved_posts.insert(0, post_id);
            let saved = user.saved_posts.clone();
            drop(s);
            self.persist();
            Ok(saved)
        }

        async fn unsave_post(&self, actor: Id, post_id: Id) -> StoreResult<Vec<Id>> {
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&post_id) {
                return Err(StoreError::NotFound);
            }
            let user = s.users.get_mut(&actor).ok_or(StoreError::NotFound)?;
            if !user.saved_posts.contains(&post_id) {
                return Err(StoreError::NotSaved);
            }
            user.saved_posts.retain(|&p| p != post_id);
            let saved = user.saved_posts.clone();
            drop(s);
            self.persist();
            Ok(saved)
        }

        async fn delete_account(&self, actor: Id, identifier: &str) -> StoreResult<Option<String>> {
            let mut s = self.state.write().unwrap();
            let uid = match identifier.parse::<Id>() {
                Ok(id) if s.users.contains_key(&id) => id,
                _ => {
                    let username = identifier.to_lowercase();
                    s.users
                        .values()
                        .find(|u| u.username == username)
                        .map(|u| u.id)
                        .ok_or(StoreError::NotFound)?
                }
            };
            if uid != actor {
                return Err(StoreError::Forbidden);
            }

            // Cascade order mirrors the account-deletion contract: first
            // everything hanging off the user's own posts, then the user's
            // contributions elsewhere, then graph membership, then the user.
            let own_posts: Vec<Id> = s
                .posts
                .values()
                .filter(|p| p.author_id == uid)
                .map(|p| p.id)
                .collect();
            s.likes.retain(|_, l| !own_posts.contains(&l.post_id));
            s.comments.retain(|_, c| !own_posts.contains(&c.post_id));
            s.posts.retain(|_, p| p.author_id != uid);

            // likes the user placed on other people's posts, with recounts
            let authored_likes: Vec<(Id, Id)> = s
                .likes
                .values()
                .filter(|l| l.user_id == uid)
                .map(|l| (l.id, l.post_id))
                .collect();
            for (like_id, post_id) in authored_likes {
                s.likes.remove(&like_id);
                if let Some(p) = s.posts.get_mut(&post_id) {
                    p.like_ids.retain(|&x| x != like_id);
                    p.likes_count = p.like_ids.len() as i64;
                }
            }

            // comments the user wrote on other people's posts: each subtree
            // goes, and the containing membership array is cleaned
            let authored_comments: Vec<Id> = s
                .comments
                .values()
                .filter(|c| c.author_id == uid)
                .map(|c| c.id)
                .collect();
            for comment_id in authored_comments {
                Self::remove_comment_tree(&mut s, comment_id);
            }

            for u in s.users.values_mut() {
                u.followers.retain(|&x| x != uid);
                u.following.retain(|&x| x != uid);
                u.saved_posts.retain(|&p| !own_posts.contains(&p));
            }

            s.credentials.remove(&uid);
            let removed = s.users.remove(&uid);
            drop(s);
            self.persist();
            Ok(removed.and_then(|u| u.profile_asset_id))
        }
    }

    #[async_trait]
    impl PostStore for InMemStore {
        async fn create_post(&self, author: Id, new: NewPost) -> StoreResult<Post> {
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(&author) {
                return Err(StoreError::NotFound);
            }
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let post = Post {
                id,
                author_id: author,
                content: new.content,
                image: new.image,
                like_ids: Vec::new(),
                likes_count: 0,
                comment_ids: Vec::new(),
                comments_count: 0,
                created_at: now,
                updated_at: now,
            };
            s.posts.insert(id, post.clone());
            drop(s);
            self.persist();
            Ok(post)
        }

        async fn get_post(&self, id: Id) -> StoreResult<Post> {
            let s = self.state.read().unwrap();
            s.posts.get(&id).cloned().ok_or(StoreError::NotFound)
        }

        async fn list_posts(&self) -> StoreResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.posts.values().cloned().collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }

        async fn list_posts_by_user(&self, user_id: Id) -> StoreResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .posts
                .values()
                .filter(|p| p.author_id == user_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }

        async fn update_post(&self, actor: Id, id: Id, upd: UpdatePost) -> StoreResult<Post> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(&id).ok_or(StoreError::NotFound)?;
            if post.author_id != actor {
                return Err(StoreError::Forbidden);
            }
            if let Some(content) = upd.content { post.content = content; }
            post.updated_at = Utc::now();
            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_post(&self, actor: Id, id: Id) -> StoreResult<()> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.get(&id).ok_or(StoreError::NotFound)?;
            if post.author_id != actor {
                return Err(StoreError::Forbidden);
            }
            // likes and comments exist only to reference the post; saved_posts
            // membership must not dangle either
            s.likes.retain(|_, l| l.post_id != id);
            s.comments.retain(|_, c| c.post_id != id);
            for u in s.users.values_mut() {
                u.saved_posts.retain(|&p| p != id);
            }
            s.posts.remove(&id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl CommentStore for InMemStore {
        async fn add_comment(&self, actor: Id, post_id: Id, new: NewComment) -> StoreResult<Comment> {
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&post_id) {
                return Err(StoreError::NotFound);
            }
            let id = Self::next_id(&mut s);
            let comment = Comment {
                id,
                post_id,
                author_id: actor,
                body: new.body,
                parent_comment_id: None,
                reply_ids: Vec::new(),
                created_at: Utc::now(),
            };
            s.comments.insert(id, comment.clone());
            if let Some(post) = s.posts.get_mut(&post_id) {
                post.comment_ids.insert(0, id);
                post.comments_count = post.comment_ids.len() as i64;
            }
            drop(s);
            self.persist();
            Ok(comment)
        }

        async fn add_reply(&self, actor: Id, parent_id: Id, new: NewComment) -> StoreResult<Comment> {
            let mut s = self.state.write().unwrap();
            let post_id = s
                .comments
                .get(&parent_id)
                .map(|c| c.post_id)
                .ok_or(StoreError::NotFound)?;
            let id = Self::next_id(&mut s);
            let reply = Comment {
                id,
                post_id, // a reply lives on its parent's post
                author_id: actor,
                body: new.body,
                parent_comment_id: Some(parent_id),
                reply_ids: Vec::new(),
                created_at: Utc::now(),
            };
            s.comments.insert(id, reply.clone());
            if let Some(parent) = s.comments.get_mut(&parent_id) {
                parent.reply_ids.insert(0, id);
            }
            // replies deliberately do not touch the post's comments_count
            drop(s);
            self.persist();
            Ok(reply)
        }

        async fn get_comment(&self, id: Id) -> StoreResult<Comment> {
            let s = self.state.read().unwrap();
            s.comments.get(&id).cloned().ok_or(StoreError::NotFound)
        }

        async fn list_comments(&self, post_id: Id) -> StoreResult<Vec<Comment>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .comments
                .values()
                .filter(|c| c.post_id == post_id && c.parent_comment_id.is_none())
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }

        async fn update_comment(&self, actor: Id, id: Id, body: String) -> StoreResult<Comment> {
            let mut s = self.state.write().unwrap();
            let comment = s.comments.get_mut(&id).ok_or(StoreError::NotFound)?;
            if comment.author_id != actor {
                return Err(StoreError::Forbidden);
            }
            comment.body = body;
            let updated = comment.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_comment(&self, actor: Id, id: Id) -> StoreResult<()> {
            let mut s = self.state.write().unwrap();
            let comment = s.comments.get(&id).ok_or(StoreError::NotFound)?;
            if comment.author_id != actor {
                return Err(StoreError::Forbidden);
            }
            Self::remove_comment_tree(&mut s, id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl LikeStore for InMemStore {
        async fn like(&self, actor: Id, post_id: Id) -> StoreResult<Like> {
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&post_id) {
                return Err(StoreError::NotFound);
            }
            if s.likes.values().any(|l| l.user_id == actor && l.post_id == post_id) {
                return Err(StoreError::AlreadyLiked);
            }
            let id = Self::next_id(&mut s);
            let like = Like { id, user_id: actor, post_id, created_at: Utc::now() };
            s.likes.insert(id, like.clone());
            if let Some(post) = s.posts.get_mut(&post_id) {
                post.like_ids.insert(0, id);
                post.likes_count = post.like_ids.len() as i64;
            }
            drop(s);
            self.persist();
            Ok(like)
        }

        async fn unlike(&self, actor: Id, post_id: Id) -> StoreResult<()> {
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&post_id) {
                return Err(StoreError::NotFound);
            }
            let like_id = s
                .likes
                .values()
                .find(|l| l.user_id == actor && l.post_id == post_id)
                .map(|l| l.id)
                .ok_or(StoreError::NotLiked)?;
            // membership first, record second; both under the same lock so the
            // array can never hold a dangling like id
            if let Some(post) = s.posts.get_mut(&post_id) {
                post.like_ids.retain(|&x| x != like_id);
                post.likes_count = post.like_ids.len() as i64;
            }
            s.likes.remove(&like_id);
            drop(s);
            self.persist();
            Ok(())
        }

        async fn is_liked(&self, actor: Id, post_id: Id) -> StoreResult<bool> {
            let s = self.state.read().unwrap();
            Ok(s.likes.values().any(|l| l.user_id == actor && l.post_id == post_id))
        }
    }
}

// Postgres implementation (feature = "postgres-store").
//
// Relationships are stored as single-source-of-truth edge rows
// (follows, likes, saved_posts) with uniqueness enforced by the database;
// membership arrays and counters are derived in the SELECTs, so they cannot
// diverge from their backing rows. Cascades ride the foreign keys.
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    const USER_COLUMNS: &str = r#"
        u.id, u.name, u.username, u.bio, u.mobile_no, u.location,
        array(SELECT f.follower_id FROM follows f WHERE f.followee_id = u.id ORDER BY f.created_at) AS followers,
        array(SELECT f.followee_id FROM follows f WHERE f.follower_id = u.id ORDER BY f.created_at) AS following,
        array(SELECT sp.post_id FROM saved_posts sp WHERE sp.user_id = u.id ORDER BY sp.saved_at DESC) AS saved_posts,
        u.profile_image, u.profile_asset_id, u.created_at
    "#;

    const POST_COLUMNS: &str = r#"
        p.id, p.author_id, p.content, p.image,
        array(SELECT l.id FROM likes l WHERE l.post_id = p.id ORDER BY l.created_at DESC) AS like_ids,
        (SELECT count(*) FROM likes l WHERE l.post_id = p.id) AS likes_count,
        array(SELECT c.id FROM comments c WHERE c.post_id = p.id AND c.parent_comment_id IS NULL ORDER BY c.created_at DESC) AS comment_ids,
        (SELECT count(*) FROM comments c WHERE c.post_id = p.id AND c.parent_comment_id IS NULL) AS comments_count,
        p.created_at, p.updated_at
    "#;

    const COMMENT_COLUMNS: &str = r#"
        c.id, c.post_id, c.author_id, c.body, c.parent_comment_id,
        array(SELECT r.id FROM comments r WHERE r.parent_comment_id = c.id ORDER BY r.created_at DESC) AS reply_ids,
        c.created_at
    "#;

    #[derive(Clone)]
    pub struct PgStore { pool: Pool<Postgres> }

    fn internal(e: sqlx::Error) -> StoreError {
        StoreError::Internal(e.to_string())
    }

    fn is_unique_violation(e: &sqlx::Error) -> bool {
        matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
    }

    impl PgStore {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        async fn fetch_user(&self, id: Id) -> StoreResult<User> {
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(StoreError::NotFound)
        }

        async fn user_exists(&self, id: Id) -> StoreResult<bool> {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(internal)
        }

        async fn post_exists(&self, id: Id) -> StoreResult<bool> {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM posts WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(internal)
        }

        async fn saved_posts_of(&self, user_id: Id) -> StoreResult<Vec<Id>> {
            sqlx::query_scalar::<_, Id>(
                "SELECT post_id FROM saved_posts WHERE user_id = $1 ORDER BY saved_at DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }
    }

    #[async_trait]
    impl UserStore for PgStore {
        async fn create_user(&self, new: NewUser, password_hash: String) -> StoreResult<User> {
            let username = new.username.to_lowercase();
            // uniqueness rides the unique constraints; the violated constraint
            // tells us which conflict to report
            let rec = sqlx::query_scalar::<_, Id>(
                r#"INSERT INTO users (name, username, mobile_no, password_hash, profile_image)
                   VALUES ($1, $2, $3, $4, $5) RETURNING id"#,
            )
            .bind(&new.name)
            .bind(&username)
            .bind(&new.mobile_no)
            .bind(&password_hash)
            .bind(DEFAULT_AVATAR_URL)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.constraint() == Some("users_username_key") => {
                    StoreError::UsernameTaken
                }
                sqlx::Error::Database(db) if db.constraint() == Some("users_mobile_no_key") => {
                    StoreError::MobileTaken
                }
                _ => internal(e),
            })?;
            self.fetch_user(rec).await
        }

        async fn password_hash(&self, user_id: Id) -> StoreResult<String> {
            sqlx::query_scalar::<_, String>("SELECT password_hash FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(StoreError::NotFound)
        }

        async fn get_user(&self, id: Id) -> StoreResult<User> {
            self.fetch_user(id).await
        }

        async fn get_user_by_username(&self, username: &str) -> StoreResult<User> {
            sqlx::query_as::<_, User>(&format!(
                "SELECT {USER_COLUMNS} FROM users u WHERE u.username = $1"
            ))
            .bind(username.to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(StoreError::NotFound)
        }

        async fn list_users(&self) -> StoreResult<Vec<User>> {
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users u ORDER BY u.id"))
                .fetch_all(&self.pool)
                .await
                .map_err(internal)
        }

        async fn get_users_by_ids(&self, ids: &[Id]) -> StoreResult<Vec<User>> {
            sqlx::query_as::<_, User>(&format!(
                "SELECT {USER_COLUMNS} FROM users u WHERE u.id = ANY($1) ORDER BY u.id"
            ))
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }

        async fn search_users(&self, query: &str, limit: usize) -> StoreResult<Vec<User>> {
            let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
            sqlx::query_as::<_, User>(&format!(
                r#"SELECT {USER_COLUMNS} FROM users u
                   WHERE u.username ILIKE $1 OR u.name ILIKE $1
                   ORDER BY u.id LIMIT $2"#
            ))
            .bind(pattern)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }

        async fn update_user(&self, actor: Id, id: Id, upd: UpdateUser) -> StoreResult<User> {
            if !self.user_exists(id).await? {
                return Err(StoreError::NotFound);
            }
            if actor != id {
                return Err(StoreError::Forbidden);
            }
            let username = upd.username.map(|u| u.to_lowercase());
            sqlx::query(
                r#"UPDATE users SET
                     name = COALESCE($2, name),
                     username = COALESCE($3, username),
                     bio = COALESCE($4, bio),
                     location = COALESCE($5, location)
                   WHERE id = $1"#,
            )
            .bind(id)
            .bind(upd.name)
            .bind(username)
            .bind(upd.bio)
            .bind(upd.location)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) { StoreError::UsernameTaken } else { internal(e) }
            })?;
            self.fetch_user(id).await
        }

        async fn set_profile_image(
            &self,
            actor: Id,
            id: Id,
            url: String,
            asset_id: Option<String>,
        ) -> StoreResult<(User, Option<String>)> {
            if !self.user_exists(id).await? {
                return Err(StoreError::NotFound);
            }
            if actor != id {
                return Err(StoreError::Forbidden);
            }
            let old_asset = sqlx::query_scalar::<_, Option<String>>(
                "SELECT profile_asset_id FROM users WHERE id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            sqlx::query("UPDATE users SET profile_image = $2, profile_asset_id = $3 WHERE id = $1")
                .bind(id)
                .bind(&url)
                .bind(&asset_id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            Ok((self.fetch_user(id).await?, old_asset))
        }

        async fn follow(&self, actor: Id, target: Id) -> StoreResult<()> {
            if actor == target {
                return Err(StoreError::SelfReference);
            }
            if !self.user_exists(actor).await? || !self.user_exists(target).await? {
                return Err(StoreError::NotFound);
            }
            // single edge row is the one source of truth for both sides
            let res = sqlx::query(
                "INSERT INTO follows (follower_id, followee_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(actor)
            .bind(target)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(StoreError::AlreadyFollowing);
            }
            Ok(())
        }

        async fn unfollow(&self, actor: Id, target: Id) -> StoreResult<()> {
            if actor == target {
                return Err(StoreError::SelfReference);
            }
            if !self.user_exists(actor).await? || !self.user_exists(target).await? {
                return Err(StoreError::NotFound);
            }
            let res = sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND followee_id = $2")
                .bind(actor)
                .bind(target)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(StoreError::NotFollowing);
            }
            Ok(())
        }

        async fn save_post(&self, actor: Id, post_id: Id) -> StoreResult<Vec<Id>> {
            if !self.post_exists(post_id).await? {
                return Err(StoreError::NotFound);
            }
            let res = sqlx::query(
                "INSERT INTO saved_posts (user_id, post_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(actor)
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(StoreError::AlreadySaved);
            }
            self.saved_posts_of(actor).await
        }

        async fn unsave_post(&self, actor: Id, post_id: Id) -> StoreResult<Vec<Id>> {
            if !self.post_exists(post_id).await? {
                return Err(StoreError::NotFound);
            }
            let res = sqlx::query("DELETE FROM saved_posts WHERE user_id = $1 AND post_id = $2")
                .bind(actor)
                .bind(post_id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(StoreError::NotSaved);
            }
            self.saved_posts_of(actor).await
        }

        async fn delete_account(&self, actor: Id, identifier: &str) -> StoreResult<Option<String>> {
            let user = match identifier.parse::<Id>() {
                Ok(id) => match self.fetch_user(id).await {
                    Ok(u) => u,
                    Err(StoreError::NotFound) => self.get_user_by_username(identifier).await?,
                    Err(e) => return Err(e),
                },
                Err(_) => self.get_user_by_username(identifier).await?,
            };
            if user.id != actor {
                return Err(StoreError::Forbidden);
            }
            // every dependent row hangs off users/posts foreign keys; one
            // delete cascades posts, likes, comments, follows and saved_posts
            sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(user.id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            Ok(user.profile_asset_id)
        }
    }

    #[async_trait]
    impl PostStore for PgStore {
        async fn create_post(&self, author: Id, new: NewPost) -> StoreResult<Post> {
            let id = sqlx::query_scalar::<_, Id>(
                "INSERT INTO posts (author_id, content, image) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(author)
            .bind(&new.content)
            .bind(&new.image)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            self.get_post(id).await
        }

        async fn get_post(&self, id: Id) -> StoreResult<Post> {
            sqlx::query_as::<_, Post>(&format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(StoreError::NotFound)
        }

        async fn list_posts(&self) -> StoreResult<Vec<Post>> {
            sqlx::query_as::<_, Post>(&format!(
                "SELECT {POST_COLUMNS} FROM posts p ORDER BY p.created_at DESC"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }

        async fn list_posts_by_user(&self, user_id: Id) -> StoreResult<Vec<Post>> {
            sqlx::query_as::<_, Post>(&format!(
                "SELECT {POST_COLUMNS} FROM posts p WHERE p.author_id = $1 ORDER BY p.created_at DESC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }

        async fn update_post(&self, actor: Id, id: Id, upd: UpdatePost) -> StoreResult<Post> {
            let author: Id = sqlx::query_scalar::<_, Id>("SELECT author_id FROM posts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(StoreError::NotFound)?;
            if author != actor {
                return Err(StoreError::Forbidden);
            }
            sqlx::query("UPDATE posts SET content = COALESCE($2, content), updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(upd.content)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            self.get_post(id).await
        }

        async fn delete_post(&self, actor: Id, id: Id) -> StoreResult<()> {
            let author: Id = sqlx::query_scalar::<_, Id>("SELECT author_id FROM posts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(StoreError::NotFound)?;
            if author != actor {
                return Err(StoreError::Forbidden);
            }
            sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            Ok(())
        }
    }

    #[async_trait]
    impl CommentStore for PgStore {
        async fn add_comment(&self, actor: Id, post_id: Id, new: NewComment) -> StoreResult<Comment> {
            if !self.post_exists(post_id).await? {
                return Err(StoreError::NotFound);
            }
            let id = sqlx::query_scalar::<_, Id>(
                "INSERT INTO comments (post_id, author_id, body) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(post_id)
            .bind(actor)
            .bind(&new.body)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            self.get_comment(id).await
        }

        async fn add_reply(&self, actor: Id, parent_id: Id, new: NewComment) -> StoreResult<Comment> {
            let post_id: Id = sqlx::query_scalar::<_, Id>("SELECT post_id FROM comments WHERE id = $1")
                .bind(parent_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(StoreError::NotFound)?;
            let id = sqlx::query_scalar::<_, Id>(
                r#"INSERT INTO comments (post_id, author_id, body, parent_comment_id)
                   VALUES ($1, $2, $3, $4) RETURNING id"#,
            )
            .bind(post_id)
            .bind(actor)
            .bind(&new.body)
            .bind(parent_id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            self.get_comment(id).await
        }

        async fn get_comment(&self, id: Id) -> StoreResult<Comment> {
            sqlx::query_as::<_, Comment>(&format!(
                "SELECT {COMMENT_COLUMNS} FROM comments c WHERE c.id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(StoreError::NotFound)
        }

        async fn list_comments(&self, post_id: Id) -> StoreResult<Vec<Comment>> {
            sqlx::query_as::<_, Comment>(&format!(
                r#"SELECT {COMMENT_COLUMNS} FROM comments c
                   WHERE c.post_id = $1 AND c.parent_comment_id IS NULL
                   ORDER BY c.created_at DESC"#
            ))
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }

        async fn update_comment(&self, actor: Id, id: Id, body: String) -> StoreResult<Comment> {
            let author: Id = sqlx::query_scalar::<_, Id>("SELECT author_id FROM comments WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(StoreError::NotFound)?;
            if author != actor {
                return Err(StoreError::Forbidden);
            }
            sqlx::query("UPDATE comments SET body = $2 WHERE id = $1")
                .bind(id)
                .bind(body)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            self.get_comment(id).await
        }

        async fn delete_comment(&self, actor: Id, id: Id) -> StoreResult<()> {
            let author: Id = sqlx::query_scalar::<_, Id>("SELECT author_id FROM comments WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(StoreError::NotFound)?;
            if author != actor {
                return Err(StoreError::Forbidden);
            }
            // parent_comment_id is ON DELETE CASCADE: the reply subtree goes
            // with the root in one statement
            sqlx::query("DELETE FROM comments WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            Ok(())
        }
    }

    #[async_trait]
    impl LikeStore for PgStore {
        async fn like(&self, actor: Id, post_id: Id) -> StoreResult<Like> {
            if !self.post_exists(post_id).await? {
                return Err(StoreError::NotFound);
            }
            sqlx::query_as::<_, Like>(
                r#"INSERT INTO likes (user_id, post_id) VALUES ($1, $2)
                   ON CONFLICT DO NOTHING
                   RETURNING id, user_id, post_id, created_at"#,
            )
            .bind(actor)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(StoreError::AlreadyLiked)
        }

        async fn unlike(&self, actor: Id, post_id: Id) -> StoreResult<()> {
            if !self.post_exists(post_id).await? {
                return Err(StoreError::NotFound);
            }
            let res = sqlx::query("DELETE FROM likes WHERE user_id = $1 AND post_id = $2")
                .bind(actor)
                .bind(post_id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(StoreError::NotLiked);
            }
            Ok(())
        }

        async fn is_liked(&self, actor: Id, post_id: Id) -> StoreResult<bool> {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM likes WHERE user_id = $1 AND post_id = $2)",
            )
            .bind(actor)
            .bind(post_id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)
        }
    }
}
