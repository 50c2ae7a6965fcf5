#![cfg(feature = "inmem-store")]

use flock::models::{Id, NewComment, NewPost, NewUser, User};
use flock::store::{inmem::InMemStore, StoreError};
use flock::store::{CommentStore, LikeStore, PostStore, UserStore};

fn store() -> InMemStore {
    std::env::set_var("FLOCK_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemStore::new()
}

async fn user(s: &InMemStore, username: &str, mobile: &str) -> User {
    s.create_user(
        NewUser {
            name: username.to_string(),
            username: username.to_string(),
            password: "secret1".into(),
            mobile_no: mobile.into(),
        },
        "hash".into(),
    )
    .await
    .unwrap()
}

/// Scans every surviving document for references to the deleted user and
/// their posts. This is the §-account-deletion acceptance check: expect zero.
async fn assert_no_references(s: &InMemStore, user_id: Id, post_ids: &[Id]) {
    for u in s.list_users().await.unwrap() {
        assert!(!u.followers.contains(&user_id), "dangling follower on {}", u.username);
        assert!(!u.following.contains(&user_id), "dangling following on {}", u.username);
        for pid in post_ids {
            assert!(!u.saved_posts.contains(pid), "dangling saved post on {}", u.username);
        }
    }
    for p in s.list_posts().await.unwrap() {
        assert_ne!(p.author_id, user_id, "post by deleted user survived");
        for c in s.list_comments(p.id).await.unwrap() {
            assert_ne!(c.author_id, user_id, "comment by deleted user survived");
        }
    }
    for pid in post_ids {
        assert!(matches!(s.get_post(*pid).await, Err(StoreError::NotFound)));
    }
}

#[tokio::test]
async fn account_deletion_cascades_everywhere() {
    let s = store();
    let alice = user(&s, "alice", "+14155550100").await;
    let bob = user(&s, "bob", "+14155550101").await;
    let carol = user(&s, "carol", "+14155550102").await;

    // graph edges in both directions
    s.follow(alice.id, bob.id).await.unwrap();
    s.follow(carol.id, alice.id).await.unwrap();

    // alice's post, liked and commented on by others, saved by carol
    let alices_post = s
        .create_post(alice.id, NewPost { content: "mine".into(), image: None })
        .await
        .unwrap();
    s.like(bob.id, alices_post.id).await.unwrap();
    s.add_comment(carol.id, alices_post.id, NewComment { body: "nice".into() })
        .await
        .unwrap();
    s.save_post(carol.id, alices_post.id).await.unwrap();

    // alice's activity on bob's post: a like, a comment, and a reply under
    // carol's comment
    let bobs_post = s
        .create_post(bob.id, NewPost { content: "bob's".into(), image: None })
        .await
        .unwrap();
    s.like(alice.id, bobs_post.id).await.unwrap();
    let alices_comment = s
        .add_comment(alice.id, bobs_post.id, NewComment { body: "hi".into() })
        .await
        .unwrap();
    let carols_comment = s
        .add_comment(carol.id, bobs_post.id, NewComment { body: "hey".into() })
        .await
        .unwrap();
    let alices_reply = s
        .add_reply(alice.id, carols_comment.id, NewComment { body: "re".into() })
        .await
        .unwrap();

    // only the owner may delete the account
    let err = s.delete_account(bob.id, "alice").await.unwrap_err();
    assert!(matches!(err, StoreError::Forbidden));

    s.delete_account(alice.id, "alice").await.unwrap();

    assert!(matches!(s.get_user(alice.id).await, Err(StoreError::NotFound)));
    assert_no_references(&s, alice.id, &[alices_post.id]).await;

    // bob's post survives with clean membership and counters
    let p = s.get_post(bobs_post.id).await.unwrap();
    assert_eq!(p.likes_count, 0);
    assert!(p.like_ids.is_empty());
    assert!(!p.comment_ids.contains(&alices_comment.id));
    assert_eq!(p.comments_count, p.comment_ids.len() as i64);
    assert!(matches!(s.get_comment(alices_comment.id).await, Err(StoreError::NotFound)));
    assert!(matches!(s.get_comment(alices_reply.id).await, Err(StoreError::NotFound)));

    // carol's comment survives but no longer references the deleted reply
    let c = s.get_comment(carols_comment.id).await.unwrap();
    assert!(c.reply_ids.is_empty());

    // the follow graph on the survivors is intact and consistent
    let b = s.get_user(bob.id).await.unwrap();
    let c = s.get_user(carol.id).await.unwrap();
    assert!(b.followers.is_empty());
    assert!(c.following.is_empty());
}

#[tokio::test]
async fn account_deletion_resolves_identifier_by_id_or_username() {
    let s = store();
    let alice = user(&s, "alice", "+14155550100").await;
    let bob = user(&s, "bob", "+14155550101").await;

    // by numeric id
    s.delete_account(alice.id, &alice.id.to_string()).await.unwrap();
    assert!(matches!(s.get_user(alice.id).await, Err(StoreError::NotFound)));

    // by username
    s.delete_account(bob.id, "bob").await.unwrap();
    assert!(matches!(s.get_user(bob.id).await, Err(StoreError::NotFound)));

    let err = s.delete_account(bob.id, "nobody").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

#[tokio::test]
async fn account_deletion_returns_profile_asset_for_cleanup() {
    let s = store();
    let alice = user(&s, "alice", "+14155550100").await;
    s.set_profile_image(
        alice.id,
        alice.id,
        "http://media.test/profiles/abc".into(),
        Some("abc".into()),
    )
    .await
    .unwrap();

    let asset = s.delete_account(alice.id, "alice").await.unwrap();
    assert_eq!(asset.as_deref(), Some("abc"));
}

#[tokio::test]
async fn post_deletion_cascades_likes_comments_and_saves() {
    let s = store();
    let alice = user(&s, "alice", "+14155550100").await;
    let bob = user(&s, "bob", "+14155550101").await;

    let post = s
        .create_post(alice.id, NewPost { content: "gone soon".into(), image: None })
        .await
        .unwrap();
    s.like(bob.id, post.id).await.unwrap();
    let comment = s
        .add_comment(bob.id, post.id, NewComment { body: "c".into() })
        .await
        .unwrap();
    let reply = s.add_reply(alice.id, comment.id, NewComment { body: "r".into() }).await.unwrap();
    s.save_post(bob.id, post.id).await.unwrap();

    // only the author may delete
    let err = s.delete_post(bob.id, post.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Forbidden));

    s.delete_post(alice.id, post.id).await.unwrap();

    assert!(matches!(s.get_post(post.id).await, Err(StoreError::NotFound)));
    assert!(matches!(s.get_comment(comment.id).await, Err(StoreError::NotFound)));
    assert!(matches!(s.get_comment(reply.id).await, Err(StoreError::NotFound)));
    assert!(matches!(s.is_liked(bob.id, post.id).await, Ok(false)));
    assert!(!s.get_user(bob.id).await.unwrap().saved_posts.contains(&post.id));
}
