use crate::models::{Comment, Like, NewComment, NewPost, NewUser, Post, UpdatePost, UpdateUser, User, UserIds};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register,
        crate::routes::login,
        crate::routes::auth_me,
        crate::routes::list_users,
        crate::routes::get_user,
        crate::routes::follow_user,
        crate::routes::unfollow_user,
        crate::routes::delete_account,
        crate::routes::list_posts,
        crate::routes::create_post,
        crate::routes::get_post,
        crate::routes::delete_post,
        crate::routes::list_comments,
        crate::routes::add_comment,
        crate::routes::add_reply,
        crate::routes::delete_comment,
        crate::routes::like_post,
        crate::routes::unlike_post,
    ),
    components(schemas(
        User, NewUser, UpdateUser, Post, NewPost, UpdatePost,
        Comment, NewComment, Like, UserIds,
        crate::routes::SessionResponse, crate::routes::LoginRequest,
        crate::routes::UserWithPosts
    )),
    tags(
        (name = "auth", description = "Registration and sessions"),
        (name = "users", description = "Profiles and the follow graph"),
        (name = "posts", description = "Post operations"),
        (name = "comments", description = "Comments and replies"),
        (name = "likes", description = "Like operations"),
    )
)]
pub struct ApiDoc;
