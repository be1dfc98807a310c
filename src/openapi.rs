use crate::models::{Comment, NewComment, UpdateComment};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::create_comment,
        crate::routes::list_comments,
        crate::routes::get_comment,
        crate::routes::update_comment,
        crate::routes::delete_comment,
    ),
    components(schemas(Comment, NewComment, UpdateComment)),
    tags(
        (name = "comments", description = "Comment threads keyed by site path"),
    )
)]
pub struct ApiDoc;
