use std::future::{ready, Ready};
use std::sync::Arc;

use actix_web::{dev::Payload, web, FromRequest, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::auth::Auth;
use crate::credential;
use crate::error::ApiError;
use crate::models::*;
use crate::repo::CommentRepo;
use crate::settings::Settings;
use crate::thread_path;

const SCOPE: &str = "/1.0";

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope(SCOPE)
            .app_data(web::JsonConfig::default().content_type_required(false))
            .service(web::resource("/{path:.*}/new").route(web::post().to(create_comment)))
            .service(
                web::resource(r"/{path:.*}/{id:\d+}")
                    .route(web::get().to(get_comment))
                    .route(web::put().to(update_comment))
                    .route(web::delete().to(delete_comment)),
            )
            .service(web::resource("/{path:.*}/").route(web::get().to(list_comments))),
    );
}

#[derive(Clone)]
pub struct AppState { pub repo: Arc<dyn CommentRepo>, pub settings: Arc<Settings> }

impl AppState {
    pub fn new(repo: impl CommentRepo + 'static, settings: Settings) -> Self {
        Self { repo: Arc::new(repo), settings: Arc::new(settings) }
    }
}

/// Normalized thread key taken from the `{path}` segment. Rejected or
/// undecodable paths fail extraction with 404.
pub struct ThreadKey(pub String);

/// The still-encoded `{path}` text: the router's own decoding is lossy, so the
/// key is cut from the raw URI. Every route ends in exactly one segment after
/// `{path}` (`new`, the id, or empty for the listing).
fn raw_thread_path(req: &HttpRequest) -> Option<&str> {
    let rest = req.uri().path().strip_prefix(SCOPE)?.strip_prefix('/')?;
    rest.rsplit_once('/').map(|(path, _)| path)
}

impl FromRequest for ThreadKey {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let Some(raw) = raw_thread_path(req) else { return ready(Err(ApiError::NotFound)) };
        let allowed = req
            .app_data::<web::Data<AppState>>()
            .map(|s| s.settings.allowed_paths.as_slice())
            .unwrap_or_default();
        ready(thread_path::resolve(raw, allowed).map(ThreadKey).map_err(ApiError::from))
    }
}

#[derive(Deserialize)]
pub struct CommentRef {
    id: Id,
}

/// Moderators and admins act with privilege; everyone else is judged by the
/// ownership cookie they present.
fn actor(req: &HttpRequest, auth: Option<&Auth>, thread: &str, id: Id) -> Actor {
    if auth.is_some_and(Auth::is_privileged) {
        Actor::Privileged
    } else {
        Actor::Owner(credential::presented(req, thread, id))
    }
}

#[utoipa::path(
    post,
    path = "/1.0/{path}/new",
    params(("path" = String, Path, description = "Thread path, may be percent-encoded")),
    request_body = NewComment,
    responses(
        (status = 201, description = "Comment created; ownership cookie set", body = Comment),
        (status = 400, description = "Invalid comment"),
        (status = 404, description = "Thread path rejected")
    )
)]
pub async fn create_comment(
    data: web::Data<AppState>,
    thread: ThreadKey,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    let token = credential::issue();
    let comment = data.repo.create_comment(&thread.0, payload.into_inner(), &token).await?;
    tracing::info!(thread = %comment.thread, id = comment.id, parent = ?comment.parent, "comment created");
    let cookie = credential::ownership_cookie(&comment.thread, comment.id, &token, data.settings.edit_window);
    Ok(HttpResponse::Created().cookie(cookie).json(comment))
}

#[utoipa::path(
    get,
    path = "/1.0/{path}/",
    params(("path" = String, Path, description = "Thread path")),
    responses(
        (status = 200, description = "Comments ordered by id", body = [Comment]),
        (status = 404, description = "Unknown or empty thread")
    )
)]
pub async fn list_comments(data: web::Data<AppState>, thread: ThreadKey) -> Result<HttpResponse, ApiError> {
    let comments = data.repo.list_comments(&thread.0).await?;
    if comments.is_empty() { return Err(ApiError::NotFound); }
    Ok(HttpResponse::Ok().json(comments))
}

#[utoipa::path(
    get,
    path = "/1.0/{path}/{id}",
    params(
        ("path" = String, Path, description = "Thread path"),
        ("id" = i64, Path, description = "Comment id within the thread")
    ),
    responses(
        (status = 200, description = "Comment (possibly a tombstone)", body = Comment),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn get_comment(
    data: web::Data<AppState>,
    thread: ThreadKey,
    path: web::Path<CommentRef>,
) -> Result<HttpResponse, ApiError> {
    let comment = data.repo.get_comment(&thread.0, path.id).await?;
    Ok(HttpResponse::Ok().json(comment))
}

#[utoipa::path(
    put,
    path = "/1.0/{path}/{id}",
    params(
        ("path" = String, Path, description = "Thread path"),
        ("id" = i64, Path, description = "Comment id within the thread")
    ),
    request_body = UpdateComment,
    responses(
        (status = 200, description = "Comment updated", body = Comment),
        (status = 400, description = "Invalid fields"),
        (status = 403, description = "Missing or wrong ownership cookie"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn update_comment(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    thread: ThreadKey,
    path: web::Path<CommentRef>,
    payload: web::Json<UpdateComment>,
) -> Result<HttpResponse, ApiError> {
    let id = path.id;
    let actor = actor(&req, auth.as_ref(), &thread.0, id);
    let comment = data.repo.update_comment(&thread.0, id, actor.clone(), payload.into_inner()).await?;
    tracing::info!(thread = %comment.thread, id, privileged = matches!(actor, Actor::Privileged), "comment updated");

    let mut resp = HttpResponse::Ok();
    // owners get a fresh edit window
    if let Actor::Owner(Some(token)) = &actor {
        resp.cookie(credential::ownership_cookie(&comment.thread, id, token, data.settings.edit_window));
    }
    Ok(resp.json(comment))
}

#[utoipa::path(
    delete,
    path = "/1.0/{path}/{id}",
    params(
        ("path" = String, Path, description = "Thread path"),
        ("id" = i64, Path, description = "Comment id within the thread")
    ),
    responses(
        (status = 200, description = "`null` when erased, the tombstone when replies keep it", body = Option<Comment>),
        (status = 403, description = "Missing or wrong ownership cookie"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn delete_comment(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    thread: ThreadKey,
    path: web::Path<CommentRef>,
) -> Result<HttpResponse, ApiError> {
    let id = path.id;
    let actor = actor(&req, auth.as_ref(), &thread.0, id);
    let outcome = data.repo.delete_comment(&thread.0, id, actor.clone()).await?;
    tracing::info!(thread = %thread.0, id, tombstoned = outcome.is_some(), "comment deleted");

    let mut resp = HttpResponse::Ok();
    if matches!(actor, Actor::Owner(Some(_))) {
        resp.cookie(credential::expired_cookie(&thread.0, id));
    }
    Ok(resp.json(outcome))
}
