use std::sync::Arc;

use actix_web::cookie::{Cookie, SameSite};
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder};
use serde::{Deserialize, Serialize};

use crate::csrf::{CsrfGuard, CsrfScope, CsrfToken, FormScope};
use crate::error::ApiError;
use crate::models::*;
use crate::pagination::{Page, PageRequest};
use crate::pipeline::{CommentSubmission, SubmissionPipeline, ThreadSubmission};
use crate::repo::ContentStore;

pub const SESSION_COOKIE: &str = "qb_session";
pub const FORM_LIMIT_BYTES: usize = 256 * 1024;
pub const RECENT_COMMENTS: u32 = 20;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .app_data(web::FormConfig::default().limit(FORM_LIMIT_BYTES))
            .service(web::resource("/categories").route(web::get().to(list_categories)))
            .service(
                web::resource("/categories/{slug}/threads")
                    .route(web::get().to(list_threads))
                    .route(web::post().to(create_thread)),
            )
            .service(web::resource("/categories/{slug}/form").route(web::get().to(thread_form)))
            .service(web::resource("/threads").route(web::get().to(front_page)))
            .service(web::resource("/threads/{id}").route(web::get().to(get_thread)))
            .service(web::resource("/threads/{id}/form").route(web::get().to(comment_form)))
            .service(web::resource("/threads/{id}/comments").route(web::post().to(create_comment)))
            .service(web::resource("/recent").route(web::get().to(recent_comments))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ContentStore>,
    pub pipeline: Arc<SubmissionPipeline>,
    pub threads_per_page: u32,
    pub comments_per_page: u32,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

impl PageQuery {
    /// Numbers are saturated into `u32` so the store can clamp them to the
    /// nearest real page and report it. Anything that is not a number means
    /// the first page.
    fn page(&self) -> u32 {
        let Some(raw) = self.page.as_deref().map(str::trim) else {
            return 1;
        };
        let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        match raw.parse::<i64>() {
            Ok(n) => u32::try_from(n.max(0)).unwrap_or(u32::MAX),
            // too long for i64 but still a number
            Err(_) => match raw.strip_prefix('-') {
                Some(rest) if digits(rest) => 0,
                None if digits(raw) => u32::MAX,
                _ => 1,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ThreadForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub csrf_token: String,
}

#[derive(Serialize)]
struct CategoryPage {
    category: Category,
    threads: Page<Thread>,
}

#[derive(Serialize)]
struct ThreadPage {
    thread: Thread,
    comments: Page<Comment>,
}

#[derive(Serialize)]
struct FormTicket {
    action: String,
    csrf_token: CsrfToken,
}

#[derive(Serialize)]
struct Created {
    id: Id,
}

pub async fn list_categories(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let categories = data.store.list_categories().await?;
    Ok(HttpResponse::Ok().json(categories))
}

pub async fn list_threads(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let category = data.store.get_category_by_slug(&path.into_inner()).await?;
    let threads = data
        .store
        .list_threads(category.id, PageRequest::new(query.page(), data.threads_per_page))
        .await?;
    Ok(HttpResponse::Ok().json(CategoryPage { category, threads }))
}

/// Threads from every category, most recently active first.
pub async fn front_page(data: web::Data<AppState>, query: web::Query<PageQuery>) -> Result<HttpResponse, ApiError> {
    let threads = data
        .store
        .list_all_threads(PageRequest::new(query.page(), data.threads_per_page))
        .await?;
    Ok(HttpResponse::Ok().json(threads))
}

pub async fn get_thread(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let thread_id = path.into_inner();
    let thread = data.store.get_thread(thread_id).await?;
    let comments = data
        .store
        .list_comments(thread_id, PageRequest::new(query.page(), data.comments_per_page))
        .await?;
    Ok(HttpResponse::Ok().json(ThreadPage { thread, comments }))
}

pub async fn recent_comments(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let comments = data.store.recent_comments(RECENT_COMMENTS).await?;
    Ok(HttpResponse::Ok().json(comments))
}

pub async fn thread_form(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let category = data.store.get_category_by_slug(&path.into_inner()).await?;
    let csrf = data.pipeline.csrf();
    let (session_id, fresh_cookie) = session_for(&req, csrf);
    let csrf_token = csrf.issue(&CsrfScope::new(session_id, FormScope::NewThread { category_id: category.id }));
    let action = format!("/api/v1/categories/{}/threads", category.slug);
    Ok(form_response(fresh_cookie).json(FormTicket { action, csrf_token }))
}

pub async fn comment_form(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let thread = data.store.get_thread(path.into_inner()).await?;
    let csrf = data.pipeline.csrf();
    let (session_id, fresh_cookie) = session_for(&req, csrf);
    let csrf_token = csrf.issue(&CsrfScope::new(session_id, FormScope::NewComment { thread_id: thread.id }));
    let action = format!("/api/v1/threads/{}/comments", thread.id);
    Ok(form_response(fresh_cookie).json(FormTicket { action, csrf_token }))
}

pub async fn create_thread(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Form<ThreadForm>,
) -> Result<HttpResponse, ApiError> {
    // no session cookie means no token could have been issued for this client
    let session_id = existing_session(&req, data.pipeline.csrf()).ok_or(ApiError::Forbidden)?;
    let category = data.store.get_category_by_slug(&path.into_inner()).await?;
    let form = form.into_inner();
    let id = data
        .pipeline
        .submit_thread(ThreadSubmission {
            session_id,
            category_id: category.id,
            title: form.title,
            author: form.author,
            body: form.content,
            csrf_token: form.csrf_token,
        })
        .await?;
    Ok(HttpResponse::Created()
        .insert_header((header::LOCATION, format!("/api/v1/threads/{id}")))
        .json(Created { id }))
}

pub async fn create_comment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    form: web::Form<CommentForm>,
) -> Result<HttpResponse, ApiError> {
    let thread_id = path.into_inner();
    let session_id = existing_session(&req, data.pipeline.csrf()).ok_or(ApiError::Forbidden)?;
    let form = form.into_inner();
    let id = data
        .pipeline
        .submit_comment(CommentSubmission {
            session_id,
            thread_id,
            author: form.author,
            body: form.content,
            csrf_token: form.csrf_token,
        })
        .await?;
    Ok(HttpResponse::Created()
        .insert_header((header::LOCATION, format!("/api/v1/threads/{thread_id}")))
        .json(Created { id }))
}

fn existing_session(req: &HttpRequest, csrf: &CsrfGuard) -> Option<String> {
    req.cookie(SESSION_COOKIE).and_then(|c| csrf.verify_session(c.value()))
}

/// Reuses the caller's session when its cookie verifies, otherwise starts a
/// new one and returns the cookie to set.
fn session_for(req: &HttpRequest, csrf: &CsrfGuard) -> (String, Option<Cookie<'static>>) {
    if let Some(id) = existing_session(req, csrf) {
        return (id, None);
    }
    let session = csrf.new_session();
    let cookie = Cookie::build(SESSION_COOKIE, session.cookie_value)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .finish();
    (session.id, Some(cookie))
}

fn form_response(cookie: Option<Cookie<'static>>) -> HttpResponseBuilder {
    let mut res = HttpResponse::Ok();
    res.insert_header((header::CACHE_CONTROL, "no-store"));
    if let Some(cookie) = cookie {
        res.cookie(cookie);
    }
    res
}
