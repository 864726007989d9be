//! Anonymous submission intake.
//!
//! Every submission passes the same gates in the same order and stops at
//! the first failure:
//!
//! 1. CSRF token for the exact (session, form) scope
//! 2. structural validation (parent exists, lengths, non-empty, author name)
//! 3. sanitization
//! 4. per-session rate limit
//! 5. one atomic insert; a failed insert hands the rate-limit slot back
//!
//! Lower-layer errors never leave this module untyped; they are mapped to
//! [`SubmitError`] here.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::csrf::{CsrfGuard, CsrfScope, FormScope};
use crate::models::{Id, NewComment, NewThread, Timestamp};
use crate::rate_limit::RateLimiterFacade;
use crate::repo::{ContentStore, RepoError};
use crate::sanitize::{SafeHtml, SanitizeError, Sanitizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Category,
    Thread,
    Title,
    Body,
    Author,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Category => "category",
            Field::Thread => "thread",
            Field::Title => "title",
            Field::Body => "body",
            Field::Author => "author",
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("forbidden")]
    Forbidden,
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: Field, reason: &'static str },
    #[error("{field} is {len} bytes, the limit is {max}")]
    InputTooLarge { field: Field, len: usize, max: usize },
    #[error("rate limited")]
    RateLimited { retry_after: Duration },
    #[error("storage unavailable")]
    StorageUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionLimits {
    pub max_title_chars: usize,
    pub max_thread_body_chars: usize,
    pub max_comment_body_chars: usize,
    pub max_author_chars: usize,
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        Self { max_title_chars: 140, max_thread_body_chars: 5000, max_comment_body_chars: 2000, max_author_chars: 32 }
    }
}

#[derive(Debug, Clone)]
pub struct ThreadSubmission {
    pub session_id: String,
    pub category_id: Id,
    pub title: String,
    pub author: Option<String>,
    pub body: String,
    pub csrf_token: String,
}

#[derive(Debug, Clone)]
pub struct CommentSubmission {
    pub session_id: String,
    pub thread_id: Id,
    pub author: Option<String>,
    pub body: String,
    pub csrf_token: String,
}

/// Shown for posts that leave the name empty.
pub const DEFAULT_AUTHOR: &str = "anon";

/// Wall clock that never goes backwards within the process.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub fn now(&self) -> Timestamp {
        let wall = Utc::now().timestamp();
        self.last.fetch_max(wall, Ordering::SeqCst).max(wall)
    }
}

pub struct SubmissionPipeline {
    store: Arc<dyn ContentStore>,
    csrf: CsrfGuard,
    sanitizer: Sanitizer,
    limiter: Option<RateLimiterFacade>,
    limits: SubmissionLimits,
    clock: MonotonicClock,
}

impl SubmissionPipeline {
    pub fn new(store: Arc<dyn ContentStore>, csrf: CsrfGuard) -> Self {
        Self {
            store,
            csrf,
            sanitizer: Sanitizer::default(),
            limiter: None,
            limits: SubmissionLimits::default(),
            clock: MonotonicClock::default(),
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiterFacade) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_limits(mut self, limits: SubmissionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    pub async fn submit_thread(&self, sub: ThreadSubmission) -> Result<Id, SubmitError> {
        let scope = CsrfScope::new(sub.session_id.as_str(), FormScope::NewThread { category_id: sub.category_id });
        self.check_csrf(&sub.csrf_token, &scope)?;

        self.require_category(sub.category_id).await?;
        let title = validate_title(&sub.title, self.limits.max_title_chars)?;
        let author = normalize_author(sub.author.as_deref(), self.limits.max_author_chars)?;
        let body = validate_body(&sub.body, self.limits.max_thread_body_chars)?;

        let body_html = self.sanitize_body(body)?;

        if let Some(limiter) = &self.limiter {
            limiter.allow_thread(&sub.session_id).map_err(|retry_after| SubmitError::RateLimited { retry_after })?;
        }

        let new = NewThread { category_id: sub.category_id, title, author, body_html, created_at: self.clock.now() };
        let thread = match self.store.create_thread(new).await {
            Ok(thread) => thread,
            Err(e) => {
                // nothing was stored, so the attempt does not count
                if let Some(limiter) = &self.limiter {
                    limiter.refund_thread(&sub.session_id);
                }
                return Err(persist_error(e, Field::Category));
            }
        };
        info!(thread_id = thread.id, category_id = thread.category_id, "thread created");
        Ok(thread.id)
    }

    pub async fn submit_comment(&self, sub: CommentSubmission) -> Result<Id, SubmitError> {
        let scope = CsrfScope::new(sub.session_id.as_str(), FormScope::NewComment { thread_id: sub.thread_id });
        self.check_csrf(&sub.csrf_token, &scope)?;

        self.require_thread(sub.thread_id).await?;
        let author = normalize_author(sub.author.as_deref(), self.limits.max_author_chars)?;
        let body = validate_body(&sub.body, self.limits.max_comment_body_chars)?;

        let body_html = self.sanitize_body(body)?;

        if let Some(limiter) = &self.limiter {
            limiter.allow_comment(&sub.session_id).map_err(|retry_after| SubmitError::RateLimited { retry_after })?;
        }

        let new = NewComment { thread_id: sub.thread_id, author, body_html, created_at: self.clock.now() };
        let comment = match self.store.create_comment(new).await {
            Ok(comment) => comment,
            Err(e) => {
                if let Some(limiter) = &self.limiter {
                    limiter.refund_comment(&sub.session_id);
                }
                return Err(persist_error(e, Field::Thread));
            }
        };
        info!(comment_id = comment.id, thread_id = comment.thread_id, sequence_no = comment.sequence_no, "comment created");
        Ok(comment.id)
    }

    fn check_csrf(&self, token: &str, scope: &CsrfScope) -> Result<(), SubmitError> {
        self.csrf.verify(token, scope).map_err(|reason| {
            debug!(%reason, "csrf check failed");
            SubmitError::Forbidden
        })
    }

    async fn require_category(&self, id: Id) -> Result<(), SubmitError> {
        match self.store.get_category(id).await {
            Ok(_) => Ok(()),
            Err(RepoError::NotFound) => Err(SubmitError::InvalidInput { field: Field::Category, reason: "unknown category" }),
            Err(e) => Err(storage_unavailable(e)),
        }
    }

    async fn require_thread(&self, id: Id) -> Result<(), SubmitError> {
        match self.store.get_thread(id).await {
            Ok(_) => Ok(()),
            Err(RepoError::NotFound) => Err(SubmitError::InvalidInput { field: Field::Thread, reason: "unknown thread" }),
            Err(e) => Err(storage_unavailable(e)),
        }
    }

    fn sanitize_body(&self, body: &str) -> Result<SafeHtml, SubmitError> {
        let html = self.sanitizer.sanitize(body).map_err(|e| match e {
            SanitizeError::InputTooLarge { len, max } => SubmitError::InputTooLarge { field: Field::Body, len, max },
        })?;
        if html.is_empty() {
            return Err(SubmitError::InvalidInput { field: Field::Body, reason: "nothing left after removing disallowed markup" });
        }
        Ok(html)
    }
}

fn validate_title(raw: &str, max_chars: usize) -> Result<String, SubmitError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(SubmitError::InvalidInput { field: Field::Title, reason: "must not be empty" });
    }
    if title.chars().count() > max_chars {
        return Err(SubmitError::InvalidInput { field: Field::Title, reason: "too long" });
    }
    if title.chars().any(char::is_control) {
        return Err(SubmitError::InvalidInput { field: Field::Title, reason: "contains control characters" });
    }
    Ok(title.to_owned())
}

/// Empty or missing names become [`DEFAULT_AUTHOR`]; long ones are cut to
/// `max_chars` including a trailing ellipsis.
fn normalize_author(raw: Option<&str>, max_chars: usize) -> Result<String, SubmitError> {
    let name = raw.unwrap_or_default().trim();
    if name.is_empty() {
        return Ok(DEFAULT_AUTHOR.to_owned());
    }
    if name.chars().any(char::is_control) {
        return Err(SubmitError::InvalidInput { field: Field::Author, reason: "contains control characters" });
    }
    if name.chars().count() <= max_chars {
        return Ok(name.to_owned());
    }
    let mut cut: String = name.chars().take(max_chars.saturating_sub(1)).collect();
    cut.truncate(cut.trim_end().len());
    cut.push('\u{2026}');
    Ok(cut)
}

fn validate_body(raw: &str, max_chars: usize) -> Result<&str, SubmitError> {
    let body = raw.trim();
    if body.is_empty() {
        return Err(SubmitError::InvalidInput { field: Field::Body, reason: "must not be empty" });
    }
    if body.chars().count() > max_chars {
        return Err(SubmitError::InvalidInput { field: Field::Body, reason: "too long" });
    }
    Ok(body)
}

/// A parent that vanished between validation and insert is still the
/// client's problem, not a storage outage.
fn persist_error(e: RepoError, parent: Field) -> SubmitError {
    match e {
        RepoError::MissingParent | RepoError::NotFound => {
            let reason = if parent == Field::Thread { "unknown thread" } else { "unknown category" };
            SubmitError::InvalidInput { field: parent, reason }
        }
        other => storage_unavailable(other),
    }
}

fn storage_unavailable(e: RepoError) -> SubmitError {
    error!(error = %e, "submission failed in storage");
    SubmitError::StorageUnavailable
}
