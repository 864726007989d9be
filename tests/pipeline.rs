use std::sync::Arc;
use std::time::Duration;

use quietboard::csrf::{CsrfGuard, CsrfScope, FormScope};
use async_trait::async_trait;
use quietboard::models::{Category, Comment, Id, NewCategory, NewComment, NewThread, RecentComment, Thread};
use quietboard::pagination::{Page, PageRequest};
use quietboard::pipeline::{CommentSubmission, Field, SubmissionPipeline, SubmitError, ThreadSubmission};
use quietboard::rate_limit::{RateLimitConfig, RateLimiterFacade};
use quietboard::repo::sqlite::SqliteStore;
use quietboard::repo::{CategoryRepo, CommentRepo, RepoError, RepoResult, ThreadRepo};
use quietboard::sanitize::Sanitizer;
use quietboard::secret::SecretKey;

const SESSION: &str = "0123456789abcdef0123456789abcdef";

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<SqliteStore>,
    category_id: Id,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("forum.db")).await.unwrap();
        let category_id = store
            .create_category(NewCategory { slug: "tech".into(), name: "Technology".into() })
            .await
            .unwrap()
            .id;
        Self { _dir: dir, store: Arc::new(store), category_id }
    }

    fn pipeline(&self) -> SubmissionPipeline {
        let csrf = CsrfGuard::new(Arc::new(SecretKey::generate()), 600);
        SubmissionPipeline::new(self.store.clone(), csrf)
    }
}

fn thread_token(p: &SubmissionPipeline, session: &str, category_id: Id) -> String {
    p.csrf().issue(&CsrfScope::new(session, FormScope::NewThread { category_id })).value
}

fn comment_token(p: &SubmissionPipeline, session: &str, thread_id: Id) -> String {
    p.csrf().issue(&CsrfScope::new(session, FormScope::NewComment { thread_id })).value
}

fn thread_sub(p: &SubmissionPipeline, category_id: Id, title: &str, body: &str) -> ThreadSubmission {
    ThreadSubmission {
        session_id: SESSION.into(),
        category_id,
        title: title.into(),
        author: None,
        body: body.into(),
        csrf_token: thread_token(p, SESSION, category_id),
    }
}

fn comment_sub(p: &SubmissionPipeline, thread_id: Id, body: &str) -> CommentSubmission {
    CommentSubmission {
        session_id: SESSION.into(),
        thread_id,
        author: None,
        body: body.into(),
        csrf_token: comment_token(p, SESSION, thread_id),
    }
}

#[tokio::test]
async fn thread_is_sanitized_and_stored() {
    let h = Harness::new().await;
    let p = h.pipeline();
    let id = p
        .submit_thread(thread_sub(&p, h.category_id, "  Hello  ", "**bold** text<script>alert(1)</script>"))
        .await
        .unwrap();

    let stored = h.store.get_thread(id).await.unwrap();
    assert_eq!(stored.title, "Hello");
    assert_eq!(stored.body_html, "<strong>bold</strong> text");
    assert_eq!(stored.comment_count, 0);
    assert!(stored.created_at > 0);
}

#[tokio::test]
async fn comment_to_missing_thread_is_invalid_input() {
    let h = Harness::new().await;
    let p = h.pipeline();
    let err = p.submit_comment(comment_sub(&p, 4242, "hi")).await.unwrap_err();
    assert!(matches!(err, SubmitError::InvalidInput { field: Field::Thread, .. }));
}

#[tokio::test]
async fn thread_in_unknown_category_is_invalid_input() {
    let h = Harness::new().await;
    let p = h.pipeline();
    let err = p.submit_thread(thread_sub(&p, 777, "t", "b")).await.unwrap_err();
    assert!(matches!(err, SubmitError::InvalidInput { field: Field::Category, .. }));
}

#[tokio::test]
async fn bad_tokens_are_forbidden() {
    let h = Harness::new().await;
    let p = h.pipeline();

    let mut sub = thread_sub(&p, h.category_id, "t", "b");
    sub.csrf_token = "garbage".into();
    assert_eq!(p.submit_thread(sub).await.unwrap_err(), SubmitError::Forbidden);

    // token for another session
    let mut sub = thread_sub(&p, h.category_id, "t", "b");
    sub.session_id = "ffffffffffffffffffffffffffffffff".into();
    assert_eq!(p.submit_thread(sub).await.unwrap_err(), SubmitError::Forbidden);

    // thread token replayed against the comment form
    let thread_id = p.submit_thread(thread_sub(&p, h.category_id, "t", "b")).await.unwrap();
    let sub = CommentSubmission {
        session_id: SESSION.into(),
        thread_id,
        author: None,
        body: "hi".into(),
        csrf_token: thread_token(&p, SESSION, h.category_id),
    };
    assert_eq!(p.submit_comment(sub).await.unwrap_err(), SubmitError::Forbidden);
}

#[tokio::test]
async fn csrf_is_checked_before_anything_else() {
    let h = Harness::new().await;
    let p = h.pipeline();
    let sub = CommentSubmission {
        session_id: SESSION.into(),
        thread_id: 4242,
        author: None,
        body: String::new(),
        csrf_token: String::new(),
    };
    assert_eq!(p.submit_comment(sub).await.unwrap_err(), SubmitError::Forbidden);
}

#[tokio::test]
async fn invalid_fields_are_named() {
    let h = Harness::new().await;
    let p = h.pipeline();

    let err = p.submit_thread(thread_sub(&p, h.category_id, "   ", "body")).await.unwrap_err();
    assert!(matches!(err, SubmitError::InvalidInput { field: Field::Title, .. }));

    let err = p.submit_thread(thread_sub(&p, h.category_id, &"t".repeat(141), "body")).await.unwrap_err();
    assert!(matches!(err, SubmitError::InvalidInput { field: Field::Title, .. }));

    let err = p.submit_thread(thread_sub(&p, h.category_id, "title", " \n ")).await.unwrap_err();
    assert!(matches!(err, SubmitError::InvalidInput { field: Field::Body, .. }));

    let err = p.submit_thread(thread_sub(&p, h.category_id, "title", &"b".repeat(5001))).await.unwrap_err();
    assert!(matches!(err, SubmitError::InvalidInput { field: Field::Body, .. }));

    // only disallowed markup
    let err = p
        .submit_thread(thread_sub(&p, h.category_id, "title", "<script>alert(1)</script>"))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::InvalidInput { field: Field::Body, .. }));
}

#[tokio::test]
async fn oversized_body_is_input_too_large() {
    let h = Harness::new().await;
    let p = h.pipeline().with_sanitizer(Sanitizer::new(64, 1024));
    let err = p.submit_thread(thread_sub(&p, h.category_id, "title", &"é".repeat(40))).await.unwrap_err();
    assert_eq!(err, SubmitError::InputTooLarge { field: Field::Body, len: 80, max: 64 });
}

#[tokio::test]
async fn second_thread_in_window_is_rate_limited() {
    let h = Harness::new().await;
    let limiter = RateLimiterFacade::from_config(RateLimitConfig::default());
    let p = h.pipeline().with_rate_limiter(limiter);

    p.submit_thread(thread_sub(&p, h.category_id, "first", "body")).await.unwrap();
    match p.submit_thread(thread_sub(&p, h.category_id, "second", "body")).await {
        Err(SubmitError::RateLimited { retry_after }) => {
            assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_secs(300));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }

    // rejected submissions do not consume the allowance of others
    let mut other = thread_sub(&p, h.category_id, "other", "body");
    other.session_id = "ffffffffffffffffffffffffffffffff".into();
    other.csrf_token = thread_token(&p, &other.session_id, h.category_id);
    p.submit_thread(other).await.unwrap();
}

#[tokio::test]
async fn invalid_submissions_do_not_count_against_the_limit() {
    let h = Harness::new().await;
    let limiter = RateLimiterFacade::from_config(RateLimitConfig::default());
    let p = h.pipeline().with_rate_limiter(limiter);

    let err = p.submit_thread(thread_sub(&p, h.category_id, "", "body")).await.unwrap_err();
    assert!(matches!(err, SubmitError::InvalidInput { .. }));
    p.submit_thread(thread_sub(&p, h.category_id, "ok", "body")).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_comments_are_gapless() {
    let h = Harness::new().await;
    let p = Arc::new(h.pipeline());
    let thread_id = p.submit_thread(thread_sub(&p, h.category_id, "busy", "body")).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let p = p.clone();
        handles.push(tokio::spawn(async move {
            let sub = comment_sub(&p, thread_id, &format!("comment {i}"));
            p.submit_comment(sub).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let page = h.store.list_comments(thread_id, PageRequest::new(1, 50)).await.unwrap();
    let seq: Vec<i64> = page.items.iter().map(|c| c.sequence_no).collect();
    assert_eq!(seq, (1..=20).collect::<Vec<i64>>());
}

#[tokio::test]
async fn author_is_stored_or_defaults_to_anon() {
    let h = Harness::new().await;
    let p = h.pipeline();

    let mut sub = thread_sub(&p, h.category_id, "named", "body");
    sub.author = Some("  night owl ".into());
    let named = p.submit_thread(sub).await.unwrap();
    assert_eq!(h.store.get_thread(named).await.unwrap().author, "night owl");

    let unnamed = p.submit_thread(thread_sub(&p, h.category_id, "unnamed", "body")).await.unwrap();
    assert_eq!(h.store.get_thread(unnamed).await.unwrap().author, "anon");

    let mut sub = comment_sub(&p, named, "reply");
    sub.author = Some("x".repeat(50));
    p.submit_comment(sub).await.unwrap();
    let comments = h.store.list_comments(named, PageRequest::new(1, 10)).await.unwrap();
    assert_eq!(comments.items[0].author.chars().count(), 32);
    assert!(comments.items[0].author.ends_with('\u{2026}'));

    let mut sub = comment_sub(&p, named, "reply");
    sub.author = Some("bad\u{0}name".into());
    let err = p.submit_comment(sub).await.unwrap_err();
    assert!(matches!(err, SubmitError::InvalidInput { field: Field::Author, .. }));
}

/// Reads succeed, every write fails as if the disk had gone away.
struct BrokenWrites;

#[async_trait]
impl CategoryRepo for BrokenWrites {
    async fn create_category(&self, _new: NewCategory) -> RepoResult<Category> {
        Err(RepoError::Internal("disk I/O error".into()))
    }
    async fn get_category(&self, id: Id) -> RepoResult<Category> {
        Ok(Category { id, slug: "tech".into(), name: "Technology".into() })
    }
    async fn get_category_by_slug(&self, _slug: &str) -> RepoResult<Category> {
        self.get_category(1).await
    }
    async fn list_categories(&self) -> RepoResult<Vec<Category>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl ThreadRepo for BrokenWrites {
    async fn create_thread(&self, _new: NewThread) -> RepoResult<Thread> {
        Err(RepoError::Internal("disk I/O error".into()))
    }
    async fn get_thread(&self, id: Id) -> RepoResult<Thread> {
        Ok(Thread {
            id,
            category_id: 1,
            title: "t".into(),
            author: "anon".into(),
            body_html: "b".into(),
            created_at: 1,
            last_activity_at: 1,
            comment_count: 0,
        })
    }
    async fn list_threads(&self, _category_id: Id, _page: PageRequest) -> RepoResult<Page<Thread>> {
        Err(RepoError::Internal("unused".into()))
    }
    async fn list_all_threads(&self, _page: PageRequest) -> RepoResult<Page<Thread>> {
        Err(RepoError::Internal("unused".into()))
    }
}

#[async_trait]
impl CommentRepo for BrokenWrites {
    async fn create_comment(&self, _new: NewComment) -> RepoResult<Comment> {
        Err(RepoError::Internal("disk I/O error".into()))
    }
    async fn list_comments(&self, _thread_id: Id, _page: PageRequest) -> RepoResult<Page<Comment>> {
        Err(RepoError::Internal("unused".into()))
    }
    async fn recent_comments(&self, _limit: u32) -> RepoResult<Vec<RecentComment>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn failed_writes_do_not_use_up_the_rate_limit() {
    let csrf = CsrfGuard::new(Arc::new(SecretKey::generate()), 600);
    let cfg = RateLimitConfig { comment_limit: 1, ..RateLimitConfig::default() };
    let limiter = RateLimiterFacade::from_config(cfg);
    let p = SubmissionPipeline::new(Arc::new(BrokenWrites), csrf).with_rate_limiter(limiter.clone());

    for _ in 0..3 {
        let err = p.submit_thread(thread_sub(&p, 1, "title", "body")).await.unwrap_err();
        assert_eq!(err, SubmitError::StorageUnavailable);
        let err = p.submit_comment(comment_sub(&p, 1, "reply")).await.unwrap_err();
        assert_eq!(err, SubmitError::StorageUnavailable);
    }

    // the allowance is still whole once storage is back
    assert!(limiter.allow_thread(SESSION).is_ok());
    assert!(limiter.allow_comment(SESSION).is_ok());
}
