use serde::{Deserialize, Serialize};

use crate::sanitize::SafeHtml;

pub type Id = i64;

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: Id,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Thread {
    pub id: Id,
    pub category_id: Id,
    pub title: String,
    pub author: String,
    pub body_html: String,
    pub created_at: Timestamp,
    pub last_activity_at: Timestamp,
    pub comment_count: i64,
}

/// Insert payload for a thread. The body can only come out of the sanitizer.
#[derive(Debug, Clone)]
pub struct NewThread {
    pub category_id: Id,
    pub title: String,
    /// Self-chosen display name, already normalized; not an identity.
    pub author: String,
    pub body_html: SafeHtml,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub thread_id: Id,
    pub author: String,
    pub body_html: String,
    pub created_at: Timestamp,
    pub sequence_no: i64,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub thread_id: Id,
    pub author: String,
    pub body_html: SafeHtml,
    pub created_at: Timestamp,
}

/// Row of the global "recent comments" feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecentComment {
    pub id: Id,
    pub thread_id: Id,
    pub thread_title: String,
    pub category_slug: String,
    pub author: String,
    pub body_html: String,
    pub created_at: Timestamp,
}
