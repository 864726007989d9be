//! Stateless anti-forgery tokens and anonymous session cookies.
//!
//! A token is `version || key_id || nonce || issued_at || mac`, base64url
//! without padding. The MAC covers everything before it plus the scope
//! string, so a token only verifies for the exact session and form it was
//! issued for. Nothing is stored server side.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use sha2::Sha256;

use crate::models::{Id, Timestamp};
use crate::secret::SecretKey;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: u8 = 1;
const KEY_ID_LEN: usize = 4;
const NONCE_LEN: usize = 16;
const STAMP_LEN: usize = 8;
const MAC_LEN: usize = 32;
const TOKEN_LEN: usize = 1 + KEY_ID_LEN + NONCE_LEN + STAMP_LEN + MAC_LEN;
/// Upper bound on the encoded length; anything longer is not ours.
const MAX_ENCODED_LEN: usize = (TOKEN_LEN * 4).div_ceil(3);

/// Tolerated clock skew for tokens stamped in the future.
const MAX_FUTURE_SKEW_SECS: i64 = 60;

pub const DEFAULT_TOKEN_TTL_SECS: i64 = 2 * 60 * 60;

const SESSION_ID_BYTES: usize = 16;

/// The form a token authorises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormScope {
    NewThread { category_id: Id },
    NewComment { thread_id: Id },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfScope {
    pub session_id: String,
    pub form: FormScope,
}

impl CsrfScope {
    pub fn new(session_id: impl Into<String>, form: FormScope) -> Self {
        Self { session_id: session_id.into(), form }
    }

    fn canonical(&self) -> String {
        match self.form {
            FormScope::NewThread { category_id } => format!("{}|thread:{category_id}", self.session_id),
            FormScope::NewComment { thread_id } => format!("{}|comment:{thread_id}", self.session_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsrfToken {
    pub value: String,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfRejection {
    #[error("malformed token")]
    Malformed,
    #[error("unknown token version")]
    UnknownVersion,
    #[error("token was signed with another key")]
    KeyMismatch,
    #[error("bad signature or wrong scope")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token issued in the future")]
    NotYetValid,
}

/// Anonymous session: the id and the signed cookie value carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub cookie_value: String,
}

#[derive(Clone, Debug)]
pub struct CsrfGuard {
    key: Arc<SecretKey>,
    ttl_secs: i64,
}

impl CsrfGuard {
    pub fn new(key: Arc<SecretKey>, ttl_secs: i64) -> Self {
        Self { key, ttl_secs: ttl_secs.max(1) }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    pub fn issue(&self, scope: &CsrfScope) -> CsrfToken {
        self.issue_at(scope, Utc::now().timestamp())
    }

    pub fn verify(&self, token: &str, scope: &CsrfScope) -> Result<(), CsrfRejection> {
        self.verify_at(token, scope, Utc::now().timestamp())
    }

    pub fn issue_at(&self, scope: &CsrfScope, now: Timestamp) -> CsrfToken {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let key_id = self.key.id();

        let mut raw = Vec::with_capacity(TOKEN_LEN);
        raw.push(TOKEN_VERSION);
        raw.extend_from_slice(&key_id);
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&now.to_be_bytes());
        let tag = self.token_mac(&raw, scope).finalize().into_bytes();
        raw.extend_from_slice(&tag);

        CsrfToken {
            value: URL_SAFE_NO_PAD.encode(raw),
            issued_at: now,
            expires_at: now.saturating_add(self.ttl_secs),
        }
    }

    /// Fails closed: every check must pass and the first failure is reported.
    pub fn verify_at(&self, token: &str, scope: &CsrfScope, now: Timestamp) -> Result<(), CsrfRejection> {
        if token.is_empty() || token.len() > MAX_ENCODED_LEN {
            return Err(CsrfRejection::Malformed);
        }
        let raw = URL_SAFE_NO_PAD.decode(token.as_bytes()).map_err(|_| CsrfRejection::Malformed)?;
        if raw.len() != TOKEN_LEN {
            return Err(CsrfRejection::Malformed);
        }
        if raw[0] != TOKEN_VERSION {
            return Err(CsrfRejection::UnknownVersion);
        }
        if raw[1..1 + KEY_ID_LEN] != self.key.id() {
            return Err(CsrfRejection::KeyMismatch);
        }

        let (signed, tag) = raw.split_at(TOKEN_LEN - MAC_LEN);
        self.token_mac(signed, scope)
            .verify_slice(tag)
            .map_err(|_| CsrfRejection::BadSignature)?;

        let stamp_at = 1 + KEY_ID_LEN + NONCE_LEN;
        let mut stamp = [0u8; STAMP_LEN];
        stamp.copy_from_slice(&signed[stamp_at..stamp_at + STAMP_LEN]);
        let issued_at = i64::from_be_bytes(stamp);

        if issued_at > now.saturating_add(MAX_FUTURE_SKEW_SECS) {
            return Err(CsrfRejection::NotYetValid);
        }
        if now.saturating_sub(issued_at) > self.ttl_secs {
            return Err(CsrfRejection::Expired);
        }
        Ok(())
    }

    pub fn new_session(&self) -> Session {
        let mut raw = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut raw);
        let id = hex::encode(raw);
        let tag = self.session_mac(&id).finalize().into_bytes();
        let cookie_value = format!("{id}.{}", hex::encode(tag));
        Session { id, cookie_value }
    }

    /// Returns the session id when the cookie carries a valid signature.
    pub fn verify_session(&self, cookie_value: &str) -> Option<String> {
        let (id, tag_hex) = cookie_value.split_once('.')?;
        if id.len() != SESSION_ID_BYTES * 2 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let tag = hex::decode(tag_hex).ok()?;
        self.session_mac(id).verify_slice(&tag).ok()?;
        Some(id.to_owned())
    }

    fn token_mac(&self, signed: &[u8], scope: &CsrfScope) -> HmacSha256 {
        let mut mac = self.keyed();
        mac.update(b"csrf");
        mac.update(signed);
        mac.update(scope.canonical().as_bytes());
        mac
    }

    fn session_mac(&self, id: &str) -> HmacSha256 {
        let mut mac = self.keyed();
        mac.update(b"session");
        mac.update(id.as_bytes());
        mac
    }

    fn keyed(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.key.expose()).expect("HMAC accepts keys of any length")
    }
}
