//! # Session Cookies
//!
//! Anonymous voter identity.
//!
//! - Cookie `sessionId`: `<uuid>.<signature>`, lasting 30 days by default
//! - Signature: base64url SHA-256 of `secret:uuid`
//! - HttpOnly, never readable from page scripts
//! - A missing, forged or garbled cookie is treated as no session at all,
//!   so the voter just gets a fresh one
use axum::http::{HeaderMap, header::COOKIE};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use crate::models::SessionId;

pub const SESSION_COOKIE: &str = "sessionId";

#[derive(Clone)]
pub struct SessionSigner {
    secret: String,
}

impl SessionSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn signature(&self, session_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b":");
        hasher.update(session_id.as_bytes());

        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    pub fn sign(&self, session_id: SessionId) -> String {
        let raw = session_id.to_string();
        let signature = self.signature(&raw);

        format!("{raw}.{signature}")
    }

    pub fn verify(&self, value: &str) -> Option<SessionId> {
        let (raw, signature) = value.rsplit_once('.')?;

        // Compare digests rather than the strings themselves.
        let expected = Sha256::digest(self.signature(raw).as_bytes());
        let provided = Sha256::digest(signature.as_bytes());
        if expected != provided {
            return None;
        }

        raw.parse().ok()
    }

    /// Pulls a verified session out of the request's `Cookie` headers.
    pub fn read_headers(&self, headers: &HeaderMap) -> Option<SessionId> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .filter(|(name, _)| *name == SESSION_COOKIE)
            .find_map(|(_, value)| self.verify(value))
    }

    pub fn cookie(&self, session_id: SessionId, max_age_secs: u64) -> String {
        format!(
            "{SESSION_COOKIE}={}; Max-Age={max_age_secs}; Path=/; HttpOnly; SameSite=Lax",
            self.sign(session_id)
        )
    }
}
