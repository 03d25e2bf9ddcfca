use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parley_core::{current_unix_timestamp_ms, deadline_after_ms, is_past_deadline_ms};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{Grant, GrantSet};

/// Errors returned by token verifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("token is not recognized")]
    UnknownToken,
    #[error("token for '{subject}' expired")]
    Expired { subject: String },
}

/// Identity resolved from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject: String,
    pub grants: GrantSet,
    pub expires_unix_ms: Option<u64>,
}

/// Opaque capability turning a token into an identity and its grants.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedToken, AccessError>;
}

/// In-memory verifier that issues opaque digest tokens.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: RwLock<HashMap<String, VerifiedToken>>,
    sequence: AtomicU64,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a token for `subject`, valid for `ttl_ms` when given.
    pub async fn issue(
        &self,
        subject: &str,
        grants: Vec<Grant>,
        ttl_ms: Option<u64>,
    ) -> String {
        let now_ms = current_unix_timestamp_ms();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(subject.as_bytes());
        for grant in &grants {
            hasher.update(b"\n");
            hasher.update(grant.as_str().as_bytes());
        }
        hasher.update(now_ms.to_le_bytes());
        hasher.update(sequence.to_le_bytes());
        let token = hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();

        let verified = VerifiedToken {
            subject: subject.to_string(),
            grants: GrantSet::new(grants),
            expires_unix_ms: deadline_after_ms(now_ms, ttl_ms),
        };
        self.tokens.write().await.insert(token.clone(), verified);
        token
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.tokens.write().await.remove(token).is_some()
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedToken, AccessError> {
        let tokens = self.tokens.read().await;
        let verified = tokens.get(token.trim()).ok_or(AccessError::UnknownToken)?;
        if is_past_deadline_ms(verified.expires_unix_ms, current_unix_timestamp_ms()) {
            return Err(AccessError::Expired {
                subject: verified.subject.clone(),
            });
        }
        Ok(verified.clone())
    }
}
