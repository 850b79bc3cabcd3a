//! Idempotency keys.

use std::fmt;

use crate::constants::MAX_COMPOSITE_KEY_SIZE;
use crate::error::KeyError;
use crate::verified;

/// A validated `(scope, token)` pair.
///
/// The scope namespaces tokens, so the same token under two scopes names two
/// independent operations. Tokens are opaque and compared byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdempotencyKey {
    scope: String,
    token: String,
}

impl IdempotencyKey {
    /// Validate and build a key.
    ///
    /// # Errors
    ///
    /// - [`KeyError::BlankScope`] / [`KeyError::BlankToken`] for empty or whitespace parts
    /// - [`KeyError::ScopeContainsSeparator`] if the scope contains NUL
    /// - [`KeyError::TooLarge`] if the encoded key exceeds [`MAX_COMPOSITE_KEY_SIZE`]
    pub fn new(scope: impl Into<String>, token: impl Into<String>) -> Result<Self, KeyError> {
        let scope = scope.into();
        let token = token.into();

        if verified::is_blank(&scope) {
            return Err(KeyError::BlankScope);
        }
        if verified::is_blank(&token) {
            return Err(KeyError::BlankToken);
        }
        if scope.contains(verified::KEY_SEPARATOR) {
            return Err(KeyError::ScopeContainsSeparator);
        }

        let size = scope.len().saturating_add(token.len()).saturating_add(1);
        if size > MAX_COMPOSITE_KEY_SIZE as usize {
            return Err(KeyError::TooLarge {
                size: u32::try_from(size).unwrap_or(u32::MAX),
                max: MAX_COMPOSITE_KEY_SIZE,
            });
        }

        Ok(Self { scope, token })
    }

    /// The namespace half of the key.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The caller-supplied token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Encoded `scope\0token` form.
    pub fn composite(&self) -> String {
        verified::composite_key(&self.scope, &self.token)
    }

    /// Full key-value store key under `prefix`.
    pub fn storage_key(&self, prefix: &str) -> String {
        verified::storage_key(prefix, &self.scope, &self.token)
    }

    /// Decode a storage key written by [`storage_key`](Self::storage_key).
    pub fn from_storage_key(prefix: &str, key: &str) -> Result<Self, KeyError> {
        let malformed = || KeyError::MalformedStorageKey {
            key: key.escape_default().to_string(),
        };
        let composite = key.strip_prefix(prefix).ok_or_else(malformed)?;
        let (scope, token) = verified::split_composite_key(composite).ok_or_else(malformed)?;
        Self::new(scope, token)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.token)
    }
}
