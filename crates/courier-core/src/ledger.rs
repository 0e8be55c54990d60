//! Change tokens.
//!
//! A change token is an opaque UUID string re-minted on every state-affecting
//! write. Work captured against a token can later ask the ledger whether the
//! token is still current; a mismatch means a newer write superseded it.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::store::KeyValueStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeToken(String);

impl ChangeToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChangeToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reads and mints the change token stored under a single key.
#[derive(Clone)]
pub struct ChangeTokenLedger {
    store: Arc<dyn KeyValueStore>,
    key: &'static str,
}

impl ChangeTokenLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, key: &'static str) -> Self {
        Self { store, key }
    }

    /// Store key holding the token, for callers that fold the token into a
    /// larger atomic batch.
    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn current(&self) -> Result<Option<ChangeToken>> {
        Ok(self.store.get(self.key)?.map(ChangeToken::from))
    }

    /// Mint and persist a fresh token.
    pub fn refresh(&self) -> Result<ChangeToken> {
        let token = ChangeToken::generate();
        self.store.put(self.key, token.as_str())?;
        Ok(token)
    }

    pub fn is_current(&self, token: &ChangeToken) -> Result<bool> {
        Ok(self.current()?.as_ref() == Some(token))
    }
}
