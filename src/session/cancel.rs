//! Apply tokens: cooperative, check-based staleness
//!
//! Every Apply is stamped with the next token. A result is applied only if its token is
//! still the most recent one when it resolves. Nothing is aborted: in-flight service
//! calls run to completion and their results are dropped.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stamp carried by one Apply and everything it produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(u64);

impl Token {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic token source; clones share the counter
#[derive(Debug, Clone)]
pub struct TokenSource {
    last: Arc<AtomicU64>,
}

impl TokenSource {
    pub fn new() -> Self {
        Self {
            last: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Issue the next token; every earlier token becomes stale
    pub fn issue(&self) -> Token {
        Token(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Make every issued token stale without starting a new Apply
    pub fn invalidate(&self) {
        self.last.fetch_add(1, Ordering::SeqCst);
    }

    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }

    /// Whether `token` is still the most recent one
    pub fn is_current(&self, token: Token) -> bool {
        self.last() == token.0
    }
}

impl Default for TokenSource {
    fn default() -> Self {
        Self::new()
    }
}
