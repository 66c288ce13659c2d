//! Identifier registry.
//!
//! Every invocation hands the guest an ephemeral, unguessable token.  The
//! guest passes it back as the last argument of each capability call, and
//! the host resolves it here to the `(environment, instance)` pair it was
//! minted for.  Tokens are retired as soon as the invocation ends, so a
//! replayed, guessed, or foreign token fails to resolve.
//!
//! The registry is an explicitly owned object shared by `Arc`; there is no
//! process-wide table.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SandboxError};

/// Stable identity of an [`Environment`](crate::Environment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentId(Uuid);

impl EnvironmentId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EnvironmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a token resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    /// The environment owning the instance.
    pub env: EnvironmentId,
    /// Position of the instance inside the environment's pool.
    pub index: usize,
}

/// Maps live tokens to the instance they were minted for.
pub struct IdentRegistry {
    table: RwLock<HashMap<i32, InstanceRef>>,
    rng: SystemRandom,
}

impl IdentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            rng: SystemRandom::new(),
        }
    }

    /// Mint a new token bound to `reference`.
    ///
    /// The value is drawn from the system CSPRNG in `[0, i32::MAX)` and
    /// re-rolled on collision before it is published.
    pub fn mint(&self, reference: InstanceRef) -> Result<i32> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);

        loop {
            let token = self.random_token()?;
            if table.contains_key(&token) {
                tracing::debug!(token, "identifier collision, re-rolling");
                continue;
            }
            table.insert(token, reference);
            return Ok(token);
        }
    }

    /// Look up the instance a token was minted for.
    pub fn resolve(&self, token: i32) -> Option<InstanceRef> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&token)
            .copied()
    }

    /// Remove a token.  Later lookups of the same value fail.
    pub fn retire(&self, token: i32) {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token);
    }

    /// Mint a token that is retired when the returned guard drops.
    pub fn scoped(&self, reference: InstanceRef) -> Result<TokenGuard<'_>> {
        let token = self.mint(reference)?;
        Ok(TokenGuard {
            registry: self,
            token,
        })
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no tokens are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn random_token(&self) -> Result<i32> {
        loop {
            let mut buf = [0u8; 4];
            self.rng.fill(&mut buf).map_err(|_| SandboxError::Entropy)?;
            let candidate = (u32::from_le_bytes(buf) & 0x7fff_ffff) as i32;
            if candidate != i32::MAX {
                return Ok(candidate);
            }
        }
    }
}

impl Default for IdentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A live token, retired on drop.
pub struct TokenGuard<'a> {
    registry: &'a IdentRegistry,
    token: i32,
}

impl TokenGuard<'_> {
    /// The raw value handed to the guest.
    pub fn token(&self) -> i32 {
        self.token
    }
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        self.registry.retire(self.token);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    fn reference(index: usize) -> InstanceRef {
        InstanceRef {
            env: EnvironmentId::new(),
            index,
        }
    }

    #[test]
    fn mint_resolve_retire() {
        let reg = IdentRegistry::new();
        let r = reference(3);
        let token = reg.mint(r).unwrap();
        assert!(token >= 0);
        assert_eq!(reg.resolve(token), Some(r));

        reg.retire(token);
        assert_eq!(reg.resolve(token), None);
        assert!(reg.is_empty());
    }

    #[test]
    fn unknown_token_does_not_resolve() {
        let reg = IdentRegistry::new();
        let token = reg.mint(reference(0)).unwrap();
        let other = if token == 0 { 1 } else { token - 1 };
        assert_eq!(reg.resolve(other), None);
    }

    #[test]
    fn guard_retires_on_drop() {
        let reg = IdentRegistry::new();
        let token = {
            let guard = reg.scoped(reference(0)).unwrap();
            assert!(reg.resolve(guard.token()).is_some());
            guard.token()
        };
        assert_eq!(reg.resolve(token), None);
    }

    #[test]
    fn concurrent_mints_are_unique() {
        let reg = Arc::new(IdentRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    (0..250)
                        .map(|_| reg.mint(reference(i)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for token in h.join().unwrap() {
                assert!(seen.insert(token), "duplicate token {token}");
            }
        }
        assert_eq!(seen.len(), 2000);
        assert_eq!(reg.len(), 2000);
    }
}
