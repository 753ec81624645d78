//! Local session-key material, kept off chain.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;

use sesskey_core::error::Result;
use sesskey_core::SessionId;

/// Private key bytes of a session signer. `Debug` never prints them.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSecret(Vec<u8>);

impl SessionSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionSecret(<{} bytes redacted>)", self.0.len())
    }
}

/// Where session secrets live. In-memory for tests, encrypted storage in
/// production deployments.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn store(&self, id: SessionId, secret: SessionSecret) -> Result<()>;
    async fn retrieve(&self, id: SessionId) -> Result<Option<SessionSecret>>;
    async fn forget(&self, id: SessionId) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryKeyStore {
    keys: DashMap<SessionId, SessionSecret>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn store(&self, id: SessionId, secret: SessionSecret) -> Result<()> {
        self.keys.insert(id, secret);
        Ok(())
    }

    async fn retrieve(&self, id: SessionId) -> Result<Option<SessionSecret>> {
        Ok(self.keys.get(&id).map(|r| r.value().clone()))
    }

    async fn forget(&self, id: SessionId) -> Result<()> {
        self.keys.remove(&id);
        Ok(())
    }
}
