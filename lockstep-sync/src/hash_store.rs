//! Last-known artifact hashes, persisted through a [`PersistentStore`].
//!
//! Absence and backend failures both read as the empty string ("never
//! recorded"); write failures are logged and leave the old value in place,
//! which the next successful reconciliation corrects.

use lockstep_core::{ArtifactKind, PersistentStore};

/// Namespace under which both hashes are stored.
pub const NAMESPACE: &str = "lockstep";

/// Façade over the per-project store. Only the reconciliation engine writes
/// through it.
#[derive(Debug)]
pub struct HashStore<S> {
    backend: S,
}

impl<S: PersistentStore> HashStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    pub fn get(&self, kind: ArtifactKind) -> String {
        match self.backend.get(NAMESPACE, kind.store_key()) {
            Ok(Some(hash)) => hash,
            Ok(None) => String::new(),
            Err(err) => {
                tracing::warn!(artifact = %kind, error = %err, "failed to read stored hash");
                String::new()
            }
        }
    }

    pub fn set(&mut self, kind: ArtifactKind, hash: &str) {
        tracing::debug!(artifact = %kind, hash, "updating stored hash");
        if let Err(err) = self.backend.put(NAMESPACE, kind.store_key(), hash) {
            tracing::warn!(artifact = %kind, error = %err, "failed to persist hash");
        }
    }
}
