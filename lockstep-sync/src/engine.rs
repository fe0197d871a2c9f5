//! Stored-vs-computed hash comparison.
//!
//! Outcome precedence for a primary artifact:
//! 1. `Unchanged` (stored hash equals computed hash)
//! 2. `PrimaryDrifted` (only the primary moved; the caller resolves it)
//! 3. `BothDrifted` (both moved; current state is adopted as the baseline)

use lockstep_core::{ArtifactKind, PersistentStore};
use serde::{Deserialize, Serialize};

use crate::{hash_store::HashStore, hasher::StateHasher};

/// Result of one comparison step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DriftOutcome {
    Unchanged,
    /// Only `kind` drifted. Nothing was persisted.
    PrimaryDrifted {
        kind: ArtifactKind,
        old: String,
        new: String,
    },
    /// Both artifacts drifted; both computed hashes were persisted.
    BothDrifted {
        primary: ArtifactKind,
        primary_hash: String,
        secondary_hash: String,
    },
}

#[derive(Debug)]
pub struct ReconciliationEngine<S> {
    hashes: HashStore<S>,
    hasher: StateHasher,
}

impl<S: PersistentStore> ReconciliationEngine<S> {
    pub fn new(hashes: HashStore<S>, hasher: StateHasher) -> Self {
        Self { hashes, hasher }
    }

    /// Compare `primary` against its stored hash, consulting the other
    /// artifact on mismatch. Callers run this inside a
    /// [`crate::ReconciliationGuard`] region together with their handling of
    /// the outcome.
    pub fn reconcile(&mut self, primary: ArtifactKind) -> DriftOutcome {
        let old = self.hashes.get(primary);
        let new = self.hasher.compute(primary);
        if old == new {
            return DriftOutcome::Unchanged;
        }

        let secondary = primary.other();
        let old_secondary = self.hashes.get(secondary);
        let new_secondary = self.hasher.compute(secondary);
        if old_secondary == new_secondary {
            tracing::info!(artifact = %primary, old = %old, new = %new, "detected drift");
            return DriftOutcome::PrimaryDrifted {
                kind: primary,
                old,
                new,
            };
        }

        // No way to tell which side the user meant; take disk state as truth.
        tracing::info!(
            artifact = %primary,
            "lockfile and library both drifted; adopting current state",
        );
        self.hashes.set(primary, &new);
        self.hashes.set(secondary, &new_secondary);
        DriftOutcome::BothDrifted {
            primary,
            primary_hash: new,
            secondary_hash: new_secondary,
        }
    }

    /// Record both current hashes as the baseline. Returns (lockfile, library).
    pub fn adopt_current(&mut self) -> (String, String) {
        let lockfile = self.hasher.lockfile_hash();
        let library = self.hasher.library_hash();
        self.hashes.set(ArtifactKind::Lockfile, &lockfile);
        self.hashes.set(ArtifactKind::Library, &library);
        (lockfile, library)
    }

    pub fn hashes(&self) -> &HashStore<S> {
        &self.hashes
    }

    pub fn hashes_mut(&mut self) -> &mut HashStore<S> {
        &mut self.hashes
    }

    pub fn hasher(&self) -> &StateHasher {
        &self.hasher
    }
}
