//! Capability → subject mapping for the worker side.
//!
//! Workers receive the same bootstrap shape the client fetches; subjects
//! come from it, never from local guessing.

use std::collections::BTreeMap;

use capbus_core::ResolveOutput;
use capbus_core::wire::BootstrapReply;
use snafu::Snafu;

/// Result type for bootstrap lookups.
pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;

/// Errors from bootstrap lookups.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum BootstrapError {
    /// The capability is not in the bootstrap mapping.
    #[snafu(display("capability '{cap_ref}' is not in the worker bootstrap"))]
    UnknownCapability {
        /// The reference that failed to map.
        cap_ref: String,
    },

    /// The mapped entry has no subject.
    #[snafu(display("bootstrap entry for '{cap_ref}' has no subject"))]
    MissingSubject {
        /// The reference whose entry is unusable.
        cap_ref: String,
    },
}

/// The worker's bootstrap mapping.
#[derive(Debug, Clone, Default)]
pub struct WorkerBootstrap {
    capabilities: BTreeMap<String, ResolveOutput>,
}

impl WorkerBootstrap {
    /// Build from a bootstrap reply.
    pub fn from_reply(reply: BootstrapReply) -> Self {
        Self {
            capabilities: reply.capabilities,
        }
    }

    /// Add one mapping.
    pub fn insert(&mut self, cap_ref: impl Into<String>, entry: ResolveOutput) {
        self.capabilities.insert(cap_ref.into(), entry);
    }

    /// Subject a capability is served on.
    pub fn subject_for(&self, cap_ref: &str) -> Result<&str> {
        let entry = self
            .capabilities
            .get(cap_ref)
            .ok_or_else(|| UnknownCapabilitySnafu { cap_ref: cap_ref.to_string() }.build())?;
        if entry.subject.is_empty() {
            return MissingSubjectSnafu { cap_ref: cap_ref.to_string() }.fail();
        }
        Ok(&entry.subject)
    }

    /// Number of mapped capabilities.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// True when nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
