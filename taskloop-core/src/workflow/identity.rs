//! Per-attempt identity generation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use uuid::Uuid;

/// Length of the generated local part
const LOCAL_PART_LEN: usize = 12;

/// Email-like identity used for exactly one attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part after the `@`, if any
    pub fn domain(&self) -> Option<&str> {
        self.0.split_once('@').map(|(_, domain)| domain)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// No domain to build identities under; fatal for the whole run
    #[error("no usable domains available")]
    NoDomains,
}

/// Source of fresh identities
pub trait IdentityGenerator: Send + Sync {
    fn generate(&self) -> Result<Identity, IdentityError>;
}

/// Generates `<random>@<domain>` identities, rotating through a domain pool
#[derive(Debug)]
pub struct DomainPoolGenerator {
    domains: Vec<String>,
    next: AtomicUsize,
}

impl DomainPoolGenerator {
    /// Fails with [`IdentityError::NoDomains`] when no non-blank domain is given
    pub fn new<I, S>(domains: I) -> Result<Self, IdentityError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let domains: Vec<String> = domains
            .into_iter()
            .map(|d| d.into().trim().trim_start_matches('@').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        if domains.is_empty() {
            return Err(IdentityError::NoDomains);
        }

        Ok(Self {
            domains,
            next: AtomicUsize::new(0),
        })
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }
}

impl IdentityGenerator for DomainPoolGenerator {
    fn generate(&self) -> Result<Identity, IdentityError> {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.domains.len();
        let local: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(LOCAL_PART_LEN)
            .collect();

        Ok(Identity(format!("{}@{}", local, self.domains[slot])))
    }
}
