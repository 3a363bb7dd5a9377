//! Warden Guard - role-independent safety checks on what reaches the installer.
//!
//! The validator runs on every name and version string before it is placed on
//! a package-manager command line.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use warden_types::{PackageName, ResolvedVersion};

/// Longest accepted package name.
pub const DEFAULT_MAX_NAME_LEN: usize = 100;

/// Packages never installed unattended.
pub const DEFAULT_DENY_LIST: &[&str] = &[
    // Interpreter internals that shadow the standard library.
    "os",
    "sys",
    "subprocess",
    "importlib",
    "exec",
    "eval",
    // Tooling that can replace the installer itself.
    "pip",
    "setuptools",
    "virtualenv",
    // Remote shell and packet-level network tooling.
    "paramiko",
    "pexpect",
    "pwntools",
    "impacket",
    "scapy",
];

/// Guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,

    #[serde(default = "default_deny_list")]
    pub deny_list: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_name_len: DEFAULT_MAX_NAME_LEN,
            deny_list: default_deny_list(),
        }
    }
}

fn default_max_name_len() -> usize {
    DEFAULT_MAX_NAME_LEN
}

fn default_deny_list() -> Vec<String> {
    DEFAULT_DENY_LIST.iter().map(|s| s.to_string()).collect()
}

/// Validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("package name must not be empty")]
    Empty,

    #[error("'{value}' is too long ({len} characters, max {max})")]
    TooLong { value: String, len: usize, max: usize },

    #[error("'{0}' contains characters outside [A-Za-z0-9._-]")]
    InvalidCharacters(String),

    #[error("'{0}' must start and end with a letter or digit")]
    InvalidBoundary(String),

    #[error("package '{0}' is not allowed for security reasons")]
    DenyListed(String),
}

/// Checks package names and version strings.
#[derive(Debug, Clone)]
pub struct PackageValidator {
    max_name_len: usize,
    deny_list: BTreeSet<PackageName>,
}

impl PackageValidator {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            max_name_len: config.max_name_len,
            deny_list: config.deny_list.iter().map(PackageName::new).collect(),
        }
    }

    /// Validate and normalize a package name.
    pub fn validate(&self, name: &str) -> Result<PackageName, ValidationError> {
        let trimmed = name.trim();
        check_token(trimmed, self.max_name_len)?;

        let normalized = PackageName::new(trimmed);
        if self.deny_list.contains(&normalized) {
            tracing::warn!(package = %normalized, "Deny-listed package rejected");
            return Err(ValidationError::DenyListed(normalized.to_string()));
        }

        Ok(normalized)
    }

    /// Pick the version handed to the installer.
    ///
    /// An explicit version is kept verbatim after the same character checks a
    /// package name gets. No registry is consulted; `Latest` defers the choice
    /// to the package manager.
    pub fn resolve_version(
        &self,
        package: &PackageName,
        requested: Option<&str>,
    ) -> Result<ResolvedVersion, ValidationError> {
        let Some(raw) = requested.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(ResolvedVersion::Latest);
        };
        if raw.eq_ignore_ascii_case("latest") {
            return Ok(ResolvedVersion::Latest);
        }

        check_token(raw, self.max_name_len)?;
        tracing::debug!(package = %package, version = raw, "Pinned version requested");
        Ok(ResolvedVersion::Exact(raw.to_string()))
    }
}

impl Default for PackageValidator {
    fn default() -> Self {
        Self::new(&GuardConfig::default())
    }
}

fn check_token(value: &str, max_len: usize) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty);
    }

    let len = value.chars().count();
    if len > max_len {
        return Err(ValidationError::TooLong {
            value: value.chars().take(32).collect(),
            len,
            max: max_len,
        });
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ValidationError::InvalidCharacters(value.to_string()));
    }

    let bounded = value.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && value.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if !bounded {
        return Err(ValidationError::InvalidBoundary(value.to_string()));
    }

    Ok(())
}
