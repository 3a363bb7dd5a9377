//! Warden Types - the shared vocabulary of the installation pipeline.
//!
//! Everything that crosses a crate boundary lives here: identifiers, the
//! classified [`Intent`], the audited [`InstallationRequest`], the executor's
//! [`InstallationOutcome`] and the caller-facing [`WorkflowResult`].
#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleId(pub String);
impl RoleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl std::fmt::Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The person (or service account) a request is made on behalf of.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequesterId(pub String);
impl RequesterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}
impl std::fmt::Display for RequesterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);
impl RequestId {
    pub fn generate() -> Self {
        Self(format!("req-{}", uuid::Uuid::new_v4()))
    }
}
impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A package identifier as granted, requested or installed.
///
/// The stored form is trimmed and lowercased. Equality, hashing and ordering
/// go through [`PackageName::key`], so `Scikit_Learn`, `scikit-learn` and
/// `scikit.learn` are the same package.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Separator-folded comparison key.
    pub fn key(&self) -> String {
        self.0
            .chars()
            .map(|c| if c == '_' || c == '.' { '-' } else { c })
            .collect()
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for PackageName {}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentAction {
    Install,
    Unknown,
}

/// Which classifier phase produced an intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSource {
    Rule,
    Model,
}

/// Structured interpretation of one free-text request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub action: IntentAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub confidence_source: ConfidenceSource,
}

impl Intent {
    pub fn install(
        package_name: impl Into<String>,
        version: Option<String>,
        confidence_source: ConfidenceSource,
    ) -> Self {
        Self {
            action: IntentAction::Install,
            package_name: Some(package_name.into()),
            version,
            confidence_source,
        }
    }

    pub fn unknown(confidence_source: ConfidenceSource) -> Self {
        Self {
            action: IntentAction::Unknown,
            package_name: None,
            version: None,
            confidence_source,
        }
    }

    /// Install intents without a package name are treated as unknown.
    pub fn is_install(&self) -> bool {
        self.action == IntentAction::Install
            && self
                .package_name
                .as_deref()
                .is_some_and(|name| !name.trim().is_empty())
    }
}

/// Audited lifecycle status of an installation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    CheckingPermission,
    Validating,
    Installing,
    Verifying,
    Completed,
    Denied,
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Denied | RequestStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::CheckingPermission => "checking_permission",
            RequestStatus::Validating => "validating",
            RequestStatus::Installing => "installing",
            RequestStatus::Verifying => "verifying",
            RequestStatus::Completed => "completed",
            RequestStatus::Denied => "denied",
            RequestStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "checking_permission" => Ok(RequestStatus::CheckingPermission),
            "validating" => Ok(RequestStatus::Validating),
            "installing" => Ok(RequestStatus::Installing),
            "verifying" => Ok(RequestStatus::Verifying),
            "completed" => Ok(RequestStatus::Completed),
            "denied" => Ok(RequestStatus::Denied),
            "failed" => Ok(RequestStatus::Failed),
            other => Err(format!("unknown request status: {}", other)),
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one installation attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallationRequest {
    pub request_id: RequestId,
    pub requester: RequesterId,
    pub role: RoleId,
    pub package_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_version: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,
    pub verified: bool,
}

/// Concrete version handed to the installer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ResolvedVersion {
    /// Let the package manager choose.
    Latest,
    Exact(String),
}

impl ResolvedVersion {
    pub fn exact(&self) -> Option<&str> {
        match self {
            ResolvedVersion::Latest => None,
            ResolvedVersion::Exact(version) => Some(version),
        }
    }

    /// Requirement string in package-manager syntax, e.g. `numpy==1.26.0`.
    pub fn requirement(&self, package: &PackageName) -> String {
        match self {
            ResolvedVersion::Latest => package.as_str().to_string(),
            ResolvedVersion::Exact(version) => format!("{}=={}", package, version),
        }
    }
}

impl std::fmt::Display for ResolvedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedVersion::Latest => f.write_str("latest"),
            ResolvedVersion::Exact(version) => f.write_str(version),
        }
    }
}

/// Result of one install + verify cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallationOutcome {
    pub success: bool,
    pub raw_tool_output: String,
    pub verified: bool,
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
}

/// How a workflow run ended, from the caller's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    NotInstall,
    PermissionDenied,
    ValidationFailed,
    InstallationFailed,
    InstallationSuccess,
}

/// Immutable record returned to the caller once a run is finalized.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub kind: ResultKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub message: String,
    #[serde(default)]
    pub raw_output: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_packages: Vec<String>,
}

impl WorkflowResult {
    pub fn success(&self) -> bool {
        self.kind == ResultKind::InstallationSuccess
    }
}

/// States of the installation workflow, including the two absorbing
/// failure branches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Received,
    Classified,
    Logged,
    PermissionChecked,
    Validated,
    VersionResolved,
    Installed,
    Verified,
    Finalized,
    Denied,
    Failed,
}

impl WorkflowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStage::Received => "received",
            WorkflowStage::Classified => "classified",
            WorkflowStage::Logged => "logged",
            WorkflowStage::PermissionChecked => "permission_checked",
            WorkflowStage::Validated => "validated",
            WorkflowStage::VersionResolved => "version_resolved",
            WorkflowStage::Installed => "installed",
            WorkflowStage::Verified => "verified",
            WorkflowStage::Finalized => "finalized",
            WorkflowStage::Denied => "denied",
            WorkflowStage::Failed => "failed",
        }
    }

    pub fn is_absorbing(&self) -> bool {
        matches!(
            self,
            WorkflowStage::Finalized | WorkflowStage::Denied | WorkflowStage::Failed
        )
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn request_status_parses_its_own_names() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::CheckingPermission,
            RequestStatus::Installing,
            RequestStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>(), Ok(status));
        }
        assert!("archived".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn package_names_fold_case_and_separators() {
        let a = PackageName::new("Scikit_Learn");
        let b = PackageName::new(" scikit-learn ");
        let c = PackageName::new("scikit.learn");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.as_str(), "scikit_learn");

        let set: BTreeSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn terminal_statuses() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Denied.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(!RequestStatus::Installing.is_terminal());
        assert_eq!(
            serde_json::to_string(&RequestStatus::CheckingPermission).unwrap(),
            "\"checking_permission\""
        );
    }

    #[test]
    fn install_intent_requires_a_package_name() {
        let blank = Intent::install("  ", None, ConfidenceSource::Model);
        assert!(!blank.is_install());
        assert!(Intent::install("numpy", None, ConfidenceSource::Rule).is_install());
        assert!(!Intent::unknown(ConfidenceSource::Rule).is_install());
    }

    #[test]
    fn requirement_strings() {
        let numpy = PackageName::new("numpy");
        assert_eq!(ResolvedVersion::Latest.requirement(&numpy), "numpy");
        assert_eq!(
            ResolvedVersion::Exact("1.26.0".into()).requirement(&numpy),
            "numpy==1.26.0"
        );
        assert_eq!(ResolvedVersion::Latest.to_string(), "latest");
    }
}
