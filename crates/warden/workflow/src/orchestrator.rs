//! The installation state machine.
//!
//! ```text
//! Received -> Classified -> Logged -> PermissionChecked -> Validated
//!          -> VersionResolved -> Installed -> Verified -> Finalized
//! ```
//!
//! `Denied` and `Failed` are absorbing. A request that is not an install
//! request goes straight from `Classified` to `Finalized` without a record.
//! Nothing is retried.
//!
//! Each stage entered is journaled exactly once, carrying the status the
//! record moves to. Statuses that only mark an activity as started go to the
//! store alone.

use crate::error::{OrchestratorResult, WorkflowError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use warden_executor::{InstallerConfig, PackageInstaller};
use warden_guard::PackageValidator;
use warden_intent::IntentClassifier;
use warden_ledger::{AuditLog, NewRequest, RequestUpdate};
use warden_policy::{PermissionResolver, PolicyError};
use warden_types::{
    InstallationOutcome, PackageName, RequestId, RequestStatus, RequesterId, ResolvedVersion, ResultKind, RoleId,
    WorkflowResult, WorkflowStage,
};

/// How many permitted packages a denial lists.
pub const ALLOWED_SAMPLE_SIZE: usize = 10;

/// Slack on top of the installer's own limits before the orchestrator gives
/// up on a call.
pub const INSTALLER_GRACE: Duration = Duration::from_secs(10);

const NOT_INSTALL_MESSAGE: &str =
    "That does not look like an installation request. Try something like \"install numpy\".";

/// Outer bounds on installer calls.
///
/// A well-behaved installer enforces its own timeouts and returns first.
/// These catch one that never returns; the call is dropped, which cancels
/// any child process it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLimits {
    pub install: Duration,
    pub verify: Duration,
}

impl StageLimits {
    pub fn from_config(config: &InstallerConfig) -> Self {
        Self {
            install: Duration::from_secs(config.timeout_secs) + INSTALLER_GRACE,
            verify: Duration::from_secs(config.verify_timeout_secs) + INSTALLER_GRACE,
        }
    }
}

impl Default for StageLimits {
    fn default() -> Self {
        Self::from_config(&InstallerConfig::default())
    }
}

/// Runs one request at a time through the workflow. Shared across
/// concurrent runs; the only mutable state lives in the [`AuditLog`].
pub struct WorkflowOrchestrator {
    classifier: IntentClassifier,
    resolver: Arc<PermissionResolver>,
    validator: PackageValidator,
    installer: Arc<dyn PackageInstaller>,
    audit: Arc<AuditLog>,
    limits: StageLimits,
}

impl WorkflowOrchestrator {
    pub fn new(
        classifier: IntentClassifier,
        resolver: Arc<PermissionResolver>,
        validator: PackageValidator,
        installer: Arc<dyn PackageInstaller>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            classifier,
            resolver,
            validator,
            installer,
            audit,
            limits: StageLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: StageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> StageLimits {
        self.limits
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn resolver(&self) -> &Arc<PermissionResolver> {
        &self.resolver
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    /// Take a free-text request from `requester` acting as `role` through
    /// to a finalized result. Never panics and never returns an error:
    /// every failure is a result the caller can show.
    #[tracing::instrument(skip(self, text), fields(requester = %requester, role = %role))]
    pub async fn process_request(
        &self,
        requester: &RequesterId,
        role: &RoleId,
        text: &str,
    ) -> WorkflowResult {
        self.note(WorkflowStage::Received, format!("{} as {}", requester, role));

        let intent = self.classifier.classify(text).await;
        self.note(
            WorkflowStage::Classified,
            format!(
                "{:?} via {:?}",
                intent.action, intent.confidence_source
            ),
        );

        let package = match intent.package_name.as_deref().map(str::trim) {
            Some(package) if intent.is_install() => package.to_string(),
            _ => {
                tracing::info!("Request is not an installation request");
                self.note(WorkflowStage::Finalized, "not an installation request");
                return WorkflowResult {
                    kind: ResultKind::NotInstall,
                    status: None,
                    request_id: None,
                    package: None,
                    version: None,
                    message: NOT_INSTALL_MESSAGE.to_string(),
                    raw_output: String::new(),
                    verified: false,
                    allowed_packages: Vec::new(),
                };
            }
        };

        let opened = self
            .audit
            .open(NewRequest {
                requester: requester.clone(),
                role: role.clone(),
                package_name: package.clone(),
                requested_version: intent.version.clone(),
            })
            .await;
        let id = match opened {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, "Could not record installation request");
                return WorkflowResult {
                    kind: ResultKind::InstallationFailed,
                    status: None,
                    request_id: None,
                    package: Some(package),
                    version: intent.version,
                    message: format!("The request could not be recorded: {}", e),
                    raw_output: String::new(),
                    verified: false,
                    allowed_packages: Vec::new(),
                };
            }
        };

        match self
            .drive(&id, role, &package, intent.version.as_deref())
            .await
        {
            Ok(result) => result,
            Err(e) => self.abort(&id, &package, e).await,
        }
    }

    async fn drive(
        &self,
        id: &RequestId,
        role: &RoleId,
        requested: &str,
        version: Option<&str>,
    ) -> OrchestratorResult<WorkflowResult> {
        self.audit
            .update(id, RequestUpdate::status(RequestStatus::CheckingPermission))
            .await?;

        let allowed = match self.resolver.is_allowed(role, requested) {
            Ok(allowed) => allowed,
            Err(PolicyError::UnknownRole(_)) => false,
            Err(e) => return Err(e.into()),
        };
        if !allowed {
            return self.deny(id, role, requested).await;
        }
        self.audit
            .transition(
                id,
                WorkflowStage::PermissionChecked,
                RequestUpdate::status(RequestStatus::Validating),
                format!("{} may install {}", role, requested),
            )
            .await?;
        let package = match self.validator.validate(requested) {
            Ok(package) => package,
            Err(e) => {
                return self
                    .fail(
                        id,
                        ResultKind::ValidationFailed,
                        requested,
                        None,
                        format!("Invalid package request: {}", e),
                        String::new(),
                    )
                    .await;
            }
        };
        self.audit
            .mark(id, WorkflowStage::Validated, package.to_string())?;

        let resolved = match self.validator.resolve_version(&package, version) {
            Ok(resolved) => resolved,
            Err(e) => {
                return self
                    .fail(
                        id,
                        ResultKind::ValidationFailed,
                        package.as_str(),
                        version.map(str::to_string),
                        format!("Invalid version request: {}", e),
                        String::new(),
                    )
                    .await;
            }
        };
        self.audit
            .transition(
                id,
                WorkflowStage::VersionResolved,
                RequestUpdate::status(RequestStatus::Installing),
                resolved.requirement(&package),
            )
            .await?;
        let outcome = self.install_within_limit(&package, &resolved).await;

        if !outcome.success {
            let reason = outcome
                .error
                .clone()
                .unwrap_or_else(|| "installer reported failure".to_string());
            let message = if outcome.timed_out {
                format!("Installation of {} timed out: {}", package, reason)
            } else {
                format!("Installation of {} failed: {}", package, reason)
            };
            return self
                .fail(
                    id,
                    ResultKind::InstallationFailed,
                    package.as_str(),
                    Some(resolved.to_string()),
                    message,
                    outcome.raw_tool_output,
                )
                .await;
        }

        self.audit
            .transition(
                id,
                WorkflowStage::Installed,
                RequestUpdate::status(RequestStatus::Verifying)
                    .with_output(outcome.raw_tool_output.clone()),
                format!("installed in {}ms", outcome.duration.as_millis()),
            )
            .await?;

        let verified = match tokio::time::timeout(
            self.limits.verify,
            self.installer.verify(&package),
        )
        .await
        {
            Ok(verified) => verified,
            Err(_) => {
                tracing::warn!(request_id = %id, package = %package, "Import check did not return in time");
                false
            }
        };
        self.audit
            .transition(
                id,
                WorkflowStage::Verified,
                RequestUpdate::default()
                    .with_verified(verified)
                    .with_installed_version(resolved.to_string()),
                if verified {
                    "import check passed"
                } else {
                    "import check failed"
                },
            )
            .await?;

        Ok(self
            .finalize(id, &package, &resolved, outcome.raw_tool_output, verified)
            .await)
    }

    async fn install_within_limit(
        &self,
        package: &PackageName,
        resolved: &ResolvedVersion,
    ) -> InstallationOutcome {
        let started = Instant::now();
        match tokio::time::timeout(self.limits.install, self.installer.install(package, resolved))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    package = %package,
                    limit_secs = self.limits.install.as_secs(),
                    "Installer did not return in time"
                );
                InstallationOutcome {
                    success: false,
                    raw_tool_output: String::new(),
                    verified: false,
                    duration: started.elapsed(),
                    error: Some(format!(
                        "installer did not return within {}s",
                        self.limits.install.as_secs()
                    )),
                    timed_out: true,
                }
            }
        }
    }

    async fn finalize(
        &self,
        id: &RequestId,
        package: &PackageName,
        resolved: &ResolvedVersion,
        raw_output: String,
        verified: bool,
    ) -> WorkflowResult {
        let mut message = if verified {
            format!("Successfully installed {} ({})", package, resolved)
        } else {
            format!(
                "Installed {} ({}), but it could not be imported afterwards",
                package, resolved
            )
        };

        let finalized = self
            .audit
            .transition(
                id,
                WorkflowStage::Finalized,
                RequestUpdate::status(RequestStatus::Completed),
                "completed",
            )
            .await;
        if let Err(e) = finalized {
            tracing::error!(request_id = %id, error = %e, "Could not finalize request record");
            message.push_str(&format!(" (audit record not finalized: {})", e));
        }

        tracing::info!(request_id = %id, package = %package, verified, "Installation completed");
        WorkflowResult {
            kind: ResultKind::InstallationSuccess,
            status: Some(RequestStatus::Completed),
            request_id: Some(id.clone()),
            package: Some(package.to_string()),
            version: Some(resolved.to_string()),
            message,
            raw_output,
            verified,
            allowed_packages: Vec::new(),
        }
    }

    async fn deny(
        &self,
        id: &RequestId,
        role: &RoleId,
        requested: &str,
    ) -> OrchestratorResult<WorkflowResult> {
        let reason = if self.resolver.knows_role(role)? {
            format!("Role '{}' is not permitted to install '{}'", role, requested)
        } else {
            format!("Unknown role '{}'", role)
        };
        let allowed_packages: Vec<String> = self
            .resolver
            .effective_packages(role)
            .map(|set| {
                set.iter()
                    .take(ALLOWED_SAMPLE_SIZE)
                    .map(|package| package.to_string())
                    .collect()
            })
            .unwrap_or_default();

        self.audit
            .transition(
                id,
                WorkflowStage::Denied,
                RequestUpdate::status(RequestStatus::Denied).with_error(reason.clone()),
                reason.clone(),
            )
            .await?;
        tracing::info!(request_id = %id, package = requested, "Installation denied");

        Ok(WorkflowResult {
            kind: ResultKind::PermissionDenied,
            status: Some(RequestStatus::Denied),
            request_id: Some(id.clone()),
            package: Some(requested.to_string()),
            version: None,
            message: format!("Permission denied: {}", reason),
            raw_output: String::new(),
            verified: false,
            allowed_packages,
        })
    }

    async fn fail(
        &self,
        id: &RequestId,
        kind: ResultKind,
        package: &str,
        version: Option<String>,
        message: String,
        raw_output: String,
    ) -> OrchestratorResult<WorkflowResult> {
        let mut update = RequestUpdate::status(RequestStatus::Failed).with_error(message.clone());
        if !raw_output.is_empty() {
            update = update.with_output(raw_output.clone());
        }
        self.audit
            .transition(id, WorkflowStage::Failed, update, message.clone())
            .await?;
        tracing::warn!(request_id = %id, package, reason = %message, "Installation request failed");

        Ok(WorkflowResult {
            kind,
            status: Some(RequestStatus::Failed),
            request_id: Some(id.clone()),
            package: Some(package.to_string()),
            version,
            message,
            raw_output,
            verified: false,
            allowed_packages: Vec::new(),
        })
    }

    /// A ledger or policy failure cut the run short. Try to leave the record
    /// in `failed` and report what happened.
    async fn abort(&self, id: &RequestId, package: &str, error: WorkflowError) -> WorkflowResult {
        tracing::error!(request_id = %id, error = %error, "Workflow aborted");
        let marked = self
            .audit
            .transition(
                id,
                WorkflowStage::Failed,
                RequestUpdate::status(RequestStatus::Failed).with_error(error.to_string()),
                "aborted",
            )
            .await;
        if let Err(e) = marked {
            tracing::error!(request_id = %id, error = %e, "Could not mark aborted request as failed");
        }

        WorkflowResult {
            kind: ResultKind::InstallationFailed,
            status: Some(RequestStatus::Failed),
            request_id: Some(id.clone()),
            package: Some(package.to_string()),
            version: None,
            message: format!("Request could not be completed: {}", error),
            raw_output: String::new(),
            verified: false,
            allowed_packages: Vec::new(),
        }
    }

    fn note(&self, stage: WorkflowStage, detail: impl Into<String>) {
        if let Err(e) = self.audit.note(stage, detail) {
            tracing::warn!(stage = %stage, error = %e, "Could not journal transition");
        }
    }
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("classifier", &self.classifier)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}
