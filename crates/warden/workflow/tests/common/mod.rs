#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden_executor::PackageInstaller;
use warden_guard::PackageValidator;
use warden_intent::IntentClassifier;
use warden_ledger::AuditLog;
use warden_policy::{PermissionResolver, RoleCatalog, StaticGrantSource};
use warden_types::{InstallationOutcome, PackageName, ResolvedVersion};
use warden_workflow::WorkflowOrchestrator;

pub const ASSOCIATE: &str = "associate-software-engineer";
pub const SENIOR: &str = "senior-software-engineer";
pub const SENIOR_STAFF: &str = "senior-staff-software-engineer";

#[derive(Clone, Copy, Debug)]
pub enum Behavior {
    Succeed,
    Fail,
}

/// Installer that never touches the host.
pub struct ScriptedInstaller {
    behavior: Behavior,
    delay: Duration,
    importable: bool,
    pub installs: AtomicUsize,
    pub requested: Mutex<Vec<String>>,
}

impl ScriptedInstaller {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            importable: true,
            installs: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn not_importable(mut self) -> Self {
        self.importable = false;
        self
    }

    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageInstaller for ScriptedInstaller {
    async fn install(
        &self,
        package: &PackageName,
        version: &ResolvedVersion,
    ) -> InstallationOutcome {
        self.installs.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .unwrap()
            .push(version.requirement(package));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.behavior {
            Behavior::Succeed => InstallationOutcome {
                success: true,
                raw_tool_output: format!("Successfully installed {}", package),
                verified: false,
                duration: self.delay,
                error: None,
                timed_out: false,
            },
            Behavior::Fail => InstallationOutcome {
                success: false,
                raw_tool_output: format!(
                    "ERROR: Could not find a version that satisfies the requirement {}",
                    package
                ),
                verified: false,
                duration: self.delay,
                error: Some("python3 exited with 1".to_string()),
                timed_out: false,
            },
        }
    }

    async fn verify(&self, _package: &PackageName) -> bool {
        self.importable
    }
}

pub fn resolver_for(catalog: RoleCatalog) -> Arc<PermissionResolver> {
    Arc::new(PermissionResolver::new(Arc::new(StaticGrantSource::new(catalog))).unwrap())
}

pub fn orchestrator_with(
    catalog: RoleCatalog,
    installer: Arc<dyn PackageInstaller>,
) -> WorkflowOrchestrator {
    orchestrator_recording_to(Arc::new(AuditLog::in_memory()), catalog, installer)
}

pub fn orchestrator_recording_to(
    audit: Arc<AuditLog>,
    catalog: RoleCatalog,
    installer: Arc<dyn PackageInstaller>,
) -> WorkflowOrchestrator {
    WorkflowOrchestrator::new(
        IntentClassifier::rules_only(),
        resolver_for(catalog),
        PackageValidator::default(),
        installer,
        audit,
    )
}

pub fn orchestrator(installer: Arc<dyn PackageInstaller>) -> WorkflowOrchestrator {
    orchestrator_with(RoleCatalog::engineering_ladder(), installer)
}
