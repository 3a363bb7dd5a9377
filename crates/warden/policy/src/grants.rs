//! Grant sources: where raw role definitions and direct package grants come from.
//!
//! The resolver only ever sees a [`RoleCatalog`]. Whether it was read from a
//! spreadsheet, a database or a config file is the source's business.

use crate::PolicyResult;
use serde::{Deserialize, Serialize};
use warden_types::RoleId;

/// One role as delivered by a grant source, before any inheritance is applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub id: RoleId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<RoleId>,
    /// Packages granted directly to this role.
    #[serde(default)]
    pub packages: Vec<String>,
}

impl RoleDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: RoleId::new(id),
            name: name.into(),
            parent: None,
            packages: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(RoleId::new(parent));
        self
    }

    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages = packages.into_iter().map(Into::into).collect();
        self
    }
}

/// Raw output of a grant source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCatalog {
    pub roles: Vec<RoleDefinition>,
}

impl RoleCatalog {
    pub fn new(roles: Vec<RoleDefinition>) -> Self {
        Self { roles }
    }

    /// The six-level engineering ladder with the stock grants.
    ///
    /// Staff and Senior Staff carry no direct grants and inherit everything
    /// below them.
    pub fn engineering_ladder() -> Self {
        Self::new(vec![
            RoleDefinition::new("associate-software-engineer", "Associate Software Engineer")
                .with_packages([
                    "numpy",
                    "pandas",
                    "requests",
                    "matplotlib",
                    "seaborn",
                    "scikit-learn",
                ]),
            RoleDefinition::new("senior-software-engineer", "Senior Software Engineer")
                .with_parent("associate-software-engineer")
                .with_packages([
                    "tensorflow",
                    "pytorch",
                    "flask",
                    "django",
                    "fastapi",
                    "docker-compose",
                ]),
            RoleDefinition::new("lead-software-engineer", "Lead Software Engineer")
                .with_parent("senior-software-engineer")
                .with_packages(["kubernetes", "helm", "terraform", "ansible", "jenkins"]),
            RoleDefinition::new("principal-software-engineer", "Principal Software Engineer")
                .with_parent("lead-software-engineer")
                .with_packages([
                    "aws-cli",
                    "azure-cli",
                    "gcp-cli",
                    "prometheus",
                    "grafana",
                    "elasticsearch",
                ]),
            RoleDefinition::new("staff-software-engineer", "Staff Software Engineer")
                .with_parent("principal-software-engineer"),
            RoleDefinition::new(
                "senior-staff-software-engineer",
                "Senior Staff Software Engineer",
            )
            .with_parent("staff-software-engineer"),
        ])
    }
}

/// Collaborator that delivers role definitions and direct grants.
///
/// Called once at startup and again on every explicit reload.
pub trait GrantSource: Send + Sync {
    fn load_grants(&self) -> PolicyResult<RoleCatalog>;
}

/// Grant source over a fixed, in-memory catalog.
#[derive(Clone, Debug, Default)]
pub struct StaticGrantSource {
    catalog: RoleCatalog,
}

impl StaticGrantSource {
    pub fn new(catalog: RoleCatalog) -> Self {
        Self { catalog }
    }
}

impl GrantSource for StaticGrantSource {
    fn load_grants(&self) -> PolicyResult<RoleCatalog> {
        Ok(self.catalog.clone())
    }
}

impl<F> GrantSource for F
where
    F: Fn() -> PolicyResult<RoleCatalog> + Send + Sync,
{
    fn load_grants(&self) -> PolicyResult<RoleCatalog> {
        self()
    }
}
