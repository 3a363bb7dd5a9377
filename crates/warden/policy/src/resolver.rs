//! Effective permission resolution with per-role memoization.

use crate::grants::{GrantSource, RoleCatalog};
use crate::graph::RoleGraph;
use crate::{PolicyError, PolicyResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use warden_types::{PackageName, RoleId};

/// Effective set for one role.
pub type PackageSet = Arc<BTreeSet<PackageName>>;

/// One immutable view of the hierarchy plus its closure cache.
struct Snapshot {
    generation: u64,
    graph: RoleGraph,
    grants: HashMap<RoleId, BTreeSet<PackageName>>,
    memo: RwLock<HashMap<RoleId, PackageSet>>,
}

impl Snapshot {
    fn build(catalog: RoleCatalog, generation: u64) -> PolicyResult<Self> {
        let graph = RoleGraph::build(&catalog.roles)?;
        let grants = catalog
            .roles
            .into_iter()
            .map(|role| {
                let packages = role
                    .packages
                    .iter()
                    .map(|p| p.trim())
                    .filter(|p| !p.is_empty())
                    .map(PackageName::new)
                    .collect::<BTreeSet<_>>();
                (role.id, packages)
            })
            .collect();

        Ok(Self {
            generation,
            graph,
            grants,
            memo: RwLock::new(HashMap::new()),
        })
    }

    fn effective(&self, role: &RoleId) -> PolicyResult<PackageSet> {
        {
            let memo = self.memo.read().map_err(|_| PolicyError::LockError)?;
            if let Some(hit) = memo.get(role) {
                return Ok(Arc::clone(hit));
            }
        }

        let mut packages = BTreeSet::new();
        for ancestor in self.graph.ancestors(role)? {
            if let Some(direct) = self.grants.get(&ancestor) {
                packages.extend(direct.iter().cloned());
            }
        }
        let packages = Arc::new(packages);

        let mut memo = self.memo.write().map_err(|_| PolicyError::LockError)?;
        let entry = memo
            .entry(role.clone())
            .or_insert_with(|| Arc::clone(&packages));
        Ok(Arc::clone(entry))
    }
}

/// Per-role summary of the resolved hierarchy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoleSummary {
    pub role: RoleId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<RoleId>,
    pub depth: usize,
    pub direct_packages: Vec<String>,
    pub allowed_packages: Vec<String>,
    pub total_packages: usize,
}

/// Computes the packages each role may install.
///
/// Readers grab the current snapshot and work against it; [`reload`] builds
/// a fresh snapshot from the grant source and swaps it in whole, so a
/// resolution in flight sees either the old or the new hierarchy.
///
/// [`reload`]: PermissionResolver::reload
pub struct PermissionResolver {
    source: Arc<dyn GrantSource>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl PermissionResolver {
    /// Load grants once and build the initial snapshot.
    pub fn new(source: Arc<dyn GrantSource>) -> PolicyResult<Self> {
        let snapshot = Snapshot::build(source.load_grants()?, 1)?;
        tracing::info!(
            roles = snapshot.graph.len(),
            "Permission hierarchy loaded"
        );
        Ok(Self {
            source,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    fn current(&self) -> PolicyResult<Arc<Snapshot>> {
        let guard = self.snapshot.read().map_err(|_| PolicyError::LockError)?;
        Ok(Arc::clone(&guard))
    }

    /// Every package `role` may install, inherited grants included.
    pub fn effective_packages(&self, role: &RoleId) -> PolicyResult<PackageSet> {
        self.current()?.effective(role)
    }

    /// Check one package. A trailing `==`, `>=` or `<=` specifier is ignored.
    pub fn is_allowed(&self, role: &RoleId, package: &str) -> PolicyResult<bool> {
        let base = strip_version_specifier(package);
        if base.is_empty() {
            return Ok(false);
        }
        let allowed = self.effective_packages(role)?;
        Ok(allowed.contains(&PackageName::new(base)))
    }

    /// Whether `role` exists in the current hierarchy.
    pub fn knows_role(&self, role: &RoleId) -> PolicyResult<bool> {
        Ok(self.current()?.graph.contains(role))
    }

    /// Resolved view of every role, in definition order.
    pub fn hierarchy(&self) -> PolicyResult<Vec<RoleSummary>> {
        let snapshot = self.current()?;
        let mut summaries = Vec::with_capacity(snapshot.graph.len());

        for role in snapshot.graph.roles() {
            let allowed = snapshot.effective(&role.id)?;
            let direct = snapshot
                .grants
                .get(&role.id)
                .map(|set| set.iter().map(|p| p.to_string()).collect())
                .unwrap_or_default();
            summaries.push(RoleSummary {
                role: role.id.clone(),
                name: role.name.clone(),
                parent: role.parent.clone(),
                depth: snapshot.graph.depth(&role.id)?,
                direct_packages: direct,
                allowed_packages: allowed.iter().map(|p| p.to_string()).collect(),
                total_packages: allowed.len(),
            });
        }

        Ok(summaries)
    }

    /// Reload grants from the source and drop every memoized closure.
    ///
    /// On failure the previous snapshot stays in service.
    pub fn reload(&self) -> PolicyResult<()> {
        let catalog = self.source.load_grants()?;

        // The generation is read and bumped under the same write guard, so
        // concurrent reloads never publish the same number.
        let mut guard = self.snapshot.write().map_err(|_| PolicyError::LockError)?;
        let generation = guard.generation + 1;
        let fresh = Arc::new(Snapshot::build(catalog, generation)?);
        let roles = fresh.graph.len();
        *guard = fresh;
        drop(guard);

        tracing::info!(generation, roles, "Permission hierarchy reloaded");
        Ok(())
    }

    /// Monotonic counter bumped by every successful reload.
    pub fn generation(&self) -> PolicyResult<u64> {
        Ok(self.current()?.generation)
    }

    /// Number of roles with a memoized closure in the current snapshot.
    pub fn cached_roles(&self) -> PolicyResult<usize> {
        let snapshot = self.current()?;
        let memo = snapshot.memo.read().map_err(|_| PolicyError::LockError)?;
        Ok(memo.len())
    }
}

impl std::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionResolver").finish_non_exhaustive()
    }
}

fn strip_version_specifier(package: &str) -> &str {
    let mut base = package.trim();
    for spec in ["==", ">=", "<="] {
        if let Some((head, _)) = base.split_once(spec) {
            base = head;
        }
    }
    base.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grants::{RoleDefinition, StaticGrantSource};
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn ladder() -> PermissionResolver {
        PermissionResolver::new(Arc::new(StaticGrantSource::new(
            RoleCatalog::engineering_ladder(),
        )))
        .unwrap()
    }

    #[test]
    fn senior_inherits_associate_grants() {
        let resolver = ladder();
        let senior = RoleId::new("senior-software-engineer");

        assert!(resolver.is_allowed(&senior, "numpy").unwrap());
        assert!(resolver.is_allowed(&senior, "tensorflow").unwrap());
        assert!(!resolver.is_allowed(&senior, "kubernetes").unwrap());

        let associate = RoleId::new("associate-software-engineer");
        assert!(!resolver.is_allowed(&associate, "tensorflow").unwrap());
    }

    #[test]
    fn roles_without_direct_grants_inherit_everything_below() {
        let resolver = ladder();
        let staff = resolver
            .effective_packages(&RoleId::new("senior-staff-software-engineer"))
            .unwrap();
        let principal = resolver
            .effective_packages(&RoleId::new("principal-software-engineer"))
            .unwrap();
        assert_eq!(staff, principal);
        assert_eq!(staff.len(), 23);
    }

    #[test]
    fn comparison_ignores_case_separators_and_specifiers() {
        let resolver = ladder();
        let associate = RoleId::new("associate-software-engineer");
        assert!(resolver.is_allowed(&associate, "Scikit_Learn").unwrap());
        assert!(resolver.is_allowed(&associate, "NumPy==1.26.0").unwrap());
        assert!(resolver.is_allowed(&associate, "pandas>=2").unwrap());
        assert!(!resolver.is_allowed(&associate, "").unwrap());
    }

    #[test]
    fn unknown_role_fails() {
        let resolver = ladder();
        assert!(matches!(
            resolver.is_allowed(&RoleId::new("intern"), "numpy"),
            Err(PolicyError::UnknownRole(_))
        ));
        assert!(!resolver.knows_role(&RoleId::new("intern")).unwrap());
    }

    #[test]
    fn closures_are_memoized_until_reload() {
        let catalog = Arc::new(Mutex::new(RoleCatalog::new(vec![
            RoleDefinition::new("base", "Base").with_packages(["numpy"]),
            RoleDefinition::new("child", "Child")
                .with_parent("base")
                .with_packages(["flask"]),
        ])));
        let shared = Arc::clone(&catalog);
        let source = move || -> PolicyResult<RoleCatalog> {
            Ok(shared.lock().map_err(|_| PolicyError::LockError)?.clone())
        };
        let resolver = PermissionResolver::new(Arc::new(source)).unwrap();
        let child = RoleId::new("child");

        assert!(!resolver.is_allowed(&child, "pandas").unwrap());
        assert_eq!(resolver.cached_roles().unwrap(), 1);

        catalog.lock().unwrap().roles[0]
            .packages
            .push("pandas".to_string());

        // Still served from the memo.
        assert!(!resolver.is_allowed(&child, "pandas").unwrap());

        resolver.reload().unwrap();
        assert_eq!(resolver.generation().unwrap(), 2);
        assert_eq!(resolver.cached_roles().unwrap(), 0);
        assert!(resolver.is_allowed(&child, "pandas").unwrap());
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let broken = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&broken);
        let source = move || -> PolicyResult<RoleCatalog> {
            if *flag.lock().map_err(|_| PolicyError::LockError)? {
                Err(PolicyError::Source("spreadsheet unavailable".into()))
            } else {
                Ok(RoleCatalog::engineering_ladder())
            }
        };
        let resolver = PermissionResolver::new(Arc::new(source)).unwrap();
        *broken.lock().unwrap() = true;

        assert!(resolver.reload().is_err());
        assert_eq!(resolver.generation().unwrap(), 1);
        assert!(resolver
            .is_allowed(&RoleId::new("associate-software-engineer"), "numpy")
            .unwrap());
    }

    #[test]
    fn hierarchy_summary_reports_depth_and_counts() {
        let resolver = ladder();
        let summary = resolver.hierarchy().unwrap();
        assert_eq!(summary.len(), 6);
        assert_eq!(summary[0].depth, 0);
        assert_eq!(summary[0].total_packages, 6);
        assert_eq!(summary[3].depth, 3);
        assert!(summary[5].direct_packages.is_empty());
        assert_eq!(summary[5].total_packages, 23);
    }

    #[test]
    fn concurrent_readers_survive_reload() {
        let resolver = Arc::new(ladder());
        let role = RoleId::new("lead-software-engineer");

        let handles = (0..4)
            .map(|i| {
                let resolver = Arc::clone(&resolver);
                let role = role.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if i == 0 {
                            resolver.reload().unwrap();
                        } else {
                            let set = resolver.effective_packages(&role).unwrap();
                            assert_eq!(set.len(), 17);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn concurrent_reloads_publish_distinct_generations() {
        let resolver = Arc::new(ladder());
        let handles = (0..8)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        resolver.reload().unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(resolver.generation().unwrap(), 1 + 8 * 25);
    }

    fn tree_strategy() -> impl Strategy<Value = RoleCatalog> {
        (1usize..10)
            .prop_flat_map(|n| {
                let parents = (0..n)
                    .map(|i| {
                        if i == 0 {
                            Just(None).boxed()
                        } else {
                            proptest::option::of(0..i).boxed()
                        }
                    })
                    .collect::<Vec<_>>();
                let grants = proptest::collection::vec(
                    proptest::collection::vec("[a-d]{1,2}", 0..4),
                    n,
                );
                (parents, grants)
            })
            .prop_map(|(parents, grants)| {
                let roles = parents
                    .into_iter()
                    .zip(grants)
                    .enumerate()
                    .map(|(i, (parent, packages))| {
                        let mut def = RoleDefinition::new(format!("r{i}"), format!("Role {i}"))
                            .with_packages(packages);
                        if let Some(p) = parent {
                            def = def.with_parent(format!("r{p}"));
                        }
                        def
                    })
                    .collect();
                RoleCatalog::new(roles)
            })
    }

    proptest! {
        #[test]
        fn property_child_sets_contain_parent_sets(catalog in tree_strategy()) {
            let resolver = PermissionResolver::new(Arc::new(StaticGrantSource::new(catalog.clone()))).unwrap();
            for def in &catalog.roles {
                let own = resolver.effective_packages(&def.id).unwrap();
                if let Some(parent) = &def.parent {
                    let inherited = resolver.effective_packages(parent).unwrap();
                    prop_assert!(own.is_superset(&inherited));
                }
            }
        }

        #[test]
        fn property_ancestor_grants_are_allowed(catalog in tree_strategy()) {
            let resolver = PermissionResolver::new(Arc::new(StaticGrantSource::new(catalog.clone()))).unwrap();
            let graph = RoleGraph::build(&catalog.roles).unwrap();
            let by_id: HashMap<_, _> = catalog.roles.iter().map(|r| (r.id.clone(), r)).collect();
            for def in &catalog.roles {
                for ancestor in graph.ancestors(&def.id).unwrap() {
                    for package in &by_id[&ancestor].packages {
                        prop_assert!(resolver.is_allowed(&def.id, package).unwrap());
                    }
                }
            }
        }
    }
}
