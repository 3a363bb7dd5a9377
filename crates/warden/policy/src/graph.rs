//! Single-parent role hierarchy.

use crate::grants::RoleDefinition;
use crate::{PolicyError, PolicyResult};
use std::collections::HashMap;
use warden_types::RoleId;

/// A role node in the hierarchy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub parent: Option<RoleId>,
}

/// Immutable role tree. Children inherit from their parent.
#[derive(Clone, Debug, Default)]
pub struct RoleGraph {
    roles: Vec<Role>,
    index: HashMap<RoleId, usize>,
}

impl RoleGraph {
    /// Build the graph, rejecting duplicates, dangling parents and cycles.
    pub fn build(definitions: &[RoleDefinition]) -> PolicyResult<Self> {
        let mut roles = Vec::with_capacity(definitions.len());
        let mut index = HashMap::with_capacity(definitions.len());

        for definition in definitions {
            if index.contains_key(&definition.id) {
                return Err(PolicyError::DuplicateRole(definition.id.clone()));
            }
            index.insert(definition.id.clone(), roles.len());
            roles.push(Role {
                id: definition.id.clone(),
                name: definition.name.clone(),
                parent: definition.parent.clone(),
            });
        }

        for role in &roles {
            if let Some(parent) = &role.parent {
                if !index.contains_key(parent) {
                    return Err(PolicyError::DanglingParent {
                        role: role.id.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        let graph = Self { roles, index };
        for role in &graph.roles {
            graph.walk(&role.id)?;
        }
        Ok(graph)
    }

    /// Roles from `role` up to its root, `role` first.
    pub fn ancestors(&self, role: &RoleId) -> PolicyResult<Vec<RoleId>> {
        self.walk(role)
    }

    fn walk(&self, role: &RoleId) -> PolicyResult<Vec<RoleId>> {
        let mut chain = Vec::new();
        let mut current = Some(self.get(role)?);

        while let Some(node) = current {
            // A chain longer than the role count must revisit a node.
            if chain.len() == self.roles.len() {
                return Err(PolicyError::Cycle(role.clone()));
            }
            chain.push(node.id.clone());
            current = match &node.parent {
                Some(parent) => Some(self.get(parent)?),
                None => None,
            };
        }

        Ok(chain)
    }

    pub fn get(&self, role: &RoleId) -> PolicyResult<&Role> {
        self.index
            .get(role)
            .map(|&i| &self.roles[i])
            .ok_or_else(|| PolicyError::UnknownRole(role.clone()))
    }

    pub fn contains(&self, role: &RoleId) -> bool {
        self.index.contains_key(role)
    }

    pub fn parent(&self, role: &RoleId) -> PolicyResult<Option<&RoleId>> {
        Ok(self.get(role)?.parent.as_ref())
    }

    /// Distance to the root; roots have depth 0.
    pub fn depth(&self, role: &RoleId) -> PolicyResult<usize> {
        Ok(self.ancestors(role)?.len() - 1)
    }

    /// Roles in definition order.
    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.iter()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
