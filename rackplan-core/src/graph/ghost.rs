//! Single-slot placement preview
//!
//! The ghost lives outside the entity map and the indices until confirmed.

use super::EntityGraph;
use crate::diagnostics::DiagnosticCategory;
use crate::entity::{describe_issues, AttributeIssue, AttributePatch, Entity, EntityKind, EntityStatus, ParentRef, Vec3};
use crate::ids::LocalId;

impl EntityGraph {
    /// Start a preview of `kind`, replacing any existing ghost
    pub fn begin_ghost(&mut self, kind: EntityKind, parent: Option<ParentRef>) -> LocalId {
        if let Some(old) = self.ghost.take() {
            self.diagnostics.debug(
                DiagnosticCategory::Lifecycle,
                Some(&old.local_id),
                "ghost replaced",
            );
        }
        let parent = self.normalize_parent(parent);
        let path = self.path_for(parent.as_ref(), kind);
        let ghost = Entity::ghost(kind, parent, path);
        let id = ghost.local_id.clone();
        self.ghost = Some(ghost);
        self.diagnostics
            .debug(DiagnosticCategory::Lifecycle, Some(&id), format!("{} ghost started", kind));
        id
    }

    pub fn ghost(&self) -> Option<&Entity> {
        self.ghost.as_ref()
    }

    pub fn move_ghost(&mut self, position: Vec3) -> bool {
        match self.ghost.as_mut() {
            Some(ghost) => {
                ghost.attributes.set_position(position);
                true
            }
            None => {
                self.diagnostics
                    .warn(DiagnosticCategory::Lifecycle, None, "move ignored: no ghost");
                false
            }
        }
    }

    /// Merge `patch` into the ghost. `None` when there is no ghost.
    pub fn patch_ghost(&mut self, patch: &AttributePatch) -> Option<Vec<AttributeIssue>> {
        let Some(ghost) = self.ghost.as_mut() else {
            self.diagnostics
                .warn(DiagnosticCategory::Lifecycle, None, "patch ignored: no ghost");
            return None;
        };
        match ghost.attributes.apply_patch(patch) {
            Ok(merged) => {
                let issues = merged.validate();
                ghost.attributes = merged;
                Some(issues)
            }
            Err(issues) => {
                let id = ghost.local_id.clone();
                self.diagnostics.warn(
                    DiagnosticCategory::Validation,
                    Some(&id),
                    format!("ghost patch rejected: {}", describe_issues(&issues)),
                );
                Some(issues)
            }
        }
    }

    /// Move the ghost into the map as a draft
    pub fn confirm_ghost(&mut self) -> Option<LocalId> {
        let Some(mut ghost) = self.ghost.take() else {
            self.diagnostics
                .warn(DiagnosticCategory::Lifecycle, None, "confirm ignored: no ghost");
            return None;
        };
        let kind = ghost.kind();
        ghost.status = EntityStatus::Draft;
        ghost.dirty = true;
        if ghost.name.is_empty() {
            ghost.name = kind.as_str().to_string();
        }
        let issues = ghost.attributes.validate();
        let id = self.insert_entity(ghost);

        if !issues.is_empty() {
            self.diagnostics.warn(
                DiagnosticCategory::Validation,
                Some(&id),
                format!("{} confirmed with invalid attributes: {}", kind, describe_issues(&issues)),
            );
        }
        self.diagnostics
            .info(DiagnosticCategory::Created, Some(&id), format!("{} draft confirmed from ghost", kind));
        Some(id)
    }

    pub fn cancel_ghost(&mut self) -> bool {
        match self.ghost.take() {
            Some(ghost) => {
                self.diagnostics.debug(
                    DiagnosticCategory::Lifecycle,
                    Some(&ghost.local_id),
                    "ghost cancelled",
                );
                true
            }
            None => false,
        }
    }
}
