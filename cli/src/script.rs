//! Replay scripts: a TOML list of editor intents run against an in-memory store
//!
//! ```toml
//! scope = "site-1"
//!
//! [[step]]
//! op = "add"
//! alias = "floor"
//! kind = "floor"
//!
//! [[step]]
//! op = "add"
//! alias = "a1"
//! kind = "rack"
//! parent = "floor"
//! at = [1.0, 0.0, 1.0]
//!
//! [[step]]
//! op = "commit"
//! ```
//!
//! Entities are referred to by script-local aliases. Commit and sync failures
//! are reported per step and do not stop the replay; unknown aliases do.

use anyhow::{anyhow, bail, Context, Result};
use rackplan_core::{
    AttributePatch, EditorOptions, Entity, EntityKind, LayoutEditor, LocalId, MemoryRemoteStore,
    ParentRef, ScopeId, Vec3,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const LOAD_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Deserialize)]
pub struct Script {
    pub scope: Option<String>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Add {
        alias: String,
        kind: EntityKind,
        parent: Option<String>,
        name: Option<String>,
        at: Option<[f64; 3]>,
        attrs: Option<serde_json::Value>,
    },
    Update {
        target: String,
        at: Option<[f64; 3]>,
        attrs: Option<serde_json::Value>,
    },
    Remove {
        target: String,
        #[serde(default = "default_soft")]
        soft: bool,
    },
    Discard {
        target: String,
    },
    /// Commit one entity, or every draft when `target` is absent
    Commit {
        target: Option<String>,
    },
    /// Sync one entity, or every dirty one when `target` is absent
    Sync {
        target: Option<String>,
    },
    Undo,
    Redo,
    Ghost {
        alias: String,
        kind: EntityKind,
        parent: Option<String>,
        at: Option<[f64; 3]>,
    },
    Confirm,
    FailNext {
        #[serde(default = "default_failure")]
        message: String,
    },
}

fn default_soft() -> bool {
    true
}

fn default_failure() -> String {
    "injected failure".to_string()
}

impl Step {
    pub fn op(&self) -> &'static str {
        match self {
            Step::Add { .. } => "add",
            Step::Update { .. } => "update",
            Step::Remove { .. } => "remove",
            Step::Discard { .. } => "discard",
            Step::Commit { .. } => "commit",
            Step::Sync { .. } => "sync",
            Step::Undo => "undo",
            Step::Redo => "redo",
            Step::Ghost { .. } => "ghost",
            Step::Confirm => "confirm",
            Step::FailNext { .. } => "fail_next",
        }
    }
}

impl Script {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse script {}", path.display()))
    }
}

/// Outcome of one script step
#[derive(Clone, Debug, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub op: &'static str,
    pub ok: bool,
    pub detail: String,
}

impl StepReport {
    fn ok(index: usize, op: &'static str, detail: impl Into<String>) -> Self {
        Self {
            index,
            op,
            ok: true,
            detail: detail.into(),
        }
    }

    fn failed(index: usize, op: &'static str, detail: impl Into<String>) -> Self {
        Self {
            index,
            op,
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Runs scripts against a fresh editor over a [`MemoryRemoteStore`]
pub struct ScriptRunner {
    store: Arc<MemoryRemoteStore>,
    editor: LayoutEditor<MemoryRemoteStore>,
    aliases: HashMap<String, LocalId>,
}

impl ScriptRunner {
    pub fn new(options: EditorOptions) -> Self {
        let store = Arc::new(MemoryRemoteStore::new());
        let editor = LayoutEditor::new(Arc::clone(&store), options);
        Self {
            store,
            editor,
            aliases: HashMap::new(),
        }
    }

    pub fn editor(&self) -> &LayoutEditor<MemoryRemoteStore> {
        &self.editor
    }

    pub fn store(&self) -> &Arc<MemoryRemoteStore> {
        &self.store
    }

    /// Connect to `scope` and wait for the initial snapshot
    pub async fn connect(&self, scope: ScopeId) -> Result<()> {
        self.editor.connect(scope).await?;
        tokio::time::timeout(LOAD_TIMEOUT, async {
            while !self.editor.is_loaded() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .context("Timed out waiting for the initial snapshot")
    }

    pub fn alias(&self, name: &str) -> Option<&LocalId> {
        self.aliases.get(name)
    }

    fn resolve(&self, alias: &str) -> Result<LocalId> {
        self.aliases
            .get(alias)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown alias: {}", alias))
    }

    fn resolve_parent(&self, alias: Option<&String>) -> Result<Option<ParentRef>> {
        alias.map(|a| self.resolve(a).map(ParentRef::from)).transpose()
    }

    /// Run every step in order, stopping only on script errors
    pub async fn run(&mut self, script: &Script) -> Result<Vec<StepReport>> {
        let mut reports = Vec::with_capacity(script.steps.len());
        for (index, step) in script.steps.iter().enumerate() {
            let report = self
                .run_step(index, step)
                .await
                .with_context(|| format!("step {} ({})", index + 1, step.op()))?;
            tracing::debug!(index, op = step.op(), ok = report.ok, "{}", report.detail);
            reports.push(report);
        }
        Ok(reports)
    }

    async fn run_step(&mut self, index: usize, step: &Step) -> Result<StepReport> {
        let op = step.op();
        let report = match step {
            Step::Add {
                alias,
                kind,
                parent,
                name,
                at,
                attrs,
            } => {
                let parent = self.resolve_parent(parent.as_ref())?;
                let patch = build_patch(*kind, *at, attrs.as_ref())?;
                let created = self.editor.add_entity(
                    *kind,
                    parent,
                    name.clone().unwrap_or_else(|| alias.clone()),
                    patch.as_ref(),
                );
                let detail = if created.is_valid() {
                    format!("{} -> {}", alias, created.id)
                } else {
                    format!("{} -> {} ({} issues)", alias, created.id, created.issues.len())
                };
                self.aliases.insert(alias.clone(), created.id);
                StepReport::ok(index, op, detail)
            }
            Step::Update { target, at, attrs } => {
                let id = self.resolve(target)?;
                let kind = self
                    .editor
                    .get_entity(&id)
                    .map(|e| e.kind())
                    .ok_or_else(|| anyhow!("{} no longer exists", target))?;
                let patch = build_patch(kind, *at, attrs.as_ref())?.unwrap_or_default();
                match self.editor.update_entity(&id, &patch) {
                    Some(issues) if issues.is_empty() => StepReport::ok(index, op, target.as_str()),
                    Some(issues) => StepReport::failed(
                        index,
                        op,
                        format!("{}: {}", target, rackplan_core::entity::describe_issues(&issues)),
                    ),
                    None => StepReport::failed(index, op, format!("{} not found", target)),
                }
            }
            Step::Remove { target, soft } => {
                let id = self.resolve(target)?;
                let removed = self.editor.remove_entity(&id, *soft);
                bool_report(index, op, removed, target)
            }
            Step::Discard { target } => {
                let id = self.resolve(target)?;
                let discarded = self.editor.discard_entity(&id);
                bool_report(index, op, discarded, target)
            }
            Step::Commit { target: Some(target) } => {
                let id = self.resolve(target)?;
                match self.editor.commit_entity(&id).await {
                    Ok(()) => StepReport::ok(index, op, target.as_str()),
                    Err(e) => StepReport::failed(index, op, format!("{}: {}", target, e)),
                }
            }
            Step::Commit { target: None } => {
                let failures = self.editor.commit_all().await;
                self.batch_report(index, op, failures)
            }
            Step::Sync { target: Some(target) } => {
                let id = self.resolve(target)?;
                match self.editor.sync_entity(&id).await {
                    Ok(()) => StepReport::ok(index, op, target.as_str()),
                    Err(e) => StepReport::failed(index, op, format!("{}: {}", target, e)),
                }
            }
            Step::Sync { target: None } => {
                let failures = self.editor.sync_dirty().await;
                self.batch_report(index, op, failures)
            }
            Step::Undo => bool_report(index, op, self.editor.undo(), "history"),
            Step::Redo => bool_report(index, op, self.editor.redo(), "history"),
            Step::Ghost {
                alias,
                kind,
                parent,
                at,
            } => {
                let parent = self.resolve_parent(parent.as_ref())?;
                let id = self.editor.begin_ghost(*kind, parent);
                if let Some([x, y, z]) = at {
                    self.editor.move_ghost(Vec3::new(*x, *y, *z));
                }
                let detail = match self.editor.validate_ghost() {
                    Some(verdict) if !verdict.is_allowed() => {
                        format!("{} -> {} (blocked: {})", alias, id, verdict.reason().unwrap_or_default())
                    }
                    _ => format!("{} -> {}", alias, id),
                };
                self.aliases.insert(alias.clone(), id);
                StepReport::ok(index, op, detail)
            }
            Step::Confirm => match self.editor.confirm_ghost() {
                Some(id) => StepReport::ok(index, op, id.to_string()),
                None => StepReport::failed(index, op, "no ghost to confirm"),
            },
            Step::FailNext { message } => {
                self.store.fail_next(message.clone());
                StepReport::ok(index, op, message.as_str())
            }
        };
        Ok(report)
    }

    fn batch_report(
        &self,
        index: usize,
        op: &'static str,
        failures: Vec<(LocalId, rackplan_core::CommitError)>,
    ) -> StepReport {
        if failures.is_empty() {
            return StepReport::ok(index, op, "all");
        }
        let detail = failures
            .iter()
            .map(|(id, e)| format!("{}: {}", self.name_of(id), e))
            .collect::<Vec<_>>()
            .join("; ");
        StepReport::failed(index, op, detail)
    }

    /// Script alias for `id`, falling back to the id itself
    pub fn name_of(&self, id: &LocalId) -> String {
        self.aliases
            .iter()
            .find(|(_, v)| *v == id)
            .map(|(k, _)| k.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Live entities sorted by path then name
    pub fn entities(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self
            .editor
            .snapshot()
            .into_values()
            .filter(|e| !e.is_deleted())
            .collect();
        entities.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.name.cmp(&b.name)));
        entities
    }
}

fn bool_report(index: usize, op: &'static str, done: bool, target: &str) -> StepReport {
    if done {
        StepReport::ok(index, op, target)
    } else {
        StepReport::failed(index, op, format!("{}: nothing to do", target))
    }
}

fn build_patch(
    kind: EntityKind,
    at: Option<[f64; 3]>,
    attrs: Option<&serde_json::Value>,
) -> Result<Option<AttributePatch>> {
    let mut patch = match attrs {
        Some(value) => match AttributePatch::from_value(value.clone()) {
            Some(patch) => Some(patch),
            None => bail!("attrs must be a table"),
        },
        None => None,
    };
    if let Some([x, y, z]) = at {
        patch = Some(patch.unwrap_or_default().position(kind, Vec3::new(x, y, z)));
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rackplan_core::EntityStatus;

    const SCRIPT: &str = r#"
scope = "site-1"

[[step]]
op = "add"
alias = "floor"
kind = "floor"

[[step]]
op = "add"
alias = "a1"
kind = "rack"
parent = "floor"
at = [1.0, 0.0, 1.0]
attrs = { levels = 6 }

[[step]]
op = "ghost"
alias = "a2"
kind = "rack"
parent = "floor"
at = [5.0, 0.0, 1.0]

[[step]]
op = "confirm"

[[step]]
op = "commit"
"#;

    async fn make_test_runner() -> ScriptRunner {
        let runner = ScriptRunner::new(EditorOptions::default());
        runner.connect(ScopeId::from_string("site-1")).await.unwrap();
        runner
    }

    #[test]
    fn test_parse_steps() {
        let script = Script::parse(SCRIPT).unwrap();
        assert_eq!(script.scope.as_deref(), Some("site-1"));
        assert_eq!(script.steps.len(), 5);
        assert_eq!(script.steps[3], Step::Confirm);
        let Step::Add { kind, at, attrs, .. } = &script.steps[1] else {
            panic!("expected add");
        };
        assert_eq!(*kind, EntityKind::Rack);
        assert_eq!(*at, Some([1.0, 0.0, 1.0]));
        assert_eq!(attrs.as_ref().unwrap()["levels"], 6);
    }

    #[test]
    fn test_parse_defaults() {
        let script = Script::parse("[[step]]\nop = \"remove\"\ntarget = \"x\"\n\n[[step]]\nop = \"fail_next\"\n").unwrap();
        assert_eq!(
            script.steps[0],
            Step::Remove {
                target: "x".into(),
                soft: true
            }
        );
        assert_eq!(
            script.steps[1],
            Step::FailNext {
                message: "injected failure".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_op() {
        assert!(Script::parse("[[step]]\nop = \"teleport\"\n").is_err());
    }

    #[tokio::test]
    async fn test_replay_commits_parents_first() {
        let mut runner = make_test_runner().await;
        let reports = runner.run(&Script::parse(SCRIPT).unwrap()).await.unwrap();
        assert!(reports.iter().all(|r| r.ok), "{:?}", reports);

        let entities = runner.entities();
        assert_eq!(entities.len(), 3);
        assert!(entities.iter().all(|e| e.status == EntityStatus::Committed));

        let scope = ScopeId::from_string("site-1");
        assert_eq!(runner.store().records(&scope).len(), 3);

        let a1 = runner.alias("a1").cloned().unwrap();
        let rack = runner.editor().get_entity(&a1).unwrap();
        assert_eq!(rack.path, "floor.rack");
        assert!(rack.parent.as_ref().unwrap().remote().is_some());
    }

    #[tokio::test]
    async fn test_replay_reports_injected_failure() {
        let mut runner = make_test_runner().await;
        let script = Script::parse(
            r#"
[[step]]
op = "add"
alias = "pillar"
kind = "obstacle"

[[step]]
op = "fail_next"
message = "backend down"

[[step]]
op = "commit"
target = "pillar"
"#,
        )
        .unwrap();

        let reports = runner.run(&script).await.unwrap();
        assert!(!reports[2].ok);
        assert!(reports[2].detail.contains("backend down"));

        let id = runner.alias("pillar").cloned().unwrap();
        let pillar = runner.editor().get_entity(&id).unwrap();
        assert_eq!(pillar.status, EntityStatus::Error);
        assert_eq!(pillar.validation_error.as_deref(), Some("backend down"));
    }

    #[tokio::test]
    async fn test_replay_undo_and_unknown_alias() {
        let mut runner = make_test_runner().await;
        let script = Script::parse(
            "[[step]]\nop = \"add\"\nalias = \"m\"\nkind = \"marker\"\n\n[[step]]\nop = \"undo\"\n",
        )
        .unwrap();
        let reports = runner.run(&script).await.unwrap();
        assert!(reports[1].ok);
        assert!(runner.entities().is_empty());

        let bad = Script::parse("[[step]]\nop = \"discard\"\ntarget = \"ghost\"\n").unwrap();
        let err = runner.run(&bad).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown alias: ghost"));
    }
}
