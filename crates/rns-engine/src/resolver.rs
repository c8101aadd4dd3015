//! Conflict Resolver
//!
//! A pure function over the committed snapshots and the global declaration
//! table. It decides which keymaps win, flags ambiguous augroups and emits
//! the staged operation list the pipeline applies.
//!
//! ## Keymap resolution
//!
//! ```text
//!   (mode, lhs, buffer)
//!          │
//!          ├── only global declarations ──────► last global wins
//!          ├── global + one plugin owner ─────► plugin wins, global shadowed
//!          ├── one plugin owner, many writes ─► last write wins
//!          └── two or more plugin owners ─────► KeymapConflict
//! ```
//!
//! Plugins in the `Failed` state contribute nothing.

use std::collections::HashMap;
use std::fmt;

use rns_core::{
    EngineError, EngineResult, ErrorKind, KeymapId, KeymapSpec, Mode, Operation, Origin,
    PlannedOperation, PluginState, Snapshot,
};
use serde::Serialize;

use crate::declarations::GlobalDeclarations;
use crate::registry::PluginRegistry;

/// Non-fatal findings of a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolveWarning {
    /// A global keymap lost to a plugin-owned keymap.
    KeymapShadowed {
        mode: Mode,
        lhs: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        buffer: Option<i32>,
        plugin: String,
    },
    /// A non-clearing augroup declared by several sources.
    AugroupAmbiguity { group: String, sources: Vec<String> },
}

impl ResolveWarning {
    /// Error kind for warnings that carry one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ResolveWarning::KeymapShadowed { .. } => None,
            ResolveWarning::AugroupAmbiguity { .. } => Some(ErrorKind::AugroupAmbiguity),
        }
    }
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveWarning::KeymapShadowed {
                mode, lhs, plugin, ..
            } => write!(
                f,
                "Global keymap ({}, {}) shadowed by plugin '{}'",
                mode, lhs, plugin
            ),
            ResolveWarning::AugroupAmbiguity { group, sources } => {
                let err = EngineError::AugroupAmbiguity {
                    group: group.clone(),
                    sources: sources.clone(),
                };
                write!(f, "{}", err)
            }
        }
    }
}

/// Ordered operations plus warnings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedPlan {
    /// Sorted by stage; ties keep emission order.
    pub operations: Vec<PlannedOperation>,
    pub warnings: Vec<ResolveWarning>,
    /// Sequence numbers of global keymaps held back by a plugin claim.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub shadowed: Vec<u64>,
}

impl ResolvedPlan {
    /// Operations declared by one plugin's snapshot or raw configuration.
    pub fn partition(&self, plugin: &str) -> Vec<PlannedOperation> {
        self.operations
            .iter()
            .filter(|op| op.origin.plugin() == Some(plugin))
            .cloned()
            .collect()
    }

    /// Global operations whose sequence number passes `filter`.
    pub fn globals(&self, filter: impl Fn(u64) -> bool) -> Vec<PlannedOperation> {
        self.operations
            .iter()
            .filter(|op| matches!(op.origin, Origin::Global(seq) if filter(seq)))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Resolve the whole configuration. Any keymap conflict fails the pass.
pub fn resolve(
    registry: &PluginRegistry,
    globals: &GlobalDeclarations,
) -> EngineResult<ResolvedPlan> {
    plan(registry, globals, true)
}

/// Resolve for a flush of global declarations.
///
/// Conflicts between plugins are left to the next full resolution; their
/// keymaps are omitted but still shadow global ones.
pub fn resolve_globals(
    registry: &PluginRegistry,
    globals: &GlobalDeclarations,
) -> ResolvedPlan {
    match plan(registry, globals, false) {
        Ok(plan) => plan,
        Err(_) => ResolvedPlan::default(),
    }
}

/// Snapshots that take part in resolution, in registration order.
fn active_snapshots(registry: &PluginRegistry) -> Vec<&Snapshot> {
    registry
        .iter()
        .filter(|(plugin, _)| plugin.state != PluginState::Failed)
        .filter_map(|(_, snapshot)| snapshot)
        .collect()
}

/// Writes to one keymap identity by plugin owners.
#[derive(Debug, Default)]
struct KeymapClaims {
    /// Distinct owners in first-seen order.
    owners: Vec<String>,
    /// (snapshot index, keymap index) of the last write.
    last: (usize, usize),
}

fn plan(
    registry: &PluginRegistry,
    globals: &GlobalDeclarations,
    strict: bool,
) -> EngineResult<ResolvedPlan> {
    let snapshots = active_snapshots(registry);
    let mut operations = Vec::new();
    let mut warnings = Vec::new();
    let mut shadowed = Vec::new();

    // Plugin keymap claims, keyed by identity, in first-seen order.
    let mut claims: HashMap<KeymapId, KeymapClaims> = HashMap::new();
    let mut claim_order: Vec<KeymapId> = Vec::new();
    for (si, snapshot) in snapshots.iter().enumerate() {
        for (ki, keymap) in snapshot.keymaps.iter().enumerate() {
            let owner = keymap
                .owner
                .plugin()
                .unwrap_or(snapshot.plugin.as_str())
                .to_string();
            let id = keymap.id();
            let claim = claims.entry(id.clone()).or_insert_with(|| {
                claim_order.push(id);
                KeymapClaims::default()
            });
            if !claim.owners.contains(&owner) {
                claim.owners.push(owner);
            }
            claim.last = (si, ki);
        }
    }

    for id in &claim_order {
        let claim = &claims[id];
        if claim.owners.len() > 1 && strict {
            tracing::warn!(
                "Keymap conflict on ({}, {}): {:?}",
                id.mode,
                id.lhs,
                claim.owners
            );
            return Err(EngineError::KeymapConflict {
                mode: id.mode,
                key: id.lhs.clone(),
                owners: claim.owners.clone(),
            });
        }
    }

    // Global declarations in sequence order.
    for decl in globals.iter() {
        if let Operation::SetKeymap(keymap) = &decl.operation {
            if let Some(claim) = claims.get(&keymap.id()) {
                warnings.push(ResolveWarning::KeymapShadowed {
                    mode: keymap.mode,
                    lhs: keymap.lhs.clone(),
                    buffer: keymap.opts.buffer,
                    plugin: claim.owners[0].clone(),
                });
                shadowed.push(decl.seq);
                continue;
            }
        }
        operations.push(PlannedOperation::new(
            Origin::Global(decl.seq),
            decl.operation.clone(),
        ));
    }

    // Plugin snapshots in registration order.
    for (si, snapshot) in snapshots.iter().enumerate() {
        let origin = Origin::Plugin(snapshot.plugin.clone());

        for group in &snapshot.augroups {
            operations.push(PlannedOperation::new(
                origin.clone(),
                Operation::CreateAugroup(group.clone()),
            ));
        }
        for autocmd in &snapshot.autocmds {
            operations.push(PlannedOperation::new(
                origin.clone(),
                Operation::CreateAutocmd(autocmd.clone()),
            ));
        }
        for (ki, keymap) in snapshot.keymaps.iter().enumerate() {
            if winning_keymap(&claims, keymap, (si, ki)) {
                operations.push(PlannedOperation::new(
                    origin.clone(),
                    Operation::SetKeymap(keymap.clone()),
                ));
            }
        }
        for server in &snapshot.servers {
            operations.push(PlannedOperation::new(
                origin.clone(),
                Operation::SetupServer {
                    server: server.name.clone(),
                    config: server.setup_json(),
                },
            ));
        }
    }

    // Raw configuration code runs last in its plugin's batch.
    for (plugin, _) in registry.iter() {
        if plugin.state == PluginState::Failed {
            continue;
        }
        if let Some(code) = &plugin.raw_config {
            operations.push(PlannedOperation::new(
                Origin::Plugin(plugin.name.clone()),
                Operation::ExecCode(code.clone()),
            ));
        }
    }

    warnings.extend(augroup_ambiguities(globals, &snapshots));

    operations.sort_by_key(|op| op.stage());

    tracing::debug!(
        "Resolved {} operations ({} warnings)",
        operations.len(),
        warnings.len()
    );
    Ok(ResolvedPlan {
        operations,
        warnings,
        shadowed,
    })
}

/// Whether this write is the surviving one for its identity.
fn winning_keymap(
    claims: &HashMap<KeymapId, KeymapClaims>,
    keymap: &KeymapSpec,
    position: (usize, usize),
) -> bool {
    claims
        .get(&keymap.id())
        .map(|claim| claim.owners.len() == 1 && claim.last == position)
        .unwrap_or(false)
}

/// Non-clearing augroups declared by two or more distinct sources.
fn augroup_ambiguities(
    globals: &GlobalDeclarations,
    snapshots: &[&Snapshot],
) -> Vec<ResolveWarning> {
    let mut sources: Vec<(String, Vec<String>)> = Vec::new();
    let mut record = |group: &str, source: &str| {
        let idx = match sources.iter().position(|(name, _)| name == group) {
            Some(idx) => idx,
            None => {
                sources.push((group.to_string(), Vec::new()));
                sources.len() - 1
            }
        };
        let list = &mut sources[idx].1;
        if !list.iter().any(|s| s == source) {
            list.push(source.to_string());
        }
    };

    for decl in globals.iter() {
        if let Operation::CreateAugroup(group) = &decl.operation {
            if !group.clear {
                record(&group.name, "global");
            }
        }
    }
    for snapshot in snapshots {
        for group in snapshot.augroups.iter().filter(|g| !g.clear) {
            record(&group.name, &snapshot.plugin);
        }
    }

    sources
        .into_iter()
        .filter(|(_, list)| list.len() > 1)
        .map(|(group, sources)| {
            tracing::warn!("Augroup '{}' declared without clear by {:?}", group, sources);
            ResolveWarning::AugroupAmbiguity { group, sources }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ConfigBuilder;
    use rns_core::{AugroupSpec, KeymapOptions, KeymapOwner, OptionValue, Stage};

    struct Fixture {
        registry: PluginRegistry,
        globals: GlobalDeclarations,
    }

    impl Fixture {
        fn new(plugins: &[&str]) -> Self {
            let mut registry = PluginRegistry::new();
            for name in plugins {
                registry.register(name, &format!("src/{}", name)).unwrap();
            }
            Self {
                registry,
                globals: GlobalDeclarations::new(),
            }
        }

        fn configure(&mut self, plugin: &str, f: impl FnOnce(&mut ConfigBuilder, &PluginRegistry)) {
            let mut builder = ConfigBuilder::new();
            builder.begin(&self.registry, plugin).unwrap();
            f(&mut builder, &self.registry);
            let revision = self.registry.next_revision();
            let snapshot = builder.end().unwrap().into_snapshot(revision);
            self.registry.commit_snapshot(snapshot).unwrap();
        }

        fn global_keymap(&mut self, lhs: &str, rhs: &str) {
            self.globals.declare(Operation::SetKeymap(KeymapSpec {
                mode: Mode::Normal,
                lhs: lhs.into(),
                rhs: rhs.into(),
                owner: KeymapOwner::Global,
                opts: KeymapOptions::default(),
            }));
        }
    }

    fn keymaps(plan: &ResolvedPlan) -> Vec<(String, String)> {
        plan.operations
            .iter()
            .filter_map(|op| match &op.operation {
                Operation::SetKeymap(km) => Some((km.lhs.clone(), km.rhs.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_conflict_between_plugins() {
        let mut fx = Fixture::new(&["a", "b"]);
        fx.configure("a", |b, _| {
            b.add_keymap(Mode::Normal, "gd", "A", KeymapOptions::noremap()).unwrap();
        });
        fx.configure("b", |b, _| {
            b.add_keymap(Mode::Normal, "gd", "B", KeymapOptions::noremap()).unwrap();
        });

        let err = resolve(&fx.registry, &fx.globals).unwrap_err();
        match err {
            EngineError::KeymapConflict { mode, key, owners } => {
                assert_eq!(mode, Mode::Normal);
                assert_eq!(key, "gd");
                assert_eq!(owners, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_global_loses_to_plugin() {
        let mut fx = Fixture::new(&["a"]);
        fx.global_keymap("gd", "GLOBAL");
        fx.configure("a", |b, _| {
            b.add_keymap(Mode::Normal, "gd", "A", KeymapOptions::noremap()).unwrap();
        });

        let plan = resolve(&fx.registry, &fx.globals).unwrap();
        assert_eq!(keymaps(&plan), vec![("gd".to_string(), "A".to_string())]);
        assert!(matches!(
            &plan.warnings[0],
            ResolveWarning::KeymapShadowed { plugin, .. } if plugin == "a"
        ));
        assert_eq!(plan.shadowed, vec![1]);
    }

    #[test]
    fn test_last_write_wins_within_owner() {
        let mut fx = Fixture::new(&["a"]);
        fx.configure("a", |b, _| {
            b.add_keymap(Mode::Normal, "gd", "first", KeymapOptions::noremap()).unwrap();
            b.add_keymap(Mode::Normal, "gr", "refs", KeymapOptions::noremap()).unwrap();
            b.add_keymap(Mode::Normal, "gd", "second", KeymapOptions::noremap()).unwrap();
        });

        let plan = resolve(&fx.registry, &fx.globals).unwrap();
        assert_eq!(
            keymaps(&plan),
            vec![
                ("gr".to_string(), "refs".to_string()),
                ("gd".to_string(), "second".to_string())
            ]
        );
    }

    #[test]
    fn test_mapping_for_other_plugin_conflicts_with_its_own() {
        let mut fx = Fixture::new(&["a", "b"]);
        fx.configure("a", |b, registry| {
            b.add_mapping(registry, "b", Mode::Normal, "gd", "via-a").unwrap();
        });
        fx.configure("b", |b, _| {
            b.add_keymap(Mode::Normal, "gd", "own", KeymapOptions::noremap()).unwrap();
        });

        // Same owner on both writes, so the later one wins
        let plan = resolve(&fx.registry, &fx.globals).unwrap();
        assert_eq!(keymaps(&plan), vec![("gd".to_string(), "own".to_string())]);
    }

    #[test]
    fn test_failed_plugin_excluded() {
        let mut fx = Fixture::new(&["a", "b"]);
        fx.configure("a", |b, _| {
            b.add_keymap(Mode::Normal, "gd", "A", KeymapOptions::noremap()).unwrap();
        });
        fx.configure("b", |b, _| {
            b.add_keymap(Mode::Normal, "gd", "B", KeymapOptions::noremap()).unwrap();
        });
        fx.registry.fail("b", "clone failed").unwrap();

        let plan = resolve(&fx.registry, &fx.globals).unwrap();
        assert_eq!(keymaps(&plan), vec![("gd".to_string(), "A".to_string())]);
    }

    #[test]
    fn test_lenient_resolution_skips_conflicts() {
        let mut fx = Fixture::new(&["a", "b"]);
        fx.global_keymap("gd", "GLOBAL");
        fx.global_keymap("K", "hover");
        fx.configure("a", |b, _| {
            b.add_keymap(Mode::Normal, "gd", "A", KeymapOptions::noremap()).unwrap();
        });
        fx.configure("b", |b, _| {
            b.add_keymap(Mode::Normal, "gd", "B", KeymapOptions::noremap()).unwrap();
        });

        let plan = resolve_globals(&fx.registry, &fx.globals);
        assert_eq!(keymaps(&plan), vec![("K".to_string(), "hover".to_string())]);
    }

    #[test]
    fn test_same_server_in_two_plugins() {
        let mut fx = Fixture::new(&["a", "b"]);
        for name in ["a", "b"] {
            fx.configure(name, |b, _| {
                b.add_server("lua_ls").unwrap();
            });
        }

        let plan = resolve(&fx.registry, &fx.globals).unwrap();
        let origins: Vec<_> = plan
            .operations
            .iter()
            .filter(|op| op.stage() == Stage::Servers)
            .map(|op| op.origin.to_string())
            .collect();
        assert_eq!(origins, vec!["plugin:a", "plugin:b"]);
    }

    #[test]
    fn test_augroup_ambiguity_is_warning() {
        let mut fx = Fixture::new(&["a", "b"]);
        fx.globals.declare(Operation::CreateAugroup(AugroupSpec {
            name: "Shared".into(),
            clear: false,
        }));
        fx.configure("a", |b, _| {
            b.add_augroup("Shared", false).unwrap();
            b.add_augroup("Clean", true).unwrap();
        });
        fx.configure("b", |b, _| {
            b.add_augroup("Clean", true).unwrap();
        });

        let plan = resolve(&fx.registry, &fx.globals).unwrap();
        assert_eq!(
            plan.warnings,
            vec![ResolveWarning::AugroupAmbiguity {
                group: "Shared".into(),
                sources: vec!["global".into(), "a".into()],
            }]
        );
        assert_eq!(plan.warnings[0].kind(), Some(ErrorKind::AugroupAmbiguity));
    }

    #[test]
    fn test_stage_order_and_raw_config() {
        let mut fx = Fixture::new(&["a"]);
        fx.registry.set_raw_config("a", "require('a').setup()").unwrap();
        fx.configure("a", |b, _| {
            b.add_server("lua_ls").unwrap();
            b.add_keymap(Mode::Normal, "gd", "A", KeymapOptions::noremap()).unwrap();
        });
        fx.globals.declare(Operation::ExecCommand("echo 1".into()));
        fx.globals.declare(Operation::SetOption {
            name: "number".into(),
            value: OptionValue::Bool(true),
        });

        let plan = resolve(&fx.registry, &fx.globals).unwrap();
        let stages: Vec<_> = plan.operations.iter().map(|op| op.stage()).collect();
        let mut sorted = stages.clone();
        sorted.sort();
        assert_eq!(stages, sorted);
        assert_eq!(stages.first(), Some(&Stage::Options));

        let partition = plan.partition("a");
        assert_eq!(partition.len(), 3);
        assert!(matches!(
            &partition.last().unwrap().operation,
            Operation::ExecCode(code) if code == "require('a').setup()"
        ));
        assert_eq!(plan.globals(|_| true).len(), 2);
    }
}
