//! Per-cell ownership accounting: bindings, imports, and widgets
//! introduced by each cell, with cross-cell dependency preservation on
//! cleanup.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};
use crate::namespace::{BindingId, Namespace};
use crate::security::top_level_imports;
use crate::widgets::WidgetRegistry;

/// The reserved cell id under which session-initialisation source runs.
pub const INITIALIZATION_CELL_ID: &str = "initialization";

/// Names that look like import aliases for common data/plotting modules.
/// Used only by the conservative cross-cell reference heuristic below.
const ALIAS_NAMES: &[&str] = &["pd", "np", "plt", "sns"];

/// Per-cell accounting record.
#[derive(Debug, Clone, Default)]
pub struct CellRecord {
    pub bindings: FxHashSet<String>,
    pub imports: FxHashSet<String>,
    pub widgets: FxHashSet<String>,
    pub snapshot: Option<FxHashMap<String, BindingId>>,
}

impl CellRecord {
    fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.imports.is_empty() && self.widgets.is_empty()
    }
}

/// Orphaned/missing-snapshot findings from [`CellTracker::consistency_check`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Cells with a stored snapshot but no tracked bindings/imports/widgets.
    pub orphaned_snapshots: Vec<String>,
    /// Cells with tracked bindings but no stored snapshot.
    pub missing_snapshots: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_snapshots.is_empty() && self.missing_snapshots.is_empty()
    }
}

/// Tracks, per cell id, which namespace bindings, imports, and widgets
/// that cell owns.
pub struct CellTracker {
    records: FxHashMap<String, CellRecord>,
    protected_names: FxHashSet<String>,
    protected_modules: FxHashSet<String>,
}

impl CellTracker {
    /// `extra_protected_names` should include the injected notebook-SDK
    /// handle's binding name; any name beginning with `_` is protected
    /// unconditionally.
    pub fn new(extra_protected_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            records: FxHashMap::default(),
            protected_names: extra_protected_names.into_iter().collect(),
            protected_modules: default_protected_modules(),
        }
    }

    pub fn is_protected_name(&self, name: &str) -> bool {
        name.starts_with('_') || self.protected_names.contains(name)
    }

    pub fn is_protected_module(&self, module: &str) -> bool {
        self.protected_modules.contains(module)
    }

    /// Retract `cell_id`'s previously tracked bindings (removing them from
    /// `namespace` when no other cell still owns them), imports, and
    /// widgets (removing them from `widget_registry` when no other cell
    /// still owns them), then discard its record entirely. Call this
    /// immediately before re-running a cell.
    pub fn cleanup_before_rerun(
        &mut self,
        cell_id: &str,
        namespace: &mut Namespace,
        widget_registry: &mut WidgetRegistry,
    ) {
        let Some(record) = self.records.get(cell_id).cloned() else {
            return;
        };

        let alias_protected = !record.imports.is_empty();
        let other_cell_has_imports = self
            .records
            .iter()
            .any(|(id, r)| id != cell_id && !r.imports.is_empty());

        for name in &record.bindings {
            if self.is_protected_name(name) {
                continue;
            }
            if self.owned_elsewhere(cell_id, name, RecordField::Bindings) {
                continue;
            }
            let alias_like = ALIAS_NAMES.contains(&name.as_str()) || alias_protected;
            if alias_like && other_cell_has_imports {
                continue;
            }
            namespace.remove(name);
        }

        for widget_id in &record.widgets {
            if !self.owned_elsewhere(cell_id, widget_id, RecordField::Widgets) {
                widget_registry.remove(widget_id);
            }
        }

        self.records.remove(cell_id);
    }

    /// Eagerly retract bindings/imports first introduced by the
    /// initialisation cell that `incoming_source` will redefine, so the
    /// new definition does not co-exist with a stale one under joint
    /// ownership.
    pub fn run_initialization_conflict_pass(&mut self, incoming_source: &str) {
        if self.records.get(INITIALIZATION_CELL_ID).is_none() {
            return;
        }
        let targets = assignment_targets(incoming_source);
        let incoming_imports: FxHashSet<String> = top_level_imports(incoming_source).into_iter().collect();

        if let Some(init) = self.records.get_mut(INITIALIZATION_CELL_ID) {
            init.bindings.retain(|b| !targets.contains(b));
            init.imports.retain(|m| !incoming_imports.contains(m));
        }
    }

    /// Store a pre-execution snapshot for `cell_id`, starting a fresh
    /// record (the prior one must already have been retracted via
    /// [`CellTracker::cleanup_before_rerun`]). Fails if a snapshot is
    /// already pending for this cell, since that means cleanup was
    /// skipped and the stored generation ids would be for the wrong run.
    pub fn snapshot(&mut self, cell_id: &str, namespace: &Namespace) -> Result<()> {
        if self.records.get(cell_id).is_some_and(|r| r.snapshot.is_some()) {
            return Err(Error::Tracker(format!("cell {cell_id} already has a pending snapshot")));
        }
        let record = self.records.entry(cell_id.to_string()).or_default();
        record.snapshot = Some(namespace.snapshot_ids().into_iter().collect());
        Ok(())
    }

    /// After execution, compute this cell's new/modified bindings (against
    /// the stored pre-execution snapshot) and its imports (by re-parsing
    /// `source`), both minus protected names/modules. Fails if no snapshot
    /// is pending, since there is then nothing to diff bindings against.
    pub fn attribute(&mut self, cell_id: &str, namespace: &Namespace, source: &str) -> Result<()> {
        let pre = self
            .records
            .get(cell_id)
            .and_then(|r| r.snapshot.clone())
            .ok_or_else(|| Error::Tracker(format!("cell {cell_id} has no pending snapshot to attribute against")))?;

        let mut bindings = FxHashSet::default();
        for name in namespace.names() {
            if self.is_protected_name(&name) {
                continue;
            }
            let after = namespace.binding_id(&name);
            let is_new_or_modified = match (pre.get(&name), after) {
                (None, Some(_)) => true,
                (Some(before), Some(current)) => *before != current,
                _ => false,
            };
            if is_new_or_modified {
                bindings.insert(name);
            }
        }

        let imports: FxHashSet<String> = top_level_imports(source)
            .into_iter()
            .filter(|m| !self.is_protected_module(m))
            .collect();

        let record = self.records.entry(cell_id.to_string()).or_default();
        record.bindings = bindings;
        record.imports = imports;
        Ok(())
    }

    /// Record the widget ids found among `cell_id`'s tracked bindings.
    pub fn attribute_widgets(&mut self, cell_id: &str, widget_ids: Vec<String>) {
        if let Some(record) = self.records.get_mut(cell_id) {
            record.widgets = widget_ids.into_iter().collect();
        }
    }

    /// Unconditionally drop every binding and widget `cell_id` introduced,
    /// ignoring ownership/dependency rules beyond cross-cell widget
    /// sharing. Only underscore-prefixed names are still left alone.
    pub fn forced_cleanup(&mut self, cell_id: &str, namespace: &mut Namespace, widget_registry: &mut WidgetRegistry) {
        if let Some(record) = self.records.remove(cell_id) {
            for name in record.bindings {
                if !name.starts_with('_') {
                    namespace.remove(&name);
                }
            }
            for widget_id in &record.widgets {
                if !self.owned_elsewhere(cell_id, widget_id, RecordField::Widgets) {
                    widget_registry.remove(widget_id);
                }
            }
        }
    }

    pub fn record(&self, cell_id: &str) -> Option<&CellRecord> {
        self.records.get(cell_id)
    }

    pub fn cell_ids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn cell_count(&self) -> usize {
        self.records.len()
    }

    pub fn total_bindings(&self) -> usize {
        self.records.values().map(|r| r.bindings.len()).sum()
    }

    pub fn total_imports(&self) -> usize {
        self.records.values().map(|r| r.imports.len()).sum()
    }

    pub fn total_widgets(&self) -> usize {
        self.records.values().map(|r| r.widgets.len()).sum()
    }

    pub fn snapshot_count(&self) -> usize {
        self.records.values().filter(|r| r.snapshot.is_some()).count()
    }

    pub fn all_widget_ids(&self) -> FxHashSet<String> {
        self.records.values().flat_map(|r| r.widgets.iter().cloned()).collect()
    }

    /// Flag orphaned snapshots (present but nothing tracked) and missing
    /// snapshots (bindings tracked but no snapshot stored).
    pub fn consistency_check(&self) -> ConsistencyReport {
        let mut orphaned = Vec::new();
        let mut missing = Vec::new();

        for (cell_id, record) in &self.records {
            if record.snapshot.is_some() && record.is_empty() {
                orphaned.push(cell_id.clone());
            }
            if !record.bindings.is_empty() && record.snapshot.is_none() {
                missing.push(cell_id.clone());
            }
        }

        orphaned.sort();
        missing.sort();
        ConsistencyReport {
            orphaned_snapshots: orphaned,
            missing_snapshots: missing,
        }
    }

    /// Drop orphaned snapshots and any now-empty records found by
    /// [`CellTracker::consistency_check`]. Idempotent.
    pub fn repair(&mut self, report: &ConsistencyReport) {
        for cell_id in &report.orphaned_snapshots {
            if let Some(record) = self.records.get_mut(cell_id) {
                record.snapshot = None;
            }
        }
        self.records.retain(|_, r| !(r.is_empty() && r.snapshot.is_none()));
    }

    fn owned_elsewhere(&self, cell_id: &str, item: &str, field: RecordField) -> bool {
        self.records.iter().any(|(id, record)| {
            if id == cell_id {
                return false;
            }
            match field {
                RecordField::Bindings => record.bindings.contains(item),
                RecordField::Imports => record.imports.contains(item),
                RecordField::Widgets => record.widgets.contains(item),
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum RecordField {
    Bindings,
    Imports,
    Widgets,
}

fn default_protected_modules() -> FxHashSet<String> {
    ["notebook_sdk", "math", "json", "time"].into_iter().map(String::from).collect()
}

/// A best-effort scan for top-level assignment targets (`name = ...` or
/// `let name = ...`), used by the initialisation-conflict pass. Nested
/// targets (tuple unpacking, attribute assignment) are not recognised;
/// retraction in that case falls back to ownership transfer at the next
/// post-execution attribution pass.
fn assignment_targets(source: &str) -> FxHashSet<String> {
    let mut targets = FxHashSet::default();
    for raw_statement in source.split(';') {
        let statement = raw_statement.trim();
        let statement = statement.strip_prefix("let ").unwrap_or(statement).trim_start();
        if let Some(eq) = find_assignment_eq(statement) {
            let name = statement[..eq].trim();
            if is_simple_identifier(name) {
                targets.insert(name.to_string());
            }
        }
    }
    targets
}

fn find_assignment_eq(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] as char != '=' {
            continue;
        }
        let prev = if i > 0 { bytes[i - 1] as char } else { '\0' };
        let next = if i + 1 < bytes.len() { bytes[i + 1] as char } else { '\0' };
        if next == '=' || matches!(prev, '!' | '<' | '>' | '=') {
            continue;
        }
        return Some(i);
    }
    None
}

fn is_simple_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().map(|c| c.is_alphabetic() || c == '_').unwrap_or(false)
        && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}
