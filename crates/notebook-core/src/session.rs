//! One tenant's live namespace, scratch directory, trackers, and widget
//! registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use rhai::Dynamic;
use tracing::warn;

use crate::assets::{stage_assets, AssetFetcher};
use crate::config::Config;
use crate::executor::{CellExecutionResult, CellExecutor};
use crate::namespace::{Namespace, NOT_SERIALIZABLE};
use crate::tracker::{CellTracker, INITIALIZATION_CELL_ID};
use crate::widgets::{Widget, WidgetRegistry};

/// Name the notebook-SDK handle is injected under.
pub const SDK_HANDLE_NAME: &str = "notebook";

/// Namespace bindings plus a widget dump, as returned by `GetSessionState`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SessionState {
    pub bindings: HashMap<String, String>,
    pub widgets: HashMap<String, Widget>,
}

/// Counts used for memory-pressure and consistency diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthReport {
    pub tracked_cells: usize,
    pub tracked_bindings: usize,
    pub tracked_modules: usize,
    pub tracked_widgets: usize,
    pub snapshots: usize,
    pub globals: usize,
}

/// Findings from [`Session::consistency_check`].
#[derive(Debug, Clone, Default)]
pub struct SessionConsistencyReport {
    pub orphaned_snapshots: Vec<String>,
    pub missing_snapshots: Vec<String>,
    /// (cell_id, widget_id) pairs where the cell tracks a widget id absent
    /// from the registry.
    pub invalid_widget_refs: Vec<(String, String)>,
}

impl SessionConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_snapshots.is_empty() && self.missing_snapshots.is_empty() && self.invalid_widget_refs.is_empty()
    }
}

/// One tenant's execution context.
pub struct Session {
    pub session_id: String,
    pub component_id: Option<String>,
    scratch_dir: PathBuf,
    namespace: Namespace,
    tracker: CellTracker,
    widget_registry: WidgetRegistry,
    executor: CellExecutor,
    last_accessed: Instant,
}

impl Session {
    /// Construct a session: create the scratch directory, stage assets
    /// (if `component_id` is set), inject the SDK handle, then run
    /// `notebook_source` under the reserved `initialization` cell id.
    pub async fn create(
        session_id: String,
        component_id: Option<String>,
        notebook_source: &str,
        fetcher: &impl AssetFetcher,
        config: &Config,
    ) -> crate::error::Result<Self> {
        let scratch_dir = std::env::temp_dir().join(format!("notebook-session-{session_id}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&scratch_dir)?;

        if let Some(component_id) = &component_id {
            for warning in stage_assets(fetcher, component_id, &scratch_dir).await {
                warn!(session_id = %session_id, %warning, "asset fetch issue during session creation");
            }
        }

        let mut namespace = Namespace::new();
        namespace.set(SDK_HANDLE_NAME, Dynamic::from(session_id.clone()));
        namespace.sync_generations();

        let mut session = Self {
            session_id,
            component_id,
            scratch_dir,
            namespace,
            tracker: CellTracker::new([SDK_HANDLE_NAME.to_string()]),
            widget_registry: WidgetRegistry::new(),
            executor: CellExecutor::new(),
            last_accessed: Instant::now(),
        };

        session.execute_cell(INITIALIZATION_CELL_ID, notebook_source, config);
        Ok(session)
    }

    pub fn execute_cell(&mut self, cell_id: &str, source: &str, config: &Config) -> CellExecutionResult {
        self.touch();
        self.executor.execute(
            cell_id,
            source,
            &mut self.namespace,
            &mut self.tracker,
            &mut self.widget_registry,
            config,
            Some(&self.scratch_dir),
        )
    }

    /// Update a widget's value, returning the ids of widgets that should
    /// be marked `needs_update` as a result.
    pub fn update_widget_value(&mut self, widget_id: &str, raw: &str) -> crate::error::Result<Vec<String>> {
        self.touch();
        let (_, dependents) = self.widget_registry.update_value(widget_id, raw)?;
        Ok(dependents)
    }

    pub fn get_state(&self) -> SessionState {
        let bindings = self
            .namespace
            .names()
            .into_iter()
            .filter(|name| !self.tracker.is_protected_name(name))
            .map(|name| {
                let text = self.namespace.text_of(&name).unwrap_or_else(|| NOT_SERIALIZABLE.to_string());
                (name, text)
            })
            .collect();

        let widgets = self
            .tracker
            .all_widget_ids()
            .into_iter()
            .filter_map(|id| self.widget_registry.get(&id).map(|w| (id, w.clone())))
            .collect();

        SessionState { bindings, widgets }
    }

    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_accessed.elapsed()
    }

    /// Remove the scratch directory.
    pub fn close(&mut self) {
        let _ = std::fs::remove_dir_all(&self.scratch_dir);
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport {
            tracked_cells: self.tracker.cell_count(),
            tracked_bindings: self.tracker.total_bindings(),
            tracked_modules: self.tracker.total_imports(),
            tracked_widgets: self.tracker.total_widgets(),
            snapshots: self.tracker.snapshot_count(),
            globals: self.namespace.names().len(),
        }
    }

    /// More than 100 cells, more than 1000 tracked bindings, more than
    /// 2000 global names, or more than 50 snapshots.
    pub fn is_memory_heavy(&self) -> bool {
        let report = self.health_report();
        report.tracked_cells > 100 || report.tracked_bindings > 1000 || report.globals > 2000 || report.snapshots > 50
    }

    pub fn consistency_check(&self) -> SessionConsistencyReport {
        let base = self.tracker.consistency_check();

        let mut invalid_widget_refs = Vec::new();
        for cell_id in self.tracker.cell_ids() {
            if let Some(record) = self.tracker.record(&cell_id) {
                for widget_id in &record.widgets {
                    if self.widget_registry.get(widget_id).is_none() {
                        invalid_widget_refs.push((cell_id.clone(), widget_id.clone()));
                    }
                }
            }
        }

        SessionConsistencyReport {
            orphaned_snapshots: base.orphaned_snapshots,
            missing_snapshots: base.missing_snapshots,
            invalid_widget_refs,
        }
    }

    /// Drop orphaned snapshot entries and empty tracker maps. Idempotent.
    pub fn repair(&mut self) {
        let report = self.tracker.consistency_check();
        self.tracker.repair(&report);
    }

    pub fn performance_recommendations(&self) -> Vec<String> {
        let report = self.health_report();
        let mut recommendations = Vec::new();

        if report.tracked_cells > 100 {
            recommendations.push(format!(
                "consider ending this session: {} stale cells tracked",
                report.tracked_cells
            ));
        }
        if report.tracked_bindings > 1000 {
            recommendations.push(format!(
                "consider ending this session: {} bindings tracked across cells",
                report.tracked_bindings
            ));
        }
        if report.snapshots > 50 {
            recommendations.push(format!(
                "run a repair pass: {} cell snapshots retained",
                report.snapshots
            ));
        }
        if report.globals > 2000 {
            recommendations.push(format!(
                "consider ending this session: {} names in the global namespace",
                report.globals
            ));
        }

        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::ObjectStoreAssetFetcher;
    use object_store::memory::InMemory;
    use std::sync::Arc;

    fn fetcher() -> ObjectStoreAssetFetcher {
        ObjectStoreAssetFetcher::with_store(Arc::new(InMemory::new()))
    }

    #[tokio::test]
    async fn test_session_create_runs_initialization() {
        let config = Config::default();
        let mut session = Session::create("s1".to_string(), None, "let x = 1;", &fetcher(), &config)
            .await
            .unwrap();
        let state = session.get_state();
        assert_eq!(state.bindings.get("x"), Some(&"1".to_string()));
        session.close();
    }

    #[tokio::test]
    async fn test_initialization_override_transfers_ownership() {
        let config = Config::default();
        let mut session = Session::create("s1".to_string(), None, "x = 1;", &fetcher(), &config)
            .await
            .unwrap();
        session.execute_cell("c1", "x = 2;", &config);
        let state = session.get_state();
        assert_eq!(state.bindings.get("x"), Some(&"2".to_string()));
        session.close();
    }

    #[tokio::test]
    async fn test_health_report_reflects_tracked_cells() {
        let config = Config::default();
        let mut session = Session::create("s1".to_string(), None, "let x = 1;", &fetcher(), &config)
            .await
            .unwrap();
        session.execute_cell("c1", "let y = 2;", &config);
        let report = session.health_report();
        assert_eq!(report.tracked_cells, 2);
        session.close();
    }

    #[tokio::test]
    async fn test_consistency_check_is_clean_after_normal_execution() {
        let config = Config::default();
        let mut session = Session::create("s1".to_string(), None, "let x = 1;", &fetcher(), &config)
            .await
            .unwrap();
        session.execute_cell("c1", "let y = 2;", &config);
        assert!(session.consistency_check().is_clean());
        session.close();
    }
}
