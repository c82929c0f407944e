//! Orchestrates one cell execution end to end: validate, retract prior
//! ownership, snapshot, evaluate, marshal, track, and compute the display
//! snapshot.

use std::collections::HashMap;
use std::path::Path;

use crate::config::Config;
use crate::interpreter::Interpreter;
use crate::namespace::Namespace;
use crate::output::{self, Output, OutputKind};
use crate::security;
use crate::tracker::CellTracker;
use crate::widgets::{WidgetHandle, WidgetRegistry};

/// The outcome of one [`CellExecutor::execute`] call.
#[derive(Debug, Clone)]
pub struct CellExecutionResult {
    pub success: bool,
    pub outputs: Vec<Output>,
    pub error: Option<String>,
    /// Reflective text of every non-protected public binding, for display.
    pub namespace_state: HashMap<String, String>,
}

/// Widget constructor function names the executor knows to sweep for.
const WIDGET_CONSTRUCTORS: &[&str] = &[
    "range_slider",
    "slider",
    "number",
    "text_input",
    "checkbox",
    "dropdown",
    "radio",
    "multiselect",
    "button",
];

/// Executes cells against a session's namespace, tracker, and widget
/// registry.
pub struct CellExecutor {
    interpreter: Interpreter,
}

impl CellExecutor {
    pub fn new() -> Self {
        Self {
            interpreter: Interpreter::new(),
        }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Run `source` under `cell_id` against the given session state.
    pub fn execute(
        &self,
        cell_id: &str,
        source: &str,
        namespace: &mut Namespace,
        tracker: &mut CellTracker,
        widget_registry: &mut WidgetRegistry,
        config: &Config,
        scratch_dir: Option<&Path>,
    ) -> CellExecutionResult {
        if let Err(rejection) = security::validate(source, config, &self.interpreter) {
            return CellExecutionResult {
                success: false,
                outputs: vec![Output::error(rejection.to_string())],
                error: Some(rejection.to_string()),
                namespace_state: HashMap::new(),
            };
        }

        let mut tracker_warnings: Vec<Output> = Vec::new();

        tracker.cleanup_before_rerun(cell_id, namespace, widget_registry);
        tracker.run_initialization_conflict_pass(source);
        if let Err(err) = tracker.snapshot(cell_id, namespace) {
            tracker_warnings.push(Output::warning(err.to_string()));
        }

        let previous_dir = std::env::current_dir().ok();
        if let Some(dir) = scratch_dir {
            let _ = std::env::set_current_dir(dir);
        }

        let eval_result = self.interpreter.evaluate(source, namespace);

        if let Some(dir) = previous_dir {
            let _ = std::env::set_current_dir(dir);
        }

        let streams = self.interpreter.take_streams();
        let mut body_outputs = Vec::new();
        let mut success = true;
        let mut error = None;

        let mut seen_widget_ids: Vec<String> = Vec::new();

        match eval_result {
            Ok(value) => {
                let marshalled = ends_in_bare_expression(source)
                    .then(|| output::marshal(&value, widget_registry, &seen_widget_ids));

                if let Some(marshalled) = &marshalled {
                    if let Some(id) = &marshalled.widget_id {
                        seen_widget_ids.push(id.clone());
                    }
                }

                if marshalled.as_ref().map(|m| m.was_plot).unwrap_or(false) {
                    output::take_open_figures();
                } else {
                    for figure in output::take_open_figures() {
                        let plot = output::apply_webgl_hint(
                            output::plot_output(&figure),
                            figure.point_count,
                            config.webgl_threshold,
                        );
                        body_outputs.push(plot);
                    }
                }

                if let Some(marshalled) = marshalled {
                    body_outputs.push(marshalled.output.apply_size_policy(config));
                }

                for call_source in widget_constructor_calls(source) {
                    let Ok(candidate) = self.interpreter.evaluate(&call_source, namespace) else {
                        continue;
                    };
                    let swept = output::marshal(&candidate, widget_registry, &seen_widget_ids);
                    if swept.was_widget {
                        if let Some(id) = swept.widget_id.clone() {
                            if !seen_widget_ids.contains(&id) {
                                seen_widget_ids.push(id);
                                body_outputs.push(swept.output);
                            }
                        }
                    }
                }
            }
            Err(err) => {
                success = false;
                let message = err.to_string();
                body_outputs.push(Output::error(message.clone()));
                error = Some(message);
            }
        }

        let mut outputs = Vec::new();
        if !streams.stdout.is_empty() {
            outputs.push(Output::stdout(streams.stdout));
        }
        if !streams.stderr.is_empty() {
            outputs.push(Output::stderr(streams.stderr));
        }
        outputs.extend(body_outputs);

        if let Err(err) = tracker.attribute(cell_id, namespace, source) {
            tracker_warnings.push(Output::warning(err.to_string()));
        }

        let bound_widget_ids: Vec<String> = tracker
            .record(cell_id)
            .map(|record| record.bindings.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|name| namespace.value_of(&name))
            .filter_map(|value| value.try_cast::<WidgetHandle>())
            .map(|handle| widget_registry.register(&handle).id)
            .collect();
        tracker.attribute_widgets(cell_id, bound_widget_ids);
        outputs.extend(tracker_warnings);

        let namespace_state = display_snapshot(namespace, tracker);

        CellExecutionResult {
            success,
            outputs,
            error,
            namespace_state,
        }
    }
}

impl Default for CellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Reflective text of every non-protected public binding currently in
/// `namespace`.
fn display_snapshot(namespace: &Namespace, tracker: &CellTracker) -> HashMap<String, String> {
    namespace
        .names()
        .into_iter()
        .filter(|name| !tracker.is_protected_name(name))
        .map(|name| {
            let text = namespace.text_of(&name).unwrap_or_else(|| crate::namespace::NOT_SERIALIZABLE.to_string());
            (name, text)
        })
        .collect()
}

/// Extract balanced-parenthesis call expressions for every bare call to a
/// known widget constructor name in `source`, for the post-result widget
/// sweep.
fn widget_constructor_calls(source: &str) -> Vec<String> {
    let mut calls = Vec::new();
    for name in WIDGET_CONSTRUCTORS {
        let mut search_from = 0;
        while let Some(offset) = source[search_from..].find(name) {
            let start = search_from + offset;
            let end = start + name.len();
            let bytes = source.as_bytes();

            let preceded_ok = start == 0 || !is_ident_char(bytes[start - 1] as char);
            let followed_ok = end < bytes.len() && !is_ident_char(bytes[end] as char);

            if preceded_ok && followed_ok {
                if let Some(paren_start) = source[end..].find('(') {
                    let paren_start = end + paren_start;
                    if source[end..paren_start].trim().is_empty() {
                        if let Some(call_end) = matching_close_paren(source, paren_start) {
                            calls.push(source[start..=call_end].to_string());
                        }
                    }
                }
            }
            search_from = end;
        }
    }
    calls
}

fn matching_close_paren(source: &str, open_paren: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(open_paren) {
        match b as char {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether `source`'s trailing top-level statement is a bare expression,
/// the only case that contributes an expression-result output. Mirrors the
/// embedded engine's own block-value rule: a statement terminated by `;`
/// never becomes the block's value, so an empty cell or one that ends in
/// `;` never produces one, regardless of what the evaluated value is.
fn ends_in_bare_expression(source: &str) -> bool {
    let trimmed = source.trim_end();
    !trimmed.is_empty() && !trimmed.ends_with(';')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor_harness() -> (CellExecutor, Namespace, CellTracker, WidgetRegistry, Config) {
        (
            CellExecutor::new(),
            Namespace::new(),
            CellTracker::new(Vec::<String>::new()),
            WidgetRegistry::new(),
            Config::default(),
        )
    }

    #[test]
    fn test_execute_simple_assignment() {
        let (executor, mut ns, mut tracker, mut widgets, config) = executor_harness();
        let result = executor.execute("c1", "let x = 42;", &mut ns, &mut tracker, &mut widgets, &config, None);
        assert!(result.success);
        assert_eq!(result.namespace_state.get("x"), Some(&"42".to_string()));
        assert!(!result.outputs.iter().any(|o| o.kind == OutputKind::ExpressionResult));
    }

    #[test]
    fn test_empty_source_produces_no_outputs() {
        let (executor, mut ns, mut tracker, mut widgets, config) = executor_harness();
        let result = executor.execute("c1", "", &mut ns, &mut tracker, &mut widgets, &config, None);
        assert!(result.success);
        assert!(result.outputs.is_empty());
    }

    #[test]
    fn test_statement_only_source_produces_no_expression_result() {
        let (executor, mut ns, mut tracker, mut widgets, config) = executor_harness();
        let result =
            executor.execute("c1", "let x = 1; let y = 2;", &mut ns, &mut tracker, &mut widgets, &config, None);
        assert!(result.success);
        assert!(!result.outputs.iter().any(|o| o.kind == OutputKind::ExpressionResult));
    }

    #[test]
    fn test_execute_expression_result() {
        let (executor, mut ns, mut tracker, mut widgets, config) = executor_harness();
        let result = executor.execute("c1", "1 + 2", &mut ns, &mut tracker, &mut widgets, &config, None);
        assert!(result.success);
        assert!(result.outputs.iter().any(|o| o.kind == OutputKind::ExpressionResult && o.content == "3"));
    }

    #[test]
    fn test_execute_array_expression_result() {
        let (executor, mut ns, mut tracker, mut widgets, config) = executor_harness();
        let result = executor.execute("c1", "[1, 2, 3]", &mut ns, &mut tracker, &mut widgets, &config, None);
        assert!(result.outputs.iter().any(|o| o.content.contains("1") && o.mime_type == "application/json"));
    }

    #[test]
    fn test_execute_runtime_error_marks_failure() {
        let (executor, mut ns, mut tracker, mut widgets, config) = executor_harness();
        let result = executor.execute("c1", "1 / 0", &mut ns, &mut tracker, &mut widgets, &config, None);
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_security_rejection_short_circuits() {
        let (executor, mut ns, mut tracker, mut widgets, config) = executor_harness();
        let result = executor.execute(
            "c1",
            r#"import "os" as os;"#,
            &mut ns,
            &mut tracker,
            &mut widgets,
            &config,
            None,
        );
        assert!(!result.success);
        assert!(result.outputs[0].content.to_lowercase().contains("import"));
        assert!(result.namespace_state.is_empty());
    }

    #[test]
    fn test_cross_cell_binding_preservation() {
        let (executor, mut ns, mut tracker, mut widgets, config) = executor_harness();
        executor.execute("c1", "let y = 10;", &mut ns, &mut tracker, &mut widgets, &config, None);
        executor.execute("c2", "let y = 10; let z = y + 1;", &mut ns, &mut tracker, &mut widgets, &config, None);
        let result = executor.execute("c1", "let y = 10;", &mut ns, &mut tracker, &mut widgets, &config, None);
        assert_eq!(result.namespace_state.get("z"), Some(&"11".to_string()));
    }

    #[test]
    fn test_widget_sweep_emits_widget_output() {
        let (executor, mut ns, mut tracker, mut widgets, config) = executor_harness();
        let result = executor.execute(
            "w1",
            "slider(0, 100, 1)",
            &mut ns,
            &mut tracker,
            &mut widgets,
            &config,
            None,
        );
        assert!(result.outputs.iter().any(|o| o.kind == OutputKind::Widget));
    }

    #[test]
    fn test_widget_registration_stable_across_reruns() {
        let (executor, mut ns, mut tracker, mut widgets, config) = executor_harness();
        let first = executor.execute(
            "w1",
            "slider(0, 100, 1)",
            &mut ns,
            &mut tracker,
            &mut widgets,
            &config,
            None,
        );
        let second = executor.execute(
            "w1",
            "slider(0, 100, 1)",
            &mut ns,
            &mut tracker,
            &mut widgets,
            &config,
            None,
        );
        let id_of = |r: &CellExecutionResult| {
            r.outputs
                .iter()
                .find(|o| o.kind == OutputKind::Widget)
                .map(|o| o.content.clone())
        };
        assert_eq!(id_of(&first), id_of(&second));
    }
}
