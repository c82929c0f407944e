//! Typed output records and the expression-result marshalling ladder.

use std::cell::RefCell;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::write::GzEncoder;
use flate2::Compression;
use rhai::{Dynamic, Engine};
use serde::Serialize;

use crate::config::Config;
use crate::widgets::{Widget, WidgetHandle, WidgetRegistry};

/// The kind of an [`Output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputKind {
    Stdout,
    Stderr,
    ExpressionResult,
    Error,
    Html,
    Plot,
    Widget,
    Warning,
}

/// The shape of an [`Output`]'s content, for clients that want to avoid
/// sniffing `mime_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    TextData,
    HtmlData,
    JsonData,
    ImageData,
    WidgetData,
}

/// One unit of cell output, as carried over the RPC boundary.
#[derive(Debug, Clone, Serialize)]
pub struct Output {
    pub kind: OutputKind,
    pub content: String,
    /// Opaque bytes, used for binary payloads (compressed content, raw
    /// image bytes). Base64-encoded when serialized to JSON via `content`
    /// instead, unless a client specifically needs `data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    pub mime_type: String,
    pub metadata: std::collections::HashMap<String, String>,
    pub data_type: DataType,
}

impl Output {
    fn new(kind: OutputKind, content: impl Into<String>, mime_type: &str, data_type: DataType) -> Self {
        Self {
            kind,
            content: content.into(),
            data: None,
            mime_type: mime_type.to_string(),
            metadata: std::collections::HashMap::new(),
            data_type,
        }
    }

    pub fn stdout(text: impl Into<String>) -> Self {
        Self::new(OutputKind::Stdout, text, "text/plain", DataType::TextData)
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self::new(OutputKind::Stderr, text, "text/plain", DataType::TextData)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(OutputKind::Error, message, "text/plain", DataType::TextData)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(OutputKind::Warning, message, "text/plain", DataType::TextData)
    }

    /// Apply the size-threshold policy from `config`: gzip-compress
    /// `content` in place when it exceeds the configured maximum, leaving
    /// `kind`/`mime_type`/`data_type` untouched and recording the
    /// transport change via metadata.
    pub fn apply_size_policy(mut self, config: &Config) -> Self {
        if self.content.len() > config.max_output_size_bytes {
            if let Ok(compressed) = gzip(self.content.as_bytes()) {
                self.data = Some(compressed);
                self.content.clear();
                self.metadata.insert("compressed".to_string(), "true".to_string());
            }
        }
        self
    }
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// A value exposing a rich HTML representation (ladder step 3).
#[derive(Debug, Clone)]
pub struct HtmlRepr(pub String);

/// A tabular/series value exposing both a shape and a text representation
/// (ladder step 4).
#[derive(Debug, Clone)]
pub struct TabularValue {
    pub rows: i64,
    pub cols: i64,
    pub text: String,
    pub html: Option<String>,
}

/// A numeric array exposing shape and dtype (ladder step 7).
#[derive(Debug, Clone)]
pub struct NdArray {
    pub shape: Vec<i64>,
    pub dtype: String,
    pub elements: Vec<f64>,
}

static NEXT_FIGURE_ID: AtomicU64 = AtomicU64::new(0);

/// A plot figure. Figures register themselves into a thread-local "open
/// figures" list when constructed, mirroring the source ecosystem's
/// globally-registered current-figure stack; the executor scans that list
/// after marshalling the explicit expression result and emits a `PLOT`
/// output for every figure not already consumed.
#[derive(Debug, Clone)]
pub struct PlotFigure {
    pub id: u64,
    pub point_count: i64,
    /// Placeholder PNG payload; a real rendering backend would populate
    /// this from the figure's actual drawn content.
    pub png_base64: String,
}

thread_local! {
    static OPEN_FIGURES: RefCell<Vec<PlotFigure>> = const { RefCell::new(Vec::new()) };
}

fn new_plot(point_count: i64) -> PlotFigure {
    let figure = PlotFigure {
        id: NEXT_FIGURE_ID.fetch_add(1, Ordering::Relaxed),
        point_count,
        png_base64: base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            format!("plot-with-{point_count}-points").as_bytes(),
        ),
    };
    OPEN_FIGURES.with(|figures| figures.borrow_mut().push(figure.clone()));
    figure
}

/// Drain the figures created (but not yet consumed) during the current
/// cell's execution.
pub fn take_open_figures() -> Vec<PlotFigure> {
    OPEN_FIGURES.with(|figures| std::mem::take(&mut *figures.borrow_mut()))
}

/// Register the marshaller's recognised value constructors on `engine`,
/// so notebook cells can produce HTML, tabular, plot, and array outputs.
pub fn register(engine: &mut Engine) {
    engine.register_type_with_name::<HtmlRepr>("HtmlRepr");
    engine.register_fn("html", |s: &str| HtmlRepr(s.to_string()));

    engine.register_type_with_name::<TabularValue>("TabularValue");
    engine.register_fn("dataframe", |rows: i64, cols: i64, text: &str| TabularValue {
        rows,
        cols,
        text: text.to_string(),
        html: Some(format!("<table data-rows=\"{rows}\" data-cols=\"{cols}\">{text}</table>")),
    });

    engine.register_type_with_name::<NdArray>("NdArray");
    engine.register_fn("ndarray", |elements: rhai::Array| {
        let data: Vec<f64> = elements.iter().filter_map(|d| d.as_float().ok()).collect();
        NdArray {
            shape: vec![data.len() as i64],
            dtype: "f64".to_string(),
            elements: data,
        }
    });

    engine.register_type_with_name::<PlotFigure>("PlotFigure");
    engine.register_fn("plot", new_plot);
}

/// Outcome of marshalling an expression result: the `Output` plus whether
/// the value was recognised as a widget (so the caller can skip the
/// AST-based widget sweep for this same value).
pub struct Marshalled {
    pub output: Output,
    pub was_widget: bool,
    pub was_plot: bool,
    /// The widget id this value resolved to, if `was_widget`.
    pub widget_id: Option<String>,
}

/// Convert `value` into a typed [`Output`], following the decision ladder
/// in order. `registry` assigns/reuses widget ids; `seen_widget_ids` lists
/// widgets already emitted earlier in this same cell invocation, to avoid
/// double-rendering.
pub fn marshal(
    value: &Dynamic,
    registry: &mut WidgetRegistry,
    seen_widget_ids: &[String],
) -> Marshalled {
    if value.is_unit() {
        return Marshalled {
            output: Output::new(
                OutputKind::ExpressionResult,
                "None",
                "text/plain",
                DataType::TextData,
            ),
            was_widget: false,
            was_plot: false,
            widget_id: None,
        };
    }

    if let Some(handle) = value.clone().try_cast::<WidgetHandle>() {
        let widget = registry.register(&handle);
        if seen_widget_ids.contains(&widget.id) {
            return Marshalled {
                output: Output::new(
                    OutputKind::ExpressionResult,
                    format!("[widget {} already shown this cell]", widget.id),
                    "text/plain",
                    DataType::TextData,
                ),
                was_widget: true,
                was_plot: false,
                widget_id: Some(widget.id),
            };
        }
        return Marshalled {
            output: widget_output(&widget),
            was_widget: true,
            was_plot: false,
            widget_id: Some(widget.id),
        };
    }

    if let Some(html) = value.clone().try_cast::<HtmlRepr>() {
        return Marshalled {
            output: Output::new(OutputKind::ExpressionResult, html.0, "text/html", DataType::HtmlData),
            was_widget: false,
            was_plot: false,
            widget_id: None,
        };
    }

    if let Some(table) = value.clone().try_cast::<TabularValue>() {
        let (content, mime, data_type) = match table.html {
            Some(html) => (html, "text/html", DataType::HtmlData),
            None => (table.text, "text/plain", DataType::TextData),
        };
        return Marshalled {
            output: Output::new(OutputKind::ExpressionResult, content, mime, data_type),
            was_widget: false,
            was_plot: false,
            widget_id: None,
        };
    }

    if let Some(figure) = value.clone().try_cast::<PlotFigure>() {
        return Marshalled {
            output: plot_output(&figure),
            was_widget: false,
            was_plot: true,
            widget_id: None,
        };
    }

    if value.is_array() || value.is_map() {
        let json = dynamic_to_json(value);
        let text = serde_json::to_string_pretty(&json).unwrap_or_else(|_| value.to_string());
        return Marshalled {
            output: Output::new(
                OutputKind::ExpressionResult,
                text,
                "application/json",
                DataType::JsonData,
            ),
            was_widget: false,
            was_plot: false,
            widget_id: None,
        };
    }

    if let Some(array) = value.clone().try_cast::<NdArray>() {
        let header = format!("shape={:?}, dtype={}", array.shape, array.dtype);
        let body = if array.elements.len() > 32 {
            format!(
                "{}\n[{}, ... {} more]",
                header,
                array.elements[..8]
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                array.elements.len() - 8
            )
        } else {
            format!(
                "{}\n[{}]",
                header,
                array
                    .elements
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };
        return Marshalled {
            output: Output::new(OutputKind::ExpressionResult, body, "text/plain", DataType::TextData),
            was_widget: false,
            was_plot: false,
            widget_id: None,
        };
    }

    Marshalled {
        output: Output::new(
            OutputKind::ExpressionResult,
            value.to_string(),
            "text/plain",
            DataType::TextData,
        ),
        was_widget: false,
        was_plot: false,
        widget_id: None,
    }
}

/// Build the `PLOT` output for a figure swept up after the explicit
/// result, separate from `marshal`'s own plot handling so the figure scan
/// can reuse it without re-running the ladder.
pub fn plot_output(figure: &PlotFigure) -> Output {
    Output::new(
        OutputKind::Plot,
        format!("data:image/png;base64,{}", figure.png_base64),
        "image/png",
        DataType::ImageData,
    )
}

/// The default plot-point-count threshold check, attaching a `webgl`
/// rendering hint when `point_count` exceeds `threshold`.
pub fn apply_webgl_hint(mut output: Output, point_count: i64, threshold: usize) -> Output {
    if point_count as usize > threshold {
        output.metadata.insert("webgl".to_string(), "true".to_string());
    }
    output
}

fn widget_output(widget: &Widget) -> Output {
    let descriptor = serde_json::json!({
        "id": widget.id,
        "type": widget.kind.as_str(),
        "value": widget.value,
        "properties": widget.properties,
    });
    Output::new(
        OutputKind::Widget,
        serde_json::to_string(&descriptor).unwrap_or_default(),
        "application/json",
        DataType::WidgetData,
    )
}

/// Recursively convert a `rhai::Dynamic` into a `serde_json::Value`,
/// falling back to its string representation for leaves that have no
/// direct JSON shape.
pub fn dynamic_to_json(value: &Dynamic) -> serde_json::Value {
    if value.is_unit() {
        return serde_json::Value::Null;
    }
    if let Ok(b) = value.as_bool() {
        return serde_json::Value::Bool(b);
    }
    if let Ok(n) = value.as_int() {
        return serde_json::Value::from(n);
    }
    if let Ok(f) = value.as_float() {
        return serde_json::json!(f);
    }
    if let Ok(s) = value.clone().into_string() {
        return serde_json::Value::String(s);
    }
    if value.is_array() {
        let arr = value.clone().into_array().unwrap_or_default();
        return serde_json::Value::Array(arr.iter().map(dynamic_to_json).collect());
    }
    if value.is_map() {
        let map = value.clone().cast::<rhai::Map>();
        let mut obj = serde_json::Map::new();
        for (k, v) in map.into_iter() {
            obj.insert(k.to_string(), dynamic_to_json(&v));
        }
        return serde_json::Value::Object(obj);
    }
    serde_json::Value::String(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widgets::WidgetRegistry;

    fn registry() -> WidgetRegistry {
        WidgetRegistry::new()
    }

    #[test]
    fn test_marshal_unit_is_none() {
        let marshalled = marshal(&Dynamic::UNIT, &mut registry(), &[]);
        assert_eq!(marshalled.output.content, "None");
        assert_eq!(marshalled.output.kind, OutputKind::ExpressionResult);
    }

    #[test]
    fn test_marshal_int_expression() {
        let marshalled = marshal(&Dynamic::from(3_i64), &mut registry(), &[]);
        assert_eq!(marshalled.output.content, "3");
        assert_eq!(marshalled.output.mime_type, "text/plain");
    }

    #[test]
    fn test_marshal_array_as_json() {
        let array: rhai::Array = vec![Dynamic::from(1_i64), Dynamic::from(2_i64), Dynamic::from(3_i64)];
        let marshalled = marshal(&Dynamic::from(array), &mut registry(), &[]);
        assert_eq!(marshalled.output.mime_type, "application/json");
        assert_eq!(marshalled.output.content, "[\n  1,\n  2,\n  3\n]");
    }

    #[test]
    fn test_marshal_html_repr() {
        let value = Dynamic::from(HtmlRepr("<b>hi</b>".to_string()));
        let marshalled = marshal(&value, &mut registry(), &[]);
        assert_eq!(marshalled.output.mime_type, "text/html");
    }

    #[test]
    fn test_marshal_plot_marks_was_plot() {
        let figure = new_plot(10);
        take_open_figures(); // clear registration from new_plot's side effect
        let marshalled = marshal(&Dynamic::from(figure), &mut registry(), &[]);
        assert!(marshalled.was_plot);
        assert_eq!(marshalled.output.kind, OutputKind::Plot);
    }

    #[test]
    fn test_size_policy_compresses_large_content() {
        let mut config = Config::default();
        config.max_output_size_bytes = 4;
        let output = Output::stdout("way more than four bytes").apply_size_policy(&config);
        assert!(output.data.is_some());
        assert_eq!(output.metadata.get("compressed").map(String::as_str), Some("true"));
    }
}
