//! The narrow `evaluate(source, namespace) -> expression-result` boundary
//! the rest of the runtime is built around.
//!
//! Everything above this module — tracking, marshalling, security, widgets —
//! is language-neutral; this is the only place that knows the embedded
//! scripting engine is `rhai`.

use std::sync::{Arc, Mutex};

use rhai::{Dynamic, Engine, AST};

use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::{output, widgets};

/// Captured standard-stream output from one evaluation.
#[derive(Debug, Default, Clone)]
pub struct CapturedStreams {
    pub stdout: String,
    pub stderr: String,
}

/// Wraps an embedded scripting engine behind the narrow evaluation
/// interface the rest of the core depends on.
pub struct Interpreter {
    engine: Engine,
    stdout: Arc<Mutex<Vec<String>>>,
    stderr: Arc<Mutex<Vec<String>>>,
}

impl Interpreter {
    /// Build a new interpreter. `eval`/`exec`-style dynamic evaluation is
    /// disabled at the engine level as defense in depth alongside the
    /// source-text rejection the security validator already performs.
    pub fn new() -> Self {
        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));

        let mut engine = Engine::new();
        engine.disable_symbol("eval");
        widgets::register(&mut engine);
        output::register(&mut engine);

        let out = stdout.clone();
        engine.on_print(move |s| out.lock().unwrap().push(s.to_string()));

        let err = stderr.clone();
        engine.on_debug(move |s, _src, _pos| err.lock().unwrap().push(s.to_string()));

        Self { engine, stdout, stderr }
    }

    /// Compile `source` without executing it, for syntax validation.
    pub fn compile(&self, source: &str) -> Result<AST> {
        self.engine
            .compile(source)
            .map_err(|e| Error::Execution(e.to_string()))
    }

    /// Evaluate `source` against `namespace`, returning the value of the
    /// trailing top-level expression (or unit, if the source ends in a
    /// statement rather than an expression — `rhai` resolves this
    /// distinction internally, matching the split-and-evaluate behaviour
    /// used elsewhere in the executor).
    pub fn evaluate(&self, source: &str, namespace: &mut Namespace) -> Result<Dynamic> {
        self.stdout.lock().unwrap().clear();
        self.stderr.lock().unwrap().clear();

        let ast = self.compile(source)?;
        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(namespace.scope_mut(), &ast)
            .map_err(Error::from);

        namespace.sync_generations();
        result
    }

    /// Drain the standard-stream output captured during the most recent
    /// [`Interpreter::evaluate`] call.
    pub fn take_streams(&self) -> CapturedStreams {
        CapturedStreams {
            stdout: self.stdout.lock().unwrap().join("\n"),
            stderr: self.stderr.lock().unwrap().join("\n"),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
