//! Source-level security validator.
//!
//! This is a policy surface, not a sandbox: it rejects obviously
//! disallowed programs before they ever reach the interpreter. It does not
//! attempt to prevent attribute-chain escapes or reflective access.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::interpreter::Interpreter;

/// Validate `source` against `config`'s policy, in the order the
/// specification requires: length, syntax, blocked import, disallowed
/// import, then bare `eval`/`exec` calls.
pub fn validate(source: &str, config: &Config, interpreter: &Interpreter) -> Result<()> {
    if source.chars().count() > config.max_code_length {
        return Err(Error::SecurityRejection(format!(
            "source exceeds maximum length of {} characters",
            config.max_code_length
        )));
    }

    interpreter
        .compile(source)
        .map_err(|e| Error::SecurityRejection(format!("syntax error: {e}")))?;

    for module in top_level_imports(source) {
        if config.blocked_imports.contains(&module) {
            return Err(Error::SecurityRejection(format!(
                "import of disallowed module '{module}' is blocked"
            )));
        }
        if !config.allowed_imports.contains(&module) {
            return Err(Error::SecurityRejection(format!(
                "import of module '{module}' is not in the allowed set"
            )));
        }
    }

    if contains_bare_call(source, "eval") || contains_bare_call(source, "exec") {
        return Err(Error::SecurityRejection(
            "direct calls to eval/exec are not permitted".to_string(),
        ));
    }

    Ok(())
}

/// Scan for `import "module[/sub]" [as alias];` statements and return each
/// import's top-level module component.
pub(crate) fn top_level_imports(source: &str) -> Vec<String> {
    let mut modules = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0;

    while let Some(offset) = source[i..].find("import") {
        let start = i + offset;
        // Require a word boundary before `import` so we don't match inside
        // an identifier like `reimport`.
        let preceded_ok = start == 0 || !is_ident_char(bytes[start - 1] as char);
        if !preceded_ok {
            i = start + 6;
            continue;
        }

        let rest = &source[start + 6..];
        let after_ws = rest.trim_start();
        if let Some(quoted) = after_ws.strip_prefix('"') {
            if let Some(end) = quoted.find('"') {
                let path = &quoted[..end];
                let top = path.split(['/', '.']).next().unwrap_or(path);
                if !top.is_empty() {
                    modules.push(top.to_string());
                }
            }
        }
        i = start + 6;
    }

    modules
}

/// Whether `source` contains a direct call expression whose callee is the
/// bare name `name` (i.e. `name(...)`, not `obj.name(...)` or part of a
/// longer identifier).
fn contains_bare_call(source: &str, name: &str) -> bool {
    let bytes = source.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = source[search_from..].find(name) {
        let start = search_from + offset;
        let end = start + name.len();

        let preceded_by_ident_or_dot = start > 0
            && (is_ident_char(bytes[start - 1] as char) || bytes[start - 1] as char == '.');
        let followed_by_ident = end < bytes.len() && is_ident_char(bytes[end] as char);

        if !preceded_by_ident_or_dot && !followed_by_ident {
            let after = source[end..].trim_start();
            if after.starts_with('(') {
                return true;
            }
        }

        search_from = end;
    }

    false
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
