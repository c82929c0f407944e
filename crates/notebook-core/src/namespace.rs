//! The per-session evaluation namespace and its identity-tracking wrapper.
//!
//! The pre-execution snapshot required by the cell tracker (see
//! [`crate::tracker`]) must detect *identity changes*, not value equality,
//! without paying for a deep clone of every bound value on every cell run.
//! Rather than lean on the embedded engine's internal value-sharing
//! semantics (unstable, implementation-defined), every name in the
//! namespace is associated with a [`BindingId`]: an opaque counter bumped
//! whenever [`Namespace::sync_generations`] observes that the name's cheap
//! fingerprint changed since the last sync.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use rhai::{Dynamic, Scope};

/// Opaque, monotonically increasing identity for a namespace binding.
///
/// Two reads of the same name compare equal under `BindingId` iff no
/// rebind was observed between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(u64);

/// A namespace entry: the current identity plus the fingerprint used to
/// detect the next rebind.
#[derive(Debug, Clone, Copy)]
struct Binding {
    id: BindingId,
    fingerprint: u64,
}

/// The live evaluation environment shared by every cell in a session.
pub struct Namespace {
    scope: Scope<'static>,
    bindings: HashMap<String, Binding>,
    next_id: u64,
}

impl Namespace {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self {
            scope: Scope::new(),
            bindings: HashMap::new(),
            next_id: 0,
        }
    }

    /// The underlying `rhai` scope, for passing to the interpreter.
    pub fn scope_mut(&mut self) -> &mut Scope<'static> {
        &mut self.scope
    }

    /// Names currently bound in the namespace.
    pub fn names(&self) -> Vec<String> {
        self.scope.iter().map(|(name, ..)| name.to_string()).collect()
    }

    /// Whether `name` is currently bound.
    pub fn contains(&self, name: &str) -> bool {
        self.scope.contains(name)
    }

    /// Directly bind `name` to `value`, bumping its generation.
    pub fn set(&mut self, name: &str, value: Dynamic) {
        let fingerprint = fingerprint_of(&value);
        self.scope.set_value(name, value);
        self.bump(name, fingerprint);
    }

    /// Remove `name` from the namespace entirely.
    pub fn remove(&mut self, name: &str) {
        self.scope.remove::<Dynamic>(name);
        self.bindings.remove(name);
    }

    /// The current identity of `name`, if bound and synced at least once.
    pub fn binding_id(&self, name: &str) -> Option<BindingId> {
        self.bindings.get(name).map(|b| b.id)
    }

    /// A cheap point-in-time copy of every known binding's identity.
    ///
    /// This is the "shallow reference snapshot" called for by the pre-
    /// execution snapshot requirement: copying `BindingId`s is O(1) per
    /// name, never a deep clone of the bound value.
    pub fn snapshot_ids(&self) -> HashMap<String, BindingId> {
        self.bindings.iter().map(|(k, v)| (k.clone(), v.id)).collect()
    }

    /// Recompute fingerprints for every currently-bound name, bumping the
    /// generation of any name that is new or whose fingerprint changed.
    ///
    /// Must be called after every cell execution, before the tracker
    /// compares a pre-execution [`Namespace::snapshot_ids`] against the
    /// post-execution state.
    pub fn sync_generations(&mut self) {
        let current: Vec<(String, Dynamic)> = self
            .scope
            .iter()
            .map(|(name, _, value)| (name.to_string(), value))
            .collect();

        for (name, value) in current {
            let fingerprint = fingerprint_of(&value);
            let changed = match self.bindings.get(&name) {
                Some(existing) => existing.fingerprint != fingerprint,
                None => true,
            };
            if changed {
                self.bump(&name, fingerprint);
            }
        }
    }

    /// A reflective text representation of `name`'s value, or `None` if
    /// unbound.
    pub fn text_of(&self, name: &str) -> Option<String> {
        self.scope
            .get_value::<Dynamic>(name)
            .map(|v| reflective_text(&v))
    }

    /// The raw bound value for `name`, or `None` if unbound.
    pub fn value_of(&self, name: &str) -> Option<Dynamic> {
        self.scope.get_value::<Dynamic>(name)
    }

    fn bump(&mut self, name: &str, fingerprint: u64) {
        let id = BindingId(self.next_id);
        self.next_id += 1;
        self.bindings.insert(name.to_string(), Binding { id, fingerprint });
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

/// A cheap, non-recursive fingerprint of a dynamic value, used only to
/// detect rebinding. Not a substitute for value equality.
fn fingerprint_of(value: &Dynamic) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.type_name().hash(&mut hasher);
    value.to_string().hash(&mut hasher);
    hasher.finish()
}

/// The sentinel used for values that cannot be rendered as text.
pub const NOT_SERIALIZABLE: &str = "Not Serializable";

/// Render a dynamic value as display text, falling back to the
/// "Not Serializable" sentinel for values `rhai` cannot stringify
/// meaningfully (its `Display` impl never panics, so this is mostly
/// defensive headroom for future value kinds).
pub fn reflective_text(value: &Dynamic) -> String {
    if value.is_unit() {
        "None".to_string()
    } else {
        value.to_string()
    }
}
