//! Collision-free identifier allocation.

use std::collections::{BTreeMap, HashMap, HashSet};

/// A set of names already in use.
///
/// Implemented for the map and set types the registries keep their entries
/// in, so the allocator can probe any of them without copying keys.
pub trait Scope {
    /// Whether `name` is already taken in this scope.
    fn contains_name(&self, name: &str) -> bool;
}

impl<V> Scope for BTreeMap<String, V> {
    fn contains_name(&self, name: &str) -> bool {
        self.contains_key(name)
    }
}

impl<V> Scope for HashMap<String, V> {
    fn contains_name(&self, name: &str) -> bool {
        self.contains_key(name)
    }
}

impl Scope for HashSet<String> {
    fn contains_name(&self, name: &str) -> bool {
        self.contains(name)
    }
}

/// Return a name absent from `scope`, derived from `desired`.
///
/// `desired` is returned unchanged when free. Otherwise the smallest
/// positive integer suffix that yields a free name is appended
/// (`name1`, `name2`, ...). The scope is only read; recording the result
/// is up to the caller.
///
/// # Examples
///
/// ```
/// use std::collections::HashSet;
/// use alt_flux::uid;
///
/// let taken: HashSet<String> = ["Foo".to_string(), "Foo1".to_string()].into();
/// assert_eq!(uid(&taken, "Bar"), "Bar");
/// assert_eq!(uid(&taken, "Foo"), "Foo2");
/// ```
pub fn uid<S: Scope + ?Sized>(scope: &S, desired: &str) -> String {
    if !scope.contains_name(desired) {
        return desired.to_owned();
    }
    // A finite scope holds at most `n` names, so one of the first `n + 1`
    // suffixes is always free.
    (1u64..)
        .map(|n| format!("{desired}{n}"))
        .find(|candidate| !scope.contains_name(candidate))
        .unwrap_or_else(|| desired.to_owned())
}

/// Turn a camelCase member name into an UPPER_SNAKE_CASE constant name.
///
/// An underscore is inserted only between a lowercase ASCII letter and the
/// uppercase ASCII letter that follows it, so runs of capitals stay joined
/// (`fetchURL` becomes `FETCH_URL`).
pub fn format_as_constant(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.chars() {
        if let Some(p) = prev
            && p.is_ascii_lowercase()
            && c.is_ascii_uppercase()
        {
            out.push('_');
        }
        out.push(c.to_ascii_uppercase());
        prev = Some(c);
    }
    out
}

/// Last path segment of a type name, without generic parameters.
///
/// `my_app::stores::TodoStore<T>` becomes `TodoStore`.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
