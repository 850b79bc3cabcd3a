//! Composite key encoding.
//!
//! A key is stored as `scope\0token`. NUL cannot appear in a scope, so the
//! first NUL always marks the boundary and `("a", "b\0c")` never collides with
//! `("a\0b", "c")`.

/// Separator between scope and token in the composite key.
pub const KEY_SEPARATOR: char = '\0';

/// True if the string is empty or only whitespace.
#[inline]
pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Encode a scope and token into the composite key.
#[inline]
pub fn composite_key(scope: &str, token: &str) -> String {
    let mut key = String::with_capacity(scope.len() + token.len() + 1);
    key.push_str(scope);
    key.push(KEY_SEPARATOR);
    key.push_str(token);
    key
}

/// Prefix a composite key for the key-value store.
#[inline]
pub fn storage_key(prefix: &str, scope: &str, token: &str) -> String {
    let mut key = String::with_capacity(prefix.len() + scope.len() + token.len() + 1);
    key.push_str(prefix);
    key.push_str(&composite_key(scope, token));
    key
}

/// Split a composite key at the first separator.
///
/// Returns `None` if there is no separator.
#[inline]
pub fn split_composite_key(composite: &str) -> Option<(&str, &str)> {
    composite.split_once(KEY_SEPARATOR)
}
