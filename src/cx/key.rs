//! Value keys.
//!
//! A key matches only keys of the same concrete type that compare equal, so
//! every caller-defined key type is its own key space:
//!
//! ```
//! use ctxtree::Context;
//!
//! #[derive(Debug, PartialEq)]
//! struct RequestId;
//!
//! #[derive(Debug, PartialEq)]
//! struct TraceKey(&'static str);
//!
//! let ctx = Context::background()
//!     .with_value(RequestId, 42_u64)?
//!     .with_value(TraceKey("span"), "abc")?;
//!
//! assert_eq!(ctx.value::<u64>(&RequestId), Some(&42));
//! assert_eq!(ctx.value::<&str>(&TraceKey("span")), Some(&"abc"));
//! # Ok::<(), ctxtree::Error>(())
//! ```
//!
//! Types built only from primitives and standard-library types, such as
//! `&str`, `u64`, `Vec<u8>`, `Option<String>` or `(u8, u8)`, are shared by
//! every module of a program and are rejected with
//! [`Error::InvalidKey`](crate::Error::InvalidKey). A type that names a
//! caller-defined type anywhere, such as `Option<RequestId>`, is accepted.

use std::any::{type_name, Any};
use std::fmt;

/// Types usable as context keys.
///
/// Blanket-implemented; the runtime check in `with_value` additionally
/// rejects types built only from primitive and standard-library types.
pub trait ContextKey: Any + Send + Sync + PartialEq + fmt::Debug {}

impl<T> ContextKey for T where T: Any + Send + Sync + PartialEq + fmt::Debug {}

/// Object-safe view of a stored key.
pub(crate) trait StoredKey: Send + Sync + fmt::Debug {
    fn matches(&self, other: &dyn Any) -> bool;
}

impl<K: ContextKey> StoredKey for K {
    fn matches(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<K>().is_some_and(|other| other == self)
    }
}

/// Path roots of the standard library.
const STD_ROOTS: &[&str] = &["core", "alloc", "std"];

/// Primitive type names and the keywords that appear in type names.
const PRIMITIVES: &[&str] = &[
    "bool", "char", "str", "u8", "u16", "u32", "u64", "u128", "usize", "i8", "i16", "i32",
    "i64", "i128", "isize", "f32", "f64", "fn", "dyn", "mut", "const",
];

/// Returns true if `K` is built only from primitive and standard-library
/// types, so every module could pick it independently.
pub(crate) fn is_shared_key_type<K: Any>() -> bool {
    is_shared_type_name(type_name::<K>())
}

/// Every path in `name` must be primitive or rooted in the standard library.
fn is_shared_type_name(name: &str) -> bool {
    name.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == ':'))
        .filter(|token| !token.is_empty())
        .all(|token| match token.split_once("::") {
            Some((root, _)) => STD_ROOTS.contains(&root),
            // Array lengths are the only bare numbers.
            None => PRIMITIVES.contains(&token) || token.bytes().all(|b| b.is_ascii_digit()),
        })
}

pub(crate) fn key_type_name<K>() -> &'static str {
    type_name::<K>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Name(&'static str);

    #[derive(Debug, PartialEq)]
    struct Other(&'static str);

    #[test]
    fn matches_same_type_and_value() {
        let stored: Box<dyn StoredKey> = Box::new(Name("a"));
        assert!(stored.matches(&Name("a")));
        assert!(!stored.matches(&Name("b")));
    }

    #[test]
    fn distinct_types_are_distinct_spaces() {
        let stored: Box<dyn StoredKey> = Box::new(Name("a"));
        assert!(!stored.matches(&Other("a")));
        assert!(!stored.matches(&"a"));
    }

    #[test]
    fn primitives_are_shared() {
        assert!(is_shared_key_type::<()>());
        assert!(is_shared_key_type::<&'static str>());
        assert!(is_shared_key_type::<String>());
        assert!(is_shared_key_type::<u64>());
        assert!(is_shared_key_type::<bool>());
        assert!(!is_shared_key_type::<Name>());
    }

    #[test]
    fn standard_compositions_are_shared() {
        assert!(is_shared_key_type::<Vec<u8>>());
        assert!(is_shared_key_type::<Option<String>>());
        assert!(is_shared_key_type::<Option<&'static str>>());
        assert!(is_shared_key_type::<(u8, u8)>());
        assert!(is_shared_key_type::<&'static [u8]>());
        assert!(is_shared_key_type::<[u16; 4]>());
        assert!(is_shared_key_type::<std::collections::BTreeMap<String, Vec<u32>>>());
    }

    #[test]
    fn compositions_naming_a_caller_type_are_accepted() {
        assert!(!is_shared_key_type::<Option<Name>>());
        assert!(!is_shared_key_type::<(Name, u8)>());
        assert!(!is_shared_key_type::<Vec<Other>>());
        assert!(!is_shared_key_type::<[Name; 2]>());
    }
}
