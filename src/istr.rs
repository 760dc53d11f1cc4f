// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::Arc;

/// Immutable, reference-counted string for identifiers
///
/// This replaces plain `&'static str`/`String` for names that are passed
/// around and stored a lot (class names, parameter keys, comparator names).
/// It is not a general string type: the only operations are cheap cloning,
/// concatenation and ordered comparison. A distinguished [`IStr::null`] value
/// represents "no string" and is distinct from the empty string.
#[derive(Clone, Default)]
pub struct IStr(Option<Arc<str>>);

impl IStr {
    /// The distinguished "no string" value.
    #[must_use]
    pub const fn null() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn new(s: &str) -> Self {
        Self(Some(Arc::from(s)))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// String contents; the null value reads as the empty string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_deref().unwrap_or("")
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_str().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }

    /// Whether two handles point at the same shared allocation.
    ///
    /// Equality (`==`) compares contents; this is the cheaper identity test
    /// for interned names. Two null values share "no allocation".
    #[must_use]
    pub fn shares_allocation(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Concatenation; produces a fresh shared allocation.
    ///
    /// Concatenating with null returns the other operand unchanged.
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => {
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(a);
                s.push_str(b);
                Self(Some(Arc::from(s.as_str())))
            }
            (Some(_), None) => self.clone(),
            (None, _) => other.clone(),
        }
    }

    /// Binary search over a sorted sequence of strings.
    #[must_use]
    pub fn locate(sorted: &[Self], key: &str) -> Option<usize> {
        sorted.binary_search_by(|probe| probe.as_str().cmp(key)).ok()
    }
}

impl PartialEq for IStr {
    fn eq(&self, other: &Self) -> bool {
        self.shares_allocation(other) || self.0.as_deref() == other.0.as_deref()
    }
}

impl Eq for IStr {}

impl PartialOrd for IStr {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IStr {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // null sorts before everything, including ""
        self.0.as_deref().cmp(&other.0.as_deref())
    }
}

impl std::hash::Hash for IStr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_deref().hash(state);
    }
}

impl PartialEq<str> for IStr {
    fn eq(&self, other: &str) -> bool {
        self.0.as_deref() == Some(other)
    }
}

impl PartialEq<&str> for IStr {
    fn eq(&self, other: &&str) -> bool {
        self.0.as_deref() == Some(*other)
    }
}

impl From<&str> for IStr {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for IStr {
    fn from(value: String) -> Self {
        Self(Some(Arc::from(value.as_str())))
    }
}

impl std::fmt::Debug for IStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(s) => write!(f, "{s:?}"),
            None => write!(f, "<null>"),
        }
    }
}

impl std::fmt::Display for IStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::IStr;
    use test_log::test;

    #[test]
    fn istr_null_vs_empty() {
        assert!(IStr::null().is_null());
        assert!(!IStr::new("").is_null());
        assert_ne!(IStr::null(), IStr::new(""));
    }

    #[test]
    fn istr_identity_and_equality() {
        let a = IStr::new("name");
        let b = a.clone();
        let c = IStr::new("name");

        assert!(a.shares_allocation(&b));
        assert!(!a.shares_allocation(&c));
        assert_eq!(a, c);
    }

    #[test]
    fn istr_concat() {
        let a = IStr::new("foo");
        let b = IStr::new("_bar");

        let joined = a.concat(&b);
        assert_eq!(joined, "foo_bar");
        assert_eq!(a.len() + b.len(), joined.len());

        assert_eq!(a.concat(&IStr::null()), "foo");
        assert_eq!(IStr::null().concat(&b), "_bar");
        assert!(IStr::null().concat(&IStr::null()).is_null());
    }

    #[test]
    fn istr_locate() {
        let sorted = [IStr::new("alpha"), IStr::new("beta"), IStr::new("gamma")];

        assert_eq!(Some(1), IStr::locate(&sorted, "beta"));
        assert_eq!(None, IStr::locate(&sorted, "delta"));
    }
}
