//! Call-context annotations on parameters, results and functions

use super::native::NativeType;
use smallvec::SmallVec;
use std::sync::Arc;

/// Marshalling annotation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Annotation {
    /// Text encoding label, e.g. "UTF-16LE"
    Encoding(Arc<str>),
    /// Declares the exact native integer type of a logical value
    Alias(NativeType),
    /// Capture the native last-error value right after the call
    SaveError,
    /// Never capture the native last-error value
    IgnoreError,
    /// Copy managed contents to native memory before the call
    In,
    /// Copy native memory back to managed contents after the call
    Out,
    /// Append a zero element after the array contents
    NulTerminate,
}

/// Canonical (sorted, deduplicated) set of annotations; usable as a cache key
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AnnotationSet(SmallVec<[Annotation; 2]>);

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(items: impl IntoIterator<Item = Annotation>) -> Self {
        let mut set = Self::new();
        for item in items {
            set.insert(item);
        }
        set
    }

    pub fn insert(&mut self, annotation: Annotation) {
        if let Err(pos) = self.0.binary_search(&annotation) {
            self.0.insert(pos, annotation);
        }
    }

    pub fn with(mut self, annotation: Annotation) -> Self {
        self.insert(annotation);
        self
    }

    pub fn contains(&self, annotation: &Annotation) -> bool {
        self.0.binary_search(annotation).is_ok()
    }

    /// Union of two sets
    pub fn merged(&self, other: &AnnotationSet) -> Self {
        let mut set = self.clone();
        for a in other.iter() {
            set.insert(a.clone());
        }
        set
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Native type declared by an `Alias` annotation
    pub fn alias(&self) -> Option<NativeType> {
        self.0.iter().find_map(|a| match a {
            Annotation::Alias(native) => Some(*native),
            _ => None,
        })
    }

    /// Encoding label declared by an `Encoding` annotation
    pub fn encoding(&self) -> Option<&str> {
        self.0.iter().find_map(|a| match a {
            Annotation::Encoding(label) => Some(&**label),
            _ => None,
        })
    }

    /// Whether a last-error capture was requested, given the library default
    pub fn save_error(&self, default: bool) -> bool {
        if self.contains(&Annotation::IgnoreError) {
            false
        } else {
            default || self.contains(&Annotation::SaveError)
        }
    }
}
