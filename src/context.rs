//! Tag-keyed service contexts.
//!
//! A [`Context`] is an immutable association from a service [`Tag`] to one
//! service instance. Effects read services out of the ambient context at run
//! time; layers produce contexts. Once built, a context is read-only, so it
//! can be shared across fibers without locks.
//!
//! # Tag identity
//!
//! Lookup is keyed by tag *identity*, not by label. Every call to
//! [`Tag::new`] mints a fresh identity, so two tags created with the same
//! label are different keys and their entries do not collide. Copying or
//! cloning a tag preserves its identity. This is a real hazard: if a module
//! re-creates a tag instead of sharing one, it will not find the service it
//! expects. Share tags (e.g. via `static` or a constructor function that
//! returns a stored copy), never re-mint them.
//!
//! # Examples
//!
//! ```
//! use millrace::{Context, Tag};
//!
//! struct Config {
//!     retries: u32,
//! }
//!
//! let tag: Tag<Config> = Tag::new("Config");
//! let ctx = Context::empty().add(tag, Config { retries: 3 });
//! assert_eq!(ctx.get(&tag).map(|c| c.retries), Some(3));
//!
//! // Same label, different identity: a distinct entry.
//! let other: Tag<Config> = Tag::new("Config");
//! assert!(ctx.get(&other).is_none());
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TAG_ID: AtomicU64 = AtomicU64::new(1);

/// A globally unique identity keying one service of type `S`.
///
/// Tags are `Copy`; copies share the original identity. Equality is identity
/// equality, never label equality.
pub struct Tag<S: ?Sized> {
    id: u64,
    label: &'static str,
    _marker: PhantomData<fn() -> S>,
}

impl<S: ?Sized> Tag<S> {
    /// Mint a tag with a fresh identity.
    ///
    /// The label is for diagnostics only; it plays no part in lookup.
    pub fn new(label: &'static str) -> Self {
        Tag {
            id: NEXT_TAG_ID.fetch_add(1, Ordering::Relaxed),
            label,
            _marker: PhantomData,
        }
    }

    /// The diagnostic label this tag was created with.
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub(crate) fn key(&self) -> u64 {
        self.id
    }
}

impl<S: ?Sized> Clone for Tag<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: ?Sized> Copy for Tag<S> {}

impl<S: ?Sized> PartialEq for Tag<S> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<S: ?Sized> Eq for Tag<S> {}

impl<S: ?Sized> fmt::Debug for Tag<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}

impl<S: ?Sized> fmt::Display for Tag<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.id)
    }
}

#[derive(Clone)]
struct Entry {
    label: &'static str,
    service: Arc<dyn Any + Send + Sync>,
}

/// An immutable map from service tag to service instance.
///
/// All operations return a new context; an existing context is never mutated.
/// Services are stored behind `Arc`, so contexts clone cheaply.
#[derive(Clone, Default)]
pub struct Context {
    entries: HashMap<u64, Entry>,
}

impl Context {
    /// The empty context.
    pub fn empty() -> Self {
        Context::default()
    }

    /// Return a new context with `service` registered under `tag`.
    ///
    /// An existing entry for the same tag is replaced.
    pub fn add<S: Send + Sync + 'static>(mut self, tag: Tag<S>, service: S) -> Self {
        self.entries.insert(
            tag.key(),
            Entry {
                label: tag.label(),
                service: Arc::new(service),
            },
        );
        self
    }

    /// Look up the service registered under `tag`.
    pub fn get<S: Send + Sync + 'static>(&self, tag: &Tag<S>) -> Option<Arc<S>> {
        let entry = self.entries.get(&tag.key())?;
        entry.service.clone().downcast::<S>().ok()
    }

    /// Whether an entry exists for `tag`.
    pub fn contains<S: ?Sized>(&self, tag: &Tag<S>) -> bool {
        self.entries.contains_key(&tag.key())
    }

    /// Union of two contexts; on a tag collision the entry from `other` wins.
    ///
    /// This is the crate-wide merge policy: rightmost wins, deterministically.
    pub fn merge(&self, other: &Context) -> Context {
        let mut entries = self.entries.clone();
        for (key, entry) in &other.entries {
            entries.insert(*key, entry.clone());
        }
        Context { entries }
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no services are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut labels: Vec<&str> = self.entries.values().map(|e| e.label).collect();
        labels.sort_unstable();
        f.debug_struct("Context").field("services", &labels).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Logger {
        name: &'static str,
    }

    #[test]
    fn add_and_get_round_trip() {
        let tag: Tag<Logger> = Tag::new("Logger");
        let ctx = Context::empty().add(tag, Logger { name: "console" });
        assert_eq!(ctx.get(&tag).map(|l| l.name), Some("console"));
    }

    #[test]
    fn lookup_is_by_identity_not_label() {
        let a: Tag<Logger> = Tag::new("Logger");
        let b: Tag<Logger> = Tag::new("Logger");
        assert_ne!(a, b);

        let ctx = Context::empty().add(a, Logger { name: "a" });
        assert!(ctx.get(&a).is_some());
        assert!(ctx.get(&b).is_none());
    }

    #[test]
    fn colliding_labels_are_distinct_entries() {
        let a: Tag<Logger> = Tag::new("Logger");
        let b: Tag<Logger> = Tag::new("Logger");
        let ctx = Context::empty()
            .add(a, Logger { name: "first" })
            .add(b, Logger { name: "second" });
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.get(&a).map(|l| l.name), Some("first"));
        assert_eq!(ctx.get(&b).map(|l| l.name), Some("second"));
    }

    #[test]
    fn copied_tag_preserves_identity() {
        let tag: Tag<Logger> = Tag::new("Logger");
        let copy = tag;
        let ctx = Context::empty().add(tag, Logger { name: "shared" });
        assert_eq!(ctx.get(&copy).map(|l| l.name), Some("shared"));
    }

    #[test]
    fn merge_rightmost_wins() {
        let tag: Tag<Logger> = Tag::new("Logger");
        let left = Context::empty().add(tag, Logger { name: "left" });
        let right = Context::empty().add(tag, Logger { name: "right" });
        let merged = left.merge(&right);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get(&tag).map(|l| l.name), Some("right"));
    }

    #[test]
    fn merge_keeps_disjoint_entries() {
        let a: Tag<Logger> = Tag::new("A");
        let b: Tag<Logger> = Tag::new("B");
        let merged = Context::empty()
            .add(a, Logger { name: "a" })
            .merge(&Context::empty().add(b, Logger { name: "b" }));
        assert_eq!(merged.len(), 2);
    }
}
