//! Declarative recipes for building service contexts.
//!
//! A [`Layer`] describes how to produce [`Context`] entries, possibly
//! effectfully and possibly depending on entries produced by other layers.
//! Layers are pure descriptions until resolved: [`Layer::build`] returns an
//! effect that performs the construction, wires dependencies, and memoizes
//! shared layers so a recipe required by two dependents is constructed once.
//!
//! # Wiring dependencies
//!
//! `B.provide(A)` resolves `A` first, builds `B` against the union of the
//! ambient context and `A`'s output, and discards `A`'s entries from the
//! result; use `provide_merge` to keep them. `merge` / `merge_all` combine
//! independent layers; on a tag collision the rightmost layer wins, the same
//! deterministic policy as [`Context::merge`].
//!
//! # Examples
//!
//! ```
//! use millrace::layer::required;
//! use millrace::{run_sync, Effect, Layer, Tag};
//!
//! struct Port(u16);
//! struct Url(String);
//!
//! let port: Tag<Port> = Tag::new("Port");
//! let url: Tag<Url> = Tag::new("Url");
//!
//! let port_layer = Layer::succeed(port, Port(8080));
//! let url_layer = Layer::effectful(url, move || {
//!     required(port).map(|p| Url(format!("http://localhost:{}", p.0)))
//! });
//!
//! let wired = Layer::merge_all([port_layer.clone(), url_layer.provide(port_layer)]);
//! let effect = Effect::<_, millrace::LayerError>::service(url)
//!     .map(|u| u.0.clone())
//!     .provide_layer(wired);
//! assert_eq!(run_sync(effect).ok(), Some("http://localhost:8080".to_string()));
//! ```

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::context::{Context, Tag};
use crate::effect::Effect;

/// Failure while resolving a layer set into a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerError {
    /// An effectful recipe required a tag no resolved layer provides.
    MissingDependency {
        /// Display rendering of the missing tag.
        tag: String,
    },
    /// A recipe's own construction failed.
    Build(String),
}

impl LayerError {
    /// A construction failure with the given message.
    pub fn build(message: impl Into<String>) -> Self {
        LayerError::Build(message.into())
    }
}

impl fmt::Display for LayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerError::MissingDependency { tag } => {
                write!(f, "missing dependency: no layer provides {tag}")
            }
            LayerError::Build(message) => write!(f, "layer build failed: {message}"),
        }
    }
}

impl StdError for LayerError {}

/// Read a required dependency inside an effectful layer recipe.
///
/// Unlike [`Effect::service`], a missing tag here is an expected
/// [`LayerError::MissingDependency`] rather than a defect: an unresolved
/// dependency is a wiring mistake the resolver reports, not a bug in the
/// running program.
pub fn required<S: Send + Sync + 'static>(tag: Tag<S>) -> Effect<Arc<S>, LayerError> {
    Effect::service_opt(tag).and_then(move |service| match service {
        Some(service) => Effect::succeed(service),
        None => Effect::fail(LayerError::MissingDependency {
            tag: tag.to_string(),
        }),
    })
}

enum LayerNode {
    /// Entries known up front.
    Ready(Context),
    /// Entries produced by an effect that may read other tags.
    Effectful(Box<dyn Fn() -> Effect<Context, LayerError> + Send + Sync>),
    /// Wire `outer`'s requirements to `dependency`'s output.
    Provide {
        outer: Layer,
        dependency: Layer,
        keep_dependency: bool,
    },
    /// Independent layers, rightmost wins on collision.
    Merge(Vec<Layer>),
}

/// A declarative, possibly-effectful recipe for producing context entries.
///
/// Cheap to clone; clones share identity, which is what resolution memoizes
/// on. Two layers built from separate constructor calls are distinct even if
/// they produce the same entries.
#[derive(Clone)]
pub struct Layer {
    node: Arc<LayerNode>,
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &*self.node {
            LayerNode::Ready(_) => "Ready",
            LayerNode::Effectful(_) => "Effectful",
            LayerNode::Provide { .. } => "Provide",
            LayerNode::Merge(_) => "Merge",
        };
        f.debug_struct("Layer").field("kind", &kind).finish()
    }
}

impl Layer {
    fn from_node(node: LayerNode) -> Self {
        Layer {
            node: Arc::new(node),
        }
    }

    /// Identity key for memoization: clones share, fresh constructions don't.
    fn key(&self) -> usize {
        Arc::as_ptr(&self.node) as usize
    }

    /// A layer providing one already-constructed service.
    pub fn succeed<S: Send + Sync + 'static>(tag: Tag<S>, service: S) -> Layer {
        Layer::from_node(LayerNode::Ready(Context::empty().add(tag, service)))
    }

    /// A layer whose service is built by an effect.
    ///
    /// The build effect may read other tags with [`required`]; wire those
    /// with [`Layer::provide`]. The recipe is re-invocable but resolution
    /// memoizes, so within one `build` it runs at most once.
    pub fn effectful<S, F>(tag: Tag<S>, build: F) -> Layer
    where
        S: Send + Sync + 'static,
        F: Fn() -> Effect<S, LayerError> + Send + Sync + 'static,
    {
        Layer::from_node(LayerNode::Effectful(Box::new(move || {
            build().map(move |service| Context::empty().add(tag, service))
        })))
    }

    /// Wire this layer's requirements to `dependency`'s output.
    ///
    /// The dependency's entries are visible while this layer builds and are
    /// discarded from the result; see [`Layer::provide_merge`] to keep them.
    pub fn provide(self, dependency: Layer) -> Layer {
        Layer::from_node(LayerNode::Provide {
            outer: self,
            dependency,
            keep_dependency: false,
        })
    }

    /// Like [`Layer::provide`], but the dependency's entries stay in the
    /// output alongside this layer's.
    pub fn provide_merge(self, dependency: Layer) -> Layer {
        Layer::from_node(LayerNode::Provide {
            outer: self,
            dependency,
            keep_dependency: true,
        })
    }

    /// Combine with an independent layer; `other` wins tag collisions.
    pub fn merge(self, other: Layer) -> Layer {
        Layer::from_node(LayerNode::Merge(vec![self, other]))
    }

    /// Combine independent layers; the rightmost wins tag collisions.
    pub fn merge_all(layers: impl IntoIterator<Item = Layer>) -> Layer {
        Layer::from_node(LayerNode::Merge(layers.into_iter().collect()))
    }

    /// Resolve this layer into a context.
    ///
    /// Resolution order follows the recipe DAG; a layer value shared by two
    /// dependents is constructed once per `build` and its output reused.
    pub fn build(&self) -> Effect<Context, LayerError> {
        resolve(self.clone(), Memo::default())
    }
}

/// Per-resolution cache of already-built layers, keyed by layer identity.
///
/// Resolution walks the DAG sequentially within one build effect, so a plain
/// mutex suffices to serialize first-time construction.
#[derive(Clone, Default)]
struct Memo {
    built: Arc<Mutex<HashMap<usize, Context>>>,
}

impl Memo {
    fn get(&self, key: usize) -> Option<Context> {
        self.built
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    fn insert(&self, key: usize, context: Context) {
        self.built
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, context);
    }
}

fn resolve(layer: Layer, memo: Memo) -> Effect<Context, LayerError> {
    // Suspended so the memo lookup happens at run time, when shared layers
    // may already have been built by an earlier dependent.
    Effect::suspend(move || {
        let key = layer.key();
        if let Some(context) = memo.get(key) {
            return Effect::succeed(context);
        }
        let built: Effect<Context, LayerError> = match &*layer.node {
            LayerNode::Ready(context) => Effect::succeed(context.clone()),
            LayerNode::Effectful(build) => build(),
            LayerNode::Provide {
                outer,
                dependency,
                keep_dependency,
            } => {
                let outer = outer.clone();
                let keep_dependency = *keep_dependency;
                let outer_memo = memo.clone();
                resolve(dependency.clone(), memo.clone()).and_then(move |dep_context| {
                    let kept = dep_context.clone();
                    resolve(outer, outer_memo)
                        .provide_context(dep_context)
                        .map(move |out_context| {
                            if keep_dependency {
                                kept.merge(&out_context)
                            } else {
                                out_context
                            }
                        })
                })
            }
            LayerNode::Merge(layers) => {
                let mut acc = Effect::succeed(Context::empty());
                for layer in layers.clone() {
                    let memo = memo.clone();
                    acc = acc.and_then(move |context: Context| {
                        resolve(layer, memo).map(move |built| context.merge(&built))
                    });
                }
                acc
            }
        };
        let memo = memo.clone();
        built.map(move |context| {
            memo.insert(key, context.clone());
            context
        })
    })
}
