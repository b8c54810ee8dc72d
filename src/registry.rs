//! Component registry: the per-session component tree and callback table.
//!
//! All entries live in per-context hash tables keyed by monotonically
//! assigned ids. Parent/child relationships are stored on the entries so
//! that teardown is O(subtree size) and lookup is O(1). The registry is a
//! plain data structure — [`LiveContext`](crate::context::LiveContext) owns
//! one behind its state lock and performs all foreign calls (render
//! functions, source close, callbacks) outside of it.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Scope;
use crate::patch::{Patch, PatchMode};
use crate::reactive::Source;

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

/// Identifies a component within one live context.
///
/// Ids are strictly increasing and never reused while the context is alive;
/// on the wire they serialize as plain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(u64);

impl ComponentId {
    /// Build an id from its wire representation.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The wire representation.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a server-side callback within one live context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(u64);

impl CallbackId {
    /// Build an id from its wire representation.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The wire representation.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Function contracts
// ---------------------------------------------------------------------------

/// Errors produced by application-supplied functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Renders a component's markup from an emitted value.
///
/// The scope's current parent is the component being rendered, so nested
/// registrations made during the call attach as its children.
pub type RenderFn = Arc<dyn Fn(&mut Scope, &Value) -> Result<String, BoxError> + Send + Sync>;

/// Optional hook run after a successful update render; may contribute one
/// secondary patch to the same batch.
pub type DidUpdateFn = Arc<dyn Fn(&Value) -> Option<Patch> + Send + Sync>;

/// A server-side handler reachable from the client.
pub type CallbackFn = Arc<dyn Fn(&[Value]) -> Result<(), BoxError> + Send + Sync>;

/// How a component turns an emitted value into a patch payload.
#[derive(Clone)]
pub(crate) enum Renderer {
    /// Run the render function and ship its markup.
    Markup(RenderFn),
    /// Ship the emitted value as-is for a client-side binding.
    Structured,
}

// ---------------------------------------------------------------------------
// Component builder
// ---------------------------------------------------------------------------

/// Describes one reactive UI fragment before registration.
///
/// Built in the builder style and handed to
/// [`Scope::component`](crate::context::Scope::component):
///
/// ```ignore
/// let feed = ValueFeed::new();
/// let id = scope.component(
///     Component::markup(|_, v| Ok(format!("<span>{v}</span>")))
///         .with_source(feed.clone())
///         .with_mode(PatchMode::Append),
/// );
/// ```
pub struct Component {
    renderer: Renderer,
    source: Option<Arc<dyn Source>>,
    mode: PatchMode,
    did_update: Option<DidUpdateFn>,
}

impl Component {
    /// A markup component: updates run `render` and ship its output.
    pub fn markup<F>(render: F) -> Self
    where
        F: Fn(&mut Scope, &Value) -> Result<String, BoxError> + Send + Sync + 'static,
    {
        Self {
            renderer: Renderer::Markup(Arc::new(render)),
            source: None,
            mode: PatchMode::Replace,
            did_update: None,
        }
    }

    /// A structured component: updates ship the emitted value directly to a
    /// client-side reactive binding. No render function is involved.
    pub fn structured() -> Self {
        Self {
            renderer: Renderer::Structured,
            source: None,
            mode: PatchMode::Replace,
            did_update: None,
        }
    }

    /// Set the owning reactive source (builder).
    pub fn with_source(mut self, source: impl Source + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Set the patch mode (builder). Defaults to [`PatchMode::Replace`].
    pub fn with_mode(mut self, mode: PatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the did-update hook (builder).
    pub fn with_did_update<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Value) -> Option<Patch> + Send + Sync + 'static,
    {
        self.did_update = Some(Arc::new(hook));
        self
    }

    /// Split into a table entry plus the source handle to subscribe.
    pub(crate) fn into_entry(self, parent: Option<ComponentId>) -> (ComponentEntry, Option<Arc<dyn Source>>) {
        let source = self.source.clone();
        let entry = ComponentEntry {
            renderer: self.renderer,
            source: self.source,
            parent,
            children: Vec::new(),
            callbacks: Vec::new(),
            mode: self.mode,
            did_update: self.did_update,
        };
        (entry, source)
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One registered reactive UI fragment.
pub(crate) struct ComponentEntry {
    pub(crate) renderer: Renderer,
    pub(crate) source: Option<Arc<dyn Source>>,
    pub(crate) parent: Option<ComponentId>,
    pub(crate) children: Vec<ComponentId>,
    pub(crate) callbacks: Vec<CallbackId>,
    pub(crate) mode: PatchMode,
    pub(crate) did_update: Option<DidUpdateFn>,
}

/// Sources and counts collected while removing entries.
///
/// Table mutation happens under the context's state lock; the collected
/// sources are released afterwards via [`Teardown::release_sources`], which
/// calls into foreign code.
#[derive(Default)]
pub(crate) struct Teardown {
    sources: Vec<Arc<dyn Source>>,
    components: usize,
    callbacks: usize,
}

impl Teardown {
    /// Unsubscribe and close every collected source. Must be called outside
    /// the registry's lock.
    pub(crate) fn release_sources(self) {
        for source in &self.sources {
            source.unsubscribe();
            source.close();
        }
    }

    pub(crate) fn component_count(&self) -> usize {
        self.components
    }

    pub(crate) fn callback_count(&self) -> usize {
        self.callbacks
    }

    pub(crate) fn source_count(&self) -> usize {
        self.sources.len()
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// The live component tree and callback table for one context.
pub(crate) struct ComponentRegistry {
    components: HashMap<ComponentId, ComponentEntry>,
    callbacks: HashMap<CallbackId, CallbackFn>,
    next_component_id: u64,
    next_callback_id: u64,
}

impl ComponentRegistry {
    pub(crate) fn new() -> Self {
        Self {
            components: HashMap::new(),
            callbacks: HashMap::new(),
            next_component_id: 1,
            next_callback_id: 1,
        }
    }

    /// Insert a component under `parent`, returning its fresh id.
    pub(crate) fn insert_component(
        &mut self,
        parent: Option<ComponentId>,
        component: Component,
    ) -> (ComponentId, Option<Arc<dyn Source>>) {
        let id = ComponentId(self.next_component_id);
        self.next_component_id += 1;

        let (entry, source) = component.into_entry(parent);
        self.components.insert(id, entry);
        if let Some(parent) = parent {
            if let Some(parent_entry) = self.components.get_mut(&parent) {
                parent_entry.children.push(id);
            }
        }
        (id, source)
    }

    /// Insert a callback owned by `owner` (or by the page itself when
    /// registered outside any component), returning its fresh id.
    pub(crate) fn insert_callback(&mut self, owner: Option<ComponentId>, callback: CallbackFn) -> CallbackId {
        let id = CallbackId(self.next_callback_id);
        self.next_callback_id += 1;

        self.callbacks.insert(id, callback);
        if let Some(owner) = owner {
            if let Some(entry) = self.components.get_mut(&owner) {
                entry.callbacks.push(id);
            }
        }
        id
    }

    pub(crate) fn entry(&self, id: ComponentId) -> Option<&ComponentEntry> {
        self.components.get(&id)
    }

    pub(crate) fn contains(&self, id: ComponentId) -> bool {
        self.components.contains_key(&id)
    }

    pub(crate) fn callback(&self, id: CallbackId) -> Option<CallbackFn> {
        self.callbacks.get(&id).cloned()
    }

    /// Where a deletion patch for `id` should point.
    ///
    /// A parent-attribute component never becomes a deletion target itself:
    /// the deletion is redirected to its parent. `None` means no standalone
    /// deletion patch is emitted (a parent-attribute component registered at
    /// the page root has no node of its own to delete).
    pub(crate) fn deletion_target(&self, id: ComponentId) -> Option<ComponentId> {
        let entry = self.components.get(&id)?;
        if entry.mode == PatchMode::ParentAttribute {
            entry.parent
        } else {
            Some(id)
        }
    }

    /// Remove `id` and every descendant, detaching it from its parent's
    /// child set. Returns `None` when the entry is already gone.
    pub(crate) fn remove_subtree(&mut self, id: ComponentId) -> Option<Teardown> {
        if !self.components.contains_key(&id) {
            return None;
        }
        if let Some(parent) = self.components.get(&id).and_then(|e| e.parent) {
            if let Some(parent_entry) = self.components.get_mut(&parent) {
                parent_entry.children.retain(|&child| child != id);
            }
        }
        Some(self.remove_tree_nodes(vec![id]))
    }

    /// Tear down everything *below* `id`: every child subtree and every
    /// owned callback. The entry itself survives with empty child and
    /// callback sets. Used by `replace` handling before a re-render.
    pub(crate) fn clear_children(&mut self, id: ComponentId) -> Teardown {
        let Some(entry) = self.components.get_mut(&id) else {
            return Teardown::default();
        };
        let children = std::mem::take(&mut entry.children);
        let callbacks = std::mem::take(&mut entry.callbacks);

        let mut teardown = self.remove_tree_nodes(children);
        for callback in callbacks {
            if self.callbacks.remove(&callback).is_some() {
                teardown.callbacks += 1;
            }
        }
        teardown
    }

    /// Remove every component and callback. Used by full context teardown.
    pub(crate) fn drain_all(&mut self) -> Teardown {
        let mut teardown = Teardown::default();
        for (_, entry) in self.components.drain() {
            teardown.components += 1;
            if let Some(source) = entry.source {
                teardown.sources.push(source);
            }
        }
        teardown.callbacks = self.callbacks.len();
        self.callbacks.clear();
        teardown
    }

    pub(crate) fn component_count(&self) -> usize {
        self.components.len()
    }

    pub(crate) fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether any registered component owns a reactive source.
    pub(crate) fn has_sourced_components(&self) -> bool {
        self.components.values().any(|entry| entry.source.is_some())
    }

    /// Breadth-first removal of the given roots and all their descendants,
    /// collecting sources and counting removed callbacks.
    fn remove_tree_nodes(&mut self, roots: Vec<ComponentId>) -> Teardown {
        let mut teardown = Teardown::default();
        let mut queue: VecDeque<ComponentId> = roots.into();
        while let Some(current) = queue.pop_front() {
            let Some(entry) = self.components.remove(&current) else {
                continue;
            };
            teardown.components += 1;
            if let Some(source) = entry.source {
                teardown.sources.push(source);
            }
            for callback in entry.callbacks {
                if self.callbacks.remove(&callback).is_some() {
                    teardown.callbacks += 1;
                }
            }
            queue.extend(entry.children);
        }
        teardown
    }
}

// ===========================================================================
// Tests
// ===========================================================================
