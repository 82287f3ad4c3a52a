#![forbid(unsafe_code)]

//! reel node graph: topology, flags and propagation.
//!
//! This crate is **contract-only**: no GPU handles, no plugin code. It owns the arena of
//! nodes (Sources → Effects/Transforms → Targets), the edges between them, and the two
//! propagation channels every render decision depends on:
//!
//! - `dirty` (plus the narrower `transform_dirty` for transform chains) flows downstream
//!   along `targets` before the propagating call returns.
//! - `ready` flows downstream independently, recomputed per node from its inputs.
//!
//! Events raised during propagation are queued, never dispatched inline; the runtime drains
//! them at a defined point so listener code cannot re-enter a propagation pass. Only nodes
//! marked with [`Graph::set_listened`] queue events.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

use std::collections::{BTreeMap, BTreeSet};

use reel_core::{EngineError, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The four node variants of the compositing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Source,
    Effect,
    Transform,
    Target,
}

impl NodeKind {
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Source => "source",
            NodeKind::Effect => "effect",
            NodeKind::Transform => "transform",
            NodeKind::Target => "target",
        }
    }
}

/// One image input of an effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub name: String,
    pub node: Option<NodeId>,
    /// Whether the effect currently needs this input (its `requires` predicate).
    pub relevant: bool,
}

/// Upstream edge storage, by node kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upstream {
    /// Sources pull from outside the graph.
    None,
    /// Effects: one slot per declared image input, in declaration order.
    Slots(Vec<Slot>),
    /// Transforms and targets: a single upstream node.
    Single(Option<NodeId>),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub hook: String,
    pub width: u32,
    pub height: u32,
    ready: bool,
    dirty: bool,
    transform_dirty: bool,
    render_dirty: bool,
    auto: bool,
    targets: Vec<NodeId>,
    upstream: Upstream,
}

impl Node {
    pub fn ready(&self) -> bool {
        self.ready
    }
    pub fn dirty(&self) -> bool {
        self.dirty
    }
    pub fn transform_dirty(&self) -> bool {
        self.transform_dirty
    }
    pub fn render_dirty(&self) -> bool {
        self.render_dirty
    }
    pub fn auto(&self) -> bool {
        self.auto
    }
    pub fn targets(&self) -> &[NodeId] {
        &self.targets
    }
    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    /// Every bound upstream node, relevant or not, without duplicates.
    pub fn sources(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        match &self.upstream {
            Upstream::None => {}
            Upstream::Single(s) => out.extend(s.iter().copied()),
            Upstream::Slots(slots) => {
                for s in slots {
                    if let Some(n) = s.node {
                        if !out.contains(&n) {
                            out.push(n);
                        }
                    }
                }
            }
        }
        out
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        match &self.upstream {
            Upstream::Slots(slots) => slots.iter().find(|s| s.name == name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEvent {
    pub node: NodeId,
    pub kind: EventKind,
}

/// A downstream reference cleared because its upstream node was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detached {
    pub target: NodeId,
    /// Effect slot name; `None` for single-source nodes.
    pub slot: Option<String>,
}

#[derive(Debug, Default)]
pub struct Graph {
    next_node: u32,
    nodes: BTreeMap<NodeId, Node>,
    events: Vec<NodeEvent>,
    /// Nodes with at least one listener; everything else raises no events.
    listened: BTreeSet<NodeId>,
    wake: bool,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// True for ids this graph issued whose node has since been removed.
    pub fn is_retired(&self, id: NodeId) -> bool {
        id.0 < self.next_node && !self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids_of(&self, kind: NodeKind) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.kind == kind)
            .map(|n| n.id)
            .collect()
    }

    pub fn add_node(&mut self, kind: NodeKind, hook: impl Into<String>) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;

        let upstream = match kind {
            NodeKind::Source => Upstream::None,
            NodeKind::Effect => Upstream::Slots(Vec::new()),
            NodeKind::Transform | NodeKind::Target => Upstream::Single(None),
        };
        self.nodes.insert(
            id,
            Node {
                id,
                kind,
                hook: hook.into(),
                width: 1,
                height: 1,
                ready: false,
                dirty: true,
                transform_dirty: kind == NodeKind::Transform,
                render_dirty: kind == NodeKind::Transform,
                auto: false,
                targets: Vec::new(),
                upstream,
            },
        );
        id
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, EngineError> {
        if self.is_retired(id) {
            return Err(EngineError::Destroyed(id.0));
        }
        self.nodes
            .get_mut(&id)
            .ok_or(EngineError::ForeignNode(id.0))
    }

    fn get(&self, id: NodeId) -> Result<&Node, EngineError> {
        if self.is_retired(id) {
            return Err(EngineError::Destroyed(id.0));
        }
        self.nodes.get(&id).ok_or(EngineError::ForeignNode(id.0))
    }

    // ---------------------------------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------------------------------

    pub fn emit(&mut self, node: NodeId, kind: EventKind) {
        if self.listened.contains(&node) {
            self.events.push(NodeEvent { node, kind });
        }
    }

    /// Turns event queueing for `node` on or off. Turning it off drops its pending events.
    pub fn set_listened(&mut self, node: NodeId, listened: bool) {
        if listened {
            if self.nodes.contains_key(&node) {
                self.listened.insert(node);
            }
        } else if self.listened.remove(&node) {
            self.events.retain(|e| e.node != node);
        }
    }

    pub fn is_listened(&self, node: NodeId) -> bool {
        self.listened.contains(&node)
    }

    pub fn drain_events(&mut self) -> Vec<NodeEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn pending_events(&self) -> &[NodeEvent] {
        &self.events
    }

    /// Returns (and clears) whether an auto target became dirty since the last call.
    pub fn take_wake(&mut self) -> bool {
        std::mem::take(&mut self.wake)
    }

    // ---------------------------------------------------------------------------------------------
    // Flags
    // ---------------------------------------------------------------------------------------------

    pub fn set_auto(&mut self, id: NodeId, auto: bool) -> Result<(), EngineError> {
        let n = self.get_mut(id)?;
        n.auto = auto;
        if auto && n.dirty {
            self.wake = true;
        }
        Ok(())
    }

    /// Marks `id` dirty and every node reachable through `targets`.
    ///
    /// Already-dirty nodes stop the walk; diamond joins are therefore visited once.
    pub fn set_dirty(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(n) = self.nodes.get_mut(&cur) else {
                continue;
            };
            if n.kind == NodeKind::Transform {
                n.render_dirty = true;
            }
            if n.dirty {
                continue;
            }
            if self.listened.contains(&cur) {
                self.events.push(NodeEvent {
                    node: cur,
                    kind: EventKind::Dirty,
                });
            }
            n.dirty = true;
            if n.kind == NodeKind::Target && n.auto {
                self.wake = true;
            }
            stack.extend(n.targets.iter().rev().copied());
        }
    }

    /// Clears the flag and propagates again. Used by the render daemon for stale sources.
    pub fn refresh_dirty(&mut self, id: NodeId) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.dirty = false;
        }
        self.set_dirty(id);
    }

    pub fn clear_dirty(&mut self, id: NodeId) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.dirty = false;
        }
    }

    /// Marks a transform's matrix stale. Transform targets recompose too; any other
    /// target just becomes dirty.
    pub fn set_transform_dirty(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(n) = self.nodes.get_mut(&cur) else {
                continue;
            };
            if n.kind != NodeKind::Transform {
                self.set_dirty(cur);
                continue;
            }
            let was_dirty = n.dirty && n.transform_dirty;
            n.transform_dirty = true;
            n.render_dirty = true;
            if !n.dirty {
                n.dirty = true;
                if self.listened.contains(&cur) {
                    self.events.push(NodeEvent {
                        node: cur,
                        kind: EventKind::Dirty,
                    });
                }
            }
            if !was_dirty {
                stack.extend(n.targets.iter().rev().copied());
            }
        }
    }

    pub fn clear_transform_dirty(&mut self, id: NodeId) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.transform_dirty = false;
        }
    }

    pub fn clear_render_dirty(&mut self, id: NodeId) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.render_dirty = false;
        }
    }

    /// Records a new size. Emits `resize` and marks dirty only on change.
    pub fn set_size(&mut self, id: NodeId, width: u32, height: u32) -> bool {
        let Some(n) = self.nodes.get_mut(&id) else {
            return false;
        };
        if n.width == width && n.height == height {
            return false;
        }
        n.width = width;
        n.height = height;
        self.emit(id, EventKind::Resize);
        self.set_dirty(id);
        true
    }

    // ---------------------------------------------------------------------------------------------
    // Readiness
    // ---------------------------------------------------------------------------------------------

    /// Explicitly flips a source (or any node) ready and propagates downstream.
    pub fn set_ready(&mut self, id: NodeId) {
        self.force_ready(id, true);
    }

    pub fn set_unready(&mut self, id: NodeId) {
        self.force_ready(id, false);
    }

    fn force_ready(&mut self, id: NodeId, ready: bool) {
        let Some(n) = self.nodes.get_mut(&id) else {
            return;
        };
        if n.ready == ready {
            return;
        }
        n.ready = ready;
        let targets = n.targets.clone();
        self.emit(id, if ready { EventKind::Ready } else { EventKind::Unready });
        for t in targets {
            self.update_ready(t);
        }
    }

    fn compute_ready(&self, n: &Node) -> bool {
        let up_ready = |id: Option<NodeId>| {
            id.and_then(|id| self.nodes.get(&id))
                .map(|u| u.ready)
                .unwrap_or(false)
        };
        match &n.upstream {
            Upstream::None => n.ready,
            Upstream::Single(s) => up_ready(*s),
            Upstream::Slots(slots) => slots
                .iter()
                .filter(|s| s.relevant)
                .all(|s| up_ready(s.node)),
        }
    }

    /// Recomputes readiness of `id` from its upstream; on change, propagates downstream.
    pub fn update_ready(&mut self, id: NodeId) {
        let mut work = vec![id];
        while let Some(cur) = work.pop() {
            let Some(n) = self.nodes.get(&cur) else {
                continue;
            };
            let want = self.compute_ready(n);
            if want == n.ready {
                continue;
            }
            let targets = n.targets.clone();
            if let Some(n) = self.nodes.get_mut(&cur) {
                n.ready = want;
            }
            self.emit(cur, if want { EventKind::Ready } else { EventKind::Unready });
            work.extend(targets.into_iter().rev());
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Edges
    // ---------------------------------------------------------------------------------------------

    /// Depth-first search from `from` through upstream edges. True if `needle` is reachable
    /// (including `from == needle`).
    pub fn trace_sources(&self, from: NodeId, needle: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = Vec::new();
        while let Some(cur) = stack.pop() {
            if cur == needle {
                return true;
            }
            if seen.contains(&cur) {
                continue;
            }
            seen.push(cur);
            if let Some(n) = self.nodes.get(&cur) {
                stack.extend(n.sources());
            }
        }
        false
    }

    fn check_edge(&self, upstream: NodeId, downstream: NodeId) -> Result<(), EngineError> {
        let up = self.get(upstream)?;
        if up.kind == NodeKind::Target {
            return Err(EngineError::other(format!(
                "target {upstream} cannot be used as an input"
            )));
        }
        if self.trace_sources(upstream, downstream) {
            return Err(EngineError::CyclicalConnection {
                from: upstream.0,
                to: downstream.0,
            });
        }
        Ok(())
    }

    fn link(&mut self, upstream: NodeId, downstream: NodeId) {
        if let Some(u) = self.nodes.get_mut(&upstream) {
            if !u.targets.contains(&downstream) {
                u.targets.push(downstream);
            }
        }
    }

    /// Drops `downstream` from `upstream.targets` unless another edge still joins them.
    fn unlink_if_unused(&mut self, upstream: NodeId, downstream: NodeId) {
        let still_used = self
            .nodes
            .get(&downstream)
            .map(|d| d.sources().contains(&upstream))
            .unwrap_or(false);
        if still_used {
            return;
        }
        if let Some(u) = self.nodes.get_mut(&upstream) {
            u.targets.retain(|t| *t != downstream);
        }
    }

    /// Declares an image input on an effect. Declaring twice is a no-op.
    pub fn add_slot(&mut self, effect: NodeId, name: &str) -> Result<(), EngineError> {
        let n = self.get_mut(effect)?;
        match &mut n.upstream {
            Upstream::Slots(slots) => {
                if !slots.iter().any(|s| s.name == name) {
                    slots.push(Slot {
                        name: name.to_string(),
                        node: None,
                        relevant: true,
                    });
                }
                Ok(())
            }
            _ => Err(EngineError::other(format!("{effect} has no image inputs"))),
        }
    }

    pub fn set_slot_relevant(&mut self, effect: NodeId, name: &str, relevant: bool) {
        if let Some(Node {
            upstream: Upstream::Slots(slots),
            ..
        }) = self.nodes.get_mut(&effect)
        {
            if let Some(s) = slots.iter_mut().find(|s| s.name == name) {
                s.relevant = relevant;
            }
        }
    }

    /// Binds `upstream` to an effect slot. The cycle check runs before anything changes.
    /// Returns the previously bound node.
    pub fn connect_slot(
        &mut self,
        effect: NodeId,
        name: &str,
        upstream: Option<NodeId>,
    ) -> Result<Option<NodeId>, EngineError> {
        if let Some(up) = upstream {
            self.check_edge(up, effect)?;
        }
        let node = self.get_mut(effect)?;
        let Upstream::Slots(slots) = &mut node.upstream else {
            return Err(EngineError::other(format!("{effect} has no image inputs")));
        };
        let slot = slots
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| EngineError::UnknownInput(name.to_string()))?;

        let previous = slot.node;
        if previous == upstream {
            return Ok(previous);
        }
        slot.node = upstream;

        if let Some(prev) = previous {
            self.unlink_if_unused(prev, effect);
        }
        if let Some(up) = upstream {
            self.link(up, effect);
        }
        Ok(previous)
    }

    /// Binds the single upstream of a transform or target. Returns the previous one.
    pub fn connect_single(
        &mut self,
        node: NodeId,
        upstream: Option<NodeId>,
    ) -> Result<Option<NodeId>, EngineError> {
        if let Some(up) = upstream {
            self.check_edge(up, node)?;
        }
        let n = self.get_mut(node)?;
        let Upstream::Single(slot) = &mut n.upstream else {
            return Err(EngineError::other(format!("{node} does not take a single source")));
        };
        let previous = *slot;
        if previous == upstream {
            return Ok(previous);
        }
        *slot = upstream;

        if let Some(prev) = previous {
            self.unlink_if_unused(prev, node);
        }
        if let Some(up) = upstream {
            self.link(up, node);
        }
        Ok(previous)
    }

    /// Removes a node, detaching it from upstream and downstream neighbours.
    ///
    /// Downstream references to it are cleared (and reported) and their readiness
    /// recomputed. Removing an already-removed node is a no-op.
    pub fn remove_node(&mut self, id: NodeId) -> Vec<Detached> {
        let Some(node) = self.nodes.remove(&id) else {
            return Vec::new();
        };
        self.listened.remove(&id);

        for up in node.sources() {
            if let Some(u) = self.nodes.get_mut(&up) {
                u.targets.retain(|t| *t != id);
            }
        }

        let mut detached = Vec::new();
        for t in &node.targets {
            let Some(tn) = self.nodes.get_mut(t) else {
                continue;
            };
            match &mut tn.upstream {
                Upstream::Slots(slots) => {
                    for s in slots.iter_mut().filter(|s| s.node == Some(id)) {
                        s.node = None;
                        detached.push(Detached {
                            target: *t,
                            slot: Some(s.name.clone()),
                        });
                    }
                }
                Upstream::Single(s) if *s == Some(id) => {
                    *s = None;
                    detached.push(Detached {
                        target: *t,
                        slot: None,
                    });
                }
                _ => {}
            }
        }
        for t in &node.targets {
            self.update_ready(*t);
            self.set_dirty(*t);
        }

        // Queued events for a node that no longer exists are dropped.
        self.events.retain(|e| e.node != id);
        tracing::debug!(node = %id, kind = node.kind.name(), "node removed from graph");
        detached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chain(g: &mut Graph) -> (NodeId, NodeId, NodeId) {
        let src = g.add_node(NodeKind::Source, "image");
        let fx = g.add_node(NodeKind::Effect, "invert");
        let out = g.add_node(NodeKind::Target, "surface");
        g.add_slot(fx, "source").unwrap();
        g.connect_slot(fx, "source", Some(src)).unwrap();
        g.connect_single(out, Some(fx)).unwrap();
        (src, fx, out)
    }

    #[test]
    fn dirty_reaches_every_target() {
        let mut g = Graph::new();
        let (src, fx, out) = chain(&mut g);
        for id in [src, fx, out] {
            g.clear_dirty(id);
            g.set_listened(id, true);
        }
        g.set_dirty(src);
        assert!(g.node(fx).unwrap().dirty());
        assert!(g.node(out).unwrap().dirty());
        let dirty_events = g
            .drain_events()
            .into_iter()
            .filter(|e| e.kind == EventKind::Dirty)
            .count();
        assert_eq!(dirty_events, 3);
    }

    #[test]
    fn unlistened_nodes_queue_nothing() {
        let mut g = Graph::new();
        let (src, fx, out) = chain(&mut g);
        g.set_listened(out, true);
        for _ in 0..100 {
            for id in [src, fx, out] {
                g.clear_dirty(id);
            }
            g.set_dirty(src);
            g.emit(fx, EventKind::Render);
        }
        assert_eq!(g.pending_events().len(), 100);
        assert!(g.pending_events().iter().all(|e| e.node == out));

        g.set_listened(out, false);
        assert!(g.pending_events().is_empty());
        g.set_dirty(src);
        assert!(g.pending_events().is_empty());
    }

    #[test]
    fn ready_follows_source_without_touching_dirty() {
        let mut g = Graph::new();
        let (src, fx, out) = chain(&mut g);
        for id in [src, fx, out] {
            g.clear_dirty(id);
        }
        g.set_ready(src);
        assert!(g.node(fx).unwrap().ready());
        assert!(g.node(out).unwrap().ready());
        g.set_unready(src);
        assert!(!g.node(out).unwrap().ready());
        assert!(!g.node(fx).unwrap().dirty());
    }

    #[test]
    fn irrelevant_slot_does_not_block_readiness() {
        let mut g = Graph::new();
        let a = g.add_node(NodeKind::Source, "image");
        let fx = g.add_node(NodeKind::Effect, "crossfade");
        g.add_slot(fx, "a").unwrap();
        g.add_slot(fx, "b").unwrap();
        g.connect_slot(fx, "a", Some(a)).unwrap();
        g.set_ready(a);
        assert!(!g.node(fx).unwrap().ready());
        g.set_slot_relevant(fx, "b", false);
        g.update_ready(fx);
        assert!(g.node(fx).unwrap().ready());
    }

    #[test]
    fn cycle_is_rejected_without_mutation() {
        let mut g = Graph::new();
        let a = g.add_node(NodeKind::Effect, "a");
        let b = g.add_node(NodeKind::Effect, "b");
        g.add_slot(a, "source").unwrap();
        g.add_slot(b, "source").unwrap();
        g.connect_slot(b, "source", Some(a)).unwrap();

        let before_a = g.node(a).unwrap().clone();
        let before_b = g.node(b).unwrap().clone();
        let err = g.connect_slot(a, "source", Some(b)).unwrap_err();
        assert!(matches!(err, EngineError::CyclicalConnection { .. }));
        assert_eq!(g.node(a).unwrap().upstream(), before_a.upstream());
        assert_eq!(g.node(a).unwrap().targets(), before_a.targets());
        assert_eq!(g.node(b).unwrap().targets(), before_b.targets());

        // self-loop
        assert!(g.connect_slot(a, "source", Some(a)).is_err());
    }

    #[test]
    fn shared_upstream_stays_linked_while_any_slot_uses_it() {
        let mut g = Graph::new();
        let s = g.add_node(NodeKind::Source, "image");
        let fx = g.add_node(NodeKind::Effect, "crossfade");
        g.add_slot(fx, "a").unwrap();
        g.add_slot(fx, "b").unwrap();
        g.connect_slot(fx, "a", Some(s)).unwrap();
        g.connect_slot(fx, "b", Some(s)).unwrap();
        assert_eq!(g.node(s).unwrap().targets(), &[fx]);

        g.connect_slot(fx, "a", None).unwrap();
        assert_eq!(g.node(s).unwrap().targets(), &[fx]);
        g.connect_slot(fx, "b", None).unwrap();
        assert!(g.node(s).unwrap().targets().is_empty());
    }

    #[test]
    fn remove_detaches_both_directions() {
        let mut g = Graph::new();
        let (src, fx, out) = chain(&mut g);
        g.set_ready(src);
        let detached = g.remove_node(fx);
        assert_eq!(
            detached,
            vec![Detached {
                target: out,
                slot: None
            }]
        );
        assert!(g.node(src).unwrap().targets().is_empty());
        assert!(!g.node(out).unwrap().ready());
        assert!(g.is_retired(fx));
        assert!(g.remove_node(fx).is_empty());
        assert!(matches!(
            g.connect_single(out, Some(fx)),
            Err(EngineError::Destroyed(_))
        ));
    }

    #[test]
    fn transform_dirty_recomposes_transform_chain_only() {
        let mut g = Graph::new();
        let src = g.add_node(NodeKind::Source, "image");
        let t1 = g.add_node(NodeKind::Transform, "2d");
        let t2 = g.add_node(NodeKind::Transform, "flip");
        let out = g.add_node(NodeKind::Target, "surface");
        g.connect_single(t1, Some(src)).unwrap();
        g.connect_single(t2, Some(t1)).unwrap();
        g.connect_single(out, Some(t2)).unwrap();
        for id in [src, t1, t2, out] {
            g.clear_dirty(id);
            g.clear_transform_dirty(id);
        }
        g.set_transform_dirty(t1);
        assert!(g.node(t2).unwrap().transform_dirty());
        assert!(g.node(out).unwrap().dirty());
        assert!(!g.node(src).unwrap().dirty());
    }

    #[test]
    fn auto_target_wakes_scheduler() {
        let mut g = Graph::new();
        let (src, fx, out) = chain(&mut g);
        g.set_auto(out, true).unwrap();
        assert!(g.take_wake());
        for id in [src, fx, out] {
            g.clear_dirty(id);
        }
        g.set_dirty(src);
        assert!(g.take_wake());
        assert!(!g.take_wake());
    }

    // Random DAG: node i may only take inputs from nodes < i.
    fn dag() -> impl Strategy<Value = (usize, Vec<(usize, usize)>, usize)> {
        (3usize..12).prop_flat_map(|n| {
            let edges = proptest::collection::vec((0..n, 0..n), 0..(n * 2));
            (Just(n), edges, 0..n)
        })
    }

    proptest! {
        #[test]
        fn dirty_marks_exactly_the_reachable_set((n, edges, start) in dag()) {
            let mut g = Graph::new();
            let mut ids = Vec::new();
            for _ in 0..n {
                let id = g.add_node(NodeKind::Effect, "fx");
                for j in 0..n {
                    g.add_slot(id, &format!("in{j}")).unwrap();
                }
                ids.push(id);
            }
            for (a, b) in edges {
                let (up, down) = if a < b { (a, b) } else if b < a { (b, a) } else { continue };
                g.connect_slot(ids[down], &format!("in{up}"), Some(ids[up])).unwrap();
            }
            for id in &ids {
                g.clear_dirty(*id);
            }

            g.set_dirty(ids[start]);

            for (i, id) in ids.iter().enumerate() {
                let reachable = g.trace_sources(*id, ids[start]);
                prop_assert_eq!(g.node(*id).unwrap().dirty(), reachable, "node {}", i);
            }
        }
    }
}
