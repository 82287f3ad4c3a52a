//! Node event listeners.
//!
//! The graph queues events as flags change; nothing is delivered re-entrantly. Queued events
//! go out in [`Engine::flush_events`], which the daemon calls at the end of every frame.
//! Nodes nobody listens to queue nothing, so a host that never flushes does not accumulate
//! events.

use std::collections::BTreeMap;

use reel_core::{EngineError, EventKind};
use reel_graph::{NodeEvent, NodeId};

use super::Engine;
use crate::handle::NodeRef;

pub type Listener = Box<dyn FnMut(&mut Engine, NodeEvent)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Listeners fired by one flush may queue more events; those are delivered in the same
/// flush, up to this many rounds.
const MAX_ROUNDS: usize = 16;

type Entry = (ListenerId, EventKind, Listener);

#[derive(Default)]
pub(super) struct Listeners {
    next: u64,
    by_node: BTreeMap<NodeId, Vec<Entry>>,
    /// Ids removed while their list was out for dispatch.
    removed: Vec<ListenerId>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("nodes", &self.by_node.len())
            .finish()
    }
}

impl Listeners {
    pub fn remove_node(&mut self, node: NodeId) {
        self.by_node.remove(&node);
    }

    pub fn clear(&mut self) {
        self.by_node.clear();
        self.removed.clear();
    }
}

impl Engine {
    /// Subscribes `listener` to `kind` events of a node.
    pub fn on(
        &mut self,
        r: impl Into<NodeRef>,
        kind: EventKind,
        listener: Listener,
    ) -> Result<ListenerId, EngineError> {
        self.check_alive()?;
        let node = self.resolve(r)?;
        self.listeners.next += 1;
        let id = ListenerId(self.listeners.next);
        self.listeners
            .by_node
            .entry(node)
            .or_default()
            .push((id, kind, listener));
        self.graph.set_listened(node, true);
        Ok(id)
    }

    /// Unsubscribes a listener. Returns false if it was not registered on that node.
    pub fn off(&mut self, r: impl Into<NodeRef>, id: ListenerId) -> bool {
        let r = r.into();
        if r.engine != self.id {
            return false;
        }
        match self.listeners.by_node.get_mut(&r.node) {
            Some(list) if list.iter().any(|(i, ..)| *i == id) => {
                list.retain(|(i, ..)| *i != id);
                if list.is_empty() {
                    self.listeners.by_node.remove(&r.node);
                    self.graph.set_listened(r.node, false);
                }
                true
            }
            _ => {
                self.listeners.removed.push(id);
                false
            }
        }
    }

    /// Delivers queued node events. Returns how many listener calls were made.
    pub fn flush_events(&mut self) -> usize {
        let mut calls = 0;
        for _ in 0..MAX_ROUNDS {
            let events = self.graph.drain_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                let Some(mut list) = self.listeners.by_node.remove(&event.node) else {
                    continue;
                };
                for (id, kind, listener) in list.iter_mut() {
                    if *kind != event.kind || self.listeners.removed.contains(id) {
                        continue;
                    }
                    listener(self, event);
                    calls += 1;
                }

                let removed = std::mem::take(&mut self.listeners.removed);
                list.retain(|(id, ..)| !removed.contains(id));
                if !self.graph.contains(event.node) {
                    continue;
                }
                let added = self.listeners.by_node.remove(&event.node).unwrap_or_default();
                list.extend(added);
                if list.is_empty() {
                    self.graph.set_listened(event.node, false);
                } else {
                    self.listeners.by_node.insert(event.node, list);
                }
            }
        }
        if !self.graph.pending_events().is_empty() {
            tracing::warn!(
                pending = self.graph.pending_events().len(),
                "listeners keep queueing events; deferring the rest to the next flush"
            );
        }
        calls
    }
}
