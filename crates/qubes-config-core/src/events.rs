// ── Row-changed event bus ──
//
// Typed observer list with synchronous dispatch. Listeners run in
// registration order on the emitting thread, before `emit` returns.

use std::fmt;

use serde::Serialize;
use strum::Display;

/// Which list of a page a changed row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RowList {
    Blocks,
    AutoAttach,
    Required,
    PolicyMain,
    PolicyExceptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Edited,
    Removed,
    Reverted,
}

/// Payload emitted whenever a rule row is added, edited, removed or reverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowChanged {
    pub list: RowList,
    pub kind: ChangeKind,
    /// Human-readable description of the row after the change.
    pub row: String,
}

impl RowChanged {
    pub fn new(list: RowList, kind: ChangeKind, row: impl Into<String>) -> Self {
        Self {
            list,
            kind,
            row: row.into(),
        }
    }
}

pub type Listener<E> = Box<dyn FnMut(&E) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct EventBus<E> {
    listeners: Vec<(SubscriptionId, Listener<E>)>,
    next_id: u64,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
        }
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&E) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns `false` if the id was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    pub fn emit(&mut self, event: &E) {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
