use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::events::{PhotoId, Priority};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: PhotoId,
    pub priority: Priority,
    /// Monotonic request counter; larger means more recent.
    pub requested_at: u64,
}

/// Pending fetches, most recently requested first.
///
/// An identifier is queued at most once. Re-requesting it with `push_front`
/// moves it to the front (and keeps the higher of the two priorities), so a
/// user paging quickly never builds a backlog of stale requests.
#[derive(Debug, Default)]
pub struct RequestQueue {
    items: VecDeque<PendingRequest>,
    counter: u64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_front(&mut self, id: PhotoId, priority: Priority) {
        let priority = match self.take(&id) {
            Some(existing) => existing.priority.max(priority),
            None => priority,
        };
        let requested_at = self.next_order();
        self.items.push_front(PendingRequest {
            id,
            priority,
            requested_at,
        });
    }

    /// Append unless already queued; never moves an existing entry.
    pub fn push_back(&mut self, id: PhotoId, priority: Priority) {
        if self.contains(&id) {
            return;
        }
        let requested_at = self.next_order();
        self.items.push_back(PendingRequest {
            id,
            priority,
            requested_at,
        });
    }

    pub fn pop(&mut self) -> Option<PendingRequest> {
        self.items.pop_front()
    }

    pub fn contains(&self, id: &PhotoId) -> bool {
        self.items.iter().any(|r| &r.id == id)
    }

    pub fn remove(&mut self, id: &PhotoId) -> bool {
        self.take(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingRequest> {
        self.items.iter()
    }

    fn take(&mut self, id: &PhotoId) -> Option<PendingRequest> {
        let pos = self.items.iter().position(|r| &r.id == id)?;
        self.items.remove(pos)
    }

    fn next_order(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }
}

/// Work shared between the provider and one worker task.
///
/// The provider mutates the state through [`Mailbox::post`], which wakes the
/// worker; the worker drains it with [`Mailbox::take`] and parks on
/// [`Mailbox::wait`] once nothing is left. A post that lands between an empty
/// `take` and `wait` is not lost: `Notify` keeps the permit.
#[derive(Debug, Default)]
pub struct Mailbox<S> {
    state: Mutex<S>,
    notify: Notify,
}

impl<S> Mailbox<S> {
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
            notify: Notify::new(),
        }
    }

    pub fn post<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let out = f(&mut self.lock());
        self.notify.notify_one();
        out
    }

    pub fn take<R>(&self, f: impl FnOnce(&mut S) -> Option<R>) -> Option<R> {
        f(&mut self.lock())
    }

    pub fn inspect<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.lock())
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
