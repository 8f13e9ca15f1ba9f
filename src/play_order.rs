use rand::{Rng, seq::SliceRandom};
use std::collections::HashSet;

use crate::events::{Direction, PhotoId};

/// Display order of every known photo plus a wrapping cursor.
#[derive(Debug, Clone, Default)]
pub struct PlayOrder {
    ids: Vec<PhotoId>,
    cursor: Option<usize>,
}

impl PlayOrder {
    /// Keep the listing order, dropping duplicate identifiers.
    pub fn new(listing: impl IntoIterator<Item = PhotoId>) -> Self {
        let mut seen = HashSet::new();
        let ids = listing
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Self { ids, cursor: None }
    }

    pub fn shuffled<R: Rng + ?Sized>(listing: impl IntoIterator<Item = PhotoId>, rng: &mut R) -> Self {
        let mut order = Self::new(listing);
        order.ids.shuffle(rng);
        order
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn current(&self) -> Option<&PhotoId> {
        self.cursor.and_then(|idx| self.ids.get(idx))
    }

    pub fn position(&self) -> Option<usize> {
        self.cursor
    }

    /// Move the cursor one step, wrapping at either end. Before the first move
    /// there is no cursor: forward lands on the first entry, backward on the last.
    pub fn next(&mut self, direction: Direction) -> Option<&PhotoId> {
        if self.ids.is_empty() {
            self.cursor = None;
            return None;
        }
        let len = self.ids.len() as isize;
        let idx: isize = match self.cursor {
            Some(idx) => (idx as isize + direction.step()).rem_euclid(len),
            None => match direction {
                Direction::Forward => 0,
                Direction::Backward => len - 1,
            },
        };
        let idx = idx as usize;
        self.cursor = Some(idx);
        self.ids.get(idx)
    }

    /// The `count` identifiers after the cursor in `direction`, excluding the
    /// current one and never repeating.
    pub fn upcoming(&self, direction: Direction, count: usize) -> Vec<PhotoId> {
        let len = self.ids.len();
        if len == 0 {
            return Vec::new();
        }
        let start = match (self.cursor, direction) {
            (Some(idx), _) => idx as isize,
            (None, Direction::Forward) => -1,
            (None, Direction::Backward) => len as isize,
        };
        let limit = if self.cursor.is_some() { len - 1 } else { len };
        (1..=count.min(limit) as isize)
            .map(|offset| {
                let idx = (start + offset * direction.step()).rem_euclid(len as isize) as usize;
                self.ids[idx].clone()
            })
            .collect()
    }

    /// Replace the listing, keeping its order for identifiers that survive and
    /// appending new ones at the end. The cursor follows the current photo when
    /// it is still listed; otherwise it stays at the same index (clamped).
    pub fn refresh(&mut self, listing: impl IntoIterator<Item = PhotoId>) {
        let listed: Vec<PhotoId> = Self::new(listing).ids;
        let keep: HashSet<&PhotoId> = listed.iter().collect();
        let current = self.current().cloned();

        let mut ids: Vec<PhotoId> = self.ids.iter().filter(|id| keep.contains(id)).cloned().collect();
        let known: HashSet<PhotoId> = ids.iter().cloned().collect();
        ids.extend(listed.iter().filter(|id| !known.contains(*id)).cloned());

        self.cursor = match (current, self.cursor) {
            _ if ids.is_empty() => None,
            (Some(cur), Some(old)) => ids
                .iter()
                .position(|id| *id == cur)
                .or(Some(old.min(ids.len() - 1))),
            (_, cursor) => cursor.map(|old| old.min(ids.len() - 1)),
        };
        self.ids = ids;
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhotoId> {
        self.ids.iter()
    }
}
