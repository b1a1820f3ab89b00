//! The per-step log of topology changes, and its replay onto particle-indexed fields.

use crate::math::*;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TopologyEvent {
    /// `first` was split in two, the new half lives at `second`. The halves sit at
    /// `x - offset` and `x + offset`.
    Split {
        first: usize,
        second: usize,
        offset: TV,
    },
    /// `absorbed` was merged into `survivor`, whose position moved by `offset`. The absorbed
    /// slot is freed by a subsequent `Remove`.
    Merge {
        survivor: usize,
        absorbed: usize,
        offset: TV,
    },
    /// `removed` was freed by moving the last particle, `replacement`, into its slot.
    Remove { removed: usize, replacement: usize },
}

/// Append-only, thread-safe event log.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<TopologyEvent>>,
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        EventLog {
            events: Mutex::new(self.events()),
        }
    }
}

impl EventLog {
    pub fn log(&self, event: TopologyEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// A snapshot of the events logged so far.
    pub fn events(&self) -> Vec<TopologyEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties the log, returning what it held.
    pub fn take(&mut self) -> Vec<TopologyEvent> {
        std::mem::take(
            self.events
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Replays the log onto `field`. Split halves copy the value of the original particle,
    /// merges keep the value of the survivor.
    pub fn replay<V: Clone>(&self, field: &mut Vec<V>) {
        self.replay_with(field, |survivor, _| survivor.clone())
    }

    /// Same as [`EventLog::replay`] but combines merged values with `merge(survivor, absorbed)`.
    pub fn replay_with<V, F>(&self, field: &mut Vec<V>, mut merge: F)
    where
        V: Clone,
        F: FnMut(&V, &V) -> V,
    {
        for event in self.events() {
            match event {
                TopologyEvent::Split { first, second, .. } => {
                    let value = field[first].clone();
                    place(field, second, value);
                }
                TopologyEvent::Merge {
                    survivor, absorbed, ..
                } => {
                    field[survivor] = merge(&field[survivor], &field[absorbed]);
                }
                TopologyEvent::Remove {
                    removed,
                    replacement,
                } => {
                    debug_assert_eq!(replacement + 1, field.len());
                    field.swap_remove(removed);
                }
            }
        }
    }

    /// Replays the log onto a field of positions, applying the event offsets.
    pub fn replay_positions(&self, field: &mut Vec<TV>) {
        for event in self.events() {
            match event {
                TopologyEvent::Split {
                    first,
                    second,
                    offset,
                } => {
                    let center = field[first];
                    field[first] = center - offset;
                    place(field, second, center + offset);
                }
                TopologyEvent::Merge {
                    survivor, offset, ..
                } => {
                    field[survivor] += offset;
                }
                TopologyEvent::Remove { removed, .. } => {
                    field.swap_remove(removed);
                }
            }
        }
    }

    /// For each of the `initial_count` particles that existed when the log was started, its
    /// index once every event has been applied, or `None` if it was removed. Split children are
    /// new particles and never stand in for their parent.
    pub fn remap_table(&self, initial_count: usize) -> Vec<Option<usize>> {
        let mut origin: Vec<Option<usize>> = (0..initial_count).map(Some).collect();
        for event in self.events() {
            match event {
                TopologyEvent::Split { second, .. } => place(&mut origin, second, None),
                TopologyEvent::Merge { .. } => {}
                TopologyEvent::Remove { removed, .. } => {
                    origin.swap_remove(removed);
                }
            }
        }

        let mut table = vec![None; initial_count];
        for (slot, o) in origin.iter().enumerate() {
            if let Some(o) = o {
                table[*o] = Some(slot);
            }
        }
        table
    }
}

fn place<V>(field: &mut Vec<V>, index: usize, value: V) {
    if index == field.len() {
        field.push(value);
    } else {
        field[index] = value;
    }
}
