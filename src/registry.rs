//! Graph handle registry.
//!
//! Built graphs live in a generational arena. A [`GraphHandle`] names a slot
//! (index + generation) and carries the registry epoch it was issued in.
//! Bumping the epoch invalidates every outstanding handle at once; the
//! entries themselves are freed lazily by `destroy` or `purge_stale`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::types::{AnalysisError, HandleFault};

const TOKEN_PREFIX: &str = "graph";

/// Opaque, epoch-stamped reference to a registered graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphHandle {
    index: u32,
    generation: u32,
    epoch: u64,
}

impl GraphHandle {
    /// Assemble a handle from its raw parts.
    pub fn from_parts(index: u32, generation: u32, epoch: u64) -> Self {
        Self {
            index,
            generation,
            epoch,
        }
    }

    /// Epoch the handle was issued in.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl fmt::Display for GraphHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TOKEN_PREFIX}:{}:{}:{}", self.index, self.generation, self.epoch)
    }
}

impl FromStr for GraphHandle {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AnalysisError::query(format!("malformed graph handle '{s}'"));
        let mut parts = s.split(':');
        if parts.next() != Some(TOKEN_PREFIX) {
            return Err(malformed());
        }
        let index = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let generation = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let epoch = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self::from_parts(index, generation, epoch))
    }
}

impl Serialize for GraphHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GraphHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        token.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug)]
struct Entry<T> {
    epoch: u64,
    value: T,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

/// Arena of live graphs addressed by [`GraphHandle`].
#[derive(Debug)]
pub struct GraphHandleRegistry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    epoch: u64,
    live: usize,
}

impl<T> Default for GraphHandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GraphHandleRegistry<T> {
    /// Create an empty registry at epoch 0.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            epoch: 0,
            live: 0,
        }
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of registered entries, stale ones included.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Register a value and return a fresh handle stamped with the current
    /// epoch.
    pub fn register(&mut self, value: T) -> Result<GraphHandle, AnalysisError> {
        let entry = Entry {
            epoch: self.epoch,
            value,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                let index = u32::try_from(self.slots.len())
                    .map_err(|_| AnalysisError::Allocation("graph registry is full".into()))?;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                index
            }
        };
        self.live += 1;
        let generation = self.slots[index as usize].generation;
        Ok(GraphHandle::from_parts(index, generation, self.epoch))
    }

    /// Look up a live, current-epoch entry.
    pub fn resolve(&self, handle: &GraphHandle) -> Result<&T, AnalysisError> {
        self.check(handle)?;
        self.slots[handle.index as usize]
            .entry
            .as_ref()
            .map(|e| &e.value)
            .ok_or_else(|| invalid(handle, HandleFault::Unknown))
    }

    /// Mutable variant of [`resolve`](Self::resolve).
    pub fn resolve_mut(&mut self, handle: &GraphHandle) -> Result<&mut T, AnalysisError> {
        self.check(handle)?;
        self.slots[handle.index as usize]
            .entry
            .as_mut()
            .map(|e| &mut e.value)
            .ok_or_else(|| invalid(handle, HandleFault::Unknown))
    }

    /// Remove an entry and return its value.
    ///
    /// Epoch-stale handles can still be destroyed; only handles that never
    /// named a live entry fail.
    pub fn destroy(&mut self, handle: &GraphHandle) -> Result<T, AnalysisError> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or_else(|| invalid(handle, HandleFault::Unknown))?;
        let entry = slot
            .entry
            .take()
            .ok_or_else(|| invalid(handle, HandleFault::Unknown))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Ok(entry.value)
    }

    /// Advance the epoch, invalidating every outstanding handle.
    pub fn invalidate_all(&mut self) -> u64 {
        self.epoch += 1;
        tracing::info!(epoch = self.epoch, stale = self.live, "invalidated graph handles");
        self.epoch
    }

    /// Free every entry issued before the current epoch. Returns how many
    /// were freed.
    pub fn purge_stale(&mut self) -> usize {
        let current = self.epoch;
        let mut purged = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.as_ref().is_some_and(|e| e.epoch != current) {
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                purged += 1;
            }
        }
        self.live -= purged;
        if purged > 0 {
            tracing::debug!(purged, epoch = current, "purged stale graphs");
        }
        purged
    }

    fn check(&self, handle: &GraphHandle) -> Result<(), AnalysisError> {
        let entry = self
            .slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or_else(|| invalid(handle, HandleFault::Unknown))?;
        if entry.epoch != self.epoch || handle.epoch != self.epoch {
            return Err(invalid(
                handle,
                HandleFault::Stale {
                    issued: handle.epoch,
                    current: self.epoch,
                },
            ));
        }
        Ok(())
    }
}

fn invalid(handle: &GraphHandle, fault: HandleFault) -> AnalysisError {
    AnalysisError::InvalidHandle {
        handle: *handle,
        fault,
    }
}
