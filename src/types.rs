use std::hash::Hash;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Riot's opaque player handle.
pub type Puuid = String;

/// Opaque match handle, e.g. `KR_7412345678`.
pub type MatchId = String;

// ---------------------------------------------------------------------------
// UniqueList
// ---------------------------------------------------------------------------

/// Append-only, insertion-ordered list with set semantics.
///
/// Serialized as a bare JSON array so checkpoint files stay readable by anything.
/// Duplicates in a loaded array are collapsed, first occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
#[serde(bound(
    serialize = "T: Serialize + Eq + Hash",
    deserialize = "T: Deserialize<'de> + Eq + Hash"
))]
pub struct UniqueList<T: Eq + Hash>(IndexSet<T>);

impl<T: Eq + Hash> UniqueList<T> {
    pub fn new() -> Self {
        Self(IndexSet::new())
    }

    /// Returns `true` if the item was not present before.
    pub fn push(&mut self, item: T) -> bool {
        self.0.insert(item)
    }

    /// Union in order; returns how many items were new.
    pub fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) -> usize {
        iter.into_iter().map(|item| self.0.insert(item)).filter(|&added| added).count()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.0.contains(item)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> indexmap::set::Iter<'_, T> {
        self.0.iter()
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.0.iter().cloned().collect()
    }
}

impl<T: Eq + Hash> Default for UniqueList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash> From<Vec<T>> for UniqueList<T> {
    fn from(items: Vec<T>) -> Self {
        Self(items.into_iter().collect())
    }
}

impl<T: Eq + Hash> From<UniqueList<T>> for Vec<T> {
    fn from(list: UniqueList<T>) -> Self {
        list.0.into_iter().collect()
    }
}

impl<'a, T: Eq + Hash> IntoIterator for &'a UniqueList<T> {
    type Item = &'a T;
    type IntoIter = indexmap::set::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Stage results
// ---------------------------------------------------------------------------

/// What one collection stage did during a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    /// Iterations that issued a request.
    pub requests: usize,
    /// New identifiers or records appended to the stage's checkpoint.
    pub added: usize,
    /// Requests that yielded nothing usable.
    pub failed: usize,
    /// The stage stopped early on a shutdown signal.
    pub interrupted: bool,
}
