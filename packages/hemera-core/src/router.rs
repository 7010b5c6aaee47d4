//! Inverted-index pattern router.
//!
//! Every registration is indexed under each of its present `(field, value)`
//! pairs. A lookup collects the buckets addressed by the incoming pattern,
//! orders them by strategy, and returns the first registration whose fields
//! are a subset of the incoming fields.
//!
//! The first bucket (in strategy order) holding a match wins. This is a
//! heuristic rather than a global search across all buckets, and routing
//! behavior depends on it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::trace;

use crate::pattern::{PatternFields, PatternSet, PatternValue, Patterned};

// ---------------------------------------------------------------------------
// IndexingStrategy
// ---------------------------------------------------------------------------

/// Tie-break policy between registrations that match the same pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexingStrategy {
    /// Most specific (highest weight) registration first.
    #[default]
    Depth,
    /// Earliest registration first, regardless of weight.
    Insertion,
}

impl IndexingStrategy {
    #[must_use]
    pub fn is_deep(self) -> bool {
        self == IndexingStrategy::Depth
    }
}

impl fmt::Display for IndexingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexingStrategy::Depth => f.write_str("depth"),
            IndexingStrategy::Insertion => f.write_str("insertion"),
        }
    }
}

/// Returned when parsing an unknown strategy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown indexing strategy `{0}` (expected `depth` or `insertion`)")]
pub struct ParseStrategyError(String);

impl FromStr for IndexingStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "depth" | "deep" => Ok(IndexingStrategy::Depth),
            "insertion" | "insert" => Ok(IndexingStrategy::Insertion),
            _ => Err(ParseStrategyError(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

/// Index cell for one `(field, value)` pair.
#[derive(Debug)]
struct Bucket<T> {
    sets: Vec<Arc<PatternSet<T>>>,
    /// Highest weight seen; orders buckets under the depth strategy.
    max_weight: usize,
    /// Lowest sequence seen; orders buckets under the insertion strategy.
    first_sequence: u64,
}

impl<T> Bucket<T> {
    fn new() -> Self {
        Self {
            sets: Vec::new(),
            max_weight: 0,
            first_sequence: u64::MAX,
        }
    }

    fn insert(&mut self, set: Arc<PatternSet<T>>, strategy: IndexingStrategy) {
        self.max_weight = self.max_weight.max(set.weight);
        self.first_sequence = self.first_sequence.min(set.sequence);
        self.sets.push(set);
        // Stable sorts: equal weights keep registration order.
        match strategy {
            IndexingStrategy::Depth => self.sets.sort_by(|a, b| b.weight.cmp(&a.weight)),
            IndexingStrategy::Insertion => self.sets.sort_by_key(|s| s.sequence),
        }
    }

    fn remove(&mut self, sequence: u64) {
        self.sets.retain(|s| s.sequence != sequence);
        self.max_weight = self.sets.iter().map(|s| s.weight).max().unwrap_or(0);
        self.first_sequence = self.sets.iter().map(|s| s.sequence).min().unwrap_or(u64::MAX);
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Pattern router over payloads of type `T`.
///
/// Not synchronized: wrap it in a reader/writer lock when registrations can
/// happen while lookups are running.
#[derive(Debug)]
pub struct Router<T> {
    index: HashMap<String, HashMap<PatternValue, Bucket<T>>>,
    strategy: IndexingStrategy,
    insertion_counter: u64,
    len: usize,
}

impl<T> Router<T> {
    #[must_use]
    pub fn new(strategy: IndexingStrategy) -> Self {
        Self {
            index: HashMap::new(),
            strategy,
            insertion_counter: 0,
            len: 0,
        }
    }

    #[must_use]
    pub fn strategy(&self) -> IndexingStrategy {
        self.strategy
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Registers `pattern` with `payload` under each of its present fields.
    ///
    /// Duplicates are not rejected here; callers check `contains_exact` first.
    pub fn add<P: Patterned + ?Sized>(&mut self, pattern: &P, payload: T) -> Arc<PatternSet<T>> {
        self.insertion_counter += 1;
        let mut set = PatternSet::from_pattern(pattern).with_payload(payload);
        set.sequence = self.insertion_counter;
        let set = Arc::new(set);

        for (name, value) in &set.fields {
            self.index
                .entry(name.clone())
                .or_default()
                .entry(value.clone())
                .or_insert_with(Bucket::new)
                .insert(Arc::clone(&set), self.strategy);
        }
        self.len += 1;

        trace!(
            method = %set.method(),
            weight = set.weight,
            sequence = set.sequence,
            "pattern indexed"
        );
        set
    }

    /// Resolves a concrete pattern to the best registration, per strategy.
    pub fn lookup<P: Patterned + ?Sized>(&self, pattern: &P) -> Option<Arc<PatternSet<T>>> {
        self.lookup_fields(&PatternSet::from_pattern(pattern).fields)
    }

    /// Same as [`Router::lookup`] for an already normalized field map.
    #[must_use]
    pub fn lookup_fields(&self, fields: &PatternFields) -> Option<Arc<PatternSet<T>>> {
        let mut buckets: Vec<&Bucket<T>> = fields
            .iter()
            .filter_map(|(name, value)| self.index.get(name)?.get(value))
            .collect();

        match self.strategy {
            IndexingStrategy::Depth => buckets.sort_by(|a, b| b.max_weight.cmp(&a.max_weight)),
            IndexingStrategy::Insertion => buckets.sort_by_key(|b| b.first_sequence),
        }

        buckets
            .into_iter()
            .flat_map(|bucket| bucket.sets.iter())
            .find(|set| set.matches(fields))
            .cloned()
    }

    /// Whether a registration with exactly the same present fields exists.
    pub fn contains_exact<P: Patterned + ?Sized>(&self, pattern: &P) -> bool {
        let fields = PatternSet::from_pattern(pattern).fields;
        let Some((name, value)) = fields.iter().next() else {
            return false;
        };
        self.index
            .get(name)
            .and_then(|values| values.get(value))
            .is_some_and(|bucket| bucket.sets.iter().any(|set| set.fields == fields))
    }

    /// Every registration exactly once, in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<PatternSet<T>>> {
        let mut seen = HashSet::new();
        let mut list: Vec<Arc<PatternSet<T>>> = self
            .index
            .values()
            .flat_map(HashMap::values)
            .flat_map(|bucket| bucket.sets.iter())
            .filter(|set| seen.insert(set.sequence))
            .cloned()
            .collect();
        list.sort_by_key(|set| set.sequence);
        list
    }

    /// Withdraws a registration. Used to roll back a registration whose
    /// transport subscription could not be established.
    pub fn remove(&mut self, set: &PatternSet<T>) -> bool {
        let mut removed = false;
        for (name, value) in &set.fields {
            let Some(values) = self.index.get_mut(name) else {
                continue;
            };
            if let Some(bucket) = values.get_mut(value) {
                let before = bucket.sets.len();
                bucket.remove(set.sequence);
                removed |= bucket.sets.len() != before;
                if bucket.sets.is_empty() {
                    values.remove(value);
                }
            }
            if values.is_empty() {
                self.index.remove(name);
            }
        }
        if removed {
            self.len -= 1;
        }
        removed
    }
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new(IndexingStrategy::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
