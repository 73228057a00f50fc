//! Aggregator: flatten per-entity tidy tables into one keyed table
//!
//! Each entity's rows are appended exactly once into a single growable
//! buffer, so peak memory is bounded by the total number of tidy rows. Only
//! already-extracted records are held; partitions and fitted models are
//! dropped by the caller as soon as they have been extracted.

use serde::{Deserialize, Serialize};

/// One tidy record prefixed with its entity key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResult<R> {
    /// Entity key
    pub entity: String,
    /// Flattened tidy record
    #[serde(flatten)]
    pub record: R,
}

/// Single-pass accumulator of entity-keyed tidy rows
#[derive(Debug, Clone)]
pub struct Aggregator<R> {
    rows: Vec<EntityResult<R>>,
    entities: usize,
}

impl<R> Default for Aggregator<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Aggregator<R> {
    /// Create an empty aggregator
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rows: Vec::new(),
            entities: 0,
        }
    }

    /// Create with room for `rows` records
    #[must_use]
    pub fn with_capacity(rows: usize) -> Self {
        Self {
            rows: Vec::with_capacity(rows),
            entities: 0,
        }
    }

    /// Append one entity's records, preserving their order
    pub fn push<I>(&mut self, entity: &str, records: I)
    where
        I: IntoIterator<Item = R>,
    {
        self.rows.extend(records.into_iter().map(|record| EntityResult {
            entity: entity.to_string(),
            record,
        }));
        self.entities += 1;
    }

    /// Number of entities pushed
    #[must_use]
    pub const fn entity_count(&self) -> usize {
        self.entities
    }

    /// Number of rows accumulated
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if no rows were accumulated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Finish into the flat table
    #[must_use]
    pub fn finish(self) -> Vec<EntityResult<R>> {
        self.rows
    }
}

/// Concatenate `(entity, records)` pairs in iteration order
pub fn aggregate<R, I, J>(per_entity: I) -> Vec<EntityResult<R>>
where
    I: IntoIterator<Item = (String, J)>,
    J: IntoIterator<Item = R>,
{
    let mut aggregator = Aggregator::new();
    for (entity, records) in per_entity {
        aggregator.push(&entity, records);
    }
    aggregator.finish()
}

/// Records of one entity, in their original order
pub fn records_for<'a, R>(
    results: &'a [EntityResult<R>],
    entity: &'a str,
) -> impl Iterator<Item = &'a R> + 'a {
    results
        .iter()
        .filter(move |r| r.entity == entity)
        .map(|r| &r.record)
}
