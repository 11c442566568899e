//! Logical index ownership.
//!
//! The table ranges of all sharding entries must partition `[0, suffix_count)`
//! exactly once. The resulting `RoutingTable` is built once and never mutated.

use crate::error::{ShardError, ShardResult};
use crate::models::ShardRef;

/// Inclusive range of logical indices owned by one shard entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRange {
    pub shard: ShardRef,
    pub start: u32,
    pub end: u32,
}

impl TableRange {
    pub fn new(shard: ShardRef, start: u32, end: u32) -> Self {
        Self { shard, start, end }
    }

    pub fn contains(&self, index: u32) -> bool {
        self.start <= index && index <= self.end
    }
}

/// Check that `ranges` cover `[0, suffix_count)` with no gap and no overlap.
pub fn validate_ranges(ranges: &[TableRange], suffix_count: u32) -> ShardResult<()> {
    if suffix_count == 0 {
        return Err(ShardError::config("suffix_count must be greater than 0"));
    }
    if ranges.is_empty() {
        return Err(ShardError::config(format!(
            "No sharding database owns any table index in [0, {})",
            suffix_count
        )));
    }

    for range in ranges {
        if range.start > range.end {
            return Err(ShardError::config(format!(
                "{}: table_range [{}, {}] is reversed",
                range.shard, range.start, range.end
            )));
        }
        if range.end >= suffix_count {
            return Err(ShardError::config(format!(
                "{}: table_range [{}, {}] exceeds suffix_count {}",
                range.shard, range.start, range.end, suffix_count
            )));
        }
    }

    let mut sorted: Vec<&TableRange> = ranges.iter().collect();
    sorted.sort_by_key(|r| (r.start, r.end));

    let mut next = 0u32;
    let mut previous: Option<&TableRange> = None;
    for range in sorted {
        if range.start > next {
            return Err(ShardError::config(format!(
                "Table indices [{}, {}] are not owned by any sharding database",
                next,
                range.start - 1
            )));
        }
        if range.start < next {
            let other = previous.map(|p| p.shard.to_string()).unwrap_or_default();
            return Err(ShardError::config(format!(
                "{}: table_range [{}, {}] overlaps {}",
                range.shard, range.start, range.end, other
            )));
        }
        next = range.end + 1;
        previous = Some(range);
    }

    if next < suffix_count {
        return Err(ShardError::config(format!(
            "Table indices [{}, {}] are not owned by any sharding database",
            next,
            suffix_count - 1
        )));
    }
    Ok(())
}

/// Immutable logical index to connection map.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// Per logical index: owning entry and connection slot.
    owners: Vec<(ShardRef, usize)>,
}

impl RoutingTable {
    /// Validate `ranges` and build the map. `slots[i]` is the connection slot
    /// of `ranges[i]`.
    pub fn build(ranges: &[TableRange], slots: &[usize], suffix_count: u32) -> ShardResult<Self> {
        if ranges.len() != slots.len() {
            return Err(ShardError::internal(
                "Routing table needs one connection slot per range",
            ));
        }
        validate_ranges(ranges, suffix_count)?;

        let mut owners = Vec::with_capacity(suffix_count as usize);
        for index in 0..suffix_count {
            let owner = ranges
                .iter()
                .zip(slots)
                .find(|(range, _)| range.contains(index))
                .map(|(range, slot)| (range.shard, *slot))
                .ok_or_else(|| ShardError::routing(index, "no owning range after validation"))?;
            owners.push(owner);
        }
        Ok(Self { owners })
    }

    /// An empty table for managers without a sharding group.
    pub fn empty() -> Self {
        Self { owners: Vec::new() }
    }

    pub fn suffix_count(&self) -> u32 {
        self.owners.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Owning entry and connection slot for `index`.
    pub fn owner(&self, index: u32) -> Option<(ShardRef, usize)> {
        self.owners.get(index as usize).copied()
    }

    /// `(index, entry, slot)` in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, ShardRef, usize)> + '_ {
        self.owners
            .iter()
            .enumerate()
            .map(|(i, (shard, slot))| (i as u32, *shard, *slot))
    }

    /// Distinct connection slots ordered by the smallest index each owns.
    pub fn slots_in_order(&self) -> Vec<usize> {
        let mut seen = Vec::new();
        for (_, slot) in &self.owners {
            if !seen.contains(slot) {
                seen.push(*slot);
            }
        }
        seen
    }

    /// Logical indices owned by connection `slot`, ascending.
    pub fn indices_for_slot(&self, slot: usize) -> Vec<u32> {
        self.iter()
            .filter(|(_, _, s)| *s == slot)
            .map(|(i, _, _)| i)
            .collect()
    }
}
