use super::{ContextChunk, ContextGroup};
use crate::chunks::{Chunk, ChunkStore};
use crate::config::{ChunkFilters, GroupingConfig, NeighborConfig};
use crate::retrieval::{MetricInfo, Neighbor};
use std::collections::HashSet;

/// Groups assembled for one anchor together with the neighbors that survived filtering.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    /// Context groups, possibly empty when the minimum size cannot be reached.
    pub groups: Vec<ContextGroup>,
    /// Filtered vector neighbors in metric order, recorded in candidate provenance.
    pub neighbors: Vec<Neighbor>,
}

/// Builds context groups from configuration-driven filters and size bounds.
pub struct ContextAssembler<'a> {
    filters: &'a ChunkFilters,
    neighbors: &'a NeighborConfig,
    grouping: &'a GroupingConfig,
}

impl<'a> ContextAssembler<'a> {
    /// Create an assembler borrowing the relevant configuration sections.
    pub fn new(
        filters: &'a ChunkFilters,
        neighbors: &'a NeighborConfig,
        grouping: &'a GroupingConfig,
    ) -> Self {
        Self {
            filters,
            neighbors,
            grouping,
        }
    }

    /// Whether `chunk` may serve as an anchor.
    pub fn is_eligible(&self, chunk: &Chunk) -> bool {
        let filters = self.filters;
        if chunk.content.trim().is_empty() {
            return false;
        }
        if !allows(&filters.languages_allowed, chunk.language.as_deref()) {
            return false;
        }
        if !allows(&filters.trust_levels_allowed, chunk.trust_level()) {
            return false;
        }
        if !overlaps(&filters.chunk_roles_allowed, &chunk.semantic.chunk_role) {
            return false;
        }
        overlaps(&filters.content_types_allowed, &chunk.semantic.content_type)
    }

    /// Sequential neighbors of the chunk at `position`: preceding ones nearest first, then following.
    pub fn local_neighbors<'s>(&self, store: &'s ChunkStore, position: usize) -> Vec<&'s Chunk> {
        let before = self.neighbors.max_local_neighbors_before;
        let after = self.neighbors.max_local_neighbors_after;
        let mut local = Vec::with_capacity(before + after);
        for offset in 1..=before {
            let Some(index) = position.checked_sub(offset) else {
                break;
            };
            if let Some(chunk) = store.by_position(index) {
                local.push(chunk);
            }
        }
        for offset in 1..=after {
            match store.by_position(position + offset) {
                Some(chunk) => local.push(chunk),
                None => break,
            }
        }
        local
    }

    /// Drop unusable vector neighbors, order the rest by the metric, and apply the cap.
    ///
    /// The sort is stable so equal scores keep the retriever's ranking.
    pub fn filter_neighbors(
        &self,
        anchor: &Chunk,
        neighbors: Vec<Neighbor>,
        metric: MetricInfo,
    ) -> Vec<Neighbor> {
        let filters = self.filters;
        let threshold = self.neighbors.similarity_threshold;
        let mut seen = HashSet::new();
        let mut kept: Vec<Neighbor> = neighbors
            .into_iter()
            .filter(|neighbor| {
                let chunk = &neighbor.chunk;
                if chunk.chunk_id == anchor.chunk_id || chunk.content.trim().is_empty() {
                    return false;
                }
                if let Some(threshold) = threshold
                    && !metric.passes_threshold(neighbor.score, threshold)
                {
                    return false;
                }
                if !allows(&filters.languages_allowed, chunk.language.as_deref())
                    || !allows(&filters.trust_levels_allowed, chunk.trust_level())
                    || !overlaps(&filters.content_types_allowed, &chunk.semantic.content_type)
                {
                    return false;
                }
                if intersects(&filters.content_types_disallowed, &chunk.semantic.content_type)
                    || intersects(&filters.chunk_roles_disallowed, &chunk.semantic.chunk_role)
                {
                    return false;
                }
                if filters.require_domain_overlap
                    && !anchor.semantic.domain.is_empty()
                    && !chunk.semantic.domain.is_empty()
                    && !intersects(&anchor.semantic.domain, &chunk.semantic.domain)
                {
                    return false;
                }
                seen.insert(chunk.chunk_id.clone())
            })
            .collect();

        kept.sort_by(|left, right| metric.compare(left.score, right.score));
        if self.neighbors.max_neighbors > 0 {
            kept.truncate(self.neighbors.max_neighbors);
        }
        kept
    }

    /// Build the context groups for one anchor.
    ///
    /// The base set is the anchor plus its local neighbors, capped at `max_group_size`. A base
    /// below `min_group_size` is topped up from the neighbor pool; if the pool runs dry the anchor
    /// yields no group. The base is the first group. Remaining pool entries are windowed behind
    /// a core of the first `min(|base|, max_group_size - 1)` base chunks, so every window keeps
    /// the anchor and at least one free slot, until `max_groups_per_chunk` is reached.
    pub fn build_groups(
        &self,
        anchor: &Chunk,
        local: &[&Chunk],
        neighbors: &[Neighbor],
    ) -> Vec<ContextGroup> {
        let min = self.grouping.min_group_size.max(1);
        let max = self.grouping.max_group_size.max(min);
        let max_groups = self.grouping.max_groups_per_chunk;
        if max_groups == 0 {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut base: Vec<ContextChunk> = Vec::with_capacity(max);
        for chunk in std::iter::once(anchor).chain(local.iter().copied()) {
            if base.len() == max {
                break;
            }
            if seen.insert(chunk.chunk_id.as_str()) {
                base.push(ContextChunk::from(chunk));
            }
        }

        let mut pool: Vec<ContextChunk> = Vec::new();
        for neighbor in neighbors {
            if seen.insert(neighbor.chunk.chunk_id.as_str()) {
                pool.push(ContextChunk::from(&neighbor.chunk));
            }
        }

        if base.len() < min {
            let missing = min - base.len();
            if pool.len() < missing {
                return Vec::new();
            }
            base.extend(pool.drain(..missing));
        }

        let mut groups = vec![ContextGroup {
            group_index: 0,
            chunks: base.clone(),
        }];

        if max < 2 || pool.is_empty() {
            return groups;
        }

        let core_len = base.len().min(max - 1);
        let slot = max - core_len;
        for window in pool.chunks(slot) {
            if groups.len() >= max_groups {
                break;
            }
            let mut chunks = base[..core_len].to_vec();
            chunks.extend_from_slice(window);
            if chunks.len() < min {
                continue;
            }
            groups.push(ContextGroup {
                group_index: groups.len(),
                chunks,
            });
        }
        groups
    }

    /// Run the full assembly for the chunk at `position`, given already retrieved neighbors.
    pub fn assemble(
        &self,
        store: &ChunkStore,
        position: usize,
        retrieved: Vec<Neighbor>,
        metric: MetricInfo,
    ) -> Assembly {
        let Some(anchor) = store.by_position(position) else {
            return Assembly::default();
        };
        let local = self.local_neighbors(store, position);
        let neighbors = self.filter_neighbors(anchor, retrieved, metric);
        let groups = self.build_groups(anchor, &local, &neighbors);
        Assembly { groups, neighbors }
    }
}

fn allows(allowed: &[String], value: Option<&str>) -> bool {
    allowed.is_empty() || value.is_some_and(|value| allowed.iter().any(|item| item == value))
}

fn overlaps(allowed: &[String], values: &[String]) -> bool {
    allowed.is_empty() || intersects(allowed, values)
}

fn intersects(left: &[String], right: &[String]) -> bool {
    left.iter().any(|item| right.contains(item))
}
