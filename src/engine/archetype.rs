//! # Archetype Graph
//!
//! Interns sets of [`ColumnId`]s into [`ArchetypeId`]s and memoizes the
//! "add one column" / "remove one column" transitions between them.
//!
//! ## Purpose
//! Every live entity belongs to exactly one archetype: the set of columns it
//! currently has. Attaching or detaching a component moves the entity along an
//! edge of this graph, and the dense table of the destination archetype receives
//! its row.
//!
//! ## Design
//! - Each node stores its column set sorted and deduplicated, so the set has a
//!   single canonical representation regardless of insertion order.
//! - `by_columns` interns canonical sets; two equal sets always map to the same id.
//! - Each node caches the edges it has already resolved.
//! - `by_column` indexes archetypes by the columns they contain. Query matching
//!   intersects these lists instead of scanning every archetype.
//!
//! ## Invariants
//! - Node `0` is the empty archetype and always exists.
//! - Archetypes are never removed; ids are stable for the lifetime of the graph.
//! - [`ArchetypeId::INVALID`] and [`ColumnId::INVALID`] never appear in a node.

use std::collections::HashMap;

use tracing::debug;

use crate::engine::types::{ArchetypeId, ColumnId};


struct Node {
    columns: Vec<ColumnId>,
    with_edges: HashMap<ColumnId, ArchetypeId>,
    without_edges: HashMap<ColumnId, ArchetypeId>,
}

impl Node {
    fn new(columns: Vec<ColumnId>) -> Self {
        Self { columns, with_edges: HashMap::new(), without_edges: HashMap::new() }
    }
}

/// Graph of every archetype seen so far.

pub struct ArchetypeGraph {
    nodes: Vec<Node>,
    by_columns: HashMap<Vec<ColumnId>, ArchetypeId>,
    by_column: HashMap<ColumnId, Vec<ArchetypeId>>,
}

impl Default for ArchetypeGraph {
    fn default() -> Self { Self::new() }
}

impl ArchetypeGraph {
    /// Creates a graph containing only the empty archetype.
    pub fn new() -> Self {
        let mut by_columns = HashMap::new();
        by_columns.insert(Vec::new(), ArchetypeId::EMPTY);
        Self {
            nodes: vec![Node::new(Vec::new())],
            by_columns,
            by_column: HashMap::new(),
        }
    }

    /// Returns the archetype holding exactly `columns`, creating it if needed.
    ///
    /// The order of `columns` and duplicate entries are irrelevant.
    ///
    /// ## Panics
    /// Panics if `columns` contains [`ColumnId::INVALID`].
    pub fn archetype_of(&mut self, columns: &[ColumnId]) -> ArchetypeId {
        let mut canonical = columns.to_vec();
        canonical.sort_unstable();
        canonical.dedup();
        self.intern(canonical)
    }

    /// Returns the archetype reached by adding `column` to `archetype`.
    ///
    /// Adding a column that is already present returns `archetype` unchanged.
    /// Either sentinel as input yields [`ArchetypeId::INVALID`].
    pub fn with(&mut self, archetype: ArchetypeId, column: ColumnId) -> ArchetypeId {
        if !self.is_valid(archetype) || !column.is_valid() {
            return ArchetypeId::INVALID;
        }

        if let Some(&target) = self.nodes[archetype.index()].with_edges.get(&column) {
            return target;
        }

        let columns = &self.nodes[archetype.index()].columns;
        let target = match columns.binary_search(&column) {
            Ok(_) => archetype,
            Err(position) => {
                let mut extended = Vec::with_capacity(columns.len() + 1);
                extended.extend_from_slice(&columns[..position]);
                extended.push(column);
                extended.extend_from_slice(&columns[position..]);
                self.intern(extended)
            }
        };

        self.nodes[archetype.index()].with_edges.insert(column, target);
        if target != archetype {
            self.nodes[target.index()].without_edges.insert(column, archetype);
        }
        target
    }

    /// Returns the archetype reached by removing `column` from `archetype`.
    ///
    /// Removing a column that isn't present returns `archetype` unchanged.
    /// Either sentinel as input yields [`ArchetypeId::INVALID`].
    pub fn without(&mut self, archetype: ArchetypeId, column: ColumnId) -> ArchetypeId {
        if !self.is_valid(archetype) || !column.is_valid() {
            return ArchetypeId::INVALID;
        }

        if let Some(&target) = self.nodes[archetype.index()].without_edges.get(&column) {
            return target;
        }

        let columns = &self.nodes[archetype.index()].columns;
        let target = match columns.binary_search(&column) {
            Err(_) => archetype,
            Ok(position) => {
                let mut reduced = columns.clone();
                reduced.remove(position);
                self.intern(reduced)
            }
        };

        self.nodes[archetype.index()].without_edges.insert(column, target);
        if target != archetype {
            self.nodes[target.index()].with_edges.insert(column, archetype);
        }
        target
    }

    /// Returns `true` if `archetype` contains `column`.
    #[inline]
    pub fn contains(&self, archetype: ArchetypeId, column: ColumnId) -> bool {
        self.is_valid(archetype) && self.nodes[archetype.index()].columns.binary_search(&column).is_ok()
    }

    /// Returns the sorted column set of `archetype` (empty for `INVALID`).
    #[inline]
    pub fn columns(&self, archetype: ArchetypeId) -> &[ColumnId] {
        if self.is_valid(archetype) { &self.nodes[archetype.index()].columns } else { &[] }
    }

    /// Returns `true` if `archetype` names an existing node.
    #[inline]
    pub fn is_valid(&self, archetype: ArchetypeId) -> bool {
        archetype.is_valid() && archetype.index() < self.nodes.len()
    }

    /// Returns the number of archetypes, the empty one included.
    #[inline]
    pub fn len(&self) -> usize { self.nodes.len() }

    /// Always `false`: the empty archetype exists from construction.
    #[inline]
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// Returns every archetype containing all of `with` and none of `without`,
    /// in ascending id order.
    ///
    /// ## Algorithm
    /// Starts from the shortest `by_column` list among the `with` columns and
    /// keeps the candidates that contain every other `with` column and no
    /// `without` column. An empty `with` set starts from every archetype.
    pub fn collect(&self, with: &[ColumnId], without: &[ColumnId]) -> Vec<ArchetypeId> {
        if with.iter().any(|c| !c.is_valid()) {
            return Vec::new();
        }

        let accepts = |id: ArchetypeId| {
            with.iter().all(|&c| self.contains(id, c)) && !without.iter().any(|&c| self.contains(id, c))
        };

        let shortest = with
            .iter()
            .map(|c| self.by_column.get(c).map_or(&[][..], Vec::as_slice))
            .min_by_key(|list| list.len());

        match shortest {
            Some(candidates) => candidates.iter().copied().filter(|&id| accepts(id)).collect(),
            None => (0..self.nodes.len() as u32).map(ArchetypeId).filter(|&id| accepts(id)).collect(),
        }
    }

    fn intern(&mut self, canonical: Vec<ColumnId>) -> ArchetypeId {
        if let Some(&id) = self.by_columns.get(&canonical) {
            return id;
        }

        assert!(
            canonical.iter().all(|c| c.is_valid()),
            "the invalid column cannot be part of an archetype"
        );

        let id = ArchetypeId(self.nodes.len() as u32);
        for &column in &canonical {
            self.by_column.entry(column).or_default().push(id);
        }
        debug!(archetype = id.0, columns = ?canonical, "created archetype");
        self.by_columns.insert(canonical.clone(), id);
        self.nodes.push(Node::new(canonical));
        id
    }
}
