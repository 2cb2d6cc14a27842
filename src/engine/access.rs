//! Static access footprints of systems and the compatibility rule.
//!
//! Every system is analyzed once, when it is registered, into a
//! [`SystemAccess`]: which resources and which component/relation types it reads
//! or writes, and whether it touches the world directly. The scheduler only
//! ever compares these footprints; nothing is checked while systems run.
//!
//! ## Rules
//! * **Validity**: a system may not read and write the same resource, may not
//!   alias a component through two parameters with at least one writer, and may
//!   not combine direct world access with any other access.
//! * **Compatibility**: two systems may share a batch iff neither uses the
//!   world directly and neither writes something the other reads or writes.
//!
//! [`DataTypeId::INVALID`] is never recorded, so it can't cause a conflict.

use std::collections::BTreeSet;

use crate::engine::error::AccessError;
use crate::engine::registry::TypeRegistry;
use crate::engine::types::DataTypeId;


/// Read/write footprint of a system (or of one of its parameters).

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemAccess {
    /// The system reaches into the world directly.
    pub uses_world: bool,

    /// Resources read.
    pub read_resources: BTreeSet<DataTypeId>,

    /// Resources written.
    pub written_resources: BTreeSet<DataTypeId>,

    /// Component and relation types read.
    pub read_components: BTreeSet<DataTypeId>,

    /// Component and relation types written.
    pub written_components: BTreeSet<DataTypeId>,

    errors: Vec<AccessError>,
}

impl SystemAccess {
    /// Creates an empty footprint.
    pub fn new() -> Self { Self::default() }

    /// Records read access to a resource.
    pub fn read_resource(&mut self, id: DataTypeId) -> &mut Self {
        if id != DataTypeId::INVALID {
            self.read_resources.insert(id);
        }
        self
    }

    /// Records write access to a resource.
    pub fn write_resource(&mut self, id: DataTypeId) -> &mut Self {
        if id != DataTypeId::INVALID {
            self.written_resources.insert(id);
        }
        self
    }

    /// Records read access to a component or relation type.
    pub fn read_component(&mut self, id: DataTypeId) -> &mut Self {
        if id != DataTypeId::INVALID {
            self.read_components.insert(id);
        }
        self
    }

    /// Records write access to a component or relation type.
    pub fn write_component(&mut self, id: DataTypeId) -> &mut Self {
        if id != DataTypeId::INVALID {
            self.written_components.insert(id);
        }
        self
    }

    /// Records direct world access.
    pub fn use_world(&mut self) -> &mut Self {
        self.uses_world = true;
        self
    }

    /// Returns `true` if nothing is accessed.
    pub fn is_empty(&self) -> bool {
        !self.uses_world
            && self.read_resources.is_empty()
            && self.written_resources.is_empty()
            && self.read_components.is_empty()
            && self.written_components.is_empty()
    }

    /// Merges the footprint of another parameter of the same system.
    ///
    /// Overlaps that would alias data inside one system are recorded and
    /// reported later by [`SystemAccess::validate`].
    pub fn merge(&mut self, other: &SystemAccess, types: &TypeRegistry) {
        for &id in other.written_resources.iter().chain(&other.read_resources) {
            let written_here = self.written_resources.contains(&id);
            let written_there = other.written_resources.contains(&id);
            if (written_there && self.read_resources.contains(&id)) || written_here {
                self.errors.push(AccessError::ResourceReadAndWritten { resource: types.name(id).to_string() });
            }
        }

        for &id in other.written_components.iter().chain(&other.read_components) {
            let written_here = self.written_components.contains(&id);
            let written_there = other.written_components.contains(&id);
            if (written_there && self.read_components.contains(&id)) || written_here {
                self.errors.push(AccessError::ComponentAliased { component: types.name(id).to_string() });
            }
        }

        self.union(other);
    }

    /// Adds the footprint of `other` without checking for overlaps.
    pub fn union(&mut self, other: &SystemAccess) {
        self.uses_world |= other.uses_world;
        self.read_resources.extend(&other.read_resources);
        self.written_resources.extend(&other.written_resources);
        self.read_components.extend(&other.read_components);
        self.written_components.extend(&other.written_components);
        self.errors.extend(other.errors.iter().cloned());
    }

    /// Records a problem found while building this footprint.
    pub fn record_error(&mut self, error: AccessError) {
        self.errors.push(error);
    }

    /// Checks the validity rules.
    pub fn validate(&self, types: &TypeRegistry) -> Result<(), AccessError> {
        if let Some(error) = self.errors.first() {
            return Err(error.clone());
        }

        if let Some(&id) = self.read_resources.intersection(&self.written_resources).next() {
            return Err(AccessError::ResourceReadAndWritten { resource: types.name(id).to_string() });
        }

        let other_access = !self.read_resources.is_empty()
            || !self.written_resources.is_empty()
            || !self.read_components.is_empty()
            || !self.written_components.is_empty();
        if self.uses_world && other_access {
            return Err(AccessError::WorldWithOtherAccess);
        }
        Ok(())
    }

    /// Returns `true` if this footprint may run concurrently with `other`.
    pub fn compatible(&self, other: &SystemAccess) -> bool {
        compatible(self, other)
    }

    /// Returns `true` if this footprint may not run concurrently with `other`.
    pub fn conflicts_with(&self, other: &SystemAccess) -> bool {
        !compatible(self, other)
    }
}

/// Returns `true` if systems with footprints `a` and `b` may run concurrently.
pub fn compatible(a: &SystemAccess, b: &SystemAccess) -> bool {
    if a.uses_world || b.uses_world {
        return false;
    }

    let overlaps = |written: &BTreeSet<DataTypeId>, other_read: &BTreeSet<DataTypeId>, other_written: &BTreeSet<DataTypeId>| {
        !written.is_disjoint(other_read) || !written.is_disjoint(other_written)
    };

    !overlaps(&a.written_resources, &b.read_resources, &b.written_resources)
        && !overlaps(&b.written_resources, &a.read_resources, &a.written_resources)
        && !overlaps(&a.written_components, &b.read_components, &b.written_components)
        && !overlaps(&b.written_components, &a.read_components, &a.written_components)
}
