//! Memory usage reporting.

use alloc::vec::Vec;
use core::fmt;

use crate::{
    PhysicalMemoryManager,
    address_space::{AddressSpaces, SpaceId},
    config::ENTRIES_PER_TABLE,
    page_table::PteState,
};

/// Page usage of one address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceUsage {
    pub id: SpaceId,
    pub resident: usize,
    pub swapped: usize,
    pub tables: usize,
}

/// A snapshot of physical page usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySummary {
    /// Managed frames.
    pub total: usize,
    /// Managed frames with no references.
    pub free: usize,
    /// Extra references held on shared frames.
    pub shared: usize,
    pub spaces: Vec<SpaceUsage>,
}

impl MemorySummary {
    pub(crate) fn collect(pmm: &PhysicalMemoryManager, spaces: &AddressSpaces) -> Self {
        let spaces = spaces
            .iter()
            .map(|(id, space)| {
                let mut usage = SpaceUsage {
                    id,
                    resident: 0,
                    swapped: 0,
                    tables: 0,
                };
                for (_, table) in space.directory().tables(pmm) {
                    usage.tables += 1;
                    for (_, entry) in pmm.table(table).entries(ENTRIES_PER_TABLE) {
                        match entry.state() {
                            PteState::Absent => {}
                            PteState::Swapped(_) => usage.swapped += 1,
                            PteState::Resident { .. } => usage.resident += 1,
                        }
                    }
                }
                usage
            })
            .collect();

        Self {
            total: pmm.total_frames(),
            free: pmm.free_frames(),
            shared: pmm.references().shared_count(),
            spaces,
        }
    }

    /// Returns the usage of `id`, if it was live when the summary was taken.
    pub fn space(&self, id: SpaceId) -> Option<&SpaceUsage> {
        self.spaces.iter().find(|usage| usage.id == id)
    }
}

impl fmt::Display for MemorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Mem-info:")?;
        writeln!(f, "{} free pages of {}", self.free, self.total)?;
        writeln!(f, "{} pages shared", self.shared)?;
        for usage in &self.spaces {
            writeln!(
                f,
                "Address space {}: {} resident, {} swapped, {} page tables",
                usage.id, usage.resident, usage.swapped, usage.tables
            )?;
        }
        Ok(())
    }
}
