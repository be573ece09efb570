//! Slice pools: slabs of fixed-size slots with an index-linked free list
//!
//! Each `SliceArea` carries one `u32` header per slot. A free slot's header
//! holds the index of the next free slot, [`END_OF_LIST`] ends the list and
//! allocated slots hold [`ALLOCATED`]. The free list is bounded by the
//! area's capacity, so unlike the pointer-linked containers it is checked
//! for indices out of range and for revisits.

use super::list::{IntrusiveList, ListOwners};
use super::pool::PoolSizes;
use crate::core::types::{Address, TypedValue, WalkContext, WalkError, WalkResult};
use crate::memory::Target;
use serde::Serialize;
use tracing::{debug, trace, warn};

/// Slot header value of an allocated slot
pub const ALLOCATED: u32 = u32::MAX;

/// Slot header value terminating the free list
pub const END_OF_LIST: u32 = u32::MAX - 1;

/// Page size the allocator lays slices out with
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Slot-to-address mapping of one slice pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SliceGeometry {
    pub page_size: u64,
    pub slice_size: u64,
    pub area_size: u64,
    /// Pages at the start of each area holding the area header
    pub header_pages: u64,
    pub slices_per_area: u64,
    pub slices_per_page: u64,
    pub pages_per_slice: u64,
}

impl SliceGeometry {
    /// Reads the geometry fields of a `SlicePool`
    pub fn from_pool(target: &Target<'_>, pool: &TypedValue, page_size: u64) -> WalkResult<Self> {
        let read = |name: &str| {
            target
                .field(pool, name)
                .and_then(|f| target.read_uint(&f))
                .walk_context(|| format!("reading {} of slice pool {}", name, pool.address))
        };

        let geometry = SliceGeometry {
            page_size,
            slice_size: read("slice_size")?,
            area_size: read("area_size")?,
            header_pages: read("header_pages")?,
            slices_per_area: read("slices_per_area")?,
            slices_per_page: read("slices_per_page")?,
            pages_per_slice: read("pages_per_slice")?,
        };
        geometry.validate().walk_context(|| format!("geometry of slice pool {}", pool.address))?;
        Ok(geometry)
    }

    /// Rejects geometries no allocator would produce, so a wrong pool
    /// address fails here instead of sizing slot tables from garbage
    pub fn validate(&self) -> WalkResult<()> {
        for (name, value) in [
            ("slice_size", self.slice_size),
            ("slices_per_page", self.slices_per_page),
            ("pages_per_slice", self.pages_per_slice),
        ] {
            if value == 0 {
                return Err(WalkError::type_mismatch(
                    "slice pool geometry",
                    format!("non-zero {}", name),
                    "0",
                ));
            }
        }
        // indices at or above END_OF_LIST are sentinels
        if self.slices_per_area >= u64::from(END_OF_LIST) {
            return Err(WalkError::type_mismatch(
                "slice pool geometry",
                "slices_per_area below the free list sentinels",
                self.slices_per_area.to_string(),
            ));
        }
        match self.slices_per_area.checked_mul(self.slice_size) {
            Some(total) if total <= self.area_size => {}
            _ => {
                return Err(WalkError::type_mismatch(
                    "slice pool geometry",
                    format!("slices_per_area * slice_size <= {}", self.area_size),
                    format!("{} * {}", self.slices_per_area, self.slice_size),
                ))
            }
        }
        if let Some(last) = self.slices_per_area.checked_sub(1) {
            self.slice_offset(last)?;
        }
        Ok(())
    }

    /// Byte offset of slot `index` from the start of its area
    pub fn slice_offset(&self, index: u64) -> WalkResult<u64> {
        let offset = (|| {
            let page = index
                .checked_div(self.slices_per_page)?
                .checked_mul(self.pages_per_slice)?;
            let within_page = index
                .checked_rem(self.slices_per_page)?
                .checked_mul(self.slice_size)?;
            self.header_pages
                .checked_add(page)?
                .checked_mul(self.page_size)?
                .checked_add(within_page)
        })();
        offset.ok_or_else(|| {
            WalkError::type_mismatch(
                "slice pool geometry",
                format!("a 64-bit offset for slot {}", index),
                format!("overflow in {:?}", self),
            )
        })
    }

    pub fn slice_address(&self, area: Address, index: u64) -> WalkResult<Address> {
        Ok(area.add(self.slice_offset(index)?))
    }
}

/// Reads the header of the area's last slot, so an area claiming more
/// slots than its memory holds fails before anything is sized by it
fn check_capacity(
    target: &Target<'_>,
    area: &TypedValue,
    slots: &TypedValue,
    capacity: u64,
) -> WalkResult<()> {
    match capacity.checked_sub(1) {
        None => Ok(()),
        Some(last) => target
            .index(slots, last)
            .and_then(|slot| target.field(&slot, "next"))
            .and_then(|next| target.read_uint(&next))
            .map(|_| ())
            .walk_context(|| format!("checking {} slots of slice area {}", capacity, area.address)),
    }
}

/// Lazy walk over the free slot indices of one area.
///
/// Ends with an error on an index outside the area or an index seen
/// before.
pub struct SliceFreeListWalker<'a> {
    target: Target<'a>,
    area: Address,
    slots: TypedValue,
    next: u64,
    previous: Option<u32>,
    visited: Vec<bool>,
    done: bool,
}

impl<'a> SliceFreeListWalker<'a> {
    /// Starts at the area's `free_head`
    pub fn new(target: Target<'a>, area: &TypedValue, capacity: u64) -> WalkResult<Self> {
        let area = target.object(area)?;
        let free_head = target.read_uint(&target.field(&area, "free_head")?)?;
        let slots = target.field(&area, "slices")?;
        check_capacity(&target, &area, &slots, capacity)?;

        Ok(SliceFreeListWalker {
            target,
            area: area.address,
            slots,
            next: free_head,
            previous: None,
            visited: vec![false; capacity as usize],
            done: false,
        })
    }

    fn read_next(&self, index: u64) -> WalkResult<u64> {
        self.target
            .index(&self.slots, index)
            .and_then(|slot| self.target.field(&slot, "next"))
            .and_then(|next| self.target.read_uint(&next))
            .walk_context(|| format!("reading slot {} of slice area {}", index, self.area))
    }
}

impl Iterator for SliceFreeListWalker<'_> {
    type Item = WalkResult<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let index = self.next;
        if index == u64::from(END_OF_LIST) {
            self.done = true;
            return None;
        }

        let seen = self.visited.get(index as usize).copied();
        if seen != Some(false) {
            self.done = true;
            return Some(Err(WalkError::FreeListCorrupted {
                area: self.area,
                index,
                previous: self.previous,
            }));
        }
        self.visited[index as usize] = true;

        match self.read_next(index) {
            Ok(next) => {
                trace!(area = %self.area, index, next, "free slot");
                self.previous = Some(index as u32);
                self.next = next;
                Some(Ok(index as u32))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// State of one slot after the free list walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Free,
    Allocated,
    /// Not reached before the free list turned out corrupt
    Unknown,
}

/// Where a free list walk had to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreeListBreak {
    /// The offending index
    pub index: u64,
    /// Last valid index, `None` if `free_head` itself was bad
    pub previous: Option<u32>,
}

/// Reconstructed slot states of one area
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AreaReport {
    pub area: Address,
    pub allocated_count: u64,
    pub free_head: u64,
    pub slots: Vec<SlotState>,
    pub corruption: Option<FreeListBreak>,
}

impl AreaReport {
    /// Walks the free list of `area`.
    ///
    /// An area with no allocations is all free and is not walked. When the
    /// free list is corrupt the walk stops there and every slot it did not
    /// reach is [`SlotState::Unknown`]; read failures are returned as
    /// errors.
    pub fn inspect(target: Target<'_>, area: &TypedValue, capacity: u64) -> WalkResult<Self> {
        let area = target.object(area)?;
        let allocated_count = target.read_uint(&target.field(&area, "allocated_count")?)?;
        let free_head = target.read_uint(&target.field(&area, "free_head")?)?;
        check_capacity(&target, &area, &target.field(&area, "slices")?, capacity)?;

        let mut report = AreaReport {
            area: area.address,
            allocated_count,
            free_head,
            slots: vec![SlotState::Free; capacity as usize],
            corruption: None,
        };
        if allocated_count == 0 {
            return Ok(report);
        }

        let mut free = vec![false; capacity as usize];
        for step in SliceFreeListWalker::new(target, &area, capacity)? {
            match step {
                Ok(index) => free[index as usize] = true,
                Err(WalkError::FreeListCorrupted {
                    area,
                    index,
                    previous,
                }) => {
                    warn!(%area, index, ?previous, "slice free list corrupted");
                    report.corruption = Some(FreeListBreak { index, previous });
                }
                Err(err) => return Err(err),
            }
        }

        let unmarked = if report.corruption.is_some() {
            SlotState::Unknown
        } else {
            SlotState::Allocated
        };
        for (slot, is_free) in report.slots.iter_mut().zip(free) {
            if !is_free {
                *slot = unmarked;
            }
        }

        debug!(
            area = %report.area,
            allocated = report.allocated().len(),
            intact = report.is_intact(),
            "inspected slice area"
        );
        Ok(report)
    }

    fn indices(&self, state: SlotState) -> Vec<u64> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == state)
            .map(|(i, _)| i as u64)
            .collect()
    }

    pub fn allocated(&self) -> Vec<u64> {
        self.indices(SlotState::Allocated)
    }

    pub fn free(&self) -> Vec<u64> {
        self.indices(SlotState::Free)
    }

    pub fn unknown(&self) -> Vec<u64> {
        self.indices(SlotState::Unknown)
    }

    pub fn is_intact(&self) -> bool {
        self.corruption.is_none()
    }

    /// The recorded corruption as an error
    pub fn ensure_intact(&self) -> WalkResult<()> {
        match self.corruption {
            None => Ok(()),
            Some(FreeListBreak { index, previous }) => Err(WalkError::FreeListCorrupted {
                area: self.area,
                index,
                previous,
            }),
        }
    }

    /// Data addresses of the allocated slots
    pub fn allocated_slices(&self, geometry: &SliceGeometry) -> WalkResult<Vec<(u64, Address)>> {
        self.allocated()
            .into_iter()
            .map(|i| Ok((i, geometry.slice_address(self.area, i)?)))
            .collect()
    }
}

/// Allocation summary of one area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AreaSummary {
    pub area: Address,
    pub allocated_count: u64,
}

/// Totals over a slice pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlicePoolStats {
    pub pool: Address,
    pub slice_size: u64,
    pub area_size: u64,
    pub slices_per_area: u64,
    pub areas: Vec<AreaSummary>,
    /// Gross is whole areas, net the allocated slices
    pub sizes: PoolSizes,
    pub allocated_slices: u64,
}

/// Reads a `SlicePool` and its areas
pub struct SlicePoolInspector<'a> {
    target: Target<'a>,
    pool: TypedValue,
    geometry: SliceGeometry,
}

impl<'a> SlicePoolInspector<'a> {
    pub fn new(target: Target<'a>, pool: &TypedValue, page_size: u64) -> WalkResult<Self> {
        let pool = target.object(pool)?;
        let geometry = SliceGeometry::from_pool(&target, &pool, page_size)?;
        debug!(pool = %pool.address, ?geometry, "inspecting slice pool");
        Ok(SlicePoolInspector {
            target,
            pool,
            geometry,
        })
    }

    pub fn pool(&self) -> &TypedValue {
        &self.pool
    }

    pub fn geometry(&self) -> &SliceGeometry {
        &self.geometry
    }

    /// The pool's `areas` list
    pub fn areas(&self) -> WalkResult<ListOwners<'a>> {
        let areas = self.target.field(&self.pool, "areas")?;
        IntrusiveList::with_default_element(self.target, &areas, "SliceArea", None)?.iter()
    }

    pub fn inspect(&self, area: &TypedValue) -> WalkResult<AreaReport> {
        AreaReport::inspect(self.target, area, self.geometry.slices_per_area)
    }

    /// One report per area, in list order
    pub fn reports(&self) -> WalkResult<Vec<AreaReport>> {
        self.areas()?
            .map(|area| area.and_then(|a| self.inspect(&a)))
            .collect()
    }

    pub fn stats(&self) -> WalkResult<SlicePoolStats> {
        let mut stats = SlicePoolStats {
            pool: self.pool.address,
            slice_size: self.geometry.slice_size,
            area_size: self.geometry.area_size,
            slices_per_area: self.geometry.slices_per_area,
            areas: Vec::new(),
            sizes: PoolSizes::default(),
            allocated_slices: 0,
        };

        for area in self.areas()? {
            let area = area?;
            let allocated_count = self
                .target
                .read_uint(&self.target.field(&area, "allocated_count")?)?;
            stats.areas.push(AreaSummary {
                area: area.address,
                allocated_count,
            });
            stats.allocated_slices = stats.allocated_slices.saturating_add(allocated_count);
            stats.sizes += PoolSizes {
                gross: self.geometry.area_size,
                net: allocated_count.saturating_mul(self.geometry.slice_size),
            };
        }
        Ok(stats)
    }
}
