//! Container walkers
//!
//! Each walker takes an explicit [`Target`](crate::memory::Target) and
//! yields a lazy sequence of node addresses or owning records. Nothing is
//! cached between steps and nothing is written to the target.

pub mod hashset;
pub mod list;
pub mod pool;
pub mod slice;
pub mod tree;

pub use hashset::{BucketEntry, BucketLayout, HashSetWalker, UnorderedSet};
pub use list::{Direction, HeaderForm, IntrusiveList, ListLinks, ListOwners, ListWalker, Owners};
pub use pool::{
    children, find_pools, pool_allocations, pool_kind, pool_name, pool_refs, pool_sizes,
    pool_stats, recursive_sizes, recycler_stats, PoolAllocation, PoolEntry, PoolKind,
    PoolRefRecord, PoolReport, PoolSizes, PoolStats, PoolTreeWalker, RecyclerStats, RefList,
};
pub use slice::{
    AreaReport, AreaSummary, FreeListBreak, SliceFreeListWalker, SliceGeometry,
    SlicePoolInspector, SlicePoolStats, SlotState, ALLOCATED, DEFAULT_PAGE_SIZE, END_OF_LIST,
};
pub use tree::{IntrusiveSet, TreeLinks, TreeWalker};
