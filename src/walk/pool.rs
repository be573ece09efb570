//! Allocator pool trees
//!
//! Every pool keeps its child pools in an intrusive `children` list of the
//! same record type, so the pool hierarchy is walked with the list walker
//! one level at a time. Linear pools additionally chain their backing
//! areas through `current_area.linear` → `prev`.

use super::list::{Direction, IntrusiveList, ListOwners};
use super::slice::{SlicePoolInspector, SlicePoolStats};
use crate::core::types::{Address, TypedValue, WalkContext, WalkError, WalkResult};
use crate::memory::Target;
use serde::Serialize;
use std::fmt;
use std::ops::{Add, AddAssign};
use tracing::debug;

/// Pool implementation, from the pool's `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    Dummy,
    Libc,
    Linear,
}

impl PoolKind {
    pub fn from_raw(raw: i64) -> WalkResult<Self> {
        match raw {
            0 => Ok(PoolKind::Dummy),
            1 => Ok(PoolKind::Libc),
            2 => Ok(PoolKind::Linear),
            other => Err(WalkError::type_mismatch(
                "pool type",
                "0 (dummy), 1 (libc) or 2 (linear)",
                other.to_string(),
            )),
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolKind::Dummy => "dummy",
            PoolKind::Libc => "libc",
            PoolKind::Linear => "linear",
        };
        f.write_str(name)
    }
}

/// Reserved (gross) and requested (net) bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolSizes {
    pub gross: u64,
    pub net: u64,
}

impl Add for PoolSizes {
    type Output = PoolSizes;

    fn add(self, other: PoolSizes) -> PoolSizes {
        PoolSizes {
            gross: self.gross.saturating_add(other.gross),
            net: self.net.saturating_add(other.net),
        }
    }
}

impl AddAssign for PoolSizes {
    fn add_assign(&mut self, other: PoolSizes) {
        *self = *self + other;
    }
}

pub fn pool_kind(target: &Target<'_>, pool: &TypedValue) -> WalkResult<PoolKind> {
    let raw = target.read_int(&target.field(pool, "type")?)?;
    PoolKind::from_raw(raw)
}

/// The pool's `name`, empty when unset
pub fn pool_name(target: &Target<'_>, pool: &TypedValue) -> WalkResult<String> {
    let name = target.field(pool, "name")?;
    Ok(target.read_c_string(&name)?.unwrap_or_default())
}

/// Follows a `prev`-linked chain of areas from a pointer value, returning
/// the number of areas and the sum of their `size`, saturating like
/// [`PoolSizes`]
fn area_chain(target: &Target<'_>, first: &TypedValue) -> WalkResult<(u64, u64)> {
    let mut count = 0;
    let mut total = 0;
    let mut area = first.clone();
    while !target.pointer_value(&area)?.is_null() {
        count += 1;
        total = target
            .read_uint(&target.field(&area, "size")?)?
            .saturating_add(total);
        area = target.field(&area, "prev")?;
    }
    Ok((count, total))
}

/// Gross and net size of one pool.
///
/// Only linear pools have backing areas; their gross size is the sum of the
/// area sizes. For every other kind gross equals net.
pub fn pool_sizes(target: &Target<'_>, pool: &TypedValue) -> WalkResult<PoolSizes> {
    let net = target.read_uint(&target.field(pool, "netto_size")?)?;
    let gross = match pool_kind(target, pool)? {
        PoolKind::Linear => {
            let first = target
                .field(pool, "current_area")
                .and_then(|area| target.field(&area, "linear"))?;
            area_chain(target, &first)
                .walk_context(|| format!("summing linear areas of pool {}", pool.address))?
                .1
        }
        _ => net,
    };
    Ok(PoolSizes { gross, net })
}

/// Sizes of a pool plus all its descendants
pub fn recursive_sizes(target: &Target<'_>, pool: &TypedValue) -> WalkResult<PoolSizes> {
    let mut sizes = pool_sizes(target, pool)?;
    for child in children(*target, pool)?.iter()? {
        sizes += recursive_sizes(target, &child?)?;
    }
    Ok(sizes)
}

/// The `children` list of a pool
pub fn children<'a>(target: Target<'a>, pool: &TypedValue) -> WalkResult<IntrusiveList<'a>> {
    let pool = target.object(pool)?;
    let list = target.field(&pool, "children")?;
    IntrusiveList::with_default_element(target, &list, &pool.ty.name, None)
}

/// A pool and its distance from the walk's root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub depth: usize,
    pub pool: TypedValue,
}

/// Depth-first pre-order walk over a pool and its descendants
pub struct PoolTreeWalker<'a> {
    target: Target<'a>,
    root: Option<TypedValue>,
    stack: Vec<ListOwners<'a>>,
    done: bool,
}

impl<'a> PoolTreeWalker<'a> {
    pub fn new(target: Target<'a>, pool: &TypedValue) -> WalkResult<Self> {
        Ok(PoolTreeWalker {
            target,
            root: Some(target.object(pool)?),
            stack: Vec::new(),
            done: false,
        })
    }

    /// Next pool from the innermost unfinished children list
    fn next_child(&mut self) -> Option<WalkResult<TypedValue>> {
        loop {
            let level = self.stack.last_mut()?;
            match level.next() {
                Some(child) => return Some(child),
                None => {
                    self.stack.pop();
                }
            }
        }
    }

    fn fail(&mut self, err: WalkError) -> Option<WalkResult<PoolEntry>> {
        self.done = true;
        Some(Err(err))
    }
}

impl Iterator for PoolTreeWalker<'_> {
    type Item = WalkResult<PoolEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let pool = match self.root.take() {
            Some(root) => root,
            None => match self.next_child() {
                Some(Ok(pool)) => pool,
                Some(Err(err)) => return self.fail(err),
                None => {
                    self.done = true;
                    return None;
                }
            },
        };
        // children of the list at stack[n] sit at depth n + 1
        let depth = self.stack.len();

        match children(self.target, &pool).and_then(|list| list.iter()) {
            Ok(level) => self.stack.push(level),
            Err(err) => return self.fail(err),
        }
        Some(Ok(PoolEntry { depth, pool }))
    }
}

/// Every pool below (and including) `root` named `name`
pub fn find_pools(target: Target<'_>, root: &TypedValue, name: &str) -> WalkResult<Vec<TypedValue>> {
    let mut found = Vec::new();
    for entry in PoolTreeWalker::new(target, root)? {
        let entry = entry?;
        if pool_name(&target, &entry.pool)? == name {
            found.push(entry.pool);
        }
    }
    debug!(name, matches = found.len(), "searched pool tree");
    Ok(found)
}

/// Which reference log of a pool to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefList {
    Refs,
    Unrefs,
}

impl RefList {
    pub fn field_name(&self) -> &'static str {
        match self {
            RefList::Refs => "refs",
            RefList::Unrefs => "unrefs",
        }
    }
}

/// One call site in a pool's reference log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolRefRecord {
    pub address: Address,
    pub count: u64,
    pub file: Option<String>,
    pub line: u64,
}

fn source_path(path: String) -> String {
    path.replace("../", "")
}

/// A pool's reference log, newest first
pub fn pool_refs(target: Target<'_>, pool: &TypedValue, which: RefList) -> WalkResult<Vec<PoolRefRecord>> {
    let list = target.field(pool, which.field_name())?;
    let list = IntrusiveList::with_default_element(target, &list, "PoolRef", None)?;

    list.owners(Direction::Reverse)?
        .map(|record| {
            let record = record?;
            Ok(PoolRefRecord {
                address: record.address,
                count: target.read_uint(&target.field(&record, "count")?)?,
                file: target
                    .read_c_string(&target.field(&record, "file")?)?
                    .map(source_path),
                line: target.read_uint(&target.field(&record, "line")?)?,
            })
        })
        .collect()
}

/// One live allocation of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolAllocation {
    /// The bookkeeping record
    pub info: Address,
    /// The allocation itself, right behind the record
    pub data: Address,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// `file:line`, when the build records it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A pool's allocation records, newest first
pub fn pool_allocations(target: Target<'_>, pool: &TypedValue) -> WalkResult<Vec<PoolAllocation>> {
    let list = target.field(pool, "allocations")?;
    let list =
        IntrusiveList::with_default_element(target, &list, "PoolAllocationInfo", Some("siblings"))?;
    let record_size = list.element_type().size;

    list.owners(Direction::Reverse)?
        .map(|info| {
            let info = info?;
            let type_name = if target.has_field(&info, "type") {
                target.read_c_string(&target.field(&info, "type")?)?
            } else {
                None
            };
            let location = if target.has_field(&info, "file") {
                let file = target
                    .read_c_string(&target.field(&info, "file")?)?
                    .map(source_path)
                    .unwrap_or_default();
                let line = target.read_uint(&target.field(&info, "line")?)?;
                Some(format!("{}:{}", file, line))
            } else {
                None
            };

            Ok(PoolAllocation {
                info: info.address,
                data: info.address.add(record_size),
                size: target.read_uint(&target.field(&info, "size")?)?,
                type_name,
                location,
            })
        })
        .collect()
}

/// What the pool recycler is holding on to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecyclerStats {
    pub pools: u64,
    /// Areas found by walking the chain
    pub linear_areas: u64,
    /// The recycler's own `num_linear_areas` counter
    pub declared_linear_areas: u64,
    pub linear_area_total_size: u64,
}

pub fn recycler_stats(target: Target<'_>, recycler: &TypedValue) -> WalkResult<RecyclerStats> {
    let pools = target
        .field(recycler, "pools")
        .and_then(|pools| target.field(&pools, "list"))?;
    let pools = IntrusiveList::from_value(target, &pools, None)?
        .iter()?
        .try_fold(0u64, |n, pool| pool.map(|_| n + 1))?;

    let first = target.field(recycler, "linear_areas")?;
    let (linear_areas, linear_area_total_size) = area_chain(&target, &first)
        .walk_context(|| format!("walking linear areas of recycler {}", recycler.address))?;
    let declared_linear_areas = target.read_uint(&target.field(recycler, "num_linear_areas")?)?;

    Ok(RecyclerStats {
        pools,
        linear_areas,
        declared_linear_areas,
        linear_area_total_size,
    })
}

/// Summary of one general pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolReport {
    pub address: Address,
    pub name: String,
    pub kind: PoolKind,
    pub sizes: PoolSizes,
    pub recursive_sizes: PoolSizes,
}

/// Statistics for either pool family
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum PoolStats {
    Pool(PoolReport),
    Slice(SlicePoolStats),
}

/// Dispatches on the value's type: `pool` or `SlicePool`
pub fn pool_stats(target: Target<'_>, value: &TypedValue, page_size: u64) -> WalkResult<PoolStats> {
    let object = target.object_type(value)?;
    match object.name.as_str() {
        "pool" => {
            let pool = target.object(value)?;
            Ok(PoolStats::Pool(PoolReport {
                address: pool.address,
                name: pool_name(&target, &pool)?,
                kind: pool_kind(&target, &pool)?,
                sizes: pool_sizes(&target, &pool)?,
                recursive_sizes: recursive_sizes(&target, &pool)?,
            }))
        }
        "SlicePool" => {
            let inspector = SlicePoolInspector::new(target, value, page_size)?;
            Ok(PoolStats::Slice(inspector.stats()?))
        }
        other => Err(WalkError::type_mismatch(
            format!("pool statistics of {}", value),
            "pool or SlicePool",
            other,
        )),
    }
}
