//! Intrusive unordered sets
//!
//! A bucket array of singly-linked circular lists. Each bucket's header is
//! its own sentinel; the set is the concatenation of the buckets in index
//! order.

use super::list::{Direction, ListLinks, ListWalker, Owners};
use crate::core::types::{
    Address, HookOffset, TypeDescriptor, TypedValue, WalkContext, WalkError, WalkResult,
};
use crate::memory::Target;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace};

/// Where the buckets are and how to step through them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLayout {
    /// Address of `buckets[0]`
    pub base: Address,
    pub count: u64,
    /// Size of one bucket
    pub stride: u64,
    /// Offset of the header node inside a bucket
    pub header_offset: u64,
    /// Offset of `next` inside a node
    pub next_offset: u64,
}

impl BucketLayout {
    pub fn header(&self, bucket: u64) -> Address {
        self.base
            .add(bucket.wrapping_mul(self.stride))
            .add(self.header_offset)
    }
}

/// One node together with the bucket it was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketEntry {
    pub bucket: u64,
    pub node: Address,
}

/// Lazy walk over all buckets, one singly-linked [`ListWalker`] per bucket
pub struct HashSetWalker<'a> {
    target: Target<'a>,
    layout: BucketLayout,
    bucket: u64,
    ring: Option<ListWalker<'a>>,
    visited: usize,
    done: bool,
}

impl<'a> HashSetWalker<'a> {
    pub fn new(target: Target<'a>, layout: BucketLayout) -> Self {
        HashSetWalker {
            target,
            layout,
            bucket: 0,
            ring: None,
            visited: 0,
            done: false,
        }
    }

    pub fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    fn fail(&mut self, err: WalkError) -> Option<WalkResult<BucketEntry>> {
        self.done = true;
        let bucket = self.bucket;
        Some(Err(err).walk_context(|| format!("walking bucket {}", bucket)))
    }
}

impl Iterator for HashSetWalker<'_> {
    type Item = WalkResult<BucketEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        while self.bucket < self.layout.count {
            if self.ring.is_none() {
                let header = self.layout.header(self.bucket);
                let links = ListLinks::singly(self.layout.next_offset);
                match ListWalker::new(self.target, header, links, Direction::Forward) {
                    Ok(ring) => self.ring = Some(ring),
                    Err(err) => return self.fail(err),
                }
            }

            match self.ring.as_mut().and_then(|ring| ring.next()) {
                Some(Ok(node)) => {
                    trace!(bucket = self.bucket, %node, "hash set node");
                    self.visited += 1;
                    return Some(Ok(BucketEntry {
                        bucket: self.bucket,
                        node,
                    }));
                }
                Some(Err(err)) => return self.fail(err),
                None => {
                    self.bucket += 1;
                    self.ring = None;
                }
            }
        }

        self.done = true;
        debug!(
            buckets = self.layout.count,
            nodes = self.visited,
            "hash set walk complete"
        );
        None
    }
}

/// Node addresses of a hash set without bucket numbers
pub struct BucketNodes<'a>(HashSetWalker<'a>);

impl Iterator for BucketNodes<'_> {
    type Item = WalkResult<Address>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|entry| entry.map(|e| e.node))
    }
}

/// Owners of a hash set in bucket order
pub type HashSetOwners<'a> = Owners<BucketNodes<'a>>;

/// A typed Boost intrusive unordered set
#[derive(Clone)]
pub struct UnorderedSet<'a> {
    target: Target<'a>,
    layout: BucketLayout,
    element: Arc<TypeDescriptor>,
    hook: HookOffset,
}

impl<'a> UnorderedSet<'a> {
    /// Reads `data.bucket_traits_.{buckets_, buckets_len_}` of a set value
    pub fn from_value(
        target: Target<'a>,
        value: &TypedValue,
        member_hook: Option<&str>,
    ) -> WalkResult<Self> {
        let container = target.object_type(value)?;
        let traits = target
            .field(value, "data")
            .and_then(|data| target.field(&data, "bucket_traits_"))
            .walk_context(|| format!("locating buckets of {}", value))?;
        let buckets = target.field(&traits, "buckets_")?;
        let count = target.read_uint(&target.field(&traits, "buckets_len_")?)?;
        let base = target.pointer_value(&buckets)?;

        let bucket_type = target.object_type(&buckets)?;
        let header = Self::header_at(&target, &bucket_type)?;
        let header_type = target.object_type(&header)?;
        let links = ListLinks::probe(&header_type)?;

        let element = match &container.element {
            Some(name) => target.lookup_type(name)?,
            None => header_type,
        };
        let hook = HookOffset::for_member(&element, member_hook.or(container.hook.as_deref()))?;

        let layout = BucketLayout {
            base,
            count,
            stride: bucket_type.size,
            header_offset: header.address.as_u64(),
            next_offset: links.next,
        };
        debug!(container = %container.name, ?layout, element = %element.name, "inspecting unordered set");

        Ok(UnorderedSet {
            target,
            layout,
            element,
            hook,
        })
    }

    /// Header node of a bucket placed at address zero, so its address is
    /// its offset
    fn header_at(target: &Target<'_>, bucket_type: &Arc<TypeDescriptor>) -> WalkResult<TypedValue> {
        let mut header = TypedValue::new(Address::null(), Arc::clone(bucket_type));
        if bucket_type.has_field("data_") {
            for name in ["data_", "root_plus_size_", "header_holder_"] {
                header = target.field(&header, name)?;
            }
        } else if ListLinks::probe(bucket_type).is_err() {
            return Err(WalkError::type_mismatch(
                "hash set bucket",
                "'data_.root_plus_size_.header_holder_' or a list node",
                &bucket_type.name,
            ));
        }
        Ok(header)
    }

    /// Walks only the first `count` buckets, for sets whose length field
    /// cannot be trusted
    pub fn with_bucket_count(mut self, count: u64) -> Self {
        self.layout.count = count;
        self
    }

    pub fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    pub fn element_type(&self) -> &Arc<TypeDescriptor> {
        &self.element
    }

    pub fn hook(&self) -> HookOffset {
        self.hook
    }

    pub fn entries(&self) -> HashSetWalker<'a> {
        HashSetWalker::new(self.target, self.layout)
    }

    /// Owning records, bucket by bucket
    pub fn iter(&self) -> HashSetOwners<'a> {
        Owners::new(
            BucketNodes(self.entries()),
            Arc::clone(&self.element),
            self.hook,
        )
    }

    pub fn collect(&self) -> WalkResult<Vec<TypedValue>> {
        self.iter().collect()
    }
}
