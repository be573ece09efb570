//! Shared fixtures: a layout modelled on a proxy server's containers and a
//! builder for synthetic memory images

#![allow(dead_code)]

use memwalk::{Address, MemoryView, SnapshotMemory, TypeRegistry};

pub const LAYOUT: &str = r#"
pointer_width = 8

[[types]]
name = "ListHook"
size = 16
fields = [
    { name = "next_", offset = 0, type = "ListHook*" },
    { name = "prev_", offset = 8, type = "ListHook*" },
]

[[types]]
name = "SlistHook"
size = 8
fields = [{ name = "next_", offset = 0, type = "SlistHook*" }]

[[types]]
name = "RbHook"
size = 32
fields = [
    { name = "parent_", offset = 0, type = "RbHook*" },
    { name = "left_", offset = 8, type = "RbHook*" },
    { name = "right_", offset = 16, type = "RbHook*" },
    { name = "color_", offset = 24, type = "u64" },
]

[[types]]
name = "ListRoot"
size = 24
fields = [
    { name = "m_header", offset = 0, type = "ListHook" },
    { name = "size_", offset = 16, type = "u64" },
]

[[types]]
name = "ListData"
size = 24
fields = [{ name = "root_plus_size_", offset = 0, type = "ListRoot" }]

[[types]]
name = "ConnectionList"
size = 24
element = "Connection"
hook = "siblings"
fields = [{ name = "data_", offset = 0, type = "ListData" }]

[[types]]
name = "SetHolder"
size = 32
fields = [{ name = "root", offset = 0, type = "RbHook" }]

[[types]]
name = "ConnectionSet"
size = 40
element = "Connection"
hook = "by_id"
fields = [
    { name = "holder", offset = 0, type = "SetHolder" },
    { name = "size", offset = 32, type = "u64" },
]

[[types]]
name = "BucketRoot"
size = 8
fields = [{ name = "header_holder_", offset = 0, type = "SlistHook" }]

[[types]]
name = "BucketData"
size = 8
fields = [{ name = "root_plus_size_", offset = 0, type = "BucketRoot" }]

[[types]]
name = "Bucket"
size = 8
fields = [{ name = "data_", offset = 0, type = "BucketData" }]

[[types]]
name = "BucketTraits"
size = 16
fields = [
    { name = "buckets_", offset = 0, type = "Bucket*" },
    { name = "buckets_len_", offset = 8, type = "u64" },
]

[[types]]
name = "MapData"
size = 16
fields = [{ name = "bucket_traits_", offset = 0, type = "BucketTraits" }]

[[types]]
name = "ConnectionMap"
size = 24
element = "Connection"
hook = "bucket_hook"
fields = [
    { name = "data", offset = 0, type = "MapData" },
    { name = "size", offset = 16, type = "u64" },
]

[[types]]
name = "Connection"
size = 80
fields = [
    { name = "id", offset = 0, type = "u64" },
    { name = "siblings", offset = 8, type = "ListHook" },
    { name = "name", offset = 24, type = "char*" },
    { name = "by_id", offset = 32, type = "RbHook" },
    { name = "bucket_hook", offset = 64, type = "SlistHook" },
]

[[types]]
name = "PoolList"
size = 16
fields = [{ name = "head", offset = 0, type = "ListHook" }]

[[types]]
name = "LinearPoolArea"
size = 16
fields = [
    { name = "prev", offset = 0, type = "LinearPoolArea*" },
    { name = "size", offset = 8, type = "u64" },
]

[[types]]
name = "PoolArea"
size = 8
fields = [{ name = "linear", offset = 0, type = "LinearPoolArea*" }]

[[types]]
name = "pool"
size = 112
fields = [
    { name = "siblings", offset = 0, type = "ListHook" },
    { name = "children", offset = 16, type = "PoolList" },
    { name = "name", offset = 32, type = "char*" },
    { name = "type", offset = 40, type = "u8" },
    { name = "netto_size", offset = 48, type = "u64" },
    { name = "current_area", offset = 56, type = "PoolArea" },
    { name = "refs", offset = 64, type = "PoolList" },
    { name = "unrefs", offset = 80, type = "PoolList" },
    { name = "allocations", offset = 96, type = "PoolList" },
]

[[types]]
name = "PoolRef"
size = 32
fields = [
    { name = "siblings", offset = 0, type = "ListHook" },
    { name = "count", offset = 16, type = "u32" },
    { name = "line", offset = 20, type = "u32" },
    { name = "file", offset = 24, type = "char*" },
]

[[types]]
name = "PoolAllocationInfo"
size = 48
fields = [
    { name = "siblings", offset = 0, type = "ListHook" },
    { name = "type", offset = 16, type = "char*" },
    { name = "file", offset = 24, type = "char*" },
    { name = "line", offset = 32, type = "u32" },
    { name = "size", offset = 40, type = "u64" },
]

[[types]]
name = "RecyclerPools"
size = 16
fields = [{ name = "list", offset = 0, type = "PoolList" }]

[[types]]
name = "PoolRecycler"
size = 32
fields = [
    { name = "pools", offset = 0, type = "RecyclerPools" },
    { name = "linear_areas", offset = 16, type = "LinearPoolArea*" },
    { name = "num_linear_areas", offset = 24, type = "u32" },
]

[[types]]
name = "Slot"
size = 4
fields = [{ name = "next", offset = 0, type = "u32" }]

[[types]]
name = "SliceArea"
size = 32
fields = [
    { name = "siblings", offset = 0, type = "ListHook" },
    { name = "allocated_count", offset = 16, type = "u32" },
    { name = "free_head", offset = 20, type = "u32" },
    { name = "slices", offset = 24, type = "Slot[1]" },
]

[[types]]
name = "AreaList"
size = 16
element = "SliceArea"
fields = [{ name = "head", offset = 0, type = "ListHook" }]

[[types]]
name = "SlicePool"
size = 64
fields = [
    { name = "slice_size", offset = 0, type = "u64" },
    { name = "area_size", offset = 8, type = "u64" },
    { name = "header_pages", offset = 16, type = "u64" },
    { name = "slices_per_area", offset = 24, type = "u64" },
    { name = "slices_per_page", offset = 32, type = "u64" },
    { name = "pages_per_slice", offset = 40, type = "u64" },
    { name = "areas", offset = 48, type = "AreaList" },
]
"#;

pub const CONNECTION_SIZE: u64 = 80;
pub const SIBLINGS: u64 = 8;
pub const BY_ID: u64 = 32;
pub const BUCKET_HOOK: u64 = 64;

pub fn registry() -> TypeRegistry {
    TypeRegistry::from_toml_str(LAYOUT).unwrap()
}

/// Bump-allocating builder for a synthetic image
pub struct Image {
    pub mem: SnapshotMemory,
    next: u64,
}

impl Image {
    pub fn new() -> Self {
        Image {
            mem: SnapshotMemory::new(),
            next: 0x10000,
        }
    }

    /// Maps a fresh zeroed region with a gap after it
    pub fn alloc(&mut self, size: u64) -> u64 {
        let at = self.next;
        self.mem.map_zeroed(Address::new(at), size as usize).unwrap();
        self.next += (size + 0x10f) & !0xff;
        at
    }

    pub fn u64(&mut self, at: u64, value: u64) {
        self.mem.write_u64(Address::new(at), value).unwrap();
    }

    pub fn read_u64(&self, at: u64) -> u64 {
        self.mem.read_u64(Address::new(at)).unwrap()
    }

    pub fn u32(&mut self, at: u64, value: u32) {
        self.mem.write_u32(Address::new(at), value).unwrap();
    }

    pub fn u8(&mut self, at: u64, value: u8) {
        self.mem.write_bytes(Address::new(at), &[value]).unwrap();
    }

    pub fn string(&mut self, s: &str) -> u64 {
        let at = self.alloc(s.len() as u64 + 1);
        self.mem.write_bytes(Address::new(at), s.as_bytes()).unwrap();
        at
    }

    /// Doubly-linked ring `header -> nodes... -> header`
    pub fn ring(&mut self, header: u64, nodes: &[u64]) {
        let mut ring = vec![header];
        ring.extend_from_slice(nodes);
        for (i, &node) in ring.iter().enumerate() {
            self.u64(node, ring[(i + 1) % ring.len()]);
            self.u64(node + 8, ring[(i + ring.len() - 1) % ring.len()]);
        }
    }

    /// Singly-linked ring `header -> nodes... -> header`
    pub fn slist_ring(&mut self, header: u64, nodes: &[u64]) {
        let mut previous = header;
        for &node in nodes {
            self.u64(previous, node);
            previous = node;
        }
        self.u64(previous, header);
    }

    pub fn connection(&mut self, id: u64) -> u64 {
        let connection = self.alloc(CONNECTION_SIZE);
        self.u64(connection, id);
        connection
    }

    /// A `ConnectionList` holding one connection per id, in order
    pub fn connection_list(&mut self, ids: &[u64]) -> (u64, Vec<u64>) {
        let list = self.alloc(24);
        let owners: Vec<u64> = ids.iter().map(|&id| self.connection(id)).collect();
        let hooks: Vec<u64> = owners.iter().map(|o| o + SIBLINGS).collect();
        self.ring(list, &hooks);
        self.u64(list + 16, ids.len() as u64);
        (list, owners)
    }

    /// A `ConnectionSet` built by unbalanced binary-search-tree insertion
    /// of `ids` in the given order
    pub fn connection_set(&mut self, ids: &[u64]) -> u64 {
        let set = self.alloc(40);
        let header = set;

        struct Node {
            id: u64,
            hook: u64,
            parent: Option<usize>,
            left: Option<usize>,
            right: Option<usize>,
        }
        let mut nodes: Vec<Node> = Vec::new();
        for &id in ids {
            let hook = self.connection(id) + BY_ID;
            let index = nodes.len();
            let mut parent = None;
            if !nodes.is_empty() {
                let mut at = 0;
                loop {
                    let slot = if id < nodes[at].id {
                        &mut nodes[at].left
                    } else {
                        &mut nodes[at].right
                    };
                    match *slot {
                        Some(child) => at = child,
                        None => {
                            *slot = Some(index);
                            parent = Some(at);
                            break;
                        }
                    }
                }
            }
            nodes.push(Node {
                id,
                hook,
                parent,
                left: None,
                right: None,
            });
        }

        let addr = |i: Option<usize>, nodes: &Vec<Node>| i.map_or(0, |i| nodes[i].hook);
        for node in &nodes {
            let parent = node.parent.map_or(header, |p| nodes[p].hook);
            let (left, right) = (addr(node.left, &nodes), addr(node.right, &nodes));
            self.u64(node.hook, parent);
            self.u64(node.hook + 8, left);
            self.u64(node.hook + 16, right);
        }

        if nodes.is_empty() {
            self.u64(header, 0);
            self.u64(header + 8, header);
            self.u64(header + 16, header);
        } else {
            let min = nodes.iter().min_by_key(|n| n.id).map_or(0, |n| n.hook);
            let max = nodes.iter().max_by_key(|n| n.id).map_or(0, |n| n.hook);
            self.u64(header, nodes[0].hook);
            self.u64(header + 8, min);
            self.u64(header + 16, max);
        }
        self.u64(set + 32, ids.len() as u64);
        set
    }

    /// A `ConnectionMap` whose bucket `i` holds `buckets[i]`
    pub fn connection_map(&mut self, buckets: &[Vec<u64>]) -> u64 {
        let map = self.alloc(24);
        let array = self.alloc(8 * buckets.len().max(1) as u64);
        self.u64(map, array);
        self.u64(map + 8, buckets.len() as u64);

        let mut total = 0;
        for (b, ids) in buckets.iter().enumerate() {
            let hooks: Vec<u64> = ids
                .iter()
                .map(|&id| self.connection(id) + BUCKET_HOOK)
                .collect();
            self.slist_ring(array + 8 * b as u64, &hooks);
            total += ids.len();
        }
        self.u64(map + 16, total as u64);
        map
    }

    /// A pool record with empty lists
    pub fn pool(&mut self, name: &str, kind: u8, net: u64) -> u64 {
        let pool = self.alloc(112);
        let name = self.string(name);
        self.u64(pool + 32, name);
        self.u8(pool + 40, kind);
        self.u64(pool + 48, net);
        for list in [16, 64, 80, 96] {
            self.ring(pool + list, &[]);
        }
        pool
    }

    pub fn children(&mut self, pool: u64, children: &[u64]) {
        self.ring(pool + 16, children);
    }

    /// A `prev`-linked chain of linear areas, newest last; returns the newest
    pub fn linear_chain(&mut self, sizes: &[u64]) -> u64 {
        let mut prev = 0;
        for &size in sizes {
            let area = self.alloc(16);
            self.u64(area, prev);
            self.u64(area + 8, size);
            prev = area;
        }
        prev
    }

    pub fn linear_areas(&mut self, pool: u64, sizes: &[u64]) {
        let newest = self.linear_chain(sizes);
        self.u64(pool + 56, newest);
    }

    /// A `SlicePool` with one area per `(allocated_count, free list)` entry
    pub fn slice_pool(&mut self, geometry: [u64; 6], areas: &[(u32, Vec<u32>)]) -> (u64, Vec<u64>) {
        use memwalk::walk::{ALLOCATED, END_OF_LIST};

        let pool = self.alloc(64);
        for (i, value) in geometry.iter().enumerate() {
            self.u64(pool + 8 * i as u64, *value);
        }
        let capacity = geometry[3];

        let mut addresses = Vec::new();
        for (allocated_count, free) in areas {
            let area = self.alloc(24 + 4 * capacity);
            for i in 0..capacity {
                self.u32(area + 24 + 4 * i, ALLOCATED);
            }
            self.u32(area + 16, *allocated_count);
            self.u32(area + 20, free.first().copied().unwrap_or(END_OF_LIST));
            for (k, &i) in free.iter().enumerate() {
                let next = free.get(k + 1).copied().unwrap_or(END_OF_LIST);
                if u64::from(i) < capacity {
                    self.u32(area + 24 + 4 * u64::from(i), next);
                }
            }
            addresses.push(area);
        }
        self.ring(pool + 48, &addresses);
        (pool, addresses)
    }
}
