//! Intrusive red-black tree sets
//!
//! Boost's rbtree keeps a header node whose `parent_` is the root, `left_`
//! the minimum and `right_` the maximum; the root's `parent_` points back at
//! the header. In-order traversal needs nothing but those links: no
//! recursion, no stack, and no writes to the tree.

use super::list::Owners;
use crate::core::types::{
    Address, HookOffset, TypeDescriptor, TypedValue, WalkContext, WalkError, WalkResult,
};
use crate::memory::Target;
use std::sync::Arc;
use tracing::{debug, trace};

/// Byte offsets of the links inside a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLinks {
    pub parent: u64,
    pub left: u64,
    pub right: u64,
}

impl TreeLinks {
    pub const fn new(parent: u64, left: u64, right: u64) -> Self {
        TreeLinks {
            parent,
            left,
            right,
        }
    }

    /// Finds `parent_`/`left_`/`right_` (or the unsuffixed names)
    pub fn probe(node: &TypeDescriptor) -> WalkResult<Self> {
        for suffix in ["_", ""] {
            let field = |name: &str| node.field(&format!("{}{}", name, suffix)).map(|f| f.offset);
            if let (Some(parent), Some(left), Some(right)) =
                (field("parent"), field("left"), field("right"))
            {
                return Ok(TreeLinks::new(parent, left, right));
            }
        }
        Err(WalkError::type_mismatch(
            "tree node",
            "'parent_', 'left_' and 'right_' links",
            &node.name,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unstarted,
    At(Address),
    Finished,
}

/// Lazy in-order walk over the node addresses of one tree
pub struct TreeWalker<'a> {
    target: Target<'a>,
    header: Address,
    links: TreeLinks,
    state: State,
    visited: usize,
}

impl<'a> TreeWalker<'a> {
    pub fn new(target: Target<'a>, header: Address, links: TreeLinks) -> Self {
        TreeWalker {
            target,
            header,
            links,
            state: State::Unstarted,
            visited: 0,
        }
    }

    pub fn header(&self) -> Address {
        self.header
    }

    fn link(&self, node: Address, offset: u64, name: &str) -> WalkResult<Address> {
        self.target
            .read_address(node.add(offset))
            .walk_context(|| format!("reading {} of tree node {}", name, node))
    }

    fn left(&self, node: Address) -> WalkResult<Address> {
        self.link(node, self.links.left, "left_")
    }

    fn right(&self, node: Address) -> WalkResult<Address> {
        self.link(node, self.links.right, "right_")
    }

    fn parent(&self, node: Address) -> WalkResult<Address> {
        self.link(node, self.links.parent, "parent_")
    }

    /// Leftmost descendant of `node`
    fn minimum(&self, mut node: Address) -> WalkResult<Address> {
        loop {
            let left = self.left(node)?;
            if left.is_null() {
                return Ok(node);
            }
            node = left;
        }
    }

    /// In-order successor; the header once `node` is the maximum
    fn successor(&self, mut node: Address) -> WalkResult<Address> {
        let right = self.right(node)?;
        if !right.is_null() {
            return self.minimum(right);
        }

        let mut parent = self.parent(node)?;
        while node == self.right(parent)? {
            node = parent;
            parent = self.parent(node)?;
        }

        // climbing out of the root lands on the header, whose right_ may be
        // the root itself
        if self.right(node)? == parent {
            Ok(node)
        } else {
            Ok(parent)
        }
    }

    fn first(&self) -> WalkResult<Address> {
        let leftmost = self.left(self.header)?;
        if leftmost == self.header || leftmost.is_null() {
            return Ok(self.header);
        }
        self.minimum(leftmost)
    }
}

impl Iterator for TreeWalker<'_> {
    type Item = WalkResult<Address>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = match self.state {
            State::Finished => return None,
            State::Unstarted => self.first(),
            State::At(node) => self.successor(node),
        };

        match step {
            Ok(node) if node == self.header => {
                self.state = State::Finished;
                debug!(header = %self.header, nodes = self.visited, "tree walk complete");
                None
            }
            Ok(node) => {
                trace!(%node, "tree node");
                self.state = State::At(node);
                self.visited += 1;
                Some(Ok(node))
            }
            Err(err) => {
                self.state = State::Finished;
                Some(Err(err))
            }
        }
    }
}

/// Owners of a set in order
pub type SetOwners<'a> = Owners<TreeWalker<'a>>;

/// A typed intrusive ordered set
#[derive(Clone)]
pub struct IntrusiveSet<'a> {
    target: Target<'a>,
    header: TypedValue,
    links: TreeLinks,
    element: Arc<TypeDescriptor>,
    hook: HookOffset,
}

impl<'a> IntrusiveSet<'a> {
    /// Inspects a set value; the header lives at `holder.root`, or the value
    /// is a header node itself
    pub fn from_value(
        target: Target<'a>,
        value: &TypedValue,
        member_hook: Option<&str>,
    ) -> WalkResult<Self> {
        let container = target.object_type(value)?;
        let header = if container.has_field("holder") {
            let holder = target.field(value, "holder")?;
            target.field(&holder, "root")?
        } else if TreeLinks::probe(&container).is_ok() {
            target.object(value)?
        } else {
            return Err(WalkError::type_mismatch(
                format!("set header of {}", value),
                "'holder.root' or a tree node",
                &container.name,
            ));
        };

        let node_type = target.object_type(&header)?;
        let links = TreeLinks::probe(&node_type)?;
        let element = match &container.element {
            Some(name) => target.lookup_type(name)?,
            None => node_type,
        };
        let hook = HookOffset::for_member(&element, member_hook.or(container.hook.as_deref()))?;

        debug!(container = %container.name, element = %element.name, hook = hook.bytes(), "inspecting set");

        Ok(IntrusiveSet {
            target,
            header,
            links,
            element,
            hook,
        })
    }

    pub fn header(&self) -> &TypedValue {
        &self.header
    }

    pub fn links(&self) -> TreeLinks {
        self.links
    }

    pub fn element_type(&self) -> &Arc<TypeDescriptor> {
        &self.element
    }

    pub fn hook(&self) -> HookOffset {
        self.hook
    }

    pub fn nodes(&self) -> TreeWalker<'a> {
        TreeWalker::new(self.target, self.header.address, self.links)
    }

    /// Owning records in set order
    pub fn iter(&self) -> SetOwners<'a> {
        Owners::new(self.nodes(), Arc::clone(&self.element), self.hook)
    }

    pub fn collect(&self) -> WalkResult<Vec<TypedValue>> {
        self.iter().collect()
    }
}
