//! Circular intrusive lists
//!
//! A list is a ring of link nodes closed by a header sentinel that is not
//! an element. Walking starts at the header's `next` (or `prev`) and stops
//! when the ring comes back to the header. A ring that never returns to its
//! header is not detected and the walk does not terminate.

use crate::core::types::{
    Address, HookOffset, TypeDescriptor, TypedValue, WalkContext, WalkError, WalkResult,
};
use crate::memory::Target;
use std::sync::Arc;
use tracing::{debug, trace};

/// Walk order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Follow `next`
    #[default]
    Forward,
    /// Follow `prev`
    Reverse,
}

/// Byte offsets of the link fields inside a list node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListLinks {
    pub next: u64,
    /// `None` for singly-linked nodes
    pub prev: Option<u64>,
}

impl ListLinks {
    pub const fn doubly(next: u64, prev: u64) -> Self {
        ListLinks {
            next,
            prev: Some(prev),
        }
    }

    pub const fn singly(next: u64) -> Self {
        ListLinks { next, prev: None }
    }

    /// Finds the link fields of a node type, trying Boost's `next_`/`prev_`
    /// naming before plain `next`/`prev`
    pub fn probe(node: &TypeDescriptor) -> WalkResult<Self> {
        for (next, prev) in [("next_", "prev_"), ("next", "prev")] {
            if let Some(next) = node.field(next) {
                return Ok(ListLinks {
                    next: next.offset,
                    prev: node.field(prev).map(|f| f.offset),
                });
            }
        }
        Err(WalkError::type_mismatch(
            "list node",
            "a 'next_' or 'next' link",
            &node.name,
        ))
    }

    pub fn is_doubly_linked(&self) -> bool {
        self.prev.is_some()
    }

    /// Offset of the field followed in `direction`
    pub fn offset(&self, direction: Direction) -> WalkResult<u64> {
        match direction {
            Direction::Forward => Ok(self.next),
            Direction::Reverse => self.prev.ok_or_else(|| {
                WalkError::UnsupportedOperation("reverse walk of a singly-linked list".to_string())
            }),
        }
    }
}

/// Lazy walk over the node addresses of one list.
///
/// Each step re-reads the link from the target. After a failed read the
/// walker yields the error once and then ends.
pub struct ListWalker<'a> {
    target: Target<'a>,
    header: Address,
    link: u64,
    direction: Direction,
    current: Option<Address>,
    visited: usize,
    done: bool,
}

impl<'a> ListWalker<'a> {
    pub fn new(
        target: Target<'a>,
        header: Address,
        links: ListLinks,
        direction: Direction,
    ) -> WalkResult<Self> {
        let link = links.offset(direction)?;
        Ok(ListWalker {
            target,
            header,
            link,
            direction,
            current: None,
            visited: 0,
            done: false,
        })
    }

    pub fn header(&self) -> Address {
        self.header
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn advance(&self) -> WalkResult<Address> {
        let node = self.current.unwrap_or(self.header);
        self.target
            .read_address(node.add(self.link))
            .walk_context(|| format!("reading {:?} link of list node {}", self.direction, node))
    }
}

impl Iterator for ListWalker<'_> {
    type Item = WalkResult<Address>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.advance() {
            Ok(node) if node == self.header => {
                self.done = true;
                debug!(header = %self.header, nodes = self.visited, "list walk complete");
                None
            }
            Ok(node) => {
                trace!(%node, "list node");
                self.current = Some(node);
                self.visited += 1;
                Some(Ok(node))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Maps link-node addresses to typed owning records
pub struct Owners<I> {
    nodes: I,
    element: Arc<TypeDescriptor>,
    hook: HookOffset,
}

impl<I> Owners<I> {
    pub fn new(nodes: I, element: Arc<TypeDescriptor>, hook: HookOffset) -> Self {
        Owners {
            nodes,
            element,
            hook,
        }
    }
}

impl<I: Iterator<Item = WalkResult<Address>>> Iterator for Owners<I> {
    type Item = WalkResult<TypedValue>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.nodes.next()?;
        Some(node.map(|node| TypedValue::new(self.hook.owner_of(node), Arc::clone(&self.element))))
    }
}

/// Owners of a list in walk order
pub type ListOwners<'a> = Owners<ListWalker<'a>>;

/// Where a container value keeps its header node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderForm {
    /// Own list type with a `head` member
    Head,
    /// Boost list, `data_.root_plus_size_.m_header`
    BoostHeader,
    /// Older Boost list, `data_.root_plus_size_.root_`
    BoostRoot,
    /// Boost slist, `data_.root_plus_size_.header_holder_`
    BoostHeaderHolder,
    /// The value is the header node itself
    Bare,
}

impl HeaderForm {
    /// Decides the form once from the fields the container type carries
    pub fn probe(target: &Target<'_>, value: &TypedValue) -> WalkResult<Self> {
        let container = target.object_type(value)?;
        if container.has_field("head") {
            return Ok(HeaderForm::Head);
        }

        if let Some(data) = container.field("data_") {
            let data = target.lookup_type(&data.type_name)?;
            if let Some(rps) = data.field("root_plus_size_") {
                let rps = target.lookup_type(&rps.type_name)?;
                for (name, form) in [
                    ("m_header", HeaderForm::BoostHeader),
                    ("root_", HeaderForm::BoostRoot),
                    ("header_holder_", HeaderForm::BoostHeaderHolder),
                ] {
                    if rps.has_field(name) {
                        return Ok(form);
                    }
                }
            }
        }

        if ListLinks::probe(&container).is_ok() {
            return Ok(HeaderForm::Bare);
        }

        Err(WalkError::type_mismatch(
            format!("list header of {}", value),
            "'head', 'data_.root_plus_size_' or a header node",
            &container.name,
        ))
    }

    /// The header node inside `value`
    pub fn header(&self, target: &Target<'_>, value: &TypedValue) -> WalkResult<TypedValue> {
        let path: &[&str] = match self {
            HeaderForm::Head => &["head"],
            HeaderForm::BoostHeader => &["data_", "root_plus_size_", "m_header"],
            HeaderForm::BoostRoot => &["data_", "root_plus_size_", "root_"],
            HeaderForm::BoostHeaderHolder => &["data_", "root_plus_size_", "header_holder_"],
            HeaderForm::Bare => &[],
        };

        let mut header = target.object(value)?;
        for name in path {
            header = target.field(&header, name)?;
        }
        Ok(header)
    }
}

/// A typed intrusive list ready to be walked
#[derive(Clone)]
pub struct IntrusiveList<'a> {
    target: Target<'a>,
    form: HeaderForm,
    header: TypedValue,
    links: ListLinks,
    element: Arc<TypeDescriptor>,
    hook: HookOffset,
}

impl<'a> IntrusiveList<'a> {
    /// Inspects a list value.
    ///
    /// The element type and default hook come from the container layout's
    /// `element` and `hook`; `member_hook` overrides the hook. Without a
    /// declared element the owners are typed as the link node.
    pub fn from_value(
        target: Target<'a>,
        value: &TypedValue,
        member_hook: Option<&str>,
    ) -> WalkResult<Self> {
        let container = target.object_type(value)?;
        let element = match &container.element {
            Some(name) => Some(target.lookup_type(name)?),
            None => None,
        };
        Self::build(target, value, &container, element, member_hook)
    }

    /// Inspects a list value whose elements are of type `element`
    pub fn of_element(
        target: Target<'a>,
        value: &TypedValue,
        element: &str,
        member_hook: Option<&str>,
    ) -> WalkResult<Self> {
        let container = target.object_type(value)?;
        let element = target.lookup_type(element)?;
        Self::build(target, value, &container, Some(element), member_hook)
    }

    /// Like [`IntrusiveList::from_value`], falling back to `element` when
    /// the container layout declares none
    pub fn with_default_element(
        target: Target<'a>,
        value: &TypedValue,
        element: &str,
        member_hook: Option<&str>,
    ) -> WalkResult<Self> {
        let container = target.object_type(value)?;
        let element = target.lookup_type(container.element.as_deref().unwrap_or(element))?;
        Self::build(target, value, &container, Some(element), member_hook)
    }

    fn build(
        target: Target<'a>,
        value: &TypedValue,
        container: &TypeDescriptor,
        element: Option<Arc<TypeDescriptor>>,
        member_hook: Option<&str>,
    ) -> WalkResult<Self> {
        let form = HeaderForm::probe(&target, value)?;
        let header = form.header(&target, value)?;
        let node_type = target.object_type(&header)?;
        let links = ListLinks::probe(&node_type)?;

        let element = element.unwrap_or_else(|| Arc::clone(&node_type));
        let hook_name = member_hook.or(container.hook.as_deref());
        let hook = HookOffset::for_member(&element, hook_name)?;

        debug!(
            container = %container.name,
            ?form,
            element = %element.name,
            hook = hook.bytes(),
            "inspecting list"
        );

        Ok(IntrusiveList {
            target,
            form,
            header,
            links,
            element,
            hook,
        })
    }

    pub fn form(&self) -> HeaderForm {
        self.form
    }

    pub fn header(&self) -> &TypedValue {
        &self.header
    }

    pub fn links(&self) -> ListLinks {
        self.links
    }

    pub fn element_type(&self) -> &Arc<TypeDescriptor> {
        &self.element
    }

    pub fn hook(&self) -> HookOffset {
        self.hook
    }

    /// Link-node addresses in `direction`
    pub fn nodes(&self, direction: Direction) -> WalkResult<ListWalker<'a>> {
        ListWalker::new(self.target, self.header.address, self.links, direction)
    }

    /// Owning records in `direction`
    pub fn owners(&self, direction: Direction) -> WalkResult<ListOwners<'a>> {
        Ok(Owners::new(
            self.nodes(direction)?,
            Arc::clone(&self.element),
            self.hook,
        ))
    }

    pub fn iter(&self) -> WalkResult<ListOwners<'a>> {
        self.owners(Direction::Forward)
    }

    pub fn iter_reverse(&self) -> WalkResult<ListOwners<'a>> {
        self.owners(Direction::Reverse)
    }

    /// Collects all owners, failing on the first error
    pub fn collect(&self, direction: Direction) -> WalkResult<Vec<TypedValue>> {
        self.owners(direction)?.collect()
    }
}
