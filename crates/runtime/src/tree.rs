//! Story tree and cursor
//!
//! A loaded story is an immutable arena of containers holding instruction
//! nodes. Containers carry parent back-pointers so the cursor can ascend
//! without reconstructing chains. An [`Element`] is a `(container, index)`
//! pair; navigation lives on [`Story`].

use std::rc::Rc;

use indexmap::IndexMap;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::list::{ListDefs, ListValue};
use crate::value::{BinaryOp, UnaryOp, Value};

/// Index of a container in the story arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(pub u32);

impl ContainerId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-container accounting flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerFlags(pub u32);

impl ContainerFlags {
    /// Keep a record of visits to this container.
    pub const RECORD_VISITS: u32 = 0x1;
    /// Record the turn index this container was last visited on.
    pub const COUNT_TURNS: u32 = 0x2;
    /// Only record entries through the first subelement, distinguishing
    /// knots/stitches (random access) from gathers and choices.
    pub const COUNT_START_ONLY: u32 = 0x4;

    pub fn records_visits(self) -> bool {
        self.0 & Self::RECORD_VISITS != 0
    }

    pub fn counts_turns(self) -> bool {
        self.0 & Self::COUNT_TURNS != 0
    }

    pub fn count_start_only(self) -> bool {
        self.0 & Self::COUNT_START_ONLY != 0
    }
}

/// Choice-point behavior bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChoiceFlags(pub u32);

impl ChoiceFlags {
    pub const HAS_CONDITION: u32 = 0x01;
    pub const HAS_START_CONTENT: u32 = 0x02;
    pub const HAS_CHOICE_ONLY_CONTENT: u32 = 0x04;
    pub const IS_INVISIBLE_DEFAULT: u32 = 0x08;
    pub const ONCE_ONLY: u32 = 0x10;

    pub fn has_condition(self) -> bool {
        self.0 & Self::HAS_CONDITION != 0
    }

    pub fn has_start_content(self) -> bool {
        self.0 & Self::HAS_START_CONTENT != 0
    }

    pub fn has_choice_only_content(self) -> bool {
        self.0 & Self::HAS_CHOICE_ONLY_CONTENT != 0
    }

    pub fn is_invisible_default(self) -> bool {
        self.0 & Self::IS_INVISIBLE_DEFAULT != 0
    }

    pub fn once_only(self) -> bool {
        self.0 & Self::ONCE_ONLY != 0
    }
}

/// One instruction node. The set is closed; the loader maps every bytecode
/// token onto exactly one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Newline,
    Glue,
    Done,
    End,
    NoOp,
    DupTop,
    Pop,
    Out,
    Void,
    ThreadStart,
    FuncReturn,
    TunnelReturn,
    TurnCounter,
    VisitIndex,
    TurnsSince,
    ReadCount,
    ChoiceCount,
    Seq,
    Random,
    SeedRandom,
    ListInt,
    ListValueOf,
    ListCount,
    ListMin,
    ListMax,
    ListAll,
    ListInvert,
    ListIntersect,
    ListRange,
    BeginEval,
    EndEval,
    BeginStringEval,
    EndStringEval,
    BeginTag,
    EndTag,
    ChoicePoint { dest: Address, flags: ChoiceFlags },
    Divert { dest: Address, var: bool, conditional: bool },
    FuncCall { dest: Address },
    TunnelCall { dest: Address },
    SetVar { name: String, reassign: bool },
    SetTemp { name: String, reassign: bool },
    GetVar { name: String },
    GetVisitCount { container: String },
    VarRef { name: String, content_index: u32 },
    Binary(BinaryOp),
    Unary(UnaryOp),
    Literal(Value),
    Container(ContainerId),
}

/// A container in the arena.
///
/// `contents` is the ordered flow; `nested` holds named sub-containers
/// reachable by name but not by sequential flow (their `parent_index` is
/// `None`, so flow never ascends out of them into the parent).
#[derive(Debug)]
pub struct ContainerData {
    pub name: Option<String>,
    pub flags: ContainerFlags,
    pub parent: Option<ContainerId>,
    pub parent_index: Option<usize>,
    pub contents: Vec<Node>,
    pub nested: IndexMap<String, ContainerId>,
    pub address: Address,
}

impl ContainerData {
    fn key(&self) -> String {
        match (&self.name, self.parent_index) {
            (Some(name), _) => name.clone(),
            (None, Some(i)) => i.to_string(),
            (None, None) => String::new(),
        }
    }
}

/// A cursor position: one node within one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    pub container: ContainerId,
    pub index: usize,
}

/// A container entry reported by flattening, for the visit accountant.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitAddr {
    pub addr: Address,
    pub flags: ContainerFlags,
    pub entry_index: usize,
}

/// An immutable, loaded story: the container arena plus list definitions.
#[derive(Debug)]
pub struct Story {
    containers: Vec<ContainerData>,
    root: ContainerId,
    list_defs: Rc<ListDefs>,
}

impl Story {
    /// Assemble a story from a built arena, computing container addresses.
    pub(crate) fn new(
        mut containers: Vec<ContainerData>,
        root: ContainerId,
        list_defs: ListDefs,
    ) -> Self {
        // Addresses omit the root: the root and its immediate children both
        // address as their bare key.
        let mut order: Vec<ContainerId> = vec![root];
        let mut i = 0;
        while i < order.len() {
            let id = order[i];
            i += 1;
            let children: Vec<ContainerId> = containers[id.index()]
                .contents
                .iter()
                .filter_map(|n| match n {
                    Node::Container(c) => Some(*c),
                    _ => None,
                })
                .chain(containers[id.index()].nested.values().copied())
                .collect();
            order.extend(children);
        }
        for id in order {
            let addr = {
                let c = &containers[id.index()];
                match c.parent {
                    None => Address::new(c.key()),
                    Some(p) if containers[p.index()].parent.is_none() => Address::new(c.key()),
                    Some(p) => containers[p.index()].address.child(&c.key()),
                }
            };
            containers[id.index()].address = addr;
        }
        Self {
            containers,
            root,
            list_defs: Rc::new(list_defs),
        }
    }

    pub fn root(&self) -> ContainerId {
        self.root
    }

    pub fn container(&self, id: ContainerId) -> &ContainerData {
        &self.containers[id.index()]
    }

    pub fn list_defs(&self) -> &Rc<ListDefs> {
        &self.list_defs
    }

    /// The node under the cursor.
    pub fn node(&self, el: Element) -> &Node {
        &self.container(el.container).contents[el.index]
    }

    /// The node under a possibly past-the-end cursor.
    fn node_at(&self, el: Element) -> Option<&Node> {
        self.container(el.container).contents.get(el.index)
    }

    /// Address and index of the cursor.
    pub fn address_of(&self, el: Element) -> (Address, usize) {
        (self.container(el.container).address.clone(), el.index)
    }

    /// First element of the story, with the container entries crossed
    /// reaching it.
    pub fn first(&self) -> (Option<Element>, Vec<VisitAddr>) {
        self.flatten(Element {
            container: self.root,
            index: 0,
        })
    }

    /// Advance the cursor by one, flattening container boundaries.
    pub fn next(&self, el: Element) -> (Option<Element>, Vec<VisitAddr>) {
        self.flatten(Element {
            container: el.container,
            index: el.index + 1,
        })
    }

    /// Resolve a cursor to the node it actually lands on.
    ///
    /// Past-the-end cursors ascend to the parent's following element
    /// (cascading); container nodes descend to their first element. Every
    /// container entered on the way down is reported for visit accounting.
    fn flatten(&self, el: Element) -> (Option<Element>, Vec<VisitAddr>) {
        let c = self.container(el.container);
        if el.index >= c.contents.len() {
            return match (c.parent, c.parent_index) {
                (Some(parent), Some(pi)) => self.flatten(Element {
                    container: parent,
                    index: pi + 1,
                }),
                _ => (None, Vec::new()),
            };
        }
        let mut visits = vec![VisitAddr {
            addr: c.address.clone(),
            flags: c.flags,
            entry_index: el.index,
        }];
        if let Node::Container(child) = c.contents[el.index] {
            let (next, nested) = self.flatten(Element {
                container: child,
                index: 0,
            });
            visits.extend(nested);
            (next, visits)
        } else {
            (Some(el), visits)
        }
    }

    /// Find the element at `addr`, flattened, with crossed container entries.
    pub fn find(&self, from: Element, addr: &Address) -> Result<(Element, Vec<VisitAddr>)> {
        let raw = self.locate(from, addr)?;
        let (el, visits) = self.flatten(raw);
        match el {
            Some(el) => Ok((el, visits)),
            None => Err(Error::AddressNotFound(addr.clone())),
        }
    }

    /// Resolve `addr` to an unflattened cursor.
    ///
    /// Relative addresses start with `.^.`, rooted at the current container;
    /// anything else restarts at the story root.
    pub(crate) fn locate(&self, from: Element, addr: &Address) -> Result<Element> {
        let s = addr.as_str();
        if !s.starts_with(".^.") {
            let rooted = Address::new(format!(".^.{s}"));
            return self.locate(
                Element {
                    container: self.root,
                    index: 0,
                },
                &rooted,
            );
        }
        let (path, key) = Address::split(&s[1..]);
        // The leading `^` of a relative path refers to the container holding
        // the current element, so the walk starts one level above it.
        let mut segments = path.into_iter();
        match segments.next() {
            Some("^") => {}
            _ => return Err(Error::AddressNotFound(addr.clone())),
        }
        let mut cur = from.container;
        for seg in segments {
            cur = self
                .child_container(cur, seg)
                .ok_or_else(|| Error::ContainerNotFound(seg.to_string()))?;
        }
        if let Ok(index) = key.parse::<usize>() {
            return Ok(Element {
                container: cur,
                index,
            });
        }
        let child = self
            .child_container(cur, key)
            .ok_or_else(|| Error::ContainerNotFound(key.to_string()))?;
        Ok(Element {
            container: child,
            index: 0,
        })
    }

    /// The container a raw (unflattened) cursor targets: the container node
    /// under it if there is one, else the holding container.
    pub(crate) fn target_container(&self, raw: Element) -> ContainerId {
        match self.node_at(raw) {
            Some(Node::Container(id)) => *id,
            _ => raw.container,
        }
    }

    fn child_container(&self, id: ContainerId, seg: &str) -> Option<ContainerId> {
        let c = self.container(id);
        if seg == "^" {
            return c.parent;
        }
        if let Ok(i) = seg.parse::<usize>() {
            return match c.contents.get(i) {
                Some(Node::Container(child)) => Some(*child),
                _ => None,
            };
        }
        if let Some(child) = c.nested.get(seg) {
            return Some(*child);
        }
        c.contents.iter().find_map(|n| match n {
            Node::Container(child) if self.container(*child).name.as_deref() == Some(seg) => {
                Some(*child)
            }
            _ => None,
        })
    }
}

/// Arena assembly used by the loader and by tests that build trees by hand.
#[derive(Debug, Default)]
pub struct StoryBuilder {
    containers: Vec<ContainerData>,
}

impl StoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for a container, returning its id.
    pub fn reserve(&mut self, parent: Option<ContainerId>, parent_index: Option<usize>) -> ContainerId {
        let id = ContainerId(self.containers.len() as u32);
        self.containers.push(ContainerData {
            name: None,
            flags: ContainerFlags::default(),
            parent,
            parent_index,
            contents: Vec::new(),
            nested: IndexMap::new(),
            address: Address::default(),
        });
        id
    }

    pub fn container_mut(&mut self, id: ContainerId) -> &mut ContainerData {
        &mut self.containers[id.index()]
    }

    pub fn build(self, root: ContainerId, list_defs: ListDefs) -> Story {
        Story::new(self.containers, root, list_defs)
    }
}

impl Node {
    /// Literal value nodes as loaded from bytecode.
    pub fn int(v: i64) -> Node {
        Node::Literal(Value::Int(v))
    }

    pub fn float(v: f64) -> Node {
        Node::Literal(Value::Float(v))
    }

    pub fn divert_target(addr: impl Into<Address>) -> Node {
        Node::Literal(Value::DivertTarget(addr.into()))
    }

    pub fn list(v: ListValue) -> Node {
        Node::Literal(Value::List(v))
    }
}
