/*!
# Document tree

The tree built by the stream lives in a [`Document`], an arena of nodes which
are linked by [`NodeId`] indices. Elements are attached to their parent as
soon as they are opened. Pruning an element unlinks it from its parent and
returns its slots to the arena's free list, so that memory stays bounded even
for endless input.

Filters look at the arena through the borrowed [`ElementRef`] and
[`NodeRef`] views. Elements handed to a [`Consumer`](crate::Consumer) are
owned [`Element`] snapshots which do not depend on the arena anymore.
*/
use std::fmt;
use std::iter::FromIterator;
use std::vec;

use smartstring::alias::String as SmartString;

/// Element and attribute names.
///
/// Names are kept as written in the document, including any namespace
/// prefix.
pub type Name = SmartString;

fn split_prefix(name: &str) -> (Option<&str>, &str) {
	match name.find(':') {
		Some(pos) => (Some(&name[..pos]), &name[pos + 1..]),
		None => (None, name),
	}
}

/// Ordered attribute mapping of an element.
///
/// Attributes keep the order in which they were inserted. Names are unique;
/// inserting an existing name replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
	inner: Vec<(Name, String)>,
}

impl Attributes {
	pub fn new() -> Attributes {
		Self::default()
	}

	/// Set an attribute, returning the previous value if there was one.
	pub fn insert<N: Into<Name>, V: Into<String>>(&mut self, name: N, value: V) -> Option<String> {
		let name = name.into();
		let value = value.into();
		match self.inner.iter_mut().find(|(k, _)| *k == name) {
			Some((_, old)) => Some(std::mem::replace(old, value)),
			None => {
				self.inner.push((name, value));
				None
			}
		}
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self.inner
			.iter()
			.find(|(k, _)| k.as_str() == name)
			.map(|(_, v)| v.as_str())
	}

	pub fn contains(&self, name: &str) -> bool {
		self.get(name).is_some()
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	/// Iterate over `(name, value)` pairs in insertion order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
		self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}
}

impl<N: Into<Name>, V: Into<String>> FromIterator<(N, V)> for Attributes {
	fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
		let mut result = Attributes::new();
		for (k, v) in iter {
			result.insert(k, v);
		}
		result
	}
}

/// Character data node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text {
	value: String,
	cdata: bool,
}

impl Text {
	pub fn new<T: Into<String>>(value: T, cdata: bool) -> Text {
		Text {
			value: value.into(),
			cdata,
		}
	}

	pub fn as_str(&self) -> &str {
		&self.value
	}

	/// True if the text originates from a CDATA section.
	pub fn is_cdata(&self) -> bool {
		self.cdata
	}

	pub fn into_string(self) -> String {
		self.value
	}
}

/// Index of a node inside a [`Document`].
///
/// Ids of pruned nodes are recycled; an id is only meaningful while the node
/// it was handed out for is still part of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
enum NodeData {
	Element {
		name: Name,
		attributes: Attributes,
		children: Vec<NodeId>,
	},
	Text(Text),
}

#[derive(Debug)]
struct Slot {
	parent: Option<NodeId>,
	data: NodeData,
}

/**
# Arena-backed document

Owns the root element and every retained descendant. Nodes refer to each
other by [`NodeId`]; parent links are only used to unlink pruned subtrees.
*/
pub struct Document {
	nodes: Vec<Option<Slot>>,
	free: Vec<usize>,
	root: Option<NodeId>,
	encoding: Option<String>,
	live: usize,
}

impl Document {
	/// Create a document along with its root element.
	pub(crate) fn with_root(name: Name, attributes: Attributes, encoding: Option<String>) -> (Document, NodeId) {
		let mut doc = Document {
			nodes: Vec::new(),
			free: Vec::new(),
			root: None,
			encoding,
			live: 0,
		};
		let root = doc.alloc(Slot {
			parent: None,
			data: NodeData::Element {
				name,
				attributes,
				children: Vec::new(),
			},
		});
		doc.root = Some(root);
		(doc, root)
	}

	fn alloc(&mut self, slot: Slot) -> NodeId {
		self.live += 1;
		match self.free.pop() {
			Some(index) => {
				debug_assert!(self.nodes[index].is_none());
				self.nodes[index] = Some(slot);
				NodeId(index)
			}
			None => {
				self.nodes.push(Some(slot));
				NodeId(self.nodes.len() - 1)
			}
		}
	}

	fn slot(&self, id: NodeId) -> Option<&Slot> {
		self.nodes.get(id.0).and_then(|s| s.as_ref())
	}

	fn children_mut(&mut self, id: NodeId) -> &mut Vec<NodeId> {
		match self.nodes[id.0].as_mut().map(|s| &mut s.data) {
			Some(NodeData::Element { children, .. }) => children,
			_ => unreachable!("children of a node which is not a live element"),
		}
	}

	fn append(&mut self, parent: NodeId, data: NodeData) -> NodeId {
		let id = self.alloc(Slot {
			parent: Some(parent),
			data,
		});
		self.children_mut(parent).push(id);
		id
	}

	/// Create an element and append it as last child of `parent`.
	pub(crate) fn append_element(&mut self, parent: NodeId, name: Name, attributes: Attributes) -> NodeId {
		self.append(
			parent,
			NodeData::Element {
				name,
				attributes,
				children: Vec::new(),
			},
		)
	}

	/// Create a text node and append it as last child of `parent`.
	pub(crate) fn append_text(&mut self, parent: NodeId, text: Text) -> NodeId {
		self.append(parent, NodeData::Text(text))
	}

	/// Unlink a node from its parent (or from the document, for the root).
	///
	/// The node and its descendants stay allocated.
	fn detach(&mut self, id: NodeId) {
		let parent = match self.nodes[id.0].as_mut() {
			Some(slot) => slot.parent.take(),
			None => return,
		};
		match parent {
			Some(parent) => {
				let children = self.children_mut(parent);
				// a node which is being closed is always the last child
				match children.iter().rposition(|c| *c == id) {
					Some(pos) => {
						children.remove(pos);
					}
					None => debug_assert!(false, "child not linked in parent"),
				}
			}
			None => {
				if self.root == Some(id) {
					self.root = None;
				}
			}
		}
	}

	fn release(&mut self, id: NodeId) {
		let mut pending = vec![id];
		while let Some(id) = pending.pop() {
			if let Some(slot) = self.nodes[id.0].take() {
				self.live -= 1;
				self.free.push(id.0);
				if let NodeData::Element { children, .. } = slot.data {
					pending.extend(children);
				}
			}
		}
	}

	/// Unlink a subtree and drop it.
	pub(crate) fn remove(&mut self, id: NodeId) {
		self.detach(id);
		self.release(id);
	}

	fn take_slot(&mut self, id: NodeId) -> NodeData {
		match self.nodes[id.0].take() {
			Some(slot) => {
				self.live -= 1;
				self.free.push(id.0);
				slot.data
			}
			None => unreachable!("node taken twice"),
		}
	}

	/// Unlink a subtree and move it out of the arena.
	pub(crate) fn take(&mut self, id: NodeId) -> Element {
		self.detach(id);
		match open_slot(self.take_slot(id)) {
			Step::Open(el, children) => assemble(el, children, |child| open_slot(self.take_slot(child))),
			Step::Leaf(_) => unreachable!("take() called on a text node"),
		}
	}

	/// The root element, unless it has been pruned.
	pub fn root(&self) -> Option<ElementRef<'_>> {
		self.root.map(|id| ElementRef { doc: self, id })
	}

	/// Look up an element by id.
	///
	/// Returns `None` if the id does not refer to a live element.
	pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
		match self.slot(id).map(|s| &s.data) {
			Some(NodeData::Element { .. }) => Some(ElementRef { doc: self, id }),
			_ => None,
		}
	}

	/// Look up any node by id.
	pub fn node(&self, id: NodeId) -> Option<NodeRef<'_>> {
		match self.slot(id).map(|s| &s.data) {
			Some(NodeData::Text(text)) => Some(NodeRef::Text(text)),
			Some(NodeData::Element { .. }) => Some(NodeRef::Element(ElementRef { doc: self, id })),
			None => None,
		}
	}

	/// Number of nodes (elements and text) currently held by the arena.
	pub fn node_count(&self) -> usize {
		self.live
	}

	/// Number of elements currently held by the arena.
	pub fn element_count(&self) -> usize {
		self.nodes
			.iter()
			.filter(|s| matches!(s, Some(Slot { data: NodeData::Element { .. }, .. })))
			.count()
	}

	/// Encoding announced in the XML declaration, if any.
	pub fn encoding(&self) -> Option<&str> {
		self.encoding.as_deref()
	}
}

impl fmt::Debug for Document {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("Document")
			.field("root", &self.root().map(|r| r.to_element()))
			.field("encoding", &self.encoding)
			.field("live", &self.live)
			.finish()
	}
}

/// Borrowed view on an element in a [`Document`].
#[derive(Clone, Copy)]
pub struct ElementRef<'a> {
	doc: &'a Document,
	id: NodeId,
}

impl<'a> ElementRef<'a> {
	fn parts(&self) -> (&'a Name, &'a Attributes, &'a [NodeId]) {
		match self.doc.slot(self.id).map(|s| &s.data) {
			Some(NodeData::Element {
				name,
				attributes,
				children,
			}) => (name, attributes, &children[..]),
			_ => unreachable!("ElementRef to a node which is not a live element"),
		}
	}

	pub fn id(&self) -> NodeId {
		self.id
	}

	pub fn document(&self) -> &'a Document {
		self.doc
	}

	/// Full name as written, including the prefix.
	pub fn name(&self) -> &'a str {
		self.parts().0.as_str()
	}

	/// Raw namespace prefix; no namespace resolution takes place.
	pub fn prefix(&self) -> Option<&'a str> {
		split_prefix(self.name()).0
	}

	pub fn local_name(&self) -> &'a str {
		split_prefix(self.name()).1
	}

	pub fn attribute(&self, name: &str) -> Option<&'a str> {
		self.parts().1.get(name)
	}

	pub fn attributes(&self) -> &'a Attributes {
		self.parts().1
	}

	pub fn parent(&self) -> Option<ElementRef<'a>> {
		self.doc
			.slot(self.id)
			.and_then(|s| s.parent)
			.map(|id| ElementRef { doc: self.doc, id })
	}

	/// Iterate over all child nodes in document order.
	pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
		let doc = self.doc;
		self.parts().2.iter().map(move |id| match doc.node(*id) {
			Some(node) => node,
			None => unreachable!("dangling child id"),
		})
	}

	/// Iterate over child elements, skipping text.
	pub fn elements(&self) -> impl Iterator<Item = ElementRef<'a>> + 'a {
		self.children().filter_map(|c| match c {
			NodeRef::Element(el) => Some(el),
			NodeRef::Text(_) => None,
		})
	}

	/// First child element with the given name.
	pub fn find(&self, name: &str) -> Option<ElementRef<'a>> {
		self.elements().find(|el| el.name() == name)
	}

	/// Concatenation of all descendant text in document order.
	pub fn text(&self) -> String {
		let mut out = String::new();
		let mut stack = vec![self.children()];
		while let Some(children) = stack.last_mut() {
			match children.next() {
				Some(NodeRef::Text(t)) => out.push_str(t.as_str()),
				Some(NodeRef::Element(el)) => stack.push(el.children()),
				None => {
					stack.pop();
				}
			}
		}
		out
	}

	/// Copy the subtree into an owned [`Element`].
	pub fn to_element(&self) -> Element {
		let doc = self.doc;
		let (name, attributes, children) = self.parts();
		let root = Element::with_attributes(name.clone(), attributes.clone());
		assemble(root, children.iter(), |id| match doc.node(*id) {
			Some(NodeRef::Text(t)) => Step::Leaf(Node::Text(t.clone())),
			Some(NodeRef::Element(el)) => {
				let (name, attributes, children) = el.parts();
				Step::Open(
					Element::with_attributes(name.clone(), attributes.clone()),
					children.iter(),
				)
			}
			None => unreachable!("dangling child id"),
		})
	}
}

impl fmt::Debug for ElementRef<'_> {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("ElementRef")
			.field("id", &self.id)
			.field("name", &self.name())
			.finish()
	}
}

/// Borrowed view on any node in a [`Document`].
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
	Element(ElementRef<'a>),
	Text(&'a Text),
}

/// Owned node of an [`Element`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
	Element(Element),
	Text(Text),
}

/// Item produced while assembling an owned subtree.
enum Step<I> {
	Leaf(Node),
	Open(Element, I),
}

fn open_slot(data: NodeData) -> Step<vec::IntoIter<NodeId>> {
	match data {
		NodeData::Text(text) => Step::Leaf(Node::Text(text)),
		NodeData::Element {
			name,
			attributes,
			children,
		} => Step::Open(Element::with_attributes(name, attributes), children.into_iter()),
	}
}

/// Build an owned subtree in document order, with an explicit stack instead
/// of recursion.
fn assemble<T, I, F>(root: Element, children: I, mut open: F) -> Element
where
	I: Iterator<Item = T>,
	F: FnMut(T) -> Step<I>,
{
	let mut stack: Vec<(Element, I)> = Vec::new();
	let mut current = (root, children);
	loop {
		match current.1.next() {
			Some(item) => match open(item) {
				Step::Leaf(node) => current.0.children.push(node),
				Step::Open(el, grandchildren) => {
					stack.push(std::mem::replace(&mut current, (el, grandchildren)));
				}
			},
			None => {
				let (done, _) = match stack.pop() {
					Some(parent) => std::mem::replace(&mut current, parent),
					None => return current.0,
				};
				current.0.children.push(Node::Element(done));
			}
		}
	}
}

/**
# Owned element

This is what consumers receive. It is a complete copy (or, for elements which
were pruned from the document at the same time, the moved original) of the
closed subtree.

Cloning, comparing and dropping work without recursion, so arbitrarily deep
elements are fine.
*/
#[derive(Debug)]
pub struct Element {
	name: Name,
	attributes: Attributes,
	children: Vec<Node>,
}

impl Element {
	pub fn new<N: Into<Name>>(name: N) -> Element {
		Element::with_attributes(name.into(), Attributes::new())
	}

	fn with_attributes(name: Name, attributes: Attributes) -> Element {
		Element {
			name,
			attributes,
			children: Vec::new(),
		}
	}

	pub fn name(&self) -> &str {
		self.name.as_str()
	}

	pub fn prefix(&self) -> Option<&str> {
		split_prefix(self.name()).0
	}

	pub fn local_name(&self) -> &str {
		split_prefix(self.name()).1
	}

	pub fn attribute(&self, name: &str) -> Option<&str> {
		self.attributes.get(name)
	}

	pub fn attributes(&self) -> &Attributes {
		&self.attributes
	}

	pub fn children(&self) -> &[Node] {
		&self.children
	}

	pub fn elements(&self) -> impl Iterator<Item = &Element> + '_ {
		self.children.iter().filter_map(|c| match c {
			Node::Element(el) => Some(el),
			Node::Text(_) => None,
		})
	}

	pub fn find(&self, name: &str) -> Option<&Element> {
		self.elements().find(|el| el.name() == name)
	}

	/// Concatenation of all descendant text in document order.
	pub fn text(&self) -> String {
		let mut out = String::new();
		let mut stack = vec![self.children.iter()];
		while let Some(children) = stack.last_mut() {
			match children.next() {
				Some(Node::Text(t)) => out.push_str(t.as_str()),
				Some(Node::Element(el)) => stack.push(el.children.iter()),
				None => {
					stack.pop();
				}
			}
		}
		out
	}

	/// Number of elements in this subtree, including this one.
	pub fn element_count(&self) -> usize {
		let mut count = 0;
		let mut pending = vec![self];
		while let Some(el) = pending.pop() {
			count += 1;
			pending.extend(el.elements());
		}
		count
	}
}

impl Clone for Element {
	fn clone(&self) -> Element {
		let root = Element::with_attributes(self.name.clone(), self.attributes.clone());
		assemble(root, self.children.iter(), |node| match node {
			Node::Text(t) => Step::Leaf(Node::Text(t.clone())),
			Node::Element(el) => Step::Open(
				Element::with_attributes(el.name.clone(), el.attributes.clone()),
				el.children.iter(),
			),
		})
	}
}

impl PartialEq for Element {
	fn eq(&self, other: &Element) -> bool {
		let mut pending = vec![(self, other)];
		while let Some((a, b)) = pending.pop() {
			if a.name != b.name || a.attributes != b.attributes || a.children.len() != b.children.len() {
				return false;
			}
			for pair in a.children.iter().zip(b.children.iter()) {
				match pair {
					(Node::Text(x), Node::Text(y)) if x == y => (),
					(Node::Element(x), Node::Element(y)) => pending.push((x, y)),
					_ => return false,
				}
			}
		}
		true
	}
}

impl Eq for Element {}

impl Drop for Element {
	fn drop(&mut self) {
		let mut pending = std::mem::take(&mut self.children);
		while let Some(node) = pending.pop() {
			if let Node::Element(mut el) = node {
				pending.append(&mut el.children);
			}
		}
	}
}
