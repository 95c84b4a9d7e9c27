/*!
# Incremental tree builder

The [`TreeBuilder`] turns parse events into a [`Document`] while keeping
track of the elements which are currently open.
*/
use crate::error::{Error, Result, StructuralError, ERRCTX_DOCEND, ERRCTX_TEXT};
use crate::tree::{Attributes, Document, Element, Name, NodeId, Text};

/// Default for [`TreeBuilder::with_max_depth`] and
/// [`StreamOptions::max_depth`](crate::StreamOptions::max_depth).
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// An element which has just been opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opened {
	pub id: NodeId,
	/// The element it was appended to; `None` for the root.
	pub parent: Option<NodeId>,
	/// Number of ancestors of the element; the root has level 0.
	pub level: usize,
}

/// A text node which has just been appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
	pub id: NodeId,
	pub parent: NodeId,
	/// Level of the parent element.
	pub level: usize,
}

/// An element which has just been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed {
	pub id: NodeId,
	/// Number of ancestors of the element; the root has level 0.
	pub level: usize,
}

/**
# Tree builder

Owns the [`Document`] under construction and the stack of open elements.
Any event which arrives with an empty stack, except for the very first start
tag, is an error. So is opening more than `max_depth` nested elements.
*/
pub struct TreeBuilder {
	document: Option<Document>,
	stack: Vec<NodeId>,
	encoding: Option<String>,
	max_depth: usize,
}

impl Default for TreeBuilder {
	fn default() -> Self {
		TreeBuilder::with_max_depth(DEFAULT_MAX_DEPTH)
	}
}

impl TreeBuilder {
	pub fn new() -> TreeBuilder {
		Self::default()
	}

	/// Create a builder which allows at most `max_depth` nested open
	/// elements.
	pub fn with_max_depth(max_depth: usize) -> TreeBuilder {
		TreeBuilder {
			document: None,
			stack: Vec::new(),
			encoding: None,
			max_depth,
		}
	}

	/// Open an element.
	///
	/// The first element becomes the root of a new document.
	pub fn start_element(&mut self, name: Name, attributes: Attributes) -> Result<Opened> {
		let level = self.stack.len();
		if level >= self.max_depth {
			return Err(StructuralError::DepthLimitExceeded(self.max_depth).into());
		}
		let (id, parent) = if self.document.is_none() {
			let (doc, root) = Document::with_root(name, attributes, self.encoding.take());
			self.document = Some(doc);
			(root, None)
		} else {
			match (self.document.as_mut(), self.stack.last()) {
				(Some(doc), Some(parent)) => (doc.append_element(*parent, name, attributes), Some(*parent)),
				_ => return Err(Error::stack_empty(ERRCTX_DOCEND)),
			}
		};
		self.stack.push(id);
		Ok(Opened { id, parent, level })
	}

	/// Append character data to the innermost open element.
	pub fn text(&mut self, value: String, cdata: bool) -> Result<Appended> {
		let level = self.stack.len().saturating_sub(1);
		match (self.document.as_mut(), self.stack.last()) {
			(None, _) => Err(Error::EmptyDocument),
			(Some(_), None) => Err(Error::stack_empty(ERRCTX_TEXT)),
			(Some(doc), Some(parent)) => Ok(Appended {
				id: doc.append_text(*parent, Text::new(value, cdata)),
				parent: *parent,
				level,
			}),
		}
	}

	/// Close the innermost open element.
	pub fn end_element(&mut self, name: &str) -> Result<Closed> {
		let doc = match self.document.as_ref() {
			Some(doc) => doc,
			None => return Err(Error::EmptyDocument),
		};
		let level = match self.stack.len() {
			0 => return Err(Error::stack_empty(ERRCTX_DOCEND)),
			n => n - 1,
		};
		let id = self.stack[level];
		let expected = match doc.element(id) {
			Some(el) => el.name(),
			None => unreachable!("open element missing from document"),
		};
		if expected != name {
			return Err(StructuralError::TagMismatch {
				expected: expected.into(),
				found: name.into(),
			}
			.into());
		}
		self.stack.pop();
		Ok(Closed { id, level })
	}

	/// Record the encoding announced by the XML declaration.
	pub fn set_encoding(&mut self, encoding: Option<String>) {
		self.encoding = encoding;
	}

	/// Detach a closed element from the tree and release it.
	pub fn prune(&mut self, id: NodeId) {
		debug_assert!(!self.stack.contains(&id));
		if let Some(doc) = self.document.as_mut() {
			doc.remove(id);
		}
	}

	/// Detach a closed element from the tree and move it out.
	pub fn take(&mut self, id: NodeId) -> Option<Element> {
		debug_assert!(!self.stack.contains(&id));
		self.document.as_mut().map(|doc| doc.take(id))
	}

	/// Drop all elements which are still open, including their content.
	///
	/// Returns the number of elements which were open.
	pub fn abandon(&mut self) -> usize {
		let n = self.stack.len();
		if let (Some(doc), Some(outermost)) = (self.document.as_mut(), self.stack.first()) {
			doc.remove(*outermost);
		}
		self.stack.clear();
		n
	}

	pub fn depth(&self) -> usize {
		self.stack.len()
	}

	pub fn document(&self) -> Option<&Document> {
		self.document.as_ref()
	}

	pub fn into_document(self) -> Option<Document> {
		self.document
	}
}
