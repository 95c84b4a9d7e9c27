/*!
# Element filters

Every time an element is closed, the stream asks its [`ElementFilter`] two
questions, in this order:

1. [`emit`](ElementFilter::emit): shall the element be handed to the
   consumer?
2. [`keep`](ElementFilter::keep): shall the element stay in the document?

Elements which are not kept are pruned from the document right away, which
keeps memory bounded on long streams. Elements which are kept but not emitted
remain queryable from their ancestors.

Each predicate answers with a [`Decision`], which may be available right away
or only after a future completes. While a deferred decision is pending, the
stream does not process any further input.

Filters may also observe the tree as it grows: [`started`](ElementFilter::started)
is called for every opened element and [`appended`](ElementFilter::appended)
for every node attached to an open element.
*/
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::FilterError;
use crate::tree::{Document, ElementRef, NodeId, NodeRef};

/// Boxed future resolving to a predicate outcome.
pub type PredicateFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, FilterError>> + 'a>>;

/// Read-only context handed to the filter for an element.
#[derive(Clone, Copy)]
pub struct ElementInfo<'a> {
	document: &'a Document,
	id: NodeId,
	level: usize,
}

impl<'a> ElementInfo<'a> {
	pub(crate) fn new(document: &'a Document, id: NodeId, level: usize) -> ElementInfo<'a> {
		ElementInfo {
			document,
			id,
			level,
		}
	}

	/// The document the element belongs to.
	pub fn document(&self) -> &'a Document {
		self.document
	}

	/// The element this info is about.
	pub fn element(&self) -> ElementRef<'a> {
		match self.document.element(self.id) {
			Some(el) => el,
			None => unreachable!("ElementInfo for an element which is not part of the document"),
		}
	}

	pub fn id(&self) -> NodeId {
		self.id
	}

	/// Number of ancestors of the element. The root element has level 0.
	pub fn level(&self) -> usize {
		self.level
	}

	/// Shorthand for `self.element().name()`.
	pub fn name(&self) -> &'a str {
		self.element().name()
	}
}

impl fmt::Debug for ElementInfo<'_> {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("ElementInfo")
			.field("element", &self.element())
			.field("level", &self.level)
			.finish()
	}
}

/// Outcome of a single predicate evaluation.
pub enum Decision<'a> {
	/// The outcome is known right away.
	Ready(Result<bool, FilterError>),

	/// The outcome is known once the future completes.
	Deferred(PredicateFuture<'a>),
}

impl<'a> Decision<'a> {
	pub fn deferred<F: Future<Output = Result<bool, FilterError>> + 'a>(fut: F) -> Decision<'a> {
		Decision::Deferred(Box::pin(fut))
	}

	pub fn is_deferred(&self) -> bool {
		matches!(self, Decision::Deferred(_))
	}
}

impl From<bool> for Decision<'_> {
	fn from(other: bool) -> Self {
		Decision::Ready(Ok(other))
	}
}

impl From<Result<bool, FilterError>> for Decision<'_> {
	fn from(other: Result<bool, FilterError>) -> Self {
		Decision::Ready(other)
	}
}

impl fmt::Debug for Decision<'_> {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Decision::Ready(r) => f.debug_tuple("Ready").field(r).finish(),
			Decision::Deferred(_) => f.write_str("Deferred(..)"),
		}
	}
}

/**
# Per-element emit/keep contract

Both predicates are evaluated exactly once per element, `emit` first. A
predicate which is not implemented fails with
[`FilterError::NotImplemented`] the first time it is asked.

An element for which `emit` is true is delivered to the consumer regardless
of `keep`.

The observer methods default to doing nothing.
*/
pub trait ElementFilter {
	/// An element has been opened. It has no content yet.
	fn started(&mut self, info: ElementInfo<'_>) {
		let _ = info;
	}

	/// A node has been appended to the open element described by `parent`.
	///
	/// For child elements this follows [`started`](Self::started) of the
	/// child; text nodes are reported as they arrive.
	fn appended<'a>(&mut self, parent: ElementInfo<'a>, node: NodeRef<'a>) {
		let _ = (parent, node);
	}

	fn emit<'a>(&'a mut self, info: ElementInfo<'a>) -> Decision<'a> {
		let _ = info;
		Decision::Ready(Err(FilterError::NotImplemented("emit")))
	}

	fn keep<'a>(&'a mut self, info: ElementInfo<'a>) -> Decision<'a> {
		let _ = info;
		Decision::Ready(Err(FilterError::NotImplemented("keep")))
	}
}

impl<T: ElementFilter + ?Sized> ElementFilter for &mut T {
	fn started(&mut self, info: ElementInfo<'_>) {
		(**self).started(info)
	}

	fn appended<'a>(&mut self, parent: ElementInfo<'a>, node: NodeRef<'a>) {
		(**self).appended(parent, node)
	}

	fn emit<'a>(&'a mut self, info: ElementInfo<'a>) -> Decision<'a> {
		(**self).emit(info)
	}

	fn keep<'a>(&'a mut self, info: ElementInfo<'a>) -> Decision<'a> {
		(**self).keep(info)
	}
}

impl<T: ElementFilter + ?Sized> ElementFilter for Box<T> {
	fn started(&mut self, info: ElementInfo<'_>) {
		(**self).started(info)
	}

	fn appended<'a>(&mut self, parent: ElementInfo<'a>, node: NodeRef<'a>) {
		(**self).appended(parent, node)
	}

	fn emit<'a>(&'a mut self, info: ElementInfo<'a>) -> Decision<'a> {
		(**self).emit(info)
	}

	fn keep<'a>(&'a mut self, info: ElementInfo<'a>) -> Decision<'a> {
		(**self).keep(info)
	}
}

type Predicate = Box<dyn FnMut(&ElementInfo<'_>) -> Decision<'static>>;
type StartHook = Box<dyn FnMut(&ElementInfo<'_>)>;
type AppendHook = Box<dyn FnMut(&ElementInfo<'_>, NodeRef<'_>)>;

/**
# Closure-based filter

```
use xmlsieve::Filter;

// emit the children of the root element, keep nothing but the root itself
let filter = Filter::new()
	.emit(|info| info.level() == 1)
	.keep(|info| info.level() == 0);
```

Asynchronous predicates receive the [`ElementInfo`] only for the duration of
the call; anything the returned future needs has to be extracted up front:

```
use xmlsieve::{Filter, FilterError};

let filter = Filter::new()
	.emit_async(|info| {
		let name = info.name().to_string();
		async move { Ok::<_, FilterError>(name == "item") }
	})
	.keep(|_| false);
```

Growth of the tree can be watched with [`on_start`](Filter::on_start) and
[`on_append`](Filter::on_append):

```
use xmlsieve::{Filter, NodeRef};

let filter = Filter::new()
	.on_start(|info| log::debug!("<{}> at level {}", info.name(), info.level()))
	.on_append(|parent, node| {
		if let NodeRef::Text(t) = node {
			log::trace!("{} bytes of text in <{}>", t.as_str().len(), parent.name());
		}
	});
```
*/
#[derive(Default)]
pub struct Filter {
	emit: Option<Predicate>,
	keep: Option<Predicate>,
	on_start: Option<StartHook>,
	on_append: Option<AppendHook>,
}

impl Filter {
	/// Create a filter with neither predicate set.
	pub fn new() -> Filter {
		Self::default()
	}

	pub fn emit<F: FnMut(&ElementInfo<'_>) -> bool + 'static>(mut self, mut f: F) -> Filter {
		self.emit = Some(Box::new(move |info: &ElementInfo<'_>| Decision::Ready(Ok(f(info)))));
		self
	}

	pub fn try_emit<F>(mut self, mut f: F) -> Filter
	where
		F: FnMut(&ElementInfo<'_>) -> Result<bool, FilterError> + 'static,
	{
		self.emit = Some(Box::new(move |info: &ElementInfo<'_>| Decision::Ready(f(info))));
		self
	}

	pub fn emit_async<F, Fut>(mut self, mut f: F) -> Filter
	where
		F: FnMut(&ElementInfo<'_>) -> Fut + 'static,
		Fut: Future<Output = Result<bool, FilterError>> + 'static,
	{
		self.emit = Some(Box::new(move |info: &ElementInfo<'_>| Decision::deferred(f(info))));
		self
	}

	pub fn keep<F: FnMut(&ElementInfo<'_>) -> bool + 'static>(mut self, mut f: F) -> Filter {
		self.keep = Some(Box::new(move |info: &ElementInfo<'_>| Decision::Ready(Ok(f(info)))));
		self
	}

	pub fn try_keep<F>(mut self, mut f: F) -> Filter
	where
		F: FnMut(&ElementInfo<'_>) -> Result<bool, FilterError> + 'static,
	{
		self.keep = Some(Box::new(move |info: &ElementInfo<'_>| Decision::Ready(f(info))));
		self
	}

	pub fn keep_async<F, Fut>(mut self, mut f: F) -> Filter
	where
		F: FnMut(&ElementInfo<'_>) -> Fut + 'static,
		Fut: Future<Output = Result<bool, FilterError>> + 'static,
	{
		self.keep = Some(Box::new(move |info: &ElementInfo<'_>| Decision::deferred(f(info))));
		self
	}

	/// Call `f` whenever an element is opened.
	pub fn on_start<F: FnMut(&ElementInfo<'_>) + 'static>(mut self, f: F) -> Filter {
		self.on_start = Some(Box::new(f));
		self
	}

	/// Call `f` whenever a node is appended to an open element.
	pub fn on_append<F: FnMut(&ElementInfo<'_>, NodeRef<'_>) + 'static>(mut self, f: F) -> Filter {
		self.on_append = Some(Box::new(f));
		self
	}
}

impl ElementFilter for Filter {
	fn started(&mut self, info: ElementInfo<'_>) {
		if let Some(f) = self.on_start.as_mut() {
			f(&info);
		}
	}

	fn appended<'a>(&mut self, parent: ElementInfo<'a>, node: NodeRef<'a>) {
		if let Some(f) = self.on_append.as_mut() {
			f(&parent, node);
		}
	}

	fn emit<'a>(&'a mut self, info: ElementInfo<'a>) -> Decision<'a> {
		match self.emit.as_mut() {
			Some(f) => f(&info),
			None => Decision::Ready(Err(FilterError::NotImplemented("emit"))),
		}
	}

	fn keep<'a>(&'a mut self, info: ElementInfo<'a>) -> Decision<'a> {
		match self.keep.as_mut() {
			Some(f) => f(&info),
			None => Decision::Ready(Err(FilterError::NotImplemented("keep"))),
		}
	}
}

impl fmt::Debug for Filter {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("Filter")
			.field("emit", &self.emit.is_some())
			.field("keep", &self.keep.is_some())
			.field("on_start", &self.on_start.is_some())
			.field("on_append", &self.on_append.is_some())
			.finish()
	}
}
