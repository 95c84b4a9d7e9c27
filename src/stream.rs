/*!
# Filtering tree stream

[`XmlStream`] ties the pieces together: bytes go into an
[`EventSource`], the resulting events build a [`Document`], every closed
element is judged by an [`ElementFilter`], and emitted elements are pushed to
a [`Consumer`].

The stream is single-threaded and cooperative. All operations take
`&mut self`, so that exactly one event is processed at a time. Processing is
suspended while a deferred predicate is pending and while the consumer pushes
back; in both cases the event source is paused.
*/
use bytes::Bytes;

use crate::builder::{Appended, Closed, Opened, TreeBuilder, DEFAULT_MAX_DEPTH};
use crate::bufq::{BufferQueue, Queued};
use crate::consumer::{Consumer, PollReady};
use crate::error::{Error, Result, TokenizerError};
use crate::event::{EventSource, ParseEvent};
use crate::filter::{Decision, ElementFilter, ElementInfo};
use crate::lexer::{Lexer, LexerOptions};
use crate::tree::{Document, Element};

/// Default for [`StreamOptions::read_chunk_size`].
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8192;

/// What to do with malformed input reported by the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
	/// Fail the stream.
	Fatal,

	/// Log a warning and continue with the next event.
	///
	/// Only the error event itself is skipped. The bundled [`Lexer`] is
	/// poisoned by its first error: it drops all remaining input and reports
	/// the end of the document once [`XmlStream::end`] is called. The stream
	/// then ends normally on a truncated document, discarding any elements
	/// which were still open. Custom event sources may recover instead.
	Suppress,
}

impl Default for ErrorPolicy {
	fn default() -> Self {
		ErrorPolicy::Fatal
	}
}

/**
# Stream configuration

```
use xmlsieve::{ErrorPolicy, LexerOptions, StreamOptions};
let options = StreamOptions::default()
	.tokenizer_errors(ErrorPolicy::Suppress)
	.lexer(LexerOptions::default().max_token_length(1024));
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOptions {
	/// Handling of tokenizer errors.
	pub tokenizer_errors: ErrorPolicy,

	/// Options for the bundled lexer.
	///
	/// Ignored by [`XmlStream::with_source`].
	pub lexer: LexerOptions,

	/// Maximum number of bytes read at once by `pipe_from`.
	pub read_chunk_size: usize,

	/// Maximum number of nested open elements. Opening one more fails the
	/// stream with [`StructuralError::DepthLimitExceeded`].
	///
	///    [`StructuralError::DepthLimitExceeded`]: crate::StructuralError::DepthLimitExceeded
	pub max_depth: usize,
}

impl Default for StreamOptions {
	fn default() -> Self {
		StreamOptions {
			tokenizer_errors: ErrorPolicy::default(),
			lexer: LexerOptions::default(),
			read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
			max_depth: DEFAULT_MAX_DEPTH,
		}
	}
}

impl StreamOptions {
	pub fn tokenizer_errors(mut self, v: ErrorPolicy) -> StreamOptions {
		self.tokenizer_errors = v;
		self
	}

	pub fn lexer(mut self, v: LexerOptions) -> StreamOptions {
		self.lexer = v;
		self
	}

	/// Set the [`StreamOptions::read_chunk_size`]; zero is treated as one.
	pub fn read_chunk_size(mut self, v: usize) -> StreamOptions {
		self.read_chunk_size = std::cmp::max(1, v);
		self
	}

	pub fn max_depth(mut self, v: usize) -> StreamOptions {
		self.max_depth = v;
		self
	}
}

/// Lifecycle state of an [`XmlStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamState {
	/// Nothing has been written yet.
	Idle,
	/// Data has been written.
	Open,
	/// `end` has been called, remaining input is being processed.
	Ending,
	/// The document has been processed completely.
	Ended,
	/// The stream failed with the contained error.
	Failed(Error),
}

impl StreamState {
	/// True for [`StreamState::Ended`] and [`StreamState::Failed`].
	pub fn is_terminal(&self) -> bool {
		matches!(self, StreamState::Ended | StreamState::Failed(_))
	}
}

/// Counters collected while processing a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
	/// Elements which were closed and judged by the filter.
	pub elements: usize,
	/// Elements pushed to the consumer.
	pub emitted: usize,
	/// Elements removed from the document.
	pub pruned: usize,
	/// Text nodes added to the document.
	pub texts: usize,
	/// Tokenizer errors ignored under [`ErrorPolicy::Suppress`].
	pub suppressed_errors: usize,
}

async fn settle<S: EventSource + ?Sized>(source: &mut S, decision: Decision<'_>) -> Result<bool> {
	let outcome = match decision {
		Decision::Ready(r) => r,
		Decision::Deferred(fut) => {
			source.pause();
			let r = fut.await;
			source.resume();
			r
		}
	};
	outcome.map_err(Error::Filter)
}

/**
# Streaming XML-to-tree bridge

```
use xmlsieve::{Filter, XmlStream};

# tokio_test::block_on(async {
let filter = Filter::new()
	.emit(|info| info.level() == 1)
	.keep(|_| true);
let mut stream = XmlStream::new(filter, Vec::new());
stream.write("<a><b/><c>x</c></a>").await.unwrap();
stream.end(None).await.unwrap();
let names: Vec<_> = stream.consumer().iter().map(|el| el.name().to_string()).collect();
assert_eq!(names, vec!["b", "c"]);
# });
```

Dropping the stream before it ended or failed notifies the consumer with
[`Error::Cancelled`]. Dropping a future returned by one of the operations
before it completed leaves the stream interrupted: the next operation fails
the stream with [`Error::Cancelled`].
*/
pub struct XmlStream<F: ElementFilter, C: Consumer, S: EventSource = Lexer> {
	source: S,
	builder: TreeBuilder,
	filter: F,
	consumer: C,
	pending: BufferQueue,
	state: StreamState,
	blocked: bool,
	in_flight: bool,
	notified: bool,
	options: StreamOptions,
	stats: Stats,
}

impl<F: ElementFilter, C: Consumer> XmlStream<F, C, Lexer> {
	/// Create a stream which tokenizes bytes with the bundled [`Lexer`].
	pub fn new(filter: F, consumer: C) -> Self {
		Self::with_options(filter, consumer, StreamOptions::default())
	}

	pub fn with_options(filter: F, consumer: C, options: StreamOptions) -> Self {
		let source = Lexer::with_options(options.lexer);
		Self::with_source(source, filter, consumer, options)
	}
}

impl<F: ElementFilter, C: Consumer, S: EventSource> XmlStream<F, C, S> {
	/// Create a stream on top of a custom event source.
	pub fn with_source(source: S, filter: F, consumer: C, options: StreamOptions) -> Self {
		Self {
			source,
			builder: TreeBuilder::with_max_depth(options.max_depth),
			filter,
			consumer,
			pending: BufferQueue::new(),
			state: StreamState::Idle,
			blocked: false,
			in_flight: false,
			notified: false,
			options,
			stats: Stats::default(),
		}
	}

	/// Feed a chunk of bytes.
	///
	/// Returns `Ok(false)` if the consumer pushed back. The chunk has been
	/// accepted in that case, but it may only be processed once the consumer
	/// is [`ready`](Self::ready) again.
	///
	/// # Errors
	///
	/// [`Error::AlreadyEnded`] if [`end`](Self::end) has been called before.
	/// If the stream has failed, the error it failed with.
	pub async fn write<T: Into<Bytes>>(&mut self, chunk: T) -> Result<bool> {
		self.enter()?;
		let result = self.write_inner(chunk.into()).await;
		self.in_flight = false;
		result
	}

	/// Signal the end of input, optionally after writing a last chunk.
	///
	/// Waits until all queued input has been processed, which may involve
	/// waiting for the consumer.
	///
	/// # Errors
	///
	/// [`Error::AlreadyEnded`] on any call after the first. If the stream
	/// fails while processing the remaining input, the error it failed with.
	pub async fn end(&mut self, chunk: Option<Bytes>) -> Result<()> {
		self.enter()?;
		let result = self.end_inner(chunk).await;
		self.in_flight = false;
		result
	}

	/// Wait until the consumer is ready, then process queued input.
	///
	/// Returns `Ok(false)` if the consumer pushed back again before the queue
	/// was drained.
	pub async fn ready(&mut self) -> Result<bool> {
		self.enter()?;
		let result = self.ready_inner().await;
		self.in_flight = false;
		result
	}

	fn enter(&mut self) -> Result<()> {
		if self.in_flight {
			self.in_flight = false;
			log::debug!("previous operation on stream was interrupted");
			self.fail(Error::Cancelled);
		}
		if let StreamState::Failed(e) = &self.state {
			return Err(e.clone());
		}
		self.in_flight = true;
		Ok(())
	}

	fn open(&mut self) -> Result<()> {
		match self.state {
			StreamState::Ending | StreamState::Ended => Err(Error::AlreadyEnded),
			StreamState::Idle => {
				log::debug!("stream opened");
				self.state = StreamState::Open;
				Ok(())
			}
			_ => Ok(()),
		}
	}

	async fn feed(&mut self, chunk: Bytes) -> Result<()> {
		if self.blocked || !self.pending.is_empty() {
			log::trace!(
				"queueing {} bytes behind {} pending bytes",
				chunk.len(),
				self.pending.len()
			);
			self.pending.push(chunk);
			return Ok(());
		}
		self.source.write(chunk);
		self.pump().await
	}

	async fn write_inner(&mut self, chunk: Bytes) -> Result<bool> {
		self.open()?;
		self.feed(chunk).await?;
		Ok(!self.blocked)
	}

	async fn end_inner(&mut self, chunk: Option<Bytes>) -> Result<()> {
		self.open()?;
		if let Some(chunk) = chunk {
			self.feed(chunk).await?;
		}
		log::debug!("ending stream");
		self.state = StreamState::Ending;
		if self.blocked || !self.pending.is_empty() {
			self.pending.push_eof();
		} else {
			self.source.end();
			self.pump().await?;
		}
		while self.state == StreamState::Ending && self.blocked {
			self.ready_inner().await?;
		}
		Ok(())
	}

	async fn ready_inner(&mut self) -> Result<bool> {
		if self.blocked {
			PollReady::new(&mut self.consumer).await;
			log::debug!("consumer ready, resuming input");
			self.blocked = false;
			self.source.resume();
		}
		self.pump().await?;
		while !self.blocked {
			match self.pending.pop() {
				Some(Queued::Chunk(chunk)) => {
					self.source.write(chunk);
				}
				Some(Queued::Eof) => {
					self.source.end();
				}
				None => break,
			}
			self.pump().await?;
		}
		Ok(!self.blocked)
	}

	/// Process events from the source until it runs dry or the consumer
	/// pushes back.
	async fn pump(&mut self) -> Result<()> {
		while !self.blocked {
			match self.state {
				StreamState::Open | StreamState::Ending => (),
				_ => break,
			}
			let ev = match self.source.read() {
				Some(ev) => ev,
				None => break,
			};
			log::trace!("event: {:?}", ev);
			if let Err(e) = self.ingest(ev).await {
				self.fail(e.clone());
				return Err(e);
			}
		}
		Ok(())
	}

	/// Apply a single event.
	async fn ingest(&mut self, ev: ParseEvent) -> Result<()> {
		match ev {
			ParseEvent::StartElement { name, attributes } => {
				let opened = self.builder.start_element(name, attributes)?;
				self.opened(opened);
			}
			ParseEvent::Text { value, cdata } => {
				let appended = self.builder.text(value, cdata)?;
				self.stats.texts += 1;
				self.appended(appended);
			}
			ParseEvent::EndElement { name } => {
				let closed = self.builder.end_element(&name)?;
				self.judge(closed).await?;
			}
			ParseEvent::Declaration { encoding } => {
				if let Some(label) = encoding.as_deref() {
					if let Err(e) = self.source.set_encoding(label) {
						self.tokenizer_error(e)?;
					}
				}
				self.builder.set_encoding(encoding);
			}
			ParseEvent::Error(e) => self.tokenizer_error(e)?,
			ParseEvent::End => self.finish(),
		}
		Ok(())
	}

	/// Tell the filter about a new element and, unless it is the root, about
	/// its parent gaining a child.
	fn opened(&mut self, opened: Opened) {
		let XmlStream {
			filter, builder, ..
		} = self;
		let doc = match builder.document() {
			Some(doc) => doc,
			None => unreachable!("element opened without a document"),
		};
		filter.started(ElementInfo::new(doc, opened.id, opened.level));
		if let (Some(parent), Some(node)) = (opened.parent, doc.node(opened.id)) {
			filter.appended(ElementInfo::new(doc, parent, opened.level - 1), node);
		}
	}

	fn appended(&mut self, appended: Appended) {
		let XmlStream {
			filter, builder, ..
		} = self;
		let doc = match builder.document() {
			Some(doc) => doc,
			None => unreachable!("text appended without a document"),
		};
		if let Some(node) = doc.node(appended.id) {
			filter.appended(ElementInfo::new(doc, appended.parent, appended.level), node);
		}
	}

	fn tokenizer_error(&mut self, e: TokenizerError) -> Result<()> {
		match self.options.tokenizer_errors {
			ErrorPolicy::Fatal => Err(Error::Tokenizer(e)),
			ErrorPolicy::Suppress => {
				log::warn!("ignoring malformed input: {}", e);
				self.stats.suppressed_errors += 1;
				Ok(())
			}
		}
	}

	/// Evaluate the filter for a closed element and apply its decision.
	async fn judge(&mut self, closed: Closed) -> Result<()> {
		let (emit, keep) = {
			let XmlStream {
				filter,
				builder,
				source,
				..
			} = self;
			let doc = match builder.document() {
				Some(doc) => doc,
				None => unreachable!("element closed without a document"),
			};
			let info = ElementInfo::new(doc, closed.id, closed.level);
			let emit = settle(&mut *source, filter.emit(info)).await?;
			let keep = settle(&mut *source, filter.keep(info)).await?;
			(emit, keep)
		};
		log::trace!(
			"element at level {} judged: emit={} keep={}",
			closed.level,
			emit,
			keep
		);
		self.stats.elements += 1;
		match (emit, keep) {
			(true, true) => {
				let el = match self.builder.document().and_then(|d| d.element(closed.id)) {
					Some(el) => el.to_element(),
					None => unreachable!("closed element missing from document"),
				};
				self.deliver(el);
			}
			(true, false) => {
				if let Some(el) = self.builder.take(closed.id) {
					self.stats.pruned += 1;
					self.deliver(el);
				}
			}
			(false, false) => {
				self.builder.prune(closed.id);
				self.stats.pruned += 1;
			}
			(false, true) => (),
		}
		Ok(())
	}

	fn deliver(&mut self, el: Element) {
		self.stats.emitted += 1;
		if !self.consumer.push(el) && !self.blocked {
			log::debug!("consumer pushed back, pausing input");
			self.blocked = true;
			self.source.pause();
		}
	}

	fn finish(&mut self) {
		let open = self.builder.abandon();
		if open > 0 {
			log::warn!("discarding {} unclosed element(s) at end of input", open);
		}
		self.state = StreamState::Ended;
		if !self.notified {
			self.notified = true;
			self.consumer.on_end();
		}
		log::debug!(
			"stream ended: {} elements judged, {} emitted, {} pruned",
			self.stats.elements,
			self.stats.emitted,
			self.stats.pruned
		);
	}

	/// Enter the failed state and notify the consumer.
	///
	/// Has no effect if the stream has already failed.
	pub(crate) fn fail(&mut self, e: Error) {
		if let StreamState::Failed(_) = self.state {
			return;
		}
		log::debug!("stream failed: {}", e);
		self.pending.clear();
		self.builder.abandon();
		if !self.notified {
			self.notified = true;
			self.consumer.on_error(&e);
		}
		self.state = StreamState::Failed(e);
	}

	pub(crate) fn read_chunk_size(&self) -> usize {
		self.options.read_chunk_size
	}

	pub fn state(&self) -> &StreamState {
		&self.state
	}

	/// True while the consumer pushes back.
	pub fn is_blocked(&self) -> bool {
		self.blocked
	}

	pub fn stats(&self) -> Stats {
		self.stats
	}

	/// The document built so far, if the root element has been opened.
	pub fn document(&self) -> Option<&Document> {
		self.builder.document()
	}

	/// Consume the stream and return the document.
	///
	/// Like dropping, this notifies the consumer with [`Error::Cancelled`]
	/// if the stream has neither ended nor failed.
	pub fn into_document(mut self) -> Option<Document> {
		std::mem::take(&mut self.builder).into_document()
	}

	pub fn consumer(&self) -> &C {
		&self.consumer
	}

	pub fn consumer_mut(&mut self) -> &mut C {
		&mut self.consumer
	}

	pub fn filter(&self) -> &F {
		&self.filter
	}

	pub fn source(&self) -> &S {
		&self.source
	}
}

impl<F: ElementFilter, C: Consumer, S: EventSource> Drop for XmlStream<F, C, S> {
	fn drop(&mut self) {
		if self.state.is_terminal() {
			return;
		}
		log::debug!("stream dropped before it ended");
		self.pending.clear();
		self.builder.abandon();
		if !self.notified {
			self.notified = true;
			self.consumer.on_error(&Error::Cancelled);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::filter::Filter;

	fn keep_all() -> Filter {
		Filter::new().emit(|_| false).keep(|_| true)
	}

	#[test]
	fn options_builder_sets_fields() {
		let opts = StreamOptions::default()
			.tokenizer_errors(ErrorPolicy::Suppress)
			.read_chunk_size(0)
			.max_depth(16);
		assert_eq!(opts.tokenizer_errors, ErrorPolicy::Suppress);
		assert_eq!(opts.read_chunk_size, 1);
		assert_eq!(opts.max_depth, 16);
		assert_eq!(StreamOptions::default().max_depth, DEFAULT_MAX_DEPTH);
		assert_eq!(StreamOptions::default().tokenizer_errors, ErrorPolicy::Fatal);
	}

	#[test]
	fn stream_moves_through_lifecycle_states() {
		tokio_test::block_on(async {
			let mut stream = XmlStream::new(keep_all(), Vec::new());
			assert_eq!(*stream.state(), StreamState::Idle);
			stream.write("<a>").await.unwrap();
			assert_eq!(*stream.state(), StreamState::Open);
			stream.end(Some("</a>".into())).await.unwrap();
			assert_eq!(*stream.state(), StreamState::Ended);
			assert!(stream.state().is_terminal());
		});
	}

	#[test]
	fn stream_counts_judged_and_pruned_elements() {
		tokio_test::block_on(async {
			let filter = Filter::new()
				.emit(|info| info.name() == "b")
				.keep(|info| info.level() == 0);
			let mut stream = XmlStream::new(filter, Vec::new());
			stream
				.end(Some("<a><b>x</b><c/><b/></a>".into()))
				.await
				.unwrap();
			assert_eq!(
				stream.stats(),
				Stats {
					elements: 4,
					emitted: 2,
					pruned: 3,
					texts: 1,
					suppressed_errors: 0,
				}
			);
		});
	}

	#[test]
	fn stream_records_declared_encoding() {
		tokio_test::block_on(async {
			let mut stream = XmlStream::new(keep_all(), Vec::new());
			stream
				.end(Some(Bytes::from_static(
					b"<?xml version='1.0' encoding='ISO-8859-1'?><a>\xe4</a>",
				)))
				.await
				.unwrap();
			let doc = stream.document().unwrap();
			assert_eq!(doc.encoding(), Some("ISO-8859-1"));
			assert_eq!(doc.root().unwrap().text(), "ä");
		});
	}

	#[test]
	fn stream_fails_on_unsupported_encoding() {
		tokio_test::block_on(async {
			let mut stream = XmlStream::new(keep_all(), Vec::new());
			let r = stream
				.end(Some("<?xml version='1.0' encoding='EBCDIC'?><a/>".into()))
				.await;
			assert_eq!(
				r,
				Err(Error::Tokenizer(TokenizerError::UnsupportedEncoding(
					"EBCDIC".to_string()
				)))
			);
		});
	}

	#[test]
	fn into_document_returns_tree() {
		tokio_test::block_on(async {
			let mut stream = XmlStream::new(keep_all(), Vec::new());
			stream.end(Some("<a><b/></a>".into())).await.unwrap();
			let doc = stream.into_document().unwrap();
			assert_eq!(doc.element_count(), 2);
		});
	}
}
