use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;
use tokio_test::assert_pending;

use crate::*;

#[derive(Default)]
struct SinkLog {
	elements: Vec<Element>,
	ends: usize,
	errors: Vec<Error>,
}

/// Consumer which records everything it is told, shared with the test.
#[derive(Clone, Default)]
struct Sink(Rc<RefCell<SinkLog>>);

impl Sink {
	fn names(&self) -> Vec<String> {
		self.0
			.borrow()
			.elements
			.iter()
			.map(|el| el.name().to_string())
			.collect()
	}

	fn ends(&self) -> usize {
		self.0.borrow().ends
	}

	fn errors(&self) -> Vec<Error> {
		self.0.borrow().errors.clone()
	}
}

impl Consumer for Sink {
	fn push(&mut self, element: Element) -> bool {
		self.0.borrow_mut().elements.push(element);
		true
	}

	fn on_end(&mut self) {
		self.0.borrow_mut().ends += 1;
	}

	fn on_error(&mut self, error: &Error) {
		self.0.borrow_mut().errors.push(error.clone());
	}
}

#[derive(Clone, Default)]
struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
	fn record<T: Into<String>>(&self, entry: T) {
		self.0.borrow_mut().push(entry.into());
	}

	fn entries(&self) -> Vec<String> {
		self.0.borrow().clone()
	}
}

/// Lexer wrapper which records the calls made by the stream.
struct Recording {
	inner: Lexer,
	journal: Journal,
}

impl Recording {
	fn new(journal: &Journal) -> Recording {
		Recording {
			inner: Lexer::new(),
			journal: journal.clone(),
		}
	}
}

impl EventSource for Recording {
	fn write(&mut self, data: Bytes) -> bool {
		self.journal
			.record(format!("write {}", String::from_utf8_lossy(&data)));
		self.inner.write(data)
	}

	fn end(&mut self) {
		self.journal.record("end");
		self.inner.end()
	}

	fn pause(&mut self) {
		self.journal.record("pause");
		self.inner.pause()
	}

	fn resume(&mut self) {
		self.journal.record("resume");
		self.inner.resume()
	}

	fn set_encoding(&mut self, encoding: &str) -> std::result::Result<(), TokenizerError> {
		self.inner.set_encoding(encoding)
	}

	fn read(&mut self) -> Option<ParseEvent> {
		self.inner.read()
	}
}

/// Event source which replays a fixed list of events.
struct Scripted(VecDeque<ParseEvent>);

impl Scripted {
	fn new(events: Vec<ParseEvent>) -> Scripted {
		Scripted(events.into())
	}
}

impl EventSource for Scripted {
	fn write(&mut self, _data: Bytes) -> bool {
		true
	}

	fn end(&mut self) {}

	fn pause(&mut self) {}

	fn resume(&mut self) {}

	fn set_encoding(&mut self, _encoding: &str) -> std::result::Result<(), TokenizerError> {
		Ok(())
	}

	fn read(&mut self) -> Option<ParseEvent> {
		self.0.pop_front()
	}
}

fn start(name: &str) -> ParseEvent {
	ParseEvent::StartElement {
		name: name.into(),
		attributes: Attributes::new(),
	}
}

fn end(name: &str) -> ParseEvent {
	ParseEvent::EndElement { name: name.into() }
}

fn run<F: ElementFilter, T: Into<Bytes>>(filter: F, doc: T) -> (Result<()>, XmlStream<F, Sink>, Sink) {
	let sink = Sink::default();
	let mut stream = XmlStream::new(filter, sink.clone());
	let result = tokio_test::block_on(stream.end(Some(doc.into())));
	(result, stream, sink)
}

#[test]
fn always_emit_always_keep_emits_every_element() {
	let doc = "<a><b><c/>text</b><d x='1'>t</d><e/></a>";
	let (result, stream, sink) = run(Filter::new().emit(|_| true).keep(|_| true), doc);
	result.unwrap();
	let element_count = stream.document().unwrap().element_count();
	assert_eq!(element_count, 5);
	assert_eq!(sink.names().len(), element_count);
	assert_eq!(stream.stats().emitted, element_count);
}

#[test]
fn keep_false_leaves_nothing_reachable() {
	let doc = "<a><b><c/>text</b><d>t</d></a>";
	let (result, stream, sink) = run(Filter::new().emit(|_| false).keep(|_| false), doc);
	result.unwrap();
	let document = stream.document().unwrap();
	assert!(document.root().is_none());
	assert_eq!(document.node_count(), 0);
	assert!(sink.names().is_empty());
	assert_eq!(sink.ends(), 1);
}

#[test]
fn emits_children_of_root_and_keeps_everything() {
	let (result, stream, sink) = run(
		Filter::new().emit(|info| info.level() == 1).keep(|_| true),
		"<a><b/><c>x</c></a>",
	);
	result.unwrap();
	assert_eq!(sink.names(), vec!["b", "c"]);
	assert_eq!(stream.document().unwrap().element_count(), 3);
	assert_eq!(sink.0.borrow().elements[1].text(), "x");
}

#[test]
fn keeping_only_root_prunes_children() {
	let (result, stream, sink) = run(
		Filter::new().emit(|_| false).keep(|info| info.level() == 0),
		"<a><b/><c>x</c></a>",
	);
	result.unwrap();
	assert!(sink.names().is_empty());
	let root = stream.document().unwrap().root().unwrap();
	assert_eq!(root.name(), "a");
	assert_eq!(root.children().count(), 0);
}

#[test]
fn mismatched_end_tag_is_structural_error() {
	let calls = Rc::new(Cell::new(0usize));
	let counter = calls.clone();
	let filter = Filter::new()
		.emit(move |_| {
			counter.set(counter.get() + 1);
			false
		})
		.keep(|_| true);
	let sink = Sink::default();
	let mut stream = XmlStream::new(filter, sink.clone());
	tokio_test::block_on(async {
		let expected = Error::Structural(StructuralError::TagMismatch {
			expected: "b".into(),
			found: "a".into(),
		});
		assert_eq!(stream.write("<a><b></a>").await, Err(expected.clone()));
		assert_eq!(stream.write("<c/>").await, Err(expected.clone()));
		assert_eq!(stream.end(None).await, Err(expected.clone()));
		assert_eq!(*stream.state(), StreamState::Failed(expected.clone()));
		assert_eq!(sink.errors(), vec![expected]);
	});
	assert_eq!(calls.get(), 0);
	assert_eq!(sink.ends(), 0);
	drop(stream);
	assert_eq!(sink.errors().len(), 1);
}

#[test]
fn emission_follows_close_order() {
	let doc = "<r><a><b/><c><d/></c></a><e/></r>";
	let (result, _, sink) = run(Filter::new().emit(|_| true).keep(|_| true), doc);
	result.unwrap();
	assert_eq!(sink.names(), vec!["b", "d", "c", "a", "e", "r"]);
}

#[tokio::test]
async fn emission_order_does_not_depend_on_predicate_latency() {
	let filter = Filter::new()
		.emit_async(|info| {
			// later siblings answer faster than earlier ones
			let delay = 10 - info.name().as_bytes()[0] as usize % 10;
			async move {
				for _ in 0..delay {
					tokio::task::yield_now().await;
				}
				Ok::<_, FilterError>(true)
			}
		})
		.keep(|_| true);
	let sink = Sink::default();
	let mut stream = XmlStream::new(filter, sink.clone());
	stream.write(&b"<r><a><b/><c><d/>"[..]).await.unwrap();
	stream.end(Some(Bytes::from_static(b"</c></a><e/></r>"))).await.unwrap();
	assert_eq!(sink.names(), vec!["b", "d", "c", "a", "e", "r"]);
}

#[test]
fn deferred_predicates_pause_the_source() {
	let journal = Journal::default();
	let filter = Filter::new().emit(|_| false).keep_async(|_| async { Ok::<_, FilterError>(true) });
	let mut stream = XmlStream::with_source(
		Recording::new(&journal),
		filter,
		Sink::default(),
		StreamOptions::default(),
	);
	tokio_test::block_on(stream.write("<a/>")).unwrap();
	assert_eq!(journal.entries(), vec!["write <a/>", "pause", "resume"]);
}

#[test]
fn backpressure_holds_back_writes_until_ready() {
	let journal = Journal::default();
	let (tx, mut rx) = channel(1);
	let filter = Filter::new()
		.emit(|info| info.level() == 1)
		.keep(|_| false);
	let mut stream =
		XmlStream::with_source(Recording::new(&journal), filter, tx, StreamOptions::default());
	tokio_test::block_on(async {
		assert_eq!(stream.write("<a><b/>").await, Ok(false));
		assert!(stream.is_blocked());
		assert_eq!(stream.write("<c/>").await, Ok(false));
		assert_eq!(stream.write("<d/>").await, Ok(false));
		assert_eq!(journal.entries(), vec!["write <a><b/>", "pause"]);

		assert_eq!(rx.try_recv().unwrap().unwrap().name(), "b");
		assert_eq!(stream.ready().await, Ok(false));
		assert_eq!(rx.try_recv().unwrap().unwrap().name(), "c");
		assert_eq!(stream.ready().await, Ok(false));
		assert_eq!(rx.try_recv().unwrap().unwrap().name(), "d");
		assert_eq!(stream.ready().await, Ok(true));
		assert!(!stream.is_blocked());
		stream.end(Some("</a>".into())).await.unwrap();
	});
	assert_eq!(
		journal.entries(),
		vec![
			"write <a><b/>",
			"pause",
			"resume",
			"write <c/>",
			"pause",
			"resume",
			"write <d/>",
			"pause",
			"resume",
			"write </a>",
			"end",
		]
	);
	assert!(rx.try_recv().is_none());
	assert!(rx.is_finished());
}

#[tokio::test]
async fn end_waits_for_slow_consumer() {
	let (tx, mut rx) = channel(1);
	let filter = Filter::new()
		.emit(|info| info.level() == 1)
		.keep(|_| false);
	let mut stream = XmlStream::new(filter, tx);
	let doc = "<feed><i n='1'/><i n='2'/><i n='3'/><i n='4'/><i n='5'/></feed>";
	let (ended, received) = tokio::join!(stream.end(Some(doc.into())), async {
		let mut seen = Vec::new();
		while let Some(el) = rx.recv().await {
			let el = el.unwrap();
			seen.push(el.attribute("n").unwrap().to_string());
			tokio::task::yield_now().await;
		}
		seen
	});
	ended.unwrap();
	assert_eq!(received, vec!["1", "2", "3", "4", "5"]);
	assert_eq!(*stream.state(), StreamState::Ended);
}

#[test]
fn end_twice_fails_second_time() {
	let sink = Sink::default();
	let mut stream = XmlStream::new(Filter::new().emit(|_| false).keep(|_| true), sink.clone());
	tokio_test::block_on(async {
		stream.write("<a/>").await.unwrap();
		assert_eq!(stream.end(None).await, Ok(()));
		assert_eq!(stream.end(None).await, Err(Error::AlreadyEnded));
		assert_eq!(stream.write("<b/>").await, Err(Error::AlreadyEnded));
	});
	assert_eq!(*stream.state(), StreamState::Ended);
	assert_eq!(sink.ends(), 1);
	assert!(sink.errors().is_empty());
}

#[test]
fn emit_without_keep_moves_subtree_out() {
	let (result, stream, sink) = run(
		Filter::new().emit(|info| info.name() == "b").keep(|info| info.name() != "b"),
		"<a><b k='v'><c>1</c><c>2</c></b></a>",
	);
	result.unwrap();
	let log = sink.0.borrow();
	let b = &log.elements[0];
	assert_eq!(b.attribute("k"), Some("v"));
	assert_eq!(b.elements().count(), 2);
	assert_eq!(b.text(), "12");
	let root = stream.document().unwrap().root().unwrap();
	assert_eq!(root.children().count(), 0);
}

#[test]
fn kept_descendants_are_visible_to_ancestor_predicates() {
	let (result, _, sink) = run(
		Filter::new()
			.emit(|info| info.element().find("flag").is_some())
			.keep(|info| info.name() != "junk"),
		"<a><b><flag/></b><b><junk/></b></a>",
	);
	result.unwrap();
	assert_eq!(sink.names(), vec!["b"]);
	let log = sink.0.borrow();
	assert_eq!(log.elements[0].find("flag").map(|f| f.name()), Some("flag"));
}

#[test]
fn pruned_descendants_are_absent_from_emitted_ancestors() {
	let (result, _, sink) = run(
		Filter::new()
			.emit(|info| info.level() == 0)
			.keep(|info| info.level() < 2),
		"<a><b><c>deep</c></b>top</a>",
	);
	result.unwrap();
	let log = sink.0.borrow();
	let a = &log.elements[0];
	assert_eq!(a.find("b").unwrap().children().len(), 0);
	assert_eq!(a.text(), "top");
}

#[test]
fn missing_predicate_fails_stream() {
	let (result, _, sink) = run(Filter::new().emit(|_| true), "<a/>");
	let expected = Error::Filter(FilterError::NotImplemented("keep"));
	assert_eq!(result, Err(expected.clone()));
	assert_eq!(sink.errors(), vec![expected]);
	// emission is withheld because keep failed
	assert!(sink.names().is_empty());
}

#[test]
fn predicate_error_fails_stream() {
	let (result, _, sink) = run(
		Filter::new()
			.try_emit(|info| {
				if info.name() == "bad" {
					Err(FilterError::from("bad element"))
				} else {
					Ok(true)
				}
			})
			.keep(|_| true),
		"<a><ok/><bad/><ok/></a>",
	);
	match result {
		Err(Error::Filter(FilterError::Predicate(e))) => assert_eq!(e.to_string(), "bad element"),
		other => panic!("unexpected result: {:?}", other),
	}
	assert_eq!(sink.names(), vec!["ok"]);
	assert_eq!(sink.errors().len(), 1);
}

#[test]
fn junk_after_root_fails_by_default() {
	let sink = Sink::default();
	let mut stream = XmlStream::new(Filter::new().emit(|_| true).keep(|_| true), sink.clone());
	tokio_test::block_on(async {
		stream.write("<?xml version='1.0'?><a/>").await.unwrap();
		assert_eq!(
			stream.write("<?xml version='1.0'?><a/>").await,
			Err(Error::Tokenizer(TokenizerError::JunkAfterDocumentElement))
		);
	});
	assert_eq!(sink.names(), vec!["a"]);
	assert_eq!(sink.errors().len(), 1);
}

#[test]
fn junk_after_root_is_ignored_when_suppressed() {
	let sink = Sink::default();
	let options = StreamOptions::default().tokenizer_errors(ErrorPolicy::Suppress);
	let mut stream = XmlStream::with_options(
		Filter::new().emit(|_| true).keep(|_| true),
		sink.clone(),
		options,
	);
	tokio_test::block_on(async {
		stream.write("<a/><b/>").await.unwrap();
		stream.end(None).await.unwrap();
	});
	assert_eq!(sink.names(), vec!["a"]);
	assert_eq!(sink.ends(), 1);
	assert!(sink.errors().is_empty());
	assert_eq!(stream.stats().suppressed_errors, 1);
}

#[test]
fn unclosed_elements_are_discarded_when_suppressed() {
	let sink = Sink::default();
	let options = StreamOptions::default().tokenizer_errors(ErrorPolicy::Suppress);
	let mut stream = XmlStream::with_options(
		Filter::new().emit(|_| true).keep(|_| true),
		sink.clone(),
		options,
	);
	tokio_test::block_on(stream.end(Some("<a><b/><c>".into()))).unwrap();
	assert_eq!(sink.names(), vec!["b"]);
	assert_eq!(*stream.state(), StreamState::Ended);
	assert!(stream.document().unwrap().root().is_none());
}

#[test]
fn empty_input_fails_by_default() {
	let (result, _, sink) = run(Filter::new(), "");
	assert_eq!(
		result,
		Err(Error::Tokenizer(TokenizerError::InvalidEof(
			error::ERRCTX_DOCBEGIN
		)))
	);
	assert_eq!(sink.errors().len(), 1);
}

#[test]
fn text_before_root_is_empty_document_error() {
	let source = Scripted::new(vec![ParseEvent::Text {
		value: "x".to_string(),
		cdata: false,
	}]);
	let sink = Sink::default();
	let mut stream = XmlStream::with_source(source, Filter::new(), sink.clone(), StreamOptions::default());
	assert_eq!(
		tokio_test::block_on(stream.write("")),
		Err(Error::EmptyDocument)
	);
	assert_eq!(sink.errors(), vec![Error::EmptyDocument]);
}

#[test]
fn element_after_root_is_structural_error() {
	let source = Scripted::new(vec![start("a"), end("a"), start("b")]);
	let mut stream = XmlStream::with_source(
		source,
		Filter::new().emit(|_| false).keep(|_| true),
		Sink::default(),
		StreamOptions::default(),
	);
	assert!(matches!(
		tokio_test::block_on(stream.write("")),
		Err(Error::Structural(StructuralError::StackEmpty(_)))
	));
}

#[test]
fn dropping_open_stream_cancels_consumer() {
	let (tx, mut rx) = channel(4);
	let mut stream = XmlStream::new(Filter::new().emit(|_| true).keep(|_| true), tx);
	tokio_test::block_on(stream.write("<a><b/>")).unwrap();
	drop(stream);
	assert_eq!(rx.try_recv().unwrap().unwrap().name(), "b");
	assert_eq!(rx.try_recv().unwrap().unwrap_err(), Error::Cancelled);
	assert!(rx.try_recv().is_none());
}

#[test]
fn dropping_idle_stream_cancels_consumer() {
	let sink = Sink::default();
	drop(XmlStream::new(Filter::new(), sink.clone()));
	assert_eq!(sink.errors(), vec![Error::Cancelled]);
}

#[test]
fn dropping_ended_stream_does_not_cancel() {
	let (tx, mut rx) = channel(4);
	let mut stream = XmlStream::new(Filter::new().emit(|_| false).keep(|_| true), tx);
	tokio_test::block_on(stream.end(Some("<a/>".into()))).unwrap();
	drop(stream);
	assert!(rx.try_recv().is_none());
	assert!(rx.is_finished());
}

#[test]
fn interrupted_operation_cancels_stream() {
	let sink = Sink::default();
	let filter = Filter::new()
		.emit(|_| false)
		.keep_async(|_| std::future::pending::<std::result::Result<bool, FilterError>>());
	let mut stream = XmlStream::new(filter, sink.clone());
	{
		let mut write = tokio_test::task::spawn(stream.write("<a/>"));
		assert_pending!(write.poll());
	}
	assert_eq!(
		tokio_test::block_on(stream.write("<b/>")),
		Err(Error::Cancelled)
	);
	assert_eq!(*stream.state(), StreamState::Failed(Error::Cancelled));
	assert_eq!(sink.errors(), vec![Error::Cancelled]);
	drop(stream);
	assert_eq!(sink.errors().len(), 1);
}

#[test]
fn cdata_flag_reaches_the_tree() {
	let (result, stream, _) = run(
		Filter::new().emit(|_| false).keep(|_| true),
		"<a>plain<![CDATA[<raw>]]></a>",
	);
	result.unwrap();
	let root = stream.document().unwrap().root().unwrap();
	let flags: Vec<_> = root
		.children()
		.map(|c| match c {
			NodeRef::Text(t) => (t.as_str().to_string(), t.is_cdata()),
			NodeRef::Element(_) => panic!("unexpected element"),
		})
		.collect();
	assert_eq!(
		flags,
		vec![("plain".to_string(), false), ("<raw>".to_string(), true)]
	);
}

#[test]
fn prefixes_are_kept_raw() {
	let (result, _, sink) = run(
		Filter::new().emit(|info| info.level() == 1).keep(|_| false),
		"<s:root xmlns:s='urn:x'><s:item/><other/></s:root>",
	);
	result.unwrap();
	let log = sink.0.borrow();
	assert_eq!(log.elements[0].prefix(), Some("s"));
	assert_eq!(log.elements[0].local_name(), "item");
	assert_eq!(log.elements[1].prefix(), None);
}

#[test]
fn dropping_blocked_stream_discards_queued_writes() {
	let journal = Journal::default();
	let calls = Rc::new(Cell::new(0usize));
	let counter = calls.clone();
	let (tx, mut rx) = channel(1);
	let filter = Filter::new()
		.emit(move |info| {
			counter.set(counter.get() + 1);
			info.level() == 1
		})
		.keep(|_| false);
	let mut stream =
		XmlStream::with_source(Recording::new(&journal), filter, tx, StreamOptions::default());
	tokio_test::block_on(async {
		assert_eq!(stream.write("<a><b/>").await, Ok(false));
		assert_eq!(stream.write("<c/>").await, Ok(false));
		assert_eq!(stream.write("<d/>").await, Ok(false));
	});
	assert!(stream.is_blocked());
	assert_eq!(calls.get(), 1);
	drop(stream);
	assert_eq!(calls.get(), 1);
	assert_eq!(journal.entries(), vec!["write <a><b/>", "pause"]);
	assert_eq!(rx.try_recv().unwrap().unwrap().name(), "b");
	assert_eq!(rx.try_recv().unwrap().unwrap_err(), Error::Cancelled);
	assert!(rx.try_recv().is_none());
	assert!(rx.is_finished());
}

#[test]
fn deep_nesting_is_emitted_without_recursion() {
	const DEPTH: usize = 100_000;
	let doc = format!("{}{}", "<x>".repeat(DEPTH), "</x>".repeat(DEPTH));
	let sink = Sink::default();
	let mut stream = XmlStream::with_options(
		Filter::new().emit(|info| info.level() == 0).keep(|_| true),
		sink.clone(),
		StreamOptions::default().max_depth(usize::MAX),
	);
	tokio_test::block_on(stream.end(Some(doc.into()))).unwrap();
	assert_eq!(stream.document().unwrap().element_count(), DEPTH);
	let log = sink.0.borrow();
	assert_eq!(log.elements.len(), 1);
	assert_eq!(log.elements[0].element_count(), DEPTH);
}

#[test]
fn nesting_beyond_default_limit_fails() {
	let limit = builder::DEFAULT_MAX_DEPTH;
	let within = format!("{}{}", "<x>".repeat(limit), "</x>".repeat(limit));
	let (result, _, _) = run(Filter::new().emit(|_| false).keep(|_| true), within);
	result.unwrap();

	let sink = Sink::default();
	let mut stream = XmlStream::new(Filter::new().emit(|_| false).keep(|_| true), sink.clone());
	let expected = Error::Structural(StructuralError::DepthLimitExceeded(limit));
	assert_eq!(
		tokio_test::block_on(stream.write("<x>".repeat(limit + 1))),
		Err(expected.clone())
	);
	assert_eq!(sink.errors(), vec![expected]);
}

#[test]
fn hooks_see_nodes_as_they_are_added() {
	let seen = Rc::new(RefCell::new(Vec::new()));
	let on_start = seen.clone();
	let on_append = seen.clone();
	let filter = Filter::new()
		.emit(|_| false)
		.keep(|_| true)
		.on_start(move |info| {
			on_start
				.borrow_mut()
				.push(format!("start {} @{}", info.name(), info.level()))
		})
		.on_append(move |parent, node| {
			let what = match node {
				NodeRef::Element(el) => format!("<{}>", el.name()),
				NodeRef::Text(t) => t.as_str().to_string(),
			};
			on_append
				.borrow_mut()
				.push(format!("append {} {}", parent.name(), what))
		});
	let (result, _, _) = run(filter, "<a>t<b>u</b></a>");
	result.unwrap();
	assert_eq!(
		*seen.borrow(),
		vec![
			"start a @0",
			"append a t",
			"start b @1",
			"append a <b>",
			"append b u",
		]
	);
}
