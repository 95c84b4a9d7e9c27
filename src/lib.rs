/*!
# Streaming XML-to-tree bridge

This crate incrementally builds a document tree from an XML byte stream and
lets a filter decide, whenever an element is closed, whether that element is

* emitted to a downstream consumer, and
* retained in the in-memory tree.

Elements which are not retained are pruned right away, so that arbitrarily
long documents (think of an endless `<stream>` of `<item>`s) can be processed
in bounded memory. Elements which are retained but not emitted stay
queryable from their ancestors.

## Features

* Push-based: write chunks of any size as they arrive
* Emit/keep filter contract with synchronous or asynchronous predicates
* Backpressure: a slow consumer suspends input processing
* Bundled push lexer on top of `quick-xml` and `encoding_rs`; custom event
  sources can be plugged in
* Tokio-based piping from [`tokio::io::AsyncRead`] via the `async` feature
* A [`futures_core::Stream`] of emitted elements via the `stream` feature

Not supported are validation against a DTD or schema, namespace resolution
(names keep their raw prefixes) and writing XML.

## Example

```
use xmlsieve::{channel, Filter, XmlStream};

# tokio_test::block_on(async {
let (tx, mut rx) = channel(16);
let filter = Filter::new()
	// emit every child of the root element
	.emit(|info| info.level() == 1)
	// and only keep the root itself in memory
	.keep(|info| info.level() == 0);
let mut stream = XmlStream::new(filter, tx);
stream.write("<feed><item>one</item>").await.unwrap();
stream.write("<item>two</item></feed>").await.unwrap();
stream.end(None).await.unwrap();

let mut texts = Vec::new();
while let Some(item) = rx.recv().await {
	texts.push(item.unwrap().text());
}
assert_eq!(texts, vec!["one", "two"]);
# });
```

## Logging

The crate logs through the [`log`](https://docs.rs/log) facade and never
installs a logger itself.
*/
pub mod builder;
mod bufq;
pub mod consumer;
pub mod error;
pub mod event;
pub mod filter;
#[cfg(feature = "async")]
mod future;
pub mod lexer;
pub mod stream;
pub mod tree;

#[cfg(test)]
pub mod tests;

#[doc(inline)]
pub use consumer::{channel, Consumer, ElementReceiver, ElementSender};
#[doc(inline)]
pub use error::{Error, FilterError, Result, StructuralError, TokenizerError};
#[doc(inline)]
pub use event::{EventSource, ParseEvent};
#[doc(inline)]
pub use filter::{Decision, ElementFilter, ElementInfo, Filter};
#[doc(inline)]
pub use lexer::{Lexer, LexerOptions};
#[doc(inline)]
pub use stream::{ErrorPolicy, Stats, StreamOptions, StreamState, XmlStream};
#[doc(inline)]
pub use tree::{Attributes, Document, Element, ElementRef, Name, Node, NodeId, NodeRef, Text};

/// Package version
pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
