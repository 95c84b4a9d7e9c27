/*!
# Parse events

The stream does not tokenize bytes itself. It is fed [`ParseEvent`]s by an
[`EventSource`], which is usually the bundled [`Lexer`](crate::Lexer).
*/
use bytes::Bytes;

use crate::error::TokenizerError;
use crate::tree::{Attributes, Name};

/// Low-level parse event, in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
	/// Opening tag (or the first half of an empty-element tag).
	StartElement { name: Name, attributes: Attributes },

	/// Character data.
	///
	/// Adjacent text events are not merged.
	Text { value: String, cdata: bool },

	/// Closing tag (or the second half of an empty-element tag).
	EndElement { name: Name },

	/// The XML declaration.
	Declaration { encoding: Option<String> },

	/// Malformed input.
	Error(TokenizerError),

	/// End of input. No events follow.
	End,
}

/**
# Push-based source of parse events

Bytes are pushed in with [`write`](Self::write) and [`end`](Self::end);
events are pulled out with [`read`](Self::read) until it returns `None`.

While paused, a source must not return any events from `read`. It may keep
accepting bytes.
*/
pub trait EventSource {
	/// Feed a chunk of bytes.
	///
	/// Returns false if the source does not accept any more data (because
	/// [`end`](Self::end) has been called already).
	fn write(&mut self, data: Bytes) -> bool;

	/// Signal the end of input.
	fn end(&mut self);

	/// Stop yielding events until [`resume`](Self::resume) is called.
	fn pause(&mut self);

	fn resume(&mut self);

	/// Switch the encoding used to decode following bytes.
	fn set_encoding(&mut self, encoding: &str) -> Result<(), TokenizerError>;

	/// Return the next available event.
	///
	/// `None` means that no event is available with the data written so
	/// far (or that the source is paused). After an
	/// [`ParseEvent::End`] has been returned, this always returns `None`.
	fn read(&mut self) -> Option<ParseEvent>;
}

impl<T: EventSource + ?Sized> EventSource for &mut T {
	fn write(&mut self, data: Bytes) -> bool {
		(**self).write(data)
	}

	fn end(&mut self) {
		(**self).end()
	}

	fn pause(&mut self) {
		(**self).pause()
	}

	fn resume(&mut self) {
		(**self).resume()
	}

	fn set_encoding(&mut self, encoding: &str) -> Result<(), TokenizerError> {
		(**self).set_encoding(encoding)
	}

	fn read(&mut self) -> Option<ParseEvent> {
		(**self).read()
	}
}

impl<T: EventSource + ?Sized> EventSource for Box<T> {
	fn write(&mut self, data: Bytes) -> bool {
		(**self).write(data)
	}

	fn end(&mut self) {
		(**self).end()
	}

	fn pause(&mut self) {
		(**self).pause()
	}

	fn resume(&mut self) {
		(**self).resume()
	}

	fn set_encoding(&mut self, encoding: &str) -> Result<(), TokenizerError> {
		(**self).set_encoding(encoding)
	}

	fn read(&mut self) -> Option<ParseEvent> {
		(**self).read()
	}
}
