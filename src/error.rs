/*!
# Error types

This module holds the error types returned by the stream, the tree builder,
the filter machinery and the lexer.
*/
use std::error;
use std::fmt;
use std::io;
use std::ops::Deref;
use std::result::Result as StdResult;
use std::sync::Arc;

use crate::tree::Name;

pub const ERRCTX_UNKNOWN: &'static str = "in unknown context";
pub const ERRCTX_TEXT: &'static str = "in text";
pub const ERRCTX_START_TAG: &'static str = "at start tag";
pub const ERRCTX_END_TAG: &'static str = "at end tag";
pub const ERRCTX_ATTNAME: &'static str = "in attribute name";
pub const ERRCTX_ATTVAL: &'static str = "in attribute value";
pub const ERRCTX_XML_DECL: &'static str = "in XML declaration";
pub const ERRCTX_CDATA_SECTION: &'static str = "in CDATA section";
pub const ERRCTX_COMMENT: &'static str = "in comment";
pub const ERRCTX_PI: &'static str = "in processing instruction";
pub const ERRCTX_DOCTYPE: &'static str = "in DOCTYPE declaration";
pub const ERRCTX_DOCBEGIN: &'static str = "before root element";
pub const ERRCTX_DOCEND: &'static str = "after root element";
pub const ERRCTX_ELEMENT: &'static str = "inside open element";

/// Violation of the document structure detected by the tree builder.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralError {
	/// The end tag does not match the innermost open element.
	TagMismatch {
		/// Name of the element which was open.
		expected: Name,
		/// Name carried by the end tag.
		found: Name,
	},

	/// An event arrived while no element was open, after the root element
	/// had been closed already.
	///
	/// The contents are implementation details.
	StackEmpty(&'static str),

	/// Opening the element would exceed the configured nesting limit.
	DepthLimitExceeded(usize),
}

impl error::Error for StructuralError {}

impl fmt::Display for StructuralError {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::TagMismatch { expected, found } => write!(
				f,
				"end tag {:?} does not match open element {:?}",
				found.as_str(),
				expected.as_str()
			),
			Self::StackEmpty(ctx) => write!(f, "no open element {}", ctx),
			Self::DepthLimitExceeded(max) => {
				write!(f, "element nesting exceeds the limit of {} levels", max)
			}
		}
	}
}

/// Malformed input reported by the lexer (or any other [`EventSource`]).
///
/// Whether these are fatal for the stream is controlled by
/// [`ErrorPolicy`](crate::ErrorPolicy).
///
///    [`EventSource`]: crate::EventSource
#[derive(Debug, Clone, PartialEq)]
pub enum TokenizerError {
	/// End of input encountered while more data was expected.
	///
	/// The contents are implementation details.
	InvalidEof(&'static str),

	/// Generalized invalid syntactic construct.
	InvalidSyntax(&'static str),

	/// Element or attribute name which does not match the XML `Name`
	/// production.
	InvalidName(&'static str, String),

	/// Input character which is not an XML `Char`.
	InvalidChar(&'static str, u32),

	/// Input bytes which are not valid in the active encoding.
	///
	/// Contains the name of the encoding.
	MalformedInput(&'static str),

	/// The declared encoding is not supported.
	UnsupportedEncoding(String),

	/// A construct exceeded [`LexerOptions::max_token_length`].
	///
	///    [`LexerOptions::max_token_length`]: crate::LexerOptions::max_token_length
	TokenTooLong(&'static str),

	/// Content after the root element was closed.
	JunkAfterDocumentElement,

	/// The markup reader rejected a construct (bad tags, duplicate
	/// attributes, unknown entities, ...).
	Xml(XmlErrorWrapper),

	/// A message from a foreign event source.
	Other(String),
}

impl error::Error for TokenizerError {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		match self {
			Self::Xml(e) => Some(&**e),
			_ => None,
		}
	}
}

impl fmt::Display for TokenizerError {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::InvalidEof(ctx) => write!(f, "invalid eof {}", ctx),
			Self::InvalidSyntax(msg) => write!(f, "invalid syntax: {}", msg),
			Self::InvalidName(ctx, name) => write!(f, "invalid name {:?} {}", name, ctx),
			Self::InvalidChar(ctx, cp) => write!(f, "invalid codepoint U+{:x} {}", cp, ctx),
			Self::MalformedInput(enc) => write!(f, "malformed {} input", enc),
			Self::UnsupportedEncoding(name) => write!(f, "unsupported encoding {:?}", name),
			Self::TokenTooLong(ctx) => write!(f, "token too long {}", ctx),
			Self::JunkAfterDocumentElement => f.write_str("junk after document element"),
			Self::Xml(e) => write!(f, "{}", e),
			Self::Other(msg) => f.write_str(msg),
		}
	}
}

impl From<quick_xml::Error> for TokenizerError {
	fn from(e: quick_xml::Error) -> TokenizerError {
		TokenizerError::Xml(XmlErrorWrapper(Arc::new(e)))
	}
}

impl From<quick_xml::events::attributes::AttrError> for TokenizerError {
	fn from(e: quick_xml::events::attributes::AttrError) -> TokenizerError {
		quick_xml::Error::from(e).into()
	}
}

impl From<quick_xml::escape::EscapeError> for TokenizerError {
	fn from(e: quick_xml::escape::EscapeError) -> TokenizerError {
		quick_xml::Error::from(e).into()
	}
}

/// [`std::sync::Arc`]-based wrapper around [`quick_xml::Error`] to allow
/// cloning.
#[derive(Clone)]
pub struct XmlErrorWrapper(Arc<quick_xml::Error>);

impl fmt::Debug for XmlErrorWrapper {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		fmt::Debug::fmt(&**self, f)
	}
}

impl fmt::Display for XmlErrorWrapper {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(&**self, f)
	}
}

impl PartialEq for XmlErrorWrapper {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}

impl Deref for XmlErrorWrapper {
	type Target = quick_xml::Error;

	fn deref(&self) -> &quick_xml::Error {
		&*self.0
	}
}

/// Failure of a filter predicate.
#[derive(Clone)]
pub enum FilterError {
	/// The predicate was never configured.
	///
	/// Contains the name of the predicate (`"emit"` or `"keep"`).
	NotImplemented(&'static str),

	/// The predicate itself returned an error.
	Predicate(Arc<dyn error::Error + Send + Sync + 'static>),
}

impl FilterError {
	/// Wrap an arbitrary error returned from a predicate.
	pub fn new<E: Into<Box<dyn error::Error + Send + Sync + 'static>>>(e: E) -> FilterError {
		FilterError::Predicate(Arc::from(e.into()))
	}
}

impl fmt::Debug for FilterError {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::NotImplemented(which) => f.debug_tuple("NotImplemented").field(which).finish(),
			Self::Predicate(e) => f.debug_tuple("Predicate").field(&e.to_string()).finish(),
		}
	}
}

impl fmt::Display for FilterError {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::NotImplemented(which) => write!(f, "{}(info) is not implemented", which),
			Self::Predicate(e) => write!(f, "predicate failed: {}", e),
		}
	}
}

impl PartialEq for FilterError {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::NotImplemented(a), Self::NotImplemented(b)) => a == b,
			(Self::Predicate(a), Self::Predicate(b)) => Arc::ptr_eq(a, b),
			_ => false,
		}
	}
}

impl error::Error for FilterError {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		match self {
			Self::NotImplemented(_) => None,
			Self::Predicate(e) => Some(&**e),
		}
	}
}

impl From<&str> for FilterError {
	fn from(other: &str) -> Self {
		Self::new(other)
	}
}

impl From<String> for FilterError {
	fn from(other: String) -> Self {
		Self::new(other)
	}
}

/// [`std::sync::Arc`]-based around [`std::io::Error`] to allow cloning.
#[derive(Clone)]
pub struct IOErrorWrapper(Arc<io::Error>);

impl IOErrorWrapper {
	fn wrap(e: io::Error) -> IOErrorWrapper {
		IOErrorWrapper(Arc::new(e))
	}
}

impl fmt::Debug for IOErrorWrapper {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		fmt::Debug::fmt(&**self, f)
	}
}

impl fmt::Display for IOErrorWrapper {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(&**self, f)
	}
}

impl PartialEq for IOErrorWrapper {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}

impl Deref for IOErrorWrapper {
	type Target = io::Error;

	fn deref(&self) -> &io::Error {
		&*self.0
	}
}

/// Error types which may be returned from an [`XmlStream`](crate::XmlStream)
/// and which are reported to its [`Consumer`](crate::Consumer).
///
/// With the exception of [`Error::AlreadyEnded`], all errors are fatal: the
/// stream enters the failed state and returns the same error from all
/// further calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
	/// The document structure is broken (mismatched or surplus tags).
	Structural(StructuralError),

	/// Content arrived before the root element was opened.
	EmptyDocument,

	/// `write` or `end` was called after `end`.
	///
	/// This error only concerns the offending call; the stream itself is
	/// left untouched.
	AlreadyEnded,

	/// A filter predicate failed.
	Filter(FilterError),

	/// The event source reported malformed input.
	Tokenizer(TokenizerError),

	/// The stream was dropped or interrupted before it could finish.
	Cancelled,

	/// An I/O error was encountered while reading from a source passed to
	/// `pipe_from`.
	IO(IOErrorWrapper),
}

pub type Result<T> = StdResult<T, Error>;

impl Error {
	pub fn io(e: io::Error) -> Error {
		Error::IO(IOErrorWrapper::wrap(e))
	}

	pub(crate) fn stack_empty(ctx: &'static str) -> Error {
		Error::Structural(StructuralError::StackEmpty(ctx))
	}

	/// Return true if this error does not leave the stream failed.
	pub fn is_recoverable(&self) -> bool {
		matches!(self, Error::AlreadyEnded)
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::io(e)
	}
}

impl From<StructuralError> for Error {
	fn from(e: StructuralError) -> Error {
		Error::Structural(e)
	}
}

impl From<TokenizerError> for Error {
	fn from(e: TokenizerError) -> Error {
		Error::Tokenizer(e)
	}
}

impl From<FilterError> for Error {
	fn from(e: FilterError) -> Error {
		Error::Filter(e)
	}
}

impl fmt::Display for Error {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Error::Structural(e) => write!(f, "structural error: {}", e),
			Error::EmptyDocument => f.write_str("empty document"),
			Error::AlreadyEnded => f.write_str("stream has already been ended"),
			Error::Filter(e) => write!(f, "filter error: {}", e),
			Error::Tokenizer(e) => write!(f, "tokenizer error: {}", e),
			Error::Cancelled => f.write_str("stream cancelled"),
			Error::IO(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl error::Error for Error {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		match self {
			Error::Structural(e) => Some(e),
			Error::Filter(e) => Some(e),
			Error::Tokenizer(e) => Some(e),
			Error::IO(e) => Some(&**e),
			Error::EmptyDocument | Error::AlreadyEnded | Error::Cancelled => None,
		}
	}
}
