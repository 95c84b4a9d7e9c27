/*!
# Push lexer

An incremental [`EventSource`](crate::EventSource) on top of
[`quick_xml`] and [`encoding_rs`]. Bytes are pushed in chunks of any size
and constructs may straddle chunk boundaries.

Input is decoded with `encoding_rs` into a UTF-8 buffer. The lexer only
finds the boundaries of complete constructs in that buffer; each complete
tag, CDATA section or declaration is then handed to a
[`quick_xml::Reader`], and text and attribute values are unescaped with
[`quick_xml::escape`].

The lexer does not check whether end tags match their start tags; that is up
to the tree builder. It does keep track of the nesting depth, so that it can
report documents without a root element, unclosed elements at the end of the
input and content after the root element.

Comments, processing instructions and a DOCTYPE declaration (including its
internal subset) are skipped.

After the first error, the lexer is poisoned: it drops all further input and
only reports [`ParseEvent::End`] once the end of input has been signalled.
*/
use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use encoding_rs::{DecoderResult, Encoding, UTF_8};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{
	TokenizerError, ERRCTX_ATTNAME, ERRCTX_ATTVAL, ERRCTX_CDATA_SECTION, ERRCTX_COMMENT,
	ERRCTX_DOCBEGIN, ERRCTX_DOCTYPE, ERRCTX_ELEMENT, ERRCTX_END_TAG, ERRCTX_PI, ERRCTX_START_TAG,
	ERRCTX_TEXT, ERRCTX_UNKNOWN, ERRCTX_XML_DECL,
};
use crate::event::{EventSource, ParseEvent};
use crate::tree::{Attributes, Name};

const UTF8_BOM: &'static [u8] = b"\xef\xbb\xbf";
const TOK_XML_DECL_START: &'static [u8] = b"<?xml";

/// Default for [`LexerOptions::max_token_length`].
pub const DEFAULT_MAX_TOKEN_LENGTH: usize = 8192;

/**
# Lexer configuration
*/
#[derive(Debug, Clone, PartialEq, Copy)]
pub struct LexerOptions {
	/// Maximum length in bytes of a single construct.
	///
	/// Text runs longer than this are split into several text events. Any
	/// other construct (tags, comments, CDATA sections, ...) longer than this
	/// is an error.
	pub max_token_length: usize,
}

impl Default for LexerOptions {
	fn default() -> Self {
		LexerOptions {
			max_token_length: DEFAULT_MAX_TOKEN_LENGTH,
		}
	}
}

impl LexerOptions {
	/// Set the [`LexerOptions::max_token_length`] value.
	///
	/// # Example
	///
	/// ```
	/// use xmlsieve::LexerOptions;
	/// let options = LexerOptions::default().max_token_length(1024);
	/// ```
	pub fn max_token_length(mut self, v: usize) -> LexerOptions {
		self.max_token_length = v;
		self
	}
}

/// Kind of construct at the head of the decoded buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
	Text,
	StartTag,
	EndTag,
	Pi,
	Comment,
	CData,
	Doctype,
	/// A lone `<`, not enough input to tell.
	Markup,
}

impl Kind {
	fn errctx(&self) -> &'static str {
		match self {
			Kind::Text => ERRCTX_TEXT,
			Kind::StartTag => ERRCTX_START_TAG,
			Kind::EndTag => ERRCTX_END_TAG,
			Kind::Pi => ERRCTX_PI,
			Kind::Comment => ERRCTX_COMMENT,
			Kind::CData => ERRCTX_CDATA_SECTION,
			Kind::Doctype => ERRCTX_DOCTYPE,
			Kind::Markup => ERRCTX_UNKNOWN,
		}
	}
}

static BANG_CONSTRUCTS: [(&'static [u8], Kind); 3] = [
	(b"<!--", Kind::Comment),
	(b"<![CDATA[", Kind::CData),
	(b"<!DOCTYPE", Kind::Doctype),
];

fn is_space(b: u8) -> bool {
	b == b' ' || b == b'\t' || b == b'\r' || b == b'\n'
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
	if haystack.len() < from + needle.len() {
		return None;
	}
	haystack[from..]
		.windows(needle.len())
		.position(|w| w == needle)
		.map(|p| p + from)
}

/// Find the `>` closing a tag, skipping over quoted attribute values.
fn find_tag_end(buf: &[u8], from: usize) -> Option<usize> {
	let mut quote = None;
	for (i, b) in buf.iter().enumerate().skip(from) {
		match quote {
			Some(q) if *b == q => quote = None,
			Some(_) => (),
			None => match *b {
				b'"' | b'\'' => quote = Some(*b),
				b'>' => return Some(i),
				_ => (),
			},
		}
	}
	None
}

/// Find the `>` closing a DOCTYPE declaration, skipping over quoted literals
/// and the internal subset.
fn find_doctype_end(buf: &[u8], from: usize) -> Option<usize> {
	let mut quote = None;
	let mut brackets = 0usize;
	for (i, b) in buf.iter().enumerate().skip(from) {
		match quote {
			Some(q) if *b == q => quote = None,
			Some(_) => (),
			None => match *b {
				b'"' | b'\'' => quote = Some(*b),
				b'[' => brackets += 1,
				b']' => brackets = brackets.saturating_sub(1),
				b'>' if brackets == 0 => return Some(i),
				_ => (),
			},
		}
	}
	None
}

/// Classify the construct at the head of `buf` and find its length.
///
/// Only the given window of the buffer is searched; `None` means that the
/// construct does not end inside of it.
fn frame(buf: &[u8]) -> (Kind, Option<usize>) {
	if buf[0] != b'<' {
		return (Kind::Text, buf.iter().position(|b| *b == b'<'));
	}
	match buf.get(1) {
		None => (Kind::Markup, None),
		Some(b'?') => (Kind::Pi, find(buf, 2, b"?>").map(|p| p + 2)),
		Some(b'/') => (Kind::EndTag, find_tag_end(buf, 2).map(|p| p + 1)),
		Some(b'!') => {
			for (tok, kind) in BANG_CONSTRUCTS.iter() {
				if buf.starts_with(tok) {
					let end = match kind {
						Kind::Comment => find(buf, tok.len(), b"-->").map(|p| p + 3),
						Kind::CData => find(buf, tok.len(), b"]]>").map(|p| p + 3),
						_ => find_doctype_end(buf, tok.len()).map(|p| p + 1),
					};
					return (*kind, end);
				}
				if tok.starts_with(buf) {
					return (*kind, None);
				}
			}
			// unknown markup declaration, left for the reader to reject
			(Kind::StartTag, find_tag_end(buf, 2).map(|p| p + 1))
		}
		Some(_) => (Kind::StartTag, find_tag_end(buf, 1).map(|p| p + 1)),
	}
}

/// Largest prefix of `s` of at most `limit` bytes which can be turned into a
/// text event without cutting a character, a reference or a CR LF pair.
fn split_point(s: &str, limit: usize) -> usize {
	let mut n = limit;
	while !s.is_char_boundary(n) {
		n -= 1;
	}
	if let Some(amp) = s[..n].rfind('&') {
		if !s[amp..n].contains(';') {
			n = amp;
		}
	}
	if s[..n].ends_with('\r') {
		n -= 1;
	}
	n
}

/// Translate CR LF and lone CR into LF.
fn normalize_newlines(s: &str) -> std::borrow::Cow<'_, str> {
	if !s.contains('\r') {
		return s.into();
	}
	s.replace("\r\n", "\n").replace('\r', "\n").into()
}

/// Attribute value normalization: every literal whitespace character turns
/// into a space.
fn normalize_attribute(s: &str) -> String {
	normalize_newlines(s)
		.chars()
		.map(|c| if c == '\t' || c == '\n' { ' ' } else { c })
		.collect()
}

/// Reject characters which are not XML `Char`s.
fn check_chars(ctx: &'static str, s: &str) -> Result<(), TokenizerError> {
	if rxml_validation::validate_cdata(s).is_ok() {
		return Ok(());
	}
	let mut buf = [0u8; 4];
	let bad = s
		.chars()
		.find(|c| rxml_validation::validate_cdata(c.encode_utf8(&mut buf)).is_err())
		.unwrap_or(std::char::REPLACEMENT_CHARACTER);
	Err(TokenizerError::InvalidChar(ctx, bad as u32))
}

fn check_name(ctx: &'static str, raw: &[u8]) -> Result<String, TokenizerError> {
	let name = String::from_utf8_lossy(raw).into_owned();
	match rxml_validation::validate_name(&name) {
		Ok(()) => Ok(name),
		Err(_) => Err(TokenizerError::InvalidName(ctx, name)),
	}
}

/// Expand references in text, after newline normalization.
fn unescape_text(ctx: &'static str, raw: &str) -> Result<String, TokenizerError> {
	let normalized = normalize_newlines(raw);
	check_chars(ctx, &normalized)?;
	let value = quick_xml::escape::unescape(&normalized)?.into_owned();
	check_chars(ctx, &value)?;
	Ok(value)
}

/// Run a single complete construct through a fresh reader.
fn read_construct(construct: &str) -> Result<Event<'_>, TokenizerError> {
	let mut reader = Reader::from_str(construct);
	reader
		.trim_text(false)
		.expand_empty_elements(false)
		.check_end_names(false);
	Ok(reader.read_event()?)
}

/// Where the lexer is with respect to the XML declaration.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
	/// Nothing has been decoded yet; a declaration may follow.
	Prolog,
	/// The declaration has been reported. Decoding starts with the next
	/// read, so that the encoding can still be switched.
	Declared,
	/// Input is decoded as it arrives.
	Body,
}

/**
# XML 1.0 push lexer

```
use bytes::Bytes;
use xmlsieve::{EventSource, Lexer, ParseEvent};
let mut lexer = Lexer::new();
lexer.write(Bytes::from_static(b"<a>hi</a>"));
lexer.end();
let mut names = Vec::new();
while let Some(ev) = lexer.read() {
	if let ParseEvent::StartElement { name, .. } = ev {
		names.push(name.to_string());
	}
}
assert_eq!(names, vec!["a".to_string()]);
```
*/
pub struct Lexer {
	raw: BytesMut,
	text: String,
	pos: usize,
	opts: LexerOptions,
	encoding: &'static Encoding,
	decoder: Option<encoding_rs::Decoder>,
	stage: Stage,
	events: VecDeque<ParseEvent>,
	depth: usize,
	seen_root: bool,
	bom_checked: bool,
	flushed: bool,
	eof: bool,
	paused: bool,
	poisoned: bool,
	done: bool,
}

impl Lexer {
	pub fn new() -> Lexer {
		Lexer::with_options(LexerOptions::default())
	}

	pub fn with_options(opts: LexerOptions) -> Lexer {
		Lexer {
			raw: BytesMut::new(),
			text: String::new(),
			pos: 0,
			opts,
			encoding: UTF_8,
			decoder: None,
			stage: Stage::Prolog,
			events: VecDeque::new(),
			depth: 0,
			seen_root: false,
			bom_checked: false,
			flushed: false,
			eof: false,
			paused: false,
			poisoned: false,
			done: false,
		}
	}

	/// Encoding currently used to decode input.
	pub fn encoding(&self) -> &'static Encoding {
		self.encoding
	}

	/// Number of bytes written but not yet turned into events.
	pub fn buffered(&self) -> usize {
		self.raw.len() + self.text.len() - self.pos
	}

	/// True after an error has been reported.
	pub fn is_poisoned(&self) -> bool {
		self.poisoned
	}

	pub fn is_paused(&self) -> bool {
		self.paused
	}

	/// Run one step of the lexer.
	///
	/// Returns false if more input is needed to make progress.
	fn step(&mut self) -> Result<bool, TokenizerError> {
		match self.stage {
			Stage::Prolog => self.prolog(),
			Stage::Declared => {
				self.settle();
				Ok(true)
			}
			Stage::Body => self.body(),
		}
	}

	/// Strip the BOM and report the XML declaration, if any.
	fn prolog(&mut self) -> Result<bool, TokenizerError> {
		if !self.bom_checked {
			if !self.eof && self.raw.len() < UTF8_BOM.len() && UTF8_BOM.starts_with(&self.raw) {
				return Ok(false);
			}
			if self.raw.starts_with(UTF8_BOM) {
				self.raw.advance(UTF8_BOM.len());
			}
			self.bom_checked = true;
		}
		let n = TOK_XML_DECL_START.len();
		if !self.eof && self.raw.len() <= n && TOK_XML_DECL_START.starts_with(&self.raw) {
			return Ok(false);
		}
		let is_decl = self.raw.starts_with(TOK_XML_DECL_START)
			&& self.raw.len() > n
			&& (is_space(self.raw[n]) || self.raw[n] == b'?');
		if !is_decl {
			self.settle();
			return Ok(true);
		}
		let end = match find(&self.raw, n, b"?>") {
			Some(end) => end + 2,
			None if self.eof => return Err(TokenizerError::InvalidEof(ERRCTX_XML_DECL)),
			None if self.raw.len() > self.opts.max_token_length => {
				return Err(TokenizerError::TokenTooLong(ERRCTX_XML_DECL))
			}
			None => return Ok(false),
		};
		let raw = self.raw.split_to(end);
		let decl = match std::str::from_utf8(&raw) {
			Ok(decl) => decl,
			Err(_) => return Err(TokenizerError::InvalidSyntax("non-ASCII XML declaration")),
		};
		let encoding = match read_construct(decl)? {
			Event::Decl(d) => {
				let version = d.version()?;
				if !version.starts_with(b"1.") {
					return Err(TokenizerError::InvalidSyntax("unsupported XML version"));
				}
				match d.encoding() {
					Some(enc) => Some(String::from_utf8_lossy(&enc?).into_owned()),
					None => None,
				}
			}
			_ => return Err(TokenizerError::InvalidSyntax("malformed XML declaration")),
		};
		self.events.push_back(ParseEvent::Declaration { encoding });
		self.stage = Stage::Declared;
		Ok(true)
	}

	/// Fix the encoding and start decoding.
	fn settle(&mut self) {
		self.decoder = Some(self.encoding.new_decoder_without_bom_handling());
		self.stage = Stage::Body;
	}

	fn decode(&mut self, last: bool) -> Result<(), TokenizerError> {
		let decoder = match self.decoder.as_mut() {
			Some(decoder) => decoder,
			None => return Ok(()),
		};
		let raw = self.raw.split().freeze();
		let mut src = &raw[..];
		loop {
			let needed = decoder
				.max_utf8_buffer_length_without_replacement(src.len())
				.unwrap_or(src.len());
			self.text.reserve(needed);
			let (result, read) = decoder.decode_to_string_without_replacement(src, &mut self.text, last);
			src = &src[read..];
			match result {
				DecoderResult::InputEmpty => return Ok(()),
				DecoderResult::OutputFull => continue,
				DecoderResult::Malformed(_, _) => {
					return Err(TokenizerError::MalformedInput(self.encoding.name()))
				}
			}
		}
	}

	fn body(&mut self) -> Result<bool, TokenizerError> {
		if !self.raw.is_empty() {
			self.decode(false)?;
		}
		if self.eof && !self.flushed {
			self.decode(true)?;
			self.flushed = true;
		}
		let rest = &self.text.as_bytes()[self.pos..];
		if rest.is_empty() {
			return if self.eof { self.finish() } else { Ok(false) };
		}
		let max = self.opts.max_token_length;
		let window = &rest[..std::cmp::min(rest.len(), max.saturating_add(1))];
		let (kind, len) = frame(window);
		let len = match (kind, len) {
			(_, Some(len)) => len,
			(Kind::Text, None) if window.len() > max => {
				match split_point(&self.text[self.pos..], max) {
					0 => return Err(TokenizerError::TokenTooLong(ERRCTX_TEXT)),
					n => n,
				}
			}
			(Kind::Text, None) if self.eof => rest.len(),
			(kind, None) if window.len() > max => {
				return Err(TokenizerError::TokenTooLong(kind.errctx()))
			}
			(kind, None) if self.eof => return Err(TokenizerError::InvalidEof(kind.errctx())),
			(_, None) => return Ok(false),
		};
		let start = self.pos;
		self.pos += len;
		// taken out so the construct can borrow from it while events are added
		let text = std::mem::take(&mut self.text);
		let result = self.construct(kind, &text[start..start + len]);
		self.text = text;
		result.map(|_| true)
	}

	fn construct(&mut self, kind: Kind, s: &str) -> Result<(), TokenizerError> {
		match kind {
			Kind::Text => self.text_run(s),
			Kind::CData => {
				if self.depth == 0 {
					return Err(self.outside_root());
				}
				let value = match read_construct(s)? {
					Event::CData(c) => String::from_utf8_lossy(&c.into_inner()).into_owned(),
					_ => return Err(TokenizerError::InvalidSyntax("malformed CDATA section")),
				};
				let value = normalize_newlines(&value).into_owned();
				check_chars(ERRCTX_CDATA_SECTION, &value)?;
				if !value.is_empty() {
					self.events.push_back(ParseEvent::Text { value, cdata: true });
				}
				Ok(())
			}
			Kind::StartTag => self.start_tag(s),
			Kind::EndTag => self.end_tag(s),
			Kind::Pi => match read_construct(s)? {
				Event::Decl(_) if self.seen_root && self.depth == 0 => {
					Err(TokenizerError::JunkAfterDocumentElement)
				}
				Event::Decl(_) => Err(TokenizerError::InvalidSyntax(
					"XML declaration not at start of document",
				)),
				_ => Ok(()),
			},
			Kind::Doctype if self.seen_root => {
				Err(TokenizerError::InvalidSyntax("DOCTYPE after root element"))
			}
			Kind::Doctype | Kind::Comment => Ok(()),
			Kind::Markup => Err(TokenizerError::InvalidEof(ERRCTX_UNKNOWN)),
		}
	}

	fn text_run(&mut self, s: &str) -> Result<(), TokenizerError> {
		if self.depth == 0 {
			if s.bytes().all(is_space) {
				return Ok(());
			}
			return Err(self.outside_root());
		}
		let value = unescape_text(ERRCTX_TEXT, s)?;
		self.events.push_back(ParseEvent::Text { value, cdata: false });
		Ok(())
	}

	fn start_tag(&mut self, s: &str) -> Result<(), TokenizerError> {
		if self.depth == 0 && self.seen_root {
			return Err(TokenizerError::JunkAfterDocumentElement);
		}
		let (tag, empty) = match read_construct(s)? {
			Event::Start(tag) => (tag, false),
			Event::Empty(tag) => (tag, true),
			_ => return Err(TokenizerError::InvalidSyntax("unknown markup declaration")),
		};
		let name: Name = check_name(ERRCTX_START_TAG, tag.name().as_ref())?.into();
		let mut attributes = Attributes::new();
		for attr in tag.attributes() {
			let attr = attr?;
			let attname = check_name(ERRCTX_ATTNAME, attr.key.as_ref())?;
			let raw = String::from_utf8_lossy(&attr.value);
			let value = unescape_text(ERRCTX_ATTVAL, &normalize_attribute(&raw))?;
			attributes.insert(attname, value);
		}
		self.seen_root = true;
		if empty {
			self.events.push_back(ParseEvent::StartElement {
				name: name.clone(),
				attributes,
			});
			self.events.push_back(ParseEvent::EndElement { name });
		} else {
			self.depth += 1;
			self.events.push_back(ParseEvent::StartElement { name, attributes });
		}
		Ok(())
	}

	fn end_tag(&mut self, s: &str) -> Result<(), TokenizerError> {
		if self.depth == 0 {
			return Err(self.outside_root());
		}
		let name = match read_construct(s)? {
			Event::End(tag) => check_name(ERRCTX_END_TAG, tag.name().as_ref())?,
			_ => return Err(TokenizerError::InvalidSyntax("malformed end tag")),
		};
		self.depth -= 1;
		self.events.push_back(ParseEvent::EndElement { name: name.into() });
		Ok(())
	}

	fn outside_root(&self) -> TokenizerError {
		if self.seen_root {
			TokenizerError::JunkAfterDocumentElement
		} else {
			TokenizerError::InvalidSyntax("content before root element")
		}
	}

	fn finish(&mut self) -> Result<bool, TokenizerError> {
		if !self.seen_root {
			return Err(TokenizerError::InvalidEof(ERRCTX_DOCBEGIN));
		}
		if self.depth > 0 {
			return Err(TokenizerError::InvalidEof(ERRCTX_ELEMENT));
		}
		self.events.push_back(ParseEvent::End);
		self.done = true;
		Ok(true)
	}

	/// Drop the consumed part of the decoded buffer.
	fn compact(&mut self) {
		if self.pos > 0 {
			self.text.drain(..self.pos);
			self.pos = 0;
		}
	}

	fn poison(&mut self) {
		self.poisoned = true;
		self.raw.clear();
		self.text.clear();
		self.pos = 0;
	}
}

impl Default for Lexer {
	fn default() -> Self {
		Lexer::new()
	}
}

impl EventSource for Lexer {
	fn write(&mut self, data: Bytes) -> bool {
		if self.eof {
			return false;
		}
		if !self.poisoned {
			self.raw.extend_from_slice(&data);
		}
		true
	}

	fn end(&mut self) {
		self.eof = true;
	}

	fn pause(&mut self) {
		self.paused = true;
	}

	fn resume(&mut self) {
		self.paused = false;
	}

	fn set_encoding(&mut self, label: &str) -> Result<(), TokenizerError> {
		let encoding = match Encoding::for_label(label.trim().as_bytes()) {
			Some(enc) if enc.is_ascii_compatible() => enc,
			_ => return Err(TokenizerError::UnsupportedEncoding(label.to_string())),
		};
		log::debug!("lexer switching to encoding {}", encoding.name());
		self.encoding = encoding;
		if self.stage == Stage::Body {
			self.settle();
		}
		Ok(())
	}

	fn read(&mut self) -> Option<ParseEvent> {
		if self.paused {
			return None;
		}
		loop {
			if let Some(ev) = self.events.pop_front() {
				return Some(ev);
			}
			if self.done {
				return None;
			}
			if self.poisoned {
				if self.eof {
					self.done = true;
					return Some(ParseEvent::End);
				}
				return None;
			}
			match self.step() {
				Ok(true) => continue,
				Ok(false) => {
					self.compact();
					return None;
				}
				Err(e) => {
					log::debug!("lexer poisoned: {}", e);
					self.poison();
					return Some(ParseEvent::Error(e));
				}
			}
		}
	}
}
