/*!
# Write queue

Chunks written to a blocked stream are parked in a [`BufferQueue`] until the
consumer becomes ready again. The end-of-input marker is queued the same way,
so that it is only processed after all data written before it.
*/
use std::collections::VecDeque;

use bytes::Bytes;

/// Item taken off a [`BufferQueue`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Queued {
	Chunk(Bytes),
	Eof,
}

/// FIFO of byte chunks, optionally terminated by an end-of-input marker.
#[derive(Debug, Default)]
pub(crate) struct BufferQueue {
	q: VecDeque<Bytes>,
	len: usize,
	eof: bool,
}

impl BufferQueue {
	pub(crate) fn new() -> BufferQueue {
		BufferQueue {
			q: VecDeque::new(),
			len: 0,
			eof: false,
		}
	}

	/// Append a chunk.
	///
	/// # Panics
	///
	/// If the end-of-input marker has already been pushed.
	pub(crate) fn push(&mut self, new: Bytes) {
		if self.eof {
			panic!("cannot push behind eof");
		}
		let new_len = match self.len.checked_add(new.len()) {
			None => panic!("length overflow"),
			Some(v) => v,
		};
		self.q.push_back(new);
		self.len = new_len;
	}

	/// Number of queued bytes.
	pub(crate) fn len(&self) -> usize {
		self.len
	}

	/// True if neither chunks nor the end-of-input marker are queued.
	pub(crate) fn is_empty(&self) -> bool {
		self.q.is_empty() && !self.eof
	}

	pub(crate) fn push_eof(&mut self) {
		self.eof = true;
	}

	/// Take the next item off the queue.
	///
	/// The end-of-input marker is only returned once all chunks have been
	/// taken, and only once.
	pub(crate) fn pop(&mut self) -> Option<Queued> {
		match self.q.pop_front() {
			Some(chunk) => {
				self.len -= chunk.len();
				Some(Queued::Chunk(chunk))
			}
			None if self.eof => {
				self.eof = false;
				Some(Queued::Eof)
			}
			None => None,
		}
	}

	/// Drop all queued chunks and the end-of-input marker.
	pub(crate) fn clear(&mut self) {
		self.q.clear();
		self.len = 0;
		self.eof = false;
	}
}
