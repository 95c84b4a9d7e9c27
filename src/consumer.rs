/*!
# Consumers of emitted elements

A [`Consumer`] receives the elements which the filter chose to emit, along
with exactly one terminal notification: [`on_end`](Consumer::on_end) when
the document was processed completely, or [`on_error`](Consumer::on_error)
when the stream failed or was dropped.

Consumers take part in backpressure: when [`push`](Consumer::push) returns
false, the stream stops processing input until
[`poll_ready`](Consumer::poll_ready) reports readiness again.

Two consumers are provided: `Vec<Element>`, which never pushes back, and the
bounded [`channel`].
*/
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::PollSemaphore;

use crate::error::{Error, Result};
use crate::tree::Element;

/// Receiving end of an element stream.
pub trait Consumer {
	/// Deliver an element.
	///
	/// The element is accepted in any case. Returning false signals that the
	/// consumer does not want more elements until
	/// [`poll_ready`](Self::poll_ready) returns `Ready`.
	fn push(&mut self, element: Element) -> bool;

	/// Poll whether the consumer can take more elements.
	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<()> {
		let _ = cx;
		Poll::Ready(())
	}

	/// The document has been processed completely.
	fn on_end(&mut self) {}

	/// The stream failed or was dropped before it ended.
	fn on_error(&mut self, error: &Error) {
		let _ = error;
	}
}

impl Consumer for Vec<Element> {
	fn push(&mut self, element: Element) -> bool {
		Vec::push(self, element);
		true
	}
}

impl<T: Consumer + ?Sized> Consumer for &mut T {
	fn push(&mut self, element: Element) -> bool {
		(**self).push(element)
	}

	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<()> {
		(**self).poll_ready(cx)
	}

	fn on_end(&mut self) {
		(**self).on_end()
	}

	fn on_error(&mut self, error: &Error) {
		(**self).on_error(error)
	}
}

impl<T: Consumer + ?Sized> Consumer for Box<T> {
	fn push(&mut self, element: Element) -> bool {
		(**self).push(element)
	}

	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<()> {
		(**self).poll_ready(cx)
	}

	fn on_end(&mut self) {
		(**self).on_end()
	}

	fn on_error(&mut self, error: &Error) {
		(**self).on_error(error)
	}
}

/// Future which completes once a consumer is ready.
pub(crate) struct PollReady<'x, C: ?Sized> {
	consumer: &'x mut C,
}

impl<'x, C: Consumer + ?Sized> PollReady<'x, C> {
	pub(crate) fn new(consumer: &'x mut C) -> Self {
		Self { consumer }
	}
}

impl<'x, C: Consumer + ?Sized> Future for PollReady<'x, C> {
	type Output = ();

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
		self.get_mut().consumer.poll_ready(cx)
	}
}

enum Message {
	Element(Element, Option<OwnedSemaphorePermit>),
	Failed(Error),
}

/**
Create a bounded channel for emitted elements.

The sending half is a [`Consumer`] which reports backpressure once
`high_water_mark` elements are queued (a mark of zero is treated as one). The
receiving half yields the elements, followed by either `None` (the stream
ended) or exactly one `Err` (the stream failed).

Elements travel over a [`tokio::sync::mpsc`] channel; each queued element
holds a permit of a semaphore with `high_water_mark` permits, which is
returned when the element is received.
*/
pub fn channel(high_water_mark: usize) -> (ElementSender, ElementReceiver) {
	let (tx, rx) = mpsc::unbounded_channel();
	let permits = Arc::new(Semaphore::new(std::cmp::max(1, high_water_mark)));
	(
		ElementSender {
			tx: Some(tx),
			permits: PollSemaphore::new(permits.clone()),
		},
		ElementReceiver {
			rx,
			permits,
			done: false,
		},
	)
}

/// Sending half of a [`channel`].
///
/// Dropping the sender without a terminal notification makes the receiver
/// yield [`Error::Cancelled`].
pub struct ElementSender {
	tx: Option<mpsc::UnboundedSender<Message>>,
	permits: PollSemaphore,
}

impl ElementSender {
	fn finish(&mut self, error: Option<Error>) {
		if let Some(tx) = self.tx.take() {
			if let Some(e) = error {
				let _ = tx.send(Message::Failed(e));
			}
		}
	}
}

impl Consumer for ElementSender {
	fn push(&mut self, element: Element) -> bool {
		let tx = match self.tx.as_ref() {
			Some(tx) if !tx.is_closed() => tx,
			_ => return true,
		};
		let permit = self.permits.clone_inner().try_acquire_owned().ok();
		if tx.send(Message::Element(element, permit)).is_err() {
			return true;
		}
		self.permits.available_permits() > 0
	}

	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<()> {
		match self.tx.as_ref() {
			Some(tx) if !tx.is_closed() => (),
			_ => return Poll::Ready(()),
		}
		// the permit goes straight back
		self.permits.poll_acquire(cx).map(|_| ())
	}

	fn on_end(&mut self) {
		self.finish(None);
	}

	fn on_error(&mut self, error: &Error) {
		self.finish(Some(error.clone()));
	}
}

impl Drop for ElementSender {
	fn drop(&mut self) {
		self.finish(Some(Error::Cancelled));
	}
}

impl fmt::Debug for ElementSender {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("ElementSender")
			.field("finished", &self.tx.is_none())
			.field("available_permits", &self.permits.available_permits())
			.finish()
	}
}

/// Receiving half of a [`channel`].
pub struct ElementReceiver {
	rx: mpsc::UnboundedReceiver<Message>,
	permits: Arc<Semaphore>,
	done: bool,
}

impl ElementReceiver {
	fn accept(&mut self, msg: Message) -> Result<Element> {
		match msg {
			Message::Element(el, _permit) => Ok(el),
			Message::Failed(e) => {
				self.done = true;
				self.rx.close();
				Err(e)
			}
		}
	}

	/// Poll for the next element.
	///
	/// Queued elements are returned before the terminal outcome. After the
	/// terminal outcome has been returned, this keeps returning
	/// `Ready(None)`.
	pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Element>>> {
		if self.done {
			return Poll::Ready(None);
		}
		match self.rx.poll_recv(cx) {
			Poll::Ready(Some(msg)) => Poll::Ready(Some(self.accept(msg))),
			Poll::Ready(None) => {
				self.done = true;
				Poll::Ready(None)
			}
			Poll::Pending => Poll::Pending,
		}
	}

	/// Wait for the next element.
	pub fn recv(&mut self) -> Recv<'_> {
		Recv { receiver: self }
	}

	/// Take the next element if one is available right away.
	///
	/// Returns `None` both if nothing is queued and if the channel is
	/// finished; use [`is_finished`](Self::is_finished) to tell them apart.
	pub fn try_recv(&mut self) -> Option<Result<Element>> {
		if self.done {
			return None;
		}
		match self.rx.try_recv() {
			Ok(msg) => Some(self.accept(msg)),
			Err(TryRecvError::Empty) => None,
			Err(TryRecvError::Disconnected) => {
				self.done = true;
				None
			}
		}
	}

	/// True once all elements and the terminal outcome have been received.
	pub fn is_finished(&self) -> bool {
		self.done
	}
}

impl Drop for ElementReceiver {
	fn drop(&mut self) {
		self.rx.close();
		self.permits.close();
	}
}

impl fmt::Debug for ElementReceiver {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("ElementReceiver")
			.field("finished", &self.done)
			.finish()
	}
}

/// Future returned by [`ElementReceiver::recv`].
pub struct Recv<'x> {
	receiver: &'x mut ElementReceiver,
}

impl<'x> Future for Recv<'x> {
	type Output = Option<Result<Element>>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		self.get_mut().receiver.poll_recv(cx)
	}
}

#[cfg(feature = "stream")]
impl futures_core::Stream for ElementReceiver {
	type Item = Result<Element>;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		self.get_mut().poll_recv(cx)
	}
}
