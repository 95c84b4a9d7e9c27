/*!
# Piping from asynchronous readers

Available with the `async` feature.
*/
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::consumer::Consumer;
use crate::error::{Error, Result};
use crate::event::EventSource;
use crate::filter::ElementFilter;
use crate::stream::XmlStream;

impl<F: ElementFilter, C: Consumer, S: EventSource> XmlStream<F, C, S> {
	/**
	Feed the stream from an [`AsyncRead`] until it reaches end of file, then
	end the stream.

	Whenever the consumer pushes back, reading is suspended until it is
	ready again.

	# Errors

	I/O errors fail the stream with [`Error::IO`]. Any error from
	[`write`](Self::write), [`ready`](Self::ready) or [`end`](Self::end) is
	passed through.

	# Example

	```
	use xmlsieve::{Filter, XmlStream};

	# tokio_test::block_on(async {
	let doc: &[u8] = b"<feed><item>1</item><item>2</item></feed>";
	let filter = Filter::new()
		.emit(|info| info.level() == 1)
		.keep(|_| false);
	let mut stream = XmlStream::new(filter, Vec::new());
	stream.pipe_from(doc).await.unwrap();
	assert_eq!(stream.consumer().len(), 2);
	# });
	```
	*/
	pub async fn pipe_from<R: AsyncRead + Unpin>(&mut self, mut reader: R) -> Result<()> {
		let chunk_size = self.read_chunk_size();
		loop {
			let mut buf = BytesMut::with_capacity(chunk_size);
			let n = match reader.read_buf(&mut buf).await {
				Ok(n) => n,
				Err(e) => {
					let e = Error::io(e);
					self.fail(e.clone());
					return Err(e);
				}
			};
			if n == 0 {
				log::debug!("reader reached end of file");
				return self.end(None).await;
			}
			if !self.write(buf.freeze()).await? {
				self.ready().await?;
			}
		}
	}
}
