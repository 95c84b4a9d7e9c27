use std::env;

use xmlsieve::{channel, Error, ErrorPolicy, Filter, StreamOptions, XmlStream};

/// Reads an XML document from stdin and prints every child of the root
/// element as it is closed.
///
/// Pass `--lenient` to skip over malformed input instead of failing.
#[tokio::main(flavor = "current_thread")]
async fn main() {
	env_logger::init();
	let lenient = env::args().skip(1).any(|arg| arg == "--lenient");
	let policy = if lenient {
		ErrorPolicy::Suppress
	} else {
		ErrorPolicy::Fatal
	};

	let (tx, mut rx) = channel(8);
	let filter = Filter::new()
		.emit(|info| info.level() == 1)
		.keep(|info| info.level() == 0);
	let options = StreamOptions::default().tokenizer_errors(policy);
	let mut stream = XmlStream::with_options(filter, tx, options);

	let (piped, count) = tokio::join!(stream.pipe_from(tokio::io::stdin()), async {
		let mut count = 0usize;
		while let Some(item) = rx.recv().await {
			match item {
				Ok(el) => {
					count += 1;
					let attrs: Vec<_> = el
						.attributes()
						.iter()
						.map(|(k, v)| format!("{}={:?}", k, v))
						.collect();
					println!("{} [{}] {:?}", el.name(), attrs.join(" "), el.text().trim());
				}
				Err(e) => eprintln!("stream aborted: {}", e),
			}
		}
		count
	});

	match piped {
		Ok(()) => eprintln!("{} element(s), {:?}", count, stream.stats()),
		Err(Error::IO(e)) => panic!("I/O error: {}", e),
		Err(e) => panic!("invalid XML on input: {}", e),
	}
}
