//! Compression decorator for tar streams

use async_trait::async_trait;
use std::sync::Arc;

use super::{TarArgs, TarStream};
use crate::config::Compression;
use crate::error::TransferError;

/// Pipes both ends of every stream through lz4
pub struct Lz4Tar {
	inner: Arc<dyn TarStream>,
}

impl Lz4Tar {
	pub fn new(inner: Arc<dyn TarStream>) -> Self {
		Lz4Tar { inner }
	}

	fn alter(args: TarArgs) -> TarArgs {
		let prefix = |v: Vec<String>| {
			let mut out = vec!["-I".to_string(), "lz4".to_string()];
			out.extend(v);
			out
		};
		TarArgs { create_args: prefix(args.create_args), extract_args: prefix(args.extract_args) }
	}
}

#[async_trait]
impl TarStream for Lz4Tar {
	async fn send(&self, args: TarArgs) -> Result<(), TransferError> {
		self.inner.send(Self::alter(args)).await
	}

	async fn get(&self, args: TarArgs) -> Result<(), TransferError> {
		self.inner.get(Self::alter(args)).await
	}
}

/// Apply the configured codec to a raw stream
pub fn wrap(tar: Arc<dyn TarStream>, compression: Compression) -> Arc<dyn TarStream> {
	match compression {
		Compression::None => tar,
		Compression::Lz4 => Arc::new(Lz4Tar::new(tar)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;

	#[derive(Default)]
	struct Capture(Mutex<Vec<TarArgs>>);

	#[async_trait]
	impl TarStream for Capture {
		async fn send(&self, args: TarArgs) -> Result<(), TransferError> {
			self.0.lock().unwrap().push(args);
			Ok(())
		}

		async fn get(&self, args: TarArgs) -> Result<(), TransferError> {
			self.0.lock().unwrap().push(args);
			Ok(())
		}
	}

	#[tokio::test]
	async fn test_lz4_prefixes_both_sides() {
		let capture = Arc::new(Capture::default());
		let tar = wrap(capture.clone(), Compression::Lz4);
		tar.send(TarArgs::new(["-c"], ["-x"])).await.unwrap();

		let seen = capture.0.lock().unwrap();
		assert_eq!(seen[0].create_args, vec!["-I", "lz4", "-c"]);
		assert_eq!(seen[0].extract_args, vec!["-I", "lz4", "-x"]);
	}

	#[tokio::test]
	async fn test_none_passes_through() {
		let capture = Arc::new(Capture::default());
		let tar = wrap(capture.clone(), Compression::None);
		tar.get(TarArgs::new(["-c"], ["-x"])).await.unwrap();
		assert_eq!(capture.0.lock().unwrap()[0].create_args, vec!["-c"]);
	}
}

// vim: ts=4
