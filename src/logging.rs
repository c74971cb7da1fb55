//! Log output for the sync engine
//!
//! Every module pulls the macros in with `use crate::logging::*;`. The binary
//! calls [`init_tracing`] once; library users install their own subscriber.

pub use tracing::{debug, error, info, warn};

/// Filter used when `RUST_LOG` is unset, by number of `-v` flags.
///
/// Our own crate gets louder first; dependencies stay at `warn` until the
/// most verbose level.
pub fn default_directive(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "warn,syncfs=info",
		1 => "warn,syncfs=debug",
		2 => "info,syncfs=trace",
		_ => "trace",
	}
}

/// Install the stderr subscriber. `RUST_LOG` wins over `verbosity`:
///
/// ```bash
/// RUST_LOG=syncfs::transfer=trace syncfs check options.toml
/// ```
pub fn init_tracing(verbosity: u8) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive(verbosity)));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(verbosity > 0)
		.with_writer(std::io::stderr)
		.compact()
		.init();
}

#[cfg(test)]
mod tests {
	use super::*;
	use tracing_subscriber::EnvFilter;

	#[test]
	fn test_directives_parse() {
		for verbosity in 0..5 {
			let directive = default_directive(verbosity);
			assert!(EnvFilter::try_new(directive).is_ok(), "{}", directive);
		}
	}

	#[test]
	fn test_verbosity_raises_crate_level_first() {
		assert!(default_directive(0).contains("syncfs=info"));
		assert!(default_directive(1).starts_with("warn,"));
		assert_eq!(default_directive(9), "trace");
	}
}

// vim: ts=4
