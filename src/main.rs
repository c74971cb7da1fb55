use clap::{Arg, ArgAction, Command};
use std::error::Error;
use std::path::PathBuf;

use syncfs::config::{ExcludeSet, Options};
use syncfs::logging::*;
use syncfs::scanner;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("SyncFS")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Overlay filesystem sync between a compute server and its project")
		.subcommand_required(true)
		.arg(
			Arg::new("verbose")
				.short('v')
				.long("verbose")
				.global(true)
				.action(ArgAction::Count)
				.help("More log output (repeatable)"),
		)
		.subcommand(
			Command::new("dump")
				.about("Print the filesystem state of an upper layer as JSON")
				.arg(Arg::new("upper").required(true))
				.arg(
					Arg::new("lower")
						.short('l')
						.long("lower")
						.value_name("DIR")
						.help("Lower layer, used to expand deleted directories"),
				)
				.arg(
					Arg::new("exclude")
						.short('e')
						.long("exclude")
						.value_name("NAME")
						.action(ArgAction::Append)
						.help("Path to leave out (repeatable)"),
				),
		)
		.subcommand(
			Command::new("check")
				.about("Load and validate an options file")
				.arg(Arg::new("config").required(true)),
		)
		.get_matches();

	init_tracing(matches.get_count("verbose"));

	if let Some(matches) = matches.subcommand_matches("dump") {
		let upper =
			PathBuf::from(matches.get_one::<String>("upper").ok_or("dump: upper argument required")?);
		let lower = matches.get_one::<String>("lower").map(PathBuf::from);
		let exclude: Vec<String> =
			matches.get_many::<String>("exclude").map(|v| v.cloned().collect()).unwrap_or_default();
		let exclude = ExcludeSet::new(&exclude);

		let state = match &lower {
			Some(lower) => scanner::compute_state(&upper, lower, &exclude)?,
			None => scanner::scan_tree(&upper, &exclude)?,
		};
		info!("{} entries, {} deleted", state.len(), state.deleted_paths().len());
		println!("{}", serde_json::to_string_pretty(&state)?);
	} else if let Some(matches) = matches.subcommand_matches("check") {
		let path =
			PathBuf::from(matches.get_one::<String>("config").ok_or("check: config argument required")?);
		let options = Options::load(&path)?;
		let exclude = options.exclude_set();
		println!("project:        {}", options.project_id);
		println!("compute server: {}", options.compute_server_id);
		println!("lower:          {}", options.lower.display());
		println!("upper:          {}", options.upper.display());
		println!("mount:          {}", options.mount.display());
		println!("interval:       {}s - {}s", options.sync_interval_min, options.sync_interval_max);
		println!("compression:    {:?}", options.codec()?);
		println!("state file:     {}/{}", options.scratch_rel(), options.codec()?.state_file_name());
		if exclude.disables_sync() {
			println!("sync:           disabled by exclude list");
		} else {
			println!("bind mounts:    {}", exclude.bind_names().join(", "));
		}
	}

	Ok(())
}

// vim: ts=4
