//! What every experiment binary accepts on the command line.

use std::path::PathBuf;

use clap::Args;
use log::LevelFilter;

#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
	/// TOML run configuration
	pub config: PathBuf,

	/// More logging; repeat for more still
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Skip the PNG figures
	#[arg(long)]
	pub no_plot: bool,

	/// Skip the workbook and JSON settings
	#[arg(long)]
	pub no_export: bool,
}

pub fn level(verbose:u8) -> LevelFilter {
	match verbose {
		0 => LevelFilter::Info,
		1 => LevelFilter::Debug,
		_ => LevelFilter::Trace,
	}
}

/// Log to stderr at a level set by `-v`, unless `RUST_LOG` says otherwise
pub fn init_logging(verbose:u8) {
	let default = level(verbose).to_string().to_lowercase();
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
		.format_timestamp_millis()
		.init();
}
