
// Voltage sweep run inside the 2410 SourceMeter.  Either a numbered profile is loaded as a source list, or a linear
// staircase is swept up to the peak and back down again.  Each pass comes back from a single :READ?.

use std::error::Error;

use clap::Parser;
use log::info;

use labsweep::acquisition::{self, OutputGuard};
use labsweep::cli::{self, CommonArgs};
use labsweep::config::RunConfig;
use labsweep::devices::keithley2410::{Keithley2410, SourceFunction, SourceRange, SweepDirection, TimestampFormat};
use labsweep::export::{self, PlotSpec};
use labsweep::fit;
use labsweep::instrument::{Instrument, Vxi11Instrument};
use labsweep::table::{Element, ElementSchema, Table};
use labsweep::visa;

#[derive(Parser)]
#[command(about = "2410 SourceMeter internal voltage sweep")]
struct Cli {
	#[command(flatten)]
	common: CommonArgs,
}

// Current range when none is configured, matching the compliance
fn sense_range(cfg:&RunConfig) -> f64 { cfg.sense.range.unwrap_or(cfg.sense.compliance) }

fn main() -> Result<(), Box<dyn Error>> {
	let cli = Cli::parse();
	cli::init_logging(cli.common.verbose);

	let cfg = RunConfig::from_file(&cli.common.config)?;
	let schema = ElementSchema::new(&[Element::Voltage, Element::Current, Element::Time])?;

	let inst = visa::open(&cfg.instrument.resource, &cfg.instrument.gateways(), cfg.instrument.timeout()?)?;
	let mut smu = Keithley2410::connect(inst)?;
	smu.reset()?;
	smu.set_format_elements(&schema)?;
	smu.set_timestamp_format(TimestampFormat::Absolute)?;
	smu.configure_source(SourceFunction::Voltage, SourceRange::Max)?;

	// Staircase runs come back as an up pass then a down pass of this many rows each
	let (table, pass_len) = match cfg.sweep.profile_sweep()? {
		Some(profile) => {
			info!("Profile {:?}: {} points, {} s delay, NPLC {}",
				cfg.sweep.profile, profile.setpoints.len(), profile.source_delay_s, profile.nplc);
			smu.configure_current_sense(cfg.sense.compliance, sense_range(&cfg), profile.nplc)?;
			smu.configure_list_sweep(&profile.setpoints, profile.source_delay_s)?;
			let points = profile.setpoints.len();
			raise_timeout(&mut smu, points, profile.source_delay_s, profile.nplc)?;

			let mut guard = OutputGuard::engage(&mut smu)?;
			guard.reset_timestamp()?;
			let table = acquisition::internal_sweep(guard.inner(), points, &schema)?;
			guard.release()?;
			(table, None)
		},
		None => {
			smu.configure_current_sense(cfg.sense.compliance, sense_range(&cfg), cfg.sense.nplc)?;
			let points = smu.configure_staircase(cfg.sweep.start, cfg.sweep.stop, cfg.sweep.step, cfg.source.delay_s)?;
			info!("Staircase {} V to {} V: {} points each way", cfg.sweep.start, cfg.sweep.stop, points);
			raise_timeout(&mut smu, points, cfg.source.delay_s, cfg.sense.nplc)?;

			let mut guard = OutputGuard::engage(&mut smu)?;
			guard.reset_timestamp()?;
			guard.set_sweep_direction(SweepDirection::Up)?;
			let up = acquisition::internal_sweep(guard.inner(), points, &schema)?;
			guard.set_sweep_direction(SweepDirection::Down)?;
			let down = acquisition::internal_sweep(guard.inner(), points, &schema)?;
			guard.release()?;

			let mut flat = up.into_flat();
			flat.extend(down.into_flat());
			(Table::reshape_exact(flat, 2 * points, &schema)?, Some(points))
		},
	};

	let stats = table.sampling_stats(Element::Time)?;
	info!("{} samples in {:.3} s ({:.2} samples/s)", stats.samples, stats.elapsed, stats.frequency);

	let v = table.column(Element::Voltage)?;
	let i = table.column(Element::Current)?;
	let (pos, neg) = fit::fit_by_polarity(&v, &i);

	let dir = export::ensure_dir(&cfg.output.dir)?;
	let save_id = cfg.save_id()?;
	let title = export::sampled_title(cfg.output.title.as_deref().unwrap_or(&save_id), &stats);

	if !cli.common.no_plot && cfg.output.png {
		let spec = PlotSpec{ threshold: cfg.threshold, ..PlotSpec::new(&title, Element::Time, Element::Voltage, Element::Current) };
		export::plot_sweep(dir.join(format!("{}.png", save_id)), &table, &spec)?;
		if let Some(n) = pass_len {
			export::plot_cycles(dir.join(format!("{}_passes.png", save_id)), &table, n, &spec)?;
		}
	}

	if !cli.common.no_export && cfg.output.xlsx {
		let mut settings = cfg.to_settings()?;
		settings.insert("save_id", &save_id)?;
		settings.extend("sampling", stats)?;
		if let Some(f) = pos {
			settings.insert("resistance_pos_ohm", 1.0 / f.slope)?;
		}
		if let Some(f) = neg {
			settings.insert("resistance_neg_ohm", 1.0 / f.slope)?;
		}
		export::write_workbook(dir.join(format!("{}_data.xlsx", save_id)), &table, Some(&["V", "I", "t"]), Some(&settings))?;
		std::fs::write(dir.join(format!("{}_settings.json", save_id)), settings.to_json_pretty()?)?;
	}

	Ok(())
}

fn raise_timeout(smu:&mut Keithley2410<Vxi11Instrument>, points:usize, delay_s:f64, nplc:f64) -> labsweep::Result<()> {
	let estimate = acquisition::estimate_timeout(points, delay_s, nplc);
	if estimate > smu.inner().timeout() {
		info!("Raising I/O timeout to {:?}", estimate);
		smu.inner().set_timeout(estimate)?;
	}
	Ok(())
}
