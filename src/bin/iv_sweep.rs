
// Source voltage, measure current on the 6517B.  The host steps the source through the sweep once per cycle and
// fetches a reading at each step, optionally cutting a cycle short when the leakage current crosses a threshold.

use std::error::Error;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};

use labsweep::acquisition::{self, LoopOptions, OutputGuard};
use labsweep::cli::{self, CommonArgs};
use labsweep::config::RunConfig;
use labsweep::devices::keithley6517b::{DataFormat, Keithley6517b, SenseConfig, SenseRange, SourceConfig, SystemSetup, TriggerModel};
use labsweep::export::{self, PlotSpec};
use labsweep::fit;
use labsweep::instrument::Instrument;
use labsweep::sweep::{self, MAX_BUFFER_POINTS};
use labsweep::table::{Element, ElementSchema};
use labsweep::visa;

#[derive(Parser)]
#[command(about = "6517B source-voltage / measure-current sweep")]
struct Cli {
	#[command(flatten)]
	common: CommonArgs,
}

fn main() -> Result<(), Box<dyn Error>> {
	let cli = Cli::parse();
	cli::init_logging(cli.common.verbose);

	let cfg = RunConfig::from_file(&cli.common.config)?;
	let setpoints = cfg.sweep.setpoints()?;
	let cycles = cfg.sweep.cycles;
	let points = setpoints.len() * cycles;
	sweep::check_point_count(points, MAX_BUFFER_POINTS)?;
	let vmax = sweep::peak(&setpoints).unwrap_or(0.0);
	info!("{} set-points to {} V, {} cycles", setpoints.len(), vmax, cycles);
	let source = SourceConfig{ range: cfg.source.range.or(Some(vmax)), limit: cfg.source.limit, ..SourceConfig::default() };
	source.check_setpoints(&setpoints)?;

	let schema = ElementSchema::new(&[Element::Reading, Element::Timestamp, Element::VoltageSource])?;

	let mut inst = visa::open(&cfg.instrument.resource, &cfg.instrument.gateways(), cfg.instrument.timeout()?)?;
	if let Some(ms) = cfg.instrument.throttle_ms {
		inst = inst.with_throttle(Duration::from_millis(ms));
	}
	let mut k = Keithley6517b::connect(inst)?;

	let estimate = acquisition::estimate_timeout(points, cfg.source.delay_s, cfg.sense.nplc);
	if estimate > k.inner().timeout() {
		k.inner().set_timeout(estimate)?;
	}

	k.reset()?;
	if cfg.sense.zero_correct {
		k.acquire_zero_correct()?;
		k.zero_correct(true)?;
	}
	k.zero_check(false)?;
	k.initialize(&SystemSetup{ nplc: cfg.sense.nplc, ..SystemSetup::default() })?;
	k.disable_buffer()?;
	k.set_data_format(DataFormat::Ascii)?;
	k.set_format_elements(&schema)?;
	k.configure_trigger_model(&TriggerModel::immediate(points as u32))?;
	k.configure_source(&source)?;
	k.configure_sense(&SenseConfig{
		nplc: cfg.sense.nplc,
		range: cfg.sense.range.map(SenseRange::Manual).unwrap_or(SenseRange::Auto),
		digits: cfg.sense.digits,
		..SenseConfig::default()
	})?;
	info!("Configuration complete");

	let opts = LoopOptions{ cycles, threshold: cfg.threshold, settle: Duration::from_secs_f64(cfg.source.delay_s) };
	let outcome = {
		let mut guard = OutputGuard::engage(&mut k)?;
		guard.reset_timestamp()?;
		guard.initiate()?;
		let outcome = acquisition::external_loop(guard.inner(), &setpoints, &opts)?;
		guard.release()?;
		outcome
	};
	for stop in outcome.early_stops.iter() {
		warn!("Cycle {} stopped at {} V: {} A", stop.cycle, stop.setpoint, stop.reading);
	}

	let cycle_rows = outcome.cycles.clone();
	let table = outcome.into_table(&schema)?;
	let stats = table.sampling_stats(Element::Timestamp)?;
	info!("{} samples in {:.3} s ({:.2} samples/s)", stats.samples, stats.elapsed, stats.frequency);

	let v = table.column(Element::VoltageSource)?;
	let i = table.column(Element::Reading)?;
	let (pos, neg) = fit::fit_by_polarity(&v, &i);
	for (label, f) in [("+V", pos), ("-V", neg)].iter() {
		if let Some(f) = f {
			info!("{}: {:.3e} Ohm", label, 1.0 / f.slope);
		}
	}

	let dir = export::ensure_dir(&cfg.output.dir)?;
	let save_id = cfg.save_id()?;
	let title = export::sampled_title(cfg.output.title.as_deref().unwrap_or(&save_id), &stats);

	if !cli.common.no_plot && cfg.output.png {
		let spec = PlotSpec{ threshold: cfg.threshold, ..PlotSpec::new(&title, Element::Timestamp, Element::VoltageSource, Element::Reading) };
		export::plot_sweep(dir.join(format!("{}.png", save_id)), &table, &spec)?;
		if cycles > 1 {
			export::plot_cycle_ranges(dir.join(format!("{}_cycles.png", save_id)), &table, &cycle_rows, &spec)?;
		}
	}

	if !cli.common.no_export && cfg.output.xlsx {
		let mut settings = cfg.to_settings()?;
		settings.insert("save_id", &save_id)?;
		settings.extend("sampling", stats)?;
		settings.insert("points_per_cycle", cycle_rows.iter().map(|r| r.len()).collect::<Vec<usize>>())?;
		if let Some(f) = pos {
			settings.insert("resistance_pos_ohm", 1.0 / f.slope)?;
		}
		if let Some(f) = neg {
			settings.insert("resistance_neg_ohm", 1.0 / f.slope)?;
		}
		export::write_workbook(dir.join(format!("{}_data.xlsx", save_id)), &table, Some(&["I", "t", "V"]), Some(&settings))?;
		std::fs::write(dir.join(format!("{}_settings.json", save_id)), settings.to_json_pretty()?)?;
	}

	Ok(())
}
