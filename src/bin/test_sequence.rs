
// Run one of the 6517B's built-in test sequences and pull the stored readings out of its buffer once the sequence
// has filled it.

use std::error::Error;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{debug, info, warn};

use labsweep::acquisition;
use labsweep::cli::{self, CommonArgs};
use labsweep::config::RunConfig;
use labsweep::devices::keithley6517b::{BufferConfig, DataFormat, FillMode, Keithley6517b, SenseConfig, SenseFunction, SenseRange, SystemSetup, TestSequence};
use labsweep::export::{self, PlotSpec};
use labsweep::table::{Element, ElementSchema};
use labsweep::visa;

const POLL_INTERVAL:Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(about = "6517B built-in test sequence")]
struct Cli {
	#[command(flatten)]
	common: CommonArgs,
}

// Rough run time of a sequence, ignoring integration time
fn nominal_duration(seq:&TestSequence, points:usize) -> Duration {
	let secs = match *seq {
		TestSequence::SquareWave{ high_time_s, low_time_s, cycles, .. } => (high_time_s + low_time_s) * cycles as f64,
		TestSequence::Staircase{ step_time_s, .. } => step_time_s * points as f64,
		TestSequence::CapacitorLeakage{ readings, interval_s, .. } => interval_s * readings as f64,
		TestSequence::AlternatingPolarity{ measure_time_s, discard, store, .. } => measure_time_s * (discard + store) as f64,
	};
	Duration::from_secs_f64(secs.max(0.0))
}

fn main() -> Result<(), Box<dyn Error>> {
	let cli = Cli::parse();
	cli::init_logging(cli.common.verbose);

	let cfg = RunConfig::from_file(&cli.common.config)?;
	let seq = cfg.sequence.ok_or("No [sequence] section in the configuration")?;
	seq.validate()?;
	let points = seq.expected_readings()?;
	info!("{} sequence, {} readings expected", seq.keyword(), points);

	let schema = ElementSchema::new(&[Element::Reading, Element::Timestamp, Element::VoltageSource])?;
	let function = match seq {
		TestSequence::AlternatingPolarity{..} => SenseFunction::Resistance,
		_ => SenseFunction::Current,
	};

	let inst = visa::open(&cfg.instrument.resource, &cfg.instrument.gateways(), cfg.instrument.timeout()?)?;
	let mut k = Keithley6517b::connect(inst)?;
	k.reset()?;
	if cfg.sense.zero_correct {
		k.acquire_zero_correct()?;
		k.zero_correct(true)?;
	}
	k.zero_check(false)?;
	k.initialize(&SystemSetup{ nplc: cfg.sense.nplc, ..SystemSetup::default() })?;
	k.set_data_format(DataFormat::Ascii)?;
	k.set_format_elements(&schema)?;
	k.configure_sense(&SenseConfig{
		function,
		nplc: cfg.sense.nplc,
		range: cfg.sense.range.map(SenseRange::Manual).unwrap_or(SenseRange::Auto),
		digits: cfg.sense.digits,
		..SenseConfig::default()
	})?;
	k.configure_buffer(&BufferConfig{ elements: vec![Element::Timestamp, Element::VoltageSource], points, fill: FillMode::Next })?;
	k.configure_test_sequence(&seq)?;
	info!("Configuration complete");

	k.reset_timestamp()?;
	k.arm_test_sequence()?;

	let deadline = Instant::now() + nominal_duration(&seq, points) * 2 + cfg.instrument.timeout()?;
	let mut stored = 0;
	while stored < points {
		if Instant::now() > deadline {
			warn!("Sequence still running at the deadline, {} of {} readings stored", stored, points);
			k.abort()?;
			break;
		}
		thread::sleep(POLL_INTERVAL);
		stored = k.buffer_points()?;
		debug!("{}/{} readings stored", stored, points);
	}

	if stored == 0 {
		return Err("No readings were stored".into());
	}
	let table = acquisition::read_buffer_table(&mut k, stored.min(points))?;
	if let TestSequence::AlternatingPolarity{..} = seq {
		let last = k.last_buffer_reading()?;
		info!("Alternating polarity resistance: {:?} Ohm", last.first());
	}

	let stats = table.sampling_stats(Element::Timestamp)?;
	info!("{} samples in {:.3} s", stats.samples, stats.elapsed);

	let dir = export::ensure_dir(&cfg.output.dir)?;
	let save_id = cfg.save_id()?;
	let title = cfg.output.title.clone().unwrap_or_else(|| format!("{} {}", save_id, seq.keyword()));

	if !cli.common.no_plot && cfg.output.png {
		let spec = PlotSpec::new(&title, Element::Timestamp, Element::VoltageSource, Element::Reading);
		export::plot_sweep(dir.join(format!("{}.png", save_id)), &table, &spec)?;
	}

	if !cli.common.no_export && cfg.output.xlsx {
		let mut settings = cfg.to_settings()?;
		settings.insert("save_id", &save_id)?;
		settings.insert("readings_stored", stored)?;
		settings.extend("sampling", stats)?;
		export::write_workbook(dir.join(format!("{}_data.xlsx", save_id)), &table, None, Some(&settings))?;
		std::fs::write(dir.join(format!("{}_settings.json", save_id)), settings.to_json_pretty()?)?;
	}

	Ok(())
}
