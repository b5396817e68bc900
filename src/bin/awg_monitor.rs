
// The 33210A drives a high voltage amplifier while the 6517B watches the amplifier's monitor output.  The
// electrometer free-runs and the host fetches its latest reading at a fixed interval; the generator output is
// switched on after the first reading so the record starts from the amplifier's zero.

use std::error::Error;

use clap::Parser;
use log::info;

use labsweep::acquisition::{self, MonitorChannel};
use labsweep::cli::{self, CommonArgs};
use labsweep::config::RunConfig;
use labsweep::devices::agilent33210a::{self, Agilent33210a};
use labsweep::devices::keithley6517b::{DataFormat, Keithley6517b, SenseConfig, SenseFunction, SenseRange, SystemSetup, TriggerModel};
use labsweep::export::{self, Column};
use labsweep::sweep;
use labsweep::table::{Element, ElementSchema, Table};
use labsweep::visa;

// Monitor outputs swing at most 10 V
const MONITOR_RANGE_V:f64 = 10.0;

// Points per carrier period in the modelled waveform, and a cap on the total
const IDEAL_POINTS_PER_PERIOD:f64 = 50.0;
const IDEAL_MAX_POINTS:usize = 200_000;

#[derive(Parser)]
#[command(about = "Drive an amplifier from the 33210A and record its monitor output on the 6517B")]
struct Cli {
	#[command(flatten)]
	common: CommonArgs,
}

fn main() -> Result<(), Box<dyn Error>> {
	let cli = Cli::parse();
	cli::init_logging(cli.common.verbose);

	let cfg = RunConfig::from_file(&cli.common.config)?;
	let awg_cfg = cfg.awg.clone().ok_or("No [awg] section in the configuration")?;
	let monitor = cfg.monitor.clone().ok_or("No [monitor] section in the configuration")?;
	let awg_settings = awg_cfg.settings()?;
	sweep::check_point_count(monitor.samples, sweep::MAX_BUFFER_POINTS)?;
	info!("{:?} at {} Hz, {} Vpp + {} V into the amplifier", awg_settings.waveform, awg_settings.frequency, awg_settings.vpp, awg_settings.offset);

	let schema = ElementSchema::new(&[Element::Reading, Element::Timestamp])?;
	let gateways = cfg.instrument.gateways();
	let timeout = cfg.instrument.timeout()?;

	let mut k = Keithley6517b::connect(visa::open(&cfg.instrument.resource, &gateways, timeout)?)?;
	k.reset()?;
	k.initialize(&SystemSetup{ nplc: cfg.sense.nplc, ..SystemSetup::default() })?;
	k.disable_buffer()?;
	k.set_data_format(DataFormat::Ascii)?;
	k.set_format_elements(&schema)?;
	k.configure_trigger_model(&TriggerModel::immediate(monitor.samples as u32))?;
	k.zero_check(true)?;
	k.configure_sense(&SenseConfig{
		function: SenseFunction::Voltage,
		nplc: cfg.sense.nplc,
		range: SenseRange::Manual(MONITOR_RANGE_V),
		digits: cfg.sense.digits,
		guard: Some(false),
		..SenseConfig::default()
	})?;
	k.zero_correct(false)?;
	k.zero_check(false)?;

	let mut awg = Agilent33210a::connect(visa::open(&awg_cfg.resource, &gateways, timeout)?)?;
	awg.configure(&awg_settings)?;
	info!("Configuration complete");

	k.reset_timestamp()?;
	k.initiate()?;
	let delay = acquisition::fetch_delay(cfg.sense.nplc);
	let rows = acquisition::periodic_fetch(k.inner(), monitor.samples, delay, || {
		info!("AWG output on");
		awg.output(true)
	});
	// Whatever happened to the fetches, the amplifier input goes quiet
	awg.output(false)?;
	let table = Table::from_rows(&rows?, &schema)?;

	let stats = table.sampling_stats(Element::Timestamp)?;
	info!("{} samples in {:.3} s ({:.2} samples/s)", stats.samples, stats.elapsed, stats.frequency);

	let t = table.relative_time(Element::Timestamp)?;
	let readings = table.column(Element::Reading)?;
	let (zeroed, measured) = monitor.channel.convert(&readings);

	let dir = export::ensure_dir(&cfg.output.dir)?;
	let save_id = cfg.save_id()?;
	let title = cfg.output.title.clone().unwrap_or_else(|| save_id.clone());

	if !cli.common.no_plot && cfg.output.png {
		let n = ((stats.elapsed * awg_settings.frequency * IDEAL_POINTS_PER_PERIOD) as usize).clamp(2, IDEAL_MAX_POINTS);
		let t_ideal = sweep::linspace(0.0, stats.elapsed, n);
		let ideal = agilent33210a::ideal_waveform(&t_ideal, &awg_settings, awg_cfg.amplifier_gain);
		let label = format!("{} ({})", monitor.channel.measure_units(), monitor.channel.monitor_units());
		export::plot_monitor(dir.join(format!("{}.png", save_id)), &title, (&t_ideal, &ideal), (&t, &measured), &label)?;
	}

	if !cli.common.no_export && cfg.output.xlsx {
		let mut settings = cfg.to_settings()?;
		settings.insert("save_id", &save_id)?;
		settings.extend("awg_input", awg_settings)?;
		settings.insert("monitor_zero_bias_v", monitor.channel.zero_bias())?;
		settings.insert("monitor_units", monitor.channel.monitor_units())?;
		settings.insert("measure_units", monitor.channel.measure_units())?;
		settings.extend("sampling", stats)?;

		let columns = [
			Column::new("READ", readings),
			Column::new("TST", t),
			Column::new("READ_ZCOR", zeroed),
			Column::new("MEAS_ZCOR", measured),
		];
		export::write_columns(dir.join(format!("{}_data.xlsx", save_id)), &columns, Some(&settings))?;
		std::fs::write(dir.join(format!("{}_settings.json", save_id)), settings.to_json_pretty()?)?;
	}

	Ok(())
}
