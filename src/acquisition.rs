//! Getting readings out of a configured instrument.
//!
//! Either the host steps the source and fetches one reading per set-point (`external_loop`), or the instrument
//! runs the whole sweep on its own and the host makes one bulk read (`internal_sweep`, `read_buffer_table`).
//! Every call blocks until the instrument answers or the I/O timeout expires.

use std::ops::{Deref, DerefMut, Range};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::devices::keithley6517b::Keithley6517b;
use crate::devices::SourceOutput;
use crate::error::{validation, Result};
use crate::instrument::{scpi_number, Instrument};
use crate::table::{ElementSchema, Table};

/// Padding on top of the estimated acquisition time
pub const TIMEOUT_PADDING_S:f64 = 0.2;

/// Power line frequency the NPLC settings integrate over
pub const LINE_FREQUENCY_HZ:f64 = 60.0;

/// How long a sweep of `points` should take: twice the source delay per point, plus the integration time
pub fn estimate_timeout(points:usize, source_delay_s:f64, nplc:f64) -> Duration {
	let n = points as f64;
	let secs = n * source_delay_s * 2.0 + n * nplc / LINE_FREQUENCY_HZ + TIMEOUT_PADDING_S;
	Duration::from_secs_f64(secs.max(TIMEOUT_PADDING_S))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopOptions {
	pub cycles: usize,
	/// Stop the current cycle once a fresh reading exceeds this
	pub threshold: Option<f64>,
	/// Wait between setting the source and fetching
	pub settle: Duration,
}

impl Default for LoopOptions {
	fn default() -> Self { Self{ cycles: 1, threshold: None, settle: Duration::from_millis(0) } }
}

/// Where a cycle was cut short by the threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyStop {
	pub cycle: usize,
	/// Index into the set-points
	pub index: usize,
	pub setpoint: f64,
	pub reading: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
	/// One fetched reading per set-point visited
	pub rows: Vec<Vec<f64>>,
	/// Rows belonging to each cycle.  Cycles cut short by the threshold are shorter than the sweep.
	pub cycles: Vec<Range<usize>>,
	pub early_stops: Vec<EarlyStop>,
}

impl LoopOutcome {
	pub fn into_table(self, schema:&ElementSchema) -> Result<Table> { Table::from_rows(&self.rows, schema) }
}

/// Step the source through `setpoints` once per cycle, fetching the latest reading after each step.  The
/// instrument must already be initiated with its output on.
pub fn external_loop<I: Instrument>(inst:&mut I, setpoints:&[f64], opts:&LoopOptions) -> Result<LoopOutcome> {
	if setpoints.is_empty() || opts.cycles == 0 {
		return Err(validation("External loop needs at least one set-point and one cycle"));
	}
	info!("External loop: {} set-points x {} cycles", setpoints.len(), opts.cycles);

	let mut ans = LoopOutcome{ rows: Vec::with_capacity(setpoints.len() * opts.cycles), cycles: vec![], early_stops: vec![] };
	for cycle in 0..opts.cycles {
		let first = ans.rows.len();
		for (index, &v) in setpoints.iter().enumerate() {
			inst.write(&format!(":SOUR:VOLT {}", scpi_number(v)))?;
			if opts.settle > Duration::from_millis(0) {
				thread::sleep(opts.settle);
			}
			ans.rows.push(inst.query_ascii_values(":FETC?")?);

			if let Some(threshold) = opts.threshold {
				let fresh = inst.query_ascii_values(":SENS:DATA:FRES?")?;
				let reading = fresh.first().copied().unwrap_or(f64::NAN);
				debug!("cycle {} V={} fresh={}", cycle, v, reading);
				if reading > threshold {
					info!("Cycle {}: {} > {} threshold (V={} V)", cycle, reading, threshold, v);
					ans.early_stops.push(EarlyStop{ cycle, index, setpoint: v, reading });
					break;
				}
			}
		}
		ans.cycles.push(first..ans.rows.len());
	}
	Ok(ans)
}

/// What an amplifier's monitor output tracks.  The electrometer reads the monitor as a voltage, which is
/// converted back to the monitored quantity after removing the monitor's zero offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorChannel {
	/// 1 V per 100 V of output
	Voltage,
	/// 1 V per 40 mA of output
	Current,
}

impl MonitorChannel {

	/// Monitor reading with the output at zero, in volts
	pub fn zero_bias(self) -> f64 {
		match self {
			MonitorChannel::Voltage => 0.005,
			MonitorChannel::Current => 0.0039,
		}
	}

	/// Monitored quantity per monitor volt, in V/V or uA/V
	pub fn to_measure(self) -> f64 {
		match self {
			MonitorChannel::Voltage => 100.0,
			MonitorChannel::Current => 40e3,
		}
	}

	pub fn monitor_units(self) -> &'static str {
		match self {
			MonitorChannel::Voltage => "1V/100V",
			MonitorChannel::Current => "1V/40mA",
		}
	}

	pub fn measure_units(self) -> &'static str {
		match self {
			MonitorChannel::Voltage => "V",
			MonitorChannel::Current => "uA",
		}
	}

	/// Monitor readings with the zero offset removed, and the same converted to the monitored quantity
	pub fn convert(self, readings:&[f64]) -> (Vec<f64>, Vec<f64>) {
		let zeroed:Vec<f64> = readings.iter().map(|r| r - self.zero_bias()).collect();
		let measured = zeroed.iter().map(|r| r * self.to_measure()).collect();
		(zeroed, measured)
	}

}

/// Wait between fetches while monitoring, long enough for a fresh integration
pub fn fetch_delay(nplc:f64) -> Duration {
	Duration::from_secs_f64((2.0 * nplc / LINE_FREQUENCY_HZ).max(0.0))
}

/// Fetch `samples` readings `fetch_delay` apart.  `after_first` runs once the first reading is in, which is
/// where a waveform generator's output gets switched on so the record starts from a quiet baseline.
pub fn periodic_fetch<I, F>(inst:&mut I, samples:usize, fetch_delay:Duration, mut after_first:F) -> Result<Vec<Vec<f64>>>
	where I: Instrument, F: FnMut() -> Result<()>
{
	let mut ans = Vec::with_capacity(samples);
	for i in 0..samples {
		thread::sleep(fetch_delay);
		ans.push(inst.query_ascii_values(":FETC?")?);
		if i == 0 {
			after_first()?;
		}
	}
	Ok(ans)
}

/// Trigger a sweep the instrument runs itself and reshape the single bulk response
pub fn internal_sweep<I: Instrument>(inst:&mut I, points:usize, schema:&ElementSchema) -> Result<Table> {
	info!("Internal sweep: {} points of {}", points, schema);
	let flat = inst.query_ascii_values(":READ?")?;
	Table::reshape_exact(flat, points, schema)
}

/// Everything stored in the electrometer buffer, reshaped with the format elements last declared
pub fn read_buffer_table<I: Instrument>(k:&mut Keithley6517b<I>, points:usize) -> Result<Table> {
	let schema = k.schema().cloned().ok_or_else(|| validation("Format elements must be declared before reading the buffer"))?;
	let flat = k.read_buffer()?;
	Table::reshape_exact(flat, points, &schema)
}

/// Holds a source with its output on.  However the guard goes away, the source is returned to 0 V and switched
/// off, so an error halfway through a sweep doesn't leave the device under test energised.
pub struct OutputGuard<'a, S: SourceOutput> {
	source: &'a mut S,
	released: bool,
}

impl<'a, S: SourceOutput> OutputGuard<'a, S> {

	pub fn engage(source:&'a mut S) -> Result<Self> {
		source.output(true)?;
		Ok(Self{ source, released: false })
	}

	/// Shut the source down now and report whether that worked
	pub fn release(mut self) -> Result<()> {
		self.released = true;
		self.source.zero_and_disable()
	}

}

impl<'a, S: SourceOutput> Deref for OutputGuard<'a, S> {
	type Target = S;
	fn deref(&self) -> &S { self.source }
}

impl<'a, S: SourceOutput> DerefMut for OutputGuard<'a, S> {
	fn deref_mut(&mut self) -> &mut S { self.source }
}

impl<'a, S: SourceOutput> Drop for OutputGuard<'a, S> {
	fn drop(&mut self) {
		if !self.released {
			if let Err(e) = self.source.zero_and_disable() {
				warn!("Unable to switch the source off: {}", e);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::{Arc, Mutex};
	use crate::instrument::SimulatedInstrument;
	use crate::table::Element;

	// Leaks a microamp at and above `threshold_v`, a nanoamp below
	fn leaky_sample(threshold_v:f64) -> SimulatedInstrument {
		let volts = Arc::new(Mutex::new(0.0f64));
		let seen = volts.clone();
		SimulatedInstrument::new()
			.with_listener(move |cmd| {
				if let Some(v) = cmd.strip_prefix(":SOUR:VOLT ") {
					*seen.lock().unwrap() = v.parse().unwrap();
				}
			})
			.with_responder(move |q| {
				let v = *volts.lock().unwrap();
				let i = if v >= threshold_v { 1e-6 } else { 1e-9 };
				match q {
					":FETC?" | ":SENS:DATA:FRES?" => Some(format!("{:E}NADC,{}\n", i, v)),
					_ => None,
				}
			})
	}

	#[test]
	fn timeout_estimate() {
		let t = estimate_timeout(100, 0.05, 1.0);
		assert!((t.as_secs_f64() - (10.0 + 100.0 / 60.0 + 0.2)).abs() < 1e-9);
		assert_eq!(estimate_timeout(0, 1.0, 1.0), Duration::from_secs_f64(0.2));
	}

	#[test]
	fn loop_without_threshold() {
		let mut inst = SimulatedInstrument::new()
			.with_responder(|q| if q == ":FETC?" { Some("1.0E-12NADC,+0.0000E+00\n".to_owned()) } else { None });
		let out = external_loop(&mut inst, &[0.0, 5.0, 0.0], &LoopOptions{ cycles: 2, ..LoopOptions::default() }).unwrap();
		assert_eq!(out.rows.len(), 6);
		assert!(out.early_stops.is_empty());
		assert_eq!(&inst.commands()[..2], &[":SOUR:VOLT 0", ":FETC?"]);
		assert!(!inst.commands().iter().any(|c| c.contains("FRES")));
	}

	#[test]
	fn threshold_stops_each_cycle() {
		let mut inst = leaky_sample(10.0);
		let setpoints = [0.0, 5.0, 10.0, 15.0, 10.0, 5.0, 0.0];
		let opts = LoopOptions{ cycles: 2, threshold: Some(500e-9), ..LoopOptions::default() };
		let out = external_loop(&mut inst, &setpoints, &opts).unwrap();

		assert_eq!(out.rows.len(), 6);
		assert_eq!(out.early_stops.len(), 2);
		assert_eq!(out.early_stops[0], EarlyStop{ cycle: 0, index: 2, setpoint: 10.0, reading: 1e-6 });
		assert_eq!(out.early_stops[1].cycle, 1);
		assert_eq!(out.cycles, vec![0..3, 3..6]);

		let schema = ElementSchema::new(&[Element::Reading, Element::VoltageSource]).unwrap();
		let table = out.into_table(&schema).unwrap();
		assert_eq!(table.column(Element::VoltageSource).unwrap(), vec![0.0, 5.0, 10.0, 0.0, 5.0, 10.0]);
	}

	#[test]
	fn monitor_conversion() {
		let (zeroed, volts) = MonitorChannel::Voltage.convert(&[0.005, 0.505]);
		assert!(zeroed[0].abs() < 1e-12);
		assert!((volts[1] - 50.0).abs() < 1e-9);
		assert!((fetch_delay(0.3).as_secs_f64() - 0.01).abs() < 1e-9);
	}

	#[test]
	fn rejects_empty_loop() {
		let mut inst = SimulatedInstrument::new();
		assert!(external_loop(&mut inst, &[], &LoopOptions::default()).is_err());
	}

	#[test]
	fn periodic_fetch_hook_runs_once() {
		let mut inst = SimulatedInstrument::new()
			.with_responder(|q| if q == ":FETC?" { Some("+1.0E-03NVDC,+0.0E+00secs\n".to_owned()) } else { None });
		let mut calls = 0;
		let rows = periodic_fetch(&mut inst, 3, Duration::from_millis(0), || { calls += 1; Ok(()) }).unwrap();
		assert_eq!(rows.len(), 3);
		assert_eq!(calls, 1);
	}

	#[test]
	fn internal_sweep_shape_mismatch() {
		let schema = ElementSchema::parse("VOLT,CURR,TIME").unwrap();
		let mut inst = SimulatedInstrument::new();
		inst.push_response("0,1e-9,0,1,2e-9,0.1,2,3e-9,0.2\n");
		let table = internal_sweep(&mut inst, 3, &schema).unwrap();
		assert_eq!(table.len(), 3);

		inst.push_response("0,1e-9,0,1,2e-9\n");
		assert!(internal_sweep(&mut inst, 3, &schema).is_err());
	}

	#[test]
	fn buffer_needs_schema() {
		let mut k = Keithley6517b::new(SimulatedInstrument::new());
		assert!(read_buffer_table(&mut k, 2).is_err());

		k.set_format_elements(&ElementSchema::parse("READ,TST,VSO").unwrap()).unwrap();
		k.inner().push_response("1.0E-12NADC,0.1secs,+5.0Vsrc,2.0E-12NADC,0.2secs,+10.0Vsrc\n");
		let table = read_buffer_table(&mut k, 2).unwrap();
		assert_eq!(table.column(Element::VoltageSource).unwrap(), vec![5.0, 10.0]);
	}

	struct FakeSource {
		log: Vec<String>,
	}

	impl SourceOutput for FakeSource {
		fn output(&mut self, on:bool) -> Result<()> { self.log.push(format!("out {}", on)); Ok(()) }
		fn set_voltage(&mut self, v:f64) -> Result<()> {
			if v > 100.0 {
				return Err(validation("too high"));
			}
			self.log.push(format!("volt {}", v));
			Ok(())
		}
	}

	fn sweep_with_guard(src:&mut FakeSource, v:f64) -> Result<()> {
		let mut guard = OutputGuard::engage(src)?;
		guard.set_voltage(10.0)?;
		guard.set_voltage(v)?;
		guard.release()
	}

	#[test]
	fn guard_shuts_down_on_error() {
		let mut src = FakeSource{ log: vec![] };
		assert!(sweep_with_guard(&mut src, 500.0).is_err());
		assert_eq!(src.log, vec!["out true", "volt 10", "volt 0", "out false"]);
	}

	#[test]
	fn guard_release_only_once() {
		let mut src = FakeSource{ log: vec![] };
		sweep_with_guard(&mut src, 20.0).unwrap();
		assert_eq!(src.log, vec!["out true", "volt 10", "volt 20", "volt 0", "out false"]);
	}

	// The zeroing write times out, as it would with a wedged GPIB bus
	struct StuckSource {
		log: Vec<String>,
	}

	impl SourceOutput for StuckSource {
		fn output(&mut self, on:bool) -> Result<()> { self.log.push(format!("out {}", on)); Ok(()) }
		fn set_voltage(&mut self, v:f64) -> Result<()> {
			if v == 0.0 {
				return Err(crate::Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "I/O timeout")));
			}
			self.log.push(format!("volt {}", v));
			Ok(())
		}
	}

	#[test]
	fn output_off_when_zeroing_fails() {
		let mut src = StuckSource{ log: vec![] };
		{
			let mut guard = OutputGuard::engage(&mut src).unwrap();
			guard.set_voltage(300.0).unwrap();
		}
		assert_eq!(src.log, vec!["out true", "volt 300", "out false"]);

		let mut src = StuckSource{ log: vec![] };
		let guard = OutputGuard::engage(&mut src).unwrap();
		match guard.release() {
			Err(crate::Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
			other => panic!("Expected the zeroing timeout, got {:?}", other),
		}
		assert_eq!(src.log, vec!["out true", "out false"]);
	}
}
