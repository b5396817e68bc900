//! Keithley 6517A/6517B electrometer.
//!
//! Used two ways: as a source-voltage / measure-current (SVMI) setup stepping its own 1 kV source, and as a
//! plain voltmeter watching an amplifier's monitor output.  The A and B models share the command set used
//! here.

// Implemented
// *RST
// :SYST:RNUM:RES, :SYST:TSC, :SYST:HSC, :SYST:TST:TYPE, :SYST:TST:REL:RES, :TRAC:TST:FORM, :DISP:ENAB
// :SYST:ZCH, :SYST:ZCOR, :SYST:ZCOR:ACQ
// :FORM:DATA, :FORM:BORD, :FORM:ELEM
// :SOUR:VOLT, :SOUR:VOLT:RANG, :SOUR:VOLT:LIM, :SOUR:VOLT:MCON, :OUTP
// :SENS:FUNC, :SENS:<func>:NPLC, :SENS:<func>:RANG[:AUTO], :SENS:<func>:REF, :SENS:<func>:DIG, :SENS:VOLT:DC:GUAR
// :INIT:CONT, :ARM..., :ARM:LAY2..., :TRIG...
// :TRAC:ELEM, :TRAC:CLE, :TRAC:POIN[:AUTO], :TRAC:FEED:CONT, :TRAC:DATA?, :TRAC:LAST?, :TRAC:POIN:ACT?
// :TSEQ:TYPE, :TSEQ:<type>:..., :TSEQ:TSO, :TSEQ:ARM
// :INIT, :ABOR, :FETC?, :SENS:DATA:FRES?, :READ?

pub mod trigger;

use std::thread;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::devices::{expect_model, on_off, SourceOutput};
use crate::error::{validation, Result};
use crate::instrument::{scpi_number, Instrument};
use crate::sweep::{self, MAX_BUFFER_POINTS};
use crate::table::{Element, ElementSchema, Endianness};

pub use trigger::{ControlSource, Count, Direction, Layer, TriggerModel};

pub const MAX_SOURCE_VOLTS:f64 = 1000.0;
pub const NPLC_RANGE:std::ops::RangeInclusive<f64> = 0.01..=10.0;
pub const DIGITS_RANGE:std::ops::RangeInclusive<u8> = 4..=7;

/// Most sensitive current range, used while acquiring the zero correction
pub const ZERO_CORRECT_RANGE_A:f64 = 2e-12;

/// Display is left on at or above this integration time; below it the front panel slows acquisition down
pub const DISPLAY_NPLC_THRESHOLD:f64 = 5.0;

/// The source has two ranges, 100 V and 1000 V
pub fn source_range(volts:f64) -> Result<f64> {
	let v = volts.abs();
	if v > MAX_SOURCE_VOLTS || !v.is_finite() {
		Err(validation(format!("{} V is beyond the 6517 source", volts)))
	} else if v <= 100.0 {
		Ok(100.0)
	} else {
		Ok(1000.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFormat {
	Ascii,
	/// IEEE-754 single precision
	SReal(Endianness),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemSetup {
	pub nplc: f64,
	/// Timestamps relative to the last timestamp reset rather than real-time clock
	pub relative_timestamps: bool,
	/// Force the display on or off.  By default it follows the integration time.
	pub display: Option<bool>,
}

impl Default for SystemSetup {
	fn default() -> Self { Self{ nplc: 1.0, relative_timestamps: true, display: None } }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
	pub level: f64,
	pub limit: f64,
	/// Defaults to the smallest range holding both `level` and `limit`'s intent, i.e. `level`
	pub range: Option<f64>,
	/// Tie source LO to ammeter LO for source-voltage/measure-current
	pub meter_connect: bool,
}

impl Default for SourceConfig {
	fn default() -> Self { Self{ level: 0.0, limit: MAX_SOURCE_VOLTS, range: None, meter_connect: true } }
}

impl SourceConfig {

	/// Refuse set-points that the configured range or limit can't source
	pub fn check_setpoints(&self, setpoints:&[f64]) -> Result<()> {
		let range = source_range(self.range.unwrap_or(self.level))?;
		for v in setpoints.iter() {
			if !v.is_finite() || v.abs() > range {
				return Err(validation(format!("Set-point {} V doesn't fit the {} V source range", v, range)));
			}
			if v.abs() > self.limit {
				return Err(validation(format!("Set-point {} V is beyond the {} V limit", v, self.limit)));
			}
		}
		Ok(())
	}

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenseFunction {
	Voltage,
	Current,
	Resistance,
	Charge,
}

impl SenseFunction {
	pub fn keyword(self) -> &'static str {
		match self {
			SenseFunction::Voltage    => "VOLT",
			SenseFunction::Current    => "CURR",
			SenseFunction::Resistance => "RES",
			SenseFunction::Charge     => "CHAR",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SenseRange {
	Auto,
	Manual(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SenseConfig {
	pub function: SenseFunction,
	pub nplc: f64,
	pub range: SenseRange,
	pub reference: f64,
	pub digits: u8,
	/// Voltage measurements only
	pub guard: Option<bool>,
}

impl Default for SenseConfig {
	fn default() -> Self {
		Self{ function: SenseFunction::Current, nplc: 1.0, range: SenseRange::Auto, reference: 0.0, digits: 6, guard: None }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillMode {
	Never,
	/// Fill and stop
	Next,
	/// Circular
	Always,
	PreTrigger,
}

impl FillMode {
	fn keyword(self) -> &'static str {
		match self {
			FillMode::Never      => "NEV",
			FillMode::Next       => "NEXT",
			FillMode::Always     => "ALW",
			FillMode::PreTrigger => "PRET",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
	/// Optional elements stored with each reading.  READ, STAT, RNUM and UNIT are always stored.
	pub elements: Vec<Element>,
	pub points: usize,
	pub fill: FillMode,
}

/// The built-in test sequences
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TestSequence {
	SquareWave { high_v: f64, high_time_s: f64, low_v: f64, low_time_s: f64, cycles: u32 },
	Staircase { start_v: f64, stop_v: f64, step_v: f64, step_time_s: f64 },
	CapacitorLeakage { bias_v: f64, readings: u32, interval_s: f64 },
	AlternatingPolarity { offset_v: f64, alternating_v: f64, measure_time_s: f64, discard: u32, store: u32 },
}

// Minimum wait before starting an alternating polarity test, which the instrument needs after arming
const ALTP_SCAN_DELAY_S:f64 = 0.5;

impl TestSequence {

	pub fn keyword(&self) -> &'static str {
		match self {
			TestSequence::SquareWave{..}          => "SQSW",
			TestSequence::Staircase{..}           => "STSW",
			TestSequence::CapacitorLeakage{..}    => "CLE",
			TestSequence::AlternatingPolarity{..} => "ALTP",
		}
	}

	/// Number of readings the sequence leaves in the buffer
	pub fn expected_readings(&self) -> Result<usize> {
		Ok(match *self {
			TestSequence::SquareWave{ cycles, .. } => 2 * cycles as usize,
			TestSequence::Staircase{ start_v, stop_v, step_v, .. } => sweep::staircase_points(start_v, stop_v, step_v)?,
			TestSequence::CapacitorLeakage{ readings, .. } => readings as usize,
			TestSequence::AlternatingPolarity{ store, .. } => store as usize,
		})
	}

	/// Largest voltage the sequence sources, which sets the source range and limit
	pub fn max_voltage(&self) -> f64 {
		match *self {
			TestSequence::SquareWave{ high_v, low_v, .. } => high_v.abs().max(low_v.abs()),
			TestSequence::Staircase{ start_v, stop_v, .. } => start_v.abs().max(stop_v.abs()),
			TestSequence::CapacitorLeakage{ bias_v, .. } => bias_v.abs(),
			TestSequence::AlternatingPolarity{ offset_v, alternating_v, .. } => offset_v.abs().max(alternating_v.abs()),
		}
	}

	/// Check every parameter against what the instrument accepts, before anything is sent to it
	pub fn validate(&self) -> Result<()> {
		source_range(self.max_voltage())?;
		match *self {
			TestSequence::SquareWave{ high_time_s, low_time_s, cycles, .. } => {
				check_time(high_time_s, 9999.9)?;
				check_time(low_time_s, 9999.9)?;
				if cycles < 1 || 2 * cycles as usize > MAX_BUFFER_POINTS {
					return Err(validation("Square wave cycle count must be 1 to half the buffer size"));
				}
			},
			TestSequence::Staircase{ step_time_s, .. } => {
				check_time(step_time_s, 9999.9)?;
			},
			TestSequence::CapacitorLeakage{ readings, interval_s, .. } => {
				check_time(interval_s, 99999.9)?;
				if readings < 1 {
					return Err(validation("Leakage test needs at least one reading"));
				}
			},
			TestSequence::AlternatingPolarity{ measure_time_s, discard, store, .. } => {
				if !(0.5..=9999.9).contains(&measure_time_s) {
					return Err(validation("Alternating polarity measure time must be 0.5 to 9999.9 s"));
				}
				if discard > 9999 || store < 1 {
					return Err(validation("Alternating polarity needs 0-9999 discarded and at least 1 stored reading"));
				}
			},
		}
		if self.expected_readings()? > MAX_BUFFER_POINTS {
			return Err(validation("Number of points is too large"));
		}
		Ok(())
	}

}

fn check_time(t:f64, max:f64) -> Result<()> {
	if (0.0..=max).contains(&t) { Ok(()) } else { Err(validation(format!("Time {} s out of range 0 to {} s", t, max))) }
}

pub struct Keithley6517b<I: Instrument> {
	inst: I,
	schema: Option<ElementSchema>,
	data_format: DataFormat,
	settle: Duration,
}

impl<I: Instrument> Keithley6517b<I> {

	pub fn new(inst:I) -> Self {
		Self{ inst, schema: None, data_format: DataFormat::Ascii, settle: Duration::from_millis(500) }
	}

	/// Wrap `inst` after checking `*IDN?` names a 6517
	pub fn connect(mut inst:I) -> Result<Self> {
		expect_model(&mut inst, "6517")?;
		Ok(Self::new(inst))
	}

	/// Time given to the input to settle around a zero correction acquisition
	pub fn with_settle_time(mut self, d:Duration) -> Self {
		self.settle = d;
		self
	}

	pub fn inner(&mut self) -> &mut I { &mut self.inst }

	pub fn into_inner(self) -> I { self.inst }

	/// Schema last declared with `set_format_elements`
	pub fn schema(&self) -> Option<&ElementSchema> { self.schema.as_ref() }

	fn write_all(&mut self, cmds:&[String]) -> Result<()> {
		for cmd in cmds {
			self.inst.write(cmd)?;
		}
		Ok(())
	}

	pub fn reset(&mut self) -> Result<()> {
		self.schema = None;
		self.data_format = DataFormat::Ascii;
		self.inst.write("*RST")
	}

	pub fn initialize(&mut self, setup:&SystemSetup) -> Result<()> {
		self.inst.write(":SYST:RNUM:RES")?;
		self.inst.write(":SYST:TSC OFF")?;
		self.inst.write(":SYST:HSC OFF")?;
		self.inst.write(if setup.relative_timestamps { ":SYST:TST:TYPE REL" } else { ":SYST:TST:TYPE RTCL" })?;
		self.inst.write(":TRAC:TST:FORM ABS")?;

		let display = setup.display.unwrap_or(setup.nplc >= DISPLAY_NPLC_THRESHOLD);
		self.inst.write(&format!(":DISP:ENAB {}", on_off(display)))
	}

	pub fn set_format_elements(&mut self, schema:&ElementSchema) -> Result<()> {
		self.inst.write(&format!(":FORM:ELEM {}", schema.to_scpi()))?;
		self.schema = Some(schema.clone());
		Ok(())
	}

	pub fn set_data_format(&mut self, fmt:DataFormat) -> Result<()> {
		match fmt {
			DataFormat::Ascii => self.inst.write(":FORM:DATA ASC")?,
			DataFormat::SReal(order) => {
				self.inst.write(":FORM:DATA SRE")?;
				self.inst.write(match order {
					Endianness::Big    => ":FORM:BORD NORM",
					Endianness::Little => ":FORM:BORD SWAP",
				})?;
			},
		}
		self.data_format = fmt;
		Ok(())
	}

	pub fn zero_check(&mut self, on:bool) -> Result<()> { self.inst.write(&format!(":SYST:ZCH {}", on_off(on))) }

	pub fn zero_correct(&mut self, on:bool) -> Result<()> { self.inst.write(&format!(":SYST:ZCOR {}", on_off(on))) }

	/// Null the input offset on the most sensitive current range.  Leaves zero check enabled.
	pub fn acquire_zero_correct(&mut self) -> Result<()> {
		info!("Acquiring zero correction");
		self.zero_check(true)?;
		self.inst.write(":SENS:FUNC \"CURR\"")?;
		self.inst.write(":SENS:CURR:RANG:AUTO OFF")?;
		self.inst.write(&format!(":SENS:CURR:RANG {}", scpi_number(ZERO_CORRECT_RANGE_A)))?;
		self.zero_check(false)?;
		thread::sleep(self.settle);
		self.inst.write(":SYST:ZCOR:ACQ")?;
		thread::sleep(self.settle);
		self.zero_check(true)
	}

	pub fn configure_source(&mut self, cfg:&SourceConfig) -> Result<()> {
		let range = source_range(cfg.range.unwrap_or(cfg.level))?;
		source_range(cfg.level)?;
		if !(0.0..=MAX_SOURCE_VOLTS).contains(&cfg.limit) {
			return Err(validation(format!("Voltage limit must be 0 to {} V", MAX_SOURCE_VOLTS)));
		}
		if cfg.level.abs() > range {
			return Err(validation(format!("{} V doesn't fit the {} V range", cfg.level, range)));
		}

		self.inst.write(&format!(":SOUR:VOLT:MCON {}", on_off(cfg.meter_connect)))?;
		self.inst.write(&format!(":SOUR:VOLT {}", scpi_number(cfg.level)))?;
		self.inst.write(&format!(":SOUR:VOLT:RANG {}", scpi_number(range)))?;
		self.inst.write(&format!(":SOUR:VOLT:LIM {}", scpi_number(cfg.limit)))
	}

	pub fn configure_sense(&mut self, cfg:&SenseConfig) -> Result<()> {
		if !NPLC_RANGE.contains(&cfg.nplc) {
			return Err(validation(format!("NPLC must be 0.01 to 10, got {}", cfg.nplc)));
		}
		if !DIGITS_RANGE.contains(&cfg.digits) {
			return Err(validation(format!("Resolution must be 4 to 7 digits, got {}", cfg.digits)));
		}
		if cfg.guard.is_some() && cfg.function != SenseFunction::Voltage {
			return Err(validation("Guard only applies to voltage measurements"));
		}

		let f = cfg.function.keyword();
		self.inst.write(&format!(":SENS:FUNC \"{}\"", f))?;
		if let Some(guard) = cfg.guard {
			self.inst.write(&format!(":SENS:VOLT:DC:GUAR {}", on_off(guard)))?;
		}
		self.inst.write(&format!(":SENS:{}:NPLC {}", f, scpi_number(cfg.nplc)))?;
		match cfg.range {
			SenseRange::Auto => self.inst.write(&format!(":SENS:{}:RANG:AUTO ON", f))?,
			SenseRange::Manual(r) => {
				self.inst.write(&format!(":SENS:{}:RANG:AUTO OFF", f))?;
				self.inst.write(&format!(":SENS:{}:RANG {}", f, scpi_number(r)))?;
			},
		}
		self.inst.write(&format!(":SENS:{}:REF {}", f, scpi_number(cfg.reference)))?;
		self.inst.write(&format!(":SENS:{}:DIG {}", f, cfg.digits))
	}

	pub fn configure_trigger_model(&mut self, model:&TriggerModel) -> Result<()> {
		let cmds = model.commands()?;
		debug!("Trigger model: {} commands", cmds.len());
		self.write_all(&cmds)
	}

	/// Turn buffer storage off.  Readings still go to `:FETC?`.
	pub fn disable_buffer(&mut self) -> Result<()> { self.inst.write(":TRAC:FEED:CONT NEV") }

	pub fn configure_buffer(&mut self, cfg:&BufferConfig) -> Result<()> {
		crate::sweep::check_point_count(cfg.points, MAX_BUFFER_POINTS)?;
		for e in cfg.elements.iter() {
			match e {
				Element::Timestamp | Element::VoltageSource | Element::Channel | Element::ExternalTemperature | Element::Humidity => {},
				other => return Err(validation(format!("{} can't be chosen as a buffer element", other))),
			}
		}

		let elements = if cfg.elements.is_empty() {
			"NONE".to_owned()
		} else {
			cfg.elements.iter().map(|e| e.keyword()).collect::<Vec<&str>>().join(",")
		};

		// Order matters: clearing and resizing reset the feed control
		self.inst.write(&format!(":TRAC:ELEM {}", elements))?;
		self.inst.write(":TRAC:CLE")?;
		self.inst.write(":TRAC:POIN:AUTO OFF")?;
		self.inst.write(&format!(":TRAC:POIN {}", cfg.points))?;
		self.inst.write(&format!(":TRAC:FEED:CONT {}", cfg.fill.keyword()))
	}

	pub fn configure_test_sequence(&mut self, seq:&TestSequence) -> Result<()> {
		seq.validate()?;

		let vmax = seq.max_voltage();
		let range = scpi_number(source_range(vmax)?);
		let limit = scpi_number(vmax);

		self.inst.write(&format!(":TSEQ:TYPE {}", seq.keyword()))?;
		match *seq {
			TestSequence::SquareWave{ high_v, high_time_s, low_v, low_time_s, cycles } => {
				self.inst.write(&format!(":SOUR:VOLT:RANG {}", range))?;
				self.inst.write(&format!(":SOUR:VOLT:LIM {}", limit))?;
				self.inst.write(&format!(":TSEQ:SQSW:HLEV {}", scpi_number(high_v)))?;
				self.inst.write(&format!(":TSEQ:SQSW:HTIM {}", scpi_number(high_time_s)))?;
				self.inst.write(&format!(":TSEQ:SQSW:LLEV {}", scpi_number(low_v)))?;
				self.inst.write(&format!(":TSEQ:SQSW:LTIM {}", scpi_number(low_time_s)))?;
				self.inst.write(&format!(":TSEQ:SQSW:COUN {}", cycles))?;
			},
			TestSequence::Staircase{ start_v, stop_v, step_v, step_time_s } => {
				self.inst.write(&format!(":SOUR:VOLT:RANG {}", range))?;
				self.inst.write(&format!(":SOUR:VOLT:LIM {}", limit))?;
				self.inst.write(&format!(":TSEQ:STSW:STAR {}", scpi_number(start_v)))?;
				self.inst.write(&format!(":TSEQ:STSW:STOP {}", scpi_number(stop_v)))?;
				self.inst.write(&format!(":TSEQ:STSW:STEP {}", scpi_number(step_v)))?;
				self.inst.write(&format!(":TSEQ:STSW:STIM {}", scpi_number(step_time_s)))?;
			},
			TestSequence::CapacitorLeakage{ bias_v, readings, interval_s } => {
				self.inst.write(&format!(":TSEQ:CLE:SVOL {}", scpi_number(bias_v)))?;
				self.inst.write(&format!(":TSEQ:CLE:SPO {}", readings))?;
				self.inst.write(&format!(":TSEQ:CLE:SPIN {}", scpi_number(interval_s)))?;
			},
			TestSequence::AlternatingPolarity{ offset_v, alternating_v, measure_time_s, discard, store } => {
				self.inst.write(":SENS:RES:MSEL NORM")?;
				self.inst.write(&format!(":SOUR:VOLT:RANG {}", range))?;
				self.inst.write(&format!(":SOUR:VOLT:LIM {}", limit))?;
				self.inst.write(&format!(":TSEQ:ALTP:OFSV {}", scpi_number(offset_v)))?;
				self.inst.write(&format!(":TSEQ:ALTP:ALTV {}", scpi_number(alternating_v)))?;
				self.inst.write(&format!(":TSEQ:ALTP:MTIM {}", scpi_number(measure_time_s)))?;
				self.inst.write(&format!(":TSEQ:ALTP:DISC {}", discard))?;
				self.inst.write(&format!(":TSEQ:ALTP:READ {}", store))?;
				self.inst.write(&format!(":ARM:LAY2:DEL {}", scpi_number(ALTP_SCAN_DELAY_S)))?;
			},
		}
		self.inst.write(":TSEQ:TSO IMM")
	}

	pub fn arm_test_sequence(&mut self) -> Result<()> {
		info!("Arming test sequence");
		self.inst.write(":TSEQ:ARM")
	}

	pub fn reset_timestamp(&mut self) -> Result<()> { self.inst.write(":SYST:TST:REL:RES") }

	/// Leave Idle for Arm Layer 1
	pub fn initiate(&mut self) -> Result<()> { self.inst.write(":INIT") }

	pub fn abort(&mut self) -> Result<()> { self.inst.write(":ABOR") }

	/// Latest reading, one value per declared column
	pub fn fetch(&mut self) -> Result<Vec<f64>> { self.query_values(":FETC?") }

	/// A reading that hasn't been returned before, waiting for one if necessary
	pub fn fresh(&mut self) -> Result<Vec<f64>> { self.query_values(":SENS:DATA:FRES?") }

	/// Trigger and return a reading
	pub fn read(&mut self) -> Result<Vec<f64>> { self.query_values(":READ?") }

	pub fn read_buffer(&mut self) -> Result<Vec<f64>> { self.query_values(":TRAC:DATA?") }

	pub fn last_buffer_reading(&mut self) -> Result<Vec<f64>> { self.query_values(":TRAC:LAST?") }

	/// Readings currently stored
	pub fn buffer_points(&mut self) -> Result<usize> {
		let resp = self.inst.query(":TRAC:POIN:ACT?")?;
		resp.trim().parse::<f64>()
			.map(|x| x as usize)
			.map_err(|_| crate::error::parse(format!("Buffer point count {:?}", resp.trim())))
	}

	fn query_values(&mut self, cmd:&str) -> Result<Vec<f64>> {
		match self.data_format {
			DataFormat::Ascii => self.inst.query_ascii_values(cmd),
			DataFormat::SReal(order) => Ok(self.inst.query_binary_f32(cmd, order)?.into_iter().map(|x| x as f64).collect()),
		}
	}

}

impl<I: Instrument> SourceOutput for Keithley6517b<I> {

	fn output(&mut self, on:bool) -> Result<()> { self.inst.write(&format!(":OUTP {}", on_off(on))) }

	fn set_voltage(&mut self, volts:f64) -> Result<()> {
		source_range(volts)?;
		self.inst.write(&format!(":SOUR:VOLT {}", scpi_number(volts)))
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::instrument::SimulatedInstrument;

	fn k() -> Keithley6517b<SimulatedInstrument> {
		Keithley6517b::new(SimulatedInstrument::new()).with_settle_time(Duration::from_millis(0))
	}

	#[test]
	fn source_ranges() {
		assert_eq!(source_range(18.0).unwrap(), 100.0);
		assert_eq!(source_range(-100.0).unwrap(), 100.0);
		assert_eq!(source_range(-500.0).unwrap(), 1000.0);
		assert!(source_range(1000.1).is_err());
	}

	#[test]
	fn setpoints_checked_against_range() {
		let cfg = SourceConfig{ range: Some(100.0), ..SourceConfig::default() };
		assert!(cfg.check_setpoints(&[0.0, 50.0, 100.0, -100.0]).is_ok());
		assert!(cfg.check_setpoints(&[0.0, 150.0, 300.0]).is_err());

		let limited = SourceConfig{ range: Some(1000.0), limit: 200.0, ..SourceConfig::default() };
		assert!(limited.check_setpoints(&[0.0, 300.0]).is_err());
		assert!(SourceConfig::default().check_setpoints(&[f64::NAN]).is_err());
	}

	#[test]
	fn svmi_setup() {
		let mut k = k();
		k.initialize(&SystemSetup::default()).unwrap();
		k.configure_source(&SourceConfig{ range: Some(18.0), ..SourceConfig::default() }).unwrap();
		k.configure_sense(&SenseConfig{ range: SenseRange::Manual(1e-6), ..SenseConfig::default() }).unwrap();

		assert_eq!(k.into_inner().take_commands(), vec![
			":SYST:RNUM:RES", ":SYST:TSC OFF", ":SYST:HSC OFF", ":SYST:TST:TYPE REL", ":TRAC:TST:FORM ABS", ":DISP:ENAB OFF",
			":SOUR:VOLT:MCON ON", ":SOUR:VOLT 0", ":SOUR:VOLT:RANG 100", ":SOUR:VOLT:LIM 1000",
			":SENS:FUNC \"CURR\"", ":SENS:CURR:NPLC 1", ":SENS:CURR:RANG:AUTO OFF", ":SENS:CURR:RANG 1e-6",
			":SENS:CURR:REF 0", ":SENS:CURR:DIG 6",
		]);
	}

	#[test]
	fn sense_guards() {
		let mut k = k();
		assert!(k.configure_sense(&SenseConfig{ nplc: 20.0, ..SenseConfig::default() }).is_err());
		assert!(k.configure_sense(&SenseConfig{ digits: 8, ..SenseConfig::default() }).is_err());
		assert!(k.configure_sense(&SenseConfig{ guard: Some(false), ..SenseConfig::default() }).is_err());

		let volts = SenseConfig{ function: SenseFunction::Voltage, guard: Some(false), range: SenseRange::Manual(10.0), nplc: 0.2, ..SenseConfig::default() };
		k.configure_sense(&volts).unwrap();
		let cmds = k.into_inner().take_commands();
		assert_eq!(cmds[0], ":SENS:FUNC \"VOLT\"");
		assert_eq!(cmds[1], ":SENS:VOLT:DC:GUAR OFF");
		assert!(cmds.contains(&":SENS:VOLT:RANG 10".to_owned()));
	}

	#[test]
	fn zero_correct_sequence() {
		let mut k = k();
		k.acquire_zero_correct().unwrap();
		assert_eq!(k.into_inner().take_commands(), vec![
			":SYST:ZCH ON", ":SENS:FUNC \"CURR\"", ":SENS:CURR:RANG:AUTO OFF", ":SENS:CURR:RANG 2e-12",
			":SYST:ZCH OFF", ":SYST:ZCOR:ACQ", ":SYST:ZCH ON",
		]);
	}

	#[test]
	fn buffer_setup() {
		let mut k = k();
		let cfg = BufferConfig{ elements: vec![Element::Timestamp, Element::VoltageSource], points: 40, fill: FillMode::Next };
		k.configure_buffer(&cfg).unwrap();
		assert_eq!(k.inner().take_commands(), vec![
			":TRAC:ELEM TST,VSO", ":TRAC:CLE", ":TRAC:POIN:AUTO OFF", ":TRAC:POIN 40", ":TRAC:FEED:CONT NEXT",
		]);

		let too_big = BufferConfig{ points: MAX_BUFFER_POINTS + 1, ..cfg.clone() };
		assert!(k.configure_buffer(&too_big).is_err());
		let bad_elem = BufferConfig{ elements: vec![Element::Reading], ..cfg };
		assert!(k.configure_buffer(&bad_elem).is_err());
	}

	#[test]
	fn square_wave_sequence() {
		let mut k = k();
		let seq = TestSequence::SquareWave{ high_v: 200.0, high_time_s: 1.0, low_v: 0.0, low_time_s: 2.0, cycles: 5 };
		assert_eq!(seq.expected_readings().unwrap(), 10);
		k.configure_test_sequence(&seq).unwrap();
		assert_eq!(k.into_inner().take_commands(), vec![
			":TSEQ:TYPE SQSW", ":SOUR:VOLT:RANG 1000", ":SOUR:VOLT:LIM 200",
			":TSEQ:SQSW:HLEV 200", ":TSEQ:SQSW:HTIM 1", ":TSEQ:SQSW:LLEV 0", ":TSEQ:SQSW:LTIM 2", ":TSEQ:SQSW:COUN 5",
			":TSEQ:TSO IMM",
		]);
	}

	#[test]
	fn alternating_polarity_sequence() {
		let mut k = k();
		let seq = TestSequence::AlternatingPolarity{ offset_v: 0.0, alternating_v: 10.0, measure_time_s: 15.0, discard: 3, store: 6 };
		k.configure_test_sequence(&seq).unwrap();
		let cmds = k.into_inner().take_commands();
		assert_eq!(cmds[1], ":SENS:RES:MSEL NORM");
		assert!(cmds.contains(&":ARM:LAY2:DEL 0.5".to_owned()));
		assert_eq!(cmds.last().unwrap(), ":TSEQ:TSO IMM");

		let too_fast = TestSequence::AlternatingPolarity{ offset_v: 0.0, alternating_v: 10.0, measure_time_s: 0.1, discard: 0, store: 1 };
		assert!(self::k().configure_test_sequence(&too_fast).is_err());
	}

	#[test]
	fn staircase_readings() {
		let seq = TestSequence::Staircase{ start_v: 0.0, stop_v: -50.0, step_v: -10.0, step_time_s: 0.5 };
		assert_eq!(seq.expected_readings().unwrap(), 6);
		assert_eq!(seq.max_voltage(), 50.0);
	}

	#[test]
	fn staircase_zero_step_is_refused() {
		let seq = TestSequence::Staircase{ start_v: 0.0, stop_v: 50.0, step_v: 0.0, step_time_s: 1.0 };
		assert!(matches!(seq.expected_readings(), Err(crate::Error::Validation(_))));
		assert!(seq.validate().is_err());

		let mut k = k();
		assert!(k.configure_test_sequence(&seq).is_err());
		assert!(k.into_inner().commands().is_empty());
	}

	#[test]
	fn binary_fetch() {
		let mut inst = SimulatedInstrument::new();
		let mut raw = b"#0".to_vec();
		raw.extend_from_slice(&1.0e-9f32.to_be_bytes());
		raw.extend_from_slice(&0.25f32.to_be_bytes());
		inst.push_raw_response(raw);

		let mut k = Keithley6517b::new(inst);
		k.set_data_format(DataFormat::SReal(Endianness::Big)).unwrap();
		let vals = k.fetch().unwrap();
		assert_eq!(vals.len(), 2);
		assert!((vals[0] - 1.0e-9).abs() < 1e-15);
		assert_eq!(vals[1], 0.25);
	}

	#[test]
	fn output_guard_commands() {
		let mut k = k();
		k.output(true).unwrap();
		k.set_voltage(-300.0).unwrap();
		k.zero_and_disable().unwrap();
		assert!(k.set_voltage(1200.0).is_err());
		assert_eq!(k.into_inner().take_commands(), vec![":OUTP ON", ":SOUR:VOLT -300", ":SOUR:VOLT 0", ":OUTP OFF"]);
	}

	#[test]
	fn buffer_point_count() {
		let mut inst = SimulatedInstrument::new();
		inst.push_response("+00040\n");
		let mut k = Keithley6517b::new(inst);
		assert_eq!(k.buffer_points().unwrap(), 40);
	}
}
