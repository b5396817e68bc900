//! Keithley 2410 1100 V SourceMeter.
//!
//! The sweeps here run inside the instrument: a source list or a linear staircase is loaded, the trigger count
//! is set to the number of points, and a single `:READ?` brings back every reading at once.

// Implemented
// *RST
// :FORM:ELEM:SENS, :SYST:TIME:RES, :DATA:TST:FORM (reported as TRAC:TST:FORM on older firmware)
// :SOUR:FUNC, :SOUR:VOLT, :SOUR:CURR, :SOUR:<func>:RANG, :SOUR:<func>:MODE, :SOUR:LIST:VOLT, :SOUR:DEL
// :SOUR:VOLT:STAR, :SOUR:VOLT:STOP, :SOUR:VOLT:STEP, :SOUR:SWE:SPAC, :SOUR:SWE:RANG, :SOUR:SWE:DIR
// :SENS:FUNC, :SENS:CURR:PROT, :SENS:CURR:RANG, :SENS:CURR:NPLC
// :SENS:RES:MODE, :SENS:RES:NPLC, :SENS:RES:RANG, :SENS:VOLT:PROT, :SYST:RSEN
// :TRIG:COUN, :OUTP, :READ?

use log::info;
use serde::{Deserialize, Serialize};

use crate::devices::{expect_model, on_off, SourceOutput};
use crate::error::{validation, Result};
use crate::instrument::{scpi_number, Instrument};
use crate::sweep::{self, MAX_LIST_POINTS};
use crate::table::{Element, ElementSchema};

pub const MAX_SOURCE_VOLTS:f64 = 1100.0;
pub const MAX_SWEEP_POINTS:usize = 2500;
pub const NPLC_RANGE:std::ops::RangeInclusive<f64> = 0.01..=10.0;

/// Current compliance used by the manual four-wire ohms setup
pub const OHMS_CURRENT_PROTECTION_A:f64 = 20e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampFormat {
	/// Time since the previous reading
	Delta,
	/// Time since the timestamp was last reset
	Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFunction {
	Voltage,
	Current,
}

impl SourceFunction {
	fn keyword(self) -> &'static str {
		match self {
			SourceFunction::Voltage => "VOLT",
			SourceFunction::Current => "CURR",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SourceRange {
	Max,
	Manual(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepDirection {
	Up,
	Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OhmsMode {
	Auto,
	Manual { range: f64, voltage_protection: f64 },
}

pub struct Keithley2410<I: Instrument> {
	inst: I,
	schema: Option<ElementSchema>,
	trigger_count: Option<usize>,
}

impl<I: Instrument> Keithley2410<I> {

	pub fn new(inst:I) -> Self { Self{ inst, schema: None, trigger_count: None } }

	pub fn connect(mut inst:I) -> Result<Self> {
		expect_model(&mut inst, "2410")?;
		Ok(Self::new(inst))
	}

	pub fn inner(&mut self) -> &mut I { &mut self.inst }

	pub fn into_inner(self) -> I { self.inst }

	pub fn schema(&self) -> Option<&ElementSchema> { self.schema.as_ref() }

	/// Readings the next `:READ?` returns, as set by the last sweep configured
	pub fn trigger_count(&self) -> Option<usize> { self.trigger_count }

	pub fn reset(&mut self) -> Result<()> {
		self.schema = None;
		self.trigger_count = None;
		self.inst.write("*RST")
	}

	/// The 2410 only knows the sense elements, and sends them in a fixed order
	pub fn set_format_elements(&mut self, schema:&ElementSchema) -> Result<()> {
		for e in schema.elements() {
			match e {
				Element::Voltage | Element::Current | Element::Resistance | Element::Time | Element::Status => {},
				other => return Err(validation(format!("{} isn't a 2410 sense element", other))),
			}
		}
		self.inst.write(&format!(":FORM:ELEM:SENS {}", schema.to_scpi()))?;
		self.schema = Some(schema.clone());
		Ok(())
	}

	pub fn set_timestamp_format(&mut self, fmt:TimestampFormat) -> Result<()> {
		self.inst.write(match fmt {
			TimestampFormat::Delta    => ":DATA:TST:FORM DELT",
			TimestampFormat::Absolute => ":DATA:TST:FORM ABS",
		})
	}

	pub fn reset_timestamp(&mut self) -> Result<()> { self.inst.write(":SYST:TIME:RES") }

	pub fn configure_source(&mut self, function:SourceFunction, range:SourceRange) -> Result<()> {
		let f = function.keyword();
		self.inst.write(&format!(":SOUR:FUNC {}", f))?;
		match range {
			SourceRange::Max => self.inst.write(&format!(":SOUR:{}:RANG MAX", f)),
			SourceRange::Manual(r) => {
				if function == SourceFunction::Voltage && r.abs() > MAX_SOURCE_VOLTS {
					return Err(validation(format!("{} V is beyond the 2410 source", r)));
				}
				self.inst.write(&format!(":SOUR:{}:RANG {}", f, scpi_number(r)))
			},
		}
	}

	/// Measure current with `compliance` amps of protection on a fixed range
	pub fn configure_current_sense(&mut self, compliance:f64, range:f64, nplc:f64) -> Result<()> {
		check_nplc(nplc)?;
		if !(compliance > 0.0) || range <= 0.0 {
			return Err(validation("Current compliance and range must be positive"));
		}
		self.inst.write(":SENS:FUNC \"CURR:DC\"")?;
		self.inst.write(&format!(":SENS:CURR:PROT {}", scpi_number(compliance)))?;
		self.inst.write(&format!(":SENS:CURR:RANG {}", scpi_number(range)))?;
		self.inst.write(&format!(":SENS:CURR:NPLC {}", scpi_number(nplc)))
	}

	/// Load a voltage source list.  `source_delay_s` is the settling time before each measurement.
	pub fn configure_list_sweep(&mut self, setpoints:&[f64], source_delay_s:f64) -> Result<()> {
		sweep::check_point_count(setpoints.len(), MAX_LIST_POINTS)?;
		check_levels(setpoints)?;
		check_delay(source_delay_s)?;

		self.inst.write(":SOUR:VOLT:MODE LIST")?;
		self.inst.write(&format!(":SOUR:LIST:VOLT {}", sweep::to_scpi_list(setpoints)))?;
		self.inst.write(&format!(":TRIG:COUN {}", setpoints.len()))?;
		self.inst.write(&format!(":SOUR:DEL {}", scpi_number(source_delay_s)))?;
		self.trigger_count = Some(setpoints.len());
		Ok(())
	}

	/// Linear staircase from `start` to `stop`.  Returns the number of points it takes.
	pub fn configure_staircase(&mut self, start:f64, stop:f64, step:f64, source_delay_s:f64) -> Result<usize> {
		check_levels(&[start, stop])?;
		check_delay(source_delay_s)?;
		let points = sweep::staircase_points(start, stop, step)?;
		sweep::check_point_count(points, MAX_SWEEP_POINTS)?;

		self.inst.write(&format!(":SOUR:VOLT:STAR {}", scpi_number(start)))?;
		self.inst.write(&format!(":SOUR:VOLT:STOP {}", scpi_number(stop)))?;
		self.inst.write(&format!(":SOUR:VOLT:STEP {}", scpi_number(step.abs())))?;
		self.inst.write(":SOUR:VOLT:MODE SWE")?;
		self.inst.write(":SOUR:SWE:SPAC LIN")?;
		self.inst.write(":SOUR:SWE:RANG FIX")?;
		self.inst.write(&format!(":TRIG:COUN {}", points))?;
		self.inst.write(&format!(":SOUR:DEL {}", scpi_number(source_delay_s)))?;
		self.trigger_count = Some(points);
		Ok(points)
	}

	pub fn set_sweep_direction(&mut self, dir:SweepDirection) -> Result<()> {
		self.inst.write(match dir {
			SweepDirection::Up   => ":SOUR:SWE:DIR UP",
			SweepDirection::Down => ":SOUR:SWE:DIR DOWN",
		})
	}

	pub fn configure_four_wire_ohms(&mut self, mode:OhmsMode, nplc:f64) -> Result<()> {
		check_nplc(nplc)?;
		self.inst.write(":SENS:FUNC \"RES\"")?;
		match mode {
			OhmsMode::Auto => self.inst.write(":SENS:RES:MODE AUTO")?,
			OhmsMode::Manual{ range, voltage_protection } => {
				if range <= 0.0 || voltage_protection <= 0.0 || voltage_protection > MAX_SOURCE_VOLTS {
					return Err(validation("Ohms range and voltage protection must be positive and within the source"));
				}
				self.inst.write(":SENS:RES:MODE MAN")?;
				self.inst.write(&format!(":SENS:RES:RANG {}", scpi_number(range)))?;
				self.inst.write(&format!(":SENS:VOLT:PROT {}", scpi_number(voltage_protection)))?;
				self.inst.write(&format!(":SENS:CURR:PROT {}", scpi_number(OHMS_CURRENT_PROTECTION_A)))?;
			},
		}
		self.inst.write(&format!(":SENS:RES:NPLC {}", scpi_number(nplc)))?;
		self.inst.write(":SYST:RSEN ON")
	}

	/// Trigger the configured sweep and return every reading
	pub fn read(&mut self) -> Result<Vec<f64>> {
		info!("2410 sweep started ({:?} points)", self.trigger_count);
		self.inst.query_ascii_values(":READ?")
	}

}

impl<I: Instrument> SourceOutput for Keithley2410<I> {

	fn output(&mut self, on:bool) -> Result<()> { self.inst.write(&format!(":OUTP {}", on_off(on))) }

	/// Fixed source level.  Leaves list or sweep mode.
	fn set_voltage(&mut self, volts:f64) -> Result<()> {
		check_levels(&[volts])?;
		self.inst.write(":SOUR:VOLT:MODE FIX")?;
		self.inst.write(&format!(":SOUR:VOLT {}", scpi_number(volts)))
	}

}

fn check_nplc(nplc:f64) -> Result<()> {
	if NPLC_RANGE.contains(&nplc) { Ok(()) } else { Err(validation(format!("NPLC must be 0.01 to 10, got {}", nplc))) }
}

fn check_delay(d:f64) -> Result<()> {
	if (0.0..=9999.999).contains(&d) { Ok(()) } else { Err(validation(format!("Source delay {} s out of range", d))) }
}

fn check_levels(levels:&[f64]) -> Result<()> {
	match levels.iter().find(|v| !(v.abs() <= MAX_SOURCE_VOLTS)) {
		Some(v) => Err(validation(format!("{} V is beyond the 2410 source", v))),
		None => Ok(()),
	}
}
