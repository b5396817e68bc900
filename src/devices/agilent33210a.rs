//! Agilent 33210A 10 MHz function / arbitrary waveform generator.
//!
//! In the lab this drives the input of a high voltage amplifier, so settings are usually derived from the
//! voltage wanted at the amplifier's output.  `ideal_waveform` models that output for plotting against what the
//! electrometer actually saw.

// Implemented
// *RST
// OUTP, OUTP:LOAD
// FUNC, FUNC:SQU:DCYC, FUNC:RAMP:SYMM, FREQ, VOLT, VOLT:OFFS, VOLT:UNIT, VOLT:RANG:AUTO
// AM:STAT, AM:SOUR, AM:INT:FUNC, AM:INT:FREQ, AM:DEPT

use std::f64::consts::PI;

use log::info;
use serde::{Deserialize, Serialize};

use crate::devices::{expect_model, on_off};
use crate::error::{validation, Result};
use crate::instrument::{scpi_number, Instrument};

/// Largest Vpp (and Vpp + offset) accepted into a high impedance load, leaving headroom below the 20 V limit
pub const MAX_VPP:f64 = 18.0;
pub const FREQUENCY_RANGE:std::ops::RangeInclusive<f64> = 1e-3..=10e6;
pub const MOD_FREQUENCY_RANGE:std::ops::RangeInclusive<f64> = 2e-3..=20e3;
pub const DUTY_CYCLE_RANGE:std::ops::RangeInclusive<f64> = 20.0..=80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Waveform {
	Sine,
	Square,
	/// Rising sawtooth
	Ramp,
	/// Falling sawtooth
	NegativeRamp,
	Triangle,
}

impl Waveform {

	/// Unit amplitude value at time `t` for a wave of `frequency`
	pub fn sample(self, t:f64, frequency:f64) -> f64 {
		let cycles = frequency * t;
		let frac = cycles - cycles.floor();
		match self {
			Waveform::Sine         => (2.0 * PI * cycles).sin(),
			Waveform::Square       => if frac < 0.5 { 1.0 } else { -1.0 },
			Waveform::Ramp         => 2.0 * frac - 1.0,
			Waveform::NegativeRamp => 1.0 - 2.0 * frac,
			Waveform::Triangle     => if frac < 0.5 { 4.0 * frac - 1.0 } else { 3.0 - 4.0 * frac },
		}
	}

}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Load {
	HighZ,
	Ohms(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeModulation {
	pub waveform: Waveform,
	pub frequency: f64,
	/// Percent
	pub depth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AwgSettings {
	pub waveform: Waveform,
	pub frequency: f64,
	/// Peak to peak volts at the generator output
	pub vpp: f64,
	pub offset: f64,
	/// Square waves only
	pub duty_cycle: f64,
	pub load: Load,
	pub modulation: Option<AmplitudeModulation>,
}

impl Default for AwgSettings {
	fn default() -> Self {
		Self{ waveform: Waveform::Sine, frequency: 1.0, vpp: 0.1, offset: 0.0, duty_cycle: 50.0, load: Load::HighZ, modulation: None }
	}
}

impl AwgSettings {

	/// Refuse anything the generator would clip, and modulation the ideal waveform model can't describe
	pub fn validate(&self) -> Result<()> {
		if self.vpp + self.offset > MAX_VPP {
			return Err(validation("AWG max Vpp + Voffset is 20"));
		}
		if self.vpp > MAX_VPP {
			return Err(validation("AWG max Vpp is 20"));
		}
		if !(self.vpp > 0.0) {
			return Err(validation("AWG amplitude must be positive"));
		}
		if !FREQUENCY_RANGE.contains(&self.frequency) {
			return Err(validation(format!("Carrier frequency {} Hz out of range", self.frequency)));
		}
		if self.waveform == Waveform::Square && !DUTY_CYCLE_RANGE.contains(&self.duty_cycle) {
			return Err(validation(format!("Square duty cycle must be 20 to 80 %, got {}", self.duty_cycle)));
		}
		if let Load::Ohms(r) = self.load {
			if !(1.0..=10e3).contains(&r) {
				return Err(validation(format!("Output load must be 1 to 10k ohms, got {}", r)));
			}
		}
		if let Some(m) = self.modulation {
			if m.depth != 100.0 {
				return Err(validation("Mod depth not set up for other than 100% depth"));
			}
			if !MOD_FREQUENCY_RANGE.contains(&m.frequency) {
				return Err(validation(format!("Modulation frequency {} Hz out of range", m.frequency)));
			}
			if m.frequency >= self.frequency {
				return Err(validation("Modulation frequency must be less than carrier frequency"));
			}
		}
		Ok(())
	}

}

/// Generator amplitude and offset that make an amplifier of `gain` produce `output_volts` and `output_offset`.
/// Rounded to the millivolt the generator resolves.
pub fn required_input_to_amplifier(gain:f64, output_volts:f64, output_offset:f64) -> Result<(f64, f64)> {
	if gain == 0.0 || !gain.is_finite() {
		return Err(validation("Amplifier gain must be finite and non-zero"));
	}
	let round_mv = |x:f64| (x * 1e3).round() / 1e3;
	Ok((round_mv(output_volts / gain), round_mv(output_offset / gain)))
}

/// What an amplifier of `gain` should put out for `settings`, sampled at times `t`.  With modulation on, the
/// carrier amplitude follows the modulating wave.
pub fn ideal_waveform(t:&[f64], settings:&AwgSettings, gain:f64) -> Vec<f64> {
	let amplitude = settings.vpp * gain;
	let offset = settings.offset * gain;
	t.iter().map(|&t| {
		let a = match settings.modulation {
			Some(m) => amplitude * m.waveform.sample(t, m.frequency),
			None => amplitude,
		};
		a * settings.waveform.sample(t, settings.frequency) + offset
	}).collect()
}

pub struct Agilent33210a<I: Instrument> {
	inst: I,
}

impl<I: Instrument> Agilent33210a<I> {

	pub fn new(inst:I) -> Self { Self{ inst } }

	pub fn connect(mut inst:I) -> Result<Self> {
		expect_model(&mut inst, "33210A")?;
		Ok(Self::new(inst))
	}

	pub fn inner(&mut self) -> &mut I { &mut self.inst }

	pub fn into_inner(self) -> I { self.inst }

	/// Reset and program the carrier and optional modulation.  Output stays off.
	pub fn configure(&mut self, s:&AwgSettings) -> Result<()> {
		s.validate()?;
		info!("AWG output: {} Vpp + {} V DC, {:?} at {} Hz", s.vpp, s.offset, s.waveform, s.frequency);

		self.inst.write("*RST")?;
		self.inst.write(&match s.load {
			Load::HighZ => "OUTP:LOAD INF".to_owned(),
			Load::Ohms(r) => format!("OUTP:LOAD {}", scpi_number(r)),
		})?;

		match s.waveform {
			Waveform::Sine   => self.inst.write("FUNC SIN")?,
			Waveform::Square => self.inst.write("FUNC SQU")?,
			ramp => {
				self.inst.write("FUNC RAMP")?;
				let symmetry = match ramp {
					Waveform::Triangle     => 50,
					Waveform::NegativeRamp => 0,
					_                      => 100,
				};
				self.inst.write(&format!("FUNC:RAMP:SYMM {}", symmetry))?;
			},
		}
		self.inst.write(&format!("FREQ {}", scpi_number(s.frequency)))?;
		self.inst.write(&format!("VOLT {}", scpi_number(s.vpp)))?;
		self.inst.write(&format!("VOLT:OFFS {}", scpi_number(s.offset)))?;
		self.inst.write("VOLT:UNIT VPP")?;
		self.inst.write("VOLT:RANG:AUTO ON")?;
		if s.waveform == Waveform::Square {
			self.inst.write(&format!("FUNC:SQU:DCYC {}", scpi_number(s.duty_cycle)))?;
		}

		if let Some(m) = s.modulation {
			self.inst.write("AM:STAT ON")?;
			self.inst.write("AM:SOUR INT")?;
			self.inst.write(&format!("AM:INT:FUNC {}", match m.waveform {
				Waveform::Sine         => "SIN",
				Waveform::Square       => "SQU",
				Waveform::Ramp         => "RAMP",
				Waveform::NegativeRamp => "NRAM",
				Waveform::Triangle     => "TRI",
			}))?;
			self.inst.write(&format!("AM:INT:FREQ {}", scpi_number(m.frequency)))?;
			self.inst.write(&format!("AM:DEPT {}", scpi_number(m.depth)))?;
		}
		Ok(())
	}

	pub fn output(&mut self, on:bool) -> Result<()> { self.inst.write(&format!("OUTP {}", on_off(on))) }

}
