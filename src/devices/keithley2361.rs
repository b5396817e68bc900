//! Keithley 2361 Trigger Control Unit.
//!
//! Routes trigger-link pulses between instruments.  It predates SCPI: commands are single letters terminated
//! by `X`, and a program is a list of relations like `1*2>3` (when inputs 1 and 2 have both fired, pulse
//! output 3) joined by `;`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{validation, Result};
use crate::instrument::Instrument;

pub const CHANNELS:std::ops::RangeInclusive<u8> = 1..=6;

/// Pulse `output` once every input in `inputs` has been triggered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
	pub inputs: Vec<u8>,
	pub output: u8,
}

impl Relation {

	pub fn new(inputs:&[u8], output:u8) -> Result<Self> {
		if inputs.is_empty() {
			return Err(validation("Trigger relation needs at least one input"));
		}
		for ch in inputs.iter().chain(std::iter::once(&output)) {
			check_channel(*ch)?;
		}
		Ok(Self{ inputs: inputs.to_vec(), output })
	}

}

impl fmt::Display for Relation {
	fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result {
		let inputs:Vec<String> = self.inputs.iter().map(|i| i.to_string()).collect();
		write!(f, "{}>{}", inputs.join("*"), self.output)
	}
}

fn check_channel(ch:u8) -> Result<()> {
	if CHANNELS.contains(&ch) { Ok(()) } else { Err(validation(format!("TCU channel {} doesn't exist", ch))) }
}

pub struct Keithley2361<I: Instrument> {
	inst: I,
}

impl<I: Instrument> Keithley2361<I> {

	pub fn new(inst:I) -> Self { Self{ inst } }

	pub fn inner(&mut self) -> &mut I { &mut self.inst }

	pub fn into_inner(self) -> I { self.inst }

	/// Erase the present program
	pub fn clear(&mut self) -> Result<()> { self.inst.write("C0X") }

	/// Release a latched input
	pub fn unlatch(&mut self, ch:u8) -> Result<()> {
		check_channel(ch)?;
		self.inst.write(&format!("I{}X", ch))
	}

	pub fn unlatch_all(&mut self) -> Result<()> {
		for ch in CHANNELS {
			self.unlatch(ch)?;
		}
		Ok(())
	}

	/// Send an immediate pulse out of a channel
	pub fn pulse(&mut self, ch:u8) -> Result<()> {
		check_channel(ch)?;
		self.inst.write(&format!("P{}X", ch))
	}

	pub fn program(&mut self, relations:&[Relation]) -> Result<()> {
		if relations.is_empty() {
			return Err(validation("Empty trigger program"));
		}
		let prog:Vec<String> = relations.iter().map(|r| r.to_string()).collect();
		self.inst.write(&format!("{}X", prog.join(";")))
	}

	/// One-to-one routes, `(input, output)`
	pub fn link(&mut self, routes:&[(u8, u8)]) -> Result<()> {
		let relations = routes.iter()
			.map(|&(i, o)| Relation::new(&[i], o))
			.collect::<Result<Vec<Relation>>>()?;
		self.program(&relations)
	}

	/// Device clear.  Also erases the programmed relations.
	pub fn device_clear(&mut self) -> Result<()> { self.inst.device_clear() }

}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::instrument::{SimulatedInstrument, DEVICE_CLEAR_MARKER};

	#[test]
	fn exercise_routine() {
		let mut tcu = Keithley2361::new(SimulatedInstrument::new());
		tcu.clear().unwrap();
		tcu.unlatch_all().unwrap();
		tcu.pulse(3).unwrap();
		tcu.link(&[(2, 3), (1, 2)]).unwrap();
		tcu.device_clear().unwrap();
		assert_eq!(tcu.into_inner().take_commands(), vec![
			"C0X", "I1X", "I2X", "I3X", "I4X", "I5X", "I6X", "P3X", "2>3;1>2X", DEVICE_CLEAR_MARKER,
		]);
	}

	#[test]
	fn and_relation() {
		let mut tcu = Keithley2361::new(SimulatedInstrument::new());
		tcu.program(&[Relation::new(&[1, 2], 1).unwrap()]).unwrap();
		assert_eq!(tcu.into_inner().take_commands(), vec!["1*2>1X"]);
	}

	#[test]
	fn channel_range() {
		let mut tcu = Keithley2361::new(SimulatedInstrument::new());
		assert!(tcu.pulse(0).is_err());
		assert!(tcu.unlatch(7).is_err());
		assert!(tcu.link(&[(1, 9)]).is_err());
		assert!(Relation::new(&[], 1).is_err());
		assert!(tcu.into_inner().commands().is_empty());
	}
}
