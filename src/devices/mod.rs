
// Drivers are organized by model rather than by manufacturer since each model speaks its own dialect anyway.
// Every driver wraps anything implementing `Instrument`, so the same code runs against a VXI-11 link or a
// simulated instrument.

pub mod keithley6517b;
pub mod keithley2410;
pub mod agilent33210a;
pub mod keithley2361;

use crate::error::{Error, Result};
use crate::instrument::Instrument;

/// Instruments with a voltage source that can be parked at zero and switched off
pub trait SourceOutput {

	fn output(&mut self, on:bool) -> Result<()>;

	fn set_voltage(&mut self, volts:f64) -> Result<()>;

	/// Return the source to 0 V and switch the output off.  The output is switched off even if zeroing fails; the
	/// first error is the one reported.
	fn zero_and_disable(&mut self) -> Result<()> {
		let zeroed = self.set_voltage(0.0);
		let off = self.output(false);
		zeroed.and(off)
	}

}

pub(crate) fn on_off(b:bool) -> &'static str { if b { "ON" } else { "OFF" } }

/// Check `*IDN?` for the model we expect before driving the instrument
pub(crate) fn expect_model<I: Instrument>(inst:&mut I, model:&str) -> Result<()> {
	let idn = inst.identify()?;
	if idn.model.to_ascii_uppercase().contains(&model.to_ascii_uppercase()) {
		Ok(())
	} else {
		Err(Error::Validation(format!("Successfully connected to a device but it doesn't appear to be a {} ({})", model, idn)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::instrument::SimulatedInstrument;

	#[test]
	fn model_check() {
		let mut inst = SimulatedInstrument::new();
		inst.push_response("KEITHLEY INSTRUMENTS INC.,MODEL 2410,1234567,C30\n");
		assert!(expect_model(&mut inst, "2410").is_ok());
		inst.push_response("KEITHLEY INSTRUMENTS INC.,MODEL 2410,1234567,C30\n");
		assert!(expect_model(&mut inst, "6517").is_err());
	}
}
