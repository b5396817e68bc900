//! The 6517 trigger model.
//!
//! The instrument firmware runs a fixed state machine: Idle, then Arm Layer 1, Arm Layer 2 (the scan layer),
//! then the Trigger (measure) layer, looping back out through each layer's count.  Nothing here runs that
//! machine.  A `TriggerModel` only describes the parameters of each transition and renders them as commands.

use serde::{Deserialize, Serialize};

use crate::devices::on_off;
use crate::error::{validation, Result};
use crate::instrument::scpi_number;

pub const MAX_COUNT:u32 = 99999;
pub const MAX_DELAY_S:f64 = 999999.999;
pub const TRIGGER_LINES:std::ops::RangeInclusive<u8> = 1..=6;

/// ACCeptor waits for the layer's event.  SOURce (source bypass) skips the wait on the first pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
	Acceptor,
	Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Count {
	Finite(u32),
	Infinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ControlSource {
	Immediate,
	TriggerLink,
	External,
	Manual,
	Bus,
	/// Timer with its interval in seconds
	Timer(f64),
	Hold,
}

impl ControlSource {
	fn keyword(self) -> &'static str {
		match self {
			ControlSource::Immediate   => "IMM",
			ControlSource::TriggerLink => "TLIN",
			ControlSource::External    => "EXT",
			ControlSource::Manual      => "MAN",
			ControlSource::Bus         => "BUS",
			ControlSource::Timer(_)    => "TIM",
			ControlSource::Hold        => "HOLD",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayerKind {
	Arm,
	Scan,
	Measure,
}

impl LayerKind {
	fn prefix(self) -> &'static str {
		match self {
			LayerKind::Arm     => ":ARM",
			LayerKind::Scan    => ":ARM:LAY2",
			LayerKind::Measure => ":TRIG",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
	pub direction: Direction,
	pub count: Count,
	pub source: ControlSource,
	/// Wait after the layer's event before moving on.  Arm Layer 1 has no delay of its own.
	pub delay_s: f64,
	/// Trigger-link input line used when `source` is `TriggerLink`
	pub input_line: Option<u8>,
	/// Trigger-link line pulsed when the layer completes
	pub output_line: Option<u8>,
}

impl Layer {

	/// Wait for nothing, pass through `count` times
	pub fn immediate(count:Count) -> Self {
		Self{ direction: Direction::Acceptor, count, source: ControlSource::Immediate, delay_s: 0.0, input_line: None, output_line: None }
	}

	/// Wait for a pulse on a trigger-link line
	pub fn on_trigger_link(count:Count, input_line:u8) -> Self {
		Self{ source: ControlSource::TriggerLink, input_line: Some(input_line), ..Self::immediate(count) }
	}

	fn validate(&self, kind:LayerKind) -> Result<()> {
		if let Count::Finite(n) = self.count {
			if n < 1 || n > MAX_COUNT {
				return Err(validation(format!("{} count must be 1 to {} or INF, got {}", kind.prefix(), MAX_COUNT, n)));
			}
		}

		if kind == LayerKind::Arm {
			if self.delay_s != 0.0 {
				return Err(validation("Arm layer 1 has no delay"));
			}
			if let ControlSource::Timer(_) | ControlSource::Hold = self.source {
				return Err(validation(format!("{} can't be used as the arm layer 1 control source", self.source.keyword())));
			}
		}

		if !(0.0..=MAX_DELAY_S).contains(&self.delay_s) {
			return Err(validation(format!("{} delay out of range: {}", kind.prefix(), self.delay_s)));
		}

		if let ControlSource::Timer(t) = self.source {
			if !(t > 0.0) {
				return Err(validation("Timer interval must be positive"));
			}
		}

		for line in self.input_line.iter().chain(self.output_line.iter()) {
			if !TRIGGER_LINES.contains(line) {
				return Err(validation(format!("Trigger link line {} doesn't exist", line)));
			}
		}
		if self.source == ControlSource::TriggerLink && self.input_line.is_none() {
			return Err(validation(format!("{} waits on the trigger link but no input line is set", kind.prefix())));
		}

		Ok(())
	}

	fn commands(&self, kind:LayerKind, out:&mut Vec<String>) {
		let p = kind.prefix();

		out.push(format!("{}:TCON:DIR {}", p, match self.direction {
			Direction::Acceptor => "ACC",
			Direction::Source   => "SOUR",
		}));
		out.push(match self.count {
			Count::Finite(n) => format!("{}:COUN {}", p, n),
			Count::Infinite  => format!("{}:COUN INF", p),
		});
		out.push(format!("{}:SOUR {}", p, self.source.keyword()));
		if let ControlSource::Timer(t) = self.source {
			out.push(format!("{}:TIM {}", p, scpi_number(t)));
		}
		if let Some(line) = self.input_line {
			out.push(format!("{}:TCON:ASYN:ILIN {}", p, line));
		}
		if let Some(line) = self.output_line {
			out.push(format!("{}:TCON:ASYN:OLIN {}", p, line));
		}
		if kind != LayerKind::Arm {
			out.push(format!("{}:DEL {}", p, scpi_number(self.delay_s)));
		}
	}

}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerModel {
	/// Go back around through the layers after reaching Idle instead of holding there
	pub continuous: bool,
	pub arm: Layer,
	pub scan: Layer,
	pub measure: Layer,
}

impl TriggerModel {

	/// Arm once, scan once, take `points` readings as fast as the integration time allows
	pub fn immediate(points:u32) -> Self {
		Self{
			continuous: false,
			arm: Layer::immediate(Count::Finite(1)),
			scan: Layer::immediate(Count::Finite(1)),
			measure: Layer::immediate(Count::Finite(points)),
		}
	}

	pub fn validate(&self) -> Result<()> {
		self.arm.validate(LayerKind::Arm)?;
		self.scan.validate(LayerKind::Scan)?;
		self.measure.validate(LayerKind::Measure)
	}

	pub fn commands(&self) -> Result<Vec<String>> {
		self.validate()?;

		let mut ans:Vec<String> = vec![format!(":INIT:CONT {}", on_off(self.continuous))];
		self.arm.commands(LayerKind::Arm, &mut ans);
		self.scan.commands(LayerKind::Scan, &mut ans);
		self.measure.commands(LayerKind::Measure, &mut ans);
		Ok(ans)
	}

	/// Readings produced by one pass from Idle back to Idle, when every count is finite
	pub fn readings_per_pass(&self) -> Option<u64> {
		let mut ans:u64 = 1;
		for layer in [&self.arm, &self.scan, &self.measure].iter() {
			match layer.count {
				Count::Finite(n) => ans *= n as u64,
				Count::Infinite  => return None,
			}
		}
		Some(ans)
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn immediate_model() {
		let cmds = TriggerModel::immediate(90).commands().unwrap();
		assert_eq!(cmds, vec![
			":INIT:CONT OFF",
			":ARM:TCON:DIR ACC", ":ARM:COUN 1", ":ARM:SOUR IMM",
			":ARM:LAY2:TCON:DIR ACC", ":ARM:LAY2:COUN 1", ":ARM:LAY2:SOUR IMM", ":ARM:LAY2:DEL 0",
			":TRIG:TCON:DIR ACC", ":TRIG:COUN 90", ":TRIG:SOUR IMM", ":TRIG:DEL 0",
		]);
		assert_eq!(TriggerModel::immediate(90).readings_per_pass(), Some(90));
	}

	#[test]
	fn trigger_link_with_output_line() {
		let mut model = TriggerModel::immediate(10);
		model.arm = Layer::on_trigger_link(Count::Finite(1), 2);
		model.measure.output_line = Some(3);
		model.measure.delay_s = 0.05;
		let cmds = model.commands().unwrap();
		assert!(cmds.contains(&":ARM:SOUR TLIN".to_owned()));
		assert!(cmds.contains(&":ARM:TCON:ASYN:ILIN 2".to_owned()));
		assert!(cmds.contains(&":TRIG:TCON:ASYN:OLIN 3".to_owned()));
		assert!(cmds.contains(&":TRIG:DEL 0.05".to_owned()));
	}

	#[test]
	fn infinite_and_timer() {
		let mut model = TriggerModel::immediate(1);
		model.continuous = true;
		model.measure.count = Count::Infinite;
		model.measure.source = ControlSource::Timer(0.5);
		let cmds = model.commands().unwrap();
		assert_eq!(cmds[0], ":INIT:CONT ON");
		assert!(cmds.contains(&":TRIG:COUN INF".to_owned()));
		assert!(cmds.contains(&":TRIG:TIM 0.5".to_owned()));
		assert_eq!(model.readings_per_pass(), None);
	}

	#[test]
	fn rejects_bad_layers() {
		assert!(TriggerModel::immediate(0).commands().is_err());
		assert!(TriggerModel::immediate(100_000).commands().is_err());

		let mut model = TriggerModel::immediate(5);
		model.arm.delay_s = 1.0;
		assert!(model.validate().is_err());

		let mut model = TriggerModel::immediate(5);
		model.arm.source = ControlSource::Hold;
		assert!(model.validate().is_err());

		let mut model = TriggerModel::immediate(5);
		model.scan.source = ControlSource::TriggerLink;
		assert!(model.validate().is_err());

		let mut model = TriggerModel::immediate(5);
		model.measure.output_line = Some(7);
		assert!(model.validate().is_err());
	}
}
