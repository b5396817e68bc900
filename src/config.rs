//! Run configuration.
//!
//! Everything an experiment needs to know that used to be edited in before each run: where the instrument is,
//! what to sweep, how to measure and where results go.  Read from a TOML file; unknown keys are an error so a
//! misspelt parameter can't silently fall back to its default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::acquisition::MonitorChannel;
use crate::devices::agilent33210a::{self, AmplitudeModulation, AwgSettings, Load, Waveform};
use crate::devices::keithley6517b::TestSequence;
use crate::error::{validation, Result};
use crate::export::Settings;
use crate::instrument::DEFAULT_TIMEOUT_SEC;
use crate::sweep::{self, ProfileSweep, SweepProfile};
use crate::visa::Gateways;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayEntry {
	pub board: u8,
	pub host: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstrumentConfig {
	/// VISA resource string, e.g. `GPIB0::24::INSTR`
	pub resource: String,
	#[serde(default)]
	pub gateway: Vec<GatewayEntry>,
	#[serde(default = "default_timeout_s")]
	pub timeout_s: f64,
	/// Pause before each command
	#[serde(default)]
	pub throttle_ms: Option<u64>,
}

fn default_timeout_s() -> f64 { DEFAULT_TIMEOUT_SEC as f64 }

impl InstrumentConfig {

	pub fn gateways(&self) -> Gateways {
		self.gateway.iter().fold(Gateways::new(), |g, e| g.with(e.board, &e.host))
	}

	pub fn timeout(&self) -> Result<Duration> {
		if self.timeout_s > 0.0 && self.timeout_s.is_finite() {
			Ok(Duration::from_secs_f64(self.timeout_s))
		} else {
			Err(validation(format!("Timeout must be positive, got {} s", self.timeout_s)))
		}
	}

}

/// Set-points: an explicit list, a numbered profile, or a ramp from `start` to `stop`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SweepConfig {
	pub start: f64,
	pub stop: f64,
	pub step: f64,
	/// Come back down after reaching `stop`
	pub mirror: bool,
	/// Don't source the peak twice when mirroring
	pub drop_peak: bool,
	/// Follow the sweep with a polarity-flipped copy
	pub invert: bool,
	/// Passes through the set-points
	pub cycles: usize,
	pub list: Option<Vec<f64>>,
	/// Numbered sweep profile, with `stop` as the peak and `step` as the step
	pub profile: Option<u32>,
}

impl Default for SweepConfig {
	fn default() -> Self {
		Self{ start: 0.0, stop: 1.0, step: 0.1, mirror: true, drop_peak: true, invert: false, cycles: 1, list: None, profile: None }
	}
}

impl SweepConfig {

	pub fn setpoints(&self) -> Result<Vec<f64>> {
		if let Some(p) = self.profile_sweep()? {
			return Ok(p.setpoints);
		}
		let mut ans = match &self.list {
			Some(list) => list.clone(),
			None => sweep::ramp(self.start, self.stop, self.step)?,
		};
		if self.mirror {
			ans = sweep::append_reverse(&ans, self.drop_peak);
		}
		if self.invert {
			ans = sweep::append_inverted(&ans);
		}
		if ans.is_empty() {
			return Err(validation("Sweep has no points"));
		}
		Ok(ans)
	}

	pub fn profile_sweep(&self) -> Result<Option<ProfileSweep>> {
		match self.profile {
			Some(n) => Ok(Some(SweepProfile::from_number(n)?.build(self.stop, self.step)?)),
			None => Ok(None),
		}
	}

}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SenseSection {
	pub nplc: f64,
	/// Autorange when absent
	pub range: Option<f64>,
	pub digits: u8,
	/// Current compliance for source-measure units, in amps
	pub compliance: f64,
	pub zero_correct: bool,
}

impl Default for SenseSection {
	fn default() -> Self { Self{ nplc: 1.0, range: None, digits: 6, compliance: 1e-6, zero_correct: true } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SourceSection {
	/// Chosen from the sweep peak when absent
	pub range: Option<f64>,
	pub limit: f64,
	/// Settling time between stepping the source and measuring
	pub delay_s: f64,
}

impl Default for SourceSection {
	fn default() -> Self { Self{ range: None, limit: 1000.0, delay_s: 0.0 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OutputConfig {
	pub dir: PathBuf,
	/// Next free numeric id in `dir` when absent
	pub save_id: Option<String>,
	pub png: bool,
	pub xlsx: bool,
	pub title: Option<String>,
}

impl Default for OutputConfig {
	fn default() -> Self { Self{ dir: PathBuf::from("results"), save_id: None, png: true, xlsx: true, title: None } }
}

/// Waveform generator driving an amplifier, described by what the amplifier should output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AwgConfig {
	pub resource: String,
	pub amplifier_gain: f64,
	pub waveform: Waveform,
	pub frequency: f64,
	/// At the amplifier output
	pub output_volts: f64,
	#[serde(default)]
	pub output_offset: f64,
	#[serde(default = "default_duty_cycle")]
	pub duty_cycle: f64,
	/// Output termination in ohms, high impedance when absent
	#[serde(default)]
	pub load_ohms: Option<f64>,
	#[serde(default)]
	pub modulation: Option<AmplitudeModulation>,
}

fn default_duty_cycle() -> f64 { 50.0 }

impl AwgConfig {

	/// Generator settings that produce the requested amplifier output
	pub fn settings(&self) -> Result<AwgSettings> {
		let (vpp, offset) = agilent33210a::required_input_to_amplifier(self.amplifier_gain, self.output_volts, self.output_offset)?;
		let s = AwgSettings{
			waveform: self.waveform,
			frequency: self.frequency,
			vpp,
			offset,
			duty_cycle: self.duty_cycle,
			load: self.load_ohms.map(Load::Ohms).unwrap_or(Load::HighZ),
			modulation: self.modulation,
		};
		s.validate()?;
		Ok(s)
	}

}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
	pub channel: MonitorChannel,
	pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
	pub instrument: InstrumentConfig,
	#[serde(default)]
	pub sweep: SweepConfig,
	#[serde(default)]
	pub sense: SenseSection,
	#[serde(default)]
	pub source: SourceSection,
	#[serde(default)]
	pub output: OutputConfig,
	/// Stop a cycle once the fresh reading exceeds this many amps
	#[serde(default)]
	pub threshold: Option<f64>,
	#[serde(default)]
	pub sequence: Option<TestSequence>,
	#[serde(default)]
	pub awg: Option<AwgConfig>,
	#[serde(default)]
	pub monitor: Option<MonitorConfig>,
}

impl RunConfig {

	pub fn from_file<P: AsRef<Path>>(path:P) -> Result<Self> {
		let path = path.as_ref();
		debug!("Reading config {}", path.display());
		let text = fs::read_to_string(path)?;
		Self::from_toml(&text)
	}

	pub fn from_toml(text:&str) -> Result<Self> {
		let cfg:Self = toml::from_str(text)?;
		cfg.instrument.timeout()?;
		if cfg.sweep.cycles == 0 {
			return Err(validation("Sweep needs at least one cycle"));
		}
		Ok(cfg)
	}

	/// The save id to use, taking the next free one in the output directory if none was given
	pub fn save_id(&self) -> Result<String> {
		match &self.output.save_id {
			Some(id) => Ok(id.clone()),
			None => Ok(crate::export::next_save_id(&self.output.dir)?.to_string()),
		}
	}

	/// Every parameter, flattened for the settings sheet
	pub fn to_settings(&self) -> Result<Settings> {
		let mut s = Settings::new();
		s.extend("", self)?;
		Ok(s)
	}

}
