//! The instrument handle every driver and acquisition loop talks through.
//!
//! `Vxi11Instrument` is the real thing.  `SimulatedInstrument` records what it's told and answers queries from
//! a closure or a queue of canned responses, which is enough to check a configurator's command sequence or
//! dry-run an experiment without hardware.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, ErrorKind};
use std::str;
use std::thread;
use std::time::Duration;

use lazy_static::lazy_static;
use log::{debug, trace};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{self, Error, Result};
use crate::table::{self, Endianness};
use crate::vxi11::CoreClient;

lazy_static! {
	static ref IDN_RE: Regex = Regex::new(r"^\s*([^,]+),\s*([^,]+),\s*([^,]*),\s*([^,\s]+)").unwrap();
}

pub const DEFAULT_TIMEOUT_SEC:u64 = 10;

/// What `SimulatedInstrument` records in place of a command when it gets a device clear
pub const DEVICE_CLEAR_MARKER:&str = "(device clear)";

/// Format a number for a SCPI command.  Very small and very large magnitudes use exponent notation so a
/// current range of 2 pA goes out as `2e-12` rather than a long run of zeros.
pub fn scpi_number(x:f64) -> String {
	let a = x.abs();
	if x == 0.0 {
		"0".to_owned()
	} else if a < 1e-3 || a >= 1e7 {
		format!("{:e}", x)
	} else {
		format!("{}", x)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
	pub manufacturer: String,
	pub model: String,
	pub serial_num: String,
	pub fw_version: String,
}

impl Identity {
	pub fn parse(idn:&str) -> Result<Self> {
		let cap = IDN_RE.captures(idn).ok_or_else(|| error::parse(format!("*IDN? response {:?}", idn.trim())))?;
		let field = |i:usize| cap.get(i).map(|m| m.as_str().trim().to_owned()).unwrap_or_default();
		Ok(Self{ manufacturer: field(1), model: field(2), serial_num: field(3), fw_version: field(4) })
	}
}

impl fmt::Display for Identity {
	fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} {} (s/n {}, fw {})", self.manufacturer, self.model, self.serial_num, self.fw_version)
	}
}

pub trait Instrument {

	fn write(&mut self, cmd:&str) -> Result<()>;

	/// One complete response, exactly as the instrument sent it
	fn read_raw(&mut self) -> Result<Vec<u8>>;

	fn set_timeout(&mut self, timeout:Duration) -> Result<()>;

	fn timeout(&self) -> Duration;

	/// Selected device clear.  Empties the instrument's input and output queues without a reset.
	fn device_clear(&mut self) -> Result<()>;

	/// One response as text, without the trailing terminator
	fn read(&mut self) -> Result<String> {
		let raw = self.read_raw()?;
		let s = str::from_utf8(&raw).map_err(|_| error::parse("Unable to interpret response as UTF-8"))?;
		Ok(s.trim_end_matches(|c| c == '\n' || c == '\r').to_owned())
	}

	fn query(&mut self, cmd:&str) -> Result<String> {
		self.write(cmd)?;
		self.read()
	}

	fn query_raw(&mut self, cmd:&str) -> Result<Vec<u8>> {
		self.write(cmd)?;
		self.read_raw()
	}

	/// Comma separated numbers, tolerating the unit and status suffixes some instruments append
	fn query_ascii_values(&mut self, cmd:&str) -> Result<Vec<f64>> {
		let resp = self.query(cmd)?;
		table::parse_ascii_buffer(&resp)
	}

	/// A `#0` block of IEEE-754 single precision values, as sent after `:FORM SRE`
	fn query_binary_f32(&mut self, cmd:&str, order:Endianness) -> Result<Vec<f32>> {
		let resp = self.query_raw(cmd)?;
		table::parse_binary_block(&resp, order)
	}

	/// Block until pending operations finish
	fn opc(&mut self) -> Result<bool> {
		Ok(self.query("*OPC?")?.trim() == "1")
	}

	fn identify(&mut self) -> Result<Identity> {
		let idn = self.query("*IDN?")?;
		Identity::parse(&idn)
	}

}

impl<T: Instrument + ?Sized> Instrument for &mut T {
	fn write(&mut self, cmd:&str) -> Result<()> { (**self).write(cmd) }
	fn read_raw(&mut self) -> Result<Vec<u8>> { (**self).read_raw() }
	fn set_timeout(&mut self, timeout:Duration) -> Result<()> { (**self).set_timeout(timeout) }
	fn timeout(&self) -> Duration { (**self).timeout() }
	fn device_clear(&mut self) -> Result<()> { (**self).device_clear() }
}

/// An instrument reached over a VXI-11 link, either directly or through a LAN/GPIB gateway
pub struct Vxi11Instrument {
	core: CoreClient,
	name: String,
	tx_throttle_duration: Option<Duration>,
}

impl Vxi11Instrument {

	pub fn open(host:&str, device:&str) -> Result<Self> {
		let mut core = CoreClient::new(host)?;
		core.create_link(device)?;
		Ok(Self{ core, name: format!("{}/{}", host, device), tx_throttle_duration: None })
	}

	/// Wrap a core client that already holds a link
	pub fn from_core(core:CoreClient, name:&str) -> Result<Self> {
		if core.link().is_none() {
			return Err(Error::Io(io::Error::new(ErrorKind::NotConnected, "Core client has no link")));
		}
		Ok(Self{ core, name: name.to_owned(), tx_throttle_duration: None })
	}

	/// Pause before every write.  Some older GPIB instruments lose commands that arrive back to back.
	pub fn with_throttle(mut self, d:Duration) -> Self {
		self.tx_throttle_duration = Some(d);
		self
	}

	pub fn name(&self) -> &str { &self.name }

	pub fn trigger(&mut self) -> Result<()> { Ok(self.core.trigger()?) }

	pub fn read_stb(&mut self) -> Result<u8> { Ok(self.core.read_stb()?) }

}

impl Instrument for Vxi11Instrument {

	fn write(&mut self, cmd:&str) -> Result<()> {
		if let Some(d) = self.tx_throttle_duration {
			thread::sleep(d);
		}
		debug!("{} <- {}", self.name, cmd);
		self.core.write(cmd.as_bytes())?;
		Ok(())
	}

	fn read_raw(&mut self) -> Result<Vec<u8>> {
		let ans = self.core.read()?;
		debug!("{} -> {} bytes", self.name, ans.len());
		Ok(ans)
	}

	fn set_timeout(&mut self, timeout:Duration) -> Result<()> {
		trace!("{} timeout {:?}", self.name, timeout);
		Ok(self.core.set_io_timeout(timeout)?)
	}

	fn timeout(&self) -> Duration { self.core.io_timeout() }

	fn device_clear(&mut self) -> Result<()> {
		debug!("{} <- (device clear)", self.name);
		Ok(self.core.clear()?)
	}

}

type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;
type Listener = Box<dyn FnMut(&str) + Send>;

/// Stands in for a real instrument.  Every write is recorded; a read answers the most recent query from the
/// responder first and the queue of canned responses second.  Running out of answers is an I/O timeout, the
/// same thing a real instrument does when it has nothing to say.
pub struct SimulatedInstrument {
	commands: Vec<String>,
	responses: VecDeque<Vec<u8>>,
	responder: Option<Responder>,
	listener: Option<Listener>,
	pending_query: Option<String>,
	timeout: Duration,
}

impl Default for SimulatedInstrument {
	fn default() -> Self {
		Self{
			commands: vec![],
			responses: VecDeque::new(),
			responder: None,
			listener: None,
			pending_query: None,
			timeout: Duration::from_secs(DEFAULT_TIMEOUT_SEC),
		}
	}
}

impl SimulatedInstrument {

	pub fn new() -> Self { Self::default() }

	pub fn with_responder<F>(mut self, f:F) -> Self where F: FnMut(&str) -> Option<String> + Send + 'static {
		self.responder = Some(Box::new(f));
		self
	}

	/// Sees every command written, before any query it carries is answered.  Lets a responder depend on
	/// instrument state such as the present source level.
	pub fn with_listener<F>(mut self, f:F) -> Self where F: FnMut(&str) + Send + 'static {
		self.listener = Some(Box::new(f));
		self
	}

	pub fn push_response(&mut self, resp:&str) { self.responses.push_back(resp.as_bytes().to_vec()); }

	pub fn push_raw_response(&mut self, resp:Vec<u8>) { self.responses.push_back(resp); }

	pub fn commands(&self) -> &[String] { &self.commands }

	pub fn take_commands(&mut self) -> Vec<String> { std::mem::take(&mut self.commands) }

	pub fn pending_responses(&self) -> usize { self.responses.len() }

}

impl Instrument for SimulatedInstrument {

	fn write(&mut self, cmd:&str) -> Result<()> {
		trace!("sim <- {}", cmd);
		if let Some(f) = self.listener.as_mut() {
			f(cmd);
		}
		if cmd.contains('?') {
			self.pending_query = Some(cmd.to_owned());
		}
		self.commands.push(cmd.to_owned());
		Ok(())
	}

	fn read_raw(&mut self) -> Result<Vec<u8>> {
		if let Some(q) = self.pending_query.take() {
			if let Some(f) = self.responder.as_mut() {
				if let Some(resp) = f(&q) {
					return Ok(resp.into_bytes());
				}
			}
		}
		self.responses.pop_front()
			.ok_or_else(|| Error::Io(io::Error::new(ErrorKind::TimedOut, "Simulated instrument has nothing to say")))
	}

	fn set_timeout(&mut self, timeout:Duration) -> Result<()> {
		self.timeout = timeout;
		Ok(())
	}

	fn timeout(&self) -> Duration { self.timeout }

	fn device_clear(&mut self) -> Result<()> {
		self.pending_query = None;
		self.responses.clear();
		self.commands.push(DEVICE_CLEAR_MARKER.to_owned());
		Ok(())
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_from_keithley() {
		let idn = Identity::parse("KEITHLEY INSTRUMENTS INC.,MODEL 6517B,4096123,A13/700x \n").unwrap();
		assert_eq!(idn.manufacturer, "KEITHLEY INSTRUMENTS INC.");
		assert_eq!(idn.model, "MODEL 6517B");
		assert_eq!(idn.serial_num, "4096123");
		assert_eq!(idn.fw_version, "A13/700x");
	}

	#[test]
	fn number_formatting() {
		assert_eq!(scpi_number(0.0), "0");
		assert_eq!(scpi_number(2e-12), "2e-12");
		assert_eq!(scpi_number(20e-9), "2e-8");
		assert_eq!(scpi_number(0.05), "0.05");
		assert_eq!(scpi_number(-500.0), "-500");
		assert_eq!(scpi_number(1.5e7), "1.5e7");
	}

	#[test]
	fn identity_rejects_garbage() {
		assert!(Identity::parse("hello").is_err());
	}

	#[test]
	fn simulated_records_and_answers() {
		let mut inst = SimulatedInstrument::new()
			.with_responder(|q| if q == "*OPC?" { Some("1\n".to_owned()) } else { None });
		inst.push_response("1.5E-12NADC,2.0E-12NADC\n");

		inst.write("*RST").unwrap();
		assert!(inst.opc().unwrap());
		let vals = inst.query_ascii_values(":FETC?").unwrap();
		assert_eq!(vals, vec![1.5e-12, 2.0e-12]);

		assert_eq!(inst.commands(), &["*RST", "*OPC?", ":FETC?"]);
		assert_eq!(inst.pending_responses(), 0);
	}

	#[test]
	fn simulated_times_out_when_empty() {
		let mut inst = SimulatedInstrument::new();
		match inst.query("*IDN?") {
			Err(Error::Io(e)) => assert_eq!(e.kind(), ErrorKind::TimedOut),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn borrowed_instrument_is_an_instrument() {
		fn configure<I: Instrument>(mut inst:I) -> Result<()> { inst.write(":SYST:ZCH ON") }
		let mut inst = SimulatedInstrument::new();
		configure(&mut inst).unwrap();
		assert_eq!(inst.take_commands(), vec![":SYST:ZCH ON".to_owned()]);
	}
}
