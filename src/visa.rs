//! VISA resource strings.
//!
//! Instruments are addressed the way the lab already writes them down, `GPIB0::27::INSTR` or
//! `TCPIP0::192.168.1.20::inst0::INSTR`.  GPIB instruments are reached through a LAN/GPIB gateway that
//! speaks VXI-11 (an E5810, a GPIB-ENET/1000, ...), where the link device name `gpib<board>,<address>`
//! selects the bus address behind the gateway.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use lazy_static::lazy_static;
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::instrument::Vxi11Instrument;

lazy_static! {
	static ref GPIB_RE: Regex  = Regex::new(r"(?i)^GPIB(\d*)::(\d+)(?:::(\d+))?(?:::INSTR)?$").unwrap();
	static ref TCPIP_RE: Regex = Regex::new(r"(?i)^TCPIP(\d*)::([^:]+)(?:::([^:]+))?(?:::INSTR)?$").unwrap();
}

pub const MAX_GPIB_ADDRESS:u8 = 30;

#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
	Gpib { board: u8, primary: u8, secondary: Option<u8> },
	Tcpip { board: u8, host: String, device: String },
}

impl Resource {

	pub fn parse(s:&str) -> Result<Self> {
		let s = s.trim();

		if let Some(cap) = GPIB_RE.captures(s) {
			let board:u8   = parse_index(cap.get(1).map(|m| m.as_str()), s)?;
			let primary:u8 = parse_index(cap.get(2).map(|m| m.as_str()), s)?;
			let secondary:Option<u8> = match cap.get(3) {
				Some(m) => Some(parse_index(Some(m.as_str()), s)?),
				None    => None,
			};
			if primary > MAX_GPIB_ADDRESS {
				return Err(Error::UnsupportedResource(format!("{}: GPIB primary address must be 0-{}", s, MAX_GPIB_ADDRESS)));
			}
			return Ok(Resource::Gpib{ board, primary, secondary });
		}

		if let Some(cap) = TCPIP_RE.captures(s) {
			let board:u8 = parse_index(cap.get(1).map(|m| m.as_str()), s)?;
			let host = cap.get(2).map(|m| m.as_str().to_owned()).unwrap_or_default();
			// "SOCKET" resources are raw sockets, not VXI-11
			let device = match cap.get(3).map(|m| m.as_str()) {
				Some(d) if d.eq_ignore_ascii_case("SOCKET") => return Err(Error::UnsupportedResource(s.to_owned())),
				Some(d) => d.to_owned(),
				None    => "inst0".to_owned(),
			};
			return Ok(Resource::Tcpip{ board, host, device });
		}

		Err(Error::UnsupportedResource(s.to_owned()))
	}

	/// Link device name to ask the VXI-11 server for
	pub fn device_name(&self) -> String {
		match self {
			Resource::Gpib{ board, primary, secondary: None } => format!("gpib{},{}", board, primary),
			Resource::Gpib{ board, primary, secondary: Some(sa) } => format!("gpib{},{},{}", board, primary, sa),
			Resource::Tcpip{ device, .. } => device.clone(),
		}
	}

	/// Host running the VXI-11 server that fronts this resource
	pub fn host<'a>(&'a self, gateways:&'a Gateways) -> Result<&'a str> {
		match self {
			Resource::Gpib{ board, .. } => gateways.host(*board)
				.ok_or_else(|| Error::UnsupportedResource(format!("{}: no LAN/GPIB gateway configured for board {}", self, board))),
			Resource::Tcpip{ host, .. } => Ok(host.as_str()),
		}
	}

}

fn parse_index(s:Option<&str>, resource:&str) -> Result<u8> {
	match s {
		None | Some("") => Ok(0),
		Some(x) => x.parse::<u8>().map_err(|_| Error::UnsupportedResource(format!("{}: index {} out of range", resource, x))),
	}
}

impl FromStr for Resource {
	type Err = Error;
	fn from_str(s:&str) -> Result<Self> { Resource::parse(s) }
}

impl fmt::Display for Resource {
	fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result {
		match self {
			Resource::Gpib{ board, primary, secondary: None } => write!(f, "GPIB{}::{}::INSTR", board, primary),
			Resource::Gpib{ board, primary, secondary: Some(sa) } => write!(f, "GPIB{}::{}::{}::INSTR", board, primary, sa),
			Resource::Tcpip{ board, host, device } => write!(f, "TCPIP{}::{}::{}::INSTR", board, host, device),
		}
	}
}

/// Which gateway host serves each GPIB board index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gateways(BTreeMap<u8, String>);

impl Gateways {
	pub fn new() -> Self { Self::default() }

	pub fn with(mut self, board:u8, host:&str) -> Self {
		self.0.insert(board, host.to_owned());
		self
	}

	pub fn host(&self, board:u8) -> Option<&str> { self.0.get(&board).map(|s| s.as_str()) }
}

/// Resolve `resource`, connect to its VXI-11 server and open a link
pub fn open(resource:&str, gateways:&Gateways, timeout:Duration) -> Result<Vxi11Instrument> {
	let res = Resource::parse(resource)?;
	let host = res.host(gateways)?;
	info!("Opening {} via {} ({})", res, host, res.device_name());
	let mut inst = Vxi11Instrument::open(host, &res.device_name())?;
	crate::instrument::Instrument::set_timeout(&mut inst, timeout)?;
	Ok(inst)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn gpib_resource_with_board() {
		let r = Resource::parse("GPIB2::27::INSTR").unwrap();
		assert_eq!(r, Resource::Gpib{ board: 2, primary: 27, secondary: None });
		assert_eq!(r.device_name(), "gpib2,27");
		assert_eq!(r.to_string(), "GPIB2::27::INSTR");
	}

	#[test]
	fn gpib_resource_without_board_or_suffix() {
		// Board index and ::INSTR suffix are both optional
		let r = Resource::parse("GPIB::25").unwrap();
		assert_eq!(r, Resource::Gpib{ board: 0, primary: 25, secondary: None });
	}

	#[test]
	fn gpib_secondary_address() {
		let r = Resource::parse("gpib0::5::96::instr").unwrap();
		assert_eq!(r.device_name(), "gpib0,5,96");
	}

	#[test]
	fn gpib_address_out_of_range() {
		assert!(Resource::parse("GPIB0::31::INSTR").is_err());
	}

	#[test]
	fn tcpip_default_device() {
		let r = Resource::parse("TCPIP::192.168.2.4::INSTR").unwrap();
		assert_eq!(r.device_name(), "inst0");
		assert_eq!(r.host(&Gateways::new()).unwrap(), "192.168.2.4");
	}

	#[test]
	fn usb_and_socket_are_unsupported() {
		match Resource::parse("USB0::0x0957::0x1507::MY48003320::INSTR") {
			Err(Error::UnsupportedResource(_)) => {},
			other => panic!("unexpected {:?}", other),
		}
		assert!(Resource::parse("TCPIP0::10.0.0.2::5025::SOCKET").is_err());
	}

	#[test]
	fn gpib_needs_a_gateway() {
		let r = Resource::parse("GPIB1::25::INSTR").unwrap();
		assert!(r.host(&Gateways::new()).is_err());
		let gw = Gateways::new().with(1, "lan-gpib.lab");
		assert_eq!(r.host(&gw).unwrap(), "lan-gpib.lab");
	}
}
