
use std::io::{self, Error, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, trace};

use crate::xdr::{Packer, Unpacker};
use super::record::{read_record, write_record};
use super::xdr_pack::pack_callheader_no_auth;
use super::xdr_unpack;

pub const DEFAULT_CONNECT_TIMEOUT_SEC:u64 = 5;

pub struct TcpClient {
	stream: TcpStream,
	pub prog: u32,
	pub vers: u32,
	pub lastxid: u32,
	pub packer: Packer,
	pub unpacker: Unpacker,
}

impl TcpClient {

	pub fn connect<A: ToSocketAddrs>(addr:A, prog:u32, vers:u32) -> io::Result<Self> {
		// Try each resolved address in turn, same as TcpStream::connect, but with a bounded wait so a powered-off
		// gateway doesn't hang the program for the OS default
		let mut last_err = Error::new(ErrorKind::NotFound, "Address resolved to nothing");
		for sock_addr in addr.to_socket_addrs()? {
			match TcpStream::connect_timeout(&sock_addr, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SEC)) {
				Ok(stream) => {
					stream.set_nodelay(true)?;
					debug!("Connected to RPC program {:#x} v{} at {}", prog, vers, sock_addr);
					return Ok(Self{ stream, prog, vers, lastxid: 0, packer: Packer::new(), unpacker: Unpacker::new() });
				},
				Err(e) => last_err = e,
			}
		}
		Err(last_err)
	}

	/// Socket-level timeout, applied to both directions.  `None` blocks forever.
	pub fn set_timeout(&mut self, timeout:Option<Duration>) -> io::Result<()> {
		self.stream.set_read_timeout(timeout)?;
		self.stream.set_write_timeout(timeout)
	}

	/// Clear the packer and write a call header for procedure `prc` with a fresh xid.  Arguments are packed
	/// afterwards by the caller.
	pub fn start_call(&mut self, prc:u32) -> io::Result<()> {
		self.lastxid = self.lastxid.wrapping_add(1);
		self.packer.reset();
		pack_callheader_no_auth(&mut self.packer, self.lastxid, self.prog, self.vers, prc)
	}

	/// Send whatever is in the packer and wait for the matching reply, leaving the reply body in the unpacker
	pub fn do_call(&mut self) -> io::Result<()> {
		write_record(&mut self.stream, self.packer.as_bytes())?;

		loop {
			let reply:Vec<u8> = read_record(&mut self.stream)?;

			// Load the response into the unpacker and make sure the xid matches
			self.unpacker.reset(&reply);

			let (xid, _) = xdr_unpack::unpack_replyheader(&mut self.unpacker)?;
			if xid == self.lastxid {
				// Packet from the present
				return Ok(());
			} else if xid < self.lastxid {
				// Packet from the past, most likely the late reply to a call that already timed out
				trace!("Discarding stale reply xid={} (expecting {})", xid, self.lastxid);
				continue;
			} else {
				// Packet from the future?
				return Err(Error::new(ErrorKind::InvalidData, "Somehow got a packet from the future"));
			}
		}
	}

}
