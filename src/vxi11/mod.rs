
// Device core
pub const DEVICE_CORE_PROG:u32  = 0x0607af;
pub const DEVICE_CORE_VERS:u32  = 1;
pub const CREATE_LINK:u32       = 10;
pub const DEVICE_WRITE:u32      = 11;
pub const DEVICE_READ:u32       = 12;
pub const DEVICE_READSTB:u32    = 13;
pub const DEVICE_TRIGGER:u32    = 14;
pub const DEVICE_CLEAR:u32      = 15;
pub const DESTROY_LINK:u32      = 23;

pub const CLIENT_ID:i32 = 3333;
pub const DEFAULT_LOCK_TIMEOUT_MS:u32 = 10000;
pub const DEFAULT_IO_TIMEOUT_MS:u32 = 10000;

// Operation flags
pub const FLAG_WAITLOCK:i32   = 0x01;
pub const FLAG_END:i32        = 0x08;
pub const FLAG_TERMCHRSET:i32 = 0x80;

// Read termination reasons
pub const REASON_REQCNT:i32 = 0x01;
pub const REASON_CHR:i32    = 0x02;
pub const REASON_END:i32    = 0x04;

// Extra time given to the socket on top of the device-side I/O timeout, so the instrument gets to report
// its own timeout instead of us cutting the connection first
const SOCKET_TIMEOUT_MARGIN_MS:u64 = 2000;

use std::io::{self, Error, ErrorKind};
use std::ops::Drop;
use std::time::Duration;

use log::{debug, warn};

use crate::rpc::port_mapping::{TcpPortMapperClient, Mapping, Protocol};
use crate::rpc::tcp_clients::TcpClient;

pub mod xdr_pack;

fn err(msg:&str) -> io::Error { Error::new(ErrorKind::Other, msg) }

/// Translate a VXI-11 device error code.  Code 15 keeps its meaning as a timeout so callers can tell an
/// instrument that's still integrating apart from one that's gone.
pub fn device_error(code:i32) -> io::Result<()> {
	match code {
		0  => Ok(()),
		1  => Err(err("Syntax error")),
		3  => Err(Error::new(ErrorKind::NotFound, "Device not accessible")),
		4  => Err(err("Invalid link identifier")),
		5  => Err(Error::new(ErrorKind::InvalidInput, "Parameter error")),
		6  => Err(err("Channel not established")),
		8  => Err(Error::new(ErrorKind::Unsupported, "Operation not supported")),
		9  => Err(err("Out of resources")),
		11 => Err(err("Device locked by another link")),
		12 => Err(err("No lock held by this link")),
		15 => Err(Error::new(ErrorKind::TimedOut, "I/O timeout")),
		17 => Err(err("I/O error")),
		21 => Err(Error::new(ErrorKind::NotFound, "Invalid address")),
		23 => Err(Error::new(ErrorKind::Interrupted, "Abort")),
		29 => Err(err("Channel already established")),
		_  => Err(Error::new(ErrorKind::Other, format!("Unknown VXI-11 error code {}", code))),
	}
}

#[derive(Debug, Clone, Copy)]
pub struct Link {
	pub link_id: i32,
	pub abort_port: u32,
	pub max_recv_size: u32,
}

pub struct CoreClient {
	client: TcpClient,
	opt_link: Option<Link>,
	io_timeout_ms: u32,
	lock_timeout_ms: u32,
}

impl CoreClient {

	fn get_link(&self) -> io::Result<Link> {
		self.opt_link.ok_or_else(|| err("No link"))
	}

	/// Connect to the core channel, asking the portmapper on `host` which port it lives on
	pub fn new(host:&str) -> io::Result<Self> {
		let mut pmap_client = TcpPortMapperClient::new(host)?;

		let mapping = Mapping {
			program: DEVICE_CORE_PROG,
			version: DEVICE_CORE_VERS,
			protocol: Protocol::TCP,
			port: 0,
		};

		let port:u16 = pmap_client.get_port(&mapping)?;
		Self::connect(host, port)
	}

	/// Connect to the core channel on a known port, skipping the portmapper
	pub fn connect(host:&str, port:u16) -> io::Result<Self> {
		let client = TcpClient::connect((host, port), DEVICE_CORE_PROG, DEVICE_CORE_VERS)?;
		let mut ans = CoreClient{ client, opt_link: None, io_timeout_ms: DEFAULT_IO_TIMEOUT_MS, lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS };
		ans.set_io_timeout(Duration::from_millis(DEFAULT_IO_TIMEOUT_MS as u64))?;
		Ok(ans)
	}

	pub fn link(&self) -> Option<Link> { self.opt_link }

	pub fn io_timeout(&self) -> Duration { Duration::from_millis(self.io_timeout_ms as u64) }

	pub fn set_io_timeout(&mut self, timeout:Duration) -> io::Result<()> {
		self.io_timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
		let socket = Duration::from_millis(self.io_timeout_ms as u64 + SOCKET_TIMEOUT_MARGIN_MS);
		self.client.set_timeout(Some(socket))
	}

	/// Open a link to `device`, e.g. "inst0" for a LAN instrument or "gpib0,27" behind a LAN/GPIB gateway
	pub fn create_link(&mut self, device:&str) -> io::Result<Link> {
		if self.opt_link.is_some() {
			return Err(err("Already connected to a link"));
		}

		self.client.start_call(CREATE_LINK)?;
		xdr_pack::pack_create_link_parms(&mut self.client.packer, CLIENT_ID, false, self.lock_timeout_ms, device)?;
		self.client.do_call()?;

		let error:i32         = self.client.unpacker.unpack_i32()?;
		let link_id:i32       = self.client.unpacker.unpack_i32()?;
		let abort_port:u32    = self.client.unpacker.unpack_u32()?;
		let max_recv_size:u32 = self.client.unpacker.unpack_u32()?;

		device_error(error)?;

		let link = Link{ link_id, abort_port, max_recv_size };
		debug!("Created link {} to {} (max_recv_size={})", link_id, device, max_recv_size);
		self.opt_link = Some(link);
		Ok(link)
	}

	pub fn ask(&mut self, data:&[u8]) -> io::Result<Vec<u8>> {
		self.write(data)?;
		self.read()
	}

	/// Write a whole message, split into pieces no bigger than the device will accept.  Only the last piece
	/// carries the END flag.
	pub fn write(&mut self, data:&[u8]) -> io::Result<()> {
		let link = self.get_link()?;
		let chunk_len:usize = if link.max_recv_size == 0 { data.len().max(1) } else { link.max_recv_size as usize };

		let mut chunks = data.chunks(chunk_len).peekable();
		if chunks.peek().is_none() {
			return self.write_chunk(link.link_id, &[], true);
		}
		while let Some(chunk) = chunks.next() {
			let last = chunks.peek().is_none();
			self.write_chunk(link.link_id, chunk, last)?;
		}
		Ok(())
	}

	fn write_chunk(&mut self, link_id:i32, chunk:&[u8], last:bool) -> io::Result<()> {
		let flags:i32 = if last { FLAG_END } else { 0 };

		self.client.start_call(DEVICE_WRITE)?;
		xdr_pack::pack_device_write_parms(&mut self.client.packer, link_id, self.io_timeout_ms, self.lock_timeout_ms, flags, chunk)?;
		self.client.do_call()?;

		let error:i32 = self.client.unpacker.unpack_i32()?;
		let size:u32  = self.client.unpacker.unpack_u32()?;

		device_error(error)?;

		if size as usize != chunk.len() {
			return Err(err("Number of bytes in confirmation doesn't match number of bytes sent"));
		}
		Ok(())
	}

	/// Read one complete response, issuing further reads while the device only reports that our request
	/// count was reached
	pub fn read(&mut self) -> io::Result<Vec<u8>> {
		let link = self.get_link()?;
		let mut ans:Vec<u8> = vec![];

		loop {
			self.client.start_call(DEVICE_READ)?;
			xdr_pack::pack_device_read_parms(&mut self.client.packer, link.link_id, u32::MAX, self.io_timeout_ms, self.lock_timeout_ms, 0, 0)?;
			self.client.do_call()?;

			let error:i32    = self.client.unpacker.unpack_i32()?;
			let reason:i32   = self.client.unpacker.unpack_i32()?;
			let data:Vec<u8> = self.client.unpacker.unpack_variable_len_opaque()?;

			device_error(error)?;
			ans.extend_from_slice(&data);

			if reason & (REASON_END | REASON_CHR) != 0 {
				return Ok(ans);
			} else if reason & REASON_REQCNT == 0 {
				return Err(err("Expected one of three reason bits to be set"));
			}
		}
	}

	pub fn read_stb(&mut self) -> io::Result<u8> {
		let link = self.get_link()?;
		self.generic_call(DEVICE_READSTB, link.link_id)?;

		let error:i32 = self.client.unpacker.unpack_i32()?;
		let stb:u32   = self.client.unpacker.unpack_u32()?;
		device_error(error)?;
		Ok((stb & 0xff) as u8)
	}

	/// Group execute trigger (GPIB GET) for this link
	pub fn trigger(&mut self) -> io::Result<()> {
		let link = self.get_link()?;
		self.generic_call(DEVICE_TRIGGER, link.link_id)?;
		device_error(self.client.unpacker.unpack_i32()?)
	}

	/// Selected device clear (GPIB SDC)
	pub fn clear(&mut self) -> io::Result<()> {
		let link = self.get_link()?;
		self.generic_call(DEVICE_CLEAR, link.link_id)?;
		device_error(self.client.unpacker.unpack_i32()?)
	}

	fn generic_call(&mut self, prc:u32, link_id:i32) -> io::Result<()> {
		self.client.start_call(prc)?;
		xdr_pack::pack_device_generic_parms(&mut self.client.packer, link_id, 0, self.lock_timeout_ms, self.io_timeout_ms)?;
		self.client.do_call()
	}

	pub fn destroy_link(&mut self) -> io::Result<()> {
		let link = self.get_link()?;

		self.client.start_call(DESTROY_LINK)?;
		xdr_pack::pack_device_link(&mut self.client.packer, link.link_id)?;
		self.client.do_call()?;

		// The link is gone from our side whatever the device says
		self.opt_link = None;
		device_error(self.client.unpacker.unpack_i32()?)
	}

}

impl Drop for CoreClient {

	fn drop(&mut self) {
		if self.opt_link.is_some() {
			if let Err(e) = self.destroy_link() {
				warn!("Unable to destroy VXI-11 link: {}", e);
			}
		}
	}

}
