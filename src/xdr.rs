
use std::io::{self, Cursor, Error, ErrorKind};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

fn err(msg:&str) -> io::Error { Error::new(ErrorKind::InvalidData, msg) }

fn padding(n:usize) -> usize { (4 - n % 4) % 4 }

#[derive(Default)]
pub struct Packer {
	buff:Vec<u8>
}

/// Reads XDR items off the front of a reply.  Consumed bytes are tracked by position
/// rather than removed, so unpacking a large device read doesn't shuffle the buffer.
#[derive(Default)]
pub struct Unpacker {
	buff:Vec<u8>,
	pos:usize,
}

impl Packer {

	pub fn new() -> Self { Self::default() }

	pub fn reset(&mut self) { self.buff.clear(); }

	pub fn as_bytes(&self) -> &[u8] { &self.buff }

	// Packing methods that can only add multiples of four bytes, so if we started off with the correct
	// padding, we'll end up with the correct padding
	pub fn pack_u32(&mut self, x:u32) -> io::Result<()> { self.buff.write_u32::<BigEndian>(x) }
	pub fn pack_i32(&mut self, x:i32) -> io::Result<()> { self.buff.write_i32::<BigEndian>(x) }
	pub fn pack_bool(&mut self, b:bool) -> io::Result<()> { self.pack_i32(if b { 1 } else { 0 }) }
	pub fn pack_enum(&mut self, x:i32) -> io::Result<()> { self.pack_i32(x) }

	pub fn pack_variable_len_opaque(&mut self, data:&[u8]) -> io::Result<()> {
		if data.len() > u32::MAX as usize {
			return Err(err("Opaque data too long for XDR length prefix"));
		}
		self.pack_u32(data.len() as u32)?;
		self.buff.extend_from_slice(data);
		self.buff.extend(std::iter::repeat(0u8).take(padding(data.len())));
		Ok(())
	}

	pub fn pack_string(&mut self, s:&str) -> io::Result<()> {
		if !s.is_ascii() {
			return Err(Error::new(ErrorKind::InvalidInput, "XDR strings sent to instruments must be ASCII"));
		}
		self.pack_variable_len_opaque(s.as_bytes())
	}

}

impl Unpacker {

	pub fn new() -> Self { Self::default() }

	pub fn reset(&mut self, data:&[u8]) {
		self.buff.clear();
		self.buff.extend_from_slice(data);
		self.pos = 0;
	}

	pub fn remaining(&self) -> usize { self.buff.len() - self.pos }
	pub fn all_data_consumed(&self) -> bool { self.remaining() == 0 }

	fn skip(&mut self, n:usize) -> io::Result<()> {
		if n > self.remaining() {
			return Err(err("Tried to read past the end of the XDR buffer"));
		}
		self.pos += n;
		Ok(())
	}

	pub fn unpack_u32(&mut self) -> io::Result<u32> {
		let ans:u32 = Cursor::new(&self.buff[self.pos..]).read_u32::<BigEndian>()
			.map_err(|_| err("Tried to read past the end of the XDR buffer"))?;
		self.skip(4)?;
		Ok(ans)
	}

	pub fn unpack_i32(&mut self) -> io::Result<i32> {
		let ans:i32 = Cursor::new(&self.buff[self.pos..]).read_i32::<BigEndian>()
			.map_err(|_| err("Tried to read past the end of the XDR buffer"))?;
		self.skip(4)?;
		Ok(ans)
	}

	// An enum is just an i32 with a restricted set of values.  We can't check that this value is in the restricted set at this
	// level because it depends on the application, so for our purposes here, an enum is the same as an i32
	pub fn unpack_enum(&mut self) -> io::Result<i32> { self.unpack_i32() }

	pub fn unpack_bool(&mut self) -> io::Result<bool> {
		match self.unpack_i32()? {
			0 => Ok(false),
			1 => Ok(true),
			_ => Err(err("Expected 0 or 1 for an XDR bool")),
		}
	}

	pub fn unpack_variable_len_opaque(&mut self) -> io::Result<Vec<u8>> {
		let n:usize = self.unpack_u32()? as usize;
		if n > self.remaining() {
			return Err(err("Opaque length runs past the end of the XDR buffer"));
		}
		let ans:Vec<u8> = self.buff[self.pos..self.pos + n].to_vec();
		self.skip(n)?;

		// Padding may be missing on the final item from some servers, so don't insist on it
		let pad = padding(n).min(self.remaining());
		self.skip(pad)?;
		Ok(ans)
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn opaque_is_padded_to_four_bytes() {
		let mut p = Packer::new();
		p.pack_variable_len_opaque(b"gpib0,27").unwrap();
		p.pack_variable_len_opaque(b"*IDN?").unwrap();
		assert_eq!(p.as_bytes().len(), 4 + 8 + 4 + 8);
		assert_eq!(&p.as_bytes()[16..21], b"*IDN?");
		assert_eq!(&p.as_bytes()[21..], &[0, 0, 0]);

		let mut u = Unpacker::new();
		u.reset(p.as_bytes());
		assert_eq!(u.unpack_variable_len_opaque().unwrap(), b"gpib0,27");
		assert_eq!(u.unpack_variable_len_opaque().unwrap(), b"*IDN?");
		assert!(u.all_data_consumed());
	}

	#[test]
	fn bad_bool_is_an_error_not_a_panic() {
		let mut p = Packer::new();
		p.pack_i32(7).unwrap();
		let mut u = Unpacker::new();
		u.reset(p.as_bytes());
		assert!(u.unpack_bool().is_err());
	}

	#[test]
	fn short_buffer_is_an_error() {
		let mut u = Unpacker::new();
		u.reset(&[0, 0, 0]);
		assert!(u.unpack_u32().is_err());

		// Length prefix claims more data than is present
		u.reset(&[0, 0, 0, 9, 1, 2]);
		assert!(u.unpack_variable_len_opaque().is_err());
	}

	#[test]
	fn non_ascii_strings_are_rejected() {
		let mut p = Packer::new();
		assert!(p.pack_string("inst0").is_ok());
		assert!(p.pack_string("µA").is_err());
	}
}
