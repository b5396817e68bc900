
use std::io::{self, Error, ErrorKind, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{LAST_FRAGMENT, MAX_FRAGMENT_LEN};

// Replies bigger than this are almost certainly a desynchronized stream rather than real data.  A full 6517 buffer
// in ASCII is well under a megabyte.
const MAX_RECORD_LEN:usize = 64 * 1024 * 1024;

/// Send one RPC message as a single record-marked fragment
pub fn write_record<W: Write>(w:&mut W, msg:&[u8]) -> io::Result<()> {
	if msg.len() > MAX_FRAGMENT_LEN as usize {
		return Err(Error::new(ErrorKind::InvalidInput, "RPC message too long for a single fragment"));
	}

	let mut send_bytes:Vec<u8> = Vec::with_capacity(msg.len() + 4);
	send_bytes.write_u32::<BigEndian>(msg.len() as u32 | LAST_FRAGMENT)?;
	send_bytes.extend_from_slice(msg);
	w.write_all(&send_bytes)?;
	w.flush()
}

/// Read fragments until the one flagged as last and return the reassembled message
pub fn read_record<R: Read>(r:&mut R) -> io::Result<Vec<u8>> {
	let mut record:Vec<u8> = vec![];

	loop {
		let header:u32 = r.read_u32::<BigEndian>()?;
		let last:bool  = (header & LAST_FRAGMENT) != 0;
		let n:usize    = (header & MAX_FRAGMENT_LEN) as usize;

		if record.len() + n > MAX_RECORD_LEN {
			return Err(Error::new(ErrorKind::InvalidData, "RPC record exceeds the maximum accepted length"));
		}

		let start = record.len();
		record.resize(start + n, 0);
		r.read_exact(&mut record[start..])?;

		if last { return Ok(record); }
	}
}
