
use std::io::{self, Error, ErrorKind};

use crate::xdr::Unpacker;
use crate::rpc::{CALL, REPLY, RPCVERSION, MSG_DENIED, RPC_MISMATCH, AUTH_ERROR, MSG_ACCEPTED, PROG_UNAVAIL, PROG_MISMATCH, PROC_UNAVAIL, GARBAGE_ARGS, SUCCESS};

fn err(msg:&str) -> io::Error { Error::new(ErrorKind::Other, msg) }

pub fn unpack_auth(unpacker:&mut Unpacker) -> io::Result<(i32, Vec<u8>)> {
	let flavor:i32    = unpacker.unpack_enum()?;
	let stuff:Vec<u8> = unpacker.unpack_variable_len_opaque()?;
	Ok((flavor, stuff))
}

#[derive(Debug, PartialEq)]
pub struct CallHeader {
	pub xid: u32,
	pub prog: u32,
	pub vers: u32,
	pub prc: u32,
}

/// Server-side counterpart of `pack_callheader`.  Credentials and verifier are read and discarded.
pub fn unpack_callheader(unpacker:&mut Unpacker) -> io::Result<CallHeader> {
	let xid:u32 = unpacker.unpack_u32()?;
	if unpacker.unpack_enum()? != CALL { return Err(err("Expected CALL message type in unpack_callheader")); }
	if unpacker.unpack_u32()? != RPCVERSION { return Err(err("Unsupported RPC version in unpack_callheader")); }

	let prog:u32 = unpacker.unpack_u32()?;
	let vers:u32 = unpacker.unpack_u32()?;
	let prc:u32  = unpacker.unpack_u32()?;
	unpack_auth(unpacker)?;
	unpack_auth(unpacker)?;

	Ok(CallHeader{ xid, prog, vers, prc })
}

pub fn unpack_replyheader(unpacker:&mut Unpacker) -> io::Result<(u32, (i32, Vec<u8>))> {
	let xid:u32 = unpacker.unpack_u32()?;

	let mtype:i32 = unpacker.unpack_enum()?;
	if mtype != REPLY { return Err(err("Expected REPLY message type in unpack_replyheader")); }

	match unpacker.unpack_enum()? {
		MSG_DENIED => {
			match unpacker.unpack_enum()? {
				RPC_MISMATCH => {
					let low:u32  = unpacker.unpack_u32()?;
					let high:u32 = unpacker.unpack_u32()?;
					return Err(Error::new(ErrorKind::Other, format!("Message denied due to RPC_MISMATCH (server supports {}..{})", low, high)))
				},
				AUTH_ERROR => {
					let stat:u32 = unpacker.unpack_u32()?;
					return Err(Error::new(ErrorKind::PermissionDenied, format!("Message denied due to AUTH_ERROR ({})", stat)))
				},
				_ => return Err(err("Message denied for an unknown reason in unpack_replyheader")),
			}
		},
		MSG_ACCEPTED => { },
		_ => return Err(err("Neither MSG_DENIED nor MSG_ACCEPTED in unpack_replyheader")),
	}

	let verf = unpack_auth(unpacker)?;

	match unpacker.unpack_enum()? {
		SUCCESS => { },
		PROG_UNAVAIL  => return Err(err("Program unavailable in unpack_replyheader")),
		PROG_MISMATCH => {
			unpacker.unpack_u32()?;	// lowest version supported
			unpacker.unpack_u32()?;	// highest version supported
			return Err(err("Program mismatch in unpack_replyheader"))
		},
		PROC_UNAVAIL  => return Err(err("Procedure unavailable in unpack_replyheader")),
		GARBAGE_ARGS  => return Err(err("Garbage args in unpack_replyheader")),
		_ => return Err(err("Call failed for unknown reason in unpack_replyheader")),
	}

	Ok((xid, verf))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::xdr::Packer;
	use crate::rpc::xdr_pack::{pack_callheader_no_auth, pack_replyheader};

	#[test]
	fn call_header_round_trip() {
		let mut p = Packer::new();
		pack_callheader_no_auth(&mut p, 42, 0x0607af, 1, 11).unwrap();
		let mut u = Unpacker::new();
		u.reset(p.as_bytes());
		assert_eq!(unpack_callheader(&mut u).unwrap(), CallHeader{ xid: 42, prog: 0x0607af, vers: 1, prc: 11 });
		assert!(u.all_data_consumed());
	}

	#[test]
	fn accepted_reply_yields_xid() {
		let mut p = Packer::new();
		pack_replyheader(&mut p, 7, (0, &[])).unwrap();
		let mut u = Unpacker::new();
		u.reset(p.as_bytes());
		let (xid, _) = unpack_replyheader(&mut u).unwrap();
		assert_eq!(xid, 7);
	}

	#[test]
	fn proc_unavailable_is_reported() {
		let mut p = Packer::new();
		p.pack_u32(3).unwrap();
		p.pack_enum(REPLY).unwrap();
		p.pack_enum(MSG_ACCEPTED).unwrap();
		p.pack_enum(0).unwrap();
		p.pack_variable_len_opaque(&[]).unwrap();
		p.pack_enum(PROC_UNAVAIL).unwrap();

		let mut u = Unpacker::new();
		u.reset(p.as_bytes());
		let e = unpack_replyheader(&mut u).unwrap_err();
		assert!(e.to_string().contains("Procedure unavailable"));
	}
}
