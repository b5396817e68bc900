
use std::io;

use crate::xdr::Packer;
use crate::rpc::{CALL, RPCVERSION, REPLY, MSG_ACCEPTED, SUCCESS};

pub const AUTH_NONE:i32 = 0;

pub fn pack_auth(packer:&mut Packer, flavor:i32, stuff:&[u8]) -> io::Result<()> {
	packer.pack_enum(flavor)?;
	packer.pack_variable_len_opaque(stuff)
}

pub fn pack_callheader(packer:&mut Packer, xid:u32, prog:u32, vers:u32, prc:u32, cred:(i32, &[u8]), verf:(i32, &[u8])) -> io::Result<()> {
	packer.pack_u32(xid)?;
	packer.pack_enum(CALL)?;
	packer.pack_u32(RPCVERSION)?;
	packer.pack_u32(prog)?;
	packer.pack_u32(vers)?;
	packer.pack_u32(prc)?;
	pack_auth(packer, cred.0, cred.1)?;
	pack_auth(packer, verf.0, verf.1)
}

pub fn pack_callheader_no_auth(packer:&mut Packer, xid:u32, prog:u32, vers:u32, prc:u32) -> io::Result<()> {
	pack_callheader(packer, xid, prog, vers, prc, (AUTH_NONE, &[]), (AUTH_NONE, &[]))
}

// Only needed when acting as the server side, which in this crate means the loopback instrument used in tests
pub fn pack_replyheader(packer:&mut Packer, xid:u32, verf:(i32, &[u8])) -> io::Result<()> {
	packer.pack_u32(xid)?;
	packer.pack_enum(REPLY)?;
	packer.pack_i32(MSG_ACCEPTED)?;
	pack_auth(packer, verf.0, verf.1)?;
	packer.pack_enum(SUCCESS)
}

pub fn pack_mapping(packer:&mut Packer, prog:u32, vers:u32, prot:u32, port:u32) -> io::Result<()> {
	packer.pack_u32(prog)?;
	packer.pack_u32(vers)?;
	packer.pack_u32(prot)?;
	packer.pack_u32(port)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn call_header_layout() {
		let mut packer = Packer::new();
		pack_callheader_no_auth(&mut packer, 0x1234, 0x0607AF, 1, 10).unwrap();
		let b = packer.as_bytes();

		// xid, CALL, version 2, prog, vers, proc, then two empty AUTH_NONE blocks
		assert_eq!(b.len(), 40);
		assert_eq!(&b[0..4], &[0, 0, 0x12, 0x34]);
		assert_eq!(&b[4..8], &[0, 0, 0, 0]);
		assert_eq!(&b[8..12], &[0, 0, 0, 2]);
		assert_eq!(&b[12..16], &[0, 0x06, 0x07, 0xAF]);
		assert!(b[24..].iter().all(|&x| x == 0));
	}
}
