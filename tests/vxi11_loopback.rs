
// A VXI-11 core channel served from a thread on localhost, standing in for a LAN/GPIB gateway with an
// electrometer behind it.  Exercises the whole stack from XDR up through the instrument drivers.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use labsweep::devices::keithley6517b::Keithley6517b;
use labsweep::instrument::{Instrument, Vxi11Instrument};
use labsweep::rpc::record::{read_record, write_record};
use labsweep::rpc::xdr_pack::pack_replyheader;
use labsweep::rpc::xdr_unpack::unpack_callheader;
use labsweep::vxi11::{self, xdr_pack::*, CoreClient};
use labsweep::xdr::{Packer, Unpacker};

const LINK_ID:i32 = 7;
const MAX_RECV_SIZE:u32 = 16;

#[derive(Default)]
struct Gateway {
	device: Option<String>,
	commands: Vec<String>,
	cleared: bool,
	destroyed: bool,
}

// Answer for the most recent query, split into pieces to make the client issue more than one read
fn answer(cmd:&str) -> Vec<u8> {
	match cmd {
		"*IDN?" => b"KEITHLEY INSTRUMENTS INC.,MODEL 6517B,4096453,A13/700x\n".to_vec(),
		":FETC?" => b"+1.234567E-09NADC,+000012.345secs,+010.000E+00Vsrc\n".to_vec(),
		_ => b"0\n".to_vec(),
	}
}

fn serve(mut stream:TcpStream, state:Arc<Mutex<Gateway>>) -> io::Result<()> {
	let mut unpacker = Unpacker::new();
	let mut packer = Packer::new();
	let mut incoming:Vec<u8> = vec![];
	let mut pending:Vec<u8> = vec![];

	loop {
		let msg = match read_record(&mut stream) {
			Ok(msg) => msg,
			Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
			Err(e) => return Err(e),
		};
		unpacker.reset(&msg);
		let call = unpack_callheader(&mut unpacker)?;
		assert_eq!(call.prog, vxi11::DEVICE_CORE_PROG);

		packer.reset();
		pack_replyheader(&mut packer, call.xid, (0, &[]))?;
		let mut st = state.lock().unwrap();

		match call.prc {
			vxi11::CREATE_LINK => {
				let _client_id = unpacker.unpack_i32()?;
				let _lock = unpacker.unpack_bool()?;
				let _lock_timeout = unpacker.unpack_u32()?;
				let device = unpacker.unpack_variable_len_opaque()?;
				st.device = Some(String::from_utf8_lossy(&device).into_owned());
				pack_create_link_resp(&mut packer, 0, LINK_ID, 0, MAX_RECV_SIZE)?;
			},
			vxi11::DEVICE_WRITE => {
				assert_eq!(unpacker.unpack_i32()?, LINK_ID);
				let _io_timeout = unpacker.unpack_u32()?;
				let _lock_timeout = unpacker.unpack_u32()?;
				let flags = unpacker.unpack_i32()?;
				let data = unpacker.unpack_variable_len_opaque()?;
				assert!(data.len() <= MAX_RECV_SIZE as usize);
				incoming.extend_from_slice(&data);
				if flags & vxi11::FLAG_END != 0 {
					let cmd = String::from_utf8_lossy(&incoming).into_owned();
					incoming.clear();
					if cmd.ends_with('?') {
						pending = answer(&cmd);
					}
					st.commands.push(cmd);
				}
				pack_device_write_resp(&mut packer, 0, data.len() as u32)?;
			},
			vxi11::DEVICE_READ => {
				assert_eq!(unpacker.unpack_i32()?, LINK_ID);
				if pending.is_empty() {
					pack_device_read_resp(&mut packer, 15, 0, &[])?;
				} else {
					let n = pending.len().min(20);
					let chunk:Vec<u8> = pending.drain(..n).collect();
					let reason = if pending.is_empty() { vxi11::REASON_END } else { vxi11::REASON_REQCNT };
					pack_device_read_resp(&mut packer, 0, reason, &chunk)?;
				}
			},
			vxi11::DEVICE_CLEAR => {
				assert_eq!(unpacker.unpack_i32()?, LINK_ID);
				pending.clear();
				st.cleared = true;
				pack_device_error(&mut packer, 0)?;
			},
			vxi11::DESTROY_LINK => {
				assert_eq!(unpacker.unpack_i32()?, LINK_ID);
				st.destroyed = true;
				pack_device_error(&mut packer, 0)?;
			},
			_ => pack_device_error(&mut packer, 8)?,
		}
		drop(st);
		write_record(&mut stream, packer.as_bytes())?;
	}
}

fn start_gateway() -> (u16, Arc<Mutex<Gateway>>, JoinHandle<io::Result<()>>) {
	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let port = listener.local_addr().unwrap().port();
	let state = Arc::new(Mutex::new(Gateway::default()));
	let server_state = state.clone();
	let handle = thread::spawn(move || {
		let (stream, _) = listener.accept()?;
		serve(stream, server_state)
	});
	(port, state, handle)
}

fn open(port:u16, device:&str) -> Vxi11Instrument {
	let mut core = CoreClient::connect("127.0.0.1", port).unwrap();
	core.create_link(device).unwrap();
	Vxi11Instrument::from_core(core, device).unwrap()
}

#[test]
fn query_through_gateway() {
	let (port, state, handle) = start_gateway();
	{
		let mut inst = open(port, "gpib0,27");
		let idn = inst.identify().unwrap();
		assert_eq!(idn.model, "MODEL 6517B");

		// Longer than one device write, so it goes out in pieces
		inst.write(":SOUR:VOLT:LIM 1000;:SOUR:VOLT:RANG 1000").unwrap();
		inst.device_clear().unwrap();

		let link = inst.timeout();
		assert_eq!(link, Duration::from_millis(vxi11::DEFAULT_IO_TIMEOUT_MS as u64));
	}
	handle.join().unwrap().unwrap();

	let st = state.lock().unwrap();
	assert_eq!(st.device.as_deref(), Some("gpib0,27"));
	assert_eq!(st.commands, vec!["*IDN?", ":SOUR:VOLT:LIM 1000;:SOUR:VOLT:RANG 1000"]);
	assert!(st.cleared);
	assert!(st.destroyed);
}

#[test]
fn electrometer_fetch_over_vxi11() {
	let (port, state, handle) = start_gateway();
	{
		let mut k = Keithley6517b::connect(open(port, "gpib0,27")).unwrap();
		let reading = k.fetch().unwrap();
		assert_eq!(reading.len(), 3);
		assert!((reading[0] - 1.234567e-9).abs() < 1e-15);
		assert_eq!(reading[1], 12.345);
		assert_eq!(reading[2], 10.0);
	}
	handle.join().unwrap().unwrap();
	assert!(state.lock().unwrap().destroyed);
}

#[test]
fn read_with_nothing_to_say_times_out() {
	let (port, _state, handle) = start_gateway();
	{
		let mut inst = open(port, "inst0");
		let e = inst.read().unwrap_err();
		match e {
			labsweep::Error::Io(io) => assert_eq!(io.kind(), io::ErrorKind::TimedOut),
			other => panic!("Expected a timeout, got {:?}", other),
		}
	}
	handle.join().unwrap().unwrap();
}
