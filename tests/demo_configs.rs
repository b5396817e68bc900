
use std::path::Path;

use labsweep::config::RunConfig;
use labsweep::devices::agilent33210a::Load;

fn load(name:&str) -> RunConfig {
	let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos").join(name);
	RunConfig::from_file(&path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}

#[test]
fn iv_sweep_demo() {
	let cfg = load("iv_sweep.toml");
	assert_eq!(cfg.sweep.setpoints().unwrap().len(), 41);
	assert_eq!(cfg.instrument.gateways().host(0), Some("192.168.1.50"));
	assert_eq!(cfg.threshold, Some(500e-9));
}

#[test]
fn smu_sweep_demo() {
	let cfg = load("smu_sweep.toml");
	let profile = cfg.sweep.profile_sweep().unwrap().unwrap();
	assert_eq!(profile.setpoints.len(), 41);
	assert_eq!(profile.nplc, 1.0);
}

#[test]
fn test_sequence_demo() {
	let cfg = load("test_sequence.toml");
	assert_eq!(cfg.sequence.unwrap().expected_readings().unwrap(), 5);
}

#[test]
fn awg_monitor_demo() {
	let cfg = load("awg_monitor.toml");
	let s = cfg.awg.as_ref().unwrap().settings().unwrap();
	assert_eq!(s.vpp, 2.0);
	assert_eq!(s.load, Load::HighZ);
	assert_eq!(cfg.monitor.unwrap().samples, 3000);
}
