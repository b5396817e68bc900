
use std::fs;

use std::path::Path;

use labsweep::export::{self, Column, PlotSpec, Settings};
use labsweep::table::{Element, ElementSchema, Table};

fn sweep_table() -> Table {
	let schema = ElementSchema::parse("READ,TST,VSO").unwrap();
	let flat = vec![
		1.0e-9, 0.00, 0.0,
		2.0e-9, 0.10, 5.0,
		3.0e-9, 0.20, 10.0,
		2.0e-9, 0.30, 5.0,
		f64::NAN, 0.40, 0.0,
	];
	Table::reshape(flat, &schema).unwrap()
}

#[test]
fn workbook_lands_in_new_directory() {
	let tmp = tempfile::tempdir().unwrap();
	let dir = export::ensure_dir(tmp.path().join("results").join("tid7")).unwrap();
	assert!(dir.is_dir());

	let mut settings = Settings::new();
	settings.insert("save_id", "1").unwrap();
	settings.insert("nplc", 1.0).unwrap();

	let path = dir.join("1_data.xlsx");
	export::write_workbook(&path, &sweep_table(), Some(&["I", "t", "V"]), Some(&settings)).unwrap();
	let meta = fs::metadata(&path).unwrap();
	assert!(meta.len() > 0);

	// Creating an existing directory is fine
	assert_eq!(export::ensure_dir(&dir).unwrap(), dir);
}

#[test]
fn workbook_rejects_wrong_number_of_names() {
	let tmp = tempfile::tempdir().unwrap();
	let e = export::write_workbook(tmp.path().join("x.xlsx"), &sweep_table(), Some(&["I", "t"]), None).unwrap_err();
	assert!(matches!(e, labsweep::Error::Shape{ expected: 3, actual: 2 }));
	assert!(!tmp.path().join("x.xlsx").exists());
}

#[test]
fn ragged_columns_are_written() {
	let tmp = tempfile::tempdir().unwrap();
	let columns = [
		Column::new("READ", vec![0.1, 0.2, 0.3]),
		Column::new("MEAS_ZCOR", vec![9.5]),
	];
	export::write_columns(tmp.path().join("2_data.xlsx"), &columns, None).unwrap();
	assert!(tmp.path().join("2_data.xlsx").is_file());
}

#[test]
fn save_ids_count_up_from_existing_files() {
	let tmp = tempfile::tempdir().unwrap();
	assert_eq!(export::next_save_id(tmp.path().join("missing")).unwrap(), 1);
	assert_eq!(export::next_save_id(tmp.path()).unwrap(), 1);

	for name in ["3_data.xlsx", "12_settings.json", "notes.txt", "x7_data.xlsx"].iter() {
		fs::write(tmp.path().join(name), b"").unwrap();
	}
	assert_eq!(export::next_save_id(tmp.path()).unwrap(), 13);
}

#[test]
fn settings_json_is_ordered() {
	#[derive(serde::Serialize)]
	struct Sweep { start: f64, stop: f64 }

	let mut s = Settings::new();
	s.insert("save_id", "5").unwrap();
	s.extend("sweep", Sweep{ start: 0.0, stop: 20.0 }).unwrap();
	s.insert("threshold", Option::<f64>::None).unwrap();

	let json = s.to_json_pretty().unwrap();
	let save = json.find("save_id").unwrap();
	let start = json.find("sweep_start").unwrap();
	let stop = json.find("sweep_stop").unwrap();
	assert!(save < start && start < stop);
	assert_eq!(s.len(), 4);
}

// Two mirrored cycles of a 1 GOhm sweep, 0.1 s apart
fn two_cycle_table() -> Table {
	let schema = ElementSchema::parse("READ,TST,VSO").unwrap();
	let volts = [0.0, 5.0, 10.0, 5.0, 0.0, 0.0, 5.0, 10.0, 5.0, 0.0];
	let rows:Vec<Vec<f64>> = volts.iter().enumerate()
		.map(|(n, v)| vec![v * 1e-9, n as f64 * 0.1, *v])
		.collect();
	Table::from_rows(&rows, &schema).unwrap()
}

// Text needs a system font; a headless machine without any can't draw titles or axis labels
fn rendered(result:labsweep::Result<()>, path:&Path) -> bool {
	match result {
		Err(labsweep::Error::Plot(msg)) if msg.to_lowercase().contains("font") => {
			eprintln!("Skipping {}: {}", path.display(), msg);
			false
		},
		other => {
			other.unwrap();
			assert!(fs::metadata(path).unwrap().len() > 0);
			true
		},
	}
}

#[test]
fn sweep_figures_are_written() {
	let tmp = tempfile::tempdir().unwrap();
	let table = two_cycle_table();
	let stats = table.sampling_stats(Element::Timestamp).unwrap();
	let title = export::sampled_title("7", &stats);
	assert_eq!(title, "7, smpl rate: 90.0 ms");

	let spec = PlotSpec{ threshold: Some(8e-9), ..PlotSpec::new(&title, Element::Timestamp, Element::VoltageSource, Element::Reading) };
	let sweep_png = tmp.path().join("7.png");
	if !rendered(export::plot_sweep(&sweep_png, &table, &spec), &sweep_png) {
		return;
	}

	let cycles_png = tmp.path().join("7_cycles.png");
	rendered(export::plot_cycle_ranges(&cycles_png, &table, &[0..5, 5..10], &spec), &cycles_png);

	let passes_png = tmp.path().join("7_passes.png");
	rendered(export::plot_cycles(&passes_png, &table, 5, &spec), &passes_png);
}

#[test]
fn empty_table_is_not_plotted() {
	let tmp = tempfile::tempdir().unwrap();
	let schema = ElementSchema::parse("READ,TST,VSO").unwrap();
	let empty = Table::reshape(vec![], &schema).unwrap();
	let spec = PlotSpec::new("empty", Element::Timestamp, Element::VoltageSource, Element::Reading);
	assert!(export::plot_sweep(tmp.path().join("e.png"), &empty, &spec).is_err());
	assert!(!tmp.path().join("e.png").exists());
}
