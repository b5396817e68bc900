//! Results on disk: Excel workbooks, PNG figures and the settings that produced them.

use std::error::Error as StdError;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::{debug, info};
use plotters::prelude::*;
use regex::Regex;
use rust_xlsxwriter::{Workbook, Worksheet};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::error::{validation, Error, Result};
use crate::table::{Element, Polarity, SamplingStats, Table};

lazy_static! {
	static ref SAVE_ID_RE: Regex = Regex::new(r"^(\d+)_").unwrap();
}

pub const DATA_SHEET:&str = "data";
pub const SETTINGS_SHEET:&str = "settings";

/// 6.4 x 4.8 inches at 300 DPI
pub const FIGURE_SIZE:(u32, u32) = (1920, 1440);

/// Named run parameters, kept in the order they were added
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
	entries: Vec<(String, Value)>,
}

impl Settings {

	pub fn new() -> Self { Self::default() }

	/// Add or replace a value.  A replaced key keeps its original position.
	pub fn insert<V: Serialize>(&mut self, key:&str, value:V) -> Result<()> {
		let value = serde_json::to_value(value)?;
		match self.entries.iter_mut().find(|(k, _)| k == key) {
			Some(entry) => entry.1 = value,
			None => self.entries.push((key.to_owned(), value)),
		}
		Ok(())
	}

	/// Add every field of `value`, nested fields joined with `_` under `prefix`
	pub fn extend<V: Serialize>(&mut self, prefix:&str, value:V) -> Result<()> {
		let value = serde_json::to_value(value)?;
		let mut flat = vec![];
		flatten(prefix, value, &mut flat);
		for (k, v) in flat {
			self.insert(&k, v)?;
		}
		Ok(())
	}

	pub fn get(&self, key:&str) -> Option<&Value> {
		self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v))
	}

	pub fn len(&self) -> usize { self.entries.len() }

	pub fn is_empty(&self) -> bool { self.entries.is_empty() }

	pub fn to_json_pretty(&self) -> Result<String> { Ok(serde_json::to_string_pretty(self)?) }

}

impl Serialize for Settings {
	fn serialize<S: Serializer>(&self, serializer:S) -> std::result::Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(self.entries.len()))?;
		for (k, v) in self.entries.iter() {
			map.serialize_entry(k, v)?;
		}
		map.end()
	}
}

fn flatten(prefix:&str, value:Value, out:&mut Vec<(String, Value)>) {
	match value {
		Value::Object(map) => {
			for (k, v) in map {
				let key = if prefix.is_empty() { k } else { format!("{}_{}", prefix, k) };
				flatten(&key, v, out);
			}
		},
		Value::Null => {},
		other => out.push((prefix.to_owned(), other)),
	}
}

/// Create `dir` and its parents if it isn't there yet
pub fn ensure_dir<P: AsRef<Path>>(dir:P) -> Result<PathBuf> {
	let dir = dir.as_ref();
	if !dir.is_dir() {
		info!("Creating {}", dir.display());
		fs::create_dir_all(dir)?;
	}
	Ok(dir.to_path_buf())
}

/// One more than the largest numeric save id prefixing a file name in `dir` (`12_data.xlsx` has id 12)
pub fn next_save_id<P: AsRef<Path>>(dir:P) -> Result<u32> {
	let dir = dir.as_ref();
	if !dir.is_dir() {
		return Ok(1);
	}
	let mut max = 0;
	for entry in fs::read_dir(dir)? {
		let name = entry?.file_name();
		if let Some(cap) = name.to_str().and_then(|s| SAVE_ID_RE.captures(s)) {
			if let Ok(id) = cap[1].parse::<u32>() {
				max = max.max(id);
			}
		}
	}
	Ok(max + 1)
}

/// A named column of values for the data sheet
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
	pub name: String,
	pub values: Vec<f64>,
}

impl Column {
	pub fn new(name:&str, values:Vec<f64>) -> Self { Self{ name: name.to_owned(), values } }
}

/// Every column of `table`, headed by `names` when given or by the element labels otherwise
pub fn table_columns(table:&Table, names:Option<&[&str]>) -> Result<Vec<Column>> {
	let elements = table.schema().columns();
	if let Some(names) = names {
		if names.len() != elements.len() {
			return Err(Error::Shape{ expected: elements.len(), actual: names.len() });
		}
	}
	elements.iter().enumerate().map(|(i, e)| {
		let name = names.map(|n| n[i]).unwrap_or_else(|| e.label());
		Ok(Column::new(name, table.column(*e)?))
	}).collect()
}

/// Workbook with the table on the "data" sheet and, when given, the settings on a "settings" sheet
pub fn write_workbook<P: AsRef<Path>>(path:P, table:&Table, column_names:Option<&[&str]>, settings:Option<&Settings>) -> Result<()> {
	let columns = table_columns(table, column_names)?;
	write_columns(path, &columns, settings)
}

pub fn write_columns<P: AsRef<Path>>(path:P, columns:&[Column], settings:Option<&Settings>) -> Result<()> {
	let path = path.as_ref();
	if columns.len() > u16::MAX as usize {
		return Err(validation("Too many columns for a worksheet"));
	}

	let mut workbook = Workbook::new();
	{
		let sheet = workbook.add_worksheet();
		sheet.set_name(DATA_SHEET)?;
		for (c, col) in columns.iter().enumerate() {
			sheet.write_string(0, c as u16, col.name.as_str())?;
			for (r, v) in col.values.iter().enumerate() {
				write_number(sheet, r as u32 + 1, c as u16, *v)?;
			}
		}
	}

	if let Some(settings) = settings {
		let sheet = workbook.add_worksheet();
		sheet.set_name(SETTINGS_SHEET)?;
		sheet.write_string(0, 0, "k")?;
		sheet.write_string(0, 1, "value")?;
		for (r, (k, v)) in settings.iter().enumerate() {
			let row = r as u32 + 1;
			sheet.write_string(row, 0, k)?;
			match v {
				Value::Number(n) => write_number(sheet, row, 1, n.as_f64().unwrap_or(f64::NAN))?,
				Value::Bool(b) => { sheet.write_boolean(row, 1, *b)?; },
				Value::String(s) => { sheet.write_string(row, 1, s.as_str())?; },
				other => { sheet.write_string(row, 1, other.to_string())?; },
			}
		}
	}

	workbook.save(path)?;
	info!("Wrote {}", path.display());
	Ok(())
}

// Excel has no NaN or infinity
fn write_number(sheet:&mut Worksheet, row:u32, col:u16, v:f64) -> Result<()> {
	if v.is_finite() {
		sheet.write_number(row, col, v)?;
	} else {
		sheet.write_string(row, col, v.to_string())?;
	}
	Ok(())
}

/// What to pull out of a table for an I-V figure
#[derive(Debug, Clone, PartialEq)]
pub struct PlotSpec {
	pub title: String,
	pub time: Element,
	pub voltage: Element,
	pub current: Element,
	/// Multiplier applied to currents before plotting, e.g. 1e9 for nA
	pub current_scale: f64,
	pub current_units: String,
	/// Drawn as a dashed horizontal line on the I-V panel, in amps
	pub threshold: Option<f64>,
}

impl PlotSpec {
	pub fn new(title:&str, time:Element, voltage:Element, current:Element) -> Self {
		Self{ title: title.to_owned(), time, voltage, current, current_scale: 1e9, current_units: "nA".to_owned(), threshold: None }
	}
}

/// Figure title with the measured sampling period appended
pub fn sampled_title(title:&str, stats:&SamplingStats) -> String {
	format!("{}, smpl rate: {:.1} ms", title, stats.period * 1e3)
}

/// Padded axis limits covering the finite values in `v`
pub fn axis_range<'a, I: IntoIterator<Item = &'a f64>>(v:I) -> Range<f64> {
	let (lo, hi) = v.into_iter().filter(|x| x.is_finite())
		.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(*x), hi.max(*x)));
	if !lo.is_finite() || !hi.is_finite() {
		return -1.0..1.0;
	}
	let span = hi - lo;
	let pad = if span > 0.0 { span * 0.05 } else if lo != 0.0 { lo.abs() * 0.05 } else { 1.0 };
	(lo - pad)..(hi + pad)
}

fn points(x:&[f64], y:&[f64], rows:Range<usize>) -> Vec<(f64, f64)> {
	rows.filter_map(|i| Some((*x.get(i)?, *y.get(i)?))).collect()
}

/// Two panels: voltage against relative time on top, current against voltage below, both with the rising half
/// of the sweep in red and the falling half in blue
pub fn plot_sweep<P: AsRef<Path>>(path:P, table:&Table, spec:&PlotSpec) -> Result<()> {
	let path = path.as_ref();
	if table.is_empty() {
		return Err(validation("Nothing to plot"));
	}
	let t = table.relative_time(spec.time)?;
	let v = table.column(spec.voltage)?;
	let i:Vec<f64> = table.column(spec.current)?.iter().map(|x| x * spec.current_scale).collect();
	let polarity = Polarity::of(crate::sweep::peak(&v).unwrap_or(0.0));
	let (rising, falling) = table.split_at_extremum(spec.voltage, polarity)?;
	let threshold = spec.threshold.map(|x| x * spec.current_scale);

	draw_sweep(path, spec, &t, &v, &i, rising, falling, threshold).map_err(|e| Error::Plot(e.to_string()))?;
	info!("Wrote {}", path.display());
	Ok(())
}

#[allow(clippy::too_many_arguments)]
fn draw_sweep(path:&Path, spec:&PlotSpec, t:&[f64], v:&[f64], i:&[f64], rising:Range<usize>, falling:Range<usize>, threshold:Option<f64>)
	-> std::result::Result<(), Box<dyn StdError>>
{
	let root = BitMapBackend::new(path, FIGURE_SIZE).into_drawing_area();
	root.fill(&WHITE)?;
	let root = root.titled(&spec.title, ("sans-serif", 36))?;
	let (top, bottom) = root.split_vertically((FIGURE_SIZE.1 / 3) as i32);

	let mut chart = ChartBuilder::on(&top)
		.margin(20)
		.x_label_area_size(50)
		.y_label_area_size(90)
		.build_cartesian_2d(axis_range(t), axis_range(v))?;
	chart.configure_mesh().x_desc("time (s)").y_desc("voltage (V)").draw()?;
	chart.draw_series(LineSeries::new(points(t, v, rising.clone()), &RED))?;
	chart.draw_series(LineSeries::new(points(t, v, falling.clone()), &BLUE))?;

	let i_range = axis_range(i.iter().chain(threshold.iter()));
	let mut chart = ChartBuilder::on(&bottom)
		.margin(20)
		.x_label_area_size(50)
		.y_label_area_size(90)
		.build_cartesian_2d(axis_range(v), i_range)?;
	chart.configure_mesh().x_desc("voltage (V)").y_desc(format!("current ({})", spec.current_units)).draw()?;
	chart.draw_series(LineSeries::new(points(v, i, rising.clone()), &RED))?
		.label("Rising")
		.legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
	chart.draw_series(rising.filter_map(|k| Some(Circle::new((*v.get(k)?, *i.get(k)?), 3, RED.filled()))))?;
	chart.draw_series(LineSeries::new(points(v, i, falling.clone()), &BLUE))?
		.label("Falling")
		.legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
	chart.draw_series(falling.filter_map(|k| Some(Circle::new((*v.get(k)?, *i.get(k)?), 3, BLUE.filled()))))?;

	if let Some(th) = threshold {
		let x = axis_range(v);
		chart.draw_series(DashedLineSeries::new(vec![(x.start, th), (x.end, th)], 10, 6, BLACK.mix(0.5).stroke_width(2)))?
			.label("Threshold")
			.legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK.mix(0.5)));
	}

	chart.configure_series_labels().background_style(WHITE.mix(0.8)).border_style(BLACK).draw()?;
	root.present()?;
	Ok(())
}

/// One current-voltage trace per cycle
pub fn plot_cycles<P: AsRef<Path>>(path:P, table:&Table, points_per_cycle:usize, spec:&PlotSpec) -> Result<()> {
	let cycles = table.split_cycles(points_per_cycle)?;
	plot_cycle_ranges(path, table, &cycles, spec)
}

/// One current-voltage trace per range of rows
pub fn plot_cycle_ranges<P: AsRef<Path>>(path:P, table:&Table, cycles:&[Range<usize>], spec:&PlotSpec) -> Result<()> {
	let path = path.as_ref();
	let v = table.column(spec.voltage)?;
	let i:Vec<f64> = table.column(spec.current)?.iter().map(|x| x * spec.current_scale).collect();
	debug!("Plotting {} cycles", cycles.len());

	draw_cycles(path, spec, &v, &i, cycles).map_err(|e| Error::Plot(e.to_string()))?;
	info!("Wrote {}", path.display());
	Ok(())
}

fn draw_cycles(path:&Path, spec:&PlotSpec, v:&[f64], i:&[f64], cycles:&[Range<usize>]) -> std::result::Result<(), Box<dyn StdError>> {
	let root = BitMapBackend::new(path, FIGURE_SIZE).into_drawing_area();
	root.fill(&WHITE)?;

	let mut chart = ChartBuilder::on(&root)
		.caption(&spec.title, ("sans-serif", 36))
		.margin(20)
		.x_label_area_size(50)
		.y_label_area_size(90)
		.build_cartesian_2d(axis_range(v), axis_range(i))?;
	chart.configure_mesh().x_desc("voltage (V)").y_desc(format!("current ({})", spec.current_units)).draw()?;

	for (n, rows) in cycles.iter().enumerate() {
		let color = Palette99::pick(n).mix(0.9);
		chart.draw_series(LineSeries::new(points(v, i, rows.clone()), &color))?
			.label(format!("cycle {}", n + 1))
			.legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
	}

	chart.configure_series_labels().background_style(WHITE.mix(0.8)).border_style(BLACK).draw()?;
	root.present()?;
	Ok(())
}

/// A modelled waveform above what was actually sampled
pub fn plot_monitor<P: AsRef<Path>>(path:P, title:&str, ideal:(&[f64], &[f64]), sampled:(&[f64], &[f64]), sampled_label:&str) -> Result<()> {
	let path = path.as_ref();
	draw_monitor(path, title, ideal, sampled, sampled_label).map_err(|e| Error::Plot(e.to_string()))?;
	info!("Wrote {}", path.display());
	Ok(())
}

fn draw_monitor(path:&Path, title:&str, ideal:(&[f64], &[f64]), sampled:(&[f64], &[f64]), sampled_label:&str)
	-> std::result::Result<(), Box<dyn StdError>>
{
	let root = BitMapBackend::new(path, FIGURE_SIZE).into_drawing_area();
	root.fill(&WHITE)?;
	let root = root.titled(title, ("sans-serif", 36))?;
	let panels = root.split_evenly((2, 1));
	let x = axis_range(ideal.0.iter().chain(sampled.0.iter()));

	let mut chart = ChartBuilder::on(&panels[0])
		.margin(20)
		.x_label_area_size(40)
		.y_label_area_size(90)
		.build_cartesian_2d(x.clone(), axis_range(ideal.1))?;
	chart.configure_mesh().y_desc("ideal output (V)").draw()?;
	chart.draw_series(LineSeries::new(points(ideal.0, ideal.1, 0..ideal.0.len()), &BLACK))?;

	let mut chart = ChartBuilder::on(&panels[1])
		.margin(20)
		.x_label_area_size(50)
		.y_label_area_size(90)
		.build_cartesian_2d(x, axis_range(sampled.1))?;
	chart.configure_mesh().x_desc("time (s)").y_desc(sampled_label).draw()?;
	chart.draw_series(LineSeries::new(points(sampled.0, sampled.1, 0..sampled.0.len()), &BLUE))?;

	root.present()?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::table::ElementSchema;

	#[test]
	fn settings_keep_order_and_flatten() {
		#[derive(serde::Serialize)]
		struct Sense { nplc: f64, digits: u8 }

		let mut s = Settings::new();
		s.insert("save_id", "tid3").unwrap();
		s.extend("sense", Sense{ nplc: 1.0, digits: 6 }).unwrap();
		s.insert("save_id", "tid4").unwrap();

		let keys:Vec<&str> = s.iter().map(|(k, _)| k).collect();
		assert_eq!(keys, vec!["save_id", "sense_digits", "sense_nplc"]);
		assert_eq!(s.get("save_id"), Some(&Value::from("tid4")));
		assert!(s.to_json_pretty().unwrap().starts_with("{\n  \"save_id\": \"tid4\""));
	}

	#[test]
	fn axis_ranges() {
		assert_eq!(axis_range(&[0.0, 10.0]), -0.5..10.5);
		assert_eq!(axis_range(&[] as &[f64]), -1.0..1.0);
		assert_eq!(axis_range(&[0.0, 0.0]), -1.0..1.0);
		assert_eq!(axis_range(&[f64::NAN, 0.0, 20.0]), -1.0..21.0);
	}

	#[test]
	fn column_names() {
		let schema = ElementSchema::parse("VOLT,CURR").unwrap();
		let table = Table::reshape(vec![0.0, 1e-9, 1.0, 2e-9], &schema).unwrap();
		let cols = table_columns(&table, None).unwrap();
		assert_eq!(cols[0].name, "V (V)");
		assert_eq!(cols[1].values, vec![1e-9, 2e-9]);
		assert!(table_columns(&table, Some(&["V"])).is_err());
	}
}
