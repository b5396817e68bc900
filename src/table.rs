//! Reading buffers and the tables they become.
//!
//! An instrument hands back a flat list of numbers.  The data-element schema declared with `:FORM:ELEM` says
//! how many of those numbers make up one sample, and in which order they come back.  `Table` is that list
//! reshaped to `[sample, element]`.

use std::fmt;
use std::ops::Range;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{parse, validation, Error, Result};

lazy_static! {
	static ref NUMBER_RE: Regex = Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").unwrap();
}

/// Data elements of the 6517 `:FORM:ELEM` and 2400-series `:FORM:ELEM:SENS` commands.  Declaration order is
/// the order the instruments send them in, whatever order they were requested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Element {
	Reading,
	Timestamp,
	ReadingNumber,
	Channel,
	ExternalTemperature,
	Humidity,
	VoltageSource,
	Voltage,
	Current,
	Resistance,
	Time,
	Status,
	Units,
}

// (element, short form, long form)
const KEYWORDS:[(Element, &str, &str); 13] = [
	(Element::Reading,             "READ", "READING"),
	(Element::Timestamp,           "TST",  "TSTAMP"),
	(Element::ReadingNumber,       "RNUM", "RNUMBER"),
	(Element::Channel,             "CHAN", "CHANNEL"),
	(Element::ExternalTemperature, "ETEM", "ETEMPERATURE"),
	(Element::Humidity,            "HUM",  "HUMIDITY"),
	(Element::VoltageSource,       "VSO",  "VSOURCE"),
	(Element::Voltage,             "VOLT", "VOLTAGE"),
	(Element::Current,             "CURR", "CURRENT"),
	(Element::Resistance,          "RES",  "RESISTANCE"),
	(Element::Time,                "TIME", "TIME"),
	(Element::Status,              "STAT", "STATUS"),
	(Element::Units,               "UNIT", "UNITS"),
];

impl Element {

	/// Accepts the short form, the long form, or anything between, in any case
	pub fn from_keyword(s:&str) -> Option<Self> {
		let t = s.trim().trim_matches('"').to_ascii_uppercase();
		KEYWORDS.iter()
			.find(|(_, short, long)| t.len() >= short.len() && long.starts_with(t.as_str()))
			.map(|(e, _, _)| *e)
	}

	pub fn keyword(self) -> &'static str {
		KEYWORDS.iter().find(|(e, _, _)| *e == self).map(|(_, short, _)| *short).unwrap_or("")
	}

	/// Column heading used in plots and workbooks
	pub fn label(self) -> &'static str {
		match self {
			Element::Reading             => "reading",
			Element::Timestamp           => "t (s)",
			Element::ReadingNumber       => "reading #",
			Element::Channel             => "channel",
			Element::ExternalTemperature => "T (C)",
			Element::Humidity            => "RH (%)",
			Element::VoltageSource       => "Vsrc (V)",
			Element::Voltage             => "V (V)",
			Element::Current             => "I (A)",
			Element::Resistance          => "R (Ohm)",
			Element::Time                => "t (s)",
			Element::Status              => "status",
			Element::Units               => "units",
		}
	}

}

impl fmt::Display for Element {
	fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.keyword()) }
}

/// The elements declared to the instrument, kept in the order requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSchema {
	elements: Vec<Element>,
}

impl ElementSchema {

	pub fn new(elements:&[Element]) -> Result<Self> {
		let mut seen:Vec<Element> = vec![];
		for e in elements {
			if seen.contains(e) {
				return Err(validation(format!("Data element {} declared twice", e)));
			}
			seen.push(*e);
		}
		let ans = Self{ elements: seen };
		if ans.width() == 0 {
			return Err(validation("Schema has no data columns"));
		}
		Ok(ans)
	}

	/// Parse a list like `"READ,TST,VSO"` or `"VOLTage, CURRent, TIME"`
	pub fn parse(s:&str) -> Result<Self> {
		let elements:Vec<Element> = s.split(',')
			.map(|tok| Element::from_keyword(tok).ok_or_else(|| validation(format!("Unknown data element {:?}", tok.trim()))))
			.collect::<Result<Vec<Element>>>()?;
		Self::new(&elements)
	}

	pub fn elements(&self) -> &[Element] { &self.elements }

	/// The argument for `:FORM:ELEM`
	pub fn to_scpi(&self) -> String {
		self.elements.iter().map(|e| e.keyword()).collect::<Vec<&str>>().join(",")
	}

	/// Elements that arrive as their own comma separated value, in arrival order.  On the electrometer STATus
	/// and UNITs are letters glued onto the reading rather than values of their own.
	pub fn columns(&self) -> Vec<Element> {
		let has_reading = self.elements.contains(&Element::Reading);
		let mut ans:Vec<Element> = self.elements.iter().copied()
			.filter(|e| !(has_reading && (*e == Element::Status || *e == Element::Units)))
			.filter(|e| *e != Element::Units)
			.collect();
		ans.sort();
		ans
	}

	pub fn width(&self) -> usize { self.columns().len() }

	pub fn index_of(&self, e:Element) -> Option<usize> {
		self.columns().iter().position(|c| *c == e)
	}

}

impl fmt::Display for ElementSchema {
	fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.to_scpi()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endianness {
	Little,
	Big,
}

/// Status letter the 6517 appends to a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingStatus {
	Normal,
	ZeroCheckEnabled,
	Overflow,
	Underflow,
	Reference,
	OutOfLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
	Volts,
	Amps,
	Ohms,
	Coulombs,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
	pub value: f64,
	pub status: Option<ReadingStatus>,
	pub unit: Option<Unit>,
}

fn split_number(tok:&str) -> Result<(f64, &str)> {
	let m = NUMBER_RE.find(tok).ok_or_else(|| parse(format!("No number in token {:?}", tok)))?;
	let value:f64 = m.as_str().parse().map_err(|_| parse(format!("Bad number in token {:?}", tok)))?;
	Ok((value, &tok[m.end()..]))
}

/// Decode one electrometer reading such as `+1.0856E-12NADC`
pub fn parse_reading(tok:&str) -> Result<Reading> {
	let (value, suffix) = split_number(tok.trim())?;
	if suffix.is_empty() {
		return Ok(Reading{ value, status: None, unit: None });
	}

	let status = match suffix.chars().next() {
		Some('N') => Some(ReadingStatus::Normal),
		Some('Z') => Some(ReadingStatus::ZeroCheckEnabled),
		Some('O') => Some(ReadingStatus::Overflow),
		Some('U') => Some(ReadingStatus::Underflow),
		Some('R') => Some(ReadingStatus::Reference),
		Some('L') => Some(ReadingStatus::OutOfLimit),
		_         => None,
	};
	let rest = if status.is_some() { &suffix[1..] } else { suffix };

	let unit = match rest {
		""     => None,
		"VDC"  => Some(Unit::Volts),
		"ADC"  => Some(Unit::Amps),
		"OHM"  => Some(Unit::Ohms),
		"COUL" => Some(Unit::Coulombs),
		other  => return Err(parse(format!("Unknown reading suffix {:?} in {:?}", other, tok.trim()))),
	};

	Ok(Reading{ value, status, unit })
}

/// Comma separated values, each possibly followed by a unit or status suffix (`NADC`, `secs`, `RDNG#`,
/// `Vsrc`).  A trailing terminator or trailing comma is ignored.
pub fn parse_ascii_buffer(s:&str) -> Result<Vec<f64>> {
	let s = s.trim_end_matches(|c:char| c == '\n' || c == '\r' || c == ',').trim();
	if s.is_empty() {
		return Ok(vec![]);
	}
	s.split(',').map(|tok| split_number(tok.trim()).map(|(v, _)| v)).collect()
}

/// IEEE-754 single precision values after a `#0` (indefinite length) or `#<n><len>` (definite length) header
pub fn parse_binary_block(raw:&[u8], order:Endianness) -> Result<Vec<f32>> {
	if raw.len() < 2 || raw[0] != b'#' {
		return Err(parse("Binary block doesn't start with '#'"));
	}

	let n_digits = (raw[1] as char).to_digit(10).ok_or_else(|| parse("Bad binary block header"))? as usize;
	let payload:&[u8] = if n_digits == 0 {
		let mut end = raw.len();
		while end > 2 && (raw[end-1] == b'\n' || raw[end-1] == b'\r') && (end - 2) % 4 != 0 {
			end -= 1;
		}
		&raw[2..end]
	} else {
		let len_field = raw.get(2..2+n_digits).ok_or_else(|| parse("Truncated binary block header"))?;
		let len:usize = std::str::from_utf8(len_field).ok()
			.and_then(|s| s.parse().ok())
			.ok_or_else(|| parse("Bad binary block length"))?;
		raw.get(2+n_digits..2+n_digits+len).ok_or_else(|| parse("Binary block shorter than its header says"))?
	};

	if payload.len() % 4 != 0 {
		return Err(parse(format!("Binary block of {} bytes isn't a whole number of floats", payload.len())));
	}

	Ok(payload.chunks_exact(4).map(|c| match order {
		Endianness::Little => LittleEndian::read_f32(c),
		Endianness::Big    => BigEndian::read_f32(c),
	}).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
	Positive,
	Negative,
}

impl Polarity {
	pub fn of(v:f64) -> Self { if v < 0.0 { Polarity::Negative } else { Polarity::Positive } }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingStats {
	pub elapsed: f64,
	pub period: f64,
	pub frequency: f64,
	pub samples: usize,
}

/// Samples in rows, elements in columns
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
	schema: ElementSchema,
	data: Vec<f64>,
}

impl Table {

	pub fn reshape(flat:Vec<f64>, schema:&ElementSchema) -> Result<Self> {
		let width = schema.width();
		if flat.len() % width != 0 {
			let expected = (flat.len() / width + 1) * width;
			return Err(Error::Shape{ expected, actual: flat.len() });
		}
		Ok(Self{ schema: schema.clone(), data: flat })
	}

	/// Reshape when the number of samples is known up front
	pub fn reshape_exact(flat:Vec<f64>, points:usize, schema:&ElementSchema) -> Result<Self> {
		let expected = points * schema.width();
		if flat.len() != expected {
			return Err(Error::Shape{ expected, actual: flat.len() });
		}
		Self::reshape(flat, schema)
	}

	pub fn from_rows(rows:&[Vec<f64>], schema:&ElementSchema) -> Result<Self> {
		let width = schema.width();
		let mut data:Vec<f64> = Vec::with_capacity(rows.len() * width);
		for row in rows {
			if row.len() != width {
				return Err(Error::Shape{ expected: width, actual: row.len() });
			}
			data.extend_from_slice(row);
		}
		Ok(Self{ schema: schema.clone(), data })
	}

	pub fn schema(&self) -> &ElementSchema { &self.schema }

	pub fn width(&self) -> usize { self.schema.width() }

	pub fn len(&self) -> usize { self.data.len() / self.width() }

	pub fn is_empty(&self) -> bool { self.data.is_empty() }

	pub fn ravel(&self) -> Vec<f64> { self.data.clone() }

	pub fn into_flat(self) -> Vec<f64> { self.data }

	pub fn row(&self, i:usize) -> Option<&[f64]> {
		let w = self.width();
		self.data.get(i*w..(i+1)*w)
	}

	pub fn rows(&self) -> std::slice::ChunksExact<f64> { self.data.chunks_exact(self.width()) }

	fn column_index(&self, e:Element) -> Result<usize> {
		self.schema.index_of(e).ok_or_else(|| validation(format!("Table has no {} column", e)))
	}

	pub fn column(&self, e:Element) -> Result<Vec<f64>> {
		let idx = self.column_index(e)?;
		Ok(self.rows().map(|r| r[idx]).collect())
	}

	/// A column shifted so its first sample is zero
	pub fn relative_time(&self, e:Element) -> Result<Vec<f64>> {
		let col = self.column(e)?;
		let t0 = col.first().copied().unwrap_or(0.0);
		Ok(col.into_iter().map(|t| t - t0).collect())
	}

	/// Elapsed time over the run and the mean time per sample
	pub fn sampling_stats(&self, time:Element) -> Result<SamplingStats> {
		let col = self.column(time)?;
		let samples = col.len();
		if samples == 0 {
			return Err(validation("No samples to compute timing from"));
		}

		let elapsed = col[samples - 1] - col[0];
		let period = elapsed / samples as f64;
		let frequency = if period > 0.0 { 1.0 / period } else {
			warn!("Sampling period of {} s, frequency is undefined", period);
			f64::NAN
		};
		Ok(SamplingStats{ elapsed, period, frequency, samples })
	}

	/// Rising and falling halves of a sweep, split at the first maximum (or minimum) of column `e`.  Both
	/// ranges include the extremum row.
	pub fn split_at_extremum(&self, e:Element, polarity:Polarity) -> Result<(Range<usize>, Range<usize>)> {
		let col = self.column(e)?;
		if col.is_empty() {
			return Err(validation("Can't split an empty table"));
		}

		let mut idx = 0;
		for (i, v) in col.iter().enumerate() {
			let better = match polarity {
				Polarity::Positive => *v > col[idx],
				Polarity::Negative => *v < col[idx],
			};
			if better {
				idx = i;
			}
		}
		Ok((0..idx+1, idx..col.len()))
	}

	/// Row ranges of consecutive cycles.  The last range is short when the run stopped mid-cycle.
	pub fn split_cycles(&self, points_per_cycle:usize) -> Result<Vec<Range<usize>>> {
		if points_per_cycle == 0 {
			return Err(validation("A cycle needs at least one point"));
		}
		let n = self.len();
		Ok((0..n).step_by(points_per_cycle).map(|start| start..(start + points_per_cycle).min(n)).collect())
	}

	pub fn slice(&self, rows:Range<usize>) -> Result<Self> {
		let w = self.width();
		if rows.start > rows.end || rows.end > self.len() {
			return Err(validation(format!("Rows {:?} out of range for a table of {}", rows, self.len())));
		}
		Ok(Self{ schema: self.schema.clone(), data: self.data[rows.start*w..rows.end*w].to_vec() })
	}

	/// Multiply a column in place, e.g. by 1e9 to plot nanoamps
	pub fn scale_column(&mut self, e:Element, factor:f64) -> Result<()> {
		let idx = self.column_index(e)?;
		let w = self.width();
		for row in self.data.chunks_exact_mut(w) {
			row[idx] *= factor;
		}
		Ok(())
	}

}
