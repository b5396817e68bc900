//! Set-point sequences.
//!
//! Everything here is a pure function of its arguments.  The length of the sequence a builder returns is what
//! later sets the instrument's trigger count and the row count of the reshaped table, so builders never drop or
//! pad points silently.

use serde::{Deserialize, Serialize};

use crate::error::{validation, Result};
use crate::instrument::scpi_number;

/// 6517 buffer capacity with READ, TST and VSO stored per reading
pub const MAX_BUFFER_POINTS:usize = 8566;

/// Longest `:SOUR:LIST:VOLT` the 2400 series accepts
pub const MAX_LIST_POINTS:usize = 100;

// Guards against a mistyped step producing a sequence the size of memory
const MAX_GENERATED_POINTS:usize = 10_000_000;

/// Half-open range with a fixed step, `[start, stop)`
pub fn arange(start:f64, stop:f64, step:f64) -> Result<Vec<f64>> {
	if step == 0.0 || !step.is_finite() {
		return Err(validation(format!("Step must be finite and non-zero, got {}", step)));
	}
	if !start.is_finite() || !stop.is_finite() {
		return Err(validation("Sweep bounds must be finite"));
	}

	let n = ((stop - start) / step).ceil();
	if n <= 0.0 {
		return Ok(vec![]);
	}
	if n > MAX_GENERATED_POINTS as f64 {
		return Err(validation("Number of points is too large"));
	}

	Ok((0..n as usize).map(|i| start + (i as f64)*step).collect())
}

/// Ramp including `stop` when it lies on the step grid.  The step takes the sign of `stop - start` so that
/// negative ramps can be written with a positive step.
pub fn ramp(start:f64, stop:f64, step:f64) -> Result<Vec<f64>> {
	let step = if stop < start { -step.abs() } else { step.abs() };
	arange(start, stop + step / 2.0, step)
}

pub fn linspace(start:f64, stop:f64, n:usize) -> Vec<f64> {
	match n {
		0 => vec![],
		1 => vec![start],
		_ => {
			let step = (stop - start) / ((n - 1) as f64);
			let mut ans:Vec<f64> = (0..n).map(|i| start + (i as f64)*step).collect();
			// Land exactly on stop instead of one rounding error away from it
			ans[n - 1] = stop;
			ans
		}
	}
}

/// The sequence followed by its own reverse.  With `drop_duplicate_peak` the reversed copy loses its first
/// element so the turning point is only sourced once.  An empty sequence stays empty and a single point is
/// returned unchanged when dropping the peak, since there's nothing left to mirror.
pub fn append_reverse(seq:&[f64], drop_duplicate_peak:bool) -> Vec<f64> {
	let skip = if drop_duplicate_peak { 1 } else { 0 };
	let mut ans:Vec<f64> = Vec::with_capacity(2*seq.len());
	ans.extend_from_slice(seq);
	ans.extend(seq.iter().rev().skip(skip));
	ans
}

/// The sequence followed by a polarity flipped copy of itself
pub fn append_inverted(seq:&[f64]) -> Vec<f64> {
	let mut ans:Vec<f64> = Vec::with_capacity(2*seq.len());
	ans.extend_from_slice(seq);
	ans.extend(seq.iter().map(|v| -v));
	ans
}

/// `pattern` tiled `n` times.  With `join_smooth`, each repetition after the first drops its first point,
/// which is only valid when the pattern starts and ends on the same value.
pub fn repeat_n_cycles(pattern:&[f64], n:usize, join_smooth:bool) -> Vec<f64> {
	if pattern.is_empty() || n == 0 {
		return vec![];
	}

	let mut ans:Vec<f64> = Vec::with_capacity(n*pattern.len());
	ans.extend_from_slice(pattern);
	let tail:&[f64] = if join_smooth { &pattern[1..] } else { pattern };
	for _ in 1..n {
		ans.extend_from_slice(tail);
	}
	ans
}

/// `[0, +V, 0, -V, 0]` repeated `n_cycles` times
pub fn bipolar_square_wave(vmax:f64, n_cycles:usize) -> Vec<f64> {
	repeat_n_cycles(&[0.0, vmax, 0.0, -vmax, 0.0], n_cycles, false)
}

/// Largest excursion from zero, keeping its sign.  Picks the range and tells rising from falling.
pub fn peak(seq:&[f64]) -> Option<f64> {
	seq.iter().copied().fold(None, |acc:Option<f64>, v| match acc {
		Some(a) if a.abs() >= v.abs() => Some(a),
		_ => Some(v),
	})
}

/// Points in a linear staircase from `start` to `stop`, both ends included.  Only the magnitude of `step` matters.
pub fn staircase_points(start:f64, stop:f64, step:f64) -> Result<usize> {
	if step == 0.0 || !step.is_finite() {
		return Err(validation(format!("Staircase step must be finite and non-zero, got {}", step)));
	}
	if !start.is_finite() || !stop.is_finite() {
		return Err(validation("Staircase bounds must be finite"));
	}
	let steps = ((stop - start).abs() / step.abs()).round();
	if steps >= MAX_GENERATED_POINTS as f64 {
		return Err(validation("Number of points is too large"));
	}
	Ok(steps as usize + 1)
}

pub fn check_point_count(n:usize, max:usize) -> Result<()> {
	if n > max {
		Err(validation(format!("Number of points is too large ({} > {})", n, max)))
	} else if n == 0 {
		Err(validation("Sweep has no points"))
	} else {
		Ok(())
	}
}

/// Comma separated list in the form `:SOUR:LIST:VOLT` expects, rounded to the microvolt so accumulated step
/// error doesn't turn 0.3 into 0.30000000000000004
pub fn to_scpi_list(seq:&[f64]) -> String {
	seq.iter().map(|v| scpi_number((v * 1e6).round() / 1e6)).collect::<Vec<String>>().join(",")
}

/// The numbered sweep shapes used for zipper actuation tests on the 2410
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepProfile {
	ObserveByEye,
	SlowRamp,
	FastRamp,
	Staircase,
	StepAndHold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSweep {
	pub setpoints: Vec<f64>,
	pub source_delay_s: f64,
	pub nplc: f64,
}

impl SweepProfile {

	pub fn from_number(n:u32) -> Result<Self> {
		match n {
			1 => Ok(SweepProfile::ObserveByEye),
			2 => Ok(SweepProfile::SlowRamp),
			3 => Ok(SweepProfile::FastRamp),
			4 => Ok(SweepProfile::Staircase),
			5 => Ok(SweepProfile::StepAndHold),
			_ => Err(validation("Test number not understood")),
		}
	}

	pub fn number(self) -> u32 {
		match self {
			SweepProfile::ObserveByEye => 1,
			SweepProfile::SlowRamp     => 2,
			SweepProfile::FastRamp     => 3,
			SweepProfile::Staircase    => 4,
			SweepProfile::StepAndHold  => 5,
		}
	}

	/// Set-points from 0 V to `vmax` and back, plus the source delay and integration time that go with them
	pub fn build(self, vmax:f64, vstep:f64) -> Result<ProfileSweep> {
		if vmax == 0.0 {
			return Err(validation("Maximum voltage must be non-zero"));
		}
		let step = vmax.signum() * vstep.abs();

		let (setpoints, source_delay_s, nplc) = match self {
			SweepProfile::ObserveByEye => (append_reverse(&ramp(0.0, vmax, step)?, false), 0.15, 2.0),
			SweepProfile::SlowRamp     => (append_reverse(&ramp(0.0, vmax, step)?, true), 0.05, 1.0),
			SweepProfile::FastRamp     => (append_reverse(&ramp(0.0, vmax, step)?, true), 0.025, 0.1),
			SweepProfile::Staircase    => (append_reverse(&linspace(0.0, vmax, 4), true), 0.5, 5.0),
			SweepProfile::StepAndHold  => (vec![0.0, step, vmax, step / 5.0, 0.0], 0.35, 3.0),
		};

		Ok(ProfileSweep{ setpoints, source_delay_s, nplc })
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn approx_eq(a:&[f64], b:&[f64]) -> bool {
		a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-9)
	}

	#[test]
	fn mirrored_ramp_drops_peak() {
		assert_eq!(append_reverse(&[0.0, 5.0, 10.0], true), vec![0.0, 5.0, 10.0, 5.0, 0.0]);
		assert_eq!(append_reverse(&[0.0, 5.0, 10.0], false), vec![0.0, 5.0, 10.0, 10.0, 5.0, 0.0]);
	}

	#[test]
	fn mirror_short_sequences() {
		assert!(append_reverse(&[], true).is_empty());
		assert_eq!(append_reverse(&[3.0], true), vec![3.0]);
		assert_eq!(append_reverse(&[3.0], false), vec![3.0, 3.0]);
	}

	#[test]
	fn negative_ramp() {
		// Vo, Vmax, dV = 0, -500, -100 on the 6517
		let r = ramp(0.0, -500.0, 100.0).unwrap();
		assert!(approx_eq(&r, &[0.0, -100.0, -200.0, -300.0, -400.0, -500.0]));
	}

	#[test]
	fn staircase_point_counts() {
		assert_eq!(staircase_points(0.0, 50.0, 10.0).unwrap(), 6);
		assert_eq!(staircase_points(50.0, 0.0, 10.0).unwrap(), 6);
		assert_eq!(staircase_points(0.0, 0.0, 1.0).unwrap(), 1);
		assert!(staircase_points(0.0, 50.0, 0.0).is_err());
		assert!(staircase_points(0.0, 50.0, 1e-300).is_err());
		assert!(staircase_points(0.0, f64::INFINITY, 1.0).is_err());
	}

	#[test]
	fn arange_rejects_zero_step() {
		assert!(arange(0.0, 1.0, 0.0).is_err());
		assert!(arange(0.0, 1.0, -0.1).unwrap().is_empty());
	}

	#[test]
	fn linspace_endpoints() {
		let v = linspace(0.0, 5.0, 4);
		assert_eq!(v.len(), 4);
		assert_eq!(v[0], 0.0);
		assert_eq!(v[3], 5.0);
	}

	#[test]
	fn square_wave_and_inversion() {
		assert_eq!(bipolar_square_wave(2.0, 2), vec![0.0, 2.0, 0.0, -2.0, 0.0, 0.0, 2.0, 0.0, -2.0, 0.0]);
		assert_eq!(append_inverted(&[0.0, 1.0, 2.0]), vec![0.0, 1.0, 2.0, -0.0, -1.0, -2.0]);
	}

	#[test]
	fn peak_keeps_sign() {
		assert_eq!(peak(&[0.0, -100.0, -500.0, -100.0]), Some(-500.0));
		assert_eq!(peak(&[0.0, 2.0, -1.0]), Some(2.0));
		assert_eq!(peak(&[]), None);
	}

	#[test]
	fn point_count_guard() {
		assert!(check_point_count(MAX_LIST_POINTS, MAX_LIST_POINTS).is_ok());
		assert!(check_point_count(MAX_LIST_POINTS + 1, MAX_LIST_POINTS).is_err());
		assert!(check_point_count(0, MAX_LIST_POINTS).is_err());
	}

	#[test]
	fn scpi_list() {
		assert_eq!(to_scpi_list(&[0.0, 0.5, -1.25, 10.0]), "0,0.5,-1.25,10");
		assert_eq!(to_scpi_list(&ramp(0.0, 0.4, 0.1).unwrap()), "0,0.1,0.2,0.3,0.4");
	}

	#[test]
	fn numbered_profiles() {
		assert!(SweepProfile::from_number(0).is_err());
		assert!(SweepProfile::from_number(6).is_err());

		let slow = SweepProfile::from_number(2).unwrap().build(5.0, 0.5).unwrap();
		assert_eq!(slow.setpoints.len(), 21);
		assert_eq!(slow.source_delay_s, 0.05);
		assert_eq!(slow.nplc, 1.0);

		let eye = SweepProfile::ObserveByEye.build(5.0, 0.5).unwrap();
		assert_eq!(eye.setpoints.len(), 22);

		let stair = SweepProfile::Staircase.build(-6.0, 1.0).unwrap();
		assert!(approx_eq(&stair.setpoints, &[0.0, -2.0, -4.0, -6.0, -4.0, -2.0, 0.0]));

		let hold = SweepProfile::StepAndHold.build(5.0, 0.5).unwrap();
		assert!(approx_eq(&hold.setpoints, &[0.0, 0.5, 5.0, 0.1, 0.0]));

		for n in 1..=5 {
			assert_eq!(SweepProfile::from_number(n).unwrap().number(), n);
		}
	}

	proptest! {
		#[test]
		fn append_reverse_lengths(seq in prop::collection::vec(-1000.0f64..1000.0, 2..64)) {
			let n = seq.len();
			let full = append_reverse(&seq, false);
			let dropped = append_reverse(&seq, true);
			prop_assert_eq!(full.len(), 2*n);
			prop_assert_eq!(dropped.len(), 2*n - 1);
			prop_assert_eq!(&full[..n], &seq[..]);
			prop_assert_eq!(&dropped[..n], &seq[..]);

			let rev:Vec<f64> = seq.iter().rev().copied().collect();
			prop_assert_eq!(&full[n..], &rev[..]);
			prop_assert_eq!(&dropped[n..], &rev[1..]);
		}

		#[test]
		fn repeat_lengths(pattern in prop::collection::vec(-10.0f64..10.0, 1..16), n in 1usize..20) {
			prop_assert_eq!(repeat_n_cycles(&pattern, n, false).len(), n*pattern.len());
			prop_assert_eq!(repeat_n_cycles(&pattern, n, true).len(), n*(pattern.len() - 1) + 1);
		}
	}
}
