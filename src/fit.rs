
// Perform a 1-D least squared linear fit, used to pull resistance out of I-V sweeps

use serde::Serialize;

use crate::error::{validation, Result};

#[derive(Default)]
pub struct LinearFitProblem {
	pub points: Vec<(f64, f64)>
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
	pub slope: f64,
	pub intercept: f64,
}

impl LinearFitProblem {

	pub fn from_xy(x:&[f64], y:&[f64]) -> Self {
		Self{ points: x.iter().copied().zip(y.iter().copied()).collect() }
	}

	pub fn solve(&self) -> Result<LinearFit> {
		let n = self.points.len() as f64;
		let xx: f64 = self.points.iter().map(|(x, _)| *x * *x).sum();
		let xy: f64 = self.points.iter().map(|(x, y)| *x * *y).sum();
		let x: f64 = self.points.iter().map(|(x, _)| *x).sum();
		let y: f64 = self.points.iter().map(|(_, y)| *y).sum();

		let denom: f64 = n*xx - x.powi(2);
		if denom == 0.0 {
			Err(validation("Singular least squares problem"))
		} else {
			let det: f64 = 1.0 / denom;
			Ok(LinearFit {
				slope:     det*( n*xy - x*y),
				intercept: det*(-x*xy + y*xx)
			})
		}
	}

}

impl LinearFit {
	pub fn eval(&self, x:f64) -> f64 { self.slope*x + self.intercept }
}

/// Resistance from a current-vs-voltage fit, R = dV/dI = 1/slope
pub fn resistance(voltage:&[f64], current:&[f64]) -> Result<f64> {
	let fit = LinearFitProblem::from_xy(voltage, current).solve()?;
	if fit.slope == 0.0 {
		return Err(validation("Flat I-V curve, resistance is unbounded"));
	}
	Ok(1.0 / fit.slope)
}

/// Separate fits for the positive and negative voltage branches, which rarely share a slope on a leaky device
pub fn fit_by_polarity(voltage:&[f64], current:&[f64]) -> (Option<LinearFit>, Option<LinearFit>) {
	let mut pos = LinearFitProblem::default();
	let mut neg = LinearFitProblem::default();
	for (v, i) in voltage.iter().zip(current.iter()) {
		if *v > 0.0 { pos.points.push((*v, *i)); }
		if *v < 0.0 { neg.points.push((*v, *i)); }
	}
	(pos.solve().ok(), neg.solve().ok())
}
