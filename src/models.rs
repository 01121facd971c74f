//! Sensor calibration parameter types produced by the inertial estimators.
//!
//! Both models share the convention `measured = b + (I + M) · true (+ ...)`,
//! where `b` is the bias and `M` collects the scale-factor errors on its
//! diagonal and the cross-coupling errors off it.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::types::{Mat3, Vec3};

/// Accelerometer bias and scale-factor / cross-coupling matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccelerometerCalibration {
    pub bias: Vec3,
    pub ma: Mat3,
}

impl Default for AccelerometerCalibration {
    fn default() -> Self {
        Self {
            bias: Vec3::zeros(),
            ma: Mat3::zeros(),
        }
    }
}

impl AccelerometerCalibration {
    pub fn new(bias: Vec3, ma: Mat3) -> Self {
        Self { bias, ma }
    }

    /// Specific force the accelerometer reports for `true_specific_force`.
    pub fn predict(&self, true_specific_force: &Vec3) -> Vec3 {
        self.bias + (Matrix3::identity() + self.ma) * true_specific_force
    }

    /// True specific force recovered from a measurement, or `None` when
    /// `I + Ma` is singular.
    pub fn correct(&self, measured_specific_force: &Vec3) -> Option<Vec3> {
        let t = Matrix3::identity() + self.ma;
        t.try_inverse().map(|inv| inv * (measured_specific_force - self.bias))
    }

    /// Scale-factor errors `(sx, sy, sz)`.
    pub fn scale_factors(&self) -> Vec3 {
        self.ma.diagonal()
    }
}

/// Gyroscope bias, scale-factor / cross-coupling matrix and G-dependent
/// cross biases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GyroscopeCalibration {
    pub bias: Vec3,
    pub mg: Mat3,
    pub gg: Mat3,
}

impl Default for GyroscopeCalibration {
    fn default() -> Self {
        Self {
            bias: Vec3::zeros(),
            mg: Mat3::zeros(),
            gg: Mat3::zeros(),
        }
    }
}

impl GyroscopeCalibration {
    pub fn new(bias: Vec3, mg: Mat3, gg: Mat3) -> Self {
        Self { bias, mg, gg }
    }

    /// Angular rate the gyroscope reports for the given true kinematics.
    pub fn predict(&self, true_angular_rate: &Vec3, true_specific_force: &Vec3) -> Vec3 {
        self.bias
            + (Matrix3::identity() + self.mg) * true_angular_rate
            + self.gg * true_specific_force
    }

    /// True angular rate recovered from a measurement.
    pub fn correct(
        &self,
        measured_angular_rate: &Vec3,
        true_specific_force: &Vec3,
    ) -> Option<Vec3> {
        let t = Matrix3::identity() + self.mg;
        t.try_inverse()
            .map(|inv| inv * (measured_angular_rate - self.bias - self.gg * true_specific_force))
    }

    pub fn scale_factors(&self) -> Vec3 {
        self.mg.diagonal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn accelerometer_correct_inverts_predict() {
        let cal = AccelerometerCalibration::new(
            Vec3::new(0.1, -0.2, 0.05),
            Mat3::new(0.01, 0.002, -0.001, 0.0, -0.02, 0.003, 0.0, 0.0, 0.015),
        );
        let f = Vec3::new(1.0, 2.0, -9.0);
        let back = cal.correct(&cal.predict(&f)).unwrap();
        assert_relative_eq!(back, f, epsilon = 1e-12);
        assert_relative_eq!(cal.scale_factors(), Vec3::new(0.01, -0.02, 0.015));
    }

    #[test]
    fn gyroscope_correct_inverts_predict() {
        let cal = GyroscopeCalibration::new(
            Vec3::new(1e-3, 2e-3, -1e-3),
            Mat3::from_diagonal(&Vec3::new(0.01, 0.02, -0.01)),
            Mat3::from_element(1e-4),
        );
        let w = Vec3::new(0.3, -0.1, 0.2);
        let f = Vec3::new(0.0, 0.0, -9.81);
        let back = cal.correct(&cal.predict(&w, &f), &f).unwrap();
        assert_relative_eq!(back, w, epsilon = 1e-12);
    }

    #[test]
    fn singular_transform_cannot_correct() {
        let cal = AccelerometerCalibration::new(Vec3::zeros(), -Mat3::identity());
        assert!(cal.correct(&Vec3::new(1.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn serde_round_trip() {
        let cal = GyroscopeCalibration::default();
        let json = serde_json::to_string(&cal).unwrap();
        let back: GyroscopeCalibration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cal);
    }
}
