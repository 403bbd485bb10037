//! Landmark measurement model for the particle filter.
//!
//! This module defines the body-frame landmark observation, the nearest-neighbor data association
//! helper, and the bivariate Gaussian likelihood used to weight particles. The likelihood is exposed
//! through the [MeasurementModel] trait so that the filter can be driven by alternate sensor models.
use crate::error::{FilterError, Result};
use crate::map::LandmarkMap;
use crate::{Pose, distance, transform_to_map};

use serde::{Deserialize, Serialize};

use std::f64::consts::PI;
use std::fmt::{self, Display};

/// Observation id used before association and for observations with no landmark in range.
pub const UNASSOCIATED: i32 = -1;

/// A landmark detection.
///
/// As produced by the sensor the coordinates are relative to the vehicle (body frame) and `id` is
/// [UNASSOCIATED]. Data association overwrites `id` with the matched landmark.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandmarkObservation {
    pub id: i32,
    pub x: f64,
    pub y: f64,
}
impl LandmarkObservation {
    /// A fresh, unassociated observation.
    pub fn new(x: f64, y: f64) -> Self {
        LandmarkObservation {
            id: UNASSOCIATED,
            x,
            y,
        }
    }
    pub fn with_id(id: i32, x: f64, y: f64) -> Self {
        LandmarkObservation { id, x, y }
    }
    pub fn is_associated(&self) -> bool {
        self.id != UNASSOCIATED
    }
}
impl Display for LandmarkObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LandmarkObservation(id: {}, x: {:.3}, y: {:.3})",
            self.id, self.x, self.y
        )
    }
}

/// Assign every observation the id of the nearest predicted landmark.
///
/// `predicted` and `observations` must be in the same frame. Ties go to the first candidate in
/// `predicted` order. When `predicted` is empty every observation is set to [UNASSOCIATED].
///
/// # Example
/// ```rust
/// use landmark_pf::measurements::{LandmarkObservation, data_association};
/// let predicted = vec![
///     LandmarkObservation::with_id(1, 0.0, 0.0),
///     LandmarkObservation::with_id(2, 10.0, 10.0),
/// ];
/// let mut observations = vec![LandmarkObservation::new(1.0, 1.0)];
/// data_association(&predicted, &mut observations);
/// assert_eq!(observations[0].id, 1);
/// ```
pub fn data_association(predicted: &[LandmarkObservation], observations: &mut [LandmarkObservation]) {
    for observation in observations.iter_mut() {
        let mut min_distance = f64::INFINITY;
        let mut map_id = UNASSOCIATED;
        for candidate in predicted {
            let current = distance(observation.x, observation.y, candidate.x, candidate.y);
            if current < min_distance {
                min_distance = current;
                map_id = candidate.id;
            }
        }
        observation.id = map_id;
    }
}

/// Bivariate Gaussian density with independent axes, evaluated at the offset `(dx, dy)`.
///
/// $$
/// p = \frac{1}{2\pi\sigma_x\sigma_y} \exp\left(-\left(\frac{dx^2}{2\sigma_x^2} + \frac{dy^2}{2\sigma_y^2}\right)\right)
/// $$
pub fn bivariate_gaussian_density(dx: f64, dy: f64, std_x: f64, std_y: f64) -> f64 {
    let normalizer = 1.0 / (2.0 * PI * std_x * std_y);
    let exponent = dx.powi(2) / (2.0 * std_x.powi(2)) + dy.powi(2) / (2.0 * std_y.powi(2));
    normalizer * (-exponent).exp()
}

/// Result of scoring one particle against a set of observations.
///
/// `associations`, `sense_x` and `sense_y` always have the same length and list only the
/// observations that were matched to a landmark, in observation order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParticleMeasurement {
    /// Unnormalized likelihood of the observations given the particle pose
    pub weight: f64,
    pub associations: Vec<i32>,
    pub sense_x: Vec<f64>,
    pub sense_y: Vec<f64>,
}

/// Generic measurement model trait for landmark-style sensors
///
/// A model turns a hypothesized pose plus the raw body-frame observations into a scalar likelihood
/// and the association diagnostics for that hypothesis. Implementations must be pure functions of
/// their inputs; the filter evaluates them for many particles concurrently.
pub trait MeasurementModel {
    /// Score a single pose hypothesis.
    fn evaluate(
        &self,
        pose: &Pose,
        observations: &[LandmarkObservation],
        map: &LandmarkMap,
    ) -> ParticleMeasurement;
}

/// Range-limited landmark sensor with independent Gaussian noise on the map x and y axes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LandmarkMeasurementModel {
    sensor_range: f64,
    std_landmark: [f64; 2],
}
impl Display for LandmarkMeasurementModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LandmarkMeasurementModel(range: {}, std_x: {}, std_y: {})",
            self.sensor_range, self.std_landmark[0], self.std_landmark[1]
        )
    }
}
impl LandmarkMeasurementModel {
    /// Create a model, validating the range and noise parameters.
    ///
    /// # Arguments
    /// * `sensor_range` - Maximum landmark distance from the particle (m), inclusive.
    /// * `std_landmark` - Measurement standard deviations along x and y (m). Both must be positive.
    pub fn new(sensor_range: f64, std_landmark: [f64; 2]) -> Result<Self> {
        if !(sensor_range.is_finite() && sensor_range >= 0.0) {
            return Err(FilterError::InvalidSensorRange(sensor_range));
        }
        for (name, value) in [("std_landmark_x", std_landmark[0]), ("std_landmark_y", std_landmark[1])] {
            if !(value.is_finite() && value > 0.0) {
                return Err(FilterError::DegenerateMeasurementNoise { name, value });
            }
        }
        Ok(LandmarkMeasurementModel {
            sensor_range,
            std_landmark,
        })
    }
    pub fn sensor_range(&self) -> f64 {
        self.sensor_range
    }
    pub fn std_landmark(&self) -> [f64; 2] {
        self.std_landmark
    }
    /// Landmarks within sensor range of the pose, as predicted observations in the map frame.
    pub fn predicted_landmarks(&self, pose: &Pose, map: &LandmarkMap) -> Vec<LandmarkObservation> {
        map.within_range(pose.x, pose.y, self.sensor_range)
            .map(|l| LandmarkObservation::with_id(l.id, l.x, l.y))
            .collect()
    }
}
impl MeasurementModel for LandmarkMeasurementModel {
    fn evaluate(
        &self,
        pose: &Pose,
        observations: &[LandmarkObservation],
        map: &LandmarkMap,
    ) -> ParticleMeasurement {
        let predictions = self.predicted_landmarks(pose, map);
        let mut transformed: Vec<LandmarkObservation> = observations
            .iter()
            .map(|obs| {
                let (x, y) = transform_to_map(pose, obs.x, obs.y);
                LandmarkObservation::with_id(obs.id, x, y)
            })
            .collect();
        data_association(&predictions, &mut transformed);

        let [std_x, std_y] = self.std_landmark;
        let mut measurement = ParticleMeasurement {
            weight: 1.0,
            associations: Vec::with_capacity(transformed.len()),
            sense_x: Vec::with_capacity(transformed.len()),
            sense_y: Vec::with_capacity(transformed.len()),
        };
        for obs in &transformed {
            // An empty candidate set leaves the observation unmatched, which zeroes the particle
            match predictions.iter().find(|p| p.id == obs.id) {
                Some(landmark) => {
                    measurement.weight *=
                        bivariate_gaussian_density(obs.x - landmark.x, obs.y - landmark.y, std_x, std_y);
                    measurement.associations.push(obs.id);
                    measurement.sense_x.push(obs.x);
                    measurement.sense_y.push(obs.y);
                }
                None => measurement.weight = 0.0,
            }
        }
        measurement
    }
}
