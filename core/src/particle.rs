//! Particle filter for landmark-based localization.
//!
//! A [ParticleFilter] owns one generation of [Particle]s, each a weighted pose hypothesis. The
//! filter exposes the four steps of the estimation cycle: [ParticleFilter::initialize] (once),
//! then [ParticleFilter::predict], [ParticleFilter::update_weights] and
//! [ParticleFilter::resample] per cycle. Randomness is drawn from a generator owned by the filter
//! instance, so seeded filters are fully reproducible.
//!
//! # Usage
//!
//! ```rust
//! use landmark_pf::Pose;
//! use landmark_pf::map::{Landmark, LandmarkMap};
//! use landmark_pf::measurements::LandmarkObservation;
//! use landmark_pf::particle::ParticleFilter;
//!
//! let map = LandmarkMap::new(vec![Landmark::new(1, 10.0, 0.0), Landmark::new(2, 0.0, 10.0)]).unwrap();
//! let mut pf = ParticleFilter::with_seed(100, 42).unwrap();
//! pf.initialize(Pose::new(0.0, 0.0, 0.0), [0.3, 0.3, 0.01]).unwrap();
//!
//! pf.predict(0.1, [0.3, 0.3, 0.01], 1.0, 0.0).unwrap();
//! let observations = vec![LandmarkObservation::new(9.9, 0.0), LandmarkObservation::new(-0.1, 10.0)];
//! pf.update_weights(50.0, [0.3, 0.3], &observations, &map).unwrap();
//! pf.resample().unwrap();
//!
//! let estimate = pf.get_estimate().unwrap();
//! assert!(estimate.x.abs() < 1.0);
//! ```
use crate::error::{FilterError, Result, check_std};
use crate::map::LandmarkMap;
use crate::measurements::{LandmarkMeasurementModel, LandmarkObservation, MeasurementModel};
use crate::{Pose, forward, wrap_to_pi};

use log::{debug, warn};
use nalgebra::{Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use std::fmt::{self, Debug, Display};

/// A single weighted pose hypothesis.
///
/// `id` is the particle's index within its generation and is reassigned at every resample.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particle {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub weight: f64,
    associations: Vec<i32>,
    sense_x: Vec<f64>,
    sense_y: Vec<f64>,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("id", &self.id)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("theta", &self.theta)
            .field("weight", &self.weight)
            .field("associations", &self.associations.len())
            .finish()
    }
}

/// Selects which diagnostic coordinate sequence to render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenseAxis {
    X,
    Y,
}

impl Particle {
    pub fn new(id: usize, pose: Pose, weight: f64) -> Particle {
        Particle {
            id,
            x: pose.x,
            y: pose.y,
            theta: pose.theta,
            weight,
            ..Default::default()
        }
    }
    pub fn pose(&self) -> Pose {
        Pose::new(self.x, self.y, self.theta)
    }
    /// Matched landmark ids, one per associated observation.
    pub fn associations(&self) -> &[i32] {
        &self.associations
    }
    /// Map-frame x coordinates of the associated observations.
    pub fn sense_x(&self) -> &[f64] {
        &self.sense_x
    }
    /// Map-frame y coordinates of the associated observations.
    pub fn sense_y(&self) -> &[f64] {
        &self.sense_y
    }
    /// Replace the association diagnostics. All three sequences must have the same length.
    pub fn set_associations(
        &mut self,
        associations: Vec<i32>,
        sense_x: Vec<f64>,
        sense_y: Vec<f64>,
    ) -> Result<()> {
        if associations.len() != sense_x.len() || associations.len() != sense_y.len() {
            return Err(FilterError::AssociationLengthMismatch {
                ids: associations.len(),
                sense_x: sense_x.len(),
                sense_y: sense_y.len(),
            });
        }
        self.associations = associations;
        self.sense_x = sense_x;
        self.sense_y = sense_y;
        Ok(())
    }
    /// Associated landmark ids as space-separated text. Empty associations render as `""`.
    pub fn get_associations(&self) -> String {
        join_values(self.associations.iter())
    }
    /// Sense coordinates along `axis` as space-separated text at single precision.
    pub fn get_sense_coord(&self, axis: SenseAxis) -> String {
        let values = match axis {
            SenseAxis::X => &self.sense_x,
            SenseAxis::Y => &self.sense_y,
        };
        join_values(values.iter().map(|v| *v as f32))
    }
}

fn join_values<T: Display>(values: impl Iterator<Item = T>) -> String {
    values
        .map(|v| v.to_string())
        .collect::<Vec<String>>()
        .join(" ")
}

// ============= Resampling =====================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ParticleResamplingStrategy {
    /// Low-variance resampling wheel
    #[default]
    Wheel,
    Systematic,
    Multinomial,
}

impl ParticleResamplingStrategy {
    /// Draw the indices of the next generation, one per input weight.
    ///
    /// Negative and NaN weights count as zero. Weights that overflowed to `+inf` dominate: only
    /// those particles are drawn. If no weight is positive every particle is treated as equally
    /// likely.
    pub fn sample_indices<R: Rng + ?Sized>(&self, weights: &[f64], rng: &mut R) -> Vec<usize> {
        let weights = sanitize_weights(weights);
        match self {
            ParticleResamplingStrategy::Wheel => wheel_resample(&weights, rng),
            ParticleResamplingStrategy::Systematic => systematic_resample(&weights, rng),
            ParticleResamplingStrategy::Multinomial => multinomial_resample(&weights, rng),
        }
    }
}

/// Finite, non-negative copy of `weights` that keeps their proportions.
///
/// Products of many large densities can overflow to `+inf`; those entries become 1 and every
/// finite entry 0. A finite set whose sum overflows is scaled by its maximum.
fn usable_weights(weights: &[f64]) -> Vec<f64> {
    if weights.iter().any(|&w| w == f64::INFINITY) {
        return weights
            .iter()
            .map(|&w| if w == f64::INFINITY { 1.0 } else { 0.0 })
            .collect();
    }
    let clean: Vec<f64> = weights
        .iter()
        .map(|&w| if w.is_finite() && w > 0.0 { w } else { 0.0 })
        .collect();
    if clean.iter().sum::<f64>().is_finite() {
        return clean;
    }
    let max_weight = clean.iter().copied().fold(0.0, f64::max);
    clean.iter().map(|w| w / max_weight).collect()
}

fn sanitize_weights(weights: &[f64]) -> Vec<f64> {
    let mut clean = usable_weights(weights);
    let total: f64 = clean.iter().sum();
    if !clean.is_empty() && total <= 0.0 {
        warn!(
            "all {} particle weights are zero or invalid; resampling uniformly",
            weights.len()
        );
        clean.iter_mut().for_each(|w| *w = 1.0);
    }
    clean
}

/// Resampling wheel.
///
/// Starts at a uniformly random index and advances an offset by `Uniform(0, 2 * max_weight)` per
/// draw, stepping the index around the wheel while the offset exceeds the current weight. Weights
/// must be finite and non-negative. With all-zero weights every draw returns the starting index.
pub fn wheel_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let mut indices = Vec::with_capacity(n);
    if n == 0 {
        return indices;
    }
    let mut index = rng.random_range(0..n);
    let max_weight = weights.iter().copied().fold(0.0, f64::max);
    let mut beta = 0.0;
    for _ in 0..n {
        beta += rng.random::<f64>() * 2.0 * max_weight;
        while beta > weights[index] {
            beta -= weights[index];
            index = (index + 1) % n;
        }
        indices.push(index);
    }
    indices
}

/// Systematic resampling: one uniform offset, then evenly spaced pointers through the CDF.
pub fn systematic_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let mut indices = Vec::with_capacity(n);
    if n == 0 {
        return indices;
    }
    let step = weights.iter().sum::<f64>() / n as f64;
    let mut position = rng.random::<f64>() * step;
    let mut i = 0;
    let mut cumulative = weights[0];
    for _ in 0..n {
        while position > cumulative && i < n - 1 {
            i += 1;
            cumulative += weights[i];
        }
        indices.push(i);
        position += step;
    }
    indices
}

/// Multinomial resampling: independent draws from the weight CDF.
pub fn multinomial_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let mut cdf = Vec::with_capacity(n);
    let mut total = 0.0;
    for &w in weights {
        total += w;
        cdf.push(total);
    }
    (0..n)
        .map(|_| {
            let u = rng.random::<f64>() * total;
            cdf.partition_point(|&c| c <= u).min(n - 1)
        })
        .collect()
}

// ============= Averaging ======================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ParticleAveragingStrategy {
    /// Pose of the highest-weight particle
    #[default]
    HighestWeight,
    WeightedAverage,
    UnweightedAverage,
}

impl ParticleAveragingStrategy {
    /// Point estimate and covariance of a particle population.
    fn estimate(&self, particles: &[Particle]) -> (Pose, Matrix3<f64>) {
        match self {
            ParticleAveragingStrategy::HighestWeight => {
                let pose = highest_weight(particles)
                    .map(|p| p.pose())
                    .unwrap_or_default();
                (pose, Matrix3::zeros())
            }
            ParticleAveragingStrategy::WeightedAverage => {
                let weights: Vec<f64> = particles.iter().map(|p| p.weight).collect();
                average_state(particles, &normalized(&weights))
            }
            ParticleAveragingStrategy::UnweightedAverage => {
                let uniform = vec![1.0 / particles.len() as f64; particles.len()];
                average_state(particles, &uniform)
            }
        }
    }
}

fn highest_weight(particles: &[Particle]) -> Option<&Particle> {
    particles
        .iter()
        .reduce(|best, p| if p.weight > best.weight { p } else { best })
}

/// Normalized copy of `weights`; uniform when the weights carry no mass.
fn normalized(weights: &[f64]) -> Vec<f64> {
    let weights = usable_weights(weights);
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 {
        weights.iter().map(|w| w / sum).collect()
    } else {
        vec![1.0 / weights.len() as f64; weights.len()]
    }
}

/// Weighted mean pose (circular mean for heading) and covariance. `weights` must sum to one.
fn average_state(particles: &[Particle], weights: &[f64]) -> (Pose, Matrix3<f64>) {
    let mut x = 0.0;
    let mut y = 0.0;
    let mut sin_sum = 0.0;
    let mut cos_sum = 0.0;
    for (particle, w) in particles.iter().zip(weights) {
        x += w * particle.x;
        y += w * particle.y;
        sin_sum += w * particle.theta.sin();
        cos_sum += w * particle.theta.cos();
    }
    let mean = Pose::new(x, y, sin_sum.atan2(cos_sum));
    let mut cov = Matrix3::<f64>::zeros();
    for (particle, w) in particles.iter().zip(weights) {
        let diff = Vector3::new(
            particle.x - mean.x,
            particle.y - mean.y,
            wrap_to_pi(particle.theta - mean.theta),
        );
        cov += *w * diff * diff.transpose();
    }
    (mean, cov)
}

// ============= Filter =========================================================================

/// Build a zero-or-more-spread normal distribution after validating the deviation.
fn normal(name: &'static str, mean: f64, std: f64) -> Result<Normal<f64>> {
    check_std(name, std)?;
    Normal::new(mean, std).map_err(|_| FilterError::InvalidStandardDeviation { name, value: std })
}

/// Landmark localization particle filter.
///
/// The filter exclusively owns its particle population and random number generator. Callers get
/// read-only slices or copies of the particles; every mutation goes through the cycle operations
/// or the diagnostics setters.
pub struct ParticleFilter<R: Rng = StdRng> {
    particles: Vec<Particle>,
    num_particles: usize,
    is_initialized: bool,
    resampling_strategy: ParticleResamplingStrategy,
    averaging_strategy: ParticleAveragingStrategy,
    rng: R,
}
impl<R: Rng> Debug for ParticleFilter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self
            .particles
            .iter()
            .map(|p| p.weight)
            .fold(f64::INFINITY, f64::min);
        let max_weight = self.particles.iter().map(|p| p.weight).fold(0.0, f64::max);
        let mut s = f.debug_struct("ParticleFilter");
        s.field("num_particles", &self.num_particles)
            .field("is_initialized", &self.is_initialized)
            .field("resampling_strategy", &self.resampling_strategy)
            .field("averaging_strategy", &self.averaging_strategy);
        if self.is_initialized {
            s.field("effective_particles", &self.effective_sample_size())
                .field(
                    "weight_range",
                    &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
                );
            let (mean, _) = self.averaging_strategy.estimate(&self.particles);
            s.field("estimate", &format_args!("{}", mean));
        }
        s.finish()
    }
}

impl ParticleFilter<StdRng> {
    /// Create an uninitialized filter with `num_particles` particles and a randomly seeded
    /// generator.
    pub fn new(num_particles: usize) -> Result<Self> {
        Self::with_seed(num_particles, rand::random())
    }
    /// Create an uninitialized filter with a specific random seed
    ///
    /// This is useful for reproducible tests.
    pub fn with_seed(num_particles: usize, seed: u64) -> Result<Self> {
        Self::with_rng(num_particles, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> ParticleFilter<R> {
    /// Create an uninitialized filter drawing all randomness from `rng`.
    ///
    /// # Errors
    /// Returns [FilterError::InvalidParticleCount] if `num_particles` is zero.
    pub fn with_rng(num_particles: usize, rng: R) -> Result<Self> {
        if num_particles == 0 {
            return Err(FilterError::InvalidParticleCount(num_particles));
        }
        Ok(ParticleFilter {
            particles: Vec::new(),
            num_particles,
            is_initialized: false,
            resampling_strategy: ParticleResamplingStrategy::default(),
            averaging_strategy: ParticleAveragingStrategy::default(),
            rng,
        })
    }
    pub fn with_resampling_strategy(mut self, strategy: ParticleResamplingStrategy) -> Self {
        self.resampling_strategy = strategy;
        self
    }
    pub fn with_averaging_strategy(mut self, strategy: ParticleAveragingStrategy) -> Self {
        self.averaging_strategy = strategy;
        self
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized {
            Ok(())
        } else {
            Err(FilterError::NotInitialized)
        }
    }

    /// Sample the first generation from a Gaussian prior around `pose`.
    ///
    /// Each particle draws x, y and theta independently with standard deviations `std`, gets its
    /// generation index as id and a weight of one.
    ///
    /// # Errors
    /// [FilterError::AlreadyInitialized] on a second call, or an invalid standard deviation.
    pub fn initialize(&mut self, pose: Pose, std: [f64; 3]) -> Result<()> {
        if self.is_initialized {
            return Err(FilterError::AlreadyInitialized);
        }
        let dist_x = normal("std_x", pose.x, std[0])?;
        let dist_y = normal("std_y", pose.y, std[1])?;
        let dist_theta = normal("std_theta", pose.theta, std[2])?;
        let mut particles = Vec::with_capacity(self.num_particles);
        for id in 0..self.num_particles {
            let sample = Pose::new(
                dist_x.sample(&mut self.rng),
                dist_y.sample(&mut self.rng),
                dist_theta.sample(&mut self.rng),
            );
            particles.push(Particle::new(id, sample, 1.0));
        }
        self.particles = particles;
        self.is_initialized = true;
        debug!(
            "initialized {} particles around {} with std {:?}",
            self.num_particles, pose, std
        );
        Ok(())
    }

    /// Propagate every particle through the motion model and add process noise.
    ///
    /// # Arguments
    /// * `delta_t` - Time step in seconds, must be positive.
    /// * `std_pos` - Process noise standard deviations for x, y and theta.
    /// * `velocity` - Forward velocity (m/s).
    /// * `yaw_rate` - Yaw rate (rad/s).
    pub fn predict(
        &mut self,
        delta_t: f64,
        std_pos: [f64; 3],
        velocity: f64,
        yaw_rate: f64,
    ) -> Result<()> {
        self.ensure_initialized()?;
        if !(delta_t.is_finite() && delta_t > 0.0) {
            return Err(FilterError::InvalidTimeStep(delta_t));
        }
        let noise_x = normal("std_pos_x", 0.0, std_pos[0])?;
        let noise_y = normal("std_pos_y", 0.0, std_pos[1])?;
        let noise_theta = normal("std_pos_theta", 0.0, std_pos[2])?;
        for particle in self.particles.iter_mut() {
            let mut pose = particle.pose();
            forward(&mut pose, velocity, yaw_rate, delta_t);
            particle.x = pose.x + noise_x.sample(&mut self.rng);
            particle.y = pose.y + noise_y.sample(&mut self.rng);
            particle.theta = pose.theta + noise_theta.sample(&mut self.rng);
        }
        debug!(
            "predicted {} particles: dt={}, v={}, yaw_rate={}",
            self.particles.len(),
            delta_t,
            velocity,
            yaw_rate
        );
        Ok(())
    }

    /// Weight every particle by the likelihood of `observations` on `map`.
    ///
    /// Observations are body-frame detections; each particle transforms them with its own pose,
    /// associates them to landmarks within `sensor_range` and multiplies bivariate Gaussian
    /// densities with deviations `std_landmark`. Association diagnostics are overwritten.
    pub fn update_weights(
        &mut self,
        sensor_range: f64,
        std_landmark: [f64; 2],
        observations: &[LandmarkObservation],
        map: &LandmarkMap,
    ) -> Result<()> {
        self.ensure_initialized()?;
        let model = LandmarkMeasurementModel::new(sensor_range, std_landmark)?;
        self.update_with(&model, observations, map)
    }

    /// Weight every particle with an arbitrary [MeasurementModel].
    ///
    /// Particles are scored in parallel; the model must not depend on evaluation order.
    pub fn update_with<M: MeasurementModel + Sync + ?Sized>(
        &mut self,
        model: &M,
        observations: &[LandmarkObservation],
        map: &LandmarkMap,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.particles.par_iter_mut().for_each(|particle| {
            let measurement = model.evaluate(&particle.pose(), observations, map);
            particle.weight = measurement.weight;
            particle.associations = measurement.associations;
            particle.sense_x = measurement.sense_x;
            particle.sense_y = measurement.sense_y;
        });
        let zero_weights = self.particles.iter().filter(|p| p.weight == 0.0).count();
        if zero_weights == self.particles.len() && !observations.is_empty() {
            warn!(
                "no particle explains the {} observations; all weights are zero",
                observations.len()
            );
        }
        debug!(
            "updated weights from {} observations ({} particles at zero weight)",
            observations.len(),
            zero_weights
        );
        Ok(())
    }

    /// Replace the population with `num_particles` weighted draws from the current one.
    ///
    /// Selected particles are value copies (weight and diagnostics included) with ids reassigned
    /// to their new index.
    pub fn resample(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        let weights = self.weights();
        let indices = self
            .resampling_strategy
            .sample_indices(&weights, &mut self.rng);
        let resampled: Vec<Particle> = indices
            .iter()
            .enumerate()
            .map(|(id, &i)| {
                let mut particle = self.particles[i].clone();
                particle.id = id;
                particle
            })
            .collect();
        self.particles = resampled;
        debug!(
            "resampled {} particles ({:?})",
            self.particles.len(),
            self.resampling_strategy
        );
        Ok(())
    }

    /// Set association diagnostics on the particle at `index`.
    pub fn set_associations(
        &mut self,
        index: usize,
        associations: Vec<i32>,
        sense_x: Vec<f64>,
        sense_y: Vec<f64>,
    ) -> Result<()> {
        let len = self.particles.len();
        self.particles
            .get_mut(index)
            .ok_or(FilterError::ParticleIndexOutOfRange { index, len })?
            .set_associations(associations, sense_x, sense_y)
    }

    /// Overwrite particle weights, e.g. to import externally computed likelihoods.
    pub fn set_weights(&mut self, weights: &[f64]) -> Result<()> {
        self.ensure_initialized()?;
        if weights.len() != self.particles.len() {
            return Err(FilterError::WeightCountMismatch {
                expected: self.particles.len(),
                got: weights.len(),
            });
        }
        for (particle, &w) in self.particles.iter_mut().zip(weights.iter()) {
            particle.weight = w;
        }
        Ok(())
    }
    /// Scale weights to sum to one; uniform when they carry no mass.
    pub fn normalize_weights(&mut self) {
        let weights = normalized(&self.weights());
        for (particle, w) in self.particles.iter_mut().zip(weights) {
            particle.weight = w;
        }
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    pub fn num_particles(&self) -> usize {
        self.num_particles
    }
    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }
    pub fn resampling_strategy(&self) -> ParticleResamplingStrategy {
        self.resampling_strategy
    }
    pub fn averaging_strategy(&self) -> ParticleAveragingStrategy {
        self.averaging_strategy
    }
    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }
    /// Highest-weight particle; the first one wins ties.
    pub fn best_particle(&self) -> Option<&Particle> {
        highest_weight(&self.particles)
    }
    /// Effective sample size of the normalized weights, `1 / sum(w_i^2)`.
    ///
    /// Zero when the weights carry no mass.
    pub fn effective_sample_size(&self) -> f64 {
        let weights = usable_weights(&self.weights());
        let sum: f64 = weights.iter().sum();
        if sum <= 0.0 {
            return 0.0;
        }
        let sum_of_squares: f64 = weights.iter().map(|w| (w / sum).powi(2)).sum();
        1.0 / sum_of_squares
    }
    /// Point estimate of the vehicle pose according to the averaging strategy.
    pub fn get_estimate(&self) -> Result<Pose> {
        self.ensure_initialized()?;
        Ok(self.averaging_strategy.estimate(&self.particles).0)
    }
    /// Pose covariance (x, y, theta) according to the averaging strategy.
    ///
    /// The highest-weight strategy reports a zero matrix.
    pub fn get_certainty(&self) -> Result<Matrix3<f64>> {
        self.ensure_initialized()?;
        Ok(self.averaging_strategy.estimate(&self.particles).1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Landmark;
    use assert_approx_eq::assert_approx_eq;

    fn initialized(num_particles: usize, pose: Pose, std: [f64; 3]) -> ParticleFilter {
        let mut pf = ParticleFilter::with_seed(num_particles, 7).unwrap();
        pf.initialize(pose, std).unwrap();
        pf
    }

    #[test]
    fn test_zero_particles_rejected() {
        assert!(matches!(
            ParticleFilter::with_seed(0, 1),
            Err(FilterError::InvalidParticleCount(0))
        ));
    }
    #[test]
    fn test_initialize() {
        let pf = initialized(500, Pose::new(4.0, -2.0, 0.5), [0.3, 0.3, 0.01]);
        assert!(pf.is_initialized());
        assert_eq!(pf.particles().len(), 500);
        for (i, particle) in pf.particles().iter().enumerate() {
            assert_eq!(particle.id, i);
            assert_eq!(particle.weight, 1.0);
        }
        let mean_x = pf.particles().iter().map(|p| p.x).sum::<f64>() / 500.0;
        let mean_theta = pf.particles().iter().map(|p| p.theta).sum::<f64>() / 500.0;
        assert_approx_eq!(mean_x, 4.0, 0.1);
        assert_approx_eq!(mean_theta, 0.5, 0.01);
    }
    #[test]
    fn test_initialize_twice() {
        let mut pf = initialized(10, Pose::default(), [0.0; 3]);
        assert!(matches!(
            pf.initialize(Pose::default(), [0.0; 3]),
            Err(FilterError::AlreadyInitialized)
        ));
    }
    #[test]
    fn test_initialize_rejects_negative_std() {
        let mut pf = ParticleFilter::with_seed(10, 1).unwrap();
        assert!(matches!(
            pf.initialize(Pose::default(), [0.1, -0.1, 0.1]),
            Err(FilterError::InvalidStandardDeviation { name: "std_y", .. })
        ));
        assert!(!pf.is_initialized());
    }
    #[test]
    fn test_operations_require_initialization() {
        let map = LandmarkMap::default();
        let mut pf = ParticleFilter::with_seed(10, 1).unwrap();
        assert!(matches!(
            pf.predict(0.1, [0.0; 3], 1.0, 0.0),
            Err(FilterError::NotInitialized)
        ));
        assert!(matches!(
            pf.update_weights(50.0, [0.3, 0.3], &[], &map),
            Err(FilterError::NotInitialized)
        ));
        assert!(matches!(pf.resample(), Err(FilterError::NotInitialized)));
        assert!(matches!(pf.get_estimate(), Err(FilterError::NotInitialized)));
    }
    #[test]
    fn test_predict_rejects_bad_time_step() {
        let mut pf = initialized(10, Pose::default(), [0.0; 3]);
        assert!(matches!(
            pf.predict(0.0, [0.0; 3], 1.0, 0.0),
            Err(FilterError::InvalidTimeStep(_))
        ));
        assert!(matches!(
            pf.predict(-1.0, [0.0; 3], 1.0, 0.0),
            Err(FilterError::InvalidTimeStep(_))
        ));
    }
    #[test]
    fn test_predict_straight_line_without_noise() {
        let mut pf = initialized(5, Pose::new(0.0, 0.0, 0.0), [0.0; 3]);
        pf.predict(1.0, [0.0; 3], 10.0, 0.0).unwrap();
        for particle in pf.particles() {
            assert_eq!(particle.pose(), Pose::new(10.0, 0.0, 0.0));
        }
    }
    #[test]
    fn test_predict_turning_without_noise() {
        let mut pf = initialized(5, Pose::new(0.0, 0.0, 0.0), [0.0; 3]);
        pf.predict(1.0, [0.0; 3], 10.0, 0.1).unwrap();
        for particle in pf.particles() {
            assert_approx_eq!(particle.x, 100.0 * 0.1f64.sin(), 1e-12);
            assert_approx_eq!(particle.y, 100.0 * (1.0 - 0.1f64.cos()), 1e-12);
            assert_approx_eq!(particle.theta, 0.1, 1e-12);
        }
    }
    #[test]
    fn test_predict_noise_is_per_particle() {
        let mut pf = initialized(50, Pose::default(), [0.0; 3]);
        pf.predict(1.0, [0.5, 0.5, 0.05], 1.0, 0.0).unwrap();
        let first = pf.particles()[0].pose();
        assert!(pf.particles().iter().skip(1).any(|p| p.pose() != first));
    }
    #[test]
    fn test_update_weights_prefers_consistent_particles() {
        let map = LandmarkMap::new(vec![Landmark::new(1, 5.0, 0.0), Landmark::new(2, 0.0, 5.0)]).unwrap();
        let mut pf = initialized(2, Pose::default(), [0.0; 3]);
        // Move particle 1 off the true pose
        pf.particles[1].x = 0.5;
        let observations = vec![LandmarkObservation::new(5.0, 0.0), LandmarkObservation::new(0.0, 5.0)];
        pf.update_weights(50.0, [0.3, 0.3], &observations, &map).unwrap();
        let weights = pf.weights();
        assert!(weights.iter().all(|&w| w >= 0.0));
        assert!(weights[0] > weights[1]);
        assert_eq!(pf.best_particle().unwrap().id, 0);
        assert_eq!(pf.particles()[0].associations(), &[1, 2]);
        assert_eq!(pf.particles()[0].get_associations(), "1 2");
        assert_eq!(pf.particles()[0].get_sense_coord(SenseAxis::X), "5 0");
        assert_eq!(pf.particles()[0].get_sense_coord(SenseAxis::Y), "0 5");
    }
    #[test]
    fn test_update_weights_overwrites_associations() {
        let map = LandmarkMap::new(vec![Landmark::new(1, 5.0, 0.0)]).unwrap();
        let mut pf = initialized(3, Pose::default(), [0.0; 3]);
        let observations = vec![LandmarkObservation::new(5.0, 0.0)];
        pf.update_weights(50.0, [0.3, 0.3], &observations, &map).unwrap();
        pf.update_weights(50.0, [0.3, 0.3], &observations, &map).unwrap();
        for particle in pf.particles() {
            assert_eq!(particle.associations().len(), 1);
            assert_eq!(particle.sense_x().len(), 1);
            assert_eq!(particle.sense_y().len(), 1);
        }
    }
    #[test]
    fn test_update_weights_without_landmarks_in_range() {
        let map = LandmarkMap::new(vec![Landmark::new(1, 500.0, 0.0)]).unwrap();
        let mut pf = initialized(4, Pose::default(), [0.0; 3]);
        pf.update_weights(50.0, [0.3, 0.3], &[LandmarkObservation::new(1.0, 0.0)], &map)
            .unwrap();
        assert!(pf.weights().iter().all(|&w| w == 0.0));
        // The degenerate population still resamples to full size
        pf.resample().unwrap();
        assert_eq!(pf.particles().len(), 4);
    }
    #[test]
    fn test_update_weights_rejects_bad_inputs() {
        let map = LandmarkMap::default();
        let mut pf = initialized(4, Pose::default(), [0.0; 3]);
        assert!(matches!(
            pf.update_weights(-1.0, [0.3, 0.3], &[], &map),
            Err(FilterError::InvalidSensorRange(_))
        ));
        assert!(pf.update_weights(10.0, [0.3, 0.0], &[], &map).is_err());
    }
    #[test]
    fn test_resample_keeps_count_and_reassigns_ids() {
        let mut pf = initialized(100, Pose::default(), [1.0, 1.0, 0.1]);
        let weights: Vec<f64> = (0..100).map(|i| i as f64).collect();
        pf.set_weights(&weights).unwrap();
        pf.resample().unwrap();
        assert_eq!(pf.particles().len(), 100);
        for (i, particle) in pf.particles().iter().enumerate() {
            assert_eq!(particle.id, i);
        }
        // The zero-weight particle can never be selected
        assert!(pf.particles().iter().all(|p| p.weight > 0.0));
    }
    #[test]
    fn test_wheel_converges_to_weight_ratio() {
        let mut rng = StdRng::seed_from_u64(1234);
        let weights = [0.1, 0.9];
        let mut heavy = 0usize;
        let rounds = 5000;
        for _ in 0..rounds {
            let indices = wheel_resample(&weights, &mut rng);
            assert_eq!(indices.len(), 2);
            heavy += indices.iter().filter(|&&i| i == 1).count();
        }
        let ratio = heavy as f64 / (2 * rounds) as f64;
        assert_approx_eq!(ratio, 0.9, 0.03);
    }
    #[test]
    fn test_strategies_follow_weights() {
        let weights = [0.05, 0.15, 0.8];
        for strategy in [
            ParticleResamplingStrategy::Wheel,
            ParticleResamplingStrategy::Systematic,
            ParticleResamplingStrategy::Multinomial,
        ] {
            let mut rng = StdRng::seed_from_u64(99);
            let mut counts = [0usize; 3];
            for _ in 0..3000 {
                for i in strategy.sample_indices(&weights, &mut rng) {
                    counts[i] += 1;
                }
            }
            let heavy = counts[2] as f64 / 9000.0;
            assert!((heavy - 0.8).abs() < 0.04, "{:?}: {}", strategy, heavy);
        }
    }
    #[test]
    fn test_wheel_with_zero_weights_collapses_to_start() {
        let mut rng = StdRng::seed_from_u64(5);
        let indices = wheel_resample(&[0.0; 6], &mut rng);
        assert_eq!(indices.len(), 6);
        assert!(indices.iter().all(|&i| i == indices[0]));
    }
    #[test]
    fn test_zero_weights_resample_uniformly() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut counts = [0usize; 4];
        for _ in 0..2000 {
            for i in ParticleResamplingStrategy::Wheel.sample_indices(&[0.0; 4], &mut rng) {
                counts[i] += 1;
            }
        }
        for count in counts {
            assert_approx_eq!(count as f64 / 8000.0, 0.25, 0.03);
        }
        // NaN and negative weights carry no mass either
        let mut counts = [0usize; 4];
        for _ in 0..2000 {
            for i in ParticleResamplingStrategy::Wheel
                .sample_indices(&[f64::NAN, -1.0, 0.0, f64::NEG_INFINITY], &mut rng)
            {
                counts[i] += 1;
            }
        }
        for count in counts {
            assert_approx_eq!(count as f64 / 8000.0, 0.25, 0.03);
        }
    }
    #[test]
    fn test_empty_associations_render_empty() {
        let particle = Particle::default();
        assert_eq!(particle.get_associations(), "");
        assert_eq!(particle.get_sense_coord(SenseAxis::X), "");
        assert_eq!(particle.get_sense_coord(SenseAxis::Y), "");
    }
    #[test]
    fn test_set_associations() {
        let mut pf = initialized(3, Pose::default(), [0.0; 3]);
        pf.set_associations(2, vec![4, 9], vec![1.5, -2.25], vec![0.125, 3.0])
            .unwrap();
        let particle = &pf.particles()[2];
        assert_eq!(particle.get_associations(), "4 9");
        assert_eq!(particle.get_sense_coord(SenseAxis::X), "1.5 -2.25");
        assert_eq!(particle.get_sense_coord(SenseAxis::Y), "0.125 3");
        assert!(matches!(
            pf.set_associations(0, vec![1], vec![1.0, 2.0], vec![1.0]),
            Err(FilterError::AssociationLengthMismatch { ids: 1, sense_x: 2, sense_y: 1 })
        ));
        assert!(matches!(
            pf.set_associations(3, vec![], vec![], vec![]),
            Err(FilterError::ParticleIndexOutOfRange { index: 3, len: 3 })
        ));
    }
    #[test]
    fn test_estimates() {
        let mut pf = initialized(3, Pose::default(), [0.0; 3]);
        pf.particles[0].x = 1.0;
        pf.particles[1].x = 3.0;
        pf.particles[2].x = 8.0;
        pf.set_weights(&[1.0, 3.0, 0.0]).unwrap();
        assert_eq!(pf.get_estimate().unwrap().x, 3.0);
        assert_eq!(pf.get_certainty().unwrap(), Matrix3::zeros());

        let pf = pf.with_averaging_strategy(ParticleAveragingStrategy::WeightedAverage);
        let estimate = pf.get_estimate().unwrap();
        assert_approx_eq!(estimate.x, 2.5, 1e-12);
        assert_approx_eq!(pf.get_certainty().unwrap()[(0, 0)], 0.75, 1e-12);

        let pf = pf.with_averaging_strategy(ParticleAveragingStrategy::UnweightedAverage);
        assert_approx_eq!(pf.get_estimate().unwrap().x, 4.0, 1e-12);
    }
    #[test]
    fn test_heading_average_is_circular() {
        let mut pf = initialized(2, Pose::default(), [0.0; 3])
            .with_averaging_strategy(ParticleAveragingStrategy::UnweightedAverage);
        pf.particles[0].theta = std::f64::consts::PI - 0.1;
        pf.particles[1].theta = -std::f64::consts::PI + 0.1;
        let theta = pf.get_estimate().unwrap().theta;
        assert_approx_eq!(theta.abs(), std::f64::consts::PI, 1e-9);
    }
    #[test]
    fn test_effective_sample_size() {
        let mut pf = initialized(4, Pose::default(), [0.0; 3]);
        assert_approx_eq!(pf.effective_sample_size(), 4.0, 1e-12);
        pf.set_weights(&[0.0, 0.0, 5.0, 0.0]).unwrap();
        assert_approx_eq!(pf.effective_sample_size(), 1.0, 1e-12);
        pf.set_weights(&[0.0; 4]).unwrap();
        assert_eq!(pf.effective_sample_size(), 0.0);
        pf.normalize_weights();
        assert!(pf.weights().iter().all(|&w| w == 0.25));
        pf.set_weights(&[f64::INFINITY, 0.0, f64::INFINITY, 3.0]).unwrap();
        assert_approx_eq!(pf.effective_sample_size(), 2.0, 1e-12);
        pf.normalize_weights();
        assert_eq!(pf.weights(), vec![0.5, 0.0, 0.5, 0.0]);
        assert!(matches!(
            pf.set_weights(&[1.0]),
            Err(FilterError::WeightCountMismatch { expected: 4, got: 1 })
        ));
    }
    #[test]
    fn test_overflowed_weights_dominate_resampling() {
        let mut rng = StdRng::seed_from_u64(8);
        for strategy in [
            ParticleResamplingStrategy::Wheel,
            ParticleResamplingStrategy::Systematic,
            ParticleResamplingStrategy::Multinomial,
        ] {
            for _ in 0..50 {
                let indices = strategy.sample_indices(&[f64::INFINITY, 0.0], &mut rng);
                assert_eq!(indices, vec![0, 0]);
                let indices = strategy.sample_indices(&[2.0, f64::INFINITY, 5.0], &mut rng);
                assert_eq!(indices, vec![1, 1, 1]);
            }
        }
        // Finite weights whose sum overflows keep their proportions
        for _ in 0..50 {
            let indices = ParticleResamplingStrategy::Multinomial
                .sample_indices(&[f64::MAX, 0.0, f64::MAX], &mut rng);
            assert_eq!(indices.len(), 3);
            assert!(!indices.contains(&1));
        }
    }
    #[test]
    fn test_precise_observations_keep_consistent_particle() {
        // Many exact matches with a tight sensor overflow the density product
        let mut landmarks = Vec::new();
        for i in 0..12 {
            for j in 0..10 {
                landmarks.push(Landmark::new(10 * i + j, i as f64, j as f64));
            }
        }
        let map = LandmarkMap::new(landmarks).unwrap();
        let truth = Pose::new(5.0, 4.0, 0.3);
        let observations: Vec<LandmarkObservation> = map
            .landmarks()
            .iter()
            .map(|l| {
                let (x, y) = crate::transform_to_body(&truth, l.x, l.y);
                LandmarkObservation::new(x, y)
            })
            .collect();
        let mut pf = initialized(2, truth, [0.0; 3]);
        pf.particles[1].x += 0.5;
        pf.particles[1].y += 0.5;
        let perfect_x = pf.particles[0].x;
        pf.update_weights(50.0, [0.01, 0.01], &observations, &map)
            .unwrap();
        assert_eq!(pf.weights(), vec![f64::INFINITY, 0.0]);
        for _ in 0..100 {
            pf.resample().unwrap();
            assert!(pf.particles().iter().all(|p| p.x == perfect_x));
        }
    }
    #[test]
    fn test_seeded_filters_are_reproducible() {
        let run = || {
            let mut pf = initialized(20, Pose::new(1.0, 2.0, 0.3), [0.3, 0.3, 0.01]);
            pf.predict(0.1, [0.3, 0.3, 0.01], 5.0, 0.2).unwrap();
            pf.resample().unwrap();
            pf.particles().iter().map(|p| p.pose()).collect::<Vec<Pose>>()
        };
        assert_eq!(run(), run());
    }
}
