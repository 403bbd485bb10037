//! Landmark-based particle filter for 2-D vehicle localization
//!
//! This crate implements the estimation loop of a sequential Monte Carlo (particle) filter that
//! localizes a vehicle on a known, static landmark map. The filter maintains a weighted population
//! of pose hypotheses ("particles") and refines it every cycle from two noisy inputs: a motion
//! control (forward velocity and yaw rate) and a set of landmark observations expressed in the
//! vehicle's own body frame. It does not read sensors or build maps; those are left to the caller.
//! The landmark map and observations are assumed to be supplied by some external driver, such as
//! the simulation harness in [sim].
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the rigid-body transforms and the small
//!   matrices used for pose covariance.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr):
//!   Provide the random number generation for the prior, process noise and resampling.
//! - [`rayon`](https://crates.io/crates/rayon): Spreads the per-particle measurement update over a
//!   worker pool.
//!
//! ## Crate overview
//!
//! - [error]: The error taxonomy shared by every fallible operation.
//! - [map]: The landmark map (`id`, `x`, `y` in the map frame) and its range queries.
//! - [measurements]: Landmark observations, nearest-neighbor data association and the
//!   bivariate Gaussian measurement likelihood.
//! - [particle]: Particles, resampling and averaging strategies, and the [particle::ParticleFilter]
//!   itself.
//! - [config]: Serializable filter and simulation configuration.
//! - [sim]: Synthetic scenario generation and closed-loop runs for testing the filter.
//!
//! ## Estimation cycle
//!
//! After a single call to [particle::ParticleFilter::initialize], each cycle runs:
//!
//! 1. **Prediction**: every particle is moved by [forward] using the control input, then
//!    perturbed with zero-mean Gaussian process noise.
//! 2. **Data association**: for every particle the body-frame observations are moved into
//!    the map frame using that particle's own pose and matched to the nearest landmark within
//!    sensor range.
//! 3. **Weight update**: the particle weight becomes the product of bivariate Gaussian densities
//!    of each observation's offset from its matched landmark.
//! 4. **Resampling**: a new generation of the same size is drawn with replacement in proportion
//!    to weight using the resampling wheel.
//!
//! ## Motion model
//!
//! The state of a single hypothesis is the planar pose $x = [p_x, p_y, \theta]$. Given the forward
//! velocity $v$, yaw rate $\omega$ and time step $t$, the constant turn rate and velocity (CTRV)
//! model is:
//!
//! $$
//! p_x(+) = p_x(-) + \frac{v}{\omega} \left( \sin(\theta + \omega t) - \sin\theta \right)
//! $$
//!
//! $$
//! p_y(+) = p_y(-) + \frac{v}{\omega} \left( \cos\theta - \cos(\theta + \omega t) \right)
//! $$
//!
//! $$
//! \theta(+) = \theta(-) + \omega t
//! $$
//!
//! When $|\omega|$ falls below [YAW_RATE_THRESHOLD] the vehicle is treated as driving straight:
//! $p_x(+) = p_x(-) + v t \cos\theta$, $p_y(+) = p_y(-) + v t \sin\theta$ and $\theta$ is unchanged.
//!
//! Headings are never forcibly wrapped by the filter; [wrap_to_pi] is available for display and
//! error metrics.
pub mod config;
pub mod error;
pub mod map;
pub mod measurements;
pub mod particle;
pub mod sim;

use nalgebra::{Isometry2, Point2, Vector2};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};

pub use crate::error::{FilterError, Result};

/// Yaw rates with a smaller magnitude than this are integrated as straight-line motion.
pub const YAW_RATE_THRESHOLD: f64 = 1e-5;

/// Planar vehicle pose in the map frame.
///
/// `theta` is the heading in radians measured counter-clockwise from the map x-axis. It is not
/// required to lie in any particular range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position along the map x-axis (m)
    pub x: f64,
    /// Position along the map y-axis (m)
    pub y: f64,
    /// Heading (rad)
    pub theta: f64,
}
impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose {{ x: {:.4}, y: {:.4}, theta: {:.4} }}",
            self.x, self.y, self.theta
        )
    }
}
impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose { x, y, theta }
    }
    /// Rigid-body transform taking body-frame points into the map frame.
    pub fn to_isometry(&self) -> Isometry2<f64> {
        Isometry2::new(Vector2::new(self.x, self.y), self.theta)
    }
}
impl From<[f64; 3]> for Pose {
    fn from(values: [f64; 3]) -> Self {
        Pose::new(values[0], values[1], values[2])
    }
}
impl From<Pose> for [f64; 3] {
    fn from(pose: Pose) -> Self {
        [pose.x, pose.y, pose.theta]
    }
}

/// Motion control input for a single prediction step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlInput {
    /// Forward velocity (m/s)
    pub velocity: f64,
    /// Yaw rate (rad/s)
    pub yaw_rate: f64,
}
impl Display for ControlInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ControlInput {{ velocity: {:.4}, yaw_rate: {:.4} }}",
            self.velocity, self.yaw_rate
        )
    }
}

/// Deterministic constant turn rate and velocity update of a pose.
///
/// Applies the CTRV equations from the crate documentation to `pose` in place. No noise is added
/// here; see [particle::ParticleFilter::predict] for the stochastic version.
///
/// # Arguments
/// * `pose` - The pose to propagate.
/// * `velocity` - Forward velocity in m/s.
/// * `yaw_rate` - Yaw rate in rad/s.
/// * `dt` - Time step in seconds.
///
/// # Example
/// ```rust
/// use landmark_pf::{Pose, forward};
/// let mut pose = Pose::new(0.0, 0.0, 0.0);
/// forward(&mut pose, 10.0, 0.0, 1.0);
/// assert_eq!(pose, Pose::new(10.0, 0.0, 0.0));
/// ```
pub fn forward(pose: &mut Pose, velocity: f64, yaw_rate: f64, dt: f64) {
    let theta = pose.theta;
    if yaw_rate.abs() < YAW_RATE_THRESHOLD {
        pose.x += velocity * dt * theta.cos();
        pose.y += velocity * dt * theta.sin();
    } else {
        let radius = velocity / yaw_rate;
        let theta_1 = theta + yaw_rate * dt;
        pose.x += radius * (theta_1.sin() - theta.sin());
        pose.y += radius * (theta.cos() - theta_1.cos());
        pose.theta = theta_1;
    }
}

/// Euclidean distance between two points in the plane.
pub fn distance(x_1: f64, y_1: f64, x_2: f64, y_2: f64) -> f64 {
    (x_2 - x_1).hypot(y_2 - y_1)
}

/// Transform a body-frame point into the map frame using `pose` as the vehicle pose.
///
/// Equivalent to
/// $x_m = \cos\theta \, x_b - \sin\theta \, y_b + p_x$ and
/// $y_m = \sin\theta \, x_b + \cos\theta \, y_b + p_y$.
///
/// # Example
/// ```rust
/// use landmark_pf::{Pose, transform_to_map};
/// let pose = Pose::new(4.0, 5.0, -std::f64::consts::FRAC_PI_2);
/// let (x, y) = transform_to_map(&pose, 2.0, 2.0);
/// assert!((x - 6.0).abs() < 1e-12);
/// assert!((y - 3.0).abs() < 1e-12);
/// ```
pub fn transform_to_map(pose: &Pose, x: f64, y: f64) -> (f64, f64) {
    let point = pose.to_isometry().transform_point(&Point2::new(x, y));
    (point.x, point.y)
}

/// Transform a map-frame point into the body frame of a vehicle at `pose`.
///
/// This is the inverse of [transform_to_map].
pub fn transform_to_body(pose: &Pose, x: f64, y: f64) -> (f64, f64) {
    let point = pose
        .to_isometry()
        .inverse_transform_point(&Point2::new(x, y));
    (point.x, point.y)
}

/// Wrap an angle to the range $\pm\pi$ radians
///
/// This function is generic and can be used with any type that implements the necessary traits.
///
/// # Arguments
/// * `angle` - The angle to be wrapped.
/// # Returns
/// * The wrapped angle, which will be in the range -π to π radians.
/// # Example
/// ```rust
/// use landmark_pf::wrap_to_pi;
/// use std::f64::consts::PI;
/// let angle = 3.0 * PI / 2.0;
/// let wrapped_angle = wrap_to_pi(angle);
/// assert_eq!(wrapped_angle, -PI / 2.0);
/// ```
pub fn wrap_to_pi<T>(angle: T) -> T
where
    T: PartialOrd + Copy + std::ops::SubAssign + std::ops::AddAssign + From<f64>,
{
    let mut wrapped: T = angle;
    while wrapped > T::from(std::f64::consts::PI) {
        wrapped -= T::from(2.0 * std::f64::consts::PI);
    }
    while wrapped < T::from(-std::f64::consts::PI) {
        wrapped += T::from(2.0 * std::f64::consts::PI);
    }
    wrapped
}
