//! Static landmark map.
//!
//! The map is a finite set of point landmarks with unique integer ids, expressed in the map frame.
//! It is built once (from a list or a CSV file) and never mutated while filtering.
use crate::distance;
use crate::error::{FilterError, Result};

use serde::{Deserialize, Serialize};

use std::collections::HashSet;
use std::fmt::{self, Display};
use std::path::Path;

/// A single map landmark.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub id: i32,
    /// Map-frame x coordinate (m)
    pub x: f64,
    /// Map-frame y coordinate (m)
    pub y: f64,
}
impl Landmark {
    pub fn new(id: i32, x: f64, y: f64) -> Self {
        Landmark { id, x, y }
    }
}
impl Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Landmark {{ id: {}, x: {:.3}, y: {:.3} }}", self.id, self.x, self.y)
    }
}

/// Immutable collection of landmarks with unique ids.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LandmarkMap {
    landmarks: Vec<Landmark>,
}
impl LandmarkMap {
    /// Build a map from a list of landmarks, rejecting duplicate ids.
    pub fn new(landmarks: Vec<Landmark>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(landmarks.len());
        for landmark in &landmarks {
            if !seen.insert(landmark.id) {
                return Err(FilterError::DuplicateLandmark(landmark.id));
            }
        }
        Ok(LandmarkMap { landmarks })
    }
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
    pub fn get(&self, id: i32) -> Option<&Landmark> {
        self.landmarks.iter().find(|l| l.id == id)
    }
    /// Landmarks whose distance from `(x, y)` is at most `range`, in map order.
    pub fn within_range(&self, x: f64, y: f64, range: f64) -> impl Iterator<Item = &Landmark> {
        self.landmarks
            .iter()
            .filter(move |l| distance(l.x, l.y, x, y) <= range)
    }
    /// Reads a landmark map from a CSV file with an `id,x,y` header.
    ///
    /// # Arguments
    /// * `path` - Path to the CSV file to read.
    ///
    /// # Returns
    /// * `Ok(LandmarkMap)` if the file parses and every id is unique.
    /// * `Err` if the file cannot be read or parsed, or an id repeats.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut landmarks = Vec::new();
        for result in rdr.deserialize() {
            let landmark: Landmark = result?;
            landmarks.push(landmark);
        }
        LandmarkMap::new(landmarks)
    }
    /// Writes the map to a CSV file with an `id,x,y` header.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for landmark in &self.landmarks {
            writer.serialize(landmark)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> LandmarkMap {
        LandmarkMap::new(vec![
            Landmark::new(1, 0.0, 0.0),
            Landmark::new(2, 10.0, 0.0),
            Landmark::new(3, 0.0, 20.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = LandmarkMap::new(vec![Landmark::new(7, 0.0, 0.0), Landmark::new(7, 1.0, 1.0)]);
        assert!(matches!(result, Err(FilterError::DuplicateLandmark(7))));
    }
    #[test]
    fn test_within_range_is_inclusive() {
        let map = sample_map();
        let ids: Vec<i32> = map.within_range(0.0, 0.0, 10.0).map(|l| l.id).collect();
        assert_eq!(ids, vec![1, 2]);
        let ids: Vec<i32> = map.within_range(0.0, 0.0, 9.99).map(|l| l.id).collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(map.within_range(100.0, 100.0, 5.0).count(), 0);
    }
    #[test]
    fn test_get() {
        let map = sample_map();
        assert_eq!(map.get(3), Some(&Landmark::new(3, 0.0, 20.0)));
        assert_eq!(map.get(42), None);
        assert_eq!(map.len(), 3);
        assert!(!map.is_empty());
    }
    #[test]
    fn test_csv_round_trip() {
        let map = sample_map();
        let temp_file = std::env::temp_dir().join("landmark_map_round_trip.csv");
        map.to_csv(&temp_file).unwrap();
        let loaded = LandmarkMap::from_csv(&temp_file).unwrap();
        assert_eq!(loaded, map);
        let _ = std::fs::remove_file(&temp_file);
    }
}
