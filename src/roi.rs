// Region-of-interest collection
//
// Points arrive one at a time from the operator. Every second point closes a
// region with the point before it; there is no separate confirmation step.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::motion::LogicalPosition;

/// A captured corner position
pub type RoiPoint = LogicalPosition;

/// Two opposite corners of a rectangular volume, in capture order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiRegion {
    pub first: RoiPoint,
    pub second: RoiPoint,
}

impl RoiRegion {
    /// Lowest corner on every axis
    pub fn min_corner(&self) -> RoiPoint {
        RoiPoint::new(
            self.first.x.min(self.second.x),
            self.first.y.min(self.second.y),
            self.first.z.min(self.second.z),
        )
    }

    /// Highest corner on every axis
    pub fn max_corner(&self) -> RoiPoint {
        RoiPoint::new(
            self.first.x.max(self.second.x),
            self.first.y.max(self.second.y),
            self.first.z.max(self.second.z),
        )
    }

    /// Same volume regardless of which corner was marked first
    pub fn same_volume(&self, other: &RoiRegion) -> bool {
        self.min_corner() == other.min_corner() && self.max_corner() == other.max_corner()
    }
}

/// What `add_point` did with the point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PointAdded {
    /// Waiting for the opposite corner
    Pending,
    /// Closed a region
    Completed { region: RoiRegion },
}

/// Read-only view of the manager's state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiSnapshot {
    pub pending: Option<RoiPoint>,
    pub regions: Vec<RoiRegion>,
}

#[derive(Debug, Default)]
pub struct RoiManager {
    pending: Option<RoiPoint>,
    confirmed: Vec<RoiRegion>,
}

impl RoiManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, point: RoiPoint) -> PointAdded {
        match self.pending.take() {
            None => {
                debug!("ROI corner pending at {:?}", point);
                self.pending = Some(point);
                PointAdded::Pending
            }
            Some(first) => {
                let region = RoiRegion {
                    first,
                    second: point,
                };
                self.confirmed.push(region);
                info!(
                    "ROI #{} closed: {:?} -> {:?}",
                    self.confirmed.len(),
                    first,
                    point
                );
                PointAdded::Completed { region }
            }
        }
    }

    /// Drop the pending point and every region
    pub fn reset(&mut self) {
        self.pending = None;
        self.confirmed.clear();
        info!("ROI set cleared");
    }

    pub fn pending(&self) -> Option<RoiPoint> {
        self.pending
    }

    /// Regions in the order they were closed
    pub fn regions(&self) -> &[RoiRegion] {
        &self.confirmed
    }

    pub fn snapshot(&self) -> RoiSnapshot {
        RoiSnapshot {
            pending: self.pending,
            regions: self.confirmed.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: i64, y: i64, z: i64) -> RoiPoint {
        RoiPoint::new(x, y, z)
    }

    #[test]
    fn test_second_point_closes_region() {
        let mut roi = RoiManager::new();
        assert_eq!(roi.add_point(p(1, 2, 0)), PointAdded::Pending);
        assert_eq!(roi.pending(), Some(p(1, 2, 0)));
        assert!(roi.regions().is_empty());

        let added = roi.add_point(p(5, 6, 1));
        let expected = RoiRegion {
            first: p(1, 2, 0),
            second: p(5, 6, 1),
        };
        assert_eq!(added, PointAdded::Completed { region: expected });
        assert_eq!(roi.regions(), &[expected]);
        assert_eq!(roi.pending(), None);
    }

    #[test]
    fn test_third_point_starts_new_pending() {
        let mut roi = RoiManager::new();
        roi.add_point(p(0, 0, 0));
        roi.add_point(p(1, 1, 1));
        assert_eq!(roi.add_point(p(2, 2, 2)), PointAdded::Pending);
        assert_eq!(roi.regions().len(), 1);
        assert_eq!(roi.pending(), Some(p(2, 2, 2)));

        roi.add_point(p(3, 3, 3));
        assert_eq!(roi.regions().len(), 2);
        assert_eq!(roi.regions()[1].first, p(2, 2, 2));
        assert_eq!(roi.pending(), None);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut roi = RoiManager::new();
        roi.reset();
        assert_eq!(roi.snapshot(), RoiSnapshot::default());

        roi.add_point(p(0, 0, 0));
        roi.add_point(p(1, 1, 1));
        roi.add_point(p(4, 4, 4));
        roi.reset();
        assert!(roi.regions().is_empty());
        assert_eq!(roi.pending(), None);
    }

    #[test]
    fn test_corners_are_order_independent() {
        let a = RoiRegion {
            first: p(5, 0, 2),
            second: p(1, 3, -1),
        };
        let b = RoiRegion {
            first: p(1, 3, -1),
            second: p(5, 0, 2),
        };
        assert_eq!(a.min_corner(), p(1, 0, -1));
        assert_eq!(a.max_corner(), p(5, 3, 2));
        assert!(a.same_volume(&b));
        assert_ne!(a, b);
    }
}
