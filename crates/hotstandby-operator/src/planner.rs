//! # Capacity Planner
//!
//! Stateless mapping from observed occupancy to a replica count. No
//! hysteresis or cooldown: every call returns the instantaneous target.

/// Optional hard bounds on the replica count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaBounds {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

impl ReplicaBounds {
    pub fn new(min: Option<i32>, max: Option<i32>) -> Self {
        Self { min, max }
    }

    /// Floor first, then ceiling. With `max < min` the result is `max`.
    pub fn clamp(&self, value: i32) -> i32 {
        let mut out = value;
        if let Some(min) = self.min {
            out = out.max(min);
        }
        if let Some(max) = self.max {
            out = out.min(max);
        }
        out
    }

    /// Bounds that cannot both hold, i.e. `max < min`.
    pub fn is_inverted(&self) -> bool {
        matches!((self.min, self.max), (Some(min), Some(max)) if max < min)
    }
}

/// Desired replica count: busy pods plus idle headroom, clamped to bounds.
pub fn desired_replicas(busy: u32, idle_target: u32, bounds: ReplicaBounds) -> i32 {
    let raw = i64::from(busy) + i64::from(idle_target);
    bounds.clamp(saturate(raw))
}

/// Replica count for a child deployment that does not exist yet.
pub fn initial_replicas(idle_target: u32, bounds: ReplicaBounds) -> i32 {
    saturate(i64::from(idle_target)).max(bounds.min.unwrap_or(0))
}

fn saturate(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
