//! Incremental mobility metrics for a stream of UE positions.
//!
//! Heading change rate and path curvature are maintained with running
//! totals so each query is O(1); the algorithms match the batch
//! definitions (average absolute heading delta between segments, total
//! turning angle divided by path length).

/// Scalar kinematics attached to a feature vector.
#[derive(Debug, Clone, Copy, Default)]
pub struct Kinematics {
    pub speed_mps: f64,
    pub acceleration_mps2: f64,
    /// Average absolute heading change between successive segments (rad).
    pub heading_change_rate: f64,
    /// Total turning angle divided by path length (rad/m).
    pub path_curvature: f64,
    /// `1 / (1 + heading_change_rate)`: 1.0 for straight paths.
    pub stability: f64,
}

/// Tracks one UE's recent motion.
pub struct MobilityTracker {
    prev_point: Option<(f64, f64)>,
    prev_heading: Option<f64>,
    prev_vector: Option<(f64, f64)>,
    prev_seg_len: Option<f64>,
    prev_speed: Option<f64>,

    path_length: f64,
    total_angle: f64,
    total_heading_change: f64,
    heading_change_count: u64,

    current: Kinematics,
}

impl MobilityTracker {
    pub fn new() -> Self {
        Self {
            prev_point: None,
            prev_heading: None,
            prev_vector: None,
            prev_seg_len: None,
            prev_speed: None,
            path_length: 0.0,
            total_angle: 0.0,
            total_heading_change: 0.0,
            heading_change_count: 0,
            current: Kinematics {
                stability: 1.0,
                ..Kinematics::default()
            },
        }
    }

    /// Add a position sample observed `dt_s` after the previous one and
    /// return the updated kinematics.
    pub fn update(&mut self, position: (f64, f64), dt_s: f64) -> Kinematics {
        let Some(prev) = self.prev_point else {
            self.prev_point = Some(position);
            return self.current;
        };

        let vec = (position.0 - prev.0, position.1 - prev.1);
        let seg_len = (vec.0 * vec.0 + vec.1 * vec.1).sqrt();
        let heading = if seg_len == 0.0 {
            None
        } else {
            Some(vec.1.atan2(vec.0))
        };

        self.path_length += seg_len;

        if let (Some(prev_heading), Some(heading)) = (self.prev_heading, heading) {
            let diff = wrap_angle(heading - prev_heading);
            self.total_heading_change += diff.abs();
            self.heading_change_count += 1;
        }

        if let (Some(prev_vec), Some(prev_len)) = (self.prev_vector, self.prev_seg_len) {
            if prev_len > 0.0 && seg_len > 0.0 {
                let dot = prev_vec.0 * vec.0 + prev_vec.1 * vec.1;
                let cos_ang = (dot / (prev_len * seg_len)).clamp(-1.0, 1.0);
                self.total_angle += cos_ang.acos().abs();
            }
        }

        if heading.is_some() {
            self.prev_heading = heading;
            self.prev_vector = Some(vec);
            self.prev_seg_len = Some(seg_len);
        } else {
            // No movement: keep the previous heading, forget the vector so
            // a zero-length segment never contributes a turning angle.
            self.prev_vector = None;
            self.prev_seg_len = None;
        }
        self.prev_point = Some(position);

        let speed = if dt_s > 0.0 { seg_len / dt_s } else { 0.0 };
        let acceleration = match self.prev_speed {
            Some(prev_speed) if dt_s > 0.0 => (speed - prev_speed) / dt_s,
            _ => 0.0,
        };
        self.prev_speed = Some(speed);

        let heading_change_rate = if self.heading_change_count == 0 {
            0.0
        } else {
            self.total_heading_change / self.heading_change_count as f64
        };
        let path_curvature = if self.path_length == 0.0 {
            0.0
        } else {
            self.total_angle / self.path_length
        };

        self.current = Kinematics {
            speed_mps: speed,
            acceleration_mps2: acceleration,
            heading_change_rate,
            path_curvature,
            stability: 1.0 / (1.0 + heading_change_rate),
        };
        self.current
    }

    pub fn kinematics(&self) -> Kinematics {
        self.current
    }
}

/// Normalize an angle difference into `[-pi, pi]`.
fn wrap_angle(diff: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let wrapped = (diff + std::f64::consts::PI).rem_euclid(two_pi) - std::f64::consts::PI;
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_path_has_zero_curvature_and_full_stability() {
        let mut tracker = MobilityTracker::new();
        for i in 0..10 {
            tracker.update((i as f64 * 10.0, 0.0), 1.0);
        }
        let k = tracker.kinematics();
        assert_eq!(k.heading_change_rate, 0.0);
        assert_eq!(k.path_curvature, 0.0);
        assert_eq!(k.stability, 1.0);
        assert!((k.speed_mps - 10.0).abs() < 1e-12);
    }

    #[test]
    fn right_angle_turns_register_heading_change() {
        let mut tracker = MobilityTracker::new();
        // Square corner: east, east, north.
        tracker.update((0.0, 0.0), 1.0);
        tracker.update((10.0, 0.0), 1.0);
        tracker.update((20.0, 0.0), 1.0);
        tracker.update((20.0, 10.0), 1.0);
        let k = tracker.kinematics();
        // One 90-degree change over two measured transitions.
        let expected = std::f64::consts::FRAC_PI_2 / 2.0;
        assert!((k.heading_change_rate - expected).abs() < 1e-9);
        assert!(k.path_curvature > 0.0);
        assert!(k.stability < 1.0);
    }

    #[test]
    fn stationary_samples_do_not_accumulate_angles() {
        let mut tracker = MobilityTracker::new();
        tracker.update((0.0, 0.0), 1.0);
        tracker.update((10.0, 0.0), 1.0);
        tracker.update((10.0, 0.0), 1.0);
        tracker.update((20.0, 0.0), 1.0);
        let k = tracker.kinematics();
        assert_eq!(k.path_curvature, 0.0);
        assert_eq!(k.speed_mps, 10.0);
    }

    #[test]
    fn acceleration_tracks_speed_changes() {
        let mut tracker = MobilityTracker::new();
        tracker.update((0.0, 0.0), 1.0);
        tracker.update((5.0, 0.0), 1.0); // 5 m/s
        let k = tracker.update((15.0, 0.0), 1.0); // 10 m/s
        assert!((k.acceleration_mps2 - 5.0).abs() < 1e-12);
    }

    #[test]
    fn heading_wrap_handles_pi_boundary() {
        assert!((wrap_angle(3.5 * std::f64::consts::PI) - (-0.5 * std::f64::consts::PI)).abs() < 1e-12);
        assert!((wrap_angle(-3.5 * std::f64::consts::PI) - (0.5 * std::f64::consts::PI)).abs() < 1e-12);
    }
}
