//! Synthetic analytics payloads standing in for a real footage analysis backend.

use chrono::Utc;

use crate::models::{
    CourtPosition, PathPoint, PlayerPath, Shot, ShotType, StatBin, StatBins, StatValue, Video,
    VideoAnalytics, VideoStatus,
};

pub const DEMO_VIDEO_ID: &str = "demo-video-1";
const DEMO_VIDEO_NAME: &str = "Championship Game - Q4 Highlights.mp4";
const DEMO_SEED: u64 = 0x5eed_0001;

/// Average gap between consecutive shots.
pub const SHOT_SPACING_SECS: f64 = 12.0;
const SHOT_JITTER_SECS: f64 = 10.0;

const PATH_SAMPLES: usize = 50;
const PATH_SAMPLE_SECS: f64 = 0.5;

const POINTS_PER_MADE_SHOT: u32 = 2;

#[derive(Clone, Debug)]
pub struct SynthesisProfile {
    pub total_shots: u32,
    pub made_probability: f64,
    pub player_names: [String; 2],
}

impl SynthesisProfile {
    pub fn new(total_shots: u32, made_probability: f64) -> Self {
        Self {
            total_shots,
            made_probability: made_probability.clamp(0.0, 1.0),
            player_names: ["Player 1".to_string(), "Player 2".to_string()],
        }
    }

    pub fn footage_length(&self) -> f64 {
        self.total_shots as f64 * SHOT_SPACING_SECS
    }
}

/// Sinusoidal trajectory around a centre point.
struct Trajectory {
    player_id: &'static str,
    color: &'static str,
    centre: (f64, f64),
    amplitude: (f64, f64),
    frequency: (f64, f64),
    phase: (f64, f64),
}

const TRAJECTORIES: [Trajectory; 2] = [
    Trajectory {
        player_id: "p1",
        color: "#FF6B35",
        centre: (20.0, 30.0),
        amplitude: (30.0, 20.0),
        frequency: (0.3, 0.2),
        phase: (0.0, 0.0),
    },
    Trajectory {
        player_id: "p2",
        color: "#3B82F6",
        centre: (60.0, 50.0),
        amplitude: (25.0, 20.0),
        frequency: (0.25, 0.3),
        phase: (1.0, 0.5),
    },
];

impl Trajectory {
    fn path(&self, player_name: &str) -> PlayerPath {
        let points = (0..PATH_SAMPLES)
            .map(|i| {
                let i = i as f64;
                PathPoint {
                    x: self.centre.0 + (i * self.frequency.0 + self.phase.0).sin() * self.amplitude.0,
                    y: self.centre.1 + (i * self.frequency.1 + self.phase.1).cos() * self.amplitude.1,
                    time: i * PATH_SAMPLE_SECS,
                }
            })
            .collect();

        PlayerPath {
            player_id: self.player_id.to_string(),
            player_name: player_name.to_string(),
            color: self.color.to_string(),
            points,
        }
    }
}

/// Percentage of made shots, rounded to one decimal. Zero when nothing was attempted.
pub fn accuracy_percent(made: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (made as f64 / total as f64 * 1000.0).round() / 10.0
}

fn format_percent(value: f64) -> StatValue {
    StatValue::Text(format!("{:.1}%", value))
}

fn made_count<'a>(shots: impl Iterator<Item = &'a Shot>) -> (u32, u32) {
    shots.fold((0, 0), |(made, total), shot| {
        (made + u32::from(shot.kind == ShotType::Made), total + 1)
    })
}

fn half_bin(shots: &[&Shot], three_point: &str) -> StatBin {
    let (made, total) = made_count(shots.iter().copied());
    StatBin::from([
        ("Field Goal %".to_string(), format_percent(accuracy_percent(made, total))),
        ("3-Point %".to_string(), StatValue::Text(three_point.to_string())),
        ("Points".to_string(), StatValue::Count(made * POINTS_PER_MADE_SHOT)),
    ])
}

fn stat_bins(shots: &[Shot], accuracy: f64, made: u32, footage_length: f64) -> StatBins {
    let half_time = footage_length / 2.0;
    let (first, second): (Vec<&Shot>, Vec<&Shot>) =
        shots.iter().partition(|shot| shot.timestamp < half_time);

    let overall = StatBin::from([
        ("Field Goal %".to_string(), format_percent(accuracy)),
        ("3-Point %".to_string(), StatValue::Text("40.0%".to_string())),
        ("Free Throw %".to_string(), StatValue::Text("85.0%".to_string())),
        ("Points".to_string(), StatValue::Count(made * POINTS_PER_MADE_SHOT)),
        ("Assists".to_string(), StatValue::Count(8)),
        ("Rebounds".to_string(), StatValue::Count(12)),
    ]);

    StatBins {
        overall,
        first_half: half_bin(&first, "33.3%"),
        second_half: half_bin(&second, "50.0%"),
    }
}

/// Builds a complete, internally consistent analytics payload.
pub fn synthesize(rng: &mut fastrand::Rng, profile: &SynthesisProfile) -> VideoAnalytics {
    let shots: Vec<Shot> = (0..profile.total_shots)
        .map(|i| {
            let kind = if rng.f64() < profile.made_probability {
                ShotType::Made
            } else {
                ShotType::Missed
            };
            Shot {
                id: format!("shot-{}", i),
                timestamp: i as f64 * SHOT_SPACING_SECS + rng.f64() * SHOT_JITTER_SECS,
                kind,
                position: Some(CourtPosition {
                    x: rng.f64() * 100.0,
                    y: rng.f64() * 50.0 + 25.0,
                }),
                player: Some(TRAJECTORIES[i as usize % TRAJECTORIES.len()].player_id.to_string()),
            }
        })
        .collect();

    let (made, total_shots) = made_count(shots.iter());
    let accuracy = accuracy_percent(made, total_shots);
    let stats = stat_bins(&shots, accuracy, made, profile.footage_length());

    let player_paths = TRAJECTORIES
        .iter()
        .zip(profile.player_names.iter())
        .map(|(trajectory, name)| trajectory.path(name))
        .collect();

    VideoAnalytics {
        total_shots,
        made,
        missed: total_shots - made,
        accuracy,
        shots,
        player_paths: Some(player_paths),
        stats,
    }
}

/// The pre-analyzed video every fresh library starts with.
pub fn demo_video() -> Video {
    let mut profile = SynthesisProfile::new(24, 0.625);
    profile.player_names = ["Marcus Johnson".to_string(), "David Chen".to_string()];
    let analytics = synthesize(&mut fastrand::Rng::with_seed(DEMO_SEED), &profile);

    Video {
        id: DEMO_VIDEO_ID.to_string(),
        name: DEMO_VIDEO_NAME.to_string(),
        upload_date: Utc::now(),
        status: VideoStatus::Completed,
        thumbnail: None,
        duration: Some(profile.footage_length()),
        analytics: Some(analytics),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> SynthesisProfile {
        SynthesisProfile::new(24, 0.625)
    }

    #[test]
    fn counts_are_consistent() {
        for seed in 0..32 {
            let analytics = synthesize(&mut fastrand::Rng::with_seed(seed), &profile());
            assert_eq!(analytics.total_shots, 24);
            assert_eq!(analytics.shots.len(), 24);
            assert_eq!(analytics.made + analytics.missed, analytics.total_shots);
            assert_eq!(analytics.shots_of(ShotType::Made).count() as u32, analytics.made);

            let expected = analytics.made as f64 / analytics.total_shots as f64 * 100.0;
            assert!((analytics.accuracy - expected).abs() <= 0.1);
        }
    }

    #[test]
    fn same_seed_same_payload() {
        let a = synthesize(&mut fastrand::Rng::with_seed(42), &profile());
        let b = synthesize(&mut fastrand::Rng::with_seed(42), &profile());
        assert_eq!(a, b);
    }

    #[test]
    fn shots_are_spread_across_footage() {
        let profile = profile();
        let analytics = synthesize(&mut fastrand::Rng::with_seed(3), &profile);
        for (i, shot) in analytics.shots.iter().enumerate() {
            assert!(shot.timestamp >= 0.0);
            assert!(shot.timestamp < profile.footage_length());
            assert!(shot.timestamp >= i as f64 * SHOT_SPACING_SECS);
            let position = shot.position.unwrap();
            assert!((0.0..100.0).contains(&position.x));
            assert!((25.0..75.0).contains(&position.y));
        }
    }

    #[test]
    fn half_points_add_up() {
        let analytics = synthesize(&mut fastrand::Rng::with_seed(9), &profile());
        let points = |bin: &StatBin| match bin.get("Points") {
            Some(StatValue::Count(points)) => *points,
            other => panic!("unexpected points cell: {:?}", other),
        };
        assert_eq!(
            points(&analytics.stats.first_half) + points(&analytics.stats.second_half),
            points(&analytics.stats.overall)
        );
        assert_eq!(
            analytics.stats.overall.get("Field Goal %"),
            Some(&StatValue::Text(format!("{:.1}%", analytics.accuracy)))
        );
    }

    #[test]
    fn two_player_paths() {
        let analytics = synthesize(&mut fastrand::Rng::with_seed(1), &profile());
        let paths = analytics.player_paths.unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].player_id, "p1");
        assert_eq!(paths[1].color, "#3B82F6");
        assert!(paths.iter().all(|p| p.points.len() == PATH_SAMPLES));
        assert!((paths[0].points[0].x - 20.0).abs() < 1e-9);
        assert!((paths[0].points[49].time - 24.5).abs() < 1e-9);
    }

    #[test]
    fn accuracy_rounding() {
        assert_eq!(accuracy_percent(15, 24), 62.5);
        assert_eq!(accuracy_percent(1, 3), 33.3);
        assert_eq!(accuracy_percent(0, 0), 0.0);
    }

    #[test]
    fn demo_video_is_ready() {
        let video = demo_video();
        assert_eq!(video.id, DEMO_VIDEO_ID);
        assert!(video.is_ready());
        let analytics = video.analytics.unwrap();
        assert_eq!(
            analytics.player_paths.as_ref().unwrap()[0].player_name,
            "Marcus Johnson"
        );
        assert_eq!(analytics, demo_video().analytics.unwrap());
    }
}
