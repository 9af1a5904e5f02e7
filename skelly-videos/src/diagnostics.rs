use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use skelly_types::{CameraId, MultiFramePayload};

/// Per-camera frame timing over one recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CameraTimingStats {
    pub frame_count: u64,
    pub mean_frame_interval_ns: f64,
    pub frame_interval_std_ns: f64,
}

/// Timing summary written into `session_information.json`.
///
/// The grab skew is the observable synchronization error: the spread of
/// `post_grab_ns` stamps within one multi-frame payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TimestampDiagnostics {
    pub payload_count: u64,
    pub mean_grab_skew_ns: f64,
    pub max_grab_skew_ns: u64,
    pub per_camera: BTreeMap<CameraId, CameraTimingStats>,
}

/// Streaming accumulator feeding [`TimestampDiagnostics`]; Welford updates
/// so nothing but a few counters is retained per camera.
#[derive(Default)]
pub(crate) struct DiagnosticsAccumulator {
    payload_count: u64,
    skew_sum: f64,
    max_skew_ns: u64,
    per_camera: BTreeMap<CameraId, CameraAccumulator>,
}

#[derive(Default)]
struct CameraAccumulator {
    frame_count: u64,
    last_post_grab_ns: Option<u64>,
    interval_count: u64,
    interval_mean: f64,
    interval_m2: f64,
}

impl DiagnosticsAccumulator {
    pub fn observe(&mut self, payload: &MultiFramePayload) {
        self.payload_count += 1;
        if let Some(skew) = payload.grab_skew_ns() {
            self.skew_sum += skew as f64;
            self.max_skew_ns = self.max_skew_ns.max(skew);
        }
        for (camera_id, frame) in &payload.frames {
            let acc = self.per_camera.entry(*camera_id).or_default();
            acc.frame_count += 1;
            if let Some(last) = acc.last_post_grab_ns {
                let interval = frame.metadata.post_grab_ns.saturating_sub(last) as f64;
                acc.interval_count += 1;
                let delta = interval - acc.interval_mean;
                acc.interval_mean += delta / acc.interval_count as f64;
                acc.interval_m2 += delta * (interval - acc.interval_mean);
            }
            acc.last_post_grab_ns = Some(frame.metadata.post_grab_ns);
        }
    }

    pub fn finalize(&self) -> TimestampDiagnostics {
        TimestampDiagnostics {
            payload_count: self.payload_count,
            mean_grab_skew_ns: if self.payload_count == 0 {
                0.0
            } else {
                self.skew_sum / self.payload_count as f64
            },
            max_grab_skew_ns: self.max_skew_ns,
            per_camera: self
                .per_camera
                .iter()
                .map(|(camera_id, acc)| {
                    let variance = if acc.interval_count > 1 {
                        acc.interval_m2 / (acc.interval_count - 1) as f64
                    } else {
                        0.0
                    };
                    (
                        *camera_id,
                        CameraTimingStats {
                            frame_count: acc.frame_count,
                            mean_frame_interval_ns: acc.interval_mean,
                            frame_interval_std_ns: variance.sqrt(),
                        },
                    )
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skelly_types::{FrameMetadata, FramePayload};

    fn payload(mfn: u64, grabs: &[(u8, u64)]) -> MultiFramePayload {
        let mut payload = MultiFramePayload::new(mfn);
        for (camera_id, post_grab_ns) in grabs {
            let mut metadata = FrameMetadata::new(CameraId(*camera_id), mfn - 1);
            metadata.post_grab_ns = *post_grab_ns;
            payload.frames.insert(
                CameraId(*camera_id),
                FramePayload {
                    metadata,
                    image: Vec::new(),
                },
            );
        }
        payload
    }

    #[test]
    fn skew_and_intervals_accumulate() {
        let mut acc = DiagnosticsAccumulator::default();
        acc.observe(&payload(1, &[(0, 1_000), (1, 2_000)]));
        acc.observe(&payload(2, &[(0, 34_000), (1, 34_500)]));
        let diag = acc.finalize();
        assert_eq!(diag.payload_count, 2);
        assert_eq!(diag.max_grab_skew_ns, 1_000);
        assert!((diag.mean_grab_skew_ns - 750.0).abs() < f64::EPSILON);
        let cam0 = &diag.per_camera[&CameraId(0)];
        assert_eq!(cam0.frame_count, 2);
        assert!((cam0.mean_frame_interval_ns - 33_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_accumulator_finalizes_to_zeros() {
        let diag = DiagnosticsAccumulator::default().finalize();
        assert_eq!(diag.payload_count, 0);
        assert_eq!(diag.mean_grab_skew_ns, 0.0);
        assert!(diag.per_camera.is_empty());
    }
}
