//! Per-UE asynchronous worker task.
//!
//! Each UE runs an independent task that:
//! - Walks its path at the configured speed profile, one tick at a time
//! - Advances its own channel model and publishes the snapshot
//! - Rebuilds the feature vector and consults the engine under the
//!   re-evaluation throttle
//! - Feeds the metrics collector and reports events to the orchestrator
//!
//! All semantics run on the logical clock `t = tick_index * dt`; the
//! embassy timer only paces the loop in virtual time. A tick is processed
//! without suspension points, so a stop request always lands between two
//! complete ticks.

use embassy_time::{Duration, Timer};
use std::sync::atomic::Ordering;

use crate::channel::{ChannelError, ChannelModel, ChannelSnapshot};
use crate::control::QosFeedback;
use crate::engine::Decision;
use crate::metrics::{MetricsSnapshot, RlfEvent};
use crate::mobility::MobilityTracker;
use crate::network::{FeatureVector, HandoverEvent};
use crate::qos::compliance;

use super::types::{Runtime, UeOutputMessage, UeOutputPayload, UeOutputQueueSender, UePlan};
use super::types::MAX_UE_COUNT;

/// What one tick produced.
struct TickReport {
    sinr_db: f64,
    throughput_mbps: f64,
    rlf: Option<RlfEvent>,
    handover: Option<HandoverEvent>,
}

/// Position at a fractional waypoint index, wrapping cyclically.
fn position_on_path(path: &[(f64, f64, f64)], cursor: f64) -> (f64, f64, f64) {
    if path.len() == 1 {
        return path[0];
    }
    let len = path.len() as f64;
    let cursor = cursor.rem_euclid(len);
    let base = cursor.floor();
    let frac = cursor - base;
    let i0 = base as usize % path.len();
    let i1 = (i0 + 1) % path.len();
    let (p0, p1) = (path[i0], path[i1]);
    (
        p0.0 + frac * (p1.0 - p0.0),
        p0.1 + frac * (p1.1 - p0.1),
        p0.2 + frac * (p1.2 - p0.2),
    )
}

/// Worker state for one UE.
struct UeContext<'a> {
    runtime: &'a Runtime,
    plan: UePlan,
    channel: ChannelModel,
    mobility: MobilityTracker,
    cursor: f64,
    previous_position: Option<(f64, f64, f64)>,
    last_eval_t: Option<f64>,
    last_nearest: Option<String>,
    /// Confidence of the most recent decision, echoed in QoS feedback.
    last_confidence: f64,
}

impl<'a> UeContext<'a> {
    fn initialize(runtime: &'a Runtime, plan: UePlan) -> Result<Self, ChannelError> {
        let radio = runtime.state.radio_config();
        let channel = ChannelModel::new(
            &plan.ue_id,
            radio.carrier_frequency_ghz,
            radio.sigma_sf,
            radio.decorr_distance_m,
            runtime.rng.rng_for(&plan.ue_id),
        )?;
        Ok(Self {
            runtime,
            plan,
            channel,
            mobility: MobilityTracker::new(),
            cursor: 0.0,
            previous_position: None,
            last_eval_t: None,
            last_nearest: None,
            last_confidence: 1.0,
        })
    }

    /// Close the QoS loop for UEs with a declared profile: evaluate the
    /// observed aggregate against the requirements and feed the verdict
    /// into the adaptive thresholds, exactly as an external feedback
    /// message would.
    fn send_qos_feedback(&self, fv: &FeatureVector, serving: &str) {
        let (Some(profile), Some(observed)) = (&fv.qos_profile, &fv.observed_qos) else {
            return;
        };
        let required = self
            .runtime
            .adaptive
            .required_confidence(profile.service_type.as_str(), profile.service_priority);
        let verdict = compliance::evaluate(profile, observed, self.last_confidence, required);
        let feedback = QosFeedback {
            ue_id: self.plan.ue_id.clone(),
            antenna_id: serving.to_string(),
            service_type: profile.service_type.as_str().to_string(),
            service_priority: Some(profile.service_priority),
            observed_qos: *observed,
            success: verdict.passed,
            confidence: self.last_confidence,
            qos_requirements: Some((*profile).clone()),
            timestamp: None,
        };
        if let Err(e) = self.runtime.engine.handle_qos_feedback(&feedback) {
            log::warn!("UE {}: QoS feedback rejected: {}", self.plan.ue_id, e);
        } else if !verdict.passed {
            log::debug!(
                "UE {}: QoS breach on {} ({} violations)",
                self.plan.ue_id,
                serving,
                verdict.violations.len()
            );
        }
    }

    /// Process one tick at logical time `t_s`. No awaits in here.
    fn tick(&mut self, t_s: f64, dt_s: f64) -> Result<TickReport, ChannelError> {
        let ue_id = self.plan.ue_id.clone();
        let position = position_on_path(&self.plan.path, self.cursor);
        self.cursor += self.plan.step as f64 * dt_s;

        let speed = match self.previous_position {
            Some(prev) if dt_s > 0.0 => {
                let dx = position.0 - prev.0;
                let dy = position.1 - prev.1;
                let dz = position.2 - prev.2;
                (dx * dx + dy * dy + dz * dz).sqrt() / dt_s
            }
            _ => 0.0,
        };
        self.previous_position = Some(position);

        let shadowing_db = self.channel.update_shadowing(position)?;
        let fading_db = self.channel.update_fast_fading(speed, t_s)?;
        self.runtime.state.update_channel_snapshot(
            &ue_id,
            ChannelSnapshot {
                shadowing_db,
                fading_db,
            },
        );

        let kinematics = self.mobility.update((position.0, position.1), dt_s);
        if let Err(e) = self
            .runtime
            .state
            .set_ue_position(&ue_id, position, speed, kinematics)
        {
            log::error!("UE {}: position update failed: {}", ue_id, e);
        }

        // First tick with no serving cell: attach to the closest antenna.
        // This is an attach, not a handover; nothing is counted.
        let connected = self
            .runtime
            .state
            .ue_state(&ue_id)
            .and_then(|ue| ue.connected_to);
        if connected.is_none() {
            if let Some(nearest) = self.runtime.state.nearest_antenna(position) {
                match self.runtime.state.attach_ue(&ue_id, &nearest) {
                    Ok(()) => log::info!("UE {} attached to {} at t={:.1}s", ue_id, nearest, t_s),
                    Err(e) => log::warn!("UE {}: initial attach failed: {}", ue_id, e),
                }
            }
        }

        let fv = match self.runtime.state.feature_vector(&ue_id, t_s) {
            Ok(fv) => fv,
            Err(e) => {
                log::error!("UE {}: feature vector failed: {}", ue_id, e);
                return Ok(TickReport {
                    sinr_db: f64::NEG_INFINITY,
                    throughput_mbps: 0.0,
                    rlf: None,
                    handover: None,
                });
            }
        };

        // Re-evaluate the engine only when the nearest antenna changed or
        // the re-evaluation interval elapsed.
        let nearest = self.runtime.state.nearest_antenna(position);
        let interval = self.runtime.engine.config().reevaluation_interval_s;
        let due = match self.last_eval_t {
            None => true,
            Some(last) => nearest != self.last_nearest || t_s - last >= interval,
        };
        let mut handover = None;
        if due {
            self.last_eval_t = Some(t_s);
            match self.runtime.engine.decide_with(&fv, t_s) {
                Ok(Decision::Applied(event)) => {
                    self.last_confidence = event.confidence;
                    handover = Some(event);
                }
                Ok(_) => {}
                Err(e) => log::error!("UE {}: handover decision failed: {}", ue_id, e),
            }
            if let Some(serving) = fv.connected_to.as_deref() {
                self.send_qos_feedback(&fv, serving);
            }
        }
        self.last_nearest = nearest;

        // The applied handover changes the serving cell; metrics see the
        // post-decision SINR.
        let sinr_db = match &handover {
            Some(event) => event
                .to
                .as_deref()
                .and_then(|id| fv.sinr_of(id))
                .unwrap_or(fv.serving_sinr_db()),
            None => fv.serving_sinr_db(),
        };
        let serving = match &handover {
            Some(event) => event.to.clone(),
            None => fv.connected_to.clone(),
        };
        let snapshot: MetricsSnapshot =
            self.runtime
                .metrics
                .update(&ue_id, sinr_db, t_s, dt_s, serving.as_deref());
        if snapshot.rlf_event.is_some() {
            self.runtime
                .counters
                .rlf_events_total
                .fetch_add(1, Ordering::Relaxed);
        }

        Ok(TickReport {
            sinr_db,
            throughput_mbps: snapshot.throughput_mbps,
            rlf: snapshot.rlf_event,
            handover,
        })
    }
}

/// Per-UE worker task: walks the trajectory, drives the channel model and
/// the engine, reports to the orchestrator, and persists final state on
/// exit.
#[embassy_executor::task(pool_size = MAX_UE_COUNT)]
pub async fn ue_task(runtime: &'static Runtime, plan: UePlan, out_tx: UeOutputQueueSender) {
    let ue_id = plan.ue_id.clone();
    let dt_s = runtime.run.tick_seconds;
    let total_ticks = (runtime.run.duration_s / dt_s).ceil() as u64;
    let tick_pause = Duration::from_micros((dt_s * 1_000_000.0) as u64);

    let mut context = match UeContext::initialize(runtime, plan) {
        Ok(context) => context,
        Err(e) => {
            log::error!("UE {}: channel initialization failed: {}", ue_id, e);
            out_tx
                .send(UeOutputMessage {
                    ue_id,
                    payload: UeOutputPayload::Fatal(e.to_string()),
                })
                .await;
            return;
        }
    };

    let mut ticks_run: u64 = 0;
    for tick_index in 0..total_ticks {
        if runtime.stop_requested() {
            log::info!("UE {}: stop requested, exiting between ticks", ue_id);
            break;
        }
        let t_s = tick_index as f64 * dt_s;

        match context.tick(t_s, dt_s) {
            Ok(report) => {
                ticks_run += 1;
                if let Some(event) = report.handover {
                    out_tx
                        .send(UeOutputMessage {
                            ue_id: ue_id.clone(),
                            payload: UeOutputPayload::HandoverApplied(event),
                        })
                        .await;
                }
                if let Some(rlf) = report.rlf {
                    out_tx
                        .send(UeOutputMessage {
                            ue_id: ue_id.clone(),
                            payload: UeOutputPayload::RadioLinkFailure(rlf),
                        })
                        .await;
                }
                // Ticks are best-effort progress samples; dropping one
                // under backpressure is fine.
                let _ = out_tx.try_send(UeOutputMessage {
                    ue_id: ue_id.clone(),
                    payload: UeOutputPayload::TickCompleted {
                        t_s,
                        sinr_db: report.sinr_db,
                        throughput_mbps: report.throughput_mbps,
                    },
                });
            }
            Err(e) => {
                // Non-finite channel arithmetic invalidates the run.
                log::error!("UE {}: fatal channel error: {}", ue_id, e);
                out_tx
                    .send(UeOutputMessage {
                        ue_id: ue_id.clone(),
                        payload: UeOutputPayload::Fatal(e.to_string()),
                    })
                    .await;
                return;
            }
        }

        Timer::after(tick_pause).await;
    }

    let (final_position, connected_to) = runtime
        .state
        .ue_state(&ue_id)
        .map(|ue| (ue.position, ue.connected_to))
        .unwrap_or(((0.0, 0.0, 0.0), None));

    out_tx
        .send(UeOutputMessage {
            ue_id,
            payload: UeOutputPayload::Finished {
                final_position,
                connected_to,
                ticks_run,
            },
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_cursor_wraps_cyclically() {
        let path = vec![(0.0, 0.0, 0.0), (10.0, 0.0, 0.0), (20.0, 0.0, 0.0)];
        assert_eq!(position_on_path(&path, 0.0), (0.0, 0.0, 0.0));
        assert_eq!(position_on_path(&path, 1.0), (10.0, 0.0, 0.0));
        assert_eq!(position_on_path(&path, 3.0), (0.0, 0.0, 0.0));
        assert_eq!(position_on_path(&path, 4.0), (10.0, 0.0, 0.0));
    }

    #[test]
    fn path_cursor_interpolates_between_waypoints() {
        let path = vec![(0.0, 0.0, 0.0), (10.0, 0.0, 0.0)];
        let mid = position_on_path(&path, 0.5);
        assert!((mid.0 - 5.0).abs() < 1e-9);
        // Between the last and first waypoint the segment wraps.
        let wrap = position_on_path(&path, 1.5);
        assert!((wrap.0 - 5.0).abs() < 1e-9);
    }

    #[test]
    fn single_point_path_is_stationary() {
        let path = vec![(7.0, 3.0, 1.5)];
        assert_eq!(position_on_path(&path, 0.0), (7.0, 3.0, 1.5));
        assert_eq!(position_on_path(&path, 42.0), (7.0, 3.0, 1.5));
    }
}
