//! The per-conference 20 ms mixing tick (§4.7 "Mixing loop").
//!
//! Grounded on `MixerConference::run()` (one thread per conference in the
//! original) and `media-core/src/engine/audio/mixer.rs`'s accumulate/clip
//! shape, generalized here to use [`mediactrl_media::mixing::MixAccumulator`]
//! for the echo-cancelled (minus-own-contribution) per-edge feed §4.7
//! step 3.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use mediactrl_media::mixing::MixAccumulator;
use mediactrl_media::sync::clock::TickSchedule;
use mediactrl_media::types::{AudioFrame, FrameOwner, SAMPLES_PER_FRAME};
use mediactrl_media::vad;
use mediactrl_packages::endpoint::EndpointAdapter;

use crate::graph::Node;
use crate::xml;

/// Announcement overlay attenuation (§4.7 step 2): one third amplitude.
const ANNOUNCEMENT_NUMERATOR: u32 = 1;
const ANNOUNCEMENT_DENOMINATOR: u32 = 3;

/// An `active-talkers-sub` subscription (§4.7 step 4, §4.8 "Subscriptions").
pub struct ActiveTalkersSubscription {
    pub interval: Duration,
    last_fired: AsyncMutex<Option<tokio::time::Instant>>,
}

impl ActiveTalkersSubscription {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: AsyncMutex::new(None),
        }
    }

    async fn due(&self, now: tokio::time::Instant) -> bool {
        let mut last = self.last_fired.lock().await;
        let due = match *last {
            Some(prev) => now.saturating_duration_since(prev) >= self.interval,
            None => true,
        };
        if due {
            *last = Some(now);
        }
        due
    }
}

/// Runs one conference's mixing tick until `stop` is set. Spawned once
/// per `createconference` (§5 "one task per Conference").
pub struct ConferenceTicker {
    pub conference_id: String,
    pub stop: Arc<AtomicBool>,
    pub subscription: AsyncMutex<Option<ActiveTalkersSubscription>>,
    announcements: AsyncMutex<Vec<AudioFrame>>,
}

impl ConferenceTicker {
    pub fn new(conference_id: impl Into<String>) -> Self {
        Self {
            conference_id: conference_id.into(),
            stop: Arc::new(AtomicBool::new(false)),
            subscription: AsyncMutex::new(None),
            announcements: AsyncMutex::new(Vec::new()),
        }
    }

    /// Queues an announcement frame (a Mixer `sendFrame`) to be overlaid
    /// on the next tick.
    pub async fn queue_announcement(&self, frame: AudioFrame) {
        self.announcements.lock().await.push(frame);
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Runs the tick loop. `conference` is this conference's own node;
    /// `members` resolves a peer id to its [`Node`] (connections or
    /// nested conferences joined to this one).
    pub async fn run(
        self: Arc<Self>,
        conference: Arc<Node>,
        members: impl Fn(&str) -> Option<Arc<Node>> + Send + Sync + 'static,
        endpoint: Arc<dyn EndpointAdapter>,
        callback: Arc<dyn mediactrl_packages::package::PackageCallback>,
        requester: String,
    ) {
        let mut schedule = TickSchedule::media_tick();
        loop {
            tokio::time::sleep_until(schedule.next_deadline().into()).await;
            schedule.advance();
            if self.stop.load(Ordering::SeqCst) {
                return;
            }

            let peers = conference.peers().await;
            let mut per_peer_frame: HashMap<String, [i16; SAMPLES_PER_FRAME]> = HashMap::new();
            let mut accumulator = MixAccumulator::new();
            let mut talkers = Vec::new();

            // Step 1: pull one decoded frame per attached node, tag talkers.
            for (peer_id, edge) in &peers {
                let Some(peer_node) = members(peer_id) else { continue };
                if let Some(frame) = peer_node.pop_frame().await {
                    let mut samples = [0i16; SAMPLES_PER_FRAME];
                    let n = frame.samples().len().min(SAMPLES_PER_FRAME);
                    samples[..n].copy_from_slice(&frame.samples()[..n]);
                    if !vad::is_silent(&samples) {
                        talkers.push(peer_id.clone());
                    }
                    accumulator.add(&samples, edge.gain_percent);
                    per_peer_frame.insert(peer_id.clone(), samples);
                }
            }

            // Step 2: overlay queued announcement frames at 1/3 amplitude.
            {
                let mut announcements = self.announcements.lock().await;
                for frame in announcements.drain(..) {
                    accumulator.overlay_attenuated(frame.samples(), ANNOUNCEMENT_NUMERATOR, ANNOUNCEMENT_DENOMINATOR);
                }
            }

            // Step 3: echo-cancelled, per-edge-gained feed to every sender.
            for (peer_id, edge) in &peers {
                if !edge.direction.includes_send() || edge.muted {
                    continue;
                }
                let Some(peer_node) = members(peer_id) else { continue };
                let own = per_peer_frame.get(peer_id).copied().unwrap_or([0i16; SAMPLES_PER_FRAME]);
                let mixed = accumulator.minus_contribution(&own, edge.gain_percent);
                let out_frame = AudioFrame::new(mixed.to_vec(), 8000, FrameOwner::Endpoint);
                let _ = endpoint.send_frame(&peer_node.endpoint, out_frame).await;
            }

            // Step 4: active-talkers-notify if a subscription is due.
            let sub_guard = self.subscription.lock().await;
            if let Some(sub) = sub_guard.as_ref() {
                if sub.due(tokio::time::Instant::now()).await {
                    let body = xml::build_active_talkers_event(&self.conference_id, &talkers);
                    callback.control(&requester, body).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscription_fires_once_then_waits_for_interval() {
        let sub = ActiveTalkersSubscription::new(Duration::from_millis(40));
        let t0 = tokio::time::Instant::now();
        assert!(sub.due(t0).await);
        assert!(!sub.due(t0 + Duration::from_millis(10)).await);
        assert!(sub.due(t0 + Duration::from_millis(45)).await);
    }
}
