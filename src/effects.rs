//! Alert throttling and the single-flight intensity pulse.
//!
//! Bursts of large transactions must collapse into one coherent reaction:
//! - [`EffectThrottle::trigger`] drops (never queues) any call inside the throttle
//!   window of the last accepted one.
//! - [`PulseAnimation`] runs at most one ramp at a time. A trigger that lands while a
//!   ramp is in flight only updates the requested profile; the running ramp always
//!   finishes its descent to the baseline before another can start.
//!
//! Time is passed in explicitly as [`tokio::time::Instant`] so the coordinator's
//! frame clock and paused-time tests drive the same code.

use crate::config::EffectsConfig;
use crate::model::Tier;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Upper bound on pulse intensity during ramp-up.
pub const PULSE_CEILING: f64 = 1.5;

/// Intensity and timing of one alert reaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseProfile {
    /// Camera shake strength
    pub shake: f64,
    /// Peak pulse intensity
    pub peak: f64,
    /// Total ramp duration (up and down)
    pub duration: Duration,
}

impl PulseProfile {
    /// Reaction profile for a tier.
    #[must_use]
    pub fn for_tier(tier: Tier) -> Self {
        let (shake, peak) = match tier {
            Tier::Extreme => (0.8, 1.2),
            _ => (0.4, 0.9),
        };
        Self {
            shake,
            peak,
            duration: Duration::from_millis(400),
        }
    }
}

/// Result of an accepted trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertReaction {
    /// Tier of the triggering event
    pub tier: Tier,
    /// Event magnitude (whole coins)
    pub magnitude: f64,
    /// Profile applied for this tier
    pub profile: PulseProfile,
    /// Whether this trigger started a new pulse ramp
    pub pulse_started: bool,
    /// Until when the alert indicator stays visible
    pub indicator_until: Instant,
}

// =============================================================================
// Pulse
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Ramp {
    started: Instant,
    from: f64,
    target: f64,
    duration: Duration,
}

/// Single-flight intensity ramp: up toward a peak, then back down to the baseline.
#[derive(Debug, Clone)]
pub struct PulseAnimation {
    baseline: f64,
    intensity: f64,
    ramp: Option<Ramp>,
    requested: Option<PulseProfile>,
}

impl PulseAnimation {
    /// Idle animation resting at `baseline`.
    pub fn new(baseline: f64) -> Self {
        Self {
            baseline,
            intensity: baseline,
            ramp: None,
            requested: None,
        }
    }

    /// Start a ramp with `profile` unless one is already running. Returns whether a
    /// ramp started; otherwise only the requested profile is updated.
    pub fn start(&mut self, profile: PulseProfile, now: Instant) -> bool {
        self.requested = Some(profile);
        if self.ramp.is_some() {
            trace!(peak = profile.peak, "Pulse already in flight");
            return false;
        }
        self.ramp = Some(Ramp {
            started: now,
            from: self.intensity,
            target: profile.peak,
            duration: profile.duration,
        });
        true
    }

    /// Advance to `now` and return the current intensity.
    pub fn advance(&mut self, now: Instant) -> f64 {
        let Some(ramp) = self.ramp else {
            return self.intensity;
        };

        let elapsed = now.saturating_duration_since(ramp.started).as_secs_f64();
        let t = if ramp.duration.is_zero() {
            1.0
        } else {
            (elapsed / ramp.duration.as_secs_f64()).min(1.0)
        };
        // Ease out cubic
        let eased = 1.0 - (1.0 - t).powi(3);

        if t >= 1.0 {
            self.intensity = self.baseline;
            self.ramp = None;
        } else if t < 0.5 {
            let up = ramp.from + (ramp.target - ramp.from) * (eased * 2.0);
            self.intensity = up.min(PULSE_CEILING);
        } else {
            self.intensity = ramp.target - (ramp.target - self.baseline) * ((eased - 0.5) * 2.0);
        }
        self.intensity
    }

    /// Whether a ramp is running.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.ramp.is_some()
    }

    /// Current intensity without advancing.
    #[must_use]
    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    /// Resting intensity.
    #[must_use]
    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    /// Most recently requested profile, whether or not it started a ramp.
    #[must_use]
    pub fn requested(&self) -> Option<PulseProfile> {
        self.requested
    }
}

// =============================================================================
// Throttle
// =============================================================================

/// Rate limiter for alert reactions.
#[derive(Debug, Clone)]
pub struct EffectThrottle {
    window: Duration,
    min_tier: Tier,
    indicator_hold: Duration,
    last_accepted: Option<Instant>,
    pulse: PulseAnimation,
    accepted: u64,
    dropped: u64,
}

impl EffectThrottle {
    /// Build from effects settings.
    pub fn new(config: &EffectsConfig) -> Self {
        Self {
            window: config.throttle_window,
            min_tier: config.alert_min_tier,
            indicator_hold: config.indicator_hold,
            last_accepted: None,
            pulse: PulseAnimation::new(config.baseline_intensity),
            accepted: 0,
            dropped: 0,
        }
    }

    /// Whether events of `tier` raise alerts at all.
    #[must_use]
    pub fn is_alert_worthy(&self, tier: Tier) -> bool {
        tier >= self.min_tier
    }

    /// Request a reaction. Returns `None` when the call falls inside the throttle window
    /// of the previous accepted trigger; such calls are dropped.
    pub fn trigger(&mut self, tier: Tier, magnitude: f64, now: Instant) -> Option<AlertReaction> {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.window {
                self.dropped += 1;
                trace!(%tier, magnitude, "Alert dropped by throttle");
                return None;
            }
        }
        self.last_accepted = Some(now);
        self.accepted += 1;

        let profile = PulseProfile::for_tier(tier);
        let pulse_started = self.pulse.start(profile, now);
        Some(AlertReaction {
            tier,
            magnitude,
            profile,
            pulse_started,
            indicator_until: now + self.indicator_hold,
        })
    }

    /// Advance the pulse; returns the current intensity.
    pub fn advance(&mut self, now: Instant) -> f64 {
        self.pulse.advance(now)
    }

    /// The pulse animation.
    #[must_use]
    pub fn pulse(&self) -> &PulseAnimation {
        &self.pulse
    }

    /// Triggers accepted so far.
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Triggers dropped inside the window so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle() -> EffectThrottle {
        EffectThrottle::new(&EffectsConfig::default())
    }

    #[test]
    fn calls_inside_window_are_dropped() {
        let mut throttle = throttle();
        let t0 = Instant::now();
        assert!(throttle.trigger(Tier::Extreme, 150.0, t0).is_some());
        assert!(throttle
            .trigger(Tier::Extreme, 300.0, t0 + Duration::from_millis(100))
            .is_none());
        assert!(throttle
            .trigger(Tier::Extreme, 300.0, t0 + Duration::from_millis(499))
            .is_none());
        assert!(throttle
            .trigger(Tier::Extreme, 300.0, t0 + Duration::from_millis(500))
            .is_some());
        assert_eq!(throttle.accepted(), 2);
        assert_eq!(throttle.dropped(), 2);
    }

    #[test]
    fn dropped_calls_do_not_extend_window() {
        let mut throttle = throttle();
        let t0 = Instant::now();
        throttle.trigger(Tier::Extreme, 1.0, t0);
        throttle.trigger(Tier::Extreme, 1.0, t0 + Duration::from_millis(400));
        assert!(throttle
            .trigger(Tier::Extreme, 1.0, t0 + Duration::from_millis(600))
            .is_some());
    }

    #[test]
    fn alert_tier_threshold() {
        let throttle = throttle();
        assert!(throttle.is_alert_worthy(Tier::Extreme));
        assert!(!throttle.is_alert_worthy(Tier::Notable));
    }

    #[test]
    fn pulse_is_single_flight() {
        let mut pulse = PulseAnimation::new(0.5);
        let t0 = Instant::now();
        assert!(pulse.start(PulseProfile::for_tier(Tier::Notable), t0));
        assert!(!pulse.start(
            PulseProfile::for_tier(Tier::Extreme),
            t0 + Duration::from_millis(100)
        ));
        // The second request is remembered but did not retarget the ramp
        assert_eq!(pulse.requested().map(|p| p.peak), Some(1.2));

        let mid = pulse.advance(t0 + Duration::from_millis(100));
        assert!(mid > 0.5 && mid <= PULSE_CEILING, "intensity {mid}");
        assert!(pulse.in_flight());
    }

    #[test]
    fn pulse_always_returns_to_baseline() {
        let mut pulse = PulseAnimation::new(0.5);
        let t0 = Instant::now();
        pulse.start(PulseProfile::for_tier(Tier::Extreme), t0);

        let mut t = t0;
        while pulse.in_flight() {
            t += Duration::from_millis(16);
            let value = pulse.advance(t);
            assert!(value <= PULSE_CEILING);
        }
        assert_eq!(pulse.intensity(), 0.5);
        assert!(t - t0 >= Duration::from_millis(400));

        // Lock released: a new ramp may start
        assert!(pulse.start(PulseProfile::for_tier(Tier::Notable), t));
    }

    #[test]
    fn reaction_carries_indicator_deadline() {
        let mut throttle = throttle();
        let t0 = Instant::now();
        let reaction = throttle.trigger(Tier::Extreme, 120.0, t0).unwrap();
        assert!(reaction.pulse_started);
        assert_eq!(reaction.indicator_until, t0 + Duration::from_millis(1500));
        assert_eq!(reaction.profile.shake, 0.8);
    }
}
