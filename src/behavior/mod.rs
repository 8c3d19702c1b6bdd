//! Behavioral pointer-motion classifier and click admission.
//!
//! A bounded ring buffer of pointer samples feeds a curve-vs-line
//! classifier: human pointer paths curve, scripted paths tend to run
//! straight. The click gate then combines that signal with four other
//! independent checks to decide whether a click on the hidden-mode
//! affordance is allowed through.

use std::collections::VecDeque;

use crate::page::PointerEvent;

/// Ring buffer capacity; oldest samples are evicted first.
pub const SAMPLE_CAPACITY: usize = 50;
/// Below this many samples the classifier stays undecided.
const MIN_SAMPLES: usize = 10;
/// Angle delta (radians) under which a motion triple counts as straight.
const STRAIGHT_EPSILON: f64 = 0.1;
/// Minimum number of buffered samples for the movement admission check.
const MOVEMENT_THRESHOLD: usize = 5;
/// Hover dwell (ms) required before a click looks deliberate.
const HOVER_DWELL_MS: f64 = 200.0;
/// Time the buffer must span (ms) for motion to look naturally paced.
const NATURAL_SPAN_MS: f64 = 500.0;
/// Checks that must pass for a click to be admitted.
const REQUIRED_CHECKS: u8 = 3;

/// One pointer-move observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: f64,
}

impl From<PointerEvent> for MotionSample {
    fn from(event: PointerEvent) -> Self {
        Self {
            x: event.x,
            y: event.y,
            timestamp_ms: event.timestamp_ms,
        }
    }
}

/// Rolling pointer-motion classifier.
#[derive(Debug, Default)]
pub struct MotionTracker {
    samples: VecDeque<MotionSample>,
    human_likely: bool,
}

impl MotionTracker {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(SAMPLE_CAPACITY),
            human_likely: false,
        }
    }

    /// Append a sample, evicting the oldest beyond capacity, and re-classify
    /// the whole buffer.
    pub fn record(&mut self, sample: MotionSample) {
        self.samples.push_back(sample);
        if self.samples.len() > SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
        self.reclassify();
    }

    pub fn human_likely(&self) -> bool {
        self.human_likely
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Milliseconds between the oldest and newest buffered samples.
    pub fn span_ms(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => last.timestamp_ms - first.timestamp_ms,
            _ => 0.0,
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.human_likely = false;
    }

    fn reclassify(&mut self) {
        if self.samples.len() < MIN_SAMPLES {
            return;
        }

        let mut straight = 0u32;
        let mut curved = 0u32;

        for i in 2..self.samples.len() {
            let p1 = self.samples[i - 2];
            let p2 = self.samples[i - 1];
            let p3 = self.samples[i];

            let angle1 = (p2.y - p1.y).atan2(p2.x - p1.x);
            let angle2 = (p3.y - p2.y).atan2(p3.x - p2.x);
            if (angle1 - angle2).abs() < STRAIGHT_EPSILON {
                straight += 1;
            } else {
                curved += 1;
            }
        }

        self.human_likely = curved > straight * 2;
    }
}

/// Result of the five independent admission checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClickChecks {
    /// The host attests the event came from a real input device.
    pub trusted: bool,
    /// Enough pointer movement was seen before the click.
    pub has_movement: bool,
    /// The motion classifier currently reads the visitor as human.
    pub human_like: bool,
    /// The pointer dwelled on the affordance before clicking.
    pub hovered: bool,
    /// The buffered motion spans a natural amount of time.
    pub natural_span: bool,
}

impl ClickChecks {
    pub fn passed_count(&self) -> u8 {
        [
            self.trusted,
            self.has_movement,
            self.human_like,
            self.hovered,
            self.natural_span,
        ]
        .iter()
        .filter(|check| **check)
        .count() as u8
    }
}

/// Admission verdict with diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickAdmission {
    pub passed: bool,
    pub score: u8,
    pub checks: ClickChecks,
}

/// What the affordance should do with a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Proceed to the real challenge.
    Admitted(ClickAdmission),
    /// Prompt the visitor to move the pointer naturally and try again.
    Retry(ClickAdmission),
    /// Attempts are exhausted; the affordance is unusable until reload.
    Exhausted,
}

/// Per-session click gate in front of the hidden-mode affordance.
#[derive(Debug)]
pub struct ClickGate {
    max_attempts: u32,
    failed_attempts: u32,
    hover_started_ms: Option<f64>,
}

impl ClickGate {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            failed_attempts: 0,
            hover_started_ms: None,
        }
    }

    /// The pointer entered the affordance.
    pub fn hover_start(&mut self, now_ms: f64) {
        self.hover_started_ms = Some(now_ms);
    }

    /// The pointer left the affordance.
    pub fn hover_end(&mut self) {
        self.hover_started_ms = None;
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn exhausted(&self) -> bool {
        self.failed_attempts >= self.max_attempts
    }

    /// Evaluate a click against the five admission checks. Needs at least
    /// three to pass. Once attempts are exhausted every further click is
    /// rejected outright, whatever the checks would say.
    pub fn evaluate(&mut self, event: &PointerEvent, tracker: &MotionTracker) -> ClickOutcome {
        if self.exhausted() {
            return ClickOutcome::Exhausted;
        }

        let checks = ClickChecks {
            trusted: event.trusted,
            has_movement: tracker.len() > MOVEMENT_THRESHOLD,
            human_like: tracker.human_likely(),
            hovered: self
                .hover_started_ms
                .is_some_and(|start| event.timestamp_ms - start > HOVER_DWELL_MS),
            natural_span: tracker.span_ms() > NATURAL_SPAN_MS,
        };
        let score = checks.passed_count();
        let admission = ClickAdmission {
            passed: score >= REQUIRED_CHECKS,
            score,
            checks,
        };

        if admission.passed {
            ClickOutcome::Admitted(admission)
        } else {
            self.failed_attempts += 1;
            if self.exhausted() {
                ClickOutcome::Exhausted
            } else {
                ClickOutcome::Retry(admission)
            }
        }
    }
}

impl Default for ClickGate {
    fn default() -> Self {
        Self::new(3)
    }
}
