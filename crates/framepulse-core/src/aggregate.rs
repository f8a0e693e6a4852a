//! Batch reduction - turns drained events into visual parameter updates
//!
//! Level events of the priorities configured for averaging collapse into one
//! update per target parameter per batch. Every other event maps 1:1 so no
//! discrete occurrence is lost; Critical always maps 1:1.

use crate::event::{AudioEvent, EventKind, ParameterId, Priority, Timestamp, VisualParameterUpdate};
use crate::lane::Batch;
use crate::settings::PerPriority;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lowest frequency mapped by pitch normalization (Hz)
const PITCH_MIN_HZ: f32 = 20.0;
/// Highest frequency mapped by pitch normalization (Hz)
const PITCH_MAX_HZ: f32 = 20_000.0;

/// Which events collapse and which parameters they drive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationRules {
    /// Average Level events per target parameter in these lanes
    pub average_levels: PerPriority<bool>,
    /// Parameter driven by Beat events
    pub beat_parameter: ParameterId,
    /// Parameter driven by Onset events
    pub onset_parameter: ParameterId,
    /// Parameter driven by Level events
    pub level_parameter: ParameterId,
    /// Parameter driven by Pitch events
    pub pitch_parameter: ParameterId,
}

impl Default for AggregationRules {
    fn default() -> Self {
        Self {
            average_levels: PerPriority::new(false, false, true, true),
            beat_parameter: ParameterId::new("beat.flash"),
            onset_parameter: ParameterId::new("onset.pulse"),
            level_parameter: ParameterId::new("level.intensity"),
            pitch_parameter: ParameterId::new("pitch.hue"),
        }
    }
}

impl AggregationRules {
    /// Target parameter for an event kind
    pub fn parameter_for(&self, kind: EventKind) -> &ParameterId {
        match kind {
            EventKind::Beat => &self.beat_parameter,
            EventKind::Onset => &self.onset_parameter,
            EventKind::Level => &self.level_parameter,
            EventKind::Pitch => &self.pitch_parameter,
        }
    }

    fn averages(&self, priority: Priority, kind: EventKind) -> bool {
        priority != Priority::Critical && kind == EventKind::Level && self.average_levels[priority]
    }
}

/// Reduces batches according to [`AggregationRules`]
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    rules: AggregationRules,
}

impl Aggregator {
    /// Create an aggregator
    pub fn new(rules: AggregationRules) -> Self {
        Self { rules }
    }

    /// Active rules
    pub fn rules(&self) -> &AggregationRules {
        &self.rules
    }

    /// Map one event to its update
    pub fn map_event(
        &self,
        event: &AudioEvent,
        frame_number: u64,
        generated_at: Timestamp,
    ) -> VisualParameterUpdate {
        VisualParameterUpdate {
            target_parameter_id: self.rules.parameter_for(event.kind).clone(),
            value: event_value(event),
            source_priority: event.priority,
            frame_number,
            generated_at,
        }
    }

    /// Reduce a batch to updates, preserving event order
    ///
    /// An averaged update takes the position of the first event that fed it.
    pub fn reduce(
        &self,
        batch: &Batch,
        frame_number: u64,
        generated_at: Timestamp,
    ) -> Vec<VisualParameterUpdate> {
        let mut updates: Vec<VisualParameterUpdate> = Vec::with_capacity(batch.len());
        // target -> (index into updates, running sum, count)
        let mut averaged: HashMap<ParameterId, (usize, f64, u32)> = HashMap::new();

        for event in batch.events() {
            if !self.rules.averages(event.priority, event.kind) {
                updates.push(self.map_event(event, frame_number, generated_at));
                continue;
            }

            let target = self.rules.parameter_for(event.kind);
            match averaged.get_mut(target) {
                Some((_, sum, count)) => {
                    *sum += f64::from(event_value(event));
                    *count += 1;
                }
                None => {
                    averaged.insert(
                        target.clone(),
                        (updates.len(), f64::from(event_value(event)), 1),
                    );
                    updates.push(self.map_event(event, frame_number, generated_at));
                }
            }
        }

        for (index, sum, count) in averaged.into_values() {
            updates[index].value = (sum / f64::from(count)) as f32;
        }

        updates
    }
}

/// Normalized value carried by an event
///
/// Pitch events with a frequency map log-linearly onto 0.0 - 1.0; everything
/// else carries its intensity.
fn event_value(event: &AudioEvent) -> f32 {
    match (event.kind, event.frequency) {
        (EventKind::Pitch, Some(hz)) => {
            let hz = hz.clamp(PITCH_MIN_HZ, PITCH_MAX_HZ);
            (hz / PITCH_MIN_HZ).ln() / (PITCH_MAX_HZ / PITCH_MIN_HZ).ln()
        }
        _ => event.intensity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::PriorityLane;
    use std::time::Duration;

    fn batch_of(priority: Priority, events: &[(EventKind, f32)]) -> Batch {
        let lane = PriorityLane::new(priority, 128, 128, Duration::from_millis(5), None);
        for (i, (kind, intensity)) in events.iter().enumerate() {
            lane.enqueue(AudioEvent::new(
                Timestamp::from_nanos(i as u64),
                priority,
                *kind,
                *intensity,
                i as u64,
            ))
            .unwrap();
        }
        lane.drain_batch(128, Duration::from_millis(50))
    }

    #[test]
    fn test_normal_levels_average_into_one_update() {
        let events: Vec<(EventKind, f32)> =
            (1..=10).map(|i| (EventKind::Level, i as f32 / 10.0)).collect();
        let batch = batch_of(Priority::Normal, &events);

        let updates = Aggregator::default().reduce(&batch, 7, Timestamp::from_nanos(99));
        assert_eq!(updates.len(), 1);
        assert!((updates[0].value - 0.55).abs() < 1e-5);
        assert_eq!(updates[0].frame_number, 7);
        assert_eq!(updates[0].target_parameter_id.as_str(), "level.intensity");
    }

    #[test]
    fn test_critical_maps_one_to_one() {
        let batch = batch_of(
            Priority::Critical,
            &[(EventKind::Level, 0.2), (EventKind::Level, 0.4), (EventKind::Beat, 1.0)],
        );
        let updates = Aggregator::default().reduce(&batch, 1, Timestamp::default());
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].value, 0.2);
        assert_eq!(updates[1].value, 0.4);
    }

    #[test]
    fn test_discrete_kinds_keep_order_around_averaged_levels() {
        let batch = batch_of(
            Priority::Normal,
            &[
                (EventKind::Beat, 1.0),
                (EventKind::Level, 0.2),
                (EventKind::Onset, 0.7),
                (EventKind::Level, 0.6),
            ],
        );
        let updates = Aggregator::default().reduce(&batch, 3, Timestamp::default());
        let targets: Vec<&str> = updates
            .iter()
            .map(|u| u.target_parameter_id.as_str())
            .collect();
        assert_eq!(targets, vec!["beat.flash", "level.intensity", "onset.pulse"]);
        assert!((updates[1].value - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_high_levels_not_averaged_by_default() {
        let batch = batch_of(
            Priority::High,
            &[(EventKind::Level, 0.2), (EventKind::Level, 0.6)],
        );
        let updates = Aggregator::default().reduce(&batch, 1, Timestamp::default());
        assert_eq!(updates.len(), 2);
    }

    #[test]
    fn test_pitch_value_is_normalized_frequency() {
        let event = AudioEvent::new(
            Timestamp::default(),
            Priority::High,
            EventKind::Pitch,
            0.3,
            0,
        )
        .with_frequency(20_000.0);
        let update = Aggregator::default().map_event(&event, 1, Timestamp::default());
        assert!((update.value - 1.0).abs() < 1e-6);

        let low = event.clone().with_frequency(20.0);
        let update = Aggregator::default().map_event(&low, 1, Timestamp::default());
        assert!(update.value.abs() < 1e-6);
    }
}
