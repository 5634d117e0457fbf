//! Aggregate progress over a whole request
//!
//! The tool reports per-item byte counts and item completions. This folds
//! them into one percentage that only moves forward:
//!
//! `floor((completed + item_fraction) / total * 95)`, held below 95 while
//! items are still transferring. 98 is reached when post-processing starts
//! and 100 only on success.

use crate::acquisition::{ItemHint, ToolEvent};

/// Share of the bar covered by the transfer phase
const TRANSFER_SHARE: f64 = 95.0;

/// Highest percentage reachable before finalization starts
pub const TRANSFER_CEILING: u8 = 94;

/// Checkpoint emitted when tagging and relocation start
pub const FINALIZING: u8 = 98;

pub const COMPLETE: u8 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub total_items: u32,
    pub completed: u32,
    /// Progress of the in-flight item, in [0, 1]
    pub item_fraction: f64,
    pub percent: u8,
    pub label: String,
}

impl ProgressState {
    pub fn new(total_items: u32) -> Self {
        Self {
            total_items: total_items.max(1),
            completed: 0,
            item_fraction: 0.0,
            percent: 0,
            label: "Starting download...".to_string(),
        }
    }

    /// Fold one tool event into a new state
    pub fn apply(&self, event: &ToolEvent) -> Self {
        match event {
            ToolEvent::Downloading {
                downloaded_bytes: Some(downloaded),
                total_bytes: Some(total),
                item,
            } if *total > 0 => {
                let fraction = (*downloaded as f64 / *total as f64).clamp(0.0, 1.0);
                let mut next = self.clone();
                next.item_fraction = fraction;
                next.percent = next.overall_percent();
                next.label = self.downloading_label(item, fraction);
                next
            }
            // Unknown length: nothing to report until the item finishes
            ToolEvent::Downloading { .. } => self.clone(),
            ToolEvent::Finished { item } => {
                let mut next = self.clone();
                next.completed = (self.completed + 1).min(self.total_items);
                next.item_fraction = 0.0;
                next.percent = next.overall_percent();
                next.label = match item.display_name() {
                    Some(name) => format!("Processing {}...", name),
                    None => "Processing...".to_string(),
                };
                next
            }
        }
    }

    /// State once the tool has finished and files are being tagged
    pub fn finalizing(&self) -> Self {
        Self {
            percent: self.percent.max(FINALIZING),
            label: "Tagging and moving files...".to_string(),
            ..self.clone()
        }
    }

    pub fn complete(&self, delivered: usize) -> Self {
        Self {
            completed: self.total_items,
            item_fraction: 0.0,
            percent: COMPLETE,
            label: format!("Downloaded {} track(s)", delivered),
            ..self.clone()
        }
    }

    fn overall_percent(&self) -> u8 {
        let fraction = (self.completed as f64 + self.item_fraction) / self.total_items as f64;
        let scaled = (fraction * TRANSFER_SHARE).floor() as u8;
        scaled.min(TRANSFER_CEILING).max(self.percent)
    }

    fn downloading_label(&self, item: &ItemHint, fraction: f64) -> String {
        let index = (self.completed + 1).min(self.total_items);
        let item_percent = (fraction * 100.0).round() as u32;
        match item.display_name() {
            Some(name) => format!(
                "Downloading {}/{}: {} ({}%)",
                index, self.total_items, name, item_percent
            ),
            None => format!(
                "Downloading {}/{} ({}%)",
                index, self.total_items, item_percent
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloading(done: u64, total: u64) -> ToolEvent {
        ToolEvent::Downloading {
            downloaded_bytes: Some(done),
            total_bytes: Some(total),
            item: ItemHint {
                position: None,
                artist: Some("Band".to_string()),
                title: Some("Song".to_string()),
            },
        }
    }

    fn finished() -> ToolEvent {
        ToolEvent::Finished {
            item: ItemHint::default(),
        }
    }

    #[test]
    fn test_fraction_math() {
        let state = ProgressState::new(2);
        let state = state.apply(&downloading(50, 100));
        // (0 + 0.5) / 2 * 95 = 23.75
        assert_eq!(state.percent, 23);
        assert_eq!(state.label, "Downloading 1/2: Band - Song (50%)");

        let state = state.apply(&finished());
        assert_eq!(state.completed, 1);
        // 1 / 2 * 95 = 47.5
        assert_eq!(state.percent, 47);

        let state = state.apply(&downloading(1, 3));
        assert_eq!(state.label, "Downloading 2/2: Band - Song (33%)");
    }

    #[test]
    fn test_unknown_size_emits_nothing() {
        let state = ProgressState::new(3).apply(&downloading(10, 40));
        let unknown = ToolEvent::Downloading {
            downloaded_bytes: Some(999),
            total_bytes: None,
            item: ItemHint::default(),
        };
        assert_eq!(state.apply(&unknown), state);

        // The item still counts once it finishes
        assert_eq!(state.apply(&unknown).apply(&finished()).completed, 1);
    }

    #[test]
    fn test_never_exceeds_ceiling_during_transfer() {
        let mut state = ProgressState::new(1);
        state = state.apply(&downloading(100, 100));
        assert_eq!(state.percent, TRANSFER_CEILING);
        state = state.apply(&finished());
        assert_eq!(state.percent, TRANSFER_CEILING);

        // Extra finish events from the tool cannot push it further
        state = state.apply(&finished());
        assert_eq!(state.completed, 1);
        assert_eq!(state.percent, TRANSFER_CEILING);
    }

    #[test]
    fn test_monotonic_over_noisy_stream() {
        let events = vec![
            downloading(10, 100),
            downloading(80, 100),
            // Tool restarted the fragment and reports fewer bytes
            downloading(20, 100),
            finished(),
            downloading(5, 0),
            downloading(70, 100),
            finished(),
            downloading(30, 100),
            finished(),
        ];

        let mut state = ProgressState::new(3);
        let mut last = state.percent;
        for event in &events {
            state = state.apply(event);
            assert!(state.percent >= last, "{} < {}", state.percent, last);
            assert!(state.percent <= TRANSFER_CEILING);
            last = state.percent;
        }

        let state = state.finalizing();
        assert_eq!(state.percent, FINALIZING);
        assert_eq!(state.complete(3).percent, COMPLETE);
    }
}
