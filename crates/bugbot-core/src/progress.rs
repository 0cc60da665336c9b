//! Deterministic stage-to-progress mapping
//!
//! Progress is computed exclusively by the orchestrator from this table; a
//! scan's progress never decreases, and jumps to 100 on any terminal state.

use crate::models::Stage;

/// Progress band for one stage: (stage, start %, end %)
pub const STAGE_PROGRESS: [(Stage, u8, u8); 6] = [
    (Stage::Recon, 10, 30),
    (Stage::Static, 35, 50),
    (Stage::Fuzzing, 50, 65),
    (Stage::Monitoring, 65, 75),
    (Stage::Triage, 80, 90),
    (Stage::Reporting, 95, 100),
];

/// Progress value set when a stage is dispatched.
pub fn stage_start(stage: Stage) -> u8 {
    band(stage).0
}

/// Progress value set when a stage returns.
pub fn stage_end(stage: Stage) -> u8 {
    band(stage).1
}

fn band(stage: Stage) -> (u8, u8) {
    // STAGE_PROGRESS covers every variant; the fallback is unreachable.
    STAGE_PROGRESS
        .iter()
        .find(|(s, _, _)| *s == stage)
        .map(|(_, start, end)| (*start, *end))
        .unwrap_or((0, 0))
}

/// Clamp a proposed progress value so the stored sequence stays monotonic.
///
/// A retry that would report a lower value is held at the previously observed
/// maximum; values above 100 are capped.
pub fn clamp_monotonic(current: u8, proposed: u8) -> u8 {
    proposed.max(current).min(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_monotonic_across_the_pipeline() {
        let mut last_end = 0;
        for stage in Stage::ORDER {
            let (start, end) = (stage_start(stage), stage_end(stage));
            assert!(start >= last_end, "{stage} start {start} < prior end {last_end}");
            assert!(end > start || stage == Stage::Reporting && end == 100);
            assert!(end >= start);
            last_end = end;
        }
        assert_eq!(last_end, 100);
    }

    #[test]
    fn clamp_never_decreases() {
        assert_eq!(clamp_monotonic(50, 35), 50);
        assert_eq!(clamp_monotonic(50, 65), 65);
        assert_eq!(clamp_monotonic(99, 250), 100);
    }
}
