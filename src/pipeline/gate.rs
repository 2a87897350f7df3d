use crate::error::PipelineError;

/// Default number of iterations between persisted detections.
pub const DEFAULT_CADENCE: u64 = 5;

/// Rate-limits persistence while a detection stays in view.
///
/// Only iterations whose index is a multiple of the cadence may persist, so a
/// condition lasting many frames writes roughly one frame in `cadence`.
#[derive(Debug, Clone, Copy)]
pub struct EventGate {
    cadence: u64,
}

impl Default for EventGate {
    fn default() -> Self {
        Self {
            cadence: DEFAULT_CADENCE,
        }
    }
}

impl EventGate {
    pub fn new(cadence: u64) -> Result<Self, PipelineError> {
        if cadence == 0 {
            return Err(PipelineError::Config("save cadence must be at least 1".into()));
        }
        Ok(Self { cadence })
    }

    pub fn cadence(&self) -> u64 {
        self.cadence
    }

    pub fn should_persist(&self, iteration: u64, events_present: bool) -> bool {
        events_present && iteration % self.cadence == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_count_matches_cadence_multiples() {
        for cadence in 1..=12u64 {
            let gate = EventGate::new(cadence).unwrap();
            for n in 0..60u64 {
                let persisted = (0..n).filter(|&i| gate.should_persist(i, true)).count() as u64;
                let expected = (0..n).filter(|i| i % cadence == 0).count() as u64;
                assert_eq!(persisted, expected, "cadence {cadence}, n {n}");
            }
        }
    }

    #[test]
    fn absent_events_never_persist() {
        for cadence in 1..=7u64 {
            let gate = EventGate::new(cadence).unwrap();
            assert!((0..100).all(|i| !gate.should_persist(i, false)));
        }
    }

    #[test]
    fn zero_cadence_is_rejected() {
        assert!(EventGate::new(0).is_err());
    }

    #[test]
    fn default_cadence_is_five() {
        let gate = EventGate::default();
        assert!(gate.should_persist(0, true));
        assert!(!gate.should_persist(4, true));
        assert!(gate.should_persist(5, true));
    }
}
