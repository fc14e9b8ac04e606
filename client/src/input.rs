//! Held-key sources for the headless client.
//!
//! A real display surface would report the keys the user holds. The headless
//! client replays a script instead, e.g. `D:500,:300,WA:200` holds D for
//! 500 ms, nothing for 300 ms, then W and A for 200 ms.

use shared::KeySet;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Reports the keys currently held by the local user.
pub trait InputSource {
    fn held(&mut self) -> KeySet;
}

/// A constant set of held keys.
impl InputSource for KeySet {
    fn held(&mut self) -> KeySet {
        *self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("step {0:?} is not KEYS:MILLIS")]
    Step(String),
    #[error("unknown key in step {0:?}")]
    Key(String),
}

#[derive(Debug, Clone)]
pub struct ScriptedInput {
    steps: Vec<(KeySet, Duration)>,
    started: Option<Instant>,
}

impl ScriptedInput {
    pub fn new(steps: Vec<(KeySet, Duration)>) -> Self {
        Self { steps, started: None }
    }

    pub fn parse(script: &str) -> Result<Self, ScriptError> {
        let mut steps = Vec::new();
        for step in script.split(',').map(str::trim).filter(|step| !step.is_empty()) {
            let (letters, millis) = step
                .split_once(':')
                .ok_or_else(|| ScriptError::Step(step.to_string()))?;
            let keys = KeySet::parse(letters.trim()).ok_or_else(|| ScriptError::Key(step.to_string()))?;
            let millis: u64 = millis
                .trim()
                .parse()
                .map_err(|_| ScriptError::Step(step.to_string()))?;
            steps.push((keys, Duration::from_millis(millis)));
        }
        Ok(Self::new(steps))
    }

    /// Total length of the script.
    pub fn duration(&self) -> Duration {
        self.steps.iter().map(|(_, length)| *length).sum()
    }

    /// Keys held `elapsed` after the script started. Nothing once it is over.
    pub fn held_at(&self, elapsed: Duration) -> KeySet {
        let mut end = Duration::ZERO;
        for (keys, length) in &self.steps {
            end += *length;
            if elapsed < end {
                return *keys;
            }
        }
        KeySet::EMPTY
    }
}

impl InputSource for ScriptedInput {
    /// The script clock starts at the first call.
    fn held(&mut self) -> KeySet {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.held_at(started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::LogicalKey;

    #[test]
    fn test_parse_script() {
        let script = ScriptedInput::parse("D:500, :300,WA:200").unwrap();
        assert_eq!(script.duration(), Duration::from_millis(1000));

        let d = KeySet::parse("D").unwrap();
        assert_eq!(script.held_at(Duration::ZERO), d);
        assert_eq!(script.held_at(Duration::from_millis(499)), d);
        assert!(script.held_at(Duration::from_millis(500)).is_empty());

        let wa = script.held_at(Duration::from_millis(900));
        assert!(wa.contains(LogicalKey::W) && wa.contains(LogicalKey::A));
        assert!(script.held_at(Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(ScriptedInput::parse("D500"), Err(ScriptError::Step(_))));
        assert!(matches!(ScriptedInput::parse("X:10"), Err(ScriptError::Key(_))));
        assert!(matches!(ScriptedInput::parse("D:soon"), Err(ScriptError::Step(_))));
        assert_eq!(ScriptedInput::parse("").unwrap().duration(), Duration::ZERO);
    }

    #[test]
    fn test_constant_source() {
        let mut held = KeySet::parse("S").unwrap();
        assert_eq!(held.held(), KeySet::parse("S").unwrap());
    }
}
