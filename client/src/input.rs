//! Scripted input for headless clients
//!
//! Stands in for keyboard polling: a pattern such as `right,right,up+left`
//! yields one `InputState` per tick and loops forever. With wandering
//! enabled the script instead picks a random direction every few ticks.

use rand::Rng;
use shared::InputState;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty input pattern")]
    Empty,

    #[error("unknown direction '{0}' (expected up, down, left, right or idle)")]
    UnknownDirection(String),
}

/// Parses one step: directions joined with `+`, or `idle`.
fn parse_step(step: &str) -> Result<InputState, PatternError> {
    let mut input = InputState::default();
    for direction in step.split('+').map(str::trim) {
        match direction.to_ascii_lowercase().as_str() {
            "up" | "w" => input.up = true,
            "down" | "s" => input.down = true,
            "left" | "a" => input.left = true,
            "right" | "d" => input.right = true,
            "idle" | "" => {}
            _ => return Err(PatternError::UnknownDirection(direction.to_string())),
        }
    }
    Ok(input)
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputPattern {
    steps: Vec<InputState>,
}

impl FromStr for InputPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(PatternError::Empty);
        }
        let steps = s
            .split(',')
            .map(parse_step)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { steps })
    }
}

impl InputPattern {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

pub struct InputScript {
    pattern: InputPattern,
    tick: usize,
    wander_every: Option<usize>,
    current: InputState,
}

impl InputScript {
    pub fn new(pattern: InputPattern) -> Self {
        Self {
            pattern,
            tick: 0,
            wander_every: None,
            current: InputState::default(),
        }
    }

    /// Random walk that changes direction every `every` ticks.
    pub fn wander(every: usize) -> Self {
        Self {
            pattern: InputPattern {
                steps: vec![InputState::default()],
            },
            tick: 0,
            wander_every: Some(every.max(1)),
            current: InputState::default(),
        }
    }

    /// Input for the next tick.
    pub fn next_input(&mut self) -> InputState {
        let tick = self.tick;
        self.tick += 1;

        match self.wander_every {
            Some(every) => {
                if tick % every == 0 {
                    self.current = random_direction(&mut rand::thread_rng());
                }
                self.current.clone()
            }
            None => self.pattern.steps[tick % self.pattern.steps.len()].clone(),
        }
    }
}

fn random_direction<R: Rng>(rng: &mut R) -> InputState {
    InputState {
        up: rng.gen_bool(0.5),
        down: rng.gen_bool(0.5),
        left: rng.gen_bool(0.5),
        right: rng.gen_bool(0.5),
        name: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_direction() {
        let pattern: InputPattern = "right".parse().unwrap();
        assert_eq!(pattern.len(), 1);
        assert!(pattern.steps[0].right);
        assert!(!pattern.steps[0].left);
    }

    #[test]
    fn test_parse_combined_and_idle_steps() {
        let pattern: InputPattern = "up+left, idle ,D".parse().unwrap();
        assert_eq!(pattern.len(), 3);
        assert!(pattern.steps[0].up && pattern.steps[0].left);
        assert!(pattern.steps[1].is_idle());
        assert!(pattern.steps[2].right);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<InputPattern>(), Err(PatternError::Empty));
        assert_eq!(
            "right,jump".parse::<InputPattern>(),
            Err(PatternError::UnknownDirection("jump".to_string()))
        );
    }

    #[test]
    fn test_script_cycles_through_pattern() {
        let mut script = InputScript::new("left,right,idle".parse().unwrap());
        let ticks: Vec<InputState> = (0..6).map(|_| script.next_input()).collect();

        assert!(ticks[0].left);
        assert!(ticks[1].right);
        assert!(ticks[2].is_idle());
        assert_eq!(ticks[3], ticks[0]);
        assert_eq!(ticks[5], ticks[2]);
    }

    #[test]
    fn test_wander_holds_direction_between_changes() {
        let mut script = InputScript::wander(4);
        let first = script.next_input();
        for _ in 0..3 {
            assert_eq!(script.next_input(), first);
        }
    }

    #[test]
    fn test_random_direction_has_no_name() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            assert!(random_direction(&mut rng).name.is_empty());
        }
    }
}
