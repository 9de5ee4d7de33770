use std::fmt;

use serde::{Deserialize, Serialize};

/// Cell values of the navigation grid returned by the environment.
pub mod cell {
    pub const FREE: i32 = 0;
    pub const OBSTACLE: i32 = 1;
    pub const GOAL: i32 = 2;
    pub const AGENT: i32 = 3;
}

/// Row-major integer grid (occupancy map or navigation environment view).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grid(Vec<Vec<i32>>);

impl Grid {
    pub fn new(rows: Vec<Vec<i32>>) -> Self {
        Self(rows)
    }

    pub fn rows(&self) -> usize {
        self.0.len()
    }

    /// Width of the widest row; the server always sends rectangular grids.
    pub fn cols(&self) -> usize {
        self.0.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Vec::is_empty)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<i32> {
        self.0.get(row).and_then(|r| r.get(col)).copied()
    }

    pub fn cells(&self) -> impl Iterator<Item = i32> + '_ {
        self.0.iter().flat_map(|r| r.iter().copied())
    }

    pub fn count(&self, value: i32) -> usize {
        self.cells().filter(|&v| v == value).count()
    }

    /// First `(row, col)` holding `value`, scanning row by row.
    pub fn find(&self, value: i32) -> Option<(usize, usize)> {
        self.0.iter().enumerate().find_map(|(r, row)| {
            row.iter().position(|&v| v == value).map(|c| (r, c))
        })
    }

    pub fn as_rows(&self) -> &[Vec<i32>] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Up => "Move Up",
            Direction::Down => "Move Down",
            Direction::Left => "Move Left",
            Direction::Right => "Move Right",
        }
    }
}

/// Action code chosen by the remote policy. `-1` means no action taken yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(i32);

impl Action {
    pub const NONE: Action = Action(-1);

    pub fn new(code: i32) -> Self {
        Self(code)
    }

    pub fn code(self) -> i32 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Direction the environment applies for this code.
    pub fn direction(self) -> Option<Direction> {
        match self.0 {
            0 => Some(Direction::Up),
            1 => Some(Direction::Down),
            2 => Some(Direction::Left),
            3 => Some(Direction::Right),
            _ => None,
        }
    }
}

impl Default for Action {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction() {
            Some(d) => f.write_str(d.label()),
            None if self.is_none() => f.write_str("-"),
            None => write!(f, "action {}", self.0),
        }
    }
}

/// Reply of `rl_step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub grid: Grid,
    pub action: Action,
    pub reward: f64,
    pub done: bool,
}

/// Reply of `rl_reset_random` / `rl_reset_from_map`. Only the grid matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub grid: Grid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_result_parses_server_reply() {
        let raw = r#"{"grid": [[3, 0], [1, 2]], "reward": -0.01, "done": false, "action": 1}"#;
        let step: StepResult = serde_json::from_str(raw).unwrap();
        assert_eq!(step.action.direction(), Some(Direction::Down));
        assert_eq!(step.grid.find(cell::AGENT), Some((0, 0)));
        assert_eq!(step.grid.find(cell::GOAL), Some((1, 1)));
        assert_eq!(step.grid.count(cell::OBSTACLE), 1);
        assert!(!step.done);
    }

    #[test]
    fn reset_reply_ignores_extra_fields() {
        let raw = r#"{"grid": [[0, 0, 0]], "reward": 0.0, "done": false, "action": -1}"#;
        let reset: ResetResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(reset.grid.rows(), 1);
        assert_eq!(reset.grid.cols(), 3);
    }

    #[test]
    fn action_labels() {
        assert_eq!(Action::default(), Action::NONE);
        assert_eq!(Action::NONE.to_string(), "-");
        assert_eq!(Action::new(3).to_string(), "Move Right");
        assert_eq!(Action::new(9).to_string(), "action 9");
    }
}
