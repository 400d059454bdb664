use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Stub backend for tests and dry runs. Replays a scripted sequence of
/// per-frame results; once the script is exhausted it returns nothing, or
/// starts over when cycling.
pub struct StubBackend {
    script: Vec<Vec<Detection>>,
    cursor: usize,
    cycle: bool,
}

impl StubBackend {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script,
            cursor: 0,
            cycle: false,
        }
    }

    /// Backend that never detects anything.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn cycling(mut self) -> Self {
        self.cycle = true;
        self
    }

    /// Looping demo script: nothing, a gun, a pair of scissors.
    pub fn demo() -> Result<Self> {
        let gun = Detection::new(BoundingBox::new(40, 40, 200, 160)?, 0.92, "Gun")?;
        let scissor = Detection::new(BoundingBox::new(300, 200, 420, 300)?, 0.5, "Scissor")?;
        Ok(Self::new(vec![Vec::new(), vec![gun], vec![scissor]]).cycling())
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::empty()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        if self.cursor >= self.script.len() {
            if !self.cycle {
                return Ok(Vec::new());
            }
            self.cursor = 0;
        }
        let out = self.script[self.cursor].clone();
        self.cursor += 1;
        Ok(out)
    }
}
