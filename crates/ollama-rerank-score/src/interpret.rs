use std::sync::LazyLock;

use regex::Regex;

use crate::traits::ScoreInterpreter;

static FIRST_NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"-?[0-9]+(?:\.[0-9]+)?").ok());

pub const DEFAULT_SCORE_SCALE: f32 = 10.0;
pub const NEUTRAL_SCORE: f32 = 0.5;

/// Reads the first number in the generated text as a score on `0..=scale`.
///
/// The number is divided by `scale` and clamped to `[0, 1]`. Text without any
/// number yields `fallback`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledScore {
    pub scale: f32,
    pub fallback: f32,
}

impl ScaledScore {
    pub const fn new(scale: f32) -> Self {
        Self {
            scale,
            fallback: NEUTRAL_SCORE,
        }
    }
}

impl Default for ScaledScore {
    fn default() -> Self {
        Self::new(DEFAULT_SCORE_SCALE)
    }
}

impl ScoreInterpreter for ScaledScore {
    fn interpret(&self, generated: &str) -> f32 {
        let Some(raw) = first_number(generated) else {
            return self.fallback;
        };
        (raw / self.scale).clamp(0.0, 1.0)
    }
}

pub fn first_number(text: &str) -> Option<f32> {
    let re = FIRST_NUMBER.as_ref()?;
    re.find(text)?.as_str().parse::<f32>().ok()
}
