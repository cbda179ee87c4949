//! Difficulty retargeting
//!
//! Pure function targeting a ten-minute inter-block period: difficulty
//! scales linearly with the block rate observed over the last ten blocks.

use crate::consensus::Block;
use crate::constants::{DIFFICULTY_FLOOR, RETARGET_WINDOW, TARGET_SPACING_MINUTES};

/// Required difficulty threshold for the block at `index`.
///
/// Below the retarget window the floor applies. Otherwise the ten
/// preceding blocks are examined: the mean of their nine inter-block
/// delays (in minutes) and the mean difficulty of the window's last
/// nine blocks give `round((10 / mean_delay) * mean_difficulty)`.
/// A window whose timestamps all collide retains the previous block's
/// difficulty rather than dividing by zero.
pub fn retarget(chain: &[Block], index: usize) -> i64 {
    if index < RETARGET_WINDOW {
        return DIFFICULTY_FLOOR;
    }

    let window = &chain[index - RETARGET_WINDOW..index];
    let span = (RETARGET_WINDOW - 1) as f64;

    let mut delay_total = 0.0;
    let mut difficulty_total = 0.0;
    for position in 1..window.len() {
        let seconds = window[position].header.timestamp - window[position - 1].header.timestamp;
        delay_total += seconds as f64 / 60.0;
        difficulty_total += window[position].proof.difficulty_threshold as f64;
    }

    let mean_delay = delay_total / span;
    let mean_difficulty = difficulty_total / span;

    if mean_delay == 0.0 {
        return chain[index - 1].proof.difficulty_threshold;
    }

    ((TARGET_SPACING_MINUTES / mean_delay) * mean_difficulty).round() as i64
}
