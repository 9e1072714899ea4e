//! Movement advisor: turns a recommended position into spoken-style directions.
//!
//! The horizontal axis comes first ("right"/"left"), then the vertical axis
//! ("forward"/"backward"). Zero checks are exact, so any nonzero delta
//! produces an instruction.

use crate::coord::Coordinate;

/// Returned when the recommended position equals the current one.
pub const NO_MOVEMENT: &str = "No movement needed";

/// Separator between the horizontal and vertical instruction.
pub const INSTRUCTION_SEPARATOR: &str = ", ";

/// Derive movement instructions from `current` to `next`.
///
/// Deterministic and side-effect free.
///
/// ```
/// use sigil::advisor::advise;
/// use sigil::coord::Coordinate;
///
/// let text = advise(Coordinate::new(0.0, 0.0), Coordinate::new(5.0, 0.0));
/// assert_eq!(text, "Move right 5 meters");
/// ```
pub fn advise(current: Coordinate, next: Coordinate) -> String {
    let instructions: Vec<String> = [
        axis_instruction(next.x() - current.x(), "right", "left"),
        axis_instruction(next.y() - current.y(), "forward", "backward"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if instructions.is_empty() {
        NO_MOVEMENT.to_string()
    } else {
        instructions.join(INSTRUCTION_SEPARATOR)
    }
}

fn axis_instruction(delta: f64, positive: &str, negative: &str) -> Option<String> {
    if delta > 0.0 {
        Some(format!("Move {} {} meters", positive, delta))
    } else if delta < 0.0 {
        Some(format!("Move {} {} meters", negative, delta.abs()))
    } else {
        None
    }
}
