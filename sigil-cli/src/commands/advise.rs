//! One-shot movement advice.

use sigil::advisor::advise;
use sigil::coord::Coordinate;

use crate::error::CliError;

/// Print the instructions for moving between two positions.
pub fn run(from_x: f64, from_y: f64, to_x: f64, to_y: f64) -> Result<(), CliError> {
    for (name, value) in [("from_x", from_x), ("from_y", from_y), ("to_x", to_x), ("to_y", to_y)] {
        if !value.is_finite() {
            return Err(CliError::Config(format!("{} must be a finite number", name)));
        }
    }

    println!(
        "{}",
        advise(Coordinate::new(from_x, from_y), Coordinate::new(to_x, to_y))
    );
    Ok(())
}
