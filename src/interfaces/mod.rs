//! Outer surfaces: the CSV command script format and its runner.

pub mod csv;
pub mod script;
