//! Outer surface of the binary: CSV scenario scripts in, loan report out.

pub mod csv;
pub mod scenario;
