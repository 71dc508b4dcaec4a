/// Encoding and annotation helpers for the frames served to the
/// dashboard.
pub mod image;
/// Bounded drop-oldest queue shared by the exporter dispatcher and
/// the per sink consumers.
pub mod queue;
/// Development utilities for locating test fixtures.
pub mod tests;
