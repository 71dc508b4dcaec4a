/// Immutable configuration snapshots consumed by the supervisor and
/// the camera workers. Snapshots are produced by the loader, validated
/// as a whole and only ever replaced wholesale; no component mutates a
/// snapshot in place.
pub mod model;
/// Reading, substituting and validating YAML documents, plus the
/// canonical writer used for `save` and the migration tool.
pub mod loader;
/// One-shot conversion of the legacy JSON configuration layout into
/// the canonical YAML document.
pub mod migrate;
