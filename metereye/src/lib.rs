/**
MeterEye reads seven segment digital meters and on/off indicator lamps
from RTSP video streams and publishes normalised readings. The crate is
organised after a familiar micro-service pattern: devices are atomic
driver wrappers, components group them into units owned by controller
types, pure vision functions carry the recognition math, and a single
registry value holds the runtime state the serving surface reads from.
The `systems/ctme` binary wires these together behind the CLI.
*/

/// Components group devices, vision functions and queues into the
/// logical units of the service: camera workers, the supervisor, the
/// exporter fan-out and the preview service.
pub mod components;
/// Immutable configuration snapshots: model, loader with environment
/// substitution and validation, legacy migration.
pub mod config;
/// Devices that are an atomic unit, currently the RTSP stream source.
pub mod devices;
/// Typed error kinds and their propagation contracts.
pub mod errors;
/// Message structures leaving the system: readings, indicator
/// readings and camera status.
pub mod messages;
/// The process-wide runtime registry.
pub mod registry;
/// Development utilities: bounded queues, image codecs, test macros.
pub mod utils;
/// Pure image analysis: perspective geometry, seven segment
/// classification, indicator detection.
pub mod vision;
