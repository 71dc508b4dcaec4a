/// Standardise how readings are sent out of the monitoring system.
/// These are the exact JSON shapes that the HTTP batch exporter and
/// the MQTT publisher put on the wire, and that the REST surface
/// returns to dashboard clients.
pub mod readings;
/// Camera status snapshots surfaced through the `/api/status` and
/// `/api/cameras/{id}` contracts.
pub mod status;
