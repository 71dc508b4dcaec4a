/// Components group devices and pure functions into the logical units
/// that make up the monitoring service. Each component is created by
/// consuming a configuration and is driven by a controller type that
/// owns its execution context.
pub mod monitoring {
    /// One soft real-time frame loop per enabled camera.
    pub mod worker;
    /// Reconciles the running worker set against the configuration
    /// snapshot and coordinates shutdown.
    pub mod supervisor;
    /// Synchronous ad-hoc recognition against the latest frame, used
    /// by the configuration editor.
    pub mod preview;
}

/// Fan-out of readings to external sinks.
pub mod exporting {
    /// Single entry queue feeding one queue per enabled sink.
    pub mod dispatcher;
    /// Batched JSON POSTs with retry.
    pub mod http;
    /// Row per reading persistence with hourly retention.
    pub mod database;
    /// Message per reading publication to a broker.
    pub mod mqtt;
}

/// Helpful prelude when wiring the service together.
pub mod prelude {
    pub use crate::components::exporting::dispatcher::{DispatchQueue, ExporterController, ExporterHandle};
    pub use crate::components::monitoring::preview::{preview, PreviewOutcome, PreviewTarget};
    pub use crate::components::monitoring::supervisor::Supervisor;
    pub use crate::components::monitoring::worker::{CameraWorkerController, CameraWorkerHandle};
}
