/// Devices are the atomic units the monitoring components are built
/// from. Their responsibilities do not change based on which camera or
/// site they serve.
pub mod hardware {
    /// RTSP stream source backed by a gstreamer decode pipeline.
    pub mod rtsp;
}

/// Scripted in-memory video sources so the worker and supervisor
/// suites run without a camera on the network.
#[cfg(test)]
pub mod scripted;
