use crate::core::request::GateRequest;

/// Contract between the gate core and a per-device adapter. The core never
/// looks inside payloads, it only routes by address and kind.
pub trait Accessory: Send + Sync {
    /// Immutable query template: kind, cluster, id and optional source.
    fn template(&self) -> GateRequest;

    /// Applies decoded gate state to the adapter's cache.
    fn load_response(&self, response: &GateRequest) -> anyhow::Result<()>;

    /// Pushes the cached state to the downstream protocol representation.
    fn sync(&self);
}
