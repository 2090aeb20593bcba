//! Shape diagnostics side channel

/// Receives the shape of each intermediate tensor when verbose mode is on.
///
/// `module` names the reporting component ("self_attention", "additive_attention"),
/// `label` the tensor ("Q", "attention", "output", ...).
pub trait ShapeObserver: Send + Sync {
    fn observe(&self, module: &'static str, label: &'static str, shape: &[usize]);
}

/// Forwards every report to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ShapeObserver for TracingObserver {
    fn observe(&self, module: &'static str, label: &'static str, shape: &[usize]) {
        tracing::debug!(module, label, ?shape, "tensor shape");
    }
}
