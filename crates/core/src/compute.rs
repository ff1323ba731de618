/// The function the scheduler delegates to the coordinator.
///
/// Must be cheap and pure: it runs once per request on the coordinator
/// thread, or inside the scheduler hook in inline mode.
pub trait OffloadCompute: Send + Sync {
    fn name(&self) -> &str;

    fn compute(&self, input: u64) -> u64;
}

/// Reference computation, `f(v) = v / 2 + 1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HalvePlusOne;

impl OffloadCompute for HalvePlusOne {
    fn name(&self) -> &str {
        "halve_plus_one"
    }

    fn compute(&self, input: u64) -> u64 {
        input / 2 + 1
    }
}
