// ── Execution bus ──
//
// The compiler never touches the kernel. A bus receives either a complete
// queue program or an incremental patch and reports whether it was applied.

use crate::error::CoreError;
use crate::model::QueueBatch;
use crate::reload::Patch;

/// Applies compiled output. Operations must be applied in list order;
/// parents always precede their children.
pub trait ExecutionBus {
    /// Replace everything with `batch`.
    fn apply_full(&mut self, batch: &QueueBatch) -> Result<(), CoreError>;

    /// Apply a patch on top of the previously applied program. Mapping
    /// removals go before mapping additions.
    fn apply_patch(&mut self, patch: &Patch) -> Result<(), CoreError>;
}

impl<B: ExecutionBus + ?Sized> ExecutionBus for &mut B {
    fn apply_full(&mut self, batch: &QueueBatch) -> Result<(), CoreError> {
        (**self).apply_full(batch)
    }

    fn apply_patch(&mut self, patch: &Patch) -> Result<(), CoreError> {
        (**self).apply_patch(patch)
    }
}
