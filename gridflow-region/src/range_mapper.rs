//! Range mappers: pure functions from an execution chunk to a buffer
//! region.

use crate::box_::GridBox;
use crate::region::Region;

/// Maps an execution chunk (plus the task's global iteration space) to
/// the region of a buffer that chunk accesses.
///
/// A task owns one boxed mapper per buffer access. The trait is the
/// seam the spec calls for: a single polymorphic `map` method rather
/// than a family of concrete mapper types, so the task manager and the
/// command graph generator can treat every access uniformly regardless
/// of how the user described it.
pub trait RangeMapper<const D: usize>: Send + Sync {
    /// Computes the buffer region accessed by `chunk`, a sub-box of
    /// `global_size` (the task's whole iteration space).
    fn map(&self, chunk: GridBox<D>, global_size: GridBox<D>) -> Region<D>;
}

impl<const D: usize, F> RangeMapper<D> for F
where
    F: Fn(GridBox<D>, GridBox<D>) -> Region<D> + Send + Sync,
{
    fn map(&self, chunk: GridBox<D>, global_size: GridBox<D>) -> Region<D> {
        self(chunk, global_size)
    }
}

/// A range mapper that accesses the same fixed region regardless of
/// chunk, as used by `master_node` tasks and one-to-one reduction
/// accumulator buffers.
pub struct FixedMapper<const D: usize>(pub Region<D>);

impl<const D: usize> RangeMapper<D> for FixedMapper<D> {
    fn map(&self, _chunk: GridBox<D>, _global_size: GridBox<D>) -> Region<D> {
        self.0.clone()
    }
}

/// The identity mapper: the accessed region is exactly the chunk.
pub struct OneToOneMapper;

impl<const D: usize> RangeMapper<D> for OneToOneMapper {
    fn map(&self, chunk: GridBox<D>, _global_size: GridBox<D>) -> Region<D> {
        Region::single(chunk)
    }
}
