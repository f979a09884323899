use crate::error::{RuntimeError, RuntimeResult};

use crossbeam::utils::CachePadded;
use std::sync::atomic::{
    AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicIsize, AtomicU16, AtomicU32, AtomicU64,
    AtomicU8, AtomicUsize, Ordering,
};
use std::sync::Arc;

/// Element types that can be stored in partitioned memory.
///
/// Every element is backed by an atomic cell so that tasks may update distinct (or, through the
/// fetch operations, shared) elements concurrently. Element operations use relaxed ordering,
/// the join at the end of an apply provides the happens-before edge for readers.
///
/// Implemented for the 8 to 64 bit and pointer sized integers, `f32` and `f64`.
pub trait Dist:
    Copy + Send + Sync + Default + PartialEq + PartialOrd + std::fmt::Debug + std::fmt::Display + 'static
{
    type Atomic: Send + Sync + std::fmt::Debug;
    /// identity of `add`
    const ZERO: Self;
    /// identity of `max`
    const MIN: Self;
    /// identity of `min`
    const MAX: Self;

    fn new_atomic(val: Self) -> Self::Atomic;
    fn load(cell: &Self::Atomic) -> Self;
    fn store(cell: &Self::Atomic, val: Self);
    fn swap(cell: &Self::Atomic, val: Self) -> Self;
    fn fetch_add(cell: &Self::Atomic, val: Self) -> Self;
    fn fetch_min(cell: &Self::Atomic, val: Self) -> Self;
    fn fetch_max(cell: &Self::Atomic, val: Self) -> Self;
    /// non-atomic addition with the same overflow behavior as [fetch_add][Dist::fetch_add]
    fn combine_add(self, other: Self) -> Self;
}

macro_rules! impl_dist_int {
    ($($A:ty => $B:ty),* $(,)?) => {
        $(
            impl Dist for $A {
                type Atomic = $B;
                const ZERO: Self = 0;
                const MIN: Self = <$A>::MIN;
                const MAX: Self = <$A>::MAX;

                fn new_atomic(val: Self) -> $B {
                    <$B>::new(val)
                }
                fn load(cell: &$B) -> Self {
                    cell.load(Ordering::Relaxed)
                }
                fn store(cell: &$B, val: Self) {
                    cell.store(val, Ordering::Relaxed)
                }
                fn swap(cell: &$B, val: Self) -> Self {
                    cell.swap(val, Ordering::Relaxed)
                }
                fn fetch_add(cell: &$B, val: Self) -> Self {
                    cell.fetch_add(val, Ordering::Relaxed)
                }
                fn fetch_min(cell: &$B, val: Self) -> Self {
                    cell.fetch_min(val, Ordering::Relaxed)
                }
                fn fetch_max(cell: &$B, val: Self) -> Self {
                    cell.fetch_max(val, Ordering::Relaxed)
                }
                fn combine_add(self, other: Self) -> Self {
                    self.wrapping_add(other)
                }
            }
        )*
    };
}

impl_dist_int!(
    u8 => AtomicU8,
    u16 => AtomicU16,
    u32 => AtomicU32,
    u64 => AtomicU64,
    usize => AtomicUsize,
    i8 => AtomicI8,
    i16 => AtomicI16,
    i32 => AtomicI32,
    i64 => AtomicI64,
    isize => AtomicIsize,
);

// floats are stored as their bit pattern, read-modify-write ops are compare exchange loops
macro_rules! impl_dist_float {
    ($($A:ty => $B:ty),* $(,)?) => {
        $(
            impl Dist for $A {
                type Atomic = $B;
                const ZERO: Self = 0.0;
                const MIN: Self = <$A>::NEG_INFINITY;
                const MAX: Self = <$A>::INFINITY;

                fn new_atomic(val: Self) -> $B {
                    <$B>::new(val.to_bits())
                }
                fn load(cell: &$B) -> Self {
                    <$A>::from_bits(cell.load(Ordering::Relaxed))
                }
                fn store(cell: &$B, val: Self) {
                    cell.store(val.to_bits(), Ordering::Relaxed)
                }
                fn swap(cell: &$B, val: Self) -> Self {
                    <$A>::from_bits(cell.swap(val.to_bits(), Ordering::Relaxed))
                }
                fn fetch_add(cell: &$B, val: Self) -> Self {
                    Self::fetch_update(cell, |cur| cur + val)
                }
                fn fetch_min(cell: &$B, val: Self) -> Self {
                    Self::fetch_update(cell, |cur| if val < cur { val } else { cur })
                }
                fn fetch_max(cell: &$B, val: Self) -> Self {
                    Self::fetch_update(cell, |cur| if val > cur { val } else { cur })
                }
                fn combine_add(self, other: Self) -> Self {
                    self + other
                }
            }
        )*
    };
}

trait FloatUpdate: Sized {
    type Bits;
    fn fetch_update(cell: &Self::Bits, op: impl Fn(Self) -> Self) -> Self;
}

impl FloatUpdate for f32 {
    type Bits = AtomicU32;
    fn fetch_update(cell: &AtomicU32, op: impl Fn(f32) -> f32) -> f32 {
        let mut cur = cell.load(Ordering::Relaxed);
        loop {
            let new = op(f32::from_bits(cur)).to_bits();
            match cell.compare_exchange_weak(cur, new, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(old) => return f32::from_bits(old),
                Err(old) => cur = old,
            }
        }
    }
}

impl FloatUpdate for f64 {
    type Bits = AtomicU64;
    fn fetch_update(cell: &AtomicU64, op: impl Fn(f64) -> f64) -> f64 {
        let mut cur = cell.load(Ordering::Relaxed);
        loop {
            let new = op(f64::from_bits(cur)).to_bits();
            match cell.compare_exchange_weak(cur, new, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(old) => return f64::from_bits(old),
                Err(old) => cur = old,
            }
        }
    }
}

impl_dist_float!(f32 => AtomicU32, f64 => AtomicU64);

/// Per partition storage accounting.
///
/// Every partition owns a fixed number of bytes for the lifetime of the world,
/// buffers reserve from it on allocation and give it back when dropped.
#[derive(Debug)]
pub(crate) struct PartitionHeap {
    capacity: usize,
    used: Vec<CachePadded<AtomicUsize>>,
}

impl PartitionHeap {
    pub(crate) fn new(partitions: usize, capacity: usize) -> PartitionHeap {
        PartitionHeap {
            capacity,
            used: (0..partitions)
                .map(|_| CachePadded::new(AtomicUsize::new(0)))
                .collect(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn used(&self, partition: usize) -> usize {
        self.used[partition].load(Ordering::SeqCst)
    }

    pub(crate) fn reserve(&self, partition: usize, bytes: usize) -> RuntimeResult<()> {
        let capacity = self.capacity;
        self.used[partition]
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(bytes).filter(|total| *total <= capacity)
            })
            .map(|_| ())
            .map_err(|_| RuntimeError::AllocationFailure { partition, bytes })
    }

    pub(crate) fn release(&self, partition: usize, bytes: usize) {
        let prev = self.used[partition].fetch_sub(bytes, Ordering::SeqCst);
        assert!(
            prev >= bytes,
            "partition {} released {} bytes but only {} were reserved",
            partition,
            bytes,
            prev
        );
    }
}

/// The backing buffer of one partition's share of a partitioned object.
///
/// Dropping the buffer returns its bytes to the partition heap.
#[derive(Debug)]
pub(crate) struct PartitionBuffer<T: Dist> {
    partition: usize,
    data: Box<[T::Atomic]>,
    heap: Arc<PartitionHeap>,
}

impl<T: Dist> PartitionBuffer<T> {
    pub(crate) fn new(
        heap: &Arc<PartitionHeap>,
        partition: usize,
        len: usize,
        init: T,
    ) -> RuntimeResult<PartitionBuffer<T>> {
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(RuntimeError::AllocationFailure {
                partition,
                bytes: usize::MAX,
            })?;
        heap.reserve(partition, bytes)?;
        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            heap.release(partition, bytes);
            return Err(RuntimeError::AllocationFailure { partition, bytes });
        }
        data.extend((0..len).map(|_| T::new_atomic(init)));
        tracing::trace!("partition {} reserved {} bytes", partition, bytes);
        Ok(PartitionBuffer {
            partition,
            data: data.into_boxed_slice(),
            heap: heap.clone(),
        })
    }

    pub(crate) fn cells(&self) -> &[T::Atomic] {
        &self.data
    }

    fn bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<T>()
    }
}

impl<T: Dist> Drop for PartitionBuffer<T> {
    fn drop(&mut self) {
        let bytes = self.bytes();
        self.heap.release(self.partition, bytes);
        tracing::trace!("partition {} released {} bytes", self.partition, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_capacity_is_enforced() {
        let heap = PartitionHeap::new(2, 64);
        assert!(heap.reserve(0, 48).is_ok());
        assert_eq!(
            Err(RuntimeError::AllocationFailure {
                partition: 0,
                bytes: 32
            }),
            heap.reserve(0, 32)
        );
        assert!(heap.reserve(1, 64).is_ok());
        heap.release(0, 48);
        assert!(heap.reserve(0, 32).is_ok());
        assert_eq!(32, heap.used(0));
    }

    #[test]
    #[should_panic]
    fn over_release_panics() {
        let heap = PartitionHeap::new(1, 64);
        heap.reserve(0, 8).unwrap();
        heap.release(0, 16);
    }

    #[test]
    fn buffer_returns_bytes_on_drop() {
        let heap = Arc::new(PartitionHeap::new(2, 1024));
        {
            let buf = PartitionBuffer::<u64>::new(&heap, 1, 16, 7).unwrap();
            assert_eq!(16, buf.cells().len());
            assert_eq!(1, buf.partition);
            assert_eq!(128, heap.used(1));
            assert!(buf.cells().iter().all(|c| u64::load(c) == 7));
            assert!(PartitionBuffer::<u64>::new(&heap, 1, 128, 0).is_err());
        }
        assert_eq!(0, heap.used(1));
    }

    #[test]
    fn integer_cells() {
        let cell = i32::new_atomic(5);
        assert_eq!(5, i32::fetch_add(&cell, 3));
        assert_eq!(8, i32::fetch_max(&cell, 2));
        assert_eq!(8, i32::fetch_min(&cell, -1));
        assert_eq!(-1, i32::swap(&cell, 10));
        assert_eq!(10, i32::load(&cell));
        assert_eq!(u8::MIN, 255u8.combine_add(1));
    }

    #[test]
    fn float_cells() {
        let cell = f64::new_atomic(1.5);
        assert_eq!(1.5, f64::fetch_add(&cell, 2.0));
        assert_eq!(3.5, f64::load(&cell));
        assert_eq!(3.5, f64::fetch_min(&cell, -2.0));
        assert_eq!(-2.0, f64::fetch_max(&cell, f64::MIN));
        assert_eq!(-2.0, f64::load(&cell));
        assert_eq!(f32::NEG_INFINITY, <f32 as Dist>::MIN);
        let cell = f32::new_atomic(0.0);
        f32::store(&cell, 0.25);
        assert_eq!(0.25, f32::load(&cell));
    }
}
