use crate::memregion::Dist;
use crate::partition_map::{Address, PartitionMap};

/// The elements of a [PartitionedArray][crate::PartitionedArray] stored at a single partition, addressed by local offset.
///
/// Offsets run from `0` to [len][LocalData::len]; accessing an offset outside that range panics, like slice indexing.
#[derive(Debug)]
pub struct LocalData<'a, T: Dist> {
    partition: usize,
    cells: &'a [T::Atomic],
    map: &'a PartitionMap,
}

impl<'a, T: Dist> LocalData<'a, T> {
    pub(crate) fn new(partition: usize, cells: &'a [T::Atomic], map: &'a PartitionMap) -> Self {
        LocalData {
            partition,
            cells,
            map,
        }
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The logical index of the element at `offset`
    pub fn global_index(&self, offset: usize) -> Option<usize> {
        self.map
            .global_index(Address {
                partition: self.partition,
                offset,
            })
            .ok()
    }

    pub fn load(&self, offset: usize) -> T {
        T::load(&self.cells[offset])
    }

    pub fn store(&self, offset: usize, val: T) {
        T::store(&self.cells[offset], val)
    }

    pub fn fetch_add(&self, offset: usize, val: T) -> T {
        T::fetch_add(&self.cells[offset], val)
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        let cells = self.cells;
        cells.iter().map(|c| T::load(c))
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }
}
