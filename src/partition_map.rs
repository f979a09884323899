use crate::error::{RuntimeError, RuntimeResult};

/// How the logical indices of a partitioned object are spread over partitions.
///
/// # Possible Options
/// - Striped: index `i` lives on partition `i % P` at offset `i / P` (round robin, one element at a time)
/// - Chunked: index `i` lives on partition `i / (N / P)` at offset `i % (N / P)` (contiguous blocks, requires `N % P == 0`)
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layout {
    Striped,
    Chunked,
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Layout::Striped => write!(f, "striped"),
            Layout::Chunked => write!(f, "chunked"),
        }
    }
}

impl std::str::FromStr for Layout {
    type Err = RuntimeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "striped" | "cyclic" | "1d" => Ok(Layout::Striped),
            "chunked" | "block" => Ok(Layout::Chunked),
            _ => Err(RuntimeError::invalid_argument(format!(
                "unknown layout {:?}",
                s
            ))),
        }
    }
}

/// The physical location of one logical element: the owning partition and the offset within that partition's buffer.
///
/// An `Address` never encodes a raw pointer, it is only ever produced by [PartitionMap::locate].
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub partition: usize,
    pub offset: usize,
}

/// A pure mapping from logical indices in `[0, len)` to `(partition, offset)` pairs.
///
/// The mapping is fixed at construction and can be evaluated concurrently from any number of tasks.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PartitionMap {
    len: usize,
    partitions: usize,
    layout: Layout,
    // elements per partition for chunked, ceil(len / partitions) for striped
    block: usize,
}

impl PartitionMap {
    /// Construct a map of `len` elements over `partitions` partitions.
    ///
    /// Fails with `InvalidArgument` when `partitions == 0`,
    /// and with `InvalidLayout` when `layout` is chunked and `len` is not a multiple of `partitions`.
    pub fn new(len: usize, partitions: usize, layout: Layout) -> RuntimeResult<PartitionMap> {
        if partitions == 0 {
            return Err(RuntimeError::invalid_argument(
                "the number of partitions must be > 0",
            ));
        }
        let block = match layout {
            Layout::Striped => (len + partitions - 1) / partitions,
            Layout::Chunked => {
                if len % partitions != 0 {
                    return Err(RuntimeError::InvalidLayout { len, partitions });
                }
                len / partitions
            }
        };
        Ok(PartitionMap {
            len,
            partitions,
            layout,
            block,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Number of elements each partition's buffer must hold: `ceil(N/P)` for striped, `N/P` for chunked
    pub fn partition_capacity(&self) -> usize {
        self.block
    }

    /// Map logical index `index` to its owning partition and local offset
    pub fn locate(&self, index: usize) -> RuntimeResult<Address> {
        if index >= self.len {
            return Err(RuntimeError::InvalidIndex {
                index,
                len: self.len,
            });
        }
        Ok(self.locate_unchecked(index))
    }

    #[inline]
    pub(crate) fn locate_unchecked(&self, index: usize) -> Address {
        match self.layout {
            Layout::Striped => Address {
                partition: index % self.partitions,
                offset: index / self.partitions,
            },
            Layout::Chunked => Address {
                partition: index / self.block,
                offset: index % self.block,
            },
        }
    }

    /// The partition owning `index`, if `index` is in range
    pub fn owner(&self, index: usize) -> Option<usize> {
        self.locate(index).ok().map(|addr| addr.partition)
    }

    /// The inverse of [locate][PartitionMap::locate]
    pub fn global_index(&self, address: Address) -> RuntimeResult<usize> {
        if address.partition >= self.partitions || address.offset >= self.num_elems_on(address.partition) {
            return Err(RuntimeError::invalid_argument(format!(
                "{:?} is not a valid address for {:?}",
                address, self
            )));
        }
        Ok(match self.layout {
            Layout::Striped => address.offset * self.partitions + address.partition,
            Layout::Chunked => address.partition * self.block + address.offset,
        })
    }

    /// Number of logical elements that actually reside on `partition`
    pub fn num_elems_on(&self, partition: usize) -> usize {
        if partition >= self.partitions {
            return 0;
        }
        match self.layout {
            Layout::Striped => {
                let full = self.len / self.partitions;
                if partition < self.len % self.partitions {
                    full + 1
                } else {
                    full
                }
            }
            Layout::Chunked => self.block,
        }
    }

    /// The contiguous logical range owned by `partition` under a chunked layout.
    ///
    /// Striped partitions own no contiguous logical range, so `None` is returned for them.
    pub fn owned_range(&self, partition: usize) -> Option<std::ops::Range<usize>> {
        match self.layout {
            Layout::Chunked if partition < self.partitions => {
                Some(partition * self.block..(partition + 1) * self.block)
            }
            _ => None,
        }
    }
}
