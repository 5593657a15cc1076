use thiserror::Error;

/// Contract violations of the free-index pools.
///
/// Running out of free slots is not listed here: a pool that cannot satisfy
/// a request hands out fewer indices (possibly none).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The index is already free (or appears twice in one release call).
    #[error("index {index} released while already free")]
    DoubleRelease { index: u32 },

    #[error("index {index} is outside of the pool capacity {capacity}")]
    IndexOutOfRange { index: u32, capacity: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SortError {
    #[error("bitonic block size {block_size} is not a power of two >= 2")]
    BlockSizeNotPowerOfTwo { block_size: usize },

    #[error("bitonic sort length {len} is not a power of two")]
    LengthNotPowerOfTwo { len: usize },

    #[error("bitonic sort length {len} is not a multiple of the block size {block_size}")]
    LengthNotBlockAligned { len: usize, block_size: usize },

    #[error("bitonic sort length {len} exceeds the maximum of {max} for block size {block_size}")]
    LengthTooLarge { len: usize, max: usize, block_size: usize },

    #[error("bitonic sort expects buffers of length {expected}, got data={data} temp={temp}")]
    BufferLengthMismatch { expected: usize, data: usize, temp: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridSortError {
    #[error("grid sorter was built for {expected} objects but received a buffer of {actual}")]
    InconsistentObjectCount { expected: usize, actual: usize },

    #[error("no permutation available: rebuild the grid before rearranging")]
    NoPermutation,

    #[error(transparent)]
    Sort(#[from] SortError),
}

/// Top-level error of the runner and of simulation construction.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Sort(#[from] SortError),

    #[error(transparent)]
    GridSort(#[from] GridSortError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown simulation kind '{0}'")]
    UnknownSimulationKind(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
