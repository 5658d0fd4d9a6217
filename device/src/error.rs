use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("size mismatch: expected {expected}, got {actual}"))]
    SizeMismatch { expected: usize, actual: usize },

    /// Strided view reaches outside its storage.
    #[snafu(display(
        "invalid view: sizes {sizes:?} strides {strides:?} at offset {offset} exceed storage of {storage} elements"
    ))]
    InvalidView { sizes: Vec<i64>, strides: Vec<i64>, offset: i64, storage: i64 },

    /// The requested shape cannot be expressed as a view of the existing layout.
    #[snafu(display("view of sizes {sizes:?} strides {strides:?} as {target:?} requires a copy"))]
    IncompatibleView { sizes: Vec<i64>, strides: Vec<i64>, target: Vec<i64> },

    #[snafu(display("invalid permutation {dims:?} for rank {rank}"))]
    InvalidPermutation { dims: Vec<usize>, rank: usize },

    #[snafu(display("cannot expand dimension {dim} of size {size} to {target}"))]
    InvalidExpand { dim: usize, size: i64, target: i64 },

    #[snafu(display("compilation of {name} failed:\n{log}"))]
    Compilation { name: String, log: String },

    #[snafu(display("unknown function handle {handle}"))]
    UnknownFunction { handle: u64 },

    #[snafu(display("launch of {name} failed: {reason}"))]
    Launch { name: String, reason: String },

    #[snafu(display("{attribute} = {value} exceeds the device limit of {limit}"))]
    AttributeLimit { attribute: &'static str, value: i64, limit: i64 },

    #[cfg(feature = "cuda")]
    #[snafu(display("CUDA error: {source}"))]
    CudaError { source: cudarc::driver::DriverError },
}
