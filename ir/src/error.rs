use snafu::Snafu;

use crate::{IoRef, TensorId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("tensor {id:?} is not defined in this kernel"))]
    UnknownTensor { id: TensorId },

    #[snafu(display("output {output} aliases {io:?}, which does not exist"))]
    DanglingAlias { output: usize, io: IoRef },

    #[snafu(display("allocation {index} aliases allocation {target}, which does not precede it"))]
    InvalidAllocationAlias { index: usize, target: usize },

    #[snafu(display("{name} has an expanded extent on a non-broadcast dimension"))]
    ExpandedNonBroadcast { name: String },

    #[snafu(display("kernel has no outputs"))]
    NoOutputs,
}
