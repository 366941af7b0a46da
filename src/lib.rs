mod error;
pub use error::Error;

mod byte_range;
pub use byte_range::ByteRange;

mod portable_executable;
pub use portable_executable::*;

mod metadata;
pub use metadata::*;

mod tables;
pub use tables::*;

pub mod coded_index;
pub use coded_index::{CodedIndex, CodedIndexKind};

mod signature;
pub use signature::*;

mod rows;
pub use rows::*;

mod context;
pub use context::Context;
