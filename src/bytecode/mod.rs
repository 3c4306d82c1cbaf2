mod metadata;
mod normalizer;
mod placeholder;

pub use metadata::{CompilerVersion, MetadataHash};
pub use normalizer::{
    normalize, strip_metadata_like, LengthConvention, MetadataSection, NormalizedBytecode,
};
pub use placeholder::{
    find_placeholder_offsets, is_placeholder, is_placeholder_for, nullify_placeholders,
    LibraryPlaceholder, NullifyError, LIBRARY_ADDRESS_LENGTH,
};

use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Which of the contract bytecodes a reference or a failure belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    Creation,
    Runtime,
}

impl Display for CodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeKind::Creation => f.write_str("creation"),
            CodeKind::Runtime => f.write_str("runtime"),
        }
    }
}
