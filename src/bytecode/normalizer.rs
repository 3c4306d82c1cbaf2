use super::metadata::MetadataHash;
use bytes::{Buf, Bytes};

/// How the trailing two bytes describe the length of the metadata section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LengthConvention {
    /// Length counts the CBOR encoded bytes only (solc, vyper before 0.3.10)
    CborOnly,
    /// Length counts the CBOR encoded bytes and the two length bytes (vyper 0.3.10 and later)
    IncludingLength,
}

impl LengthConvention {
    fn cbor_length(&self, encoded_length: usize) -> Option<usize> {
        match self {
            LengthConvention::CborOnly => Some(encoded_length),
            LengthConvention::IncludingLength => encoded_length.checked_sub(2),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataSection {
    /// CBOR encoded metadata together with the two length bytes
    pub raw: Bytes,
    pub hash: MetadataHash,
    pub convention: LengthConvention,
}

/// Bytecode split into the executable body and the trailing metadata section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedBytecode {
    pub body: Bytes,
    pub metadata: Option<MetadataSection>,
}

impl NormalizedBytecode {
    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }
}

/// Splits the bytecode into body and metadata.
///
/// The last two bytes are interpreted as a big-endian length of the metadata section.
/// If they do not describe a section that decodes as metadata under any known convention,
/// the whole bytecode is considered to be the body.
pub fn normalize(bytecode: &Bytes) -> NormalizedBytecode {
    let without_metadata = || NormalizedBytecode {
        body: bytecode.clone(),
        metadata: None,
    };

    if bytecode.len() < 2 {
        return without_metadata();
    }

    let length_start = bytecode.len() - 2;
    let encoded_length = bytecode.slice(length_start..).get_u16() as usize;

    for convention in [LengthConvention::CborOnly, LengthConvention::IncludingLength] {
        let cbor_length = match convention.cbor_length(encoded_length) {
            Some(length) if length > 0 && length <= length_start => length,
            _ => continue,
        };
        let metadata_start = length_start - cbor_length;

        match MetadataHash::from_cbor(&bytecode[metadata_start..length_start]) {
            // The whole section must be used by a single item
            Ok((hash, used_size)) if used_size == cbor_length => {
                return NormalizedBytecode {
                    body: bytecode.slice(..metadata_start),
                    metadata: Some(MetadataSection {
                        raw: bytecode.slice(metadata_start..),
                        hash,
                        convention,
                    }),
                }
            }
            _ => continue,
        }
    }

    log::debug!("no metadata section recognized at the end of the bytecode");
    without_metadata()
}

/// Returns the bytecode body assuming it ends with a section of the same size as `expected`.
///
/// Only the trailing length bytes are compared, so the section itself may be malformed.
pub fn strip_metadata_like(bytecode: &Bytes, expected: &MetadataSection) -> Option<Bytes> {
    let section_length = expected.raw.len();
    let metadata_start = bytecode.len().checked_sub(section_length)?;
    let length_bytes = |code: &Bytes| code.slice(code.len() - 2..);
    (length_bytes(bytecode) == length_bytes(&expected.raw))
        .then(|| bytecode.slice(..metadata_start))
}
