use crate::{consts::WORD_SIZE, DisplayBytes};
use bytes::Bytes;
use ethers_core::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where the expected value of an immutable comes from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImmutableSource {
    Deployer,
    BlockNumber,
    BlockTimestamp,
    /// Index of the ABI word among the constructor arguments
    ConstructorArgument(usize),
    Value(DisplayBytes),
}

/// Deploy-time data used to recompute expected immutable values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextVariables {
    pub deployer: Option<Address>,
    pub block_number: Option<u64>,
    pub block_timestamp: Option<u64>,
    pub constructor_arguments: Option<DisplayBytes>,
    pub immutable_sources: BTreeMap<String, ImmutableSource>,
}

impl ContextVariables {
    /// Fills values missing in `self` with the ones from `fallback`.
    pub fn or(self, fallback: ContextVariables) -> Self {
        let mut immutable_sources = fallback.immutable_sources;
        immutable_sources.extend(self.immutable_sources);
        Self {
            deployer: self.deployer.or(fallback.deployer),
            block_number: self.block_number.or(fallback.block_number),
            block_timestamp: self.block_timestamp.or(fallback.block_timestamp),
            constructor_arguments: self
                .constructor_arguments
                .or(fallback.constructor_arguments),
            immutable_sources,
        }
    }

    /// Expected value of the immutable with given id, right-aligned to `length` bytes.
    ///
    /// Returns `None` if the immutable has no source or the source value is not known.
    pub fn expected_immutable(&self, id: &str, length: usize) -> Option<Bytes> {
        let value = match self.immutable_sources.get(id)? {
            ImmutableSource::Deployer => self.deployer?.as_bytes().to_vec(),
            ImmutableSource::BlockNumber => self.block_number?.to_be_bytes().to_vec(),
            ImmutableSource::BlockTimestamp => self.block_timestamp?.to_be_bytes().to_vec(),
            ImmutableSource::ConstructorArgument(index) => {
                let start = index.checked_mul(WORD_SIZE)?;
                self.constructor_arguments
                    .as_ref()?
                    .get(start..start + WORD_SIZE)?
                    .to_vec()
            }
            ImmutableSource::Value(value) => value.to_vec(),
        };
        right_align(&value, length)
    }
}

/// Left-pads with zeros or strips leading zeros so that the value takes exactly `length` bytes.
fn right_align(value: &[u8], length: usize) -> Option<Bytes> {
    if value.len() >= length {
        let (leading, aligned) = value.split_at(value.len() - length);
        return leading
            .iter()
            .all(|byte| *byte == 0)
            .then(|| Bytes::copy_from_slice(aligned));
    }

    let mut aligned = vec![0u8; length - value.len()];
    aligned.extend_from_slice(value);
    Some(Bytes::from(aligned))
}
