use crate::{
    bytecode::{CodeKind, CompilerVersion},
    constructor::ConstructorCheckError,
    DisplayBytes,
};
use ethers_core::types::{Address, H256};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    /// Bytecodes are equal including the metadata section
    Perfect,
    /// Bytecodes are equal outside of the metadata section
    Partial,
}

/// Reason the contract does not match the deployed code.
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MismatchCause {
    #[error("chain #{chain_id} does not have a contract deployed at {address:?}")]
    #[serde(rename_all = "camelCase")]
    NotFound { chain_id: u64, address: Address },
    #[error("creator transaction {hash:?} was not found on chain #{chain_id}")]
    #[serde(rename_all = "camelCase")]
    TransactionNotFound { chain_id: u64, hash: H256 },
    #[error("library {library} is linked with {found:?} at offset {offset}, but with {expected:?} elsewhere")]
    LibraryAddressMismatch {
        library: String,
        offset: usize,
        expected: Address,
        found: Address,
    },
    #[error("{region} at offset {offset} with length {length} exceeds the deployed bytecode of {code_length} bytes")]
    #[serde(rename_all = "camelCase")]
    OutOfBounds {
        region: String,
        offset: usize,
        length: usize,
        code_length: usize,
    },
    #[error("the deployed and recompiled {code} bytecode don't match; first difference at byte {first_difference}")]
    #[serde(rename_all = "camelCase")]
    BytecodeMismatch {
        code: CodeKind,
        first_difference: usize,
        expected_length: usize,
        found_length: usize,
    },
}

/// Explanation of a partial match.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum PartialReason {
    #[error("the metadata hash differs: sources or compilation settings do not correspond to the published ones")]
    MetadataMismatch,
    #[error("the metadata hash differs: deployed code was compiled with {found}, recompiled with {expected}")]
    CompilerVersionMismatch {
        expected: CompilerVersion,
        found: CompilerVersion,
    },
    #[error("no metadata section was found, so the whole bytecode was compared")]
    MetadataUnavailable,
    #[error("immutable values do not correspond to the deployment context")]
    ImmutableValues,
}

/// Disagreement between deployed immutable values and the expected ones.
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ImmutableIssue {
    #[error("immutable {id} holds {found} while {expected} is expected")]
    ValueMismatch {
        id: String,
        expected: DisplayBytes,
        found: DisplayBytes,
    },
    #[error("immutable {id} holds different values across its references")]
    InconsistentRanges { id: String },
}

/// Outcome of checking the creation transaction against the creation bytecode.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum CreationCheck {
    #[serde(rename_all = "camelCase")]
    Passed {
        status: MatchStatus,
        constructor_arguments: DisplayBytes,
    },
    Failed {
        #[serde_as(as = "DisplayFromStr")]
        reason: ConstructorCheckError,
    },
}

/// Verdict of a single verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub address: Address,
    pub chain_id: u64,
    pub status: Option<MatchStatus>,
    pub library_map: BTreeMap<String, Address>,
    pub immutable_references: BTreeMap<String, DisplayBytes>,
    pub immutable_issues: Vec<ImmutableIssue>,
    pub message: Option<String>,
    pub cause: Option<MismatchCause>,
    pub creation: Option<CreationCheck>,
}

impl Match {
    pub fn failed(chain_id: u64, address: Address, cause: MismatchCause) -> Self {
        Self {
            address,
            chain_id,
            status: None,
            library_map: BTreeMap::new(),
            immutable_references: BTreeMap::new(),
            immutable_issues: vec![],
            message: Some(cause.to_string()),
            cause: Some(cause),
            creation: None,
        }
    }

    pub fn is_perfect(&self) -> bool {
        self.status == Some(MatchStatus::Perfect)
    }

    pub fn is_partial(&self) -> bool {
        self.status == Some(MatchStatus::Partial)
    }

    pub fn is_match(&self) -> bool {
        self.status.is_some()
    }
}
