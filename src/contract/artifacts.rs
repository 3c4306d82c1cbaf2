use super::{FullyQualifiedName, Language};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Byte range inside a bytecode, as reported by the compiler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Offset {
    pub start: usize,
    pub length: usize,
}

impl Offset {
    pub fn new(start: usize, length: usize) -> Self {
        Self { start, length }
    }

    /// Exclusive end of the range, `None` if it does not fit into `usize`.
    pub fn end(&self) -> Option<usize> {
        self.start.checked_add(self.length)
    }
}

/// `file path -> library name -> placeholder ranges`
pub type LinkReferences = BTreeMap<String, BTreeMap<String, Vec<Offset>>>;

/// `immutable id -> ranges in the runtime bytecode`
pub type ImmutableReferences = BTreeMap<String, Vec<Offset>>;

/// Everything a compiler needs to rebuild the contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationInput {
    pub target: FullyQualifiedName,
    pub language: Language,
    pub compiler_version: String,
    pub settings: Value,
    pub sources: BTreeMap<String, String>,
}

/// Compiler output for the target contract.
///
/// Bytecodes are kept unlinked as hex strings, with library placeholders in place.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationOutput {
    pub creation_bytecode: String,
    pub runtime_bytecode: String,
    #[serde(default)]
    pub creation_link_references: LinkReferences,
    #[serde(default)]
    pub runtime_link_references: LinkReferences,
    #[serde(default)]
    pub immutable_references: ImmutableReferences,
    #[serde(default)]
    pub abi: Option<Value>,
}
