mod artifacts;
mod intake;
mod recompiler;

pub use artifacts::{
    CompilationInput, CompilationOutput, ImmutableReferences, LinkReferences, Offset,
};
pub use intake::{check_files, IntakeError, PathBuffer};
pub use recompiler::{RecompileError, Recompiler};

use crate::bytecode::{
    find_placeholder_offsets, is_placeholder_for, nullify_placeholders, CodeKind,
    LibraryPlaceholder, NullifyError, LIBRARY_ADDRESS_LENGTH,
};
use bytes::Bytes;
use ethers_core::{types::H256, utils::keccak256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    str::FromStr,
};
use thiserror::Error;

/// `<source file path>:<contract name>`
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct FullyQualifiedName {
    pub file_path: String,
    pub contract_name: String,
}

impl FullyQualifiedName {
    pub fn from_file_and_contract_names(
        file_path: impl Into<String>,
        contract_name: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            contract_name: contract_name.into(),
        }
    }
}

impl Display for FullyQualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_path, self.contract_name)
    }
}

impl FromStr for FullyQualifiedName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((file_path, contract_name)) if !contract_name.is_empty() => Ok(
                Self::from_file_and_contract_names(file_path, contract_name),
            ),
            _ => Err(format!(
                "fully qualified name should have the form `<file>:<contract>`; found {s}"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[default]
    Solidity,
    Yul,
    Vyper,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub content: String,
    pub keccak256: H256,
}

impl SourceFile {
    pub fn new(content: String) -> Self {
        let keccak256 = H256(keccak256(content.as_bytes()));
        Self { content, keccak256 }
    }
}

/// Placeholder positions of a single library inside one of the bytecodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryReference {
    pub placeholder: LibraryPlaceholder,
    /// Byte offsets in the order they were declared by the compiler
    pub offsets: Vec<usize>,
}

impl LibraryReference {
    pub fn fully_qualified_name(&self) -> &str {
        self.placeholder.fully_qualified_name()
    }
}

#[derive(Error, Clone, Debug, PartialEq)]
pub enum CheckedContractError {
    #[error("contract is abstract or an interface: runtime bytecode is empty")]
    AbstractContract,
    #[error("{code} bytecode is invalid: {error}")]
    InvalidBytecode { code: CodeKind, error: NullifyError },
    #[error("library {library} is linked with an invalid length {length} in the {code} bytecode")]
    InvalidLibraryLength {
        code: CodeKind,
        library: String,
        length: usize,
    },
    #[error("no placeholder for library {library} at offset {offset} of the {code} bytecode")]
    PlaceholderNotFound {
        code: CodeKind,
        library: String,
        offset: usize,
    },
    #[error("immutable {id} at offset {start} with length {length} exceeds the runtime bytecode of {code_length} bytes")]
    ImmutableOutOfBounds {
        id: String,
        start: usize,
        length: usize,
        code_length: usize,
    },
    #[error("{first} overlaps with {second} in the {code} bytecode")]
    OverlappingReferences {
        code: CodeKind,
        first: String,
        second: String,
    },
    #[error("abi is not a json array")]
    InvalidAbi,
}

/// Serialized form of a recompiled contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckedContractArtifact {
    pub name: FullyQualifiedName,
    #[serde(default)]
    pub language: Language,
    pub compiler_version: String,
    #[serde(default)]
    pub compiler_settings: Value,
    #[serde(default)]
    pub sources: BTreeMap<String, String>,
    #[serde(flatten)]
    pub output: CompilationOutput,
}

/// A recompiled contract, ready to be compared against deployed code.
///
/// Both bytecodes have library placeholders replaced with zero bytes. All link and
/// immutable references are validated to lie inside the bytecodes and not to overlap.
/// The value is never modified after construction, so it may be shared between
/// concurrent verifications.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "CheckedContractArtifact")]
pub struct CheckedContract {
    name: FullyQualifiedName,
    language: Language,
    compiler_version: String,
    compiler_settings: Value,
    sources: BTreeMap<String, SourceFile>,
    creation_bytecode: Bytes,
    runtime_bytecode: Bytes,
    creation_libraries: Vec<LibraryReference>,
    runtime_libraries: Vec<LibraryReference>,
    immutable_references: BTreeMap<String, Vec<Offset>>,
    constructor_inputs: Option<usize>,
}

impl CheckedContract {
    pub fn new(
        input: CompilationInput,
        output: CompilationOutput,
    ) -> Result<Self, CheckedContractError> {
        Self::try_from(CheckedContractArtifact {
            name: input.target,
            language: input.language,
            compiler_version: input.compiler_version,
            compiler_settings: input.settings,
            sources: input.sources,
            output,
        })
    }

    pub fn name(&self) -> &FullyQualifiedName {
        &self.name
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn compiler_version(&self) -> &str {
        &self.compiler_version
    }

    pub fn compiler_settings(&self) -> &Value {
        &self.compiler_settings
    }

    pub fn sources(&self) -> &BTreeMap<String, SourceFile> {
        &self.sources
    }

    pub fn creation_bytecode(&self) -> &Bytes {
        &self.creation_bytecode
    }

    pub fn runtime_bytecode(&self) -> &Bytes {
        &self.runtime_bytecode
    }

    /// Libraries referenced by the creation bytecode, sorted by name.
    pub fn creation_libraries(&self) -> &[LibraryReference] {
        &self.creation_libraries
    }

    /// Libraries referenced by the runtime bytecode, sorted by name.
    pub fn runtime_libraries(&self) -> &[LibraryReference] {
        &self.runtime_libraries
    }

    pub fn immutable_references(&self) -> &BTreeMap<String, Vec<Offset>> {
        &self.immutable_references
    }

    /// Number of constructor parameters, if the abi is known.
    pub fn constructor_inputs(&self) -> Option<usize> {
        self.constructor_inputs
    }
}

impl TryFrom<CheckedContractArtifact> for CheckedContract {
    type Error = CheckedContractError;

    fn try_from(artifact: CheckedContractArtifact) -> Result<Self, Self::Error> {
        let output = artifact.output;

        let creation_libraries = library_references(
            CodeKind::Creation,
            &output.creation_bytecode,
            &output.creation_link_references,
        )?;
        let runtime_libraries = library_references(
            CodeKind::Runtime,
            &output.runtime_bytecode,
            &output.runtime_link_references,
        )?;

        let creation_bytecode =
            decode_unlinked(CodeKind::Creation, &output.creation_bytecode, &creation_libraries)?;
        let runtime_bytecode =
            decode_unlinked(CodeKind::Runtime, &output.runtime_bytecode, &runtime_libraries)?;
        if runtime_bytecode.is_empty() {
            return Err(CheckedContractError::AbstractContract);
        }

        for (id, offsets) in &output.immutable_references {
            for offset in offsets {
                let in_bounds = offset
                    .end()
                    .is_some_and(|end| end <= runtime_bytecode.len());
                if !in_bounds {
                    return Err(CheckedContractError::ImmutableOutOfBounds {
                        id: id.clone(),
                        start: offset.start,
                        length: offset.length,
                        code_length: runtime_bytecode.len(),
                    });
                }
            }
        }

        check_overlaps(CodeKind::Creation, &creation_libraries, &BTreeMap::new())?;
        check_overlaps(
            CodeKind::Runtime,
            &runtime_libraries,
            &output.immutable_references,
        )?;

        let constructor_inputs = output
            .abi
            .as_ref()
            .map(constructor_inputs)
            .transpose()?;

        let sources = artifact
            .sources
            .into_iter()
            .map(|(path, content)| (path, SourceFile::new(content)))
            .collect();

        Ok(Self {
            name: artifact.name,
            language: artifact.language,
            compiler_version: artifact.compiler_version,
            compiler_settings: artifact.compiler_settings,
            sources,
            creation_bytecode,
            runtime_bytecode,
            creation_libraries,
            runtime_libraries,
            immutable_references: output.immutable_references,
            constructor_inputs,
        })
    }
}

fn library_references(
    code: CodeKind,
    object: &str,
    link_references: &LinkReferences,
) -> Result<Vec<LibraryReference>, CheckedContractError> {
    let mut libraries = BTreeMap::new();
    for (file_path, file_libraries) in link_references {
        for (library_name, offsets) in file_libraries {
            let placeholder = LibraryPlaceholder::new(
                FullyQualifiedName::from_file_and_contract_names(file_path, library_name)
                    .to_string(),
            );

            let mut declared = Vec::with_capacity(offsets.len());
            for offset in offsets {
                if offset.length != LIBRARY_ADDRESS_LENGTH {
                    return Err(CheckedContractError::InvalidLibraryLength {
                        code,
                        library: placeholder.fully_qualified_name().to_string(),
                        length: offset.length,
                    });
                }
                if !is_placeholder_for(object, offset.start, &placeholder) {
                    return Err(CheckedContractError::PlaceholderNotFound {
                        code,
                        library: placeholder.fully_qualified_name().to_string(),
                        offset: offset.start,
                    });
                }
                declared.push(offset.start);
            }

            // Some compilers report the library without positions
            if declared.is_empty() {
                declared = find_placeholder_offsets(object, placeholder.token());
                declared.extend(find_placeholder_offsets(object, placeholder.legacy_token()));
                declared.sort_unstable();
            }

            libraries.insert(
                placeholder.fully_qualified_name().to_string(),
                LibraryReference {
                    placeholder,
                    offsets: declared,
                },
            );
        }
    }

    Ok(libraries.into_values().collect())
}

fn decode_unlinked(
    code: CodeKind,
    object: &str,
    libraries: &[LibraryReference],
) -> Result<Bytes, CheckedContractError> {
    let offsets = libraries
        .iter()
        .flat_map(|library| library.offsets.iter().copied());
    nullify_placeholders(object, offsets)
        .map(Bytes::from)
        .map_err(|error| CheckedContractError::InvalidBytecode { code, error })
}

fn check_overlaps(
    code: CodeKind,
    libraries: &[LibraryReference],
    immutables: &ImmutableReferences,
) -> Result<(), CheckedContractError> {
    let mut ranges: Vec<(Offset, String)> = libraries
        .iter()
        .flat_map(|library| {
            library.offsets.iter().map(|&start| {
                (
                    Offset::new(start, LIBRARY_ADDRESS_LENGTH),
                    format!("library {}", library.fully_qualified_name()),
                )
            })
        })
        .chain(immutables.iter().flat_map(|(id, offsets)| {
            offsets
                .iter()
                .map(move |offset| (*offset, format!("immutable {id}")))
        }))
        .collect();
    ranges.sort();

    for pair in ranges.windows(2) {
        let ((previous, first), (next, second)) = (&pair[0], &pair[1]);
        // ranges are in bounds at this point, so their ends are known
        if previous.end().map_or(true, |end| end > next.start) {
            return Err(CheckedContractError::OverlappingReferences {
                code,
                first: first.clone(),
                second: second.clone(),
            });
        }
    }

    Ok(())
}

fn constructor_inputs(abi: &Value) -> Result<usize, CheckedContractError> {
    let items = abi.as_array().ok_or(CheckedContractError::InvalidAbi)?;
    let inputs = items
        .iter()
        .find(|item| item.get("type").and_then(Value::as_str) == Some("constructor"))
        .and_then(|constructor| constructor.get("inputs"))
        .and_then(Value::as_array)
        .map(|inputs| inputs.len())
        .unwrap_or_default();
    Ok(inputs)
}
