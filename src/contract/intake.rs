use super::{
    CheckedContract, CheckedContractError, CompilationInput, FullyQualifiedName, Language,
    RecompileError, Recompiler,
};
use bytes::Bytes;
use ethers_core::{types::H256, utils::keccak256};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// A file supplied for verification: either a metadata document or a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathBuffer {
    pub path: String,
    pub buffer: Bytes,
}

impl PathBuffer {
    pub fn new(path: impl Into<String>, buffer: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            buffer: buffer.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("metadata file was not found among the supplied files")]
    NoMetadata,
    #[error("exactly one metadata file is expected; found {0:?}")]
    MultipleMetadata(Vec<String>),
    #[error("metadata should have exactly one compilation target; found {0}")]
    InvalidCompilationTarget(usize),
    #[error("sources referenced by the metadata are missing: {0:?}")]
    MissingSources(Vec<String>),
    #[error("recompilation failed: {0}")]
    Recompilation(#[from] RecompileError),
    #[error("recompiled contract is invalid: {0}")]
    InvalidContract(#[from] CheckedContractError),
}

#[derive(Debug, Deserialize)]
struct Metadata {
    compiler: MetadataCompiler,
    #[serde(default)]
    language: Language,
    settings: Value,
    sources: BTreeMap<String, MetadataSource>,
    #[serde(default)]
    output: Option<MetadataOutput>,
}

#[derive(Debug, Deserialize)]
struct MetadataCompiler {
    version: String,
}

#[derive(Debug, Deserialize)]
struct MetadataSource {
    keccak256: H256,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataOutput {
    #[serde(default)]
    abi: Option<Value>,
}

/// Builds checked contracts from a metadata document and the sources it references.
///
/// Sources are matched by the keccak256 hash declared in the metadata, not by path,
/// so the supplied file names do not matter.
pub async fn check_files(
    files: &[PathBuffer],
    recompiler: &dyn Recompiler,
) -> Result<Vec<CheckedContract>, IntakeError> {
    let mut metadata_files = Vec::new();
    let mut sources_by_hash = HashMap::new();
    for file in files {
        match serde_json::from_slice::<Metadata>(&file.buffer) {
            Ok(metadata) => metadata_files.push((file.path.clone(), metadata)),
            Err(_) => {
                if let Ok(content) = String::from_utf8(file.buffer.to_vec()) {
                    for variation in content_variations(&content) {
                        sources_by_hash
                            .entry(H256(keccak256(variation.as_bytes())))
                            .or_insert(variation);
                    }
                }
            }
        }
    }

    let metadata = match metadata_files.len() {
        0 => return Err(IntakeError::NoMetadata),
        1 => metadata_files.remove(0).1,
        _ => {
            return Err(IntakeError::MultipleMetadata(
                metadata_files.into_iter().map(|(path, _)| path).collect(),
            ))
        }
    };

    let target = compilation_target(&metadata.settings)?;

    let mut sources = BTreeMap::new();
    let mut missing = Vec::new();
    for (path, source) in metadata.sources {
        let embedded = source
            .content
            .filter(|content| H256(keccak256(content.as_bytes())) == source.keccak256);
        match embedded.or_else(|| sources_by_hash.get(&source.keccak256).cloned()) {
            Some(content) => {
                sources.insert(path, content);
            }
            None => missing.push(path),
        }
    }
    if !missing.is_empty() {
        return Err(IntakeError::MissingSources(missing));
    }

    let input = CompilationInput {
        target,
        language: metadata.language,
        compiler_version: metadata.compiler.version,
        settings: metadata.settings,
        sources,
    };
    log::debug!(
        "recompiling {} with compiler {}",
        input.target,
        input.compiler_version
    );

    let mut output = recompiler.recompile(&input).await?;
    if output.abi.is_none() {
        output.abi = metadata.output.and_then(|output| output.abi);
    }

    let contract = CheckedContract::new(input, output)?;
    Ok(vec![contract])
}

fn compilation_target(settings: &Value) -> Result<FullyQualifiedName, IntakeError> {
    let targets = settings
        .get("compilationTarget")
        .and_then(Value::as_object)
        .ok_or(IntakeError::InvalidCompilationTarget(0))?;

    match targets.iter().next() {
        Some((file_path, Value::String(contract_name))) if targets.len() == 1 => Ok(
            FullyQualifiedName::from_file_and_contract_names(file_path, contract_name),
        ),
        _ => Err(IntakeError::InvalidCompilationTarget(targets.len())),
    }
}

/// Files may have been re-saved with different line endings or trailing newline
/// after compilation, so each supplied source is also indexed in these forms.
fn content_variations(content: &str) -> Vec<String> {
    let lf = content.replace("\r\n", "\n");
    let crlf = lf.replace('\n', "\r\n");
    let mut variations = vec![content.to_string()];
    for base in [lf, crlf] {
        let trimmed = base.trim_end_matches(['\r', '\n']).to_string();
        variations.push(format!("{trimmed}\n"));
        variations.push(trimmed);
        variations.push(base);
    }
    variations.dedup();
    variations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::CompilationOutput;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SOURCE: &str = "contract A {}\n";

    struct StaticRecompiler(Result<CompilationOutput, fn() -> RecompileError>);

    #[async_trait]
    impl Recompiler for StaticRecompiler {
        async fn recompile(
            &self,
            input: &CompilationInput,
        ) -> Result<CompilationOutput, RecompileError> {
            assert_eq!("contracts/A.sol:A", input.target.to_string());
            match &self.0 {
                Ok(output) => Ok(output.clone()),
                Err(error) => Err(error()),
            }
        }
    }

    fn recompiler() -> StaticRecompiler {
        StaticRecompiler(Ok(CompilationOutput {
            creation_bytecode: "60806040526080604052600080fdfe".into(),
            runtime_bytecode: "6080604052600080fdfe".into(),
            ..Default::default()
        }))
    }

    fn metadata(sources: Value) -> PathBuffer {
        let metadata = json!({
            "compiler": {"version": "0.8.24+commit.e11b9ed9"},
            "language": "Solidity",
            "output": {"abi": [{"type": "constructor", "inputs": []}]},
            "settings": {
                "compilationTarget": {"contracts/A.sol": "A"},
                "optimizer": {"enabled": false, "runs": 200}
            },
            "sources": sources,
            "version": 1
        });
        PathBuffer::new("metadata.json", metadata.to_string().into_bytes())
    }

    fn source_hash(content: &str) -> String {
        format!("0x{}", hex::encode(keccak256(content.as_bytes())))
    }

    #[tokio::test]
    async fn checks_files_with_matching_sources() {
        // given
        let files = vec![
            metadata(json!({"contracts/A.sol": {"keccak256": source_hash(SOURCE)}})),
            PathBuffer::new("A.sol", SOURCE.as_bytes().to_vec()),
        ];

        // when
        let contracts = check_files(&files, &recompiler())
            .await
            .expect("files should be checked");

        // then
        assert_eq!(1, contracts.len());
        let contract = &contracts[0];
        assert_eq!("contracts/A.sol:A", contract.name().to_string());
        assert_eq!(SOURCE, contract.sources()["contracts/A.sol"].content);
        assert_eq!(Some(0), contract.constructor_inputs());
        assert_eq!(
            &json!({"enabled": false, "runs": 200}),
            &contract.compiler_settings()["optimizer"]
        );
    }

    #[tokio::test]
    async fn accepts_sources_with_different_line_endings() {
        let files = vec![
            metadata(json!({"contracts/A.sol": {"keccak256": source_hash(SOURCE)}})),
            PathBuffer::new("A.sol", "contract A {}\r\n".as_bytes().to_vec()),
        ];

        let contracts = check_files(&files, &recompiler())
            .await
            .expect("files should be checked");
        assert_eq!(SOURCE, contracts[0].sources()["contracts/A.sol"].content);
    }

    #[tokio::test]
    async fn uses_embedded_source_content() {
        let files = vec![metadata(json!({
            "contracts/A.sol": {"keccak256": source_hash(SOURCE), "content": SOURCE}
        }))];

        let contracts = check_files(&files, &recompiler())
            .await
            .expect("files should be checked");
        assert_eq!(SOURCE, contracts[0].sources()["contracts/A.sol"].content);
    }

    #[tokio::test]
    async fn reports_all_missing_sources() {
        let files = vec![
            metadata(json!({
                "contracts/A.sol": {"keccak256": source_hash(SOURCE)},
                "contracts/B.sol": {"keccak256": source_hash("library B {}")},
                "contracts/C.sol": {"keccak256": source_hash("library C {}")},
            })),
            PathBuffer::new("A.sol", SOURCE.as_bytes().to_vec()),
        ];

        let error = check_files(&files, &recompiler())
            .await
            .expect_err("sources are missing");
        match error {
            IntakeError::MissingSources(paths) => {
                assert_eq!(vec!["contracts/B.sol", "contracts/C.sol"], paths)
            }
            error => panic!("unexpected error: {error}"),
        }
    }

    #[tokio::test]
    async fn requires_exactly_one_metadata() {
        let error = check_files(
            &[PathBuffer::new("A.sol", SOURCE.as_bytes().to_vec())],
            &recompiler(),
        )
        .await
        .expect_err("no metadata");
        assert!(matches!(error, IntakeError::NoMetadata), "{error:?}");

        let sources = json!({"contracts/A.sol": {"keccak256": source_hash(SOURCE)}});
        let error = check_files(
            &[metadata(sources.clone()), metadata(sources)],
            &recompiler(),
        )
        .await
        .expect_err("two metadata files");
        assert!(
            matches!(error, IntakeError::MultipleMetadata(ref paths) if paths.len() == 2),
            "{error:?}"
        );
    }

    #[tokio::test]
    async fn propagates_unsupported_compiler_version() {
        let files = vec![
            metadata(json!({"contracts/A.sol": {"keccak256": source_hash(SOURCE)}})),
            PathBuffer::new("A.sol", SOURCE.as_bytes().to_vec()),
        ];
        let recompiler = StaticRecompiler(Err(|| {
            RecompileError::UnsupportedCompilerVersion("0.8.24+commit.e11b9ed9".into())
        }));

        let error = check_files(&files, &recompiler)
            .await
            .expect_err("compiler is not supported");
        assert!(
            matches!(
                error,
                IntakeError::Recompilation(RecompileError::UnsupportedCompilerVersion(_))
            ),
            "{error:?}"
        );
    }
}
