use super::{CompilationInput, CompilationOutput};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecompileError {
    #[error("compiler version is not supported: {0}")]
    UnsupportedCompilerVersion(String),
    #[error("compilation error: {0:?}")]
    Compilation(Vec<String>),
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

/// Rebuilds the target contract from its sources and settings.
///
/// Compiler management lives outside of this crate; implementations
/// are expected to download or locate the requested compiler themselves.
#[async_trait]
pub trait Recompiler: Send + Sync {
    async fn recompile(&self, input: &CompilationInput)
        -> Result<CompilationOutput, RecompileError>;
}
