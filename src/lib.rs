mod bytecode;
pub mod chain;
pub mod cli;
mod consts;
mod constructor;
mod context;
mod contract;
mod matcher;
pub mod settings;
mod verification_match;
mod verifier;

pub use self::settings::Settings;
pub use bytecode::{
    find_placeholder_offsets, is_placeholder, normalize, CodeKind, CompilerVersion,
    LengthConvention, LibraryPlaceholder, MetadataHash, MetadataSection, NormalizedBytecode,
    NullifyError,
};
pub use chain::{ChainError, SourcifyChain};
pub use constructor::{check_creator, verify_constructor, ConstructorCheckError, CreationMatch};
pub use context::{ContextVariables, ImmutableSource};
pub use contract::{
    check_files, CheckedContract, CheckedContractError, CompilationInput, CompilationOutput,
    FullyQualifiedName, ImmutableReferences, IntakeError, Language, LibraryReference,
    LinkReferences, Offset, PathBuffer, RecompileError, Recompiler, SourceFile,
};
pub use ethers_core::types::{Address, Bytes as DisplayBytes, H256};
pub use matcher::{match_runtime, BytecodeMatch, ImmutablePolicy, ResolvedImmutable, RuntimeMatch};
pub use verification_match::{
    CreationCheck, ImmutableIssue, Match, MatchStatus, MismatchCause, PartialReason,
};
pub use verifier::{verify_deployed, CancellationReason, VerificationError, Verifier};
