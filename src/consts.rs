use std::time::Duration;

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime code of Solidity libraries starts with `PUSH20 <library address> ADDRESS EQ`.
/// The address is a zero placeholder in the compiled code and is filled at deployment.
pub const CALL_PROTECTION_PREFIX: u8 = 0x73;
pub const CALL_PROTECTION_SUFFIX: [u8; 2] = [0x30, 0x14];

/// Size of a single ABI encoded word.
pub const WORD_SIZE: usize = 32;
