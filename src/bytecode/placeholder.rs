use ethers_core::utils::keccak256;
use std::fmt::{Display, Formatter};

/// Size of the address substituted in place of a library placeholder.
pub const LIBRARY_ADDRESS_LENGTH: usize = 20;

/// Placeholders are stored inside hex encoded objects,
/// so each one occupies two characters per address byte.
const PLACEHOLDER_HEX_LENGTH: usize = LIBRARY_ADDRESS_LENGTH * 2;

/// Maximum number of name characters kept by the pre-0.5.0 placeholder format.
const LEGACY_NAME_LENGTH: usize = PLACEHOLDER_HEX_LENGTH - 4;

/// Tokens the compiler may leave in unlinked bytecode for a single library.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LibraryPlaceholder {
    fully_qualified_name: String,
    hashed: String,
    legacy: String,
}

impl LibraryPlaceholder {
    pub fn new(fully_qualified_name: impl Into<String>) -> Self {
        let fully_qualified_name = fully_qualified_name.into();
        Self {
            hashed: hashed_placeholder(&fully_qualified_name),
            legacy: legacy_placeholder(&fully_qualified_name),
            fully_qualified_name,
        }
    }

    pub fn fully_qualified_name(&self) -> &str {
        &self.fully_qualified_name
    }

    /// `__$<first 34 hex chars of keccak256(name)>$__`, used by solc since 0.5.0
    pub fn token(&self) -> &str {
        &self.hashed
    }

    /// `__<name truncated to 36 chars and padded with '_'>__`, used by solc before 0.5.0
    pub fn legacy_token(&self) -> &str {
        &self.legacy
    }

    /// Checks whether `candidate` is one of the tokens that denote this library.
    pub fn matches(&self, candidate: &str) -> bool {
        candidate == self.hashed || candidate == self.legacy
    }
}

impl Display for LibraryPlaceholder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hashed)
    }
}

fn hashed_placeholder(fully_qualified_name: &str) -> String {
    let hash = hex::encode(keccak256(fully_qualified_name.as_bytes()));
    format!("__${}$__", &hash[..PLACEHOLDER_HEX_LENGTH - 6])
}

fn legacy_placeholder(fully_qualified_name: &str) -> String {
    let name: String = fully_qualified_name
        .chars()
        .take(LEGACY_NAME_LENGTH)
        .collect();
    format!("__{name:_<LEGACY_NAME_LENGTH$}__")
}

fn strip_hex_prefix(object: &str) -> &str {
    object.strip_prefix("0x").unwrap_or(object)
}

fn placeholder_slot(object: &str, offset: usize) -> Option<&str> {
    let object = strip_hex_prefix(object);
    let start = offset.checked_mul(2)?;
    object.get(start..start.checked_add(PLACEHOLDER_HEX_LENGTH)?)
}

/// Checks whether the unlinked hex `object` holds any library placeholder
/// at the byte `offset`. Only the structural shape of the token is checked.
pub fn is_placeholder(object: &str, offset: usize) -> bool {
    match placeholder_slot(object, offset) {
        Some(slot) => slot.starts_with("__") && slot.ends_with("__"),
        None => false,
    }
}

/// Checks whether the unlinked hex `object` holds the placeholder
/// of the given library at the byte `offset`.
pub fn is_placeholder_for(object: &str, offset: usize, placeholder: &LibraryPlaceholder) -> bool {
    placeholder_slot(object, offset)
        .map(|slot| placeholder.matches(slot))
        .unwrap_or_default()
}

/// Returns byte offsets of every occurrence of `token` inside the unlinked hex `object`.
///
/// Used when the compiler output does not include link references for the bytecode.
pub fn find_placeholder_offsets(object: &str, token: &str) -> Vec<usize> {
    strip_hex_prefix(object)
        .match_indices(token)
        .filter(|(index, _)| index % 2 == 0)
        .map(|(index, _)| index / 2)
        .collect()
}

/// Replaces the placeholders at the given byte offsets with zeros
/// and decodes the resultant object into bytes.
pub fn nullify_placeholders(
    object: &str,
    offsets: impl IntoIterator<Item = usize>,
) -> Result<Vec<u8>, NullifyError> {
    let mut to_nullify = strip_hex_prefix(object).to_string();
    for offset in offsets {
        let start = offset * 2;
        if to_nullify.len() < start + PLACEHOLDER_HEX_LENGTH {
            return Err(NullifyError::OffsetExceedsCode {
                offset,
                code_length: to_nullify.len() / 2,
            });
        }
        to_nullify.replace_range(
            start..start + PLACEHOLDER_HEX_LENGTH,
            &"0".repeat(PLACEHOLDER_HEX_LENGTH),
        );
    }

    hex::decode(to_nullify).map_err(NullifyError::InvalidHex)
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum NullifyError {
    #[error("link reference offset {offset} exceeds code size {code_length}")]
    OffsetExceedsCode { offset: usize, code_length: usize },
    #[error("cannot decode resultant code as bytes: {0}")]
    InvalidHex(hex::FromHexError),
}
