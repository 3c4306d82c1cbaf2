use bytes::Bytes;
use minicbor::{data::Type, Decode, Decoder};
use semver::Version;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Compiler which produced the metadata section, with its version.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompilerVersion {
    Solc(Version),
    Vyper(Version),
}

impl Display for CompilerVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CompilerVersion::Solc(version) => write!(f, "solc {version}"),
            CompilerVersion::Vyper(version) => write!(f, "vyper {version}"),
        }
    }
}

/// Parsed metadata section appended by the compiler to the bytecode.
///
/// Unknown keys are skipped, so newer compilers that add entries are still recognized.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MetadataHash {
    pub ipfs: Option<Bytes>,
    pub bzzr0: Option<Bytes>,
    pub bzzr1: Option<Bytes>,
    pub experimental: bool,
    pub compiler: Option<CompilerVersion>,
}

impl MetadataHash {
    /// Decodes a single CBOR item from the start of `encoded`.
    /// Returns the parsed value and the number of bytes it occupied.
    pub fn from_cbor(encoded: &[u8]) -> Result<(Self, usize), minicbor::decode::Error> {
        let mut context = DecodeContext::default();
        let result = minicbor::decode_with(encoded, &mut context)?;

        Ok((result, context.used_size))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
enum ParseError {
    #[error("invalid metadata type; expected \"map\" or \"array\", found \"{0}\"")]
    InvalidMetadataType(Type),
    #[error("{0} has indefinite length")]
    IndefiniteLength(&'static str),
    #[error("invalid {key} array size; value={value}")]
    InvalidArraySize { key: &'static str, value: u64 },
    #[error("invalid {key} type; expected \"{expected}\", found=\"{actual}\"")]
    InvalidValueType {
        key: &'static str,
        expected: Type,
        actual: Type,
    },
    #[error("invalid {key} version: {value}")]
    InvalidVersion { key: &'static str, value: String },
}

impl From<ParseError> for minicbor::decode::Error {
    fn from(error: ParseError) -> minicbor::decode::Error {
        minicbor::decode::Error::custom(error)
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
struct DecodeContext {
    used_size: usize,
}

impl<'b> Decode<'b, DecodeContext> for MetadataHash {
    fn decode(
        d: &mut Decoder<'b>,
        ctx: &mut DecodeContext,
    ) -> Result<Self, minicbor::decode::Error> {
        let metadata = match d.datatype()? {
            Type::Map => decode_metadata_map(d)?,
            // Vyper starting from 0.4.0 emits an array whose last element is the compiler map
            Type::Array => {
                let length = d.array()?.ok_or(ParseError::IndefiniteLength("metadata"))?;
                if length == 0 {
                    Err(ParseError::InvalidArraySize {
                        key: "metadata",
                        value: length,
                    })?
                }
                for _ in 1..length {
                    d.skip()?;
                }
                validate_value_datatype(d, "compiler_map", Type::Map)?;
                decode_metadata_map(d)?
            }
            ty => Err(ParseError::InvalidMetadataType(ty))?,
        };

        ctx.used_size = d.position();
        Ok(metadata)
    }
}

fn decode_metadata_map(d: &mut Decoder) -> Result<MetadataHash, minicbor::decode::Error> {
    let entries = d.map()?.ok_or(ParseError::IndefiniteLength("metadata map"))?;

    let mut metadata = MetadataHash::default();
    for _ in 0..entries {
        validate_value_datatype(d, "metadata_key", Type::String)?;
        match d.str()? {
            "ipfs" => metadata.ipfs = Some(decode_hash(d, "ipfs")?),
            "bzzr0" => metadata.bzzr0 = Some(decode_hash(d, "bzzr0")?),
            "bzzr1" => metadata.bzzr1 = Some(decode_hash(d, "bzzr1")?),
            "experimental" => {
                validate_value_datatype(d, "experimental", Type::Bool)?;
                metadata.experimental = d.bool()?;
            }
            "solc" => metadata.compiler = Some(CompilerVersion::Solc(decode_solc_version(d)?)),
            "vyper" => {
                metadata.compiler = Some(CompilerVersion::Vyper(decode_version_array(d, "vyper")?))
            }
            _ => d.skip()?,
        }
    }

    Ok(metadata)
}

fn validate_value_datatype(
    d: &mut Decoder,
    key: &'static str,
    expected: Type,
) -> Result<(), minicbor::decode::Error> {
    let ty = d.datatype()?;
    if ty != expected {
        Err(ParseError::InvalidValueType {
            key,
            expected,
            actual: ty,
        })?
    }

    Ok(())
}

fn decode_hash(d: &mut Decoder, key: &'static str) -> Result<Bytes, minicbor::decode::Error> {
    validate_value_datatype(d, key, Type::Bytes)?;
    Ok(Bytes::copy_from_slice(d.bytes()?))
}

/// Release builds store the version as three bytes, prerelease builds as a full string.
fn decode_solc_version(d: &mut Decoder) -> Result<Version, minicbor::decode::Error> {
    match d.datatype()? {
        Type::Bytes => {
            let value = d.bytes()?;
            match value {
                [major, minor, patch] => {
                    Ok(Version::new(*major as u64, *minor as u64, *patch as u64))
                }
                _ => Err(ParseError::InvalidVersion {
                    key: "solc",
                    value: hex::encode(value),
                }
                .into()),
            }
        }
        Type::String => {
            let value = d.str()?;
            Version::parse(value).map_err(|_| {
                ParseError::InvalidVersion {
                    key: "solc",
                    value: value.to_string(),
                }
                .into()
            })
        }
        actual => Err(ParseError::InvalidValueType {
            key: "solc",
            expected: Type::Bytes,
            actual,
        }
        .into()),
    }
}

fn decode_version_array(
    d: &mut Decoder,
    key: &'static str,
) -> Result<Version, minicbor::decode::Error> {
    validate_value_datatype(d, key, Type::Array)?;
    let length = d.array()?.unwrap_or(u64::MAX);
    if length != 3 {
        Err(ParseError::InvalidArraySize { key, value: length })?
    }

    let major = decode_unsigned_integer(d, key)?;
    let minor = decode_unsigned_integer(d, key)?;
    let patch = decode_unsigned_integer(d, key)?;

    Ok(Version::new(major, minor, patch))
}

fn decode_unsigned_integer(
    d: &mut Decoder,
    key: &'static str,
) -> Result<u64, minicbor::decode::Error> {
    let value = match d.datatype()? {
        Type::U8 => d.u8()? as u64,
        Type::U16 => d.u16()? as u64,
        Type::U32 => d.u32()? as u64,
        Type::U64 => d.u64()?,
        actual => Err(ParseError::InvalidValueType {
            key,
            expected: Type::U64,
            actual,
        })?,
    };
    Ok(value)
}
