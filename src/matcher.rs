use crate::{
    bytecode::{normalize, strip_metadata_like, CodeKind, LIBRARY_ADDRESS_LENGTH},
    consts::{CALL_PROTECTION_PREFIX, CALL_PROTECTION_SUFFIX},
    context::ContextVariables,
    contract::{CheckedContract, LibraryReference, Offset},
    verification_match::{ImmutableIssue, MatchStatus, MismatchCause, PartialReason},
};
use bytes::Bytes;
use ethers_core::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::{btree_map::Entry, BTreeMap};

/// Whether immutable issues affect the match status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImmutablePolicy {
    /// Issues are reported, status is kept
    #[default]
    Advisory,
    /// Issues downgrade a perfect match to partial
    Strict,
}

/// Successful comparison of recompiled and deployed code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BytecodeMatch {
    pub status: MatchStatus,
    pub partial_reason: Option<PartialReason>,
    pub library_map: BTreeMap<String, Address>,
}

/// Value read from the deployed code at the ranges of a single immutable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedImmutable {
    pub value: Bytes,
    /// Whether every range of the immutable holds the same value
    pub consistent: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeMatch {
    pub bytecode: BytecodeMatch,
    pub immutables: BTreeMap<String, ResolvedImmutable>,
}

/// Compares the recompiled runtime code with the deployed one.
///
/// Library addresses are taken from the deployed code, immutable ranges are
/// masked in both codes, and the bytecodes are compared without metadata sections.
/// The contract buffers are never modified; linking happens on copies.
pub fn match_runtime(
    contract: &CheckedContract,
    deployed: &Bytes,
) -> Result<RuntimeMatch, MismatchCause> {
    let mut linked = contract.runtime_bytecode().to_vec();
    let mut library_map = BTreeMap::new();
    link_libraries(
        &mut linked,
        deployed,
        contract.runtime_libraries(),
        &mut library_map,
    )?;
    apply_call_protection(&mut linked, deployed);

    let immutables = resolve_immutables(deployed, contract.immutable_references())?;
    let mut masked = deployed.to_vec();
    for offset in contract.immutable_references().values().flatten() {
        mask(&mut linked, offset);
        mask(&mut masked, offset);
    }

    let (status, partial_reason) =
        compare_bytecodes(CodeKind::Runtime, &Bytes::from(linked), &Bytes::from(masked))?;

    Ok(RuntimeMatch {
        bytecode: BytecodeMatch {
            status,
            partial_reason,
            library_map,
        },
        immutables,
    })
}

/// Copies library addresses from `deployed` into `linked` at every library offset,
/// recording them into `library_map`. Addresses already present in the map must agree
/// with the deployed ones.
pub(crate) fn link_libraries(
    linked: &mut [u8],
    deployed: &[u8],
    libraries: &[LibraryReference],
    library_map: &mut BTreeMap<String, Address>,
) -> Result<(), MismatchCause> {
    for library in libraries {
        let name = library.fully_qualified_name();
        for &offset in &library.offsets {
            let range = offset..offset + LIBRARY_ADDRESS_LENGTH;
            let address_bytes = deployed
                .get(range.clone())
                .ok_or_else(|| MismatchCause::OutOfBounds {
                    region: format!("library {name}"),
                    offset,
                    length: LIBRARY_ADDRESS_LENGTH,
                    code_length: deployed.len(),
                })?;
            let address = Address::from_slice(address_bytes);

            match library_map.entry(name.to_string()) {
                Entry::Vacant(entry) => {
                    log::debug!("library {name} resolved to {address:?}");
                    entry.insert(address);
                }
                Entry::Occupied(entry) if *entry.get() != address => {
                    return Err(MismatchCause::LibraryAddressMismatch {
                        library: name.to_string(),
                        offset,
                        expected: *entry.get(),
                        found: address,
                    })
                }
                Entry::Occupied(_) => {}
            }

            linked[range].copy_from_slice(address_bytes);
        }
    }
    Ok(())
}

/// Deployed libraries have their own address pushed at the very beginning of the code.
fn apply_call_protection(linked: &mut [u8], deployed: &[u8]) {
    let address_end = 1 + LIBRARY_ADDRESS_LENGTH;
    let protection_end = address_end + CALL_PROTECTION_SUFFIX.len();
    let is_protected = |code: &[u8]| {
        code.len() >= protection_end
            && code[0] == CALL_PROTECTION_PREFIX
            && code[address_end..protection_end] == CALL_PROTECTION_SUFFIX
    };

    if is_protected(linked)
        && linked[1..address_end].iter().all(|byte| *byte == 0)
        && is_protected(deployed)
    {
        log::debug!("library call protection found");
        linked[1..address_end].copy_from_slice(&deployed[1..address_end]);
    }
}

fn mask(code: &mut [u8], offset: &Offset) {
    if let Some(range) = offset.end().and_then(|end| code.get_mut(offset.start..end)) {
        range.fill(0);
    }
}

/// Reads the deployed values of every immutable.
pub(crate) fn resolve_immutables(
    deployed: &[u8],
    references: &BTreeMap<String, Vec<Offset>>,
) -> Result<BTreeMap<String, ResolvedImmutable>, MismatchCause> {
    let mut immutables = BTreeMap::new();
    for (id, offsets) in references {
        let mut values = Vec::with_capacity(offsets.len());
        for offset in offsets {
            let value = offset
                .end()
                .and_then(|end| deployed.get(offset.start..end))
                .ok_or_else(|| MismatchCause::OutOfBounds {
                    region: format!("immutable {id}"),
                    offset: offset.start,
                    length: offset.length,
                    code_length: deployed.len(),
                })?;
            values.push(value);
        }

        if let Some((first, rest)) = values.split_first() {
            immutables.insert(
                id.clone(),
                ResolvedImmutable {
                    value: Bytes::copy_from_slice(first),
                    consistent: rest.iter().all(|value| value == first),
                },
            );
        }
    }
    Ok(immutables)
}

/// Compares code bodies byte by byte, then metadata sections.
///
/// A deployed metadata section that does not decode is still split off when its
/// length bytes are the ones of the recompiled section.
pub(crate) fn compare_bytecodes(
    code: CodeKind,
    recompiled: &Bytes,
    deployed: &Bytes,
) -> Result<(MatchStatus, Option<PartialReason>), MismatchCause> {
    let recompiled = normalize(recompiled);
    let mut normalized = normalize(deployed);
    let mut deployed_metadata_undecodable = false;
    if let (Some(expected), None) = (&recompiled.metadata, &normalized.metadata) {
        if let Some(body) = strip_metadata_like(deployed, expected) {
            log::debug!("deployed metadata section does not decode");
            normalized.body = body;
            deployed_metadata_undecodable = true;
        }
    }
    let deployed = normalized;

    if recompiled.body != deployed.body {
        let first_difference = recompiled
            .body
            .iter()
            .zip(deployed.body.iter())
            .position(|(expected, found)| expected != found)
            .unwrap_or_else(|| recompiled.body.len().min(deployed.body.len()));
        return Err(MismatchCause::BytecodeMismatch {
            code,
            first_difference,
            expected_length: recompiled.body.len(),
            found_length: deployed.body.len(),
        });
    }

    let result = match (recompiled.metadata, deployed.metadata) {
        (Some(expected), Some(found)) if expected.raw == found.raw => (MatchStatus::Perfect, None),
        (Some(expected), Some(found)) => match (expected.hash.compiler, found.hash.compiler) {
            (Some(expected), Some(found)) if expected != found => (
                MatchStatus::Partial,
                Some(PartialReason::CompilerVersionMismatch { expected, found }),
            ),
            _ => (MatchStatus::Partial, Some(PartialReason::MetadataMismatch)),
        },
        (Some(_), None) if deployed_metadata_undecodable => {
            (MatchStatus::Partial, Some(PartialReason::MetadataMismatch))
        }
        _ => (MatchStatus::Partial, Some(PartialReason::MetadataUnavailable)),
    };
    Ok(result)
}

/// Lists immutables whose ranges disagree, or whose value differs from the context.
pub fn check_immutables(
    immutables: &BTreeMap<String, ResolvedImmutable>,
    context: Option<&ContextVariables>,
) -> Vec<ImmutableIssue> {
    let mut issues = Vec::new();
    for (id, immutable) in immutables {
        if !immutable.consistent {
            issues.push(ImmutableIssue::InconsistentRanges { id: id.clone() });
        }
        let expected =
            context.and_then(|context| context.expected_immutable(id, immutable.value.len()));
        if let Some(expected) = expected {
            if expected != immutable.value {
                issues.push(ImmutableIssue::ValueMismatch {
                    id: id.clone(),
                    expected: expected.into(),
                    found: immutable.value.clone().into(),
                });
            }
        }
    }
    issues
}

/// Status and explanation after taking immutable issues into account.
pub fn apply_immutable_policy(
    policy: ImmutablePolicy,
    matched: &BytecodeMatch,
    issues: &[ImmutableIssue],
) -> (MatchStatus, Option<PartialReason>) {
    match (policy, matched.status) {
        (ImmutablePolicy::Strict, MatchStatus::Perfect) if !issues.is_empty() => {
            (MatchStatus::Partial, Some(PartialReason::ImmutableValues))
        }
        _ => (matched.status, matched.partial_reason.clone()),
    }
}
