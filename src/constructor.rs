use crate::{
    bytecode::CodeKind,
    chain::TransactionInfo,
    consts::WORD_SIZE,
    contract::CheckedContract,
    matcher::{compare_bytecodes, link_libraries, BytecodeMatch},
    verification_match::MismatchCause,
    DisplayBytes,
};
use bytes::Bytes;
use ethers_core::types::Address;
use mismatch::Mismatch;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ConstructorCheckError {
    #[error("creation transaction input is shorter than the creation bytecode: {0}")]
    InputTooShort(Mismatch<usize>),
    #[error("creation transaction input does not start with the creation bytecode: {0}")]
    CreationMismatch(MismatchCause),
    #[error("constructor arguments of {0} bytes are not a sequence of abi words")]
    MalformedConstructorArguments(usize),
    #[error("constructor has parameters but the creation transaction carries no arguments")]
    MissingConstructorArguments,
    #[error("constructor has no parameters but the creation transaction carries {0}")]
    UnexpectedConstructorArguments(DisplayBytes),
    #[error("constructor arguments differ from the provided ones: {0}")]
    ConstructorArgumentsMismatch(Mismatch<DisplayBytes>),
    #[error("transaction is a call to {0:?}, not a contract creation")]
    NotContractCreation(Address),
    #[error("transaction created {created:?}, not {expected:?}")]
    CreatedAddressMismatch { expected: Address, created: Address },
}

/// Creation bytecode comparison together with the extracted constructor arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreationMatch {
    pub bytecode: BytecodeMatch,
    pub constructor_arguments: Bytes,
}

/// Checks that the transaction is the one that deployed `address`.
pub fn check_creator(
    transaction: &TransactionInfo,
    address: Address,
) -> Result<(), ConstructorCheckError> {
    if let Some(to) = transaction.to {
        return Err(ConstructorCheckError::NotContractCreation(to));
    }
    match transaction.created_address() {
        Some(created) if created != address => {
            Err(ConstructorCheckError::CreatedAddressMismatch {
                expected: address,
                created,
            })
        }
        _ => Ok(()),
    }
}

/// Checks that the creation transaction input is the creation bytecode
/// followed by abi encoded constructor arguments.
///
/// Creation libraries are linked from the transaction input and must agree with
/// the addresses already resolved from the runtime code.
pub fn verify_constructor(
    contract: &CheckedContract,
    creation_tx_input: &Bytes,
    constructor_arguments: Option<&Bytes>,
    runtime_libraries: &BTreeMap<String, Address>,
) -> Result<CreationMatch, ConstructorCheckError> {
    let creation_bytecode = contract.creation_bytecode();
    if creation_tx_input.len() < creation_bytecode.len() {
        return Err(ConstructorCheckError::InputTooShort(Mismatch::new(
            creation_bytecode.len(),
            creation_tx_input.len(),
        )));
    }
    let (prefix, suffix) = creation_tx_input.split_at(creation_bytecode.len());

    let mut linked = creation_bytecode.to_vec();
    let mut library_map = runtime_libraries.clone();
    link_libraries(
        &mut linked,
        prefix,
        contract.creation_libraries(),
        &mut library_map,
    )
    .map_err(ConstructorCheckError::CreationMismatch)?;

    let (status, partial_reason) = compare_bytecodes(
        CodeKind::Creation,
        &Bytes::from(linked),
        &creation_tx_input.slice(..prefix.len()),
    )
    .map_err(ConstructorCheckError::CreationMismatch)?;

    check_arguments(contract, suffix, constructor_arguments)?;

    Ok(CreationMatch {
        bytecode: BytecodeMatch {
            status,
            partial_reason,
            library_map,
        },
        constructor_arguments: Bytes::copy_from_slice(suffix),
    })
}

fn check_arguments(
    contract: &CheckedContract,
    arguments: &[u8],
    expected: Option<&Bytes>,
) -> Result<(), ConstructorCheckError> {
    if arguments.len() % WORD_SIZE != 0 {
        return Err(ConstructorCheckError::MalformedConstructorArguments(
            arguments.len(),
        ));
    }

    match contract.constructor_inputs() {
        Some(0) if !arguments.is_empty() => {
            return Err(ConstructorCheckError::UnexpectedConstructorArguments(
                Bytes::copy_from_slice(arguments).into(),
            ))
        }
        Some(inputs) if inputs > 0 && arguments.is_empty() => {
            return Err(ConstructorCheckError::MissingConstructorArguments)
        }
        _ => {}
    }

    match expected {
        Some(expected) if expected.as_ref() != arguments => Err(
            ConstructorCheckError::ConstructorArgumentsMismatch(Mismatch::new(
                expected.clone().into(),
                Bytes::copy_from_slice(arguments).into(),
            )),
        ),
        _ => Ok(()),
    }
}
