use crate::{
    chain::{ChainError, SourcifyChain, TransactionInfo},
    constructor::{check_creator, verify_constructor, ConstructorCheckError, CreationMatch},
    context::ContextVariables,
    contract::CheckedContract,
    matcher::{apply_immutable_policy, check_immutables, match_runtime, BytecodeMatch},
    settings::VerifierSettings,
    verification_match::{CreationCheck, Match, MismatchCause},
};
use ethers_core::types::{Address, H256};
use std::{collections::BTreeMap, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancellationReason {
    #[error("cancellation was requested")]
    Token,
    #[error("deadline of {0:?} has passed")]
    Deadline(Duration),
}

/// Failures of the verification itself, as opposed to negative verdicts.
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error(transparent)]
    ChainUnavailable(ChainError),
    #[error("verification was cancelled: {0}")]
    Cancelled(CancellationReason),
}

#[derive(Clone, Debug, Default)]
pub struct Verifier {
    settings: VerifierSettings,
    cancellation: CancellationToken,
}

impl Verifier {
    pub fn new(settings: VerifierSettings) -> Self {
        Self {
            settings,
            cancellation: CancellationToken::new(),
        }
    }

    /// Pending and future verifications fail with [`VerificationError::Cancelled`]
    /// once the token is cancelled.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    /// Compares the contract with the code deployed at `address`.
    ///
    /// All comparison outcomes, including the absence of a match, are returned as [`Match`].
    /// An error is returned only if the chain could not be queried or the verification
    /// was cancelled.
    pub async fn verify_deployed(
        &self,
        contract: &CheckedContract,
        chain: &SourcifyChain,
        address: Address,
        context: Option<&ContextVariables>,
        creator_tx_hash: Option<H256>,
    ) -> Result<Match, VerificationError> {
        let deadline = async {
            match self.settings.deadline {
                Some(deadline) => {
                    tokio::time::sleep(deadline).await;
                    deadline
                }
                None => futures::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => {
                log::info!(
                    "verification of {address:?} on chain #{} was cancelled",
                    chain.chain_id()
                );
                Err(VerificationError::Cancelled(CancellationReason::Token))
            }
            deadline = deadline => {
                log::info!(
                    "verification of {address:?} on chain #{} exceeded the deadline",
                    chain.chain_id()
                );
                Err(VerificationError::Cancelled(CancellationReason::Deadline(deadline)))
            }
            result = self.verify(contract, chain, address, context, creator_tx_hash) => result,
        }
    }

    async fn verify(
        &self,
        contract: &CheckedContract,
        chain: &SourcifyChain,
        address: Address,
        context: Option<&ContextVariables>,
        creator_tx_hash: Option<H256>,
    ) -> Result<Match, VerificationError> {
        let chain_id = chain.chain_id();
        log::info!(
            "verifying {} at {address:?} on chain #{chain_id}",
            contract.name()
        );

        let deployed = match chain.get_code(address).await {
            Ok(code) => code,
            Err(ChainError::CodeNotFound { .. }) => {
                return Ok(finish(Match::failed(
                    chain_id,
                    address,
                    MismatchCause::NotFound { chain_id, address },
                )))
            }
            Err(err) => return Err(VerificationError::ChainUnavailable(err)),
        };

        let transaction = match creator_tx_hash {
            Some(hash) => match chain.get_transaction(hash).await {
                Ok(transaction) => Some(transaction),
                Err(ChainError::TransactionNotFound { .. }) => {
                    return Ok(finish(Match::failed(
                        chain_id,
                        address,
                        MismatchCause::TransactionNotFound { chain_id, hash },
                    )))
                }
                Err(err) => return Err(VerificationError::ChainUnavailable(err)),
            },
            None => None,
        };

        let runtime = match_runtime(contract, &deployed);

        let runtime_libraries = match &runtime {
            Ok(matched) => matched.bytecode.library_map.clone(),
            Err(_) => BTreeMap::new(),
        };
        let constructor_arguments = context
            .and_then(|context| context.constructor_arguments.as_ref())
            .map(|arguments| &arguments.0);
        let creation = transaction.as_ref().map(|transaction| {
            check_creator(transaction, address).and_then(|()| {
                verify_constructor(
                    contract,
                    &transaction.input,
                    constructor_arguments,
                    &runtime_libraries,
                )
            })
        });
        if let Some(Err(err)) = &creation {
            log::info!(
                "creation check failed; address={address:?}, chain_id={chain_id}, error={err}"
            );
        }

        let (bytecode, immutables) = match runtime {
            Ok(matched) => (matched.bytecode, matched.immutables),
            Err(cause @ MismatchCause::BytecodeMismatch { .. }) => {
                match fallback_to_creation(self.settings.creation_fallback, &creation) {
                    Some(bytecode) => {
                        log::info!(
                            "runtime code differs, using creation code verdict; cause={cause}"
                        );
                        (bytecode, BTreeMap::new())
                    }
                    None => {
                        let mut verdict = Match::failed(chain_id, address, cause);
                        verdict.creation = creation.map(creation_check);
                        return Ok(finish(verdict));
                    }
                }
            }
            Err(cause) => {
                let mut verdict = Match::failed(chain_id, address, cause);
                verdict.creation = creation.map(creation_check);
                return Ok(finish(verdict));
            }
        };

        let creator = transaction
            .as_ref()
            .filter(|transaction| check_creator(transaction, address).is_ok());
        let context = context
            .cloned()
            .unwrap_or_default()
            .or(derived_context(creator, creation.as_ref()));
        let immutable_issues = check_immutables(&immutables, Some(&context));
        let (status, partial_reason) =
            apply_immutable_policy(self.settings.immutable_policy, &bytecode, &immutable_issues);

        Ok(finish(Match {
            address,
            chain_id,
            status: Some(status),
            library_map: bytecode.library_map,
            immutable_references: immutables
                .into_iter()
                .map(|(id, immutable)| (id, immutable.value.into()))
                .collect(),
            immutable_issues,
            message: partial_reason.map(|reason| reason.to_string()),
            cause: None,
            creation: creation.map(creation_check),
        }))
    }
}

/// Verifies the contract with default settings and no cancellation.
pub async fn verify_deployed(
    contract: &CheckedContract,
    chain: &SourcifyChain,
    address: Address,
    context: Option<&ContextVariables>,
    creator_tx_hash: Option<H256>,
) -> Result<Match, VerificationError> {
    Verifier::default()
        .verify_deployed(contract, chain, address, context, creator_tx_hash)
        .await
}

fn fallback_to_creation(
    enabled: bool,
    creation: &Option<Result<CreationMatch, ConstructorCheckError>>,
) -> Option<BytecodeMatch> {
    match creation {
        Some(Ok(creation)) if enabled => Some(creation.bytecode.clone()),
        _ => None,
    }
}

/// Context values known from the transaction that created the verified address.
fn derived_context(
    transaction: Option<&TransactionInfo>,
    creation: Option<&Result<CreationMatch, ConstructorCheckError>>,
) -> ContextVariables {
    ContextVariables {
        deployer: transaction.map(|transaction| transaction.from),
        block_number: transaction.and_then(|transaction| transaction.block_number),
        constructor_arguments: match creation {
            Some(Ok(creation)) => Some(creation.constructor_arguments.clone().into()),
            _ => None,
        },
        ..Default::default()
    }
}

fn creation_check(creation: Result<CreationMatch, ConstructorCheckError>) -> CreationCheck {
    match creation {
        Ok(creation) => CreationCheck::Passed {
            status: creation.bytecode.status,
            constructor_arguments: creation.constructor_arguments.into(),
        },
        Err(reason) => CreationCheck::Failed { reason },
    }
}

fn finish(verdict: Match) -> Match {
    match (&verdict.status, &verdict.message) {
        (Some(status), _) => log::info!(
            "verification finished; address={:?}, chain_id={}, status={status:?}",
            verdict.address,
            verdict.chain_id
        ),
        (None, message) => log::info!(
            "no match; address={:?}, chain_id={}, reason={}",
            verdict.address,
            verdict.chain_id,
            message.as_deref().unwrap_or_default()
        ),
    }
    verdict
}
