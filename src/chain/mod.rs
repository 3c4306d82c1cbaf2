mod health;
mod provider;
mod strategy;

pub use health::ProviderHealth;
pub use provider::{HttpProvider, ProviderError, RpcProvider, TransactionInfo};
pub use strategy::{BoundedRace, FetchStrategy, Sequential};

use crate::settings::ChainSettings;
use bytes::Bytes;
use ethers_core::types::{Address, H256};
use std::{
    fmt::{Debug, Display, Formatter},
    num::NonZeroUsize,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;

/// Single call issued against the chain endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcCall {
    GetCode(Address),
    GetTransaction(H256),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RpcOutput {
    Code(Bytes),
    Transaction(Option<TransactionInfo>),
}

impl RpcCall {
    async fn run(self, provider: &dyn RpcProvider) -> Result<RpcOutput, ProviderError> {
        match self {
            RpcCall::GetCode(address) => provider.get_code(address).await.map(RpcOutput::Code),
            RpcCall::GetTransaction(hash) => provider
                .get_transaction(hash)
                .await
                .map(RpcOutput::Transaction),
        }
    }
}

/// RPC provider together with its call budget and health record.
pub struct Endpoint {
    provider: Arc<dyn RpcProvider>,
    timeout: Duration,
    attempts: NonZeroUsize,
    health: ProviderHealth,
}

impl Endpoint {
    pub fn new(provider: impl RpcProvider + 'static, timeout: Duration) -> Self {
        Self {
            provider: Arc::new(provider),
            timeout,
            attempts: NonZeroUsize::MIN,
            health: ProviderHealth::default(),
        }
    }

    /// Number of times a call is sent to the provider before the endpoint is given up.
    pub fn with_attempts(mut self, attempts: NonZeroUsize) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn health(&self) -> &ProviderHealth {
        &self.health
    }

    async fn execute(&self, chain_id: u64, call: RpcCall) -> Result<RpcOutput, ProviderError> {
        let mut attempt = 1;
        loop {
            let result = tokio::time::timeout(self.timeout, call.run(self.provider.as_ref()))
                .await
                .unwrap_or(Err(ProviderError::Timeout(self.timeout)));
            match result {
                Ok(output) => {
                    self.health.record_success();
                    return Ok(output);
                }
                Err(error) if attempt < self.attempts.get() => {
                    log::debug!(
                        "attempt {attempt} of {call:?} failed; chain_id={chain_id}, endpoint={}, error={error}",
                        self.name()
                    );
                    attempt += 1;
                }
                Err(error) => {
                    log::warn!(
                        "endpoint failed; chain_id={chain_id}, endpoint={}, error={error}",
                        self.name()
                    );
                    self.health.record_failure();
                    return Err(error);
                }
            }
        }
    }
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name())
            .field("timeout", &self.timeout)
            .field("attempts", &self.attempts)
            .field("health", &self.health)
            .finish()
    }
}

#[derive(Error, Debug)]
#[error("{endpoint}: {error}")]
pub struct EndpointFailure {
    pub endpoint: String,
    #[source]
    pub error: ProviderError,
}

impl EndpointFailure {
    fn new(endpoint: &Endpoint, error: ProviderError) -> Self {
        Self {
            endpoint: endpoint.name().to_string(),
            error,
        }
    }
}

struct Failures<'a>(&'a [EndpointFailure]);

impl Display for Failures<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("chain #{chain_id} has no rpc endpoints")]
    NoEndpoints { chain_id: u64 },
    #[error("chain #{chain_id} does not have a contract deployed at {address:?}")]
    CodeNotFound { chain_id: u64, address: Address },
    #[error("transaction {hash:?} was not found on chain #{chain_id}")]
    TransactionNotFound { chain_id: u64, hash: H256 },
    #[error("chain #{chain_id} is unavailable: {}", Failures(.failures))]
    Unavailable {
        chain_id: u64,
        failures: Vec<EndpointFailure>,
    },
    #[error("invalid rpc endpoint: {0}")]
    InvalidEndpoint(#[from] ProviderError),
    #[error("fetch strategy of chain #{chain_id} answered {call:?} with {output}")]
    UnexpectedOutput {
        chain_id: u64,
        call: RpcCall,
        output: &'static str,
    },
}

impl ChainError {
    /// Whether the requested data definitely does not exist on the chain.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ChainError::CodeNotFound { .. } | ChainError::TransactionNotFound { .. }
        )
    }
}

/// One network with its prioritized list of RPC endpoints.
///
/// Cloning is cheap; clones share endpoint health records.
#[derive(Clone, Debug)]
pub struct SourcifyChain {
    chain_id: u64,
    name: String,
    endpoints: Vec<Arc<Endpoint>>,
    strategy: Arc<dyn FetchStrategy>,
}

impl SourcifyChain {
    pub fn new(
        chain_id: u64,
        name: impl Into<String>,
        endpoints: Vec<Endpoint>,
    ) -> Result<Self, ChainError> {
        if endpoints.is_empty() {
            return Err(ChainError::NoEndpoints { chain_id });
        }
        Ok(Self {
            chain_id,
            name: name.into(),
            endpoints: endpoints.into_iter().map(Arc::new).collect(),
            strategy: Arc::new(Sequential),
        })
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn FetchStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    /// Returns non-empty deployed code.
    pub async fn get_code(&self, address: Address) -> Result<Bytes, ChainError> {
        match self.fetch(RpcCall::GetCode(address)).await? {
            RpcOutput::Code(code) if code.is_empty() => Err(ChainError::CodeNotFound {
                chain_id: self.chain_id,
                address,
            }),
            RpcOutput::Code(code) => Ok(code),
            output => Err(self.unexpected_output(RpcCall::GetCode(address), &output)),
        }
    }

    pub async fn get_transaction(&self, hash: H256) -> Result<TransactionInfo, ChainError> {
        match self.fetch(RpcCall::GetTransaction(hash)).await? {
            RpcOutput::Transaction(Some(transaction)) => Ok(transaction),
            RpcOutput::Transaction(None) => Err(ChainError::TransactionNotFound {
                chain_id: self.chain_id,
                hash,
            }),
            output => Err(self.unexpected_output(RpcCall::GetTransaction(hash), &output)),
        }
    }

    fn unexpected_output(&self, call: RpcCall, output: &RpcOutput) -> ChainError {
        let output = match output {
            RpcOutput::Code(_) => "code",
            RpcOutput::Transaction(_) => "a transaction",
        };
        log::error!(
            "fetch strategy returned {output} for {call:?}; chain_id={}",
            self.chain_id
        );
        ChainError::UnexpectedOutput {
            chain_id: self.chain_id,
            call,
            output,
        }
    }

    async fn fetch(&self, call: RpcCall) -> Result<RpcOutput, ChainError> {
        self.strategy
            .try_fetch(self.chain_id, &self.ordered_endpoints(), call)
            .await
            .map_err(|failures| {
                log::error!(
                    "all endpoints failed; chain_id={}, call={call:?}, failures={}",
                    self.chain_id,
                    Failures(&failures)
                );
                ChainError::Unavailable {
                    chain_id: self.chain_id,
                    failures,
                }
            })
    }

    /// Endpoints in back-off keep their relative priority, but go after healthy ones.
    fn ordered_endpoints(&self) -> Vec<Arc<Endpoint>> {
        let (mut healthy, backing_off): (Vec<_>, Vec<_>) = self
            .endpoints
            .iter()
            .cloned()
            .partition(|endpoint| !endpoint.health().is_backing_off());
        healthy.extend(backing_off);
        healthy
    }
}

impl TryFrom<&ChainSettings> for SourcifyChain {
    type Error = ChainError;

    fn try_from(settings: &ChainSettings) -> Result<Self, Self::Error> {
        let endpoints = settings
            .rpc
            .iter()
            .map(|rpc| {
                let provider = HttpProvider::new(rpc.url.clone(), rpc.timeout)?;
                Ok(Endpoint::new(provider, rpc.timeout).with_attempts(rpc.attempts))
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;

        Ok(
            SourcifyChain::new(settings.chain_id, settings.name.clone(), endpoints)?
                .with_strategy(strategy::from_settings(&settings.fallback)),
        )
    }
}
