use super::{Endpoint, EndpointFailure, RpcCall, RpcOutput};
use crate::settings::FallbackSettings;
use async_trait::async_trait;
use futures::{stream::FuturesUnordered, StreamExt};
use std::{fmt::Debug, num::NonZeroUsize, sync::Arc};

/// Policy of spreading a single call over the chain endpoints.
///
/// Endpoints come ordered by priority. Implementations return the first
/// successful output, or every endpoint failure if none succeeded.
#[async_trait]
pub trait FetchStrategy: Send + Sync + Debug {
    async fn try_fetch(
        &self,
        chain_id: u64,
        endpoints: &[Arc<Endpoint>],
        call: RpcCall,
    ) -> Result<RpcOutput, Vec<EndpointFailure>>;
}

/// Tries endpoints one by one, in priority order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sequential;

#[async_trait]
impl FetchStrategy for Sequential {
    async fn try_fetch(
        &self,
        chain_id: u64,
        endpoints: &[Arc<Endpoint>],
        call: RpcCall,
    ) -> Result<RpcOutput, Vec<EndpointFailure>> {
        let mut failures = Vec::new();
        for endpoint in endpoints {
            match endpoint.execute(chain_id, call).await {
                Ok(output) => return Ok(output),
                Err(error) => failures.push(EndpointFailure::new(endpoint, error)),
            }
        }
        Err(failures)
    }
}

/// Keeps up to `fan_out` endpoints in flight at once. Whenever one of them fails,
/// the next endpoint in priority order is started. Requests still running when
/// the first success arrives are dropped together with the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundedRace {
    fan_out: NonZeroUsize,
}

impl BoundedRace {
    pub fn new(fan_out: NonZeroUsize) -> Self {
        Self { fan_out }
    }
}

async fn attempt(
    endpoint: &Endpoint,
    chain_id: u64,
    call: RpcCall,
) -> Result<RpcOutput, EndpointFailure> {
    endpoint
        .execute(chain_id, call)
        .await
        .map_err(|error| EndpointFailure::new(endpoint, error))
}

#[async_trait]
impl FetchStrategy for BoundedRace {
    async fn try_fetch(
        &self,
        chain_id: u64,
        endpoints: &[Arc<Endpoint>],
        call: RpcCall,
    ) -> Result<RpcOutput, Vec<EndpointFailure>> {
        let mut pending = endpoints.iter();
        let mut in_flight = FuturesUnordered::new();
        for endpoint in pending.by_ref().take(self.fan_out.get()) {
            in_flight.push(attempt(endpoint, chain_id, call));
        }

        let mut failures = Vec::new();
        while let Some(result) = in_flight.next().await {
            match result {
                Ok(output) => return Ok(output),
                Err(failure) => {
                    failures.push(failure);
                    if let Some(endpoint) = pending.next() {
                        in_flight.push(attempt(endpoint, chain_id, call));
                    }
                }
            }
        }
        Err(failures)
    }
}

pub fn from_settings(settings: &FallbackSettings) -> Arc<dyn FetchStrategy> {
    match settings {
        FallbackSettings::Sequential => Arc::new(Sequential),
        FallbackSettings::Race { fan_out } => Arc::new(BoundedRace::new(*fan_out)),
    }
}
