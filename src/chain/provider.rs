use crate::DisplayBytes;
use async_trait::async_trait;
use bytes::Bytes;
use ethers_core::types::{Address, H256, U256, U64};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use thiserror::Error;
use url::Url;

/// Data of a contract creation transaction used by the verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionInfo {
    pub hash: H256,
    pub input: Bytes,
    pub block_number: Option<u64>,
    pub from: Address,
    /// Recipient of the transaction, `None` for contract creations.
    pub to: Option<Address>,
    pub nonce: U256,
}

impl TransactionInfo {
    /// Address of the contract deployed by the transaction,
    /// `None` if the transaction is a message call.
    pub fn created_address(&self) -> Option<Address> {
        self.to
            .is_none()
            .then(|| ethers_core::utils::get_contract_address(self.from, self.nonce))
    }
}

/// Errors of a single RPC endpoint. Any of them makes the chain try the next endpoint.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("error occurred while sending request: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("unexpected status code {status_code}: {msg}")]
    UnexpectedStatusCode { status_code: StatusCode, msg: String },
    #[error("json-rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A single source of chain data.
#[async_trait]
pub trait RpcProvider: Send + Sync {
    /// Identifies the provider in logs and errors.
    fn name(&self) -> &str;

    /// Returns the deployed code, which is empty for accounts without code.
    async fn get_code(&self, address: Address) -> Result<Bytes, ProviderError>;

    async fn get_transaction(&self, hash: H256)
        -> Result<Option<TransactionInfo>, ProviderError>;
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    hash: H256,
    input: DisplayBytes,
    block_number: Option<U64>,
    from: Address,
    to: Option<Address>,
    nonce: U256,
}

impl From<RawTransaction> for TransactionInfo {
    fn from(raw: RawTransaction) -> Self {
        Self {
            hash: raw.hash,
            input: raw.input.0,
            block_number: raw.block_number.map(|number| number.as_u64()),
            from: raw.from,
            to: raw.to,
            nonce: raw.nonce,
        }
    }
}

/// Ethereum JSON-RPC over http.
pub struct HttpProvider {
    url: Url,
    reqwest_client: reqwest::Client,
    request_id: AtomicU64,
}

impl HttpProvider {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, ProviderError> {
        let reqwest_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url,
            reqwest_client,
            request_id: AtomicU64::new(1),
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ProviderError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let response = self
            .reqwest_client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ProviderError::UnexpectedStatusCode {
                status_code: response.status(),
                msg: response.text().await?,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
        Self::process_response(body)
    }

    fn process_response<T: DeserializeOwned>(mut body: Value) -> Result<T, ProviderError> {
        if let Some(error) = body.get("error") {
            let error = JsonRpcError::deserialize(error)
                .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
            return Err(ProviderError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        let result = body
            .get_mut("result")
            .map(Value::take)
            .ok_or_else(|| ProviderError::InvalidResponse("result is missing".into()))?;
        serde_json::from_value(result)
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))
    }
}

#[async_trait]
impl RpcProvider for HttpProvider {
    fn name(&self) -> &str {
        self.url.as_str()
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ProviderError> {
        let code: DisplayBytes = self
            .request("eth_getCode", json!([address, "latest"]))
            .await?;
        Ok(code.0)
    }

    async fn get_transaction(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionInfo>, ProviderError> {
        let transaction: Option<RawTransaction> = self
            .request("eth_getTransactionByHash", json!([hash]))
            .await?;
        Ok(transaction.map(TransactionInfo::from))
    }
}
