use crate::{consts::DEFAULT_RPC_TIMEOUT, ImmutablePolicy};
use anyhow::anyhow;
use config::{Config, File};
use serde::{de::IgnoredAny, Deserialize};
use serde_with::{serde_as, DurationSeconds};
use std::{num::NonZeroUsize, path::PathBuf, time::Duration};
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub chains: Vec<ChainSettings>,
    pub verifier: VerifierSettings,

    pub config: IgnoredAny,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainSettings {
    pub chain_id: u64,
    pub name: String,
    /// Endpoints in priority order
    pub rpc: Vec<RpcEndpointSettings>,
    pub fallback: FallbackSettings,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            chain_id: 1,
            name: "Ethereum Mainnet".to_string(),
            rpc: vec![],
            fallback: FallbackSettings::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcEndpointSettings {
    pub url: Url,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_rpc_timeout")]
    pub timeout: Duration,
    /// Number of attempts made to the endpoint before the next one is tried.
    /// Should be at least one. Set to `1` by default.
    #[serde(default = "default_attempts")]
    pub attempts: NonZeroUsize,
}

fn default_rpc_timeout() -> Duration {
    DEFAULT_RPC_TIMEOUT
}

fn default_attempts() -> NonZeroUsize {
    NonZeroUsize::MIN
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case", deny_unknown_fields)]
pub enum FallbackSettings {
    #[default]
    Sequential,
    Race { fan_out: NonZeroUsize },
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierSettings {
    pub immutable_policy: ImmutablePolicy,
    /// Whether creation transaction input may decide the verdict
    /// when runtime bytecode does not match.
    pub creation_fallback: bool,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub deadline: Option<Duration>,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            immutable_policy: ImmutablePolicy::default(),
            creation_fallback: true,
            deadline: None,
        }
    }
}

impl Settings {
    pub fn new(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_path = config_path.or_else(|| {
            std::env::var("SOURCIFY_VERIFICATION__CONFIG")
                .ok()
                .map(PathBuf::from)
        });

        let mut builder = Config::builder();
        if let Some(config_path) = config_path {
            builder = builder.add_source(File::from(config_path));
        };
        builder = builder.add_source(
            config::Environment::with_prefix("SOURCIFY_VERIFICATION").separator("__"),
        );

        builder
            .build()?
            .try_deserialize()
            .map_err(|err| anyhow!(err))
    }
}
