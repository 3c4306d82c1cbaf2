use anyhow::Context;
use clap::Parser;
use sourcify_verification::{
    cli::Args, Address, CheckedContract, ContextVariables, Settings, SourcifyChain, Verifier, H256,
};
use std::{fs, path::Path, str::FromStr};
use tokio_util::sync::CancellationToken;

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let settings = Settings::new(args.config_path)?;

    let chain_settings = settings
        .chains
        .iter()
        .find(|chain| chain.chain_id == args.chain_id)
        .with_context(|| format!("chain #{} is not configured", args.chain_id))?;
    let chain = SourcifyChain::try_from(chain_settings)?;

    let contract: CheckedContract = read_json(&args.contract)?;
    let context: Option<ContextVariables> = args.context.as_deref().map(read_json).transpose()?;
    let address = Address::from_str(&args.address).context("invalid contract address")?;
    let creator_tx_hash = args
        .creator_tx_hash
        .as_deref()
        .map(H256::from_str)
        .transpose()
        .context("invalid creator transaction hash")?;

    let cancellation = CancellationToken::new();
    let verifier = Verifier::new(settings.verifier).with_cancellation(cancellation.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancellation.cancel();
        }
    });

    let verdict = verifier
        .verify_deployed(
            &contract,
            &chain,
            address,
            context.as_ref(),
            creator_tx_hash,
        )
        .await?;
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}
