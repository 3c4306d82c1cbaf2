use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the settings file. Falls back to `SOURCIFY_VERIFICATION__CONFIG`.
    #[clap(long)]
    pub config_path: Option<PathBuf>,
    #[clap(long)]
    pub chain_id: u64,
    /// Address of the deployed contract
    #[clap(long)]
    pub address: String,
    /// Path to the recompiled contract artifact (json)
    #[clap(long)]
    pub contract: PathBuf,
    /// Hash of the transaction which created the contract
    #[clap(long)]
    pub creator_tx_hash: Option<String>,
    /// Path to the context variables used to check immutable values (json)
    #[clap(long)]
    pub context: Option<PathBuf>,
}
