use std::path::PathBuf;

use clap::Parser;

use crate::config::{Config, NodeMode};

#[derive(Debug, Parser)]
#[command(name = "casechain-node", about = "Case ledger node")]
pub struct Args {
    /// Path to the node's JSON config.
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,

    /// Overrides `listen_address` from the config.
    #[arg(long)]
    pub listen: Option<String>,

    /// Overrides `mode` from the config (`replica` or `client`).
    #[arg(long)]
    pub mode: Option<NodeMode>,
}

impl Args {
    pub fn apply(&self, config: &mut Config) {
        if let Some(listen) = &self.listen {
            config.listen_address = listen.clone();
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
    }
}
