use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use color_eyre::eyre::Result;
use deployments::DeploymentEnv;
use std::path::{
    Path,
    PathBuf,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

mod client;
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "rps-tui",
    about = "Terminal client for the RPS Minus One game",
    version,
    group(
        ArgGroup::new("network")
            .args(["mainnet", "sepolia", "local"])
            .required(true)
    )
)]
struct Args {
    /// Play on Ethereum mainnet
    #[arg(long)]
    mainnet: bool,

    /// Play on Sepolia
    #[arg(long)]
    sepolia: bool,

    /// Play against a local node (anvil/hardhat)
    #[arg(long)]
    local: bool,

    /// Override RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Keystore name to unlock. Repeat to switch between several accounts.
    #[arg(long = "wallet")]
    wallets: Vec<String>,

    /// Override keystore directory (defaults to ~/.foundry/keystores)
    #[arg(long)]
    wallet_dir: Option<String>,

    /// Directory of the local move cache
    #[arg(long, default_value = ".rps-store")]
    store_dir: PathBuf,

    /// Directory for log files
    #[arg(long, default_value = ".logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record the deployed game contract for the selected network
    Register {
        /// Contract address
        #[arg(long)]
        address: String,

        /// Block the contract was deployed in
        #[arg(long)]
        block: Option<u64>,
    },
}

impl Args {
    fn env(&self) -> DeploymentEnv {
        if self.mainnet {
            DeploymentEnv::Mainnet
        } else if self.local {
            DeploymentEnv::Local
        } else {
            DeploymentEnv::Sepolia
        }
    }

    fn app_config(&self) -> client::AppConfig {
        let env = self.env();
        client::AppConfig {
            env,
            rpc_url: self
                .rpc_url
                .clone()
                .unwrap_or_else(|| env.default_rpc_url().to_string()),
            wallet_names: self.wallets.clone(),
            wallet_dir: self.wallet_dir.clone(),
            store_dir: self.store_dir.clone(),
        }
    }
}

fn init_tracing(log_dir: &Path) -> WorkerGuard {
    let appender = rolling::daily(log_dir, "rps-tui.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    guard
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let _log_guard = init_tracing(&args.log_dir);
    tracing::info!(env = %args.env(), "starting rps client");
    deployments::ensure_structure().map_err(|e| color_eyre::eyre::eyre!(e))?;

    let config = args.app_config();
    match args.command {
        Some(Command::Register { address, block }) => {
            client::register(&config, &address, block).await
        }
        None => client::run_app(config).await,
    }
}
