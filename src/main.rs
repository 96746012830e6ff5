//! `ten-session`: manage a TEN session key from the command line.
//!
//! ```text
//! ten-session --config ten.toml create
//! ten-session fund --amount 0.01 --from 0xWallet
//! ten-session send --to 0xRecipient --value 0.001
//! ten-session delete --sweep-to 0xWallet
//! ```
//!
//! Every command prints a JSON document on stdout; logs go to stderr. The
//! session key and gateway token persist in `.ten-session.json` unless
//! `--state-file` or `session.storage_path` names another file.

use alloy::primitives::{Address, Bytes, U256};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use ten_session_keys::blockchain::fees::Urgency;
use ten_session_keys::blockchain::TransactionIntent;
use ten_session_keys::config::{load_config, TenConfig};
use ten_session_keys::observability::logging;
use ten_session_keys::session::amounts::{self, format_eth};
use ten_session_keys::session::{FileStore, SessionKeyEngine, SessionState, WithdrawalOutcome};
use ten_session_keys::token::{MemoryTokenStore, TokenCache, TokenStore};

const DEFAULT_STATE_FILE: &str = ".ten-session.json";

#[derive(Parser)]
#[command(name = "ten-session")]
#[command(about = "Session key manager for the TEN network", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in testnet defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// JSON file holding the session key and gateway token between runs
    #[arg(long)]
    state_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print authorised gateway URLs
    Token,
    #[command(flatten)]
    Session(SessionCommand),
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Create a session key, or reuse the persisted one
    Create,
    /// Fund the session key from a wallet account
    Fund {
        /// Amount in ETH
        #[arg(long)]
        amount: String,
        /// Wallet account paying for the transfer
        #[arg(long)]
        from: Address,
    },
    /// Send a transaction signed by the session key
    Send {
        #[arg(long)]
        to: Address,
        /// Value in ETH
        #[arg(long)]
        value: Option<String>,
        /// Hex calldata
        #[arg(long)]
        data: Option<Bytes>,
        #[arg(long)]
        gas_limit: Option<u64>,
        #[arg(long)]
        nonce: Option<u64>,
    },
    /// Refresh and print the session key balance
    Balance,
    /// Withdraw from the session key; sweeps above the gas reserve without --amount
    Withdraw {
        #[arg(long)]
        to: Address,
        /// Amount in ETH
        #[arg(long)]
        amount: Option<String>,
    },
    /// Delete the session key; with --sweep-to, withdraw first and delete only on success
    Delete {
        #[arg(long)]
        sweep_to: Option<Address>,
    },
    /// Delete whatever session key the gateway holds for the account
    Cleanup,
    /// Forget the session key locally
    Clear,
    /// Show the fee quote for an urgency level
    Fees {
        #[arg(long, default_value = "medium")]
        urgency: Urgency,
    },
    /// Suggest funding amounts from a wallet balance
    Suggest {
        /// Wallet account to read the balance of
        #[arg(long)]
        wallet: Address,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TenConfig::default(),
    };
    if cli.json_logs {
        config.observability.json_logs = true;
    }
    if let Some(path) = cli.state_file {
        config.session.storage_path = Some(path);
    } else if config.session.storage_path.is_none() {
        config.session.storage_path = Some(DEFAULT_STATE_FILE.to_string());
    }
    logging::init(&config.observability);

    tracing::debug!(
        rpc_url = %config.network.rpc_url,
        chain_id = config.network.chain_id,
        storage_path = ?config.session.storage_path,
        "Configuration loaded"
    );

    let output = run(cli.command, config).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(command: Commands, config: TenConfig) -> Result<Value, Box<dyn std::error::Error>> {
    match command {
        Commands::Token => {
            let store: Arc<dyn TokenStore> = match &config.session.storage_path {
                Some(path) => Arc::new(FileStore::new(path, config.token.storage_key.clone())),
                None => Arc::new(MemoryTokenStore::default()),
            };
            let cache =
                TokenCache::from_config(config.token, config.network.rpc_timeout_secs, store)?;
            Ok(json!({
                "rpcUrl": cache.rpc_url().await?.as_str(),
                "wsUrl": cache.ws_url().await?.as_str(),
            }))
        }
        Commands::Session(command) => run_session(command, config).await,
    }
}

async fn run_session(
    command: SessionCommand,
    config: TenConfig,
) -> Result<Value, Box<dyn std::error::Error>> {
    let engine = SessionKeyEngine::connect(config)?;

    let output = match command {
        SessionCommand::Create => {
            let session_key = engine.create_session_key().await?;
            json!({ "sessionKey": session_key, "state": state_json(&engine.state()) })
        }
        SessionCommand::Fund { amount, from } => {
            let tx_hash = engine.fund_session_key(&amount, from).await?;
            json!({ "txHash": tx_hash, "state": state_json(&engine.state()) })
        }
        SessionCommand::Send {
            to,
            value,
            data,
            gas_limit,
            nonce,
        } => {
            let value = value
                .as_deref()
                .map(amounts::parse_eth)
                .transpose()?;
            let intent = TransactionIntent {
                to: Some(to),
                value,
                data,
                gas_limit,
                nonce,
                ..Default::default()
            };
            let tx_hash = engine.send_transaction(intent).await?;
            json!({ "txHash": tx_hash })
        }
        SessionCommand::Balance => {
            engine.update_balance().await?;
            state_json(&engine.state())
        }
        SessionCommand::Withdraw { to, amount } => {
            let outcome = engine
                .withdraw_from_session_key(to, amount.as_deref())
                .await?;
            withdrawal_json(&outcome)
        }
        SessionCommand::Delete { sweep_to: Some(recipient) } => {
            let outcome = engine.confirm_delete_session(recipient).await?;
            json!({ "deleted": true, "withdrawal": withdrawal_json(&outcome) })
        }
        SessionCommand::Delete { sweep_to: None } => {
            engine.delete_session_key().await?;
            json!({ "deleted": true })
        }
        SessionCommand::Cleanup => {
            engine.cleanup_session_key().await?;
            json!({ "deleted": true })
        }
        SessionCommand::Clear => {
            engine.clear_local_state()?;
            json!({ "cleared": true })
        }
        SessionCommand::Fees { urgency } => {
            let quote = engine.estimate_fees(urgency).await;
            json!({
                "urgency": urgency,
                "maxFeePerGas": quote.max_fee_per_gas().to_string(),
                "maxPriorityFeePerGas": quote.max_priority_fee_per_gas().to_string(),
            })
        }
        SessionCommand::Suggest { wallet } => {
            let balance = engine.rpc().pending_balance(wallet).await?;
            let reserve = U256::from(engine.config().session.fund_reserve_wei);
            let suggestions: Vec<Value> = [25u8, 50, 75, 100]
                .iter()
                .map(|percent| {
                    json!({
                        "percent": percent,
                        "amount": amounts::quick_amount(balance, reserve, *percent),
                    })
                })
                .collect();
            json!({ "balance": format_eth(balance), "suggestions": suggestions })
        }
    };
    Ok(output)
}

fn state_json(state: &SessionState) -> Value {
    json!({
        "sessionKey": state.session_key,
        "isActive": state.is_active,
        "balance": state.balance.as_ref().map(|b| json!({
            "eth": format_eth(b.wei),
            "wei": b.wei.to_string(),
            "estimatedTransactions": b.estimated_transactions,
        })),
        "deletion": state.deletion,
        "error": state.error.as_ref().map(|e| e.to_string()),
    })
}

fn withdrawal_json(outcome: &WithdrawalOutcome) -> Value {
    match outcome {
        WithdrawalOutcome::Withdrawn { tx_hash, amount } => json!({
            "status": "withdrawn",
            "txHash": tx_hash,
            "amount": format_eth(*amount),
        }),
        WithdrawalOutcome::NothingToWithdraw { balance } => json!({
            "status": "nothing_to_withdraw",
            "balance": format_eth(*balance),
        }),
    }
}
