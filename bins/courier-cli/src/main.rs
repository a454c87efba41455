//! courier — send crypto to an email address through a one-time escrow.
//!
//! The sender's keys come from a BIP-39 mnemonic (prompted, or read from
//! `COURIER_MNEMONIC`). Transfer passwords are prompted without echo, or
//! read from `COURIER_PASSWORD`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use courier_client::{Courier, CourierConfig, LocalKeySigner};
use courier_core::traits::TransferLookup;
use courier_core::types::{CryptoType, Password, TransferRequest, TxHash, WalletType};
use courier_wallet::escrow::{FundingReceipt, PasswordSource, TransferStatus};
use courier_wallet::passphrase::generate_passphrase;
use courier_wallet::WalletError;
use tracing::warn;

const MNEMONIC_ENV: &str = "COURIER_MNEMONIC";
const PASSWORD_ENV: &str = "COURIER_PASSWORD";

/// Email-addressed escrow transfers.
#[derive(Parser)]
#[command(name = "courier")]
#[command(version, about = "Send crypto to anyone with an email address.")]
struct Cli {
    /// Configuration file (TOML). `COURIER_*` variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fund an escrow and notify the recipient.
    Send(SendArgs),
    /// Retry the ledger notification of an already funded escrow.
    Renotify(RenotifyArgs),
    /// Claim a transfer sent to you.
    Accept(AcceptArgs),
    /// Return a pending transfer to its sender.
    Cancel(CancelArgs),
    /// Show transfers and their state.
    Status(StatusArgs),
    /// Estimate the cost of funding an escrow.
    Fee(FeeArgs),
    /// Generate a random word passphrase for a transfer.
    Passphrase(PassphraseArgs),
}

#[derive(Args)]
struct TransferArgs {
    /// Sender email.
    #[arg(long)]
    from: String,

    /// Recipient email.
    #[arg(long)]
    to: String,

    /// Amount in standard units (e.g. 0.5).
    #[arg(short, long)]
    amount: String,

    /// ethereum, bitcoin or dai.
    #[arg(long, default_value = "ethereum")]
    crypto: String,

    /// Funding account index.
    #[arg(long, default_value = "0")]
    account: u32,

    /// Bitcoin fee rate in sat/byte.
    #[arg(long)]
    fee_per_byte: Option<u64>,

    /// Gas price override in wei.
    #[arg(long)]
    gas_price: Option<u128>,
}

#[derive(Args)]
struct SendArgs {
    #[command(flatten)]
    transfer: TransferArgs,
}

#[derive(Args)]
struct RenotifyArgs {
    /// Funding receipt written by a failed `send`.
    receipt: PathBuf,
}

#[derive(Args)]
struct AcceptArgs {
    /// Receiving id from the notification email.
    receiving_id: String,

    /// Address receiving the funds.
    #[arg(long)]
    to: String,

    /// Hash of a payout already broadcast; only records it with the ledger.
    #[arg(long)]
    tx: Option<String>,
}

#[derive(Args)]
struct CancelArgs {
    /// Transfer id returned by `send`.
    transfer_id: String,

    /// Prompt for the password instead of recovering it from the backup.
    #[arg(long)]
    password: bool,

    /// Hash of a refund already broadcast; only records it with the ledger.
    #[arg(long)]
    tx: Option<String>,
}

#[derive(Args)]
struct StatusArgs {
    /// Transfer ids (or receiving ids with --receiving).
    #[arg(required = true)]
    ids: Vec<String>,

    #[arg(long)]
    receiving: bool,
}

#[derive(Args)]
struct FeeArgs {
    #[command(flatten)]
    transfer: TransferArgs,
}

#[derive(Args)]
struct PassphraseArgs {
    #[arg(short, long, default_value = "5")]
    words: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CourierConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    match cli.command {
        Commands::Send(args) => send(&config, args).await,
        Commands::Renotify(args) => renotify(&config, args).await,
        Commands::Accept(args) => accept(&config, args).await,
        Commands::Cancel(args) => cancel(&config, args).await,
        Commands::Status(args) => status(&config, args).await,
        Commands::Fee(args) => fee(&config, args).await,
        Commands::Passphrase(args) => passphrase(args),
    }
}

async fn send(config: &CourierConfig, args: SendArgs) -> Result<()> {
    let courier = connect(config).await?;
    let signer = local_signer(config, &courier)?;
    let password = new_password()?;
    let request = transfer_request(&args.transfer, password)?;

    match courier.wallet.submit_transfer(&signer, &request).await {
        Ok(outcome) => {
            println!("\n=== TRANSFER SENT ===");
            println!("Transfer ID: {}", outcome.transfer_id);
            if let Some(receiving_id) = &outcome.receiving_id {
                println!("Receiving ID: {receiving_id}");
            }
            println!("Escrow: {}", outcome.escrow_address);
            for hash in &outcome.send_tx_hashes {
                println!("Tx: {hash}");
            }
            println!("\nShare the password with {} out of band.", request.destination);
            Ok(())
        }
        Err(WalletError::NotifyFailed { receipt, reason }) => {
            let path = save_receipt(config, &receipt)?;
            warn!(%reason, "escrow funded but ledger notification failed");
            println!("\nFunds are in escrow {}.", receipt.escrow_address);
            println!("Notification failed: {reason}");
            println!("Retry with: courier renotify {}", path.display());
            Err(anyhow::anyhow!("ledger notification failed"))
        }
        Err(e) => {
            let hashes = e.broadcast_hashes();
            if !hashes.is_empty() {
                println!("Broadcast before failure:");
                for hash in &hashes {
                    println!("  {hash}");
                }
            }
            Err(e).context("Transfer failed")
        }
    }
}

async fn renotify(config: &CourierConfig, args: RenotifyArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.receipt)
        .with_context(|| format!("Failed to read receipt: {}", args.receipt.display()))?;
    let receipt: FundingReceipt = serde_json::from_str(&raw).context("Malformed funding receipt")?;

    let courier = connect(config).await?;
    let outcome = courier
        .wallet
        .renotify_send(&receipt)
        .await
        .context("Ledger notification failed again")?;

    std::fs::remove_file(&args.receipt)
        .with_context(|| format!("Failed to remove receipt: {}", args.receipt.display()))?;
    println!("Transfer ID: {}", outcome.transfer_id);
    Ok(())
}

async fn accept(config: &CourierConfig, args: AcceptArgs) -> Result<()> {
    let courier = connect(config).await?;
    if let Some(hash) = args.tx {
        let leg = courier
            .wallet
            .renotify_accept(&args.receiving_id, &TxHash(hash))
            .await
            .context("Ledger notification failed again")?;
        println!("Transfer {} recorded as received.", leg.transfer_id);
        return Ok(());
    }

    let password = prompt_password("Transfer password")?;
    let result = courier
        .wallet
        .accept_transfer(&args.receiving_id, &PasswordSource::Password(password), &args.to)
        .await;
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            let retry = format!("courier accept {} --to {}", args.receiving_id, args.to);
            return Err(payout_failed(e, &retry)).context("Accept failed");
        }
    };

    println!("\n=== TRANSFER ACCEPTED ===");
    println!("Amount: {}", outcome.amount);
    println!("Tx: {}", outcome.tx_hash);
    println!("At: {}", format_timestamp(Some(outcome.timestamp)));
    Ok(())
}

async fn cancel(config: &CourierConfig, args: CancelArgs) -> Result<()> {
    let courier = connect(config).await?;
    if let Some(hash) = args.tx {
        let leg = courier
            .wallet
            .renotify_cancel(&args.transfer_id, &TxHash(hash))
            .await
            .context("Ledger notification failed again")?;
        println!("Transfer {} recorded as cancelled.", leg.transfer_id);
        return Ok(());
    }

    let source = if args.password {
        PasswordSource::Password(prompt_password("Transfer password")?)
    } else {
        PasswordSource::SendingId(args.transfer_id.clone())
    };
    let outcome = match courier.wallet.cancel_transfer(&args.transfer_id, &source).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let retry = format!("courier cancel {}", args.transfer_id);
            return Err(payout_failed(e, &retry)).context("Cancel failed");
        }
    };

    println!("\n=== TRANSFER CANCELLED ===");
    println!("Returned: {}", outcome.amount);
    println!("Tx: {}", outcome.tx_hash);
    Ok(())
}

/// Point at the `--tx` retry when the payout is on chain but unrecorded.
fn payout_failed(e: WalletError, command: &str) -> WalletError {
    if let WalletError::LegNotifyFailed { tx_hash, reason } = &e {
        warn!(%reason, "payout broadcast but ledger notification failed");
        println!("\nPayout broadcast: {tx_hash}");
        println!("Retry with: {}", retry_command(command, tx_hash));
    }
    e
}

fn retry_command(command: &str, tx_hash: &TxHash) -> String {
    format!("{command} --tx {tx_hash}")
}

async fn status(config: &CourierConfig, args: StatusArgs) -> Result<()> {
    let courier = connect(config).await?;
    let lookups: Vec<TransferLookup> = args
        .ids
        .into_iter()
        .map(|id| {
            if args.receiving {
                TransferLookup::ReceivingId(id)
            } else {
                TransferLookup::TransferId(id)
            }
        })
        .collect();
    let transfers = courier
        .wallet
        .get_transfer_history(&lookups)
        .await
        .context("Failed to fetch transfers")?;
    if transfers.is_empty() {
        bail!("No matching transfers");
    }
    print!("{}", status_table(&transfers));
    Ok(())
}

async fn fee(config: &CourierConfig, args: FeeArgs) -> Result<()> {
    let courier = connect(config).await?;
    let signer = local_signer(config, &courier)?;
    // Estimation never touches the password.
    let request = transfer_request(&args.transfer, Password::new("estimate"))?;
    let cost = courier
        .wallet
        .estimate_send_cost(&signer, &request)
        .await
        .context("Fee estimation failed")?;

    let fee_crypto = request.crypto_type.fee_crypto();
    println!("Fee: {} {fee_crypto}", cost.cost_in_standard_unit);
    println!("Price: {}  Units: {}", cost.price, cost.units);
    if cost.approximate {
        println!("(approximate)");
    }
    Ok(())
}

fn passphrase(args: PassphraseArgs) -> Result<()> {
    let words = generate_passphrase(args.words)?;
    println!("{}", words.join(" "));
    Ok(())
}

async fn connect(config: &CourierConfig) -> Result<Courier> {
    let courier = Courier::connect(config).context("Failed to configure clients")?;
    courier
        .verify(config)
        .await
        .context("Ethereum RPC check failed")?;
    Ok(courier)
}

fn local_signer(config: &CourierConfig, courier: &Courier) -> Result<LocalKeySigner> {
    let phrase = match std::env::var(MNEMONIC_ENV) {
        Ok(phrase) => phrase,
        Err(_) => rpassword::prompt_password("Wallet mnemonic: ").context("Failed to read mnemonic")?,
    };
    let network = config.network()?;
    LocalKeySigner::from_mnemonic(phrase.trim(), network, courier.rpc.clone()).context("Invalid mnemonic")
}

fn transfer_request(args: &TransferArgs, password: Password) -> Result<TransferRequest> {
    let crypto: CryptoType = args.crypto.parse().context("Unknown crypto type")?;
    let mut request = TransferRequest::new(
        &args.from,
        &args.to,
        crypto,
        &args.amount,
        password,
        WalletType::Custodial,
    );
    request.account_index = args.account;
    request.tx_fee_per_byte = args.fee_per_byte;
    request.gas_price = args.gas_price;
    Ok(request)
}

/// Prompt for a password securely (no echo), unless set in the environment.
fn prompt_password(prompt: &str) -> Result<Password> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(Password::new(password));
    }
    let password = rpassword::prompt_password(format!("{prompt}: ")).context("Failed to read password")?;
    Ok(Password::new(password))
}

fn new_password() -> Result<Password> {
    if std::env::var(PASSWORD_ENV).is_ok() {
        return prompt_password("Transfer password");
    }
    let password = prompt_password("Transfer password")?;
    let confirm = prompt_password("Confirm password")?;
    if password != confirm {
        bail!("Passwords do not match");
    }
    Ok(password)
}

fn save_receipt(config: &CourierConfig, receipt: &FundingReceipt) -> Result<PathBuf> {
    let dir = config.data_dir.join("receipts");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    let path = receipt_path(&dir, receipt);
    let json = serde_json::to_string_pretty(receipt).context("Failed to encode receipt")?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write receipt: {}", path.display()))?;
    Ok(path)
}

fn receipt_path(dir: &Path, receipt: &FundingReceipt) -> PathBuf {
    dir.join(format!("{}.json", receipt.escrow_address))
}

fn format_timestamp(ts: Option<u64>) -> String {
    ts.and_then(|secs| chrono::DateTime::from_timestamp(i64::try_from(secs).ok()?, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn status_table(transfers: &[TransferStatus]) -> String {
    let mut out = format!(
        "{:<24} {:<10} {:>14} {:<9} {:<24} {:<24}\n",
        "TRANSFER", "STATE", "AMOUNT", "CRYPTO", "SENT", "SETTLED"
    );
    for status in transfers {
        let record = &status.record;
        let settled = record.receive_timestamp.or(record.cancel_timestamp);
        out.push_str(&format!(
            "{:<24} {:<10} {:>14} {:<9} {:<24} {:<24}\n",
            record.transfer_id,
            status.state.to_string(),
            record.transfer_amount,
            record.crypto_type.symbol(),
            format_timestamp(record.send_timestamp),
            format_timestamp(settled),
        ));
    }
    out
}
