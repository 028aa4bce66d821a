use std::{fs, path::PathBuf, sync::Arc};

use alloy_primitives::U256;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use zeebu_abi::Interfaces;
use zeebu_ops::{ApprovalRoute, InvoiceOps, OpsConfig, OpsEvent};
use zeebu_rpc::{HttpLedger, LedgerRpc, MockLedger, RpcConfig};
use zeebu_tx::{LocalSigner, Submitter, SubmitterConfig};
use zeebu_types::{parse_address, parse_units, Deployment, Invoice, InvoiceDraft, ZeebuError};

/// Well-known development key used by `--mock` when no key is configured.
const MOCK_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

/// Create, view and pay invoices through the gas-sponsoring relay.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// JSON-RPC endpoint of the ledger.
    #[arg(long, env = "ZEEBU_RPC_URL")]
    rpc_url: Option<String>,

    /// Signer private key (hex string, 0x...).
    #[arg(long, env = "ZEEBU_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Path to a deployment JSON file. Defaults to the Optimism Sepolia addresses.
    #[arg(long, env = "ZEEBU_DEPLOYMENT")]
    deployment: Option<PathBuf>,

    /// Directory of replacement interface descriptions
    /// (InvoiceFactory.json, GasStation.json, ERC20.json, SmartAccount.json).
    #[arg(long)]
    abi_dir: Option<PathBuf>,

    /// Decimals used to scale whole-token amounts.
    #[arg(long, env = "ZEEBU_TOKEN_DECIMALS", default_value_t = 18)]
    token_decimals: u8,

    #[arg(long, env = "ZEEBU_RECEIPT_TIMEOUT_MS", default_value_t = 120_000)]
    receipt_timeout_ms: u64,

    /// Execution ceiling handed to the relay for sponsored calls.
    #[arg(long, default_value_t = 2_000_000)]
    sponsored_gas_limit: u64,

    #[arg(long, value_enum, default_value_t = Route::Sponsored)]
    approval_route: Route,

    /// Run against an in-memory ledger instead of an RPC endpoint.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an invoice and print its id.
    Create {
        #[arg(long)]
        merchant: String,
        #[arg(long)]
        customer: String,
        #[arg(long)]
        name: String,
        /// Cost per unit in whole tokens (e.g. 1.5).
        #[arg(long)]
        cost: String,
        #[arg(long)]
        quantity: u64,
        #[arg(long, default_value_t = 0)]
        tax_bps: u32,
        #[arg(long, default_value_t = 0)]
        discount_bps: u32,
        #[arg(long)]
        gstin: u64,
    },
    /// Pay an invoice through the relay.
    Pay { id: u64 },
    /// Print an invoice.
    View { id: u64 },
    /// Create a sample invoice, view it and pay it.
    Demo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Route {
    Sponsored,
    Direct,
}

impl From<Route> for ApprovalRoute {
    fn from(route: Route) -> Self {
        match route {
            Route::Sponsored => ApprovalRoute::Sponsored,
            Route::Direct => ApprovalRoute::Direct,
        }
    }
}

struct Session {
    ops: InvoiceOps,
    mock: Option<Arc<MockLedger>>,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    if let Err(err) = run(Cli::parse()).await {
        error!(error = %err, "command failed");
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = connect(&cli)?;
    match &cli.command {
        Command::Create {
            merchant,
            customer,
            name,
            cost,
            quantity,
            tax_bps,
            discount_bps,
            gstin,
        } => {
            let draft = InvoiceDraft {
                merchant: parse_address(merchant).map_err(report)?,
                customer: parse_address(customer).map_err(report)?,
                name_of_merchant: name.clone(),
                product_cost_per_unit: parse_units(cost, cli.token_decimals).map_err(report)?,
                quantity: U256::from(*quantity),
                tax_rate_in_bps: *tax_bps,
                discount_in_bps: *discount_bps,
                gstin_of_merchant: U256::from(*gstin),
            };
            let created = ctx.ops.create_invoice(&draft).await.map_err(report)?;
            println!("Created invoice {} in {}", created.invoice_id, created.submission.tx_hash);
        }
        Command::Pay { id } => {
            let result = ctx.ops.pay_invoice(U256::from(*id)).await.map_err(report)?;
            println!("Paid invoice {} in {}", id, result.tx_hash);
        }
        Command::View { id } => {
            let invoice = ctx.ops.view_invoice(U256::from(*id)).await.map_err(report)?;
            print_invoice(&invoice);
        }
        Command::Demo => demo(&ctx).await?,
    }
    Ok(())
}

fn connect(cli: &Cli) -> Result<Session> {
    let deployment = match &cli.deployment {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read deployment file {}", path.display()))?;
            Deployment::from_json(&text).map_err(report)?
        }
        None => Deployment::default(),
    };
    let interfaces = match &cli.abi_dir {
        Some(dir) => Interfaces::load_dir(dir).map_err(report)?,
        None => Interfaces::bundled().map_err(report)?,
    };

    let key = match (&cli.private_key, cli.mock) {
        (Some(key), _) => key.clone(),
        (None, true) => MOCK_KEY.to_string(),
        (None, false) => {
            return Err(anyhow!("missing signer key: provide --private-key or set ZEEBU_PRIVATE_KEY"))
        }
    };
    let signer = LocalSigner::from_hex(&key).map_err(report)?;
    info!(sender = %signer.address(), chain_id = deployment.chain_id, mock = cli.mock, "signer loaded");

    let (ledger, mock): (Arc<dyn LedgerRpc>, Option<Arc<MockLedger>>) = if cli.mock {
        let mock = Arc::new(MockLedger::with_interfaces(
            deployment.clone(),
            interfaces.clone(),
            signer.address(),
        ));
        (mock.clone(), Some(mock))
    } else {
        let url = cli
            .rpc_url
            .as_deref()
            .ok_or_else(|| anyhow!("missing RPC endpoint: provide --rpc-url or set ZEEBU_RPC_URL"))?;
        let http = HttpLedger::new(RpcConfig::new(url))
            .map_err(report)?
            .with_interfaces(interfaces.clone());
        (Arc::new(http), None)
    };

    let submitter = Arc::new(Submitter::new(
        ledger,
        signer,
        SubmitterConfig {
            receipt_timeout_ms: cli.receipt_timeout_ms,
            ..SubmitterConfig::default()
        },
    ));
    let config = OpsConfig {
        sponsored_gas_limit: cli.sponsored_gas_limit,
        approval_route: cli.approval_route.into(),
    };
    let ops = InvoiceOps::new(submitter, deployment, interfaces, config, Some(Box::new(print_event)));
    Ok(Session { ops, mock })
}

async fn demo(ctx: &Session) -> Result<()> {
    let draft = InvoiceDraft {
        merchant: parse_address("0x11e9890626d6cc378d1c9b845b44e6aa77503e46").map_err(report)?,
        customer: parse_address("0x7b1c769030cf2ca442912bea381a51c043a63e43").map_err(report)?,
        name_of_merchant: "Preet".into(),
        product_cost_per_unit: U256::from(1_000_000u64),
        quantity: U256::from(10u64),
        tax_rate_in_bps: 10,
        discount_in_bps: 0,
        gstin_of_merchant: U256::from(123_456_789u64),
    };
    let created = ctx.ops.create_invoice(&draft).await.map_err(report)?;
    let invoice = ctx.ops.view_invoice(created.invoice_id).await.map_err(report)?;
    print_invoice(&invoice);

    // The in-memory ledger starts empty; fund the smart account so it can pay.
    if let Some(mock) = &ctx.mock {
        mock.mint(ctx.ops.deployment().smart_account, invoice.total_amount_including_tax);
    }

    let result = ctx.ops.pay_invoice(created.invoice_id).await.map_err(report)?;
    println!("Paid invoice {} in {}", created.invoice_id, result.tx_hash);
    print_invoice(&ctx.ops.view_invoice(created.invoice_id).await.map_err(report)?);
    Ok(())
}

fn report(err: ZeebuError) -> anyhow::Error {
    anyhow!("{} [{}]", err, err.kind())
}

fn print_event(event: OpsEvent) {
    match event {
        OpsEvent::InvoiceCreated { invoice_id, tx_hash } => {
            println!("  invoice {} created ({})", invoice_id, tx_hash)
        }
        OpsEvent::Started { invoice_id } => println!("  paying invoice {}", invoice_id),
        OpsEvent::ApprovalSubmitted { tx_hash, .. } => println!("  approval submitted: {}", tx_hash),
        OpsEvent::Approved { tx_hash, .. } => println!("  approval confirmed: {}", tx_hash),
        OpsEvent::PayloadBuilt { .. } => println!("  sponsored payload built"),
        OpsEvent::SponsorSubmitted { tx_hash, .. } => println!("  payment submitted: {}", tx_hash),
        OpsEvent::Done { tx_hash, .. } => println!("  payment confirmed: {}", tx_hash),
        OpsEvent::Failed { at, reason, .. } => println!("  failed at {:?}: {}", at, reason),
    }
}

fn print_invoice(invoice: &Invoice) {
    println!("Invoice {}", invoice.id);
    println!("  merchant:  {} ({})", invoice.name_of_merchant, invoice.merchant);
    println!("  customer:  {}", invoice.customer);
    println!("  unit cost: {}", invoice.product_cost_per_unit);
    println!("  quantity:  {}", invoice.quantity);
    println!("  tax bps:   {}", invoice.tax_rate_in_bps);
    println!("  discount:  {}", invoice.discount_in_bps);
    println!("  total:     {}", invoice.total_amount_including_tax);
    println!("  gstin:     {}", invoice.gstin_of_merchant);
    if invoice.is_paid() {
        println!("  paid at {} via {}", invoice.date_of_txn, invoice.paying_mode);
    } else {
        println!("  unpaid");
    }
}
