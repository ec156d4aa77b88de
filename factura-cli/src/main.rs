use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use factura_core::access_key::{compute_access_key, AccessKey, DocumentType};
use factura_core::audit::AuditContext;
use factura_core::cipher::CustomerFields;
use factura_core::config::{Config, EmissionType, EnvironmentType};
use factura_core::customer::{CustomerService, CustomerUpdate, IdentificationType, NewCustomer};
use factura_core::invoice::LineItemInput;
use factura_core::issuance::{IssuanceService, IssueRequest};
use factura_core::keys::KeyMaterialManager;
use factura_core::numbering::{InvoiceNumber, Series};
use factura_core::store::JsonFileStore;
use factura_core::verify::{VerificationResult, VerificationService};
use factura_core::EngineContext;
use rust_decimal::Decimal;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "factura")]
#[command(about = "Invoice signing, verification and customer records")]
struct Cli {
    /// JSON store file.
    #[arg(long, global = true, env = "FACTURA_STORE", default_value = "factura-store.json")]
    store: PathBuf,

    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Signing key management.
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
    },
    /// Customer records. Needs FACTURA_MASTER_KEY.
    Customer {
        #[command(subcommand)]
        command: CustomerCommand,
    },
    /// Issue and sign an invoice. Needs FACTURA_MASTER_KEY.
    Issue {
        #[arg(long)]
        customer: u64,
        /// `code:description:quantity:unit_price[:tax_rate]`; an empty code is generated.
        #[arg(long = "item", required = true)]
        items: Vec<String>,
        /// Series as `EEE-PPP`; defaults to the configured one.
        #[arg(long)]
        series: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Verify an issued invoice by its digest.
    Verify { digest: String },
    /// Access key tools.
    AccessKey {
        #[command(subcommand)]
        command: AccessKeyCommand,
    },
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Create the signing key pair if missing and print the public key.
    Init,
}

#[derive(Subcommand)]
enum CustomerCommand {
    Add(AddCustomer),
    Show {
        id: u64,
    },
    Update(UpdateCustomer),
    Delete {
        id: u64,
    },
}

#[derive(Args)]
struct AddCustomer {
    /// cedula, ruc, pasaporte or consumidor_final (or the 04-07 codes).
    #[arg(long, default_value = "cedula")]
    id_type: String,
    #[arg(long)]
    identification: String,
    #[arg(long)]
    legal_name: Option<String>,
    #[arg(long)]
    given_names: String,
    #[arg(long)]
    family_names: String,
    #[arg(long, default_value = "")]
    address: String,
    #[arg(long, default_value = "")]
    phone: String,
    #[arg(long, default_value = "")]
    email: String,
}

#[derive(Args)]
struct UpdateCustomer {
    id: u64,
    #[arg(long)]
    given_names: Option<String>,
    #[arg(long)]
    family_names: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    legal_name: Option<String>,
    #[arg(long)]
    active: Option<bool>,
}

#[derive(Subcommand)]
enum AccessKeyCommand {
    /// Validate a 49-digit access key and print its segments.
    Check { key: String },
    /// Compute an access key with a fresh random code.
    New {
        /// Issue date, `dd/mm/yyyy` or `yyyy-mm-dd`.
        #[arg(long)]
        date: String,
        /// Invoice number, `EEE-PPP-SSSSSSSSS`.
        #[arg(long)]
        serial: String,
        /// Defaults to FACTURA_ISSUER_TAX_ID or the built-in issuer.
        #[arg(long)]
        tax_id: Option<String>,
        #[arg(long, default_value = "testing")]
        environment: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Keys {
            command: KeysCommand::Init,
        } => {
            let store = open_store(&cli.store)?;
            let keys = KeyMaterialManager::new(&store).ensure_key_material()?;
            print!("{}", keys.public_key_pem()?);
        }
        Commands::Customer { command } => {
            let store = open_store(&cli.store)?;
            let context = bootstrap(&store)?;
            run_customer(command, &context, &store)?;
        }
        Commands::Issue {
            customer,
            items,
            series,
            notes,
        } => {
            let store = open_store(&cli.store)?;
            let context = bootstrap(&store)?;
            let request = IssueRequest {
                customer_id: customer,
                series: series.as_deref().map(parse_series).transpose()?,
                items: items
                    .iter()
                    .map(String::as_str)
                    .map(parse_item)
                    .collect::<Result<Vec<_>>>()?,
                notes,
            };
            let record = IssuanceService::new(&context, &store).issue(&request, &cli_audit())?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Verify { digest } => {
            let store = open_store(&cli.store)?;
            let Some(keys) = KeyMaterialManager::new(&store).load()? else {
                bail!("store {} has no signing key material", cli.store.display());
            };
            let result = VerificationService::new(&store, keys.public_key()).verify(&digest)?;
            println!("{}", result.as_str());
            if let VerificationResult::Valid(summary) = &result {
                println!("{}", serde_json::to_string_pretty(summary)?);
            }
        }
        Commands::AccessKey { command } => run_access_key(command)?,
    }

    Ok(())
}

fn open_store(path: &Path) -> Result<JsonFileStore> {
    JsonFileStore::open(path).with_context(|| format!("failed to open store {}", path.display()))
}

fn bootstrap(store: &JsonFileStore) -> Result<EngineContext> {
    let config = Config::from_env().context("invalid FACTURA_* configuration")?;
    Ok(EngineContext::bootstrap(config, store)?)
}

fn cli_audit() -> AuditContext {
    AuditContext::new(None, "cli").with_user_agent(concat!("factura/", env!("CARGO_PKG_VERSION")))
}

fn run_customer(
    command: CustomerCommand,
    context: &EngineContext,
    store: &JsonFileStore,
) -> Result<()> {
    let service = CustomerService::new(context, store);
    match command {
        CustomerCommand::Add(args) => {
            let customer = NewCustomer::new(
                IdentificationType::from_str(&args.id_type)?,
                args.identification,
                args.legal_name,
                args.given_names,
                args.family_names,
                args.address,
                args.phone,
                args.email,
            )?;
            let record = service.create(customer, &cli_audit())?;
            println!("{}", serde_json::to_string_pretty(&json!({ "id": record.id }))?);
        }
        CustomerCommand::Show { id } => {
            let record = service.customer(id)?;
            let fields = service.fields(id)?;
            println!("{}", serde_json::to_string_pretty(&customer_view(&record, &fields))?);
        }
        CustomerCommand::Update(args) => {
            let update = CustomerUpdate {
                given_names: args.given_names,
                family_names: args.family_names,
                address: args.address,
                phone: args.phone,
                email: args.email,
                legal_name: args.legal_name,
                active: args.active,
            };
            let record = service.update(args.id, update, &cli_audit())?;
            let fields = service.fields(record.id)?;
            println!("{}", serde_json::to_string_pretty(&customer_view(&record, &fields))?);
        }
        CustomerCommand::Delete { id } => {
            service.delete(id, &cli_audit())?;
            println!("deleted customer {id}");
        }
    }
    Ok(())
}

fn customer_view(
    record: &factura_core::customer::CustomerRecord,
    fields: &CustomerFields,
) -> serde_json::Value {
    json!({
        "id": record.id,
        "identification_type": record.identification_type,
        "identification": record.identification,
        "display_name": record.display_name(fields),
        "given_names": fields.given_names,
        "family_names": fields.family_names,
        "address": fields.address,
        "phone": fields.phone,
        "email": fields.email,
        "active": record.active,
    })
}

fn run_access_key(command: AccessKeyCommand) -> Result<()> {
    match command {
        AccessKeyCommand::Check { key } => {
            let key = AccessKey::parse(key.trim())?;
            let view = json!({
                "access_key": key.as_str(),
                "issue_date": key.issue_date()?.format("%d/%m/%Y").to_string(),
                "document_type": key.document_type()?.code(),
                "tax_id": key.tax_id(),
                "environment": key.environment()?.as_str(),
                "series": key.series()?.to_string(),
                "sequence": key.serial(),
                "random_code": key.random_code(),
                "check_digit": key.check_digit(),
            });
            println!("VALID");
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        AccessKeyCommand::New {
            date,
            serial,
            tax_id,
            environment,
        } => {
            let date = parse_date(&date)?;
            let number = InvoiceNumber::from_str(serial.trim())?;
            let tax_id = tax_id
                .or_else(|| std::env::var("FACTURA_ISSUER_TAX_ID").ok())
                .unwrap_or_else(|| Config::default().issuer().tax_id().to_string());
            let key = compute_access_key(
                date,
                DocumentType::Invoice,
                &tax_id,
                EnvironmentType::from_str(&environment)?,
                &number,
                EmissionType::Normal,
            )?;
            println!("{key}");
        }
    }
    Ok(())
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| anyhow!("invalid date '{raw}': expected dd/mm/yyyy or yyyy-mm-dd"))
}

fn parse_series(raw: &str) -> Result<Series> {
    let Some((establishment, point_of_sale)) = raw.trim().split_once('-') else {
        bail!("invalid series '{raw}': expected EEE-PPP");
    };
    Ok(Series::new(establishment, point_of_sale)?)
}

fn parse_item(raw: &str) -> Result<LineItemInput> {
    let parts: Vec<&str> = raw.split(':').collect();
    if !(4..=5).contains(&parts.len()) {
        bail!("invalid item '{raw}': expected code:description:quantity:unit_price[:tax_rate]");
    }
    let decimal = |label: &str, value: &str| {
        Decimal::from_str(value.trim())
            .with_context(|| format!("invalid {label} '{value}' in item '{raw}'"))
    };
    let mut item = LineItemInput::new(
        parts[1],
        decimal("quantity", parts[2])?,
        decimal("unit price", parts[3])?,
    );
    if !parts[0].trim().is_empty() {
        item = item.with_code(parts[0]);
    }
    if let Some(rate) = parts.get(4) {
        item = item.with_tax_rate(decimal("tax rate", rate)?);
    }
    Ok(item)
}
