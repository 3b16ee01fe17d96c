use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gd_cart::CartService;
use gd_config::{LoadedConfig, UnusedKeyPolicy};
use gd_db::NewItem;
use gd_rye::RyeClient;
use gd_schemas::{NeedKind, NeedRef, Store};
use serde_json::Value;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "gd")]
#[command(about = "Gift drive cart/checkout operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> environment)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Report unused config keys and which secret env vars resolve
    ConfigCheck {
        #[arg(required = true)]
        paths: Vec<String>,

        /// Fail instead of warning when unused keys are present
        #[arg(long, default_value_t = false)]
        strict: bool,
    },

    /// Needed/purchased/remaining for one need
    Need {
        /// drive | child
        #[arg(long)]
        kind: String,

        #[arg(long)]
        id: String,
    },

    /// Donor cart commands (talk to the commerce API)
    Cart {
        #[command(subcommand)]
        cmd: CartCmd,
    },

    /// Recorded orders for a donor
    Orders {
        #[arg(long)]
        donor: String,
    },

    /// Insert a demo organization, drive and needs; prints their ids
    Seed {
        /// Requested quantity for each seeded need
        #[arg(long, default_value_t = 2)]
        quantity: i32,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations
    Migrate,
}

#[derive(Subcommand)]
enum CartCmd {
    /// Remote cart augmented with local metadata
    Show {
        #[arg(long)]
        donor: String,
    },
    /// Mirror vs. remote plus availability; read-only
    Validate {
        #[arg(long)]
        donor: String,
    },
    /// Repair the remote cart from the mirror and clamp unavailable lines
    Reconcile {
        #[arg(long)]
        donor: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = gd_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = gd_db::status(&pool).await?;
                    println!("db_ok={} has_carts_table={}", s.ok, s.has_carts_table);
                }
                DbCmd::Migrate => {
                    gd_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let loaded = load(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::ConfigCheck { paths, strict } => {
            let loaded = load(&paths)?;
            let mode = loaded.settings()?.config_mode()?;
            let policy = if strict {
                UnusedKeyPolicy::Fail
            } else {
                UnusedKeyPolicy::Warn
            };
            let report = gd_config::report_unused_keys(mode, &loaded.config_json, policy)?;
            let secrets = gd_config::resolve_secrets_for_mode(&loaded.config_json, mode)?;
            println!("mode={}", mode.as_str());
            println!("config_hash={}", loaded.config_hash);
            println!("unused_keys={}", report.unused_leaf_pointers.len());
            for k in &report.unused_leaf_pointers {
                println!("unused={k}");
            }
            println!(
                "secret {}={}",
                secrets.rye_api_key_var,
                if secrets.rye_api_key.is_some() { "set" } else { "missing" }
            );
        }

        Commands::Need { kind, id } => {
            let need = parse_need(&kind, &id)?;
            let pool = gd_db::connect_from_env().await?;
            let a = gd_db::need_availability(&pool, need)
                .await?
                .with_context(|| format!("need not found: {need}"))?;
            println!("need={}", a.need);
            println!("requested={}", a.requested);
            println!("purchased={}", a.purchased);
            println!("remaining={}", a.remaining);
        }

        Commands::Cart { cmd } => {
            let svc = cart_service().await?;
            let out: Value = match cmd {
                CartCmd::Show { donor } => serde_json::to_value(svc.get_cart(&donor).await?)?,
                CartCmd::Validate { donor } => {
                    serde_json::to_value(svc.validate_checkout(&donor).await?)?
                }
                CartCmd::Reconcile { donor } => {
                    serde_json::to_value(svc.reconcile_cart(&donor).await?)?
                }
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }

        Commands::Orders { donor } => {
            let pool = gd_db::connect_from_env().await?;
            let orders = gd_db::orders_for_donor(&pool, &donor).await?;
            println!("orders={}", orders.len());
            for o in orders {
                println!(
                    "order_id={} store={} request_id={} remote_cart_id={} created_at_utc={}",
                    o.order_id,
                    o.store_key,
                    o.request_id,
                    o.remote_cart_id,
                    o.created_at_utc.to_rfc3339()
                );
            }
        }

        Commands::Seed { quantity } => {
            let pool = gd_db::connect_from_env().await?;
            gd_db::migrate(&pool).await?;
            let tag = Uuid::new_v4().simple().to_string();
            let org = gd_db::insert_organization(&pool, &format!("Demo org {tag}")).await?;
            let drive = gd_db::insert_drive(&pool, org, "Winter drive", None, None).await?;
            let child = gd_db::insert_child(&pool, drive, "Child A").await?;

            let book = gd_db::insert_item(
                &pool,
                &NewItem {
                    store_key: Store::Amazon.key().to_string(),
                    product_id: format!("B0{}", &tag[..8].to_uppercase()),
                    name: "Picture book".to_string(),
                    image_url: None,
                    price_cents: Some(1299),
                },
            )
            .await?;
            let coat = gd_db::insert_item(
                &pool,
                &NewItem {
                    store_key: Store::shopify("demo-outfitters.myshopify.com").key().to_string(),
                    product_id: format!("V{}", &tag[8..16]),
                    name: "Winter coat".to_string(),
                    image_url: None,
                    price_cents: Some(4999),
                },
            )
            .await?;

            let drive_need = gd_db::insert_drive_item(&pool, drive, book, quantity).await?;
            let child_need = gd_db::insert_child_item(&pool, child, coat, quantity).await?;
            println!("organization_id={org}");
            println!("drive_id={drive}");
            println!("drive_need={drive_need}");
            println!("child_need={child_need}");
        }
    }

    Ok(())
}

fn load(paths: &[String]) -> Result<LoadedConfig> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    gd_config::load_layered_yaml(&path_refs)
}

fn parse_need(kind: &str, id: &str) -> Result<NeedRef> {
    let kind = NeedKind::parse(kind).with_context(|| format!("unknown need kind: {kind}"))?;
    let id = Uuid::parse_str(id).context("invalid need id uuid")?;
    Ok(NeedRef::new(kind, id))
}

/// Cart service against the live commerce API, configured from GIFTDRIVE_CONFIG.
async fn cart_service() -> Result<CartService> {
    let loaded = gd_config::load_from_env()?;
    let settings = loaded.settings()?;
    let mode = settings.config_mode()?;
    let secrets = gd_config::resolve_secrets_for_mode(&loaded.config_json, mode)?;
    let api_key = secrets.rye_api_key.clone().with_context(|| {
        format!(
            "commerce api key missing: set env var '{}'",
            secrets.rye_api_key_var
        )
    })?;
    let rye = RyeClient::new(
        settings.rye.endpoint.clone(),
        api_key,
        settings.rye.shopper_ip.clone(),
        Duration::from_secs(settings.rye.timeout_secs),
    )
    .context("build commerce client")?;
    tracing::debug!(endpoint = %settings.rye.endpoint, mode = mode.as_str(), "commerce client ready");

    let pool = gd_db::connect_from_env().await?;
    Ok(CartService::new(pool, Arc::new(rye), settings.cart))
}
