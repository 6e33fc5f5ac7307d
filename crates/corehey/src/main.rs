//! `CoreHey` CLI - fetch quick replies and typifications through the native core.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use corehey::config::ResolverSettings;
use corehey::{
    CallConvention, ConfigBuilder, CoreHey, CredentialResolver, LibraryLoader, Platform,
    PlatformResolver,
};

/// `CoreHey` CLI - Key Vault backed calls into the `CoreHey` native library.
#[derive(Parser)]
#[command(name = "corehey")]
#[command(about = "Resolve Key Vault credentials and call the CoreHey native library")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Directory holding the native library
    #[arg(long, global = true, env = "COREHEY_LIBRARY_DIR")]
    library_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
pub struct CallArgs {
    /// Organisation identifier
    #[arg(long)]
    org: String,

    /// Group identifier
    #[arg(long)]
    group: String,

    /// Key Vault URL; skips CLI delegation
    #[arg(long)]
    vault_url: Option<String>,

    /// User-assigned managed identity client id
    #[arg(long)]
    client_id: Option<String>,

    /// Pass this token directly instead of resolving one
    #[arg(long, conflicts_with_all = ["vault_url", "client_id", "native_vault"])]
    token: Option<String>,

    /// Let the native library read the vault itself
    #[arg(long)]
    native_vault: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch quick replies for an organisation group
    QuickReplies(CallArgs),

    /// Fetch the typification for an organisation group
    Typification(CallArgs),

    /// Resolve Key Vault secrets and report which tier succeeded
    Resolve {
        /// Key Vault URL; skips CLI delegation
        #[arg(long)]
        vault_url: Option<String>,

        /// User-assigned managed identity client id
        #[arg(long)]
        client_id: Option<String>,
    },

    /// Show the native artifact expected on this host
    Platform,

    /// Call the native math helpers
    Math {
        #[command(subcommand)]
        op: MathOp,
    },
}

#[derive(Subcommand)]
pub enum MathOp {
    /// Add two integers
    Add { a: i32, b: i32 },
    /// Multiply two integers
    Multiply { a: i32, b: i32 },
    /// Nth Fibonacci number
    Fibonacci { n: i32 },
    /// Primality check
    IsPrime { n: i32 },
}

#[derive(Clone, Copy)]
enum Export {
    QuickReplies,
    Typification,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("corehey=debug,info")
    } else {
        EnvFilter::new("corehey=info,warn")
    };

    tracing_subscriber::registry()
        .with(cli.log_json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!cli.log_json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .with(filter)
        .init();

    match cli.command {
        Commands::QuickReplies(args) => {
            let corehey = build(cli.library_dir, args.native_vault)?;
            call(&corehey, Export::QuickReplies, args).await
        }
        Commands::Typification(args) => {
            let corehey = build(cli.library_dir, args.native_vault)?;
            call(&corehey, Export::Typification, args).await
        }
        Commands::Resolve {
            vault_url,
            client_id,
        } => {
            let corehey = build(cli.library_dir, false)?;
            let mut builder = ConfigBuilder::new();
            if let Some(url) = vault_url {
                builder = builder.vault_url(url);
            }
            if let Some(id) = client_id {
                builder = builder.client_id(id);
            }
            let config = builder.build();

            let resolution = corehey
                .resolve_secrets(&config)
                .await
                .context("Credential resolution failed")?;
            println!("tier:  {}", resolution.tier);
            println!("vault: {}", config.effective_vault_url());
            Ok(())
        }
        Commands::Platform => {
            let platform = Platform::current()?;
            println!("platform:  {platform}");
            println!("artifact:  {}", platform.artifact_file_name());
            println!("candidates:");
            for name in platform.candidate_file_names() {
                println!("  {name}");
            }
            if let Some(var) = platform.os.search_path_var() {
                println!("search path variable: {var}");
            }
            Ok(())
        }
        Commands::Math { op } => {
            let corehey = build(cli.library_dir, false)?;
            match op {
                MathOp::Add { a, b } => println!("{}", corehey.add_numbers(a, b)?),
                MathOp::Multiply { a, b } => println!("{}", corehey.multiply_numbers(a, b)?),
                MathOp::Fibonacci { n } => println!("{}", corehey.get_fibonacci(n)?),
                MathOp::IsPrime { n } => println!("{}", corehey.is_prime(n)?),
            }
            Ok(())
        }
    }
}

fn build(library_dir: Option<PathBuf>, native_vault: bool) -> Result<CoreHey> {
    let loader = match library_dir {
        Some(dir) => {
            debug!(dir = %dir.display(), "Using library directory from command line");
            LibraryLoader::new(PlatformResolver::for_host(dir)?)
        }
        None => LibraryLoader::from_env()?,
    };
    let resolver = CredentialResolver::new(&ResolverSettings::default())?;

    let convention = if native_vault {
        CallConvention::NativeVault
    } else {
        CallConvention::Hybrid
    };
    Ok(CoreHey::new(Arc::new(loader), resolver).with_convention(convention))
}

async fn call(corehey: &CoreHey, export: Export, args: CallArgs) -> Result<()> {
    let CallArgs {
        org,
        group,
        vault_url,
        client_id,
        token,
        ..
    } = args;

    let payload = match (export, token) {
        (Export::QuickReplies, Some(token)) => {
            corehey.get_quick_replies_with_token(&token, &org, &group).await?
        }
        (Export::Typification, Some(token)) => {
            corehey.get_typification_with_token(&token, &org, &group).await?
        }
        (Export::QuickReplies, None) => {
            corehey
                .get_quick_replies_simple(&org, &group, vault_url.as_deref(), client_id.as_deref())
                .await?
        }
        (Export::Typification, None) => {
            corehey
                .get_typification_simple(&org, &group, vault_url.as_deref(), client_id.as_deref())
                .await?
        }
    };

    println!("{payload}");
    Ok(())
}
