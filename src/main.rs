//! graph_drive CLI - List OneDrive folders through Microsoft Graph.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};

use graph_drive::config::DEFAULT_TENANT;
use graph_drive::{
    AccessToken, AuthFlow, ChildFilter, ConsoleInteraction, Credentials, DriveClient, DriveItem,
    Endpoints, FolderRef, Timeouts, TokenProvider,
};

/// CLI tool for listing OneDrive folders.
#[derive(Parser)]
#[command(name = "graph_drive")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Read APPLICATION_ID, CLIENT_SECRET, TENANT_ID and SCOPES from this file
    /// instead of the flags below.
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Application (client) ID of the app registration.
    #[arg(long, env = "APPLICATION_ID")]
    client_id: Option<String>,

    /// Client secret; enables the authorization-code flow by default.
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Directory (tenant) ID.
    #[arg(long, env = "TENANT_ID", default_value = DEFAULT_TENANT)]
    tenant_id: String,

    /// Requested scopes (repeat or separate with commas).
    #[arg(long = "scope", env = "SCOPES", value_delimiter = ',')]
    scopes: Vec<String>,

    /// Sign-in flow. Defaults to auth-code with a secret, interactive without.
    #[arg(long, value_enum)]
    flow: Option<FlowArg>,

    /// Redirect URI registered for the auth-code flow.
    #[arg(long)]
    redirect_uri: Option<String>,

    /// Loopback port for the interactive flow.
    #[arg(long, default_value_t = graph_drive::auth::DEFAULT_LOOPBACK_PORT)]
    port: u16,

    /// Print the sign-in URL instead of opening a browser.
    #[arg(long)]
    no_browser: bool,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Seconds to wait for the browser sign-in.
    #[arg(long, default_value_t = 300)]
    login_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum FlowArg {
    AuthCode,
    Interactive,
}

#[derive(Subcommand)]
enum Commands {
    /// List the children of a folder (the root by default).
    List {
        /// Folder ID or OneDrive URL.
        #[arg(long, conflicts_with = "path")]
        id: Option<String>,

        /// Folder path relative to the drive root, e.g. Documents/Germany.
        #[arg(long)]
        path: Option<String>,

        /// Only list folders.
        #[arg(long)]
        folders_only: bool,

        /// Show owners, timestamps and links for each item.
        #[arg(long, short = 'l')]
        long: bool,
    },

    /// Print the folder ID for a drive path.
    Resolve {
        /// Folder path relative to the drive root.
        path: String,
    },

    /// List the root folder, then prompt for a folder ID to list.
    Browse {
        /// Only list folders.
        #[arg(long)]
        folders_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let credentials = load_credentials(&cli)?;
    let flow = select_flow(cli.flow, &credentials);
    let timeouts = Timeouts {
        http: Duration::from_secs(cli.timeout),
        login: Duration::from_secs(cli.login_timeout),
    };

    let mut provider = TokenProvider::new(credentials, ConsoleInteraction::new(!cli.no_browser))
        .with_timeouts(timeouts)
        .with_loopback_port(cli.port);
    if let Some(redirect_uri) = &cli.redirect_uri {
        provider = provider.with_redirect_uri(redirect_uri.clone());
    }

    let token = provider
        .acquire_token(flow, &[])
        .await
        .context("Failed to sign in")?;
    eprintln!("Authentication successful.");

    let client = DriveClient::new(&Endpoints::default(), timeouts);

    match cli.command {
        Commands::List {
            id,
            path,
            folders_only,
            long,
        } => {
            let folder = match (id, path) {
                (Some(id), _) => FolderRef::parse(&id)
                    .with_context(|| format!("Invalid folder ID or URL: {}", id))?,
                (None, Some(path)) => client
                    .resolve_path_to_id(&token, &path)
                    .await
                    .with_context(|| format!("Could not resolve the path '{}'", path))?,
                (None, None) => FolderRef::Root,
            };

            let parent = client
                .get_item(&token, &folder)
                .await
                .with_context(|| format!("Failed to look up folder: {}", folder))?;
            println!("Items in '{}' ({}):", parent.name, parent.id);

            list_folder(&client, &token, &folder, filter(folders_only), long).await?;
        }

        Commands::Resolve { path } => {
            let folder = client
                .resolve_path_to_id(&token, &path)
                .await
                .with_context(|| format!("Could not resolve the path '{}'", path))?;
            println!("{}", folder);
        }

        Commands::Browse { folders_only } => {
            println!("Items in root folder:");
            list_folder(&client, &token, &FolderRef::Root, filter(folders_only), false).await?;

            print!("\nEnter folder ID to list its children (or press Enter to skip): ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            BufReader::new(tokio::io::stdin())
                .read_line(&mut line)
                .await?;

            let input = line.trim();
            if !input.is_empty() {
                let folder = FolderRef::parse(input)
                    .with_context(|| format!("Invalid folder ID or URL: {}", input))?;
                println!("Items in folder {}:", folder);
                list_folder(&client, &token, &folder, filter(folders_only), false).await?;
            }
        }
    }

    Ok(())
}

fn load_credentials(cli: &Cli) -> Result<Credentials> {
    if let Some(path) = &cli.env_file {
        return Credentials::from_env_file(path)
            .with_context(|| format!("Failed to load settings from {:?}", path));
    }

    let client_id = cli
        .client_id
        .as_deref()
        .context("Missing client ID: pass --client-id or set APPLICATION_ID")?;

    let mut credentials =
        Credentials::new(client_id, cli.tenant_id.as_str()).with_scopes(cli.scopes.clone());
    if let Some(secret) = &cli.client_secret {
        credentials = credentials.with_secret(secret.as_str());
    }
    Ok(credentials)
}

fn select_flow(requested: Option<FlowArg>, credentials: &Credentials) -> AuthFlow {
    match requested {
        Some(FlowArg::AuthCode) => AuthFlow::AuthorizationCode,
        Some(FlowArg::Interactive) => AuthFlow::Interactive,
        None if credentials.client_secret().is_some() => AuthFlow::AuthorizationCode,
        None => AuthFlow::Interactive,
    }
}

fn filter(folders_only: bool) -> ChildFilter {
    if folders_only {
        ChildFilter::FoldersOnly
    } else {
        ChildFilter::All
    }
}

async fn list_folder(
    client: &DriveClient,
    token: &AccessToken,
    folder: &FolderRef,
    filter: ChildFilter,
    long: bool,
) -> Result<()> {
    let items = client
        .list_children(token, folder, filter)
        .await
        .with_context(|| format!("Failed to list items in folder: {}", folder))?;

    print_items(&items, long);
    Ok(())
}

fn print_items(items: &[DriveItem], long: bool) {
    if items.is_empty() {
        println!("No items found.");
        return;
    }

    if long {
        for item in items {
            println!("{}", item.details());
        }
    } else {
        println!(
            "{:<36} {:>10} {:<24} {:<16} {}",
            "ID", "SIZE", "TYPE", "MODIFIED", "NAME"
        );
        println!("{}", "-".repeat(100));
        for item in items {
            println!("{}", item);
        }
    }
}
