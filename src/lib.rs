//! graph_drive - List OneDrive folders through Microsoft Graph.
//!
//! This library provides functionality to:
//! - Sign in with the OAuth2 authorization-code flow or an interactive
//!   browser login (PKCE + loopback redirect)
//! - Resolve a drive path to a folder ID
//! - List the children of the root folder or of a folder by ID
//!
//! # Example
//!
//! ```no_run
//! use graph_drive::{
//!     AuthFlow, ChildFilter, ConsoleInteraction, Credentials, DriveClient, Endpoints,
//!     Timeouts, TokenProvider,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let credentials = Credentials::from_env()?;
//!     let provider = TokenProvider::new(credentials, ConsoleInteraction::default());
//!     let token = provider.acquire_token(AuthFlow::Interactive, &[]).await?;
//!
//!     let client = DriveClient::new(&Endpoints::default(), Timeouts::default());
//!     let folder = client.resolve_path_to_id(&token, "Documents").await?;
//!     for item in client.list_children(&token, &folder, ChildFilter::All).await? {
//!         println!("{}", item);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod url_parser;

// Re-exports for convenience
pub use auth::{AccessToken, AuthFlow, AuthRedirect, ConsoleInteraction, TokenProvider, UserInteraction};
pub use client::DriveClient;
pub use config::{Credentials, Endpoints, Timeouts};
pub use error::{DriveError, Result};
pub use models::{ChildFilter, DriveItem, FolderRef, ItemKind};
pub use url_parser::{extract_auth_code, extract_item_id};
