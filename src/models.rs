//! Data models for Microsoft Graph drive and identity responses.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::error::{DriveError, Result};
use crate::url_parser::{encode_segment, extract_item_id};

/// Whether a drive item is a folder or a file, with the facet data for each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    Folder { child_count: Option<u64> },
    File { mime_type: Option<String> },
}

/// A file or folder in the signed-in user's drive.
///
/// Deserializing goes through [`RawDriveItem`], so a payload without `id`/`name`
/// or with other than exactly one of the `folder`/`file` facets is rejected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawDriveItem")]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    pub web_url: Option<String>,
    pub size_bytes: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub modified_by: Option<String>,
    pub parent_id: Option<String>,
    pub kind: ItemKind,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        matches!(self.kind, ItemKind::Folder { .. })
    }

    pub fn child_count(&self) -> Option<u64> {
        match self.kind {
            ItemKind::Folder { child_count } => child_count,
            ItemKind::File { .. } => None,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match &self.kind {
            ItemKind::File { mime_type } => mime_type.as_deref(),
            ItemKind::Folder { .. } => None,
        }
    }

    /// Multi-line description with ownership and timestamps.
    pub fn details(&self) -> String {
        let mut out = format!("{}\n  id:       {}\n", self.name, self.id);
        match &self.kind {
            ItemKind::Folder { child_count } => {
                let count = child_count
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                out.push_str(&format!("  type:     folder ({} children)\n", count));
            }
            ItemKind::File { mime_type } => {
                out.push_str(&format!(
                    "  type:     {}\n",
                    mime_type.as_deref().unwrap_or("file")
                ));
            }
        }
        if let Some(size) = self.size_bytes {
            out.push_str(&format!("  size:     {}\n", format_size(size)));
        }
        out.push_str(&format!(
            "  created:  {} by {}\n",
            format_timestamp(self.created_at.as_ref()),
            self.created_by.as_deref().unwrap_or("-")
        ));
        out.push_str(&format!(
            "  modified: {} by {}\n",
            format_timestamp(self.modified_at.as_ref()),
            self.modified_by.as_deref().unwrap_or("-")
        ));
        if let Some(url) = &self.web_url {
            out.push_str(&format!("  url:      {}\n", url));
        }
        out
    }
}

impl fmt::Display for DriveItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size_str = match self.kind {
            ItemKind::Folder { .. } => "-".to_string(),
            ItemKind::File { .. } => self
                .size_bytes
                .map(format_size)
                .unwrap_or_else(|| "-".to_string()),
        };
        let kind = match &self.kind {
            ItemKind::Folder { child_count: Some(count) } => format!("folder ({})", count),
            ItemKind::Folder { child_count: None } => "folder".to_string(),
            ItemKind::File { mime_type } => mime_type.as_deref().unwrap_or("file").to_string(),
        };
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.id,
            size_str,
            kind,
            format_timestamp(self.modified_at.as_ref()),
            self.name
        )
    }
}

/// Why a raw item could not become a [`DriveItem`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ItemError {
    #[error("drive item is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("drive item `{0}` has neither a folder nor a file facet")]
    NoKind(String),

    #[error("drive item `{0}` has both a folder and a file facet")]
    AmbiguousKind(String),
}

impl From<ItemError> for DriveError {
    fn from(err: ItemError) -> Self {
        DriveError::MalformedResponse(err.to_string())
    }
}

/// Drive item exactly as the API sends it; every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDriveItem {
    pub id: Option<String>,
    pub name: Option<String>,
    pub web_url: Option<String>,
    pub size: Option<u64>,
    pub created_date_time: Option<DateTime<Utc>>,
    pub created_by: Option<IdentitySet>,
    pub last_modified_date_time: Option<DateTime<Utc>>,
    pub last_modified_by: Option<IdentitySet>,
    pub parent_reference: Option<ParentReference>,
    pub folder: Option<FolderFacet>,
    pub file: Option<FileFacet>,
}

impl RawDriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }
}

impl TryFrom<RawDriveItem> for DriveItem {
    type Error = ItemError;

    fn try_from(raw: RawDriveItem) -> std::result::Result<Self, Self::Error> {
        let id = raw.id.ok_or(ItemError::MissingField("id"))?;
        let name = raw.name.ok_or(ItemError::MissingField("name"))?;

        let kind = match (raw.folder, raw.file) {
            (Some(folder), None) => ItemKind::Folder {
                child_count: folder.child_count,
            },
            (None, Some(file)) => ItemKind::File {
                mime_type: file.mime_type,
            },
            (None, None) => return Err(ItemError::NoKind(id)),
            (Some(_), Some(_)) => return Err(ItemError::AmbiguousKind(id)),
        };

        Ok(DriveItem {
            id,
            name,
            web_url: raw.web_url,
            size_bytes: raw.size,
            created_at: raw.created_date_time,
            created_by: raw.created_by.and_then(IdentitySet::into_display_name),
            modified_at: raw.last_modified_date_time,
            modified_by: raw.last_modified_by.and_then(IdentitySet::into_display_name),
            parent_id: raw.parent_reference.and_then(|p| p.id),
            kind,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentitySet {
    pub user: Option<Identity>,
    pub application: Option<Identity>,
    pub device: Option<Identity>,
}

impl IdentitySet {
    /// The most specific display name available, preferring the user.
    pub fn into_display_name(self) -> Option<String> {
        [self.user, self.application, self.device]
            .into_iter()
            .flatten()
            .find_map(|identity| identity.display_name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    pub id: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    pub child_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacet {
    pub mime_type: Option<String>,
}

/// Response from a `.../children` endpoint. Only the first page is read.
#[derive(Debug, Deserialize)]
pub struct ChildrenPage {
    #[serde(default)]
    pub value: Vec<RawDriveItem>,
    #[serde(default, rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

impl ChildrenPage {
    /// Validate every entry, keeping response order.
    pub fn into_items(self) -> std::result::Result<Vec<DriveItem>, ItemError> {
        self.value.into_iter().map(DriveItem::try_from).collect()
    }
}

/// A folder the listing client can address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderRef {
    Root,
    Id(String),
}

impl FolderRef {
    /// Reference a folder by item ID. Empty IDs are rejected.
    pub fn id(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(DriveError::InvalidFolderRef(
                "folder ID must not be empty".to_string(),
            ));
        }
        Ok(FolderRef::Id(trimmed.to_string()))
    }

    /// Parse user input: `root`, a raw item ID, or a OneDrive web URL.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DriveError::InvalidFolderRef(
                "folder reference must not be empty".to_string(),
            ));
        }
        if trimmed.eq_ignore_ascii_case("root") {
            return Ok(FolderRef::Root);
        }
        Self::id(extract_item_id(trimmed)?)
    }

    /// API path of the item itself, relative to the Graph base URL.
    pub fn item_path(&self) -> String {
        match self {
            FolderRef::Root => "/me/drive/root".to_string(),
            FolderRef::Id(id) => format!("/me/drive/items/{}", encode_segment(id)),
        }
    }

    pub fn children_path(&self) -> String {
        format!("{}/children", self.item_path())
    }
}

impl fmt::Display for FolderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FolderRef::Root => write!(f, "root"),
            FolderRef::Id(id) => write!(f, "{}", id),
        }
    }
}

/// Which children to ask the server for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChildFilter {
    #[default]
    All,
    FoldersOnly,
}

impl ChildFilter {
    /// OData `$filter` expression sent to the server, if any.
    pub fn odata_filter(&self) -> Option<&'static str> {
        match self {
            ChildFilter::All => None,
            ChildFilter::FoldersOnly => Some("folder ne null"),
        }
    }

    pub fn matches(&self, item: &DriveItem) -> bool {
        match self {
            ChildFilter::All => true,
            ChildFilter::FoldersOnly => item.is_folder(),
        }
    }
}

/// Graph API error envelope.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub code: String,
    pub message: String,
}

/// OAuth2 token endpoint response. Fields are optional so a payload without
/// `access_token` can be reported instead of failing to parse.
#[derive(Debug, Default, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Format bytes into human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn format_timestamp(ts: Option<&DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
