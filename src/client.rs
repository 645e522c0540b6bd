//! Microsoft Graph client for listing drive folders.

use log::{debug, warn};
use reqwest::header::ACCEPT;
use reqwest::{Client, Response, StatusCode};

use crate::auth::AccessToken;
use crate::config::{Endpoints, Timeouts};
use crate::error::{DriveError, Result};
use crate::models::{
    ApiErrorResponse, ChildFilter, ChildrenPage, DriveItem, FolderRef, RawDriveItem,
};
use crate::url_parser::encode_path;

/// Client for the signed-in user's drive (`/me/drive`).
pub struct DriveClient {
    base_url: String,
    timeouts: Timeouts,
    http: Client,
}

impl DriveClient {
    /// Create a new DriveClient.
    ///
    /// # Arguments
    /// * `endpoints` - Graph base URL (the authority is not used here)
    /// * `timeouts` - Per-request timeout
    pub fn new(endpoints: &Endpoints, timeouts: Timeouts) -> Self {
        Self {
            base_url: endpoints.graph.trim_end_matches('/').to_string(),
            timeouts,
            http: Client::new(),
        }
    }

    /// Create a client against an arbitrary base URL, e.g. a mock server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self::new(&Endpoints::single_host(base_url), Timeouts::default())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a drive path such as `Documents/Germany` to a folder.
    ///
    /// An empty path is the root. Paths that do not exist, or that name a
    /// file, are reported as [`DriveError::NotFound`].
    pub async fn resolve_path_to_id(&self, token: &AccessToken, path: &str) -> Result<FolderRef> {
        let encoded = encode_path(path);
        if encoded.is_empty() {
            return Ok(FolderRef::Root);
        }

        let url = format!("{}/me/drive/root:/{}", self.base_url, encoded);
        let response = self.get(token, &url, &[]).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(DriveError::NotFound(format!("no item at path /{}", path.trim_matches('/'))));
        }
        let response = check_status(response).await?;

        let item: RawDriveItem = response
            .json()
            .await
            .map_err(|e| DriveError::MalformedResponse(e.to_string()))?;

        if !item.is_folder() {
            return Err(DriveError::NotFound(format!(
                "/{} is not a folder",
                path.trim_matches('/')
            )));
        }

        let id = item
            .id
            .ok_or_else(|| DriveError::MalformedResponse("resolved item has no id".to_string()))?;
        debug!("Resolved /{} to {}", path.trim_matches('/'), id);
        FolderRef::id(id)
    }

    /// List the immediate children of a folder.
    ///
    /// Only the first page is read; a next-page link is logged and ignored.
    /// With [`ChildFilter::FoldersOnly`] the filter is sent to the server.
    pub async fn list_children(
        &self,
        token: &AccessToken,
        folder: &FolderRef,
        filter: ChildFilter,
    ) -> Result<Vec<DriveItem>> {
        let url = format!("{}{}", self.base_url, folder.children_path());
        let query: Vec<(&str, &str)> = filter
            .odata_filter()
            .map(|expr| vec![("$filter", expr)])
            .unwrap_or_default();

        let response = check_status(self.get(token, &url, &query).await?).await?;
        let page: ChildrenPage = response
            .json()
            .await
            .map_err(|e| DriveError::MalformedResponse(e.to_string()))?;

        if let Some(next) = &page.next_link {
            warn!(
                "Folder {} has more items than one page; not following {}",
                folder, next
            );
        }

        let items = page.into_items()?;
        Ok(items.into_iter().filter(|item| filter.matches(item)).collect())
    }

    /// Fetch a single folder or file item.
    pub async fn get_item(&self, token: &AccessToken, folder: &FolderRef) -> Result<DriveItem> {
        let url = format!("{}{}", self.base_url, folder.item_path());
        let response = self.get(token, &url, &[]).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(DriveError::NotFound(format!("no item with id {}", folder)));
        }
        let response = check_status(response).await?;

        let raw: RawDriveItem = response
            .json()
            .await
            .map_err(|e| DriveError::MalformedResponse(e.to_string()))?;
        Ok(DriveItem::try_from(raw)?)
    }

    async fn get(&self, token: &AccessToken, url: &str, query: &[(&str, &str)]) -> Result<Response> {
        debug!("GET {}", url);
        let mut request = self
            .http
            .get(url)
            .bearer_auth(token.secret())
            .header(ACCEPT, "application/json")
            .timeout(self.timeouts.http);

        if !query.is_empty() {
            request = request.query(query);
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                DriveError::Timeout(format!("GET {}", url))
            } else {
                DriveError::HttpError(e)
            }
        })
    }
}

/// Map a non-success response to [`DriveError::ApiError`], using the Graph
/// error message when the body carries one.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiErrorResponse>(&error_body) {
        Ok(api_error) if api_error.error.code.is_empty() => api_error.error.message,
        Ok(api_error) => format!("{}: {}", api_error.error.code, api_error.error.message),
        Err(_) => error_body,
    };

    Err(DriveError::ApiError {
        status: status.as_u16(),
        message,
    })
}
