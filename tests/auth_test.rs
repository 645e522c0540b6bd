//! Tests for TokenProvider with a mocked identity provider.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use graph_drive::error::{DriveError, Result};
use graph_drive::{
    AuthFlow, AuthRedirect, ConsoleInteraction, Credentials, Endpoints, Timeouts, TokenProvider,
    UserInteraction,
};
use mockito::{Matcher, Server};
use serde_json::json;
use url::Url;

/// Returns canned answers and records the authorization URL it was shown.
#[derive(Clone, Default)]
struct CannedInteraction {
    pasted: String,
    redirect_state: Option<String>,
    echo_state: bool,
    paste_redirect_url: bool,
    seen_url: Arc<Mutex<Option<Url>>>,
}

impl CannedInteraction {
    fn pasting(text: &str) -> Self {
        Self {
            pasted: text.to_string(),
            ..Default::default()
        }
    }

    /// Pastes the full redirect URL, echoing the state from the authorization URL.
    fn pasting_redirect_url(code: &str) -> Self {
        Self {
            pasted: code.to_string(),
            paste_redirect_url: true,
            ..Default::default()
        }
    }

    fn redirecting(code: &str) -> Self {
        Self {
            pasted: code.to_string(),
            echo_state: true,
            ..Default::default()
        }
    }

    fn redirecting_with_state(code: &str, state: &str) -> Self {
        Self {
            pasted: code.to_string(),
            redirect_state: Some(state.to_string()),
            ..Default::default()
        }
    }

    fn seen_url(&self) -> Url {
        self.seen_url
            .lock()
            .unwrap()
            .clone()
            .expect("interaction was not called")
    }
}

#[async_trait]
impl UserInteraction for CannedInteraction {
    async fn prompt_for_code(&self, authorize_url: &Url) -> Result<String> {
        *self.seen_url.lock().unwrap() = Some(authorize_url.clone());
        if self.paste_redirect_url {
            let state = query_param(authorize_url, "state").unwrap_or_default();
            return Ok(format!(
                "http://localhost:8080/redirect?code={}&state={}",
                self.pasted, state
            ));
        }
        Ok(self.pasted.clone())
    }

    async fn await_redirect(&self, authorize_url: &Url, _port: u16) -> Result<AuthRedirect> {
        *self.seen_url.lock().unwrap() = Some(authorize_url.clone());
        let state = if self.echo_state {
            query_param(authorize_url, "state")
        } else {
            self.redirect_state.clone()
        };
        Ok(AuthRedirect {
            code: self.pasted.clone(),
            state,
        })
    }
}

/// Never completes within the test's login timeout.
struct StalledInteraction;

#[async_trait]
impl UserInteraction for StalledInteraction {
    async fn prompt_for_code(&self, _: &Url) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok("late".to_string())
    }

    async fn await_redirect(&self, _: &Url, _: u16) -> Result<AuthRedirect> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Err(DriveError::AuthError("late".to_string()))
    }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn confidential() -> Credentials {
    Credentials::new("app-id", "tenant-1")
        .with_secret("s3cret")
        .with_scopes(["Files.ReadWrite.All", "User.Read"])
}

fn provider(server: &Server, credentials: Credentials, interaction: impl UserInteraction + 'static) -> TokenProvider {
    TokenProvider::new(credentials, interaction).with_endpoints(Endpoints::single_host(server.url()))
}

const TOKEN_PATH: &str = "/tenant-1/oauth2/v2.0/token";

/// A server that accepts connections and never answers.
async fn silent_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    format!("http://{}", addr)
}

mod authorization_code {
    use super::*;

    #[tokio::test]
    async fn exchanges_pasted_code_for_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("client_id".into(), "app-id".into()),
                Matcher::UrlEncoded("client_secret".into(), "s3cret".into()),
                Matcher::UrlEncoded("code".into(), "the-code".into()),
                Matcher::UrlEncoded("scope".into(), "Files.ReadWrite.All User.Read".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"token_type": "Bearer", "access_token": "eyJ-access", "expires_in": 3599})
                    .to_string(),
            )
            .create_async()
            .await;

        let interaction = CannedInteraction::pasting("the-code");
        let provider = provider(&server, confidential(), interaction.clone());
        let token = provider
            .acquire_token(AuthFlow::AuthorizationCode, &[])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(token.secret(), "eyJ-access");
        assert!(token.expires_at().is_some());
        assert!(!token.is_expired());

        let url = interaction.seen_url();
        assert_eq!(url.path(), "/tenant-1/oauth2/v2.0/authorize");
        assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(query_param(&url, "code_challenge"), None);
    }

    #[tokio::test]
    async fn accepts_pasted_redirect_url() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::UrlEncoded("code".into(), "from-url".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": "tok"}).to_string())
            .create_async()
            .await;

        let interaction = CannedInteraction::pasting_redirect_url("from-url");
        let token = provider(&server, confidential(), interaction)
            .acquire_token(AuthFlow::AuthorizationCode, &[])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(token.secret(), "tok");
        assert_eq!(token.expires_at(), None);
    }

    #[tokio::test]
    async fn payload_without_access_token_is_auth_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"token_type": "Bearer", "expires_in": 3599}).to_string())
            .create_async()
            .await;

        let err = provider(&server, confidential(), CannedInteraction::pasting("code"))
            .acquire_token(AuthFlow::AuthorizationCode, &[])
            .await
            .unwrap_err();

        assert!(matches!(err, DriveError::AuthError(msg) if msg.contains("access token")));
    }

    #[tokio::test]
    async fn huge_expires_in_leaves_expiry_unset() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": "tok", "expires_in": 10_000_000_000_000u64}).to_string())
            .create_async()
            .await;

        let token = provider(&server, confidential(), CannedInteraction::pasting("code"))
            .acquire_token(AuthFlow::AuthorizationCode, &[])
            .await
            .unwrap();

        assert_eq!(token.secret(), "tok");
        assert_eq!(token.expires_at(), None);
    }

    #[tokio::test]
    async fn pasted_redirect_with_foreign_state_is_auth_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .expect(0)
            .create_async()
            .await;

        let interaction =
            CannedInteraction::pasting("http://localhost:8080/redirect?code=c&state=forged");
        let err = provider(&server, confidential(), interaction)
            .acquire_token(AuthFlow::AuthorizationCode, &[])
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, DriveError::AuthError(msg) if msg.contains("state")));
    }

    #[tokio::test]
    async fn slow_token_endpoint_times_out() {
        let base = silent_server().await;
        let timeouts = Timeouts {
            http: Duration::from_millis(200),
            login: Duration::from_secs(5),
        };

        let err = TokenProvider::new(confidential(), CannedInteraction::pasting("code"))
            .with_endpoints(Endpoints::single_host(base))
            .with_timeouts(timeouts)
            .acquire_token(AuthFlow::AuthorizationCode, &[])
            .await
            .unwrap_err();

        assert!(matches!(err, DriveError::Timeout(_)));
    }

    #[tokio::test]
    async fn empty_access_token_is_auth_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": ""}).to_string())
            .create_async()
            .await;

        let err = provider(&server, confidential(), CannedInteraction::pasting("code"))
            .acquire_token(AuthFlow::AuthorizationCode, &[])
            .await
            .unwrap_err();

        assert!(matches!(err, DriveError::AuthError(_)));
    }

    #[tokio::test]
    async fn identity_error_is_auth_error_with_description() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "error": "invalid_grant",
                    "error_description": "AADSTS70000: The provided authorization code is expired."
                })
                .to_string(),
            )
            .create_async()
            .await;

        let err = provider(&server, confidential(), CannedInteraction::pasting("old"))
            .acquire_token(AuthFlow::AuthorizationCode, &[])
            .await
            .unwrap_err();

        match err {
            DriveError::AuthError(msg) => {
                assert!(msg.contains("invalid_grant"));
                assert!(msg.contains("expired"));
            }
            other => panic!("expected AuthError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_paste_never_reaches_token_endpoint() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .expect(0)
            .create_async()
            .await;

        let err = provider(&server, confidential(), CannedInteraction::pasting("   "))
            .acquire_token(AuthFlow::AuthorizationCode, &[])
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, DriveError::AuthError(_)));
    }
}

mod interactive {
    use super::*;

    #[tokio::test]
    async fn exchanges_redirect_code_with_pkce_verifier() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("code".into(), "browser-code".into()),
                Matcher::UrlEncoded("redirect_uri".into(), "http://127.0.0.1:8765".into()),
                Matcher::Regex("code_verifier=[A-Za-z0-9_-]{43}".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": "interactive-token", "expires_in": 60}).to_string())
            .create_async()
            .await;

        let interaction = CannedInteraction::redirecting("browser-code");
        let credentials = Credentials::new("public-app", "tenant-1");
        let token = provider(&server, credentials, interaction.clone())
            .with_loopback_port(8765)
            .acquire_token(AuthFlow::Interactive, &["Files.Read.All".to_string()])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(token.secret(), "interactive-token");

        let url = interaction.seen_url();
        assert_eq!(query_param(&url, "code_challenge_method").as_deref(), Some("S256"));
        assert_eq!(query_param(&url, "scope").as_deref(), Some("Files.Read.All"));
        assert_eq!(query_param(&url, "client_id").as_deref(), Some("public-app"));
        assert_eq!(
            query_param(&url, "redirect_uri").as_deref(),
            Some("http://127.0.0.1:8765")
        );
    }

    #[tokio::test]
    async fn state_mismatch_is_auth_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .expect(0)
            .create_async()
            .await;

        let interaction = CannedInteraction::redirecting_with_state("code", "forged");
        let err = provider(&server, Credentials::new("app", "tenant-1"), interaction)
            .acquire_token(AuthFlow::Interactive, &[])
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, DriveError::AuthError(msg) if msg.contains("state")));
    }

    #[tokio::test]
    async fn stalled_login_times_out() {
        let server = Server::new_async().await;
        let timeouts = Timeouts {
            http: Duration::from_secs(5),
            login: Duration::from_millis(50),
        };

        let err = provider(&server, Credentials::new("app", "tenant-1"), StalledInteraction)
            .with_timeouts(timeouts)
            .acquire_token(AuthFlow::Interactive, &[])
            .await
            .unwrap_err();

        assert!(matches!(err, DriveError::Timeout(_)));
    }
}

mod console_interaction {
    use super::*;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    async fn get_with_retry(url: &str) -> reqwest::Response {
        for _ in 0..50 {
            match reqwest::get(url).await {
                Ok(response) => return response,
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        panic!("loopback listener never came up on {}", url);
    }

    #[tokio::test]
    async fn receives_loopback_redirect() {
        let port = free_port();
        let interaction = ConsoleInteraction::new(false);
        let authorize = Url::parse("https://login.example/authorize").unwrap();
        let waiter =
            tokio::spawn(async move { interaction.await_redirect(&authorize, port).await });

        let response =
            get_with_retry(&format!("http://127.0.0.1:{}/?code=abc123&state=xyz", port)).await;
        assert_eq!(response.status(), 200);

        let redirect = waiter.await.unwrap().unwrap();
        assert_eq!(
            redirect,
            AuthRedirect {
                code: "abc123".to_string(),
                state: Some("xyz".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn error_redirect_is_auth_error() {
        let port = free_port();
        let interaction = ConsoleInteraction::new(false);
        let authorize = Url::parse("https://login.example/authorize").unwrap();
        let waiter =
            tokio::spawn(async move { interaction.await_redirect(&authorize, port).await });

        get_with_retry(&format!(
            "http://127.0.0.1:{}/?error=access_denied&error_description=cancelled",
            port
        ))
        .await;

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, DriveError::AuthError(msg) if msg.contains("access_denied")));
    }
}
