use std::collections::HashMap;
use std::io::{ErrorKind, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use url::Url;

use crate::error::{ExporterError, Result};
use crate::readiness::Readiness;

pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_REDIRECT_URI: &str = "http://localhost";

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_SKEW_SECONDS: i64 = 60;

pub const WAITING_FOR_CLIENT_SECRET: &str = "Waiting for client secret file";
pub const WAITING_FOR_AUTH_CODE: &str = "Waiting for auth code";

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// OAuth2 client registration as downloaded from the Google API console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    pub fn from_json(content: &str) -> Result<Self> {
        let file: ClientSecretFile = serde_json::from_str(content)
            .map_err(|e| ExporterError::Config(format!("Failed to parse client secret: {}", e)))?;

        file.installed.or(file.web).ok_or_else(|| {
            ExporterError::Config("client secret has neither an 'installed' nor a 'web' section".into())
        })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    pub fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }

    pub fn get_auth_url(&self) -> Result<String> {
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("client_id", self.client_id.clone());
        params.insert("redirect_uri", self.redirect_uri().to_owned());
        params.insert("scope", GMAIL_READONLY_SCOPE.to_owned());
        params.insert("access_type", "offline".to_owned());
        params.insert("prompt", "consent".to_owned());
        params.insert("response_type", "code".to_owned());

        Ok(Url::parse_with_params(&self.auth_uri, params)?.to_string())
    }
}

/// Persisted OAuth2 tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredCredentials {
    /// Missing or unreadable credentials load as `None`, which restarts the
    /// authorization flow.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&content) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) => {
                warn!("Ignoring invalid credentials at {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(path, serde_json::to_string_pretty(self)?).await?;
        secure_token_file(path).await?;
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - chrono::Duration::seconds(EXPIRY_SKEW_SECONDS) <= now,
            None => false,
        }
    }
}

/// Restricts the token file to its owner (0600).
#[cfg(unix)]
async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    /// The error side is the token endpoint's own error text; callers decide
    /// which [`ExporterError`] it becomes.
    fn into_credentials(
        self,
        previous_refresh_token: Option<String>,
    ) -> std::result::Result<StoredCredentials, String> {
        let access_token = match self.access_token {
            Some(access_token) => access_token,
            None => {
                return Err(format!(
                    "{}: {}",
                    self.error.unwrap_or_else(|| "token endpoint returned no access_token".into()),
                    self.error_description.unwrap_or_default()
                ))
            }
        };

        Ok(StoredCredentials {
            access_token,
            refresh_token: self.refresh_token.or(previous_refresh_token),
            expires_at: self
                .expires_in
                .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds)),
        })
    }
}

async fn request_token(http: &reqwest::Client, token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
    let response = http.post(token_uri).form(form).send().await?;
    let body = response.text().await?;

    Ok(serde_json::from_str(&body)?)
}

/// Exchanges an authorization code for tokens.
pub async fn exchange_code(
    http: &reqwest::Client,
    secret: &ClientSecret,
    code: &str,
) -> Result<StoredCredentials> {
    let response = request_token(
        http,
        &secret.token_uri,
        &[
            ("code", code),
            ("client_id", secret.client_id.as_str()),
            ("client_secret", secret.client_secret.as_str()),
            ("redirect_uri", secret.redirect_uri()),
            ("grant_type", "authorization_code"),
        ],
    )
    .await?;

    response.into_credentials(None).map_err(ExporterError::Auth)
}

/// Accepts either a bare authorization code or the full redirect URL.
pub fn extract_code(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    match Url::parse(input) {
        Ok(url) => url
            .query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, code)| code.into_owned()),
        Err(_) => Some(input.to_owned()),
    }
}

/// An authorized session against the Gmail API.
#[derive(Debug)]
pub struct GoogleAuth {
    secret: ClientSecret,
    credentials: StoredCredentials,
    store_path: Option<PathBuf>,
    http: reqwest::Client,
}

impl GoogleAuth {
    pub fn new(secret: ClientSecret, credentials: StoredCredentials, store_path: Option<PathBuf>) -> Self {
        Self {
            secret,
            credentials,
            store_path,
            http: reqwest::Client::new(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.credentials.access_token
    }

    pub fn credentials(&self) -> &StoredCredentials {
        &self.credentials
    }

    /// True when the access token is past its expiry and can be refreshed.
    pub fn is_expired(&self) -> bool {
        self.credentials.refresh_token.is_some() && self.credentials.is_expired(Utc::now())
    }

    pub fn needs_refresh(status: StatusCode) -> bool {
        status == StatusCode::UNAUTHORIZED
    }

    pub async fn do_refresh(&mut self) -> Result<()> {
        info!("Refresh required, refreshing...");

        let refresh_token = self.credentials.refresh_token.clone().ok_or_else(|| {
            ExporterError::TokenRefresh("access token expired and no refresh token is stored".into())
        })?;

        let response = request_token(
            &self.http,
            &self.secret.token_uri,
            &[
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ],
        )
        .await?;

        self.credentials = response
            .into_credentials(Some(refresh_token))
            .map_err(ExporterError::TokenRefresh)?;

        if let Some(store_path) = &self.store_path {
            self.credentials.save(store_path).await?;
        }

        info!("Access token refreshed");
        Ok(())
    }
}

/// Produces an authorized [`GoogleAuth`], blocking (and reporting why through
/// readiness) until the client secret and an authorization are available.
pub struct CredentialProvider {
    client_secret_file: PathBuf,
    credentials_path: PathBuf,
    auth_code_path: PathBuf,
    poll_interval: Duration,
    interactive: bool,
    readiness: Readiness,
    http: reqwest::Client,
}

impl CredentialProvider {
    pub fn new(
        client_secret_file: PathBuf,
        credentials_path: PathBuf,
        auth_code_path: PathBuf,
        readiness: Readiness,
    ) -> Self {
        Self {
            client_secret_file,
            credentials_path,
            auth_code_path,
            poll_interval: Duration::from_secs(10),
            interactive: std::io::stdin().is_terminal(),
            readiness,
            http: reqwest::Client::new(),
        }
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub async fn get_client(&self) -> Result<GoogleAuth> {
        let secret = self.wait_for_client_secret().await?;

        let credentials = match StoredCredentials::load(&self.credentials_path).await? {
            Some(credentials) => credentials,
            None => {
                let credentials = self.run_flow(&secret).await?;
                info!("Storing credentials to {}", self.credentials_path.display());
                credentials.save(&self.credentials_path).await?;
                credentials
            }
        };

        self.readiness.set_ready();

        Ok(GoogleAuth::new(
            secret,
            credentials,
            Some(self.credentials_path.clone()),
        ))
    }

    async fn wait_for_client_secret(&self) -> Result<ClientSecret> {
        loop {
            if tokio::fs::try_exists(&self.client_secret_file).await? {
                return ClientSecret::load(&self.client_secret_file).await;
            }

            self.readiness.set_blocked(WAITING_FOR_CLIENT_SECRET);
            error!(
                "Client secrets file does not exist: {} . You probably need to download this from the Google API console.",
                self.client_secret_file.display()
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn run_flow(&self, secret: &ClientSecret) -> Result<StoredCredentials> {
        info!("Go and authorize at: {}", secret.get_auth_url()?);

        let input = if self.interactive {
            self.read_code_from_stdin().await?
        } else {
            self.wait_for_auth_code_file().await
        };

        let code = extract_code(&input)
            .ok_or_else(|| ExporterError::Auth("no authorization code supplied".into()))?;

        exchange_code(&self.http, secret, &code)
            .await
            .map_err(|e| ExporterError::Auth(format!("Auth failure: {}", e)))
    }

    async fn read_code_from_stdin(&self) -> Result<String> {
        self.readiness.set_blocked(WAITING_FOR_AUTH_CODE);
        info!("Enter code:");

        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        Ok(line)
    }

    async fn wait_for_auth_code_file(&self) -> String {
        info!("Waiting for code at {}", self.auth_code_path.display());

        loop {
            match tokio::fs::read_to_string(&self.auth_code_path).await {
                Ok(content) if !content.trim().is_empty() => return content,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => error!("Failed to read {}: {}", self.auth_code_path.display(), e),
            }

            self.readiness.set_blocked(WAITING_FOR_AUTH_CODE);
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
