//! Refresh-token storage and Azure AD B2C token refresh.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::info;
use wattsync_core::SyncError;

use crate::cli::AuthArgs;

/// Plain-text file holding the current refresh token.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn display_path(&self) -> String {
        fs::canonicalize(&self.path)
            .unwrap_or_else(|_| self.path.clone())
            .display()
            .to_string()
    }

    /// Read the token, trimming surrounding whitespace.
    pub fn read(&self) -> Result<String> {
        if !self.path.exists() {
            bail!(
                "Refresh token file not found: {}\n\
                 Create this file and write your metering service refresh token to it.",
                self.display_path()
            );
        }

        let token = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read refresh token file: {}", self.display_path()))?;
        let token = token.trim();
        if token.is_empty() {
            bail!(
                "Refresh token file is empty: {}\n\
                 Write your metering service refresh token to this file.",
                self.display_path()
            );
        }

        Ok(token.to_string())
    }

    pub fn save(&self, token: &str) -> Result<()> {
        fs::write(&self.path, token)
            .with_context(|| format!("Failed to write refresh token file: {}", self.display_path()))?;
        info!(path = %self.display_path(), "Saved refreshed token");
        Ok(())
    }
}

/// Azure AD B2C application settings.
#[derive(Debug, Clone)]
pub struct B2cClient {
    pub tenant: String,
    pub client_id: String,
    pub policy: String,
    pub scope: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

impl B2cClient {
    pub fn from_args(args: &AuthArgs) -> Self {
        Self {
            tenant: args.b2c_tenant.clone(),
            client_id: args.b2c_client_id.clone(),
            policy: args.b2c_policy.clone(),
            scope: args.b2c_scope.clone(),
        }
    }

    /// `https://{name}.b2clogin.com/{tenant}/{policy}/oauth2/v2.0/token`
    pub fn token_endpoint(&self) -> String {
        let name = self.tenant.split('.').next().unwrap_or(&self.tenant);
        format!(
            "https://{}.b2clogin.com/{}/{}/oauth2/v2.0/token",
            name, self.tenant, self.policy
        )
    }

    /// Exchange a refresh token for a fresh token set.
    pub async fn refresh(
        &self,
        http: &reqwest::Client,
        refresh_token: &str,
    ) -> wattsync_core::Result<TokenSet> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("scope", self.scope.as_str()),
        ];

        let response = http
            .post(self.token_endpoint())
            .form(&form)
            .send()
            .await
            .map_err(|e| SyncError::upstream("auth", None, format!("Token request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            SyncError::upstream("auth", None, format!("Token response read failed: {}", e))
        })?;

        if !status.is_success() {
            return Err(SyncError::upstream(
                "auth",
                None,
                describe_oauth_error(status.as_u16(), &body),
            ));
        }

        let tokens: TokenSet = serde_json::from_str(&body).map_err(|e| {
            SyncError::upstream("auth", None, format!("Invalid token response: {}", e))
        })?;
        info!(expires_in = ?tokens.expires_in, "Authentication successful");
        Ok(tokens)
    }
}

fn describe_oauth_error(status: u16, body: &str) -> String {
    let mut message = format!("token endpoint returned status={}", status);
    if let Ok(parsed) = serde_json::from_str::<OAuthErrorBody>(body) {
        if let Some(code) = parsed.error {
            message.push_str(" code=");
            message.push_str(&code);
        }
        if let Some(detail) = parsed.error_description {
            message.push_str(" message=");
            message.push_str(&detail.chars().take(240).collect::<String>());
        }
    }
    message
}

/// Whether the token endpoint handed back a new refresh token.
pub fn rotated_token<'a>(previous: &str, tokens: &'a TokenSet) -> Option<&'a str> {
    tokens
        .refresh_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != previous)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("wattsync-{}-{}", std::process::id(), name))
    }

    fn client() -> B2cClient {
        B2cClient {
            tenant: "pesv.onmicrosoft.com".to_string(),
            client_id: "client".to_string(),
            policy: "B2C_1_Tunnistus_SignInv2".to_string(),
            scope: "openid offline_access".to_string(),
        }
    }

    #[test]
    fn token_endpoint_follows_b2c_layout() {
        assert_eq!(
            client().token_endpoint(),
            "https://pesv.b2clogin.com/pesv.onmicrosoft.com/B2C_1_Tunnistus_SignInv2/oauth2/v2.0/token"
        );
    }

    #[test]
    fn token_file_round_trip_trims_whitespace() {
        let path = temp_path("roundtrip");
        fs::write(&path, "  abc123\n").unwrap();
        let file = TokenFile::new(&path);

        assert_eq!(file.read().unwrap(), "abc123");
        file.save("def456").unwrap();
        assert_eq!(file.read().unwrap(), "def456");

        fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_and_empty_token_files_are_errors() {
        let missing = TokenFile::new(temp_path("missing"));
        let err = missing.read().unwrap_err();
        assert!(err.to_string().contains("not found"));

        let path = temp_path("empty");
        fs::write(&path, "\n").unwrap();
        let err = TokenFile::new(&path).read().unwrap_err();
        assert!(err.to_string().contains("empty"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn rotation_detection() {
        let tokens = TokenSet {
            access_token: "a".to_string(),
            refresh_token: Some("new".to_string()),
            expires_in: Some(3600),
        };
        assert_eq!(rotated_token("old", &tokens), Some("new"));
        assert_eq!(rotated_token("new", &tokens), None);

        let unchanged = TokenSet {
            refresh_token: None,
            ..tokens
        };
        assert_eq!(rotated_token("old", &unchanged), None);
    }

    #[test]
    fn oauth_error_description_is_included() {
        let msg = describe_oauth_error(
            400,
            r#"{"error":"invalid_grant","error_description":"AADB2C90080: expired"}"#,
        );
        assert_eq!(msg, "token endpoint returned status=400 code=invalid_grant message=AADB2C90080: expired");
    }
}
