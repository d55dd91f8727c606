use chrono::Utc;
use log::{info, warn};

use crate::engine::models::{MaintenanceStatus, MemberInfo};
use crate::networking::ApiClient;
use crate::storage::SettingsStore;

/// Account session backed by the persisted settings.
///
/// Only the web token and its expiry are kept on disk; the password never is.
#[derive(Clone)]
pub struct AccountService {
    api: ApiClient,
    settings: SettingsStore,
}

impl AccountService {
    pub fn new(api: ApiClient, settings: SettingsStore) -> Self {
        Self { api, settings }
    }

    pub fn is_logged_in(&self) -> bool {
        self.settings
            .snapshot()
            .session_valid_at(Utc::now().timestamp())
    }

    pub fn username(&self) -> String {
        self.settings.snapshot().username
    }

    /// Log in, reusing the stored session when it belongs to the same user and is still valid.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), String> {
        let username = username.trim();
        if username.is_empty() {
            return Err("Please enter both username and password.".into());
        }

        let current = self.settings.snapshot();
        if current.username == username && current.session_valid_at(Utc::now().timestamp()) {
            info!("account: reusing stored session for {username}");
            return Ok(());
        }
        if password.is_empty() {
            return Err("Please enter both username and password.".into());
        }

        let Some(session) = self.api.login(username, password).await? else {
            warn!("account: login rejected for {username}");
            return Err("Invalid username or password.".into());
        };

        let name = username.to_string();
        self.settings
            .update(|s| {
                s.username = name;
                s.auth_token = session.valofe_web_token;
                s.auth_token_expiry = session.expired_at;
            })
            .await?;
        info!("account: logged in as {username}");
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), String> {
        self.settings
            .update(|s| {
                s.auth_token.clear();
                s.auth_token_expiry = 0;
            })
            .await?;
        info!("account: logged out");
        Ok(())
    }

    pub async fn member_info(&self) -> Result<MemberInfo, String> {
        let token = self.token()?;
        self.api
            .member_info(&token)
            .await?
            .ok_or_else(|| "Failed to load account information.".to_string())
    }

    /// One-shot code the game client exchanges for a session.
    pub async fn auth_code(&self) -> Result<String, String> {
        let token = self.token()?;
        let code = self
            .api
            .auth_code(&token)
            .await?
            .map(|c| c.auth_code)
            .filter(|c| !c.is_empty());
        code.ok_or_else(|| "Failed to obtain a game authorization code.".to_string())
    }

    pub async fn maintenance(&self) -> Result<MaintenanceStatus, String> {
        self.api.maintenance_status().await
    }

    /// Whether the servers accept players right now. An unreachable status endpoint counts as no.
    pub async fn can_play(&self) -> bool {
        match self.maintenance().await {
            Ok(status) => {
                if !status.play {
                    warn!(
                        "account: servers in maintenance (isMT={}): {}",
                        status.is_maintenance, status.msg
                    );
                }
                status.play
            }
            Err(err) => {
                warn!("account: {err}");
                false
            }
        }
    }

    fn token(&self) -> Result<String, String> {
        let settings = self.settings.snapshot();
        if settings.session_valid_at(Utc::now().timestamp()) {
            Ok(settings.auth_token)
        } else {
            Err("Your session has expired. Please log in again.".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networking::Endpoints;
    use axum::Router;
    use axum::routing::{get, post};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn start_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn future_expiry() -> i64 {
        Utc::now().timestamp() + 3600
    }

    async fn service(router: Router) -> (AccountService, SettingsStore, tempfile::TempDir) {
        let base = start_server(router).await;
        let endpoints = Endpoints {
            manifest: format!("{base}/file.json"),
            login: format!("{base}/login"),
            member_info: format!("{base}/member_info"),
            auth_code: format!("{base}/make_auth_code"),
            maintenance: format!("{base}/maintenance"),
        };
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::new(dir.path().join("settings.json"));
        (
            AccountService::new(ApiClient::new(endpoints), settings.clone()),
            settings,
            dir,
        )
    }

    #[tokio::test]
    async fn login_stores_the_session() {
        let expiry = future_expiry();
        let router = Router::new().route(
            "/login",
            post(move || async move {
                format!(r#"{{"result":1,"data":{{"valofe_web_token":"tok","expired_at":{expiry}}}}}"#)
            }),
        );
        let (account, settings, _dir) = service(router).await;

        account.login(" bob ", "secret").await.unwrap();

        let stored = settings.snapshot();
        assert_eq!(stored.username, "bob");
        assert_eq!(stored.auth_token, "tok");
        assert_eq!(stored.auth_token_expiry, expiry);
        assert!(account.is_logged_in());
        let on_disk = std::fs::read_to_string(settings.path()).unwrap();
        assert!(!on_disk.contains("secret"));
    }

    #[tokio::test]
    async fn valid_session_for_same_user_skips_the_server() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/login",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    r#"{"result":-1}"#
                }
            }),
        );
        let (account, settings, _dir) = service(router).await;
        settings
            .update(|s| {
                s.username = "bob".into();
                s.auth_token = "tok".into();
                s.auth_token_expiry = future_expiry();
            })
            .await
            .unwrap();

        account.login("bob", "whatever").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let err = account.login("alice", "whatever").await.unwrap_err();
        assert_eq!(err, "Invalid username or password.");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn logout_keeps_the_username() {
        let (account, settings, _dir) = service(Router::new()).await;
        settings
            .update(|s| {
                s.username = "bob".into();
                s.auth_token = "tok".into();
                s.auth_token_expiry = future_expiry();
            })
            .await
            .unwrap();

        account.logout().await.unwrap();
        assert!(!account.is_logged_in());
        assert_eq!(account.username(), "bob");
    }

    #[tokio::test]
    async fn auth_code_requires_a_session() {
        let router = Router::new().route(
            "/make_auth_code",
            get(|| async { r#"{"result":1,"data":{"auth_code":"XYZ"}}"# }),
        );
        let (account, settings, _dir) = service(router).await;
        assert!(account.auth_code().await.is_err());

        settings
            .update(|s| {
                s.auth_token = "tok".into();
                s.auth_token_expiry = future_expiry();
            })
            .await
            .unwrap();
        assert_eq!(account.auth_code().await.unwrap(), "XYZ");
    }

    #[tokio::test]
    async fn maintenance_reports_the_play_flag() {
        let router = Router::new().route(
            "/maintenance",
            get(|| async { r#"{"isMT":1,"msg":"Back soon","play":false}"# }),
        );
        let (account, _settings, _dir) = service(router).await;
        let status = account.maintenance().await.unwrap();
        assert!(!status.play);
        assert_eq!(status.msg, "Back soon");
        assert!(!account.can_play().await);
    }

    #[tokio::test]
    async fn unreachable_maintenance_endpoint_blocks_play() {
        let (account, _settings, _dir) = service(Router::new()).await;
        assert!(!account.can_play().await);
    }

    #[tokio::test]
    async fn open_servers_allow_play() {
        let router = Router::new().route(
            "/maintenance",
            get(|| async { r#"{"isMT":0,"msg":"","play":true}"# }),
        );
        let (account, _settings, _dir) = service(router).await;
        assert!(account.can_play().await);
    }

    #[tokio::test]
    async fn blank_credentials_are_rejected_locally() {
        let (account, settings, _dir) = service(Router::new()).await;
        assert!(account.login("", "pw").await.is_err());
        assert!(account.login("bob", "").await.is_err());

        settings
            .update(|s| {
                s.username = "bob".into();
                s.auth_token = "tok".into();
                s.auth_token_expiry = future_expiry();
            })
            .await
            .unwrap();
        account.login("bob", "").await.unwrap();
    }
}
