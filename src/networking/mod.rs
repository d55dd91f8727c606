use std::time::Duration;

use log::{debug, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::engine::models::{
    ApiEnvelope, AuthCode, LoginData, LoginRequest, MaintenanceStatus, Manifest, MemberInfo,
};

const LOGIN_SERVICE_CODE: &str = "vfun";

/// Remote endpoints the launcher talks to.
#[derive(Clone, Debug)]
pub struct Endpoints {
    pub manifest: String,
    pub login: String,
    pub member_info: String,
    pub auth_code: String,
    pub maintenance: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            manifest: "http://s4-cdn.valofe.com/s4league_on_valofe/live/fullclient/game_downloader/file.json".into(),
            login: "https://external-api.valofe.com/api/vfun/login".into(),
            member_info: "https://external-api.valofe.com/api/vfun/member_info".into(),
            auth_code: "https://external-api.valofe.com/api/vfun/make_auth_code".into(),
            maintenance: "https://api.valofe.com/v1/vlauncher/check_maintenance?service_code=s4league".into(),
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    endpoints: Endpoints,
}

impl ApiClient {
    pub fn new(endpoints: Endpoints) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self { client, endpoints }
    }

    pub async fn fetch_manifest(&self) -> Result<Manifest, String> {
        debug!("network: fetching manifest from {}", self.endpoints.manifest);
        let resp = self
            .client
            .get(&self.endpoints.manifest)
            .send()
            .await
            .map_err(|e| format!("manifest request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("manifest status error: {e}"))?;
        let text = resp
            .text()
            .await
            .map_err(|e| format!("manifest body error: {e}"))?;
        serde_json::from_str(&text).map_err(|e| format!("manifest parse error: {e}"))
    }

    /// Returns the session data on `result == 1`, `Ok(None)` when the server rejects the credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<Option<LoginData>, String> {
        let body = LoginRequest {
            service_code: LOGIN_SERVICE_CODE.into(),
            input_user_id: username.into(),
            input_user_password: password.into(),
        };
        let resp = self
            .client
            .post(&self.endpoints.login)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("login request failed: {e}"))?;
        let envelope: ApiEnvelope<LoginData> = resp
            .json()
            .await
            .map_err(|e| format!("login response parse error: {e}"))?;
        Ok(success_data(envelope))
    }

    pub async fn member_info(&self, token: &str) -> Result<Option<MemberInfo>, String> {
        self.authorized_get(&self.endpoints.member_info, token, "member info")
            .await
    }

    pub async fn auth_code(&self, token: &str) -> Result<Option<AuthCode>, String> {
        self.authorized_get(&self.endpoints.auth_code, token, "auth code")
            .await
    }

    pub async fn maintenance_status(&self) -> Result<MaintenanceStatus, String> {
        let resp = self
            .client
            .get(&self.endpoints.maintenance)
            .send()
            .await
            .map_err(|e| format!("maintenance check failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("maintenance check status error: {e}"))?;
        resp.json()
            .await
            .map_err(|e| format!("maintenance check parse error: {e}"))
    }

    async fn authorized_get<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
        what: &str,
    ) -> Result<Option<T>, String> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| format!("{what} request failed: {e}"))?;
        let envelope: ApiEnvelope<T> = resp
            .json()
            .await
            .map_err(|e| format!("{what} parse error: {e}"))?;
        Ok(success_data(envelope))
    }
}

fn success_data<T>(envelope: ApiEnvelope<T>) -> Option<T> {
    if envelope.result == 1 {
        envelope.data
    } else {
        debug!("network: server answered result={}", envelope.result);
        None
    }
}
