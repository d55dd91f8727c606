use serde::{Deserialize, Serialize};

/// One installation batch as published by the patch server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "Version", default)]
    pub version: String,
    /// Prefix for every file URL, concatenated verbatim with the file name.
    #[serde(rename = "URL", default)]
    pub base_url: String,
    #[serde(rename = "TotalCount", default)]
    pub total_count: i64,
    #[serde(rename = "TotalSize", default)]
    pub total_size: i64,
    #[serde(rename = "FileList", default)]
    pub files: Vec<FileEntry>,
}

impl Manifest {
    pub fn file_url(&self, entry: &FileEntry) -> String {
        format!("{}{}", self.base_url, entry.name)
    }

    /// First entry whose name ends in `.exe`, any case.
    pub fn installer(&self) -> Option<&FileEntry> {
        self.files
            .iter()
            .find(|f| f.name.to_ascii_lowercase().ends_with(".exe"))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size", default)]
    pub size: i64,
    /// Hex digest; empty means "do not verify".
    #[serde(rename = "CheckSum", default)]
    pub checksum: String,
}

impl FileEntry {
    pub fn expected_checksum(&self) -> Option<&str> {
        let trimmed = self.checksum.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct LoginRequest {
    pub service_code: String,
    pub input_user_id: String,
    pub input_user_password: String,
}

/// Envelope shared by the account endpoints; `result == 1` means success.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub result: i64,
    pub data: Option<T>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LoginData {
    #[serde(default)]
    pub valofe_web_token: String,
    #[serde(default)]
    pub expired_at: i64,
}

/// Only the display name is used; the rest of the member payload is ignored.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MemberInfo {
    #[serde(rename = "nickName", default)]
    pub nick_name: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuthCode {
    #[serde(default)]
    pub auth_code: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MaintenanceStatus {
    #[serde(rename = "isMT", default)]
    pub is_maintenance: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub play: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST_JSON: &str = r#"{
        "Version": "10000",
        "URL": "http://x/",
        "TotalCount": 2,
        "TotalSize": 30,
        "FileList": [
            {"Name": "a.bin", "Size": 10, "CheckSum": "ABCD"},
            {"Name": "Setup.EXE", "Size": 20, "CheckSum": ""}
        ]
    }"#;

    #[test]
    fn parses_wire_manifest() {
        let manifest: Manifest = serde_json::from_str(MANIFEST_JSON).unwrap();
        assert_eq!(manifest.version, "10000");
        assert_eq!(manifest.total_size, 30);
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.file_url(&manifest.files[0]), "http://x/a.bin");
        assert_eq!(manifest.files[0].expected_checksum(), Some("ABCD"));
        assert_eq!(manifest.files[1].expected_checksum(), None);
    }

    #[test]
    fn installer_match_ignores_case() {
        let manifest: Manifest = serde_json::from_str(MANIFEST_JSON).unwrap();
        assert_eq!(manifest.installer().unwrap().name, "Setup.EXE");

        let none = Manifest {
            files: vec![FileEntry {
                name: "data.pak".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(none.installer().is_none());
    }

    #[test]
    fn parses_login_envelope() {
        let body = r#"{"result":1,"data":{"user_id":"bob","valofe_web_token":"tok","expired_at":42}}"#;
        let parsed: ApiEnvelope<LoginData> = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.result, 1);
        let data = parsed.data.unwrap();
        assert_eq!(data.valofe_web_token, "tok");
        assert_eq!(data.expired_at, 42);

        let failed: ApiEnvelope<LoginData> = serde_json::from_str(r#"{"result":-1}"#).unwrap();
        assert!(failed.data.is_none());
    }

    #[test]
    fn member_info_keeps_only_the_nickname() {
        let body = r#"{"result":1,"data":{"user_Serial":"7","user_id":"bob","nickName":"Bobby","email":"b@x"}}"#;
        let parsed: ApiEnvelope<MemberInfo> = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.unwrap().nick_name, "Bobby");
    }
}
