use base64::{engine::general_purpose::STANDARD, Engine};
use bedwire_core::{
    constants::CURRENT_VERSION,
    error::{DecodingErrorKind, ErrorKind, Result},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of the authenticated end user, taken from the verified login
/// chain. Immutable once the Login packet is handled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityData {
    /// Xbox user ID. Empty when the connection is not authenticated.
    #[serde(rename = "XUID", default)]
    pub xuid: String,
    /// UUID of the player, stable across name changes.
    pub identity: String,
    /// Name the player shows up with.
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// Title ID of the client edition, when present.
    #[serde(rename = "titleId", default, skip_serializing_if = "String::is_empty")]
    pub title_id: String,
}

impl IdentityData {
    /// Checks the identity fields are well-formed. Mojang might change this
    /// data, or a custom client might fiddle with it.
    pub fn validate(&self) -> Result<()> {
        if Uuid::parse_str(&self.identity).is_err() {
            return Err(ErrorKind::DecodingError(DecodingErrorKind::IdentityData(format!(
                "UUID {:?} is not a valid UUID",
                self.identity
            ))));
        }
        if self.display_name.is_empty() {
            return Err(ErrorKind::DecodingError(DecodingErrorKind::IdentityData(
                "display name is empty".to_string(),
            )));
        }
        if !self.xuid.is_empty() && !self.xuid.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ErrorKind::DecodingError(DecodingErrorKind::IdentityData(format!(
                "XUID {:?} is not numeric",
                self.xuid
            ))));
        }
        Ok(())
    }
}

/// Descriptor of the client's device, locale, skin and preferences.
/// Validated structurally, never semantically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ClientData {
    /// Input mode currently active (1 = mouse, 2 = touch, 3 = gamepad).
    pub current_input_mode: i32,
    /// Input mode the device defaults to.
    pub default_input_mode: i32,
    /// Device model string, e.g. a phone model name.
    pub device_model: String,
    /// Operating system of the device.
    #[serde(rename = "DeviceOS")]
    pub device_os: i32,
    /// Version of the game the client runs.
    pub game_version: String,
    /// Locale as language_COUNTRY.
    pub language_code: String,
    /// Address the client used to reach the server.
    pub server_address: String,
    /// Identifier of the equipped skin.
    pub skin_id: String,
    /// Standard-base64 RGBA pixel data of the skin.
    pub skin_data: String,
    /// Name the client carries on third-party platforms.
    pub third_party_name: String,
    /// UI profile (0 = classic, 1 = pocket).
    #[serde(rename = "UIProfile")]
    pub ui_profile: i32,
}

impl Default for ClientData {
    fn default() -> Self {
        Self {
            current_input_mode: 1,
            default_input_mode: 1,
            device_model: String::new(),
            device_os: 1,
            game_version: CURRENT_VERSION.to_string(),
            language_code: "en_US".to_string(),
            server_address: String::new(),
            skin_id: "Standard_Custom".to_string(),
            skin_data: STANDARD.encode(vec![0u8; 32 * 64 * 4]),
            third_party_name: String::new(),
            ui_profile: 0,
        }
    }
}

impl ClientData {
    /// Checks the descriptor fields are structurally sound.
    pub fn validate(&self) -> Result<()> {
        let err = |msg: String| ErrorKind::DecodingError(DecodingErrorKind::ClientData(msg));
        if !(1..=15).contains(&self.device_os) {
            return Err(err(format!("DeviceOS {} is out of range", self.device_os)));
        }
        if self.game_version.is_empty() {
            return Err(err("GameVersion is empty".to_string()));
        }
        if self.language_code.len() < 2 || !self.language_code.contains('_') {
            return Err(err(format!("LanguageCode {:?} is malformed", self.language_code)));
        }
        if !(0..=2).contains(&self.ui_profile) {
            return Err(err(format!("UIProfile {} is out of range", self.ui_profile)));
        }
        let skin = STANDARD
            .decode(&self.skin_data)
            .map_err(|_| err("SkinData is not valid base64".to_string()))?;
        if skin.is_empty() || skin.len() % 4 != 0 {
            return Err(err(format!("SkinData has invalid pixel length {}", skin.len())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_identity() -> IdentityData {
        IdentityData {
            xuid: "2535416679363407".to_string(),
            identity: "e9a077a6-0e0f-4a3e-8344-1e886a1e3f54".to_string(),
            display_name: "Alice".to_string(),
            title_id: String::new(),
        }
    }

    #[test]
    fn test_valid_identity_passes() {
        valid_identity().validate().unwrap();
    }

    #[test]
    fn test_identity_rejects_bad_uuid() {
        let mut identity = valid_identity();
        identity.identity = "not-a-uuid".to_string();
        assert!(identity.validate().is_err());
    }

    #[test]
    fn test_identity_rejects_empty_name() {
        let mut identity = valid_identity();
        identity.display_name.clear();
        assert!(identity.validate().is_err());
    }

    #[test]
    fn test_identity_rejects_non_numeric_xuid() {
        let mut identity = valid_identity();
        identity.xuid = "xuid-123".to_string();
        assert!(identity.validate().is_err());
    }

    #[test]
    fn test_identity_allows_empty_xuid() {
        let mut identity = valid_identity();
        identity.xuid.clear();
        identity.validate().unwrap();
    }

    #[test]
    fn test_default_client_data_is_valid() {
        ClientData::default().validate().unwrap();
    }

    #[test]
    fn test_client_data_rejects_bad_skin() {
        let mut data = ClientData::default();
        data.skin_data = "!!not base64!!".to_string();
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_client_data_rejects_out_of_range_os() {
        let mut data = ClientData::default();
        data.device_os = 99;
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_client_data_pascal_case_wire_names() {
        let json = serde_json::to_value(ClientData::default()).unwrap();
        assert!(json.get("GameVersion").is_some());
        assert!(json.get("DeviceOS").is_some());
        assert!(json.get("UIProfile").is_some());
    }
}
