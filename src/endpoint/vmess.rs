//! `vmess://` share-link payloads
//!
//! The payload is base64-encoded JSON. Field values are sloppy in the wild:
//! `port` and `aid` show up as strings or numbers, and any field may be
//! missing. Decoding accepts all of that and only insists on `add` and `id`.

use super::{EndpointDescriptor, ParseError, Scheme, TransportHints, DEFAULT_REMOTE_PORT};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

const LENIENT_CONFIG: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT_CONFIG);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT_CONFIG);

/// Raw share-link record
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmessRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub v: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ps: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub add: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub port: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub aid: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub net: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient_string")]
    pub header_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub host: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub path: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tls: Option<String>,
}

/// Scalars become strings, everything else is treated as absent
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Decode the part of the URI after `vmess://`
pub(super) fn decode(payload: &str) -> Result<VmessRecord, ParseError> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

    let bytes = STANDARD_LENIENT
        .decode(&compact)
        .or_else(|_| URL_SAFE_LENIENT.decode(&compact))
        .map_err(|e| ParseError::Malformed(format!("invalid base64: {}", e)))?;

    let json = String::from_utf8(bytes)
        .map_err(|_| ParseError::Malformed("payload is not UTF-8".to_string()))?;

    let value: Value = serde_json::from_str(&json)
        .map_err(|e| ParseError::Malformed(format!("invalid JSON: {}", e)))?;

    if !value.is_object() {
        return Err(ParseError::Malformed(
            "payload is not a JSON object".to_string(),
        ));
    }

    VmessRecord::deserialize(value)
        .map_err(|e| ParseError::Malformed(format!("invalid record: {}", e)))
}

impl VmessRecord {
    /// Port from the record, or the default when absent or unusable
    pub fn port_or_default(&self) -> u16 {
        self.port
            .as_deref()
            .and_then(|p| p.trim().parse::<u16>().ok())
            .filter(|p| *p != 0)
            .unwrap_or(DEFAULT_REMOTE_PORT)
    }

    pub(super) fn into_descriptor(self, raw: &str) -> Result<EndpointDescriptor, ParseError> {
        let port = self.port_or_default();

        let host = non_empty(self.add)
            .ok_or_else(|| ParseError::Malformed("missing address (add)".to_string()))?;
        let identifier = non_empty(self.id)
            .ok_or_else(|| ParseError::Malformed("missing identifier (id)".to_string()))?;

        Ok(EndpointDescriptor {
            scheme: Scheme::Vmess,
            host,
            port,
            identifier,
            hints: TransportHints {
                version: self.v,
                label: self.ps,
                alter_id: self.aid,
                network: self.net,
                header_type: self.header_type,
                host: self.host,
                path: self.path,
                tls: self.tls,
            },
            raw: raw.to_string(),
        })
    }
}

fn non_empty(field: Option<String>) -> Option<String> {
    field
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
