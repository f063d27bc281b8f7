//! Client for the ConnectionManager:1 service of a renderer context.

use rdlupnp::soap::{child_element, child_text};

use crate::errors::ControlError;
use crate::soap_call::{ensure_success, invoke_upnp_action, require_envelope};

#[derive(Debug, Clone)]
pub struct ConnectionManagerClient {
    http: reqwest::Client,
    pub control_url: String,
    pub service_type: String,
}

#[derive(Debug, Clone)]
pub struct ProtocolInfo {
    /// Liste brute des protocolInfo "source" (séparés par virgule dans UPnP)
    pub source: Vec<String>,
    /// Liste brute des protocolInfo "sink"
    pub sink: Vec<String>,
}

impl ProtocolInfo {
    /// MIME types this renderer accepts, extracted from the third field of
    /// each sink protocolInfo entry ("http-get:*:audio/mpeg:*").
    pub fn sink_mime_types(&self) -> Vec<String> {
        self.sink
            .iter()
            .filter_map(|entry| entry.split(':').nth(2))
            .filter(|mime| !mime.is_empty() && *mime != "*")
            .map(str::to_string)
            .collect()
    }
}

impl ConnectionManagerClient {
    pub fn new(http: reqwest::Client, control_url: String, service_type: String) -> Self {
        Self {
            http,
            control_url,
            service_type,
        }
    }

    /// ConnectionManager:1 — GetProtocolInfo
    pub async fn get_protocol_info(&self) -> Result<ProtocolInfo, ControlError> {
        let call = invoke_upnp_action(
            &self.http,
            &self.control_url,
            &self.service_type,
            "GetProtocolInfo",
            &[],
        )
        .await?;

        ensure_success("GetProtocolInfo", &call)?;
        let envelope = require_envelope("GetProtocolInfo", &call)?;

        let response = child_element(&envelope.body.content, "GetProtocolInfoResponse")
            .ok_or_else(|| {
                ControlError::Transport(
                    "missing GetProtocolInfoResponse element in SOAP body".to_string(),
                )
            })?;

        Ok(ProtocolInfo {
            source: split_list(&child_text(response, "Source").unwrap_or_default()),
            sink: split_list(&child_text(response, "Sink").unwrap_or_default()),
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_mime_types_extraction() {
        let info = ProtocolInfo {
            source: vec![],
            sink: vec![
                "http-get:*:audio/mpeg:*".to_string(),
                "http-get:*:image/png:DLNA.ORG_PN=PNG_LRG".to_string(),
                "http-get:*:*:*".to_string(),
            ],
        };

        assert_eq!(info.sink_mime_types(), vec!["audio/mpeg", "image/png"]);
    }

    #[test]
    fn split_list_trims_and_drops_empties() {
        assert_eq!(
            split_list("a, b,,c "),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_list("").is_empty());
    }
}
