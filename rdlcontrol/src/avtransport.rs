//! Client for the AVTransport:1 service of a renderer context.

use rdlupnp::soap::{child_element, child_text, required_text};

use crate::errors::ControlError;
use crate::soap_call::{ensure_success, invoke_upnp_action, require_envelope};

#[derive(Debug, Clone)]
pub struct AvTransportClient {
    http: reqwest::Client,
    pub control_url: String,
    pub service_type: String,
}

#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub current_transport_state: String,
    pub current_transport_status: String,
    pub current_speed: String,
}

#[derive(Debug, Clone)]
pub struct PositionInfo {
    pub track: u32,
    pub track_duration: String,
    pub track_metadata: String,
    pub rel_time: String,
    pub abs_time: String,
}

impl AvTransportClient {
    /// All calls use `InstanceID = 0`, which covers the common case of UPnP AV
    /// MediaRenderers with a single transport instance.
    pub fn new(http: reqwest::Client, control_url: String, service_type: String) -> Self {
        Self {
            http,
            control_url,
            service_type,
        }
    }

    async fn invoke(&self, action: &str, args: &[(&str, &str)]) -> Result<(), ControlError> {
        let call =
            invoke_upnp_action(&self.http, &self.control_url, &self.service_type, action, args)
                .await?;
        ensure_success(action, &call)
    }

    /// AVTransport:1 — Play
    pub async fn play(&self, speed: &str) -> Result<(), ControlError> {
        self.invoke("Play", &[("InstanceID", "0"), ("Speed", speed)])
            .await
    }

    /// AVTransport:1 — Pause
    pub async fn pause(&self) -> Result<(), ControlError> {
        self.invoke("Pause", &[("InstanceID", "0")]).await
    }

    /// AVTransport:1 — Stop
    pub async fn stop(&self) -> Result<(), ControlError> {
        self.invoke("Stop", &[("InstanceID", "0")]).await
    }

    /// AVTransport:1 — Next
    pub async fn next(&self) -> Result<(), ControlError> {
        self.invoke("Next", &[("InstanceID", "0")]).await
    }

    /// AVTransport:1 — Previous
    pub async fn previous(&self) -> Result<(), ControlError> {
        self.invoke("Previous", &[("InstanceID", "0")]).await
    }

    /// AVTransport:1 — SetAVTransportURI
    ///
    /// - `uri`  : CurrentURI
    /// - `meta` : CurrentURIMetaData (DIDL-Lite ou chaîne vide)
    pub async fn set_av_transport_uri(&self, uri: &str, meta: &str) -> Result<(), ControlError> {
        self.invoke(
            "SetAVTransportURI",
            &[
                ("InstanceID", "0"),
                ("CurrentURI", uri),
                ("CurrentURIMetaData", meta),
            ],
        )
        .await
    }

    /// AVTransport:1 — Seek with Unit=REL_TIME
    pub async fn seek_rel_time(&self, target: &str) -> Result<(), ControlError> {
        self.invoke(
            "Seek",
            &[
                ("InstanceID", "0"),
                ("Unit", "REL_TIME"),
                ("Target", target),
            ],
        )
        .await
    }

    /// AVTransport:1 — GetTransportInfo
    pub async fn get_transport_info(&self) -> Result<TransportInfo, ControlError> {
        let call = invoke_upnp_action(
            &self.http,
            &self.control_url,
            &self.service_type,
            "GetTransportInfo",
            &[("InstanceID", "0")],
        )
        .await?;

        ensure_success("GetTransportInfo", &call)?;
        let envelope = require_envelope("GetTransportInfo", &call)?;

        let response = child_element(&envelope.body.content, "GetTransportInfoResponse")
            .ok_or_else(|| {
                ControlError::Transport(
                    "missing GetTransportInfoResponse element in SOAP body".to_string(),
                )
            })?;

        Ok(TransportInfo {
            current_transport_state: required_text(response, "CurrentTransportState")
                .map_err(|e| ControlError::Transport(e.to_string()))?,
            current_transport_status: child_text(response, "CurrentTransportStatus")
                .unwrap_or_default(),
            current_speed: child_text(response, "CurrentSpeed").unwrap_or_default(),
        })
    }

    /// AVTransport:1 — GetPositionInfo
    pub async fn get_position_info(&self) -> Result<PositionInfo, ControlError> {
        let call = invoke_upnp_action(
            &self.http,
            &self.control_url,
            &self.service_type,
            "GetPositionInfo",
            &[("InstanceID", "0")],
        )
        .await?;

        ensure_success("GetPositionInfo", &call)?;
        let envelope = require_envelope("GetPositionInfo", &call)?;

        let response = child_element(&envelope.body.content, "GetPositionInfoResponse")
            .ok_or_else(|| {
                ControlError::Transport(
                    "missing GetPositionInfoResponse element in SOAP body".to_string(),
                )
            })?;

        let track = child_text(response, "Track")
            .unwrap_or_default()
            .parse()
            .unwrap_or(0);

        Ok(PositionInfo {
            track,
            track_duration: child_text(response, "TrackDuration").unwrap_or_default(),
            track_metadata: child_text(response, "TrackMetaData").unwrap_or_default(),
            rel_time: child_text(response, "RelTime").unwrap_or_default(),
            abs_time: child_text(response, "AbsTime").unwrap_or_default(),
        })
    }
}

/// Parse a track time ("H:MM:SS" or "H:MM:SS.mmm") into microseconds.
///
/// Renderers report "NOT_IMPLEMENTED" or an empty string when they cannot
/// track position; both map to `None`.
pub fn parse_track_time(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("NOT_IMPLEMENTED") {
        return None;
    }

    let (whole, frac) = match trimmed.split_once('.') {
        Some((whole, frac)) => (whole, Some(frac)),
        None => (trimmed, None),
    };

    let mut parts = whole.split(':');
    let hours: i64 = parts.next()?.trim().parse().ok()?;
    let minutes: i64 = parts.next()?.trim().parse().ok()?;
    let seconds: i64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() || !(0..60).contains(&minutes) || !(0..60).contains(&seconds) {
        return None;
    }

    let mut micros = ((hours * 60 + minutes) * 60 + seconds) * 1_000_000;

    if let Some(frac) = frac {
        // "5" means .5s, "05" means .05s; only the first six digits matter.
        let digits: String = frac.chars().take(6).collect();
        let scale = 10_i64.pow(6 - digits.len() as u32);
        micros += digits.parse::<i64>().ok()? * scale;
    }

    Some(micros)
}

/// Format microseconds as the "H:MM:SS" track time the wire expects.
pub fn format_track_time(micros: i64) -> String {
    let total_seconds = micros.max(0) / 1_000_000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_time_round_trip() {
        assert_eq!(parse_track_time("0:00:00"), Some(0));
        assert_eq!(parse_track_time("0:03:25"), Some(205_000_000));
        assert_eq!(parse_track_time("1:02:03"), Some(3_723_000_000));
        assert_eq!(parse_track_time("0:00:01.5"), Some(1_500_000));

        assert_eq!(format_track_time(205_000_000), "0:03:25");
        assert_eq!(format_track_time(3_723_000_000), "1:02:03");
        assert_eq!(format_track_time(-5), "0:00:00");
    }

    #[test]
    fn track_time_rejects_garbage() {
        assert_eq!(parse_track_time("NOT_IMPLEMENTED"), None);
        assert_eq!(parse_track_time(""), None);
        assert_eq!(parse_track_time("12"), None);
        assert_eq!(parse_track_time("0:99:00"), None);
    }
}
