//! Asynchronous invocation of UPnP SOAP actions.

use rdlupnp::soap::{SoapEnvelope, build_soap_request, envelope_fault, parse_soap_envelope};
use reqwest::StatusCode;

use crate::errors::ControlError;

/// Result of a SOAP call:
/// - HTTP status code
/// - raw XML body (always)
/// - parsed SOAP envelope if parsing succeeded
pub struct SoapCallResult {
    pub status: StatusCode,
    pub raw_body: String,
    pub envelope: Option<SoapEnvelope>,
}

/// Invoke a UPnP SOAP action on a control URL.
///
/// - `control_url`: full HTTP URL of the service control endpoint
/// - `service_type`: service URN
/// - `action`: action name
/// - `args`: list of (name, value)
///
/// A non-2xx status is *not* an error here; callers inspect the result so
/// that UPnP faults can be reported with their code and description.
pub async fn invoke_upnp_action(
    http: &reqwest::Client,
    control_url: &str,
    service_type: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<SoapCallResult, ControlError> {
    let body_xml = build_soap_request(service_type, action, args)
        .map_err(|e| ControlError::Transport(format!("failed to build SOAP request: {}", e)))?;

    let soap_action_header = format!(r#""{}#{}""#, service_type, action);

    let response = http
        .post(control_url)
        .header("Content-Type", r#"text/xml; charset="utf-8""#)
        .header("SOAPAction", &soap_action_header)
        .body(body_xml)
        .send()
        .await
        .map_err(|e| {
            ControlError::Transport(format!(
                "HTTP error when sending SOAP request to {}: {}",
                control_url, e
            ))
        })?;

    let status = response.status();

    let raw_body = response
        .text()
        .await
        .map_err(|e| ControlError::Transport(format!("failed to read SOAP response body: {}", e)))?;

    // Parsing is non-fatal: faults still carry an envelope, garbage does not.
    let envelope = parse_soap_envelope(raw_body.as_bytes()).ok();

    Ok(SoapCallResult {
        status,
        raw_body,
        envelope,
    })
}

/// Fold HTTP failures and UPnP faults of `action` into a transport error.
pub fn ensure_success(action: &str, call: &SoapCallResult) -> Result<(), ControlError> {
    if let Some(envelope) = &call.envelope {
        if let Some(fault) = envelope_fault(envelope) {
            return Err(ControlError::Transport(format!(
                "{} returned UPnP error {}: {} (HTTP status {})",
                action, fault.code, fault.description, call.status
            )));
        }
    }

    if !call.status.is_success() {
        return Err(ControlError::Transport(format!(
            "{} failed with HTTP status {} and body: {}",
            action, call.status, call.raw_body
        )));
    }

    Ok(())
}

/// The parsed envelope, or a transport error naming `action`.
pub fn require_envelope<'a>(
    action: &str,
    call: &'a SoapCallResult,
) -> Result<&'a SoapEnvelope, ControlError> {
    call.envelope.as_ref().ok_or_else(|| {
        ControlError::Transport(format!("missing SOAP envelope in {} response", action))
    })
}
