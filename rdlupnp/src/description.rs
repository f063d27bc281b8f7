//! Device-description retrieval.
//!
//! Discovery hands us the LOCATION announced over SSDP; this module pulls the
//! description document and reduces it to the identity fields and the two
//! service endpoints the control core drives. Anything that is not a usable
//! MediaRenderer comes back as `None` rather than an error.

use std::collections::HashMap;
use std::io::{BufReader, Read};
use std::time::Duration;

use quick_xml::{Reader, events::Event};
use thiserror::Error;
use tracing::{debug, warn};
use ureq::Agent;

#[derive(Debug, Error)]
pub enum DescriptionError {
    #[error("could not fetch device description: {0}")]
    Fetch(#[from] ureq::Error),

    #[error("malformed description document: {0}")]
    Parse(#[from] quick_xml::Error),

    #[error("description lacks a {0} element")]
    Incomplete(&'static str),
}

/// A serviceList entry, URLs already anchored to the description URL.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub service_type: String,
    pub control_url: String,
    pub event_url: Option<String>,
}

/// Parsed MediaRenderer description.
#[derive(Debug, Clone)]
pub struct RendererDescription {
    pub udn: String,
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
    pub avtransport: ServiceEndpoint,
    pub connection_manager: Option<ServiceEndpoint>,
}

#[derive(Debug, Default)]
struct ServiceFields {
    service_type: String,
    control_url: String,
    event_url: Option<String>,
}

/// Pulls description documents over HTTP. Lives on the discovery thread, so
/// a blocking agent is the right tool.
pub struct HttpDescriptionProvider {
    agent: Agent,
}

impl HttpDescriptionProvider {
    pub fn new(timeout_secs: u64) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout_secs)))
            .build();

        Self {
            agent: config.into(),
        }
    }

    /// `Ok(None)` when the document describes something other than a
    /// MediaRenderer with an AVTransport service.
    pub fn fetch(&self, location: &str) -> Result<Option<RendererDescription>, DescriptionError> {
        debug!("fetching device description at {}", location);

        let response = self.agent.get(location).call()?;
        let (_, body) = response.into_parts();

        read_renderer_description(body.into_reader(), location)
    }

    /// Variant for the discovery loop: failures are logged, never propagated.
    pub fn fetch_quietly(&self, location: &str) -> Option<RendererDescription> {
        self.fetch(location).unwrap_or_else(|e| {
            warn!("unusable device description at {}: {}", location, e);
            None
        })
    }
}

/// Streaming parse of a description document.
///
/// Keeps the path of open elements and keys every text node off that path's
/// tail, so nesting oddities (sub-device lists, vendor extensions) fall out
/// naturally instead of needing flag juggling.
pub fn read_renderer_description(
    document: impl Read,
    base_url: &str,
) -> Result<Option<RendererDescription>, DescriptionError> {
    let mut reader = Reader::from_reader(BufReader::new(document));
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut identity: HashMap<String, String> = HashMap::new();
    let mut services: Vec<ServiceFields> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) => {
                let name = element_name(start.name().as_ref());
                if name == "service" && path.iter().any(|open| open == "device") {
                    services.push(ServiceFields::default());
                }
                path.push(name);
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(text) => {
                let value = text
                    .decode()
                    .map_err(quick_xml::Error::Encoding)?
                    .into_owned();
                record_field(&path, value, &mut identity, &mut services);
            }
            Event::Eof => break,
            _ => {}
        }

        buf.clear();
    }

    assemble(identity, services, base_url)
}

/// Element name with any namespace prefix stripped.
fn element_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    name.rsplit(':').next().unwrap_or(&name).to_string()
}

fn record_field(
    path: &[String],
    value: String,
    identity: &mut HashMap<String, String>,
    services: &mut Vec<ServiceFields>,
) {
    let Some(element) = path.last() else {
        return;
    };
    if !path.iter().any(|open| open == "device") {
        return;
    }

    if path.iter().any(|open| open == "service") {
        let Some(service) = services.last_mut() else {
            return;
        };
        match element.as_str() {
            "serviceType" => service.service_type = value,
            "controlURL" => service.control_url = value,
            "eventSubURL" => service.event_url = Some(value),
            _ => {}
        }
    } else {
        match element.as_str() {
            "UDN" | "deviceType" | "friendlyName" | "manufacturer" | "modelName" => {
                // First occurrence wins: embedded sub-devices come later in
                // the document than the root device.
                identity.entry(element.clone()).or_insert(value);
            }
            _ => {}
        }
    }
}

fn assemble(
    mut identity: HashMap<String, String>,
    services: Vec<ServiceFields>,
    base_url: &str,
) -> Result<Option<RendererDescription>, DescriptionError> {
    let device_type = identity
        .remove("deviceType")
        .ok_or(DescriptionError::Incomplete("deviceType"))?;

    if !device_type
        .to_ascii_lowercase()
        .contains("device:mediarenderer:")
    {
        debug!("not a MediaRenderer: {}", device_type);
        return Ok(None);
    }

    let udn = identity
        .remove("UDN")
        .ok_or(DescriptionError::Incomplete("UDN"))?
        .to_ascii_lowercase();

    let friendly_name = identity
        .remove("friendlyName")
        .ok_or(DescriptionError::Incomplete("friendlyName"))?;

    let Some(avtransport) = endpoint(&services, "service:avtransport:", base_url) else {
        debug!("renderer {} exposes no AVTransport, ignoring", udn);
        return Ok(None);
    };

    Ok(Some(RendererDescription {
        udn,
        device_type,
        friendly_name,
        manufacturer: identity.remove("manufacturer").unwrap_or_default(),
        model_name: identity.remove("modelName").unwrap_or_default(),
        avtransport,
        connection_manager: endpoint(&services, "service:connectionmanager:", base_url),
    }))
}

/// First service whose type contains `type_fragment` and that has a control
/// URL, lifted into a resolved endpoint.
fn endpoint(
    services: &[ServiceFields],
    type_fragment: &str,
    base_url: &str,
) -> Option<ServiceEndpoint> {
    let service = services.iter().find(|candidate| {
        candidate
            .service_type
            .to_ascii_lowercase()
            .contains(type_fragment)
            && !candidate.control_url.is_empty()
    })?;

    Some(ServiceEndpoint {
        service_type: service.service_type.clone(),
        control_url: absolute_url(base_url, &service.control_url),
        event_url: service
            .event_url
            .as_deref()
            .map(|url| absolute_url(base_url, url)),
    })
}

/// Service URLs in descriptions are often relative; anchor them to the
/// authority the description itself was fetched from.
fn absolute_url(base: &str, candidate: &str) -> String {
    if candidate.contains("://") {
        return candidate.to_string();
    }

    let root_len = match base.find("://") {
        Some(scheme_end) => base[scheme_end + 3..]
            .find('/')
            .map(|slash| scheme_end + 3 + slash)
            .unwrap_or(base.len()),
        None => return candidate.to_string(),
    };

    format!("{}/{}", &base[..root_len], candidate.trim_start_matches('/'))
}
