//! Parsing of SOAP response envelopes and UPnP faults.

use anyhow::{Result, anyhow};
use xmltree::{Element, XMLNode};

use super::envelope::{SoapBody, SoapEnvelope, SoapHeader};

/// Namespace-prefix-insensitive name check ("s:Body" matches "Body").
fn is_named(element: &Element, name: &str) -> bool {
    element.name.rsplit(':').next().unwrap_or(&element.name) == name
}

fn child_elements(parent: &Element) -> impl Iterator<Item = &Element> {
    parent.children.iter().filter_map(|node| match node {
        XMLNode::Element(element) => Some(element),
        _ => None,
    })
}

/// First direct child called `name`, prefix ignored.
pub fn child_element<'a>(parent: &'a Element, name: &str) -> Option<&'a Element> {
    child_elements(parent).find(|element| is_named(element, name))
}

/// Depth-first search for a descendant called `name`, prefix ignored.
pub fn descendant<'a>(root: &'a Element, name: &str) -> Option<&'a Element> {
    for child in child_elements(root) {
        if is_named(child, name) {
            return Some(child);
        }
        if let Some(found) = descendant(child, name) {
            return Some(found);
        }
    }

    None
}

/// Trimmed text of the direct child `name`. `None` when the child is absent;
/// a present-but-empty child yields `Some("")`.
pub fn child_text(parent: &Element, name: &str) -> Option<String> {
    let child = child_element(parent, name)?;
    Some(
        child
            .get_text()
            .map(|text| text.trim().to_string())
            .unwrap_or_default(),
    )
}

/// Like [`child_text`], but an absent child is an error.
pub fn required_text(parent: &Element, name: &str) -> Result<String> {
    child_text(parent, name).ok_or_else(|| anyhow!("SOAP response has no {} element", name))
}

/// Parse a complete SOAP envelope from XML bytes.
pub fn parse_soap_envelope(data: &[u8]) -> Result<SoapEnvelope> {
    let root = Element::parse(data)?;

    if !is_named(&root, "Envelope") {
        return Err(anyhow!(
            "root element is not a SOAP Envelope: {}",
            root.name
        ));
    }

    let header = child_element(&root, "Header").map(|element| SoapHeader {
        content: element.clone(),
    });

    let body =
        child_element(&root, "Body").ok_or_else(|| anyhow!("SOAP Envelope has no Body"))?;

    Ok(SoapEnvelope {
        header,
        body: SoapBody {
            content: body.clone(),
        },
    })
}

/// UPnP error carried in the detail block of a SOAP fault.
#[derive(Debug, Clone)]
pub struct UpnpFault {
    pub code: u32,
    pub description: String,
}

/// Dig the UPnPError out of a fault response, if the body carries one.
///
/// The element sits a few levels deep (Fault → detail → UPnPError) and some
/// stacks wrap it differently, so the search is by descendant rather than a
/// fixed path.
pub fn envelope_fault(envelope: &SoapEnvelope) -> Option<UpnpFault> {
    let error = descendant(&envelope.body.content, "UPnPError")?;
    let code = child_text(error, "errorCode")?.parse().ok()?;

    Some(UpnpFault {
        code,
        description: child_text(error, "errorDescription").unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSPORT_INFO_RESPONSE: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:GetTransportInfoResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">
      <CurrentTransportState>PLAYING</CurrentTransportState>
      <CurrentTransportStatus>OK</CurrentTransportStatus>
      <CurrentSpeed>1</CurrentSpeed>
    </u:GetTransportInfoResponse>
  </s:Body>
</s:Envelope>"#;

    const FAULT_RESPONSE: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <s:Fault>
      <faultcode>s:Client</faultcode>
      <faultstring>UPnPError</faultstring>
      <detail>
        <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
          <errorCode>718</errorCode>
          <errorDescription>Invalid InstanceID</errorDescription>
        </UPnPError>
      </detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;

    #[test]
    fn action_response_fields_are_reachable() {
        let envelope = parse_soap_envelope(TRANSPORT_INFO_RESPONSE.as_bytes()).unwrap();

        let response =
            child_element(&envelope.body.content, "GetTransportInfoResponse").unwrap();
        assert_eq!(
            required_text(response, "CurrentTransportState").unwrap(),
            "PLAYING"
        );
        assert_eq!(child_text(response, "CurrentSpeed").as_deref(), Some("1"));
        assert!(child_text(response, "NoSuchField").is_none());
        assert!(envelope_fault(&envelope).is_none());
    }

    #[test]
    fn fault_code_and_description_are_extracted() {
        let envelope = parse_soap_envelope(FAULT_RESPONSE.as_bytes()).unwrap();

        let fault = envelope_fault(&envelope).expect("expected UPnPError");
        assert_eq!(fault.code, 718);
        assert_eq!(fault.description, "Invalid InstanceID");
    }

    #[test]
    fn descendant_search_crosses_levels() {
        let envelope = parse_soap_envelope(FAULT_RESPONSE.as_bytes()).unwrap();
        assert!(descendant(&envelope.body.content, "errorCode").is_some());
        assert!(descendant(&envelope.body.content, "NotThere").is_none());
    }

    #[test]
    fn non_envelope_roots_are_rejected() {
        assert!(parse_soap_envelope(b"<root><child/></root>").is_err());
    }
}
