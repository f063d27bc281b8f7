//! # Module SOAP
//!
//! Construction de requêtes SOAP UPnP et parsing des enveloppes de réponse.
//!
//! - [`build_soap_request`] : corps XML d'une invocation d'action
//! - [`SoapEnvelope`] / [`parse_soap_envelope`] : réponse parsée
//! - [`UpnpFault`] / [`envelope_fault`] : erreur UPnP extraite d'un SOAP Fault

mod builder;
mod envelope;
mod parser;

pub use builder::build_soap_request;
pub use envelope::{SoapBody, SoapEnvelope, SoapHeader};
pub use parser::{
    UpnpFault, child_element, child_text, descendant, envelope_fault, parse_soap_envelope,
    required_text,
};
