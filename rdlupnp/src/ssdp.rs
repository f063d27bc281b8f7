//! Control-point side of SSDP.
//!
//! The daemon only ever *watches* the network: it sends M-SEARCH probes and
//! collects NOTIFY traffic plus unicast search responses. The socket binds an
//! ephemeral port instead of the well-known 1900 — we are not a UPnP device,
//! and sharing 1900 with a device stack makes the kernel round-robin
//! datagrams between the sockets, silently dropping notifications on our
//! side. Multicast membership is joined per interface so NOTIFYs still
//! arrive on the ephemeral socket.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use super::{SSDP_MULTICAST_ADDR, SSDP_PORT};

const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// One SSDP announcement, reduced to what discovery consumes.
#[derive(Debug, Clone)]
pub struct SsdpEvent {
    /// Unique service name ("uuid:...", possibly "::urn:..."-qualified).
    pub usn: String,
    /// NT of a notification, or ST of a search response.
    pub target: String,
    /// Sender address of the datagram.
    pub origin: SocketAddr,
    pub kind: SsdpEventKind,
}

#[derive(Debug, Clone)]
pub enum SsdpEventKind {
    /// ssdp:alive notification, or a 200 answer to our M-SEARCH.
    Alive { location: String, max_age: u32 },
    /// ssdp:byebye.
    Gone,
}

/// Multicast-joined UDP socket delivering parsed SSDP traffic.
pub struct SsdpListener {
    socket: UdpSocket,
}

impl SsdpListener {
    pub fn open() -> std::io::Result<Self> {
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_reuse_address(true)?;
        raw.bind(&SocketAddr::from(([0, 0, 0, 0], 0)).into())?;

        let socket: UdpSocket = raw.into();
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        socket.set_multicast_loop_v4(true)?;

        let group: Ipv4Addr = SSDP_MULTICAST_ADDR.parse().unwrap();
        let mut joined = 0;
        for ip in local_ipv4_addresses()? {
            match socket.join_multicast_v4(&group, &ip) {
                Ok(()) => joined += 1,
                Err(e) => debug!("multicast join failed on {}: {}", ip, e),
            }
        }

        info!(
            "✅ SSDP listener up, multicast joined on {} interface(s)",
            joined
        );

        Ok(Self { socket })
    }

    /// Probe the network for `target` devices. Answers show up through
    /// [`recv_event`](Self::recv_event) like any other traffic.
    pub fn search(&self, target: &str, mx: u32) -> std::io::Result<()> {
        let group: SocketAddr =
            SocketAddr::from((SSDP_MULTICAST_ADDR.parse::<Ipv4Addr>().unwrap(), SSDP_PORT));

        self.socket
            .send_to(msearch_packet(target, mx).as_bytes(), group)?;
        debug!("📤 M-SEARCH for {} sent", target);

        Ok(())
    }

    /// Block for up to the read timeout. `None` means nothing usable arrived
    /// in that window; callers just loop.
    pub fn recv_event(&self) -> Option<SsdpEvent> {
        let mut buf = [0u8; 8192];

        match self.socket.recv_from(&mut buf) {
            Ok((len, origin)) => {
                let text = String::from_utf8_lossy(&buf[..len]);
                event_from_datagram(&text, origin)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => None,
            Err(e) => {
                warn!("SSDP receive failed: {}", e);
                None
            }
        }
    }
}

fn msearch_packet(target: &str, mx: u32) -> String {
    // MX outside 1..=5 is rejected by some stacks.
    let mx = mx.clamp(1, 5);

    [
        "M-SEARCH * HTTP/1.1".to_string(),
        format!("HOST: {}:{}", SSDP_MULTICAST_ADDR, SSDP_PORT),
        "MAN: \"ssdp:discover\"".to_string(),
        format!("MX: {}", mx),
        format!("ST: {}", target),
        "USER-AGENT: renderlink/0.1 UPnP/1.0".to_string(),
        String::new(),
        String::new(),
    ]
    .join("\r\n")
}

fn local_ipv4_addresses() -> std::io::Result<Vec<Ipv4Addr>> {
    Ok(get_if_addrs::get_if_addrs()?
        .into_iter()
        .filter_map(|iface| match iface.addr {
            get_if_addrs::IfAddr::V4(v4) if !v4.ip.is_loopback() => Some(v4.ip),
            _ => None,
        })
        .collect())
}

fn event_from_datagram(text: &str, origin: SocketAddr) -> Option<SsdpEvent> {
    let mut lines = text.lines();
    let start_line = lines.next()?.trim().to_ascii_uppercase();

    let mut headers: HashMap<String, String> = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    if start_line.starts_with("NOTIFY") {
        let usn = headers.get("usn")?.clone();
        let target = headers.get("nt")?.clone();

        let kind = match headers.get("nts").map(String::as_str) {
            Some(nts) if nts.contains("alive") => alive_kind(&headers)?,
            Some(nts) if nts.contains("byebye") => SsdpEventKind::Gone,
            _ => return None,
        };

        Some(SsdpEvent {
            usn,
            target,
            origin,
            kind,
        })
    } else if start_line.starts_with("HTTP/") && start_line.contains("200") {
        Some(SsdpEvent {
            usn: headers.get("usn")?.clone(),
            target: headers.get("st")?.clone(),
            origin,
            kind: alive_kind(&headers)?,
        })
    } else {
        // M-SEARCH probes from other control points, or plain noise.
        None
    }
}

fn alive_kind(headers: &HashMap<String, String>) -> Option<SsdpEventKind> {
    Some(SsdpEventKind::Alive {
        location: headers.get("location")?.clone(),
        max_age: cache_max_age(headers.get("cache-control")),
    })
}

/// TTL from a CACHE-CONTROL header; announcements without one get the
/// customary 30 minutes.
fn cache_max_age(cache_control: Option<&String>) -> u32 {
    const FALLBACK: u32 = 1800;

    let Some(directives) = cache_control else {
        return FALLBACK;
    };

    directives
        .split(',')
        .find_map(|directive| {
            let (name, value) = directive.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("max-age") {
                return None;
            }
            value.trim().parse().ok()
        })
        .unwrap_or(FALLBACK)
}

/// Device part of a USN header ("uuid:x", "uuid:x::urn:...").
pub fn udn_from_usn(usn: &str) -> Option<String> {
    let usn = usn.trim().to_ascii_lowercase();
    if !usn.starts_with("uuid:") {
        return None;
    }

    Some(usn.split("::").next().unwrap_or(&usn).to_string())
}

/// Local IPv4 interface address whose subnet contains `remote`.
///
/// Used to attribute an SSDP announcement to the network interface it was
/// received on, which is the identity of a device context.
pub fn local_interface_for(remote: IpAddr) -> Option<Ipv4Addr> {
    let IpAddr::V4(remote) = remote else {
        return None;
    };

    let ifaces = get_if_addrs::get_if_addrs().ok()?;

    for iface in ifaces {
        if let get_if_addrs::IfAddr::V4(v4) = &iface.addr {
            let mask = u32::from(v4.netmask);
            if u32::from(v4.ip) & mask == u32::from(remote) & mask {
                return Some(v4.ip);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> SocketAddr {
        "192.0.2.10:1900".parse().unwrap()
    }

    #[test]
    fn alive_notification() {
        let msg = "NOTIFY * HTTP/1.1\r\n\
                   HOST: 239.255.255.250:1900\r\n\
                   CACHE-CONTROL: max-age=120\r\n\
                   LOCATION: http://192.0.2.10:49152/description.xml\r\n\
                   NT: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
                   NTS: ssdp:alive\r\n\
                   SERVER: Linux/5.4 UPnP/1.0 Test/1.0\r\n\
                   USN: uuid:abcd::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
                   \r\n";

        let event = event_from_datagram(msg, origin()).expect("parses");
        assert_eq!(
            event.usn,
            "uuid:abcd::urn:schemas-upnp-org:device:MediaRenderer:1"
        );
        assert_eq!(event.target, "urn:schemas-upnp-org:device:MediaRenderer:1");
        match event.kind {
            SsdpEventKind::Alive { location, max_age } => {
                assert_eq!(location, "http://192.0.2.10:49152/description.xml");
                assert_eq!(max_age, 120);
            }
            SsdpEventKind::Gone => panic!("expected an alive event"),
        }
    }

    #[test]
    fn byebye_notification() {
        let msg = "NOTIFY * HTTP/1.1\r\n\
                   HOST: 239.255.255.250:1900\r\n\
                   NT: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
                   NTS: ssdp:byebye\r\n\
                   USN: uuid:abcd\r\n\
                   \r\n";

        let event = event_from_datagram(msg, origin()).expect("parses");
        assert_eq!(event.usn, "uuid:abcd");
        assert!(matches!(event.kind, SsdpEventKind::Gone));
    }

    #[test]
    fn search_response() {
        let msg = "HTTP/1.1 200 OK\r\n\
                   CACHE-CONTROL: max-age=1800\r\n\
                   LOCATION: http://192.0.2.10:49152/description.xml\r\n\
                   ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
                   USN: uuid:abcd::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
                   \r\n";

        let event = event_from_datagram(msg, origin()).expect("parses");
        assert_eq!(event.target, "urn:schemas-upnp-org:device:MediaRenderer:1");
        assert!(matches!(event.kind, SsdpEventKind::Alive { max_age: 1800, .. }));
    }

    #[test]
    fn foreign_msearch_and_noise_are_dropped() {
        let msearch = "M-SEARCH * HTTP/1.1\r\n\
                       HOST: 239.255.255.250:1900\r\n\
                       MAN: \"ssdp:discover\"\r\n\
                       ST: ssdp:all\r\n\
                       \r\n";
        assert!(event_from_datagram(msearch, origin()).is_none());
        assert!(event_from_datagram("garbage", origin()).is_none());
    }

    #[test]
    fn max_age_parsing_is_lenient() {
        assert_eq!(cache_max_age(None), 1800);
        assert_eq!(cache_max_age(Some(&"no-cache".to_string())), 1800);
        assert_eq!(cache_max_age(Some(&"max-age=90".to_string())), 90);
        assert_eq!(
            cache_max_age(Some(&"no-cache, max-age = 60".to_string())),
            60
        );
    }

    #[test]
    fn msearch_packet_carries_the_required_headers() {
        let packet = msearch_packet("urn:schemas-upnp-org:device:MediaRenderer:1", 99);
        assert!(packet.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(packet.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(packet.contains("MX: 5\r\n"));
        assert!(packet.contains("ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n"));
        assert!(packet.ends_with("\r\n\r\n"));
    }

    #[test]
    fn udn_extraction() {
        assert_eq!(
            udn_from_usn("uuid:ABCD::upnp:rootdevice"),
            Some("uuid:abcd".to_string())
        );
        assert_eq!(udn_from_usn("uuid:abcd"), Some("uuid:abcd".to_string()));
        assert_eq!(udn_from_usn("upnp:rootdevice"), None);
    }
}
