//! Device objects: one per discovered renderer UDN.
//!
//! A device owns the contexts it was seen on (one per local interface), a
//! cached view of its properties, at most one in-flight task and the queue of
//! requests waiting behind it.

use std::collections::VecDeque;

use rdlhost::HostService;
use rdlupnp::description::RendererDescription;
use serde_json::{Map, Value, json};
use tokio::task::AbortHandle;

use crate::avtransport::{
    AvTransportClient, PositionInfo, TransportInfo, format_track_time, parse_track_time,
};
use crate::connection_manager::ConnectionManagerClient;
use crate::errors::ControlError;
use crate::task::{ControlRequest, TaskEnvelope, TaskKind, TaskOutcome};

/// Interface names of the published bus surface.
pub const IFACE_DEVICE: &str = "org.renderlink.RendererDevice";
pub const IFACE_PLAYER: &str = "org.renderlink.Player";
pub const IFACE_PUSH_HOST: &str = "org.renderlink.PushHost";

/// The pairing of a device with one local network interface, carrying the
/// service clients bound to the endpoints announced on that path.
pub struct Context {
    pub ip_address: String,
    pub avtransport: AvTransportClient,
    pub av_event_url: Option<String>,
    pub connection_manager: Option<ConnectionManagerClient>,
    pub cm_event_url: Option<String>,
    pub subscribed_av: bool,
    pub av_sid: Option<String>,
    pub subscribed_cm: bool,
    pub cm_sid: Option<String>,
}

impl Context {
    pub fn from_description(
        description: &RendererDescription,
        iface_ip: &str,
        http: &reqwest::Client,
    ) -> Self {
        let avtransport = AvTransportClient::new(
            http.clone(),
            description.avtransport.control_url.clone(),
            description.avtransport.service_type.clone(),
        );

        let connection_manager = description.connection_manager.as_ref().map(|cm| {
            ConnectionManagerClient::new(http.clone(), cm.control_url.clone(), cm.service_type.clone())
        });

        Self {
            ip_address: iface_ip.to_string(),
            av_event_url: description.avtransport.event_url.clone(),
            cm_event_url: description
                .connection_manager
                .as_ref()
                .and_then(|cm| cm.event_url.clone()),
            avtransport,
            connection_manager,
            subscribed_av: false,
            av_sid: None,
            subscribed_cm: false,
            cm_sid: None,
        }
    }

    pub fn has_subscriptions(&self) -> bool {
        self.subscribed_av || self.subscribed_cm
    }
}

/// The in-flight task of a device. The envelope stays here, under façade
/// ownership; the worker only computes the outcome.
pub(crate) struct CurrentTask {
    pub envelope: TaskEnvelope,
    pub generation: u64,
    pub abort: AbortHandle,
}

/// Cached property state answering the read side of the bus surface.
pub(crate) struct PropertyCache {
    /// Identity properties captured from the description at first sight.
    pub static_props: Map<String, Value>,
    /// Last observed raw transport state ("STOPPED", "PLAYING", ...).
    pub transport_state: String,
    /// Playback rate requested through the bus, used as the Play speed.
    pub rate: f64,
}

/// Owned snapshot of the cache handed to a task worker.
#[derive(Clone)]
pub(crate) struct CacheSnapshot {
    pub static_props: Map<String, Value>,
    pub transport_state: String,
    pub rate: f64,
}

/// Cache mutations reported back by a completed task.
#[derive(Default)]
pub(crate) struct CacheUpdate {
    pub transport_state: Option<String>,
    pub rate: Option<f64>,
}

pub struct Device {
    pub udn: String,
    /// Published object path, unique for the lifetime of the process.
    pub path: String,
    /// Non-empty while the device exists.
    pub contexts: Vec<Context>,
    pub(crate) current_task: Option<CurrentTask>,
    pub(crate) pending: VecDeque<ControlRequest>,
    /// Pending deferred resubscribe, cleared before the resubscribe runs.
    pub(crate) resubscribe_timer: Option<AbortHandle>,
    pub(crate) generation: u64,
    pub(crate) cache: PropertyCache,
}

impl Device {
    pub(crate) fn new(
        description: &RendererDescription,
        iface_ip: &str,
        path: String,
        http: &reqwest::Client,
    ) -> Self {
        let mut static_props = Map::new();
        static_props.insert("DeviceType".to_string(), json!(description.device_type));
        static_props.insert("UDN".to_string(), json!(description.udn));
        static_props.insert("FriendlyName".to_string(), json!(description.friendly_name));
        static_props.insert("Manufacturer".to_string(), json!(description.manufacturer));
        static_props.insert("ModelName".to_string(), json!(description.model_name));

        Self {
            udn: description.udn.clone(),
            path,
            contexts: vec![Context::from_description(description, iface_ip, http)],
            current_task: None,
            pending: VecDeque::new(),
            resubscribe_timer: None,
            generation: 0,
            cache: PropertyCache {
                static_props,
                transport_state: "STOPPED".to_string(),
                rate: 1.0,
            },
        }
    }

    pub fn context_index(&self, iface_ip: &str) -> Option<usize> {
        self.contexts
            .iter()
            .position(|ctx| ctx.ip_address == iface_ip)
    }

    pub(crate) fn append_context(
        &mut self,
        description: &RendererDescription,
        iface_ip: &str,
        http: &reqwest::Client,
    ) {
        self.contexts
            .push(Context::from_description(description, iface_ip, http));
    }

    pub fn is_busy(&self) -> bool {
        self.current_task.is_some()
    }

    pub(crate) fn cache_snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            static_props: self.cache.static_props.clone(),
            transport_state: self.cache.transport_state.clone(),
            rate: self.cache.rate,
        }
    }

    pub(crate) fn apply_cache(&mut self, update: CacheUpdate) {
        if let Some(state) = update.transport_state {
            self.cache.transport_state = state;
        }
        if let Some(rate) = update.rate {
            self.cache.rate = rate;
        }
    }
}

/// Executes one task against the clients of the chosen context.
///
/// Runs detached from the registry: everything it needs travels by value, and
/// the result goes back to the façade loop as a completion message.
pub(crate) async fn run_task(
    kind: TaskKind,
    avtransport: AvTransportClient,
    connection_manager: Option<ConnectionManagerClient>,
    snapshot: CacheSnapshot,
    host: HostService,
    sender: String,
    iface_ip: String,
) -> TaskOutcome {
    match kind {
        TaskKind::Play => simple(avtransport.play(&play_speed(snapshot.rate)).await),
        TaskKind::Pause => simple(avtransport.pause().await),
        TaskKind::PlayPause => {
            // Choose from the last state we saw; renderers keep their own
            // idea of a toggle out of the protocol.
            if snapshot.transport_state == "PLAYING" {
                simple(avtransport.pause().await)
            } else {
                simple(avtransport.play(&play_speed(snapshot.rate)).await)
            }
        }
        TaskKind::Stop => simple(avtransport.stop().await),
        TaskKind::Next => simple(avtransport.next().await),
        TaskKind::Previous => simple(avtransport.previous().await),
        TaskKind::OpenUri { uri } => simple(avtransport.set_av_transport_uri(&uri, "").await),
        TaskKind::Seek { offset } => {
            let position = match avtransport.get_position_info().await {
                Ok(position) => position,
                Err(e) => return TaskOutcome::Failed(e),
            };
            let current = parse_track_time(&position.rel_time).unwrap_or(0);
            let target = (current + offset).max(0);
            simple(avtransport.seek_rel_time(&format_track_time(target)).await)
        }
        TaskKind::SetPosition { position } => {
            if position < 0 {
                return TaskOutcome::Failed(ControlError::Transport(
                    "position must not be negative".to_string(),
                ));
            }
            simple(avtransport.seek_rel_time(&format_track_time(position)).await)
        }
        TaskKind::GetProp { interface, prop } => {
            get_prop(&interface, &prop, &avtransport, &connection_manager, &snapshot).await
        }
        TaskKind::GetAllProps { interface } => {
            get_all_props(&interface, &avtransport, &connection_manager, &snapshot).await
        }
        TaskKind::SetProp {
            interface,
            prop,
            value,
        } => set_prop(&interface, &prop, value),
        TaskKind::HostUri { file_path } => {
            match host.add(&iface_ip, &sender, &file_path).await {
                Ok(url) => TaskOutcome::Done {
                    value: json!(url),
                    cache: CacheUpdate::default(),
                },
                Err(e) => TaskOutcome::Failed(e.into()),
            }
        }
        TaskKind::RemoveUri { file_path } => {
            let removed = host.remove(&iface_ip, &sender, &file_path).await;
            TaskOutcome::Done {
                value: json!(removed),
                cache: CacheUpdate::default(),
            }
        }
    }
}

fn simple(result: Result<(), ControlError>) -> TaskOutcome {
    match result {
        Ok(()) => TaskOutcome::Done {
            value: Value::Null,
            cache: CacheUpdate::default(),
        },
        Err(e) => TaskOutcome::Failed(e),
    }
}

async fn get_prop(
    interface: &str,
    prop: &str,
    avtransport: &AvTransportClient,
    connection_manager: &Option<ConnectionManagerClient>,
    snapshot: &CacheSnapshot,
) -> TaskOutcome {
    // Property reads refresh the transport state before answering.
    let info = match avtransport.get_transport_info().await {
        Ok(info) => info,
        Err(e) => return TaskOutcome::Failed(e),
    };

    let position = if needs_position(prop) {
        match avtransport.get_position_info().await {
            Ok(position) => Some(position),
            Err(e) => return TaskOutcome::Failed(e),
        }
    } else {
        None
    };

    let mime_types = if prop == "SupportedMimeTypes" {
        match fetch_sink_mime_types(connection_manager).await {
            Ok(mimes) => mimes,
            Err(e) => return TaskOutcome::Failed(e),
        }
    } else {
        None
    };

    match prop_value(interface, prop, snapshot, &info, position.as_ref(), &mime_types) {
        Ok(value) => TaskOutcome::Done {
            value,
            cache: CacheUpdate {
                transport_state: Some(info.current_transport_state),
                ..CacheUpdate::default()
            },
        },
        Err(e) => TaskOutcome::Failed(e),
    }
}

async fn get_all_props(
    interface: &str,
    avtransport: &AvTransportClient,
    connection_manager: &Option<ConnectionManagerClient>,
    snapshot: &CacheSnapshot,
) -> TaskOutcome {
    let wants_device = interface.is_empty() || interface == IFACE_DEVICE;
    let wants_player = interface.is_empty() || interface == IFACE_PLAYER;

    if interface == IFACE_PUSH_HOST {
        // The hosting interface exposes methods only.
        return TaskOutcome::Done {
            value: Value::Object(Map::new()),
            cache: CacheUpdate::default(),
        };
    }

    if !wants_device && !wants_player {
        return TaskOutcome::Failed(ControlError::ObjectNotFound(format!(
            "unknown interface {}",
            interface
        )));
    }

    let info = match avtransport.get_transport_info().await {
        Ok(info) => info,
        Err(e) => return TaskOutcome::Failed(e),
    };

    let mut props = Map::new();

    if wants_device {
        for (key, value) in &snapshot.static_props {
            props.insert(key.clone(), value.clone());
        }

        if let Ok(Some(mimes)) = fetch_sink_mime_types(connection_manager).await {
            props.insert("SupportedMimeTypes".to_string(), json!(mimes));
        }
    }

    if wants_player {
        let position = match avtransport.get_position_info().await {
            Ok(position) => position,
            Err(e) => return TaskOutcome::Failed(e),
        };

        props.insert(
            "PlaybackStatus".to_string(),
            json!(playback_status(&info.current_transport_state)),
        );
        props.insert("Rate".to_string(), json!(snapshot.rate));
        props.insert("MinimumRate".to_string(), json!(1.0));
        props.insert("MaximumRate".to_string(), json!(1.0));
        for capability in [
            "CanPlay",
            "CanPause",
            "CanSeek",
            "CanControl",
            "CanGoNext",
            "CanGoPrevious",
        ] {
            props.insert(capability.to_string(), json!(true));
        }
        props.insert(
            "Position".to_string(),
            json!(parse_track_time(&position.rel_time).unwrap_or(0)),
        );
        props.insert("Metadata".to_string(), json!(position.track_metadata));
    }

    TaskOutcome::Done {
        value: Value::Object(props),
        cache: CacheUpdate {
            transport_state: Some(info.current_transport_state),
            ..CacheUpdate::default()
        },
    }
}

fn set_prop(interface: &str, prop: &str, value: Value) -> TaskOutcome {
    let on_player = interface.is_empty() || interface == IFACE_PLAYER;

    if on_player && prop == "Rate" {
        return match value.as_f64() {
            Some(rate) if rate > 0.0 => TaskOutcome::Done {
                value: Value::Null,
                cache: CacheUpdate {
                    rate: Some(rate),
                    ..CacheUpdate::default()
                },
            },
            _ => TaskOutcome::Failed(ControlError::Transport(
                "Rate must be a positive number".to_string(),
            )),
        };
    }

    // Everything else on this surface is read-only.
    TaskOutcome::Failed(ControlError::ObjectNotFound(format!(
        "no writable property {}.{}",
        interface, prop
    )))
}

async fn fetch_sink_mime_types(
    connection_manager: &Option<ConnectionManagerClient>,
) -> Result<Option<Vec<String>>, ControlError> {
    match connection_manager {
        Some(cm) => Ok(Some(cm.get_protocol_info().await?.sink_mime_types())),
        None => Ok(None),
    }
}

fn needs_position(prop: &str) -> bool {
    prop == "Position" || prop == "Metadata"
}

fn prop_value(
    interface: &str,
    prop: &str,
    snapshot: &CacheSnapshot,
    info: &TransportInfo,
    position: Option<&PositionInfo>,
    mime_types: &Option<Vec<String>>,
) -> Result<Value, ControlError> {
    if interface.is_empty() || interface == IFACE_DEVICE {
        if let Some(value) = device_prop(prop, snapshot, mime_types) {
            return Ok(value);
        }
    }

    if interface.is_empty() || interface == IFACE_PLAYER {
        if let Some(value) = player_prop(prop, snapshot, info, position) {
            return Ok(value);
        }
    }

    Err(ControlError::ObjectNotFound(format!(
        "unknown property {}.{}",
        interface, prop
    )))
}

fn device_prop(
    prop: &str,
    snapshot: &CacheSnapshot,
    mime_types: &Option<Vec<String>>,
) -> Option<Value> {
    if prop == "SupportedMimeTypes" {
        return mime_types.as_ref().map(|mimes| json!(mimes));
    }

    snapshot.static_props.get(prop).cloned()
}

fn player_prop(
    prop: &str,
    snapshot: &CacheSnapshot,
    info: &TransportInfo,
    position: Option<&PositionInfo>,
) -> Option<Value> {
    match prop {
        "PlaybackStatus" => Some(json!(playback_status(&info.current_transport_state))),
        "Rate" => Some(json!(snapshot.rate)),
        "MinimumRate" | "MaximumRate" => Some(json!(1.0)),
        "CanPlay" | "CanPause" | "CanSeek" | "CanControl" | "CanGoNext" | "CanGoPrevious" => {
            Some(json!(true))
        }
        "Position" => Some(json!(
            position.and_then(|p| parse_track_time(&p.rel_time)).unwrap_or(0)
        )),
        "Metadata" => Some(json!(
            position.map(|p| p.track_metadata.clone()).unwrap_or_default()
        )),
        _ => None,
    }
}

/// UPnP transport states folded onto the three-valued player status.
fn playback_status(transport_state: &str) -> &'static str {
    match transport_state {
        "PLAYING" | "TRANSITIONING" => "Playing",
        "PAUSED_PLAYBACK" | "PAUSED_RECORDING" => "Paused",
        _ => "Stopped",
    }
}

/// The Speed argument of Play for a given playback rate.
fn play_speed(rate: f64) -> String {
    if rate.fract() == 0.0 {
        format!("{}", rate as i64)
    } else {
        format!("{}", rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport_info(state: &str) -> TransportInfo {
        TransportInfo {
            current_transport_state: state.to_string(),
            current_transport_status: "OK".to_string(),
            current_speed: "1".to_string(),
        }
    }

    fn position_info(rel_time: &str) -> PositionInfo {
        PositionInfo {
            track: 1,
            track_duration: "0:04:00".to_string(),
            track_metadata: "<DIDL-Lite/>".to_string(),
            rel_time: rel_time.to_string(),
            abs_time: "NOT_IMPLEMENTED".to_string(),
        }
    }

    fn snapshot() -> CacheSnapshot {
        let mut static_props = Map::new();
        static_props.insert("FriendlyName".to_string(), json!("Living Room"));
        CacheSnapshot {
            static_props,
            transport_state: "STOPPED".to_string(),
            rate: 1.0,
        }
    }

    #[test]
    fn playback_status_mapping() {
        assert_eq!(playback_status("PLAYING"), "Playing");
        assert_eq!(playback_status("TRANSITIONING"), "Playing");
        assert_eq!(playback_status("PAUSED_PLAYBACK"), "Paused");
        assert_eq!(playback_status("STOPPED"), "Stopped");
        assert_eq!(playback_status("NO_MEDIA_PRESENT"), "Stopped");
    }

    #[test]
    fn play_speed_formats() {
        assert_eq!(play_speed(1.0), "1");
        assert_eq!(play_speed(2.0), "2");
        assert_eq!(play_speed(0.5), "0.5");
    }

    #[test]
    fn player_props_are_computed_from_fresh_state() {
        let info = transport_info("PLAYING");
        let position = position_info("0:01:30");

        let value = prop_value(
            IFACE_PLAYER,
            "PlaybackStatus",
            &snapshot(),
            &info,
            Some(&position),
            &None,
        )
        .unwrap();
        assert_eq!(value, json!("Playing"));

        let value =
            prop_value(IFACE_PLAYER, "Position", &snapshot(), &info, Some(&position), &None)
                .unwrap();
        assert_eq!(value, json!(90_000_000));
    }

    #[test]
    fn device_props_answer_from_the_cache() {
        let info = transport_info("STOPPED");
        let value = prop_value(IFACE_DEVICE, "FriendlyName", &snapshot(), &info, None, &None)
            .unwrap();
        assert_eq!(value, json!("Living Room"));

        // Empty interface searches all interfaces.
        let value = prop_value("", "FriendlyName", &snapshot(), &info, None, &None).unwrap();
        assert_eq!(value, json!("Living Room"));
    }

    #[test]
    fn unknown_property_is_object_not_found() {
        let info = transport_info("STOPPED");
        let err = prop_value(IFACE_PLAYER, "Shuffle", &snapshot(), &info, None, &None).unwrap_err();
        assert!(matches!(err, ControlError::ObjectNotFound(_)));
    }

    #[test]
    fn rate_is_the_only_writable_property() {
        match set_prop(IFACE_PLAYER, "Rate", json!(2.0)) {
            TaskOutcome::Done { cache, .. } => assert_eq!(cache.rate, Some(2.0)),
            TaskOutcome::Failed(e) => panic!("unexpected failure: {}", e),
        }

        match set_prop(IFACE_PLAYER, "Rate", json!("fast")) {
            TaskOutcome::Failed(ControlError::Transport(_)) => {}
            _ => panic!("expected a transport error"),
        }

        match set_prop(IFACE_PLAYER, "PlaybackStatus", json!("Playing")) {
            TaskOutcome::Failed(ControlError::ObjectNotFound(_)) => {}
            _ => panic!("expected ObjectNotFound"),
        }
    }
}
