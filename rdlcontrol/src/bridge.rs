//! The control façade.
//!
//! One actor task owns every piece of mutable state: the device registry, the
//! host-file service handle, the path counter. Discovery events, control
//! requests, worker completions and timers all arrive as messages on its
//! channel, which gives the total ordering the rest of the crate relies on.
//! SOAP I/O happens in detached workers that only ever talk back through
//! messages, so no completion runs inside a transport callback.

use std::time::Duration;

use crossbeam_channel::Receiver;
use rdlhost::HostService;
use rdlupnp::gena::{GenaClient, NotifySink, Subscription};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::{CurrentTask, Device, run_task};
use crate::discovery::DiscoveryEvent;
use crate::errors::ControlError;
use crate::events::{BridgeEvent, BridgeEventBus};
use crate::registry::DeviceRegistry;
use crate::task::{ControlRequest, TaskEnvelope, TaskKind, TaskOutcome, TaskReply};

/// Root under which discovered renderers are published.
pub const PATH_ROOT: &str = "/org/renderlink/server";

/// Debounce before re-establishing subscriptions after a context loss, so a
/// replacement context can settle first.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Subscription duration requested from devices.
const GENA_TIMEOUT_SECS: u32 = 1800;

enum Command {
    Control(ControlRequest),
    Discovery(DiscoveryEvent),
    TaskComplete {
        udn: String,
        generation: u64,
        outcome: TaskOutcome,
    },
    /// Deferred completion for requests that never reached a device.
    Deliver {
        envelope: TaskEnvelope,
        error: ControlError,
    },
    Subscribed {
        udn: String,
        iface_ip: String,
        av: Option<Subscription>,
        cm: Option<Subscription>,
    },
    Resubscribe {
        udn: String,
    },
    ClientLost {
        client: String,
    },
    ServerIds {
        reply: oneshot::Sender<Vec<String>>,
    },
    Shutdown,
}

/// Handle to the façade actor. Cheap to clone.
#[derive(Clone)]
pub struct RendererBridge {
    tx: mpsc::UnboundedSender<Command>,
    events: BridgeEventBus,
}

impl RendererBridge {
    /// Start the façade actor on the current runtime.
    pub async fn spawn() -> (Self, JoinHandle<()>) {
        let http = reqwest::Client::new();

        let notify = match NotifySink::bind().await {
            Ok(sink) => Some(sink),
            Err(e) => {
                warn!("failed to bind the GENA notify sink: {}", e);
                None
            }
        };

        let interfaces: Vec<String> = get_if_addrs::get_if_addrs()
            .map(|ifaces| ifaces.iter().map(|iface| iface.ip().to_string()).collect())
            .unwrap_or_default();

        let (tx, rx) = mpsc::unbounded_channel();
        let events = BridgeEventBus::new();

        let actor = BridgeActor {
            rx,
            tx: tx.clone(),
            registry: DeviceRegistry::new(),
            host: HostService::new(),
            gena: GenaClient::new(http.clone()),
            http,
            notify,
            counter: 0,
            events: events.clone(),
            interfaces,
        };

        let handle = tokio::spawn(actor.run());

        (Self { tx, events }, handle)
    }

    /// Submit a control request. Its completion arrives on the request's
    /// reply slot, always asynchronously.
    pub fn submit(&self, request: ControlRequest) {
        let _ = self.tx.send(Command::Control(request));
    }

    /// Convenience wrapper around [`submit`](Self::submit).
    pub fn request(
        &self,
        path: impl Into<String>,
        sender: impl Into<String>,
        kind: TaskKind,
        cancel: CancellationToken,
    ) -> oneshot::Receiver<TaskReply> {
        let (request, rx) = ControlRequest::new(path, sender, kind, cancel);
        self.submit(request);
        rx
    }

    pub fn notify_discovery(&self, event: DiscoveryEvent) {
        let _ = self.tx.send(Command::Discovery(event));
    }

    /// A bus client disconnected: release every file it had hosted.
    pub fn client_lost(&self, client: &str) {
        let _ = self.tx.send(Command::ClientLost {
            client: client.to_string(),
        });
    }

    /// Currently published renderer paths, unordered.
    pub async fn server_ids(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::ServerIds { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Found/lost notifications.
    pub fn events(&self) -> Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

struct BridgeActor {
    rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::UnboundedSender<Command>,
    registry: DeviceRegistry,
    host: HostService,
    gena: GenaClient,
    http: reqwest::Client,
    notify: Option<NotifySink>,
    counter: u32,
    events: BridgeEventBus,
    /// Local interface addresses captured at startup, used to sanity-check
    /// the attribution of discovery events.
    interfaces: Vec<String>,
}

impl BridgeActor {
    async fn run(mut self) {
        info!(
            "renderer bridge ready ({} local interfaces)",
            self.interfaces.len()
        );

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Control(request) => self.handle_control(request),
                Command::Discovery(event) => self.handle_discovery(event),
                Command::TaskComplete {
                    udn,
                    generation,
                    outcome,
                } => self.handle_task_complete(&udn, generation, outcome),
                Command::Deliver { envelope, error } => envelope.complete(Err(error)),
                Command::Subscribed {
                    udn,
                    iface_ip,
                    av,
                    cm,
                } => self.handle_subscribed(&udn, &iface_ip, av, cm),
                Command::Resubscribe { udn } => self.handle_resubscribe(&udn),
                Command::ClientLost { client } => {
                    debug!("bus client {} lost", client);
                    self.host.lost_client(&client).await;
                }
                Command::ServerIds { reply } => {
                    let _ = reply.send(self.registry.paths());
                }
                Command::Shutdown => break,
            }
        }

        self.teardown().await;
    }

    fn handle_control(&mut self, request: ControlRequest) {
        let Some(udn) = self.registry.udn_for_path(&request.path).cloned() else {
            let envelope = TaskEnvelope::from(request);
            let error = ControlError::ObjectNotFound(
                "cannot locate a device for the specified object".to_string(),
            );
            // Callers rely on asynchronous semantics: completion is posted to
            // our own queue, never delivered from inside submit().
            let _ = self.tx.send(Command::Deliver { envelope, error });
            return;
        };

        let device = self
            .registry
            .get_mut(&udn)
            .expect("path index points at a live device");

        if device.is_busy() {
            device.pending.push_back(request);
            return;
        }

        self.start_task(&udn, request);
    }

    /// Bind a request to the device and launch its worker. At most one task
    /// is in flight per device; the envelope stays in the device slot and the
    /// worker reports the outcome as a message.
    fn start_task(&mut self, udn: &str, request: ControlRequest) {
        let tx = self.tx.clone();
        let host = self.host.clone();

        let Some(device) = self.registry.get_mut(udn) else {
            let envelope = TaskEnvelope::from(request);
            let error = ControlError::ObjectNotFound(
                "cannot locate a device for the specified object".to_string(),
            );
            let _ = tx.send(Command::Deliver { envelope, error });
            return;
        };

        let envelope = TaskEnvelope::from(request);

        device.generation += 1;
        let generation = device.generation;

        let context = &device.contexts[0];
        let avtransport = context.avtransport.clone();
        let connection_manager = context.connection_manager.clone();
        let iface_ip = context.ip_address.clone();
        let snapshot = device.cache_snapshot();

        let kind = envelope.kind.clone();
        let sender = envelope.sender.clone();
        let cancel = envelope.cancel.clone();
        let udn_owned = udn.to_string();

        let worker = tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => TaskOutcome::Failed(ControlError::Cancelled),
                outcome = run_task(
                    kind,
                    avtransport,
                    connection_manager,
                    snapshot,
                    host,
                    sender,
                    iface_ip,
                ) => outcome,
            };
            let _ = tx.send(Command::TaskComplete {
                udn: udn_owned,
                generation,
                outcome,
            });
        });

        device.current_task = Some(CurrentTask {
            envelope,
            generation,
            abort: worker.abort_handle(),
        });
    }

    fn handle_task_complete(&mut self, udn: &str, generation: u64, outcome: TaskOutcome) {
        let Some(device) = self.registry.get_mut(udn) else {
            // The device was torn down mid-flight; its envelope has already
            // been completed through the lost-object path.
            debug!("completion for vanished device {}", udn);
            return;
        };

        let Some(current) = device.current_task.take() else {
            debug!("stale completion for {}", udn);
            return;
        };

        if current.generation != generation {
            device.current_task = Some(current);
            return;
        }

        let reply = match outcome {
            TaskOutcome::Done { value, cache } => {
                device.apply_cache(cache);
                Ok(value)
            }
            TaskOutcome::Failed(error) => Err(error),
        };

        current.envelope.complete(reply);

        if let Some(next) = device.pending.pop_front() {
            self.start_task(udn, next);
        }
    }

    fn handle_discovery(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Available {
                description,
                iface_ip,
            } => self.handle_available(description, &iface_ip),
            DiscoveryEvent::Unavailable { udn, iface_ip } => {
                self.handle_unavailable(&udn, &iface_ip)
            }
        }
    }

    fn handle_available(
        &mut self,
        description: rdlupnp::description::RendererDescription,
        iface_ip: &str,
    ) {
        if !self.interfaces.is_empty() && !self.interfaces.iter().any(|ip| ip == iface_ip) {
            debug!("{} is not a local interface address, keeping anyway", iface_ip);
        }

        let udn = description.udn.clone();

        if let Some(device) = self.registry.get_mut(&udn) {
            if device.context_index(iface_ip).is_none() {
                debug!("adding context {} to {}", iface_ip, udn);
                device.append_context(&description, iface_ip, &self.http);
            }
            return;
        }

        let path = format!("{}/{}", PATH_ROOT, self.counter);
        self.counter += 1;

        info!("renderer {} found on {}, published at {}", udn, iface_ip, path);

        let device = Device::new(&description, iface_ip, path.clone(), &self.http);
        self.spawn_subscribe(&device, iface_ip);
        self.registry.insert(device);

        self.events.broadcast(BridgeEvent::RendererFound { path });
    }

    fn handle_unavailable(&mut self, udn: &str, iface_ip: &str) {
        let Some(device) = self.registry.get_mut(udn) else {
            warn!("unavailable event for unknown device {}, ignoring", udn);
            return;
        };

        let Some(index) = device.context_index(iface_ip) else {
            return;
        };

        // The resubscribe decision is made on the flags of the context being
        // removed, captured before it goes away.
        let removed = device.contexts.remove(index);
        let had_subscriptions = removed.has_subscriptions();

        if !device.contexts.is_empty() {
            if had_subscriptions && device.resubscribe_timer.is_none() {
                debug!("context {} of {} lost, scheduling resubscribe", iface_ip, udn);

                let tx = self.tx.clone();
                let udn_owned = udn.to_string();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    let _ = tx.send(Command::Resubscribe { udn: udn_owned });
                });
                device.resubscribe_timer = Some(timer.abort_handle());
            }
            return;
        }

        info!("last context of {} lost, deleting device", udn);

        let mut device = self
            .registry
            .remove(udn)
            .expect("device was just looked up");

        if let Some(timer) = device.resubscribe_timer.take() {
            timer.abort();
        }

        let lost_error = || {
            ControlError::ObjectNotFound(
                "cannot locate a device for the specified object".to_string(),
            )
        };

        // The in-flight task is told its object vanished before the lost
        // notification goes out.
        if let Some(current) = device.current_task.take() {
            current.abort.abort();
            current.envelope.complete(Err(lost_error()));
        }

        while let Some(waiting) = device.pending.pop_front() {
            TaskEnvelope::from(waiting).complete(Err(lost_error()));
        }

        self.events.broadcast(BridgeEvent::RendererLost {
            path: device.path.clone(),
        });
    }

    fn handle_subscribed(
        &mut self,
        udn: &str,
        iface_ip: &str,
        av: Option<Subscription>,
        cm: Option<Subscription>,
    ) {
        let Some(device) = self.registry.get_mut(udn) else {
            return;
        };
        let Some(index) = device.context_index(iface_ip) else {
            return;
        };

        let context = &mut device.contexts[index];
        if let Some(subscription) = av {
            debug!("AVTransport subscription {} on {}", subscription.sid, iface_ip);
            context.subscribed_av = true;
            context.av_sid = Some(subscription.sid);
        }
        if let Some(subscription) = cm {
            debug!(
                "ConnectionManager subscription {} on {}",
                subscription.sid, iface_ip
            );
            context.subscribed_cm = true;
            context.cm_sid = Some(subscription.sid);
        }
    }

    fn handle_resubscribe(&mut self, udn: &str) {
        let Some(device) = self.registry.get_mut(udn) else {
            return;
        };

        // Clear the timer slot before resubscribing, a later context loss may
        // need to schedule again.
        device.resubscribe_timer = None;

        let iface_ip = device.contexts[0].ip_address.clone();
        let device = self.registry.get(udn).expect("device still present");
        self.spawn_subscribe(device, &iface_ip);
    }

    /// Establish GENA subscriptions for the context of `device` on
    /// `iface_ip`. Results come back as a message; failures leave the
    /// subscription flags untouched.
    fn spawn_subscribe(&self, device: &Device, iface_ip: &str) {
        let Some(index) = device.context_index(iface_ip) else {
            return;
        };

        let Some(notify) = &self.notify else {
            debug!("no notify sink, skipping subscriptions for {}", device.udn);
            return;
        };

        let context = &device.contexts[index];
        let callback = notify.callback_url(iface_ip);
        let av_url = context.av_event_url.clone();
        let cm_url = context.cm_event_url.clone();
        let gena = self.gena.clone();
        let tx = self.tx.clone();
        let udn = device.udn.clone();
        let iface = iface_ip.to_string();

        tokio::spawn(async move {
            let av = match &av_url {
                Some(url) => match gena.subscribe(url, &callback, GENA_TIMEOUT_SECS).await {
                    Ok(subscription) => Some(subscription),
                    Err(e) => {
                        warn!("AVTransport subscription failed for {}: {}", udn, e);
                        None
                    }
                },
                None => None,
            };

            let cm = match &cm_url {
                Some(url) => match gena.subscribe(url, &callback, GENA_TIMEOUT_SECS).await {
                    Ok(subscription) => Some(subscription),
                    Err(e) => {
                        warn!("ConnectionManager subscription failed for {}: {}", udn, e);
                        None
                    }
                },
                None => None,
            };

            let _ = tx.send(Command::Subscribed {
                udn,
                iface_ip: iface,
                av,
                cm,
            });
        });
    }

    async fn teardown(self) {
        // Best-effort GENA teardown; devices expire subscriptions on their
        // own once the timeout lapses.
        for device in self.registry.iter() {
            for context in &device.contexts {
                if context.subscribed_av {
                    if let (Some(url), Some(sid)) = (&context.av_event_url, &context.av_sid) {
                        let gena = self.gena.clone();
                        let url = url.clone();
                        let sid = sid.clone();
                        tokio::spawn(async move {
                            let _ = gena.unsubscribe(&url, &sid).await;
                        });
                    }
                }
                if context.subscribed_cm {
                    if let (Some(url), Some(sid)) = (&context.cm_event_url, &context.cm_sid) {
                        let gena = self.gena.clone();
                        let url = url.clone();
                        let sid = sid.clone();
                        tokio::spawn(async move {
                            let _ = gena.unsubscribe(&url, &sid).await;
                        });
                    }
                }
            }
        }

        self.host.shutdown().await;

        if let Some(notify) = &self.notify {
            notify.close();
        }

        info!("renderer bridge stopped");
    }
}
