//! MeshUplink (C5) — fallback publisher/subscriber when no local consumer
//! exists (spec §4.5).
//!
//! Grounded on spec §4.5/§6 directly (no teacher precedent: the teacher
//! never talks to the network). Transport is the blocking `tungstenite`
//! client, the synchronous half of the `tokio-tungstenite` stack several
//! pack repos depend on for WebSocket transport, run on its own dedicated
//! `std::thread` to stay uniform with the rest of this crate's concurrency
//! model (see `DESIGN.md`). Plain `ws://` only: the mesh is an internal
//! broadcast uplink (§1 "external service mesh"), not a public endpoint, so
//! no TLS stack is pulled in.

use crate::broker::Broker;
use crate::job::PortEvent;
use crate::router::TO_MAIN;
use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tungstenite::{client, Message, WebSocket};

/// The literal handshake frame sent immediately after connecting (§6).
pub const HANDSHAKE: &str = "webswitch";
/// Fixed retry interval for a publish attempted while disconnected (§4.5).
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// How long a connected socket blocks waiting for an inbound frame before
/// `publish_event` gives up draining and returns control to the caller.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(50);

enum UplinkCommand {
    Publish(PortEvent),
    Shutdown,
}

/// Lazy-reconnecting WebSocket client bridging the process's local Broker to
/// an external service mesh.
pub struct MeshUplink {
    server: Mutex<String>,
    to_io: Sender<UplinkCommand>,
    io_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MeshUplink {
    /// Start the uplink's IO thread and subscribe it to `local_broker`'s
    /// [`TO_MAIN`] sentinel (§4.4 step 4: "the sentinel `to_main` event,
    /// which the MeshUplink picks up"). `server` is the hostname:port
    /// resolved once and cached until [`MeshUplink::reset_address`] is
    /// called (§4.5). Incoming frames with a recognizable `eventName` are
    /// broadcast back onto `local_broker` (§4.5 `onMessage`).
    pub fn new(server: impl Into<String>, local_broker: Broker) -> Arc<MeshUplink> {
        let server = server.into();
        let (to_io, from_caller) = mpsc::channel();

        let uplink = Arc::new(MeshUplink {
            server: Mutex::new(server),
            to_io,
            io_thread: Mutex::new(None),
        });

        let forward_uplink = Arc::clone(&uplink);
        local_broker.on(
            TO_MAIN,
            Arc::new(move |data| match serde_json::from_value::<PortEvent>(data.clone()) {
                Ok(event) => forward_uplink.publish_event(event),
                Err(err) => warn!("mesh uplink received a to_main payload it could not parse as a PortEvent: {err}"),
            }),
        );

        let io_uplink = Arc::clone(&uplink);
        let io_broker = local_broker.clone();
        let handle = thread::Builder::new()
            .name("modelpool-mesh-uplink".to_string())
            .spawn(move || io_loop(io_uplink, from_caller, io_broker))
            .expect("failed to spawn mesh uplink thread");
        *uplink.io_thread.lock().expect("mesh lock poisoned") = Some(handle);

        uplink
    }

    /// Reset the cached server address; the next publish reconnects (§4.5
    /// "caches the address until reset").
    pub fn reset_address(&self, server: impl Into<String>) {
        *self.server.lock().expect("mesh lock poisoned") = server.into();
    }

    /// Publish an event to the mesh. Non-blocking from the caller's
    /// perspective: the event is handed to the IO thread, which retries at
    /// [`RETRY_INTERVAL`] until connected (§4.5). No durable buffering
    /// beyond the in-flight command channel.
    pub fn publish_event(&self, event: PortEvent) {
        if self.to_io.send(UplinkCommand::Publish(event)).is_err() {
            warn!("mesh uplink IO thread is gone; dropping publish");
        }
    }

    /// Stop the IO thread. Blocking; used by tests and graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.to_io.send(UplinkCommand::Shutdown);
        if let Some(handle) = self.io_thread.lock().expect("mesh lock poisoned").take() {
            let _ = handle.join();
        }
    }

    fn current_server(&self) -> String {
        self.server.lock().expect("mesh lock poisoned").clone()
    }
}

fn io_loop(uplink: Arc<MeshUplink>, from_caller: Receiver<UplinkCommand>, local_broker: Broker) {
    let mut socket: Option<WebSocket<TcpStream>> = None;

    loop {
        match from_caller.recv() {
            Err(_) | Ok(UplinkCommand::Shutdown) => {
                debug!("mesh uplink IO thread shutting down");
                break;
            }
            Ok(UplinkCommand::Publish(event)) => {
                let frame = serde_json::to_string(&event).unwrap_or_else(|_| "null".to_string());

                loop {
                    if socket.is_none() {
                        socket = connect_once(&uplink.current_server());
                        if socket.is_none() {
                            thread::sleep(RETRY_INTERVAL);
                            continue;
                        }
                    }

                    let sent = socket
                        .as_mut()
                        .map(|ws| ws.send(Message::Text(frame.clone())))
                        .unwrap_or(Err(tungstenite::Error::ConnectionClosed));

                    match sent {
                        Ok(()) => {
                            drain_incoming(&mut socket, &local_broker);
                            break;
                        }
                        Err(err) => {
                            warn!("mesh uplink publish failed, reconnecting: {err}");
                            socket = None;
                            thread::sleep(RETRY_INTERVAL);
                        }
                    }
                }
            }
        }
    }
}

fn connect_once(server: &str) -> Option<WebSocket<TcpStream>> {
    let stream = match TcpStream::connect(server) {
        Ok(stream) => stream,
        Err(err) => {
            warn!("mesh uplink failed to reach {server}: {err}");
            return None;
        }
    };
    let _ = stream.set_read_timeout(Some(DRAIN_TIMEOUT));

    let url = format!("ws://{server}/");
    match client(url.as_str(), stream) {
        Ok((mut socket, _response)) => {
            if let Err(err) = socket.send(Message::Text(HANDSHAKE.to_string())) {
                error!("mesh uplink handshake failed: {err}");
                return None;
            }
            info!("mesh uplink connected to {server}");
            Some(socket)
        }
        Err(err) => {
            warn!("mesh uplink handshake with {server} failed: {err}");
            None
        }
    }
}

/// Drain at most one queued inbound message without blocking beyond
/// [`DRAIN_TIMEOUT`]. A parsed frame carrying a recognizable `eventName` is
/// broadcast onto the local observer (§4.5 `onMessage`); one lacking it is
/// dropped rather than forced through the broadcast sentinel, since the
/// mesh's own wire format (§6) makes no missing-eventName guarantee.
fn drain_incoming(socket: &mut Option<WebSocket<TcpStream>>, local_broker: &Broker) {
    let Some(ws) = socket.as_mut() else { return };
    match ws.read() {
        Ok(Message::Text(text)) => {
            if let Ok(event) = serde_json::from_str::<PortEvent>(&text) {
                if let Some(name) = event.event_name.clone() {
                    local_broker.notify(&name, &event.data);
                }
            }
        }
        Ok(_) => {}
        Err(tungstenite::Error::Io(err)) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {}
        Err(err) => {
            warn!("mesh uplink lost connection while draining: {err}");
            *socket = None;
        }
    }
}
