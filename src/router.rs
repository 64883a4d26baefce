//! PortEventRouter (C4) — per-pool broadcast wiring between local producers
//! and local/remote consumers (spec §4.4).
//!
//! No teacher precedent exists for pub/sub routing (the teacher is a file
//! deduplication tool); this module is grounded directly on spec §4.4 plus
//! `DanDo385-rust-edu/labs/33-message-bus` for the topic-keyed-channel shape
//! that [`crate::broadcast::BroadcastChannel`] already borrows from, and on
//! the teacher's own `serde_json` round-trip pattern for the deep-copy
//! boundary (§4.4.1).

use crate::broadcast::BroadcastChannel;
use crate::broker::Broker;
use crate::error::RouterError;
use crate::job::PortEvent;
use itertools::Itertools;
use log::{error, info, warn};
use std::sync::mpsc::Receiver;
use std::thread;

/// Direction of a [`Port`], mirroring spec §3's `type ∈ {inbound, outbound}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Inbound,
    Outbound,
}

/// A declared inbound/outbound event interface on a model (spec §3).
#[derive(Debug, Clone)]
pub struct Port {
    pub model_name: String,
    pub service: String,
    pub direction: PortDirection,
    pub consumes_event: Option<String>,
    pub produces_event: Option<String>,
}

impl Port {
    pub fn new(model_name: impl Into<String>, service: impl Into<String>, direction: PortDirection) -> Self {
        Port {
            model_name: model_name.into(),
            service: service.into(),
            direction,
            consumes_event: None,
            produces_event: None,
        }
    }

    pub fn consuming(mut self, event: impl Into<String>) -> Self {
        self.consumes_event = Some(event.into());
        self
    }

    pub fn producing(mut self, event: impl Into<String>) -> Self {
        self.produces_event = Some(event.into());
        self
    }
}

/// A port's classification relative to one pool, per §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortClass {
    Local,
    Publish,
    Subscribe,
    Unhandled,
}

/// Sentinel event used when a broadcast message lacks an `eventName` (§4.4
/// step 3, §6).
pub const MISSING_EVENT_NAME: &str = "missingEventName";
/// Sentinel event an UnhandledPort's produced events are forwarded to,
/// picked up by the [`crate::mesh::MeshUplink`] (§4.4 step 4, §6).
pub const TO_MAIN: &str = "to_main";

/// Wires one pool's local broker to the sibling broadcast channels and the
/// mesh, per the classification and wiring algorithm in §4.4.
pub struct PortEventRouter {
    owning_model: String,
    local_broker: Broker,
    channels: BroadcastChannel,
}

impl PortEventRouter {
    pub fn new(owning_model: impl Into<String>, local_broker: Broker, channels: BroadcastChannel) -> Self {
        PortEventRouter {
            owning_model: owning_model.into(),
            local_broker,
            channels,
        }
    }

    /// Classify every port in `deployment` relative to this pool's model
    /// (§4.4's LocalPorts/RemotePorts/PublishPorts/SubscribePorts/
    /// UnhandledPorts), using string-equality matching on event names (§3).
    ///
    /// Resolves the "producer/consumer matching" open question (§9) as: all
    /// matching local producers wire to all matching local consumers — a
    /// port is classified `Publish`/`Subscribe` if *any* remote port on the
    /// opposite side shares its event name, not just the first one found.
    pub fn classify<'a>(&self, deployment: &'a [Port]) -> Vec<(&'a Port, PortClass)> {
        let (local, remote): (Vec<&Port>, Vec<&Port>) = deployment
            .iter()
            .partition(|p| p.model_name.eq_ignore_ascii_case(&self.owning_model));

        local
            .into_iter()
            .map(|port| {
                let produces_consumed_remotely = port.produces_event.as_deref().is_some_and(|event| {
                    remote.iter().any(|r| r.consumes_event.as_deref() == Some(event))
                });
                let consumes_produced_remotely = port.consumes_event.as_deref().is_some_and(|event| {
                    remote.iter().any(|r| r.produces_event.as_deref() == Some(event))
                });

                let class = if produces_consumed_remotely {
                    PortClass::Publish
                } else if consumes_produced_remotely {
                    PortClass::Subscribe
                } else if port.produces_event.is_some() {
                    PortClass::Unhandled
                } else {
                    PortClass::Local
                };
                (port, class)
            })
            .collect()
    }

    /// Wire this router per §4.4's five wiring steps. `deployment` is the
    /// full set of ports declared across every pool in the process (local
    /// and remote); `remote_models` is used to open one BroadcastChannel
    /// per distinct remote model a PublishPort/SubscribePort touches.
    pub fn wire(&self, deployment: &[Port]) {
        let classified = self.classify(deployment);

        // Step 1: one BroadcastChannel per model name appearing in
        // PublishPorts ∪ SubscribePorts, deduplicated with itertools since a
        // pool can have several ports touching the same remote model.
        let remote_models: Vec<String> = classified
            .iter()
            .filter(|(_, class)| matches!(class, PortClass::Publish | PortClass::Subscribe))
            .filter_map(|(port, _)| self.remote_model_for(port, deployment))
            .unique()
            .collect();

        for model in &remote_models {
            let _ = self.channels.subscribe(model);
        }

        for (port, class) in &classified {
            match class {
                PortClass::Publish => self.wire_publish_port(port, deployment),
                PortClass::Subscribe => self.wire_subscribe_port(port, deployment),
                PortClass::Unhandled => self.wire_unhandled_port(port),
                PortClass::Local => {}
            }
        }

        // Step 5: this pool's own-name channel is always opened and wired
        // to re-deliver arriving events onto the local broker.
        self.wire_own_channel();

        for port in deployment {
            if port.consumes_event.is_some() || port.produces_event.is_some() {
                self.check_known_event(port, deployment);
            }
        }
    }

    /// The remote model a local port's event pairs with, using the same
    /// string-equality match `classify` uses to mark a port Publish/Subscribe
    /// (§4.4). Resolves §9's producer/consumer open question as: the first
    /// matching remote port decides which channel this port wires to — a
    /// BroadcastChannel is already keyed by model name and shared across
    /// however many ports on either side touch it, so every matching
    /// consumer still receives every matching producer's events once both
    /// sides are wired.
    fn remote_model_for(&self, port: &Port, deployment: &[Port]) -> Option<String> {
        deployment
            .iter()
            .find(|r| {
                !r.model_name.eq_ignore_ascii_case(&self.owning_model)
                    && (r.consumes_event == port.produces_event || r.produces_event == port.consumes_event)
            })
            .map(|r| r.model_name.clone())
    }

    /// Step 2: subscribe to the local broker on `P.producesEvent` (the event
    /// this local, producing port actually sets); on each event, deep-copy it
    /// and post to the channel for the matched remote consumer's model name.
    fn wire_publish_port(&self, port: &Port, deployment: &[Port]) {
        let Some(event) = port.produces_event.clone() else {
            return;
        };
        let Some(topic) = self.remote_model_for(port, deployment) else {
            return;
        };
        let channels = self.channels.clone();
        let event_name = event.clone();
        self.local_broker.on(
            event,
            std::sync::Arc::new(move |data| {
                let port_event = PortEvent::new(topic.clone(), event_name.clone(), data.clone());
                match port_event.deep_copy() {
                    Ok(copy) => channels.publish(&topic, copy),
                    Err(err) => error!("router: failed to deep-copy event for {topic}: {err}"),
                }
            }),
        );
    }

    /// Step 3: channel.onmessage → broker.notify(msg.eventName, msg);
    /// messages without `eventName` are re-published under
    /// [`MISSING_EVENT_NAME`]. Subscribes to the matched remote producer's
    /// channel, not this pool's own.
    fn wire_subscribe_port(&self, port: &Port, deployment: &[Port]) {
        let Some(topic) = self.remote_model_for(port, deployment) else {
            return;
        };
        let rx = self.channels.subscribe(&topic);
        spawn_forwarder(rx, self.local_broker.clone());
    }

    /// Step 4: subscribe to its `producesEvent` and forward to [`TO_MAIN`],
    /// which [`crate::mesh::MeshUplink`] picks up (§6). The original event
    /// name is preserved by wrapping the payload as a [`PortEvent`] before
    /// handing it to the sentinel, since a bare `to_main` notification alone
    /// would otherwise lose which producesEvent it came from.
    fn wire_unhandled_port(&self, port: &Port) {
        let Some(event) = port.produces_event.clone() else {
            return;
        };
        let broker = self.local_broker.clone();
        let model = self.owning_model.clone();
        self.local_broker.on(
            event.clone(),
            std::sync::Arc::new(move |data| {
                let wrapped = PortEvent::new(model.clone(), event.clone(), data.clone());
                match serde_json::to_value(&wrapped) {
                    Ok(value) => broker.notify(TO_MAIN, &value),
                    Err(err) => error!("router: failed to wrap unhandled event {event} for to_main: {err}"),
                }
            }),
        );
    }

    /// Step 5: own-name channel, always opened and re-delivered locally.
    fn wire_own_channel(&self) {
        let rx = self.channels.subscribe(&self.owning_model);
        spawn_forwarder(rx, self.local_broker.clone());
    }

    /// §7 "router mis-configuration": log once at wiring time and skip the
    /// port, rather than failing the whole wiring pass.
    fn check_known_event(&self, port: &Port, deployment: &[Port]) {
        let refers_to_unknown = |event: &str| {
            !deployment
                .iter()
                .any(|p| p.produces_event.as_deref() == Some(event) || p.consumes_event.as_deref() == Some(event))
        };
        for event in port.consumes_event.iter().chain(port.produces_event.iter()) {
            if refers_to_unknown(event) {
                let err = RouterError::UnknownEvent {
                    model: port.model_name.clone(),
                    service: port.service.clone(),
                    event: event.clone(),
                };
                warn!("{err}");
            }
        }
    }
}

/// Relay a channel's incoming [`PortEvent`]s onto a [`Broker`] on a
/// dedicated thread, applying the missing-eventName sentinel rule (§4.4 step
/// 3: a message lacking `eventName` is re-published as [`MISSING_EVENT_NAME`]).
fn spawn_forwarder(rx: Receiver<PortEvent>, broker: Broker) {
    thread::Builder::new()
        .name("modelpool-router-relay".to_string())
        .spawn(move || {
            for event in rx.iter() {
                let name = event.event_name.clone().unwrap_or_else(|| MISSING_EVENT_NAME.to_string());
                broker.notify(&name, &event.data);
            }
            info!("router relay thread exiting: channel closed");
        })
        .expect("failed to spawn router relay thread");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn classify_marks_a_matched_producer_as_publish() {
        let deployment = vec![
            Port::new("A", "svcA", PortDirection::Outbound).producing("orderCreated"),
            Port::new("B", "svcB", PortDirection::Inbound).consuming("orderCreated"),
        ];
        let router = PortEventRouter::new("A", Broker::new(), BroadcastChannel::new());
        let classified = router.classify(&deployment);
        assert_eq!(classified.len(), 1);
        assert_eq!(classified[0].1, PortClass::Publish);
    }

    #[test]
    fn classify_marks_an_unmatched_producer_as_unhandled() {
        let deployment = vec![Port::new("A", "svcA", PortDirection::Outbound).producing("orphanEvent")];
        let router = PortEventRouter::new("A", Broker::new(), BroadcastChannel::new());
        let classified = router.classify(&deployment);
        assert_eq!(classified[0].1, PortClass::Unhandled);
    }

    #[test]
    fn router_local_match_delivers_a_deep_copy_to_the_subscriber() {
        let channels = BroadcastChannel::new();
        let broker_a = Broker::new();
        let broker_b = Broker::new();

        let deployment = vec![
            Port::new("A", "svcA", PortDirection::Outbound).producing("orderCreated"),
            Port::new("B", "svcB", PortDirection::Inbound).consuming("orderCreated"),
        ];

        let router_a = PortEventRouter::new("A", broker_a.clone(), channels.clone());
        router_a.wire(&deployment);
        let router_b = PortEventRouter::new("B", broker_b.clone(), channels.clone());
        router_b.wire(&deployment);

        let received = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&received);
        broker_b.on(
            "orderCreated",
            Arc::new(move |data| r.lock().unwrap().push(data.clone())),
        );

        broker_a.notify("orderCreated", &json!({"id": 1}));
        thread::sleep(Duration::from_millis(100));

        let got = received.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], json!({"id": 1}));
    }

    #[test]
    fn a_message_without_an_event_name_routes_to_the_missing_event_sentinel() {
        let broker = Broker::new();
        let (tx, rx) = std::sync::mpsc::channel();
        spawn_forwarder(rx, broker.clone());

        let seen = Arc::new(Mutex::new(false));
        let s = Arc::clone(&seen);
        broker.on(MISSING_EVENT_NAME, Arc::new(move |_| *s.lock().unwrap() = true));

        tx.send(PortEvent {
            model: "X".to_string(),
            event_name: None,
            data: json!(null),
        })
        .unwrap();
        thread::sleep(Duration::from_millis(100));

        assert!(*seen.lock().unwrap());
    }
}
