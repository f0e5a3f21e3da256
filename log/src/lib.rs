//! Logging for the Trismedia media plane.
//!
//! Everything logs through `tracing`. [`init`] installs the process-wide
//! subscriber: an env filter, a compact stderr formatter behind a
//! non-blocking writer, and the [`ManagerLayer`] which turns events logged
//! with `target: "manager"` into key/value [`ManagerEvent`]s for whoever
//! subscribed with [`subscribe`].

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use tracing::{
    field::{Field, Visit},
    level_filters::LevelFilter,
    Subscriber,
};
use tracing_subscriber::{
    layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, Layer,
};

/// Target used by the media plane for host-visible events.
pub const MANAGER_TARGET: &str = "manager";

const SUBSCRIBER_QUEUE: usize = 1000;

lazy_static! {
    static ref SUBSCRIBERS: RwLock<Vec<Sender<ManagerEvent>>> =
        RwLock::new(Vec::new());
}

/// A host-visible event, e.g. `RTCPSent`, with its fields in name order.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerEvent {
    pub name: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl ManagerEvent {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    // AMI style rendering: "Event: Name\r\nKey: Value\r\n...\r\n"
    pub fn to_ami(&self) -> String {
        let mut out = format!("Event: {}\r\n", self.name);
        for (key, value) in &self.fields {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = write!(out, "{}: {}\r\n", key, value);
        }
        out.push_str("\r\n");
        out
    }
}

/// Register for manager events. Events are dropped for subscribers whose
/// queue is full; a dropped receiver is pruned on the next event.
pub fn subscribe() -> Receiver<ManagerEvent> {
    let (sender, receiver) = crossbeam_channel::bounded(SUBSCRIBER_QUEUE);
    SUBSCRIBERS.write().push(sender);
    receiver
}

fn publish(event: ManagerEvent) {
    SUBSCRIBERS.write().retain(|sender| {
        !matches!(
            sender.try_send(event.clone()),
            Err(TrySendError::Disconnected(_))
        )
    });
}

pub fn init() {
    init_with_directive("");
}

/// Like [`init`] but with an explicit filter directive such as
/// `"trismedia_media=debug"`. `RUST_LOG` still applies when set.
pub fn init_with_directive(directive: &str) {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
    // the writer thread lives for the whole process
    std::mem::forget(guard);
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .parse_lossy(directive),
        )
        .with(ManagerLayer::new())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking)
                .compact(),
        )
        .try_init();
}

/// Layer forwarding `target: "manager"` events to [`subscribe`]rs.
#[derive(Default)]
pub struct ManagerLayer {}

impl ManagerLayer {
    pub fn new() -> Self {
        Self {}
    }
}

impl<S> Layer<S> for ManagerLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if event.metadata().target() != MANAGER_TARGET {
            return;
        }
        let mut visitor = Visitor::default();
        event.record(&mut visitor);
        if let Some(event) = visitor.into_event() {
            publish(event);
        }
    }
}

/// Collects event fields; `event` names the manager event and `message`
/// is dropped.
#[derive(Default)]
pub(crate) struct Visitor {
    name: Option<String>,
    values: BTreeMap<String, serde_json::Value>,
}

impl Visitor {
    fn insert(&mut self, field: &Field, value: serde_json::Value) {
        match field.name() {
            "message" => {}
            "event" => {
                self.name = Some(match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
            }
            name => {
                self.values.insert(name.to_string(), value);
            }
        }
    }

    fn into_event(self) -> Option<ManagerEvent> {
        Some(ManagerEvent {
            name: self.name?,
            fields: self.values,
        })
    }
}

impl Visit for Visitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, serde_json::Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, serde_json::Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, serde_json::Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, serde_json::Value::from(format!("{:?}", value)));
    }
}
