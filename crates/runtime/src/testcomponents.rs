//! Synthetic components exercising the controller end to end.
//!
//! These ship in-tree so integration tests can assemble real graphs:
//! `passthrough` relays a value and counts in-place updates, `pulse`
//! forwards ticks to capsule receivers, `summation` sums everything its
//! receiver capsule is sent. `experimental_noop` exists to exercise the
//! stability floor.

use crate::component::{Component, ComponentError, OnStateChange, Options};
use crate::registry::{Registration, Registry, RegistryError, Stability};
use async_trait::async_trait;
use conflux_dsl::{ArgsSchema, Arguments, Capsule, Value, ValueKind};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Register every test component.
pub fn register_all(registry: &mut Registry) -> Result<(), RegistryError> {
    for registration in registrations() {
        registry.register(registration)?;
    }
    Ok(())
}

/// Registrations for all test components.
pub fn registrations() -> Vec<Registration> {
    vec![
        Registration {
            name: "testcomponents.passthrough",
            stability: Stability::GenerallyAvailable,
            args: passthrough_schema,
            build: build_passthrough,
        },
        Registration {
            name: "testcomponents.pulse",
            stability: Stability::GenerallyAvailable,
            args: pulse_schema,
            build: build_pulse,
        },
        Registration {
            name: "testcomponents.summation",
            stability: Stability::GenerallyAvailable,
            args: ArgsSchema::new,
            build: build_summation,
        },
        Registration {
            name: "testcomponents.experimental_noop",
            stability: Stability::Experimental,
            args: ArgsSchema::new,
            build: build_noop,
        },
    ]
}

/// Capsule payload: accepts integers from upstream components.
pub struct IntReceiver {
    tx: tokio::sync::mpsc::UnboundedSender<i64>,
}

impl IntReceiver {
    pub fn receive(&self, value: i64) {
        let _ = self.tx.send(value);
    }
}

// === passthrough ===

fn passthrough_schema() -> ArgsSchema {
    ArgsSchema::new().required("input", ValueKind::Any)
}

/// Relays `input` to the `output` export and counts in-place updates.
struct Passthrough {
    on_state_change: OnStateChange,
    updates: AtomicI64,
}

impl Passthrough {
    fn publish(&self, input: Value) {
        let mut exports = IndexMap::new();
        exports.insert("output".to_string(), input);
        exports.insert(
            "updates".to_string(),
            Value::Int(self.updates.load(Ordering::SeqCst)),
        );
        (self.on_state_change)(Value::Object(exports));
    }
}

fn build_passthrough(
    opts: Options,
    args: Arguments,
) -> Result<Arc<dyn Component>, ComponentError> {
    let component = Arc::new(Passthrough {
        on_state_change: opts.on_state_change,
        updates: AtomicI64::new(0),
    });
    component.publish(args.get("input").cloned().unwrap_or(Value::Null));
    Ok(component)
}

#[async_trait]
impl Component for Passthrough {
    async fn run(&self, ctx: CancellationToken) -> Result<(), ComponentError> {
        ctx.cancelled().await;
        Ok(())
    }

    fn update(&self, args: Arguments) -> Result<(), ComponentError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.publish(args.get("input").cloned().unwrap_or(Value::Null));
        Ok(())
    }
}

// === pulse ===

fn pulse_schema() -> ArgsSchema {
    ArgsSchema::new()
        .required("max", ValueKind::Int)
        .optional(
            "frequency",
            ValueKind::Duration,
            Value::Duration(Duration::from_millis(10)),
        )
        .optional(
            "forward_to",
            ValueKind::List(Box::new(ValueKind::Capsule)),
            Value::List(Vec::new()),
        )
}

struct PulseState {
    max: i64,
    frequency: Duration,
    forward_to: Vec<Capsule>,
    count: i64,
}

/// Sends `1` to every receiver in `forward_to`, once per tick, `max`
/// times.
struct Pulse {
    state: Mutex<PulseState>,
}

fn build_pulse(_opts: Options, args: Arguments) -> Result<Arc<dyn Component>, ComponentError> {
    Ok(Arc::new(Pulse {
        state: Mutex::new(pulse_state(&args, 0)),
    }))
}

fn pulse_state(args: &Arguments, count: i64) -> PulseState {
    PulseState {
        max: args.int("max").unwrap_or(0),
        frequency: args.duration("frequency").unwrap_or(Duration::from_millis(10)),
        forward_to: args
            .list("forward_to")
            .unwrap_or_default()
            .iter()
            .filter_map(|v| v.as_capsule().cloned())
            .collect(),
        count,
    }
}

#[async_trait]
impl Component for Pulse {
    async fn run(&self, ctx: CancellationToken) -> Result<(), ComponentError> {
        loop {
            let frequency = {
                let state = self.state.lock().expect("pulse state lock");
                state.frequency
            };
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = tokio::time::sleep(frequency) => {
                    let receivers = {
                        let mut state = self.state.lock().expect("pulse state lock");
                        if state.count >= state.max {
                            continue;
                        }
                        state.count += 1;
                        state.forward_to.clone()
                    };
                    for capsule in receivers {
                        if let Some(receiver) = capsule.downcast::<IntReceiver>() {
                            receiver.receive(1);
                        }
                    }
                }
            }
        }
    }

    fn update(&self, args: Arguments) -> Result<(), ComponentError> {
        let mut state = self.state.lock().expect("pulse state lock");
        let count = state.count;
        *state = pulse_state(&args, count);
        Ok(())
    }
}

// === summation ===

/// Exports a receiver capsule and the running total of everything sent
/// to it.
struct Summation {
    capsule: Capsule,
    rx: tokio::sync::Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<i64>>>,
    total: AtomicI64,
    on_state_change: OnStateChange,
}

impl Summation {
    fn publish(&self) {
        let mut exports = IndexMap::new();
        exports.insert("receiver".to_string(), Value::Capsule(self.capsule.clone()));
        exports.insert(
            "sum".to_string(),
            Value::Int(self.total.load(Ordering::SeqCst)),
        );
        (self.on_state_change)(Value::Object(exports));
    }
}

fn build_summation(
    opts: Options,
    _args: Arguments,
) -> Result<Arc<dyn Component>, ComponentError> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let component = Arc::new(Summation {
        capsule: Capsule::new(Arc::new(IntReceiver { tx })),
        rx: tokio::sync::Mutex::new(Some(rx)),
        total: AtomicI64::new(0),
        on_state_change: opts.on_state_change,
    });
    component.publish();
    Ok(component)
}

#[async_trait]
impl Component for Summation {
    async fn run(&self, ctx: CancellationToken) -> Result<(), ComponentError> {
        let mut rx = match self.rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                ctx.cancelled().await;
                return Ok(());
            }
        };
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                received = rx.recv() => match received {
                    Some(value) => {
                        self.total.fetch_add(value, Ordering::SeqCst);
                        self.publish();
                    }
                    None => {
                        ctx.cancelled().await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

// === experimental_noop ===

struct Noop;

fn build_noop(_opts: Options, _args: Arguments) -> Result<Arc<dyn Component>, ComponentError> {
    Ok(Arc::new(Noop))
}

#[async_trait]
impl Component for Noop {
    async fn run(&self, ctx: CancellationToken) -> Result<(), ComponentError> {
        ctx.cancelled().await;
        Ok(())
    }
}
