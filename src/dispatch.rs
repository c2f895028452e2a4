//! # Event Dispatcher
//! Typed registry from event kind to an ordered list of handlers.
//!
//! Each handler invocation is isolated: an error (or panic) in one handler is
//! logged and counted, and the remaining handlers still run. Nothing a
//! handler does propagates back into the monitor loops.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::FutureExt;
use metrics::counter;
use parking_lot::RwLock;
use serde::Serialize;

use crate::model::{NewsPost, ObservedItem, TeamStanding};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewAttack,
    NewDefense,
    TeamStandingUpdate,
    NewNews,
    PostRevised,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::NewAttack,
        EventKind::NewDefense,
        EventKind::TeamStandingUpdate,
        EventKind::NewNews,
        EventKind::PostRevised,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewAttack => "new_attack",
            EventKind::NewDefense => "new_defense",
            EventKind::TeamStandingUpdate => "team_standing_update",
            EventKind::NewNews => "new_news",
            EventKind::PostRevised => "post_revised",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| anyhow!("unknown event type: {s}"))
    }
}

/// Prior and current state of a revised news post.
#[derive(Debug, Clone, PartialEq)]
pub struct PostRevision {
    pub old_post: NewsPost,
    pub new_post: NewsPost,
    pub revision_number: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    NewAttack(ObservedItem),
    NewDefense(ObservedItem),
    TeamStandingUpdate(TeamStanding),
    NewNews(NewsPost),
    PostRevised(PostRevision),
}

impl MonitorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MonitorEvent::NewAttack(_) => EventKind::NewAttack,
            MonitorEvent::NewDefense(_) => EventKind::NewDefense,
            MonitorEvent::TeamStandingUpdate(_) => EventKind::TeamStandingUpdate,
            MonitorEvent::NewNews(_) => EventKind::NewNews,
            MonitorEvent::PostRevised(_) => EventKind::PostRevised,
        }
    }
}

#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &MonitorEvent) -> Result<()>;

    fn name(&self) -> &str {
        "handler"
    }
}

/// Synchronous closure handler.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Wrap a plain function as a handler.
pub fn from_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&MonitorEvent) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

#[async_trait::async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&MonitorEvent) -> Result<()> + Send + Sync,
{
    async fn handle(&self, event: &MonitorEvent) -> Result<()> {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Asynchronous closure handler; receives its own copy of the event.
pub struct AsyncFnHandler<F> {
    name: String,
    f: F,
}

pub fn from_async<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(MonitorEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(AsyncFnHandler {
        name: name.into(),
        f,
    })
}

#[async_trait::async_trait]
impl<F, Fut> EventHandler for AsyncFnHandler<F>
where
    F: Fn(MonitorEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, event: &MonitorEvent) -> Result<()> {
        (self.f)(event.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Outcome of one `emit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `kind`.
    pub fn register(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        tracing::debug!(
            target: "dispatch",
            kind = kind.as_str(),
            handler = handler.name(),
            "handler registered"
        );
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    /// String-keyed registration. Unknown names are logged and ignored.
    pub fn register_named(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> bool {
        match event_type.parse::<EventKind>() {
            Ok(kind) => {
                self.register(kind, handler);
                true
            }
            Err(_) => {
                tracing::warn!(
                    target: "dispatch",
                    event_type,
                    "Unknown event type, handler ignored"
                );
                false
            }
        }
    }

    /// Register one handler for every event kind.
    pub fn register_all(&self, handler: Arc<dyn EventHandler>) {
        for kind in EventKind::ALL {
            self.register(kind, handler.clone());
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every handler for the event's kind, in registration order.
    pub async fn emit(&self, event: &MonitorEvent) -> DispatchReport {
        let kind = event.kind();
        // Snapshot so the lock is not held across handler awaits.
        let handlers: Vec<Arc<dyn EventHandler>> =
            self.handlers.read().get(&kind).cloned().unwrap_or_default();

        let mut report = DispatchReport::default();
        for handler in handlers {
            report.invoked += 1;
            let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
            let err = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => panic_message(panic.as_ref()),
            };
            report.failed += 1;
            counter!("dispatch_handler_errors_total", "kind" => kind.as_str()).increment(1);
            tracing::error!(
                target: "dispatch",
                kind = kind.as_str(),
                handler = handler.name(),
                "Error in event handler: {err}"
            );
        }
        report
    }

    /// String-keyed emit. The name must match the payload's kind; anything
    /// else is logged and dropped.
    pub async fn emit_named(&self, event_type: &str, event: &MonitorEvent) -> DispatchReport {
        match event_type.parse::<EventKind>() {
            Ok(kind) if kind == event.kind() => self.emit(event).await,
            Ok(kind) => {
                tracing::warn!(
                    target: "dispatch",
                    event_type,
                    payload = event.kind().as_str(),
                    "event type does not match payload ({kind}), ignored"
                );
                DispatchReport::default()
            }
            Err(_) => {
                tracing::warn!(target: "dispatch", event_type, "Unknown event type, ignored");
                DispatchReport::default()
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
