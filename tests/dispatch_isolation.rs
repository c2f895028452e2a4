// tests/dispatch_isolation.rs
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use artfight_monitor::dispatch::{from_async, from_fn, Dispatcher, EventKind, MonitorEvent};

use common::{at, post, recorder, standing};

#[tokio::test]
async fn failing_and_panicking_handlers_do_not_block_others() {
    let d = Dispatcher::new();
    let hits = Arc::new(AtomicUsize::new(0));

    d.register(
        EventKind::NewNews,
        from_fn("broken", |_ev: &MonitorEvent| Err(anyhow!("webhook returned 500"))),
    );
    d.register(
        EventKind::NewNews,
        from_fn("panicky", |_ev: &MonitorEvent| panic!("handler bug")),
    );
    let h = hits.clone();
    d.register(
        EventKind::NewNews,
        from_fn("counter", move |_ev: &MonitorEvent| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    let report = d.emit(&MonitorEvent::NewNews(post(1, "Hello", None, at(0)))).await;
    assert_eq!(report.invoked, 3);
    assert_eq!(report.failed, 2);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handlers_run_in_registration_order_per_kind() {
    let d = Dispatcher::new();
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    for name in ["first", "second"] {
        let o = order.clone();
        d.register(
            EventKind::TeamStandingUpdate,
            from_async(name, move |_ev: MonitorEvent| {
                let o = o.clone();
                async move {
                    o.lock().push(name);
                    Ok(())
                }
            }),
        );
    }
    let (rec, seen) = recorder();
    d.register(EventKind::NewAttack, rec);

    d.emit(&MonitorEvent::TeamStandingUpdate(standing(51.0, at(0)))).await;
    assert_eq!(*order.lock(), vec!["first", "second"]);
    // other kinds' handlers are not invoked
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn string_keyed_registration_and_emit() {
    let d = Dispatcher::new();
    let (rec, seen) = recorder();
    assert!(d.register_named("new_news", rec.clone()));
    assert!(!d.register_named("new_comment", rec));
    assert_eq!(d.handler_count(EventKind::NewNews), 1);

    let ev = MonitorEvent::NewNews(post(2, "Event starts", None, at(0)));
    // payload does not match the name
    let report = d.emit_named("post_revised", &ev).await;
    assert_eq!(report.invoked, 0);
    let report = d.emit_named("bogus", &ev).await;
    assert_eq!(report.invoked, 0);

    let report = d.emit_named("new_news", &ev).await;
    assert_eq!(report.invoked, 1);
    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test]
async fn emit_without_handlers_is_fine() {
    let d = Dispatcher::new();
    let report = d.emit(&MonitorEvent::NewNews(post(9, "Quiet", None, at(0)))).await;
    assert_eq!(report.invoked, 0);
    assert_eq!(report.failed, 0);
}
