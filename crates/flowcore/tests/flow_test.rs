// crates/flowcore/tests/flow_test.rs

use flowcore::{
    in_parallel, in_sequence, ActionError, ActionFn, ActionRef, EventBus, Flow, FlowEvent,
    FlowOutcome, Sequence, SignalToken,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};

type Trace = Arc<Mutex<Vec<(String, u64)>>>;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Cancel-aware timer that records start / end / cancel with the elapsed time.
fn timer(trace: &Trace, origin: Instant, label: &'static str, ms: u64) -> ActionRef {
    let trace = trace.clone();
    ActionFn::arc(label, move |token: SignalToken| {
        let trace = trace.clone();
        async move {
            let at = || origin.elapsed().as_millis() as u64;
            trace.lock().push((format!("start:{label}"), at()));
            tokio::select! {
                _ = sleep(Duration::from_millis(ms)) => {
                    trace.lock().push((format!("end:{label}"), at()));
                    Ok(())
                }
                _ = token.cancelled() => {
                    trace.lock().push((format!("cancel:{label}"), at()));
                    Err(ActionError::Cancelled)
                }
            }
        }
    })
}

fn labels(trace: &Trace) -> Vec<String> {
    trace.lock().iter().map(|(label, _)| label.clone()).collect()
}

fn at(trace: &Trace, label: &str) -> Option<u64> {
    trace
        .lock()
        .iter()
        .find(|(l, _)| l == label)
        .map(|(_, ms)| *ms)
}

fn drain(rx: &mut broadcast::Receiver<FlowEvent>) -> Vec<FlowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_sequence_runs_actions_in_order() {
    init_tracing();
    let trace = Trace::default();
    let origin = Instant::now();
    let flow = Flow::builder("ordered")
        .actions(in_sequence(vec![
            timer(&trace, origin, "t1", 100),
            timer(&trace, origin, "t2", 100),
        ]))
        .build();

    let bus = EventBus::new(100);
    let mut rx = bus.subscribe();
    assert!(flow.launch(&bus).await.is_none());

    assert_eq!(labels(&trace), vec!["start:t1", "end:t1", "start:t2", "end:t2"]);
    assert_eq!(at(&trace, "start:t2"), Some(100));
    assert!(flow.is_completed());
    assert!(!flow.is_cancelled());

    let finished = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            FlowEvent::FlowFinished { outcome, .. } => Some(outcome),
            _ => None,
        });
    assert_eq!(finished, Some(FlowOutcome::Completed));
}

#[tokio::test(start_paused = true)]
async fn test_suspend_resume_continues_from_same_position() {
    init_tracing();
    let trace = Trace::default();
    let origin = Instant::now();
    let flow = Flow::builder("pausable")
        .actions(in_sequence(vec![
            timer(&trace, origin, "a", 100),
            timer(&trace, origin, "b", 100),
            timer(&trace, origin, "c", 100),
        ]))
        .build();

    let bus = EventBus::new(100);
    let running = tokio::spawn({
        let flow = flow.clone();
        async move { flow.launch(&bus).await }
    });

    sleep(Duration::from_millis(150)).await;
    flow.suspend();
    sleep(Duration::from_millis(350)).await;
    assert_eq!(labels(&trace), vec!["start:a", "end:a", "start:b", "end:b"]);

    flow.resume();
    running.await.unwrap();

    assert_eq!(
        labels(&trace),
        vec!["start:a", "end:a", "start:b", "end:b", "start:c", "end:c"]
    );
    assert_eq!(at(&trace, "start:c"), Some(500));
    assert!(flow.is_completed());
}

#[tokio::test(start_paused = true)]
async fn test_self_suspended_action_halts_its_sequence_until_resume() {
    init_tracing();
    let trace = Trace::default();
    let origin = Instant::now();
    let pauser = {
        let trace = trace.clone();
        ActionFn::arc("pauser", move |token: SignalToken| {
            let trace = trace.clone();
            async move {
                trace.lock().push(("pauser".to_string(), origin.elapsed().as_millis() as u64));
                token.suspend();
                Ok(())
            }
        })
    };
    let flow = Flow::builder("halting")
        .actions(in_parallel(vec![
            Sequence::from(vec![pauser, timer(&trace, origin, "next", 100)]),
            Sequence::from(timer(&trace, origin, "other", 100)),
        ]))
        .build();

    let bus = EventBus::new(100);
    let running = tokio::spawn({
        let flow = flow.clone();
        async move { flow.launch(&bus).await }
    });

    sleep(Duration::from_millis(500)).await;
    // The sibling sequence is unaffected; the halted one pops nothing.
    assert_eq!(labels(&trace), vec!["pauser", "start:other", "end:other"]);
    assert!(!flow.is_completed());
    assert!(!flow.is_suspended());

    // Resuming a running flow fires no edge.
    flow.resume();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(at(&trace, "start:next"), None);

    flow.suspend();
    flow.resume();
    running.await.unwrap();

    assert_eq!(at(&trace, "start:next"), Some(600));
    assert_eq!(at(&trace, "end:next"), Some(700));
    assert!(flow.is_completed());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_releases_a_halted_sequence() {
    init_tracing();
    let trace = Trace::default();
    let origin = Instant::now();
    let pauser = ActionFn::arc("pauser", |token: SignalToken| async move {
        token.suspend();
        Ok(())
    });
    let flow = Flow::builder("halted")
        .actions(in_sequence(vec![pauser, timer(&trace, origin, "never", 100)]))
        .build();

    let bus = EventBus::new(100);
    let running = tokio::spawn({
        let flow = flow.clone();
        async move { flow.launch(&bus).await }
    });

    sleep(Duration::from_millis(100)).await;
    flow.cancel();
    let successor = timeout(Duration::from_millis(10), running)
        .await
        .expect("halted sequence should settle after cancel")
        .unwrap();

    assert!(successor.is_none());
    assert!(labels(&trace).is_empty());
    assert!(flow.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_reaches_every_parallel_sequence() {
    init_tracing();
    let trace = Trace::default();
    let origin = Instant::now();
    let flow = Flow::builder("parallel")
        .actions(in_parallel(vec![
            Sequence::from(timer(&trace, origin, "solo", 1000)),
            Sequence::from(vec![
                timer(&trace, origin, "first", 1000),
                timer(&trace, origin, "second", 1000),
            ]),
        ]))
        .after(|_| panic!("after hook must not run once cancelled"))
        .build();

    let bus = EventBus::new(100);
    let running = tokio::spawn({
        let flow = flow.clone();
        async move { flow.launch(&bus).await }
    });

    sleep(Duration::from_millis(100)).await;
    flow.cancel();

    let successor = timeout(Duration::from_millis(10), running)
        .await
        .expect("action phase should settle after cancel")
        .unwrap();
    assert!(successor.is_none());

    // Let the cancelled action tasks observe their tokens.
    sleep(Duration::from_millis(1)).await;
    let seen = labels(&trace);
    assert!(seen.contains(&"cancel:solo".to_string()));
    assert!(seen.contains(&"cancel:first".to_string()));
    assert!(!seen.contains(&"start:second".to_string()));
    assert!(flow.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_stubborn_action_is_detached_on_cancel() {
    init_tracing();
    let finished = Arc::new(Mutex::new(false));
    let stubborn = {
        let finished = finished.clone();
        ActionFn::arc("stubborn", move |_token: SignalToken| {
            let finished = finished.clone();
            async move {
                sleep(Duration::from_millis(1000)).await;
                *finished.lock() = true;
                Ok(())
            }
        })
    };
    let flow = Flow::builder("stubborn").actions(stubborn).build();

    let bus = EventBus::new(100);
    let mut rx = bus.subscribe();
    let origin = Instant::now();
    let running = tokio::spawn({
        let flow = flow.clone();
        async move { flow.launch(&bus).await }
    });

    sleep(Duration::from_millis(100)).await;
    flow.cancel();
    running.await.unwrap();
    assert!(origin.elapsed() < Duration::from_millis(1000));
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, FlowEvent::ActionDetached { action, .. } if action == "stubborn")));

    // The collaborator keeps running in the background.
    sleep(Duration::from_millis(1000)).await;
    assert!(*finished.lock());
}

#[tokio::test(start_paused = true)]
async fn test_before_hook_successor_skips_remaining_phases() {
    init_tracing();
    let trace = Trace::default();
    let origin = Instant::now();
    let flow = Flow::builder("skipped")
        .before(|_| Some(Flow::builder("elsewhere").build()))
        .actions(timer(&trace, origin, "never", 10))
        .after(|_| panic!("after hook must not run"))
        .build();

    let bus = EventBus::new(100);
    let successor = flow.launch(&bus).await.expect("successor requested");

    assert_eq!(successor.name(), "elsewhere");
    assert!(labels(&trace).is_empty());
    assert!(flow.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_after_hook_successor_runs_after_actions() {
    init_tracing();
    let trace = Trace::default();
    let origin = Instant::now();
    let flow = Flow::builder("first")
        .actions(timer(&trace, origin, "work", 50))
        .after(|_| Some(Flow::builder("second").build()))
        .build();

    let bus = EventBus::new(100);
    let mut rx = bus.subscribe();
    let successor = flow.launch(&bus).await.expect("successor requested");

    assert_eq!(successor.name(), "second");
    assert_eq!(labels(&trace), vec!["start:work", "end:work"]);
    assert!(flow.is_cancelled());
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        FlowEvent::FlowFinished { outcome: FlowOutcome::Transitioned, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_before_hook_cancel_stops_the_flow() {
    init_tracing();
    let trace = Trace::default();
    let origin = Instant::now();
    let flow = Flow::builder("self-cancelling")
        .before(|handle| {
            handle.cancel();
            None
        })
        .actions(timer(&trace, origin, "never", 10))
        .build();

    assert!(flow.launch(&EventBus::default()).await.is_none());
    assert!(labels(&trace).is_empty());
    assert!(flow.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_failed_action_is_swallowed_and_reported() {
    init_tracing();
    let trace = Trace::default();
    let origin = Instant::now();
    let failing = ActionFn::arc("broken", |_token: SignalToken| async {
        Err(ActionError::Failed("boom".to_string()))
    });
    let panicking = ActionFn::arc("panicking", |_token: SignalToken| async {
        let buggy = true;
        if buggy {
            panic!("collaborator bug");
        }
        Ok(())
    });
    let flow = Flow::builder("resilient")
        .actions(in_sequence(vec![
            failing,
            panicking,
            timer(&trace, origin, "after-failure", 10),
        ]))
        .build();

    let bus = EventBus::new(100);
    let mut rx = bus.subscribe();
    assert!(flow.launch(&bus).await.is_none());

    assert_eq!(labels(&trace), vec!["start:after-failure", "end:after-failure"]);
    assert!(flow.is_completed());

    let failures: Vec<(String, String)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            FlowEvent::ActionFailed { action, error, .. } => Some((action, error)),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].0, "broken");
    assert!(failures[0].1.contains("boom"));
    assert_eq!(failures[1].0, "panicking");
}

#[tokio::test]
async fn test_signals_request_successors_until_cancelled() {
    let flow = Flow::builder("listening")
        .on_signal("next", || Some(Flow::builder("target").build()))
        .build();

    assert!(flow.emit("unknown").is_none());
    assert_eq!(flow.emit("next").map(|f| f.name().to_string()), Some("target".to_string()));

    flow.handle().on_signal("other", || Some(Flow::builder("other").build()));
    assert!(flow.emit("other").is_some());

    flow.cancel();
    assert!(flow.emit("next").is_none());
    flow.on_signal("late", || Some(Flow::builder("late").build()));
    assert!(flow.emit("late").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_completed_flow_does_not_relaunch_but_fresh_copy_does() {
    let runs = Arc::new(Mutex::new(0));
    let flow = {
        let runs = runs.clone();
        Flow::builder("once")
            .before(move |_| {
                *runs.lock() += 1;
                None
            })
            .build()
    };

    let bus = EventBus::default();
    flow.launch(&bus).await;
    flow.launch(&bus).await;
    assert_eq!(*runs.lock(), 1);

    let again = flow.fresh();
    assert_ne!(again.id(), flow.id());
    again.launch(&bus).await;
    assert_eq!(*runs.lock(), 2);
}
