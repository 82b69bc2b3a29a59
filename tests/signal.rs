use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use courier::{Action, CallbackFailure, ErrorSink, Origin, Signal, Subscriber};

fn recording_sink() -> (Arc<dyn ErrorSink>, Arc<Mutex<Vec<CallbackFailure>>>) {
    let failures = Arc::new(Mutex::new(Vec::new()));
    let failures_cl = Arc::clone(&failures);
    let sink: Arc<dyn ErrorSink> =
        Arc::new(move |failure: CallbackFailure| failures_cl.lock().unwrap().push(failure));
    (sink, failures)
}

#[test]
fn signal_sends_to_handlers() {
    let (sink, failures) = recording_sink();
    let signal = Signal::with_sink(sink);
    let message = Arc::new(Mutex::new(None));
    let message_cl = Arc::clone(&message);

    signal.add_handler(&Subscriber::new(move |m: &String| {
        *message_cl.lock().unwrap() = Some(m.clone());
    }));
    signal.send(&"Foo".to_string());

    assert_eq!(message.lock().unwrap().as_deref(), Some("Foo"));
    assert!(failures.lock().unwrap().is_empty(), "No failure expected");
}

#[test]
fn signal_isolates_panicking_handler() {
    let (sink, failures) = recording_sink();
    let signal = Signal::with_sink(sink);
    let message = Arc::new(Mutex::new(None));
    let message_cl = Arc::clone(&message);

    signal.add_handler(&Subscriber::new(|_: &String| panic!("Foobar")));
    signal.add_handler(&Subscriber::new(move |m: &String| {
        *message_cl.lock().unwrap() = Some(m.clone());
    }));
    signal.send(&"Foo".to_string());

    assert_eq!(message.lock().unwrap().as_deref(), Some("Foo"));
    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].message(), "Foobar");
    assert_eq!(failures[0].origin(), &Origin::Signal);
}

#[test]
fn removed_handler_is_not_called() {
    let signal = Signal::new();
    let called = Arc::new(AtomicBool::new(false));
    let called_cl = Arc::clone(&called);
    let handler = Subscriber::new(move |_: &u32| called_cl.store(true, Ordering::SeqCst));

    signal.add_handler(&handler);
    assert_eq!(signal.handler_count(), 1);
    assert!(signal.remove_handler(&handler));
    assert!(!signal.remove_handler(&handler));
    signal.send(&1);

    assert!(!called.load(Ordering::SeqCst));
}

#[test]
fn action_triggers_handlers() {
    let (sink, failures) = recording_sink();
    let action = Action::with_sink(sink);
    let triggered = Arc::new(AtomicBool::new(false));
    let triggered_cl = Arc::clone(&triggered);

    action.add_handler(&Subscriber::action(|| panic!("Foobar")));
    action.add_handler(&Subscriber::action(move || {
        triggered_cl.store(true, Ordering::SeqCst);
    }));
    action.trigger();

    assert!(triggered.load(Ordering::SeqCst), "Second handler should run");
    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].message(), "Foobar");
}

#[test]
fn removed_action_handler_is_not_called() {
    let action = Action::new();
    let triggered = Arc::new(AtomicBool::new(false));
    let triggered_cl = Arc::clone(&triggered);
    let handler = Subscriber::action(move || triggered_cl.store(true, Ordering::SeqCst));

    action.add_handler(&handler);
    assert!(action.remove_handler(&handler));
    action.trigger();

    assert!(!triggered.load(Ordering::SeqCst));
    assert_eq!(action.handler_count(), 0);
}
