use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, mpsc},
};

use courier::{Dispatcher, Error, Store, Subscriber};

#[test]
fn dispatches_to_callbacks_in_registration_order() {
    let dispatcher = Dispatcher::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for name in ["first", "second", "third"] {
        let seen = Arc::clone(&seen);
        dispatcher.register(&Subscriber::new(move |payload: &String| {
            seen.lock().unwrap().push(format!("{name}:{payload}"));
        }));
    }
    dispatcher.dispatch(&"Foo".to_string()).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        ["first:Foo", "second:Foo", "third:Foo"]
    );
    assert!(!dispatcher.is_dispatching());
}

#[test]
fn tokens_are_numbered_from_one() {
    let dispatcher = Dispatcher::<u8>::new();

    let first = dispatcher.register(&Subscriber::new(|_| {}));
    let second = dispatcher.register(&Subscriber::new(|_| {}));

    assert_eq!(first.as_str(), "ID_1");
    assert_eq!(second.to_string(), "ID_2");
}

#[test]
fn unregistered_callback_is_not_called() {
    let dispatcher = Dispatcher::new();
    let (tx, rx) = mpsc::channel();
    let token = dispatcher.register(&Subscriber::new(move |n: &u32| tx.send(*n).unwrap()));

    dispatcher.unregister(&token).unwrap();
    dispatcher.dispatch(&1).unwrap();

    assert!(rx.try_recv().is_err(), "Callback should be gone");
}

#[test]
fn unregister_of_unknown_token_fails() {
    let dispatcher = Dispatcher::<u32>::new();
    let token = dispatcher.register(&Subscriber::new(|_| {}));
    dispatcher.unregister(&token).unwrap();

    let err = dispatcher.unregister(&token).unwrap_err();
    assert!(matches!(err, Error::UnknownToken(ref t) if t == "ID_1"));
}

#[test]
fn dispatch_inside_dispatch_is_refused() {
    let dispatcher = Arc::new(Dispatcher::new());
    let (tx, rx) = mpsc::channel();

    let inner = Arc::clone(&dispatcher);
    dispatcher.register(&Subscriber::new(move |n: &u32| {
        if *n == 1 {
            tx.send(inner.dispatch(&2)).unwrap();
        }
    }));

    dispatcher.dispatch(&1).unwrap();

    let nested = rx.try_recv().unwrap();
    assert!(matches!(nested, Err(Error::DispatchInProgress)));
    assert!(!dispatcher.is_dispatching());
    dispatcher.dispatch(&3).unwrap();
}

#[test]
fn panicking_callback_releases_the_dispatcher() {
    let dispatcher = Dispatcher::new();
    dispatcher.register(&Subscriber::new(|n: &u32| {
        if *n == 0 {
            panic!("bad payload");
        }
    }));

    let result = panic::catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(&0)));

    assert!(result.is_err(), "Panic should propagate to the caller");
    assert!(!dispatcher.is_dispatching());
    dispatcher.dispatch(&1).unwrap();
}

#[test]
fn store_registers_itself_on_creation() {
    let dispatcher = Arc::new(Dispatcher::new());
    let state = Arc::new(Mutex::new(Vec::new()));
    let state_cl = Arc::clone(&state);

    let store = Store::new(&dispatcher, move |action: &&'static str| {
        state_cl.lock().unwrap().push(*action);
    });
    assert_eq!(store.dispatch_token().as_str(), "ID_1");
    assert!(Arc::ptr_eq(store.dispatcher(), &dispatcher));

    dispatcher.dispatch(&"add").unwrap();
    store.dispatcher().dispatch(&"remove").unwrap();
    assert_eq!(*state.lock().unwrap(), ["add", "remove"]);

    dispatcher.unregister(store.dispatch_token()).unwrap();
    dispatcher.dispatch(&"ignored").unwrap();
    assert_eq!(state.lock().unwrap().len(), 2);
}
