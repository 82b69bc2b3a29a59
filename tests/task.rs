use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use courier::{
    CancellableTask, FnOperation, FutureOperation, Operation, OperationError, TaskError, TaskState,
};

const WAIT: Duration = Duration::from_secs(5);

/// An operation that blocks until released and records abort requests.
struct Gate {
    started: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<u32>>,
    aborted: AtomicBool,
}

impl Operation for Gate {
    type Output = u32;
    type Error = io::Error;

    fn execute(&self) -> Result<u32, io::Error> {
        self.started.lock().unwrap().send(()).unwrap();
        self.release
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| io::Error::other("gate dropped"))
    }

    fn abort(&self) -> bool {
        self.aborted.store(true, Ordering::SeqCst);
        true
    }
}

fn gate() -> (Gate, mpsc::Receiver<()>, mpsc::Sender<u32>) {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Gate {
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
        aborted: AtomicBool::new(false),
    };
    (gate, started_rx, release_tx)
}

#[test]
fn completed_task_reports_value() {
    let task = Arc::new(CancellableTask::new(FnOperation::new(
        || Ok::<_, io::Error>("Result".to_string()),
        || false,
    )));
    assert_eq!(task.state(), TaskState::New);
    assert!(!task.is_done());

    let runner = Arc::clone(&task);
    thread::spawn(move || runner.run()).join().unwrap();

    assert_eq!(task.get().unwrap(), "Result");
    assert_eq!(task.state(), TaskState::Completed);
    assert!(task.is_done());
    assert!(!task.is_cancelled());
}

#[test]
fn cancel_before_run_skips_operation() {
    let executed = Arc::new(AtomicBool::new(false));
    let executed_cl = Arc::clone(&executed);
    let aborted = Arc::new(AtomicBool::new(false));
    let aborted_cl = Arc::clone(&aborted);

    let task = CancellableTask::new(FnOperation::new(
        move || {
            executed_cl.store(true, Ordering::SeqCst);
            Ok::<_, io::Error>(1)
        },
        move || {
            aborted_cl.store(true, Ordering::SeqCst);
            true
        },
    ));

    assert!(task.cancel());
    task.run();

    assert!(!executed.load(Ordering::SeqCst), "Cancelled task should not run");
    assert!(!aborted.load(Ordering::SeqCst), "Nothing was running to abort");
    assert!(task.is_cancelled());
    assert!(task.is_done());
    assert!(task.get().unwrap_err().is_cancelled());
}

#[test]
fn cancel_wins_over_late_completion() {
    let (operation, started, release) = gate();
    let task = Arc::new(CancellableTask::new(operation));

    let runner = Arc::clone(&task);
    let run = thread::spawn(move || runner.run());
    started.recv_timeout(WAIT).unwrap();

    assert!(task.cancel(), "Abort signal should be issued");
    assert!(task.operation().aborted.load(Ordering::SeqCst));
    assert!(task.is_cancelled());
    assert!(!task.is_done(), "Operation is still running");
    assert!(task.get().unwrap_err().is_cancelled());

    release.send(7).unwrap();
    run.join().unwrap();

    assert!(task.is_done());
    assert_eq!(task.state(), TaskState::Cancelled);
    assert!(task.get().unwrap_err().is_cancelled());
}

#[test]
fn get_timeout_leaves_task_running() {
    let (operation, started, release) = gate();
    let task = Arc::new(CancellableTask::new(operation));

    let runner = Arc::clone(&task);
    let run = thread::spawn(move || runner.run());
    started.recv_timeout(WAIT).unwrap();

    let err = task.get_timeout(Duration::from_millis(50)).unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, TaskError::Timeout(d) if d == Duration::from_millis(50)));
    assert!(!task.is_done());
    assert_eq!(task.state(), TaskState::New);

    release.send(3).unwrap();
    run.join().unwrap();
    assert_eq!(task.get_timeout(WAIT).unwrap(), 3);
}

#[test]
fn failed_operation_keeps_cause() {
    let task = CancellableTask::new(FnOperation::new(
        || Err::<u32, _>(io::Error::other("connection reset")),
        || false,
    ));
    task.run();

    assert_eq!(task.state(), TaskState::Failed);
    match task.get() {
        Err(TaskError::Failed(cause)) => assert_eq!(cause.to_string(), "connection reset"),
        other => panic!("Expected a failure, got {other:?}"),
    }
}

#[test]
fn panicking_operation_fails_task() {
    let task = CancellableTask::new(FnOperation::new(
        || -> Result<u32, io::Error> { panic!("kaboom") },
        || false,
    ));
    task.run();

    assert_eq!(task.state(), TaskState::Failed);
    assert!(matches!(task.get(), Err(TaskError::Panicked(ref m)) if m == "kaboom"));
}

#[test]
fn terminal_task_ignores_cancel_and_second_run() {
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_cl = Arc::clone(&runs);
    let task = CancellableTask::new(FnOperation::new(
        move || Ok::<_, io::Error>(runs_cl.fetch_add(1, Ordering::SeqCst)),
        || true,
    ));

    task.run();
    task.run();

    assert_eq!(runs.load(Ordering::SeqCst), 1, "Operation should run once");
    assert!(!task.cancel(), "Completed task cannot be cancelled");
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.get().unwrap(), 0);
}

#[test]
fn all_waiters_observe_same_outcome() {
    let (operation, started, release) = gate();
    let task = Arc::new(CancellableTask::new(operation));

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let task = Arc::clone(&task);
            thread::spawn(move || task.get().unwrap())
        })
        .collect();

    let runner = Arc::clone(&task);
    let run = thread::spawn(move || runner.run());
    started.recv_timeout(WAIT).unwrap();
    release.send(11).unwrap();
    run.join().unwrap();

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), 11);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn completion_resolves_on_tokio() {
    let (operation, started, release) = gate();
    let task = Arc::new(CancellableTask::new(operation));

    let runner = Arc::clone(&task);
    thread::spawn(move || runner.run());
    started.recv_timeout(WAIT).unwrap();
    release.send(5).unwrap();

    assert_eq!(task.completion().await.unwrap(), 5);
}

#[test]
fn completion_resolves_cancellation_on_smol() {
    let (operation, started, _release) = gate();
    let task = Arc::new(CancellableTask::new(operation));

    let runner = Arc::clone(&task);
    thread::spawn(move || runner.run());
    started.recv_timeout(WAIT).unwrap();

    let canceller = Arc::clone(&task);
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        canceller.cancel();
    });

    let outcome = smol::block_on(task.completion());
    assert!(outcome.unwrap_err().is_cancelled());
}

#[test]
fn future_operation_is_aborted_by_cancel() {
    let task = Arc::new(CancellableTask::new(FutureOperation::new(
        futures::future::pending::<Result<u32, io::Error>>(),
    )));

    let runner = Arc::clone(&task);
    let run = thread::spawn(move || runner.run());
    thread::sleep(Duration::from_millis(20));

    assert!(task.cancel());
    run.join().unwrap();

    assert!(task.is_done());
    assert!(task.get().unwrap_err().is_cancelled());
}

#[test]
fn future_operation_reports_value_and_error() {
    let ok = CancellableTask::new(FutureOperation::new(async { Ok::<_, io::Error>(5) }));
    ok.run();
    assert_eq!(ok.get().unwrap(), 5);

    let failed = CancellableTask::new(FutureOperation::new(async {
        Err::<u32, _>(io::Error::other("no rows"))
    }));
    failed.run();
    match failed.get() {
        Err(TaskError::Failed(cause)) => {
            assert!(matches!(*cause, OperationError::Failed(_)));
            assert_eq!(cause.to_string(), "no rows");
        }
        other => panic!("Expected a failure, got {other:?}"),
    }
}
