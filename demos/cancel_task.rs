use courier::{CancellableTask, FnOperation, FutureOperation};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // A "query" that polls its abort flag.
    let stop = Arc::new(AtomicBool::new(false));
    let stop_cl = Arc::clone(&stop);
    let task = Arc::new(CancellableTask::new(FnOperation::new(
        move || {
            for row in 0..100 {
                if stop_cl.load(Ordering::SeqCst) {
                    return Err(io::Error::other(format!("interrupted at row {row}")));
                }
                thread::sleep(Duration::from_millis(20));
            }
            Ok(100)
        },
        move || {
            stop.store(true, Ordering::SeqCst);
            true
        },
    )));

    let runner = Arc::clone(&task);
    let handle = thread::spawn(move || runner.run());

    match task.get_timeout(Duration::from_millis(100)) {
        Ok(rows) => println!("finished early with {rows} rows"),
        Err(e) => println!("first wait: {e}"),
    }
    println!("abort issued: {}", task.cancel());
    println!("outcome: {:?}", task.get());
    handle.join().unwrap();
    println!("done: {}, state: {:?}", task.is_done(), task.state());

    // A future that never resolves on its own.
    let pending = Arc::new(CancellableTask::new(FutureOperation::new(
        futures::future::pending::<Result<u32, io::Error>>(),
    )));
    let runner = Arc::clone(&pending);
    let handle = thread::spawn(move || runner.run());

    let canceller = Arc::clone(&pending);
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        canceller.cancel();
    });

    let outcome = smol::block_on(pending.completion());
    println!("future outcome: {outcome:?}");
    handle.join().unwrap();
}
