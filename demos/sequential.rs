use courier::SequentialExecutor;
use std::{sync::mpsc, thread, time::Duration};

fn main() -> courier::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let executor = SequentialExecutor::builder().name("demo-worker").spawn()?;
    let (tx, rx) = mpsc::channel();

    // Longest first; they still finish in submission order.
    for (id, millis) in [(1, 500), (2, 300), (3, 100)] {
        let tx = tx.clone();
        executor.submit(move || {
            thread::sleep(Duration::from_millis(millis));
            println!("item {id} done after {millis} ms");
            tx.send(id).unwrap();
        })?;
    }

    executor.submit(|| panic!("this one fails"))?;
    executor.submit(move || println!("worker still alive"))?;

    let order: Vec<i32> = rx.iter().take(3).collect();
    println!("completion order: {order:?}");

    // Give the last items a moment before the process exits.
    thread::sleep(Duration::from_millis(50));
    executor.shutdown();
    Ok(())
}
