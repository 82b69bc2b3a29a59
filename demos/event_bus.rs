use courier::{EventBus, Hierarchy, Subscriber};
use std::{any::Any, thread, time::Duration};

trait Number: Send + Sync {
    fn value(&self) -> f64;
}

impl Number for i32 {
    fn value(&self) -> f64 {
        f64::from(*self)
    }
}

impl Number for f64 {
    fn value(&self) -> f64 {
        *self
    }
}

fn main() -> courier::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let hierarchy = Hierarchy::builder()
        .extends::<i32, dyn Number>(|v| v)
        .extends::<f64, dyn Number>(|v| v)
        .build()?;
    let bus = EventBus::builder().name("demo-bus").hierarchy(hierarchy).spawn()?;

    bus.subscribe(&Subscriber::new(|i: &i32| println!("i32: {i}")));
    let numbers = Subscriber::<dyn Number>::new(|n| println!("number: {}", n.value()));
    bus.subscribe(&numbers);
    let doubles = Subscriber::<dyn Number>::new(|n| println!("double: {}", n.value()));
    bus.subscribe_to::<f64, _>(&doubles)?;
    bus.subscribe(&Subscriber::<dyn Any>::new(|v| {
        println!("any: {:?}", v.type_id());
    }));
    bus.subscribe(&Subscriber::new(|s: &String| {
        if s == "boom" {
            panic!("handler failed on {s}");
        }
        println!("string: {s}");
    }));

    bus.publish(42)?;
    bus.publish(0.815)?;
    bus.publish("boom".to_string())?;
    bus.publish("Foo".to_string())?;

    thread::sleep(Duration::from_millis(100));
    bus.unsubscribe_from::<dyn Number, _>(&numbers);
    bus.publish(7)?;

    thread::sleep(Duration::from_millis(100));
    bus.shutdown();
    Ok(())
}
