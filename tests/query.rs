use std::{
    cell::{Cell, RefCell},
    future::ready,
    rc::Rc,
    time::Duration,
};

use assert_call::{call, CallRecorder};
use futures::channel::oneshot;
use sigquery::{
    core::Runtime, ManualClock, OptimisticUpdate, QueryClient, QueryConfig, QueryState,
};

fn client(rt: &Runtime, clock: &ManualClock) -> QueryClient {
    QueryClient::with_config(
        rt,
        QueryConfig::new()
            .with_stale_time(Duration::from_millis(60_000))
            .with_max_cache_size(2),
    )
    .with_clock(clock.clone())
}

#[test]
fn fresh_entry_is_not_fetched_again() {
    let mut rt = Runtime::new();
    let clock = ManualClock::new();
    let fetches = Rc::new(Cell::new(0));
    let q = client(&rt, &clock).query({
        let fetches = fetches.clone();
        move |_: [u32; 0]| {
            fetches.set(fetches.get() + 1);
            ready(Ok::<_, String>(vec![1, 2]))
        }
    });
    q.ensure(&[]);
    rt.update();
    assert_eq!(q.get_query_data(&[]).as_deref(), Some(&vec![1, 2]));

    clock.advance(Duration::from_millis(30_000));
    q.ensure(&[]);
    rt.update();
    assert_eq!(fetches.get(), 1);
}

#[test]
fn out_of_order_responses_keep_latest_request() {
    let mut rt = Runtime::new();
    let clock = ManualClock::new();
    let senders = Rc::new(RefCell::new(Vec::new()));
    let q = client(&rt, &clock).query({
        let senders = senders.clone();
        move |page: u32| {
            let (tx, rx) = oneshot::channel::<String>();
            senders.borrow_mut().push(tx);
            async move { rx.await.map(|s| format!("{page}:{s}")).map_err(|e| e.to_string()) }
        }
    });
    q.refetch(&1);
    q.refetch(&1);
    let b = senders.borrow_mut().pop().unwrap();
    let a = senders.borrow_mut().pop().unwrap();
    b.send("b".into()).unwrap();
    rt.update();
    a.send("a".into()).unwrap();
    rt.update();
    assert_eq!(q.get_query_data(&1).as_deref().map(|s| s.as_str()), Some("1:b"));
}

#[test]
fn mounted_keys_survive_eviction() {
    let mut rt = Runtime::new();
    let clock = ManualClock::new();
    let q = client(&rt, &clock).query(|id: u32| ready(Ok::<_, String>(id)));
    let mounted = q.subscribe(&0, |_: &QueryState<u32, String>| {});
    for id in 1..=4 {
        q.prefetch(&id);
    }
    rt.update();
    assert_eq!(q.len(), 2);
    assert_eq!(q.get_query_data(&0).as_deref(), Some(&0));
    assert_eq!(q.get_query_data(&4).as_deref(), Some(&4));
    drop(mounted);
}

#[test]
fn optimistic_rollback_then_mutation_error() {
    let mut cr = CallRecorder::new();
    let mut rt = Runtime::new();
    let clock = ManualClock::new();
    let client = client(&rt, &clock);
    let todos = client.query(|_: ()| ready(Ok::<Vec<String>, String>(vec!["a".into()])));
    todos.ensure(&());
    rt.update();
    let before = todos.get_query_data(&()).unwrap();

    let save = client
        .mutation(|_: String| ready(Err::<(), _>(String::from("x"))))
        .on_error(|e| call!("mutation error {e}"))
        .on_settled(|data, e| call!("mutation settled {data:?} {e:?}"))
        .instance();
    let update = OptimisticUpdate::new(
        |prev: Option<&Vec<String>>| {
            let mut items = prev.cloned().unwrap_or_default();
            items.push("b".into());
            items
        },
        move || save.mutate_async("b".into()),
    )
    .on_error(|e, _| call!("rollback {e}"))
    .on_settled(|| call!("settled"));

    let result = rt.run(todos.optimistic_update(&(), update));
    assert_eq!(result, Err("x".to_string()));
    cr.verify([
        "mutation error x",
        "mutation settled None Some(\"x\")",
        "rollback x",
        "settled",
    ]);
    assert!(Rc::ptr_eq(&todos.get_query_data(&()).unwrap(), &before));
}
