use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    future::ready,
};

use assert_call::{call, CallRecorder};
use futures::channel::oneshot;
use rstest::rstest;

use super::*;
use crate::ManualClock;

type Reply = oneshot::Sender<Result<String, String>>;

/// Fetch function whose requests are answered by hand.
#[derive(Clone, Default)]
struct Server(Rc<RefCell<VecDeque<Reply>>>);

impl Server {
    fn query(&self, client: &QueryClient) -> Query<u32, String, String> {
        let pending = self.0.clone();
        client.query(move |id: u32| {
            call!("fetch {id}");
            let (tx, rx) = oneshot::channel();
            pending.borrow_mut().push_back(tx);
            async move { rx.await.unwrap_or_else(|_| Err("dropped".into())) }
        })
    }
    fn take(&self) -> Reply {
        self.0.borrow_mut().pop_front().unwrap()
    }
}

fn setup(stale_time: Duration) -> (Runtime, ManualClock, QueryClient) {
    let rt = Runtime::new();
    let clock = ManualClock::new();
    let client = QueryClient::with_config(
        &rt,
        QueryConfig::new().with_stale_time(stale_time),
    )
    .with_clock(clock.clone());
    (rt, clock, client)
}

#[test]
fn ensure_fetches_and_commits() {
    let mut cr = CallRecorder::new();
    let (mut rt, clock, client) = setup(Duration::ZERO);
    let server = Server::default();
    let q = server.query(&client);

    q.ensure(&1);
    cr.verify("fetch 1");
    let s = q.get(&1);
    assert!(s.loading);
    assert!(s.data.is_none());

    server.take().send(Ok("one".into())).unwrap();
    rt.update();
    let s = q.get(&1);
    assert!(!s.loading);
    assert_eq!(s.data.as_deref().map(|s| s.as_str()), Some("one"));
    assert_eq!(s.error, None);
    assert_eq!(s.fetched_at, Some(clock.now()));
}

#[test]
fn concurrent_ensure_is_deduplicated() {
    let mut cr = CallRecorder::new();
    let (_rt, _clock, client) = setup(Duration::ZERO);
    let server = Server::default();
    let q = server.query(&client);
    q.ensure(&1);
    q.ensure(&1);
    q.prefetch(&1);
    cr.verify("fetch 1");
    q.ensure(&2);
    cr.verify("fetch 2");
}

#[test]
fn last_issued_request_wins() {
    let mut cr = CallRecorder::new();
    let (mut rt, _clock, client) = setup(Duration::ZERO);
    let server = Server::default();
    let q = server.query(&client);
    q.refetch(&1);
    q.refetch(&1);
    cr.verify(["fetch 1", "fetch 1"]);
    let a = server.take();
    let b = server.take();

    b.send(Ok("b".into())).unwrap();
    rt.update();
    assert_eq!(q.get_query_data(&1).as_deref().map(|s| s.as_str()), Some("b"));

    a.send(Ok("a".into())).unwrap();
    rt.update();
    assert_eq!(q.get_query_data(&1).as_deref().map(|s| s.as_str()), Some("b"));
}

#[test]
fn superseded_error_is_discarded() {
    let mut cr = CallRecorder::new();
    let (mut rt, _clock, client) = setup(Duration::ZERO);
    let server = Server::default();
    let q = server.query(&client);
    q.refetch(&1);
    q.refetch(&1);
    cr.verify(["fetch 1", "fetch 1"]);
    let a = server.take();
    let b = server.take();
    a.send(Err("a failed".into())).unwrap();
    rt.update();
    assert_eq!(q.get(&1).error, None);
    assert!(q.get(&1).loading);

    b.send(Ok("b".into())).unwrap();
    rt.update();
    let s = q.get(&1);
    assert!(!s.loading);
    assert_eq!(s.error, None);
    assert_eq!(s.data.as_deref().map(|s| s.as_str()), Some("b"));
}

#[rstest]
#[case(0, 0)]
#[case(59_999, 0)]
#[case(60_000, 1)]
fn stale_time_suppresses_fetch(#[case] elapsed_ms: u64, #[case] fetches: usize) {
    let (mut rt, clock, client) = setup(Duration::from_millis(60_000));
    let count = Rc::new(Cell::new(0));
    let q = client.query({
        let count = count.clone();
        move |(): ()| {
            count.set(count.get() + 1);
            ready(Ok::<_, String>(vec![1, 2]))
        }
    });
    q.ensure(&());
    rt.update();
    assert_eq!(q.get_query_data(&()).as_deref(), Some(&vec![1, 2]));
    assert_eq!(count.get(), 1);

    clock.advance(Duration::from_millis(elapsed_ms));
    q.ensure(&());
    assert_eq!(count.get(), 1 + fetches);
    assert_eq!(q.is_stale(&()), fetches == 1);
}

#[test]
fn refetch_bypasses_stale_time() {
    let mut cr = CallRecorder::new();
    let (mut rt, _clock, client) = setup(Duration::from_secs(60));
    let server = Server::default();
    let q = server.query(&client);
    q.ensure(&1);
    server.take().send(Ok("one".into())).unwrap();
    rt.update();
    cr.verify("fetch 1");

    q.ensure(&1);
    cr.verify(());
    q.refetch(&1);
    cr.verify("fetch 1");
}

#[test]
fn invalidate_keeps_data_and_allows_fetch() {
    let mut cr = CallRecorder::new();
    let (mut rt, _clock, client) = setup(Duration::from_secs(60));
    let server = Server::default();
    let q = server.query(&client);
    q.ensure(&1);
    server.take().send(Ok("one".into())).unwrap();
    rt.update();
    cr.verify("fetch 1");
    assert!(!q.is_stale(&1));

    q.invalidate(&1);
    assert!(q.is_stale(&1));
    assert_eq!(q.get(&1).fetched_at, None);
    assert!(q.get_query_data(&1).is_some());
    q.ensure(&1);
    cr.verify("fetch 1");
}

#[test]
fn invalidate_all_marks_every_entry_stale() {
    let (_rt, _clock, client) = setup(Duration::from_secs(60));
    let q = client.query(|id: u32| ready(Ok::<_, String>(id)));
    q.set_query_data(&1, 10);
    q.set_query_data(&2, 20);
    assert!(!q.is_stale(&1));
    q.invalidate_all();
    assert!(q.is_stale(&1));
    assert!(q.is_stale(&2));
    assert_eq!(q.get_query_data(&2).as_deref(), Some(&20));
}

#[test]
fn error_is_stored_and_data_kept() {
    let mut cr = CallRecorder::new();
    let (mut rt, _clock, client) = setup(Duration::ZERO);
    let server = Server::default();
    let q = server.query(&client);
    q.set_query_data(&1, "cached".into());
    q.refetch(&1);
    cr.verify("fetch 1");
    server.take().send(Err("offline".into())).unwrap();
    rt.update();
    let s = q.get(&1);
    assert_eq!(s.error.as_deref(), Some("offline"));
    assert_eq!(s.data.as_deref().map(|s| s.as_str()), Some("cached"));
    assert!(!s.loading);
}

#[test]
fn set_and_update_query_data() {
    let mut cr = CallRecorder::new();
    let (_rt, clock, client) = setup(Duration::ZERO);
    let q = client.query(|id: u32| ready(Ok::<_, String>(id)));
    assert_eq!(q.get_query_data(&1), None);

    let _s = q.subscribe(&1, |s| call!("data {:?}", s.data));
    cr.verify("data None");
    q.set_query_data(&1, 5);
    cr.verify("data Some(5)");
    q.update_query_data(&1, |prev| prev.copied().unwrap_or(0) + 1);
    cr.verify("data Some(6)");
    assert_eq!(q.get(&1).fetched_at, Some(clock.now()));
}

#[test]
fn subscribe_fetches_and_notifies() {
    let mut cr = CallRecorder::new();
    let (mut rt, _clock, client) = setup(Duration::ZERO);
    let server = Server::default();
    let q = server.query(&client);
    let _s = q.subscribe(&3, |s| {
        call!("loading {} data {:?}", s.loading, s.data.as_deref());
    });
    cr.verify(["loading true data None", "fetch 3"]);
    server.take().send(Ok("three".into())).unwrap();
    rt.update();
    cr.verify("loading false data Some(\"three\")");
}

#[test]
fn unsubscribed_entries_are_evicted() {
    let (mut rt, _clock, client) = setup(Duration::ZERO);
    let q = client.query_with(QueryConfig::new().with_max_cache_size(1), |id: u32| {
        ready(Ok::<_, String>(id))
    });
    let s1 = q.subscribe(&1, |_| {});
    let s2 = q.subscribe(&2, |_| {});
    rt.update();
    assert_eq!(q.len(), 2);

    drop(s1);
    rt.update();
    assert_eq!(q.len(), 1);
    assert_eq!(q.get_query_data(&2).as_deref(), Some(&2));
    drop(s2);
}

#[test]
fn optimistic_update_success_keeps_data() {
    let mut cr = CallRecorder::new();
    let (mut rt, _clock, client) = setup(Duration::ZERO);
    let q = client.query(|_: ()| ready(Ok::<Vec<i32>, String>(vec![])));
    q.set_query_data(&(), vec![1]);

    let update = OptimisticUpdate::new(
        |prev: Option<&Vec<i32>>| {
            let mut items = prev.cloned().unwrap_or_default();
            items.push(2);
            items
        },
        || ready(Ok::<_, String>("saved")),
    )
    .on_success(|r| call!("success {r}"))
    .on_error(|e, _| call!("error {e}"))
    .on_settled(|| call!("settled"));
    let fut = q.optimistic_update(&(), update);
    assert_eq!(q.get_query_data(&()).as_deref(), Some(&vec![1, 2]));

    assert_eq!(rt.run(fut), Ok("saved"));
    cr.verify(["success saved", "settled"]);
    assert_eq!(q.get_query_data(&()).as_deref(), Some(&vec![1, 2]));
}

#[test]
fn optimistic_update_failure_rolls_back() {
    let mut cr = CallRecorder::new();
    let (mut rt, _clock, client) = setup(Duration::ZERO);
    let q = client.query(|_: ()| ready(Ok::<Vec<i32>, String>(vec![])));
    q.set_query_data(&(), vec![1]);
    let before = q.get_query_data(&()).unwrap();
    let fetched_at = q.get(&()).fetched_at;

    let (tx, rx) = oneshot::channel::<Result<(), String>>();
    let update = OptimisticUpdate::new(
        |_: Option<&Vec<i32>>| vec![],
        move || async move { rx.await.unwrap_or_else(|_| Err("dropped".into())) },
    )
    .on_error({
        let before = before.clone();
        move |e, restored| {
            call!("error {e}");
            assert!(Rc::ptr_eq(restored.unwrap(), &before));
        }
    })
    .on_settled(|| call!("settled"));
    let fut = q.optimistic_update(&(), update);
    assert_eq!(q.get_query_data(&()).as_deref(), Some(&vec![]));

    tx.send(Err("conflict".into())).unwrap();
    assert_eq!(rt.run(fut), Err("conflict".to_string()));
    cr.verify(["error conflict", "settled"]);
    assert!(Rc::ptr_eq(&q.get_query_data(&()).unwrap(), &before));
    assert_eq!(q.get(&()).fetched_at, fetched_at);
}

#[test]
fn optimistic_update_supersedes_fetch_in_flight() {
    let mut cr = CallRecorder::new();
    let (mut rt, _clock, client) = setup(Duration::ZERO);
    let server = Server::default();
    let q = server.query(&client);
    q.ensure(&1);
    cr.verify("fetch 1");
    let stale = server.take();

    let (tx, rx) = oneshot::channel::<Result<(), String>>();
    let fut = q.optimistic_update(
        &1,
        OptimisticUpdate::new(
            |_: Option<&String>| "draft".into(),
            move || async move { rx.await.unwrap_or_else(|_| Err("dropped".into())) },
        ),
    );
    assert!(!q.get(&1).loading);

    stale.send(Ok("old".into())).unwrap();
    rt.update();
    assert_eq!(q.get_query_data(&1).as_deref().map(|s| s.as_str()), Some("draft"));

    tx.send(Ok(())).unwrap();
    assert_eq!(rt.run(fut), Ok(()));
    assert_eq!(q.get_query_data(&1).as_deref().map(|s| s.as_str()), Some("draft"));
}

#[test]
fn rollback_keeps_data_fetched_after_update() {
    let mut cr = CallRecorder::new();
    let (mut rt, _clock, client) = setup(Duration::ZERO);
    let server = Server::default();
    let q = server.query(&client);
    q.set_query_data(&1, "before".into());

    let (tx, rx) = oneshot::channel::<Result<(), String>>();
    let fut = q.optimistic_update(
        &1,
        OptimisticUpdate::new(
            |_: Option<&String>| "draft".into(),
            move || async move { rx.await.unwrap_or_else(|_| Err("dropped".into())) },
        )
        .on_error(|e, restored| call!("error {e} {:?}", restored.map(|s| s.as_str()))),
    );
    q.refetch(&1);
    cr.verify("fetch 1");
    server.take().send(Ok("server".into())).unwrap();
    rt.update();

    tx.send(Err("conflict".into())).unwrap();
    assert_eq!(rt.run(fut), Err("conflict".to_string()));
    cr.verify("error conflict None");
    assert_eq!(q.get_query_data(&1).as_deref().map(|s| s.as_str()), Some("server"));
}

#[test]
fn unserializable_args_are_ignored() {
    #[derive(Clone)]
    struct Bad;
    impl Serialize for Bad {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("bad"))
        }
    }
    let mut cr = CallRecorder::new();
    let (_rt, _clock, client) = setup(Duration::ZERO);
    let q = client.query(|_: Bad| {
        call!("fetch");
        ready(Ok::<_, String>(1))
    });
    q.ensure(&Bad);
    q.set_query_data(&Bad, 1);
    cr.verify(());
    assert_eq!(q.get_query_data(&Bad), None);
    assert!(q.is_empty());
}
