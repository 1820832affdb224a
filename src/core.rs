use std::{
    cell::RefCell,
    collections::VecDeque,
    future::{poll_fn, Future},
    mem::take,
    pin::pin,
    rc::Rc,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll, Wake, Waker},
};

use derive_ex::derive_ex;
use futures::future::LocalBoxFuture;
use slabmap::SlabMap;


/// Cooperative single-threaded event loop.
///
/// Stores and caches never run asynchronous work on their own.
/// They hand it to a [`Scheduler`] and the owner of the `Runtime` drives it with
/// [`update`](Self::update) or [`run`](Self::run).
#[derive_ex(Default)]
#[default(Self::new())]
pub struct Runtime {
    scheduler: Scheduler,
    wakes_buffer: Vec<usize>,
}
impl Runtime {
    pub fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            wakes_buffer: Vec::new(),
        }
    }

    /// Returns the handle used to queue work on this runtime.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Perform deferred tasks, including tasks queued while running them.
    ///
    /// Returns `true` if any task was performed.
    pub fn run_tasks(&mut self) -> bool {
        let mut handled = false;
        while let Some(task) = self.scheduler.pop_task() {
            task.run();
            handled = true;
        }
        handled
    }

    /// Poll the spawned futures that have been woken.
    ///
    /// Returns `true` if any future was polled.
    pub fn poll_futures(&mut self) -> bool {
        let mut handled = false;
        let mut wakes = take(&mut self.wakes_buffer);
        while self.scheduler.take_wakes(&mut wakes) {
            for id in wakes.drain(..) {
                handled |= self.scheduler.poll(id);
            }
        }
        self.wakes_buffer = wakes;
        handled
    }

    /// Repeat [`run_tasks`](Self::run_tasks) and [`poll_futures`](Self::poll_futures) until there is nothing left to do.
    ///
    /// Returns `true` if anything was performed.
    pub fn update(&mut self) -> bool {
        let mut handled = false;
        loop {
            if self.run_tasks() {
                handled = true;
                continue;
            }
            if self.poll_futures() {
                handled = true;
                continue;
            }
            break;
        }
        handled
    }

    /// Wait while there is no work to be performed by [`update`](Self::update).
    pub async fn wait_for_ready(&self) {
        poll_fn(|cx| self.scheduler.wait_for_ready(cx)).await
    }

    /// Drive `future` to completion, performing the runtime's work while it is pending.
    ///
    /// The current thread is blocked only when neither `future` nor any spawned future can make progress.
    pub fn run<T>(&mut self, future: impl Future<Output = T>) -> T {
        let mut future = pin!(future);
        futures::executor::block_on(poll_fn(|cx| loop {
            if let Poll::Ready(value) = future.as_mut().poll(cx) {
                return Poll::Ready(value);
            }
            if self.update() {
                continue;
            }
            if self.scheduler.wait_for_ready(cx).is_pending() {
                return Poll::Pending;
            }
        }))
    }
}
impl Drop for Runtime {
    fn drop(&mut self) {
        self.scheduler.cancel_all();
    }
}

/// Handle for queueing work on a [`Runtime`].
#[derive_ex(Clone, Default)]
#[default(Self::new())]
pub struct Scheduler(Rc<SchedulerData>);

struct SchedulerData {
    state: RefCell<SchedulerState>,
    requests: WakeRequests,
}

#[derive(Default)]
struct SchedulerState {
    tasks: VecDeque<Task>,
    futures: SlabMap<LocalTask>,
}

struct LocalTask {
    future: Option<LocalBoxFuture<'static, ()>>,
    waker: Option<Waker>,
}

impl Scheduler {
    fn new() -> Self {
        Self(Rc::new(SchedulerData {
            state: RefCell::new(SchedulerState::default()),
            requests: WakeRequests::default(),
        }))
    }

    /// Queue a future. It is first polled by the next [`Runtime::update`].
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        let id = {
            let mut s = self.0.state.borrow_mut();
            let id = s.futures.insert(LocalTask {
                future: Some(Box::pin(future)),
                waker: None,
            });
            s.futures[id].waker = Some(RawWake::new(&self.0.requests, id).into());
            id
        };
        self.0.requests.lock().push(id);
    }

    /// Queue a task that runs after the current synchronous work has finished.
    ///
    /// Tasks run in the order they were scheduled.
    pub fn schedule_task(&self, f: impl FnOnce() + 'static) {
        self.0.state.borrow_mut().tasks.push_back(Task(Box::new(f)));
        self.0.requests.lock().wake();
    }

    /// Returns `true` if there is no queued task and no spawned future is alive.
    pub fn is_idle(&self) -> bool {
        let s = self.0.state.borrow();
        s.tasks.is_empty() && s.futures.is_empty()
    }

    fn pop_task(&self) -> Option<Task> {
        self.0.state.borrow_mut().tasks.pop_front()
    }
    fn take_wakes(&self, wakes: &mut Vec<usize>) -> bool {
        wakes.append(&mut self.0.requests.lock().wakes);
        !wakes.is_empty()
    }

    fn poll(&self, id: usize) -> bool {
        let (mut future, waker) = {
            let mut s = self.0.state.borrow_mut();
            let Some(task) = s.futures.get_mut(id) else {
                return false;
            };
            let (Some(future), Some(waker)) = (task.future.take(), task.waker.clone()) else {
                return false;
            };
            (future, waker)
        };
        let is_ready = future
            .as_mut()
            .poll(&mut Context::from_waker(&waker))
            .is_ready();
        let mut s = self.0.state.borrow_mut();
        if is_ready {
            s.futures.remove(id);
        } else if let Some(task) = s.futures.get_mut(id) {
            task.future = Some(future);
        }
        true
    }

    fn wait_for_ready(&self, cx: &Context) -> Poll<()> {
        if !self.0.state.borrow().tasks.is_empty() {
            return Poll::Ready(());
        }
        let mut requests = self.0.requests.lock();
        if !requests.wakes.is_empty() {
            return Poll::Ready(());
        }
        requests.waker = Some(cx.waker().clone());
        Poll::Pending
    }

    fn cancel_all(&self) {
        let (tasks, futures) = {
            let mut s = self.0.state.borrow_mut();
            (take(&mut s.tasks), take(&mut s.futures))
        };
        drop(tasks);
        drop(futures);
    }
}

struct Task(Box<dyn FnOnce()>);

impl Task {
    fn run(self) {
        (self.0)()
    }
}

#[derive(Clone, Default)]
struct WakeRequests(Arc<Mutex<RawWakeRequests>>);

impl WakeRequests {
    fn lock(&self) -> MutexGuard<RawWakeRequests> {
        self.0.lock().unwrap()
    }
}

#[derive(Default)]
struct RawWakeRequests {
    wakes: Vec<usize>,
    waker: Option<Waker>,
}
impl RawWakeRequests {
    fn push(&mut self, id: usize) {
        self.wakes.push(id);
        self.wake();
    }
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

struct RawWake {
    requests: WakeRequests,
    id: usize,
}
impl RawWake {
    fn new(requests: &WakeRequests, id: usize) -> Arc<Self> {
        Arc::new(RawWake {
            requests: requests.clone(),
            id,
        })
    }
}

impl Wake for RawWake {
    fn wake(self: Arc<Self>) {
        self.requests.lock().push(self.id);
    }
}
