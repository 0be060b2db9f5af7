//! Unidirectional state container.
//!
//! A [`Store`] owns the current state and runs every dispatched action
//! through an ordered middleware chain before reducing it:
//!
//! ```text
//! dispatch(a) -> mw[0] -> mw[1] -> ... -> reduce -> observer
//! ```
//!
//! Middleware never dispatch re-entrantly. Follow-up actions, whether
//! produced synchronously by a middleware or later by a spawned task, go
//! through a [`Dispatcher`] onto the store's queue and are processed one at a
//! time by whoever drives the store (see [`Store::run_until`]).
//!
//! The current state is published through a `watch` channel, so readers on
//! other tasks always see a whole state value and never block the writer for
//! longer than a clone.

use tokio::sync::{mpsc, watch};

/// Pure state transition function
pub type Reducer<S, A> = fn(&S, &A) -> S;

/// Callback invoked with the new state after every dispatch
pub type StateObserver<S> = Box<dyn FnMut(&S) + Send>;

/// Cloneable handle for queueing actions onto a store's timeline.
pub struct Dispatcher<A> {
    tx: mpsc::UnboundedSender<A>,
}

impl<A> Clone for Dispatcher<A> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<A: std::fmt::Debug> Dispatcher<A> {
    /// Queue an action. Dropped with a warning if the store is gone.
    pub fn dispatch(&self, action: A) {
        if let Err(e) = self.tx.send(action) {
            tracing::warn!("Store closed, dropping action {:?}", e.0);
        }
    }
}

/// What a middleware can see of the store: the current state and a
/// dispatcher for follow-up actions.
pub struct StoreApi<S, A> {
    state: watch::Receiver<S>,
    dispatcher: Dispatcher<A>,
}

impl<S: Clone, A> StoreApi<S, A> {
    /// Snapshot of the current state
    pub fn state(&self) -> S {
        self.state.borrow().clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher<A> {
        &self.dispatcher
    }
}

/// A side-effecting interceptor in the dispatch chain.
///
/// Implementations must pass the action on with [`Next::run`] exactly once
/// and return what it returns.
pub trait Middleware<S, A>: Send {
    fn handle(&mut self, store: &StoreApi<S, A>, action: A, next: Next<'_, S, A>) -> A;
}

/// The rest of the chain after the current middleware
pub struct Next<'a, S, A> {
    chain: &'a mut [Box<dyn Middleware<S, A>>],
    api: &'a StoreApi<S, A>,
    inner: Inner<'a, S, A>,
}

struct Inner<'a, S, A> {
    reducer: Reducer<S, A>,
    state: &'a watch::Sender<S>,
    observer: &'a mut Option<StateObserver<S>>,
}

impl<S, A> Next<'_, S, A> {
    /// Continue the chain; the last link reduces and notifies.
    pub fn run(self, action: A) -> A {
        let Next { chain, api, inner } = self;
        match chain.split_first_mut() {
            Some((first, rest)) => first.handle(api, action, Next { chain: rest, api, inner }),
            None => inner.reduce(action),
        }
    }
}

impl<S, A> Inner<'_, S, A> {
    fn reduce(self, action: A) -> A {
        // The borrow guard must be released before send_replace takes the lock
        let new_state = {
            let current = self.state.borrow();
            (self.reducer)(&*current, &action)
        };
        self.state.send_replace(new_state);

        if let Some(observer) = self.observer.as_mut() {
            observer(&*self.state.borrow());
        }
        action
    }
}

/// State container with a middleware chain and a single-consumer action queue
pub struct Store<S, A> {
    reducer: Reducer<S, A>,
    state: watch::Sender<S>,
    middleware: Vec<Box<dyn Middleware<S, A>>>,
    observer: Option<StateObserver<S>>,
    dispatcher: Dispatcher<A>,
    queue: mpsc::UnboundedReceiver<A>,
}

impl<S, A> Store<S, A>
where
    S: Clone,
    A: std::fmt::Debug,
{
    /// Create a store. `middleware[0]` sees each action first on the way in.
    pub fn new(
        reducer: Reducer<S, A>,
        initial_state: S,
        middleware: Vec<Box<dyn Middleware<S, A>>>,
    ) -> Self {
        let (state, _) = watch::channel(initial_state);
        let (tx, queue) = mpsc::unbounded_channel();

        Self {
            reducer,
            state,
            middleware,
            observer: None,
            dispatcher: Dispatcher { tx },
            queue,
        }
    }

    /// Set the state-changed observer, replacing any previous one
    pub fn set_observer(&mut self, observer: impl FnMut(&S) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// Current state
    pub fn state(&self) -> S {
        self.state.borrow().clone()
    }

    /// Receiver that sees every state replacement
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.state.subscribe()
    }

    /// Handle for queueing actions from other tasks
    pub fn dispatcher(&self) -> Dispatcher<A> {
        self.dispatcher.clone()
    }

    /// Run one action through the chain and reducer. Returns the action.
    ///
    /// Actions already queued are applied first, so a direct dispatch never
    /// overtakes follow-ups of an earlier action.
    pub fn dispatch(&mut self, action: A) -> A {
        self.drain_pending();
        self.apply(action)
    }

    fn apply(&mut self, action: A) -> A {
        let api = StoreApi {
            state: self.state.subscribe(),
            dispatcher: self.dispatcher.clone(),
        };
        let next = Next {
            chain: &mut self.middleware,
            api: &api,
            inner: Inner {
                reducer: self.reducer,
                state: &self.state,
                observer: &mut self.observer,
            },
        };
        next.run(action)
    }

    /// Dispatch every action already waiting in the queue, including ones
    /// queued while draining. Returns how many were processed.
    pub fn drain_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(action) = self.queue.try_recv() {
            self.apply(action);
            count += 1;
        }
        count
    }

    /// Process queued actions until `done` holds for the state after a dispatch.
    pub async fn run_until(&mut self, mut done: impl FnMut(&S) -> bool) -> S {
        loop {
            {
                let current = self.state.borrow();
                if done(&*current) {
                    return current.clone();
                }
            }
            // The store holds a sender itself, so the queue never closes
            let Some(action) = self.queue.recv().await else {
                return self.state();
            };
            self.apply(action);
        }
    }
}
