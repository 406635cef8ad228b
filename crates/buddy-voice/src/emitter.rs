//! Shape and speaking-state fan-out.
//!
//! Every emission carries the epoch of the utterance that produced it. Advancing
//! the epoch waits for any in-flight delivery to finish, so once
//! [`ShapeEmitter::advance_epoch`] returns no listener will observe anything
//! from an older utterance.
//!
//! A [`Transition`] holds the same lock across several steps, so a caller can
//! retire one utterance and start the next without another thread's emissions
//! or epoch changes landing in between.

use crate::mouth::MouthShape;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::trace;

/// Callback receiving mouth shapes.
pub type ShapeSink = Arc<dyn Fn(MouthShape) + Send + Sync>;

/// Callback receiving speaking-state changes.
pub type StateListener = Arc<dyn Fn(bool) + Send + Sync>;

thread_local! {
    /// Emitters this thread is delivering for, so their listeners may re-enter.
    static DELIVERING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    shape: Vec<(u64, ShapeSink)>,
    state: Vec<(u64, StateListener)>,
    bound_shape: Option<ShapeSink>,
    bound_state: Option<StateListener>,
}

struct Inner {
    epoch: AtomicU64,
    current: Mutex<MouthShape>,
    listeners: Mutex<Listeners>,
    delivery: Mutex<()>,
}

impl Inner {
    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held for the length of one delivery. `None` when re-entering on the owning thread.
struct Delivery<'a> {
    held: Option<(usize, MutexGuard<'a, ()>)>,
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        if let Some((key, _)) = &self.held {
            DELIVERING.with(|d| {
                let mut keys = d.borrow_mut();
                if let Some(pos) = keys.iter().rposition(|k| k == key) {
                    keys.remove(pos);
                }
            });
        }
    }
}

/// Exclusive hold on an emitter's deliveries and epoch; see [`ShapeEmitter::transition`].
#[must_use = "the transition ends when this guard is dropped"]
pub struct Transition<'a> {
    _delivery: Delivery<'a>,
}

/// Epoch-gated registry of shape and state listeners. Clones share state.
#[derive(Clone)]
pub struct ShapeEmitter {
    inner: Arc<Inner>,
}

impl Default for ShapeEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ShapeEmitter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                epoch: AtomicU64::new(0),
                current: Mutex::new(MouthShape::Default),
                listeners: Mutex::new(Listeners::default()),
                delivery: Mutex::new(()),
            }),
        }
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn enter(&self) -> Delivery<'_> {
        let key = self.key();
        // A listener re-entering on this thread already holds the lock.
        if DELIVERING.with(|d| d.borrow().contains(&key)) {
            return Delivery { held: None };
        }
        let lock = self
            .inner
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        DELIVERING.with(|d| d.borrow_mut().push(key));
        Delivery {
            held: Some((key, lock)),
        }
    }

    /// Block other threads' emissions and epoch advances until the guard drops.
    ///
    /// Re-entrant on the holding thread, so listeners invoked meanwhile may
    /// still emit and advance.
    pub fn transition(&self) -> Transition<'_> {
        Transition {
            _delivery: self.enter(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Invalidate every earlier epoch and return the new one.
    pub fn advance_epoch(&self) -> u64 {
        let _delivery = self.enter();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last shape delivered to listeners.
    pub fn current_shape(&self) -> MouthShape {
        *self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `shape` if `epoch` is still current. Returns whether it was delivered.
    pub fn emit_shape(&self, epoch: u64, shape: MouthShape) -> bool {
        let _delivery = self.enter();
        if self.epoch() != epoch {
            trace!(epoch, %shape, "dropping stale shape");
            return false;
        }
        *self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = shape;

        let (bound, listeners) = {
            let listeners = self.inner.listeners();
            let callbacks: Vec<ShapeSink> =
                listeners.shape.iter().map(|(_, f)| Arc::clone(f)).collect();
            (listeners.bound_shape.clone(), callbacks)
        };
        for callback in bound.into_iter().chain(listeners) {
            if self.epoch() != epoch {
                break;
            }
            callback(shape);
        }
        true
    }

    /// Deliver a speaking-state change if `epoch` is still current.
    pub fn emit_state(&self, epoch: u64, speaking: bool) -> bool {
        let _delivery = self.enter();
        if self.epoch() != epoch {
            return false;
        }
        let (bound, listeners) = {
            let listeners = self.inner.listeners();
            let callbacks: Vec<StateListener> =
                listeners.state.iter().map(|(_, f)| Arc::clone(f)).collect();
            (listeners.bound_state.clone(), callbacks)
        };
        for callback in bound.into_iter().chain(listeners) {
            if self.epoch() != epoch {
                break;
            }
            callback(speaking);
        }
        true
    }

    /// Close out the current utterance: advance the epoch, then deliver
    /// `DEFAULT` and, if `was_speaking`, a `false` state change.
    ///
    /// Both are delivered to every listener even if a listener starts the next
    /// utterance meanwhile, so a `true` is always answered by its `false`.
    /// Returns the new epoch.
    pub fn retire(&self, was_speaking: bool) -> u64 {
        let _delivery = self.enter();
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = MouthShape::Default;

        let (shapes, states) = {
            let listeners = self.inner.listeners();
            let shapes: Vec<ShapeSink> = listeners
                .bound_shape
                .iter()
                .cloned()
                .chain(listeners.shape.iter().map(|(_, f)| Arc::clone(f)))
                .collect();
            let states: Vec<StateListener> = listeners
                .bound_state
                .iter()
                .cloned()
                .chain(listeners.state.iter().map(|(_, f)| Arc::clone(f)))
                .collect();
            (shapes, states)
        };
        for callback in shapes {
            callback(MouthShape::Default);
        }
        if was_speaking {
            for callback in states {
                callback(false);
            }
        }
        epoch
    }

    /// A sink that emits under `epoch` and goes quiet once it is superseded.
    pub fn sink(&self, epoch: u64) -> ShapeSink {
        let emitter = self.clone();
        Arc::new(move |shape| {
            emitter.emit_shape(epoch, shape);
        })
    }

    pub fn subscribe_shape(&self, listener: ShapeSink) -> Subscription {
        let mut listeners = self.inner.listeners();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.shape.push((id, listener));
        Subscription::new(&self.inner, id, ListenerKind::Shape)
    }

    pub fn subscribe_state(&self, listener: StateListener) -> Subscription {
        let mut listeners = self.inner.listeners();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.state.push((id, listener));
        Subscription::new(&self.inner, id, ListenerKind::State)
    }

    /// Replace the single bound shape callback.
    pub fn bind_shape(&self, listener: Option<ShapeSink>) {
        self.inner.listeners().bound_shape = listener;
    }

    /// Replace the single bound state callback.
    pub fn bind_state(&self, listener: Option<StateListener>) {
        self.inner.listeners().bound_state = listener;
    }

    pub fn listener_count(&self) -> usize {
        let listeners = self.inner.listeners();
        listeners.shape.len() + listeners.state.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerKind {
    Shape,
    State,
}

/// Registration handle; dropping it removes the listener.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
    kind: ListenerKind,
}

impl Subscription {
    fn new(inner: &Arc<Inner>, id: u64, kind: ListenerKind) -> Self {
        Self {
            inner: Arc::downgrade(inner),
            id,
            kind,
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut listeners = inner.listeners();
        match self.kind {
            ListenerKind::Shape => listeners.shape.retain(|(id, _)| *id != self.id),
            ListenerKind::State => listeners.state.retain(|(id, _)| *id != self.id),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}
