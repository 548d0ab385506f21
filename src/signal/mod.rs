//! Event sources and the notifications they emit.
//!
//! A [`Signal`] is the smallest event source: it carries the identity of the
//! object that owns it (its [`SourceId`]), the name of the event it fires and
//! the list of callbacks connected to it. Host facilities such as
//! [`Timer`](crate::time::Timer) and [`Process`](crate::process::Process)
//! expose one `Signal` per event kind.
//!
//! Firing a signal builds one immutable [`Notification`] and invokes every
//! connected callback with it, in connection order, synchronously.
//!
//! # Example
//!
//! ```ignore
//! use sigbridge::signal::{EventQueue, Signal, Value};
//!
//! let clicked = Signal::new("clicked");
//! let queue = EventQueue::new();
//! queue.subscribe(&clicked)?;
//!
//! clicked.emit([Value::from(3)]);
//! assert_eq!(queue.len(), 1);
//! ```

pub mod queue;

pub use queue::{EventQueue, Next};

use crate::error::{Error, Result};
use crate::task::{Task, TaskHandle};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::ops::Index;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of the object that emitted a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    /// Allocates a fresh, process-wide unique identity.
    pub fn new() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// One payload value carried by a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// The integer payload, if this is [`Value::Int`].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The boolean payload, if this is [`Value::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrows the text, if this is [`Value::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Borrows the raw bytes, if this is [`Value::Bytes`].
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// One firing of an event source: who fired, which event, and its payload.
///
/// Notifications are immutable and cheap to clone; the payload is shared.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    sender: SourceId,
    kind: &'static str,
    payload: Arc<[Value]>,
}

impl Notification {
    /// Builds a notification.
    ///
    /// # Arguments
    /// * `sender` - Identity of the emitting object
    /// * `kind` - Name of the event, e.g. `"finished"`
    /// * `payload` - Values carried by this firing, in order
    pub fn new(sender: SourceId, kind: &'static str, payload: Vec<Value>) -> Self {
        Self {
            sender,
            kind,
            payload: payload.into(),
        }
    }

    /// Identity of the object that fired.
    pub fn sender(&self) -> SourceId {
        self.sender
    }

    /// Event name, shared by every firing of the same signal.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// All payload values, in emission order.
    pub fn payload(&self) -> &[Value] {
        &self.payload
    }

    /// Number of payload values.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload value at `index`.
    ///
    /// # Returns
    /// `None` past the end of the payload.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.payload.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.payload.iter()
    }
}

impl Index<usize> for Notification {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.payload[index]
    }
}

/// Callback invoked once per firing, in firing order.
pub type Callback = Rc<dyn Fn(&Notification)>;

/// Capability required of anything an [`EventQueue`] can subscribe to.
pub trait EventSource {
    /// Registers `callback` to run on every future firing.
    ///
    /// Fails with [`Error::SourceClosed`] once the owner of the source has
    /// been destroyed.
    fn register_callback(&self, callback: Callback) -> Result<Connection>;
}

struct SignalInner {
    sender: SourceId,
    kind: &'static str,
    slots: RefCell<Vec<(u64, Callback)>>,
    next_slot: Cell<u64>,
    closed: Cell<bool>,
}

/// A named event of one source object.
#[derive(Clone)]
pub struct Signal {
    inner: Rc<SignalInner>,
}

impl Signal {
    /// Creates a signal owned by a fresh anonymous source.
    pub fn new(kind: &'static str) -> Self {
        Self::with_sender(SourceId::new(), kind)
    }

    /// Creates a signal owned by `sender`; several signals may share a sender.
    pub fn with_sender(sender: SourceId, kind: &'static str) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                sender,
                kind,
                slots: RefCell::new(Vec::new()),
                next_slot: Cell::new(1),
                closed: Cell::new(false),
            }),
        }
    }

    /// Identity stamped on every notification this signal fires.
    pub fn sender(&self) -> SourceId {
        self.inner.sender
    }

    /// Event name stamped on every notification.
    pub fn kind(&self) -> &'static str {
        self.inner.kind
    }

    /// Number of connected callbacks.
    pub fn receiver_count(&self) -> usize {
        self.inner.slots.borrow().len()
    }

    /// Connects a closure; see [`EventSource::register_callback`].
    pub fn connect<F>(&self, callback: F) -> Result<Connection>
    where
        F: Fn(&Notification) + 'static,
    {
        self.register_callback(Rc::new(callback))
    }

    /// Fires the signal: every connected callback runs before this returns.
    pub fn emit<I>(&self, payload: I)
    where
        I: IntoIterator<Item = Value>,
    {
        let notification = Notification::new(
            self.inner.sender,
            self.inner.kind,
            payload.into_iter().collect(),
        );

        // Callbacks may connect or disconnect while we iterate.
        let slots: Vec<Callback> = self
            .inner
            .slots
            .borrow()
            .iter()
            .map(|(_, slot)| slot.clone())
            .collect();

        for slot in slots {
            slot(&notification);
        }
    }

    /// Connects without the closed check, for sources owned by this crate.
    pub(crate) fn attach(&self, callback: Callback) -> Connection {
        let id = self.inner.next_slot.get();
        self.inner.next_slot.set(id + 1);
        self.inner.slots.borrow_mut().push((id, callback));

        Connection {
            signal: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Marks the owning object as destroyed and drops every callback.
    pub(crate) fn close(&self) {
        self.inner.closed.set(true);
        self.inner.slots.borrow_mut().clear();
    }
}

impl EventSource for Signal {
    fn register_callback(&self, callback: Callback) -> Result<Connection> {
        if self.inner.closed.get() {
            return Err(Error::SourceClosed {
                kind: self.inner.kind,
            });
        }

        Ok(self.attach(callback))
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("sender", &self.inner.sender)
            .field("kind", &self.inner.kind)
            .field("receivers", &self.receiver_count())
            .finish()
    }
}

/// Handle to one connected callback.
///
/// Dropping the handle leaves the callback connected.
#[derive(Debug)]
pub struct Connection {
    signal: Weak<SignalInner>,
    id: u64,
}

impl Connection {
    /// True while the callback is still registered with a live signal.
    pub fn is_connected(&self) -> bool {
        self.signal
            .upgrade()
            .is_some_and(|signal| signal.slots.borrow().iter().any(|(id, _)| *id == self.id))
    }

    /// Removes the callback; a no-op if the signal is gone or it was already
    /// removed.
    pub fn disconnect(&self) {
        if let Some(signal) = self.signal.upgrade() {
            signal.slots.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Connects an event source to an async handler.
///
/// Every firing starts a new top-level computation running
/// `handler(notification)`. Nothing awaits those computations, so their
/// failures are reported as unhandled.
pub fn connect_async<S, F, Fut, T>(source: &S, handler: F) -> Result<Connection>
where
    S: EventSource + ?Sized,
    F: Fn(Notification) -> Fut + 'static,
    Fut: Future<Output = Result<T>> + 'static,
    T: 'static,
{
    source.register_callback(Rc::new(move |notification: &Notification| {
        let handle: TaskHandle<T> = Task::start(handler(notification.clone()));
        drop(handle);
    }))
}
