//! Bridge between stream handles and [`StreamBackend`] implementations.
//!
//! A backend is registered once and identified afterwards by a [`Token`]. The
//! [`StreamInterface`] callback table resolves the token on every call, so
//! nothing but an integer travels between a handle and its backend.
//!
//! Each callback:
//! - contains panics raised by the backend, turning them into
//!   [`StreamStatus::Error`] and parking the payload in a thread-local slot
//!   until the caller decides to resume or discard it;
//! - loops over sub-slices until the requested length is satisfied or the
//!   backend stops making progress.
//!
//! `close` removes the registration, so the backend is released exactly once.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::backend::StreamBackend;
use super::error::set_error;
use super::status::{StreamStatus, Whence};
use crate::logging::{trace, warn};

/// Opaque identifier of a registered backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    pub fn get(self) -> u64 {
        self.0
    }
}

type SharedBackend = Arc<Mutex<Box<dyn StreamBackend>>>;

struct Registry {
    next: AtomicU64,
    entries: Mutex<FxHashMap<u64, SharedBackend>>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry {
        next: AtomicU64::new(1),
        entries: Mutex::new(FxHashMap::default()),
    })
}

impl Registry {
    fn insert(&self, backend: Box<dyn StreamBackend>) -> Token {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(id, Arc::new(Mutex::new(backend)));
        Token(id)
    }

    fn lookup(&self, token: Token) -> Option<SharedBackend> {
        self.entries.lock().get(&token.0).cloned()
    }

    fn remove(&self, token: Token) -> Option<SharedBackend> {
        self.entries.lock().remove(&token.0)
    }
}

/// Callback table through which every stream operation is dispatched.
pub struct StreamInterface {
    pub size: fn(Token) -> i64,
    pub seek: fn(Token, i64, Whence) -> i64,
    pub read: fn(Token, &mut [u8], &mut StreamStatus) -> usize,
    pub write: fn(Token, &[u8], &mut StreamStatus) -> usize,
    pub flush: fn(Token, &mut StreamStatus) -> bool,
    pub close: fn(Token) -> bool,
}

/// The table used for every registered backend.
pub static ADAPTER_INTERFACE: StreamInterface = StreamInterface {
    size: adapter_size,
    seek: adapter_seek,
    read: adapter_read,
    write: adapter_write,
    flush: adapter_flush,
    close: adapter_close,
};

/// Register `backend` and return the token that now owns it.
pub fn register(backend: Box<dyn StreamBackend>) -> Token {
    let token = registry().insert(backend);
    trace!(token = token.0, "registered stream backend");
    token
}

thread_local! {
    static PENDING_PANIC: RefCell<Option<Box<dyn Any + Send>>> = const { RefCell::new(None) };
}

/// Take the panic payload captured by the last callback on this thread.
pub fn take_pending_panic() -> Option<Box<dyn Any + Send>> {
    PENDING_PANIC.with(|slot| slot.borrow_mut().take())
}

/// Resume a panic captured by the last callback on this thread, if any.
pub fn resume_pending_panic() {
    if let Some(payload) = take_pending_panic() {
        panic::resume_unwind(payload);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "stream backend panicked".to_string()
    }
}

/// Run `f` against the backend behind `token`. Unknown tokens and panics both
/// yield `failed`.
fn dispatch<R>(
    token: Token,
    failed: R,
    f: impl FnOnce(&mut Box<dyn StreamBackend>) -> R,
) -> R {
    let Some(backend) = registry().lookup(token) else {
        set_error("stream is closed");
        return failed;
    };
    let mut guard = backend.lock();
    match panic::catch_unwind(AssertUnwindSafe(|| f(&mut guard))) {
        Ok(value) => value,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(token = token.0, %message, "stream backend panicked");
            set_error(message);
            PENDING_PANIC.with(|slot| *slot.borrow_mut() = Some(payload));
            failed
        }
    }
}

fn adapter_size(token: Token) -> i64 {
    dispatch(token, -1, |backend| backend.size())
}

fn adapter_seek(token: Token, offset: i64, whence: Whence) -> i64 {
    dispatch(token, -1, |backend| backend.seek(offset, whence))
}

fn adapter_read(token: Token, buf: &mut [u8], status: &mut StreamStatus) -> usize {
    let mut total = 0;
    let mut local = StreamStatus::Ready;
    let done = dispatch(token, false, |backend| {
        while total < buf.len() {
            let n = backend.read(&mut buf[total..], &mut local);
            total += n.min(buf.len() - total);
            if n == 0 || local.is_terminal() {
                break;
            }
        }
        true
    });
    *status = if done { local } else { StreamStatus::Error };
    total
}

fn adapter_write(token: Token, buf: &[u8], status: &mut StreamStatus) -> usize {
    let mut total = 0;
    let mut local = StreamStatus::Ready;
    let done = dispatch(token, false, |backend| {
        while total < buf.len() {
            let n = backend.write(&buf[total..], &mut local);
            total += n.min(buf.len() - total);
            if n == 0 || local.is_terminal() {
                break;
            }
        }
        true
    });
    if !done {
        local = StreamStatus::Error;
    } else if total < buf.len() && !local.is_terminal() {
        set_error("short write");
        local = StreamStatus::Error;
    }
    *status = local;
    total
}

fn adapter_flush(token: Token, status: &mut StreamStatus) -> bool {
    let mut local = StreamStatus::Ready;
    let ok = dispatch(token, false, |backend| backend.flush(&mut local));
    *status = match (ok, local) {
        (false, StreamStatus::Ready) => StreamStatus::Error,
        _ => local,
    };
    ok
}

fn adapter_close(token: Token) -> bool {
    let Some(backend) = registry().remove(token) else {
        return true;
    };
    trace!(token = token.0, "releasing stream backend");
    let mut guard = backend.lock();
    match panic::catch_unwind(AssertUnwindSafe(|| guard.close())) {
        Ok(ok) => ok,
        Err(payload) => {
            set_error(panic_message(payload.as_ref()));
            PENDING_PANIC.with(|slot| *slot.borrow_mut() = Some(payload));
            false
        }
    }
}
