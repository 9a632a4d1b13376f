//! Panic safety net.
//!
//! Wraps a unit of work so that a panic inside it is turned into one
//! structured JSON line on stdout instead of unwinding into the caller:
//!
//! ```rust
//! use apm_facade::SafetyNet;
//!
//! let net = SafetyNet::new("users-api");
//! let value = net.run(|| 40 + 2);
//! assert_eq!(value, Some(42));
//! ```
//!
//! The backtrace is taken at the panic site by a process-wide panic hook
//! installed on first use. The hook only acts while the current thread is
//! inside a guarded scope and hands every other panic to the hook that was
//! installed before it.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::future::Future;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};

pub const DEFAULT_APP: &str = "monitoring-lib";

const METHOD: &str = "recover";
const RECORD_TYPE: &str = "fatal";
const COMPONENT: &str = "Application";
const CODE: &str = "MONITORING.LIBRARY.PANIC";
const CATEGORY: &str = "UnknownError";

/// Log record emitted for a recovered panic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanicRecord {
    pub host: String,
    pub app: String,
    /// Panic location as `file:line:column`, empty when unknown.
    pub file: String,
    pub method: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub component: String,
    pub code: String,
    /// Panic message.
    pub description: String,
    pub category: String,
    pub doc: String,
    pub ts: DateTime<Utc>,
    #[serde(rename = "ref")]
    pub reference: PanicReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanicReference {
    pub stack: String,
}

struct Captured {
    stack: String,
    location: Option<String>,
}

thread_local! {
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    static CAPTURED: Cell<Option<Captured>> = const { Cell::new(None) };
}

fn install_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let guarded = GUARD_DEPTH.try_with(Cell::get).unwrap_or(0) > 0;
            if !guarded {
                previous(info);
                return;
            }
            let captured = Captured {
                stack: Backtrace::force_capture().to_string(),
                location: info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
            };
            let _ = CAPTURED.try_with(|c| c.set(Some(captured)));
        }));
    });
}

struct Guard;

impl Guard {
    fn enter() -> Self {
        install_hook();
        GUARD_DEPTH.with(|d| d.set(d.get() + 1));
        Guard
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        let _ = GUARD_DEPTH.try_with(|d| d.set(d.get().saturating_sub(1)));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Catches panics in units of work and logs them as [`PanicRecord`]s.
#[derive(Debug, Clone)]
pub struct SafetyNet {
    app: String,
}

impl Default for SafetyNet {
    fn default() -> Self {
        Self::new(DEFAULT_APP)
    }
}

impl SafetyNet {
    pub fn new(app: impl Into<String>) -> Self {
        Self { app: app.into() }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    /// Runs `f`, returning `None` if it panicked. The record goes to stdout.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        self.run_with_writer(&mut io::stdout(), f)
    }

    /// Like [`SafetyNet::run`], writing the record to `writer`.
    pub fn run_with_writer<W: Write, T>(&self, writer: &mut W, f: impl FnOnce() -> T) -> Option<T> {
        let _ = CAPTURED.try_with(|c| c.take());
        let outcome = {
            let _guard = Guard::enter();
            panic::catch_unwind(AssertUnwindSafe(f))
        };

        match outcome {
            Ok(value) => Some(value),
            Err(payload) => {
                let record = self.record(payload.as_ref());
                emit(writer, &record);
                None
            }
        }
    }

    /// Builds the record for a caught panic payload.
    ///
    /// Uses the panic-site backtrace when the hook captured one on this
    /// thread, otherwise a backtrace of the caller.
    pub fn record(&self, payload: &(dyn Any + Send)) -> PanicRecord {
        let captured = CAPTURED.try_with(|c| c.take()).ok().flatten();
        let (stack, file) = match captured {
            Some(c) if !c.stack.is_empty() => (c.stack, c.location.unwrap_or_default()),
            Some(c) => (Backtrace::force_capture().to_string(), c.location.unwrap_or_default()),
            None => (Backtrace::force_capture().to_string(), String::new()),
        };

        PanicRecord {
            host: gethostname::gethostname().to_string_lossy().into_owned(),
            app: self.app.clone(),
            file,
            method: METHOD.to_string(),
            kind: RECORD_TYPE.to_string(),
            component: COMPONENT.to_string(),
            code: CODE.to_string(),
            description: panic_message(payload),
            category: CATEGORY.to_string(),
            doc: String::new(),
            ts: Utc::now(),
            reference: PanicReference { stack },
        }
    }

    /// Wraps a future so that a panic while polling it resolves to `None`.
    pub fn wrap_future<F: Future>(&self, future: F) -> Recover<F> {
        Recover {
            inner: future,
            net: self.clone(),
        }
    }
}

fn emit<W: Write>(writer: &mut W, record: &PanicRecord) {
    let line = match serde_json::to_string(record) {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!("Failed to serialize panic record: {}", e);
            return;
        }
    };
    if let Err(e) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
        tracing::warn!("Failed to write panic record: {}", e);
    }
}

pin_project! {
    /// Future returned by [`SafetyNet::wrap_future`] and [`recover_future`].
    pub struct Recover<F> {
        #[pin]
        inner: F,
        net: SafetyNet,
    }
}

impl<F: Future> Future for Recover<F> {
    type Output = Option<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let mut inner = this.inner;

        let _ = CAPTURED.try_with(|c| c.take());
        let outcome = {
            let _guard = Guard::enter();
            panic::catch_unwind(AssertUnwindSafe(|| inner.as_mut().poll(cx)))
        };

        match outcome {
            Ok(Poll::Ready(value)) => Poll::Ready(Some(value)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => {
                let record = this.net.record(payload.as_ref());
                emit(&mut io::stdout(), &record);
                Poll::Ready(None)
            }
        }
    }
}

/// Runs `f` under the default safety net.
pub fn recover<T>(f: impl FnOnce() -> T) -> Option<T> {
    SafetyNet::default().run(f)
}

/// Wraps `future` in the default safety net.
pub fn recover_future<F: Future>(future: F) -> Recover<F> {
    SafetyNet::default().wrap_future(future)
}
