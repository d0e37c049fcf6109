//! The process-wide network-call capability.
//!
//! Every outbound call in the process is expected to go through a `FetchSlot`
//! (normally the one returned by [`global`]). The slot resolves the installed
//! `Fetch` at call time, so installing or removing an interceptor affects all
//! callers at once.
//!
//! # LEASE INVARIANT
//! Installations form a LIFO chain. Each lease keeps the exact `Arc` it
//! replaced, and releasing the top lease puts that `Arc` back. A lease released
//! out of order stays installed as a pass-through until everything above it is
//! released, so once every lease is gone the slot holds its original base.

use futures_util::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DEFAULT_REQUEST_TIMEOUT_MS;
use crate::kernel::lifecycle::lock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    pub fn get(url: &str) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: &str, body: Vec<u8>) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.to_string(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Network(String),
}

pub type FetchFuture = BoxFuture<'static, Result<FetchResponse, FetchError>>;

/// `(request) -> future<response>`.
pub trait Fetch: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> FetchFuture;
}

impl<F> Fetch for F
where
    F: Fn(FetchRequest) -> FetchFuture + Send + Sync,
{
    fn fetch(&self, request: FetchRequest) -> FetchFuture {
        self(request)
    }
}

pub type SharedFetch = Arc<dyn Fetch>;

/// Real HTTP through reqwest.
#[derive(Clone)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for ReqwestFetch {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS))
    }
}

impl Fetch for ReqwestFetch {
    fn fetch(&self, request: FetchRequest) -> FetchFuture {
        let method = match reqwest::Method::from_bytes(request.method.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                let err = FetchError::InvalidRequest(format!("bad method `{}`", request.method));
                return async move { Err::<FetchResponse, FetchError>(err) }.boxed();
            }
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        async move {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect();
            let body = response.bytes().await?.to_vec();
            Ok::<_, FetchError>(FetchResponse { status, headers, body })
        }
        .boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(u64);

struct Lease {
    id: LeaseId,
    installed: SharedFetch,
    released: bool,
}

struct SlotState {
    base: SharedFetch,
    leases: Vec<Lease>,
}

impl SlotState {
    fn current(&self) -> SharedFetch {
        self.leases
            .last()
            .map(|lease| lease.installed.clone())
            .unwrap_or_else(|| self.base.clone())
    }
}

/// Globally replaceable reference cell holding the active `Fetch`.
pub struct FetchSlot {
    next_lease: AtomicU64,
    state: Mutex<SlotState>,
}

impl FetchSlot {
    pub fn new(base: SharedFetch) -> Self {
        Self {
            next_lease: AtomicU64::new(1),
            state: Mutex::new(SlotState {
                base,
                leases: Vec::new(),
            }),
        }
    }

    /// The capability any caller would use right now.
    pub fn current(&self) -> SharedFetch {
        lock(&self.state).current()
    }

    pub fn fetch(&self, request: FetchRequest) -> FetchFuture {
        self.current().fetch(request)
    }

    /// Install `wrap(current)` on top of the chain. `wrap` receives the exact
    /// capability being replaced and runs inside the critical section.
    pub fn lease<W>(&self, wrap: W) -> LeaseId
    where
        W: FnOnce(SharedFetch) -> SharedFetch,
    {
        let id = LeaseId(self.next_lease.fetch_add(1, Ordering::Relaxed));
        let mut state = lock(&self.state);
        let original = state.current();
        let installed = wrap(original);
        state.leases.push(Lease {
            id,
            installed,
            released: false,
        });
        debug!(lease = id.0, depth = state.leases.len(), "fetch lease installed");
        id
    }

    /// Release a lease. Unknown or already-released ids are ignored.
    pub fn release(&self, id: LeaseId) {
        let mut state = lock(&self.state);
        let Some(lease) = state.leases.iter_mut().find(|l| l.id == id && !l.released) else {
            return;
        };
        lease.released = true;

        if state.leases.last().map(|l| l.id) != Some(id) {
            warn!(lease = id.0, "fetch lease released out of order; it stays as a pass-through until the leases above it are released");
            return;
        }

        while state.leases.last().is_some_and(|l| l.released) {
            if let Some(lease) = state.leases.pop() {
                debug!(lease = lease.id.0, depth = state.leases.len(), "fetch lease restored");
            }
        }
    }

    /// Number of installed leases, released-but-pending ones included.
    pub fn depth(&self) -> usize {
        lock(&self.state).leases.len()
    }
}

static GLOBAL: OnceLock<Arc<FetchSlot>> = OnceLock::new();

/// Set the base capability of the process-wide slot. Only the first call (or
/// a call before [`global`] is first used) has an effect.
pub fn init_global(base: SharedFetch) -> bool {
    let mut installed = false;
    GLOBAL.get_or_init(|| {
        installed = true;
        Arc::new(FetchSlot::new(base))
    });
    installed
}

/// The process-wide slot, backed by reqwest unless [`init_global`] ran first.
pub fn global() -> Arc<FetchSlot> {
    GLOBAL
        .get_or_init(|| Arc::new(FetchSlot::new(Arc::new(ReqwestFetch::default()))))
        .clone()
}

/// Issue a call through the process-wide capability.
pub fn fetch(request: FetchRequest) -> FetchFuture {
    global().fetch(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(status: u16) -> SharedFetch {
        Arc::new(move |_req: FetchRequest| -> FetchFuture {
            async move { Ok(FetchResponse::with_status(status)) }.boxed()
        })
    }

    #[test]
    fn lifo_release_restores_each_generation() {
        let base = fixed(200);
        let slot = FetchSlot::new(base.clone());

        let a = slot.lease(|_| fixed(201));
        let after_a = slot.current();
        let b = slot.lease(|_| fixed(202));

        slot.release(b);
        assert!(Arc::ptr_eq(&slot.current(), &after_a));
        slot.release(a);
        assert!(Arc::ptr_eq(&slot.current(), &base));
        assert_eq!(slot.depth(), 0);
    }

    #[test]
    fn out_of_order_release_defers_until_top_is_released() {
        let base = fixed(200);
        let slot = FetchSlot::new(base.clone());

        let a = slot.lease(|_| fixed(201));
        let b = slot.lease(|_| fixed(202));

        slot.release(a);
        assert_eq!(slot.depth(), 2);

        slot.release(b);
        assert_eq!(slot.depth(), 0);
        assert!(Arc::ptr_eq(&slot.current(), &base));
    }

    #[test]
    fn wrap_receives_the_replaced_capability() {
        let base = fixed(200);
        let slot = FetchSlot::new(base.clone());
        let mut captured = None;
        let id = slot.lease(|original| {
            captured = Some(original.clone());
            original
        });
        assert!(Arc::ptr_eq(captured.as_ref().unwrap(), &base));
        slot.release(id);
        slot.release(id);
    }
}
