//! Runs in its own test binary: the process-wide slot can only be seeded once.

use futures_util::future::FutureExt;
use perfwatch::collectors::CallInterceptor;
use perfwatch::kernel::time::MonotonicClock;
use perfwatch::platform::fetch::{self, FetchFuture, FetchRequest, FetchResponse, SharedFetch};
use perfwatch::Collector;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_global_capability_round_trip() {
    let base: SharedFetch = Arc::new(|_req: FetchRequest| -> FetchFuture {
        async { Ok(FetchResponse::with_status(204)) }.boxed()
    });
    assert!(fetch::init_global(base.clone()));
    assert!(!fetch::init_global(base.clone()), "Second seed is ignored");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handle = CallInterceptor::new(fetch::global(), Arc::new(MonotonicClock::new()))
        .start(move |records| sink.lock().unwrap().push(records));

    // Any caller in the process goes through the interceptor
    let response = fetch::fetch(FetchRequest::get("https://api.test/ping")).await.unwrap();
    assert_eq!(response.status, 204);
    assert_eq!(seen.lock().unwrap().len(), 1);

    handle.stop();
    assert!(Arc::ptr_eq(&fetch::global().current(), &base));

    fetch::fetch(FetchRequest::get("https://api.test/ping")).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
}
