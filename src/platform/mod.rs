//! Host capabilities consumed by the collectors.
//!
//! Each capability is a trait so the engine runs against native hosts
//! (tokio paint driver, procfs, reqwest) and deterministic ones alike.

pub mod fetch;
pub mod frame;
pub mod heap;
pub mod timeline;

pub use fetch::{Fetch, FetchError, FetchFuture, FetchRequest, FetchResponse, FetchSlot, ReqwestFetch, SharedFetch};
pub use frame::{FrameScheduler, ManualFrameScheduler, TokioFrameScheduler};
pub use heap::{HeapIntrospector, HeapUsage, NoHeap, ProcfsHeap};
pub use timeline::{EntryObserverHost, EntryType, PerformanceEntry, PerformanceTimeline};
