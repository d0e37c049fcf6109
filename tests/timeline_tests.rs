use perfwatch::error::TelemetryError;
use perfwatch::platform::timeline::{
    EntryDetail, EntryObserverHost, EntrySink, EntryType, PerformanceEntry, PerformanceTimeline, Subscription,
    FIRST_CONTENTFUL_PAINT,
};
use std::sync::{Arc, Mutex};
use std::thread;

type Seen = Arc<Mutex<Vec<PerformanceEntry>>>;

fn counting_sink() -> (EntrySink, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    (Arc::new(move |e: &PerformanceEntry| s.lock().unwrap().push(e.clone())), seen)
}

fn lcp_values(seen: &Seen) -> Vec<f64> {
    seen.lock()
        .unwrap()
        .iter()
        .map(|e| match e.detail {
            EntryDetail::LargestContentfulPaint { render_time, .. } => render_time,
            _ => f64::NAN,
        })
        .collect()
}

#[test]
fn test_unsupported_type_is_rejected() {
    let timeline = PerformanceTimeline::new([EntryType::Paint]);
    let (sink, _) = counting_sink();
    let err = timeline.observe(EntryType::LayoutShift, false, sink).err().unwrap();
    assert!(matches!(err, TelemetryError::UnsupportedEntryType(EntryType::LayoutShift)));
}

#[test]
fn test_buffered_replay_waits_for_a_later_turn() {
    let timeline = PerformanceTimeline::with_all_types();
    timeline.record(PerformanceEntry::paint(FIRST_CONTENTFUL_PAINT, 120.0));
    timeline.record(PerformanceEntry::layout_shift(130.0, 0.1, false));

    // 1. Subscribing delivers nothing by itself
    let (sink, seen) = counting_sink();
    let _sub = timeline.observe(EntryType::Paint, true, sink).unwrap();
    assert!(seen.lock().unwrap().is_empty(), "Replay must not run inside observe()");

    // 2. The next recording flushes the replay ahead of the new entry
    timeline.record(PerformanceEntry::paint("first-paint", 140.0));
    let names: Vec<String> = seen.lock().unwrap().iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, vec![FIRST_CONTENTFUL_PAINT.to_string(), "first-paint".to_string()]);
}

#[test]
fn test_deliver_pending_flushes_replay() {
    let timeline = PerformanceTimeline::with_all_types();
    timeline.record(PerformanceEntry::layout_shift(10.0, 0.2, false));

    let (sink, seen) = counting_sink();
    let _sub = timeline.observe(EntryType::LayoutShift, true, sink).unwrap();
    timeline.deliver_pending();
    timeline.deliver_pending();

    assert_eq!(seen.lock().unwrap().len(), 1, "Each entry is delivered once");
}

#[tokio::test]
async fn test_runtime_delivers_replay_on_next_turn() {
    let timeline = PerformanceTimeline::with_all_types();
    timeline.record(PerformanceEntry::navigation("https://example.test/", 5.0, 42.0));

    let (sink, seen) = counting_sink();
    let _sub = timeline.observe(EntryType::Navigation, true, sink).unwrap();
    assert!(seen.lock().unwrap().is_empty());

    tokio::task::yield_now().await;
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn test_live_entry_from_another_thread_never_overtakes_replay() {
    let timeline = PerformanceTimeline::with_all_types();
    timeline.record(PerformanceEntry::largest_contentful_paint(0.0, 800.0, 0.0));
    timeline.record(PerformanceEntry::largest_contentful_paint(0.0, 1400.0, 0.0));

    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    let other = timeline.clone();
    let sink: EntrySink = Arc::new(move |e: &PerformanceEntry| {
        let first = {
            let mut seen = sink_seen.lock().unwrap();
            seen.push(e.clone());
            seen.len() == 1
        };
        if first {
            // Record concurrently while the first replayed entry is being handled
            let timeline = other.clone();
            thread::spawn(move || {
                timeline.record(PerformanceEntry::largest_contentful_paint(0.0, 2000.0, 0.0));
            })
            .join()
            .unwrap();
        }
    });

    let _sub = timeline.observe(EntryType::LargestContentfulPaint, true, sink).unwrap();
    timeline.deliver_pending();

    assert_eq!(lcp_values(&seen), vec![800.0, 1400.0, 2000.0], "Delivery must follow record order");
}

#[test]
fn test_disconnect_stops_delivery() {
    let timeline = PerformanceTimeline::with_all_types();
    let (sink, seen) = counting_sink();
    let mut sub = timeline.observe(EntryType::Event, false, sink).unwrap();

    sub.disconnect();
    sub.disconnect();
    timeline.record(PerformanceEntry::event("click", 10.0, 40.0, 1));

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(timeline.observer_count(), 0);
}

#[test]
fn test_disconnect_discards_queued_replay() {
    let timeline = PerformanceTimeline::with_all_types();
    timeline.record(PerformanceEntry::layout_shift(10.0, 0.2, false));

    let (sink, seen) = counting_sink();
    let sub = timeline.observe(EntryType::LayoutShift, true, sink).unwrap();
    drop(sub);
    timeline.deliver_pending();

    assert!(seen.lock().unwrap().is_empty());
}
