use super::*;
use std::sync::Mutex;

fn recorder() -> (Sink<u32>, Arc<Mutex<Vec<u32>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let sink: Sink<u32> = Arc::new(move |v| sink_seen.lock().unwrap().push(v));
    (sink, seen)
}

fn seen(log: &Arc<Mutex<Vec<u32>>>) -> Vec<u32> {
    log.lock().unwrap().clone()
}

async fn wait_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    tokio::task::yield_now().await;
}

// =============================================================
// Debouncer
// =============================================================

#[tokio::test(start_paused = true)]
async fn debounce_fires_last_value_once_after_quiet_period() {
    let (sink, log) = recorder();
    let debouncer = Debouncer::new(Duration::from_millis(300), sink);

    debouncer.call(1);
    wait_ms(100).await;
    debouncer.call(2);
    wait_ms(100).await;
    debouncer.call(3);
    assert!(seen(&log).is_empty());

    wait_ms(299).await;
    assert!(seen(&log).is_empty());
    wait_ms(2).await;
    assert_eq!(seen(&log), [3]);
    assert!(!debouncer.is_pending());
}

#[tokio::test(start_paused = true)]
async fn debounce_dispose_cancels_pending() {
    let (sink, log) = recorder();
    let debouncer = Debouncer::new(Duration::from_millis(300), sink);
    debouncer.call(1);
    debouncer.dispose();
    wait_ms(600).await;
    assert!(seen(&log).is_empty());
}

#[tokio::test(start_paused = true)]
async fn debounce_flush_fires_immediately_and_only_once() {
    let (sink, log) = recorder();
    let debouncer = Debouncer::new(Duration::from_millis(300), sink);
    debouncer.call(7);
    assert!(debouncer.flush());
    assert_eq!(seen(&log), [7]);

    wait_ms(600).await;
    assert_eq!(seen(&log), [7]);
    assert!(!debouncer.flush());
}

#[tokio::test(start_paused = true)]
async fn dropping_debouncer_cancels_timer() {
    let (sink, log) = recorder();
    {
        let debouncer = Debouncer::new(Duration::from_millis(300), sink);
        debouncer.call(1);
    }
    wait_ms(600).await;
    assert!(seen(&log).is_empty());
}

// =============================================================
// Throttler
// =============================================================

#[tokio::test(start_paused = true)]
async fn throttle_fires_leading_edge_immediately() {
    let (sink, log) = recorder();
    let throttler = Throttler::new(Duration::from_millis(300), sink);
    throttler.call(1);
    assert_eq!(seen(&log), [1]);
}

#[tokio::test(start_paused = true)]
async fn throttle_guarantees_trailing_call() {
    let (sink, log) = recorder();
    let throttler = Throttler::new(Duration::from_millis(300), sink);

    throttler.call(1);
    wait_ms(50).await;
    throttler.call(2);
    wait_ms(50).await;
    throttler.call(3);
    assert_eq!(seen(&log), [1]);

    wait_ms(250).await;
    assert_eq!(seen(&log), [1, 3]);
}

#[tokio::test(start_paused = true)]
async fn trailing_fire_opens_a_new_window() {
    let (sink, log) = recorder();
    let throttler = Throttler::new(Duration::from_millis(300), sink);

    throttler.call(1);
    throttler.call(2);
    wait_ms(310).await;
    assert_eq!(seen(&log), [1, 2]);

    // Still inside the window opened by the trailing fire.
    throttler.call(3);
    assert_eq!(seen(&log), [1, 2]);
    wait_ms(300).await;
    assert_eq!(seen(&log), [1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn throttle_window_closes_when_idle() {
    let (sink, log) = recorder();
    let throttler = Throttler::new(Duration::from_millis(300), sink);

    throttler.call(1);
    wait_ms(310).await;
    throttler.call(2);
    assert_eq!(seen(&log), [1, 2]);
}

#[tokio::test(start_paused = true)]
async fn at_most_one_write_per_interval_during_a_drag() {
    let (sink, log) = recorder();
    let throttler = Throttler::new(Duration::from_millis(300), sink);

    // 60 pointer moves at ~60Hz over one second.
    for i in 0..60 {
        throttler.call(i);
        wait_ms(16).await;
    }
    wait_ms(400).await;

    let fired = seen(&log);
    assert!(fired.len() <= 5, "too many writes: {fired:?}");
    assert_eq!(fired.first(), Some(&0));
    assert_eq!(fired.last(), Some(&59));
}

#[tokio::test(start_paused = true)]
async fn throttle_dispose_drops_trailing() {
    let (sink, log) = recorder();
    let throttler = Throttler::new(Duration::from_millis(300), sink);
    throttler.call(1);
    throttler.call(2);
    throttler.dispose();
    wait_ms(600).await;
    assert_eq!(seen(&log), [1]);

    // A fresh call after dispose fires immediately.
    throttler.call(3);
    assert_eq!(seen(&log), [1, 3]);
}

#[tokio::test(start_paused = true)]
async fn throttle_flush_fires_trailing_now() {
    let (sink, log) = recorder();
    let throttler = Throttler::new(Duration::from_millis(300), sink);
    throttler.call(1);
    throttler.call(2);
    assert!(throttler.is_pending());
    assert!(throttler.flush());
    assert_eq!(seen(&log), [1, 2]);

    wait_ms(600).await;
    assert_eq!(seen(&log), [1, 2]);
}
