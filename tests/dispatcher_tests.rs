//! Dispatcher accounting, event publishing and triage hints.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use common::{
    build_format_a, build_format_b, c1_burst, make_dll_data, packet_from_bytes, set_symbol,
    t1_burst, MemoryPublisher,
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::mpsc;
use wmbus_radio::config::DiagConfig;
use wmbus_radio::wmbus::{DiagnosticsPublisher, Dispatcher, Packet};

fn dispatcher_with(
    publisher: Option<Arc<dyn DiagnosticsPublisher>>,
    config: DiagConfig,
) -> (mpsc::Sender<Packet>, Dispatcher) {
    let (tx, rx) = mpsc::channel(512);
    (tx, Dispatcher::new(rx, publisher, config))
}

fn feed(tx: &mpsc::Sender<Packet>, dispatcher: &mut Dispatcher, packet: Packet) {
    tx.try_send(packet).unwrap();
    dispatcher.poll();
}

#[test]
fn test_ok_and_drop_accounting() {
    let publisher = MemoryPublisher::connected();
    let (tx, mut dispatcher) = dispatcher_with(Some(publisher.clone()), DiagConfig::default());

    let good = c1_burst(0xCD, &build_format_a(&make_dll_data(14)));
    feed(&tx, &mut dispatcher, packet_from_bytes(&good, -66));

    let mut bad = good.clone();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;
    feed(&tx, &mut dispatcher, packet_from_bytes(&bad, -79));

    let window = dispatcher.window();
    assert_eq!(window.total(), 2);
    assert_eq!(window.ok(), 1);
    assert_eq!(window.dropped(), 1);

    let payloads = publisher.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["event"], "dropped");
    assert_eq!(payloads[0]["reason"], "dll_crc_failed");
    assert_eq!(payloads[0]["mode"], "C1");
    assert_eq!(payloads[0]["rssi"], -79);
    assert!(payloads[0]["raw"].is_string());
}

#[test]
fn test_truncated_event_is_published() {
    let publisher = MemoryPublisher::connected();
    let (tx, mut dispatcher) = dispatcher_with(Some(publisher.clone()), DiagConfig::default());

    let mut wire = build_format_a(&make_dll_data(14));
    wire.pop();
    feed(
        &tx,
        &mut dispatcher,
        packet_from_bytes(&c1_burst(0xCD, &wire), -84),
    );

    assert_eq!(dispatcher.window().truncated(), 1);
    assert_eq!(dispatcher.window().dropped(), 0);

    let payloads = publisher.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["event"], "truncated");
    assert_eq!(payloads[0]["want"], 19);
    assert_eq!(payloads[0]["got"], 18);
}

#[test]
fn test_publish_raw_gating() {
    let publisher = MemoryPublisher::connected();
    let config = DiagConfig {
        publish_raw: false,
        ..DiagConfig::default()
    };
    let (tx, mut dispatcher) = dispatcher_with(Some(publisher.clone()), config);

    feed(
        &tx,
        &mut dispatcher,
        packet_from_bytes(&[0xAA; 20], -90), // T1 too_short
    );

    let payloads = publisher.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["event"], "dropped");
    assert!(payloads[0].get("raw").is_none());
}

#[test]
fn test_empty_topic_disables_publishing() {
    let publisher = MemoryPublisher::connected();
    let config = DiagConfig {
        topic: String::new(),
        ..DiagConfig::default()
    };
    let (tx, mut dispatcher) = dispatcher_with(Some(publisher.clone()), config);

    feed(&tx, &mut dispatcher, packet_from_bytes(&[0xAA; 20], -90));
    dispatcher.flush_summary(Instant::now());

    assert!(publisher.take().is_empty());
    // Accounting continues regardless.
    assert_eq!(dispatcher.window().total(), 0); // flushed above
}

#[test]
fn test_summary_resets_window() {
    let publisher = MemoryPublisher::connected();
    let (tx, mut dispatcher) = dispatcher_with(Some(publisher.clone()), DiagConfig::default());

    let good = c1_burst(0xCD, &build_format_a(&make_dll_data(14)));
    for _ in 0..5 {
        feed(&tx, &mut dispatcher, packet_from_bytes(&good, -64));
    }
    dispatcher.flush_summary(Instant::now());

    let payloads = publisher.payloads();
    let summary = payloads.last().unwrap();
    assert_eq!(summary["event"], "summary");
    assert_eq!(summary["total"], 5);
    assert_eq!(summary["ok"], 5);
    assert_eq!(summary["c1"]["total"], 5);
    assert_eq!(summary["avg_ok_rssi"], -64);
    assert_eq!(summary["reasons_sum_mismatch"], 0);
    assert_eq!(summary["hint_code"], "GOOD");

    let window = dispatcher.window();
    assert_eq!(window.total(), 0);
    assert_eq!(window.ok(), 0);
    assert_eq!(window.hint().code, "NO_DATA");
}

#[test]
fn test_summary_skipped_when_disconnected_but_window_resets() {
    let publisher = MemoryPublisher::disconnected();
    let (tx, mut dispatcher) = dispatcher_with(Some(publisher.clone()), DiagConfig::default());

    feed(&tx, &mut dispatcher, packet_from_bytes(&[0xAA; 20], -90));
    dispatcher.flush_summary(Instant::now());

    assert!(publisher.take().is_empty());
    assert_eq!(dispatcher.window().total(), 0);
}

#[test]
fn test_handler_panic_is_contained() {
    let (tx, mut dispatcher) = dispatcher_with(None, DiagConfig::default());

    let calls = Arc::new(AtomicU32::new(0));
    let calls_second = calls.clone();
    dispatcher.add_frame_handler(|_frame| panic!("handler bug"));
    dispatcher.add_frame_handler(move |frame| {
        calls_second.fetch_add(1, Ordering::Relaxed);
        frame.mark_as_handled();
    });

    let good = c1_burst(0xCD, &build_format_a(&make_dll_data(14)));
    feed(&tx, &mut dispatcher, packet_from_bytes(&good, -66));

    assert_eq!(calls.load(Ordering::Relaxed), 1);
    assert_eq!(dispatcher.window().ok(), 1);
}

#[test]
fn test_handlers_see_frames_in_fifo_order() {
    let (tx, mut dispatcher) = dispatcher_with(None, DiagConfig::default());

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    dispatcher.add_frame_handler(move |frame| {
        sink.lock().unwrap().push(frame.bytes()[10]);
        frame.mark_as_handled();
    });

    for marker in [0x11u8, 0x22, 0x33] {
        let mut data = make_dll_data(14);
        data[10] = marker;
        let burst = c1_burst(0xCD, &build_format_a(&data));
        tx.try_send(packet_from_bytes(&burst, -60)).unwrap();
    }
    for _ in 0..3 {
        dispatcher.poll();
    }

    assert_eq!(*seen.lock().unwrap(), vec![0x11, 0x22, 0x33]);
}

#[test]
fn test_triage_t1_symbol_errors() {
    // 240 T1 bursts with 7 of 112 symbols stomped (6%): enough invalid
    // symbols for the symbol-error rule, too strong for the weak-signal rule
    // and too weak for the overload rule.
    let publisher = MemoryPublisher::connected();
    let (tx, mut dispatcher) = dispatcher_with(Some(publisher.clone()), DiagConfig::default());

    let wire = build_format_a(&make_dll_data(47));
    let clean = t1_burst(&wire);
    let symbols = clean.len() * 8 / 12 * 2;
    assert_eq!(symbols, 112);

    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let mut indices: Vec<usize> = (0..symbols).collect();
    for _ in 0..240 {
        let mut burst = clean.clone();
        indices.shuffle(&mut rng);
        for &index in indices.iter().take(7) {
            set_symbol(&mut burst, index, 0b111111);
        }
        feed(&tx, &mut dispatcher, packet_from_bytes(&burst, -85));
    }

    assert_eq!(dispatcher.window().hint().code, "T1_SYMBOL_ERRORS");

    dispatcher.flush_summary(Instant::now());
    let payloads = publisher.payloads();
    let summary = payloads.last().unwrap();
    assert_eq!(summary["hint_code"], "T1_SYMBOL_ERRORS");
    assert_eq!(summary["t1"]["total"], 240);
    assert!(summary["t1"]["sym_invalid_pct"].as_u64().unwrap() >= 5);
}

#[test]
fn test_triage_c1_overload() {
    // Strong signal, yet 40 of 50 C1 frames fail CRC: overload/multipath.
    let (tx, mut dispatcher) = dispatcher_with(None, DiagConfig::default());

    let good = c1_burst(0xCD, &build_format_a(&make_dll_data(14)));
    let mut bad = good.clone();
    bad[12] ^= 0x01;

    for _ in 0..10 {
        feed(&tx, &mut dispatcher, packet_from_bytes(&good, -60));
    }
    for _ in 0..40 {
        feed(&tx, &mut dispatcher, packet_from_bytes(&bad, -70));
    }

    assert_eq!(dispatcher.window().hint().code, "C1_OVERLOAD_OR_MULTIPATH");
}
