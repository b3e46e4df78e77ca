//! Property-based tests for frame decoding

use super::*;
use proptest::prelude::*;

fn arb_kind() -> impl Strategy<Value = EventKind> {
    proptest::sample::select(EventKind::ALL.to_vec())
}

fn arb_event() -> impl Strategy<Value = StreamingEvent> {
    (arb_kind(), "[a-zA-Z0-9 éü\\n\"]{0,20}", 0u32..100_000).prop_map(|(kind, content, ts)| {
        StreamingEvent::new(kind, content, f64::from(ts) / 8.0)
    })
}

fn encode(events: &[StreamingEvent]) -> Vec<u8> {
    let mut body = Vec::new();
    for event in events {
        body.extend_from_slice(b"data: ");
        body.extend_from_slice(serde_json::to_string(event).unwrap().as_bytes());
        body.extend_from_slice(b"\n\n");
    }
    body.extend_from_slice(b"data: [DONE]\n\n");
    body
}

fn decode_in_chunks(body: &[u8], cuts: &[usize]) -> Vec<StreamingEvent> {
    let mut decoder = FrameDecoder::new();
    let mut decoded = Vec::new();
    let mut start = 0;
    let mut cuts: Vec<usize> = cuts.iter().map(|c| c % (body.len() + 1)).collect();
    cuts.sort_unstable();
    for cut in cuts.into_iter().chain(std::iter::once(body.len())) {
        for frame in decoder.push(&body[start..cut]) {
            if let Frame::Event(event) = frame {
                decoded.push(event);
            }
        }
        start = cut;
    }
    if let Some(Frame::Event(event)) = decoder.finish() {
        decoded.push(event);
    }
    decoded
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Chunk boundaries never change what is decoded
    #[test]
    fn prop_chunking_is_transparent(
        events in proptest::collection::vec(arb_event(), 0..12),
        cuts in proptest::collection::vec(any::<usize>(), 0..16),
    ) {
        let body = encode(&events);
        let decoded = decode_in_chunks(&body, &cuts);
        prop_assert_eq!(decoded, events);
    }

    // Garbage lines between frames are dropped without losing neighbours
    #[test]
    fn prop_garbage_never_aborts(
        events in proptest::collection::vec(arb_event(), 1..8),
        garbage in "[a-z{}:]{1,12}",
    ) {
        let mut body = Vec::new();
        for event in &events {
            body.extend_from_slice(format!("data: {garbage}\n").as_bytes());
            body.extend_from_slice(b"data: ");
            body.extend_from_slice(serde_json::to_string(event).unwrap().as_bytes());
            body.push(b'\n');
        }
        let decoded = decode_in_chunks(&body, &[]);
        prop_assert_eq!(decoded, events);
    }

    // Nothing after the sentinel is ever decoded
    #[test]
    fn prop_nothing_after_done(
        before in proptest::collection::vec(arb_event(), 0..5),
        after in proptest::collection::vec(arb_event(), 1..5),
    ) {
        let mut body = encode(&before);
        body.extend_from_slice(&encode(&after));
        let decoded = decode_in_chunks(&body, &[]);
        prop_assert_eq!(decoded, before);
    }
}
