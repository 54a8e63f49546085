use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use skillswap_collab::broadcast::RelayRoom;
use skillswap_collab::config::CollabConfig;
use skillswap_collab::document::Document;
use skillswap_collab::identity::UserIdentity;
use skillswap_collab::presence::PresenceTracker;
use skillswap_collab::protocol::{CursorRange, EditEvent};
use skillswap_collab::session::CollabSession;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

fn note_text(len: usize) -> String {
    "lorem ipsum ".repeat(len / 12 + 1)[..len].to_string()
}

fn bench_update_encode(c: &mut Criterion) {
    let event = EditEvent::update("doc-1", "alice", "Alice", note_text(4096), 7);

    c.bench_function("update_encode_4KB", |b| {
        b.iter(|| black_box(black_box(&event).encode().unwrap()))
    });
}

fn bench_update_decode(c: &mut Criterion) {
    let encoded = EditEvent::update("doc-1", "alice", "Alice", note_text(4096), 7)
        .encode()
        .unwrap();

    c.bench_function("update_decode_4KB", |b| {
        b.iter(|| black_box(EditEvent::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_cursor_decode(c: &mut Criterion) {
    let event = EditEvent::cursor_move("doc-1", "alice", "Alice", CursorRange::new(120, 8), 7).unwrap();
    let encoded = event.encode().unwrap();

    c.bench_function("cursor_decode_and_parse", |b| {
        b.iter(|| {
            let event = EditEvent::decode(black_box(&encoded)).unwrap();
            black_box(event.cursor_range().unwrap());
        })
    });
}

fn bench_typing_burst(c: &mut Criterion) {
    let mut doc = Document::new("doc-1", "session-1");
    doc.set_content(note_text(2048), 1);
    let config = CollabConfig::default();

    c.bench_function("typing_burst_100_keystrokes", |b| {
        b.iter(|| {
            let mut session = CollabSession::new(UserIdentity::new("me", "Me"), &doc, &config);
            let start = Instant::now();
            let mut text = session.content().to_string();
            for i in 0..100u64 {
                text.push('x');
                session.local_edit(text.clone(), start + Duration::from_millis(i * 10));
            }
            black_box(session.poll_timers(start + Duration::from_secs(5)));
        })
    });
}

fn bench_remote_update_apply(c: &mut Criterion) {
    let doc = Document::new("doc-1", "session-1");
    let config = CollabConfig::default();
    let mut session = CollabSession::new(UserIdentity::new("me", "Me"), &doc, &config);
    let update = EditEvent::update("doc-1", "other", "Bo", note_text(4096), 2);

    c.bench_function("remote_update_apply_4KB", |b| {
        b.iter(|| black_box(session.on_remote(black_box(&update), Instant::now())))
    });
}

fn bench_presence_sweep_100(c: &mut Criterion) {
    c.bench_function("presence_sweep_100_cursors", |b| {
        b.iter(|| {
            let mut tracker = PresenceTracker::new(Duration::from_millis(5_000));
            let now = Instant::now();
            for i in 0..100 {
                tracker.move_cursor(&format!("user-{i}"), "User", CursorRange::caret(i), now);
            }
            black_box(tracker.sweep(now + Duration::from_secs(10)));
        })
    });
}

fn bench_room_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("room_fan_out_1000_frames_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let room = RelayRoom::new(2048);

                let mut receivers = Vec::new();
                for _ in 0..100 {
                    receivers.push(room.add_peer(Uuid::new_v4(), 1_000).await.unwrap());
                }

                let frame = Arc::new(note_text(512));
                for _ in 0..1000 {
                    room.broadcast_raw(black_box(frame.clone()));
                }
            });
        })
    });
}

criterion_group!(
    benches,
    bench_update_encode,
    bench_update_decode,
    bench_cursor_decode,
    bench_typing_burst,
    bench_remote_update_apply,
    bench_presence_sweep_100,
    bench_room_fan_out,
);
criterion_main!(benches);
