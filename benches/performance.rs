//! Performance benchmarks for the subscription engine and message codec.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use etp_devkit::generator::generate_once;
use etp_devkit::messages::v12::{ChannelData, DataItem};
use etp_devkit::messages::{decode_frame, encode_frame, MessageHeader};
use etp_devkit::{
    ChannelId, ChannelSpec, ChannelStreamingCallbacks, ChannelSubscriptionOptions, ContextScope,
    DataValue, Encoding, EtpUri, GeneratorConfig, IndexKind, IndexValue, MessageBody, ObjectSpec,
    SessionId, SubscriptionInfo, SubscriptionManager,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn manager_with_channels(channels: usize) -> SubscriptionManager {
    let manager = SubscriptionManager::default();
    let well = manager.create_object(ObjectSpec::well("Well 01")).unwrap();
    for i in 0..channels {
        let spec = ChannelSpec::new(format!("CH{}", i), "m", IndexKind::Time);
        manager.create_object(ObjectSpec::channel(well, spec)).unwrap();
    }
    manager
}

/// Subscribe `sessions` sessions in bulk mode to every channel.
fn subscribe_all(manager: &SubscriptionManager, sessions: usize) -> Arc<AtomicUsize> {
    let delivered = Arc::new(AtomicUsize::new(0));
    let info = SubscriptionInfo::new(EtpUri::parse("eml://witsml20/Well").unwrap(), ContextScope::SourcesOrSelf, 8);
    for _ in 0..sessions {
        let session = SessionId::new();
        let delivered = Arc::clone(&delivered);
        let options = ChannelSubscriptionOptions {
            bulk_mode: true,
            ..Default::default()
        };
        manager.start_channel_subscription(
            session,
            options,
            ChannelStreamingCallbacks::new().data_appended(move |_, batch| {
                delivered.fetch_add(batch.len(), Ordering::Relaxed);
            }),
        );
        manager.add_channel_subscription_channel_scope(session, info.clone()).unwrap();
    }
    delivered
}

/// One append fanned out to a growing number of sessions.
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for sessions in [1, 10, 100, 500] {
        group.bench_with_input(BenchmarkId::new("sessions", sessions), &sessions, |b, &sessions| {
            let manager = manager_with_channels(1);
            let delivered = subscribe_all(&manager, sessions);
            let mut index = 0i64;

            b.iter(|| {
                index += 1;
                manager
                    .append_data(ChannelId(1), IndexValue::Time(index), DataValue::Double(1.0))
                    .unwrap();
            });
            black_box(delivered.load(Ordering::Relaxed));
        });
    }

    group.finish();
}

/// A generator tick across many channels with a few sessions watching.
fn bench_generator_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("generator_tick");

    for channels in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("channels", channels), &channels, |b, &channels| {
            let manager = manager_with_channels(channels);
            subscribe_all(&manager, 4);
            let config = GeneratorConfig::default();
            let mut tick = 0u64;

            b.iter(|| {
                tick += 1;
                black_box(manager.execute_with_lock(|engine| generate_once(engine, &config, tick)));
            });
        });
    }

    group.finish();
}

fn bench_channel_data_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_data_codec");

    for items in [1, 100, 10_000] {
        let body = ChannelData {
            data: (0..items)
                .map(|i| DataItem {
                    channel_id: ChannelId(1),
                    indexes: vec![IndexValue::Time(i)],
                    value: DataValue::Double(i as f64),
                    value_attributes: Vec::new(),
                })
                .collect(),
        };
        let header = MessageHeader::new(ChannelData::PROTOCOL.id(), ChannelData::MESSAGE_TYPE);

        for encoding in [Encoding::Binary, Encoding::Json] {
            let id = BenchmarkId::new(format!("{:?}", encoding), items);
            group.bench_with_input(id, &items, |b, _| {
                b.iter(|| {
                    let frame = encode_frame(encoding, &header, &body).unwrap();
                    black_box(decode_frame(encoding, &frame).unwrap());
                });
            });
        }
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_fan_out,
    bench_generator_tick,
    bench_channel_data_codec,
);

criterion_main!(benches);
