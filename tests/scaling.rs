//! Concurrency and fan-out tests for the subscription engine.
//!
//! - Interleaved appends and start/stop requests from many threads
//! - Fan-out to many sessions with the data generator running
//! - Whole sessions driven on their own threads

use etp_devkit::generator::generate_once;
use etp_devkit::messages::v12::{ChannelData, ChannelMetadata};
use etp_devkit::protocol::channel_streaming_v12::{
    StreamingConsumer, StreamingConsumerEvents, StreamingConsumerSender,
};
use etp_devkit::protocol::MessageArgs;
use etp_devkit::{
    memory_pair, CapabilityConfig, ChannelId, ChannelSpec, ChannelStreamingCallbacks,
    ChannelSubscriptionOptions, ContextScope, DataGenerator, DataValue, DevKitConfig, DevKitStore,
    DomainModel, EtpUri, GeneratorConfig, IndexKind, IndexValue, ObjectSpec, Session, SessionConfig,
    SessionDriver, SessionId, StartIndex, SubscriptionInfo, SubscriptionManager,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CHANNELS: i64 = 8;
const SESSIONS: usize = 6;

fn manager_with_channels(count: i64) -> Arc<SubscriptionManager> {
    let manager = Arc::new(SubscriptionManager::default());
    let well = manager.create_object(ObjectSpec::well("Well 01")).unwrap();
    for i in 0..count {
        let spec = ChannelSpec::new(format!("CH{:02}", i), "m", IndexKind::Time);
        manager.create_object(ObjectSpec::channel(well, spec)).unwrap();
    }
    manager
}

fn well_scope() -> SubscriptionInfo {
    SubscriptionInfo::new(EtpUri::parse("eml://witsml20/Well").unwrap(), ContextScope::SourcesOrSelf, 8)
}

// --- Lock-Serialized Fan-Out ---

#[test]
fn test_interleaved_append_and_subscribe() {
    let manager = manager_with_channels(CHANNELS);
    // (session, channel) pairs currently started, only touched under the
    // manager lock.
    let members: Arc<Mutex<HashSet<(SessionId, ChannelId)>>> = Arc::default();
    let torn = Arc::new(AtomicUsize::new(0));
    let delivered = Arc::new(AtomicUsize::new(0));

    let sessions: Vec<SessionId> = (0..SESSIONS).map(|_| SessionId::new()).collect();
    for session in &sessions {
        let members = Arc::clone(&members);
        let torn = Arc::clone(&torn);
        let delivered = Arc::clone(&delivered);
        let callbacks = ChannelStreamingCallbacks::new().data_appended(move |session, batch| {
            if let etp_devkit::subscriptions::ChannelDataBatch::V12(items) = batch {
                let members = members.lock();
                for item in items {
                    if !members.contains(&(session, item.channel_id)) {
                        torn.fetch_add(1, Ordering::SeqCst);
                    }
                    delivered.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        manager.start_channel_subscription(*session, ChannelSubscriptionOptions::default(), callbacks);
        manager.add_channel_subscription_channel_scope(*session, well_scope()).unwrap();
    }

    let running = Arc::new(AtomicBool::new(true));
    let appender = {
        let manager = Arc::clone(&manager);
        let running = Arc::clone(&running);
        thread::spawn(move || {
            let config = GeneratorConfig::default();
            let mut tick = 0;
            while running.load(Ordering::SeqCst) {
                manager.execute_with_lock(|engine| generate_once(engine, &config, tick));
                tick += 1;
            }
            tick
        })
    };

    let togglers: Vec<_> = sessions
        .iter()
        .enumerate()
        .map(|(n, session)| {
            let manager = Arc::clone(&manager);
            let members = Arc::clone(&members);
            let session = *session;
            thread::spawn(move || {
                for round in 0..200 {
                    let channel = ChannelId(((n + round) as i64 % CHANNELS) + 1);
                    manager.execute_with_lock(|engine| {
                        if engine.start_channel_streaming(session, channel, false, StartIndex::Latest) {
                            members.lock().insert((session, channel));
                        } else if engine.stop_channel_streaming(session, channel) {
                            members.lock().remove(&(session, channel));
                        }
                    });
                }
            })
        })
        .collect();

    for toggler in togglers {
        toggler.join().unwrap();
    }
    running.store(false, Ordering::SeqCst);
    let ticks = appender.join().unwrap();

    println!(
        "  {} ticks, {} items delivered",
        ticks,
        delivered.load(Ordering::SeqCst)
    );
    assert_eq!(torn.load(Ordering::SeqCst), 0);
    assert!(ticks > 0);
}

#[test]
fn test_generator_fans_out_to_every_session() {
    let manager = manager_with_channels(4);
    let counts: Vec<Arc<AtomicUsize>> = (0..SESSIONS).map(|_| Arc::new(AtomicUsize::new(0))).collect();

    for count in &counts {
        let session = SessionId::new();
        let count = Arc::clone(count);
        let options = ChannelSubscriptionOptions {
            bulk_mode: true,
            ..Default::default()
        };
        manager.start_channel_subscription(
            session,
            options,
            ChannelStreamingCallbacks::new().data_appended(move |_, batch| {
                count.fetch_add(batch.len(), Ordering::SeqCst);
            }),
        );
        assert_eq!(manager.add_channel_subscription_channel_scope(session, well_scope()).unwrap().len(), 4);
    }

    let generator = DataGenerator::spawn(
        Arc::clone(&manager),
        GeneratorConfig {
            interval_ms: 2,
            depth_step: 1.0,
        },
    );
    thread::sleep(Duration::from_millis(50));
    let ticks = generator.stop() as usize;

    // Every tick reaches every session, one point per channel.
    for count in &counts {
        assert_eq!(count.load(Ordering::SeqCst), ticks * 4);
    }
}

// --- Sessions On Their Own Threads ---

#[derive(Clone, Default)]
struct Tally {
    metadata: Arc<AtomicUsize>,
    data: Arc<AtomicUsize>,
}

impl StreamingConsumerEvents for Tally {
    fn on_channel_metadata(&mut self, _sender: &StreamingConsumerSender, args: &MessageArgs<ChannelMetadata>) {
        self.metadata.fetch_add(args.body.channels.len(), Ordering::SeqCst);
    }

    fn on_channel_data(&mut self, _sender: &StreamingConsumerSender, args: &MessageArgs<ChannelData>) {
        self.data.fetch_add(args.body.data.len(), Ordering::SeqCst);
    }
}

fn wait_for(deadline: Duration, done: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn test_driven_sessions_stream_concurrently() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store = DevKitStore::new(DevKitConfig::default(), DomainModel::default());
    let manager = store.manager();
    let well = manager.create_object(ObjectSpec::well("Well 01")).unwrap();
    for i in 0..3 {
        let spec = ChannelSpec::new(format!("CH{}", i), "m", IndexKind::Time);
        manager.create_object(ObjectSpec::channel(well, spec)).unwrap();
    }

    let mut drivers = Vec::new();
    let mut tallies = Vec::new();
    for _ in 0..4 {
        let (server_end, client_end) = memory_pair();
        let mut server = store.accept(server_end.transport.clone()).unwrap();
        let mut client: Session = Session::client(SessionConfig::v12(), client_end.transport.clone());
        let tally = Tally::default();
        let consumer = StreamingConsumer::new(
            client.context(),
            &CapabilityConfig::default(),
            Some(Box::new(tally.clone())),
        );
        let sender = consumer.sender();
        client.register_handler(Box::new(consumer)).unwrap();
        client.request_session().unwrap();

        // Handshake by hand, then hand both ends to drivers.
        let frame = server_end.inbox.recv().unwrap();
        server.handle_frame(&frame).unwrap();
        let frame = client_end.inbox.recv().unwrap();
        client.handle_frame(&frame).unwrap();
        assert!(client.is_open());

        sender.start_streaming().unwrap();
        drivers.push(SessionDriver::spawn(server, server_end.inbox));
        drivers.push(SessionDriver::spawn(client, client_end.inbox));
        tallies.push(tally);
    }

    assert!(wait_for(Duration::from_secs(5), || tallies
        .iter()
        .all(|t| t.metadata.load(Ordering::SeqCst) == 3)));

    for i in 0..50 {
        for id in 1..=3 {
            manager
                .append_data(ChannelId(id), IndexValue::Time(i), DataValue::Long(i))
                .unwrap();
        }
    }

    assert!(wait_for(Duration::from_secs(5), || tallies
        .iter()
        .all(|t| t.data.load(Ordering::SeqCst) == 150)));

    for driver in drivers {
        driver.stop("test over");
    }
    assert_eq!(manager.channel_subscription_count(), 0);
}
