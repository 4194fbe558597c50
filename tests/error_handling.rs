//! Error handling and edge case tests.

use crossbeam_channel::Receiver;
use etp_devkit::messages::core::ProtocolException;
use etp_devkit::messages::v12::{ChannelRangeInfo, GetChannelMetadataResponse, IndexInterval};
use etp_devkit::protocol::channel_subscribe::{
    ChannelSubscribeCustomer, ChannelSubscribeCustomerEvents, ChannelSubscribeCustomerSender,
};
use etp_devkit::protocol::MessageArgs;
use etp_devkit::{
    memory_pair, CapabilityConfig, ChannelId, ChannelSpec, DataValue, DevKitConfig, DevKitStore,
    DomainModel, ErrorCode, EtpError, EtpVersion, IndexKind, IndexValue, ObjectSpec, Session,
    SessionConfig, SessionState, Uuid,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Clone, Default)]
struct Errors {
    whole: Arc<Mutex<Vec<ErrorCode>>>,
    keyed: Arc<Mutex<BTreeMap<String, ErrorCode>>>,
    answered: Arc<Mutex<Vec<String>>>,
}

impl ChannelSubscribeCustomerEvents for Errors {
    fn on_get_channel_metadata_response(
        &mut self,
        _sender: &ChannelSubscribeCustomerSender,
        args: &MessageArgs<GetChannelMetadataResponse>,
    ) {
        self.answered.lock().extend(args.body.metadata.keys().cloned());
    }

    fn on_protocol_exception(&mut self, _sender: &ChannelSubscribeCustomerSender, args: &MessageArgs<ProtocolException>) {
        if let Some(error) = &args.body.error {
            self.whole.lock().push(error.error_code());
        }
        self.keyed
            .lock()
            .extend(args.body.errors.iter().map(|(k, e)| (k.clone(), e.error_code())));
    }
}

fn pump(client: &mut Session, client_inbox: &Receiver<Vec<u8>>, server: &mut Session, server_inbox: &Receiver<Vec<u8>>) {
    loop {
        let mut moved = false;
        while let Ok(frame) = server_inbox.try_recv() {
            server.handle_frame(&frame).unwrap();
            moved = true;
        }
        while let Ok(frame) = client_inbox.try_recv() {
            client.handle_frame(&frame).unwrap();
            moved = true;
        }
        if !moved {
            break;
        }
    }
}

/// Store with ROPA (id 1), an open 1.2 session and a customer on it.
fn open_customer(config: DevKitConfig) -> (DevKitStore, Session, Session, Receiver<Vec<u8>>, Receiver<Vec<u8>>, ChannelSubscribeCustomerSender, Errors) {
    let store = DevKitStore::new(config, DomainModel::default());
    let manager = store.manager();
    let well = manager.create_object(ObjectSpec::well("Well 01")).unwrap();
    manager
        .create_object(ObjectSpec::channel(well, ChannelSpec::new("ROPA", "m/h", IndexKind::Time)))
        .unwrap();
    manager.append_data(ChannelId(1), IndexValue::Time(0), DataValue::Double(0.0)).unwrap();

    let (server_end, client_end) = memory_pair();
    let mut server = store.accept(server_end.transport.clone()).unwrap();
    let mut client = Session::client(SessionConfig::v12(), client_end.transport.clone());
    let errors = Errors::default();
    let customer = ChannelSubscribeCustomer::new(
        client.context(),
        &CapabilityConfig::default(),
        Some(Box::new(errors.clone())),
    );
    let sender = customer.sender();
    client.register_handler(Box::new(customer)).unwrap();
    client.request_session().unwrap();
    pump(&mut client, &client_end.inbox, &mut server, &server_end.inbox);
    assert!(client.is_open());

    (store, client, server, client_end.inbox, server_end.inbox, sender, errors)
}

fn interval() -> IndexInterval {
    IndexInterval {
        start_index: IndexValue::Time(0),
        end_index: IndexValue::Time(100),
        uom: "us".to_string(),
    }
}

// --- Configuration Errors ---

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("devkit.json");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(
        file,
        r#"{{ "simple_streamer": true, "describe_depth": 2, "session": {{ "version": "V11" }} }}"#
    )
    .unwrap();

    let config = DevKitConfig::from_json_file(&path).unwrap();
    assert!(config.simple_streamer);
    assert_eq!(config.describe_depth, 2);
    assert_eq!(config.session.version, EtpVersion::V11);
    assert_eq!(config.generator.interval_ms, 1_000);
}

#[test]
fn test_malformed_config_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ \"simple_streamer\": ").unwrap();

    let result = DevKitConfig::from_json_file(&path);
    assert!(matches!(result, Err(EtpError::InvalidArgument(_))));
}

// --- Handshake Errors ---

#[test]
fn test_version_mismatch_leaves_sessions_pending() {
    let store = DevKitStore::new(DevKitConfig::default(), DomainModel::default());
    let (server_end, client_end) = memory_pair();
    let mut server = store.accept(server_end.transport.clone()).unwrap();
    let mut client = Session::client(SessionConfig::v11(), client_end.transport.clone());

    client.request_session().unwrap();
    pump(&mut client, &client_end.inbox, &mut server, &server_end.inbox);

    assert_eq!(client.state(), SessionState::Pending);
    assert_eq!(server.state(), SessionState::Pending);
    assert_eq!(store.manager().channel_subscription_count(), 0);
}

#[test]
fn test_server_cannot_request_session() {
    let store = DevKitStore::new(DevKitConfig::default(), DomainModel::default());
    let (server_end, _client_end) = memory_pair();
    let mut server = store.accept(server_end.transport.clone()).unwrap();
    assert!(matches!(server.request_session(), Err(EtpError::InvalidState(_))));
}

#[test]
fn test_closed_session_rejects_frames() {
    let (store, mut client, mut server, client_inbox, server_inbox, _, _) = open_customer(DevKitConfig::default());
    server.close("maintenance").unwrap();
    pump(&mut client, &client_inbox, &mut server, &server_inbox);
    assert_eq!(client.state(), SessionState::Closed);
    assert!(matches!(server.handle_frame(&[0u8; 4]), Err(EtpError::SessionClosed)));
    assert_eq!(store.manager().channel_subscription_count(), 0);
}

// --- ChannelSubscribe Errors ---

#[test]
fn test_metadata_with_bad_uri_answers_the_rest() {
    let (store, mut client, mut server, client_inbox, server_inbox, customer, errors) =
        open_customer(DevKitConfig::default());
    let ropa = store
        .manager()
        .execute_with_lock(|e| e.model().channel(ChannelId(1)).map(|o| o.uuid))
        .unwrap();
    let uri = store.manager().execute_with_lock(|e| e.model().uri(ropa)).unwrap();

    let mut uris = BTreeMap::new();
    uris.insert("good".to_string(), uri.to_string());
    uris.insert("bad".to_string(), "not a uri".to_string());
    uris.insert("missing".to_string(), format!("eml://witsml20/Channel({})", Uuid::new_v4()));
    customer.get_channel_metadata(uris).unwrap();
    pump(&mut client, &client_inbox, &mut server, &server_inbox);

    assert_eq!(*errors.answered.lock(), vec!["good".to_string()]);
    let keyed = errors.keyed.lock();
    assert_eq!(keyed["bad"], ErrorCode::InvalidUri);
    assert_eq!(keyed["missing"], ErrorCode::NotFound);
    assert!(errors.whole.lock().is_empty());
}

#[test]
fn test_unsubscribe_unknown_channels() {
    let (_store, mut client, mut server, client_inbox, server_inbox, customer, errors) =
        open_customer(DevKitConfig::default());

    let mut ids = BTreeMap::new();
    ids.insert("a".to_string(), ChannelId(41));
    ids.insert("b".to_string(), ChannelId(42));
    customer.unsubscribe_channels(ids).unwrap();
    pump(&mut client, &client_inbox, &mut server, &server_inbox);

    assert_eq!(*errors.whole.lock(), vec![ErrorCode::InvalidChannelId]);
    assert!(errors.keyed.lock().is_empty());
}

#[test]
fn test_range_channel_limit() {
    let mut config = DevKitConfig::default();
    config.capabilities.max_range_channels = 1;
    let (_store, mut client, mut server, client_inbox, server_inbox, customer, errors) = open_customer(config);

    customer
        .get_ranges(
            Uuid::new_v4(),
            vec![ChannelRangeInfo {
                channel_ids: vec![ChannelId(1), ChannelId(2)],
                interval: interval(),
            }],
        )
        .unwrap();
    pump(&mut client, &client_inbox, &mut server, &server_inbox);

    assert_eq!(*errors.whole.lock(), vec![ErrorCode::LimitExceeded]);
}

#[test]
fn test_duplicate_and_unknown_request_uuids() {
    let (_store, _client, _server, _client_inbox, _server_inbox, customer, _errors) =
        open_customer(DevKitConfig::default());
    let request = Uuid::new_v4();
    let ranges = || {
        vec![ChannelRangeInfo {
            channel_ids: vec![ChannelId(1)],
            interval: interval(),
        }]
    };

    customer.get_ranges(request, ranges()).unwrap();
    assert!(matches!(
        customer.get_ranges(request, ranges()),
        Err(EtpError::RequestUuidRejected(id)) if id == request
    ));
    assert!(matches!(customer.cancel_get_ranges(Uuid::new_v4()), Err(EtpError::NotFound(_))));
    assert!(customer.cancel_get_ranges(request).is_ok());
}
