use bytes::Bytes;
use uuid::uuid;

use super::*;

use util::{subscribe, TestPeer};

#[test]
fn laird_handshake() {
    subscribe();
    let mut peer = TestPeer::new(Variant::Laird);
    peer.connect();
    assert_eq!(peer.conn.state(), ConnectionState::Connected);
    assert_eq!(peer.conn.variant(), Some(Variant::Laird));
    assert_eq!(peer.conn.last_error(), None);
    assert_eq!(
        peer.drain_events(),
        vec![
            Event::StateChanged(ConnectionState::Connecting),
            Event::StateChanged(ConnectionState::Connected),
            Event::Connected,
        ]
    );
    let chars = Variant::Laird.characteristics();
    assert_eq!(
        peer.ops,
        vec![
            Io::Connect,
            Io::DiscoverServices,
            Io::DiscoverCharacteristics {
                service: Variant::Laird.service(),
            },
            Io::WriteDescriptor {
                characteristic: chars.tx_fifo,
                value: Bytes::from_static(&NOTIFY_ENABLE),
            },
            Io::WriteDescriptor {
                characteristic: chars.modem_out,
                value: Bytes::from_static(&NOTIFY_ENABLE),
            },
            Io::WriteCharacteristic {
                characteristic: chars.modem_in,
                value: Bytes::from_static(Variant::Laird.modem_set()),
            },
            Io::ReadCharacteristic {
                characteristic: chars.modem_out,
            },
        ]
    );
}

#[test]
fn blueradios_mode_switch_precedes_subscriptions() {
    subscribe();
    let mut peer = TestPeer::new(Variant::BlueRadios);
    peer.connect();
    assert_eq!(peer.conn.state(), ConnectionState::Connected);
    assert_eq!(peer.conn.variant(), Some(Variant::BlueRadios));
    let mode_switch = Variant::BlueRadios
        .characteristics()
        .mode_switch
        .unwrap();
    let switch_at = peer
        .ops
        .iter()
        .position(|io| {
            matches!(io, Io::WriteCharacteristic { characteristic, .. } if *characteristic == mode_switch)
        })
        .expect("mode switch never written");
    let subscribe_at = peer
        .ops
        .iter()
        .position(|io| matches!(io, Io::WriteDescriptor { .. }))
        .expect("notifications never enabled");
    assert!(switch_at < subscribe_at);
}

#[test]
fn subscriptions_wait_for_mode_switch_confirmation() {
    subscribe();
    let variant = Variant::BlueRadios;
    let chars = variant.characteristics();
    let mut conn = Connection::new(&SocketConfig::default());
    conn.connect();
    assert_eq!(conn.poll_io(), Some(Io::Connect));
    conn.handle_event(GattEvent::Connected);
    assert_eq!(conn.poll_io(), Some(Io::DiscoverServices));
    conn.handle_event(GattEvent::DiscoveryFinished {
        services: vec![variant.service()],
    });
    assert_eq!(
        conn.poll_io(),
        Some(Io::DiscoverCharacteristics {
            service: variant.service(),
        })
    );
    conn.handle_event(GattEvent::ServiceDetailsReady {
        characteristics: util::service_details(variant),
    });
    let switch = Io::WriteCharacteristic {
        characteristic: chars.mode_switch.unwrap(),
        value: Bytes::from_static(&[0x01]),
    };
    assert_eq!(conn.poll_io(), Some(switch));
    // Nothing further may be attempted until the switch is confirmed
    assert_eq!(conn.poll_io(), None);
    conn.handle_event(GattEvent::CharacteristicWritten {
        characteristic: chars.mode_switch.unwrap(),
        value: Bytes::from_static(&[0x01]),
    });
    assert_eq!(
        conn.poll_io(),
        Some(Io::WriteDescriptor {
            characteristic: chars.tx_fifo,
            value: Bytes::from_static(&NOTIFY_ENABLE),
        })
    );
}

#[test]
fn unknown_service_fails_discovery() {
    subscribe();
    let mut peer = TestPeer::new(Variant::Laird);
    peer.services = vec![uuid!("0000180f-0000-1000-8000-00805f9b34fb")];
    peer.connect();
    assert_eq!(peer.conn.state(), ConnectionState::Connecting);
    assert_eq!(peer.conn.variant(), None);
    assert_eq!(peer.conn.last_error(), Some(ErrorKind::Discovery));
    assert!(peer
        .drain_events()
        .contains(&Event::Error(ErrorKind::Discovery)));
}

#[test]
fn missing_characteristic_fails_resolution() {
    subscribe();
    let mut peer = TestPeer::new(Variant::Laird);
    let tx_fifo = Variant::Laird.characteristics().tx_fifo;
    peer.characteristics.retain(|c| c.uuid != tx_fifo);
    peer.connect();
    assert_eq!(peer.conn.state(), ConnectionState::Connecting);
    assert_eq!(
        peer.conn.last_error(),
        Some(ErrorKind::CharacteristicResolution)
    );
}

#[test]
fn missing_notification_descriptor_fails() {
    subscribe();
    let mut peer = TestPeer::new(Variant::Laird);
    let modem_out = Variant::Laird.characteristics().modem_out;
    for c in &mut peer.characteristics {
        if c.uuid == modem_out {
            c.notify_configurable = false;
        }
    }
    peer.connect();
    assert_eq!(peer.conn.state(), ConnectionState::Connecting);
    assert_eq!(
        peer.conn.last_error(),
        Some(ErrorKind::NotificationUnavailable)
    );
}

#[test]
fn writes_are_chunked_and_ordered() {
    subscribe();
    let mut peer = TestPeer::new(Variant::Laird);
    peer.connect();
    peer.drain_events();
    let data: Vec<u8> = (0..50).collect();
    assert_eq!(peer.conn.write(&data), Ok(50));
    peer.drive();
    assert_eq!(
        peer.inbound.iter().map(Bytes::len).collect::<Vec<_>>(),
        vec![20, 20, 10]
    );
    assert_eq!(peer.received(), data);
    assert_eq!(peer.conn.bytes_to_write(), 0);
    assert_eq!(
        peer.drain_events(),
        vec![
            Event::BytesWritten(20),
            Event::BytesWritten(20),
            Event::BytesWritten(10),
        ]
    );
}

#[test]
fn sends_wait_for_cts() {
    subscribe();
    let mut peer = TestPeer::new(Variant::Laird);
    peer.peer_cts = false;
    peer.connect();
    assert_eq!(peer.conn.state(), ConnectionState::Connected);
    assert_eq!(peer.conn.write(b"held back"), Ok(9));
    peer.drive();
    assert!(peer.inbound.is_empty());
    assert_eq!(peer.conn.bytes_to_write(), 9);
    peer.grant_cts(true);
    assert_eq!(peer.received(), b"held back");
    peer.grant_cts(false);
    assert_eq!(peer.conn.write(b"more"), Ok(4));
    peer.drive();
    assert_eq!(peer.conn.bytes_to_write(), 4);
}

#[test]
fn one_data_write_in_flight() {
    subscribe();
    let mut peer = TestPeer::new(Variant::Laird);
    peer.connect();
    let rx_fifo = Variant::Laird.characteristics().rx_fifo;
    let conn = &mut peer.conn;
    conn.write(&[7; 40]).unwrap();
    let first = Io::WriteCharacteristic {
        characteristic: rx_fifo,
        value: Bytes::from_static(&[7; 20]),
    };
    assert_eq!(conn.poll_io(), Some(first));
    // The second chunk waits for the first confirmation
    assert_eq!(conn.poll_io(), None);
    conn.handle_event(GattEvent::CharacteristicWritten {
        characteristic: rx_fifo,
        value: Bytes::from_static(&[7; 20]),
    });
    let second = Io::WriteCharacteristic {
        characteristic: rx_fifo,
        value: Bytes::from_static(&[7; 20]),
    };
    assert_eq!(conn.poll_io(), Some(second));
    assert_eq!(conn.poll_io(), None);
}

#[test]
fn oversized_write_is_rejected_whole() {
    subscribe();
    let mut peer = TestPeer::new(Variant::Laird);
    peer.peer_cts = false;
    peer.connect();
    assert_eq!(peer.conn.write(&[0; 4096]), Err(WriteError::Overflow));
    assert_eq!(peer.conn.bytes_to_write(), 0);
    assert_eq!(peer.conn.write(&[0; 4095]), Ok(4095));
    // The buffer is now at capacity; a single further byte must not fit
    assert_eq!(peer.conn.write(&[0; 1]), Err(WriteError::Overflow));
    assert_eq!(peer.conn.bytes_to_write(), 4095);
    assert_eq!(peer.conn.last_error(), Some(ErrorKind::WriteOverflow));
}

#[test]
fn read_overflow_drops_packet_and_pauses_peer() {
    subscribe();
    let mut config = SocketConfig::default();
    config.max_buffer_size(41).unwrap();
    let mut peer = TestPeer::with_config(Variant::Laird, &config);
    peer.connect();
    peer.drain_events();
    let modem_in = Variant::Laird.characteristics().modem_in;
    peer.notify(&[b'a'; 20]);
    // The second packet fills the buffer exactly and costs the peer its
    // send permission
    peer.notify(&[b'b'; 20]);
    assert!(peer.ops.contains(&Io::WriteCharacteristic {
        characteristic: modem_in,
        value: Bytes::from_static(Variant::Laird.modem_clear()),
    }));
    // A third packet no longer fits and is shed, non-fatally
    peer.notify(&[b'c'; 1]);
    assert_eq!(peer.conn.last_error(), Some(ErrorKind::ReadOverflow));
    assert_eq!(peer.conn.state(), ConnectionState::Connected);
    assert_eq!(peer.conn.bytes_available(), 40);

    // Draining restores the peer's permission to send
    let granted_before = util::count_rts_grants(&peer.ops);
    let mut buf = [0; 64];
    assert_eq!(peer.conn.read(&mut buf), Ok(40));
    assert_eq!(&buf[..20], &[b'a'; 20]);
    assert_eq!(&buf[20..40], &[b'b'; 20]);
    peer.drive();
    assert_eq!(util::count_rts_grants(&peer.ops), granted_before + 1);
    peer.notify(&[b'd'; 20]);
    assert_eq!(peer.conn.bytes_available(), 20);
}

#[test]
fn data_during_handshake_surfaces_after_connect() {
    subscribe();
    let mut peer = TestPeer::new(Variant::Laird);
    peer.defer_cts_read = true;
    peer.connect();
    assert_eq!(peer.conn.state(), ConnectionState::Connecting);
    // A notification can sneak in between subscription and completion
    peer.notify(b"early bird");
    let events = peer.drain_events();
    assert!(!events.contains(&Event::Readable));
    peer.complete_cts_read();
    assert_eq!(
        peer.drain_events(),
        vec![
            Event::StateChanged(ConnectionState::Connected),
            Event::Connected,
            Event::Readable,
        ]
    );
    let mut buf = [0; 32];
    assert_eq!(peer.conn.read(&mut buf), Ok(10));
    assert_eq!(&buf[..10], b"early bird");
}

#[test]
fn close_during_handshake_allows_reconnect() {
    subscribe();
    let mut peer = TestPeer::new(Variant::Laird);
    peer.defer_cts_read = true;
    peer.connect();
    assert_eq!(peer.conn.state(), ConnectionState::Connecting);
    peer.drain_events();
    peer.conn.close();
    peer.drive();
    assert_eq!(peer.conn.state(), ConnectionState::Unconnected);
    assert_eq!(peer.conn.variant(), None);
    assert_eq!(
        peer.drain_events(),
        vec![
            Event::StateChanged(ConnectionState::Closing),
            Event::Finished,
            Event::StateChanged(ConnectionState::Unconnected),
            Event::Disconnected,
        ]
    );
    assert_eq!(peer.ops.last(), Some(&Io::Disconnect));

    // A fresh handshake runs from the start
    peer.defer_cts_read = false;
    peer.connect();
    assert_eq!(peer.conn.state(), ConnectionState::Connected);
}

#[test]
fn close_resets_buffers() {
    subscribe();
    let mut peer = TestPeer::new(Variant::Laird);
    peer.peer_cts = false;
    peer.connect();
    peer.conn.write(b"stale").unwrap();
    peer.notify(b"unread");
    assert_eq!(peer.conn.bytes_to_write(), 5);
    assert_eq!(peer.conn.bytes_available(), 6);
    peer.conn.close();
    peer.drive();
    assert_eq!(peer.conn.bytes_to_write(), 0);
    assert_eq!(peer.conn.bytes_available(), 0);
}

#[test]
fn stream_requires_connection() {
    subscribe();
    let mut conn = Connection::new(&SocketConfig::default());
    let mut buf = [0; 8];
    assert_eq!(conn.read(&mut buf), Err(ReadError::NotConnected));
    assert_eq!(conn.write(b"nope"), Err(WriteError::NotConnected));
    assert_eq!(conn.last_error(), Some(ErrorKind::NotConnected));
    assert!(conn
        .poll()
        .into_iter()
        .any(|e| e == Event::Error(ErrorKind::NotConnected)));
}

#[test]
fn manual_flow_control() {
    subscribe();
    let mut config = SocketConfig::default();
    config.max_buffer_size(41).unwrap();
    let mut peer = TestPeer::with_config(Variant::Laird, &config);
    peer.connect();
    let modem_in = Variant::Laird.characteristics().modem_in;

    peer.conn.clear_rts();
    peer.drive();
    assert_eq!(
        peer.ops.last(),
        Some(&Io::WriteCharacteristic {
            characteristic: modem_in,
            value: Bytes::from_static(Variant::Laird.modem_clear()),
        })
    );

    // Granting is refused while a further packet would not fit
    peer.notify(&[0; 20]);
    peer.notify(&[0; 20]);
    let granted_before = util::count_rts_grants(&peer.ops);
    peer.conn.set_rts();
    peer.drive();
    assert_eq!(util::count_rts_grants(&peer.ops), granted_before);

    let mut buf = [0; 40];
    peer.conn.read(&mut buf).unwrap();
    peer.drive();
    assert_eq!(util::count_rts_grants(&peer.ops), granted_before + 1);

    // Already granted; nothing further to write
    peer.conn.set_rts();
    assert_eq!(peer.conn.poll_io(), None);
}

#[test]
fn transport_errors_are_reported() {
    subscribe();
    let mut peer = TestPeer::new(Variant::Laird);
    peer.connect();
    peer.conn
        .handle_event(GattEvent::TransportError(TransportError::CharacteristicWrite));
    assert_eq!(
        peer.conn.last_error(),
        Some(ErrorKind::Access(AccessKind::Write))
    );
    assert!(peer
        .drain_events()
        .contains(&Event::Error(ErrorKind::Access(AccessKind::Write))));
    // Stream errors do not tear the connection down by themselves
    assert_eq!(peer.conn.state(), ConnectionState::Connected);
}
