//! Unit tests for HCI packet parsing, serialization and ACL flow control

use super::constants::*;
use super::flow::*;
use super::packet::*;

const HANDLE: ConnectionHandle = ConnectionHandle(0x0040);

fn buffers(packet_length: u16, max_packets: u16) -> BufferSize {
    BufferSize {
        packet_length,
        max_packets,
    }
}

#[test]
fn test_hci_command_serialization() {
    let packet = HciCommand::Reset.to_packet();
    assert_eq!(packet, vec![HCI_COMMAND_PKT, 0x03, 0x0C, 0x00]);

    let packet = HciCommand::Disconnect {
        handle: HANDLE,
        reason: HCI_REMOTE_USER_TERMINATED,
    }
    .to_packet();
    assert_eq!(packet[0], HCI_COMMAND_PKT);
    assert_eq!(u16::from_le_bytes([packet[1], packet[2]]), 0x0406);
    assert_eq!(packet[3], 3);
    assert_eq!(&packet[4..], &[0x40, 0x00, 0x13]);

    let packet = HciCommand::LeReadBufferSize.to_packet();
    assert_eq!(u16::from_le_bytes([packet[1], packet[2]]), 0x2002);
}

#[test]
fn test_le_start_encryption_layout() {
    let ltk: [u8; 16] = core::array::from_fn(|i| i as u8);
    let packet = HciCommand::LeStartEncryption {
        handle: HANDLE,
        random: [0; 8],
        ediv: 0,
        ltk,
    }
    .to_packet();

    assert_eq!(u16::from_le_bytes([packet[1], packet[2]]), 0x2019);
    assert_eq!(packet[3], 28);
    assert_eq!(&packet[4..6], &[0x40, 0x00]);
    assert_eq!(&packet[6..16], &[0u8; 10]);
    assert_eq!(&packet[16..32], &ltk);
}

#[test]
fn test_le_connection_update_layout() {
    let parameters = ConnectionParameters {
        interval_min: 0x0010,
        interval_max: 0x0020,
        latency: 0x0001,
        supervision_timeout: 0x0100,
    };
    let packet = HciCommand::LeConnectionUpdate {
        handle: HANDLE,
        parameters,
    }
    .to_packet();

    assert_eq!(u16::from_le_bytes([packet[1], packet[2]]), 0x2013);
    assert_eq!(packet[3], 14);
    assert_eq!(
        &packet[4..14],
        &[0x40, 0x00, 0x10, 0x00, 0x20, 0x00, 0x01, 0x00, 0x00, 0x01]
    );
}

#[test]
fn test_event_parse_rejects_truncation() {
    assert!(HciEvent::parse(&[EVT_CMD_COMPLETE]).is_err());
    // Declares 4 parameter bytes, carries 2
    assert!(HciEvent::parse(&[EVT_CMD_COMPLETE, 4, 0x01, 0x02]).is_err());
    assert!(HciPacket::parse(&[]).is_err());
    assert!(matches!(
        HciPacket::parse(&[0x07, 0x00]),
        Err(crate::error::HciError::UnknownPacketType(0x07))
    ));
}

#[test]
fn test_packet_round_trip() {
    let event = HciEvent {
        event_code: EVT_ENCRYPTION_CHANGE,
        parameters: vec![0x00, 0x40, 0x00, 0x01],
    };
    assert_eq!(
        HciPacket::parse(&event.to_packet()).unwrap(),
        HciPacket::Event(event.clone())
    );

    let command = HciCommand::LeSetEventMask {
        event_mask: LE_EVENT_MASK_DEFAULT,
    };
    match HciPacket::parse(&command.to_packet()).unwrap() {
        HciPacket::Command { opcode, parameters } => {
            assert_eq!(opcode, command.opcode());
            assert_eq!(parameters, LE_EVENT_MASK_DEFAULT.to_le_bytes().to_vec());
        }
        other => panic!("unexpected packet {:?}", other),
    }

    let header = AclHeader::new(ConnectionHandle(0x0ABC), ACL_CONT, 3);
    assert_eq!(AclHeader::parse(&header.to_bytes()).unwrap(), header);
}

#[test]
fn test_decode_encryption_change() {
    let event = HciEvent {
        event_code: EVT_ENCRYPTION_CHANGE,
        parameters: vec![0x00, 0x40, 0x00, 0x01],
    };
    assert_eq!(
        event.decode().unwrap(),
        Event::EncryptionChange {
            status: 0,
            handle: HANDLE,
            enabled: true,
        }
    );
}

#[test]
fn test_decode_number_of_completed_packets() {
    let event = HciEvent {
        event_code: EVT_NUM_COMP_PKTS,
        parameters: vec![0x02, 0x40, 0x00, 0x03, 0x00, 0x41, 0x00, 0x01, 0x00],
    };
    assert_eq!(
        event.decode().unwrap(),
        Event::NumberOfCompletedPackets(vec![(HANDLE, 3), (ConnectionHandle(0x0041), 1)])
    );

    // Claims two handles, carries one
    let short = HciEvent {
        event_code: EVT_NUM_COMP_PKTS,
        parameters: vec![0x02, 0x40, 0x00, 0x03, 0x00],
    };
    assert!(short.decode().is_err());
}

#[test]
fn test_decode_le_connection_complete() {
    let mut parameters = vec![EVT_LE_CONN_COMPLETE, 0x00, 0x40, 0x00, 0x00, 0x01];
    parameters.extend_from_slice(&[0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
    parameters.extend_from_slice(&[0x18, 0x00, 0x00, 0x00, 0xC8, 0x00, 0x05]);
    let event = HciEvent {
        event_code: EVT_LE_META_EVENT,
        parameters,
    };

    match event.decode().unwrap() {
        Event::LeConnectionComplete(complete) => {
            assert_eq!(complete.status, HCI_SUCCESS);
            assert_eq!(complete.handle, HANDLE);
            assert_eq!(complete.peer_address_type, AddressType::Random);
            assert_eq!(complete.peer_address.to_string(), "11:22:33:44:55:66");
            assert_eq!(complete.interval, 0x0018);
            assert_eq!(complete.supervision_timeout, 0x00C8);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_buffer_size_return_parameters() {
    let le = BufferSize::from_le_read_buffer_size(&[0x00, 0x1B, 0x00, 0x04]).unwrap();
    assert_eq!(le, buffers(27, 4));

    let zero = BufferSize::from_le_read_buffer_size(&[0x00, 0x00, 0x00, 0x00]).unwrap();
    assert!(zero.is_unset());

    let bredr =
        BufferSize::from_read_buffer_size(&[0x00, 0xFD, 0x03, 0x40, 0x08, 0x00, 0x08, 0x00])
            .unwrap();
    assert_eq!(bredr, buffers(1021, 8));
}

#[test]
fn test_fragmentation_layout() {
    let mut flow = FlowController::new();
    flow.set_buffers(buffers(27, 10));
    flow.add_link(HANDLE);

    let payload: Vec<u8> = (0..60).collect();
    flow.enqueue(HANDLE, ACL_START_NO_FLUSH, 0x0004, &payload);
    let packets = flow.drain();

    // 4 + 60 bytes at 27 per packet: 27, 27, 10
    assert_eq!(packets.len(), 3);

    let first = &packets[0];
    let header = AclHeader::parse(&first[1..5]).unwrap();
    assert_eq!(header.flags, ACL_START_NO_FLUSH);
    assert_eq!(header.length, 27);
    assert_eq!(&first[5..9], &[60, 0, 0x04, 0x00]);
    assert_eq!(&first[9..], &payload[..23]);

    let second = &packets[1];
    let header = AclHeader::parse(&second[1..5]).unwrap();
    assert_eq!(header.flags, ACL_CONT);
    assert_eq!(header.length, 27);
    assert_eq!(&second[5..], &payload[23..50]);

    let third = &packets[2];
    assert_eq!(AclHeader::parse(&third[1..5]).unwrap().length, 10);
    assert_eq!(&third[5..], &payload[50..]);
}

#[test]
fn test_credit_accounting() {
    let mut flow = FlowController::new();
    flow.set_buffers(buffers(27, 4));
    flow.add_link(HANDLE);

    for _ in 0..6 {
        flow.enqueue(HANDLE, ACL_START_NO_FLUSH, 0x0004, &[0x0A, 0x01, 0x00]);
    }
    assert_eq!(flow.drain().len(), 4);
    assert_eq!(flow.outstanding(), 4);
    assert_eq!(flow.queued(), 2);

    // Nothing more until the controller frees capacity
    assert!(flow.drain().is_empty());

    flow.complete(HANDLE, 2);
    assert_eq!(flow.drain().len(), 2);
    assert_eq!(flow.queued(), 0);
    assert_eq!(flow.outstanding(), 4);
}

#[test]
fn test_completion_count_clamped_at_zero() {
    let mut flow = FlowController::new();
    flow.set_buffers(buffers(27, 4));
    flow.add_link(HANDLE);

    flow.enqueue(HANDLE, ACL_START_NO_FLUSH, 0x0004, &[0x01]);
    assert_eq!(flow.drain().len(), 1);

    flow.complete(HANDLE, 5);
    assert_eq!(flow.pending(HANDLE), 0);
    assert_eq!(flow.outstanding(), 0);
}

#[test]
fn test_credit_shared_across_links() {
    let other = ConnectionHandle(0x0041);
    let mut flow = FlowController::new();
    flow.set_buffers(buffers(27, 2));
    flow.add_link(HANDLE);
    flow.add_link(other);

    flow.enqueue(HANDLE, ACL_START_NO_FLUSH, 0x0004, &[0x01]);
    flow.enqueue(other, ACL_START_NO_FLUSH, 0x0004, &[0x02]);
    flow.enqueue(HANDLE, ACL_START_NO_FLUSH, 0x0004, &[0x03]);
    assert_eq!(flow.drain().len(), 2);

    flow.complete(other, 1);
    let released = flow.drain();
    assert_eq!(released.len(), 1);
    assert_eq!(*released[0].last().unwrap(), 0x03);
    assert_eq!(flow.pending(HANDLE), 2);
}

#[test]
fn test_frames_wait_for_buffer_sizes() {
    let mut flow = FlowController::new();
    flow.add_link(HANDLE);

    flow.enqueue(HANDLE, ACL_START_NO_FLUSH, 0x0004, &[0x02, 0xF7, 0x00]);
    assert!(flow.drain().is_empty());
    assert_eq!(flow.queued(), 1);

    flow.set_buffers(buffers(27, 4));
    assert_eq!(flow.drain().len(), 1);
}

#[test]
fn test_remove_link_discards_queued_packets() {
    let other = ConnectionHandle(0x0041);
    let mut flow = FlowController::new();
    flow.set_buffers(buffers(27, 1));
    flow.add_link(HANDLE);
    flow.add_link(other);

    flow.enqueue(HANDLE, ACL_START_NO_FLUSH, 0x0004, &[0x01]);
    flow.enqueue(HANDLE, ACL_START_NO_FLUSH, 0x0004, &[0x02]);
    flow.enqueue(other, ACL_START_NO_FLUSH, 0x0004, &[0x03]);
    assert_eq!(flow.drain().len(), 1);

    flow.remove_link(HANDLE);
    assert_eq!(flow.outstanding(), 0);
    let released = flow.drain();
    assert_eq!(released.len(), 1);
    assert_eq!(*released[0].last().unwrap(), 0x03);
}

#[test]
fn test_reassembly() {
    let mut flow = FlowController::new();
    let payload: Vec<u8> = (0..30).collect();

    let mut start = vec![30, 0, 0x04, 0x00];
    start.extend_from_slice(&payload[..10]);
    let header = AclHeader::new(HANDLE, ACL_START, start.len() as u16);
    assert_eq!(flow.reassemble(header, &start), None);

    let header = AclHeader::new(HANDLE, ACL_CONT, 10);
    assert_eq!(flow.reassemble(header, &payload[10..20]), None);

    let frame = flow.reassemble(header, &payload[20..]).unwrap();
    assert_eq!(frame.handle, HANDLE);
    assert_eq!(frame.channel_id, 0x0004);
    assert_eq!(frame.payload, payload);

    // Buffer is gone once delivered
    assert_eq!(flow.reassemble(header, &payload[20..]), None);
}

#[test]
fn test_single_fragment_delivered_immediately() {
    let mut flow = FlowController::new();
    let data = [0x03, 0x00, 0x06, 0x00, 0x05, 0x04, 0x01];
    let header = AclHeader::new(HANDLE, ACL_START, data.len() as u16);

    let frame = flow.reassemble(header, &data).unwrap();
    assert_eq!(frame.channel_id, 0x0006);
    assert_eq!(frame.payload, vec![0x05, 0x04, 0x01]);
}

#[test]
fn test_orphan_continuation_dropped() {
    let mut flow = FlowController::new();
    let header = AclHeader::new(HANDLE, ACL_CONT, 3);
    assert_eq!(flow.reassemble(header, &[1, 2, 3]), None);
}

#[test]
fn test_reassembly_overflow_discards_buffer() {
    let mut flow = FlowController::new();
    let start = [5, 0, 0x04, 0x00, 0xAA, 0xBB];
    assert_eq!(
        flow.reassemble(AclHeader::new(HANDLE, ACL_START, 6), &start),
        None
    );

    let cont = AclHeader::new(HANDLE, ACL_CONT, 4);
    assert_eq!(flow.reassemble(cont, &[1, 2, 3, 4]), None);
    // The overflowing buffer was dropped, so the tail is an orphan
    assert_eq!(flow.reassemble(cont, &[5]), None);
}
