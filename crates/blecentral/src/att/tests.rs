//! Unit tests for ATT PDU encoding and decoding

use super::constants::*;
use super::error::*;
use super::types::*;
use crate::uuid::Uuid;

#[test]
fn test_exchange_mtu_request_layout() {
    let pdu = ExchangeMtuRequest { client_mtu: 247 }.serialize();
    assert_eq!(pdu, vec![0x02, 0xF7, 0x00]);
}

#[test]
fn test_read_by_group_type_request_layout() {
    let pdu = ReadByGroupTypeRequest {
        start_handle: 0x0001,
        end_handle: 0xFFFF,
        group_type: Uuid::Uuid16(PRIMARY_SERVICE_UUID),
    }
    .serialize();
    assert_eq!(pdu, vec![0x10, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28]);
}

#[test]
fn test_prepare_write_request_layout() {
    let pdu = PrepareWriteRequest {
        handle: 0x0021,
        offset: 0x0012,
        value: vec![0xAA, 0xBB],
    }
    .serialize();
    assert_eq!(pdu, vec![0x16, 0x21, 0x00, 0x12, 0x00, 0xAA, 0xBB]);
}

#[test]
fn test_write_command_has_command_flag() {
    let pdu = WriteCommand {
        handle: 0x0003,
        value: vec![0x01],
    }
    .serialize();
    assert_eq!(pdu, vec![0x52, 0x03, 0x00, 0x01]);
    assert!(is_command(pdu[0]));
    assert!(!is_request(pdu[0]));
}

#[test]
fn test_parse_error_response() {
    let rsp = ErrorResponse::parse(&[0x01, 0x10, 0x01, 0x00, 0x0A]).unwrap();
    assert_eq!(rsp.request_opcode, ATT_READ_BY_GROUP_TYPE_REQ);
    assert_eq!(rsp.handle, 0x0001);
    assert_eq!(rsp.error_code, AttErrorCode::AttributeNotFound);

    let err = rsp.into_error();
    assert_eq!(err.code(), Some(AttErrorCode::AttributeNotFound));
}

#[test]
fn test_parse_read_by_group_type_response_16bit() {
    let data = [
        0x11, 0x06, // opcode, length
        0x01, 0x00, 0x05, 0x00, 0x00, 0x18, // 0x1800 over 1..5
        0x06, 0x00, 0x09, 0x00, 0x01, 0x18, // 0x1801 over 6..9
    ];
    let rsp = ReadByGroupTypeResponse::parse(&data).unwrap();
    assert_eq!(rsp.length, 6);
    assert_eq!(rsp.data.len(), 2);
    assert_eq!(rsp.data[1].handle, 0x0006);
    assert_eq!(rsp.data[1].end_group_handle, 0x0009);
    assert_eq!(rsp.data[1].value, vec![0x01, 0x18]);
}

#[test]
fn test_parse_read_by_type_response_ignores_trailing_partial_record() {
    let data = [0x09, 0x07, 0x02, 0x00, 0x02, 0x03, 0x00, 0x00, 0x2A, 0x04];
    let rsp = ReadByTypeResponse::parse(&data).unwrap();
    assert_eq!(rsp.data.len(), 1);
    assert_eq!(rsp.data[0].handle, 0x0002);
    assert_eq!(rsp.data[0].value, vec![0x02, 0x03, 0x00, 0x00, 0x2A]);
}

#[test]
fn test_find_information_response_formats() {
    let data = [0x05, 0x01, 0x04, 0x00, 0x02, 0x29];
    let rsp = FindInformationResponse::parse(&data).unwrap();
    assert_eq!(
        rsp.information_data,
        vec![HandleUuid {
            handle: 0x0004,
            uuid: Uuid::Uuid16(CLIENT_CHAR_CONFIG_UUID),
        }]
    );
    assert_eq!(rsp.serialize(), data.to_vec());

    let mut data = vec![0x05, 0x02, 0x07, 0x00];
    data.extend((0u8..16).collect::<Vec<_>>());
    let rsp = FindInformationResponse::parse(&data).unwrap();
    assert_eq!(rsp.information_data[0].handle, 0x0007);
    assert!(matches!(rsp.information_data[0].uuid, Uuid::Uuid128(_)));

    assert_eq!(
        FindInformationResponse::parse(&[0x05, 0x03]),
        Err(AttError::InvalidFormat(0x03))
    );
}

#[test]
fn test_parse_wrong_opcode_and_truncation() {
    assert_eq!(
        ReadResponse::parse(&[0x0D, 0x01]),
        Err(AttError::UnexpectedOpcode {
            expected: ATT_READ_RSP,
            actual: ATT_READ_BLOB_RSP,
        })
    );
    assert_eq!(ExchangeMtuResponse::parse(&[0x03, 0x17]), Err(AttError::InvalidPdu));
    assert_eq!(ErrorResponse::parse(&[]), Err(AttError::InvalidPdu));
    assert_eq!(PrepareWriteResponse::parse(&[0x17, 0x01, 0x00]), Err(AttError::InvalidPdu));
}

#[test]
fn test_parse_handle_value_indication() {
    let ind = HandleValueIndication::parse(&[0x1D, 0x25, 0x00, 0x01, 0x02]).unwrap();
    assert_eq!(ind.handle, 0x0025);
    assert_eq!(ind.value, vec![0x01, 0x02]);
    assert_eq!(HandleValueConfirmation.serialize(), vec![0x1E]);
}

#[test]
fn test_error_code_conversion() {
    assert_eq!(AttErrorCode::from(0x05), AttErrorCode::InsufficientAuthentication);
    assert_eq!(AttErrorCode::from(0x85), AttErrorCode::Application(0x85));
    assert_eq!(AttErrorCode::from(0xE1), AttErrorCode::CommonProfile(0xE1));
    assert_eq!(u8::from(AttErrorCode::InsufficientEncryption), 0x0F);
    assert!(AttErrorCode::InsufficientAuthorization.requires_encryption());
    assert!(!AttErrorCode::InvalidOffset.requires_encryption());
}

fn assert_round_trip<P: AttPacket + PartialEq + std::fmt::Debug>(pdu: P) {
    let bytes = pdu.serialize();
    assert_eq!(bytes[0], P::opcode());
    assert_eq!(P::parse(&bytes).unwrap(), pdu, "{:02x?}", bytes);
}

#[test]
fn test_every_pdu_survives_serialize_and_parse() {
    let vendor = Uuid::Uuid128([
        0x9E, 0xCA, 0xDC, 0x24, 0x0E, 0xE5, 0xA9, 0xE0, 0x93, 0xF3, 0xA3, 0xB5, 0x01, 0x00, 0x40,
        0x6E,
    ]);

    assert_round_trip(ErrorResponse {
        request_opcode: ATT_WRITE_REQ,
        handle: 0x0102,
        error_code: AttErrorCode::Application(0x80),
    });
    assert_round_trip(ExchangeMtuRequest { client_mtu: 517 });
    assert_round_trip(ExchangeMtuResponse { server_mtu: 185 });
    assert_round_trip(FindInformationRequest {
        start_handle: 0x0004,
        end_handle: 0x0008,
    });
    assert_round_trip(FindInformationResponse {
        format: ATT_FIND_INFO_RSP_FORMAT_16BIT,
        information_data: vec![
            HandleUuid {
                handle: 0x0004,
                uuid: Uuid::Uuid16(0x2902),
            },
            HandleUuid {
                handle: 0x0005,
                uuid: Uuid::Uuid16(0x2901),
            },
        ],
    });
    assert_round_trip(FindInformationResponse {
        format: ATT_FIND_INFO_RSP_FORMAT_128BIT,
        information_data: vec![HandleUuid {
            handle: 0x0006,
            uuid: vendor,
        }],
    });
    assert_round_trip(ReadByTypeRequest {
        start_handle: 0x0001,
        end_handle: 0xFFFF,
        attribute_type: Uuid::Uuid16(CHARACTERISTIC_UUID),
    });
    assert_round_trip(ReadByTypeRequest {
        start_handle: 0x0010,
        end_handle: 0x0020,
        attribute_type: vendor,
    });
    assert_round_trip(ReadByTypeResponse {
        length: 7,
        data: vec![
            HandleValue {
                handle: 0x0002,
                value: vec![0x02, 0x03, 0x00, 0x00, 0x2A],
            },
            HandleValue {
                handle: 0x0004,
                value: vec![0x12, 0x05, 0x00, 0x37, 0x2A],
            },
        ],
    });
    assert_round_trip(ReadRequest { handle: 0x0003 });
    assert_round_trip(ReadResponse {
        value: b"Thermometer".to_vec(),
    });
    assert_round_trip(ReadBlobRequest {
        handle: 0x0003,
        offset: 22,
    });
    assert_round_trip(ReadBlobResponse { value: vec![0x61; 5] });
    assert_round_trip(ReadByGroupTypeRequest {
        start_handle: 0x0001,
        end_handle: 0xFFFF,
        group_type: Uuid::Uuid16(PRIMARY_SERVICE_UUID),
    });
    assert_round_trip(ReadByGroupTypeResponse {
        length: 20,
        data: vec![AttributeData {
            handle: 0x0010,
            end_group_handle: 0x001F,
            value: vendor.to_le_bytes(),
        }],
    });
    assert_round_trip(WriteRequest {
        handle: 0x0009,
        value: vec![0x01, 0x00],
    });
    assert_round_trip(WriteResponse);
    assert_round_trip(WriteCommand {
        handle: 0x000B,
        value: vec![0xFF],
    });
    assert_round_trip(PrepareWriteRequest {
        handle: 0x000D,
        offset: 18,
        value: vec![0x10, 0x20, 0x30],
    });
    assert_round_trip(PrepareWriteResponse {
        handle: 0x000D,
        offset: 18,
        value: vec![0x10, 0x20, 0x30],
    });
    assert_round_trip(ExecuteWriteRequest { flags: 0x01 });
    assert_round_trip(ExecuteWriteRequest { flags: 0x00 });
    assert_round_trip(ExecuteWriteResponse);
    assert_round_trip(HandleValueNotification {
        handle: 0x002A,
        value: vec![0x00, 0x48],
    });
    assert_round_trip(HandleValueIndication {
        handle: 0x002C,
        value: vec![0x01],
    });
    assert_round_trip(HandleValueConfirmation);
}
