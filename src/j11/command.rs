// J11 要求コマンド
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::j11::authn::Credentials;
use crate::j11::datagram::{Datagram, DatagramHeader, FramingError, UNIQUE_CODE_REQUEST};
use std::net::Ipv6Addr;

/// コマンドコード
pub mod code {
    pub const HARDWARE_RESET: u16 = 0x00d9; // ハードウェアリセット
    pub const INITIAL_SETUP: u16 = 0x005f; // 初期設定
    pub const SET_PANA_AUTH_INFO: u16 = 0x0054; // BルートPANA認証情報設定
    pub const ACTIVE_SCAN: u16 = 0x0051; // アクティブスキャン実行
    pub const ROUTE_B_START: u16 = 0x0053; // Bルート動作開始
    pub const ROUTE_B_TERMINATE: u16 = 0x0058; // Bルート動作終了
    pub const UDP_PORT_OPEN: u16 = 0x0005; // UDPポートオープン
    pub const PANA_START: u16 = 0x0056; // BルートPANA開始
    pub const PANA_TERMINATE: u16 = 0x0057; // BルートPANA終了
    pub const TRANSMIT_DATA: u16 = 0x0008; // データ送信

    pub const NOTIFY_BOOT: u16 = 0x6019; // 起動完了通知
    pub const NOTIFY_ACTIVE_SCAN: u16 = 0x4051; // アクティブスキャン結果通知
    pub const NOTIFY_PANA_RESULT: u16 = 0x6028; // PANA認証結果通知
    pub const NOTIFY_UDP_RECEIVED: u16 = 0x6018; // データ受信通知
}

/// 要求コマンドに対する応答コマンドコード
pub const fn response_code(command_code: u16) -> u16 {
    command_code + 0x2000
}

/// 応答データの結果コード(成功)
pub const RESULT_SUCCESS: u8 = 0x01;

/// Echonetliteが使うUDPポート番号
pub const ECHONETLITE_UDP_PORT: u16 = 0x0e1a;

/// 初期設定で使うチャネル
pub const DEFAULT_CHANNEL: u8 = 0x04;

/// 要求コマンド(データ部は短い固定長)
fn request(command_code: u16, data: Vec<u8>) -> Datagram {
    Datagram {
        header: DatagramHeader::new(UNIQUE_CODE_REQUEST, command_code, &data),
        data,
    }
}

/// ハードウェアリセット要求コマンド
pub const fn hardware_reset() -> Datagram {
    Datagram::without_data(UNIQUE_CODE_REQUEST, code::HARDWARE_RESET)
}

/// 初期設定要求コマンド
pub fn initial_setup(channel: u8) -> Datagram {
    let data = vec![
        0x05,    // 動作モード(Bルート)
        0x00,    // HAN Sleep機能無効
        channel, // チャネル
        0x00,    // 送信電力(20mW)
    ];
    request(code::INITIAL_SETUP, data)
}

/// BルートPANA認証情報設定要求コマンド
pub fn set_pana_auth_info(credentials: &Credentials) -> Datagram {
    let mut data = Vec::with_capacity(44);
    data.extend_from_slice(credentials.id.as_bytes()); // 認証ID(32バイト)
    data.extend_from_slice(credentials.password.as_bytes()); // 認証パスワード(12バイト)
    request(code::SET_PANA_AUTH_INFO, data)
}

/// アクティブスキャン実行要求コマンド
pub fn active_scan(scan_duration: u8, credentials: &Credentials) -> Datagram {
    let mut data = vec![scan_duration]; // スキャン時間(1バイト)
    data.extend([0x00, 0x03, 0xff, 0xf0]); // スキャンチャネル4～17指定(4バイト)
    data.push(0x01); // ID設定(1バイト)
    data.extend(credentials.id.tail()); // Ｂルート認証IDの最後8文字(8バイト)
    request(code::ACTIVE_SCAN, data)
}

/// Bルート動作開始要求コマンド
pub const fn route_b_start() -> Datagram {
    Datagram::without_data(UNIQUE_CODE_REQUEST, code::ROUTE_B_START)
}

/// Bルート動作終了要求コマンド
pub const fn route_b_terminate() -> Datagram {
    Datagram::without_data(UNIQUE_CODE_REQUEST, code::ROUTE_B_TERMINATE)
}

/// UDPポートオープン要求コマンド
pub fn udp_port_open(port: u16) -> Datagram {
    request(code::UDP_PORT_OPEN, port.to_be_bytes().to_vec())
}

/// BルートPANA開始要求コマンド
pub const fn pana_start() -> Datagram {
    Datagram::without_data(UNIQUE_CODE_REQUEST, code::PANA_START)
}

/// BルートPANA終了要求コマンド
pub const fn pana_terminate() -> Datagram {
    Datagram::without_data(UNIQUE_CODE_REQUEST, code::PANA_TERMINATE)
}

/// データ送信要求コマンド
pub fn transmit_data(destination: &Ipv6Addr, payload: &[u8]) -> Result<Datagram, FramingError> {
    let len = u16::try_from(payload.len()).map_err(|_| FramingError::TooLong(payload.len()))?;
    let mut data = Vec::with_capacity(22 + payload.len());
    data.extend(destination.octets()); // 送信先IPv6アドレス(16バイト)
    data.extend(ECHONETLITE_UDP_PORT.to_be_bytes()); // 送信元ポート番号(2バイト)
    data.extend(ECHONETLITE_UDP_PORT.to_be_bytes()); // 送信先ポート番号(2バイト)
    data.extend(len.to_be_bytes()); // 送信データ長(2バイト)
    data.extend_from_slice(payload); // 送信データ
    Datagram::new(UNIQUE_CODE_REQUEST, code::TRANSMIT_DATA, data)
}

#[cfg(test)]
fn credentials() -> Credentials {
    use std::str::FromStr;
    Credentials {
        id: crate::j11::authn::Id::from_str("00112233445566778899AABBCCDDEEFF").unwrap(),
        password: crate::j11::authn::Password::from_str("0123456789AB").unwrap(),
    }
}

#[test]
fn test_fixed_commands() {
    // 実機に送ったヘッダ部チェックサム
    assert_eq!(hardware_reset().header.header_checksum, 0x0416);
    assert_eq!(route_b_start().header.header_checksum, 0x0390);
    assert_eq!(route_b_terminate().header.header_checksum, 0x0395);
    assert_eq!(pana_start().header.header_checksum, 0x0393);
    assert_eq!(pana_terminate().header.header_checksum, 0x0394);
    for command in [
        hardware_reset(),
        route_b_start(),
        route_b_terminate(),
        pana_start(),
        pana_terminate(),
    ] {
        assert_eq!(command.header.unique_code, UNIQUE_CODE_REQUEST);
        assert_eq!(command.header.message_length, 4);
        assert_eq!(command.header.data_checksum, 0);
        assert_eq!(command.encode().len(), 12);
    }
}

#[test]
fn test_initial_setup() {
    let command = initial_setup(0x21);
    assert_eq!(command.data, vec![0x05, 0x00, 0x21, 0x00]);
    assert_eq!(command.header.message_length, 8);
    assert_eq!(command.header.data_checksum, 0x26);
    assert_eq!(command.header.header_checksum, 0x03a0);
}

#[test]
fn test_set_pana_auth_info() {
    let command = set_pana_auth_info(&credentials());
    assert_eq!(command.header.message_length, 0x0030);
    assert_eq!(command.header.header_checksum, 0x03bd);
    assert_eq!(&command.data[..32], b"00112233445566778899AABBCCDDEEFF");
    assert_eq!(&command.data[32..], b"0123456789AB");
    assert_eq!(
        command.header.data_checksum,
        command.data.iter().map(|n| *n as u16).sum::<u16>()
    );
}

#[test]
fn test_active_scan() {
    let command = active_scan(6, &credentials());
    assert_eq!(command.header.message_length, 0x0012);
    assert_eq!(command.header.header_checksum, 0x039c);
    let mut expected = vec![0x06, 0x00, 0x03, 0xff, 0xf0, 0x01];
    expected.extend(b"CCDDEEFF");
    assert_eq!(command.data, expected);
}

#[test]
fn test_udp_port_open() {
    let command = udp_port_open(ECHONETLITE_UDP_PORT);
    assert_eq!(
        command.encode(),
        vec![
            0xd0, 0xea, 0x83, 0xfc, // unique code
            0x00, 0x05, // command code
            0x00, 0x06, // message length
            0x03, 0x44, // header checksum
            0x00, 0x28, // data checksum
            0x0e, 0x1a, // port
        ]
    );
}

#[test]
fn test_transmit_data() {
    let destination: Ipv6Addr = "fe80::1034:5678:abcd:ef01".parse().unwrap();
    let payload = [0x10, 0x81, 0x00, 0x01];
    let command = transmit_data(&destination, &payload).unwrap();
    assert_eq!(command.header.command_code, code::TRANSMIT_DATA);
    assert_eq!(command.header.message_length, 4 + 22 + 4);
    assert_eq!(&command.data[..16], &destination.octets());
    assert_eq!(&command.data[16..22], &[0x0e, 0x1a, 0x0e, 0x1a, 0x00, 0x04]);
    assert_eq!(&command.data[22..], &payload);
    assert_eq!(
        command.header.header_checksum,
        command.header.calc_header_checksum()
    );

    let huge = vec![0u8; 0x10000];
    assert!(transmit_data(&destination, &huge).is_err());
}

#[test]
fn test_response_code() {
    assert_eq!(response_code(code::INITIAL_SETUP), 0x205f);
    assert_eq!(response_code(code::TRANSMIT_DATA), 0x2008);
    assert_eq!(response_code(code::PANA_TERMINATE), 0x2057);
}
