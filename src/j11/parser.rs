// J11 応答/通知データ部のパーサー
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use nom::bytes::complete::take;
use nom::combinator::{map, rest};
use nom::number::complete::{be_i8, be_u8, be_u16, be_u64, be_u128};
use nom::{IResult, Parser};
use std::fmt;
use std::net::Ipv6Addr;

/// 発見したスマートメーター
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beacon {
    pub channel: u8,
    pub mac_address: u64,
    pub pan_id: u16,
    pub rssi: i8,
}

impl fmt::Display for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Channel:{} MAC:{:016X} PAN ID:{:04X} RSSI:{}dBm",
            self.channel, self.mac_address, self.pan_id, self.rssi
        )
    }
}

/// アクティブスキャン結果通知(0x4051)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveScanNotify {
    pub result: u8,
    pub channel: u8,
    pub beacon: Option<Beacon>, // スキャン結果 = 0 のときのみ
}

/// Bルート動作開始応答(0x2053)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteBStarted {
    pub result: u8,
    pub channel: u8,
    pub pan_id: u16,
    pub mac_address: u64,
    pub rssi: i8,
}

/// PANA認証結果通知(0x6028)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanaResult {
    pub result: u8,
    pub mac_address: u64,
}

/// データ受信通知(0x6018)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpReceived<'a> {
    pub sender: Ipv6Addr,
    pub sender_port: u16,
    pub destination_port: u16,
    pub pan_id: u16,
    pub address_type: u8,
    pub secured: u8,
    pub rssi: i8,
    pub data: &'a [u8],
}

/// データ送信応答(0x2008)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitResult<'a> {
    pub result: u8,
    pub transmit_result: u8,
    pub digest: &'a [u8],
}

/// アクティブスキャン結果通知
pub fn active_scan_notify(s: &[u8]) -> IResult<&[u8], ActiveScanNotify> {
    // スキャン結果
    let (s, result) = be_u8.parse(s)?;
    // スキャンチャネル
    let (s, channel) = be_u8.parse(s)?;
    if result != 0 {
        // Beacon応答無し
        return Ok((
            s,
            ActiveScanNotify {
                result,
                channel,
                beacon: None,
            },
        ));
    }
    // スキャン数
    let (s, _count) = be_u8.parse(s)?;
    // MACアドレス(8バイト), PAN ID(2バイト), RSSI(1バイト)
    let (s, (mac_address, pan_id, rssi)) = (be_u64, be_u16, be_i8).parse(s)?;
    let found = Beacon {
        channel,
        mac_address,
        pan_id,
        rssi,
    };
    Ok((
        s,
        ActiveScanNotify {
            result,
            channel,
            beacon: Some(found),
        },
    ))
}

/// Bルート動作開始応答
pub fn route_b_started(s: &[u8]) -> IResult<&[u8], RouteBStarted> {
    let parser = (be_u8, be_u8, be_u16, be_u64, be_i8);
    map(parser, |(result, channel, pan_id, mac_address, rssi)| {
        RouteBStarted {
            result,
            channel,
            pan_id,
            mac_address,
            rssi,
        }
    })
    .parse(s)
}

/// PANA認証結果通知
pub fn pana_result(s: &[u8]) -> IResult<&[u8], PanaResult> {
    map((be_u8, be_u64), |(result, mac_address)| PanaResult {
        result,
        mac_address,
    })
    .parse(s)
}

/// データ受信通知
pub fn udp_received(s: &[u8]) -> IResult<&[u8], UdpReceived<'_>> {
    // 送信元IPv6アドレス
    let (s, sender) = map(be_u128, Ipv6Addr::from).parse(s)?;
    // 送信元ポート番号
    let (s, sender_port) = be_u16.parse(s)?;
    // 送信先ポート番号
    let (s, destination_port) = be_u16.parse(s)?;
    // 送信元PAN ID
    let (s, pan_id) = be_u16.parse(s)?;
    // 送信先アドレス種別
    let (s, address_type) = be_u8.parse(s)?;
    // 暗号化
    let (s, secured) = be_u8.parse(s)?;
    // RSSI
    let (s, rssi) = be_i8.parse(s)?;
    // 受信データサイズ
    let (s, datalen) = be_u16.parse(s)?;
    // 受信データ
    let (s, data) = take(datalen).parse(s)?;
    Ok((
        s,
        UdpReceived {
            sender,
            sender_port,
            destination_port,
            pan_id,
            address_type,
            secured,
            rssi,
            data,
        },
    ))
}

/// データ送信応答
pub fn transmit_result(s: &[u8]) -> IResult<&[u8], TransmitResult<'_>> {
    map((be_u8, be_u8, rest), |(result, transmit_result, digest)| {
        TransmitResult {
            result,
            transmit_result,
            digest,
        }
    })
    .parse(s)
}

#[test]
fn test_active_scan_notify() {
    let data = [
        0x00, // スキャン結果
        0x21, // スキャンチャネル
        0x01, // スキャン数
        0x00, 0x1d, 0x12, 0x90, 0x12, 0x34, 0x56, 0x78, // MACアドレス
        0x8a, 0xbc, // PAN ID
        0xc4, // RSSI
    ];
    assert_eq!(
        active_scan_notify(&data).unwrap(),
        (
            &[][..],
            ActiveScanNotify {
                result: 0,
                channel: 0x21,
                beacon: Some(Beacon {
                    channel: 0x21,
                    mac_address: 0x001d_1290_1234_5678,
                    pan_id: 0x8abc,
                    rssi: -60,
                }),
            }
        )
    );

    // Beacon応答無し
    assert_eq!(
        active_scan_notify(&[0x01, 0x05]).unwrap().1,
        ActiveScanNotify {
            result: 1,
            channel: 5,
            beacon: None,
        }
    );

    // 途中で切れている
    assert!(active_scan_notify(&data[..10]).is_err());
}

#[test]
fn test_route_b_started() {
    let data = [
        0x01, 0x21, 0x8a, 0xbc, 0x00, 0x1d, 0x12, 0x90, 0x12, 0x34, 0x56, 0x78, 0xd8,
    ];
    assert_eq!(
        route_b_started(&data).unwrap().1,
        RouteBStarted {
            result: 1,
            channel: 0x21,
            pan_id: 0x8abc,
            mac_address: 0x001d_1290_1234_5678,
            rssi: -40,
        }
    );
}

#[test]
fn test_pana_result() {
    let data = [0x02, 0x00, 0x1d, 0x12, 0x90, 0x12, 0x34, 0x56, 0x78];
    assert_eq!(
        pana_result(&data).unwrap().1,
        PanaResult {
            result: 2,
            mac_address: 0x001d_1290_1234_5678,
        }
    );
    assert!(pana_result(&data[..4]).is_err());
}

#[test]
fn test_udp_received() {
    let sender: Ipv6Addr = "fe80::21d:1290:1234:5678".parse().unwrap();
    let mut data = sender.octets().to_vec();
    data.extend([
        0x0e, 0x1a, // 送信元ポート番号
        0x0e, 0x1a, // 送信先ポート番号
        0x8a, 0xbc, // 送信元PAN ID
        0x00, // 送信先アドレス種別
        0x01, // 暗号化
        0xc4, // RSSI
        0x00, 0x03, // 受信データサイズ
        0x10, 0x81, 0x00, // 受信データ
    ]);
    assert_eq!(
        udp_received(&data).unwrap().1,
        UdpReceived {
            sender,
            sender_port: 0x0e1a,
            destination_port: 0x0e1a,
            pan_id: 0x8abc,
            address_type: 0,
            secured: 1,
            rssi: -60,
            data: &[0x10, 0x81, 0x00],
        }
    );

    // 受信データサイズより短い
    data.pop();
    assert!(udp_received(&data).is_err());
}

#[test]
fn test_transmit_result() {
    assert_eq!(
        transmit_result(&[0x01, 0x00, 0xaa, 0xbb]).unwrap().1,
        TransmitResult {
            result: 1,
            transmit_result: 0,
            digest: &[0xaa, 0xbb],
        }
    );
    assert_eq!(
        transmit_result(&[0x01, 0x00]).unwrap().1,
        TransmitResult {
            result: 1,
            transmit_result: 0,
            digest: &[],
        }
    );
}
