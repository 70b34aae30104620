// Echonetlite
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
pub mod edata;
pub mod frame;
pub mod smart_electric_energy_meter;
pub mod superclass;

pub use edata::*;
pub use frame::*;

use thiserror::Error;

/// 0x1081 = echonet lite
pub const EHD: u16 = 0x1081;

/// EHD, TID, SEOJ, DEOJ, ESV, OPCまでのバイト数
pub const HEADER_BYTES: usize = 12;

/// home controller
pub const SEOJ_HOME_CONTROLLER: [u8; 3] = [0x05, 0xff, 0x01];

/// smartmeter
pub const DEOJ_SMART_METER: [u8; 3] = [0x02, 0x88, 0x01];

/// ESV
pub mod esv {
    pub const SETC: u8 = 0x61; // プロパティ値書き込み要求(応答要)
    pub const GET: u8 = 0x62; // プロパティ値読み出し要求
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("bad length({0})")]
    TooShort(usize),
    #[error("ehd:{0:04X} this is not an echonetlite frame")]
    NotEchonetlite(u16),
    #[error("decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),
}

#[inline]
fn config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// バイト列にする
pub fn encode(frame: &EchonetliteFrame<'_>) -> Result<Vec<u8>, Error> {
    Ok(bincode::encode_to_vec(frame, config())?)
}

/// バイト列からフレームを得る
pub fn decode(bytes: &[u8]) -> Result<EchonetliteFrame<'_>, Error> {
    match bytes {
        [a, b, ..] if bytes.len() >= HEADER_BYTES => {
            let ehd = u16::from_be_bytes([*a, *b]);
            if ehd != EHD {
                return Err(Error::NotEchonetlite(ehd));
            }
            let (frame, _len): (EchonetliteFrame, usize) =
                bincode::borrow_decode_from_slice(bytes, config())?;
            Ok(frame)
        }
        _ => Err(Error::TooShort(bytes.len())),
    }
}

#[test]
fn test_decode() {
    let binary: Vec<u8> = vec![
        0x10, 0x81, //
        0x00, 0x01, //
        0x02, 0x88, 0x01, //
        0x05, 0xff, 0x01, //
        0x72, //
        0x02, //
        0xe7, 0x04, 0x00, 0x00, 0x01, 0xf4, //
        0xe8, 0x04, 0x00, 0x32, 0x00, 0x14, //
    ];
    let frame = decode(&binary).unwrap();
    assert_eq!(frame.tid, 1);
    assert_eq!(frame.seoj, DEOJ_SMART_METER);
    assert_eq!(frame.deoj, SEOJ_HOME_CONTROLLER);
    assert_eq!(frame.esv, 0x72);
    assert_eq!(frame.opc, 2);
    assert_eq!(
        frame.edata,
        vec![
            EchonetliteEdata {
                epc: 0xe7,
                pdc: 4,
                edt: &[0x00, 0x00, 0x01, 0xf4],
            },
            EchonetliteEdata {
                epc: 0xe8,
                pdc: 4,
                edt: &[0x00, 0x32, 0x00, 0x14],
            },
        ]
    );
    assert_eq!(encode(&frame).unwrap(), binary);
}

#[test]
fn test_decode_errors() {
    // 短すぎる
    assert!(matches!(decode(&[]), Err(Error::TooShort(0))));
    assert!(matches!(
        decode(&[0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x72]),
        Err(Error::TooShort(11))
    ));
    // EHDが違う
    assert!(matches!(
        decode(&[0x10, 0x82, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x72, 0x00]),
        Err(Error::NotEchonetlite(0x1082))
    ));
    // PDCがバッファを越える
    let overrun = [
        0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x72, 0x01, //
        0xe0, 0x04, 0x00, 0x00,
    ];
    assert!(matches!(decode(&overrun), Err(Error::Decode(_))));
    // OPCよりEDATAが少ない
    let missing = [
        0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x72, 0x02, //
        0xe0, 0x01, 0x00,
    ];
    assert!(matches!(decode(&missing), Err(Error::Decode(_))));
}

#[test]
fn test_empty_properties() {
    let frame = EchonetliteFrame {
        tid: 0xabcd,
        seoj: SEOJ_HOME_CONTROLLER,
        deoj: DEOJ_SMART_METER,
        esv: esv::GET,
        ..Default::default()
    };
    let encoded = encode(&frame).unwrap();
    assert_eq!(encoded.len(), HEADER_BYTES);
    assert_eq!(decode(&encoded).unwrap(), frame);
}

#[test]
fn test_encode_broken_frame() {
    // OPCとEDATAの数が合わない
    let frame = EchonetliteFrame {
        opc: 2,
        edata: vec![EchonetliteEdata {
            epc: 0xe0,
            pdc: 0,
            edt: &[],
        }],
        ..Default::default()
    };
    assert!(matches!(encode(&frame), Err(Error::Encode(_))));
    // PDCとEDTの長さが合わない
    let frame = EchonetliteFrame {
        opc: 1,
        edata: vec![EchonetliteEdata {
            epc: 0xe5,
            pdc: 2,
            edt: &[0x00],
        }],
        ..Default::default()
    };
    assert!(matches!(encode(&frame), Err(Error::Encode(_))));
}
