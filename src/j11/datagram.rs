// J11 データグラム
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use std::fmt;
use thiserror::Error;

/// ヘッダ部のバイト数
pub const HEADER_BYTES: usize = 12;

/// ユニークコード(要求コマンド)
pub const UNIQUE_CODE_REQUEST: u32 = 0xd0ea_83fc;

/// ユニークコード(応答/通知コマンド)
pub const UNIQUE_CODE_RESPONSE: u32 = 0xd0f9_ee5d;

/// ヘッダ部に続くデータ部の最大バイト数
pub const MAX_DATA_BYTES: usize = u16::MAX as usize - 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("header checksum mismatched. header:{header:04X} calculated:{calculated:04X}")]
    HeaderChecksum { header: u16, calculated: u16 },
    #[error("data checksum mismatched. header:{header:04X} calculated:{calculated:04X}")]
    DataChecksum { header: u16, calculated: u16 },
    #[error("message length {message_length} does not match data length {data_len}")]
    Length { message_length: u16, data_len: usize },
    #[error("data too long ({0} bytes)")]
    TooLong(usize),
}

/// チェックサム計算(16ビットで桁あふれを捨てる単純加算)
pub const fn checksum(bytes: &[u8]) -> u16 {
    let mut acc: u16 = 0;
    let mut i = 0;
    while i < bytes.len() {
        acc = acc.wrapping_add(bytes[i] as u16);
        i += 1;
    }
    acc
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct DatagramHeader {
    pub unique_code: u32,
    pub command_code: u16,
    pub message_length: u16,
    pub header_checksum: u16,
    pub data_checksum: u16,
}

impl DatagramHeader {
    /// データ部からメッセージ長とチェックサムを求めてヘッダを作る
    /// (データ部は MAX_DATA_BYTES 以下であること)
    pub const fn new(unique_code: u32, command_code: u16, data: &[u8]) -> Self {
        let mut header = DatagramHeader {
            unique_code,
            command_code,
            message_length: 4 + data.len() as u16,
            header_checksum: 0,
            data_checksum: checksum(data),
        };
        header.header_checksum = header.calc_header_checksum();
        header
    }

    /// ヘッダ部チェックサム計算
    pub const fn calc_header_checksum(&self) -> u16 {
        let u = self.unique_code.to_be_bytes();
        let c = self.command_code.to_be_bytes();
        let l = self.message_length.to_be_bytes();
        checksum(&[u[0], u[1], u[2], u[3], c[0], c[1], l[0], l[1]])
    }

    pub fn from_bytes(bytes: &[u8; HEADER_BYTES]) -> Self {
        DatagramHeader {
            unique_code: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            command_code: u16::from_be_bytes([bytes[4], bytes[5]]),
            message_length: u16::from_be_bytes([bytes[6], bytes[7]]),
            header_checksum: u16::from_be_bytes([bytes[8], bytes[9]]),
            data_checksum: u16::from_be_bytes([bytes[10], bytes[11]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_BYTES] {
        let mut buf = [0u8; HEADER_BYTES];
        buf[0..4].copy_from_slice(&self.unique_code.to_be_bytes());
        buf[4..6].copy_from_slice(&self.command_code.to_be_bytes());
        buf[6..8].copy_from_slice(&self.message_length.to_be_bytes());
        buf[8..10].copy_from_slice(&self.header_checksum.to_be_bytes());
        buf[10..12].copy_from_slice(&self.data_checksum.to_be_bytes());
        buf
    }

    /// ヘッダに続くデータ部のバイト数
    pub fn data_len(&self) -> Option<usize> {
        (self.message_length as usize).checked_sub(4)
    }
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Datagram {
    pub header: DatagramHeader,
    pub data: Vec<u8>,
}

impl Datagram {
    /// データ部無しのデータグラム
    pub const fn without_data(unique_code: u32, command_code: u16) -> Self {
        Datagram {
            header: DatagramHeader::new(unique_code, command_code, &[]),
            data: Vec::new(),
        }
    }

    pub fn new(unique_code: u32, command_code: u16, data: Vec<u8>) -> Result<Self, FramingError> {
        if data.len() > MAX_DATA_BYTES {
            return Err(FramingError::TooLong(data.len()));
        }
        Ok(Datagram {
            header: DatagramHeader::new(unique_code, command_code, &data),
            data,
        })
    }

    #[inline]
    pub fn command_code(&self) -> u16 {
        self.header.command_code
    }

    /// バイト列にする
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_BYTES + self.data.len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// ヘッダ部とデータ部からデータグラムを組み立てる
    pub fn decode(header: &[u8; HEADER_BYTES], data: Vec<u8>) -> Result<Self, FramingError> {
        let header = DatagramHeader::from_bytes(header);
        let calculated = header.calc_header_checksum();
        if header.header_checksum != calculated {
            return Err(FramingError::HeaderChecksum {
                header: header.header_checksum,
                calculated,
            });
        }
        if header.data_len() != Some(data.len()) {
            return Err(FramingError::Length {
                message_length: header.message_length,
                data_len: data.len(),
            });
        }
        let calculated = checksum(&data);
        if header.data_checksum != calculated {
            return Err(FramingError::DataChecksum {
                header: header.data_checksum,
                calculated,
            });
        }
        Ok(Datagram { header, data })
    }

    /// 応答コマンド(0x2000～0x2fff)か
    #[inline]
    pub fn is_response(&self) -> bool {
        is_response_code(self.header.command_code)
    }
}

/// 0x2000～0x2fffはコマンド応答, それ以外は通知
#[inline]
pub fn is_response_code(code: u16) -> bool {
    (0x2000..=0x2fff).contains(&code)
}

impl fmt::Display for Datagram {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "CMD:0x{:04X} DATA:[{}]",
            self.header.command_code,
            self.data
                .iter()
                .map(|n| format!("{:02X}", n))
                .collect::<String>()
        )
    }
}

#[test]
fn test_checksum() {
    assert_eq!(checksum(&[]), 0);
    assert_eq!(checksum(&[0x01, 0x02, 0x03]), 6);
    assert_eq!(checksum(&[0xd0, 0xf9, 0xee, 0x5d]), 0x0314);
    // 16ビットで桁あふれする
    let bytes = vec![0xffu8; 258];
    assert_eq!(checksum(&bytes), ((0xff * 258) & 0xffff) as u16);
    let bytes = vec![0xffu8; 1000];
    assert_eq!(checksum(&bytes), ((0xffu32 * 1000) % 0x10000) as u16);
}

#[test]
fn test_header_checksum() {
    // 実機のBルート動作開始要求コマンド
    let header = DatagramHeader::new(UNIQUE_CODE_REQUEST, 0x0053, &[]);
    assert_eq!(header.message_length, 4);
    assert_eq!(header.header_checksum, 0x0390);
    assert_eq!(header.data_checksum, 0);
    // 実機の応答
    let header = DatagramHeader::new(UNIQUE_CODE_RESPONSE, 0x205f, &[0x01]);
    assert_eq!(header.header_checksum, 0x0398);
    assert_eq!(header.data_checksum, 1);
}

#[test]
fn test_encode_decode() {
    let datagram = Datagram::new(UNIQUE_CODE_RESPONSE, 0x2008, vec![0x01, 0x12, 0xab]).unwrap();
    let encoded = datagram.encode();
    assert_eq!(
        encoded,
        vec![
            0xd0, 0xf9, 0xee, 0x5d, // unique code
            0x20, 0x08, // command code
            0x00, 0x07, // message length
            0x03, 0x43, // header checksum
            0x00, 0xbe, // data checksum
            0x01, 0x12, 0xab, // data
        ]
    );
    let (header, data) = encoded.split_at(HEADER_BYTES);
    let decoded = Datagram::decode(header.try_into().unwrap(), data.to_vec()).unwrap();
    assert_eq!(decoded, datagram);
    assert!(decoded.is_response());
}

#[test]
fn test_decode_errors() {
    let datagram = Datagram::new(UNIQUE_CODE_RESPONSE, 0x6018, vec![0x01, 0x02]).unwrap();
    let encoded = datagram.encode();
    let header: [u8; HEADER_BYTES] = encoded[..HEADER_BYTES].try_into().unwrap();

    // データ部の破損
    assert_eq!(
        Datagram::decode(&header, vec![0x01, 0x03]),
        Err(FramingError::DataChecksum {
            header: 3,
            calculated: 4
        })
    );
    // データ部の長さ違い
    assert!(matches!(
        Datagram::decode(&header, vec![0x03]),
        Err(FramingError::Length { .. })
    ));
    // ヘッダ部の破損
    let mut broken = header;
    broken[5] ^= 0x01;
    assert!(matches!(
        Datagram::decode(&broken, vec![0x01, 0x02]),
        Err(FramingError::HeaderChecksum { .. })
    ));
}

#[test]
fn test_too_long() {
    let data = vec![0u8; MAX_DATA_BYTES + 1];
    assert_eq!(
        Datagram::new(UNIQUE_CODE_REQUEST, 0x0008, data),
        Err(FramingError::TooLong(MAX_DATA_BYTES + 1))
    );
}

#[test]
fn test_response_code_range() {
    // コマンド応答
    for code in [0x2000, 0x2001, 0x2008, 0x2051, 0x2057, 0x205f, 0x20d9, 0x2ffe, 0x2fff] {
        assert!(is_response_code(code), "{code:04X}");
    }
    // 通知と要求
    for code in [
        0x0000, 0x0008, 0x0051, 0x1fff, 0x3000, 0x4051, 0x6018, 0x6019, 0x6028, 0xa000, 0xffff,
    ] {
        assert!(!is_response_code(code), "{code:04X}");
    }
}
