// Echonetlite 機器オブジェクトスーパークラス
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::EchonetliteEdata;
use std::fmt;

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Properties {
    OperationStatus(OperationStatus),
    FaultStatus(FaultStatus),
    Manufacturer(Manufacturer),
    GetPropertyMap(GetPropertyMap),
    NotifyInstances(NotifyInstances),
}

impl Properties {
    pub fn show(&self) -> String {
        match self {
            Self::OperationStatus(a) => format!("{}", a),
            Self::FaultStatus(a) => format!("{}", a),
            Self::Manufacturer(a) => format!("{}", a),
            Self::GetPropertyMap(a) => format!("{}", a),
            Self::NotifyInstances(a) => format!("{}", a),
        }
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for Properties {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.epc {
            OperationStatus::EPC => OperationStatus::try_from(edata).map(Self::OperationStatus),
            FaultStatus::EPC => FaultStatus::try_from(edata).map(Self::FaultStatus),
            Manufacturer::EPC => Manufacturer::try_from(edata).map(Self::Manufacturer),
            GetPropertyMap::EPC => GetPropertyMap::try_from(edata).map(Self::GetPropertyMap),
            NotifyInstances::EPC => NotifyInstances::try_from(edata).map(Self::NotifyInstances),
            _ => Err(format!("UNKNOWN EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show())
    }
}

/// 0x80 動作状態
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct OperationStatus(pub Option<bool>);

impl OperationStatus {
    pub const EPC: u8 = 0x80; // 0x80 動作状態
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for OperationStatus {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.edt {
            [0x30] if edata.epc == Self::EPC => Ok(Self(Some(true))),
            [0x31] if edata.epc == Self::EPC => Ok(Self(Some(false))),
            [_] if edata.epc == Self::EPC => Ok(Self(None)),
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(true) => write!(f, "動作状態=動作中"),
            Some(false) => write!(f, "動作状態=未動作"),
            None => write!(f, "動作状態=N/A"),
        }
    }
}

/// 0x88 異常発生状態
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct FaultStatus(pub Option<bool>);

impl FaultStatus {
    pub const EPC: u8 = 0x88; // 0x88 異常発生状態
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for FaultStatus {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.edt {
            [0x41] if edata.epc == Self::EPC => Ok(Self(Some(true))),
            [0x42] if edata.epc == Self::EPC => Ok(Self(Some(false))),
            [_] if edata.epc == Self::EPC => Ok(Self(None)),
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for FaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(true) => write!(f, "異常発生状態=異常発生あり"),
            Some(false) => write!(f, "異常発生状態=異常発生なし"),
            None => write!(f, "異常発生状態=N/A"),
        }
    }
}

/// 0x9f Getプロパティマップ
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct GetPropertyMap {
    pub properties: Vec<u8>,
}

impl GetPropertyMap {
    pub const EPC: u8 = 0x9f; // 0x9f Getプロパティマップ
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for GetPropertyMap {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.edt {
            [count, props @ ..] if edata.epc == Self::EPC && *count < 16 => {
                // 16個未満はそのまま
                match props.get(..*count as usize) {
                    Some(list) => Ok(GetPropertyMap {
                        properties: list.to_vec(),
                    }),
                    None => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
                }
            }
            [_count, bitmap @ ..] if edata.epc == Self::EPC && bitmap.len() >= 16 => {
                // 16個以上はビットマップで表現される
                // 行は下位4ビット, 列(ビット位置)は上位4ビットから0x8を引いた値
                let mut properties = Vec::new();
                for (row, bits) in bitmap.iter().take(16).enumerate() {
                    for col in 0..8u8 {
                        if bits & (1 << col) != 0 {
                            properties.push(0x80 + (col << 4) + row as u8);
                        }
                    }
                }
                properties.sort();
                Ok(GetPropertyMap { properties })
            }
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for GetPropertyMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Getプロパティマップ [{}]",
            self.properties
                .iter()
                .map(|x| format!("0x{:02X}", x))
                .collect::<Vec<String>>()
                .join(",")
        )
    }
}

/// 0x8a 製造者コード
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Manufacturer(pub [u8; 3]);

impl Manufacturer {
    pub const EPC: u8 = 0x8a; // 0x8a メーカーコード
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for Manufacturer {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.edt {
            &[a, b, c] if edata.epc == Self::EPC => Ok(Manufacturer([a, b, c])),
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for Manufacturer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "製造者コード(hex)={:02X}{:02X}{:02X}", a, b, c)
    }
}

/// 0xd5 インスタンスリスト通知
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct NotifyInstances {
    pub count: u8,
    pub instances: Vec<[u8; 3]>,
}

impl NotifyInstances {
    pub const EPC: u8 = 0xd5; // 0xd5 インスタンスリスト通知
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for NotifyInstances {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.edt {
            [count, data @ ..] if edata.epc == Self::EPC && data.len() % 3 == 0 => {
                let instances = data
                    .chunks_exact(3) // 3バイトづつ
                    .map(|triple| [triple[0], triple[1], triple[2]])
                    .collect::<Vec<[u8; 3]>>();
                Ok(NotifyInstances {
                    count: *count,
                    instances,
                })
            }
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for NotifyInstances {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ss = self
            .instances
            .iter()
            .map(|[a, b, c]| format!("{:02X}{:02X}{:02X}", a, b, c))
            .collect::<Vec<String>>();
        write!(
            f,
            "インスタンスリスト={:2}個 [{}]",
            self.count,
            ss.join(",")
        )
    }
}

#[cfg(test)]
fn edata(epc: u8, edt: &[u8]) -> EchonetliteEdata<'_> {
    EchonetliteEdata {
        epc,
        pdc: edt.len() as u8,
        edt,
    }
}

#[test]
fn test_status() {
    assert_eq!(
        Properties::try_from(&edata(0x80, &[0x30])).unwrap().show(),
        "動作状態=動作中"
    );
    assert_eq!(
        OperationStatus::try_from(&edata(0x80, &[0x31])),
        Ok(OperationStatus(Some(false)))
    );
    assert_eq!(
        Properties::try_from(&edata(0x88, &[0x42])).unwrap().show(),
        "異常発生状態=異常発生なし"
    );
    assert_eq!(
        FaultStatus::try_from(&edata(0x88, &[0x00])),
        Ok(FaultStatus(None))
    );
    assert!(FaultStatus::try_from(&edata(0x80, &[0x41])).is_err());
}

#[test]
fn test_manufacturer() {
    assert_eq!(
        Properties::try_from(&edata(0x8a, &[0x00, 0x00, 0x16]))
            .unwrap()
            .show(),
        "製造者コード(hex)=000016"
    );
    assert!(Manufacturer::try_from(&edata(0x8a, &[0x00, 0x16])).is_err());
}

#[test]
fn test_get_property_map() {
    // 16個未満
    let list = edata(0x9f, &[0x03, 0x80, 0x88, 0xe7]);
    assert_eq!(
        GetPropertyMap::try_from(&list).unwrap().properties,
        vec![0x80, 0x88, 0xe7]
    );
    // 個数より短い
    assert!(GetPropertyMap::try_from(&edata(0x9f, &[0x03, 0x80])).is_err());

    // 16個以上
    let mut bitmap = vec![0u8; 17];
    bitmap[0] = 0x10;
    bitmap[1] = 0b0100_0001; // 0x80, 0xe0
    bitmap[2] = 0b0100_0000; // 0xe1
    bitmap[9] = 0b0100_0001; // 0x88, 0xe8
    bitmap[16] = 0b0000_0010; // 0x9f
    let map = GetPropertyMap::try_from(&edata(0x9f, &bitmap)).unwrap();
    assert_eq!(map.properties, vec![0x80, 0x88, 0x9f, 0xe0, 0xe1, 0xe8]);
}

#[test]
fn test_notify_instances() {
    let instances = edata(0xd5, &[0x01, 0x02, 0x88, 0x01]);
    let a = NotifyInstances::try_from(&instances).unwrap();
    assert_eq!(a.count, 1);
    assert_eq!(a.instances, vec![[0x02, 0x88, 0x01]]);
    assert_eq!(a.to_string(), "インスタンスリスト= 1個 [028801]");
    assert!(NotifyInstances::try_from(&edata(0xd5, &[0x01, 0x02, 0x88])).is_err());
}
