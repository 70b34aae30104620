// Echonetlite 低圧スマートメータークラス
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::EchonetliteEdata;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::fmt;

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Properties {
    Coefficient(Coefficient),
    NumberOfEffectiveDigits(NumberOfEffectiveDigits),
    CumlativeAmountsPower(CumlativeAmountsPower),
    UnitForCumlativeAmountsPower(UnitForCumlativeAmountsPower),
    HistoricalCumlativeAmount(HistoricalCumlativeAmount),
    DayForHistoricalData(DayForHistoricalData),
    InstantiousPower(InstantiousPower),
    InstantiousCurrent(InstantiousCurrent),
    CumlativeAmountsOfPowerAtFixedTime(CumlativeAmountsOfPowerAtFixedTime),
}

impl Properties {
    pub fn show(&self, opt_unit: Option<&UnitForCumlativeAmountsPower>) -> String {
        match self {
            Self::Coefficient(a) => format!("{}", a),
            Self::NumberOfEffectiveDigits(a) => format!("{}", a),
            Self::CumlativeAmountsPower(a) => a.show(opt_unit),
            Self::UnitForCumlativeAmountsPower(a) => format!("{}", a),
            Self::HistoricalCumlativeAmount(a) => a.show(opt_unit),
            Self::DayForHistoricalData(a) => format!("{}", a),
            Self::InstantiousPower(a) => format!("{}", a),
            Self::InstantiousCurrent(a) => format!("{}", a),
            Self::CumlativeAmountsOfPowerAtFixedTime(a) => a.show(opt_unit),
        }
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for Properties {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.epc {
            Coefficient::EPC => Coefficient::try_from(edata).map(Self::Coefficient),
            NumberOfEffectiveDigits::EPC => {
                NumberOfEffectiveDigits::try_from(edata).map(Self::NumberOfEffectiveDigits)
            }
            CumlativeAmountsPower::EPC => {
                CumlativeAmountsPower::try_from(edata).map(Self::CumlativeAmountsPower)
            }
            UnitForCumlativeAmountsPower::EPC => UnitForCumlativeAmountsPower::try_from(edata)
                .map(Self::UnitForCumlativeAmountsPower),
            HistoricalCumlativeAmount::EPC => {
                HistoricalCumlativeAmount::try_from(edata).map(Self::HistoricalCumlativeAmount)
            }
            DayForHistoricalData::EPC => {
                DayForHistoricalData::try_from(edata).map(Self::DayForHistoricalData)
            }
            InstantiousPower::EPC => InstantiousPower::try_from(edata).map(Self::InstantiousPower),
            InstantiousCurrent::EPC => {
                InstantiousCurrent::try_from(edata).map(Self::InstantiousCurrent)
            }
            CumlativeAmountsOfPowerAtFixedTime::EPC => {
                CumlativeAmountsOfPowerAtFixedTime::try_from(edata)
                    .map(Self::CumlativeAmountsOfPowerAtFixedTime)
            }
            _ => Err(format!("UNKNOWN EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show(None))
    }
}

/// 0xd3 係数
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Coefficient(pub u32);

impl Coefficient {
    pub const EPC: u8 = 0xd3; // 0xd3 係数
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for Coefficient {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        if edata.epc == Self::EPC {
            match edata.edt {
                &[a, b, c, d] => Ok(Self(u32::from_be_bytes([a, b, c, d]))),
                &[a] => Ok(Self(a as u32)),
                [] => Ok(Self(1)), // 値なしは × 1
                _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
            }
        } else {
            Err(format!("BAD EPC:0x{:X}", edata.epc))
        }
    }
}

impl fmt::Display for Coefficient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "係数={}", self.0)
    }
}

/// 0xd7 積算電力量有効桁数
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct NumberOfEffectiveDigits(pub u8);

impl NumberOfEffectiveDigits {
    pub const EPC: u8 = 0xd7; // 0xd7 積算電力量有効桁数
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for NumberOfEffectiveDigits {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.edt {
            [a] if edata.epc == Self::EPC => Ok(Self(*a)),
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for NumberOfEffectiveDigits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "積算電力量有効桁数 {} 桁", self.0)
    }
}

/// 0xe0 積算電力量計測値(正方向計測値)
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct CumlativeAmountsPower(pub u32);

impl CumlativeAmountsPower {
    pub const EPC: u8 = 0xe0; // 0xe0 積算電力量計測値(正方向計測値)

    pub fn kwh(&self, unit: &UnitForCumlativeAmountsPower) -> Option<Decimal> {
        unit.0.map(|u| Decimal::from(self.0) * u)
    }

    pub fn show(&self, opt_unit: Option<&UnitForCumlativeAmountsPower>) -> String {
        match opt_unit.and_then(|unit| self.kwh(unit)) {
            Some(kwh) => format!("積算電力量計測値(正方向計測値)={:8} kwh", kwh),
            None => format!("積算電力量計測値(正方向計測値)={:8}", self.0),
        }
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for CumlativeAmountsPower {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.edt {
            &[a, b, c, d] if edata.epc == Self::EPC => Ok(Self(u32::from_be_bytes([a, b, c, d]))),
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for CumlativeAmountsPower {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show(None))
    }
}

/// 0xe1 積算電力量単位(正方向、逆方向計測値)
/// 表に無い値はNone
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct UnitForCumlativeAmountsPower(pub Option<Decimal>);

impl UnitForCumlativeAmountsPower {
    pub const EPC: u8 = 0xe1; // 0xe1 積算電力量単位(正方向、逆方向計測値)

    /// 単位を表す値から乗数を得る
    pub fn from_code(code: u8) -> Self {
        let multiplier = match code {
            0x00 => Some(Decimal::new(1, 0)),     // 1 kwh
            0x01 => Some(Decimal::new(1, 1)),     // 0.1 kwh
            0x02 => Some(Decimal::new(1, 2)),     // 0.01 kwh
            0x03 => Some(Decimal::new(1, 3)),     // 0.001 kwh
            0x04 => Some(Decimal::new(1, 4)),     // 0.0001 kwh
            0x0a => Some(Decimal::new(10, 0)),    // 10 kwh
            0x0b => Some(Decimal::new(100, 0)),   // 100 kwh
            0x0c => Some(Decimal::new(1000, 0)),  // 1000 kwh
            0x0d => Some(Decimal::new(10000, 0)), // 10000 kwh
            _ => None,
        };
        Self(multiplier)
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for UnitForCumlativeAmountsPower {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.edt {
            [code] if edata.epc == Self::EPC => Ok(Self::from_code(*code)),
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for UnitForCumlativeAmountsPower {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(unit) => write!(f, "積算電力量単位(正方向、逆方向計測値)= {} kwh", unit),
            None => write!(f, "積算電力量単位(正方向、逆方向計測値)= N/A"),
        }
    }
}

/// 0xe2 積算電力量計測値履歴1 (正方向計測値)
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct HistoricalCumlativeAmount {
    pub n_days_ago: u16,
    pub historical: Vec<Option<u32>>,
}

impl HistoricalCumlativeAmount {
    pub const EPC: u8 = 0xe2; // 0xe2 積算電力量計測値履歴1 (正方向計測値)

    /// 計測値なし
    pub const NOT_AVAILABLE: u32 = 0xfffffffe;

    pub fn show(&self, opt_unit: Option<&UnitForCumlativeAmountsPower>) -> String {
        match opt_unit.and_then(|unit| unit.0) {
            Some(unit) => format!(
                "積算電力量計測値履歴1 (正方向計測値)={:2}日前[{}]",
                self.n_days_ago,
                self.historical
                    .iter()
                    .map(|a: &Option<u32>| a.map_or("NA".to_string(), |n| {
                        format!("{} kwh", Decimal::from(n) * unit)
                    }))
                    .map(|s| format!("{:>13}", s))
                    .collect::<Vec<String>>()
                    .join(",")
            ),
            None => format!(
                "積算電力量計測値履歴1 (正方向計測値)={:2}日前[{}]",
                self.n_days_ago,
                self.historical
                    .iter()
                    .map(|a: &Option<u32>| a.map_or("NA".to_string(), |n| format!("{}", n)))
                    .map(|s| format!("{:>9}", s))
                    .collect::<Vec<String>>()
                    .join(",")
            ),
        }
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for HistoricalCumlativeAmount {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.edt {
            [day0, day1, xs @ ..] if edata.epc == Self::EPC && xs.len() % 4 == 0 => {
                let day = u16::from_be_bytes([*day0, *day1]);
                let historical = xs
                    .chunks_exact(4)
                    .map(|q| u32::from_be_bytes([q[0], q[1], q[2], q[3]]))
                    .map(|dword| (dword != Self::NOT_AVAILABLE).then_some(dword))
                    .collect::<Vec<Option<u32>>>();
                Ok(Self {
                    n_days_ago: day,
                    historical,
                })
            }
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for HistoricalCumlativeAmount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show(None))
    }
}

/// 0xe5 積算履歴収集日1
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct DayForHistoricalData(pub u8);

impl DayForHistoricalData {
    pub const EPC: u8 = 0xe5; // 0xe5 積算履歴収集日1
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for DayForHistoricalData {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.edt {
            [a] if edata.epc == Self::EPC => Ok(Self(*a)),
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for DayForHistoricalData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "積算履歴収集日1={}日前", self.0)
    }
}

/// 0xe7 瞬時電力計測値
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct InstantiousPower(pub Decimal);

impl InstantiousPower {
    pub const EPC: u8 = 0xe7; // 0xe7 瞬時電力計測値
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for InstantiousPower {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.edt {
            &[a, b, c, d] if edata.epc == Self::EPC => {
                Ok(Self(Decimal::new(
                    i32::from_be_bytes([a, b, c, d]) as i64,
                    0,
                ))) // マイナスの値もある
            }
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for InstantiousPower {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "瞬時電力={:5} W", self.0)
    }
}

/// 0xe8 瞬時電流計測値
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct InstantiousCurrent {
    pub r: Decimal,
    pub t: Option<Decimal>,
}

impl InstantiousCurrent {
    pub const EPC: u8 = 0xe8; // 0xe8 瞬時電流計測値

    /// 単相2線式のT相
    pub const SINGLE_PHASE_TWO_WIRE: i16 = 0x7ffe;
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for InstantiousCurrent {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.edt {
            &[a, b, c, d] if edata.epc == Self::EPC => {
                let r = Decimal::new(i16::from_be_bytes([a, b]) as i64, 1);
                let t = match i16::from_be_bytes([c, d]) {
                    Self::SINGLE_PHASE_TWO_WIRE => None,
                    t => Some(Decimal::new(t as i64, 1)),
                };
                Ok(Self { r, t })
            }
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for InstantiousCurrent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.r, self.t) {
            (r, None) => write!(f, "瞬時電流:(1φ2W) {:4} A", r),
            (r, Some(t)) => write!(f, "瞬時電流:(1φ3W) R={:4} A, T={:4} A", r, t),
        }
    }
}

/// 0xea 定時積算電力量計測値(正方向計測値)
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct CumlativeAmountsOfPowerAtFixedTime {
    pub time_point: NaiveDateTime,
    pub cumlative_amounts_power: u32,
}

impl CumlativeAmountsOfPowerAtFixedTime {
    pub const EPC: u8 = 0xea; // 0xea 定時積算電力量計測値(正方向計測値)

    pub fn show(&self, opt_unit: Option<&UnitForCumlativeAmountsPower>) -> String {
        let time_point = self.time_point.format("%Y-%m-%d %H:%M:%S");
        match opt_unit.and_then(|unit| unit.0) {
            Some(unit) => format!(
                "定時積算電力量計測値(正方向計測値)={} ({:8} kwh)",
                time_point,
                Decimal::from(self.cumlative_amounts_power) * unit
            ),
            None => format!(
                "定時積算電力量計測値(正方向計測値)={} ({:8})",
                time_point, self.cumlative_amounts_power
            ),
        }
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for CumlativeAmountsOfPowerAtFixedTime {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata) -> Result<Self, Self::Error> {
        match edata.edt {
            &[
                year0,                // 年 2bytes
                year1,                //
                month,                // 月 1bytes
                day,                  // 日 1bytes
                hour,                 // 時 1bytes
                minute,               // 分 1bytes
                second,               // 秒 1bytes
                cumlative_watt_hour0, // 積算電力量 4bytes
                cumlative_watt_hour1, //
                cumlative_watt_hour2, //
                cumlative_watt_hour3, //
            ] if edata.epc == Self::EPC => {
                let year = u16::from_be_bytes([year0, year1]);
                let datetime = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .and_then(|a| a.and_hms_opt(hour as u32, minute as u32, second as u32))
                    .ok_or_else(|| format!("BAD DATETIME EDT:{:?}", edata.edt))?;
                let value = u32::from_be_bytes([
                    cumlative_watt_hour0,
                    cumlative_watt_hour1,
                    cumlative_watt_hour2,
                    cumlative_watt_hour3,
                ]);
                Ok(Self {
                    time_point: datetime,
                    cumlative_amounts_power: value,
                })
            }
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for CumlativeAmountsOfPowerAtFixedTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show(None))
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
fn test_unit() {
    let table = [
        (0x00, Some(Decimal::new(1, 0))),
        (0x01, Some(Decimal::new(1, 1))),
        (0x02, Some(Decimal::new(1, 2))),
        (0x03, Some(Decimal::new(1, 3))),
        (0x04, Some(Decimal::new(1, 4))),
        (0x0a, Some(Decimal::new(10, 0))),
        (0x0b, Some(Decimal::new(100, 0))),
        (0x0c, Some(Decimal::new(1000, 0))),
        (0x0d, Some(Decimal::new(10000, 0))),
    ];
    for (code, expected) in table {
        let unit = UnitForCumlativeAmountsPower::try_from(&edata(0xe1, &[code])).unwrap();
        assert_eq!(unit.0, expected);
    }
    for code in (0x05..=0x09).chain(0x0e..=0xff) {
        let unit = UnitForCumlativeAmountsPower::try_from(&edata(0xe1, &[code])).unwrap();
        assert_eq!(unit, UnitForCumlativeAmountsPower(None));
    }
    assert!(UnitForCumlativeAmountsPower::try_from(&edata(0xe1, &[])).is_err());
}

#[test]
fn test_instantious_current() {
    // 単相2線式
    let a = InstantiousCurrent::try_from(&edata(0xe8, &[0x00, 0x32, 0x7f, 0xfe])).unwrap();
    assert_eq!(a.r, Decimal::new(50, 1));
    assert_eq!(a.t, None);
    assert_eq!(a.to_string(), "瞬時電流:(1φ2W)  5.0 A");

    // 単相3線式
    let a = InstantiousCurrent::try_from(&edata(0xe8, &[0x00, 0x32, 0x00, 0x14])).unwrap();
    assert_eq!(a.r, Decimal::new(50, 1));
    assert_eq!(a.t, Some(Decimal::new(20, 1)));

    assert!(InstantiousCurrent::try_from(&edata(0xe8, &[0x00, 0x32])).is_err());
}

#[test]
fn test_cumlative_amounts_power() {
    let a = CumlativeAmountsPower::try_from(&edata(0xe0, &[0x00, 0x00, 0x27, 0x10])).unwrap();
    assert_eq!(a, CumlativeAmountsPower(10000));
    let unit = UnitForCumlativeAmountsPower::from_code(0x01);
    assert_eq!(a.kwh(&unit), Some(Decimal::new(1000, 0)));
    assert_eq!(a.kwh(&UnitForCumlativeAmountsPower(None)), None);
    assert_eq!(
        a.show(Some(&unit)),
        "積算電力量計測値(正方向計測値)=  1000.0 kwh"
    );
}

#[test]
fn test_instantious_power() {
    let a = InstantiousPower::try_from(&edata(0xe7, &[0xff, 0xff, 0xff, 0x9c])).unwrap();
    assert_eq!(a, InstantiousPower(Decimal::new(-100, 0)));
}

#[test]
fn test_fixed_time() {
    let edt = [
        0x07, 0xe9, 0x05, 0x1f, 0x17, 0x1e, 0x00, 0x00, 0x01, 0x86, 0xa0,
    ];
    let a = CumlativeAmountsOfPowerAtFixedTime::try_from(&edata(0xea, &edt)).unwrap();
    assert_eq!(
        a.time_point,
        NaiveDate::from_ymd_opt(2025, 5, 31)
            .and_then(|d| d.and_hms_opt(23, 30, 0))
            .unwrap()
    );
    assert_eq!(a.cumlative_amounts_power, 100000);
    assert_eq!(
        a.show(None),
        "定時積算電力量計測値(正方向計測値)=2025-05-31 23:30:00 (  100000)"
    );

    // 存在しない日付
    let mut bad = edt;
    bad[3] = 0x20;
    assert!(CumlativeAmountsOfPowerAtFixedTime::try_from(&edata(0xea, &bad)).is_err());
}

#[test]
fn test_historical() {
    let mut edt = vec![0x00, 0x01];
    edt.extend([0x00, 0x00, 0x27, 0x10]);
    edt.extend([0xff, 0xff, 0xff, 0xfe]);
    let a = HistoricalCumlativeAmount::try_from(&edata(0xe2, &edt)).unwrap();
    assert_eq!(a.n_days_ago, 1);
    assert_eq!(a.historical, vec![Some(10000), None]);
    edt.push(0x00);
    assert!(HistoricalCumlativeAmount::try_from(&edata(0xe2, &edt)).is_err());
}

#[test]
fn test_dispatch() {
    assert!(matches!(
        Properties::try_from(&edata(0xd3, &[0x0a])),
        Ok(Properties::Coefficient(Coefficient(10)))
    ));
    assert!(matches!(
        Properties::try_from(&edata(0xe5, &[0x00])),
        Ok(Properties::DayForHistoricalData(DayForHistoricalData(0)))
    ));
    assert!(Properties::try_from(&edata(0x80, &[0x30])).is_err());
}
