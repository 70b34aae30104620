// Echonetlite FRAME
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::{self, EchonetliteEdata};
use bincode;
use core::result;
use std::fmt;

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct EchonetliteFrame<'a> {
    pub ehd: u16,
    pub tid: u16,
    pub seoj: [u8; 3],
    pub deoj: [u8; 3],
    pub esv: u8,
    pub opc: u8,
    pub edata: Vec<EchonetliteEdata<'a>>,
}

impl<'a> EchonetliteFrame<'a> {
    /// スマートメーターへのGet要求
    pub fn get(tid: u16, epcs: &[u8]) -> Self {
        let edata = epcs
            .iter()
            .map(|epc| EchonetliteEdata {
                epc: *epc,
                ..Default::default()
            })
            .collect::<Vec<_>>();
        Self::request(tid, echonetlite::esv::GET, edata)
    }

    /// スマートメーターへのSetC要求
    pub fn set_c(tid: u16, edata: Vec<EchonetliteEdata<'a>>) -> Self {
        Self::request(tid, echonetlite::esv::SETC, edata)
    }

    fn request(tid: u16, esv: u8, edata: Vec<EchonetliteEdata<'a>>) -> Self {
        EchonetliteFrame {
            ehd: echonetlite::EHD,
            tid,
            seoj: echonetlite::SEOJ_HOME_CONTROLLER,
            deoj: echonetlite::DEOJ_SMART_METER,
            esv,
            opc: edata.len() as u8,
            edata,
        }
    }

    pub fn show(&self) -> String {
        match self.esv {
            // SetI_SNA
            0x50 => format!("SetI_SNAプロパティ値書き込み要求不可応答 N={}", self.opc),
            // SetC_SNA
            0x51 => format!("SetC_SNAプロパティ値書き込み要求不可応答 N={}", self.opc),
            // Get_SNA
            0x52 => format!("Get_SNAプロパティ値読み出し不可応答 N={}", self.opc),
            // INF_SNA
            0x53 => format!("INF_SNAプロパティ値通知不可応答 N={}", self.opc),
            // SetC
            0x61 => format!("SetCプロパティ値書き込み要求 N={}", self.opc),
            // Get
            0x62 => format!("Getプロパティ値読み出し要求 N={}", self.opc),
            // Set_res
            0x71 => format!("Set_resプロパティ値書き込み応答 N={}", self.opc),
            // Get_res
            0x72 => format!("Get_resプロパティ値読み出し応答 N={}", self.opc),
            // INF
            0x73 => format!("INFプロパティ値通知 N={}", self.opc),
            // INFC
            0x74 => format!("INFCプロパティ値通知(応答要) N={}", self.opc),
            _ => format!(
                "よくわからないESV値 ESV=0x{:02X} N={} TID={:04X} SEOJ={} DEOJ={}",
                self.esv,
                self.opc,
                self.tid,
                hex(&self.seoj),
                hex(&self.deoj)
            ),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|n| format!("{:02X}", n)).collect()
}

impl<'de, Context> bincode::BorrowDecode<'de, Context> for EchonetliteFrame<'de> {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let ehd: u16 = bincode::BorrowDecode::borrow_decode(decoder)?;
        let tid: u16 = bincode::BorrowDecode::borrow_decode(decoder)?;
        let seoj: [u8; 3] = bincode::BorrowDecode::borrow_decode(decoder)?;
        let deoj: [u8; 3] = bincode::BorrowDecode::borrow_decode(decoder)?;
        let esv: u8 = bincode::BorrowDecode::borrow_decode(decoder)?;
        let opc: u8 = bincode::BorrowDecode::borrow_decode(decoder)?;
        let mut edata: Vec<EchonetliteEdata> = Vec::with_capacity(opc as usize);
        for _idx in 0..opc {
            edata.push(bincode::BorrowDecode::borrow_decode(decoder)?);
        }
        Ok(Self {
            ehd,
            tid,
            seoj,
            deoj,
            esv,
            opc,
            edata,
        })
    }
}

impl<'a> bincode::Encode for EchonetliteFrame<'a> {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> result::Result<(), bincode::error::EncodeError> {
        if self.opc as usize != self.edata.len() {
            return Err(bincode::error::EncodeError::Other(
                "OPC does not match the number of EDATA",
            ));
        }
        bincode::Encode::encode(&self.ehd, encoder)?;
        bincode::Encode::encode(&self.tid, encoder)?;
        bincode::Encode::encode(&self.seoj, encoder)?;
        bincode::Encode::encode(&self.deoj, encoder)?;
        bincode::Encode::encode(&self.esv, encoder)?;
        bincode::Encode::encode(&self.opc, encoder)?;
        for v in &self.edata {
            bincode::Encode::encode(v, encoder)?;
        }
        Ok(())
    }
}

impl<'a> fmt::Display for EchonetliteFrame<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show())
    }
}

impl<'a> Default for EchonetliteFrame<'a> {
    #[inline]
    fn default() -> Self {
        EchonetliteFrame {
            ehd: echonetlite::EHD,
            tid: 0,
            seoj: [0, 0, 0],
            deoj: [0, 0, 0],
            esv: 0,
            opc: 0,
            edata: vec![],
        }
    }
}

#[test]
fn test1() {
    let frame = EchonetliteFrame {
        ehd: 0x1081,
        tid: 0x1234,
        seoj: [0x05, 0xff, 0x01],
        deoj: [0x02, 0x88, 0x01],
        esv: 0x62,
        opc: 0x01,
        edata: vec![EchonetliteEdata {
            epc: 0xe7,
            pdc: 0,
            edt: &[],
        }],
    };

    let binary: Vec<u8> = vec![
        0x10, 0x81, //
        0x12, 0x34, //
        0x05, 0xff, 0x01, //
        0x02, 0x88, 0x01, //
        0x62, //
        0x01, //
        0xe7, 0x00, //
    ];
    let encoded = echonetlite::encode(&frame).unwrap();
    assert_eq!(encoded.len(), 14);
    assert_eq!(encoded, binary);

    let decoded = echonetlite::decode(&encoded).unwrap();
    assert_eq!(frame, decoded);
}

#[test]
fn test_requests() {
    // 瞬時電力と瞬時電流計測値を取得するechonet lite電文
    let frame = EchonetliteFrame::get(1, &[0xe7, 0xe8]);
    assert_eq!(
        echonetlite::encode(&frame).unwrap(),
        vec![
            0x10, 0x81, 0x00, 0x01, 0x05, 0xff, 0x01, 0x02, 0x88, 0x01, 0x62, 0x02, 0xe7, 0x00,
            0xe8, 0x00,
        ]
    );

    // 積算履歴収集日1(edt=0は今日)
    let frame = EchonetliteFrame::set_c(
        1,
        vec![EchonetliteEdata {
            epc: 0xe5,
            pdc: 1,
            edt: &[0],
        }],
    );
    assert_eq!(
        echonetlite::encode(&frame).unwrap(),
        vec![
            0x10, 0x81, 0x00, 0x01, 0x05, 0xff, 0x01, 0x02, 0x88, 0x01, 0x61, 0x01, 0xe5, 0x01,
            0x00,
        ]
    );
    assert_eq!(frame.show(), "SetCプロパティ値書き込み要求 N=1");
}
