// スマートメータ接続情報
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::j11::authn::{Credentials, Id, Password};
use crate::j11::parser::Beacon;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o")]
    Io(#[from] io::Error),
    #[error("toml: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("toml: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

/// スマートメータ接続情報
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[allow(non_snake_case)]
pub struct ConnectionSettings {
    pub RouteBId: String,
    pub RouteBPassword: String,
    pub Channel: u8,
    pub MacAddress: String,
    pub PanId: u16,
}

impl ConnectionSettings {
    /// 見つかったスマートメーターの情報
    pub fn new(credentials: &Credentials, beacon: &Beacon) -> Self {
        ConnectionSettings {
            RouteBId: credentials.id.to_string(),
            RouteBPassword: credentials.password.to_string(),
            Channel: beacon.channel,
            MacAddress: format!("{:016X}", beacon.mac_address),
            PanId: beacon.pan_id,
        }
    }

    pub fn credentials(&self) -> Result<Credentials, Error> {
        Ok(Credentials {
            id: Id::from_str(&self.RouteBId).map_err(Error::Invalid)?,
            password: Password::from_str(&self.RouteBPassword).map_err(Error::Invalid)?,
        })
    }

    pub fn mac_address(&self) -> Result<u64, Error> {
        u64::from_str_radix(&self.MacAddress, 16)
            .map_err(|e| Error::Invalid(format!("MacAddress \"{}\" {}", self.MacAddress, e)))
    }

    /// 設定ファイルを読む
    /// 拡張子が.jsonならJSON, それ以外はTOML
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        if is_json(path) {
            Ok(serde_json::from_str(&text)?)
        } else {
            Ok(toml::from_str(&text)?)
        }
    }

    /// 設定ファイルに保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        let text = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            let comment = "# broutej11設定ファイル".to_string();
            [comment, toml::to_string_pretty(self)?].join("\n")
        };
        fs::write(path, text)?;
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
fn settings() -> ConnectionSettings {
    ConnectionSettings {
        RouteBId: "00112233445566778899AABBCCDDEEFF".to_string(),
        RouteBPassword: "0123456789AB".to_string(),
        Channel: 0x21,
        MacAddress: "001D129012345678".to_string(),
        PanId: 0x8abc,
    }
}

#[test]
fn test_new() {
    let beacon = Beacon {
        channel: 0x21,
        mac_address: 0x001d_1290_1234_5678,
        pan_id: 0x8abc,
        rssi: -60,
    };
    let credentials = settings().credentials().unwrap();
    assert_eq!(ConnectionSettings::new(&credentials, &beacon), settings());
    assert_eq!(settings().mac_address().unwrap(), 0x001d_1290_1234_5678);

    let mut bad = settings();
    bad.MacAddress = "XYZ".to_string();
    assert!(bad.mac_address().is_err());
    bad.RouteBPassword = "short".to_string();
    assert!(bad.credentials().is_err());
}

#[test]
fn test_save_load() {
    let dir = std::env::temp_dir().join(format!("broutej11-settings-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();

    let toml_file = dir.join("broutej11.toml");
    settings().save(&toml_file).unwrap();
    let text = fs::read_to_string(&toml_file).unwrap();
    assert!(text.contains("RouteBId = \"00112233445566778899AABBCCDDEEFF\""));
    assert_eq!(ConnectionSettings::load(&toml_file).unwrap(), settings());

    let json_file = dir.join("settings.json");
    settings().save(&json_file).unwrap();
    let text = fs::read_to_string(&json_file).unwrap();
    assert!(text.contains("\"PanId\": 35516"));
    assert_eq!(ConnectionSettings::load(&json_file).unwrap(), settings());

    // 元のツールが書いたJSON
    let legacy = dir.join("legacy.json");
    fs::write(
        &legacy,
        r#"{
  "RouteBId": "00112233445566778899AABBCCDDEEFF",
  "RouteBPassword": "0123456789AB",
  "Channel": 33,
  "MacAddress": "1d129012345678",
  "PanId": 35516
}"#,
    )
    .unwrap();
    let loaded = ConnectionSettings::load(&legacy).unwrap();
    assert_eq!(loaded.mac_address().unwrap(), 0x001d_1290_1234_5678);

    assert!(ConnectionSettings::load(dir.join("missing.toml")).is_err());
    fs::remove_dir_all(&dir).unwrap();
}
