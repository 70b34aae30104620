// ルートB認証情報
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use std::fmt;
use std::str::FromStr;

#[derive(PartialEq, Eq, Clone, Debug)]
/// 認証情報
pub struct Credentials {
    pub id: Id,
    pub password: Password,
}

#[derive(PartialEq, Eq, Clone)]
/// ID
pub struct Id([u8; Id::LEN]);

impl Id {
    pub const LEN: usize = 32;

    #[inline]
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// 最後の8バイト
    pub fn tail(&self) -> [u8; 8] {
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&self.0[Self::LEN - 8..]);
        tail
    }
}

impl TryFrom<&[u8]> for Id {
    type Error = String;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| format!("IDは{}バイト固定長です", Self::LEN))
    }
}

impl FromStr for Id {
    type Err = String;
    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.as_bytes())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

#[derive(PartialEq, Eq, Clone)]
/// パスワード
pub struct Password([u8; Password::LEN]);

impl Password {
    pub const LEN: usize = 12;

    #[inline]
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Password {
    type Error = String;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| format!("PASSWORDは{}バイト固定長です", Self::LEN))
    }
}

impl FromStr for Password {
    type Err = String;
    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.as_bytes())
    }
}

impl fmt::Display for Password {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// ログにパスワードを出さない
impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Password({})", "#".repeat(Self::LEN))
    }
}

#[test]
fn test_credentials() {
    let id = Id::from_str("0123456789ABCDEF0123456789ABCDEF").unwrap();
    assert_eq!(id.tail(), *b"89ABCDEF");
    assert_eq!(id.to_string(), "0123456789ABCDEF0123456789ABCDEF");
    assert!(Id::from_str("0123456789ABCDEF").is_err());
    assert!(Id::from_str("0123456789ABCDEF0123456789ABCDEF0").is_err());

    let password = Password::from_str("PASSWORD1234").unwrap();
    assert_eq!(password.as_bytes(), b"PASSWORD1234");
    assert_eq!(password.to_string(), "PASSWORD1234");
    assert_eq!(format!("{:?}", password), "Password(############)");
    assert!(Password::from_str("PASSWORD").is_err());
}
