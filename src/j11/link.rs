// J11 コマンド送信と応答待ち
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::j11::command::{self, RESULT_SUCCESS};
use crate::j11::datagram::{Datagram, FramingError};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};

/// 応答待ちの既定タイムアウト
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// 手順
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    HardwareReset,
    InitialSetup,
    SetAuthInfo,
    ActiveScan,
    AwaitBeacon,
    RouteBStart,
    OpenUdpPort,
    PanaStart,
    PanaResult,
    InstanceList,
    Transmit,
    PanaTerminate,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::HardwareReset => "ハードウェアリセット",
            Self::InitialSetup => "初期設定",
            Self::SetAuthInfo => "BルートPANA認証情報設定",
            Self::ActiveScan => "アクティブスキャン",
            Self::AwaitBeacon => "Beacon応答待ち",
            Self::RouteBStart => "Bルート動作開始",
            Self::OpenUdpPort => "UDPポートオープン",
            Self::PanaStart => "BルートPANA開始",
            Self::PanaResult => "PANA認証結果通知待ち",
            Self::InstanceList => "インスタンスリスト通知待ち",
            Self::Transmit => "データ送信",
            Self::PanaTerminate => "BルートPANA終了",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o")]
    Io(#[from] io::Error),
    #[error("{step}: タイムアウトしました")]
    Timeout { step: Step },
    #[error("{step}: コマンド実行に失敗しました。 {response}")]
    Rejected { step: Step, response: Datagram },
    #[error("PANA認証に失敗しました")]
    PanaAuthenticationFailed,
    #[error("スマートメーターから応答がありません")]
    PanaNoResponse,
    #[error("よくわからないPANA認証結果 0x{0:02X}")]
    PanaUnknownResult(u8),
    #[error("データ送信に失敗しました。 digest:[{}]", hex(.digest))]
    TransmitFailed { digest: Vec<u8> },
    #[error("受信タスクが終了しました")]
    ReceiverStopped,
    #[error("MACアドレスが不正です: {0}")]
    InvalidMacAddress(String),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("接続情報: {0}")]
    Settings(#[from] crate::connection_settings::Error),
    #[error("Echonetliteフレーム: {0}")]
    Echonetlite(#[from] crate::echonetlite::Error),
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|n| format!("{:02X}", n)).collect()
}

/// 実行時設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct J11Config {
    pub timeout: Duration,    // 各手順の応答待ち時間
    pub initial_channel: u8, // ペアリング時の初期設定チャネル
}

impl Default for J11Config {
    fn default() -> Self {
        J11Config {
            timeout: DEFAULT_TIMEOUT,
            initial_channel: command::DEFAULT_CHANNEL,
        }
    }
}

/// 要求コマンドを送信してコマンド応答を待つ
pub struct Commander<W> {
    writer: W,
    responses: mpsc::Receiver<Datagram>,
    timeout: Duration,
}

impl<W: io::Write> Commander<W> {
    pub fn new(writer: W, responses: mpsc::Receiver<Datagram>, timeout: Duration) -> Self {
        Commander {
            writer,
            responses,
            timeout,
        }
    }

    /// 送信する
    pub fn send(&mut self, datagram: &Datagram) -> io::Result<()> {
        tracing::trace!(target:"Tx->", "{}", datagram);
        self.writer.write_all(&datagram.encode())?;
        self.writer.flush()
    }

    /// 応答コマンドコードが一致するまで待つ
    /// 一致しない応答は捨てる
    pub async fn wait_response(&mut self, step: Step, code: u16) -> Result<Datagram, Error> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match timeout_at(deadline, self.responses.recv()).await {
                Err(_elapsed) => return Err(Error::Timeout { step }),
                Ok(None) => return Err(Error::ReceiverStopped),
                Ok(Some(r)) if r.command_code() == code => return Ok(r),
                Ok(Some(r)) => tracing::debug!("{step}: discarded {r}"),
            }
        }
    }

    /// 要求コマンドを送信して結果コードを確認する
    pub async fn request(&mut self, step: Step, command: &Datagram) -> Result<Datagram, Error> {
        self.send(command)?;
        let code = command::response_code(command.command_code());
        let response = self.wait_response(step, code).await?;
        if response.data.first() == Some(&RESULT_SUCCESS) {
            tracing::debug!("{step} OK");
            Ok(response)
        } else {
            Err(Error::Rejected { step, response })
        }
    }
}

/// 通知を待つ
pub struct Notifications {
    rx: mpsc::Receiver<Datagram>,
    timeout: Duration,
}

impl Notifications {
    pub fn new(rx: mpsc::Receiver<Datagram>, timeout: Duration) -> Self {
        Notifications { rx, timeout }
    }

    /// 通知コマンドコードが一致するまで待つ
    /// 一致しない通知は捨てる
    pub async fn wait(&mut self, step: Step, code: u16) -> Result<Datagram, Error> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match timeout_at(deadline, self.rx.recv()).await {
                Err(_elapsed) => return Err(Error::Timeout { step }),
                Ok(None) => return Err(Error::ReceiverStopped),
                Ok(Some(r)) if r.command_code() == code => return Ok(r),
                Ok(Some(r)) => tracing::debug!("{step}: discarded {r}"),
            }
        }
    }

    /// 次の通知
    pub async fn recv(&mut self) -> Option<Datagram> {
        self.rx.recv().await
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// MACアドレスからIPv6リンクローカルアドレスへ変換する
/// MACアドレスの最初の1バイト下位2bit目を反転して
/// 0xFE80000000000000XXXXXXXXXXXXXXXXのXXをMACアドレスに置き換える
pub fn link_local_address(mac_address: u64) -> std::net::Ipv6Addr {
    std::net::Ipv6Addr::from_bits(
        0xFE80_0000_0000_0000u128 << 64 | (mac_address ^ 0x0200_0000_0000_0000) as u128,
    )
}

#[cfg(test)]
use crate::j11::mock;

#[test]
fn test_link_local_address() {
    assert_eq!(
        link_local_address(0x001d_1290_1234_5678),
        "fe80::21d:1290:1234:5678".parse::<std::net::Ipv6Addr>().unwrap()
    );
    assert_eq!(
        link_local_address(0x0200_0000_0000_0001),
        "fe80::1".parse::<std::net::Ipv6Addr>().unwrap()
    );
}

#[tokio::test]
async fn test_request() {
    let (tx, rx) = mpsc::channel(4);
    let writer = mock::SharedWriter::default();
    let mut commander = Commander::new(writer.clone(), rx, Duration::from_secs(1));

    tx.send(mock::response(0x2054, &[0x01])).await.unwrap(); // 関係ない応答
    tx.send(mock::response(0x205f, &[0x01])).await.unwrap();
    let command = command::initial_setup(4);
    let r = commander.request(Step::InitialSetup, &command).await.unwrap();
    assert_eq!(r.command_code(), 0x205f);
    assert_eq!(writer.take(), command.encode());

    tx.send(mock::response(0x205f, &[0x02])).await.unwrap();
    match commander.request(Step::InitialSetup, &command).await {
        Err(Error::Rejected { step, response }) => {
            assert_eq!(step, Step::InitialSetup);
            assert_eq!(response.data, vec![0x02]);
        }
        other => panic!("{:?}", other),
    }

    // データ部が空でも失敗
    tx.send(mock::response(0x205f, &[])).await.unwrap();
    assert!(matches!(
        commander.request(Step::InitialSetup, &command).await,
        Err(Error::Rejected { .. })
    ));
}

#[tokio::test]
async fn test_timeout() {
    let (_tx, rx) = mpsc::channel(4);
    let mut commander = Commander::new(
        mock::SharedWriter::default(),
        rx,
        Duration::from_millis(50),
    );
    assert!(matches!(
        commander
            .request(Step::RouteBStart, &command::route_b_start())
            .await,
        Err(Error::Timeout {
            step: Step::RouteBStart
        })
    ));

    let (tx, rx) = mpsc::channel(4);
    let mut notifications = Notifications::new(rx, Duration::from_millis(50));
    tx.send(mock::notify(0x6018, &[])).await.unwrap(); // 関係ない通知
    assert!(matches!(
        notifications.wait(Step::PanaResult, 0x6028).await,
        Err(Error::Timeout {
            step: Step::PanaResult
        })
    ));
    drop(tx);
    assert!(matches!(
        notifications.wait(Step::PanaResult, 0x6028).await,
        Err(Error::ReceiverStopped)
    ));
}
