// 接続するスマートメーターをアクティブスキャンで探す
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::connection_settings::ConnectionSettings;
use crate::j11::authn::Credentials;
use crate::j11::command::{self, code};
use crate::j11::parser::{self, ActiveScanNotify, Beacon};
use crate::j11::{self, Commander, Error, J11Config, Notifications, Step};
use std::io;
use std::path::Path;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// 接続するスマートメーターをアクティブスキャンで探す
pub async fn pairing<R, W>(
    reader: R,
    writer: W,
    config: &J11Config,
    scan_duration: u8,
    credentials: &Credentials,
) -> Result<Beacon, Error>
where
    R: io::Read + Send + 'static,
    W: io::Write,
{
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let (mut commander, notifications, receiver) =
        j11::open(reader, writer, config, cancel.clone());
    let result = active_scan(
        &mut commander,
        notifications,
        config,
        scan_duration,
        credentials,
        &cancel,
    )
    .await;
    j11::shutdown(receiver, &cancel, result).await
}

/// スマートメーターを探して接続情報を保存する
pub async fn pairing_and_save<R, W, P>(
    settings_path: P,
    reader: R,
    writer: W,
    config: &J11Config,
    scan_duration: u8,
    credentials: &Credentials,
) -> Result<ConnectionSettings, Error>
where
    R: io::Read + Send + 'static,
    W: io::Write,
    P: AsRef<Path>,
{
    let beacon = pairing(reader, writer, config, scan_duration, credentials).await?;
    let settings = ConnectionSettings::new(credentials, &beacon);
    settings.save(settings_path)?;
    Ok(settings)
}

async fn active_scan<W: io::Write>(
    commander: &mut Commander<W>,
    mut notifications: Notifications,
    config: &J11Config,
    scan_duration: u8,
    credentials: &Credentials,
    cancel: &CancellationToken,
) -> Result<Beacon, Error> {
    // ハードウェアリセット
    commander.send(&command::hardware_reset())?;
    notifications
        .wait(Step::HardwareReset, code::NOTIFY_BOOT)
        .await?;
    // 初期設定
    commander
        .request(
            Step::InitialSetup,
            &command::initial_setup(config.initial_channel),
        )
        .await?;
    // BルートPANA認証情報設定
    commander
        .request(Step::SetAuthInfo, &command::set_pana_auth_info(credentials))
        .await?;

    // アクティブスキャン結果通知を待ち受ける
    let (tx, rx) = oneshot::channel();
    let listener_cancel = cancel.child_token();
    let listener = tokio::spawn(listen_beacon(notifications, tx, listener_cancel.clone()));

    // アクティブスキャン実行
    commander
        .request(
            Step::ActiveScan,
            &command::active_scan(scan_duration, credentials),
        )
        .await?;

    // 最初に見つかったスマートメーター
    let found = match tokio::time::timeout(config.timeout, rx).await {
        Ok(Ok(beacon)) => Ok(beacon),
        Ok(Err(_closed)) => Err(Error::ReceiverStopped),
        Err(_elapsed) => Err(Error::Timeout {
            step: Step::AwaitBeacon,
        }),
    };
    listener_cancel.cancel();
    if let Err(e) = listener.await {
        tracing::error!("beacon listener: {e}");
    }
    found
}

/// アクティブスキャン結果通知からBeaconを取り出す
async fn listen_beacon(
    mut notifications: Notifications,
    tx: oneshot::Sender<Beacon>,
    cancel: CancellationToken,
) {
    loop {
        let r = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            r = notifications.recv() => r,
        };
        let Some(r) = r else {
            return;
        };
        if r.command_code() != code::NOTIFY_ACTIVE_SCAN {
            tracing::debug!("discarded {r}");
            continue;
        }
        match parser::active_scan_notify(&r.data) {
            Ok((_, ActiveScanNotify { beacon: Some(beacon), .. })) => {
                tracing::info!("found {beacon}");
                let _ = tx.send(beacon);
                return;
            }
            Ok((_, n)) => {
                tracing::debug!("channel:{} no beacon (result:{:02X})", n.channel, n.result)
            }
            Err(e) => tracing::warn!("malformed {r}: {e}"),
        }
    }
}

#[cfg(test)]
use crate::j11::datagram::Datagram;
#[cfg(test)]
use crate::j11::mock;
#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
fn credentials() -> Credentials {
    use std::str::FromStr;
    Credentials {
        id: crate::j11::authn::Id::from_str("00112233445566778899AABBCCDDEEFF").unwrap(),
        password: crate::j11::authn::Password::from_str("0123456789AB").unwrap(),
    }
}

#[cfg(test)]
fn config() -> J11Config {
    J11Config {
        timeout: Duration::from_millis(300),
        ..Default::default()
    }
}

#[cfg(test)]
fn beacon_notify() -> Datagram {
    let data = [
        0x00, // スキャン結果
        0x21, // スキャンチャネル
        0x01, // スキャン数
        0x00, 0x1d, 0x12, 0x90, 0x12, 0x34, 0x56, 0x78, // MACアドレス
        0x8a, 0xbc, // PAN ID
        0xc4, // RSSI
    ];
    mock::notify(code::NOTIFY_ACTIVE_SCAN, &data)
}

#[tokio::test]
async fn test_pairing() {
    let stream = mock::stream(&[
        mock::notify(0x6019, &[]),
        mock::response(0x205f, &[0x01]),
        mock::response(0x2054, &[0x01]),
        mock::response(0x2051, &[0x01]),
        mock::notify(0x4051, &[0x01, 0x04]), // Beacon応答無し
        beacon_notify(),
    ]);
    let writer = mock::SharedWriter::default();
    let beacon = pairing(stream, writer.clone(), &config(), 6, &credentials())
        .await
        .unwrap();
    assert_eq!(
        beacon,
        Beacon {
            channel: 0x21,
            mac_address: 0x001d_1290_1234_5678,
            pan_id: 0x8abc,
            rssi: -60,
        }
    );
    assert_eq!(writer.command_codes(), vec![0x00d9, 0x005f, 0x0054, 0x0051]);
}

#[tokio::test]
async fn test_pairing_scan_notify_before_response() {
    // 実機ではチャネルごとのスキャン結果通知がアクティブスキャン応答より先に届く
    let writer = mock::SharedWriter::default();
    let script = mock::Script::new(&writer)
        .then(
            mock::Gate::Elapsed(Duration::ZERO),
            vec![
                mock::notify(0x6019, &[]),
                mock::response(0x205f, &[0x01]),
                mock::response(0x2054, &[0x01]),
            ],
        )
        .then(
            mock::Gate::Written(0x0051),
            vec![mock::notify(0x4051, &[0x01, 0x04]), beacon_notify()],
        )
        // Beaconを受け取ったあとにも通知が続く
        .then(
            mock::Gate::Elapsed(Duration::from_millis(50)),
            vec![
                mock::notify(0x4051, &[0x01, 0x22]),
                mock::notify(0x4051, &[0x01, 0x23]),
                mock::response(0x2051, &[0x01]),
            ],
        );
    let beacon = pairing(script, writer.clone(), &config(), 6, &credentials())
        .await
        .unwrap();
    assert_eq!(beacon.channel, 0x21);
    assert_eq!(beacon.mac_address, 0x001d_1290_1234_5678);
    assert_eq!(writer.command_codes(), vec![0x00d9, 0x005f, 0x0054, 0x0051]);
}

#[tokio::test]
async fn test_pairing_and_save() {
    let stream = mock::stream(&[
        mock::notify(0x6019, &[]),
        mock::response(0x205f, &[0x01]),
        mock::response(0x2054, &[0x01]),
        mock::response(0x2051, &[0x01]),
        beacon_notify(),
    ]);
    let path = std::env::temp_dir().join(format!("broutej11-pairing-{}.toml", std::process::id()));
    let settings = pairing_and_save(
        &path,
        stream,
        mock::SharedWriter::default(),
        &config(),
        6,
        &credentials(),
    )
    .await
    .unwrap();
    assert_eq!(settings.Channel, 0x21);
    assert_eq!(settings.PanId, 0x8abc);
    assert_eq!(settings.mac_address().unwrap(), 0x001d_1290_1234_5678);
    assert_eq!(ConnectionSettings::load(&path).unwrap(), settings);
    std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn test_pairing_timeout() {
    // BルートPANA認証情報設定の応答が来ない
    let stream = mock::stream(&[
        mock::notify(0x6019, &[]),
        mock::response(0x205f, &[0x01]),
        mock::response(0x2051, &[0x01]),
        beacon_notify(),
    ]);
    let writer = mock::SharedWriter::default();
    let result = pairing(stream, writer.clone(), &config(), 6, &credentials()).await;
    assert!(matches!(
        result,
        Err(Error::Timeout {
            step: Step::SetAuthInfo
        })
    ));
    assert_eq!(writer.command_codes(), vec![0x00d9, 0x005f, 0x0054]);

    // Beaconが見つからない
    let stream = mock::stream(&[
        mock::notify(0x6019, &[]),
        mock::response(0x205f, &[0x01]),
        mock::response(0x2054, &[0x01]),
        mock::response(0x2051, &[0x01]),
        mock::notify(0x4051, &[0x01, 0x04]),
    ]);
    let result = pairing(stream, mock::SharedWriter::default(), &config(), 6, &credentials()).await;
    assert!(matches!(
        result,
        Err(Error::Timeout {
            step: Step::AwaitBeacon
        })
    ));
}

#[tokio::test]
async fn test_pairing_rejected() {
    let stream = mock::stream(&[
        mock::notify(0x6019, &[]),
        mock::response(0x205f, &[0x02]),
    ]);
    match pairing(stream, mock::SharedWriter::default(), &config(), 6, &credentials()).await {
        Err(Error::Rejected { step, response }) => {
            assert_eq!(step, Step::InitialSetup);
            assert_eq!(response.data, vec![0x02]);
        }
        other => panic!("{:?}", other),
    }
}
