// J11 受信振り分けタスク
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::j11::datagram::Datagram;
use crate::j11::reader::{Frame, FrameReader};
use std::io;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;

/// 受信チャネルの深さ
pub const CHANNEL_DEPTH: usize = 64;

/// 受信チャネル
#[derive(Debug)]
pub struct Receivers {
    pub responses: mpsc::Receiver<Datagram>,     // コマンド応答
    pub notifications: mpsc::Receiver<Datagram>, // 通知
}

/// 受信タスクを起動する
pub fn spawn_receiver<R>(
    reader: R,
    cancel: CancellationToken,
) -> (Receivers, JoinHandle<io::Result<()>>)
where
    R: io::Read + Send + 'static,
{
    let (tx_response, rx_response) = mpsc::channel(CHANNEL_DEPTH);
    let (tx_notify, rx_notify) = mpsc::channel(CHANNEL_DEPTH);

    let runtime = Handle::current();
    let handle = task::spawn_blocking(move || {
        let frames = FrameReader::new(reader, cancel.clone());
        let result = demultiplex(&runtime, frames, &tx_response, &tx_notify, &cancel);
        if let Err(e) = &result {
            tracing::error!("receiver stopped: {e}");
        }
        result
    });

    let receivers = Receivers {
        responses: rx_response,
        notifications: rx_notify,
    };
    (receivers, handle)
}

enum Delivery {
    Sent,
    Closed(Datagram), // 受け取り側がいない
    Cancelled,
}

/// 送り先が空くまで待って送る
fn deliver(
    runtime: &Handle,
    tx: &mpsc::Sender<Datagram>,
    datagram: Datagram,
    cancel: &CancellationToken,
) -> Delivery {
    runtime.block_on(async {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Delivery::Cancelled,
            r = tx.send(datagram) => match r {
                Ok(()) => Delivery::Sent,
                Err(mpsc::error::SendError(d)) => Delivery::Closed(d),
            },
        }
    })
}

/// コマンド応答と通知を振り分ける
/// 送り先が一杯なら空くまで待つ
/// キャンセルされるか入出力エラーで終了する
pub fn demultiplex<I>(
    runtime: &Handle,
    frames: I,
    responses: &mpsc::Sender<Datagram>,
    notifications: &mpsc::Sender<Datagram>,
    cancel: &CancellationToken,
) -> io::Result<()>
where
    I: Iterator<Item = io::Result<Frame>>,
{
    for frame in frames {
        match frame? {
            Frame::Resync(e) => tracing::debug!("discarded: {e}"),
            Frame::Datagram(datagram) => {
                let tx = if datagram.is_response() {
                    responses // コマンド応答チャンネルへ送る
                } else {
                    notifications // 通知チャンネルへ送る
                };
                match deliver(runtime, tx, datagram, cancel) {
                    Delivery::Sent => {}
                    Delivery::Closed(d) => tracing::debug!("no receiver, dropped {d}"),
                    Delivery::Cancelled => break,
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
fn response(code: u16) -> Datagram {
    use crate::j11::datagram::UNIQUE_CODE_RESPONSE;
    Datagram::new(UNIQUE_CODE_RESPONSE, code, vec![code as u8]).unwrap()
}

#[cfg(test)]
fn datagrams(codes: &[u16]) -> Vec<io::Result<Frame>> {
    codes
        .iter()
        .map(|code| Ok(Frame::Datagram(response(*code))))
        .collect()
}

/// 振り分けタスクを別スレッドで最後まで動かす
#[cfg(test)]
async fn demultiplex_all(
    frames: Vec<io::Result<Frame>>,
    responses: mpsc::Sender<Datagram>,
    notifications: mpsc::Sender<Datagram>,
    cancel: CancellationToken,
) -> io::Result<()> {
    let runtime = Handle::current();
    task::spawn_blocking(move || {
        demultiplex(
            &runtime,
            frames.into_iter(),
            &responses,
            &notifications,
            &cancel,
        )
    })
    .await
    .unwrap()
}

#[cfg(test)]
fn drain(rx: &mut mpsc::Receiver<Datagram>) -> Vec<u16> {
    let mut codes = Vec::new();
    while let Ok(d) = rx.try_recv() {
        codes.push(d.command_code());
    }
    codes
}

#[tokio::test]
async fn test_demultiplex() {
    let (tx_response, mut rx_response) = mpsc::channel(CHANNEL_DEPTH);
    let (tx_notify, mut rx_notify) = mpsc::channel(CHANNEL_DEPTH);
    let mut frames = datagrams(&[0x6019, 0x2000, 0x1fff, 0x2fff, 0x3000, 0x205f, 0x4051, 0x6018]);
    frames.push(Ok(Frame::Resync(
        crate::j11::datagram::FramingError::TooLong(0),
    )));

    demultiplex_all(frames, tx_response, tx_notify, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(drain(&mut rx_response), vec![0x2000, 0x2fff, 0x205f]);
    assert_eq!(
        drain(&mut rx_notify),
        vec![0x6019, 0x1fff, 0x3000, 0x4051, 0x6018]
    );
}

#[tokio::test]
async fn test_demultiplex_stops_on_error() {
    let (tx_response, mut rx_response) = mpsc::channel(CHANNEL_DEPTH);
    let (tx_notify, _rx_notify) = mpsc::channel(CHANNEL_DEPTH);
    let frames = vec![
        Ok(Frame::Datagram(response(0x2005))),
        Err(io::Error::from(io::ErrorKind::BrokenPipe)),
        Ok(Frame::Datagram(response(0x2056))),
    ];
    let result = demultiplex_all(frames, tx_response, tx_notify, CancellationToken::new()).await;
    assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    assert_eq!(drain(&mut rx_response), vec![0x2005]);
}

#[tokio::test]
async fn test_demultiplex_without_notification_receiver() {
    // 通知の受け取り側がいなくなってもコマンド応答は届く
    let (tx_response, mut rx_response) = mpsc::channel(CHANNEL_DEPTH);
    let (tx_notify, rx_notify) = mpsc::channel(CHANNEL_DEPTH);
    drop(rx_notify);
    let frames = datagrams(&[0x4051, 0x2051, 0x6018, 0x2057]);
    demultiplex_all(frames, tx_response, tx_notify, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(drain(&mut rx_response), vec![0x2051, 0x2057]);

    // コマンド応答の受け取り側がいなくなっても通知は届く
    let (tx_response, rx_response) = mpsc::channel(CHANNEL_DEPTH);
    let (tx_notify, mut rx_notify) = mpsc::channel(CHANNEL_DEPTH);
    drop(rx_response);
    let frames = datagrams(&[0x2008, 0x6018, 0x2057, 0x6028]);
    demultiplex_all(frames, tx_response, tx_notify, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(drain(&mut rx_notify), vec![0x6018, 0x6028]);
}

#[tokio::test]
async fn test_cancel_while_queue_full() {
    // 受け取られないまま一杯になったチャンネル
    let (tx_response, mut rx_response) = mpsc::channel(1);
    let (tx_notify, _rx_notify) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let frames = datagrams(&[0x2005, 0x2056, 0x2057]);
    let task = tokio::spawn(demultiplex_all(
        frames,
        tx_response,
        tx_notify,
        cancel.clone(),
    ));

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!task.is_finished());
    cancel.cancel();
    let result = tokio::time::timeout(std::time::Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(drain(&mut rx_response), vec![0x2005]);
}

#[tokio::test]
async fn test_spawn_receiver() {
    let mut stream = Vec::new();
    for code in [0x6019, 0x205f, 0x2054, 0x4051] {
        stream.extend(response(code).encode());
    }
    let cancel = CancellationToken::new();
    let (mut receivers, handle) = spawn_receiver(io::Cursor::new(stream), cancel.clone());

    assert_eq!(receivers.notifications.recv().await.unwrap().command_code(), 0x6019);
    assert_eq!(receivers.responses.recv().await.unwrap().command_code(), 0x205f);
    assert_eq!(receivers.responses.recv().await.unwrap().command_code(), 0x2054);
    assert_eq!(receivers.notifications.recv().await.unwrap().command_code(), 0x4051);

    cancel.cancel();
    assert!(handle.await.unwrap().is_ok());
    assert!(receivers.responses.recv().await.is_none());
}
