// BP35C0-J11/BP35C1-J11 ROHM Wi-SUNモジュール
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
pub mod authn;
pub mod command;
pub mod datagram;
pub mod link;
#[cfg(test)]
pub mod mock;
pub mod parser;
pub mod reader;
pub mod receiver;
pub mod tunnel;

pub use datagram::{Datagram, FramingError};
pub use link::{Commander, Error, J11Config, Notifications, Step};
pub use receiver::spawn_receiver;
pub use tunnel::{TunnelReceiver, TunnelSender};

use std::io;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 受信タスクを起動してコマンド送信側と通知受信側を得る
pub fn open<R, W>(
    reader: R,
    writer: W,
    config: &J11Config,
    cancel: CancellationToken,
) -> (Commander<W>, Notifications, JoinHandle<io::Result<()>>)
where
    R: io::Read + Send + 'static,
    W: io::Write,
{
    let (receivers, receiver) = spawn_receiver(reader, cancel);
    let commander = Commander::new(writer, receivers.responses, config.timeout);
    let notifications = Notifications::new(receivers.notifications, config.timeout);
    (commander, notifications, receiver)
}

/// 受信タスクを止めて終了を待つ
/// 受信タスクが入出力エラーで終了していたらそのエラーを返す
pub async fn shutdown<T>(
    receiver: JoinHandle<io::Result<()>>,
    cancel: &CancellationToken,
    result: Result<T, Error>,
) -> Result<T, Error> {
    cancel.cancel();
    let stopped = receiver.await;
    match (result, stopped) {
        (Err(Error::ReceiverStopped), Ok(Err(e))) => Err(Error::Io(e)),
        (result, Ok(_)) => result,
        (result, Err(e)) => {
            tracing::error!("receiver task: {e}");
            result
        }
    }
}
