// UDPポート0e1a(Echonet lite)に入出力する仕掛け
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::j11::command::{self, RESULT_SUCCESS, code};
use crate::j11::link::{Commander, Error, Notifications, Step};
use crate::j11::parser::{self, UdpReceived};
use std::io;
use std::net::Ipv6Addr;

/// 送信側
pub struct TunnelSender<'a, W> {
    commander: &'a mut Commander<W>,
    destination: Ipv6Addr,
}

impl<'a, W: io::Write> TunnelSender<'a, W> {
    pub fn new(commander: &'a mut Commander<W>, destination: Ipv6Addr) -> Self {
        TunnelSender {
            commander,
            destination,
        }
    }

    /// データ送信要求コマンドを送信して送信結果を確認する
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        let command = command::transmit_data(&self.destination, payload)?;
        self.commander.send(&command)?;
        let response = self
            .commander
            .wait_response(Step::Transmit, command::response_code(code::TRANSMIT_DATA))
            .await?;
        match parser::transmit_result(&response.data) {
            Ok((_, r)) if r.result == RESULT_SUCCESS => {
                tracing::debug!(
                    "transmit result:{:02X} digest:{}",
                    r.transmit_result,
                    r.digest
                        .iter()
                        .map(|n| format!("{:02X}", n))
                        .collect::<String>()
                );
                Ok(())
            }
            Ok((_, r)) => Err(Error::TransmitFailed {
                digest: r.digest.to_vec(),
            }),
            Err(_) => Err(Error::TransmitFailed {
                digest: response.data.clone(),
            }),
        }
    }
}

/// 受信したセッションの情報
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub peer_address: Ipv6Addr,
    pub peer_port: u16,
    pub local_port: u16,
    pub pan_id: u16,
    pub address_type: u8,
    pub secured: u8,
    pub rssi: i8,
}

impl<'a> From<&UdpReceived<'a>> for SessionState {
    fn from(r: &UdpReceived<'a>) -> Self {
        SessionState {
            peer_address: r.sender,
            peer_port: r.sender_port,
            local_port: r.destination_port,
            pan_id: r.pan_id,
            address_type: r.address_type,
            secured: r.secured,
            rssi: r.rssi,
        }
    }
}

/// 受信側
/// セッションは1つだけとして扱う
pub struct TunnelReceiver {
    notifications: Notifications,
    session: Option<SessionState>,
}

impl TunnelReceiver {
    pub fn new(notifications: Notifications) -> Self {
        TunnelReceiver {
            notifications,
            session: None,
        }
    }

    /// 最後に受信したセッションの情報
    #[inline]
    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    /// データ受信通知を待って受信データを取り出す
    /// バッファに入らない分は捨てる
    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        loop {
            let Some(r) = self.notifications.recv().await else {
                return Err(Error::ReceiverStopped);
            };
            if r.command_code() != code::NOTIFY_UDP_RECEIVED {
                tracing::debug!("discarded {r}");
                continue;
            }
            match parser::udp_received(&r.data) {
                Ok((_, udp)) => {
                    self.session = Some(SessionState::from(&udp));
                    let n = udp.data.len().min(buf.len());
                    buf[..n].copy_from_slice(&udp.data[..n]);
                    if n < udp.data.len() {
                        tracing::warn!("truncated {} bytes", udp.data.len() - n);
                    }
                    return Ok(n);
                }
                Err(e) => tracing::warn!("malformed {r}: {e}"),
            }
        }
    }

    /// タイムアウト付きで受信する
    pub async fn receive_timeout(&mut self, step: Step, buf: &mut [u8]) -> Result<usize, Error> {
        let timeout = self.notifications.timeout();
        tokio::time::timeout(timeout, self.receive(buf))
            .await
            .map_err(|_elapsed| Error::Timeout { step })?
    }
}

#[cfg(test)]
use crate::j11::mock;
#[cfg(test)]
use std::time::Duration;
#[cfg(test)]
use tokio::sync::mpsc;

#[cfg(test)]
fn udp_received(sender: &Ipv6Addr, payload: &[u8]) -> crate::j11::datagram::Datagram {
    let mut data = sender.octets().to_vec();
    data.extend([0x0e, 0x1a, 0x0e, 0x1a, 0x8a, 0xbc, 0x00, 0x01, 0xc4]);
    data.extend((payload.len() as u16).to_be_bytes());
    data.extend_from_slice(payload);
    mock::notify(code::NOTIFY_UDP_RECEIVED, &data)
}

#[tokio::test]
async fn test_send() {
    let destination: Ipv6Addr = "fe80::21d:1290:1234:5678".parse().unwrap();
    let (tx, rx) = mpsc::channel(4);
    let writer = mock::SharedWriter::default();
    let mut commander = Commander::new(writer.clone(), rx, Duration::from_secs(1));

    tx.send(mock::response(0x2008, &[0x01, 0x00, 0xaa]))
        .await
        .unwrap();
    let mut sender = TunnelSender::new(&mut commander, destination);
    sender.send(&[0x10, 0x81]).await.unwrap();
    assert_eq!(
        writer.take(),
        command::transmit_data(&destination, &[0x10, 0x81])
            .unwrap()
            .encode()
    );

    tx.send(mock::response(0x2008, &[0x02, 0x05, 0xaa, 0xbb]))
        .await
        .unwrap();
    match sender.send(&[0x10, 0x81]).await {
        Err(Error::TransmitFailed { digest }) => assert_eq!(digest, vec![0xaa, 0xbb]),
        other => panic!("{:?}", other),
    }
}

#[tokio::test]
async fn test_receive() {
    let sender: Ipv6Addr = "fe80::21d:1290:1234:5678".parse().unwrap();
    let (tx, rx) = mpsc::channel(8);
    let mut receiver = TunnelReceiver::new(Notifications::new(rx, Duration::from_millis(50)));
    assert!(receiver.session().is_none());

    tx.send(mock::notify(0x6019, &[])).await.unwrap(); // 関係ない通知
    tx.send(mock::notify(0x6018, &[0x00])).await.unwrap(); // 壊れた通知
    tx.send(udp_received(&sender, &[0x10, 0x81, 0x00, 0x01]))
        .await
        .unwrap();
    let mut buf = [0u8; 256];
    let n = receiver.receive(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], &[0x10, 0x81, 0x00, 0x01]);
    assert_eq!(
        receiver.session(),
        Some(&SessionState {
            peer_address: sender,
            peer_port: 0x0e1a,
            local_port: 0x0e1a,
            pan_id: 0x8abc,
            address_type: 0,
            secured: 1,
            rssi: -60,
        })
    );

    // バッファより長い
    tx.send(udp_received(&sender, &[1, 2, 3, 4, 5])).await.unwrap();
    let mut small = [0u8; 3];
    assert_eq!(receiver.receive(&mut small).await.unwrap(), 3);
    assert_eq!(small, [1, 2, 3]);

    // タイムアウト
    assert!(matches!(
        receiver.receive_timeout(Step::InstanceList, &mut buf).await,
        Err(Error::Timeout {
            step: Step::InstanceList
        })
    ));

    drop(tx);
    assert!(matches!(
        receiver.receive(&mut buf).await,
        Err(Error::ReceiverStopped)
    ));
}
