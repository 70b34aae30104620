// J11 受信データグラム読み取り
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::j11::datagram::{
    Datagram, DatagramHeader, FramingError, HEADER_BYTES, UNIQUE_CODE_RESPONSE,
};
use std::io::{self, ErrorKind};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 読み取りデータ不足のときに待つ時間
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Datagram(Datagram),    // 検査済みデータグラム
    Resync(FramingError), // 破棄して同期をとりなおした
}

/// バイト列からデータグラムを読み取るイテレータ
/// キャンセルされるか入出力エラーで終了する
pub struct FrameReader<R> {
    reader: R,
    cancel: CancellationToken,
    finished: bool,
}

impl<R: io::Read> FrameReader<R> {
    pub fn new(reader: R, cancel: CancellationToken) -> Self {
        FrameReader {
            reader,
            cancel,
            finished: false,
        }
    }

    /// バッファが埋まるまで読み込む。キャンセルされたらfalse
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => thread::sleep(RETRY_BACKOFF), // 読み取りデータ不足
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => {} // タイムアウトエラーは無視する
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(RETRY_BACKOFF),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// 1つ読み取る。キャンセルされたらNone
    pub fn read_frame(&mut self) -> io::Result<Option<Frame>> {
        // d0 f9 ee 5d が検出できるまで入力を破棄し続ける
        let mut preamble: u32 = 0;
        while preamble != UNIQUE_CODE_RESPONSE {
            let mut b = [0u8; 1];
            if !self.fill(&mut b)? {
                return Ok(None);
            }
            preamble = preamble << 8 | b[0] as u32;
        }

        // ヘッダ部読み取り
        let mut header = [0u8; HEADER_BYTES];
        header[0..4].copy_from_slice(&preamble.to_be_bytes());
        if !self.fill(&mut header[4..])? {
            return Ok(None);
        }

        // ヘッダ部チェックサム検査
        let parsed = DatagramHeader::from_bytes(&header);
        let calculated = parsed.calc_header_checksum();
        if parsed.header_checksum != calculated {
            let e = FramingError::HeaderChecksum {
                header: parsed.header_checksum,
                calculated,
            };
            tracing::debug!("{e}");
            return Ok(Some(Frame::Resync(e)));
        }
        let Some(data_len) = parsed.data_len() else {
            let e = FramingError::Length {
                message_length: parsed.message_length,
                data_len: 0,
            };
            tracing::debug!("{e}");
            return Ok(Some(Frame::Resync(e)));
        };

        // データ部読み取り
        let mut data = vec![0u8; data_len];
        if !self.fill(&mut data)? {
            return Ok(None);
        }

        // データ部チェックサム検査
        match Datagram::decode(&header, data) {
            Ok(datagram) => {
                tracing::trace!(target:"<-Rx", "{}", datagram);
                Ok(Some(Frame::Datagram(datagram)))
            }
            Err(e) => {
                tracing::debug!("{e}");
                Ok(Some(Frame::Resync(e)))
            }
        }
    }
}

impl<R: io::Read> Iterator for FrameReader<R> {
    type Item = io::Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
/// 1バイトずつしか読めない入力
struct Trickle(std::collections::VecDeque<u8>);

#[cfg(test)]
impl io::Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match (self.0.pop_front(), buf.first_mut()) {
            (Some(b), Some(slot)) => {
                *slot = b;
                Ok(1)
            }
            _ => Err(io::Error::from(ErrorKind::TimedOut)),
        }
    }
}

#[cfg(test)]
fn response(code: u16, data: &[u8]) -> Datagram {
    Datagram::new(UNIQUE_CODE_RESPONSE, code, data.to_vec()).unwrap()
}

#[test]
fn test_read_with_noise() {
    let first = response(0x205f, &[0x01]);
    let second = response(0x6019, &[]);
    let mut stream = vec![0x00, 0xd0, 0xf9, 0x12, 0xee]; // 雑音
    stream.extend(first.encode());
    stream.extend([0xff, 0xd0]);
    stream.extend(second.encode());

    let cancel = CancellationToken::new();
    let mut reader = FrameReader::new(io::Cursor::new(stream), cancel.clone());
    assert_eq!(reader.next().unwrap().unwrap(), Frame::Datagram(first));
    assert_eq!(reader.next().unwrap().unwrap(), Frame::Datagram(second));
    cancel.cancel();
    assert!(reader.next().is_none());
    assert!(reader.next().is_none());
}

#[test]
fn test_resync_on_broken_header() {
    let valid = response(0x2054, &[0x01]);
    // ヘッダ部チェックサムが壊れている
    let mut stream = vec![0xd0, 0xf9, 0xee, 0x5d, 0x20, 0x53, 0x00, 0x05, 0xde, 0xad, 0x00, 0x01];
    stream.extend(valid.encode());

    let cancel = CancellationToken::new();
    let mut reader = FrameReader::new(io::Cursor::new(stream), cancel.clone());
    assert!(matches!(
        reader.next(),
        Some(Ok(Frame::Resync(FramingError::HeaderChecksum { .. })))
    ));
    assert_eq!(reader.next().unwrap().unwrap(), Frame::Datagram(valid));
    cancel.cancel();
    assert!(reader.next().is_none());
}

#[test]
fn test_resync_on_broken_data() {
    let broken = response(0x4051, &[0x01, 0x04]);
    let valid = response(0x6019, &[]);
    let mut stream = broken.encode();
    let last = stream.len() - 1;
    stream[last] ^= 0x80;
    stream.extend(valid.encode());

    let cancel = CancellationToken::new();
    let mut reader = FrameReader::new(io::Cursor::new(stream), cancel.clone());
    assert!(matches!(
        reader.next(),
        Some(Ok(Frame::Resync(FramingError::DataChecksum { .. })))
    ));
    assert_eq!(reader.next().unwrap().unwrap(), Frame::Datagram(valid));
    cancel.cancel();
    assert!(reader.next().is_none());
}

#[test]
fn test_short_reads() {
    let datagram = response(0x6018, &[0u8; 40]);
    let trickle = Trickle(datagram.encode().into_iter().collect());
    let mut reader = FrameReader::new(trickle, CancellationToken::new());
    assert_eq!(reader.next().unwrap().unwrap(), Frame::Datagram(datagram));
}

#[test]
fn test_cancel_while_waiting() {
    let cancel = CancellationToken::new();
    // ヘッダの途中で入力が途切れる
    let stream = vec![0xd0, 0xf9, 0xee, 0x5d, 0x20];
    let mut reader = FrameReader::new(io::Cursor::new(stream), cancel.clone());
    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        })
    };
    assert!(reader.next().is_none());
    canceller.join().unwrap();
}

#[test]
fn test_io_error() {
    struct Broken;
    impl io::Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(ErrorKind::BrokenPipe))
        }
    }
    let mut reader = FrameReader::new(Broken, CancellationToken::new());
    assert_eq!(
        reader.next().unwrap().unwrap_err().kind(),
        ErrorKind::BrokenPipe
    );
    assert!(reader.next().is_none());
}
