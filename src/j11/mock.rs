// テスト用の模擬シリアルポート
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::j11::datagram::{Datagram, UNIQUE_CODE_RESPONSE};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// 書き込まれたバイト列を共有する
#[derive(Debug, Clone, Default)]
pub struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl SharedWriter {
    /// 書き込まれたバイト列を取り出す
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    /// 書き込まれたコマンドコード
    pub fn command_codes(&self) -> Vec<u16> {
        let bytes = self.0.lock().unwrap().clone();
        let mut codes = Vec::new();
        let mut rest = bytes.as_slice();
        while rest.len() >= 12 {
            let code = u16::from_be_bytes([rest[4], rest[5]]);
            let len = u16::from_be_bytes([rest[6], rest[7]]) as usize;
            codes.push(code);
            rest = &rest[(8 + len).min(rest.len())..];
        }
        codes
    }
}

impl io::Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 応答コマンド
pub fn response(code: u16, data: &[u8]) -> Datagram {
    Datagram::new(UNIQUE_CODE_RESPONSE, code, data.to_vec()).unwrap()
}

/// 通知コマンド
pub fn notify(code: u16, data: &[u8]) -> Datagram {
    response(code, data)
}

/// 受信バイト列
pub fn stream(datagrams: &[Datagram]) -> io::Cursor<Vec<u8>> {
    io::Cursor::new(datagrams.iter().flat_map(|d| d.encode()).collect())
}

/// 受信バイト列を送り出す条件
#[derive(Debug, Clone, Copy)]
pub enum Gate {
    Written(u16),       // このコマンドが書き込まれたら
    Elapsed(Duration), // 前の送り出しからこの時間が経ったら
}

/// 条件が揃うたびに受信バイト列を少しずつ送り出す
#[derive(Debug)]
pub struct Script {
    writer: SharedWriter,
    stages: VecDeque<(Gate, Vec<Datagram>)>,
    pending: VecDeque<u8>,
    released_at: Instant,
}

impl Script {
    pub fn new(writer: &SharedWriter) -> Self {
        Script {
            writer: writer.clone(),
            stages: VecDeque::new(),
            pending: VecDeque::new(),
            released_at: Instant::now(),
        }
    }

    pub fn then(mut self, gate: Gate, datagrams: Vec<Datagram>) -> Self {
        self.stages.push_back((gate, datagrams));
        self
    }

    fn opened(&self, gate: Gate) -> bool {
        match gate {
            Gate::Written(code) => self.writer.command_codes().contains(&code),
            Gate::Elapsed(d) => self.released_at.elapsed() >= d,
        }
    }
}

impl io::Read for Script {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let ready = self
                .stages
                .front()
                .is_some_and(|(gate, _)| self.opened(*gate));
            if !ready {
                return Ok(0); // まだ届いていない
            }
            if let Some((_, datagrams)) = self.stages.pop_front() {
                self.pending
                    .extend(datagrams.iter().flat_map(|d| d.encode()));
                self.released_at = Instant::now();
            }
        }
        self.pending.read(buf)
    }
}
