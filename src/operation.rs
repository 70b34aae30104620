// スマートメーターに接続して計測値を取得する
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::connection_settings::ConnectionSettings;
use crate::echonetlite::{
    self, EchonetliteEdata, EchonetliteFrame, smart_electric_energy_meter as SM, superclass,
};
use crate::j11::authn::Credentials;
use crate::j11::command::{self, ECHONETLITE_UDP_PORT, code};
use crate::j11::link::link_local_address;
use crate::j11::parser::{self, PanaResult};
use crate::j11::{
    self, Commander, Error, J11Config, Notifications, Step, TunnelReceiver, TunnelSender,
};
use std::io;
use std::net::Ipv6Addr;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// 受信バッファ(最大受信サイズはヘッダ部を含めて1361バイト)
const RECEIVE_BUFFER_BYTES: usize = 1500;

/// PANA認証結果
const PANA_SUCCESS: u8 = 0x01;
const PANA_FAILED: u8 = 0x02;
const PANA_NO_RESPONSE: u8 = 0x03;

/// 計測値取得の設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub settle: Duration,        // 要求ごとに待つ時間
    pub poll_interval: Duration, // 計測値取得の間隔
    pub poll_count: Option<u32>, // 計測値取得の回数(Noneで止められるまで)
    pub collect_history: bool,   // 今日の積算履歴を収集する
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            settle: Duration::from_secs(1),
            poll_interval: Duration::from_secs(30),
            poll_count: Some(3),
            collect_history: true,
        }
    }
}

/// 受信したEchonetliteフレームを受け取る
pub trait FrameConsumer: Send + 'static {
    fn consume(&mut self, frame: &EchonetliteFrame<'_>);
}

/// 受信したEchonetliteフレームをログに出す
#[derive(Debug, Default)]
pub struct LogConsumer {
    unit: Option<SM::UnitForCumlativeAmountsPower>,
}

impl LogConsumer {
    /// 受信した積算電力量単位
    pub fn unit(&self) -> Option<&SM::UnitForCumlativeAmountsPower> {
        self.unit.as_ref()
    }
}

impl FrameConsumer for LogConsumer {
    fn consume(&mut self, frame: &EchonetliteFrame<'_>) {
        // 積算電力量単位値を取り出す
        for edata in frame.edata.iter() {
            if let Ok(unit) = SM::UnitForCumlativeAmountsPower::try_from(edata) {
                self.unit = Some(unit);
            }
        }
        let mut s = vec![frame.show()];
        for edata in frame.edata.iter() {
            s.push(edata.show(self.unit.as_ref()));
        }
        tracing::info!("{}", s.join(" "));
    }
}

/// スマートメーターに接続して計測値を取得する
/// stopが取り消されたら要求を送るのをやめてPANAセッションを終了する
pub async fn run<R, W, C>(
    reader: R,
    writer: W,
    config: &J11Config,
    options: &RunOptions,
    settings: &ConnectionSettings,
    consumer: C,
    stop: &CancellationToken,
) -> Result<(), Error>
where
    R: io::Read + Send + 'static,
    W: io::Write,
    C: FrameConsumer,
{
    let credentials = settings.credentials()?;
    let mac_address = settings
        .mac_address()
        .map_err(|_| Error::InvalidMacAddress(settings.MacAddress.clone()))?;

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let (mut commander, notifications, receiver) =
        j11::open(reader, writer, config, cancel.clone());
    let result = session(
        &mut commander,
        notifications,
        options,
        settings.Channel,
        mac_address,
        &credentials,
        consumer,
        &cancel,
        stop,
    )
    .await;
    j11::shutdown(receiver, &cancel, result).await
}

/// 接続してからPANA終了まで
#[allow(clippy::too_many_arguments)]
async fn session<W, C>(
    commander: &mut Commander<W>,
    notifications: Notifications,
    options: &RunOptions,
    channel: u8,
    mac_address: u64,
    credentials: &Credentials,
    consumer: C,
    cancel: &CancellationToken,
    stop: &CancellationToken,
) -> Result<(), Error>
where
    W: io::Write,
    C: FrameConsumer,
{
    let notifications = connect(commander, notifications, channel, credentials).await?;
    let destination = link_local_address(mac_address);
    tracing::info!("connected to {destination}");
    let result = exchange(
        commander,
        notifications,
        destination,
        options,
        consumer,
        cancel,
        stop,
    )
    .await;
    // BルートPANA終了
    // 失敗していても終了要求は送る
    let terminated = commander
        .request(Step::PanaTerminate, &command::pana_terminate())
        .await;
    match (result, terminated) {
        (Ok(()), terminated) => terminated.map(|_| ()),
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(t)) => {
            tracing::warn!("{t}");
            Err(e)
        }
    }
}

/// PANA認証が終わるまで
async fn connect<W: io::Write>(
    commander: &mut Commander<W>,
    mut notifications: Notifications,
    channel: u8,
    credentials: &Credentials,
) -> Result<Notifications, Error> {
    // ハードウェアリセット
    commander.send(&command::hardware_reset())?;
    notifications
        .wait(Step::HardwareReset, code::NOTIFY_BOOT)
        .await?;
    // 初期設定
    commander
        .request(Step::InitialSetup, &command::initial_setup(channel))
        .await?;
    // BルートPANA認証情報設定
    commander
        .request(Step::SetAuthInfo, &command::set_pana_auth_info(credentials))
        .await?;
    // Bルート動作開始
    let r = commander
        .request(Step::RouteBStart, &command::route_b_start())
        .await?;
    match parser::route_b_started(&r.data) {
        Ok((_, s)) => tracing::info!(
            "Channel:{} PAN ID:{:04X} MAC:{:016X} RSSI:{}dBm",
            s.channel,
            s.pan_id,
            s.mac_address,
            s.rssi
        ),
        Err(e) => tracing::debug!("{r}: {e}"),
    }
    // UDPポートオープン
    commander
        .request(
            Step::OpenUdpPort,
            &command::udp_port_open(ECHONETLITE_UDP_PORT),
        )
        .await?;
    // BルートPANA開始
    commander
        .request(Step::PanaStart, &command::pana_start())
        .await?;
    // PANA認証結果通知
    let r = notifications
        .wait(Step::PanaResult, code::NOTIFY_PANA_RESULT)
        .await?;
    let parsed = parser::pana_result(&r.data).map(|(_, p)| p).ok();
    match parsed {
        Some(PanaResult {
            result: PANA_SUCCESS,
            mac_address,
        }) => {
            tracing::info!("PANA authenticated MAC:{:016X}", mac_address);
            Ok(notifications)
        }
        Some(PanaResult {
            result: PANA_FAILED,
            ..
        }) => Err(Error::PanaAuthenticationFailed),
        Some(PanaResult {
            result: PANA_NO_RESPONSE,
            ..
        }) => Err(Error::PanaNoResponse),
        Some(PanaResult { result, .. }) => Err(Error::PanaUnknownResult(result)),
        None => Err(Error::Rejected {
            step: Step::PanaResult,
            response: r,
        }),
    }
}

/// PANAセッション確立後のやりとり
async fn exchange<W, C>(
    commander: &mut Commander<W>,
    notifications: Notifications,
    destination: Ipv6Addr,
    options: &RunOptions,
    mut consumer: C,
    cancel: &CancellationToken,
    stop: &CancellationToken,
) -> Result<(), Error>
where
    W: io::Write,
    C: FrameConsumer,
{
    let mut receiver = TunnelReceiver::new(notifications);
    // インスタンスリスト通知が送られてくるまで待つ
    let mut buf = vec![0u8; RECEIVE_BUFFER_BYTES];
    let n = receiver
        .receive_timeout(Step::InstanceList, &mut buf)
        .await?;
    match echonetlite::decode(&buf[..n]) {
        Ok(frame) => consumer.consume(&frame),
        Err(e) => tracing::warn!("{}: {e}", Step::InstanceList),
    }

    // データを受信するタスクを起動する
    let loop_cancel = cancel.child_token();
    let receiving = tokio::spawn(receive_loop(receiver, consumer, loop_cancel.clone()));

    let result = {
        let mut sender = TunnelSender::new(commander, destination);
        request_properties(&mut sender, options, stop).await
    };

    loop_cancel.cancel();
    if let Err(e) = receiving.await {
        tracing::error!("receive loop: {e}");
    }
    result
}

/// 受信したフレームを渡し続ける
/// キャンセルされても受信済みの分は渡してから終わる
async fn receive_loop<C: FrameConsumer>(
    mut receiver: TunnelReceiver,
    mut consumer: C,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; RECEIVE_BUFFER_BYTES];
    loop {
        let received = tokio::select! {
            biased;
            r = receiver.receive(&mut buf) => r,
            _ = cancel.cancelled() => break,
        };
        match received {
            Ok(n) => match echonetlite::decode(&buf[..n]) {
                Ok(frame) => consumer.consume(&frame),
                Err(e) => tracing::warn!("dropped: {e}"),
            },
            Err(e) => {
                tracing::debug!("receive loop: {e}");
                break;
            }
        }
    }
}

/// Echonetliteフレームを送る
async fn transmit<W: io::Write>(
    sender: &mut TunnelSender<'_, W>,
    frame: &EchonetliteFrame<'_>,
) -> Result<(), Error> {
    tracing::debug!("{}", frame.show());
    let bytes = echonetlite::encode(frame)?;
    sender.send(&bytes).await
}

/// 待つ。止められたらfalse
async fn pause(duration: Duration, stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

/// 要求を送って応答が届くのを待つ。止められたらfalse
async fn send_request<W: io::Write>(
    sender: &mut TunnelSender<'_, W>,
    frame: &EchonetliteFrame<'_>,
    options: &RunOptions,
    stop: &CancellationToken,
) -> Result<bool, Error> {
    if stop.is_cancelled() {
        return Ok(false);
    }
    transmit(sender, frame).await?;
    Ok(pause(options.settle, stop).await)
}

/// スマートメーターに要求を送る
async fn request_properties<W: io::Write>(
    sender: &mut TunnelSender<'_, W>,
    options: &RunOptions,
    stop: &CancellationToken,
) -> Result<(), Error> {
    const TID: u16 = 1;

    // あいさつ代わりにスマートメータの属性を取得してみる
    let epcs = [
        superclass::OperationStatus::EPC,              // 動作状態
        superclass::FaultStatus::EPC,                  // 異常発生状態
        superclass::Manufacturer::EPC,                 // メーカーコード
        SM::Coefficient::EPC,                          // 係数(存在しない場合は×1倍)
        SM::NumberOfEffectiveDigits::EPC,              // 積算電力量有効桁数
        SM::UnitForCumlativeAmountsPower::EPC,         // 積算電力量単位(正方向、逆方向計測値)
        SM::CumlativeAmountsOfPowerAtFixedTime::EPC,   // 定時積算電力量計測値(正方向計測値)
    ];
    for epc in epcs {
        if !send_request(sender, &EchonetliteFrame::get(TID, &[epc]), options, stop).await? {
            return stopped();
        }
    }

    // 今日の積算履歴を収集してみる
    if options.collect_history {
        let today = [0u8]; // 積算履歴収集日1(edt=0は今日)
        let set_c = EchonetliteFrame::set_c(
            TID,
            vec![EchonetliteEdata {
                epc: SM::DayForHistoricalData::EPC,
                pdc: 1,
                edt: &today,
            }],
        );
        let get_history = EchonetliteFrame::get(TID, &[SM::HistoricalCumlativeAmount::EPC]);
        for frame in [set_c, get_history] {
            if !send_request(sender, &frame, options, stop).await? {
                return stopped();
            }
        }
    }

    // 積算電力量と瞬時電力と瞬時電流を得る
    let cumlative = EchonetliteFrame::get(TID, &[SM::CumlativeAmountsPower::EPC]);
    let instantious = EchonetliteFrame::get(
        TID,
        &[SM::InstantiousPower::EPC, SM::InstantiousCurrent::EPC],
    );
    let mut round: u32 = 0;
    while options.poll_count.is_none_or(|count| round < count) {
        if round > 0 && !pause(options.poll_interval, stop).await {
            return stopped();
        }
        for frame in [&cumlative, &instantious] {
            if !send_request(sender, frame, options, stop).await? {
                return stopped();
            }
        }
        round += 1;
    }
    Ok(())
}

fn stopped() -> Result<(), Error> {
    tracing::info!("stopped requesting");
    Ok(())
}

#[cfg(test)]
use crate::j11::datagram::Datagram;
#[cfg(test)]
use crate::j11::mock;
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// 受け取ったフレームのESVとEPCを記録する
#[cfg(test)]
#[derive(Debug, Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(u8, Vec<u8>)>>>);

#[cfg(test)]
impl FrameConsumer for Recorder {
    fn consume(&mut self, frame: &EchonetliteFrame<'_>) {
        let epcs = frame.edata.iter().map(|e| e.epc).collect();
        self.0.lock().unwrap().push((frame.esv, epcs));
    }
}

#[cfg(test)]
fn settings() -> ConnectionSettings {
    ConnectionSettings {
        RouteBId: "00112233445566778899AABBCCDDEEFF".to_string(),
        RouteBPassword: "0123456789AB".to_string(),
        Channel: 0x21,
        MacAddress: "1D129012345678".to_string(),
        PanId: 0x8abc,
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
fn options() -> RunOptions {
    RunOptions {
        settle: Duration::from_millis(5),
        poll_interval: Duration::from_millis(5),
        poll_count: Some(1),
        collect_history: true,
    }
}

#[cfg(test)]
fn pana_result(result: u8) -> Datagram {
    let mut data = vec![result];
    data.extend(0x001d_1290_1234_5678u64.to_be_bytes());
    mock::notify(code::NOTIFY_PANA_RESULT, &data)
}

#[cfg(test)]
fn udp_received(payload: &[u8]) -> Datagram {
    let mut data = link_local_address(0x001d_1290_1234_5678).octets().to_vec();
    data.extend([0x0e, 0x1a, 0x0e, 0x1a, 0x8a, 0xbc, 0x00, 0x01, 0xc4]);
    data.extend((payload.len() as u16).to_be_bytes());
    data.extend_from_slice(payload);
    mock::notify(code::NOTIFY_UDP_RECEIVED, &data)
}

/// インスタンスリスト通知
#[cfg(test)]
fn instance_list() -> Datagram {
    udp_received(&[
        0x10, 0x81, 0x00, 0x00, 0x0e, 0xf0, 0x01, 0x0e, 0xf0, 0x01, 0x73, 0x01, 0xd5, 0x04,
        0x01, 0x02, 0x88, 0x01,
    ])
}

/// データ送信応答
#[cfg(test)]
fn transmitted() -> Datagram {
    mock::response(0x2008, &[0x01, 0x00, 0xaa, 0xbb])
}

/// 接続できるまでの応答と通知
#[cfg(test)]
fn handshake(pana: u8) -> Vec<Datagram> {
    vec![
        mock::notify(0x6019, &[]),
        mock::response(0x205f, &[0x01]),
        mock::response(0x2054, &[0x01]),
        mock::response(
            0x2053,
            &[
                0x01, 0x21, 0x8a, 0xbc, 0x00, 0x1d, 0x12, 0x90, 0x12, 0x34, 0x56, 0x78, 0xc4,
            ],
        ),
        mock::response(0x2005, &[0x01]),
        mock::response(0x2056, &[0x01]),
        pana_result(pana),
    ]
}

#[tokio::test]
async fn test_run() {
    let mut datagrams = handshake(PANA_SUCCESS);
    // インスタンスリスト通知
    datagrams.push(udp_received(&[
        0x10, 0x81, 0x00, 0x00, 0x0e, 0xf0, 0x01, 0x0e, 0xf0, 0x01, 0x73, 0x01, 0xd5, 0x04,
        0x01, 0x02, 0x88, 0x01,
    ]));
    // Echonetliteではない
    datagrams.push(udp_received(&[0x00, 0x01]));
    // 瞬時電力計測値
    datagrams.push(udp_received(&[
        0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x72, 0x01, 0xe7, 0x04,
        0x00, 0x00, 0x01, 0x90,
    ]));
    // データ送信応答
    for _ in 0..11 {
        datagrams.push(mock::response(0x2008, &[0x01, 0x00, 0xaa, 0xbb]));
    }
    datagrams.push(mock::response(0x2057, &[0x01]));

    let writer = mock::SharedWriter::default();
    let recorder = Recorder::default();
    run(
        mock::stream(&datagrams),
        writer.clone(),
        &config(),
        &options(),
        &settings(),
        recorder.clone(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let mut expected = vec![0x00d9, 0x005f, 0x0054, 0x0053, 0x0005, 0x0056];
    expected.extend([0x0008; 11]);
    expected.push(0x0057);
    assert_eq!(writer.command_codes(), expected);

    assert_eq!(
        *recorder.0.lock().unwrap(),
        vec![(0x73, vec![0xd5]), (0x72, vec![0xe7])]
    );
}

#[tokio::test]
async fn test_run_reply_after_requests() {
    // 最後の要求に対する応答がPANA終了応答の直前に届く
    let writer = mock::SharedWriter::default();
    let mut head = handshake(PANA_SUCCESS);
    head.push(instance_list());
    head.extend((0..11).map(|_| transmitted()));
    let script = mock::Script::new(&writer)
        .then(mock::Gate::Elapsed(Duration::ZERO), head)
        .then(
            mock::Gate::Written(0x0057),
            vec![
                udp_received(&[
                    0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x72, 0x01, 0xe7,
                    0x04, 0x00, 0x00, 0x01, 0x90,
                ]),
                mock::response(0x2057, &[0x01]),
            ],
        );

    let recorder = Recorder::default();
    run(
        script,
        writer.clone(),
        &config(),
        &options(),
        &settings(),
        recorder.clone(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(writer.command_codes().last(), Some(&0x0057));
    // 受信タスクが終わった後に届いたフレームは渡さない
    assert_eq!(*recorder.0.lock().unwrap(), vec![(0x73, vec![0xd5])]);
}

#[tokio::test]
async fn test_run_until_stopped() {
    let writer = mock::SharedWriter::default();
    let mut head = handshake(PANA_SUCCESS);
    head.push(instance_list());
    head.extend((0..200).map(|_| transmitted()));
    let script = mock::Script::new(&writer)
        .then(mock::Gate::Elapsed(Duration::ZERO), head)
        .then(
            mock::Gate::Written(0x0057),
            vec![mock::response(0x2057, &[0x01])],
        );
    // 止められるまで取得し続ける
    let options = RunOptions {
        poll_count: None,
        ..options()
    };
    let stop = CancellationToken::new();
    let stopper = tokio::spawn({
        let stop = stop.clone();
        async move {
            sleep(Duration::from_millis(150)).await;
            stop.cancel();
        }
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        run(
            script,
            writer.clone(),
            &config(),
            &options,
            &settings(),
            Recorder::default(),
            &stop,
        ),
    )
    .await
    .unwrap();
    stopper.await.unwrap();

    assert!(result.is_ok());
    let codes = writer.command_codes();
    assert_eq!(&codes[..6], &[0x00d9, 0x005f, 0x0054, 0x0053, 0x0005, 0x0056]);
    // 止められてもPANA終了要求は送る
    assert_eq!(codes.last(), Some(&0x0057));
}

#[tokio::test]
async fn test_run_pana_failed() {
    let writer = mock::SharedWriter::default();
    let result = run(
        mock::stream(&handshake(PANA_FAILED)),
        writer.clone(),
        &config(),
        &options(),
        &settings(),
        Recorder::default(),
        &CancellationToken::new(),
    )
    .await;
    assert!(matches!(result, Err(Error::PanaAuthenticationFailed)));
    // PANAセッションが無いので終了要求は送らない
    assert_eq!(
        writer.command_codes(),
        vec![0x00d9, 0x005f, 0x0054, 0x0053, 0x0005, 0x0056]
    );

    let result = run(
        mock::stream(&handshake(PANA_NO_RESPONSE)),
        mock::SharedWriter::default(),
        &config(),
        &options(),
        &settings(),
        Recorder::default(),
        &CancellationToken::new(),
    )
    .await;
    assert!(matches!(result, Err(Error::PanaNoResponse)));

    let result = run(
        mock::stream(&handshake(0x7f)),
        mock::SharedWriter::default(),
        &config(),
        &options(),
        &settings(),
        Recorder::default(),
        &CancellationToken::new(),
    )
    .await;
    assert!(matches!(result, Err(Error::PanaUnknownResult(0x7f))));
}

#[tokio::test]
async fn test_run_transmit_failed() {
    let mut datagrams = handshake(PANA_SUCCESS);
    datagrams.push(udp_received(&[
        0x10, 0x81, 0x00, 0x00, 0x0e, 0xf0, 0x01, 0x0e, 0xf0, 0x01, 0x73, 0x01, 0xd5, 0x04,
        0x01, 0x02, 0x88, 0x01,
    ]));
    datagrams.push(mock::response(0x2008, &[0x02, 0x00, 0xaa, 0xbb]));
    datagrams.push(mock::response(0x2057, &[0x01]));

    let writer = mock::SharedWriter::default();
    let result = run(
        mock::stream(&datagrams),
        writer.clone(),
        &config(),
        &options(),
        &settings(),
        Recorder::default(),
        &CancellationToken::new(),
    )
    .await;
    match result {
        Err(Error::TransmitFailed { digest }) => assert_eq!(digest, vec![0xaa, 0xbb]),
        other => panic!("{:?}", other),
    }
    // 失敗してもPANA終了要求は送る
    assert_eq!(
        writer.command_codes(),
        vec![0x00d9, 0x005f, 0x0054, 0x0053, 0x0005, 0x0056, 0x0008, 0x0057]
    );
}

#[test]
fn test_log_consumer() {
    let mut consumer = LogConsumer::default();
    assert!(consumer.unit().is_none());
    let bytes = [
        0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x72, 0x01, 0xe1, 0x01, 0x01,
    ];
    let frame = echonetlite::decode(&bytes).unwrap();
    consumer.consume(&frame);
    assert_eq!(
        consumer.unit(),
        Some(&SM::UnitForCumlativeAmountsPower::from_code(0x01))
    );
}
