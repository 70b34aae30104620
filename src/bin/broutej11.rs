// BP35C0-J11でスマートメーターを探して計測値を取得する。
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use anyhow::{Context, anyhow};
use broutej11::connection_settings::ConnectionSettings;
use broutej11::j11::J11Config;
use broutej11::j11::authn::{Credentials, Id, Password};
use broutej11::operation::{LogConsumer, RunOptions};
use clap::{Parser, Subcommand};
use serialport::{DataBits, SerialPort, StopBits};
use std::env;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Bルートでスマートメーターと通信する
#[derive(Parser, Debug)]
#[command(name = "broutej11")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 設定ファイル
    #[arg(short = 'S', long, default_value = "broutej11.toml")]
    settings: PathBuf,

    /// シリアルデバイス名
    #[arg(short = 'D', long, env = "SERIAL_DEVICE", default_value = "/dev/ttyUSB0")]
    device: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 接続対象のスマートメーターを探して設定ファイルに保存する
    Pairing {
        /// アクティブスキャン時間(1～14)
        #[arg(short = 'T', long, default_value_t = 7)]
        activescan: u8,

        /// ルートBID(32文字)
        #[arg(long, env = "ROUTE_B_ID")]
        id: String,

        /// ルートBパスワード(12文字)
        #[arg(long, env = "ROUTE_B_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// 設定ファイルのスマートメーターに接続して計測値を取得する
    Run {
        /// 計測値取得の回数(省略するとCtrl-Cで止めるまで)
        #[arg(short = 'N', long)]
        count: Option<u32>,
    },
}

/// シリアルポートを開く
fn open_port(port_name: &str) -> anyhow::Result<Box<dyn SerialPort>> {
    let builder = serialport::new(port_name, 115200)
        .stop_bits(StopBits::One)
        .data_bits(DataBits::Eight)
        .timeout(Duration::from_secs(1));

    builder
        .open()
        .with_context(move || format!("Failed to open \"{}\".", port_name))
}

/// tracingの設定
fn init_tracing() {
    let registry = tracing_subscriber::registry();

    // systemdから起動されたときはjournaldにログ出力する
    if env::var_os("JOURNAL_STREAM").is_some() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                registry.with(journald_layer).init();
                return;
            }
            Err(e) => eprintln!("couldn't connect to journald: {}", e),
        }
    }

    // デバッグレベルは RUST_LOG 環境変数で設定できる
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    registry
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(tracing_subscriber::fmt::time::LocalTime::rfc_3339())
                .with_file(false)
                .with_line_number(false)
                .with_thread_names(false)
                .with_thread_ids(false),
        )
        .init();
}

async fn exec(cli: Cli) -> anyhow::Result<()> {
    let config = J11Config::default();

    // シリアルポートを開く
    let port = open_port(&cli.device)?;

    // シリアルポート読み込みはバッファリングする
    let reader = port
        .try_clone()
        .map(BufReader::new)
        .context("Failed to clone")?;

    match cli.command {
        Command::Pairing {
            activescan,
            id,
            password,
        } => {
            let credentials = Credentials {
                id: Id::from_str(&id).map_err(|s| anyhow!(s))?,
                password: Password::from_str(&password).map_err(|s| anyhow!(s))?,
            };
            // 接続するスマートメーターをアクティブスキャンで探して設定ファイルに情報を保存する
            let settings = broutej11::pairing_and_save(
                &cli.settings,
                reader,
                port,
                &config,
                activescan,
                &credentials,
            )
            .await?;
            tracing::info!(
                "successfully finished. Channel:{} MAC:{} PAN ID:{:04X} -> {}",
                settings.Channel,
                settings.MacAddress,
                settings.PanId,
                cli.settings.display()
            );
            Ok(())
        }
        Command::Run { count } => {
            let settings = ConnectionSettings::load(&cli.settings)
                .with_context(|| format!("\"{}\"", cli.settings.display()))?;
            let options = RunOptions {
                poll_count: count,
                ..Default::default()
            };
            // Ctrl-Cで止める
            let stop = CancellationToken::new();
            tokio::spawn({
                let stop = stop.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("interrupted");
                        stop.cancel();
                    }
                }
            });
            broutej11::run(
                reader,
                port,
                &config,
                &options,
                &settings,
                LogConsumer::default(),
                &stop,
            )
            .await?;
            tracing::info!("Bye");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();

    // コマンドライン引数
    let cli = Cli::parse();

    init_tracing();

    // プログラムの情報
    let git_head_ref = built_info::GIT_HEAD_REF.unwrap_or_default();
    let app_info = format!(
        "{} / {}{}",
        built_info::PKG_NAME,
        built_info::PKG_VERSION,
        built_info::GIT_COMMIT_HASH_SHORT
            .map(|s| format!(" ({s} - {git_head_ref})"))
            .unwrap_or_default()
    );
    tracing::info!("{app_info} started.");

    match exec(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{app_info} aborted, reason: {e:#}");
            ExitCode::FAILURE
        }
    }
}
