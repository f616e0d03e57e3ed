mod config;
mod leg_bridge;
mod transcode;

use std::sync::Arc;

use bytes::Bytes;
use config::Config;
use leg_bridge::{LegBridge, LegEvent};
use tokio::signal;
use tokio::sync::mpsc;
use transcode::{CallSession, ProcessRole, TELEPHONY_SAMPLE_RATE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().unwrap_or_default();

    // 创建通道，用于组件间通信
    // 腿事件通道（UDP 接收方向）
    let (tx_tele_event, mut rx_tele_event) = mpsc::channel::<LegEvent>(100);
    let (tx_ext_event, mut rx_ext_event) = mpsc::channel::<LegEvent>(100);

    // 会话回调通道（发送方向，回调里只做 try_send）
    let (tx_tele_out, mut rx_tele_out) = mpsc::channel::<Bytes>(100);
    let (tx_ext_out, mut rx_ext_out) = mpsc::channel::<Bytes>(100);
    let (tx_engine_err, mut rx_engine_err) = mpsc::channel::<ProcessRole>(8);

    // 启动电话腿桥 (Asterisk AudioSocket 侧, 320 字节 PCM 帧)
    let telephony_bridge = Arc::new(
        LegBridge::new(
            &format!("{}:{}", config.telephony_local_ip, config.telephony_local_port),
            &format!("{}:{}", config.telephony_remote_ip, config.telephony_remote_port),
            config.telephony_buffer_size,
            tx_tele_event,
        )
        .await?,
    );
    let telephony_bridge_clone = telephony_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = telephony_bridge_clone.run().await {
            eprintln!("Telephony bridge error: {}", e);
        }
    });

    // 启动外部格式腿桥 (网络侧, 可变大小块)
    let external_bridge = Arc::new(
        LegBridge::new(
            &format!("{}:{}", config.external_local_ip, config.external_local_port),
            &format!("{}:{}", config.external_remote_ip, config.external_remote_port),
            config.external_buffer_size,
            tx_ext_event,
        )
        .await?,
    );
    let external_bridge_clone = external_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = external_bridge_clone.run().await {
            eprintln!("External bridge error: {}", e);
        }
    });

    // 建立转码会话，回调在 begin 之前注册
    let mut session = CallSession::new();
    session.on_telephony_frame(Arc::new(move |frame| {
        if tx_tele_out.try_send(frame).is_err() {
            eprintln!("Telephony out queue full, dropping frame");
        }
    }));
    session.on_external_chunk(Arc::new(move |chunk| {
        if tx_ext_out.try_send(chunk).is_err() {
            eprintln!("External out queue full, dropping chunk");
        }
    }));
    session.on_engine_error(Arc::new(move |role| {
        let _ = tx_engine_err.try_send(role);
    }));

    session.begin(config.input_format, config.output_format)?;
    println!(
        "AudioSocket relay started: session {}, {} -> pcm_s16le@{}Hz -> {}",
        session.id(),
        config.input_format,
        TELEPHONY_SAMPLE_RATE,
        config.output_format
    );

    // 主事件循环，处理各组件事件
    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down...");
                break;
            }

            // 电话腿收到 PCM 帧，送入编码方向
            Some(event) = rx_tele_event.recv() => {
                let LegEvent::Audio(frame) = event;
                if let Err(e) = session.feed_telephony(frame) {
                    eprintln!("Dropping telephony input: {}", e);
                }
            }

            // 外部腿收到编码数据，送入解码方向
            Some(event) = rx_ext_event.recv() => {
                let LegEvent::Audio(data) = event;
                if let Err(e) = session.feed_external(data) {
                    eprintln!("Dropping external input: {}", e);
                }
            }

            // 解码出的 320 字节帧发回电话腿
            Some(frame) = rx_tele_out.recv() => {
                if let Err(e) = telephony_bridge.send_audio(&frame).await {
                    eprintln!("Failed to send to telephony leg: {}", e);
                }
            }

            // 编码出的数据发回外部腿
            Some(chunk) = rx_ext_out.recv() => {
                if let Err(e) = external_bridge.send_audio(&chunk).await {
                    eprintln!("Failed to send to external leg: {}", e);
                }
            }

            // 编解码进程意外退出，挂断并退出
            Some(role) = rx_engine_err.recv() => {
                eprintln!("Codec {} process died, tearing down call", role);
                break;
            }
        }
    }

    session.end().await;
    Ok(())
}
