use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    telephony: Leg,
    external: Leg,
    formats: Formats,
}

#[derive(Deserialize)]
struct Leg {
    local_ip: String,
    local_port: u16,
    remote_ip: String,
    remote_port: u16,
    buffer_size: usize,
}

#[derive(Deserialize)]
struct Formats {
    input: String,
    output: String,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 电话腿配置
    println!("cargo:rustc-env=TELEPHONY_LOCAL_IP={}", config.telephony.local_ip);
    println!("cargo:rustc-env=TELEPHONY_LOCAL_PORT={}", config.telephony.local_port);
    println!("cargo:rustc-env=TELEPHONY_REMOTE_IP={}", config.telephony.remote_ip);
    println!("cargo:rustc-env=TELEPHONY_REMOTE_PORT={}", config.telephony.remote_port);
    println!("cargo:rustc-env=TELEPHONY_BUFFER_SIZE={}", config.telephony.buffer_size);

    // 外部格式腿配置
    println!("cargo:rustc-env=EXTERNAL_LOCAL_IP={}", config.external.local_ip);
    println!("cargo:rustc-env=EXTERNAL_LOCAL_PORT={}", config.external.local_port);
    println!("cargo:rustc-env=EXTERNAL_REMOTE_IP={}", config.external.remote_ip);
    println!("cargo:rustc-env=EXTERNAL_REMOTE_PORT={}", config.external.remote_port);
    println!("cargo:rustc-env=EXTERNAL_BUFFER_SIZE={}", config.external.buffer_size);

    // 转码格式
    println!("cargo:rustc-env=INPUT_FORMAT={}", config.formats.input);
    println!("cargo:rustc-env=OUTPUT_FORMAT={}", config.formats.output);
}
