use serde::Serialize;

#[derive(Debug, Serialize, Clone)]
pub struct Config {
    // 电话腿配置 (Asterisk AudioSocket 侧)
    pub telephony_local_ip: &'static str,
    pub telephony_local_port: u16,
    pub telephony_remote_ip: &'static str,
    pub telephony_remote_port: u16,
    pub telephony_buffer_size: usize,

    // 外部格式腿配置 (网络侧)
    pub external_local_ip: &'static str,
    pub external_local_port: u16,
    pub external_remote_ip: &'static str,
    pub external_remote_port: u16,
    pub external_buffer_size: usize,

    // 转码格式
    pub input_format: &'static str,
    pub output_format: &'static str,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            // 电话腿配置
            telephony_local_ip: env!("TELEPHONY_LOCAL_IP"),
            telephony_local_port: env!("TELEPHONY_LOCAL_PORT")
                .parse()
                .map_err(|_| "Failed to parse TELEPHONY_LOCAL_PORT")?,
            telephony_remote_ip: env!("TELEPHONY_REMOTE_IP"),
            telephony_remote_port: env!("TELEPHONY_REMOTE_PORT")
                .parse()
                .map_err(|_| "Failed to parse TELEPHONY_REMOTE_PORT")?,
            telephony_buffer_size: env!("TELEPHONY_BUFFER_SIZE")
                .parse()
                .map_err(|_| "Failed to parse TELEPHONY_BUFFER_SIZE")?,

            // 外部格式腿配置
            external_local_ip: env!("EXTERNAL_LOCAL_IP"),
            external_local_port: env!("EXTERNAL_LOCAL_PORT")
                .parse()
                .map_err(|_| "Failed to parse EXTERNAL_LOCAL_PORT")?,
            external_remote_ip: env!("EXTERNAL_REMOTE_IP"),
            external_remote_port: env!("EXTERNAL_REMOTE_PORT")
                .parse()
                .map_err(|_| "Failed to parse EXTERNAL_REMOTE_PORT")?,
            external_buffer_size: env!("EXTERNAL_BUFFER_SIZE")
                .parse()
                .map_err(|_| "Failed to parse EXTERNAL_BUFFER_SIZE")?,

            // 转码格式
            input_format: env!("INPUT_FORMAT"),
            output_format: env!("OUTPUT_FORMAT"),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}
