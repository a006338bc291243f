use std::fmt;

/// 网关启动配置，全部来自环境变量
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// 监听端口
    pub port: u16,
    /// 管理接口的后门密钥
    pub hermes_secret: String,
    /// SQLite 数据库文件路径
    pub db_path: String,
    /// 限流窗口内最大请求数
    pub rate_limit_max: u32,
    /// 限流窗口长度（秒）
    pub rate_limit_window: u32,
}

/// 环境变量取值非法时的错误
#[derive(Debug)]
pub struct ConfigError {
    pub variable: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.variable, self.value)
    }
}

impl std::error::Error for ConfigError {}

fn env_number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError {
            variable: name,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            hermes_secret: "hermes-secret-key".to_string(),
            db_path: "hermes.db".to_string(),
            rate_limit_max: 60,
            rate_limit_window: 60,
        }
    }
}

impl GatewayConfig {
    /// 从环境变量读取配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let rate_limit_max: u32 = env_number("RATE_LIMIT_MAX", defaults.rate_limit_max)?;
        let rate_limit_window: u32 = env_number("RATE_LIMIT_WINDOW", defaults.rate_limit_window)?;

        if rate_limit_max == 0 {
            return Err(ConfigError {
                variable: "RATE_LIMIT_MAX",
                value: "0".to_string(),
            });
        }
        if rate_limit_window == 0 {
            return Err(ConfigError {
                variable: "RATE_LIMIT_WINDOW",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            port: env_number("PORT", defaults.port)?,
            hermes_secret: std::env::var("HERMES_SECRET").unwrap_or(defaults.hermes_secret),
            db_path: std::env::var("DB_PATH").unwrap_or(defaults.db_path),
            rate_limit_max,
            rate_limit_window,
        })
    }

    /// 数据库连接串（文件不存在时自动创建）
    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path)
    }
}
