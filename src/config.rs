use anyhow::{Context, Result, anyhow, bail};
use std::{
    ffi::OsString,
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_DATA_FILE: &str = "data.json";
pub const DEFAULT_BROWSER_BIN: &str = "chromium";
pub const DEFAULT_SETTLE_MS: u64 = 2_000;
pub const DEFAULT_MAX_CONCURRENT_SCRAPES: usize = 2;
pub const DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 60;

/// Raw settings as found in an env file or the process environment. Every
/// field is optional; later sources override earlier ones via [`EnvConfig::merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub data_file: Option<PathBuf>,
    pub allowed_origins: Option<Vec<String>>,
    pub browser_bin: Option<PathBuf>,
    pub settle_ms: Option<u64>,
    pub max_concurrent_scrapes: Option<usize>,
    pub scrape_timeout_secs: Option<u64>,
}

impl EnvConfig {
    /// Builds a config from `KEY=value` pairs. Unknown keys are ignored and
    /// empty values leave the field unset.
    pub fn from_pairs<I, K, V>(pairs: I, origin: &str) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut cfg = Self::default();
        for (key, value) in pairs {
            let key = key.as_ref().trim();
            let value = value.as_ref().trim().trim_matches('"');
            if value.is_empty() {
                continue;
            }
            match key {
                "PORT" => cfg.port = Some(parse_number(key, value, origin)?),
                "LISTEN_HOST" => cfg.host = Some(value.to_string()),
                "DATA_FILE" => cfg.data_file = Some(PathBuf::from(value)),
                "CORS_ALLOWED_ORIGINS" => {
                    let origins = value
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(ToString::to_string)
                        .collect::<Vec<_>>();
                    if !origins.is_empty() {
                        cfg.allowed_origins = Some(origins);
                    }
                }
                "BROWSER_BIN" => cfg.browser_bin = Some(PathBuf::from(value)),
                "SCRAPE_SETTLE_MS" => cfg.settle_ms = Some(parse_number(key, value, origin)?),
                "SCRAPE_MAX_CONCURRENT" => {
                    cfg.max_concurrent_scrapes = Some(parse_number(key, value, origin)?)
                }
                "SCRAPE_TIMEOUT_SECS" => {
                    cfg.scrape_timeout_secs = Some(parse_number(key, value, origin)?)
                }
                _ => {}
            }
        }
        Ok(cfg)
    }

    /// Fields set in `other` win.
    pub fn merge(self, other: EnvConfig) -> EnvConfig {
        EnvConfig {
            port: other.port.or(self.port),
            host: other.host.or(self.host),
            data_file: other.data_file.or(self.data_file),
            allowed_origins: other.allowed_origins.or(self.allowed_origins),
            browser_bin: other.browser_bin.or(self.browser_bin),
            settle_ms: other.settle_ms.or(self.settle_ms),
            max_concurrent_scrapes: other.max_concurrent_scrapes.or(self.max_concurrent_scrapes),
            scrape_timeout_secs: other.scrape_timeout_secs.or(self.scrape_timeout_secs),
        }
    }
}

fn parse_number<T>(key: &str, value: &str, origin: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Parsing {key}={value:?} from {origin}"))
}

/// Reads a `KEY=value` env file. Returns `Ok(None)` when the file does not exist.
pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let pairs = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='));
    EnvConfig::from_pairs(pairs, &path.display().to_string()).map(Some)
}

/// Cross-origin policy applied to every route.
#[derive(Debug, Clone, PartialEq)]
pub enum CorsPolicy {
    /// Mirror whatever origin the browser sends, credentials included.
    AnyOrigin,
    AllowList(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeSettings {
    pub browser_bin: PathBuf,
    /// Budget the page gets to run its scripts before the DOM is captured.
    pub settle: Duration,
    pub max_concurrent: usize,
    pub timeout: Duration,
}

/// Everything the server needs, resolved once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_file: PathBuf,
    pub cors: CorsPolicy,
    pub scrape: ScrapeSettings,
}

impl ServerConfig {
    pub fn from_env_config(cfg: EnvConfig) -> Result<Self> {
        let max_concurrent = cfg
            .max_concurrent_scrapes
            .unwrap_or(DEFAULT_MAX_CONCURRENT_SCRAPES);
        if max_concurrent == 0 {
            bail!("SCRAPE_MAX_CONCURRENT must be at least 1");
        }
        let cors = match cfg.allowed_origins {
            Some(origins) => CorsPolicy::AllowList(origins),
            None => CorsPolicy::AnyOrigin,
        };
        Ok(Self {
            host: cfg.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cfg.port.unwrap_or(DEFAULT_PORT),
            data_file: cfg
                .data_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_FILE)),
            cors,
            scrape: ScrapeSettings {
                browser_bin: cfg
                    .browser_bin
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_BROWSER_BIN)),
                settle: Duration::from_millis(cfg.settle_ms.unwrap_or(DEFAULT_SETTLE_MS)),
                max_concurrent,
                timeout: Duration::from_secs(
                    cfg.scrape_timeout_secs
                        .unwrap_or(DEFAULT_SCRAPE_TIMEOUT_SECS),
                ),
            },
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Parsing listen host {:?}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Keeps the pairs that are valid UTF-8. Other variables are skipped; none of
/// ours can be spelled that way.
fn utf8_pairs<I>(pairs: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    pairs
        .into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
}

/// Defaults, then the optional env file, then the process environment.
///
/// An explicitly requested file that does not exist is an error.
pub fn load_server_config(config_path: Option<&Path>) -> Result<ServerConfig> {
    let file_cfg = match config_path {
        Some(path) => read_env_config(path)?
            .ok_or_else(|| anyhow!("Missing config file at {}", path.display()))?,
        None => EnvConfig::default(),
    };
    let process_cfg = EnvConfig::from_pairs(utf8_pairs(std::env::vars_os()), "the environment")?;
    ServerConfig::from_env_config(file_cfg.merge(process_cfg))
}
