use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use std::{
    collections::BTreeSet,
    env, fmt, fs,
    path::{Component, Path, PathBuf},
    str::FromStr,
};

const DEFAULT_MAX_FOLDER_SIZE: u64 = 100 * 1024 * 1024 * 1024;
const DEFAULT_MAX_CONTENT_LENGTH: usize = 512 * 1024 * 1024;
const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

/// Centralized application configuration.
/// Layers, lowest to highest: built-in defaults, optional JSON file,
/// environment variables, CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Public directory that receives published files.
    pub upload_dir: PathBuf,
    /// Working area for in-flight chunked uploads.
    pub temp_dir: PathBuf,
    pub password: String,
    /// Quota ceiling for everything published under `upload_dir`.
    pub max_folder_size: u64,
    /// Request body limit, in bytes.
    pub max_content_length: usize,
    /// Lowercase extensions accepted by the direct upload endpoint. Empty allows all.
    pub allowed_extensions: BTreeSet<String>,
    pub strict_decompression: bool,
    /// Abandoned uploads older than this are swept. Zero disables the sweeper.
    pub stale_upload_ttl_secs: u64,
    pub session_ttl_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Password-gated file drop with resumable uploads")]
pub struct Args {
    /// JSON configuration file (overrides FILEDROP_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Host to bind to (overrides FILEDROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILEDROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where finished uploads are published (overrides FILEDROP_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Working directory for partial uploads (overrides FILEDROP_TEMP_DIR)
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Maximum total size of the upload directory in bytes (overrides FILEDROP_MAX_FOLDER_SIZE)
    #[arg(long)]
    pub max_folder_size: Option<u64>,

    /// Reject uploads whose gzip payload cannot be inflated
    #[arg(long)]
    pub strict_decompression: bool,
}

/// Optional settings read from the JSON configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub upload_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub password: Option<String>,
    pub max_folder_size: Option<u64>,
    pub max_content_length: Option<usize>,
    pub allowed_extensions: Option<Vec<String>>,
    pub strict_decompression: Option<bool>,
    pub stale_upload_ttl_secs: Option<u64>,
    pub session_ttl_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file `{}`", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file `{}`", path.display()))
    }
}

impl AppConfig {
    /// Parse the config file, environment variables and CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        let config_path = args
            .config
            .clone()
            .or_else(|| env::var_os("FILEDROP_CONFIG").map(PathBuf::from));
        let file = match config_path {
            Some(path) => FileConfig::load(&path)?,
            None => FileConfig::default(),
        };

        Self::resolve(args, |key| env::var(key).ok(), file)
    }

    /// Merge the three layers. `lookup` resolves environment variables.
    pub fn resolve<F>(args: Args, lookup: F, file: FileConfig) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = args
            .host
            .or_else(|| lookup("FILEDROP_HOST"))
            .or(file.host)
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = match args.port {
            Some(port) => port,
            None => parse_var(&lookup, "FILEDROP_PORT")?
                .or(file.port)
                .unwrap_or(8080),
        };
        let upload_dir = args
            .upload_dir
            .or_else(|| lookup("FILEDROP_UPLOAD_DIR").map(PathBuf::from))
            .or(file.upload_dir)
            .unwrap_or_else(|| PathBuf::from("./uploads"));
        let temp_dir = args
            .temp_dir
            .or_else(|| lookup("FILEDROP_TEMP_DIR").map(PathBuf::from))
            .or(file.temp_dir)
            .unwrap_or_else(|| upload_dir.join(".temp"));
        if lexical(&upload_dir).starts_with(lexical(&temp_dir)) {
            bail!(
                "temp_dir {} must not be the upload directory {} or one of its parents",
                temp_dir.display(),
                upload_dir.display()
            );
        }

        let password = lookup("FILEDROP_PASSWORD")
            .or(file.password)
            .unwrap_or_default();
        if password.is_empty() {
            bail!("a shared password is required (set FILEDROP_PASSWORD or `password` in the config file)");
        }

        let max_folder_size = match args.max_folder_size {
            Some(size) => size,
            None => parse_var(&lookup, "FILEDROP_MAX_FOLDER_SIZE")?
                .or(file.max_folder_size)
                .unwrap_or(DEFAULT_MAX_FOLDER_SIZE),
        };
        let max_content_length = parse_var(&lookup, "FILEDROP_MAX_CONTENT_LENGTH")?
            .or(file.max_content_length)
            .unwrap_or(DEFAULT_MAX_CONTENT_LENGTH);

        let allowed_extensions = match lookup("FILEDROP_ALLOWED_EXTENSIONS") {
            Some(raw) => parse_extensions(raw.split(',')),
            None => parse_extensions(file.allowed_extensions.iter().flatten().map(String::as_str)),
        };

        let strict_decompression = args.strict_decompression
            || parse_var(&lookup, "FILEDROP_STRICT_DECOMPRESSION")?
                .or(file.strict_decompression)
                .unwrap_or(false);
        let stale_upload_ttl_secs = parse_var(&lookup, "FILEDROP_STALE_UPLOAD_TTL_SECS")?
            .or(file.stale_upload_ttl_secs)
            .unwrap_or(DEFAULT_TTL_SECS);
        let session_ttl_secs = parse_var(&lookup, "FILEDROP_SESSION_TTL_SECS")?
            .or(file.session_ttl_secs)
            .unwrap_or(DEFAULT_TTL_SECS);

        Ok(Self {
            host,
            port,
            upload_dir,
            temp_dir,
            password,
            max_folder_size,
            max_content_length,
            allowed_extensions,
            strict_decompression,
            stale_upload_ttl_secs,
            session_ttl_secs,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the direct upload endpoint accepts `filename`.
    pub fn is_extension_allowed(&self, filename: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        match filename.rsplit_once('.') {
            Some((_, ext)) => self.allowed_extensions.contains(&ext.to_lowercase()),
            None => false,
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("upload_dir", &self.upload_dir)
            .field("temp_dir", &self.temp_dir)
            .field("password", &"<redacted>")
            .field("max_folder_size", &self.max_folder_size)
            .field("max_content_length", &self.max_content_length)
            .field("allowed_extensions", &self.allowed_extensions)
            .field("strict_decompression", &self.strict_decompression)
            .field("stale_upload_ttl_secs", &self.stale_upload_ttl_secs)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .finish()
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(None),
    }
}

/// `path` without `.` components, for comparing configured directories.
fn lexical(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn parse_extensions<'a>(items: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
    items
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}
