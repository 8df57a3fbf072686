use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use thiserror::Error;

/// Server settings, read from `SPOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub tls: Option<TlsPaths>,
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("both SPOTBOOK_TLS_CERT and SPOTBOOK_TLS_KEY must be set, or neither")]
    PartialTls,
    #[error("TLS: {0}")]
    Tls(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "spotbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let tls = match (lookup("SPOTBOOK_TLS_CERT"), lookup("SPOTBOOK_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => return Err(ConfigError::PartialTls),
        };

        Ok(Self {
            port: parsed(&lookup, "SPOTBOOK_PORT")?.unwrap_or(defaults.port),
            bind: lookup("SPOTBOOK_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("SPOTBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("SPOTBOOK_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "SPOTBOOK_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "SPOTBOOK_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            tls,
            metrics_port: parsed(&lookup, "SPOTBOOK_METRICS_PORT")?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("spotbook.wal")
    }

    pub fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>, ConfigError> {
        self.tls.as_ref().map(load_tls_acceptor).transpose()
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(var)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { var, value })
        })
        .transpose()
}

fn load_tls_acceptor(paths: &TlsPaths) -> Result<TlsAcceptor, ConfigError> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(&paths.cert)?))
        .collect::<Result<_, _>>()?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&paths.key)?))?
        .ok_or_else(|| ConfigError::Tls("no private key found in key file".into()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ConfigError::Tls(e.to_string()))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}
