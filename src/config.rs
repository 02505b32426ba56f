use std::{
    fmt::{Debug, Formatter},
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;

use crate::{common::DEFAULT_PLACEHOLDER_IMAGE, mutation::MutatorConfig};

#[derive(Parser, Debug, Clone)]
pub struct Opts {
    /// Address the admission webhook listens on. The Service maps 443 onto this port so the
    /// server needs no extra privileges.
    #[clap(long, env = "WEBHOOK_LISTEN", default_value = "0.0.0.0:8443")]
    pub listen: SocketAddr,

    /// Directory holding the webhook's TLS certificate and key.
    #[clap(long, env = "TLS_DIR", default_value = "/etc/webhook/certs")]
    pub tls_dir: PathBuf,

    #[clap(long, env = "TLS_CERT_FILE", default_value = "cert.pem")]
    pub tls_cert_file: PathBuf,

    #[clap(long, env = "TLS_KEY_FILE", default_value = "key.pem")]
    pub tls_key_file: PathBuf,

    #[clap(long, env = "REDIS_HOST", default_value = "localhost")]
    pub redis_host: Hostname,

    #[clap(long, env = "REDIS_PORT", default_value = "6379")]
    pub redis_port: u16,

    #[clap(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    /// Longest a single cache lookup may take before the pod is admitted as a miss.
    #[clap(long, env = "LOOKUP_TIMEOUT_MS", default_value = "3000")]
    pub lookup_timeout_ms: u64,

    /// Image of the no-op container that replaces the real work of a cached step.
    #[clap(long, env = "PLACEHOLDER_IMAGE", default_value = DEFAULT_PLACEHOLDER_IMAGE)]
    pub placeholder_image: String,
}

impl Opts {
    pub fn cert_path(&self) -> PathBuf {
        self.tls_dir.join(&self.tls_cert_file)
    }

    pub fn key_path(&self) -> PathBuf {
        self.tls_dir.join(&self.tls_key_file)
    }

    pub fn redis_url(&self) -> String {
        let host = match self.redis_host.as_str() {
            ipv6 if ipv6.contains(':') => format!("[{}]", ipv6),
            host => host.to_string(),
        };
        match &self.redis_password {
            Some(password) => format!("redis://:{}@{}:{}/0", password, host, self.redis_port),
            None => format!("redis://{}:{}/0", host, self.redis_port),
        }
    }

    pub fn mutator_config(&self) -> MutatorConfig {
        MutatorConfig {
            placeholder_image: self.placeholder_image.clone(),
            lookup_timeout: Duration::from_millis(self.lookup_timeout_ms),
        }
    }
}

/// A DNS name or IP literal:
///   must not be empty
///   contain at most 253 characters
///   contain only ascii alphanumerics, '-', '.' or ':' (ipv6)
///   must not start or end with '-' or '.'
#[derive(Clone, PartialEq, Eq)]
pub struct Hostname(String);

impl Hostname {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for Hostname {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(!s.is_empty(), "hostname cannot be an empty string");
        anyhow::ensure!(s.len() <= 253, "hostname must be <= 253 characters");
        anyhow::ensure!(
            s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ':'),
            "hostname must contain only alphanumeric characters, '-', '.' or ':'"
        );
        anyhow::ensure!(
            !s.starts_with(['-', '.']) && !s.ends_with(['-', '.']),
            "hostname must not start or end with '-' or '.'"
        );
        Ok(Self(s.to_string()))
    }
}

impl Debug for Hostname {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
