use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Secrets that ship in sample `.env` files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

pub enum MediaConfig {
    Cloudinary(CloudinaryConfig),
    Local { dir: PathBuf, public_url: String },
}

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub cors_origin: Option<String>,
    pub temp_dir: PathBuf,
    pub cookie_secure: bool,
    pub media: MediaConfig,
    pub orphan_grace: Duration,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let num = |key: &str, default: u64| -> Result<u64> {
            match get(key) {
                Some(v) => v.trim().parse().with_context(|| format!("{key} must be a whole number")),
                None => Ok(default),
            }
        };
        let span = |key: &str, default: u64, unit_secs: u64| -> Result<Duration> {
            num(key, default)?
                .checked_mul(unit_secs)
                .map(Duration::from_secs)
                .with_context(|| format!("{key} is too large"))
        };

        let access_secret = secret(&get, "ACCESS_TOKEN_SECRET")?;
        let refresh_secret = secret(&get, "REFRESH_TOKEN_SECRET")?;
        if access_secret == refresh_secret {
            bail!("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ");
        }

        let cloudinary = (
            get("CLOUDINARY_CLOUD_NAME").filter(|v| !v.is_empty()),
            get("CLOUDINARY_API_KEY").filter(|v| !v.is_empty()),
            get("CLOUDINARY_API_SECRET").filter(|v| !v.is_empty()),
        );
        let media = match cloudinary {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => MediaConfig::Cloudinary(CloudinaryConfig {
                cloud_name,
                api_key,
                api_secret,
            }),
            _ => MediaConfig::Local {
                dir: var("VIDTUBE_MEDIA_DIR", "./media").into(),
                public_url: var("VIDTUBE_PUBLIC_URL", "http://localhost:8000"),
            },
        };

        let cookie_secure = match var("VIDTUBE_COOKIE_SECURE", "true").to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => bail!("VIDTUBE_COOKIE_SECURE must be true or false, got {other}"),
        };

        let port = var("VIDTUBE_PORT", "8000")
            .trim()
            .parse()
            .context("VIDTUBE_PORT must be a port number")?;

        Ok(Self {
            host: var("VIDTUBE_HOST", "0.0.0.0"),
            port,
            db_path: var("VIDTUBE_DB_PATH", "vidtube.db").into(),
            access_secret,
            refresh_secret,
            access_ttl: span("ACCESS_TOKEN_EXPIRY_MINUTES", 15, 60)?,
            refresh_ttl: span("REFRESH_TOKEN_EXPIRY_DAYS", 10, 86_400)?,
            cors_origin: get("CORS_ORIGIN").filter(|v| !v.trim().is_empty()),
            temp_dir: var("VIDTUBE_TEMP_DIR", "./public/temp").into(),
            cookie_secure,
            media,
            orphan_grace: span("VIDTUBE_ORPHAN_GRACE_MINUTES", 60, 60)?,
            sweep_interval: Duration::from_secs(num("VIDTUBE_SWEEP_INTERVAL_SECS", 600)?.max(1)),
        })
    }
}

fn secret(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    let value = get(key).unwrap_or_default();
    if value.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&value.as_str()) {
        bail!("{key} is unset or still a placeholder; set it in your .env file and restart");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const SECRETS: [(&str, &str); 2] = [
        ("ACCESS_TOKEN_SECRET", "a-long-access-secret"),
        ("REFRESH_TOKEN_SECRET", "a-long-refresh-secret"),
    ];

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&SECRETS)).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.access_ttl, Duration::from_secs(15 * 60));
        assert_eq!(config.refresh_ttl, Duration::from_secs(10 * 86_400));
        assert!(config.cookie_secure);
        assert!(config.cors_origin.is_none());
        assert!(matches!(config.media, MediaConfig::Local { .. }));
    }

    #[test]
    fn secrets_are_checked() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(
            Config::from_lookup(lookup(&[
                ("ACCESS_TOKEN_SECRET", "dev-secret-change-me"),
                ("REFRESH_TOKEN_SECRET", "fine"),
            ]))
            .is_err()
        );
        assert!(
            Config::from_lookup(lookup(&[
                ("ACCESS_TOKEN_SECRET", "same"),
                ("REFRESH_TOKEN_SECRET", "same"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn cloudinary_needs_all_three_credentials() {
        let mut pairs = SECRETS.to_vec();
        pairs.push(("CLOUDINARY_CLOUD_NAME", "demo"));
        pairs.push(("CLOUDINARY_API_KEY", "key"));
        let partial = Config::from_lookup(lookup(&pairs)).unwrap();
        assert!(matches!(partial.media, MediaConfig::Local { .. }));

        pairs.push(("CLOUDINARY_API_SECRET", "shh"));
        let full = Config::from_lookup(lookup(&pairs)).unwrap();
        assert!(matches!(full.media, MediaConfig::Cloudinary(_)));
    }

    #[test]
    fn bad_numbers_are_errors() {
        let mut pairs = SECRETS.to_vec();
        pairs.push(("VIDTUBE_PORT", "eighty"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn oversized_durations_are_errors() {
        let huge = u64::MAX.to_string();
        for key in [
            "ACCESS_TOKEN_EXPIRY_MINUTES",
            "REFRESH_TOKEN_EXPIRY_DAYS",
            "VIDTUBE_ORPHAN_GRACE_MINUTES",
        ] {
            let mut pairs = SECRETS.to_vec();
            pairs.push((key, huge.as_str()));
            let err = Config::from_lookup(lookup(&pairs)).err().expect("overflow must be rejected");
            assert!(err.to_string().contains(key), "{err}");
        }
    }
}
