use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context};
use dc_core::core::{DistributionThresholds, KappaBands};

use crate::config::{AppConfig, LogFormatConfig};

// ---------------------------------------------------------------------------
// ExternalSettings — validated external generator endpoint
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct ExternalSettings {
    pub base_url: String,
    pub model: String,
    pub api_key_env: Option<String>,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ExternalSettings {
    /// API key from the configured environment variable, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        let name = self.api_key_env.as_deref()?;
        std::env::var(name).ok().filter(|key| !key.is_empty())
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig — fully validated runtime configuration
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub thresholds: DistributionThresholds,
    pub kappa_bands: KappaBands,
    pub external_share: f64,
    pub seed: Option<u64>,
    /// `None` when the external generator is disabled.
    pub external: Option<ExternalSettings>,
    pub autosave_every: usize,
    pub database: PathBuf,
    pub log_level: String,
    pub log_format: LogFormatConfig,
}

// ---------------------------------------------------------------------------
// into_runtime — converts raw AppConfig into validated RuntimeConfig
// ---------------------------------------------------------------------------

pub fn into_runtime(config: AppConfig) -> Result<RuntimeConfig, anyhow::Error> {
    let validation = &config.validation;
    ensure!(
        (0.0..=1.0).contains(&validation.min_session_share),
        "validation.min_session_share must be within [0, 1], got {}",
        validation.min_session_share
    );
    ensure!(
        (0.0..=1.0).contains(&validation.max_session_share),
        "validation.max_session_share must be within [0, 1], got {}",
        validation.max_session_share
    );
    ensure!(
        validation.min_session_share < validation.max_session_share,
        "validation.min_session_share must be below max_session_share"
    );

    let bands: [f64; 5] = config
        .agreement
        .bands
        .as_slice()
        .try_into()
        .with_context(|| {
            format!(
                "agreement.bands needs exactly 5 bounds, got {}",
                config.agreement.bands.len()
            )
        })?;
    ensure!(
        bands.windows(2).all(|pair| pair[0] < pair[1]),
        "agreement.bands must be strictly ascending"
    );

    ensure!(
        (0.0..=1.0).contains(&config.generator.external_share),
        "generator.external_share must be within [0, 1], got {}",
        config.generator.external_share
    );
    ensure!(
        config.labeling.autosave_every >= 1,
        "labeling.autosave_every must be at least 1"
    );
    ensure!(
        !config.store.database.as_os_str().is_empty(),
        "store.database must not be empty"
    );

    let external = if config.external.enabled {
        let base_url = config
            .external
            .base_url
            .filter(|url| !url.trim().is_empty())
            .context("external.base_url is required when external.enabled = true")?;
        ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "external.base_url must be an http(s) URL: {base_url}"
        );
        let model = config
            .external
            .model
            .filter(|model| !model.trim().is_empty())
            .context("external.model is required when external.enabled = true")?;
        ensure!(
            config.external.timeout_ms > 0,
            "external.timeout_ms must be positive"
        );
        ensure!(
            config.external.max_tokens > 0,
            "external.max_tokens must be positive"
        );
        Some(ExternalSettings {
            base_url: base_url.trim_end_matches('/').to_owned(),
            model,
            api_key_env: config.external.api_key_env,
            timeout: Duration::from_millis(config.external.timeout_ms),
            temperature: config.external.temperature,
            max_tokens: config.external.max_tokens,
        })
    } else {
        None
    };

    Ok(RuntimeConfig {
        thresholds: DistributionThresholds {
            min_share: config.validation.min_session_share,
            max_share: config.validation.max_session_share,
        },
        kappa_bands: KappaBands(bands),
        external_share: config.generator.external_share,
        seed: config.generator.seed,
        external,
        autosave_every: config.labeling.autosave_every,
        database: config.store.database,
        log_level: config.logging.level,
        log_format: config.logging.format,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExternalConfig;

    fn make_external() -> ExternalConfig {
        ExternalConfig {
            enabled: true,
            base_url: Some("http://127.0.0.1:8000/".to_owned()),
            model: Some("llama3-70b".to_owned()),
            api_key_env: None,
            ..ExternalConfig::default()
        }
    }

    fn expect_error(config: AppConfig, fragment: &str) {
        match into_runtime(config) {
            Err(e) => assert!(
                e.to_string().contains(fragment),
                "expected '{fragment}' in '{e}'"
            ),
            Ok(_) => panic!("expected error containing '{fragment}'"),
        }
    }

    #[test]
    fn test_default_config_converts() {
        let runtime = into_runtime(AppConfig::default()).expect("defaults are valid");

        assert_eq!(runtime.thresholds, DistributionThresholds::default());
        assert_eq!(runtime.kappa_bands, KappaBands::default());
        assert_eq!(runtime.external_share, 0.3);
        assert!(runtime.external.is_none());
        assert_eq!(runtime.autosave_every, 10);
        assert_eq!(runtime.database, PathBuf::from("labels.db"));
        assert_eq!(runtime.log_format, LogFormatConfig::Pretty);
    }

    #[test]
    fn test_external_settings_normalized() {
        let config = AppConfig {
            external: make_external(),
            ..AppConfig::default()
        };
        let runtime = into_runtime(config).expect("external config should convert");

        let external = runtime.external.expect("external enabled");
        assert_eq!(external.base_url, "http://127.0.0.1:8000");
        assert_eq!(external.model, "llama3-70b");
        assert_eq!(external.timeout, Duration::from_millis(30_000));
        assert_eq!(external.api_key(), None);
    }

    #[test]
    fn test_share_out_of_range_rejected() {
        let mut config = AppConfig::default();
        config.validation.max_session_share = 1.5;
        expect_error(config, "max_session_share must be within [0, 1]");

        let mut config = AppConfig::default();
        config.generator.external_share = -0.1;
        expect_error(config, "external_share must be within [0, 1]");
    }

    #[test]
    fn test_min_share_must_be_below_max() {
        let mut config = AppConfig::default();
        config.validation.min_session_share = 0.5;
        config.validation.max_session_share = 0.5;
        expect_error(config, "must be below max_session_share");
    }

    #[test]
    fn test_bands_shape_and_order() {
        let mut config = AppConfig::default();
        config.agreement.bands = vec![0.0, 0.2, 0.4];
        expect_error(config, "exactly 5 bounds");

        let mut config = AppConfig::default();
        config.agreement.bands = vec![0.0, 0.4, 0.2, 0.6, 0.8];
        expect_error(config, "strictly ascending");
    }

    #[test]
    fn test_autosave_zero_rejected() {
        let mut config = AppConfig::default();
        config.labeling.autosave_every = 0;
        expect_error(config, "autosave_every must be at least 1");
    }

    #[test]
    fn test_enabled_external_requires_fields() {
        let mut config = AppConfig {
            external: make_external(),
            ..AppConfig::default()
        };
        config.external.model = None;
        expect_error(config, "external.model is required");

        let mut config = AppConfig {
            external: make_external(),
            ..AppConfig::default()
        };
        config.external.base_url = Some("ftp://example".to_owned());
        expect_error(config, "must be an http(s) URL");
    }
}
