use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use event_common::config::{ConsumerConfig, KafkaConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(default = "false")]
    pub debug: bool,

    #[envconfig(default = "http://marshaller:8080")]
    pub marshaller_url: String,

    #[envconfig(default = "http://converter:8080")]
    pub converter_url: String,

    #[envconfig(default = "http://converter:8080/extended-conversions")]
    pub extended_converter_url: String,

    #[envconfig(default = "http://flow-engine:8000")]
    pub flow_engine_url: String,

    #[envconfig(default = "http://flow-parser:5000")]
    pub flow_parser_url: String,

    #[envconfig(default = "http://pipeline-registry:8000")]
    pub pipeline_repo_url: String,

    #[envconfig(default = "http://import-deploy:8080")]
    pub import_deploy_url: String,

    #[envconfig(default = "http://import-repository:8080")]
    pub import_repository_url: String,

    #[envconfig(default = "http://device-repository:8080")]
    pub device_repository_url: String,

    // Group, import and generic source events stay disabled while this is empty.
    #[envconfig(default = "")]
    pub perm_search_url: String,

    #[envconfig(default = "http://engine-wrapper:8080/v2/event-trigger")]
    pub event_trigger_url: String,

    #[envconfig(default = "value.")]
    pub device_path_prefix: String,

    #[envconfig(default = "value.")]
    pub group_path_prefix: String,

    #[envconfig(default = "")]
    pub import_path_prefix: String,

    #[envconfig(default = "")]
    pub generic_source_path_prefix: String,

    #[envconfig(default = "deployment")]
    pub deployment_topic: NonEmptyString,

    pub device_group_topic: Option<NonEmptyString>,

    pub deployment_done_topic: Option<NonEmptyString>,

    #[envconfig(default = "github.com/SENERGY-Platform/event-deployment")]
    pub deployment_done_handler: String,

    // Empty or "-" disables conditional events.
    #[envconfig(default = "")]
    pub conditional_event_database_url: String,

    #[envconfig(default = "10")]
    pub max_pg_connections: u32,

    #[envconfig(default = "")]
    pub auth_endpoint: String,

    #[envconfig(default = "")]
    pub auth_client_id: String,

    #[envconfig(default = "")]
    pub auth_client_secret: String,

    #[envconfig(default = "1")]
    pub auth_expiration_time_buffer_secs: f64,

    #[envconfig(default = "600000")]
    pub user_token_cache_lifespan: EnvMsDuration,

    #[envconfig(default = "30000")]
    pub analytics_request_timeout: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub http_client_timeout: EnvMsDuration,

    #[envconfig(default = "true")]
    pub enable_analytics_events: bool,

    #[envconfig(default = "false")]
    pub enable_multiple_paths: bool,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Group, import and generic source events need service credentials to look up
    /// devices and imports on behalf of the deployment owner.
    pub fn device_groups_and_imports_enabled(&self) -> bool {
        !self.auth_client_id.is_empty()
            && !self.auth_client_secret.is_empty()
            && !self.auth_endpoint.is_empty()
            && !self.perm_search_url.is_empty()
    }

    /// Margin before admin token expiry, zero when the configured value is unusable.
    pub fn auth_expiration_buffer(&self) -> time::Duration {
        time::Duration::try_from_secs_f64(self.auth_expiration_time_buffer_secs)
            .unwrap_or_default()
    }

    pub fn conditional_events_enabled(&self) -> bool {
        !self.conditional_event_database_url.is_empty()
            && self.conditional_event_database_url != "-"
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::init_from_hashmap(&env).expect("valid config")
    }

    #[test]
    fn defaults_disable_optional_features() {
        let config = config_from(&[]);
        assert_eq!(config.bind(), "0.0.0.0:8080");
        assert!(!config.device_groups_and_imports_enabled());
        assert!(!config.conditional_events_enabled());
        assert!(config.device_group_topic.is_none());
        assert!(config.deployment_done_topic.is_none());
        assert_eq!(config.deployment_topic.as_str(), "deployment");
        assert_eq!(
            config.analytics_request_timeout.0,
            time::Duration::from_secs(30)
        );
    }

    #[test]
    fn groups_need_all_credentials() {
        let mut vars = vec![
            ("AUTH_ENDPOINT", "http://keycloak"),
            ("AUTH_CLIENT_ID", "client"),
            ("AUTH_CLIENT_SECRET", "secret"),
        ];
        assert!(!config_from(&vars).device_groups_and_imports_enabled());

        vars.push(("PERM_SEARCH_URL", "http://permsearch"));
        assert!(config_from(&vars).device_groups_and_imports_enabled());
    }

    #[test]
    fn dash_disables_conditional_events() {
        let config = config_from(&[("CONDITIONAL_EVENT_DATABASE_URL", "-")]);
        assert!(!config.conditional_events_enabled());

        let config = config_from(&[(
            "CONDITIONAL_EVENT_DATABASE_URL",
            "postgres://events@localhost/events",
        )]);
        assert!(config.conditional_events_enabled());
    }

    #[test]
    fn unusable_auth_buffer_is_zero() {
        assert_eq!(
            config_from(&[]).auth_expiration_buffer(),
            time::Duration::from_secs(1)
        );
        assert_eq!(
            config_from(&[("AUTH_EXPIRATION_TIME_BUFFER_SECS", "1.5")]).auth_expiration_buffer(),
            time::Duration::from_millis(1500)
        );
        for value in ["inf", "-1", "1e300", "NaN"] {
            let config = config_from(&[("AUTH_EXPIRATION_TIME_BUFFER_SECS", value)]);
            assert_eq!(config.auth_expiration_buffer(), time::Duration::ZERO, "{value}");
        }
    }

    #[test]
    fn rejects_invalid_durations() {
        assert_eq!(
            "ten".parse::<EnvMsDuration>().unwrap_err(),
            ParseEnvMsDurationError
        );
        assert!("".parse::<NonEmptyString>().is_err());
    }
}
