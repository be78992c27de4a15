//! Field parsing for the merged configuration sources.

use std::num::{NonZeroU32, NonZeroUsize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, ConfigIssue, ConfigResult};
use crate::model::{
    BusSettings, ClientConfig, DestinationSettings, DispatchSettings, LabelSettings,
    RawClientConfig, TransferSettings,
};

const DEFAULT_BUS_PORT: u16 = 1883;
const DEFAULT_CLIENT_ID: &str = "q4d-client";
const DEFAULT_INBOUND_TOPIC: &str = "Down";
const DEFAULT_LABEL_TOPIC: &str = "Label";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_STARTUP_RETRIES: u32 = 3;
const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_THREADS: u32 = 4;
const DEFAULT_SEGMENTS: u32 = 4;
const DEFAULT_TRANSFER_TOOL: &str = "lftp";
const DEFAULT_QUEUE_MULTIPLIER: u32 = 2;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
const DEFAULT_LOG_LEVEL: &str = "info";

pub(crate) fn validate(raw: RawClientConfig) -> ConfigResult<ClientConfig> {
    let mut fields = FieldParser::default();

    let bus_host = fields.required("bus_host", raw.bus_host);
    let bus_port = fields.port("bus_port", raw.bus_port);
    let user = fields.required("user", raw.user);
    let password = fields.required("pw", raw.pw);
    let client_id = text_or(raw.client_id, DEFAULT_CLIENT_ID);
    let inbound_topic = text_or(raw.inbound_topic, DEFAULT_INBOUND_TOPIC);
    let label_topic = text_or(raw.label_topic, DEFAULT_LABEL_TOPIC);
    let persistent_session = fields.flag("persistent_session", raw.persistent_session);
    let keep_alive = fields.seconds("keep_alive_secs", raw.keep_alive_secs, DEFAULT_KEEP_ALIVE_SECS);
    let startup_retries =
        fields.number("startup_retries", raw.startup_retries, DEFAULT_STARTUP_RETRIES);
    let publish_timeout = fields.seconds(
        "publish_timeout_secs",
        raw.publish_timeout_secs,
        DEFAULT_PUBLISH_TIMEOUT_SECS,
    );

    let labelling = fields.flag("labelling", raw.labelling);
    let label_failures = fields.flag("label_failures", raw.label_failures);

    let transfer_host = fields.required("host", raw.host);
    let creds = fields.required("creds", raw.creds);
    let threads = fields.positive("threads", raw.threads, DEFAULT_THREADS);
    let segments = fields.positive("segments", raw.segments, DEFAULT_SEGMENTS);
    let tool = text_or(raw.transfer_tool, DEFAULT_TRANSFER_TOOL);
    let job_timeout = fields.optional_seconds("job_timeout_secs", raw.job_timeout_secs);

    let queue_multiplier =
        fields.positive("queue_multiplier", raw.queue_multiplier, DEFAULT_QUEUE_MULTIPLIER);
    let max_attempts = fields.positive("max_attempts", raw.max_attempts, DEFAULT_MAX_ATTEMPTS);

    let destination_base = optional_path(raw.destination_base);
    let default_destination = optional_path(raw.default_destination);
    let shutdown_grace = fields.seconds(
        "shutdown_grace_secs",
        raw.shutdown_grace_secs,
        DEFAULT_SHUTDOWN_GRACE_SECS,
    );
    let log_level = text_or(raw.log_level, DEFAULT_LOG_LEVEL);

    if !fields.issues.is_empty() {
        return Err(ConfigError::Invalid {
            issues: fields.issues,
        });
    }

    let workers = to_usize(threads);
    Ok(ClientConfig {
        bus: BusSettings {
            host: bus_host,
            port: bus_port,
            user,
            password,
            client_id,
            inbound_topic,
            label_topic,
            persistent_session,
            keep_alive,
            startup_retries,
            publish_timeout,
        },
        transfer: TransferSettings {
            host: transfer_host,
            creds,
            threads,
            segments,
            tool,
            job_timeout,
        },
        dispatch: DispatchSettings {
            workers,
            queue_multiplier: to_usize(queue_multiplier),
            max_attempts,
        },
        labels: LabelSettings {
            enabled: labelling,
            label_failures,
        },
        destinations: DestinationSettings {
            base: destination_base,
            default: default_destination,
        },
        shutdown_grace,
        log_level,
    })
}

/// Interpret the truthy spellings accepted for boolean flags.
pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn to_usize(value: NonZeroU32) -> NonZeroUsize {
    usize::try_from(value.get())
        .ok()
        .and_then(NonZeroUsize::new)
        .unwrap_or(NonZeroUsize::MIN)
}

#[derive(Default)]
struct FieldParser {
    issues: Vec<ConfigIssue>,
}

impl FieldParser {
    fn required(&mut self, field: &'static str, value: Option<String>) -> String {
        match trimmed(value) {
            Some(value) => value,
            None => {
                self.issues.push(ConfigIssue::missing(field));
                String::new()
            }
        }
    }

    fn flag(&mut self, field: &'static str, value: Option<String>) -> bool {
        let Some(value) = value else {
            return false;
        };
        parse_flag(&value).unwrap_or_else(|| {
            self.issues
                .push(ConfigIssue::invalid(field, "not_boolean", &value));
            false
        })
    }

    fn port(&mut self, field: &'static str, value: Option<String>) -> u16 {
        let Some(value) = trimmed(value) else {
            return DEFAULT_BUS_PORT;
        };
        match value.parse::<u32>() {
            Ok(port) if (1..=u32::from(u16::MAX)).contains(&port) => {
                u16::try_from(port).unwrap_or(DEFAULT_BUS_PORT)
            }
            Ok(_) => {
                self.issues
                    .push(ConfigIssue::invalid(field, "out_of_range", &value));
                DEFAULT_BUS_PORT
            }
            Err(_) => {
                self.issues
                    .push(ConfigIssue::invalid(field, "not_integer", &value));
                DEFAULT_BUS_PORT
            }
        }
    }

    fn number<T>(&mut self, field: &'static str, value: Option<String>, default: T) -> T
    where
        T: FromStr,
    {
        let Some(value) = trimmed(value) else {
            return default;
        };
        value.parse::<T>().unwrap_or_else(|_| {
            self.issues
                .push(ConfigIssue::invalid(field, "not_integer", &value));
            default
        })
    }

    fn positive(&mut self, field: &'static str, value: Option<String>, default: u32) -> NonZeroU32 {
        let fallback = NonZeroU32::new(default).unwrap_or(NonZeroU32::MIN);
        let Some(value) = trimmed(value) else {
            return fallback;
        };
        match value.parse::<i64>() {
            Ok(parsed) => u32::try_from(parsed)
                .ok()
                .and_then(NonZeroU32::new)
                .unwrap_or_else(|| {
                    self.issues
                        .push(ConfigIssue::invalid(field, "not_positive", &value));
                    fallback
                }),
            Err(_) => {
                self.issues
                    .push(ConfigIssue::invalid(field, "not_integer", &value));
                fallback
            }
        }
    }

    fn seconds(&mut self, field: &'static str, value: Option<String>, default: u64) -> Duration {
        Duration::from_secs(self.number(field, value, default))
    }

    fn optional_seconds(&mut self, field: &'static str, value: Option<String>) -> Option<Duration> {
        let value = trimmed(value)?;
        match value.parse::<u64>() {
            Ok(0) => {
                self.issues
                    .push(ConfigIssue::invalid(field, "not_positive", &value));
                None
            }
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => {
                self.issues
                    .push(ConfigIssue::invalid(field, "not_integer", &value));
                None
            }
        }
    }
}

fn text_or(value: Option<String>, default: &str) -> String {
    trimmed(value).unwrap_or_else(|| default.to_string())
}

fn optional_path(value: Option<String>) -> Option<PathBuf> {
    trimmed(value).map(PathBuf::from)
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
