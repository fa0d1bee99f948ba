use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use serde_json::Value;

/// Settings for one simulated optimistic-create run.
///
/// A client creates an entity, keeps editing it while the create request is
/// in flight, and the server eventually assigns the durable ID. All values
/// are parsed from CLI arguments or environment variables (a `.env` file is
/// honored).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "deferral",
    version,
    about = "Replays an optimistic create-then-edit flow and prints every dispatched action"
)]
pub struct CliArgs {
    /// Correlation key the client assigns to the entity before it exists.
    ///
    /// Environment variable: `DEFERRAL_KEY`
    #[arg(long, env = "DEFERRAL_KEY", default_value_t = String::from("draft-1"))]
    pub key: String,

    /// Identifier the simulated server assigns on creation. Values that parse
    /// as an unsigned integer are emitted as JSON numbers.
    ///
    /// Environment variable: `RESOLVED_ID`
    #[arg(long, env = "RESOLVED_ID", default_value_t = String::from("server-42"))]
    pub resolved_id: String,

    /// How long the simulated create request takes, in milliseconds.
    ///
    /// Environment variable: `RESOLVE_AFTER_MS`
    #[arg(long, env = "RESOLVE_AFTER_MS", default_value_t = 250)]
    pub resolve_after_ms: u64,

    /// Number of provisional edits the client makes.
    ///
    /// Edits that land after the create resolves are rejected, which is
    /// reported but not fatal.
    ///
    /// Environment variable: `EDITS`
    #[arg(long, env = "EDITS", default_value_t = 3)]
    pub edits: usize,

    /// Delay between provisional edits, in milliseconds.
    ///
    /// Environment variable: `EDIT_INTERVAL_MS`
    #[arg(long, env = "EDIT_INTERVAL_MS", default_value_t = 50)]
    pub edit_interval_ms: u64,

    /// Action field the resolved identifier is grafted into.
    ///
    /// Environment variable: `PAYLOAD_FIELD`
    #[arg(long, env = "PAYLOAD_FIELD", default_value_t = String::from(deferral::DEFAULT_PAYLOAD_FIELD))]
    pub payload_field: String,

    /// Make the simulated create request fail instead of resolving.
    #[arg(long, default_value_t = false)]
    pub fail: bool,

    /// Emit logs as JSON instead of human-readable text.
    ///
    /// Environment variable: `LOG_JSON`
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub key: String,
    pub resolved_id: Value,
    pub resolve_after: Duration,
    pub edits: usize,
    pub edit_interval: Duration,
    pub payload_field: String,
    pub fail: bool,
    pub log_json: bool,
}

impl TryFrom<CliArgs> for ScenarioConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.key.trim().is_empty() {
            bail!("DEFERRAL_KEY must not be empty");
        }

        if args.resolved_id.trim().is_empty() {
            bail!("RESOLVED_ID must not be empty");
        }

        if args.payload_field.trim().is_empty() {
            bail!("PAYLOAD_FIELD must not be empty");
        }

        if args.payload_field == deferral::TYPE_FIELD {
            bail!(
                "PAYLOAD_FIELD cannot be `{}`, it holds the action type",
                deferral::TYPE_FIELD
            );
        }

        let resolved_id = args
            .resolved_id
            .parse::<u64>()
            .map_or_else(|_| Value::String(args.resolved_id.clone()), Value::from);

        Ok(Self {
            key: args.key,
            resolved_id,
            resolve_after: Duration::from_millis(args.resolve_after_ms),
            edits: args.edits,
            edit_interval: Duration::from_millis(args.edit_interval_ms),
            payload_field: args.payload_field,
            fail: args.fail,
            log_json: args.log_json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ScenarioConfig> {
        let args = CliArgs::try_parse_from(core::iter::once("deferral").chain(args.iter().copied()))?;
        ScenarioConfig::try_from(args)
    }

    #[test]
    fn numeric_ids_become_numbers() {
        let config = parse(&["--resolved-id", "42"]).unwrap();
        assert_eq!(config.resolved_id, Value::from(42_u64));

        let config = parse(&["--resolved-id", "srv-1"]).unwrap();
        assert_eq!(config.resolved_id, Value::from("srv-1"));
    }

    #[test]
    fn rejects_type_as_payload_field() {
        let err = parse(&["--payload-field", "type"]).unwrap_err();
        assert!(err.to_string().contains("PAYLOAD_FIELD"));
    }

    #[test]
    fn rejects_blank_key() {
        assert!(parse(&["--key", "  "]).is_err());
    }

    #[test]
    fn durations_are_in_milliseconds() {
        let config = parse(&["--resolve-after-ms", "1500", "--edit-interval-ms", "5"]).unwrap();
        assert_eq!(config.resolve_after, Duration::from_millis(1500));
        assert_eq!(config.edit_interval, Duration::from_millis(5));
    }
}
