use anyhow::Result;

pub mod audit;
pub mod classify;
pub mod config;
pub mod programs;
pub mod simulate;
pub mod soak_status;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

/// Parse an RFC 3339 instant given on the command line
pub(crate) fn parse_instant(field: &str, value: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| anyhow::anyhow!("invalid {field} '{value}': {e}"))
}
