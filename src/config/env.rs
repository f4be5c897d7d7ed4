//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

use super::AppConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "TESTSHARD";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Config file from TESTSHARD_CONFIG
    pub config_file: Option<String>,
    /// Concurrency from TESTSHARD_CONCURRENCY
    pub concurrency: Option<usize>,
    /// Retries from TESTSHARD_RETRIES
    pub retries: Option<u32>,
    /// Timing store URL from TESTSHARD_TIMINGS_URL
    pub timings_url: Option<String>,
    /// Continue past failures from TESTSHARD_CONTINUE_ON_ERROR
    pub continue_on_error: Option<bool>,
    /// Verbose from TESTSHARD_VERBOSE
    pub verbose: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}_{name}"));

        Self {
            config_file: get("CONFIG"),
            concurrency: get("CONCURRENCY").and_then(|v| v.parse().ok()),
            retries: get("RETRIES").and_then(|v| v.parse().ok()),
            timings_url: get("TIMINGS_URL"),
            continue_on_error: get("CONTINUE_ON_ERROR").map(|v| parse_bool(&v)),
            verbose: get("VERBOSE").map(|v| parse_bool(&v)),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.config_file.is_some()
            || self.concurrency.is_some()
            || self.retries.is_some()
            || self.timings_url.is_some()
            || self.continue_on_error.is_some()
            || self.verbose.is_some()
    }

    /// Apply overrides on top of file configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(concurrency) = self.concurrency.filter(|c| *c > 0) {
            config.concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(url) = &self.timings_url {
            config.timings.url = Some(url.clone());
        }
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {ENV_PREFIX}_CONFIG:            {:?}", self.config_file);
        println!("  {ENV_PREFIX}_CONCURRENCY:       {:?}", self.concurrency);
        println!("  {ENV_PREFIX}_RETRIES:           {:?}", self.retries);
        println!("  {ENV_PREFIX}_TIMINGS_URL:       {:?}", self.timings_url);
        println!("  {ENV_PREFIX}_CONTINUE_ON_ERROR: {:?}", self.continue_on_error);
        println!("  {ENV_PREFIX}_VERBOSE:           {:?}", self.verbose);
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

/// Print all TESTSHARD environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONFIG             Path to configuration file");
    println!("  {ENV_PREFIX}_CONCURRENCY        Maximum concurrent tests");
    println!("  {ENV_PREFIX}_RETRIES            Retries per failing test");
    println!("  {ENV_PREFIX}_TIMINGS_URL        Remote timing ledger URL");
    println!("  {ENV_PREFIX}_CONTINUE_ON_ERROR  Keep running after a test fails (true/false)");
    println!("  {ENV_PREFIX}_VERBOSE            Stream test output (true/false)");
    println!("  RUST_LOG                     Log filter (overrides --verbose)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_CONCURRENCY=8");
    println!("  testshard run --group-pos 2 --group-total 4");
}
