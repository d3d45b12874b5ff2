use std::io::IsTerminal;

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize tracing for the CLI.
///
/// `RUST_LOG` wins when set; otherwise the filter is derived from the
/// verbosity and quiet flags. All output goes to stderr so the plan on
/// stdout stays machine-readable.
pub fn init_logging(verbosity: u8, quiet: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(verbosity, quiet)))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize logging: {error}"))?;

    Ok(())
}

fn default_filter(verbosity: u8, quiet: bool) -> String {
    if quiet {
        return "error".to_string();
    }
    match verbosity {
        0 => "jirabridge_core=info,jirabridge=info".to_string(),
        1 => "jirabridge_core=debug,jirabridge=debug".to_string(),
        _ => "trace".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::default_filter;

    #[test]
    fn quiet_beats_verbosity() {
        assert_eq!(default_filter(3, true), "error");
    }

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(default_filter(0, false), "jirabridge_core=info,jirabridge=info");
        assert_eq!(default_filter(1, false), "jirabridge_core=debug,jirabridge=debug");
        assert_eq!(default_filter(2, false), "trace");
    }
}
