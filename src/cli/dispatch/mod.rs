use crate::cli::{actions::Action, globals::GlobalArgs};
use anyhow::Result;
use secrecy::SecretString;
use std::time::Duration;

fn required_string(matches: &clap::ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .map(ToString::to_string)
        .ok_or_else(|| anyhow::anyhow!("missing required argument: --{name}"))
}

fn seconds(matches: &clap::ArgMatches, name: &str, default: u64) -> Duration {
    Duration::from_secs(matches.get_one::<u64>(name).copied().unwrap_or(default))
}

pub fn handler(matches: &clap::ArgMatches) -> Result<(Action, GlobalArgs)> {
    let globals = GlobalArgs {
        master_key: SecretString::from(required_string(matches, "master-key")?),
        auth_url: required_string(matches, "auth-url")?,
        processing_url: required_string(matches, "processing-url")?,
        vault_ttl: seconds(matches, "vault-ttl", 900),
        token_ttl: seconds(matches, "token-ttl", 300),
        rotate_period: seconds(matches, "rotate-period", 870),
        refresh_period: seconds(matches, "refresh-period", 270),
    };

    let action = Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
    };

    Ok((action, globals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_handler_builds_action_and_globals() {
        let matches = commands::new().get_matches_from(vec![
            "sensegate",
            "--port",
            "9090",
            "--master-key",
            "bWFzdGVyLWtleQ==",
            "--auth-url",
            "https://sense.tld/auth/token",
            "--processing-url",
            "https://processing.tld",
            "--token-ttl",
            "120",
        ]);

        let (action, globals) = handler(&matches).unwrap();
        let Action::Server { port } = action;
        assert_eq!(port, 9090);
        assert_eq!(globals.auth_url, "https://sense.tld/auth/token");
        assert_eq!(globals.token_ttl, Duration::from_secs(120));
        assert_eq!(globals.vault_ttl, Duration::from_secs(900));
    }
}
