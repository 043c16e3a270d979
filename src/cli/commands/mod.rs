use clap::{
    Arg, ColorChoice, Command,
    builder::{
        ValueParser,
        styling::{AnsiColor, Effects, Styles},
    },
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("sensegate")
        .about("Credential custodian, token broker and streaming proxy")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("SENSEGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("master-key")
                .long("master-key")
                .help("Base64-encoded 256-bit master key used to wrap data keys")
                .env("SENSEGATE_MASTER_KEY")
                .required(true),
        )
        .arg(
            Arg::new("auth-url")
                .long("auth-url")
                .help("Token authority endpoint, example: https://sense.tld/auth/token")
                .env("SENSEGATE_AUTH_URL")
                .required(true),
        )
        .arg(
            Arg::new("processing-url")
                .long("processing-url")
                .help("Base URL of the processing microservice")
                .env("SENSEGATE_PROCESSING_URL")
                .required(true),
        )
        .arg(
            Arg::new("vault-ttl")
                .long("vault-ttl")
                .help("Credential entry TTL in seconds")
                .default_value("900")
                .env("SENSEGATE_VAULT_TTL")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("token-ttl")
                .long("token-ttl")
                .help("Bearer token TTL in seconds")
                .default_value("300")
                .env("SENSEGATE_TOKEN_TTL")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("rotate-period")
                .long("rotate-period")
                .help("Vault key rotation period in seconds")
                .default_value("870")
                .env("SENSEGATE_ROTATE_PERIOD")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("refresh-period")
                .long("refresh-period")
                .help("Token refresh period in seconds")
                .default_value("270")
                .env("SENSEGATE_REFRESH_PERIOD")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("SENSEGATE_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 7] = [
        "sensegate",
        "--master-key",
        "bWFzdGVyLWtleQ==",
        "--auth-url",
        "https://sense.tld/auth/token",
        "--processing-url",
        "https://processing.tld",
    ];

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "sensegate");
        assert_eq!(
            command.get_about().unwrap().to_string(),
            "Credential custodian, token broker and streaming proxy"
        );
        assert_eq!(
            command.get_version().unwrap().to_string(),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_check_defaults() {
        let command = new();
        let matches = command.get_matches_from(REQUIRED);

        assert_eq!(matches.get_one::<u16>("port").copied(), Some(8080));
        assert_eq!(matches.get_one::<u64>("vault-ttl").copied(), Some(900));
        assert_eq!(matches.get_one::<u64>("token-ttl").copied(), Some(300));
        assert_eq!(matches.get_one::<u64>("rotate-period").copied(), Some(870));
        assert_eq!(matches.get_one::<u64>("refresh-period").copied(), Some(270));
    }

    #[test]
    fn test_check_port_and_urls() {
        let command = new();
        let mut args: Vec<&str> = REQUIRED.to_vec();
        args.extend(["--port", "9090"]);
        let matches = command.get_matches_from(args);

        assert_eq!(matches.get_one::<u16>("port").copied(), Some(9090));
        assert_eq!(
            matches.get_one::<String>("auth-url").map(String::as_str),
            Some("https://sense.tld/auth/token")
        );
        assert_eq!(
            matches
                .get_one::<String>("processing-url")
                .map(String::as_str),
            Some("https://processing.tld")
        );
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("SENSEGATE_MASTER_KEY", Some("bWFzdGVyLWtleQ==")),
                ("SENSEGATE_AUTH_URL", Some("https://sense.tld/auth/token")),
                ("SENSEGATE_PROCESSING_URL", Some("https://processing.tld")),
                ("SENSEGATE_PORT", Some("443")),
                ("SENSEGATE_TOKEN_TTL", Some("120")),
                ("SENSEGATE_LOG_LEVEL", Some("info")),
            ],
            || {
                let command = new();
                let matches = command.get_matches_from(vec!["sensegate"]);
                assert_eq!(matches.get_one::<u16>("port").copied(), Some(443));
                assert_eq!(matches.get_one::<u64>("token-ttl").copied(), Some(120));
                assert_eq!(matches.get_one::<u8>("verbosity").copied(), Some(2));
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars(
                [
                    ("SENSEGATE_LOG_LEVEL", Some(level)),
                    ("SENSEGATE_MASTER_KEY", Some("bWFzdGVyLWtleQ==")),
                    ("SENSEGATE_AUTH_URL", Some("https://sense.tld/auth/token")),
                    ("SENSEGATE_PROCESSING_URL", Some("https://processing.tld")),
                ],
                || {
                    let command = new();
                    let matches = command.get_matches_from(vec!["sensegate"]);
                    assert_eq!(
                        matches.get_one::<u8>("verbosity").copied(),
                        Some(u8::try_from(index).unwrap_or(0))
                    );
                },
            );
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            temp_env::with_vars([("SENSEGATE_LOG_LEVEL", None::<String>)], || {
                let mut args: Vec<String> = REQUIRED.iter().map(ToString::to_string).collect();

                // Add the appropriate number of "-v" flags based on the index
                if index > 0 {
                    let v = format!("-{}", "v".repeat(index));
                    args.push(v);
                }

                let command = new();
                let matches = command.get_matches_from(args);

                assert_eq!(
                    matches.get_one::<u8>("verbosity").copied(),
                    Some(u8::try_from(index).unwrap_or(0))
                );
            });
        }
    }
}
