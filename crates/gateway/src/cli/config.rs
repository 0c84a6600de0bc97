//! `searchgate config validate` / `config show`.

use sg_domain::config::{check_required_env, Config, ConfigSeverity};

/// Validate config and required environment. Returns `false` when any
/// error-severity issue exists.
pub fn validate(config: &Config) -> bool {
    let mut issues = config.validate();
    issues.extend(check_required_env());

    if issues.is_empty() {
        println!("configuration OK");
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

/// Print the effective configuration (after env overrides) as TOML.
/// Secrets never live in the config struct, so nothing sensitive prints.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
