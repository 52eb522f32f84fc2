use choir_domain::config::{Config, ConfigSeverity};

pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to render config as TOML: {e}"),
    }
}

/// Prints every validation issue and returns whether the config is
/// usable (no errors — warnings are printed but non-fatal).
pub fn validate(config: &Config) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("config is valid");
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues.iter().any(|i| i.severity == ConfigSeverity::Error)
}
