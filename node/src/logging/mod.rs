use lazy_static::lazy_static;
use serde::Serialize;

lazy_static! {
    /// Set `RUST_LOG_JSON` to have structured values logged as pretty printed json.
    pub static ref RUST_LOG_JSON: bool = std::env::var("RUST_LOG_JSON").is_ok();
}

/// Installs the logger with directives from `RUST_LOG`. Logging stays off when it is unset.
pub fn init() {
    match std::env::var("RUST_LOG") {
        Ok(directives) => init_with_directives(&directives),
        Err(_) => println!("Logging disabled"),
    }
}

pub fn init_with_directives(directives: &str) {
    println!("Logging enabled with directives: {directives}");
    if let Err(err) = pretty_env_logger::formatted_timed_builder()
        .parse_filters(directives)
        .format_timestamp_millis()
        .try_init()
    {
        eprintln!("Logger already initialised: {err}");
    }
}

pub fn pretty_json<T: Serialize + std::fmt::Debug>(value: &T) -> String {
    if *RUST_LOG_JSON {
        let json = serde_json::json!(&value);
        match serde_json::to_string_pretty(&json) {
            Ok(s) => s,
            _ => json.to_string(),
        }
    } else {
        format!("{value:?}")
    }
}
