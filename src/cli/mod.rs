//! Command-line interface

pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, Commands};

use crate::infrastructure::config::ConfigError;

/// Print `err` for the user and exit with a failure status.
///
/// Configuration errors exit with 2, everything else with 1.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    let code = if err.downcast_ref::<ConfigError>().is_some() {
        2
    } else {
        1
    };

    if json_mode {
        let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        eprintln!(
            "{}",
            serde_json::json!({
                "error": err.to_string(),
                "causes": causes,
            })
        );
    } else {
        eprintln!("Error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }

    std::process::exit(code)
}
