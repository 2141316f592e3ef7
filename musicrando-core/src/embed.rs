//! String-in, string-out entry points for hosts that cannot hold Rust types,
//! such as a browser page driving a WebAssembly build.

use serde::Serialize;

use crate::layout::MusicLayout;
use crate::{
    check_libraries, randomize_rom, RandomiserError, RandomizeOptions, Randomized, Result,
};

const DEFAULT_ERROR_JSON: &str = r#"{"errorMessage":"failed to serialize error message JSON"}"#;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessResult<'a> {
    rom: &'a [u8],
    free_banks: &'a [u8],
    log: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureResult<'a> {
    error_message: &'a str,
}

pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub fn success_json(result: &Randomized) -> Result<String> {
    let res = SuccessResult {
        rom: &result.rom,
        free_banks: &result.free_banks,
        log: &result.log,
    };
    Ok(serde_json::to_string_pretty(&res)?)
}

pub fn failure_json(message: &str) -> String {
    serde_json::to_string_pretty(&FailureResult {
        error_message: message,
    })
    .unwrap_or_else(|_| DEFAULT_ERROR_JSON.to_string())
}

/// Randomises `base_rom` and always answers with JSON: either
/// `{rom, freeBanks, log}` or `{errorMessage}`. `options_json` holds
/// `RandomizeOptions` fields; missing ones take their defaults and `seed`
/// always wins over any seed in the options.
pub fn randomize_rom_json(base_rom: &[u8], free_banks: &[u8], seed: u64, options_json: &str) -> String {
    let outcome = serde_json::from_str::<RandomizeOptions>(options_json)
        .map_err(RandomiserError::from)
        .and_then(|mut options| {
            options.seed = seed;
            randomize_rom(base_rom, free_banks, &options)
        })
        .and_then(|result| success_json(&result));

    match outcome {
        Ok(json) => json,
        Err(err) => failure_json(&err.to_string()),
    }
}

/// Checks extra libraries against the Crystalis layout. Empty on success,
/// otherwise the first error message.
pub fn test_libraries(libraries: &[String]) -> String {
    match check_libraries(&MusicLayout::crystalis(), libraries) {
        Ok(_) => String::new(),
        Err(err) => err.to_string(),
    }
}
