use serde::Serialize;

use crate::error::AppResult;

/// Reports go out pretty-printed with a trailing newline so they can be
/// concatenated into a log of runs.
pub fn render<T: Serialize>(value: &T) -> AppResult<String> {
    let mut payload = serde_json::to_string_pretty(value)?;
    payload.push('\n');
    Ok(payload)
}

pub fn print<T: Serialize>(value: &T) -> AppResult<()> {
    print!("{}", render(value)?);
    Ok(())
}
