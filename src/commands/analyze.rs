use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::cli::AnalyzeArgs;
use crate::config::settings::check_window_days;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::output::text;
use crate::service::FetchedBatch;

pub async fn run(ctx: &AppContext, args: AnalyzeArgs) -> AppResult<()> {
    let window_days = check_window_days(args.window.unwrap_or_else(|| ctx.settings.window_days()))?;

    let messages = read_records(&args.messages)?;
    let events = match args.events.as_deref() {
        Some(path) => read_records(path)?,
        None => Vec::new(),
    };
    let user_address = normalize_user(args.user).or_else(|| ctx.settings.user_address.clone());

    let service = ctx.analytics_service()?;
    let key = ctx.credential_key();
    let report = service
        .report_from_batch(
            &key.user_id,
            FetchedBatch { messages, events },
            window_days,
            user_address,
        )
        .await?;

    ctx.output.emit(&text::render_report(&report), &report)
}

/// Exports are either a bare JSON array or an object wrapping one under
/// `messages`, `events` or `items`.
fn read_records<T: DeserializeOwned>(path: &Path) -> AppResult<Vec<T>> {
    let raw = fs::read_to_string(path).map_err(|err| {
        AppError::InvalidInput(format!("unable to read {}: {err}", path.display()))
    })?;
    parse_records(&raw)
        .map_err(|err| AppError::InvalidInput(format!("{}: {err}", path.display())))
}

fn parse_records<T: DeserializeOwned>(raw: &str) -> AppResult<Vec<T>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let array = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(mut object) => ["messages", "events", "items"]
            .iter()
            .find_map(|field| object.remove(*field))
            .ok_or_else(|| {
                AppError::InvalidInput("expected an array of records".to_string())
            })?,
        _ => {
            return Err(AppError::InvalidInput(
                "expected an array of records".to_string(),
            ));
        }
    };

    Ok(serde_json::from_value(array)?)
}

fn normalize_user(user: Option<String>) -> Option<String> {
    user.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
