use std::fs;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::{Credential, CredentialStore, TokenGrant};
use crate::cli::AuthCommand;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::time::{self, RawInstant};

#[derive(Debug, Serialize)]
pub struct AuthStatus {
    pub profile: String,
    pub key: String,
    pub state: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub expires_in_seconds: Option<i64>,
    pub has_refresh_token: bool,
    pub scope: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LogoutStatus {
    pub profile: String,
    pub key: String,
    pub removed: bool,
}

pub async fn run(ctx: &AppContext, command: AuthCommand) -> AppResult<()> {
    let key = ctx.credential_key();

    match command {
        AuthCommand::Status => {
            let Some(credential) = ctx.credentials.store().load(&key)? else {
                let status = AuthStatus {
                    profile: ctx.profile.clone(),
                    key: key.to_string(),
                    state: "missing".to_string(),
                    expires_at: None,
                    expires_in_seconds: None,
                    has_refresh_token: false,
                    scope: Vec::new(),
                };
                let text = format!(
                    "{}: no credential for {key}. run `insights auth import <grant.json>`",
                    ctx.profile
                );
                return ctx.output.emit(&text, &status);
            };

            let state = ctx.credentials.state(&key)?;
            let status = describe(ctx, &credential, state.as_str())?;
            ctx.output.emit(&status_line(&status), &status)
        }
        AuthCommand::Refresh => {
            let credential = ctx.credentials.force_refresh(&key).await?;
            let status = describe(ctx, &credential, "valid")?;
            let text = format!("{}: refreshed, {}", ctx.profile, expiry_text(&status));
            ctx.output.emit(&text, &status)
        }
        AuthCommand::Import(args) => {
            let raw = fs::read_to_string(&args.grant).map_err(|err| {
                AppError::InvalidInput(format!("unable to read {}: {err}", args.grant.display()))
            })?;
            let grant: TokenGrant = serde_json::from_str(&raw)?;
            let credential = ctx.credentials.store_grant(key.clone(), grant).await?;
            let state = ctx.credentials.state(&key)?;
            let status = describe(ctx, &credential, state.as_str())?;
            let text = format!("{}: imported credential for {key}, {}", ctx.profile, expiry_text(&status));
            ctx.output.emit(&text, &status)
        }
        AuthCommand::ExpireAt(args) => {
            let raw = parse_expiry_arg(&args.value);
            let credential = ctx.credentials.override_expiry(&key, raw.as_ref()).await?;
            let state = ctx.credentials.state(&key)?;
            let status = describe(ctx, &credential, state.as_str())?;
            let text = format!("{}: {}", ctx.profile, expiry_text(&status));
            ctx.output.emit(&text, &status)
        }
        AuthCommand::Logout => {
            ctx.credentials.forget(&key)?;
            let status = LogoutStatus {
                profile: ctx.profile.clone(),
                key: key.to_string(),
                removed: true,
            };
            let text = format!("{}: removed credential for {key}", ctx.profile);
            ctx.output.emit(&text, &status)
        }
    }
}

/// `never` (or `none`) clears the expiry; anything else goes through the
/// normal timestamp rules.
fn parse_expiry_arg(value: &str) -> Option<RawInstant> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("never") || trimmed.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(RawInstant::Text(trimmed.to_string()))
}

fn describe(ctx: &AppContext, credential: &Credential, state: &str) -> AppResult<AuthStatus> {
    let now = Utc::now();
    let expires_at = credential
        .expires_at()
        .map(time::instant_from_seconds)
        .transpose()?;

    Ok(AuthStatus {
        profile: ctx.profile.clone(),
        key: credential.key.to_string(),
        state: state.to_string(),
        expires_at,
        expires_in_seconds: credential.expires_in_seconds(now),
        has_refresh_token: credential.has_refresh_token(),
        scope: credential.scope.iter().cloned().collect(),
    })
}

fn status_line(status: &AuthStatus) -> String {
    let refresh_hint = if status.has_refresh_token {
        " (refresh available)"
    } else {
        " (no refresh token)"
    };
    format!(
        "{}: {} {}, {}{}",
        status.profile,
        status.key,
        status.state,
        expiry_text(status),
        refresh_hint
    )
}

fn expiry_text(status: &AuthStatus) -> String {
    match (status.expires_at, status.expires_in_seconds) {
        (Some(at), Some(seconds)) if seconds >= 0 => {
            format!("expires {} (in {} min)", at.to_rfc3339(), seconds / 60)
        }
        (Some(at), _) => format!("expired at {}", at.to_rfc3339()),
        _ => "no expiry recorded".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppPaths;

    fn status(expires_in_seconds: Option<i64>) -> AuthStatus {
        AuthStatus {
            profile: "default".to_string(),
            key: "google/me@co.com".to_string(),
            state: "valid".to_string(),
            expires_at: expires_in_seconds.map(|_| DateTime::<Utc>::UNIX_EPOCH),
            expires_in_seconds,
            has_refresh_token: true,
            scope: Vec::new(),
        }
    }

    #[tokio::test]
    async fn status_reads_the_stored_credential() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::rooted(dir.path().join("config"), dir.path().join("data")).expect("paths");
        let ctx = AppContext::with_paths("default".to_string(), true, paths).expect("context");

        run(&ctx, AuthCommand::Status).await.expect("status without credential");

        let grant: TokenGrant = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":3600}"#,
        )
        .expect("grant");
        ctx.credentials
            .store_grant(ctx.credential_key(), grant)
            .await
            .expect("store grant");

        run(&ctx, AuthCommand::Status).await.expect("status with credential");
        let stored = ctx.credentials.store().load(&ctx.credential_key()).expect("load");
        assert!(stored.is_some_and(|credential| credential.has_refresh_token()));
    }

    #[test]
    fn never_clears_expiry() {
        assert!(parse_expiry_arg("never").is_none());
        assert!(parse_expiry_arg(" NONE ").is_none());
        assert!(matches!(
            parse_expiry_arg("1700000000000"),
            Some(RawInstant::Text(value)) if value == "1700000000000"
        ));
    }

    #[test]
    fn describes_expiry_states() {
        assert!(expiry_text(&status(Some(600))).contains("in 10 min"));
        assert!(expiry_text(&status(Some(-5))).starts_with("expired at"));
        assert_eq!(expiry_text(&status(None)), "no expiry recorded");
    }

    #[test]
    fn status_line_mentions_refresh_availability() {
        let line = status_line(&status(Some(600)));
        assert!(line.starts_with("default: google/me@co.com valid"));
        assert!(line.ends_with("(refresh available)"));
    }
}
