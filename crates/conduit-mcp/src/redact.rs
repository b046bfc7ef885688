//! Redaction of secrets and noise in logged values.
//!
//! - command lines: the value after `--api-key`, `--token`, `--auth`,
//!   `--password` or `--secret` (or attached with `=`) becomes `***`
//! - URLs: reduced to origin and path
//! - error text: embedded URLs reduced the same way, HTML collapsed to
//!   `[html omitted]`, then truncated

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Flags whose value is never logged.
pub const SECRET_FLAGS: &[&str] = &["--api-key", "--token", "--auth", "--password", "--secret"];

/// Mask placeholder.
pub const MASK: &str = "***";

/// Maximum length of a logged error, in characters.
pub const MAX_ERROR_CHARS: usize = 500;

/// Placeholder for collapsed HTML.
pub const HTML_PLACEHOLDER: &str = "[html omitted]";

fn is_secret_flag(flag: &str) -> bool {
    SECRET_FLAGS.iter().any(|s| s.eq_ignore_ascii_case(flag))
}

/// Mask secret values in an argument list.
pub fn args(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            out.push(MASK.to_string());
            mask_next = false;
            continue;
        }
        match arg.split_once('=') {
            Some((flag, _)) if is_secret_flag(flag) => out.push(format!("{flag}={MASK}")),
            _ => {
                mask_next = is_secret_flag(arg);
                out.push(arg.clone());
            }
        }
    }
    out
}

fn mask_env_value(assignment: &str) -> String {
    match assignment.split_once('=') {
        Some((key, _)) => format!("{key}={MASK}"),
        None => assignment.to_string(),
    }
}

/// Mask `docker run` flags: secret flags as in [`args`], plus the value
/// of every `-e`/`--env` assignment.
pub fn container_args(flags: &[String]) -> Vec<String> {
    let mut out = args(flags);
    let mut env_next = false;
    for arg in &mut out {
        if env_next {
            *arg = mask_env_value(arg);
            env_next = false;
        } else if arg.as_str() == "-e" || arg.as_str() == "--env" {
            env_next = true;
        } else if let Some(assignment) = arg.strip_prefix("--env=") {
            let masked = format!("--env={}", mask_env_value(assignment));
            *arg = masked;
        }
    }
    out
}

/// Render a command line for logging with secrets masked.
pub fn command_line(program: &str, arguments: &[String]) -> String {
    let masked = args(arguments);
    if masked.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", masked.join(" "))
    }
}

/// Reduce a URL to origin and path. Credentials, query and fragment are dropped.
pub fn url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(parsed) if parsed.has_host() => {
            format!("{}{}", parsed.origin().ascii_serialization(), parsed.path())
        }
        _ => {
            let end = raw.find(['?', '#']).unwrap_or(raw.len());
            let trimmed = &raw[..end];
            // drop userinfo from unparseable authority-style strings
            match (trimmed.find("://"), trimmed.rfind('@')) {
                (Some(scheme_end), Some(at)) if at > scheme_end => {
                    format!("{}{}", &trimmed[..scheme_end + 3], &trimmed[at + 1..])
                }
                _ => trimmed.to_string(),
            }
        }
    }
}

fn html_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?is)(?:<!doctype\s+html|<html\b).*?(?:</html\s*>|\z)").ok())
        .as_ref()
}

/// Collapse embedded HTML documents into a placeholder.
pub fn collapse_html(text: &str) -> String {
    match html_pattern() {
        Some(pattern) => pattern.replace_all(text, HTML_PLACEHOLDER).into_owned(),
        None => text.to_string(),
    }
}

fn url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(?i)\b[a-z][a-z0-9+.-]*://[^\s"'<>()]+"#).ok())
        .as_ref()
}

/// Reduce every URL embedded in `text` to origin and path.
pub fn urls_in(text: &str) -> String {
    match url_pattern() {
        Some(pattern) => pattern.replace_all(text, |caps: &regex::Captures<'_>| url(&caps[0])).into_owned(),
        None => text.to_string(),
    }
}

/// Truncate to at most `max` characters, marking the cut.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}... [truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

/// Prepare error text for logging or display.
pub fn error_text(text: &str) -> String {
    truncate(urls_in(&collapse_html(text)).trim(), MAX_ERROR_CHARS)
}
