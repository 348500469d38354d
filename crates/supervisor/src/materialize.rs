//! Required config files: copy bundled defaults in, then pin a few keys to
//! the values from [`ServiceConfig`].

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::atomic;
use crate::config::ServiceConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::paths::CONFIG_INI;

/// How a key/value pair is spelled in a given file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStyle {
    /// `key = value`
    Ini,
    /// `key arg [param...];`, only the first argument is rewritten.
    Directive,
}

/// What a rewrite replaces in a directive's first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuePart {
    Whole,
    /// The port of `port`, `host:port` or `[v6]:port`. Unix sockets are left alone.
    Port,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyRewrite {
    pub key: String,
    pub value: String,
    pub part: ValuePart,
}

impl KeyRewrite {
    pub fn new(key: &str, value: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            part: ValuePart::Whole,
        }
    }

    /// Pin the port of `key`'s address and keep its host and parameters.
    pub fn port(key: &str, port: u16) -> Self {
        Self {
            part: ValuePart::Port,
            ..Self::new(key, port)
        }
    }
}

/// A config file that must exist, where its default comes from, and which
/// keys the supervisor owns inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredConfig {
    pub target: PathBuf,
    pub bundled_default: PathBuf,
    pub style: KeyStyle,
    pub rewrites: Vec<KeyRewrite>,
}

/// The config files this container needs.
pub fn required_configs(config: &ServiceConfig) -> Vec<RequiredConfig> {
    let web_conf_name = config
        .web_server_conf
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("nginx.conf"));

    vec![
        RequiredConfig {
            target: config.paths.config_file(),
            bundled_default: config.paths.defaults_dir().join(CONFIG_INI),
            style: KeyStyle::Ini,
            rewrites: vec![
                KeyRewrite::new("timeout", config.task_timeout),
                KeyRewrite::new("concurrent_threads", config.concurrency),
                KeyRewrite::new("filename", config.output_m3u()),
            ],
        },
        RequiredConfig {
            target: config.web_server_conf.clone(),
            bundled_default: config.paths.defaults_dir().join(web_conf_name),
            style: KeyStyle::Directive,
            rewrites: vec![KeyRewrite::port("listen", config.port)],
        },
    ]
}

/// Ensure each file exists and carries the owned key values.
pub async fn materialize(configs: &[RequiredConfig]) -> SupervisorResult<()> {
    for required in configs {
        ensure_present(&required.target, &required.bundled_default).await?;
        let changed = rewrite_keys(&required.target, required.style, &required.rewrites).await?;
        if changed {
            info!(path = %required.target.display(), "config keys updated");
        } else {
            debug!(path = %required.target.display(), "config keys already current");
        }
    }
    Ok(())
}

/// Copy `bundled_default` to `target` if `target` does not exist.
///
/// Returns `true` when a copy was made.
pub async fn ensure_present(target: &Path, bundled_default: &Path) -> SupervisorResult<bool> {
    if tokio::fs::try_exists(target).await? {
        return Ok(false);
    }
    if !tokio::fs::try_exists(bundled_default).await? {
        return Err(SupervisorError::ConfigMissing {
            target: target.to_path_buf(),
            default: bundled_default.to_path_buf(),
        });
    }
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(bundled_default, target).await?;
    info!(
        target = %target.display(),
        default = %bundled_default.display(),
        "copied bundled default config"
    );
    Ok(true)
}

/// Rewrite the given keys in place. Keys absent from the file are not added.
///
/// The file is replaced atomically and only when its content changes.
/// Returns `true` if the file was written.
pub async fn rewrite_keys(
    path: &Path,
    style: KeyStyle,
    rewrites: &[KeyRewrite],
) -> SupervisorResult<bool> {
    let original = tokio::fs::read_to_string(path).await?;
    let updated = apply_rewrites(&original, style, rewrites);
    if updated == original {
        return Ok(false);
    }

    atomic::write_file(path, updated.as_bytes()).await?;
    Ok(true)
}

/// Pure text transform behind [`rewrite_keys`].
pub fn apply_rewrites(content: &str, style: KeyStyle, rewrites: &[KeyRewrite]) -> String {
    let mut out = String::with_capacity(content.len());
    for segment in content.split_inclusive('\n') {
        let (line, newline) = match segment.strip_suffix('\n') {
            Some(l) => match l.strip_suffix('\r') {
                Some(l) => (l, "\r\n"),
                None => (l, "\n"),
            },
            None => (segment, ""),
        };
        let replaced = rewrites
            .iter()
            .find_map(|r| rewrite_line(line, style, r));
        out.push_str(replaced.as_deref().unwrap_or(line));
        out.push_str(newline);
    }
    out
}

fn rewrite_line(line: &str, style: KeyStyle, rewrite: &KeyRewrite) -> Option<String> {
    let (key, value) = (rewrite.key.as_str(), rewrite.value.as_str());
    let body = line.trim_start();
    if body.starts_with('#') || body.starts_with(';') {
        return None;
    }
    let rest = body.strip_prefix(key)?;
    let indent = line.strip_suffix(body).unwrap_or("");
    match style {
        KeyStyle::Ini => {
            if !rest.trim_start().starts_with('=') {
                return None;
            }
            Some(format!("{indent}{key} = {value}"))
        }
        KeyStyle::Directive => {
            if !rest.starts_with(char::is_whitespace) {
                return None;
            }
            let args = rest.trim_start();
            let end = args
                .find(|c: char| c.is_whitespace() || c == ';')
                .unwrap_or(args.len());
            let (current, tail) = (args.get(..end)?, args.get(end..)?);
            if current.is_empty() {
                return None;
            }
            let replaced = match rewrite.part {
                ValuePart::Whole => value.to_string(),
                ValuePart::Port => with_port(current, value)?,
            };
            Some(format!("{indent}{key} {replaced}{tail}"))
        }
    }
}

fn with_port(address: &str, port: &str) -> Option<String> {
    if address.starts_with("unix:") {
        return None;
    }
    if address.bytes().all(|b| b.is_ascii_digit()) {
        return Some(port.to_string());
    }
    let host = if address.starts_with('[') {
        let (inside, _) = address.split_once(']')?;
        format!("{inside}]")
    } else {
        address
            .rsplit_once(':')
            .map_or(address, |(host, _)| host)
            .to_string()
    };
    Some(format!("{host}:{port}"))
}
