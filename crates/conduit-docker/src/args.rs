//! Translation of `docker run` flags into container create options.
//!
//! The translator is table driven: every supported flag is one [`FlagSpec`]
//! entry whose `apply` function folds a value into [`ContainerCreateOptions`].
//! Anything the table does not know, a flag missing its value, or a value
//! that does not parse is collected into the `unsupported` list rather than
//! dropped, so callers can refuse the whole configuration at once.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{DockerError, DockerResult};

/// Kind of a `--mount` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// Host path bind mount.
    Bind,
    /// Named or anonymous volume.
    Volume,
    /// In-memory tmpfs.
    Tmpfs,
}

/// A structured `--mount` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountSpec {
    /// Mount type.
    pub kind: MountKind,
    /// Host path or volume name.
    pub source: Option<String>,
    /// Path inside the container.
    pub target: String,
    /// Mount read-only.
    pub read_only: bool,
    /// Bind propagation mode (`rprivate`, `shared`, ...).
    pub bind_propagation: Option<String>,
    /// Do not copy image data into a fresh volume.
    pub volume_nocopy: bool,
    /// tmpfs size in bytes.
    pub tmpfs_size: Option<i64>,
    /// tmpfs file mode.
    pub tmpfs_mode: Option<i64>,
    /// Consistency requirement (macOS).
    pub consistency: Option<String>,
}

/// A `--gpus` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuRequest {
    /// Every GPU.
    All,
    /// A number of GPUs.
    Count(i64),
    /// Specific device ids.
    Devices(Vec<String>),
}

/// Host-level options (Docker's `HostConfig`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostOptions {
    /// `-v` bind strings, passed through verbatim.
    pub binds: Vec<String>,
    /// `--mount` entries.
    pub mounts: Vec<MountSpec>,
    /// `--tmpfs` path → options.
    pub tmpfs: BTreeMap<String, String>,
    /// `--network`.
    pub network_mode: Option<String>,
    /// `--privileged`.
    pub privileged: bool,
    /// `--shm-size` in bytes.
    pub shm_size: Option<i64>,
    /// `--add-host` entries as `host:ip`.
    pub extra_hosts: Vec<String>,
    /// `--security-opt`.
    pub security_opt: Vec<String>,
    /// `--sysctl` key → value.
    pub sysctls: BTreeMap<String, String>,
    /// `--cap-add`.
    pub cap_add: Vec<String>,
    /// `--cap-drop`.
    pub cap_drop: Vec<String>,
    /// `--ipc`.
    pub ipc_mode: Option<String>,
    /// `--pid`.
    pub pid_mode: Option<String>,
    /// `--gpus`.
    pub gpus: Option<GpuRequest>,
}

/// Fully resolved options used to create a container.
///
/// Everything here except `remove_on_exit` participates in the container
/// signature (see [`crate::signature`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerCreateOptions {
    /// Image reference.
    pub image: String,
    /// Command passed to the entrypoint.
    pub cmd: Vec<String>,
    /// `--entrypoint` override.
    pub entrypoint: Option<Vec<String>>,
    /// `KEY=VALUE` environment entries, in order.
    pub env: Vec<String>,
    /// `--user`.
    pub user: Option<String>,
    /// `--workdir`.
    pub working_dir: Option<String>,
    /// `--label` entries.
    pub labels: BTreeMap<String, String>,
    /// `-i`.
    pub interactive: bool,
    /// `-t`.
    pub tty: bool,
    /// Host configuration.
    pub host: HostOptions,
    /// `--rm`: remove the container once it stops. Lifecycle policy, not part of the signature.
    #[serde(skip)]
    pub remove_on_exit: bool,
}

/// Result of translating a flag list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslatedArgs {
    /// Options accumulated from every supported flag.
    pub options: ContainerCreateOptions,
    /// Offending flags, verbatim, in input order.
    pub unsupported: Vec<String>,
}

impl TranslatedArgs {
    /// Fail if anything could not be translated.
    pub fn into_result(self) -> DockerResult<ContainerCreateOptions> {
        if self.unsupported.is_empty() {
            Ok(self.options)
        } else {
            Err(DockerError::UnsupportedArgs(self.unsupported))
        }
    }
}

type Apply = fn(&mut ContainerCreateOptions, &str) -> Result<(), String>;

/// One supported flag.
struct FlagSpec {
    long: &'static str,
    short: Option<char>,
    aliases: &'static [&'static str],
    takes_value: bool,
    apply: Apply,
}

impl FlagSpec {
    fn matches_long(&self, name: &str) -> bool {
        self.long == name || self.aliases.contains(&name)
    }
}

const FLAGS: &[FlagSpec] = &[
    FlagSpec { long: "rm", short: None, aliases: &[], takes_value: false, apply: |o, _| { o.remove_on_exit = true; Ok(()) } },
    FlagSpec { long: "interactive", short: Some('i'), aliases: &[], takes_value: false, apply: |o, _| { o.interactive = true; Ok(()) } },
    FlagSpec { long: "tty", short: Some('t'), aliases: &[], takes_value: false, apply: |o, _| { o.tty = true; Ok(()) } },
    FlagSpec { long: "privileged", short: None, aliases: &[], takes_value: false, apply: |o, _| { o.host.privileged = true; Ok(()) } },
    FlagSpec { long: "mount", short: None, aliases: &[], takes_value: true, apply: apply_mount },
    FlagSpec { long: "volume", short: Some('v'), aliases: &[], takes_value: true, apply: apply_volume },
    FlagSpec { long: "tmpfs", short: None, aliases: &[], takes_value: true, apply: apply_tmpfs },
    FlagSpec { long: "env", short: Some('e'), aliases: &[], takes_value: true, apply: apply_env },
    FlagSpec { long: "env-file", short: None, aliases: &[], takes_value: true, apply: apply_env_file },
    FlagSpec { long: "network", short: None, aliases: &["net"], takes_value: true, apply: |o, v| { o.host.network_mode = Some(non_empty(v)?); Ok(()) } },
    FlagSpec { long: "user", short: Some('u'), aliases: &[], takes_value: true, apply: |o, v| { o.user = Some(non_empty(v)?); Ok(()) } },
    FlagSpec { long: "workdir", short: Some('w'), aliases: &[], takes_value: true, apply: |o, v| { o.working_dir = Some(non_empty(v)?); Ok(()) } },
    FlagSpec { long: "entrypoint", short: None, aliases: &[], takes_value: true, apply: apply_entrypoint },
    FlagSpec { long: "gpus", short: None, aliases: &[], takes_value: true, apply: |o, v| { o.host.gpus = Some(parse_gpus(v)?); Ok(()) } },
    FlagSpec { long: "shm-size", short: None, aliases: &[], takes_value: true, apply: |o, v| { o.host.shm_size = Some(parse_byte_size(v)?); Ok(()) } },
    FlagSpec { long: "add-host", short: None, aliases: &[], takes_value: true, apply: apply_add_host },
    FlagSpec { long: "security-opt", short: None, aliases: &[], takes_value: true, apply: |o, v| { o.host.security_opt.push(non_empty(v)?); Ok(()) } },
    FlagSpec { long: "sysctl", short: None, aliases: &[], takes_value: true, apply: apply_sysctl },
    FlagSpec { long: "cap-add", short: None, aliases: &[], takes_value: true, apply: |o, v| { o.host.cap_add.push(non_empty(v)?); Ok(()) } },
    FlagSpec { long: "cap-drop", short: None, aliases: &[], takes_value: true, apply: |o, v| { o.host.cap_drop.push(non_empty(v)?); Ok(()) } },
    FlagSpec { long: "ipc", short: None, aliases: &[], takes_value: true, apply: |o, v| { o.host.ipc_mode = Some(non_empty(v)?); Ok(()) } },
    FlagSpec { long: "pid", short: None, aliases: &[], takes_value: true, apply: |o, v| { o.host.pid_mode = Some(non_empty(v)?); Ok(()) } },
    FlagSpec { long: "name", short: None, aliases: &[], takes_value: true, apply: apply_name },
    FlagSpec { long: "label", short: Some('l'), aliases: &[], takes_value: true, apply: apply_label },
];

fn lookup_long(name: &str) -> Option<&'static FlagSpec> {
    FLAGS.iter().find(|f| f.matches_long(name))
}

fn lookup_short(c: char) -> Option<&'static FlagSpec> {
    FLAGS.iter().find(|f| f.short == Some(c))
}

/// Whether `token` names a flag this translator knows.
fn is_known_flag(token: &str) -> bool {
    if let Some(body) = token.strip_prefix("--") {
        let name = body.split_once('=').map_or(body, |(name, _)| name);
        return lookup_long(name).is_some();
    }
    token
        .strip_prefix('-')
        .and_then(|body| body.chars().next())
        .is_some_and(|c| lookup_short(c).is_some())
}

/// Translate a `docker run` flag list.
pub fn translate_args(args: &[String]) -> TranslatedArgs {
    let mut translated = TranslatedArgs::default();
    let mut index = 0;
    while index < args.len() {
        match translate_flag(args, index, &mut translated.options) {
            Ok(next) => index = next,
            Err((offending, next)) => {
                translated.unsupported.push(offending);
                index = next;
            }
        }
    }
    translated
}

/// Translate the flag at `index`, returning the index of the next unread argument.
///
/// On failure returns the offending text and the index to resume from.
fn translate_flag(
    args: &[String],
    index: usize,
    options: &mut ContainerCreateOptions,
) -> Result<usize, (String, usize)> {
    let raw = args[index].as_str();
    let next = index + 1;

    if let Some(body) = raw.strip_prefix("--") {
        let (name, inline) = match body.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (body, None),
        };
        let Some(spec) = lookup_long(name) else {
            return Err(unknown_flag(args, index, inline.is_some()));
        };
        return apply_spec(spec, raw, inline, args, next, options);
    }

    if let Some(body) = raw.strip_prefix('-').filter(|b| !b.is_empty()) {
        let mut chars = body.chars();
        let Some(first) = chars.next() else {
            return Err((raw.to_string(), next));
        };
        let rest = chars.as_str();
        let Some(spec) = lookup_short(first) else {
            return Err(unknown_flag(args, index, false));
        };

        if spec.takes_value {
            let inline = if rest.is_empty() {
                None
            } else {
                Some(rest.strip_prefix('=').unwrap_or(rest))
            };
            return apply_spec(spec, raw, inline, args, next, options);
        }

        // grouped boolean shorthands such as -it
        let mut group = vec![spec];
        for c in rest.chars() {
            match lookup_short(c) {
                Some(s) if !s.takes_value => group.push(s),
                _ => return Err((raw.to_string(), next)),
            }
        }
        for s in group {
            (s.apply)(options, "").map_err(|e| (format!("{raw} ({e})"), next))?;
        }
        return Ok(next);
    }

    Err((raw.to_string(), next))
}

fn apply_spec(
    spec: &FlagSpec,
    raw: &str,
    inline: Option<&str>,
    args: &[String],
    next: usize,
    options: &mut ContainerCreateOptions,
) -> Result<usize, (String, usize)> {
    if !spec.takes_value {
        return match inline.map(parse_bool) {
            None | Some(Some(true)) => {
                (spec.apply)(options, "").map_err(|e| (format!("{raw} ({e})"), next))?;
                Ok(next)
            }
            Some(Some(false)) => Ok(next),
            Some(None) => Err((raw.to_string(), next)),
        };
    }

    let (value, resume, shown) = match inline {
        Some(value) => (value, next, raw.to_string()),
        None => match args.get(next) {
            Some(value) if !is_known_flag(value) => {
                (value.as_str(), next + 1, format!("{raw} {value}"))
            }
            _ => return Err((format!("{raw} (missing value)"), next)),
        },
    };

    (spec.apply)(options, value).map_err(|e| (format!("{shown} ({e})"), resume))?;
    Ok(resume)
}

/// An unknown flag swallows a following non-flag token as its value so the
/// value is reported together with the flag instead of as a stray argument.
fn unknown_flag(args: &[String], index: usize, has_inline: bool) -> (String, usize) {
    let raw = &args[index];
    match args.get(index + 1) {
        Some(value) if !has_inline && !value.starts_with('-') => {
            (format!("{raw} {value}"), index + 2)
        }
        _ => (raw.clone(), index + 1),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn non_empty(value: &str) -> Result<String, String> {
    if value.trim().is_empty() {
        Err("empty value".to_string())
    } else {
        Ok(value.to_string())
    }
}

fn apply_mount(options: &mut ContainerCreateOptions, value: &str) -> Result<(), String> {
    options.host.mounts.push(parse_mount(value)?);
    Ok(())
}

/// Parse a `--mount` value such as `type=bind,source=/a,target=/b,readonly`.
pub fn parse_mount(value: &str) -> Result<MountSpec, String> {
    let mut kind = MountKind::Volume;
    let mut source = None;
    let mut target = None;
    let mut read_only = false;
    let mut bind_propagation = None;
    let mut volume_nocopy = false;
    let mut tmpfs_size = None;
    let mut tmpfs_mode = None;
    let mut consistency = None;

    for field in value.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        let (key, val) = match field.split_once('=') {
            Some((k, v)) => (k.trim().to_ascii_lowercase(), Some(v.trim())),
            None => (field.to_ascii_lowercase(), None),
        };
        match (key.as_str(), val) {
            ("type", Some(v)) => {
                kind = match v {
                    "bind" => MountKind::Bind,
                    "volume" => MountKind::Volume,
                    "tmpfs" => MountKind::Tmpfs,
                    other => return Err(format!("unsupported mount type '{other}'")),
                }
            }
            ("source" | "src", Some(v)) => source = Some(v.to_string()),
            ("target" | "destination" | "dst", Some(v)) => target = Some(v.to_string()),
            ("readonly" | "ro", None) => read_only = true,
            ("readonly" | "ro", Some(v)) => {
                read_only = parse_bool(v).ok_or_else(|| format!("invalid readonly value '{v}'"))?
            }
            ("bind-propagation", Some(v)) => bind_propagation = Some(v.to_string()),
            ("volume-nocopy", None) => volume_nocopy = true,
            ("volume-nocopy", Some(v)) => {
                volume_nocopy =
                    parse_bool(v).ok_or_else(|| format!("invalid volume-nocopy value '{v}'"))?
            }
            ("tmpfs-size", Some(v)) => tmpfs_size = Some(parse_byte_size(v)?),
            ("tmpfs-mode", Some(v)) => {
                tmpfs_mode = Some(
                    i64::from_str_radix(v.trim_start_matches("0o"), 8)
                        .map_err(|_| format!("invalid tmpfs-mode '{v}'"))?,
                )
            }
            ("consistency", Some(v)) => consistency = Some(v.to_string()),
            (other, _) => return Err(format!("unsupported mount option '{other}'")),
        }
    }

    let target = target.ok_or_else(|| "mount target is required".to_string())?;
    if kind == MountKind::Bind && source.is_none() {
        return Err("bind mount requires a source".to_string());
    }

    Ok(MountSpec {
        kind,
        source,
        target,
        read_only,
        bind_propagation,
        volume_nocopy,
        tmpfs_size,
        tmpfs_mode,
        consistency,
    })
}

fn apply_volume(options: &mut ContainerCreateOptions, value: &str) -> Result<(), String> {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 || parts[0].is_empty() || parts[1].is_empty() {
        return Err("expected source:target[:options]".to_string());
    }
    options.host.binds.push(value.to_string());
    Ok(())
}

fn apply_tmpfs(options: &mut ContainerCreateOptions, value: &str) -> Result<(), String> {
    let (path, opts) = value.split_once(':').unwrap_or((value, ""));
    if !path.starts_with('/') {
        return Err("tmpfs path must be absolute".to_string());
    }
    options
        .host
        .tmpfs
        .insert(path.to_string(), opts.to_string());
    Ok(())
}

fn apply_env(options: &mut ContainerCreateOptions, value: &str) -> Result<(), String> {
    if let Some(entry) = env_entry(value)? {
        options.env.push(entry);
    }
    Ok(())
}

/// `KEY=VALUE` passes through; a bare `KEY` takes the current process value or is skipped.
fn env_entry(value: &str) -> Result<Option<String>, String> {
    let key = value.split('=').next().unwrap_or_default();
    if key.trim().is_empty() {
        return Err("empty variable name".to_string());
    }
    if value.contains('=') {
        return Ok(Some(value.to_string()));
    }
    Ok(std::env::var(key).ok().map(|v| format!("{key}={v}")))
}

fn apply_env_file(options: &mut ContainerCreateOptions, value: &str) -> Result<(), String> {
    let contents = std::fs::read_to_string(Path::new(value))
        .map_err(|e| format!("cannot read env file: {e}"))?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(entry) = env_entry(line)? {
            options.env.push(entry);
        }
    }
    Ok(())
}

fn apply_entrypoint(options: &mut ContainerCreateOptions, value: &str) -> Result<(), String> {
    // an empty entrypoint resets the image default
    options.entrypoint = Some(if value.is_empty() {
        Vec::new()
    } else {
        vec![value.to_string()]
    });
    Ok(())
}

fn apply_add_host(options: &mut ContainerCreateOptions, value: &str) -> Result<(), String> {
    let (host, ip) = value
        .split_once('=')
        .or_else(|| value.split_once(':'))
        .ok_or_else(|| "expected host:ip".to_string())?;
    if host.is_empty() || ip.is_empty() {
        return Err("expected host:ip".to_string());
    }
    options.host.extra_hosts.push(format!("{host}:{ip}"));
    Ok(())
}

fn apply_sysctl(options: &mut ContainerCreateOptions, value: &str) -> Result<(), String> {
    let (key, val) = value
        .split_once('=')
        .ok_or_else(|| "expected key=value".to_string())?;
    if key.is_empty() {
        return Err("expected key=value".to_string());
    }
    options.host.sysctls.insert(key.to_string(), val.to_string());
    Ok(())
}

fn apply_label(options: &mut ContainerCreateOptions, value: &str) -> Result<(), String> {
    let (key, val) = value.split_once('=').unwrap_or((value, ""));
    if key.is_empty() {
        return Err("empty label key".to_string());
    }
    options.labels.insert(key.to_string(), val.to_string());
    Ok(())
}

fn apply_name(_options: &mut ContainerCreateOptions, value: &str) -> Result<(), String> {
    tracing::debug!(name = %value, "ignoring --name, container name comes from configuration");
    Ok(())
}

/// Parse a `--gpus` value: `all`, a count, `device=0,1` or `count=N`.
pub fn parse_gpus(value: &str) -> Result<GpuRequest, String> {
    let value = value.trim().trim_matches('"').trim_matches('\'');
    if value.eq_ignore_ascii_case("all") || value.eq_ignore_ascii_case("count=all") {
        return Ok(GpuRequest::All);
    }
    if let Some(ids) = value.strip_prefix("device=") {
        let ids: Vec<String> = ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if ids.is_empty() {
            return Err("no gpu device ids".to_string());
        }
        return Ok(GpuRequest::Devices(ids));
    }
    let count = value.strip_prefix("count=").unwrap_or(value);
    match count.parse::<i64>() {
        Ok(n) if n > 0 => Ok(GpuRequest::Count(n)),
        _ => Err(format!("invalid gpu request '{value}'")),
    }
}

/// Parse a byte size with an optional `b`/`k`/`m`/`g`/`t`/`p`/`e` suffix (powers of 1024).
pub fn parse_byte_size(value: &str) -> Result<i64, String> {
    let trimmed = value.trim().to_ascii_lowercase();
    let digits_end = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(digits_end);
    let number: f64 = number
        .parse()
        .map_err(|_| format!("invalid size '{value}'"))?;

    let unit = suffix.strip_suffix('b').filter(|s| !s.is_empty()).unwrap_or(suffix);
    let exponent = match unit {
        "" | "b" => 0,
        "k" => 1,
        "m" => 2,
        "g" => 3,
        "t" => 4,
        "p" => 5,
        "e" => 6,
        _ => return Err(format!("invalid size suffix in '{value}'")),
    };

    let bytes = number * 1024f64.powi(exponent);
    if !bytes.is_finite() || bytes < 0.0 || bytes > i64::MAX as f64 {
        return Err(format!("size out of range '{value}'"));
    }
    Ok(bytes as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn translate(list: &[&str]) -> TranslatedArgs {
        translate_args(&args(list))
    }

    #[test]
    fn test_empty_args() {
        let t = translate(&[]);
        assert!(t.unsupported.is_empty());
        assert_eq!(t.options, ContainerCreateOptions::default());
    }

    #[test]
    fn test_boolean_flags() {
        let t = translate(&["--rm", "-i", "-t", "--privileged"]);
        assert!(t.unsupported.is_empty());
        assert!(t.options.remove_on_exit);
        assert!(t.options.interactive);
        assert!(t.options.tty);
        assert!(t.options.host.privileged);
    }

    #[test]
    fn test_grouped_short_flags() {
        let t = translate(&["-it"]);
        assert!(t.unsupported.is_empty());
        assert!(t.options.interactive && t.options.tty);

        let t = translate(&["-ti"]);
        assert!(t.options.interactive && t.options.tty);

        let t = translate(&["-ix"]);
        assert_eq!(t.unsupported, vec!["-ix"]);
    }

    #[test]
    fn test_boolean_with_inline_value() {
        let t = translate(&["--privileged=false", "--rm=true"]);
        assert!(t.unsupported.is_empty());
        assert!(!t.options.host.privileged);
        assert!(t.options.remove_on_exit);

        let t = translate(&["--rm=maybe"]);
        assert_eq!(t.unsupported, vec!["--rm=maybe"]);
    }

    #[test]
    fn test_bind_mount_readonly() {
        let t = translate(&["--mount", "type=bind,source=/a,target=/b,readonly"]);
        assert!(t.unsupported.is_empty());
        let mount = &t.options.host.mounts[0];
        assert_eq!(mount.kind, MountKind::Bind);
        assert_eq!(mount.source.as_deref(), Some("/a"));
        assert_eq!(mount.target, "/b");
        assert!(mount.read_only);
    }

    #[test]
    fn test_mount_variants() {
        let m = parse_mount("type=volume,src=data,dst=/data,volume-nocopy").unwrap();
        assert_eq!(m.kind, MountKind::Volume);
        assert!(m.volume_nocopy);
        assert!(!m.read_only);

        let m = parse_mount("type=tmpfs,target=/scratch,tmpfs-size=64m,tmpfs-mode=1770").unwrap();
        assert_eq!(m.kind, MountKind::Tmpfs);
        assert_eq!(m.tmpfs_size, Some(64 * 1024 * 1024));
        assert_eq!(m.tmpfs_mode, Some(0o1770));

        let m = parse_mount("type=bind,source=/a,target=/b,ro=false,bind-propagation=rshared").unwrap();
        assert!(!m.read_only);
        assert_eq!(m.bind_propagation.as_deref(), Some("rshared"));

        assert!(parse_mount("type=bind,target=/b").is_err());
        assert!(parse_mount("type=bind,source=/a").is_err());
        assert!(parse_mount("type=npipe,source=a,target=b").is_err());
        assert!(parse_mount("type=bind,source=/a,target=/b,bogus=1").is_err());
    }

    #[test]
    fn test_volume_flag() {
        let t = translate(&["-v", "/host:/container:ro", "--volume=/x:/y"]);
        assert!(t.unsupported.is_empty());
        assert_eq!(t.options.host.binds, vec!["/host:/container:ro", "/x:/y"]);

        let t = translate(&["-v", "/only"]);
        assert_eq!(t.unsupported.len(), 1);
        assert!(t.unsupported[0].starts_with("-v /only"));
    }

    #[test]
    fn test_tmpfs_flag() {
        let t = translate(&["--tmpfs", "/run:rw,size=64m", "--tmpfs=/tmp"]);
        assert!(t.unsupported.is_empty());
        assert_eq!(t.options.host.tmpfs.get("/run").map(String::as_str), Some("rw,size=64m"));
        assert_eq!(t.options.host.tmpfs.get("/tmp").map(String::as_str), Some(""));
    }

    #[test]
    fn test_env_flags() {
        let t = translate(&["-e", "A=1", "--env=B=two", "-eC=3"]);
        assert!(t.unsupported.is_empty());
        assert_eq!(t.options.env, vec!["A=1", "B=two", "C=3"]);
    }

    #[test]
    fn test_env_passthrough_of_unset_variable_is_skipped() {
        let t = translate(&["-e", "CONDUIT_TEST_SURELY_UNSET_VARIABLE_42"]);
        assert!(t.unsupported.is_empty());
        assert!(t.options.env.is_empty());
    }

    #[test]
    fn test_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.env");
        std::fs::write(&path, "# comment\nFOO=bar\n\nBAZ=qux=1\n").unwrap();

        let t = translate(&["--env-file", path.to_str().unwrap()]);
        assert!(t.unsupported.is_empty());
        assert_eq!(t.options.env, vec!["FOO=bar", "BAZ=qux=1"]);

        let t = translate(&["--env-file", "/definitely/not/here.env"]);
        assert_eq!(t.unsupported.len(), 1);
        assert!(t.unsupported[0].contains("cannot read env file"));
    }

    #[test]
    fn test_scalar_flags() {
        let t = translate(&[
            "--network", "host",
            "-u", "1000:1000",
            "-w", "/work",
            "--ipc=host",
            "--pid", "host",
            "--net=bridge",
        ]);
        assert!(t.unsupported.is_empty());
        // later --net overrides --network
        assert_eq!(t.options.host.network_mode.as_deref(), Some("bridge"));
        assert_eq!(t.options.user.as_deref(), Some("1000:1000"));
        assert_eq!(t.options.working_dir.as_deref(), Some("/work"));
        assert_eq!(t.options.host.ipc_mode.as_deref(), Some("host"));
        assert_eq!(t.options.host.pid_mode.as_deref(), Some("host"));
    }

    #[test]
    fn test_entrypoint() {
        let t = translate(&["--entrypoint", "/bin/server"]);
        assert_eq!(t.options.entrypoint, Some(vec!["/bin/server".to_string()]));

        let t = translate(&["--entrypoint="]);
        assert!(t.unsupported.is_empty());
        assert_eq!(t.options.entrypoint, Some(Vec::new()));
    }

    #[test]
    fn test_gpus() {
        assert_eq!(parse_gpus("all").unwrap(), GpuRequest::All);
        assert_eq!(parse_gpus("2").unwrap(), GpuRequest::Count(2));
        assert_eq!(parse_gpus("count=3").unwrap(), GpuRequest::Count(3));
        assert_eq!(
            parse_gpus("\"device=0,2\"").unwrap(),
            GpuRequest::Devices(vec!["0".into(), "2".into()])
        );
        assert!(parse_gpus("device=").is_err());
        assert!(parse_gpus("0").is_err());
        assert!(parse_gpus("lots").is_err());

        let t = translate(&["--gpus", "all"]);
        assert_eq!(t.options.host.gpus, Some(GpuRequest::All));
    }

    #[test]
    fn test_byte_sizes() {
        assert_eq!(parse_byte_size("512").unwrap(), 512);
        assert_eq!(parse_byte_size("512b").unwrap(), 512);
        assert_eq!(parse_byte_size("1k").unwrap(), 1024);
        assert_eq!(parse_byte_size("64m").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_byte_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_byte_size("1gb").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_byte_size("1t").unwrap(), 1024_i64.pow(4));
        assert_eq!(parse_byte_size("1p").unwrap(), 1024_i64.pow(5));
        assert_eq!(parse_byte_size("1e").unwrap(), 1024_i64.pow(6));
        assert!(parse_byte_size("10x").is_err());
        assert!(parse_byte_size("m").is_err());
        assert!(parse_byte_size("100e").is_err());

        let t = translate(&["--shm-size=2g"]);
        assert_eq!(t.options.host.shm_size, Some(2 * 1024 * 1024 * 1024));
    }

    #[test]
    fn test_list_flags() {
        let t = translate(&[
            "--add-host", "db:10.0.0.5",
            "--add-host=cache=10.0.0.6",
            "--security-opt", "no-new-privileges",
            "--sysctl", "net.core.somaxconn=1024",
            "--cap-add", "NET_ADMIN",
            "--cap-drop=ALL",
            "-l", "team=tools",
            "--label", "flag",
        ]);
        assert!(t.unsupported.is_empty(), "{:?}", t.unsupported);
        assert_eq!(t.options.host.extra_hosts, vec!["db:10.0.0.5", "cache:10.0.0.6"]);
        assert_eq!(t.options.host.security_opt, vec!["no-new-privileges"]);
        assert_eq!(
            t.options.host.sysctls.get("net.core.somaxconn").map(String::as_str),
            Some("1024")
        );
        assert_eq!(t.options.host.cap_add, vec!["NET_ADMIN"]);
        assert_eq!(t.options.host.cap_drop, vec!["ALL"]);
        assert_eq!(t.options.labels.get("team").map(String::as_str), Some("tools"));
        assert_eq!(t.options.labels.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn test_name_is_ignored() {
        let t = translate(&["--name", "whatever", "--rm"]);
        assert!(t.unsupported.is_empty());
        assert!(t.options.remove_on_exit);
    }

    #[test]
    fn test_unknown_flags_are_collected() {
        let t = translate(&["--foo=bar", "--rm", "-d", "--cpus", "2", "stray"]);
        assert_eq!(t.unsupported, vec!["--foo=bar", "-d", "--cpus 2", "stray"]);
        assert!(t.options.remove_on_exit);

        let err = t.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--foo=bar"));
        assert!(msg.contains("--cpus 2"));
    }

    #[test]
    fn test_missing_value_is_unsupported() {
        let t = translate(&["-e"]);
        assert_eq!(t.unsupported, vec!["-e (missing value)"]);

        let t = translate(&["--network", "--rm"]);
        assert_eq!(t.unsupported, vec!["--network (missing value)"]);
        assert!(t.options.remove_on_exit);
    }

    #[test]
    fn test_dash_prefixed_values() {
        let t = translate(&["-e", "-X=1", "--workdir", "-"]);
        assert!(t.unsupported.is_empty(), "{:?}", t.unsupported);
        assert_eq!(t.options.env, vec!["-X=1"]);

        // a known flag where a value belongs is still a missing value
        let t = translate(&["-e", "-it"]);
        assert_eq!(t.unsupported, vec!["-e (missing value)"]);
        assert!(t.options.tty);
        assert!(t.options.interactive);
    }

    #[test]
    fn test_invalid_values_are_unsupported() {
        let t = translate(&["--shm-size", "lots", "--sysctl", "novalue", "--user="]);
        assert_eq!(t.unsupported.len(), 3);
        assert!(t.unsupported[0].starts_with("--shm-size lots"));
        assert!(t.unsupported[1].starts_with("--sysctl novalue"));
        assert!(t.unsupported[2].starts_with("--user="));
    }

    #[test]
    fn test_into_result_ok() {
        let options = translate(&["--rm", "-e", "A=1"]).into_result().unwrap();
        assert_eq!(options.env, vec!["A=1"]);
    }
}
