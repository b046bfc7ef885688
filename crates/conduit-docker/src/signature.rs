//! Container signatures used to decide whether an existing container can be reused.
//!
//! The signature is the SHA-256 of the canonical JSON encoding of the
//! translated [`ContainerCreateOptions`]. Every field that reaches the
//! create call is serialized, so changing any translated flag changes the
//! signature. `remove_on_exit` is the one exception: it only governs cleanup.

use sha2::{Digest, Sha256};

use crate::args::ContainerCreateOptions;
use crate::error::DockerResult;

/// Label marking containers created by this crate.
pub const MANAGED_LABEL: &str = "conduit.managed";

/// Label carrying the options signature.
pub const SIGNATURE_LABEL: &str = "conduit.signature";

/// Compute the hex-encoded signature of a set of create options.
///
/// Labels written by this crate are excluded so the signature is stable
/// whether it is computed before or after they are attached.
pub fn compute_signature(options: &ContainerCreateOptions) -> DockerResult<String> {
    let mut options = options.clone();
    options.labels.remove(MANAGED_LABEL);
    options.labels.remove(SIGNATURE_LABEL);

    // serde_json::Value maps are ordered, so this encoding is canonical
    let canonical = serde_json::to_value(&options)?;
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{GpuRequest, MountKind, MountSpec};

    fn base() -> ContainerCreateOptions {
        ContainerCreateOptions {
            image: "mcp/fetch:latest".into(),
            cmd: vec!["--verbose".into()],
            interactive: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = compute_signature(&base()).unwrap();
        let b = compute_signature(&base()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_remove_on_exit_is_excluded() {
        let mut with_rm = base();
        with_rm.remove_on_exit = true;
        assert_eq!(
            compute_signature(&base()).unwrap(),
            compute_signature(&with_rm).unwrap()
        );
    }

    #[test]
    fn test_own_labels_are_excluded() {
        let mut labelled = base();
        labelled.labels.insert(MANAGED_LABEL.into(), "true".into());
        labelled.labels.insert(SIGNATURE_LABEL.into(), "abc".into());
        assert_eq!(
            compute_signature(&base()).unwrap(),
            compute_signature(&labelled).unwrap()
        );
    }

    /// Every translated field must move the signature.
    #[test]
    fn test_every_field_changes_signature() {
        let original = compute_signature(&base()).unwrap();
        let mutations: &[(&str, fn(&mut ContainerCreateOptions))] = &[
            ("image", |o| o.image = "other:1".into()),
            ("cmd", |o| o.cmd.push("x".into())),
            ("entrypoint", |o| o.entrypoint = Some(vec!["/bin/sh".into()])),
            ("env", |o| o.env.push("A=1".into())),
            ("user", |o| o.user = Some("1000".into())),
            ("working_dir", |o| o.working_dir = Some("/w".into())),
            ("labels", |o| {
                o.labels.insert("k".into(), "v".into());
            }),
            ("interactive", |o| o.interactive = false),
            ("tty", |o| o.tty = true),
            ("binds", |o| o.host.binds.push("/a:/b".into())),
            ("mounts", |o| {
                o.host.mounts.push(MountSpec {
                    kind: MountKind::Bind,
                    source: Some("/a".into()),
                    target: "/b".into(),
                    read_only: true,
                    bind_propagation: None,
                    volume_nocopy: false,
                    tmpfs_size: None,
                    tmpfs_mode: None,
                    consistency: None,
                })
            }),
            ("tmpfs", |o| {
                o.host.tmpfs.insert("/run".into(), String::new());
            }),
            ("network_mode", |o| o.host.network_mode = Some("host".into())),
            ("privileged", |o| o.host.privileged = true),
            ("shm_size", |o| o.host.shm_size = Some(1024)),
            ("extra_hosts", |o| o.host.extra_hosts.push("a:1.2.3.4".into())),
            ("security_opt", |o| o.host.security_opt.push("no-new-privileges".into())),
            ("sysctls", |o| {
                o.host.sysctls.insert("a".into(), "1".into());
            }),
            ("cap_add", |o| o.host.cap_add.push("NET_ADMIN".into())),
            ("cap_drop", |o| o.host.cap_drop.push("ALL".into())),
            ("ipc_mode", |o| o.host.ipc_mode = Some("host".into())),
            ("pid_mode", |o| o.host.pid_mode = Some("host".into())),
            ("gpus", |o| o.host.gpus = Some(GpuRequest::All)),
        ];

        for (field, mutate) in mutations.iter() {
            let mut options = base();
            mutate(&mut options);
            assert_ne!(
                compute_signature(&options).unwrap(),
                original,
                "changing {field} did not change the signature"
            );
        }
    }

    /// Fails when a field is added to the options without being reviewed here.
    #[test]
    fn test_serialized_fields_in_lockstep() {
        let value = serde_json::to_value(ContainerCreateOptions::default()).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "cmd",
                "entrypoint",
                "env",
                "host",
                "image",
                "interactive",
                "labels",
                "tty",
                "user",
                "working_dir",
            ]
        );

        let host = &value["host"];
        assert_eq!(host.as_object().unwrap().len(), 14);
    }
}
