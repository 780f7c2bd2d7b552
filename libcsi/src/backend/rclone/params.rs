//! Storage parameter extraction.
//!
//! Turns a volume name (or id), storage class parameters and resolved
//! credentials into the rclone target `:<remote>:<path>` plus the flags passed
//! to rclone. Extraction is a pure function of its inputs: the volume id
//! returned by `CreateVolume` is the normalised path, so feeding it back as the
//! name on `DeleteVolume` addresses the same target.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::CsiError;
use crate::types::CredentialSet;

/// Parameter / secret key holding the remote alias.
pub const KEY_REMOTE: &str = "remote";
/// Parameter keys holding the remote path.
pub const KEY_PATH: &str = "path";
pub const KEY_REMOTE_PATH: &str = "remotePath";
/// Parameters in this namespace belong to the external provisioner.
const RESERVED_PREFIX: &str = "csi.storage.k8s.io/";

const STRUCTURAL_KEYS: [&str; 3] = [KEY_REMOTE, KEY_PATH, KEY_REMOTE_PATH];

/// Ordered rclone flags, `name -> value`, without the leading `--`.
///
/// Values may carry secrets, so [`Debug`] only shows flag names.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FlagSet(BTreeMap<String, String>);

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one flag layer, normalising keys (`_` becomes `-`).
    ///
    /// `layer` only names the source in error messages. Malformed keys and two
    /// keys that normalise to the same flag with different values are
    /// rejected.
    pub fn from_layer<'a>(
        layer: &str,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, CsiError> {
        let mut flags = BTreeMap::new();
        for (raw, value) in pairs {
            let key = normalize_flag_key(raw)
                .ok_or_else(|| CsiError::parameters(format!("malformed flag key {raw:?} in {layer}")))?;
            match flags.get(&key) {
                Some(existing) if existing != value => {
                    return Err(CsiError::parameters(format!(
                        "conflicting values for flag {key:?} in {layer}"
                    )));
                }
                Some(_) => {}
                None => {
                    flags.insert(key, value.to_owned());
                }
            }
        }
        Ok(Self(flags))
    }

    /// New set holding `self` with every key of `upper` overriding it.
    pub fn overlay(&self, upper: &FlagSet) -> FlagSet {
        let mut merged = self.0.clone();
        merged.extend(upper.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        FlagSet(merged)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Debug for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

fn normalize_flag_key(key: &str) -> Option<String> {
    let valid = !key.is_empty()
        && !key.starts_with('-')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    valid.then(|| key.replace('_', "-"))
}

/// Where a volume lives and how rclone must be invoked to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeTarget {
    /// Remote alias understood by rclone.
    pub remote: String,
    /// Path inside the remote; doubles as the volume id.
    pub remote_path: String,
    /// Credential flags overlaid by parameter flags.
    pub flags: FlagSet,
}

impl fmt::Display for VolumeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}:{}", self.remote, self.remote_path)
    }
}

/// Resolve the target for volume `name`.
///
/// `remote` comes from `secrets`. A `remote` parameter is accepted only when
/// it names the same remote, since delete sees nothing but the volume id and
/// the credentials. The path comes from `parameters` (`path` or
/// `remotePath`), falling back to `name`. All other keys become flags, with
/// parameters taking precedence over secrets.
pub fn extract_target(
    name: &str,
    parameters: &HashMap<String, String>,
    secrets: &CredentialSet,
) -> Result<VolumeTarget, CsiError> {
    let remote = match (
        parameters.get(KEY_REMOTE).map(String::as_str),
        secrets.get(KEY_REMOTE),
    ) {
        (Some(requested), Some(resolved)) if requested != resolved => {
            return Err(CsiError::parameters(format!(
                "remote {requested:?} differs from credential remote {resolved:?}"
            )));
        }
        (Some(requested), None) => {
            return Err(CsiError::parameters(format!(
                "remote {requested:?} is not backed by a credential remote"
            )));
        }
        (_, Some(resolved)) => resolved,
        (None, None) => return Err(CsiError::parameters("no remote in secrets")),
    };
    if remote.is_empty() || remote.contains(':') || remote.contains(char::is_whitespace) {
        return Err(CsiError::parameters(format!("invalid remote {remote:?}")));
    }

    let raw_path = match (parameters.get(KEY_PATH), parameters.get(KEY_REMOTE_PATH)) {
        (Some(a), Some(b)) if a != b => {
            return Err(CsiError::parameters(format!(
                "{KEY_PATH} {a:?} conflicts with {KEY_REMOTE_PATH} {b:?}"
            )));
        }
        (Some(p), _) | (None, Some(p)) => p.as_str(),
        (None, None) => name,
    };
    let remote_path = normalize_path(raw_path)?;

    let derived = FlagSet::from_layer(
        "secrets",
        secrets.iter().filter(|(k, _)| !STRUCTURAL_KEYS.contains(k)),
    )?;

    // HashMap order is random; sort so conflicts are reported deterministically.
    let mut user: Vec<(&str, &str)> = parameters
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .filter(|(k, _)| !STRUCTURAL_KEYS.contains(k) && !k.starts_with(RESERVED_PREFIX))
        .collect();
    user.sort_unstable();
    let user = FlagSet::from_layer("parameters", user)?;

    Ok(VolumeTarget {
        remote: remote.to_owned(),
        remote_path,
        flags: derived.overlay(&user),
    })
}

fn normalize_path(raw: &str) -> Result<String, CsiError> {
    let path = raw.trim_matches('/');
    if path.is_empty() {
        return Err(CsiError::parameters(format!("empty remote path {raw:?}")));
    }
    if path.split('/').any(|seg| seg == "." || seg == "..") {
        return Err(CsiError::parameters(format!(
            "relative segment in remote path {raw:?}"
        )));
    }
    Ok(path.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn creds(pairs: &[(&str, &str)]) -> CredentialSet {
        pairs.iter().copied().collect()
    }

    #[test]
    fn path_from_parameters() {
        let target = extract_target(
            "pvc-1",
            &params(&[("remote", "s3backend"), ("path", "bucket-x")]),
            &creds(&[("remote", "s3backend"), ("s3-endpoint", "http://minio:9000")]),
        )
        .unwrap();

        assert_eq!(target.remote, "s3backend");
        assert_eq!(target.remote_path, "bucket-x");
        assert_eq!(target.flags.get("s3-endpoint"), Some("http://minio:9000"));
        assert_eq!(target.to_string(), ":s3backend:bucket-x");
    }

    #[test]
    fn name_is_the_default_path_and_secrets_supply_remote() {
        let target = extract_target(
            "pvc-1",
            &HashMap::new(),
            &creds(&[("remote", "s3"), ("remotePath", "ignored")]),
        )
        .unwrap();

        assert_eq!(target.remote, "s3");
        assert_eq!(target.remote_path, "pvc-1");
        assert!(target.flags.is_empty());
    }

    #[test]
    fn volume_id_round_trips_to_the_same_target() {
        let secrets = creds(&[("remote", "s3"), ("s3-provider", "Minio")]);
        let shapes = [
            params(&[]),
            params(&[("path", "bucket-x")]),
            params(&[("remotePath", "/team/bucket-y/")]),
            params(&[("remote", "s3"), ("path", "a/b/c")]),
        ];

        for shape in shapes {
            let created = extract_target("pvc-7", &shape, &secrets).unwrap();
            let deleted = extract_target(&created.remote_path, &HashMap::new(), &secrets).unwrap();
            assert_eq!(
                (&created.remote, &created.remote_path),
                (&deleted.remote, &deleted.remote_path),
                "parameters {shape:?}"
            );
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        let p = params(&[
            ("remote", "s3"),
            ("s3-region", "eu"),
            ("s3_chunk_size", "5M"),
            ("transfers", "4"),
        ]);
        let s = creds(&[("remote", "s3"), ("s3-access-key-id", "AKIA")]);
        let first = extract_target("pvc", &p, &s).unwrap();
        for _ in 0..8 {
            assert_eq!(extract_target("pvc", &p, &s).unwrap(), first);
        }
    }

    #[test]
    fn parameters_override_secrets() {
        let target = extract_target(
            "pvc",
            &params(&[("remote", "s3"), ("s3_endpoint", "http://override")]),
            &creds(&[
                ("remote", "s3"),
                ("s3-endpoint", "http://default"),
                ("s3-region", "us"),
            ]),
        )
        .unwrap();

        assert_eq!(target.flags.get("s3-endpoint"), Some("http://override"));
        assert_eq!(target.flags.get("s3-region"), Some("us"));
    }

    #[test]
    fn reserved_parameters_are_not_flags() {
        let target = extract_target(
            "pvc",
            &params(&[
                ("remote", "s3"),
                ("csi.storage.k8s.io/provisioner-secret-name", "x"),
            ]),
            &creds(&[("remote", "s3")]),
        )
        .unwrap();
        assert!(target.flags.is_empty());
    }

    #[test]
    fn missing_remote() {
        let err = extract_target("pvc", &HashMap::new(), &CredentialSet::new()).unwrap_err();
        assert!(matches!(err, CsiError::InvalidStorageParameters(_)));
    }

    #[test]
    fn parameter_remote_must_match_credentials() {
        let p = params(&[("remote", "s3backend"), ("path", "bucket-x")]);

        let err = extract_target("pvc", &p, &creds(&[("remote", "other")])).unwrap_err();
        assert!(matches!(err, CsiError::InvalidStorageParameters(_)));
        assert!(err.to_string().contains("other"), "{err}");

        let err = extract_target("pvc", &p, &creds(&[("s3-provider", "Minio")])).unwrap_err();
        assert!(matches!(err, CsiError::InvalidStorageParameters(_)));
    }

    #[test]
    fn malformed_structural_fields() {
        let s = creds(&[("remote", "s3")]);
        for p in [
            params(&[("remote", "bad:remote")]),
            params(&[("remote", "")]),
            params(&[("path", "///")]),
            params(&[("path", "a/../b")]),
            params(&[("path", "a"), ("remotePath", "b")]),
        ] {
            let err = extract_target("pvc", &p, &s).unwrap_err();
            assert!(matches!(err, CsiError::InvalidStorageParameters(_)), "{p:?}");
        }

        let err = extract_target("pvc", &HashMap::new(), &creds(&[("remote", "bad remote")]))
            .unwrap_err();
        assert!(matches!(err, CsiError::InvalidStorageParameters(_)));

        // Same value under both path keys is not a conflict.
        let ok = extract_target("pvc", &params(&[("path", "a"), ("remotePath", "a")]), &s);
        assert_eq!(ok.unwrap().remote_path, "a");
    }

    #[test]
    fn malformed_and_conflicting_flag_keys() {
        let s = creds(&[("remote", "s3")]);
        for p in [
            params(&[("--s3-acl", "private")]),
            params(&[("s3 acl", "private")]),
            params(&[("s3_acl", "private"), ("s3-acl", "public-read")]),
        ] {
            let err = extract_target("pvc", &p, &s).unwrap_err();
            assert!(matches!(err, CsiError::InvalidStorageParameters(_)), "{p:?}");
        }

        let err = extract_target("pvc", &HashMap::new(), &creds(&[("remote", "s3"), ("", "x")]))
            .unwrap_err();
        assert!(matches!(err, CsiError::InvalidStorageParameters(_)));
    }

    #[test]
    fn errors_do_not_echo_flag_values() {
        let err = extract_target(
            "pvc",
            &HashMap::new(),
            &creds(&[
                ("remote", "s3"),
                ("s3_secret_access_key", "hunter2"),
                ("s3-secret-access-key", "hunter3"),
            ]),
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(!msg.contains("hunter2") && !msg.contains("hunter3"), "{msg}");
    }

    #[test]
    fn overlay_does_not_touch_inputs() {
        let lower = FlagSet::from_layer("a", [("x", "1"), ("y", "1")]).unwrap();
        let upper = FlagSet::from_layer("b", [("y", "2")]).unwrap();
        let merged = lower.overlay(&upper);

        assert_eq!(merged.get("x"), Some("1"));
        assert_eq!(merged.get("y"), Some("2"));
        assert_eq!(lower.get("y"), Some("1"));
        assert_eq!(upper.len(), 1);
        assert_eq!(format!("{merged:?}"), r#"{"x", "y"}"#);
    }
}
