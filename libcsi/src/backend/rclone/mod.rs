//! rclone storage backend for CSI.
//!
//! [`RcloneBackend`] provisions remote-storage volumes by running `rclone`
//! as a subprocess. It keeps no per-volume state: the volume id *is* the
//! remote path, so delete rebuilds the target from the id and the request's
//! (or the default) credentials.
//!
//! Each request goes through the same stages, and a failing stage answers
//! the request immediately:
//!
//! ```text
//! received -> credentials resolved -> parameters extracted -> rclone run -> responded
//! ```
//!
//! Concurrent calls on the same target are not serialised unless
//! [`RcloneBackend::with_target_locks`] is used; rclone's own idempotent
//! `mkdir`/`purge` is relied upon otherwise.

pub mod config;
pub mod executor;
pub mod lock;
pub mod params;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::capability::CapabilityRegistry;
use crate::controller::CsiController;
use crate::credentials::{CredentialResolver, SecretDirStore};
use crate::error::{CsiError, UnsupportedOperation};
use crate::identity::CsiIdentity;
use crate::node::CsiNode;
use crate::types::*;

use self::config::BridgeConfig;
use self::executor::{OperationExecutor, OperationVerb, ProcessRunner, TokioProcessRunner};
use self::lock::TargetLocks;
use self::params::{VolumeTarget, extract_target};

/// Name reported by `GetPluginInfo`.
pub const DRIVER_NAME: &str = "csi-rclone";

/// CSI backend delegating data operations to rclone.
pub struct RcloneBackend {
    node_id: String,
    capabilities: Arc<CapabilityRegistry>,
    credentials: CredentialResolver,
    executor: OperationExecutor,
    target_locks: Option<TargetLocks>,
}

impl RcloneBackend {
    /// Assemble a backend from its parts.
    pub fn new(
        node_id: impl Into<String>,
        capabilities: Arc<CapabilityRegistry>,
        credentials: CredentialResolver,
        executor: OperationExecutor,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            capabilities,
            credentials,
            executor,
            target_locks: None,
        }
    }

    /// Build the production backend: rclone via `tokio::process`, credentials
    /// from [`SecretDirStore`], and the rclone capability set.
    pub fn from_config(node_id: impl Into<String>, config: &BridgeConfig) -> Result<Self, CsiError> {
        let runner = TokioProcessRunner::with_timeout(config.operation_timeout());
        Self::from_config_with_runner(node_id, config, Box::new(runner))
    }

    /// Like [`Self::from_config`] with a caller-chosen [`ProcessRunner`].
    pub fn from_config_with_runner(
        node_id: impl Into<String>,
        config: &BridgeConfig,
        runner: Box<dyn ProcessRunner>,
    ) -> Result<Self, CsiError> {
        let settings = config.executor_settings()?;
        if !settings.create_post_flags.is_empty() {
            warn!(
                flags = ?settings.create_post_flags,
                "create post flags are kept for compatibility and have no effect on mkdir"
            );
        }

        let store = Arc::new(SecretDirStore::new(&config.secrets_dir));
        let credentials = CredentialResolver::new(store, config.default_secret_name.clone());
        let backend = Self::new(
            node_id,
            Arc::new(CapabilityRegistry::rclone()),
            credentials,
            OperationExecutor::new(settings, runner),
        );
        Ok(if config.serialize_same_target {
            backend.with_target_locks()
        } else {
            backend
        })
    }

    /// Run create/delete on one target at a time.
    pub fn with_target_locks(mut self) -> Self {
        self.target_locks = Some(TargetLocks::new());
        self
    }

    /// Resolve credentials and derive the rclone target for `name`.
    async fn resolve_target(
        &self,
        name: &str,
        parameters: &HashMap<String, String>,
        secrets: CredentialSet,
    ) -> Result<VolumeTarget, CsiError> {
        let secrets = self.credentials.resolve(secrets).await?;
        debug!("credentials resolved");

        let target = extract_target(name, parameters, &secrets).inspect_err(|e| {
            warn!(error = %e, "storage parameter error");
        })?;
        debug!(%target, "parameters extracted");
        Ok(target)
    }

    /// Run `verb` against `target` and map failure onto
    /// [`CsiError::ExternalOperationFailed`].
    async fn run(
        &self,
        verb: OperationVerb,
        volume: &str,
        target: &VolumeTarget,
    ) -> Result<(), CsiError> {
        let _guard = match &self.target_locks {
            Some(locks) => Some(locks.acquire(target.to_string()).await),
            None => None,
        };

        let result = self
            .executor
            .run(verb, &target.remote, &target.remote_path, &target.flags)
            .await;
        if result.succeeded {
            Ok(())
        } else {
            Err(CsiError::ExternalOperationFailed {
                operation: verb.to_string(),
                target: volume.to_owned(),
                diagnostic: result.diagnostic,
            })
        }
    }
}

fn unsupported<T>(op: UnsupportedOperation) -> Result<T, CsiError> {
    Err(CsiError::Unimplemented(op))
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for RcloneBackend {
    fn plugin_info(&self) -> PluginInfo {
        PluginInfo {
            name: DRIVER_NAME.to_owned(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(self.capabilities.plugin().to_vec())
    }
}

// ---------------------------------------------------------------------------
// CsiController
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiController for RcloneBackend {
    #[instrument(skip_all, fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        if req.name.is_empty() {
            return Err(CsiError::InvalidArgument("volume name is required".into()));
        }

        let target = self
            .resolve_target(&req.name, &req.parameters, req.secrets)
            .await?;
        self.run(OperationVerb::Create, &req.name, &target).await?;

        info!(volume_id = %target.remote_path, remote = %target.remote, "volume created");
        Ok(Volume {
            volume_id: VolumeId(target.remote_path),
            // Sizing is left to the orchestrator's own accounting.
            capacity_bytes: 0,
            volume_context: req.parameters,
        })
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.0.is_empty() {
            return Err(CsiError::InvalidArgument("volume id is required".into()));
        }

        let target = self
            .resolve_target(&req.volume_id.0, &HashMap::new(), req.secrets)
            .await?;
        self.run(OperationVerb::Delete, &req.volume_id.0, &target)
            .await?;

        info!(volume_id = %req.volume_id, "volume deleted");
        Ok(())
    }

    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<ValidationResult, CsiError> {
        if volume_id.0.is_empty() {
            return Err(CsiError::InvalidArgument("volume id is required".into()));
        }
        if capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "volume capabilities are required".into(),
            ));
        }

        let unsupported = capabilities
            .iter()
            .find(|cap| !self.capabilities.supports_access_mode(cap.access_mode));
        Ok(match unsupported {
            Some(cap) => ValidationResult {
                confirmed: false,
                message: format!("access mode {:?} is not supported", cap.access_mode),
            },
            None => ValidationResult {
                confirmed: true,
                message: String::new(),
            },
        })
    }

    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(self.capabilities.controller().to_vec())
    }

    // Attach/detach is not required for remote-backed volumes, so the
    // orchestrator never needs these.
    async fn controller_publish_volume(
        &self,
        _req: ControllerPublishVolumeRequest,
    ) -> Result<HashMap<String, String>, CsiError> {
        unsupported(UnsupportedOperation::ControllerPublishVolume)
    }

    async fn controller_unpublish_volume(
        &self,
        _req: ControllerUnpublishVolumeRequest,
    ) -> Result<(), CsiError> {
        unsupported(UnsupportedOperation::ControllerUnpublishVolume)
    }

    async fn controller_expand_volume(
        &self,
        _req: ControllerExpandVolumeRequest,
    ) -> Result<u64, CsiError> {
        unsupported(UnsupportedOperation::ControllerExpandVolume)
    }

    async fn controller_get_volume(&self, _volume_id: &VolumeId) -> Result<Volume, CsiError> {
        unsupported(UnsupportedOperation::ControllerGetVolume)
    }
}

// ---------------------------------------------------------------------------
// CsiNode
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiNode for RcloneBackend {
    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.node_id.clone(),
            max_volumes: 0,
            accessible_topology: None,
        })
    }

    async fn node_get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(self.capabilities.node().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::executor::ExecutorSettings;
    use super::executor::tests::FakeRunner;
    use super::*;
    use crate::credentials::{CredentialStore, StaticCredentialStore};
    use crate::error::StatusCode;

    /// Static store that counts lookups.
    struct CountingStore {
        inner: StaticCredentialStore,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        async fn lookup(&self, name: &str) -> Result<CredentialSet, CsiError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.lookup(name).await
        }
    }

    struct Harness {
        backend: RcloneBackend,
        runner: FakeRunner,
        store: Arc<CountingStore>,
    }

    fn default_creds() -> CredentialSet {
        [
            ("remote", "s3backend"),
            ("s3-provider", "Minio"),
            ("s3-secret-access-key", "hunter2"),
        ]
        .into_iter()
        .collect()
    }

    fn harness_with(store: StaticCredentialStore, exit_code: i32) -> Harness {
        let runner = FakeRunner::exiting(exit_code, "rclone says hi");
        let store = Arc::new(CountingStore {
            inner: store,
            lookups: AtomicUsize::new(0),
        });
        let backend = RcloneBackend::new(
            "node-1",
            Arc::new(CapabilityRegistry::rclone()),
            CredentialResolver::new(store.clone(), "rclone-secret"),
            OperationExecutor::new(ExecutorSettings::default(), Box::new(runner.clone())),
        );
        Harness {
            backend,
            runner,
            store,
        }
    }

    fn harness(exit_code: i32) -> Harness {
        harness_with(
            StaticCredentialStore::new().with_bundle("rclone-secret", default_creds()),
            exit_code,
        )
    }

    fn create_request() -> CreateVolumeRequest {
        CreateVolumeRequest {
            name: "pvc-1".into(),
            parameters: HashMap::from([
                ("remote".to_owned(), "s3backend".to_owned()),
                ("path".to_owned(), "bucket-x".to_owned()),
            ]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_volume_with_default_credentials() {
        let h = harness(0);
        let req = create_request();
        let vol = h.backend.create_volume(req.clone()).await.unwrap();

        assert_eq!(
            vol,
            Volume {
                volume_id: VolumeId("bucket-x".into()),
                capacity_bytes: 0,
                volume_context: req.parameters,
            }
        );
        assert_eq!(h.store.lookups.load(Ordering::SeqCst), 1);

        let calls = h.runner.calls();
        assert_eq!(calls.len(), 1);
        let (program, args) = &calls[0];
        assert_eq!(program, "rclone");
        assert_eq!(
            &args[..3],
            ["mkdir", ":s3backend:bucket-x", "--no-check-certificate"]
        );
        assert!(args.contains(&"--s3-provider=Minio".to_owned()));
    }

    #[tokio::test]
    async fn create_twice_yields_same_volume_id() {
        let h = harness(0);
        let first = h.backend.create_volume(create_request()).await.unwrap();
        let second = h.backend.create_volume(create_request()).await.unwrap();

        assert_eq!(first.volume_id, second.volume_id);
        let calls = h.runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn request_secrets_skip_the_store() {
        let h = harness(0);
        let req = CreateVolumeRequest {
            secrets: [("remote", "other")].into_iter().collect(),
            parameters: HashMap::new(),
            ..create_request()
        };
        let vol = h.backend.create_volume(req).await.unwrap();

        assert_eq!(vol.volume_id, VolumeId("pvc-1".into()));
        assert_eq!(h.store.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(h.runner.calls()[0].1[1], ":other:pvc-1");
    }

    #[tokio::test]
    async fn create_rejects_a_remote_delete_could_not_reach() {
        let other: CredentialSet = [("remote", "other")].into_iter().collect();
        let no_remote: CredentialSet = [("s3-provider", "Minio")].into_iter().collect();

        for bundle in [other, no_remote] {
            let h = harness_with(
                StaticCredentialStore::new().with_bundle("rclone-secret", bundle),
                0,
            );
            let err = h.backend.create_volume(create_request()).await.unwrap_err();

            assert!(matches!(err, CsiError::InvalidStorageParameters(_)));
            assert_eq!(err.code(), StatusCode::InvalidArgument);
            assert!(h.runner.calls().is_empty());
        }
    }

    #[tokio::test]
    async fn missing_default_credentials_never_run_rclone() {
        let h = harness_with(StaticCredentialStore::new(), 0);
        let err = h.backend.create_volume(create_request()).await.unwrap_err();

        assert!(matches!(err, CsiError::CredentialUnavailable { .. }));
        assert_eq!(err.code(), StatusCode::Internal);
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn bad_parameters_are_invalid_argument() {
        let h = harness(0);
        let req = CreateVolumeRequest {
            parameters: HashMap::from([("path".to_owned(), "../escape".to_owned())]),
            ..create_request()
        };
        let err = h.backend.create_volume(req).await.unwrap_err();

        assert!(matches!(err, CsiError::InvalidStorageParameters(_)));
        assert_eq!(err.code(), StatusCode::InvalidArgument);
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_name_is_rejected_before_credentials() {
        let h = harness(0);
        let req = CreateVolumeRequest {
            name: String::new(),
            ..create_request()
        };
        let err = h.backend.create_volume(req).await.unwrap_err();

        assert!(matches!(err, CsiError::InvalidArgument(_)));
        assert_eq!(h.store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rclone_failure_is_internal_with_diagnostic() {
        let h = harness(1);
        let err = h.backend.create_volume(create_request()).await.unwrap_err();

        match &err {
            CsiError::ExternalOperationFailed {
                operation,
                target,
                diagnostic,
            } => {
                assert_eq!(operation, "create");
                assert_eq!(target, "pvc-1");
                assert!(diagnostic.contains("rclone says hi"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.code(), StatusCode::Internal);
        assert!(!err.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn delete_targets_what_create_made() {
        let h = harness(0);
        let vol = h.backend.create_volume(create_request()).await.unwrap();

        h.backend
            .delete_volume(DeleteVolumeRequest {
                volume_id: vol.volume_id,
                secrets: CredentialSet::new(),
            })
            .await
            .unwrap();

        let calls = h.runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1[1], calls[1].1[1]);
        assert_eq!(
            calls[1].1,
            [
                "purge",
                ":s3backend:bucket-x",
                "--no-check-certificate",
                "--s3-provider=Minio",
                "--s3-secret-access-key=hunter2",
            ]
        );
    }

    #[tokio::test]
    async fn repeated_delete_is_not_a_new_failure() {
        let h = harness(0);
        let req = DeleteVolumeRequest {
            volume_id: VolumeId("bucket-x".into()),
            secrets: CredentialSet::new(),
        };
        h.backend.delete_volume(req.clone()).await.unwrap();

        // rclone reports "directory not found" once the target is gone.
        h.runner.set_reply(3, "directory not found");
        h.backend.delete_volume(req).await.unwrap();
        assert_eq!(h.runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn delete_failure_is_internal() {
        let h = harness(1);
        let err = h
            .backend
            .delete_volume(DeleteVolumeRequest {
                volume_id: VolumeId("bucket-x".into()),
                secrets: CredentialSet::new(),
            })
            .await
            .unwrap_err();
        assert!(
            matches!(err, CsiError::ExternalOperationFailed { ref operation, .. } if operation == "delete")
        );
    }

    #[tokio::test]
    async fn unimplemented_calls_have_no_side_effects() {
        let h = harness(0);
        let id = VolumeId("bucket-x".into());

        let errors = [
            h.backend
                .controller_publish_volume(ControllerPublishVolumeRequest {
                    volume_id: id.clone(),
                    node_id: "node-1".into(),
                    volume_capability: VolumeCapability::default(),
                    readonly: false,
                })
                .await
                .unwrap_err(),
            h.backend
                .controller_unpublish_volume(ControllerUnpublishVolumeRequest {
                    volume_id: id.clone(),
                    node_id: "node-1".into(),
                })
                .await
                .unwrap_err(),
            h.backend
                .controller_expand_volume(ControllerExpandVolumeRequest {
                    volume_id: id.clone(),
                    capacity_bytes: 1 << 30,
                })
                .await
                .unwrap_err(),
            h.backend.controller_get_volume(&id).await.unwrap_err(),
        ];

        let ops: Vec<_> = errors
            .iter()
            .map(|e| match e {
                CsiError::Unimplemented(op) => *op,
                other => panic!("unexpected error {other:?}"),
            })
            .collect();
        assert_eq!(
            ops,
            [
                UnsupportedOperation::ControllerPublishVolume,
                UnsupportedOperation::ControllerUnpublishVolume,
                UnsupportedOperation::ControllerExpandVolume,
                UnsupportedOperation::ControllerGetVolume,
            ]
        );
        assert!(errors.iter().all(|e| e.code() == StatusCode::Unimplemented));
        assert!(h.runner.calls().is_empty());
        assert_eq!(h.store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn validate_capabilities() {
        let h = harness(0);
        let id = VolumeId("bucket-x".into());

        let ok = h
            .backend
            .validate_volume_capabilities(&id, &[VolumeCapability::default()])
            .await
            .unwrap();
        assert!(ok.confirmed);

        let rejected = h
            .backend
            .validate_volume_capabilities(
                &id,
                &[VolumeCapability {
                    access_mode: AccessMode::SingleNodeWriter,
                    mount_flags: vec![],
                }],
            )
            .await
            .unwrap();
        assert!(!rejected.confirmed);
        assert!(rejected.message.contains("SingleNodeWriter"));

        let err = h
            .backend
            .validate_volume_capabilities(&VolumeId::default(), &[VolumeCapability::default()])
            .await
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::InvalidArgument);
    }

    #[tokio::test]
    async fn identity_and_node_info() {
        let h = harness(0);
        let info = h.backend.plugin_info();
        assert_eq!(info.name, "csi-rclone");
        assert!(crate::identity::is_valid_plugin_name(&info.name));
        assert!(h.backend.probe().await.unwrap());
        assert_eq!(
            h.backend.get_plugin_capabilities().await.unwrap(),
            [PluginCapability::ControllerService]
        );
        assert_eq!(
            h.backend.controller_get_capabilities().await.unwrap(),
            [ControllerCapability::CreateDeleteVolume]
        );
        assert!(h.backend.node_get_capabilities().await.unwrap().is_empty());
        assert_eq!(h.backend.get_info().await.unwrap().node_id, "node-1");

        let err = h
            .backend
            .unpublish_volume(&VolumeId("bucket-x".into()), "/mnt/x")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CsiError::Unimplemented(UnsupportedOperation::NodeUnpublishVolume)
        ));
    }

    #[tokio::test]
    async fn from_config_wires_the_secret_dir_and_locks() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle = tmp.path().join("rclone-secret");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join("remote"), "s3backend").unwrap();

        let config = BridgeConfig {
            secrets_dir: tmp.path().to_owned(),
            serialize_same_target: true,
            ..Default::default()
        };
        let runner = FakeRunner::exiting(0, "");
        let backend =
            RcloneBackend::from_config_with_runner("node-1", &config, Box::new(runner.clone()))
                .unwrap();
        assert!(backend.target_locks.is_some());

        let vol = backend
            .create_volume(CreateVolumeRequest {
                name: "pvc-9".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(vol.volume_id, VolumeId("pvc-9".into()));
        assert_eq!(runner.calls()[0].1[1], ":s3backend:pvc-9");
    }
}
