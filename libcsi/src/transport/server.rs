//! QUIC server that accepts orchestrator connections and dispatches incoming
//! CSI requests to the plugin's trait implementations.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::CsiController;
use crate::error::{CsiError, StatusCode};
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;

use super::MAX_MESSAGE_SIZE;

/// A CSI server that accepts QUIC connections and dispatches
/// [`CsiMessage`] requests to an [`CsiIdentity`] + [`CsiController`] +
/// [`CsiNode`] implementation.
///
/// The plugin holds no cross-request state, so every stream is handled on its
/// own Tokio task without locking.
pub struct CsiServer<T> {
    endpoint: quinn::Endpoint,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Create a new server bound to `addr`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, CsiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CsiError::transport)?;
        info!(addr = ?endpoint.local_addr().ok(), "CSI QUIC server listening");
        Ok(Self { endpoint, handler })
    }

    /// Accept connections in a loop until the endpoint is closed.
    ///
    /// Each accepted connection spawns a Tokio task, and each bi-stream
    /// within a connection is handled concurrently.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "CSI connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler).await {
                            warn!(%remote, error = %e, "CSI connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "CSI incoming connection failed");
                    }
                }
            });
        }
        info!("CSI QUIC server stopped");
        Ok(())
    }

    /// Stop accepting connections and close the open ones.
    pub fn shutdown(&self) {
        self.endpoint
            .close(quinn::VarInt::from_u32(0), b"server shutdown");
    }

    /// Address the endpoint is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, CsiError> {
        self.endpoint.local_addr().map_err(CsiError::transport)
    }

    /// Handle all bi-streams on a single connection.
    async fn handle_connection(conn: quinn::Connection, handler: Arc<T>) -> Result<(), CsiError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed(_))
                | Err(quinn::ConnectionError::LocallyClosed) => return Ok(()),
                Err(e) => return Err(CsiError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &handler).await {
                    error!(error = %e, "CSI stream handler error");
                }
            });
        }
    }

    /// Process a single bi-stream: read request → dispatch → write response.
    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: &T,
    ) -> Result<(), CsiError> {
        let buf = recv
            .read_to_end(MAX_MESSAGE_SIZE)
            .await
            .map_err(CsiError::transport)?;

        let response = match serde_json::from_slice::<CsiMessage>(&buf) {
            Ok(request) => {
                debug!(%request, "CSI request received");
                Self::dispatch(handler, request).await
            }
            Err(e) => CsiMessage::Error(CsiError::InvalidArgument(format!(
                "malformed request: {e}"
            ))),
        };

        let payload = serde_json::to_vec(&response).map_err(CsiError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;
        Ok(())
    }

    /// Map a [`CsiMessage`] request to the correct trait method call and
    /// wrap the result in a response [`CsiMessage`].
    pub async fn dispatch(handler: &T, request: CsiMessage) -> CsiMessage {
        match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::Probe => reply(handler.probe().await, CsiMessage::ProbeResult),
            CsiMessage::GetPluginInfo => CsiMessage::PluginInfoResponse(handler.plugin_info()),
            CsiMessage::GetPluginCapabilities => reply(
                handler.get_plugin_capabilities().await,
                CsiMessage::PluginCapabilitiesResponse,
            ),

            // --- Controller -------------------------------------------------
            CsiMessage::CreateVolume(req) => {
                reply(handler.create_volume(req).await, CsiMessage::VolumeCreated)
            }
            CsiMessage::DeleteVolume(req) => {
                reply(handler.delete_volume(req).await, |()| CsiMessage::Ok)
            }
            CsiMessage::ValidateVolumeCapabilities {
                volume_id,
                capabilities,
            } => reply(
                handler
                    .validate_volume_capabilities(&volume_id, &capabilities)
                    .await,
                CsiMessage::CapabilitiesValidated,
            ),
            CsiMessage::ControllerGetCapabilities => reply(
                handler.controller_get_capabilities().await,
                CsiMessage::ControllerCapabilitiesResponse,
            ),
            CsiMessage::ControllerPublishVolume(req) => reply(
                handler.controller_publish_volume(req).await,
                CsiMessage::PublishContext,
            ),
            CsiMessage::ControllerUnpublishVolume(req) => reply(
                handler.controller_unpublish_volume(req).await,
                |()| CsiMessage::Ok,
            ),
            CsiMessage::ControllerExpandVolume(req) => reply(
                handler.controller_expand_volume(req).await,
                CsiMessage::Capacity,
            ),
            CsiMessage::ControllerGetVolume(id) => reply(
                handler.controller_get_volume(&id).await,
                CsiMessage::VolumeCreated,
            ),

            // --- Node -------------------------------------------------------
            CsiMessage::StageVolume(req) => {
                reply(handler.stage_volume(req).await, |()| CsiMessage::Ok)
            }
            CsiMessage::UnstageVolume {
                volume_id,
                staging_target_path,
            } => reply(
                handler
                    .unstage_volume(&volume_id, &staging_target_path)
                    .await,
                |()| CsiMessage::Ok,
            ),
            CsiMessage::PublishVolume(req) => {
                reply(handler.publish_volume(req).await, |()| CsiMessage::Ok)
            }
            CsiMessage::UnpublishVolume {
                volume_id,
                target_path,
            } => reply(
                handler.unpublish_volume(&volume_id, &target_path).await,
                |()| CsiMessage::Ok,
            ),
            CsiMessage::GetNodeInfo => {
                reply(handler.get_info().await, CsiMessage::NodeInfoResponse)
            }
            CsiMessage::NodeGetCapabilities => reply(
                handler.node_get_capabilities().await,
                CsiMessage::NodeCapabilitiesResponse,
            ),

            // --- Response variants should never arrive as requests ----------
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(CsiError::InvalidArgument(format!(
                    "unexpected message: {other}"
                )))
            }
        }
    }

    /// Return a reference to the underlying QUIC endpoint.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

fn reply<V>(result: Result<V, CsiError>, wrap: impl FnOnce(V) -> CsiMessage) -> CsiMessage {
    match result {
        Ok(value) => wrap(value),
        Err(e) => {
            match e.code() {
                StatusCode::Unimplemented => debug!(error = %e, "unsupported call"),
                StatusCode::InvalidArgument => warn!(error = %e, "request rejected"),
                _ => error!(error = %e, "request failed"),
            }
            CsiMessage::Error(e)
        }
    }
}
