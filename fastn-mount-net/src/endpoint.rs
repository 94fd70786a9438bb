/// Create an iroh endpoint configured for fastn-mount.
///
/// The endpoint advertises only [`crate::ALPN_MOUNT`]; every mounted protocol is
/// multiplexed on top of it (see the `protocol` module). Discovery uses the n0
/// DNS service and the local network so peers can be reached by node id alone.
pub async fn create_endpoint(secret_key: iroh::SecretKey) -> eyre::Result<iroh::Endpoint> {
    match iroh::Endpoint::builder()
        .discovery_n0()
        .discovery_local_network()
        .alpns(vec![crate::ALPN_MOUNT.to_vec()])
        .secret_key(secret_key)
        .bind()
        .await
    {
        Ok(ep) => {
            tracing::info!(node_id = %ep.node_id(), "iroh endpoint bound");
            Ok(ep)
        }
        Err(e) => {
            // https://github.com/n0-computer/iroh/issues/2741
            Err(eyre::eyre!("failed to bind to iroh network: {e:?}"))
        }
    }
}
