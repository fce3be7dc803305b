/// Ask the OS for a free TCP port.
///
/// The listener is closed before returning, so another process may grab the
/// port before the broker binds it. Good enough for disposable test brokers.
pub async fn free_port() -> std::io::Result<u16> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", 0)).await?;
    let port = listener.local_addr()?.port();
    tracing::trace!(port, "allocated free port");
    Ok(port)
}
