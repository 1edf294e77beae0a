use tokio::net::TcpListener;

use crate::bridge::{self, InstrumentIo};

/// Owns the session handle and serves accepted connections one at a
/// time: each connection carries exactly one request and is dropped
/// after its reply.
pub struct App<I> {
    instrument: I,
}

impl<I: InstrumentIo> App<I> {
    pub fn new(instrument: I) -> Self {
        Self { instrument }
    }

    pub async fn serve(&self, listener: TcpListener) {
        loop {
            let (mut stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::warn!("failed to accept connection: {}", err);
                    continue;
                }
            };
            log::debug!("client connected: {}", peer);
            bridge::serve_one(&self.instrument, &mut stream).await;
            log::debug!("client served: {}", peer);
        }
    }
}
