//! Serving an [`App`] over TCP with hyper's HTTP/1 connection.

use crate::app::App;
use crate::handler::RequestHandler;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub struct ServerBuilder {
    app: Option<App>,
    address: Option<Vec<SocketAddr>>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { app: None, address: None }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Result<Self, ServerBuildError> {
        let address = address.to_socket_addrs().map_err(ServerBuildError::InvalidAddress)?.collect::<Vec<_>>();
        self.address = Some(address);
        Ok(self)
    }

    pub fn app(mut self, app: App) -> Self {
        self.app = Some(app);
        self
    }

    /// Serves `handler` with no middleware and the error policy from the environment.
    pub fn handler(self, handler: impl RequestHandler + 'static) -> Self {
        self.app(App::new(handler))
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let app = self.app.ok_or(ServerBuildError::MissingApp)?;
        let address = self.address.ok_or(ServerBuildError::MissingAddress)?;
        Ok(Server { app: Arc::new(app), address })
    }
}

pub struct Server {
    app: Arc<App>,
    address: Vec<SocketAddr>,
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("app or handler must be set")]
    MissingApp,
    #[error("address must be set")]
    MissingAddress,
    #[error("invalid address: {0}")]
    InvalidAddress(#[source] io::Error),
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Installs an `INFO` level subscriber, then serves until the listener fails to bind.
    pub async fn start(self) {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            warn!("a global tracing subscriber is already installed");
        }

        info!("start listening at {:?}", self.address);
        let tcp_listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return;
            }
        };

        self.serve(tcp_listener).await;
    }

    /// Accepts connections from `tcp_listener` forever, one task per connection.
    pub async fn serve(self, tcp_listener: TcpListener) {
        loop {
            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let app = Arc::clone(&self.app);

            tokio::spawn(async move {
                let service = service_fn(move |request: Request<Incoming>| {
                    let app = Arc::clone(&app);
                    async move { app.handle(request).await }
                });

                match http1::Builder::new().serve_connection(TokioIo::new(tcp_stream), service).await {
                    Ok(()) => {
                        info!(%remote_addr, "finished process, connection shutdown");
                    }
                    Err(e) => {
                        error!(%remote_addr, cause = %e, "service has error, connection shutdown");
                    }
                }
            });
        }
    }
}
