//! Simple ICAP Server Example
//!
//! Demonstrates wiring up the engine the way an embedding binary would:
//! register a REQMOD handler that uppercases the encapsulated request body,
//! register an `is_tag` hook, and serve until Ctrl+C.

use async_trait::async_trait;
use slog::{o, Drain};

use icap_engine::config::ServerConfig;
use icap_engine::error::IcapResult;
use icap_engine::message::IcapRequest;
use icap_engine::registry::{Adaptation, Criterion, Handler, Method};
use icap_engine::server::ServerBuilder;

struct Uppercase;

#[async_trait]
impl Handler for Uppercase {
    async fn handle(&self, mut request: IcapRequest) -> IcapResult<Adaptation> {
        if let Some(http_response) = request.http_response.as_mut() {
            http_response.body = http_response.body.to_ascii_uppercase().into();
        } else if let Some(http_request) = request.http_request.as_mut() {
            http_request.body = http_request.body.to_ascii_uppercase().into();
        }
        Ok(Adaptation::Modified(request))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = std::sync::Mutex::new(drain).fuse();
    let logger = slog::Logger::root(drain, o!());

    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 1344,
        ..ServerConfig::default()
    };

    let server = ServerBuilder::new()
        .config(config)
        .logger(logger.clone())
        .register_handler(Criterion::new(Method::Reqmod, "/uppercase"), Uppercase)
        .register_handler(Criterion::new(Method::Respmod, "/uppercase"), Uppercase)
        .on_is_tag(Box::new(|_req| "simple-server-demo".to_string()), "simple-server-demo".to_string())
        .build();

    let handle = server.run().await?;
    slog::info!(logger, "serving"; "addr" => %handle.local_addr());

    tokio::signal::ctrl_c().await?;
    handle.stop().await;
    Ok(())
}
