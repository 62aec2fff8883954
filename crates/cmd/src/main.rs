// Copyright 2026 beacon authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{collections::BTreeMap, sync::Arc};

use beacon_api::pb::apis::{SayHelloRequest, greeter_client::GreeterClient};
use beacon_discovery::{
    DiscoveryConfig, Endpoint, EtcdStore, Registrar, ResolverBuilder, SCHEME, ServiceRecord,
    Target, balanced_channel,
};
use beacon_proxy::{
    ProxyServerConfig, ProxyState, descriptor::ReflectionSource, start_proxy_server,
};
use beacon_server::grpc::{GrpcServerConfig, greeter::GreeterService, start_grpc_server};
use clap::{Args, Parser, Subcommand};
use snafu::{ResultExt, Whatever};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Logical name under which the demo greeter advertises itself.
const SERVICE_NAME: &str = "my-service";

#[derive(Debug, Parser)]
#[clap(
    name = "beacon",
    about = "Service discovery and load balancing over etcd",
    version
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Server(ServerArgs),
    Client(ClientArgs),
    Proxy(ProxyArgs),
    Reflect(ReflectArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Start the gRPC server and advertise it in the registry.
Examples:

beacon server --ip 127.0.0.1 --port 15001 --addr localhost:2379

")]
struct ServerArgs {
    /// gRPC server's ip
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,
    /// gRPC server's port
    #[arg(long, default_value = "15001")]
    port: String,
    /// etcd server's address (semicolon-separated endpoints)
    #[arg(long, default_value = "localhost:2379")]
    addr: String,
    /// Registry key namespace
    #[arg(long, default_value = "services")]
    prefix: String,
}

impl ServerArgs {
    async fn run(&self) -> Result<(), Whatever> {
        let store = connect_store(&self.addr, &self.prefix).await?;

        let grpc_config = GrpcServerConfig {
            bind_address: format!("{}:{}", self.ip, self.port),
            server_address: format!("{}:{}", self.ip, self.port),
        };
        let mut grpc = start_grpc_server(grpc_config, vec![Arc::new(GreeterService)])
            .await
            .whatever_context("Failed to start gRPC server")?;
        grpc.wait_for_start()
            .await
            .whatever_context("Failed waiting for gRPC server start")?;

        let registrar = Arc::new(
            Registrar::new(store, new_service_record(&self.ip, &self.port))
                .whatever_context("Failed to build registrar")?,
        );
        let mut registrar_task = {
            let registrar = registrar.clone();
            tokio::spawn(async move { registrar.run().await })
        };

        let mut registrar_done = false;
        tokio::select! {
            () = shutdown_signal() => {}
            result = &mut registrar_task => {
                registrar_done = true;
                // The loop only returns early when registration is fatal.
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        error!(%error, "registration failed");
                        grpc.shutdown();
                        let _ = grpc.wait_for_stop().await;
                        return Err(error).whatever_context("Registration failed");
                    }
                    Err(error) => {
                        error!(%error, "registrar task panicked");
                    }
                }
            }
        }

        info!("shutting down");

        // Unregister first so resolvers drop this instance before the
        // listener goes away, then stop the server.
        registrar.shutdown();
        if !registrar_done {
            let _ = registrar_task.await;
        }
        if let Err(error) = registrar.unregister().await {
            warn!(%error, "unregister failed");
        }

        grpc.shutdown();
        grpc.wait_for_stop()
            .await
            .whatever_context("Failed waiting for gRPC server stop")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Call the greeter service through the balanced channel, once per second.
Examples:

beacon client --addr localhost:2379

")]
struct ClientArgs {
    /// etcd server's address (semicolon-separated endpoints)
    #[arg(long, default_value = "localhost:2379")]
    addr: String,
    /// Registry key namespace
    #[arg(long, default_value = "services")]
    prefix: String,
}

impl ClientArgs {
    async fn run(&self) -> Result<(), Whatever> {
        let store = connect_store(&self.addr, &self.prefix).await?;
        let builder = ResolverBuilder::new(store);

        let target = Target::parse(&format!("{SCHEME}://client/{SERVICE_NAME}"))
            .whatever_context("Failed to parse dial target")?;
        let (channel, resolver) = balanced_channel(&builder, &target)
            .await
            .whatever_context("Failed to build balanced channel")?;

        let mut client = GreeterClient::new(channel);
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    match client
                        .say_hello(SayHelloRequest { name: "Alon".to_string() })
                        .await
                    {
                        Ok(reply) => info!("greeting: {}", reply.into_inner().message),
                        Err(status) => warn!(%status, "could not greet"),
                    }
                }
            }
        }

        resolver.join().await;
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Proxy HTTP+JSON requests onto the gRPC service via server reflection.
Examples:

beacon proxy --addr localhost:2379 --listen 0.0.0.0:3000

")]
struct ProxyArgs {
    /// etcd server's address (semicolon-separated endpoints)
    #[arg(long, default_value = "localhost:2379")]
    addr: String,
    /// Registry key namespace
    #[arg(long, default_value = "services")]
    prefix: String,
    /// HTTP listen address
    #[arg(long, default_value = "0.0.0.0:3000")]
    listen: String,
    /// First path segment under which methods are exposed
    #[arg(long, default_value = "api")]
    api_root: String,
}

impl ProxyArgs {
    async fn run(&self) -> Result<(), Whatever> {
        let store = connect_store(&self.addr, &self.prefix).await?;
        let builder = ResolverBuilder::new(store);

        let target = Target::parse(&format!("{SCHEME}://proxy/{SERVICE_NAME}"))
            .whatever_context("Failed to parse dial target")?;
        let (channel, resolver) = balanced_channel(&builder, &target)
            .await
            .whatever_context("Failed to build balanced channel")?;

        let config = ProxyServerConfig {
            bind_address: self.listen.clone(),
            api_root: self.api_root.clone(),
            ..ProxyServerConfig::default()
        };
        let mut handler = start_proxy_server(config, ProxyState::new(channel))
            .await
            .whatever_context("Failed to start gateway")?;
        handler
            .wait_for_start()
            .await
            .whatever_context("Failed waiting for gateway start")?;

        shutdown_signal().await;
        info!("shutting down");

        handler.shutdown();
        handler
            .wait_for_stop()
            .await
            .whatever_context("Failed waiting for gateway stop")?;
        resolver.join().await;
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

List the services and methods the discovered server exposes via reflection.
Examples:

beacon reflect --addr localhost:2379

")]
struct ReflectArgs {
    /// etcd server's address (semicolon-separated endpoints)
    #[arg(long, default_value = "localhost:2379")]
    addr: String,
    /// Registry key namespace
    #[arg(long, default_value = "services")]
    prefix: String,
}

impl ReflectArgs {
    async fn run(&self) -> Result<(), Whatever> {
        let store = connect_store(&self.addr, &self.prefix).await?;
        let builder = ResolverBuilder::new(store);

        let target = Target::parse(&format!("{SCHEME}://reflect/{SERVICE_NAME}"))
            .whatever_context("Failed to parse dial target")?;
        let (channel, resolver) = balanced_channel(&builder, &target)
            .await
            .whatever_context("Failed to build balanced channel")?;

        let source = ReflectionSource::new(channel);
        let names = source
            .list_service_names()
            .await
            .whatever_context("Failed to list services")?;

        for name in names {
            // The reflection and health services describe the framework,
            // not the application.
            if name.starts_with("grpc.") {
                continue;
            }
            info!("service: {name}");
            let service = source
                .service(&name)
                .await
                .whatever_context("Failed to resolve service")?;
            for method in service.methods() {
                info!("\tmethod: {}", method.name());
            }
        }

        resolver.join().await;
        Ok(())
    }
}

async fn connect_store(addr: &str, prefix: &str) -> Result<EtcdStore, Whatever> {
    let config = DiscoveryConfig {
        endpoints: DiscoveryConfig::parse_endpoints(addr),
        prefix: prefix.to_string(),
        ..DiscoveryConfig::default()
    };
    EtcdStore::connect(config)
        .await
        .whatever_context("Failed to connect to etcd")
}

fn new_service_record(ip: &str, port: &str) -> ServiceRecord {
    ServiceRecord {
        id: Uuid::new_v4().to_string(),
        name: SERVICE_NAME.to_string(),
        endpoints: vec![Endpoint {
            ip: ip.to_string(),
            port: port.to_string(),
            protocol: "GRPC".to_string(),
            version: "v1.0.0".to_string(),
            metadata: BTreeMap::from([("role".to_string(), "service".to_string())]),
        }],
    }
}

/// Resolves on any conventional termination signal: interrupt, terminate,
/// hangup or quit.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        let mut hangup = signal(SignalKind::hangup()).expect("failed to install signal handler");
        let mut quit = signal(SignalKind::quit()).expect("failed to install signal handler");
        tokio::select! {
            _ = terminate.recv() => {}
            _ = hangup.recv() => {}
            _ = quit.recv() => {}
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received interrupt signal"); }
        () = terminate => { info!("received termination signal"); }
    }
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let _guards = beacon_telemetry::logging::init_tracing_subscriber("beacon");
    beacon_telemetry::panic_hook::set_panic_hook();

    let cli = Cli::parse();
    match cli.commands {
        Commands::Server(args) => args.run().await,
        Commands::Client(args) => args.run().await,
        Commands::Proxy(args) => args.run().await,
        Commands::Reflect(args) => args.run().await,
    }
}
