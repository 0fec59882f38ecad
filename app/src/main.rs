use std::sync::Arc;

use infrastructure::EventBus;

use crate::core::telemetry::Telemetry;
use crate::gate::catalog::Catalog;
use crate::settings::Settings;

mod accessory;
mod adapter;
mod core;
mod gate;
mod observability;
mod port;
mod settings;

#[tokio::main(flavor = "multi_thread")]
pub async fn main() {
    let settings = Settings::new().expect("Error reading configuration");
    settings.monitoring.init().expect("Error initializing monitoring");

    tracing::info!("Starting gatebridge");

    let mut mqtt_client = settings.mqtt.new_client();

    let telemetry = Arc::new(Telemetry::new());
    let exports = EventBus::new(256);

    let (clusters, registry) = accessory::build(&settings.clusters, exports.emitter());
    let catalog = Arc::new(Catalog::new(clusters, settings.gate.fresh_window()));
    tracing::info!("Catalog initialized with {} accessories", catalog.accessory_count());

    let service = settings
        .gate
        .new_service(catalog, telemetry.clone())
        .expect("Error initializing gate service");

    let homekit_runner = settings
        .homekit
        .new_runner(&mut mqtt_client, registry.clone(), exports.subscribe(), service.clone())
        .await;

    let telemetry_exporter = observability::TelemetryExporter::new(telemetry);

    let http_server_exec = {
        let registry = registry.clone();
        let http_server = settings.http_server.clone();

        async move {
            http_server
                .run_server(move || vec![adapter::input_server::new_routes(registry.clone())])
                .await
                .expect("HTTP server execution failed");
        }
    };

    tracing::info!("Starting main loop");

    tokio::select!(
        _ = mqtt_client.run() => {},
        _ = service.clone().run_cycle() => {},
        _ = homekit_runner.run() => {},
        _ = telemetry_exporter.run() => {},
        _ = http_server_exec => {},
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, draining brokers");
            service.shutdown().await;
        },
    );
}
