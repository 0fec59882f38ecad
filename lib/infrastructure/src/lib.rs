mod bus;
mod http;
mod monitoring;
mod mqtt;

pub use bus::{EventBus, EventEmitter, EventListener};
pub use http::client::HttpClientConfig;
pub use http::server::HttpServerConfig;
pub use monitoring::MonitoringConfig;
pub use mqtt::{Mqtt, MqttConfig, MqttInMessage, MqttSender, MqttSubscription};
