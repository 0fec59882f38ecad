use std::sync::Arc;

use rumqttc::v5::{
    AsyncClient, Event, EventLoop, MqttOptions,
    mqttbytes::{QoS, v5::ConnectProperties, v5::Packet},
};
use tokio::sync::mpsc;

use super::{MqttInMessage, MqttSender, MqttSubscription};

pub struct Mqtt {
    client: Arc<AsyncClient>,
    event_loop: EventLoop,
    subscriptions: Vec<SubscriptionHandle>,
}

struct SubscriptionHandle {
    filter: String,
    tx: mpsc::Sender<MqttInMessage>,
}

impl Mqtt {
    pub fn connect(host: &str, port: u16, client_id: &str) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(std::time::Duration::from_secs(5));
        options.set_clean_start(false);

        let mut connect_props = ConnectProperties::new();
        connect_props.session_expiry_interval = 60.into();
        options.set_connect_properties(connect_props);

        let (client, event_loop) = AsyncClient::new(options, 16);

        Self {
            client: Arc::new(client),
            event_loop,
            subscriptions: vec![],
        }
    }

    pub async fn subscribe(&mut self, filter: impl Into<String>) -> anyhow::Result<MqttSubscription> {
        let filter = filter.into();
        let (tx, rx) = mpsc::channel::<MqttInMessage>(32);

        self.client.subscribe(filter.clone(), QoS::AtLeastOnce).await?;
        self.subscriptions.push(SubscriptionHandle { filter, tx });

        Ok(MqttSubscription::new(rx))
    }

    pub fn sender(&self, base_topic: impl Into<String>) -> MqttSender {
        MqttSender::new(self.client.clone(), base_topic)
    }

    /// Drives the connection and forwards publishes to matching subscribers.
    /// Never returns under normal operation.
    pub async fn run(mut self) {
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message: MqttInMessage = match (&publish).try_into() {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::error!("Received MQTT message with non-UTF8 content: {}", e);
                            continue;
                        }
                    };

                    for subscription in self.subscriptions.iter().filter(|s| topic_matches(&s.filter, &message.topic)) {
                        if let Err(e) = subscription.tx.send(message.clone()).await {
                            tracing::error!("Error forwarding MQTT message on {}: {}", message.topic, e);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("MQTT connection error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// Filter matching with the `+` and `#` wildcards.
fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
