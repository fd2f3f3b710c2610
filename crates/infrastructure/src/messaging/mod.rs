pub mod mqtt_client;

pub use mqtt_client::{MqttClient, MqttMessage, MqttPublisherClient};
