//! C7's transport: a `rumqttc`-backed client shared by ingest
//! (subscribe) and the command engine (publish), with automatic
//! reconnect/resubscribe.

use anyhow::{Result, anyhow};
use domain::topic;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task;
use tracing::{error, info, trace, warn};

#[derive(Clone, Debug)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub pkid: u16,
}

#[async_trait::async_trait]
pub trait MqttPublisherClient: Send + Sync {
    async fn publish_bytes(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<()>;
    fn is_connected(&self) -> bool;
}

#[derive(Clone)]
pub struct MqttClient {
    client: AsyncClient,
    tx: broadcast::Sender<MqttMessage>,
    connected: Arc<AtomicBool>,
    subscriptions: Arc<std::sync::RwLock<Vec<String>>>,
}

impl MqttClient {
    pub async fn new(
        host: &str,
        port: u16,
        client_id: &str,
        last_will: Option<LastWill>,
    ) -> Result<Self> {
        let mut mqttoptions = MqttOptions::new(client_id, host, port);
        mqttoptions.set_keep_alive(Duration::from_secs(20));
        mqttoptions.set_clean_session(false);
        mqttoptions.set_manual_acks(true);

        if let Some(will) = last_will {
            mqttoptions.set_last_will(will);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 250);
        let (tx, _) = broadcast::channel(1024);
        let tx_clone = tx.clone();
        let connected = Arc::new(AtomicBool::new(false));
        let connected_clone = connected.clone();

        let subscriptions = Arc::new(std::sync::RwLock::new(Vec::new()));
        let subscriptions_clone = subscriptions.clone();
        let client_clone = client.clone();

        task::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(notification) => match notification {
                        Event::Incoming(Packet::Publish(publish)) => {
                            match topic::parse(&publish.topic) {
                                Ok(addr) => trace!(
                                    tenant = %addr.tenant,
                                    site = %addr.site,
                                    kind = ?addr.kind,
                                    bytes = publish.payload.len(),
                                    "mqtt publish received"
                                ),
                                Err(_) => trace!(
                                    topic = %publish.topic,
                                    bytes = publish.payload.len(),
                                    "mqtt publish received on an unrecognized topic shape"
                                ),
                            }
                            let msg = MqttMessage {
                                topic: publish.topic,
                                payload: publish.payload.to_vec(),
                                pkid: publish.pkid,
                            };
                            if tx_clone.send(msg).is_err() {
                                // No ingest worker listening yet; happens briefly at startup.
                            }
                        }
                        Event::Incoming(Packet::ConnAck(_)) => {
                            info!("mqtt connected");
                            connected_clone.store(true, Ordering::Relaxed);

                            let subs = subscriptions_clone.read().unwrap().clone();
                            if !subs.is_empty() {
                                info!(count = subs.len(), "re-subscribing after reconnect");
                                for topic in subs {
                                    if let Err(e) =
                                        client_clone.subscribe(&topic, QoS::AtLeastOnce).await
                                    {
                                        error!(%topic, error = %e, "failed to re-subscribe");
                                    }
                                }
                            }
                        }
                        Event::Outgoing(rumqttc::Outgoing::Disconnect) => {
                            connected_clone.store(false, Ordering::Relaxed);
                        }
                        _ => {}
                    },
                    Err(e) => {
                        warn!(error = %e, "mqtt connection error");
                        connected_clone.store(false, Ordering::Relaxed);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            tx,
            connected,
            subscriptions,
        })
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<MqttMessage> {
        self.tx.subscribe()
    }

    pub async fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<()> {
        self.publish_bytes(topic, payload, qos, retain).await
    }

    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        {
            let mut subs = self.subscriptions.write().unwrap();
            if !subs.contains(&topic.to_string()) {
                subs.push(topic.to_string());
            }
        }

        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| anyhow!("failed to subscribe to topic {}: {}", topic, e))?;
        Ok(())
    }

    pub async fn ack(&self, topic: &str, pkid: u16) -> Result<()> {
        let publish = rumqttc::Publish {
            pkid,
            topic: topic.to_string(),
            qos: rumqttc::QoS::AtLeastOnce,
            payload: bytes::Bytes::new(),
            retain: false,
            dup: false,
        };

        self.client
            .ack(&publish)
            .await
            .map_err(|e| anyhow!("failed to ack packet {}: {}", pkid, e))
    }
}

#[async_trait::async_trait]
impl MqttPublisherClient for MqttClient {
    async fn publish_bytes(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<()> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| anyhow!("failed to publish mqtt message: {}", e))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
