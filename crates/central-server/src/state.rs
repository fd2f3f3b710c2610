use application::{ChangesetCoordinator, CommandEngine, DeviceRegistry, EventBus, TopologyManager};
use infrastructure::MqttClient;
use std::sync::Arc;

/// Everything the HTTP surface (C8) needs a handle to. Every field is
/// an `Arc` over a service that already does its own internal locking;
/// `AppState` itself carries no mutable state.
pub struct AppState {
    pub devices: Arc<DeviceRegistry>,
    pub topology: Arc<TopologyManager>,
    pub commands: Arc<CommandEngine>,
    pub changesets: Arc<ChangesetCoordinator>,
    pub events: Arc<EventBus>,
    pub mqtt_client: MqttClient,
}

impl AppState {
    pub fn new(
        devices: Arc<DeviceRegistry>,
        topology: Arc<TopologyManager>,
        commands: Arc<CommandEngine>,
        changesets: Arc<ChangesetCoordinator>,
        events: Arc<EventBus>,
        mqtt_client: MqttClient,
    ) -> Self {
        Self {
            devices,
            topology,
            commands,
            changesets,
            events,
            mqtt_client,
        }
    }
}
