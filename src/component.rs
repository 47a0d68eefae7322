//! Manager components: pluggable extensions registered at startup.
//!
//! Each component implements only the hooks it cares about. The orchestrators
//! call them in registration order.

use crate::readiness::ReadinessStates;
use crate::types::{ConnectionId, Side};

pub trait ManagerComponent: Send {
    /// Stable name; also keys this component's map-info extra blob.
    fn name(&self) -> &str;

    fn on_start_server(&mut self) {}

    fn on_stop_server(&mut self) {}

    fn on_start_client(&mut self) {}

    fn on_stop_client(&mut self) {}

    fn on_server_scene_loaded(&mut self, _scene: &str) {}

    fn on_client_scene_loaded(&mut self, _scene: &str) {}

    /// Contribute readiness checks for `side`. Called on every gate poll until
    /// the gate latches.
    fn update_ready_states(&mut self, _side: Side, _states: &mut ReadinessStates) {}

    fn on_peer_connected(&mut self, _connection: ConnectionId) {}

    /// Periodic presence refresh with the currently connected set.
    fn on_presence_tick(&mut self, _online: &[ConnectionId]) {}

    fn write_map_info_extra(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn read_map_info_extra(&mut self, _extra: &[u8]) {}

    fn pre_spawn(&mut self, _scene: &str) {}

    fn post_spawn(&mut self, _scene: &str) {}

    fn on_player_admitted(&mut self, _connection: ConnectionId) {}

    /// Session teardown: drop everything tied to the previous session.
    fn clean(&mut self) {}
}
