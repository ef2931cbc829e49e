//! Service layer: authentication, group fan-out, action handling, vehicle
//! state, routing, and route stream supervision.

pub mod actions;
pub mod auth;
pub mod groups;
pub mod repo;
pub mod routing;
pub mod streamer;
pub mod supervisor;
pub mod vehicle_state;
