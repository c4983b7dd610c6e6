//! The concrete step bodies a flow can be assembled from.

mod api;
mod custom;
mod device;
mod notify;
mod patrol;
mod robotic;

pub use api::{ApiCall, HttpMethod};
pub use custom::CustomAction;
pub use device::DeviceCommand;
pub use notify::Notification;
pub use patrol::OccupancyPatrol;
pub use robotic::RoboticDispatch;
