//! Prebuilt service runs for the deployed workflows.

mod bed_exit;
mod delivery;

pub use bed_exit::bed_exit_flow;
pub use delivery::delivery_flow;
