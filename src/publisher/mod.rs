//! MQTT publishing of the next arrival at one stop.

pub mod discovery;
pub mod mqtt;
pub mod schedule;

pub use mqtt::Publisher;
pub use schedule::{PublishSchedule, PublishState, PublishTimer, RushWindow};
