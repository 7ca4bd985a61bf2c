pub mod client;
pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod mock;
pub mod participant;
pub mod tools;
pub mod usage;
