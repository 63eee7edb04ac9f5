pub mod events;
pub mod health;
pub mod scheduler;
pub mod servers;
