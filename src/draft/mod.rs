// Draft domain: the card model, candidate sampling, and the coordinator.

pub mod card;
pub mod coordinator;
pub mod sample;
