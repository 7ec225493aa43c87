//! Collaborator traits — the narrow seams to the outside world.

pub mod credentials;
pub mod gateway;
pub mod ledger;
pub mod roster;

pub use credentials::CredentialStore;
pub use gateway::{ConnectionEvent, GatewayConnection, MessagingGateway};
pub use ledger::Ledger;
pub use roster::RosterSource;
