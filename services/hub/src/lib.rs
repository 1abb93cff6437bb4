// hub: chained publish/subscribe relay daemon.
//
// An injector sends a payload to the request/reply receiver; the hub
// republishes it on the fan-out publisher and answers `OOK <hash>`.
// Chained hubs subscribe to each other and re-inject what they hear,
// with a (hash, link) ledger breaking the relay loop so every hub
// observes a payload exactly once.

pub mod chain_client;
pub mod config;
pub mod discovery;
pub mod hub;
pub mod ledger;
pub mod supervisor;
pub mod transport;
