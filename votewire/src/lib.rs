#[macro_use]
extern crate serde;

mod aggregator;
mod audit;
mod ballot;
mod breaker;
mod config;
mod decryptor;
mod dedup;
mod eligibility;
mod error;
mod outbox;
mod pipeline;
mod rpc;
mod scheduler;
mod sealer;
mod station;
mod transmitter;
mod verifier;

pub use aggregator::*;
pub use audit::*;
pub use ballot::*;
pub use breaker::*;
pub use config::*;
pub use decryptor::*;
pub use dedup::*;
pub use eligibility::*;
pub use error::*;
pub use outbox::*;
pub use pipeline::*;
pub use rpc::*;
pub use scheduler::*;
pub use sealer::*;
pub use station::*;
pub use transmitter::*;
pub use verifier::*;
