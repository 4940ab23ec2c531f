//! Fedmesh
//!
//! Federation overlay daemon for publish/subscribe brokers. Each
//! participating site runs a local broker plus this federator; federators
//! form a neighbor graph and, per federated topic, self-organize into a
//! source-rooted dissemination mesh with a dynamically elected core.
//!
//! Module map:
//! - `config`: YAML file / topology-manager join
//! - `federator`: shared context + inbound dispatcher
//! - `neighbors`: registry of publish handles to neighbor brokers
//! - `worker`: the per-topic mesh state machine
//! - `announcer`: periodic CoreAnn emitter while acting as core

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod announcer;
pub mod config;
pub mod federator;
pub mod neighbors;
pub mod worker;
