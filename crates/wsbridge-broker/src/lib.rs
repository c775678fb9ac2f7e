//! # wsbridge-broker
//!
//! [`BrokerPort`](wsbridge_core::BrokerPort) implementations.
//!
//! - [`RedisBroker`]: Redis-compatible `PUBLISH`/`SUBSCRIBE`, optional auth and key prefix
//! - [`MemoryBroker`]: in-process channel store
//! - [`create_broker`]: driver-keyed factory

#![deny(unsafe_code)]

pub mod factory;
pub mod memory;
pub mod redis_broker;

pub use factory::create_broker;
pub use memory::MemoryBroker;
pub use redis_broker::{RedisBroker, RedisEndpoint, RedisHandle};
