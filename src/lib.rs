// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod adapter;
pub mod center;
pub mod channel;
pub mod configs;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod queue;
pub mod rabbitmq;
pub mod storage;
pub mod users;

pub use center::QueueCenter;
