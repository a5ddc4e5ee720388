pub mod aggregator;
pub mod calculator;
pub mod config;
pub mod contract;
pub mod controller;
pub mod core_service;
pub mod logging;
pub mod model;
pub mod preference_store;
pub mod ranking;
pub mod runtime;
pub mod section_order;
pub mod shortcuts;
pub mod sources;
pub mod transport;
pub mod worker_pool;
