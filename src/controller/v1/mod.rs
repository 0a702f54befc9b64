pub mod config_observer;
pub mod controller;
pub mod controller_set;
pub mod crd;
pub mod log_level;
pub mod management_state;
pub mod node_service;
pub mod operator_client;
pub mod starter;
pub mod static_resources;
pub mod sync_state;
