pub mod assets;
pub mod contract;
pub mod controller;
pub mod observability;
