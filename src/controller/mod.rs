pub mod controller;
pub mod controller_data;
pub mod leader_election;
pub mod utils;
pub mod v1;
