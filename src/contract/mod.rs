pub mod clients;
pub mod ireconcilable;
pub mod lib;
