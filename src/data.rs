pub mod contract;
pub mod domain;
pub mod order;
pub mod position;
pub mod trade;
pub mod user;
