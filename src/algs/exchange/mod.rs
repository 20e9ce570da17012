pub mod data_exchange;
pub mod size_exchange;

pub use data_exchange::exchange_payloads;
pub use size_exchange::exchange_sizes_symmetric;
