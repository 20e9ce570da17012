//! Communication plumbing: the communicator façade, fixed wire records, and
//! the two-phase (sizes-then-payload) exchange helpers every protocol step
//! is built from.

pub mod communicator;
pub mod exchange;
pub mod wire;

pub use communicator::{CommTag, Communicator, Wait, all_reduce_sum};
pub use exchange::{exchange_payloads, exchange_sizes_symmetric};
