pub mod ledger;
pub mod network;
pub mod node;
pub mod storage;
pub mod sync;
pub mod utils;

#[cfg(test)]
mod tests;
