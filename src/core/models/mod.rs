pub mod account;
pub mod bidder;
