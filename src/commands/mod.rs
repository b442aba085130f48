pub mod export;
pub mod optimize;
pub mod remote;
pub mod search;
