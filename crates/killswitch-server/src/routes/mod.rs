pub mod audit;
pub mod status;
pub mod switches;
pub mod watch;
