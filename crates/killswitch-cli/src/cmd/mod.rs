pub mod audit;
pub mod config;
pub mod init;
pub mod serve;
pub mod switch;
