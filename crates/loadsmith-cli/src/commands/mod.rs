pub mod config;
pub mod parse;
pub mod render;
pub mod run;
