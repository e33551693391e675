pub mod call_input;
pub mod config;
pub mod convai_adapter;
pub mod microphone;
