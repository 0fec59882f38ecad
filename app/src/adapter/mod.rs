pub mod homekit;
pub mod input_server;
