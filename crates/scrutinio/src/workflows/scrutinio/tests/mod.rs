mod attendance;
mod common;
mod outcomes;
mod service;
