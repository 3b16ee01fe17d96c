//! gd-daemon library surface: router, handlers and shared state, exposed so
//! the scenario tests can drive the router without binding a socket.

pub mod api_types;
pub mod routes;
pub mod state;
