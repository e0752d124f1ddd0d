//! Types shared by the registry, the input router, and the control handler

pub mod window_state;
