pub mod controller;
pub mod forwarding_loop;
pub mod stop_signal;
