//! Elisa CLI library: the command implementations behind the `elisa`
//! binary, exposed so they can be exercised without a terminal.

pub mod commands;
