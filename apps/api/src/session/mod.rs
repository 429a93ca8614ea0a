//! Decision sessions: the H-O-L-D state machine, turn-taking, prompts, and the
//! engine and storage around them.

pub mod archive;
pub mod engine;
pub mod guard;
pub mod handlers;
pub mod machine;
pub mod models;
pub mod prompts;
pub mod store;
pub mod turns;
