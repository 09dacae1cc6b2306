//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `seed`   | `Seed`           |
//! | `config` | `Config`         |

pub mod config;
pub mod seed;
pub mod serve;

pub use config::cmd_config;
pub use seed::cmd_seed;
pub use serve::cmd_serve;
