// SSH模块入口
pub mod client;
pub mod forward;
pub mod profile;
pub mod session;

pub use client::{KeyAuth, SshClient};
pub use forward::{ForwardSpec, LocalForwarder};
pub use profile::{ConnectParams, HostParams};
pub use session::{ExecOptions, Issho, SessionOptions};
