//! Host a Rust file system implementation on a native file system dispatch
//! engine (WinFsp-style).
//!
//! The engine owns request queueing and the worker pool and calls into the
//! host through a fixed table of `extern "C"` entry points. This crate is the
//! layer in between: it correlates per-open native context values with the
//! implementation's (node, descriptor) state, negotiates sizes for every
//! variable-length result, and keeps panics from crossing the boundary.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: FileSystemHost (mount / unmount lifecycle)
//! Layer 2: Dispatch table (26 extern "C" adapters per implementation type)
//! Layer 1: Bridge (context registry, buffer marshaling, fault boundary)
//! Layer 0: ABI records, NtStatus, volume configuration
//! ```
//!
//! # Example
//!
//! ```ignore
//! use rusty_fsp_host::{FileSystemHost, LoopbackEngine, MountOptions};
//!
//! let host = FileSystemHost::new(MemFs::new(), LoopbackEngine::new());
//! host.configure(|config| config.sector_size = 512)?;
//! host.mount(MountOptions::default())?;
//! println!("Mounted at {:?}", host.mount_point());
//! host.unmount();
//! ```

pub mod abi;
pub mod bridge;
pub mod dispatcher;
pub mod engine;
mod error;
pub mod filesystem;
mod host;
mod options;
pub mod status;
pub mod util;

pub use abi::{FileInfo, FullContext};
pub use bridge::Fault;
pub use engine::{
    next_free_drive_letter, DeviceKind, EngineVersion, LoopbackClient, LoopbackEngine, LoopbackStage,
    LoopbackVolume, NativeEngine, NativeVolume, OpenReply, SizeRequest, SizedReply, LOOPBACK_VERSION,
};
pub use error::{ContextError, HostError};
pub use filesystem::{
    BasicInfo, CleanupFlags, DirEntry, FileSystem, Opened, ResolvedReparse, SecurityByName, SecuritySections,
    StreamEntry, VolumeInfo,
};
pub use host::{FileSystemHost, MountState};
pub use options::{DebugLog, GuardStrategy, MountOptions, VolumeConfiguration, VolumeFlags};
pub use status::{FsResult, NtStatus};
