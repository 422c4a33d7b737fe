//! # ioprov-backends — concrete `AsyncIoProvider` implementations
//!
//! One variant per native completion API, selected at compile time by
//! `cfg`/feature, plus a scripted test double used throughout this
//! workspace's tests:
//!
//! - [`rio::RioProvider`] — Windows Registered I/O (`cfg(windows)`, feature `rio`)
//! - [`iouring::IoUringProvider`] — Linux io_uring (`cfg(target_os = "linux")`, feature `iouring`)
//! - [`readiness`] — epoll (Linux) / kqueue (BSD, macOS) readiness-based provider
//! - [`mock::MockProvider`] — scripted test double, always available
//!
//! Every variant implements `ioprov_core::AsyncIoProvider`; callers pick
//! the concrete type by platform and hold it behind the trait from
//! there on. There is no runtime provider switch.

pub mod common;
pub mod mock;
pub mod readiness;

#[cfg(all(windows, feature = "rio"))]
pub mod rio;

#[cfg(all(target_os = "linux", feature = "iouring"))]
pub mod iouring;

pub use mock::MockProvider;

#[cfg(all(windows, feature = "rio"))]
pub use rio::RioProvider;

#[cfg(all(target_os = "linux", feature = "iouring"))]
pub use iouring::IoUringProvider;

#[cfg(target_os = "linux")]
pub use readiness::epoll::EpollProvider;

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
pub use readiness::kqueue::KqueueProvider;
