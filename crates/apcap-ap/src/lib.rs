//! Access point control and live frame capture.
//!
//! This is the "just works" layer. [`AccessPoint`] opens the link, performs
//! the start handshake on the command channel, runs a background
//! [`CaptureLoop`] that feeds every received payload to a [`FrameSink`], and
//! performs the stop handshake when asked.
//!
//! The command channel and the capture loop never use the transport at the
//! same time: the transport is moved into the capture thread when capture
//! starts and handed back when it is joined.

pub mod capture;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;

pub use capture::{CaptureExit, CaptureHandle, CaptureLoop, CaptureStats, FrameSink, StatsSnapshot};
pub use command::{CommandChannel, ControlCommand};
pub use config::ApConfig;
pub use controller::{AccessPoint, CaptureReport, CaptureState};
pub use error::{ApError, Result};
