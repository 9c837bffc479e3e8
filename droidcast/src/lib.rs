//! # droidcast: Android screen mirroring from the command line
//!
//! Thin front end over `droidcast-core`: lists devices, switches a device
//! to network mode, connects and disconnects network devices, and mirrors
//! one device's raw video stream into a file or stdout until Ctrl-C.
//!
//! Logs always go to stderr so stdout can carry the video stream.

pub mod config;
pub mod service;
