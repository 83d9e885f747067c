// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! An SCMI platform server for a secure execution environment.
//!
//! Agents running in less privileged worlds post SCMI commands into shared-memory mailboxes. The
//! host environment notifies the server through [`ScmiServer::process`], which decodes the message,
//! checks the agent's permissions, drives the platform's clock, reset, voltage and performance
//! back-ends, and writes the response back into the mailbox.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arbitration;
pub mod config;
pub mod devices;
pub mod framework;
pub mod logger;
pub mod mailbox;
pub mod platform;
pub mod protocols;
pub mod server;
pub mod smt;

pub use arm_scmi::ScmiStatus;
pub use server::{ProcessError, ScmiServer, SecureAccess};

/// Identifies an agent. Agent 0 is reserved for the platform, configured agents start at 1.
pub type AgentId = u32;

/// Index of a channel in the server's channel table.
pub type ChannelId = usize;
