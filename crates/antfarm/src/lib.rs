//! Antfarm: a test farm for blockchain full-node fleets
//!
//! This crate spawns a configurable number of full-node processes ("ants"),
//! wires them into a gateway topology, drives synthetic workloads against
//! them and checks that the fleet reaches a single consensus view:
//!
//! - **Config resolution**: derived data directories, free ports, external
//!   IP when NAT traversal is unavailable
//! - **Ant supervisor**: one node process, its API client and job runner
//! - **Jobs**: mining, hosting, renting, spending and gateway monitoring
//! - **Renter transfers**: upload a file, download it, compare merkle roots
//! - **Consensus groups**: partition the fleet by agreement on recent tips
//! - **Federation**: join two farms through their `GET /ants` surfaces
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Antfarm                                │
//! │                                                                  │
//! │  AntConfig ──resolve──► ResolvedAntConfig ──start──► Ant (×N)     │
//! │                             │                         │          │
//! │                      PortAllocator            node process       │
//! │                      ExternalIpResolver       NodeClient (HTTP)  │
//! │                                               JobRunner ◄── SyncBarrier
//! │                                                                  │
//! │  connect_ants: ants[1..] ──gateway connect──► ants[0]             │
//! │  consensus_groups: one group == synced ──► SyncBarrier released  │
//! │                                                                  │
//! │  warp: GET /ants ◄──── fetch_ants ──── other farm                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! antfarm --config farm.yaml
//! antfarm --config farm.json --connect 10.0.0.5:3000
//! ```

pub mod addr;
pub mod ant;
pub mod api;
pub mod barrier;
pub mod client;
pub mod config;
pub mod consensus;
pub mod error;
pub mod farm;
pub mod jobs;
pub mod resolve;
pub mod task_group;
pub mod topology;

pub use addr::{ExternalIpResolver, HttpIpResolver, PortAllocator};
pub use ant::{Ant, AntInfo};
pub use barrier::SyncBarrier;
pub use client::{Currency, HttpNodeClient, NodeClient};
pub use config::{AntConfig, AntfarmConfig, JobKind, NatCapability, ResolvedAntConfig};
pub use consensus::{SeenBlocks, consensus_groups};
pub use error::{Error, Result};
pub use farm::Antfarm;
pub use jobs::{JobRunner, UploadedFile};
pub use resolve::{ResolveContext, resolve_ant_config};
pub use task_group::{StopSignal, TaskGroup};
pub use topology::{connect_ants, connect_peers};
