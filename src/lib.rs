//! # LabelSync
//!
//! Project loading and reconciliation core for an image annotation tool.
//!
//! LabelSync keeps annotation projects in step with the image files they
//! reference. A user picks a folder or files; new images become data points,
//! stored data points are re-checked against the filesystem, and the UUIDs
//! whose images are still readable form the project's sanity list, which is
//! what a UI shows.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │ PathSelector │──▶│ expand_selection │──▶│ Reconciliation│
//! │ (picker/CLI) │   │ walkdir + PDFs   │   │ Engine        │
//! └──────────────┘   └──────────────────┘   └──────┬────────┘
//!                                                  │
//!                    ┌──────────────┬──────────────┤
//!                    ▼              ▼              ▼
//!              ┌──────────┐  ┌────────────┐  ┌──────────┐
//!              │  Loader  │  │ Annotation │  │  Image   │
//!              │  state   │  │ Store      │  │  Probe   │
//!              └──────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lsync init
//! lsync create Cats --type bbox
//! lsync load Cats --type bbox --folder ./images
//! lsync uuids Cats --type bbox
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed loader errors |
//! | [`reply`] | Reply envelopes |
//! | [`progress`] | Progress counters and reporters |
//! | [`loader`] | Per-project loader state |
//! | [`registry`] | Project identity registry |
//! | [`selector`] | Process-wide selector gate |
//! | [`reconcile`] | Ingestion, validation and deletion passes |
//! | [`workspace`] | Process-scoped facade |
//! | [`traits`] | Picker, rasterizer and image probe seams |
//! | [`store`] | Storage trait and in-memory backend |
//! | [`sqlite_store`] | SQLite backend |
//! | [`connector_fs`] | Folder scanning and PDF page expansion |
//! | [`probe`] | Image decoding and thumbnails |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod connector_fs;
pub mod db;
pub mod error;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod probe;
pub mod progress;
pub mod reconcile;
pub mod registry;
pub mod reply;
pub mod selector;
pub mod sqlite_store;
pub mod store;
pub mod traits;
pub mod workspace;
